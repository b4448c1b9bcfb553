//! DNS-backed resolver
//!
//! Addresses come from A/AAAA lookups. The origin ASNs of the primary address
//! are looked up through an IP-to-ASN DNS zone (Team Cymru format by default),
//! within whatever is left of the same time budget.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig as DnsConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError as DnsError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::TokioAsyncResolver;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::config::ResolverConfig;
use crate::error::{AppError, ResolveError};
use crate::models::{DomainKey, ResolvedIdentity};
use crate::resolver::Resolver;

/// Resolver using hickory DNS for addresses and origin ASN
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
    asn_lookup_enabled: bool,
    asn_zone_v4: String,
    asn_zone_v6: String,
}

impl DnsResolver {
    /// Build a resolver from configuration
    ///
    /// Uses the configured nameservers, or the system configuration when
    /// none are given.
    pub fn from_config(config: &ResolverConfig) -> Result<Self, AppError> {
        let (dns_config, opts) = if config.nameservers.is_empty() {
            hickory_resolver::system_conf::read_system_conf().map_err(|e| {
                AppError::Resolver(format!("Failed to read system resolver config: {}", e))
            })?
        } else {
            let mut dns_config = DnsConfig::new();
            for entry in &config.nameservers {
                let addr = parse_nameserver(entry)?;
                dns_config.add_name_server(NameServerConfig::new(addr, Protocol::Udp));
                dns_config.add_name_server(NameServerConfig::new(addr, Protocol::Tcp));
            }
            (dns_config, ResolverOpts::default())
        };

        Ok(Self {
            resolver: TokioAsyncResolver::tokio(dns_config, resolver_opts(opts, config)),
            asn_lookup_enabled: config.asn_lookup_enabled,
            asn_zone_v4: config.asn_zone_v4.clone(),
            asn_zone_v6: config.asn_zone_v6.clone(),
        })
    }

    async fn lookup_addresses(
        &self,
        domain: &DomainKey,
        timeout: Duration,
    ) -> Result<Vec<IpAddr>, ResolveError> {
        // Fully qualified so search domains are never appended
        let fqdn = format!("{}.", domain);

        match tokio::time::timeout(timeout, self.resolver.lookup_ip(fqdn)).await {
            Err(_) => Err(ResolveError::Timeout(timeout)),
            Ok(Ok(lookup)) => Ok(lookup.iter().collect()),
            Ok(Err(e)) => map_dns_error(domain, e, timeout),
        }
    }

    async fn lookup_asns(&self, ip: IpAddr) -> Result<Vec<u32>, DnsError> {
        let name = asn_query_name(ip, &self.asn_zone_v4, &self.asn_zone_v6);
        let answer = self.resolver.txt_lookup(name).await?;

        Ok(answer
            .iter()
            .map(|txt| {
                let text: String = txt
                    .txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part))
                    .collect();
                parse_origin_asns(&text)
            })
            .find(|asns| !asns.is_empty())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Resolver for DnsResolver {
    fn name(&self) -> &str {
        "dns"
    }

    #[instrument(skip(self, domain), fields(domain = %domain))]
    async fn resolve(
        &self,
        domain: &DomainKey,
        timeout: Duration,
    ) -> Result<ResolvedIdentity, ResolveError> {
        let deadline = Instant::now() + timeout;

        let ips = match domain.ip_literal() {
            Some(ip) => vec![ip],
            None => self.lookup_addresses(domain, timeout).await?,
        };

        let mut asns = Vec::new();
        if let (true, Some(primary)) = (self.asn_lookup_enabled, ips.first().copied()) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("No time left for ASN lookup");
            } else {
                match tokio::time::timeout(remaining, self.lookup_asns(primary)).await {
                    Ok(Ok(found)) => asns = found,
                    Ok(Err(e)) => debug!(ip = %primary, error = %e, "ASN lookup failed"),
                    Err(_) => debug!(ip = %primary, "ASN lookup timed out"),
                }
            }
        }

        debug!(addresses = ips.len(), asns = ?asns, "Domain resolved");
        Ok(ResolvedIdentity::new(domain.clone(), ips, None).with_origin_asns(asns))
    }
}

/// Resolver options for single-shot lookups
///
/// Per-call budgets are enforced by the caller's timeout. The answer cache is
/// disabled so the result cache is the only caching layer.
fn resolver_opts(mut opts: ResolverOpts, config: &ResolverConfig) -> ResolverOpts {
    opts.timeout = config.timeout();
    opts.attempts = 1;
    opts.use_hosts_file = false;
    opts.cache_size = 0;
    opts
}

/// Map a hickory error onto the resolver taxonomy
///
/// NODATA (the name exists but has no address records) yields an empty
/// address list rather than an error.
fn map_dns_error(
    domain: &DomainKey,
    err: DnsError,
    timeout: Duration,
) -> Result<Vec<IpAddr>, ResolveError> {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => {
            if *response_code == ResponseCode::NXDomain {
                Err(ResolveError::NxDomain(domain.to_string()))
            } else if *response_code == ResponseCode::NoError {
                Ok(Vec::new())
            } else {
                Err(ResolveError::Failed(format!(
                    "{}: {}",
                    domain, response_code
                )))
            }
        }
        ResolveErrorKind::Timeout => Err(ResolveError::Timeout(timeout)),
        _ => Err(ResolveError::Failed(err.to_string())),
    }
}

/// Parse `ip` or `ip:port` nameserver entries
fn parse_nameserver(entry: &str) -> Result<SocketAddr, AppError> {
    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Ok(addr);
    }
    entry
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, 53))
        .map_err(|_| AppError::Config(format!("Invalid nameserver address: {}", entry)))
}

/// Build the origin query name for an address
///
/// IPv4 uses reversed octets, IPv6 reversed nibbles.
pub fn asn_query_name(ip: IpAddr, zone_v4: &str, zone_v6: &str) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{}.{}.{}.{}.{}.", d, c, b, a, zone_v4.trim_end_matches('.'))
        }
        IpAddr::V6(v6) => {
            let mut name = String::with_capacity(64 + zone_v6.len() + 1);
            for byte in v6.octets().iter().rev() {
                name.push_str(&format!("{:x}.{:x}.", byte & 0x0f, byte >> 4));
            }
            name.push_str(zone_v6.trim_end_matches('.'));
            name.push('.');
            name
        }
    }
}

/// Parse the origin ASNs from an origin TXT answer
///
/// Answers look like `15169 | 8.8.8.0/24 | US | arin | 2023-12-28`; the
/// first field may list several ASNs separated by spaces.
pub fn parse_origin_asns(text: &str) -> Vec<u32> {
    text.split('|')
        .next()
        .unwrap_or_default()
        .split_whitespace()
        .filter_map(|token| token.trim_start_matches("AS").parse().ok())
        .collect()
}
