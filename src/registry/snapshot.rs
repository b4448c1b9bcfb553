//! Immutable registry snapshot with precomputed match indexes
//!
//! A snapshot is built once from a list of providers and never mutated.
//! Matching precedence is: exact domain pattern, suffix domain pattern,
//! longest-prefix IP range, then ASN. Ties inside a level go to the provider
//! listed first.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::Serialize;

use crate::error::RegistryError;
use crate::models::{
    DomainKey, DomainPattern, HostedBy, MatchResult, MatchRule, ProviderId, ProviderRecord,
    ResolvedIdentity,
};

/// Index entry pointing at a provider by position
#[derive(Debug, Clone, Copy)]
struct RuleRef {
    provider: usize,
}

/// IP range entry, kept sorted by prefix length (desc) then provider order
#[derive(Debug, Clone)]
struct RangeEntry {
    net: IpNet,
    provider: usize,
}

/// Immutable view of the active provider records
#[derive(Debug)]
pub struct RegistrySnapshot {
    version: u64,
    loaded_at: DateTime<Utc>,
    providers: Vec<ProviderRecord>,
    exact_domains: HashMap<DomainKey, RuleRef>,
    suffix_domains: HashMap<DomainKey, RuleRef>,
    ip_ranges: Vec<RangeEntry>,
    asns: HashMap<u32, RuleRef>,
}

/// Provider summary for listings
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    pub id: ProviderId,
    pub name: String,
    pub website: Option<String>,
    pub partner: Option<String>,
    pub ip_ranges: usize,
    pub asns: usize,
    pub domains: usize,
}

impl RegistrySnapshot {
    /// Build a snapshot from provider records
    ///
    /// Inactive providers are dropped. Provider ids must be unique.
    pub fn build(records: Vec<ProviderRecord>, version: u64) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for record in &records {
            if !seen.insert(record.id) {
                return Err(RegistryError::Invalid(format!(
                    "duplicate provider id {}",
                    record.id
                )));
            }
            if record.name.trim().is_empty() {
                return Err(RegistryError::Invalid(format!(
                    "provider {} has an empty name",
                    record.id
                )));
            }
        }

        let providers: Vec<ProviderRecord> = records.into_iter().filter(|r| r.active).collect();

        let mut exact_domains = HashMap::new();
        let mut suffix_domains = HashMap::new();
        let mut ip_ranges = Vec::new();
        let mut asns = HashMap::new();

        for (idx, provider) in providers.iter().enumerate() {
            let rule_ref = RuleRef { provider: idx };
            for rule in &provider.rules {
                match rule {
                    MatchRule::Domain(DomainPattern::Exact(host)) => {
                        exact_domains.entry(host.clone()).or_insert(rule_ref);
                    }
                    MatchRule::Domain(DomainPattern::Suffix(base)) => {
                        suffix_domains.entry(base.clone()).or_insert(rule_ref);
                    }
                    MatchRule::IpRange(net) => ip_ranges.push(RangeEntry {
                        net: net.trunc(),
                        provider: idx,
                    }),
                    MatchRule::Asn(asn) => {
                        asns.entry(*asn).or_insert(rule_ref);
                    }
                }
            }
        }

        // Stable sort keeps provider order among equal prefix lengths
        ip_ranges.sort_by(|a, b| b.net.prefix_len().cmp(&a.net.prefix_len()));

        Ok(Self {
            version,
            loaded_at: Utc::now(),
            providers,
            exact_domains,
            suffix_domains,
            ip_ranges,
            asns,
        })
    }

    /// Empty snapshot
    pub fn empty() -> Self {
        Self {
            version: 0,
            loaded_at: Utc::now(),
            providers: Vec::new(),
            exact_domains: HashMap::new(),
            suffix_domains: HashMap::new(),
            ip_ranges: Vec::new(),
            asns: HashMap::new(),
        }
    }

    /// Snapshot version, increasing with every swap
    pub fn version(&self) -> u64 {
        self.version
    }

    /// When this snapshot was built
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Active providers in priority order
    pub fn providers(&self) -> &[ProviderRecord] {
        &self.providers
    }

    /// Provider listing with rule counts
    pub fn summaries(&self) -> Vec<ProviderSummary> {
        self.providers
            .iter()
            .map(|p| ProviderSummary {
                id: p.id,
                name: p.name.clone(),
                website: p.website.clone(),
                partner: p.partner.clone(),
                ip_ranges: p.rules.iter().filter(|r| r.kind() == "ip_range").count(),
                asns: p.rules.iter().filter(|r| r.kind() == "asn").count(),
                domains: p.rules.iter().filter(|r| r.kind() == "domain").count(),
            })
            .collect()
    }

    /// Match a resolved identity against all rules
    pub fn match_identity(&self, identity: &ResolvedIdentity) -> Option<MatchResult> {
        if let Some(m) = self.match_domain(&identity.domain) {
            return Some(m);
        }

        if let Some(m) = self.match_ips(&identity.ip_addresses) {
            return Some(m);
        }

        // Multi-origin prefixes: the first origin with a rule wins
        identity.origin_asns.iter().find_map(|asn| {
            self.asns.get(asn).map(|r| MatchResult {
                provider: HostedBy::from(&self.providers[r.provider]),
                rule: MatchRule::Asn(*asn),
                ip: identity.primary_ip(),
            })
        })
    }

    /// Match a domain against domain pattern rules only
    pub fn match_domain(&self, domain: &DomainKey) -> Option<MatchResult> {
        if let Some(r) = self.exact_domains.get(domain) {
            return Some(MatchResult {
                provider: HostedBy::from(&self.providers[r.provider]),
                rule: MatchRule::Domain(DomainPattern::Exact(domain.clone())),
                ip: None,
            });
        }

        for suffix in domain.suffixes() {
            if let Some((base, r)) = self.suffix_domains.get_key_value(suffix) {
                return Some(MatchResult {
                    provider: HostedBy::from(&self.providers[r.provider]),
                    rule: MatchRule::Domain(DomainPattern::Suffix(base.clone())),
                    ip: None,
                });
            }
        }

        None
    }

    /// Longest-prefix match over every resolved address
    fn match_ips(&self, ips: &[IpAddr]) -> Option<MatchResult> {
        if ips.is_empty() {
            return None;
        }

        self.ip_ranges.iter().find_map(|entry| {
            ips.iter()
                .find(|ip| entry.net.contains(*ip))
                .map(|ip| MatchResult {
                    provider: HostedBy::from(&self.providers[entry.provider]),
                    rule: MatchRule::IpRange(entry.net),
                    ip: Some(*ip),
                })
        })
    }

    /// Total number of rules across active providers
    pub fn rule_count(&self) -> usize {
        self.providers.iter().map(|p| p.rules.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::normalize;

    fn key(s: &str) -> DomainKey {
        normalize(s).unwrap()
    }

    fn ip_rule(cidr: &str) -> MatchRule {
        MatchRule::IpRange(cidr.parse().unwrap())
    }

    fn domain_rule(pattern: &str) -> MatchRule {
        MatchRule::Domain(pattern.parse().unwrap())
    }

    fn identity(domain: &str, ips: &[&str], asn: Option<u32>) -> ResolvedIdentity {
        ResolvedIdentity::new(
            key(domain),
            ips.iter().map(|s| s.parse().unwrap()).collect(),
            asn,
        )
    }

    fn sample() -> RegistrySnapshot {
        let providers = vec![
            ProviderRecord::new(1, "Wide Green")
                .with_rule(ip_rule("10.0.0.0/8"))
                .with_rule(MatchRule::Asn(64500)),
            ProviderRecord::new(2, "Narrow Green")
                .with_rule(ip_rule("10.1.0.0/16"))
                .with_rule(domain_rule("*.narrow.example")),
            ProviderRecord::new(3, "Exact Green")
                .with_rule(domain_rule("www.narrow.example"))
                .with_rule(MatchRule::Asn(64501)),
            ProviderRecord::new(4, "Same Prefix").with_rule(ip_rule("10.1.0.0/16")),
        ];
        RegistrySnapshot::build(providers, 1).unwrap()
    }

    // Test 1: Single CIDR match yields that provider
    #[test]
    fn test_ip_range_match() {
        let snapshot = sample();
        let m = snapshot
            .match_identity(&identity("plain.example", &["10.200.0.1"], None))
            .unwrap();
        assert_eq!(m.provider.name, "Wide Green");
        assert_eq!(m.ip, Some("10.200.0.1".parse().unwrap()));
    }

    // Test 2: Longest prefix wins, ties go to the earlier provider
    #[test]
    fn test_longest_prefix_and_tie_break() {
        let snapshot = sample();
        let m = snapshot
            .match_identity(&identity("plain.example", &["10.1.2.3"], None))
            .unwrap();
        assert_eq!(m.provider.id, 2);
        assert_eq!(m.rule, ip_rule("10.1.0.0/16"));
    }

    // Test 3: Longest prefix is chosen across all resolved addresses
    #[test]
    fn test_longest_prefix_across_addresses() {
        let snapshot = sample();
        let m = snapshot
            .match_identity(&identity("plain.example", &["10.9.9.9", "10.1.0.5"], None))
            .unwrap();
        assert_eq!(m.provider.id, 2);
        assert_eq!(m.ip, Some("10.1.0.5".parse().unwrap()));
    }

    // Test 4: Exact domain beats suffix, IP and ASN
    #[test]
    fn test_exact_domain_precedence() {
        let snapshot = sample();
        let m = snapshot
            .match_identity(&identity("www.narrow.example", &["10.1.2.3"], Some(64500)))
            .unwrap();
        assert_eq!(m.provider.id, 3);
        assert_eq!(m.rule.kind(), "domain");
    }

    // Test 5: Suffix domain beats IP ranges
    #[test]
    fn test_suffix_domain_precedence() {
        let snapshot = sample();
        let m = snapshot
            .match_identity(&identity("api.narrow.example", &["10.200.0.1"], None))
            .unwrap();
        assert_eq!(m.provider.id, 2);

        let apex = snapshot
            .match_identity(&identity("narrow.example", &[], None))
            .unwrap();
        assert_eq!(apex.provider.id, 2);
    }

    // Test 6: ASN is used only when nothing else matches
    #[test]
    fn test_asn_fallback() {
        let snapshot = sample();
        let m = snapshot
            .match_identity(&identity("plain.example", &["192.0.2.1"], Some(64501)))
            .unwrap();
        assert_eq!(m.provider.id, 3);
        assert_eq!(m.rule, MatchRule::Asn(64501));

        let ip_wins = snapshot
            .match_identity(&identity("plain.example", &["10.1.0.1"], Some(64501)))
            .unwrap();
        assert_eq!(ip_wins.provider.id, 2);
    }

    // Test 7: Every origin ASN is tried in answer order
    #[test]
    fn test_multi_origin_asn() {
        let snapshot = sample();
        let second = identity("plain.example", &["192.0.2.1"], None)
            .with_origin_asns(vec![13335, 64501]);
        let m = snapshot.match_identity(&second).unwrap();
        assert_eq!(m.provider.id, 3);
        assert_eq!(m.rule, MatchRule::Asn(64501));

        let both = identity("plain.example", &["192.0.2.1"], None)
            .with_origin_asns(vec![64501, 64500]);
        assert_eq!(snapshot.match_identity(&both).unwrap().provider.id, 3);

        let none = identity("plain.example", &["192.0.2.1"], None)
            .with_origin_asns(vec![13335, 209242]);
        assert!(snapshot.match_identity(&none).is_none());
    }

    // Test 8: No rule matches
    #[test]
    fn test_no_match() {
        let snapshot = sample();
        assert!(snapshot
            .match_identity(&identity("plain.example", &["192.0.2.1"], Some(1)))
            .is_none());
        assert!(snapshot
            .match_identity(&identity("plain.example", &[], None))
            .is_none());
    }

    // Test 9: Inactive providers never match
    #[test]
    fn test_inactive_provider_skipped() {
        let mut inactive = ProviderRecord::new(1, "Retired").with_rule(ip_rule("192.0.2.0/24"));
        inactive.active = false;
        let snapshot = RegistrySnapshot::build(vec![inactive], 1).unwrap();

        assert!(snapshot.providers().is_empty());
        assert!(snapshot
            .match_identity(&identity("plain.example", &["192.0.2.1"], None))
            .is_none());
    }

    // Test 10: Duplicate ids are rejected
    #[test]
    fn test_duplicate_ids_rejected() {
        let result = RegistrySnapshot::build(
            vec![ProviderRecord::new(1, "A"), ProviderRecord::new(1, "B")],
            1,
        );
        assert!(matches!(result, Err(RegistryError::Invalid(_))));
    }

    // Test 11: Host bits in a CIDR are ignored
    #[test]
    fn test_cidr_host_bits_truncated() {
        let snapshot = RegistrySnapshot::build(
            vec![ProviderRecord::new(1, "A").with_rule(ip_rule("192.0.2.77/24"))],
            1,
        )
        .unwrap();
        let m = snapshot
            .match_identity(&identity("plain.example", &["192.0.2.1"], None))
            .unwrap();
        assert_eq!(m.rule, ip_rule("192.0.2.0/24"));
    }

    // Test 12: IPv6 ranges
    #[test]
    fn test_ipv6_range() {
        let snapshot = RegistrySnapshot::build(
            vec![ProviderRecord::new(9, "Six").with_rule(ip_rule("2001:db8::/32"))],
            1,
        )
        .unwrap();
        let m = snapshot
            .match_identity(&identity("plain.example", &["2001:db8::42"], None))
            .unwrap();
        assert_eq!(m.provider.id, 9);
    }

    // Test 13: Summaries count rules by kind
    #[test]
    fn test_summaries() {
        let snapshot = sample();
        let summaries = snapshot.summaries();
        assert_eq!(summaries.len(), 4);
        assert_eq!(summaries[0].ip_ranges, 1);
        assert_eq!(summaries[0].asns, 1);
        assert_eq!(summaries[1].domains, 1);
        assert_eq!(snapshot.rule_count(), 7);
    }
}
