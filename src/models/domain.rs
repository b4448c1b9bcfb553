//! Domain key and normalization
//!
//! Every check starts by turning raw user input (a bare host, a URL, a host
//! with port, an IP literal) into a canonical [`DomainKey`]. Two inputs that
//! denote the same host always produce the same key.

use std::borrow::Borrow;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Maximum length of a hostname in its ASCII form
pub const MAX_DOMAIN_LEN: usize = 253;

/// Maximum length of a single label
pub const MAX_LABEL_LEN: usize = 63;

/// Canonicalized domain used as cache and registry lookup key
///
/// Lowercase ASCII (punycode for internationalized names), without scheme,
/// userinfo, port, path, query or trailing dot. IP literals are kept in their
/// canonical textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainKey(String);

impl DomainKey {
    /// Normalize raw input into a domain key
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        normalize(raw)
    }

    /// The canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the address if this key is an IP literal
    pub fn ip_literal(&self) -> Option<IpAddr> {
        self.0.parse().ok()
    }

    /// Iterate over the key and each parent domain, most specific first
    ///
    /// `a.b.example.com` yields `a.b.example.com`, `b.example.com`,
    /// `example.com`, `com`. IP literals yield only themselves.
    pub fn suffixes(&self) -> impl Iterator<Item = &str> {
        let is_ip = self.ip_literal().is_some();
        let s = self.0.as_str();
        let mut next = Some(0usize);
        std::iter::from_fn(move || {
            let start = next?;
            let rest = &s[start..];
            next = if is_ip {
                None
            } else {
                rest.find('.').map(|i| start + i + 1)
            };
            Some(rest)
        })
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DomainKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DomainKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for DomainKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize(s)
    }
}

/// Normalize raw domain input
///
/// Accepts bare hosts, full URLs, `host:port`, bracketed or bare IPv6
/// literals and internationalized names. Pure function.
pub fn normalize(raw: &str) -> Result<DomainKey, DomainError> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(DomainError::Empty);
    }

    let host = extract_host(input)?;
    let host = host.strip_suffix('.').unwrap_or(host);
    if host.is_empty() {
        return Err(DomainError::Empty);
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(DomainKey(ip.to_string()));
    }

    // IDNA mapping, lowercasing and punycode conversion
    let ascii = match url::Host::parse(host) {
        Ok(url::Host::Domain(domain)) => domain,
        Ok(_) => return Err(DomainError::InvalidHost(host.to_string())),
        Err(e) => return Err(DomainError::InvalidHost(format!("{}: {}", host, e))),
    };

    validate_hostname(&ascii)?;
    Ok(DomainKey(ascii))
}

/// Strip scheme, userinfo, port, path, query and fragment
fn extract_host(input: &str) -> Result<&str, DomainError> {
    let mut rest = input;

    if let Some(idx) = rest.find("://") {
        let scheme = &rest[..idx];
        let is_scheme = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if is_scheme {
            rest = &rest[idx + 3..];
        }
    } else if let Some(stripped) = rest.strip_prefix("//") {
        rest = stripped;
    }

    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let mut authority = &rest[..end];

    if let Some(at) = authority.rfind('@') {
        authority = &authority[at + 1..];
    }

    if let Some(inner) = authority.strip_prefix('[') {
        let close = inner
            .find(']')
            .ok_or_else(|| DomainError::InvalidHost(authority.to_string()))?;
        let after = &inner[close + 1..];
        if !after.is_empty() {
            check_port(after.strip_prefix(':').unwrap_or("x"), authority)?;
        }
        return Ok(&inner[..close]);
    }

    match authority.matches(':').count() {
        0 => Ok(authority),
        1 => {
            let (host, port) = authority
                .split_once(':')
                .ok_or_else(|| DomainError::InvalidHost(authority.to_string()))?;
            check_port(port, authority)?;
            Ok(host)
        }
        // Bare IPv6 literal
        _ => Ok(authority),
    }
}

fn check_port(port: &str, authority: &str) -> Result<(), DomainError> {
    if port.is_empty() || port.parse::<u16>().is_ok() {
        Ok(())
    } else {
        Err(DomainError::InvalidHost(authority.to_string()))
    }
}

fn validate_hostname(host: &str) -> Result<(), DomainError> {
    if host.len() > MAX_DOMAIN_LEN {
        return Err(DomainError::TooLong(host.len()));
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return Err(DomainError::InvalidHost(format!(
            "{}: a registrable domain needs at least two labels",
            host
        )));
    }

    for label in &labels {
        let valid = !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if !valid {
            return Err(DomainError::InvalidLabel(label.to_string()));
        }
    }

    if let Some(tld) = labels.last() {
        if tld.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::InvalidLabel(tld.to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> String {
        normalize(raw).unwrap().as_str().to_string()
    }

    // Test 1: Case, scheme, trailing dot and path all collapse to one key
    #[test]
    fn test_equivalent_inputs_normalize_identically() {
        let inputs = [
            "climateaction.tech",
            "ClimateAction.TECH",
            "climateaction.tech.",
            "https://climateaction.tech",
            "http://climateaction.tech/about?x=1#top",
            "HTTPS://ClimateAction.Tech:443/",
            "  climateaction.tech  ",
            "//climateaction.tech/path",
            "user:pass@climateaction.tech",
        ];

        for input in inputs {
            assert_eq!(key(input), "climateaction.tech", "input: {}", input);
        }
    }

    // Test 2: Empty input is rejected
    #[test]
    fn test_empty_input() {
        assert_eq!(normalize(""), Err(DomainError::Empty));
        assert_eq!(normalize("   "), Err(DomainError::Empty));
        assert_eq!(normalize("https://"), Err(DomainError::Empty));
        assert_eq!(normalize("."), Err(DomainError::Empty));
    }

    // Test 3: Invalid characters are rejected
    #[test]
    fn test_invalid_label_characters() {
        assert!(normalize("example-invalid-domain-!!").is_err());
        assert!(normalize("exa_mple.com").is_err());
        assert!(normalize("bad..example.com").is_err());
    }

    // Test 4: Hyphen placement is enforced
    #[test]
    fn test_label_hyphen_rules() {
        assert!(matches!(
            normalize("-example.com"),
            Err(DomainError::InvalidLabel(_))
        ));
        assert!(matches!(
            normalize("example-.com"),
            Err(DomainError::InvalidLabel(_))
        ));
        assert_eq!(key("my-site.example.com"), "my-site.example.com");
    }

    // Test 5: Length limits
    #[test]
    fn test_length_limits() {
        let long_label = "a".repeat(64);
        assert!(matches!(
            normalize(&format!("{}.com", long_label)),
            Err(DomainError::InvalidLabel(_))
        ));

        let label = "a".repeat(63);
        let too_long = format!("{0}.{0}.{0}.{0}.com", label);
        assert!(matches!(normalize(&too_long), Err(DomainError::TooLong(_))));

        let ok = format!("{0}.{0}.{0}.com", label);
        assert_eq!(key(&ok), ok);
    }

    // Test 6: Internationalized names become punycode
    #[test]
    fn test_idn_to_punycode() {
        assert_eq!(key("bücher.example"), "xn--bcher-kva.example");
        assert_eq!(key("BÜCHER.example"), "xn--bcher-kva.example");
        assert_eq!(key("xn--bcher-kva.example"), "xn--bcher-kva.example");
    }

    // Test 7: IP literals are canonicalized
    #[test]
    fn test_ip_literals() {
        assert_eq!(key("192.0.2.10"), "192.0.2.10");
        assert_eq!(key("http://192.0.2.10:8080/x"), "192.0.2.10");
        assert_eq!(key("[2001:DB8::1]"), "2001:db8::1");
        assert_eq!(key("http://[2001:db8:0::1]:443/"), "2001:db8::1");
        assert_eq!(key("2001:db8::1"), "2001:db8::1");

        let k = normalize("192.0.2.10").unwrap();
        assert!(k.ip_literal().is_some());
        assert!(normalize("example.com").unwrap().ip_literal().is_none());
    }

    // Test 8: Single label and numeric TLD are rejected
    #[test]
    fn test_single_label_and_numeric_tld() {
        assert!(normalize("localhost").is_err());
        assert!(normalize("example.123").is_err());
    }

    // Test 9: Bad port is rejected
    #[test]
    fn test_bad_port() {
        assert!(matches!(
            normalize("example.com:http"),
            Err(DomainError::InvalidHost(_))
        ));
        assert_eq!(key("example.com:"), "example.com");
    }

    // Test 10: Suffix iteration
    #[test]
    fn test_suffixes() {
        let k = normalize("a.b.example.com").unwrap();
        let suffixes: Vec<&str> = k.suffixes().collect();
        assert_eq!(
            suffixes,
            vec!["a.b.example.com", "b.example.com", "example.com", "com"]
        );

        let ip = normalize("192.0.2.1").unwrap();
        assert_eq!(ip.suffixes().collect::<Vec<_>>(), vec!["192.0.2.1"]);
    }

    // Test 11: FromStr and serde use the canonical form
    #[test]
    fn test_from_str_and_serde() {
        let k: DomainKey = "Example.COM".parse().unwrap();
        assert_eq!(k.to_string(), "example.com");

        let json = serde_json::to_string(&k).unwrap();
        assert_eq!(json, r#""example.com""#);
    }
}
