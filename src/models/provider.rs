//! Provider records and match rules
//!
//! A provider is a verified green hosting company together with the rules
//! that attribute network identity to it.

use std::fmt;
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::models::domain::{normalize, DomainKey};

/// Provider identifier
pub type ProviderId = u64;

/// A verified green hosting provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    /// Unique provider id
    pub id: ProviderId,

    /// Display name returned as `hosted_by`
    pub name: String,

    /// Provider website
    #[serde(default)]
    pub website: Option<String>,

    /// Partner program level, if any
    #[serde(default)]
    pub partner: Option<String>,

    /// Inactive providers are kept in the file but never matched
    #[serde(default = "default_active")]
    pub active: bool,

    /// Match rules owned by this provider
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub rules: Vec<MatchRule>,
}

fn default_active() -> bool {
    true
}

impl ProviderRecord {
    /// Create an active provider with no rules
    pub fn new(id: ProviderId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            website: None,
            partner: None,
            active: true,
            rules: Vec::new(),
        }
    }

    /// Add a rule (builder style)
    pub fn with_rule(mut self, rule: MatchRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Set the website (builder style)
    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }
}

/// A single attribution rule
///
/// Written in provider files as single-key maps, e.g.
/// `{ ip_range: "192.0.2.0/24" }`, `{ asn: 64500 }` or
/// `{ domain: "*.example.com" }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// Addresses inside a CIDR block
    IpRange(IpNet),
    /// Addresses originated by an autonomous system
    Asn(u32),
    /// Domain names matching a pattern
    Domain(DomainPattern),
}

impl MatchRule {
    /// Rule kind as a short string
    pub fn kind(&self) -> &'static str {
        match self {
            MatchRule::IpRange(_) => "ip_range",
            MatchRule::Asn(_) => "asn",
            MatchRule::Domain(_) => "domain",
        }
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchRule::IpRange(net) => write!(f, "ip_range:{}", net),
            MatchRule::Asn(asn) => write!(f, "asn:{}", asn),
            MatchRule::Domain(pattern) => write!(f, "domain:{}", pattern),
        }
    }
}

/// Domain pattern: exact host or suffix match
///
/// Written as `example.com` (exact) or `*.example.com` (the apex and
/// every subdomain). The host part is normalized on parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DomainPattern {
    /// Matches exactly this host
    Exact(DomainKey),
    /// Matches this host and all of its subdomains
    Suffix(DomainKey),
}

impl FromStr for DomainPattern {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().strip_prefix("*.") {
            Some(base) => Ok(DomainPattern::Suffix(normalize(base)?)),
            None => Ok(DomainPattern::Exact(normalize(s)?)),
        }
    }
}

impl TryFrom<String> for DomainPattern {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DomainPattern> for String {
    fn from(pattern: DomainPattern) -> Self {
        pattern.to_string()
    }
}

impl fmt::Display for DomainPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainPattern::Exact(host) => write!(f, "{}", host),
            DomainPattern::Suffix(base) => write!(f, "*.{}", base),
        }
    }
}
