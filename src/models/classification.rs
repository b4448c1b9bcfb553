//! Resolution and classification models
//!
//! [`ResolvedIdentity`] is the transient output of one resolution attempt.
//! [`ClassificationResult`] is the immutable value owned by the result cache,
//! and [`GreenCheckResponse`] is its wire shape.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::domain::DomainKey;
use crate::models::provider::{MatchRule, ProviderId, ProviderRecord};

/// Network identity of a domain at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    /// The domain that was resolved
    pub domain: DomainKey,

    /// Resolved addresses in answer order
    pub ip_addresses: Vec<IpAddr>,

    /// Origin ASN of the primary address, when known
    pub asn: Option<u32>,

    /// Every origin ASN announced for the primary address, in answer order
    #[serde(default)]
    pub origin_asns: Vec<u32>,

    /// When the resolution completed
    pub resolved_at: DateTime<Utc>,
}

impl ResolvedIdentity {
    /// Create an identity stamped with the current time
    pub fn new(domain: DomainKey, ip_addresses: Vec<IpAddr>, asn: Option<u32>) -> Self {
        Self {
            domain,
            ip_addresses,
            asn,
            origin_asns: asn.into_iter().collect(),
            resolved_at: Utc::now(),
        }
    }

    /// Replace the origin ASNs; the first one becomes the primary ASN
    pub fn with_origin_asns(mut self, asns: Vec<u32>) -> Self {
        self.asn = asns.first().copied();
        self.origin_asns = asns;
        self
    }

    /// The address used for ASN lookup
    pub fn primary_ip(&self) -> Option<IpAddr> {
        self.ip_addresses.first().copied()
    }
}

/// Denormalized provider details captured at match time
///
/// Results keep these even if the provider is later removed from the
/// registry; they stay valid until the entry expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedBy {
    pub id: ProviderId,
    pub name: String,
    pub website: Option<String>,
    pub partner: Option<String>,
}

impl From<&ProviderRecord> for HostedBy {
    fn from(record: &ProviderRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            website: record.website.clone(),
            partner: record.partner.clone(),
        }
    }
}

/// A successful registry match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// The matched provider
    pub provider: HostedBy,

    /// The rule that matched
    pub rule: MatchRule,

    /// The address that satisfied the rule, for IP and ASN matches
    pub ip: Option<IpAddr>,
}

/// Classification of one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub domain: DomainKey,
    pub green: bool,
    pub hosted_by: Option<HostedBy>,
    pub matched_rule: Option<MatchRule>,

    /// Primary address at computation time
    pub ip: Option<IpAddr>,
    pub asn: Option<u32>,
    pub computed_at: DateTime<Utc>,

    /// Set by the cache when the result is stored
    pub ttl_expires_at: DateTime<Utc>,
}

impl ClassificationResult {
    /// Build a result from an identity and an optional match
    pub fn classify(identity: &ResolvedIdentity, matched: Option<MatchResult>) -> Self {
        let now = Utc::now();
        let (hosted_by, matched_rule, ip) = match matched {
            Some(m) => (Some(m.provider), Some(m.rule), m.ip.or(identity.primary_ip())),
            None => (None, None, identity.primary_ip()),
        };
        // An ASN match reports the origin that matched
        let asn = match &matched_rule {
            Some(MatchRule::Asn(asn)) => Some(*asn),
            _ => identity.asn,
        };

        Self {
            domain: identity.domain.clone(),
            green: hosted_by.is_some(),
            hosted_by,
            matched_rule,
            ip,
            asn,
            computed_at: now,
            ttl_expires_at: now,
        }
    }

    /// Build a result for a domain matched by pattern alone
    ///
    /// Used when resolution failed but a domain rule still attributes the
    /// domain to a provider.
    pub fn from_domain_match(domain: DomainKey, matched: MatchResult) -> Self {
        let now = Utc::now();
        Self {
            domain,
            green: true,
            hosted_by: Some(matched.provider),
            matched_rule: Some(matched.rule),
            ip: None,
            asn: None,
            computed_at: now,
            ttl_expires_at: now,
        }
    }

    /// Returns true once the TTL has passed
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.ttl_expires_at
    }

    /// Provider name, if green
    pub fn hosted_by_name(&self) -> Option<&str> {
        self.hosted_by.as_ref().map(|h| h.name.as_str())
    }
}

/// JSON body of a green check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreenCheckResponse {
    pub url: String,
    pub green: bool,
    pub hosted_by: Option<String>,
    pub hosted_by_id: Option<ProviderId>,
    pub hosted_by_website: Option<String>,
    pub partner: Option<String>,

    /// Computation time of the classification (RFC 3339)
    pub modified: DateTime<Utc>,
}

impl From<&ClassificationResult> for GreenCheckResponse {
    fn from(result: &ClassificationResult) -> Self {
        let hosted = result.hosted_by.as_ref();
        Self {
            url: result.domain.to_string(),
            green: result.green,
            hosted_by: hosted.map(|h| h.name.clone()),
            hosted_by_id: hosted.map(|h| h.id),
            hosted_by_website: hosted.and_then(|h| h.website.clone()),
            partner: hosted.and_then(|h| h.partner.clone()),
            modified: result.computed_at,
        }
    }
}

/// Inline error item of a batch check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreenCheckFailure {
    pub url: String,
    pub green: bool,
    pub hosted_by: Option<String>,
    pub error: String,
}

impl GreenCheckFailure {
    /// Create a failure item; never reported green
    pub fn new(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            green: false,
            hosted_by: None,
            error: error.into(),
        }
    }
}
