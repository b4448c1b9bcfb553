//! Domain resolution
//!
//! A [`Resolver`] maps a domain key to its network identity: resolved
//! addresses plus the origin ASN of the primary address. Each call is
//! bounded by a hard timeout and performs no retries of its own.

pub mod dns;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ResolveError;
use crate::models::{DomainKey, ResolvedIdentity};

pub use dns::DnsResolver;

/// Resolver trait
///
/// Implementations must return [`ResolveError::Timeout`] instead of blocking
/// past `timeout`, and should return a partial identity (`asn = None`) when
/// only the ASN lookup fails.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolver name for logs and metrics
    fn name(&self) -> &str;

    /// Resolve a domain within the given time budget
    async fn resolve(
        &self,
        domain: &DomainKey,
        timeout: Duration,
    ) -> Result<ResolvedIdentity, ResolveError>;
}
