//! Provider registry
//!
//! Holds the current [`RegistrySnapshot`] behind an atomically swappable
//! pointer. Readers load the pointer once per match, so a match never sees
//! a mix of two rule sets.

pub mod loader;
pub mod snapshot;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::RegistryError;
use crate::models::{DomainKey, MatchResult, ProviderRecord, ResolvedIdentity};

pub use loader::{load_providers, parse_providers, reload, ProviderFile, RegistryRefresher};
pub use snapshot::{ProviderSummary, RegistrySnapshot};

/// Shared provider registry
pub struct ProviderRegistry {
    current: ArcSwap<RegistrySnapshot>,
    next_version: AtomicU64,
}

impl ProviderRegistry {
    /// Create a registry from initial providers
    pub fn new(providers: Vec<ProviderRecord>) -> Result<Self, RegistryError> {
        let registry = Self::empty();
        registry.replace(providers)?;
        Ok(registry)
    }

    /// Create a registry with no providers
    pub fn empty() -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::empty()),
            next_version: AtomicU64::new(1),
        }
    }

    /// The snapshot active right now
    pub fn current_snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Replace the whole rule set atomically
    ///
    /// Returns the new snapshot version. Nothing is swapped on error.
    pub fn replace(&self, providers: Vec<ProviderRecord>) -> Result<u64, RegistryError> {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let snapshot = RegistrySnapshot::build(providers, version)?;
        self.current.store(Arc::new(snapshot));
        Ok(version)
    }

    /// Match an identity against the current snapshot
    pub fn match_identity(&self, identity: &ResolvedIdentity) -> Option<MatchResult> {
        self.current.load().match_identity(identity)
    }

    /// Match a domain against domain pattern rules of the current snapshot
    pub fn match_domain(&self, domain: &DomainKey) -> Option<MatchResult> {
        self.current.load().match_domain(domain)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::empty()
    }
}
