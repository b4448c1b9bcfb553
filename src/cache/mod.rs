//! Classification result cache
//!
//! See [`ResultCache`] for the single-flight and stale-serving rules.

pub mod result_cache;
pub mod stats;

pub use result_cache::{CacheLookup, CacheSettings, CacheStatus, ResultCache};
pub use stats::CacheStats;
