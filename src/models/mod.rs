//! Domain models for greencheck
//!
//! This module contains the core domain models used throughout the application.

pub mod classification;
pub mod domain;
pub mod provider;

// Re-export commonly used types
pub use classification::{
    ClassificationResult, GreenCheckFailure, GreenCheckResponse, HostedBy, MatchResult,
    ResolvedIdentity,
};
pub use domain::{normalize, DomainKey};
pub use provider::{DomainPattern, MatchRule, ProviderId, ProviderRecord};
