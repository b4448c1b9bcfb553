//! Application error types for greencheck
//!
//! This module defines the error taxonomy shared by the normalizer, resolver,
//! provider registry and check orchestrator. All error types use `thiserror`.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

/// Domain normalization errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Input was empty after trimming
    #[error("Empty domain")]
    Empty,

    /// Host exceeds the 253 character limit
    #[error("Domain too long: {0} characters")]
    TooLong(usize),

    /// A label violates hostname syntax
    #[error("Invalid label: {0}")]
    InvalidLabel(String),

    /// Host could not be parsed at all
    #[error("Invalid host: {0}")]
    InvalidHost(String),
}

/// Resolution errors reported by a resolver
///
/// Cloneable so that one in-flight outcome can be handed to every waiter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    /// The resolver did not answer within its time budget
    #[error("Resolution timed out after {0:?}")]
    Timeout(Duration),

    /// The domain does not exist
    #[error("Domain does not exist: {0}")]
    NxDomain(String),

    /// Any other resolver failure
    #[error("Resolution failed: {0}")]
    Failed(String),
}

/// Provider registry loading errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    /// Error reading the provider file
    #[error("Failed to read provider file: {0}")]
    FileRead(String),

    /// Error parsing the provider file
    #[error("Failed to parse provider file: {0}")]
    Parse(String),

    /// Semantically invalid provider data
    #[error("Invalid provider data: {0}")]
    Invalid(String),
}

/// Errors surfaced by the public check operation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CheckError {
    /// Input could not be normalized into a domain
    #[error("Invalid domain: {0}")]
    InvalidDomain(#[from] DomainError),

    /// Client exceeded its request budget
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Resolution exceeded its deadline
    #[error("Resolution timed out")]
    ResolutionTimeout,

    /// Resolution failed
    #[error("Resolution error: {0}")]
    ResolutionError(String),
}

impl CheckError {
    /// Stable machine-readable kind used in HTTP error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            CheckError::InvalidDomain(_) => "InvalidDomain",
            CheckError::RateLimited { .. } => "RateLimited",
            CheckError::ResolutionTimeout => "ResolutionTimeout",
            CheckError::ResolutionError(_) => "ResolutionError",
        }
    }

    /// HTTP status reported for this error
    pub fn status(&self) -> StatusCode {
        match self {
            CheckError::InvalidDomain(_) => StatusCode::BAD_REQUEST,
            CheckError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CheckError::ResolutionTimeout => StatusCode::GATEWAY_TIMEOUT,
            CheckError::ResolutionError(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<ResolveError> for CheckError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Timeout(_) => CheckError::ResolutionTimeout,
            ResolveError::NxDomain(domain) => {
                CheckError::ResolutionError(format!("NXDOMAIN: {}", domain))
            }
            ResolveError::Failed(msg) => CheckError::ResolutionError(msg),
        }
    }
}

/// Application-level error type
///
/// Aggregates the domain-specific errors for the binary entry point.
#[derive(Debug, Error)]
pub enum AppError {
    /// Registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Check error
    #[error("Check error: {0}")]
    Check(#[from] CheckError),

    /// Resolver construction error
    #[error("Resolver error: {0}")]
    Resolver(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for ResolveError {
    fn is_retryable(&self) -> bool {
        match self {
            ResolveError::Timeout(_) => true,

            // Resolver-reported failures are final
            ResolveError::NxDomain(_) => false,
            ResolveError::Failed(_) => false,
        }
    }
}
