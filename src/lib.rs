//! greencheck - Green hosting classification for domain names
//!
//! Resolves a domain to its addresses and origin ASN, matches the result
//! against a registry of verified green hosting providers, and serves the
//! classification over HTTP through a single-flight result cache.

pub mod cache;
pub mod check;
pub mod config;
pub mod error;
pub mod models;
pub mod otel;
pub mod ratelimit;
pub mod registry;
pub mod resolver;
pub mod server;
