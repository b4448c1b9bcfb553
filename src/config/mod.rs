//! Configuration management for greencheck
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// DNS and ASN resolution configuration
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Result cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Per-client rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Provider registry source
    #[serde(default)]
    pub registry: RegistryConfig,

    /// OpenTelemetry configuration
    #[serde(default)]
    pub otel: OtelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix GREENCHECK_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(host) = std::env::var("GREENCHECK_SERVER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_parse("GREENCHECK_SERVER_PORT")? {
            config.server.port = port;
        }
        if let Some(trust) = env_parse("GREENCHECK_SERVER_TRUST_FORWARDED_FOR")? {
            config.server.trust_forwarded_for = trust;
        }

        if let Some(timeout) = env_parse("GREENCHECK_RESOLVER_TIMEOUT_MS")? {
            config.resolver.timeout_ms = timeout;
        }
        if let Some(retry) = env_parse("GREENCHECK_RESOLVER_RETRY_TIMEOUT_MS")? {
            config.resolver.retry_timeout_ms = retry;
        }
        if let Ok(nameservers) = std::env::var("GREENCHECK_RESOLVER_NAMESERVERS") {
            config.resolver.nameservers = nameservers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(ttl) = env_parse("GREENCHECK_CACHE_TTL_SECS")? {
            config.cache.ttl_secs = ttl;
        }

        if let Some(enabled) = env_parse("GREENCHECK_RATE_LIMIT_ENABLED")? {
            config.rate_limit.enabled = enabled;
        }

        if let Ok(path) = std::env::var("GREENCHECK_REGISTRY_PATH") {
            config.registry.path = Some(path);
        }

        if let Some(enabled) = env_parse("GREENCHECK_OTEL_ENABLED")? {
            config.otel.enabled = enabled;
        }
        if let Ok(endpoint) = std::env::var("GREENCHECK_OTEL_ENDPOINT") {
            config.otel.endpoint = Some(endpoint);
        }

        if let Ok(level) = std::env::var("GREENCHECK_LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolver.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "resolver.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.resolver.request_deadline_ms < self.resolver.timeout_ms {
            return Err(ConfigError::InvalidValue(
                "resolver.request_deadline_ms must not be shorter than resolver.timeout_ms"
                    .to_string(),
            ));
        }
        if self.resolver.retry_timeout_ms > self.resolver.timeout_ms {
            return Err(ConfigError::InvalidValue(
                "resolver.retry_timeout_ms must not exceed resolver.timeout_ms".to_string(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "cache.ttl_secs must be greater than 0".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::InvalidValue(
                "cache.max_entries must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit.enabled
            && (self.rate_limit.burst == 0 || self.rate_limit.refill_per_sec <= 0.0)
        {
            return Err(ConfigError::InvalidValue(
                "rate_limit.burst and rate_limit.refill_per_sec must be positive".to_string(),
            ));
        }
        if self.server.max_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "server.max_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.otel.enabled && self.otel.endpoint.is_none() {
            return Err(ConfigError::MissingRequired(
                "otel.endpoint is required when otel.enabled is true".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use the first X-Forwarded-For address as the client identity
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Maximum number of domains in one batch request
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trust_forwarded_for: false,
            max_batch_size: default_max_batch_size(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_batch_size() -> usize {
    50
}

/// DNS and ASN resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolverConfig {
    /// Timeout of the first resolution attempt
    #[serde(default = "default_resolver_timeout")]
    pub timeout_ms: u64,

    /// Timeout of the single retry after a timeout (0 disables the retry)
    #[serde(default = "default_retry_timeout")]
    pub retry_timeout_ms: u64,

    /// Overall deadline of one check request
    #[serde(default = "default_request_deadline")]
    pub request_deadline_ms: u64,

    /// Upstream nameservers (`ip` or `ip:port`); empty uses the system configuration
    #[serde(default)]
    pub nameservers: Vec<String>,

    /// Whether to look up the origin ASN of the primary address
    #[serde(default = "default_asn_lookup_enabled")]
    pub asn_lookup_enabled: bool,

    /// DNS zone answering IPv4 origin queries
    #[serde(default = "default_asn_zone_v4")]
    pub asn_zone_v4: String,

    /// DNS zone answering IPv6 origin queries
    #[serde(default = "default_asn_zone_v6")]
    pub asn_zone_v6: String,
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Retry timeout, `None` when retries are disabled
    pub fn retry_timeout(&self) -> Option<Duration> {
        (self.retry_timeout_ms > 0).then(|| Duration::from_millis(self.retry_timeout_ms))
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_resolver_timeout(),
            retry_timeout_ms: default_retry_timeout(),
            request_deadline_ms: default_request_deadline(),
            nameservers: Vec::new(),
            asn_lookup_enabled: default_asn_lookup_enabled(),
            asn_zone_v4: default_asn_zone_v4(),
            asn_zone_v6: default_asn_zone_v6(),
        }
    }
}

fn default_resolver_timeout() -> u64 {
    600
}

fn default_retry_timeout() -> u64 {
    300
}

fn default_request_deadline() -> u64 {
    950
}

fn default_asn_lookup_enabled() -> bool {
    true
}

fn default_asn_zone_v4() -> String {
    "origin.asn.cymru.com".to_string()
}

fn default_asn_zone_v6() -> String {
    "origin6.asn.cymru.com".to_string()
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Time a classification stays fresh
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Time an expired classification is kept for stale serving
    #[serde(default = "default_stale_grace")]
    pub stale_grace_secs: u64,

    /// Maximum number of cached domains
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Interval of the expiry sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            stale_grace_secs: default_stale_grace(),
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    7200
}

fn default_stale_grace() -> u64 {
    86400
}

fn default_max_entries() -> usize {
    100_000
}

fn default_sweep_interval() -> u64 {
    300
}

/// Per-client token bucket configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enforced
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,

    /// Bucket capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Tokens added per second
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,

    /// Buckets untouched for this long are dropped by the sweep
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            burst: default_burst(),
            refill_per_sec: default_refill_per_sec(),
            idle_secs: default_idle_secs(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_burst() -> u32 {
    60
}

fn default_refill_per_sec() -> f64 {
    10.0
}

fn default_idle_secs() -> u64 {
    600
}

/// Provider registry source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    /// Path to the provider YAML file
    #[serde(default)]
    pub path: Option<String>,

    /// Reload interval (0 disables periodic reload)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Random delay added to each reload
    #[serde(default = "default_refresh_jitter")]
    pub refresh_jitter_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: None,
            refresh_interval_secs: default_refresh_interval(),
            refresh_jitter_secs: default_refresh_jitter(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_refresh_jitter() -> u64 {
    30
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    /// Whether OpenTelemetry is enabled
    #[serde(default)]
    pub enabled: bool,

    /// OTLP endpoint URL
    pub endpoint: Option<String>,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            service_name: default_service_name(),
        }
    }
}

fn default_service_name() -> String {
    "greencheck".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Parse an optional environment variable
fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("Invalid value for {}: {}", name, value))),
        Err(_) => Ok(None),
    }
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax; unknown variables are left as is
fn expand_env_vars(input: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
