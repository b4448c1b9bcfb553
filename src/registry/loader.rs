//! Provider file loading and periodic refresh
//!
//! Providers are read from a YAML file:
//!
//! ```yaml
//! providers:
//!   - id: 1
//!     name: "Leafy Hosting"
//!     website: "https://leafy.example"
//!     rules:
//!       - ip_range: "192.0.2.0/24"
//!       - asn: 64500
//!       - domain: "*.leafy.example"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::models::ProviderRecord;
use crate::registry::ProviderRegistry;

/// On-disk provider file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderFile {
    #[serde(default)]
    pub providers: Vec<ProviderRecord>,
}

/// Parse provider records from YAML text
pub fn parse_providers(yaml: &str) -> Result<Vec<ProviderRecord>, RegistryError> {
    let file: ProviderFile = serde_yaml::from_str(yaml)
        .map_err(|e| RegistryError::Parse(format!("Failed to parse provider YAML: {}", e)))?;
    Ok(file.providers)
}

/// Read provider records from a YAML file
pub async fn load_providers(path: &Path) -> Result<Vec<ProviderRecord>, RegistryError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        RegistryError::FileRead(format!("Failed to read provider file {:?}: {}", path, e))
    })?;

    parse_providers(&contents)
}

/// Reload the provider file and swap the registry snapshot
///
/// Returns the new snapshot version. The current snapshot stays in place
/// if loading or validation fails.
pub async fn reload(registry: &ProviderRegistry, path: &Path) -> Result<u64, RegistryError> {
    let providers = load_providers(path).await?;
    let count = providers.len();
    let version = registry.replace(providers)?;
    info!(path = ?path, providers = count, version, "Provider registry loaded");
    Ok(version)
}

/// Periodically reloads the provider file
pub struct RegistryRefresher {
    registry: Arc<ProviderRegistry>,
    path: PathBuf,
    interval: Duration,
    jitter_secs: u64,
}

impl RegistryRefresher {
    /// Create a new refresher
    pub fn new(
        registry: Arc<ProviderRegistry>,
        path: PathBuf,
        interval: Duration,
        jitter_secs: u64,
    ) -> Self {
        Self {
            registry,
            path,
            interval,
            jitter_secs,
        }
    }

    /// Run until a shutdown signal is received
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        if self.interval.is_zero() {
            debug!("Registry refresh disabled");
            return;
        }

        info!(
            path = ?self.path,
            interval_secs = self.interval.as_secs(),
            "Starting registry refresher"
        );

        let mut timer = interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Registry refresher shutting down");
                    break;
                }
                _ = timer.tick() => {
                    let jitter = if self.jitter_secs > 0 {
                        rand::thread_rng().gen_range(0..self.jitter_secs)
                    } else {
                        0
                    };
                    if jitter > 0 {
                        tokio::select! {
                            _ = shutdown_rx.recv() => {
                                debug!("Registry refresher shutting down during jitter");
                                break;
                            }
                            _ = tokio::time::sleep(Duration::from_secs(jitter)) => {}
                        }
                    }

                    if let Err(e) = reload(&self.registry, &self.path).await {
                        warn!(
                            path = ?self.path,
                            error = %e,
                            version = self.registry.current_snapshot().version(),
                            "Provider reload failed, keeping current snapshot"
                        );
                    }
                }
            }
        }
    }
}
