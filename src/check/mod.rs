//! Lookup orchestrator
//!
//! [`GreenChecker`] composes the normalizer, the per-client rate limiter,
//! the result cache, the resolver and the provider registry into the public
//! check operation.

pub mod retry;

pub use retry::RetryPolicy;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::interval_at;
use tracing::{debug, info, warn};

use crate::cache::{CacheSettings, CacheStatus, ResultCache};
use crate::config::Config;
use crate::error::{CheckError, ResolveError};
use crate::models::{normalize, ClassificationResult, DomainKey};
use crate::otel::Metrics;
use crate::ratelimit::RateLimiter;
use crate::registry::ProviderRegistry;
use crate::resolver::Resolver;

/// Result of one successful check
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub result: Arc<ClassificationResult>,
    pub cache_status: CacheStatus,
}

/// The public check operation and the shared state it runs against
pub struct GreenChecker {
    registry: Arc<ProviderRegistry>,
    resolver: Arc<dyn Resolver>,
    cache: ResultCache,
    limiter: RateLimiter,
    retry: RetryPolicy,
    request_deadline: Duration,
    metrics: Arc<Metrics>,
}

impl GreenChecker {
    /// Create a checker from its parts
    pub fn new(
        registry: Arc<ProviderRegistry>,
        resolver: Arc<dyn Resolver>,
        cache: ResultCache,
        limiter: RateLimiter,
        retry: RetryPolicy,
        request_deadline: Duration,
    ) -> Self {
        Self {
            registry,
            resolver,
            cache,
            limiter,
            retry,
            request_deadline,
            metrics: Arc::new(Metrics::global()),
        }
    }

    /// Create a checker with policy taken from configuration
    pub fn from_config(
        config: &Config,
        registry: Arc<ProviderRegistry>,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        Self::new(
            registry,
            resolver,
            ResultCache::new(CacheSettings::from(&config.cache)),
            RateLimiter::new(config.rate_limit.clone()),
            RetryPolicy::from(&config.resolver),
            config.resolver.request_deadline(),
        )
    }

    /// Record metrics on the given instruments instead of the global meter
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Classify one raw domain for `client`
    ///
    /// Normalization and rate limiting fail immediately without touching the
    /// cache. Giving up at the request deadline does not cancel the shared
    /// computation.
    pub async fn check(
        &self,
        raw: &str,
        nocache: bool,
        client: IpAddr,
    ) -> Result<CheckOutcome, CheckError> {
        let outcome = self.check_inner(raw, nocache, client).await;

        match &outcome {
            Ok(found) => {
                self.metrics.record_cache_status(found.cache_status);
                self.metrics
                    .record_check(if found.result.green { "green" } else { "grey" });
            }
            Err(err) => self.metrics.record_check(err.kind()),
        }

        outcome
    }

    async fn check_inner(
        &self,
        raw: &str,
        nocache: bool,
        client: IpAddr,
    ) -> Result<CheckOutcome, CheckError> {
        let domain = normalize(raw).map_err(|e| {
            debug!(input = raw, error = %e, "Rejected domain input");
            CheckError::InvalidDomain(e)
        })?;

        self.limiter.check(client).map_err(|retry_after| {
            debug!(client = %client, domain = %domain, "Client rate limited");
            CheckError::RateLimited { retry_after }
        })?;

        let lookup = self
            .cache
            .compute_if_absent(&domain, nocache, self.computation(&domain));

        match tokio::time::timeout(self.request_deadline, lookup).await {
            Ok(Ok(found)) => Ok(CheckOutcome {
                result: found.value,
                cache_status: found.status,
            }),
            Ok(Err(err)) => {
                debug!(domain = %domain, error = %err, "Check failed");
                Err(err.into())
            }
            Err(_) => {
                warn!(
                    domain = %domain,
                    deadline_ms = self.request_deadline.as_millis() as u64,
                    "Request deadline exceeded"
                );
                Err(CheckError::ResolutionTimeout)
            }
        }
    }

    /// Classify several raw domains concurrently
    ///
    /// Each item is charged against the client's rate limit on its own.
    pub async fn check_many(
        &self,
        raws: &[String],
        nocache: bool,
        client: IpAddr,
    ) -> Vec<(String, Result<CheckOutcome, CheckError>)> {
        futures::future::join_all(raws.iter().map(|raw| async move {
            (raw.clone(), self.check(raw, nocache, client).await)
        }))
        .await
    }

    /// Build the computation run by the cache for `domain`
    ///
    /// Resolves with the bounded retry, then matches against the snapshot
    /// current at completion. When resolution fails for any reason other
    /// than NXDOMAIN, a domain pattern can still classify the domain.
    fn computation(
        &self,
        domain: &DomainKey,
    ) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<ClassificationResult, ResolveError>>
    {
        let registry = self.registry.clone();
        let resolver = self.resolver.clone();
        let retry = self.retry.clone();
        let metrics = self.metrics.clone();
        let domain = domain.clone();

        move || {
            Box::pin(async move {
                let started = Instant::now();
                let resolved = retry
                    .execute(|timeout| {
                        metrics.record_resolver_invocation();
                        resolver.resolve(&domain, timeout)
                    })
                    .await;
                metrics.record_resolution(started.elapsed().as_secs_f64(), resolved.is_ok());

                match resolved {
                    Ok(identity) => {
                        let matched = registry.match_identity(&identity);
                        let result = ClassificationResult::classify(&identity, matched);
                        debug!(
                            domain = %domain,
                            green = result.green,
                            provider = result.hosted_by_name().unwrap_or("-"),
                            addresses = identity.ip_addresses.len(),
                            asn = ?identity.asn,
                            "Classified domain"
                        );
                        Ok(result)
                    }
                    Err(err @ ResolveError::NxDomain(_)) => Err(err),
                    Err(err) => match registry.match_domain(&domain) {
                        Some(matched) => {
                            info!(
                                domain = %domain,
                                error = %err,
                                rule = %matched.rule,
                                "Resolution failed, classified by domain pattern"
                            );
                            Ok(ClassificationResult::from_domain_match(domain, matched))
                        }
                        None => Err(err),
                    },
                }
            }) as futures::future::BoxFuture<'static, _>
        }
    }

    /// Drop expired cache entries and idle rate-limit buckets
    ///
    /// Returns the number of cache entries and buckets removed.
    pub fn sweep(&self) -> (usize, usize) {
        (self.cache.sweep(), self.limiter.cleanup())
    }
}

/// Periodic cache and rate-limit sweep
pub struct MaintenanceTask {
    checker: Arc<GreenChecker>,
    interval: Duration,
}

impl MaintenanceTask {
    pub fn new(checker: Arc<GreenChecker>, interval: Duration) -> Self {
        Self { checker, interval }
    }

    /// Run until a shutdown signal is received
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        if self.interval.is_zero() {
            debug!("Cache sweep disabled");
            return;
        }

        info!(
            interval_secs = self.interval.as_secs(),
            "Starting maintenance task"
        );

        let mut timer = interval_at(tokio::time::Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Maintenance task shutting down");
                    break;
                }
                _ = timer.tick() => {
                    let (entries, buckets) = self.checker.sweep();
                    if entries > 0 || buckets > 0 {
                        info!(
                            entries_removed = entries,
                            buckets_removed = buckets,
                            "Sweep completed"
                        );
                    }
                }
            }
        }
    }
}
