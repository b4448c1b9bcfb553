//! Observability for greencheck
//!
//! Tracing subscriber setup plus OpenTelemetry export of traces and
//! metrics to an OTLP endpoint when enabled.

use crate::config::{LoggingConfig, OtelConfig};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider as _},
    trace::TracerProvider as TracerProviderTrait,
    KeyValue,
};
use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::TracerProvider, Resource};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cache::CacheStatus;

/// Meter and tracer name
const INSTRUMENTATION_NAME: &str = "greencheck";

/// OpenTelemetry error types
#[derive(Debug, Error)]
pub enum OtelError {
    /// Failed to initialize tracer
    #[error("Failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize meter
    #[error("Failed to initialize meter: {0}")]
    MeterInit(String),

    /// Failed to shutdown
    #[error("Failed to shutdown: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// OpenTelemetry providers
///
/// When disabled, metrics go to a meter provider without readers and no
/// tracer is installed.
pub struct OtelProvider {
    tracer_provider: Option<TracerProvider>,
    meter_provider: SdkMeterProvider,
    config: OtelConfig,
}

impl OtelProvider {
    /// Create a new OtelProvider with the given configuration
    pub fn new(config: &OtelConfig) -> Result<Self, OtelError> {
        let resource = Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]);

        let (tracer_provider, meter_provider) = match (config.enabled, &config.endpoint) {
            (false, _) => (
                None,
                SdkMeterProvider::builder().with_resource(resource).build(),
            ),
            (true, None) => {
                return Err(OtelError::Config(
                    "OTLP endpoint is required when enabled".into(),
                ))
            }
            (true, Some(endpoint)) => (
                Some(Self::init_tracer_provider(endpoint, &resource)?),
                Self::init_meter_provider(endpoint, &resource)?,
            ),
        };

        if let Some(ref tp) = tracer_provider {
            global::set_tracer_provider(tp.clone());
        }
        global::set_meter_provider(meter_provider.clone());

        Ok(Self {
            tracer_provider,
            meter_provider,
            config: config.clone(),
        })
    }

    fn init_tracer_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<TracerProvider, OtelError> {
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::runtime;
        use opentelemetry_sdk::trace::{Config, Sampler};

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint)
            .build_span_exporter()
            .map_err(|e| OtelError::TracerInit(e.to_string()))?;

        Ok(TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(
                Config::default()
                    .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
                    .with_resource(resource.clone()),
            )
            .build())
    }

    fn init_meter_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<SdkMeterProvider, OtelError> {
        use opentelemetry_otlp::{MetricsExporterBuilder, WithExportConfig};
        use opentelemetry_sdk::metrics::reader::{
            DefaultAggregationSelector, DefaultTemporalitySelector,
        };
        use opentelemetry_sdk::{metrics::PeriodicReader, runtime};

        let exporter = MetricsExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .build_metrics_exporter(
            Box::new(DefaultTemporalitySelector::new()),
            Box::new(DefaultAggregationSelector::new()),
        )
        .map_err(|e| OtelError::MeterInit(e.to_string()))?;

        Ok(SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(PeriodicReader::builder(exporter, runtime::Tokio).build())
            .build())
    }

    /// Tracer for the tracing bridge, if export is enabled
    pub fn tracer(&self) -> Option<opentelemetry_sdk::trace::Tracer> {
        self.tracer_provider
            .as_ref()
            .map(|tp| tp.tracer(INSTRUMENTATION_NAME))
    }

    /// Get the meter for creating metrics
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(self.config.service_name.clone())
    }

    /// Check if OpenTelemetry is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Flush and stop the providers
    pub fn shutdown(&self) -> Result<(), OtelError> {
        self.meter_provider
            .shutdown()
            .map_err(|e| OtelError::Shutdown(format!("Meter shutdown failed: {:?}", e)))?;

        if let Some(ref tp) = self.tracer_provider {
            for result in tp.force_flush() {
                result
                    .map_err(|e| OtelError::Shutdown(format!("Tracer flush failed: {:?}", e)))?;
            }
        }

        Ok(())
    }
}

/// Service metrics
pub struct Metrics {
    /// Checks by outcome (green, grey, or an error kind)
    pub checks_total: Counter<u64>,

    /// Lookups answered from a fresh cache entry
    pub cache_hits_total: Counter<u64>,

    /// Lookups that computed or joined a computation
    pub cache_misses_total: Counter<u64>,

    /// Stale classifications served after a failed computation
    pub stale_served_total: Counter<u64>,

    /// Resolver calls, including retries
    pub resolver_invocations_total: Counter<u64>,

    /// HTTP request duration in seconds
    pub request_duration: Histogram<f64>,

    /// Resolution duration in seconds, retries included
    pub resolution_duration: Histogram<f64>,
}

impl Metrics {
    /// Create new metrics with the given meter
    pub fn new(meter: &Meter) -> Self {
        Self {
            checks_total: meter
                .u64_counter("greencheck_checks_total")
                .with_description("Total number of checks by outcome")
                .init(),
            cache_hits_total: meter
                .u64_counter("greencheck_cache_hits_total")
                .with_description("Checks answered from a fresh cache entry")
                .init(),
            cache_misses_total: meter
                .u64_counter("greencheck_cache_misses_total")
                .with_description("Checks that needed a computation")
                .init(),
            stale_served_total: meter
                .u64_counter("greencheck_stale_served_total")
                .with_description("Stale classifications served after a failure")
                .init(),
            resolver_invocations_total: meter
                .u64_counter("greencheck_resolver_invocations_total")
                .with_description("Resolver calls including retries")
                .init(),
            request_duration: meter
                .f64_histogram("greencheck_request_duration_seconds")
                .with_description("HTTP request duration in seconds")
                .init(),
            resolution_duration: meter
                .f64_histogram("greencheck_resolution_duration_seconds")
                .with_description("Resolution duration in seconds")
                .init(),
        }
    }

    /// Metrics bound to the global meter provider
    pub fn global() -> Self {
        Self::new(&global::meter(INSTRUMENTATION_NAME))
    }

    /// Record a finished check
    pub fn record_check(&self, outcome: &'static str) {
        self.checks_total
            .add(1, &[KeyValue::new("outcome", outcome)]);
    }

    /// Record how the cache answered
    pub fn record_cache_status(&self, status: CacheStatus) {
        match status {
            CacheStatus::Hit => self.cache_hits_total.add(1, &[]),
            CacheStatus::Computed | CacheStatus::Joined => self.cache_misses_total.add(1, &[]),
            CacheStatus::Stale => {
                self.cache_misses_total.add(1, &[]);
                self.stale_served_total.add(1, &[]);
            }
        }
    }

    /// Record one resolver call
    pub fn record_resolver_invocation(&self) {
        self.resolver_invocations_total.add(1, &[]);
    }

    /// Record a resolution, successful or not
    pub fn record_resolution(&self, duration_secs: f64, ok: bool) {
        self.resolution_duration
            .record(duration_secs, &[KeyValue::new("ok", ok)]);
    }

    /// Record request duration
    pub fn record_request_duration(&self, route: &str, status: u16, duration_secs: f64) {
        self.request_duration.record(
            duration_secs,
            &[
                KeyValue::new("route", route.to_string()),
                KeyValue::new("status", i64::from(status)),
            ],
        );
    }
}

/// Initialize the tracing subscriber
///
/// `logging.level` accepts a level or full filter directives such as
/// `greencheck=debug,tower_http=info`. `logging.format` is `json` or
/// `pretty`.
pub fn init_tracing(otel: &OtelProvider, logging: &LoggingConfig) -> Result<(), OtelError> {
    let filter = EnvFilter::try_new(logging.level.to_lowercase())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = logging.format.eq_ignore_ascii_case("json");
    let json_layer = json.then(|| tracing_subscriber::fmt::layer().json());
    let pretty_layer = (!json).then(|| tracing_subscriber::fmt::layer().pretty());
    let otel_layer = otel
        .tracer()
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    tracing_subscriber::registry()
        .with(filter)
        .with(otel_layer)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| OtelError::TracerInit(e.to_string()))
}
