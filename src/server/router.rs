//! HTTP router for greencheck
//!
//! This module defines the axum router that handles all HTTP requests.
//! It provides routes for:
//! - The green check API (single domain and batch)
//! - Provider listing
//! - Health, metrics and cache statistics

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::check::GreenChecker;
use crate::config::ServerConfig;
use crate::error::CheckError;
use crate::models::{GreenCheckFailure, GreenCheckResponse};
use crate::registry::ProviderSummary;
use crate::server::middleware::{logging_middleware, tracing_middleware};

/// Header reporting how a classification was obtained
pub const CACHE_STATUS_HEADER: &str = "x-greencheck-cache";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Check orchestrator
    pub checker: Arc<GreenChecker>,

    /// Server settings used by handlers
    pub server: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(checker: Arc<GreenChecker>, server: ServerConfig) -> Self {
        Self {
            checker,
            server: Arc::new(server),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub registry_version: u64,
}

/// Registry figures in the metrics response
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistryMetrics {
    pub version: u64,
    pub providers: usize,
    pub rules: usize,
}

/// Metrics response
#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub cache: CacheStats,
    pub cache_hit_rate: f64,
    pub registry: RegistryMetrics,
    pub rate_limited_clients: usize,
}

/// Provider listing response
#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub version: u64,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
    pub providers: Vec<ProviderSummary>,
}

/// Query of the single-domain check
#[derive(Debug, Default, Deserialize)]
pub struct CheckQuery {
    pub nocache: Option<String>,
}

/// Query of the batch check
#[derive(Debug, Default, Deserialize)]
pub struct BatchQuery {
    pub urls: Option<String>,
    pub nocache: Option<String>,
}

/// Build the main application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v3/greencheck", get(batch_check_handler))
        .route("/api/v3/greencheck/*domain", get(check_handler))
        .route("/api/v3/providers", get(providers_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/cache/stats", get(cache_stats_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            logging_middleware,
        ))
        .layer(middleware::from_fn(tracing_middleware))
        .with_state(state)
}

/// Check error rendered as `{"error": kind}`
pub struct ApiError(pub CheckError);

impl From<CheckError> for ApiError {
    fn from(err: CheckError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.0.kind() }));
        let mut response = (self.0.status(), body).into_response();

        if let CheckError::RateLimited { retry_after } = self.0 {
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

/// Parse a boolean query flag; only `true` and `1` enable it
fn flag(value: Option<&str>) -> bool {
    matches!(value, Some(v) if v.eq_ignore_ascii_case("true") || v == "1")
}

/// Identify the client for rate limiting
///
/// The first `X-Forwarded-For` entry is used only when the server is
/// configured to trust it.
fn client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_forwarded_for: bool,
) -> IpAddr {
    let forwarded = trust_forwarded_for
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());

    forwarded
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

// =============================================================================
// Green Check Handlers
// =============================================================================

/// Single-domain check handler
async fn check_handler(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Query(query): Query<CheckQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let client = client_ip(&headers, connect_info.as_ref(), state.server.trust_forwarded_for);
    let nocache = flag(query.nocache.as_deref());

    let outcome = state.checker.check(&domain, nocache, client).await?;

    let mut response = Json(GreenCheckResponse::from(outcome.result.as_ref())).into_response();
    response.headers_mut().insert(
        HeaderName::from_static(CACHE_STATUS_HEADER),
        HeaderValue::from_static(outcome.cache_status.as_header_value()),
    );
    Ok(response)
}

/// Batch check handler (`?urls=a.com,b.org`)
async fn batch_check_handler(
    State(state): State<AppState>,
    Query(query): Query<BatchQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let raws: Vec<String> = query
        .urls
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    if raws.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "InvalidDomain" })),
        )
            .into_response();
    }
    if raws.len() > state.server.max_batch_size {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "BatchTooLarge",
                "max_batch_size": state.server.max_batch_size
            })),
        )
            .into_response();
    }

    let client = client_ip(&headers, connect_info.as_ref(), state.server.trust_forwarded_for);
    let nocache = flag(query.nocache.as_deref());

    let items: Vec<serde_json::Value> = state
        .checker
        .check_many(&raws, nocache, client)
        .await
        .into_iter()
        .map(|(raw, result)| {
            let item = match result {
                Ok(outcome) => {
                    serde_json::to_value(GreenCheckResponse::from(outcome.result.as_ref()))
                }
                Err(err) => serde_json::to_value(GreenCheckFailure::new(raw, err.kind())),
            };
            item.unwrap_or_default()
        })
        .collect();

    Json(items).into_response()
}

/// Provider listing handler
async fn providers_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.checker.registry().current_snapshot();
    Json(ProvidersResponse {
        version: snapshot.version(),
        loaded_at: snapshot.loaded_at(),
        providers: snapshot.summaries(),
    })
}

// =============================================================================
// Health and Metrics Handlers
// =============================================================================

/// Health check endpoint handler
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        registry_version: state.checker.registry().current_snapshot().version(),
    })
}

/// Metrics endpoint handler
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let cache = state.checker.cache().stats();
    let snapshot = state.checker.registry().current_snapshot();

    Json(MetricsResponse {
        cache_hit_rate: cache.hit_rate(),
        cache,
        registry: RegistryMetrics {
            version: snapshot.version(),
            providers: snapshot.providers().len(),
            rules: snapshot.rule_count(),
        },
        rate_limited_clients: state.checker.limiter().tracked_ips_count(),
    })
}

// =============================================================================
// Cache Statistics Handler
// =============================================================================

/// Cache stats API handler
async fn cache_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.checker.cache().stats();
    Json(serde_json::json!({
        "entries": stats.entries,
        "in_flight": stats.in_flight,
        "hits": stats.hits,
        "misses": stats.misses,
        "joined": stats.joined,
        "stale_served": stats.stale_served,
        "evictions": stats.evictions,
        "hit_rate": stats.hit_rate()
    }))
}
