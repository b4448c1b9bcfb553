//! HTTP server components for greencheck
//!
//! This module provides the HTTP server infrastructure including:
//! - Router configuration and route handlers
//! - Logging and tracing middleware
//! - Server lifecycle management

pub mod middleware;
pub mod router;

pub use router::{build_router, ApiError, AppState, HealthResponse, MetricsResponse};

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::config::ServerConfig;

/// HTTP Server for greencheck
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> Result<SocketAddr, ServerError> {
        let ip = self
            .config
            .host
            .parse()
            .map_err(|_| ServerError::Config(format!("invalid host: {}", self.config.host)))?;
        Ok(SocketAddr::new(ip, self.config.port))
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let app = build_router(self.state)
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .layer(tower_http::compression::CompressionLayer::new());

        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(e.to_string()))?;
        tracing::info!("Server listening on {}", addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind to address: {0}")]
    Bind(String),

    /// Failed to serve requests
    #[error("Server error: {0}")]
    Serve(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::GreenChecker;
    use crate::config::Config;
    use crate::registry::ProviderRegistry;
    use crate::resolver::MockResolver;
    use std::sync::Arc;
    use std::time::Duration;

    fn create_test_state() -> AppState {
        let checker = GreenChecker::from_config(
            &Config::default(),
            Arc::new(ProviderRegistry::empty()),
            Arc::new(MockResolver::new()),
        );
        AppState::new(Arc::new(checker), ServerConfig::default())
    }

    // Test 1: Server can be created with config
    #[test]
    fn test_server_new() {
        let server = Server::new(ServerConfig::default(), create_test_state());
        assert_eq!(server.bind_addr().unwrap().port(), 8080);
    }

    // Test 2: Server bind address calculation
    #[test]
    fn test_server_bind_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 9090,
            ..Default::default()
        };
        let server = Server::new(config, create_test_state());
        assert_eq!(server.bind_addr().unwrap().to_string(), "127.0.0.1:9090");
    }

    // Test 3: Invalid host is a configuration error
    #[test]
    fn test_server_invalid_host() {
        let config = ServerConfig {
            host: "not-an-ip".to_string(),
            ..Default::default()
        };
        let server = Server::new(config, create_test_state());
        assert!(matches!(server.bind_addr(), Err(ServerError::Config(_))));
    }

    // Test 4: Server graceful shutdown
    #[tokio::test]
    async fn test_server_graceful_shutdown() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let server = Server::new(config, create_test_state());

        let shutdown = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
        };

        let handle = tokio::spawn(async move { server.run(shutdown).await });

        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }

    // Test 5: ServerError display messages
    #[test]
    fn test_server_error_display() {
        let bind_err = ServerError::Bind("address in use".to_string());
        assert_eq!(
            bind_err.to_string(),
            "Failed to bind to address: address in use"
        );

        let config_err = ServerError::Config("missing field".to_string());
        assert_eq!(config_err.to_string(), "Configuration error: missing field");
    }
}
