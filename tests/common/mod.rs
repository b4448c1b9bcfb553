//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use greencheck::check::GreenChecker;
use greencheck::config::{Config, ServerConfig};
use greencheck::error::ResolveError;
use greencheck::models::{DomainKey, ResolvedIdentity};
use greencheck::registry::{parse_providers, ProviderRegistry};
use greencheck::resolver::Resolver;
use greencheck::server::{AppState, Server};

/// Provider file used by most tests
pub const PROVIDERS: &str = r#"
providers:
  - id: 1
    name: Leaf Hosting
    website: https://leaf.example
    rules:
      - ip_range: 192.0.2.0/24
      - ip_range: 2001:db8::/32
  - id: 2
    name: Wind Cloud
    partner: gold
    rules:
      - ip_range: 198.51.100.0/24
      - asn: 64500
  - id: 3
    name: Pattern Pages
    rules:
      - domain: "*.pages.example"
"#;

/// Scripted answer of the fake resolver
#[derive(Debug, Clone)]
pub enum Answer {
    Found(Vec<IpAddr>, Option<u32>),
    Fail(ResolveError),
}

/// Resolver with scripted answers, a fixed delay and a call counter
///
/// Unknown domains answer NXDOMAIN. A delay longer than the call's timeout
/// answers with a timeout once the timeout has elapsed.
pub struct FakeResolver {
    answers: Mutex<HashMap<String, Answer>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl FakeResolver {
    pub fn new(delay: Duration) -> Self {
        Self {
            answers: Mutex::new(HashMap::new()),
            delay: Mutex::new(delay),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer `domain` with the given addresses
    pub fn answer(&self, domain: &str, ips: &[&str], asn: Option<u32>) {
        let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
        self.answers
            .lock()
            .unwrap()
            .insert(domain.to_string(), Answer::Found(ips, asn));
    }

    /// Fail every resolution of `domain`
    pub fn fail(&self, domain: &str, err: ResolveError) {
        self.answers
            .lock()
            .unwrap()
            .insert(domain.to_string(), Answer::Fail(err));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Number of resolve calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    fn name(&self) -> &str {
        "fake"
    }

    async fn resolve(
        &self,
        domain: &DomainKey,
        timeout: Duration,
    ) -> Result<ResolvedIdentity, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(ResolveError::Timeout(timeout));
        }
        tokio::time::sleep(delay).await;

        let answer = self.answers.lock().unwrap().get(domain.as_str()).cloned();
        match answer {
            Some(Answer::Found(ips, asn)) => Ok(ResolvedIdentity::new(domain.clone(), ips, asn)),
            Some(Answer::Fail(err)) => Err(err),
            None => Err(ResolveError::NxDomain(domain.to_string())),
        }
    }
}

/// Configuration for tests: no rate limiting, short timeouts
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server = create_test_server_config();
    config.rate_limit.enabled = false;
    config.resolver.timeout_ms = 400;
    config.resolver.retry_timeout_ms = 200;
    config.resolver.request_deadline_ms = 1500;
    config
}

/// Create a test server configuration with a random port
pub fn create_test_server_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    }
}

/// Registry loaded from [`PROVIDERS`]
pub fn test_registry() -> Arc<ProviderRegistry> {
    let providers = parse_providers(PROVIDERS).expect("Failed to parse providers");
    Arc::new(ProviderRegistry::new(providers).expect("Failed to build registry"))
}

/// A running test server
pub struct TestApp {
    pub addr: SocketAddr,
    pub checker: Arc<GreenChecker>,
    pub resolver: Arc<FakeResolver>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestApp {
    /// URL of `path` on the running server
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Green check URL for a raw domain
    pub fn check_url(&self, domain: &str) -> String {
        self.url(&format!("/api/v3/greencheck/{}", domain))
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Run a test server in the background
///
/// The server shuts down when the returned [`TestApp`] is dropped.
pub async fn run_test_server(
    config: Config,
    registry: Arc<ProviderRegistry>,
    resolver: Arc<FakeResolver>,
) -> TestApp {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local address");

    let checker = Arc::new(GreenChecker::from_config(
        &config,
        registry,
        Arc::clone(&resolver) as Arc<dyn Resolver>,
    ));
    let state = AppState::new(Arc::clone(&checker), config.server.clone());
    let server = Server::new(config.server.clone(), state);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        server
            .serve(listener, async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("Server error");
    });

    TestApp {
        addr,
        checker,
        resolver,
        shutdown: Some(shutdown_tx),
    }
}

/// Start a server with the default test setup and an instant resolver
pub async fn start_default() -> TestApp {
    run_test_server(
        test_config(),
        test_registry(),
        Arc::new(FakeResolver::new(Duration::ZERO)),
    )
    .await
}
