//! Thin wrapper over `reqwest` providing the timeout/TLS/redirect/rate
//! limit knobs the rest of the crate needs, plus the `fresh_connect`
//! escape hatch retry uses to force a new TCP/TLS handshake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::{Client, ClientBuilder, Method, RequestBuilder};
use tracing::{debug, warn};

use crate::response::ResponseHolder;
use crate::retry::{self, ApiError, AttemptOutcome};

/// Preferred IP version for outbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpVersion {
    #[default]
    Auto,
    V4,
    V6,
}

/// Configuration for [`HttpEngine`], supplied at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dns_timeout: Duration,
    pub connect_timeout: Duration,
    pub data_timeout: Duration,
    pub operation_timeout: Duration,
    pub max_redirects: usize,
    pub debug_https: bool,
    pub user_agent: String,
    pub force_http11: bool,
    pub rate_limit_bytes_per_sec: u64,
    pub ip_version: IpVersion,
    pub max_idle: Duration,
    pub keep_alive: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dns_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            data_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(300),
            max_redirects: 5,
            debug_https: false,
            user_agent: concat!("odsync-graph/", env!("CARGO_PKG_VERSION")).to_string(),
            force_http11: false,
            rate_limit_bytes_per_sec: 0,
            ip_version: IpVersion::Auto,
            max_idle: Duration::from_secs(90),
            keep_alive: true,
        }
    }
}

/// Progress callback invoked periodically during a transfer:
/// `(dltotal, dlnow, ultotal, ulnow) -> continue`. Returning `false` aborts
/// the transfer. Must never block; resume-state writes performed here are
/// best-effort.
pub type ProgressCallback = std::sync::Arc<dyn Fn(u64, u64, u64, u64) -> bool + Send + Sync>;

/// Thin wrapper over a pooled `reqwest::Client`.
///
/// `execute()` never returns an error for an HTTP error status; it only
/// fails on transport-level problems (DNS, connect, TLS, timeout). Upper
/// layers (`retry::execute_with_retry`) classify the status.
pub struct HttpEngine {
    config: EngineConfig,
    client: Client,
    /// Forces a brand-new client (thus a fresh TCP/TLS handshake) on the
    /// next `execute()`. Set before a retry sleep, cleared immediately
    /// after use.
    fresh_connect: AtomicBool,
    /// Identifier used in log lines; each pooled engine instance should
    /// carry its own.
    id: String,
}

impl HttpEngine {
    pub fn new(config: EngineConfig) -> Self {
        let client = Self::build_client(&config);
        Self {
            config,
            client,
            fresh_connect: AtomicBool::new(false),
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_id(config: EngineConfig, id: impl Into<String>) -> Self {
        let mut engine = Self::new(config);
        engine.id = id.into();
        engine
    }

    fn build_client(config: &EngineConfig) -> Client {
        let mut builder = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .timeout(config.operation_timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .pool_idle_timeout(config.max_idle);

        if !config.keep_alive {
            builder = builder.pool_max_idle_per_host(0);
        }
        if config.force_http11 {
            builder = builder.http1_only();
        }
        if config.debug_https {
            builder = builder.danger_accept_invalid_certs(false).https_only(false);
        }

        builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "failed to build configured reqwest client, falling back to default");
            Client::new()
        })
    }

    /// Marks the next `execute()` to build a fresh `reqwest::Client`
    /// instead of reusing the pooled one. Cleared automatically on use.
    /// Leaving this set across calls causes a large throughput regression,
    /// since every request pays a new handshake.
    pub fn set_fresh_connect(&self) {
        self.fresh_connect.store(true, Ordering::SeqCst);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the client to use for the next request, rebuilding it if
    /// `fresh_connect` was requested, then clears the flag.
    fn client_for_next_request(&mut self) -> &Client {
        if self.fresh_connect.swap(false, Ordering::SeqCst) {
            debug!(engine = %self.id, "forcing fresh connect");
            self.client = Self::build_client(&self.config);
        }
        &self.client
    }

    /// Begins building a request. DNS/data timeouts and IP version
    /// preference are advisory fields surfaced through logging; reqwest
    /// resolves via the system resolver and does not expose hooks for
    /// per-request DNS timeout or address family pinning.
    pub fn request(&mut self, method: Method, url: &str) -> reqwest::RequestBuilder {
        if self.config.ip_version != IpVersion::Auto {
            debug!(engine = %self.id, ip_version = ?self.config.ip_version, "preferred IP version is advisory only");
        }
        self.client_for_next_request().request(method, url)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Runs a retry-wrapped request and returns the populated
    /// [`ResponseHolder`] alongside the best-effort JSON body.
    ///
    /// `build` customizes the request (headers, body, bearer auth) before
    /// it is sent; it is called once per attempt since the request must be
    /// rebuilt against a possibly-fresh client after a retry.
    pub async fn execute(
        &mut self,
        method: Method,
        url: &str,
        build: impl Fn(RequestBuilder) -> RequestBuilder,
    ) -> (ResponseHolder, Result<serde_json::Value, ApiError>) {
        let client = self.client_for_next_request().clone();
        let id = self.id.clone();
        let fresh_connect = &self.fresh_connect;
        let on_retry = move || {
            debug!(engine = %id, "forcing fresh connect after retry");
            fresh_connect.store(true, Ordering::SeqCst);
        };
        execute_json(&client, method, url, build, on_retry).await
    }
}

/// Runs one `method url` request through [`retry::execute_with_retry`],
/// populating a [`ResponseHolder`] from whatever `reqwest::Response` comes
/// back. Used directly by call sites that hold a bare `reqwest::Client`
/// rather than a full [`HttpEngine`] (absolute upload-session URLs, the
/// `GraphClient`-based API surface); [`HttpEngine::execute`] is a thin
/// wrapper over the same logic for callers that do own an engine.
///
/// `build` is re-invoked on every attempt since the request builder is
/// consumed by `send()`. `on_retry` fires once per retry, before the sleep,
/// so an engine-backed caller can force a fresh connection.
pub async fn execute_json<F, R>(
    client: &Client,
    method: Method,
    url: &str,
    build: F,
    mut on_retry: R,
) -> (ResponseHolder, Result<serde_json::Value, ApiError>)
where
    F: Fn(RequestBuilder) -> RequestBuilder,
    R: FnMut(),
{
    retry::execute_with_retry(
        |mut holder: ResponseHolder| {
            let request = build(client.request(method.clone(), url));
            async move {
                match request.send().await {
                    Ok(response) => {
                        let status = response.status().as_u16();
                        let reason = response.status().canonical_reason().unwrap_or("");
                        holder.set_status(status, reason);
                        for (name, value) in response.headers() {
                            if let Ok(v) = value.to_str() {
                                holder.set_header(name.as_str(), v);
                            }
                        }
                        match response.bytes().await {
                            Ok(bytes) => {
                                holder.set_raw(bytes.to_vec());
                                // A body that doesn't parse as JSON (an empty 204, or raw file
                                // bytes from a download) is still a successful response; callers
                                // that need the bytes read them back via `holder.raw()` rather
                                // than this value, so a parse failure must not surface as
                                // ApiError::Api the way a genuine non-2xx status does.
                                let json = if bytes.is_empty() {
                                    None
                                } else {
                                    serde_json::from_slice::<serde_json::Value>(&bytes).ok()
                                };
                                if let Some(v) = json.clone() {
                                    holder.set_body(crate::response::ParsedBody::from_json(v));
                                }
                                let value = Some(json.unwrap_or(serde_json::Value::Null));
                                (holder, AttemptOutcome::Responded { status, value })
                            }
                            Err(e) => (
                                holder,
                                AttemptOutcome::TransportError {
                                    message: e.to_string(),
                                    ssl_ca_fatal: false,
                                },
                            ),
                        }
                    }
                    Err(e) => {
                        let message = e.to_string();
                        let ssl_ca_fatal = message.to_lowercase().contains("certificate")
                            || message.to_lowercase().contains("ssl")
                            || message.to_lowercase().contains("tls");
                        (holder, AttemptOutcome::TransportError { message, ssl_ca_fatal })
                    }
                }
            }
        },
        || on_retry(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_redirects, 5);
        assert!(config.keep_alive);
        assert!(!config.force_http11);
        assert_eq!(config.rate_limit_bytes_per_sec, 0);
    }

    #[test]
    fn engine_has_a_stable_id() {
        let engine = HttpEngine::new(EngineConfig::default());
        let id = engine.id().to_string();
        assert_eq!(engine.id(), id);
    }

    #[test]
    fn fresh_connect_clears_after_use() {
        let mut engine = HttpEngine::new(EngineConfig::default());
        engine.set_fresh_connect();
        assert!(engine.fresh_connect.load(Ordering::SeqCst));
        let _ = engine.client_for_next_request();
        assert!(!engine.fresh_connect.load(Ordering::SeqCst));
    }

    #[test]
    fn request_builds_against_given_url() {
        let mut engine = HttpEngine::new(EngineConfig::default());
        let req = engine
            .request(Method::GET, "https://graph.microsoft.com/v1.0/me")
            .build()
            .unwrap();
        assert_eq!(req.url().as_str(), "https://graph.microsoft.com/v1.0/me");
    }

    #[tokio::test]
    async fn execute_populates_holder_and_parses_json_body() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "x"})),
            )
            .mount(&server)
            .await;

        let mut engine = HttpEngine::new(EngineConfig::default());
        let (holder, result) = engine.execute(Method::GET, &server.uri(), |b| b).await;

        assert_eq!(holder.status(), Some(200));
        assert_eq!(result.unwrap()["id"], "x");
    }

    #[tokio::test]
    async fn execute_retries_once_on_429_then_succeeds() {
        tokio::time::pause();
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(429).insert_header("Retry-After", "2"),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let mut engine = HttpEngine::new(EngineConfig::default());
        let (_holder, result) = engine.execute(Method::GET, &server.uri(), |b| b).await;
        assert_eq!(result.unwrap()["ok"], true);
    }
}
