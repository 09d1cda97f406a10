//! OAuth2 PKCE authentication flow for Microsoft Graph API
//!
//! Implements the Authorization Code flow with PKCE (RFC 7636) for
//! authenticating native desktop applications with Microsoft identity platform.
//!
//! ## Components
//!
//! - [`OAuth2Config`] - Configuration for the OAuth2 flow
//! - [`KeyringTokenStorage`] - Secure token storage using the system keyring
//! - [`PKCEFlow`] - OAuth2 PKCE challenge/exchange logic
//! - [`LocalCallbackServer`] - Minimal HTTP server for the OAuth redirect
//! - [`GraphAuthAdapter`] - Orchestrates the full authentication flow

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use odsync_core::ports::cloud_provider::Tokens;
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, CsrfToken,
    EndpointNotSet, EndpointSet as OAuthEndpointSet, PkceCodeChallenge, PkceCodeVerifier,
    RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
// serde is used by Tokens (from odsync-core) for JSON serialization in KeyringTokenStorage
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use crate::endpoints::{self, Region};

/// Default tenant segment for the interactive/device flows (personal
/// Microsoft accounts); business/school tenants pass their own tenant id.
const DEFAULT_TENANT: &str = "consumers";

/// Default redirect URI for the local callback server
const REDIRECT_URI: &str = "http://127.0.0.1:8400/callback";

/// Keyring service name for storing tokens
const KEYRING_SERVICE: &str = "odsync";

/// Default OAuth2 scopes for OneDrive access
const DEFAULT_SCOPES: &[&str] = &["Files.ReadWrite.All", "User.Read", "offline_access"];

// ============================================================================
// OAuth2Config
// ============================================================================

/// Configuration for the OAuth2 PKCE authentication flow
#[derive(Debug, Clone)]
pub struct OAuth2Config {
    /// Application (client) ID from Azure AD app registration
    pub app_id: String,
    /// Redirect URI for receiving the authorization code
    pub redirect_uri: String,
    /// OAuth scopes to request
    pub scopes: Vec<String>,
    /// Cloud instance (Global, USL4, USL5, DE, CN) the tenant lives in
    pub region: Region,
    /// Tenant segment of the authorize/token URL, e.g. "consumers" for
    /// personal Microsoft accounts or a business/school tenant id or GUID
    pub tenant_id: String,
}

impl OAuth2Config {
    /// Creates a new OAuth2Config with the given app_id and default settings
    /// (Global region, `consumers` tenant).
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            redirect_uri: REDIRECT_URI.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            region: Region::Global,
            tenant_id: DEFAULT_TENANT.to_string(),
        }
    }

    /// Creates a config with custom scopes
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Creates a config with a custom redirect URI
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = uri.into();
        self
    }

    /// Creates a config pointed at a specific cloud region and tenant,
    /// e.g. a USL4/USL5/DE/CN business tenant instead of the default
    /// Global `consumers` tenant.
    pub fn with_region(mut self, region: Region, tenant_id: impl Into<String>) -> Self {
        self.region = region;
        self.tenant_id = tenant_id.into();
        self
    }

    /// Resolves this configuration's auth/token/redirect URLs through the
    /// region-aware endpoint resolver.
    fn resolved_endpoints(&self) -> endpoints::EndpointSet {
        endpoints::resolve(
            self.region,
            &self.tenant_id,
            &self.app_id,
            &self.redirect_uri,
            None,
        )
    }
}

// ============================================================================
// KeyringTokenStorage
// ============================================================================

/// Stores and retrieves OAuth tokens from the system keyring
///
/// Uses the `keyring` crate to store tokens securely in the OS credential
/// store (e.g., GNOME Keyring, KDE Wallet, macOS Keychain).
/// Tokens are serialized as JSON with the service name "odsync" and the
/// user's email as the username.
pub struct KeyringTokenStorage;

impl KeyringTokenStorage {
    /// Stores tokens in the system keyring for the given user
    ///
    /// # Arguments
    /// * `username` - The user's email address (used as keyring username)
    /// * `tokens` - The OAuth tokens to store
    pub fn store(username: &str, tokens: &Tokens) -> Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, username)
            .context("Failed to create keyring entry")?;

        let json = serde_json::to_string(tokens).context("Failed to serialize tokens")?;

        entry
            .set_password(&json)
            .context("Failed to store tokens in keyring")?;

        debug!("Stored tokens in keyring for user: {}", username);
        Ok(())
    }

    /// Loads tokens from the system keyring for the given user
    ///
    /// # Arguments
    /// * `username` - The user's email address (used as keyring username)
    ///
    /// # Returns
    /// `Some(Tokens)` if found and valid, `None` if not found
    pub fn load(username: &str) -> Result<Option<Tokens>> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, username)
            .context("Failed to create keyring entry")?;

        match entry.get_password() {
            Ok(json) => {
                let tokens: Tokens = serde_json::from_str(&json)
                    .context("Failed to deserialize tokens from keyring")?;
                debug!("Loaded tokens from keyring for user: {}", username);
                Ok(Some(tokens))
            }
            Err(keyring::Error::NoEntry) => {
                debug!("No tokens found in keyring for user: {}", username);
                Ok(None)
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to read from keyring")),
        }
    }

    /// Removes tokens from the system keyring for the given user
    ///
    /// # Arguments
    /// * `username` - The user's email address (used as keyring username)
    pub fn clear(username: &str) -> Result<()> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, username)
            .context("Failed to create keyring entry")?;

        match entry.delete_credential() {
            Ok(()) => {
                info!("Cleared tokens from keyring for user: {}", username);
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                debug!("No tokens to clear for user: {}", username);
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to delete from keyring")),
        }
    }
}

// ============================================================================
// PKCEFlow
// ============================================================================

/// OAuth2 PKCE flow implementation using the `oauth2` crate
///
/// Handles generating authorization URLs with PKCE challenges,
/// exchanging authorization codes for tokens, and refreshing tokens.
pub struct PKCEFlow {
    client: BasicClient<
        OAuthEndpointSet,
        EndpointNotSet,
        EndpointNotSet,
        EndpointNotSet,
        OAuthEndpointSet,
    >,
    scopes: Vec<String>,
}

impl PKCEFlow {
    /// Creates a new PKCEFlow with the given configuration, routing the
    /// authorize/token/redirect URLs through [`endpoints::resolve`] for the
    /// configured region and tenant.
    pub fn new(config: &OAuth2Config) -> Result<Self> {
        let resolved = config.resolved_endpoints();
        let client = BasicClient::new(ClientId::new(config.app_id.clone()))
            .set_auth_uri(AuthUrl::new(resolved.auth_url).context("Invalid authorization URL")?)
            .set_token_uri(TokenUrl::new(resolved.token_url).context("Invalid token URL")?)
            .set_redirect_uri(
                RedirectUrl::new(resolved.redirect_url).context("Invalid redirect URI")?,
            );

        Ok(Self {
            client,
            scopes: config.scopes.clone(),
        })
    }

    /// Generates an authorization URL with a PKCE challenge
    ///
    /// # Returns
    /// A tuple of `(authorization_url, csrf_token, pkce_verifier)`.
    /// The `pkce_verifier` must be kept until the code exchange step.
    pub fn generate_auth_url(&self) -> (String, CsrfToken, PkceCodeVerifier) {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut auth_request = self.client.authorize_url(CsrfToken::new_random);

        for scope in &self.scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.clone()));
        }

        let (auth_url, csrf_token) = auth_request.set_pkce_challenge(pkce_challenge).url();

        debug!("Generated authorization URL");
        (auth_url.to_string(), csrf_token, pkce_verifier)
    }

    /// Exchanges an authorization code for OAuth tokens
    ///
    /// # Arguments
    /// * `code` - The authorization code received from the callback
    /// * `pkce_verifier` - The PKCE verifier generated alongside the auth URL
    ///
    /// # Returns
    /// OAuth tokens on success
    pub async fn exchange_code(
        &self,
        code: String,
        pkce_verifier: PkceCodeVerifier,
    ) -> Result<Tokens> {
        info!("Exchanging authorization code for tokens");

        let http_client = reqwest::Client::new();
        let token_result = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(&http_client)
            .await
            .context("Failed to exchange authorization code")?;

        let expires_at = token_result
            .expires_in()
            .map(|d| Utc::now() + Duration::seconds(d.as_secs() as i64))
            .unwrap_or_else(|| Utc::now() + Duration::hours(1));

        let tokens = Tokens {
            access_token: token_result.access_token().secret().to_string(),
            refresh_token: token_result.refresh_token().map(|t| t.secret().to_string()),
            expires_at,
        };

        info!("Successfully obtained OAuth tokens");
        Ok(tokens)
    }

    /// Refreshes an expired access token using a refresh token
    ///
    /// # Arguments
    /// * `refresh_token` - The refresh token from a previous authentication
    ///
    /// # Returns
    /// New OAuth tokens with a fresh access token
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Tokens> {
        info!("Refreshing access token");

        let http_client = reqwest::Client::new();
        let token_result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&http_client)
            .await
            .context("Failed to refresh token")?;

        let expires_at = token_result
            .expires_in()
            .map(|d| Utc::now() + Duration::seconds(d.as_secs() as i64))
            .unwrap_or_else(|| Utc::now() + Duration::hours(1));

        let tokens = Tokens {
            access_token: token_result.access_token().secret().to_string(),
            refresh_token: token_result
                .refresh_token()
                .map(|t| t.secret().to_string())
                .or_else(|| Some(refresh_token.to_string())),
            expires_at,
        };

        info!("Successfully refreshed access token");
        Ok(tokens)
    }
}

// ============================================================================
// LocalCallbackServer
// ============================================================================

/// Minimal HTTP server that listens on localhost for the OAuth2 redirect callback.
///
/// Starts an HTTP server on `127.0.0.1:8400` that waits for the OAuth provider
/// to redirect the user's browser back with an authorization code. Once the
/// code is received, it responds with a success HTML page and shuts down.
pub struct LocalCallbackServer;

/// Parameters extracted from the OAuth2 callback
#[derive(Debug)]
pub struct CallbackParams {
    /// The authorization code
    pub code: String,
    /// The CSRF state parameter
    pub state: String,
}

impl LocalCallbackServer {
    /// Starts the local callback server and waits for the OAuth redirect
    ///
    /// # Returns
    /// The callback parameters (code and state) extracted from the redirect URL
    pub async fn start() -> Result<CallbackParams> {
        use http_body_util::Full;
        use hyper::body::Bytes;
        use hyper::server::conn::http1;
        use hyper::service::service_fn;
        use hyper::{Request, Response, StatusCode};
        use hyper_util::rt::TokioIo;
        use tokio::net::TcpListener;
        use tokio::sync::oneshot;

        info!("Starting local OAuth callback server on 127.0.0.1:8400");

        let listener = TcpListener::bind("127.0.0.1:8400")
            .await
            .context("Failed to bind callback server to 127.0.0.1:8400")?;

        let (tx, rx) = oneshot::channel::<CallbackParams>();
        let tx = std::sync::Arc::new(tokio::sync::Mutex::new(Some(tx)));

        // Accept a single connection
        let (stream, _addr) = listener
            .accept()
            .await
            .context("Failed to accept connection on callback server")?;

        let io = TokioIo::new(stream);
        let tx_clone = tx.clone();

        let service = service_fn(move |req: Request<hyper::body::Incoming>| {
            let tx_inner = tx_clone.clone();
            async move {
                let uri = req.uri().to_string();
                debug!("Callback server received request: {}", uri);

                // Parse query parameters from the URI
                let params = parse_callback_params(&uri);

                match params {
                    Some(callback_params) => {
                        // Send the params through the channel
                        if let Some(sender) = tx_inner.lock().await.take() {
                            let _ = sender.send(callback_params);
                        }

                        // Return success page
                        let html = success_html();
                        Ok::<_, hyper::Error>(
                            Response::builder()
                                .status(StatusCode::OK)
                                .header("Content-Type", "text/html; charset=utf-8")
                                .body(Full::new(Bytes::from(html)))
                                .unwrap(),
                        )
                    }
                    None => {
                        // Return error page
                        let html = error_html("Missing authorization code in callback");
                        Ok(Response::builder()
                            .status(StatusCode::BAD_REQUEST)
                            .header("Content-Type", "text/html; charset=utf-8")
                            .body(Full::new(Bytes::from(html)))
                            .unwrap())
                    }
                }
            }
        });

        // Serve the single connection
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!("Callback server connection error: {}", e);
            }
        });

        // Wait for the callback parameters
        let params = rx
            .await
            .context("Callback server channel closed without receiving parameters")?;

        info!("Received OAuth callback with authorization code");
        Ok(params)
    }
}

/// Parses the authorization code and state from a callback URI
fn parse_callback_params(uri: &str) -> Option<CallbackParams> {
    let url = url::Url::parse(&format!("http://localhost{}", uri)).ok()?;
    let mut code = None;
    let mut state = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            _ => {}
        }
    }

    Some(CallbackParams {
        code: code?,
        state: state.unwrap_or_default(),
    })
}

/// Returns the HTML for a successful authentication page
fn success_html() -> String {
    r#"<!DOCTYPE html>
<html>
<head><title>OneDrive Sync - Authentication Successful</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 50px;">
    <h1>Authentication Successful</h1>
    <p>You have been authenticated with OneDrive.</p>
    <p>You can close this window and return to OneDrive Sync.</p>
    <script>setTimeout(function() { window.close(); }, 3000);</script>
</body>
</html>"#
        .to_string()
}

/// Returns the HTML for an authentication error page
fn error_html(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>OneDrive Sync - Authentication Error</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 50px;">
    <h1>Authentication Error</h1>
    <p>{}</p>
    <p>Please close this window and try again.</p>
</body>
</html>"#,
        message
    )
}

// ============================================================================
// GraphAuthAdapter
// ============================================================================

/// High-level authentication adapter that orchestrates the full OAuth2 PKCE flow.
///
/// Combines [`PKCEFlow`], [`LocalCallbackServer`], and browser launching to
/// provide a complete interactive authentication experience:
///
/// 1. Generates PKCE authorization URL
/// 2. Opens the user's browser to the Microsoft login page
/// 3. Starts a local callback server to receive the redirect
/// 4. Exchanges the authorization code for tokens
/// 5. Returns the OAuth tokens
#[derive(Clone)]
pub struct GraphAuthAdapter {
    config: OAuth2Config,
}

impl GraphAuthAdapter {
    /// Creates a new GraphAuthAdapter with the given configuration
    pub fn new(config: OAuth2Config) -> Self {
        Self { config }
    }

    /// Creates a new GraphAuthAdapter with just an app ID
    pub fn with_app_id(app_id: impl Into<String>) -> Self {
        Self {
            config: OAuth2Config::new(app_id),
        }
    }

    /// Performs the full interactive OAuth2 PKCE login flow
    ///
    /// This will:
    /// 1. Generate a PKCE-secured authorization URL
    /// 2. Open the user's default browser to Microsoft login
    /// 3. Start a local HTTP server to receive the callback
    /// 4. Exchange the authorization code for tokens
    ///
    /// # Returns
    /// OAuth tokens on successful authentication
    pub async fn login(&self) -> Result<Tokens> {
        info!("Starting OAuth2 PKCE login flow");

        let flow = PKCEFlow::new(&self.config)?;

        // Step 1: Generate authorization URL with PKCE
        let (auth_url, _csrf_token, pkce_verifier) = flow.generate_auth_url();

        // Step 2: Open the browser
        info!("Opening browser for authentication");
        webbrowser::open(&auth_url).context("Failed to open browser for authentication")?;

        // Step 3: Start local callback server and wait for redirect
        let callback = LocalCallbackServer::start().await?;

        // Step 4: Exchange authorization code for tokens
        let tokens = flow.exchange_code(callback.code, pkce_verifier).await?;

        info!("OAuth2 PKCE login completed successfully");
        Ok(tokens)
    }

    /// Refreshes an expired access token
    ///
    /// # Arguments
    /// * `refresh_token` - The refresh token from a previous authentication
    ///
    /// # Returns
    /// New OAuth tokens
    pub async fn refresh(&self, refresh_token: &str) -> Result<Tokens> {
        let flow = PKCEFlow::new(&self.config)?;
        flow.refresh_token(refresh_token).await
    }

    /// Returns a reference to the current configuration
    pub fn config(&self) -> &OAuth2Config {
        &self.config
    }
}

// ============================================================================
// TokenFileStore - refresh_token file fallback
// ============================================================================

/// File-based fallback for refresh token persistence, used when no OS
/// keyring daemon is reachable (headless hosts, CI). The keyring remains
/// the primary store; this satisfies the "persisted to a file with
/// restrictive permissions" contract literally for that case.
pub struct TokenFileStore;

impl TokenFileStore {
    /// Writes `refresh_token` to `path`, replacing it whole-file and
    /// setting owner-only read/write permissions (`0600`).
    pub fn store(path: &Path, refresh_token: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create refresh token directory")?;
            Self::restrict_directory(parent)?;
        }
        std::fs::write(path, refresh_token).context("Failed to write refresh_token file")?;
        Self::restrict_file(path)?;
        debug!(path = %path.display(), "persisted refresh token to file fallback");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Option<String>> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read refresh_token file"),
        }
    }

    #[cfg(unix)]
    fn restrict_file(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .context("Failed to set refresh_token file permissions")
    }

    #[cfg(not(unix))]
    fn restrict_file(_path: &Path) -> Result<()> {
        Ok(())
    }

    #[cfg(unix)]
    fn restrict_directory(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .context("Failed to set refresh_token directory permissions")
    }

    #[cfg(not(unix))]
    fn restrict_directory(_path: &Path) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Tolerant authorization-code extraction
// ============================================================================

/// Extracts the `code` query parameter from arbitrary pasted text (a full
/// redirect URI, a bare query string, or text copy-pasted with surrounding
/// noise) using the same tolerant pattern regardless of entry point:
/// console paste, a watched file pair, or a string supplied directly.
pub fn extract_code_tolerant(text: &str) -> Option<String> {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = PATTERN.get_or_init(|| regex::Regex::new(r"[?&]code=([\w\d\-.]+)").unwrap());
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Where the pasted redirect URI comes from when a local callback server
/// isn't available (headless hosts).
pub enum CodeSource<'a> {
    /// The user typed or pasted the full redirect URI at the console.
    Literal(&'a str),
    /// A URL file was written for the user to open, and a response file is
    /// polled for until it appears (100ms poll per the auth-files
    /// contract).
    WatchedFilePair { response_file: &'a Path },
}

/// Extracts the authorization code from whichever source is configured.
/// Polling a watched response file and pasting at the console must yield
/// the same extracted code for the same URI content.
pub async fn acquire_code_tolerant(source: CodeSource<'_>) -> Result<String> {
    let text = match source {
        CodeSource::Literal(text) => text.to_string(),
        CodeSource::WatchedFilePair { response_file } => loop {
            match std::fs::read_to_string(response_file) {
                Ok(contents) => break contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tokio::time::sleep(StdDuration::from_millis(100)).await;
                }
                Err(e) => return Err(e).context("Failed to read response URI file"),
            }
        },
    };

    extract_code_tolerant(&text).context("No authorization code found in supplied text")
}

/// Aborts with an actionable message when a read-only scope configuration
/// receives a token whose granted scope contains a write capability — the
/// user must revoke consent online before retrying.
pub fn check_read_only_scope(granted_scope: &str, read_only_configured: bool) -> Result<()> {
    if read_only_configured && granted_scope.to_ascii_lowercase().contains("write") {
        bail!(
            "Read-only access was configured, but the granted scope \"{}\" includes write \
             capability. Revoke this application's consent in your Microsoft account and \
             sign in again to obtain a read-only grant.",
            granted_scope
        );
    }
    Ok(())
}

// ============================================================================
// Device Authorization Flow
// ============================================================================

/// Raw response from the device-authorization endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DeviceAuthResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub interval: u64,
}

#[derive(Debug, serde::Deserialize)]
struct DeviceTokenErrorResponse {
    error: String,
}

#[derive(Debug, serde::Deserialize)]
struct DeviceTokenSuccessResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Outcome of one device-code poll.
enum PollOutcome {
    Tokens(Tokens),
    KeepPolling,
    GiveUp,
}

/// OAuth2 Device Authorization Flow (RFC 8628) for headless/TV-style
/// sign-in: display a short code and URL, then poll until the user
/// completes sign-in elsewhere.
pub struct DeviceAuthFlow {
    device_auth_url: String,
    token_url: String,
    client_id: String,
    scopes: Vec<String>,
}

impl DeviceAuthFlow {
    pub fn new(
        device_auth_url: impl Into<String>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            device_auth_url: device_auth_url.into(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            scopes,
        }
    }

    /// Builds a device flow against the region/tenant resolved from an
    /// [`OAuth2Config`], rather than hand-assembling the device-auth and
    /// token URLs.
    pub fn for_config(config: &OAuth2Config) -> Self {
        let resolved = config.resolved_endpoints();
        Self::new(
            resolved.device_auth_url,
            resolved.token_url,
            config.app_id.clone(),
            config.scopes.clone(),
        )
    }

    /// Starts the flow: `POST client_id + scope` to the device-auth URL.
    pub async fn start(&self) -> Result<DeviceAuthResponse> {
        let http_client = reqwest::Client::new();
        let response = http_client
            .post(&self.device_auth_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("scope", self.scopes.join(" ").as_str()),
            ])
            .send()
            .await
            .context("Failed to start device authorization flow")?
            .error_for_status()
            .context("Device authorization endpoint returned error status")?;

        let parsed: DeviceAuthResponse = response
            .json()
            .await
            .context("Failed to parse device authorization response")?;

        info!(
            user_code = %parsed.user_code,
            verification_uri = %parsed.verification_uri,
            "device authorization started"
        );
        Ok(parsed)
    }

    /// Polls the token URL every `interval` seconds until either tokens
    /// arrive or the `expires_in` window elapses.
    ///
    /// `authorization_pending` keeps polling; `authorization_declined` and
    /// `expired_token` (and any other error) give up, signalling the
    /// caller to clear its "use device auth" preference and fall back to
    /// the interactive flow.
    pub async fn poll(&self, device: &DeviceAuthResponse) -> Result<Tokens> {
        let http_client = reqwest::Client::new();
        let deadline = tokio::time::Instant::now() + StdDuration::from_secs(device.expires_in);
        let interval = StdDuration::from_secs(device.interval.max(1));

        loop {
            if tokio::time::Instant::now() >= deadline {
                bail!("Device code expired before the user completed sign-in");
            }

            tokio::time::sleep(interval).await;

            let response = http_client
                .post(&self.token_url)
                .form(&[
                    ("client_id", self.client_id.as_str()),
                    (
                        "grant_type",
                        "urn:ietf:params:oauth:grant-type:device_code",
                    ),
                    ("device_code", device.device_code.as_str()),
                ])
                .send()
                .await
                .context("Failed to poll device token endpoint")?;

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read device token poll response")?;

            match Self::classify_poll(status, &body) {
                PollOutcome::Tokens(tokens) => return Ok(tokens),
                PollOutcome::KeepPolling => {
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    debug!(remaining_secs = remaining.as_secs(), "authorization pending");
                    continue;
                }
                PollOutcome::GiveUp => {
                    bail!("Device authorization was declined or expired");
                }
            }
        }
    }

    fn classify_poll(status: reqwest::StatusCode, body: &str) -> PollOutcome {
        if status.is_success() {
            if let Ok(success) = serde_json::from_str::<DeviceTokenSuccessResponse>(body) {
                let expires_at = Utc::now() + Duration::seconds(success.expires_in);
                return PollOutcome::Tokens(Tokens {
                    access_token: success.access_token,
                    refresh_token: success.refresh_token,
                    expires_at,
                });
            }
        }

        match serde_json::from_str::<DeviceTokenErrorResponse>(body) {
            Ok(err) if err.error == "authorization_pending" => PollOutcome::KeepPolling,
            Ok(err) => {
                warn!(error = %err.error, "device authorization poll failed");
                PollOutcome::GiveUp
            }
            Err(_) => PollOutcome::GiveUp,
        }
    }
}

// ============================================================================
// Intune broker SSO
// ============================================================================

/// A token as returned by an Intune (or equivalent MDM) broker.
#[derive(Debug, Clone)]
pub struct BrokerToken {
    pub access_token: String,
    /// Opaque account blob to persist and replay for silent acquisition.
    pub account: Vec<u8>,
    /// Unix milliseconds.
    pub expires_on: i64,
}

/// Abstraction over an external broker binding. The broker itself (a
/// platform-specific SSO component) is supplied by the host application;
/// this crate only defines the contract it calls through.
#[async_trait::async_trait]
pub trait IntuneBroker: Send + Sync {
    async fn acquire_token_interactive(&self, client_id: &str) -> Result<BrokerToken>;
    async fn acquire_token_silently(&self, account: &[u8], client_id: &str) -> Result<BrokerToken>;
}

/// Orchestrates Intune broker SSO: interactive acquisition on first use,
/// silent acquisition (with the persisted account blob) thereafter. On
/// silent failure the sidecar is deleted and the caller should fall back
/// to interactive acquisition.
pub struct IntuneFlow<B: IntuneBroker> {
    broker: B,
    account_sidecar: PathBuf,
}

impl<B: IntuneBroker> IntuneFlow<B> {
    pub fn new(broker: B, account_sidecar: PathBuf) -> Self {
        Self {
            broker,
            account_sidecar,
        }
    }

    fn to_tokens(token: BrokerToken) -> Tokens {
        let expires_at = chrono::DateTime::<Utc>::from_timestamp_millis(token.expires_on)
            .unwrap_or_else(Utc::now);
        Tokens {
            access_token: token.access_token,
            refresh_token: None,
            expires_at,
        }
    }

    pub async fn login_interactive(&self, client_id: &str) -> Result<Tokens> {
        let token = self
            .broker
            .acquire_token_interactive(client_id)
            .await
            .context("Interactive broker acquisition failed")?;
        std::fs::write(&self.account_sidecar, &token.account)
            .context("Failed to persist intune account sidecar")?;
        Ok(Self::to_tokens(token))
    }

    pub async fn login_silent(&self, client_id: &str) -> Result<Tokens> {
        let account = std::fs::read(&self.account_sidecar)
            .context("No persisted intune account sidecar")?;

        match self.broker.acquire_token_silently(&account, client_id).await {
            Ok(token) => Ok(Self::to_tokens(token)),
            Err(e) => {
                warn!(error = %e, "silent broker acquisition failed, clearing sidecar");
                let _ = std::fs::remove_file(&self.account_sidecar);
                Err(e)
            }
        }
    }
}
