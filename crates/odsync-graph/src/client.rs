//! Microsoft Graph API client
//!
//! Provides a typed HTTP client for interacting with the Microsoft Graph API.
//! Handles authentication headers, JSON deserialization, and endpoint construction.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use odsync_graph::client::GraphClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = GraphClient::new("access-token-here");
//! let user_info = client.get_user_info().await?;
//! println!("Hello, {}", user_info.display_name);
//! # Ok(())
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use odsync_core::{domain::newtypes::RemoteId, ports::cloud_provider::UserInfo};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::endpoints::{self, Region};
use crate::rate_limit::{parse_retry_after, AdaptiveRateLimiter};

/// The curated `$select` projection requested for every item fetched by
/// id or path. Deliberately narrow: the crate only needs these fields.
const ITEM_SELECT: &str =
    "id,name,eTag,cTag,deleted,file,folder,root,fileSystemInfo,remoteItem,parentReference,size,createdBy,lastModifiedBy,package";

/// Projection appended only for id-form item fetches.
const ITEM_SELECT_ID_EXTRA: &str = "webUrl,lastModifiedDateTime";

/// Percent-encodes a OneDrive-style path segment for the `root:/{path}:`
/// item-by-path form, preserving `/` as a segment separator.
fn urlencoding_path(path: &str) -> String {
    path.split('/')
        .map(urlencoding_segment)
        .collect::<Vec<_>>()
        .join("/")
}

fn urlencoding_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

/// Percent-encodes a search query for `search(q='{urlencoded}')`.
fn urlencoding_query(query: &str) -> String {
    url::form_urlencoded::byte_serialize(query.as_bytes()).collect()
}

/// A Drive/Item as returned by the id/path lookup and mutation endpoints.
/// Kept as a typed view over the handful of fields this crate consumes;
/// everything else is dropped at deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct DriveItem {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "eTag")]
    pub etag: Option<String>,
    #[serde(rename = "cTag")]
    pub ctag: Option<String>,
    pub size: Option<u64>,
    #[serde(rename = "webUrl")]
    pub web_url: Option<String>,
    pub deleted: Option<Value>,
    pub folder: Option<Value>,
    pub file: Option<Value>,
}


// ============================================================================
// Graph API response types
// ============================================================================

/// Response from the /me endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    /// User's display name
    display_name: Option<String>,
    /// User's email (mail field)
    mail: Option<String>,
    /// User's principal name (typically email)
    user_principal_name: Option<String>,
    /// User ID
    id: Option<String>,
}

/// Response from the /me/drive endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveResponse {
    /// Drive ID
    #[allow(dead_code)]
    id: Option<String>,
    /// Quota information
    quota: Option<QuotaResponse>,
}

/// Quota information from the drive response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaResponse {
    /// Total storage in bytes
    total: Option<u64>,
    /// Used storage in bytes
    used: Option<u64>,
    /// Remaining storage in bytes
    #[allow(dead_code)]
    remaining: Option<u64>,
}

// ============================================================================
// GraphClient
// ============================================================================

/// Default retry-after duration when header is missing (30 seconds)
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Maximum number of retries for 429 responses when no rate limiter is configured
const DEFAULT_MAX_RETRIES: u32 = 5;

/// HTTP client for Microsoft Graph API calls
///
/// Wraps `reqwest::Client` with authentication headers and base URL
/// construction for the Microsoft Graph API.
///
/// Optionally integrates with an [`AdaptiveRateLimiter`] for proactive
/// rate limiting and automatic 429 retry handling.
pub struct GraphClient {
    /// The underlying HTTP client
    client: Client,
    /// Base URL for API requests
    base_url: String,
    /// Current OAuth2 access token
    access_token: String,
    /// Optional adaptive rate limiter for proactive throttling
    rate_limiter: Option<Arc<AdaptiveRateLimiter>>,
}

impl GraphClient {
    /// Creates a new GraphClient with the given access token
    ///
    /// # Arguments
    /// * `access_token` - A valid OAuth2 access token for Microsoft Graph
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_region(access_token, Region::Global)
    }

    /// Creates a new GraphClient whose base URL is the Graph host for
    /// `region` instead of the Global default. The Global host is the only
    /// one that responds to `https://graph.microsoft.com`; USL4/USL5/DE/CN
    /// tenants 404 against it.
    pub fn with_region(access_token: impl Into<String>, region: Region) -> Self {
        Self {
            client: Client::new(),
            base_url: endpoints::graph_base_url(region),
            access_token: access_token.into(),
            rate_limiter: None,
        }
    }

    /// Creates a new GraphClient with a custom base URL (useful for testing)
    ///
    /// # Arguments
    /// * `access_token` - A valid OAuth2 access token
    /// * `base_url` - Custom base URL for API requests
    pub fn with_base_url(access_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            access_token: access_token.into(),
            rate_limiter: None,
        }
    }

    /// Sets the adaptive rate limiter for this client.
    ///
    /// When a rate limiter is present, methods like [`execute_with_retry`]
    /// will acquire a token before sending requests and notify the limiter
    /// of successes and throttle events.
    ///
    /// # Arguments
    /// * `limiter` - A shared adaptive rate limiter instance
    pub fn with_rate_limiter(mut self, limiter: Arc<AdaptiveRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Sets the rate limiter on an existing client (mutable setter variant).
    ///
    /// # Arguments
    /// * `limiter` - A shared adaptive rate limiter instance
    pub fn set_rate_limiter(&mut self, limiter: Arc<AdaptiveRateLimiter>) {
        self.rate_limiter = Some(limiter);
        debug!("Rate limiter attached to GraphClient");
    }

    /// Returns a reference to the rate limiter, if configured.
    pub fn rate_limiter(&self) -> Option<&Arc<AdaptiveRateLimiter>> {
        self.rate_limiter.as_ref()
    }

    /// Updates the access token (e.g., after a token refresh)
    ///
    /// # Arguments
    /// * `token` - The new access token
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
        debug!("Updated GraphClient access token");
    }

    /// Returns a reference to the current access token
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Creates an authenticated request builder for the given method and path
    ///
    /// Automatically prepends the base URL and adds the Authorization header.
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, PUT, DELETE, etc.)
    /// * `path` - API path relative to base URL (e.g., "/me" or "/me/drive")
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .bearer_auth(&self.access_token)
    }

    /// Runs `method path` through [`crate::engine::execute_json`], so every
    /// call site gets the 429/503/transient retry taxonomy instead of a bare
    /// `error_for_status()`. Returns the populated [`crate::response::ResponseHolder`]
    /// alongside the parsed JSON body (or an error) for callers that need
    /// the raw bytes (e.g. a download) or the response status.
    pub(crate) async fn execute_json(
        &self,
        method: Method,
        path: &str,
        build: impl Fn(RequestBuilder) -> RequestBuilder,
    ) -> (crate::response::ResponseHolder, Result<Value>) {
        let url = format!("{}{}", self.base_url, path);
        let token = self.access_token.clone();
        let (holder, result) = crate::engine::execute_json(
            &self.client,
            method,
            &url,
            |builder| build(builder.bearer_auth(token.clone())),
            || {},
        )
        .await;
        let result = result.map_err(|err| {
            anyhow::Error::new(err).context(format!("request to {} failed", url))
        });
        (holder, result)
    }

    /// Retrieves information about the authenticated user
    ///
    /// Makes two API calls:
    /// 1. `GET /me` - for user profile (name, email, id)
    /// 2. `GET /me/drive` - for drive quota information
    ///
    /// # Returns
    /// A [`UserInfo`] struct with the user's profile and quota data
    pub async fn get_user_info(&self) -> Result<UserInfo> {
        debug!("Fetching user info from /me");

        // Get user profile
        let (_, result) = self.execute_json(Method::GET, "/me", |b| b).await;
        let me: MeResponse =
            serde_json::from_value(result?).context("Failed to parse /me response")?;

        // Get drive quota
        let (quota_used, quota_total) = self.get_drive_quota().await?;

        let email = me
            .mail
            .or(me.user_principal_name)
            .unwrap_or_else(|| "unknown@unknown.com".to_string());

        let display_name = me
            .display_name
            .unwrap_or_else(|| "Unknown User".to_string());

        let id = me.id.unwrap_or_default();

        Ok(UserInfo {
            email,
            display_name,
            id,
            quota_used,
            quota_total,
        })
    }

    /// Retrieves drive quota information
    ///
    /// # Returns
    /// A tuple of `(used_bytes, total_bytes)`
    pub async fn get_drive_quota(&self) -> Result<(u64, u64)> {
        debug!("Fetching drive quota from /me/drive");

        let (_, result) = self.execute_json(Method::GET, "/me/drive", |b| b).await;
        let drive: DriveResponse =
            serde_json::from_value(result?).context("Failed to parse /me/drive response")?;

        let used = drive.quota.as_ref().and_then(|q| q.used).unwrap_or(0);

        let total = drive.quota.as_ref().and_then(|q| q.total).unwrap_or(0);

        if total == 0 {
            warn!("Drive quota total is 0, this may indicate an API issue");
        }

        debug!("Drive quota: {} / {} bytes", used, total);
        Ok((used, total))
    }

    /// Returns drive metadata for either the default drive or an explicit
    /// drive id, mirroring the endpoint resolver's drive-id rebasing rule.
    ///
    /// `GET /me/drive` when `drive_id` is `None`, `GET /drives/{id}` when
    /// given.
    pub async fn get_drive(&self, drive_id: Option<&RemoteId>) -> Result<Response> {
        let path = match drive_id {
            Some(id) => format!("/drives/{}", id.as_str()),
            None => "/me/drive".to_string(),
        };
        self.request(Method::GET, &path)
            .send()
            .await
            .context("Failed to fetch drive metadata")
    }

    /// `GET /drives/{driveId}/root` for an explicit drive, or
    /// `GET /me/drive/root` for the default drive.
    pub async fn get_drive_root(&self, drive_id: Option<&RemoteId>) -> Result<DriveItem> {
        let path = match drive_id {
            Some(id) => format!("/drives/{}/root?$select={ITEM_SELECT}", id.as_str()),
            None => format!("/me/drive/root?$select={ITEM_SELECT}"),
        };
        let (_, result) = self.execute_json(Method::GET, &path, |b| b).await;
        serde_json::from_value(result.context("Failed to fetch drive root")?)
            .context("Failed to parse drive root response")
    }

    /// Fetches an item by id with the curated projection (plus the
    /// id-form-only fields `webUrl`/`lastModifiedDateTime`).
    pub async fn get_item_by_id(&self, drive_id: &RemoteId, item_id: &str) -> Result<DriveItem> {
        let path = format!(
            "/drives/{}/items/{}?$select={ITEM_SELECT},{ITEM_SELECT_ID_EXTRA}",
            drive_id.as_str(),
            item_id
        );
        let (_, result) = self.execute_json(Method::GET, &path, |b| b).await;
        serde_json::from_value(result.context("Failed to fetch item by id")?)
            .context("Failed to parse item response")
    }

    /// Fetches an item by its percent-encoded OneDrive-style path.
    /// Path form appends `:/` and the curated projection, without the
    /// id-form-only extra fields.
    pub async fn get_item_by_path(&self, drive_id: &RemoteId, path: &str) -> Result<DriveItem> {
        let encoded = urlencoding_path(path);
        let url_path = format!(
            "/drives/{}/root:/{}:?$select={ITEM_SELECT}",
            drive_id.as_str(),
            encoded
        );
        let (_, result) = self.execute_json(Method::GET, &url_path, |b| b).await;
        serde_json::from_value(result.context("Failed to fetch item by path")?)
            .context("Failed to parse item response")
    }

    /// `GET /drives/{driveId}/root/children` - one-shot, non-incremental
    /// folder listing, as distinct from the incremental `delta` pass.
    pub async fn list_children(&self, drive_id: &RemoteId, folder_id: &str) -> Result<Vec<DriveItem>> {
        let path = format!("/drives/{}/items/{}/children", drive_id.as_str(), folder_id);
        #[derive(Deserialize)]
        struct Page {
            value: Vec<DriveItem>,
        }
        let (_, result) = self.execute_json(Method::GET, &path, |b| b).await;
        let page: Page = serde_json::from_value(result.context("Failed to list children")?)
            .context("Failed to parse children response")?;
        Ok(page.value)
    }

    /// `GET /drives/{driveId}/root/search(q='{urlencoded}')`.
    pub async fn search(&self, drive_id: &RemoteId, query: &str) -> Result<Vec<DriveItem>> {
        let encoded = urlencoding_query(query);
        let path = format!(
            "/drives/{}/root/search(q='{}')",
            drive_id.as_str(),
            encoded
        );
        #[derive(Deserialize)]
        struct Page {
            value: Vec<DriveItem>,
        }
        let (_, result) = self.execute_json(Method::GET, &path, |b| b).await;
        let page: Page = serde_json::from_value(result.context("Failed to search drive")?)
            .context("Failed to parse search response")?;
        Ok(page.value)
    }

    /// `PATCH` an item, optionally with an `If-Match: {eTag}` precondition.
    pub async fn patch_item(
        &self,
        drive_id: &RemoteId,
        item_id: &str,
        body: &Value,
        if_match: Option<&str>,
    ) -> Result<DriveItem> {
        let path = format!("/drives/{}/items/{}", drive_id.as_str(), item_id);
        let body = body.clone();
        let (_, result) = self
            .execute_json(Method::PATCH, &path, |builder| {
                let builder = builder.json(&body);
                match if_match {
                    Some(etag) => builder.header("If-Match", etag),
                    None => builder,
                }
            })
            .await;
        serde_json::from_value(result.context("Failed to patch item")?)
            .context("Failed to parse patched item response")
    }

    /// `DELETE` an item (moves it to the recycle bin).
    pub async fn delete_item(&self, drive_id: &RemoteId, item_id: &str) -> Result<()> {
        let path = format!("/drives/{}/items/{}", drive_id.as_str(), item_id);
        let (_, result) = self.execute_json(Method::DELETE, &path, |b| b).await;
        result.context("Failed to delete item")?;
        Ok(())
    }

    /// `POST .../permanentDelete` - bypasses the recycle bin.
    pub async fn permanent_delete(&self, drive_id: &RemoteId, item_id: &str) -> Result<()> {
        let path = format!(
            "/drives/{}/items/{}/permanentDelete",
            drive_id.as_str(),
            item_id
        );
        let (_, result) = self.execute_json(Method::POST, &path, |b| b).await;
        result.context("Failed to permanently delete item")?;
        Ok(())
    }

    /// `POST .../children` with a JSON body (e.g. to create a folder).
    pub async fn create_child(
        &self,
        drive_id: &RemoteId,
        parent_id: &str,
        body: &Value,
    ) -> Result<DriveItem> {
        let path = format!("/drives/{}/items/{}/children", drive_id.as_str(), parent_id);
        let body = body.clone();
        let (_, result) = self
            .execute_json(Method::POST, &path, |b| b.json(&body))
            .await;
        serde_json::from_value(result.context("Failed to create child item")?)
            .context("Failed to parse created child response")
    }

    /// `POST .../createLink` - creates a sharing link for an item.
    pub async fn create_link(
        &self,
        drive_id: &RemoteId,
        item_id: &str,
        link_type: &str,
        scope: &str,
    ) -> Result<Value> {
        #[derive(Serialize, Clone)]
        struct CreateLinkBody {
            #[serde(rename = "type")]
            link_type: String,
            scope: String,
        }
        let body = CreateLinkBody {
            link_type: link_type.to_string(),
            scope: scope.to_string(),
        };
        let path = format!("/drives/{}/items/{}/createLink", drive_id.as_str(), item_id);
        let (_, result) = self
            .execute_json(Method::POST, &path, |b| b.json(&body))
            .await;
        result.context("Failed to create sharing link")
    }

    /// Downloads a file by its remote item ID
    ///
    /// Makes `GET /me/drive/items/{id}/content` which returns the raw file bytes.
    /// The Graph API follows a redirect to the actual download URL automatically
    /// (reqwest follows redirects by default).
    ///
    /// # Arguments
    /// * `id` - The OneDrive item ID of the file to download
    ///
    /// # Returns
    /// The file contents as a byte vector
    pub async fn download_file(&self, id: &RemoteId) -> Result<Vec<u8>> {
        let path = format!("/me/drive/items/{}/content", id.as_str());
        debug!("Downloading file: {}", id.as_str());

        let (holder, result) = self.execute_json(Method::GET, &path, |b| b).await;
        result.context("Download request failed")?;
        let bytes = holder.raw().to_vec();

        debug!("Downloaded {} bytes for item {}", bytes.len(), id.as_str());
        Ok(bytes)
    }

    // ========================================================================
    // execute_with_retry - 429 response handling
    // ========================================================================

    /// Executes an HTTP request with automatic 429 retry and rate limiting.
    ///
    /// This method wraps the request lifecycle with:
    /// 1. **Proactive rate limiting**: If a rate limiter is configured, acquires
    ///    a token for the given endpoint before sending the request.
    /// 2. **429 handling**: On HTTP 429 (Too Many Requests), parses the
    ///    `Retry-After` header, notifies the rate limiter, sleeps, and retries.
    /// 3. **Success notification**: On a successful response, notifies the
    ///    rate limiter to support adaptive capacity recovery.
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `path` - API path relative to base URL
    /// * `endpoint_category` - Logical endpoint category for rate limiting
    ///   (e.g., "delta", "upload", "download", "metadata")
    ///
    /// # Returns
    /// The HTTP response on success, or an error after all retries are exhausted.
    pub async fn execute_with_retry(
        &self,
        method: Method,
        path: &str,
        endpoint_category: &str,
    ) -> Result<Response> {
        let max_retries = self
            .rate_limiter
            .as_ref()
            .map(|rl| rl.max_retries())
            .unwrap_or(DEFAULT_MAX_RETRIES);

        for attempt in 0..=max_retries {
            // Step 1: Acquire rate limit token if limiter is present
            if let Some(ref limiter) = self.rate_limiter {
                let _guard = limiter.acquire(endpoint_category).await;
            }

            // Step 2: Build and send request
            let response = self
                .request(method.clone(), path)
                .send()
                .await
                .context("Failed to send request")?;

            // Step 3: Check for 429
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= max_retries {
                    warn!(path, attempts = attempt + 1, "429 retry limit exhausted");
                    return Err(anyhow::anyhow!(
                        "Too many requests: retry limit exhausted after {} attempts for {}",
                        attempt + 1,
                        path
                    ));
                }

                // Parse Retry-After header
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER))
                    .unwrap_or(DEFAULT_RETRY_AFTER);

                // Notify rate limiter
                if let Some(ref limiter) = self.rate_limiter {
                    limiter.on_throttle(endpoint_category);
                }

                info!(
                    path,
                    attempt,
                    retry_after_ms = retry_after.as_millis(),
                    "Received 429, backing off"
                );

                tokio::time::sleep(retry_after).await;
                continue;
            }

            // Step 4: Success - notify rate limiter
            if let Some(ref limiter) = self.rate_limiter {
                limiter.on_success(endpoint_category);
            }

            if attempt > 0 {
                info!(path, attempt, "Request succeeded after retry");
            }

            return Ok(response);
        }

        Err(anyhow::anyhow!(
            "Request failed: retry loop exited unexpectedly for {}",
            path
        ))
    }

    /// Returns a reference to the underlying HTTP client
    ///
    /// This is useful for upload operations that need to make requests
    /// to absolute URLs (e.g., upload session URLs) rather than relative paths.
    pub(crate) fn http_client(&self) -> &Client {
        &self.client
    }

    /// Returns the base URL for API requests
    ///
    /// Used when constructing direct API URLs (e.g., for download URLs).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns a reference to the underlying reqwest Client
    ///
    /// Useful for making direct HTTP requests (e.g., to pre-signed download URLs).
    pub fn client(&self) -> &Client {
        &self.client
    }
}
