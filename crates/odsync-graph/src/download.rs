//! Chunked download with crash-safe resume
//!
//! `GET /drives/{d}/items/{i}/content?AVOverride=1`. When a resume offset
//! is known, a `Range: bytes={offset}-` header is attached and bytes are
//! appended to the existing `.partial` file. The resume sidecar
//! ([`crate::resume`]) is rewritten on every progress tick and removed on
//! completion, at which point `.partial` is renamed to the target
//! filename.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::{Method, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::engine::HttpEngine;
use crate::resume::{ResumeDescriptor, ResumeWriter};
use crate::retry::ApiError;

/// Describes the item being downloaded, used to build both the API path
/// and the resume descriptor if a sidecar needs to be created.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub drive_id: String,
    pub item_id: String,
    pub online_hash: String,
    pub target_path: PathBuf,
}

impl DownloadRequest {
    fn partial_path(&self) -> PathBuf {
        let mut name = self.target_path.as_os_str().to_os_string();
        name.push(".partial");
        PathBuf::from(name)
    }
}

/// Downloads one item, resuming from an existing sidecar if present.
/// Returns the final path on success. The progress callback's return value
/// is not consulted for cancellation here (callers needing cancellation
/// compose a `CancellationToken` around the stream themselves); it is
/// invoked purely for reporting.
pub async fn download_item(
    engine: &mut HttpEngine,
    access_token: &str,
    base_url: &str,
    request: &DownloadRequest,
    on_progress: Option<crate::engine::ProgressCallback>,
) -> Result<PathBuf, ApiError> {
    let partial_path = request.partial_path();
    let sidecar_path = ResumeDescriptor::sidecar_path(&partial_path);

    let existing = ResumeDescriptor::load(&sidecar_path)?;
    let mut offset = existing.as_ref().map(|d| d.resume_offset).unwrap_or(0);
    if offset > 0 && !partial_path.exists() {
        warn!(path = %partial_path.display(), "resume sidecar found but partial file missing, restarting from 0");
        offset = 0;
    }

    let mut descriptor = existing.unwrap_or_else(|| ResumeDescriptor {
        drive_id: request.drive_id.clone(),
        item_id: request.item_id.clone(),
        online_hash: request.online_hash.clone(),
        original_filename: request
            .target_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        partial_filename: partial_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        resume_offset: 0,
    });

    let url = format!(
        "{base_url}/drives/{}/items/{}/content?AVOverride=1",
        request.drive_id, request.item_id
    );

    let mut builder = engine
        .request(Method::GET, &url)
        .bearer_auth(access_token);
    if offset > 0 {
        debug!(offset, "resuming download with Range header");
        builder = builder.header("Range", format!("bytes={offset}-"));
    }

    let response = builder
        .send()
        .await
        .map_err(|e| ApiError::Api {
            status: 0,
            reason: "transport error".to_string(),
            body: Some(e.to_string()),
        })?;

    if offset > 0 && response.status() != StatusCode::PARTIAL_CONTENT {
        warn!(
            status = response.status().as_u16(),
            "server did not honour Range request, restarting from 0"
        );
        offset = 0;
        descriptor.resume_offset = 0;
    }

    let mut file = if offset > 0 {
        tokio::fs::OpenOptions::new()
            .write(true)
            .append(true)
            .open(&partial_path)
            .await?
    } else {
        tokio::fs::File::create(&partial_path).await?
    };

    let total = response.content_length().unwrap_or(0) + offset;
    let mut writer = ResumeWriter::new();
    let mut downloaded = offset;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ApiError::Api {
            status: 0,
            reason: "stream error".to_string(),
            body: Some(e.to_string()),
        })?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;

        writer.on_progress(&mut descriptor, &sidecar_path, downloaded)?;

        if let Some(ref cb) = on_progress {
            let _ = cb(total, downloaded, 0, 0);
        }
    }

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&partial_path, &request.target_path).await?;
    ResumeDescriptor::remove(&sidecar_path)?;

    info!(path = %request.target_path.display(), bytes = downloaded, "download complete");
    Ok(request.target_path.clone())
}

/// Applies configured file/directory permissions to a just-downloaded
/// file. A no-op on platforms without Unix permission bits.
#[cfg(unix)]
pub fn apply_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    std::fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
pub fn apply_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
