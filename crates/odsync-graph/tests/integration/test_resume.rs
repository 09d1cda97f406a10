//! Integration tests for session-based upload resume and download resume.

use odsync_core::domain::newtypes::RemotePath;
use odsync_graph::download::{download_item, DownloadRequest};
use odsync_graph::engine::{EngineConfig, HttpEngine};
use odsync_graph::resume::ResumeDescriptor;
use odsync_graph::upload::{self, StaticTokenProvider};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_upload_large_file_completes_in_a_single_fragment() {
    let (server, client) = common::setup_graph_mock().await;

    Mock::given(method("POST"))
        .and(path("/me/drive/root:/Reports/big.bin:/createUploadSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "uploadUrl": format!("{}/upload-session/abc123", server.uri()),
            "expirationDateTime": "2026-08-01T00:00:00Z"
        })))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload-session/abc123"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "item-large-001",
            "name": "big.bin",
            "size": 1024,
            "lastModifiedDateTime": "2026-01-15T10:00:00Z"
        })))
        .mount(&server)
        .await;

    let parent = RemotePath::new("/Reports".to_string()).unwrap();
    let data = vec![7u8; 1024];
    let token_provider = StaticTokenProvider::new(&client);

    let result = upload::upload_large(&client, &parent, "big.bin", &data, &token_provider, None, None)
        .await
        .expect("large upload failed");

    assert_eq!(result.id, "item-large-001");
    assert_eq!(result.name, "big.bin");
}

#[tokio::test]
async fn test_resume_upload_offset_reports_session_already_complete() {
    let server = MockServer::start().await;

    // The session already exists; querying it reports no remaining ranges,
    // meaning every fragment was already received before the crash.
    Mock::given(method("GET"))
        .and(path("/upload-session/resume-me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "nextExpectedRanges": []
        })))
        .mount(&server)
        .await;

    let http_client = reqwest::Client::new();
    let resume_url = format!("{}/upload-session/resume-me", server.uri());

    let offset = upload::resume_upload_offset(&http_client, &resume_url)
        .await
        .unwrap();
    assert_eq!(offset, None);
}

#[tokio::test]
async fn test_download_resumes_after_partial_write() {
    let server = MockServer::start().await;
    let full_content = b"0123456789ABCDEF".to_vec();

    Mock::given(method("GET"))
        .and(path("/drives/drive-1/items/resume-item/content"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(full_content[8..].to_vec())
                .append_header("Content-Range", "bytes 8-15/16"),
        )
        .mount(&server)
        .await;

    let mut engine = HttpEngine::new(EngineConfig::default());
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("resume-item.bin");
    let partial = dir.path().join("resume-item.bin.partial");

    // Simulate a crash mid-download: the first 8 bytes already landed on
    // disk and a resume sidecar records the offset.
    tokio::fs::write(&partial, &full_content[..8]).await.unwrap();
    let mut descriptor = ResumeDescriptor {
        drive_id: "drive-1".to_string(),
        item_id: "resume-item".to_string(),
        online_hash: "hash".to_string(),
        original_filename: target.to_string_lossy().to_string(),
        partial_filename: partial.to_string_lossy().to_string(),
        resume_offset: 8,
    };
    let sidecar = ResumeDescriptor::sidecar_path(&partial);
    descriptor.persist(&sidecar).unwrap();

    let request = DownloadRequest {
        drive_id: "drive-1".to_string(),
        item_id: "resume-item".to_string(),
        online_hash: "hash".to_string(),
        target_path: target.clone(),
    };

    let result = download_item(&mut engine, "test-token", &server.uri(), &request, None)
        .await
        .expect("resumed download failed");

    let bytes = tokio::fs::read(&result).await.unwrap();
    assert_eq!(bytes, full_content);
    assert!(!sidecar.exists(), "sidecar should be removed on completion");
}
