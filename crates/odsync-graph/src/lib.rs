//! odsync-graph - Authenticated Microsoft Graph transport core
//!
//! Mediates every interaction with Microsoft Graph on behalf of a
//! higher-level sync engine: OAuth2 authentication across three flows,
//! region-aware endpoint resolution, a retry/backoff envelope with a rich
//! error taxonomy, and the typed drive/item/upload/download/subscription
//! operations built on top of it.
//!
//! ## Modules
//!
//! - [`response`] - per-attempt response holder (C1)
//! - [`engine`] - HTTP engine wrapping `reqwest` (C2)
//! - [`endpoints`] - region-aware endpoint resolution (C3)
//! - [`auth`] - interactive/device/Intune-broker authentication (C4)
//! - [`retry`] - retry/backoff envelope and error taxonomy (C5)
//! - [`client`] - drive/item/search/mutation operations (C6)
//! - [`delta`] - delta queries for incremental synchronization (C6)
//! - [`upload`] - simple and session uploads (C6)
//! - [`download`] - chunked, resumable downloads (C6)
//! - [`subscription`] - webhook subscription lifecycle (C6)
//! - [`resume`] - on-disk resume-state sidecar (C7)
//! - [`rate_limit`] - proactive per-endpoint token-bucket throttling
//! - [`provider`] - `ICloudProvider` port implementation

pub mod auth;
pub mod client;
pub mod delta;
pub mod download;
pub mod endpoints;
pub mod engine;
pub mod provider;
pub mod rate_limit;
pub mod resume;
pub mod response;
pub mod retry;
pub mod subscription;
pub mod upload;

pub use retry::ApiError;
