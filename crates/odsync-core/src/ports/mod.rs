//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port boundary between the transport core and
//! the higher-level sync engine that drives it. [`ICloudProvider`] is the
//! only port the transport core itself must satisfy; the sync engine,
//! local filesystem watcher, and notification sink are external
//! collaborators consumed on the other side of this boundary and are not
//! implemented here.

pub mod cloud_provider;

pub use cloud_provider::{AuthFlow, DeltaItem, DeltaResponse, ICloudProvider, Tokens, UserInfo};
