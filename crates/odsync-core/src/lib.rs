//! odsync-core - Domain types shared by the OneDrive transport layer
//!
//! This crate holds the pieces of the hexagonal architecture core that the
//! transport adapter ([`odsync_graph`](https://docs.rs/odsync-graph)) needs
//! to compile against: validated newtypes for Graph identifiers and paths,
//! and the [`ports::ICloudProvider`] port it implements.
//!
//! Everything else that a full sync client needs — the diff engine, the
//! items database, conflict resolution, configuration loading, and the
//! desktop notification sink — lives above this boundary and is out of
//! scope for this crate.

pub mod domain;
pub mod ports;
