//! The sync client/server protocol, anti-entropy loop, control endpoint,
//! and daemon wiring.
//!
//! This crate sits directly on top of the replication primitives (`merkle`,
//! `protocol`, `transport`, `conn`, `mailbox`, `policy`, `transfer`,
//! `scanner`) and has no filesystem or network surface of its own beyond
//! what those crates expose: it drives them into the two daemon roles
//! (`syncd-primary`, `syncd-replica`) plus the `syncctl` control CLI.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod anti_entropy;
mod client;
mod control;
mod daemon;
mod error;
mod server;

pub use anti_entropy::AntiEntropyLoop;
pub use client::SyncClient;
pub use control::CommandEndpoint;
pub use daemon::{run_primary, run_replica, PrimaryConfig, ReplicaConfig};
pub use error::SyncError;
pub use server::SyncServer;

/// Client-side helpers for talking to a running [`CommandEndpoint`] (used by
/// the `syncctl` binary).
pub mod ctl {
    pub use crate::control::{call, cast};
}
