//! `syncctl` command line.

use clap::{Parser, Subcommand};

/// Queries or commands a running sync instance over its control socket.
#[derive(Debug, Parser)]
#[command(name = "syncctl", about = "Queries or commands a running sync instance over its control socket")]
pub struct CtlArgs {
    /// The target instance's id (selects its rendezvous socket).
    pub instance_id: String,

    /// The shared secret the target instance's control endpoint expects.
    pub cookie: String,

    /// The command to send.
    #[command(subcommand)]
    pub command: CtlCommand,
}

/// A `syncctl` subcommand.
#[derive(Debug, Subcommand)]
pub enum CtlCommand {
    /// Reports the instance's (and, on a primary, its replicas') status.
    Info,
    /// Triggers an immediate `FULLSYNC` round on every replica.
    Sync,
    /// Reports a path's hash and immediate children.
    Inspect {
        /// The root-relative path to inspect (empty for the root itself).
        #[arg(default_value = "")]
        path: String,
    },
}
