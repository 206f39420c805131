//! `syncd-replica` command line.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Accepts a primary's connections and applies the plans it sends.
#[derive(Debug, Parser)]
#[command(name = "syncd-replica", about = "Accepts a primary's connections and applies the plans it sends")]
pub struct ReplicaArgs {
    /// This instance's id, used for its rendezvous control socket.
    pub instance_id: String,

    /// The shared secret this instance and its primary derive their session
    /// key from.
    pub cookie: String,

    /// The directory tree to replicate into.
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// The address to listen for primary connections on.
    #[arg(long, default_value = "0.0.0.0:7440")]
    pub bind: SocketAddr,

    /// Increase log verbosity; repeatable.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all but warnings and errors.
    #[arg(long)]
    pub silent: bool,
}
