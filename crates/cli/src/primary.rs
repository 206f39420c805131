//! `syncd-primary` command line.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use protocol::record::PolicyHost;
use thiserror::Error;

/// Watches a directory tree and replicates it to one or more replicas.
#[derive(Debug, Parser)]
#[command(name = "syncd-primary", about = "Watches a directory and replicates it to one or more replicas")]
pub struct PrimaryArgs {
    /// This instance's id, used for its rendezvous control socket.
    pub instance_id: String,

    /// The shared secret this instance and its peers derive their session
    /// key from.
    pub cookie: String,

    /// The directory tree to watch and replicate.
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// A replica to fan transfers out to, given as `NAME=HOST:PORT`.
    /// Repeatable.
    #[arg(long = "replica", value_name = "NAME=HOST:PORT")]
    pub replicas: Vec<String>,

    /// An `--exclude` pattern, matched against a path's wire
    /// `/`-separated form. Repeatable.
    #[arg(long = "exclude", value_name = "REGEX")]
    pub excludes: Vec<String>,

    /// Increase log verbosity; repeatable.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all but warnings and errors.
    #[arg(long)]
    pub silent: bool,
}

/// A `--replica` argument that failed to parse as `NAME=HOST:PORT`.
#[derive(Debug, Error)]
#[error("invalid --replica spec {spec:?}: {reason}")]
pub struct ReplicaSpecError {
    spec: String,
    reason: String,
}

/// Parses every `--replica NAME=HOST:PORT` argument into a (host, address)
/// pair suitable for a [`sync::PrimaryConfig`]'s `replicas` field.
///
/// # Errors
///
/// Returns [`ReplicaSpecError`] for any spec missing its `=` separator or
/// carrying an unparseable socket address.
pub fn parse_replicas(specs: &[String]) -> Result<Vec<(PolicyHost, SocketAddr)>, ReplicaSpecError> {
    specs.iter().map(|spec| parse_one(spec)).collect()
}

fn parse_one(spec: &str) -> Result<(PolicyHost, SocketAddr), ReplicaSpecError> {
    let (name, addr) = spec.split_once('=').ok_or_else(|| ReplicaSpecError {
        spec: spec.to_string(),
        reason: "expected NAME=HOST:PORT".to_string(),
    })?;
    let addr: SocketAddr = addr.parse().map_err(|_| ReplicaSpecError {
        spec: spec.to_string(),
        reason: "HOST:PORT did not parse as a socket address".to_string(),
    })?;
    Ok((PolicyHost(name.to_string()), addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_specs() {
        let parsed = parse_replicas(&["west=10.0.0.1:7440".to_string(), "east=10.0.0.2:7440".to_string()]).unwrap();
        assert_eq!(parsed[0].0, PolicyHost("west".to_string()));
        assert_eq!(parsed[1].1.port(), 7440);
    }

    #[test]
    fn rejects_a_spec_with_no_separator() {
        assert!(parse_replicas(&["badspec".to_string()]).is_err());
    }

    #[test]
    fn rejects_an_unparseable_address() {
        assert!(parse_replicas(&["west=not-an-address".to_string()]).is_err());
    }
}
