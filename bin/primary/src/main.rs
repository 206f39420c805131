#![deny(unsafe_code)]

use std::{env, process::ExitCode};

use clap::Parser;
use cli::{parse_replicas, PrimaryArgs};
use protocol::path::AbsPath;
use sync::PrimaryConfig;

fn main() -> ExitCode {
    let args = PrimaryArgs::parse_from(env::args_os());
    logging::init(logging::Verbosity::from_flags(args.verbose, args.silent));

    let replicas = match parse_replicas(&args.replicas) {
        Ok(replicas) => replicas,
        Err(err) => {
            tracing::error!(error = %err, "invalid command line");
            return ExitCode::from(cli::ExitCode::Usage.code() as u8);
        }
    };

    let root = match std::fs::canonicalize(&args.path) {
        Ok(root) => AbsPath::new(root),
        Err(err) => {
            tracing::error!(error = %err, path = %args.path.display(), "cannot resolve replicated root");
            return ExitCode::from(cli::ExitCode::Usage.code() as u8);
        }
    };

    let config = PrimaryConfig {
        instance_id: args.instance_id,
        cookie: args.cookie,
        root,
        replicas,
        excludes: args.excludes,
    };

    match sync::run_primary(config) {
        Ok(()) => ExitCode::from(cli::ExitCode::Success.code() as u8),
        Err(err) => {
            tracing::error!(error = %err, "syncd-primary exited");
            ExitCode::from(cli::ExitCode::Failure.code() as u8)
        }
    }
}
