#![deny(unsafe_code)]

use std::{env, process::ExitCode};

use clap::Parser;
use cli::ReplicaArgs;
use protocol::path::AbsPath;
use sync::ReplicaConfig;

fn main() -> ExitCode {
    let args = ReplicaArgs::parse_from(env::args_os());
    logging::init(logging::Verbosity::from_flags(args.verbose, args.silent));

    let root = match std::fs::canonicalize(&args.path) {
        Ok(root) => AbsPath::new(root),
        Err(err) => {
            tracing::error!(error = %err, path = %args.path.display(), "cannot resolve replicated root");
            return ExitCode::from(cli::ExitCode::Usage.code() as u8);
        }
    };

    let config = ReplicaConfig {
        instance_id: args.instance_id,
        cookie: args.cookie,
        root,
        bind_addr: args.bind,
    };

    match sync::run_replica(config) {
        Ok(()) => ExitCode::from(cli::ExitCode::Success.code() as u8),
        Err(err) => {
            tracing::error!(error = %err, "syncd-replica exited");
            ExitCode::from(cli::ExitCode::Failure.code() as u8)
        }
    }
}
