#![deny(unsafe_code)]

use std::{env, process::ExitCode};

use clap::Parser;
use cli::{CtlArgs, CtlCommand};
use protocol::message::Message;
use protocol::path::RelPath;
use sync::ctl;

fn main() -> ExitCode {
    let args = CtlArgs::parse_from(env::args_os());
    logging::init(logging::Verbosity::from_flags(0, false));

    match run(&args) {
        Ok(()) => ExitCode::from(cli::ExitCode::Success.code() as u8),
        Err(err) => {
            eprintln!("syncctl: {err}");
            ExitCode::from(cli::ExitCode::Failure.code() as u8)
        }
    }
}

fn run(args: &CtlArgs) -> Result<(), sync::SyncError> {
    match &args.command {
        CtlCommand::Info => {
            match ctl::call(&args.instance_id, &args.cookie, &Message::InfoReq)? {
                Message::InfoResp { payloads } => print_info(&payloads),
                other => eprintln!("syncctl: unexpected reply to INFO_REQ: {:?}", other.message_type()),
            }
        }
        CtlCommand::Sync => {
            ctl::cast(&args.instance_id, &args.cookie, &Message::FullsyncCmd)?;
            println!("fullsync triggered");
        }
        CtlCommand::Inspect { path } => {
            let req = Message::InspectReq { path: RelPath::new(path.clone()) };
            match ctl::call(&args.instance_id, &args.cookie, &req)? {
                Message::InspectResp { path, hash, children } => print_inspect(&path, hash, &children),
                other => eprintln!("syncctl: unexpected reply to INSPECT_REQ: {:?}", other.message_type()),
            }
        }
    }
    Ok(())
}

fn print_info(payloads: &[protocol::message::InfoPayload]) {
    for payload in payloads {
        println!(
            "{:<16} {:<6} files_indexed={:<8} hash={:016x}",
            payload.instance_id, payload.status, payload.files_indexed, payload.hash
        );
    }
}

fn print_inspect(path: &RelPath, hash: u64, children: &[protocol::message::InspectChild]) {
    let shown = if path.is_root() { "/" } else { path.as_str() };
    println!("{shown} hash={hash:016x}");
    for child in children {
        println!("  {} hash={:016x}", child.path.as_str(), child.hash);
    }
}
