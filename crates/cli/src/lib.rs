//! Argument parsing and exit-code conventions shared by the `syncd-primary`,
//! `syncd-replica`, and `syncctl` binaries.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod ctl;
mod exit;
mod primary;
mod replica;

pub use ctl::{CtlArgs, CtlCommand};
pub use exit::ExitCode;
pub use primary::{parse_replicas, PrimaryArgs, ReplicaSpecError};
pub use replica::ReplicaArgs;
