//! Wire message schema, codec, and shared data model.
//!
//! This crate owns everything that must byte-for-byte agree between peers:
//! the big-endian primitive codec ([`wire`]), path handling ([`path`]), the
//! filesystem data model ([`record`]), and the tagged-union message schema
//! ([`message`]). The framed transport, the Merkle index, and every
//! protocol state machine build on top of these types without redefining
//! serialization rules of their own.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod error;
pub mod message;
pub mod path;
pub mod record;
pub mod wire;

pub use error::WireError;
pub use message::{Message, MessageType};
pub use path::{AbsPath, RelPath};
pub use record::{FileKind, FileRecord, PolicyFile, PolicyHost, PolicyPlan, PolicyStep};
