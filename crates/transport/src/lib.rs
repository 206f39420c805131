//! The framed secure transport: every outbound message passes
//! through three layers — a typed frame, a Snappy compression wrap, then
//! an AES-256-GCM AEAD wrap with a monotonically incrementing 96-bit IV
//! counter. This crate owns exactly those three layers and nothing above
//! them; `protocol::Message` is what a session reads and writes once they
//! are stripped.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod frame;
mod nonce;
mod session;

pub use frame::{TypedFrame, FRAME_HEADER_LEN, MAX_FRAME_BYTES};
pub use nonce::NonceCounter;
pub use session::{SecureSession, TransportError};

/// AES-256-GCM key length in bytes.
pub const KEY_LEN: usize = 32;
/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;
/// GCM IV (nonce) length in bytes.
pub const IV_LEN: usize = 12;
