//! Errors shared by the sync client, server, anti-entropy loop, and control
//! endpoint.

use thiserror::Error;

/// A failure in any of the protocol loops this crate drives.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Socket I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A transport-layer failure (framing, compression, or AEAD).
    #[error(transparent)]
    Transport(#[from] transport::TransportError),
    /// A peer sent a message this protocol phase did not expect.
    #[error("unexpected message type: {0}")]
    UnexpectedMessage(String),
    /// An `INFO_RESP` carried no payloads.
    #[error("INFO_RESP carried no payloads")]
    EmptyInfoResponse,
    /// The peer did not answer within the call's deadline, or the
    /// connection was already down.
    #[error("peer unreachable")]
    PeerUnreachable,
    /// The owning thread's mailbox is gone.
    #[error("mailbox closed")]
    MailboxClosed,
    /// An `--exclude` pattern failed to compile.
    #[error(transparent)]
    Filter(#[from] scanner::FilterError),
}
