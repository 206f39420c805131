use thiserror::Error;

/// A decoded message or frame violated the wire schema.
///
/// Per the framed transport's invariants, every variant here is a protocol
/// error: the caller tears down the session and does not retry the same
/// frame.
#[derive(Debug, Error)]
pub enum WireError {
    /// Fewer bytes remained than the field being decoded required.
    #[error("unexpected end of buffer decoding {field} (need {need} bytes, have {have})")]
    Truncated {
        /// Name of the field being decoded when the buffer ran out.
        field: &'static str,
        /// Bytes required to decode the field.
        need: usize,
        /// Bytes actually remaining.
        have: usize,
    },

    /// A frame or string declared a length beyond the per-connection limit.
    #[error("declared length {declared} exceeds limit {limit}")]
    LengthLimitExceeded {
        /// Length the sender declared.
        declared: u64,
        /// Maximum this context permits.
        limit: u64,
    },

    /// The one-byte message type tag did not match any known variant.
    #[error("unknown message type tag {0}")]
    UnknownMessageType(u8),

    /// A string field was not valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}
