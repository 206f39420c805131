//! The typed frame: `{ size:i64, type:u8 } || body`, used both for
//! the innermost message frame and for the compression wrap's re-framing.

use crate::session::TransportError;

/// Bytes in a typed frame's header (`size:i64` + `type:u8`).
pub const FRAME_HEADER_LEN: usize = 9;

/// Per-connection limit on a decrypted/decompressed frame.
pub const MAX_FRAME_BYTES: u64 = 512 * 1024;

/// A single decoded typed frame: a one-byte type tag plus its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedFrame {
    /// The frame's one-byte type tag (a [`protocol::MessageType`] tag, or
    /// `COMPRESSED` for the compression wrap's re-framing).
    pub frame_type: u8,
    /// The frame's body bytes.
    pub body: Vec<u8>,
}

impl TypedFrame {
    /// Wraps `body` under `frame_type`.
    #[must_use]
    pub fn new(frame_type: u8, body: Vec<u8>) -> Self {
        Self { frame_type, body }
    }

    /// Serializes `{ size, type } || body`, where `size` includes the
    /// 9-byte header itself.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let total = FRAME_HEADER_LEN + self.body.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as i64).to_be_bytes());
        out.push(self.frame_type);
        out.extend_from_slice(&self.body);
        out
    }

    /// Parses a complete typed frame from `buf` (no trailing bytes
    /// allowed — the caller already knows the frame's exact extent).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Protocol`] if `buf` is shorter than the
    /// header, or the declared `size` doesn't match `buf`'s length.
    pub fn decode(buf: &[u8]) -> Result<Self, TransportError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(TransportError::Protocol("typed frame shorter than its header".into()));
        }
        let declared = i64::from_be_bytes(buf[0..8].try_into().unwrap());
        if declared < 0 || declared as usize != buf.len() {
            return Err(TransportError::Protocol(format!(
                "typed frame declared size {declared} does not match buffer length {}",
                buf.len()
            )));
        }
        Ok(Self {
            frame_type: buf[8],
            body: buf[FRAME_HEADER_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let frame = TypedFrame::new(4, vec![1, 2, 3]);
        let encoded = frame.encode();
        assert_eq!(encoded.len(), FRAME_HEADER_LEN + 3);
        assert_eq!(TypedFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn empty_body_round_trips() {
        let frame = TypedFrame::new(9, Vec::new());
        let encoded = frame.encode();
        assert_eq!(encoded.len(), FRAME_HEADER_LEN);
        assert_eq!(TypedFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn mismatched_declared_size_is_rejected() {
        let mut encoded = TypedFrame::new(4, vec![1, 2, 3]).encode();
        encoded.truncate(encoded.len() - 1);
        assert!(TypedFrame::decode(&encoded).is_err());
    }
}
