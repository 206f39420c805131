//! Block compression for the transport's compression wrap.
//!
//! ## Wire Format
//!
//! `compress` takes an already-framed byte buffer (a typed frame, header
//! included) and returns a Snappy-compressed block with no additional
//! framing of its own; the caller re-wraps the result in another typed
//! frame tagged `COMPRESSED`. `decompress` is the inverse.

use thiserror::Error;

/// Failure decompressing a peer-supplied block.
///
/// Always a protocol error: the session is closed, the frame is not
/// retried.
#[derive(Debug, Error)]
#[error("snappy decompression failed: {0}")]
pub struct DecompressError(#[from] snap::Error);

/// Compresses `input` with a Snappy block encoder.
#[must_use]
pub fn compress(input: &[u8]) -> Vec<u8> {
    snap::raw::Encoder::new()
        .compress_vec(input)
        .expect("snap encoder buffer sizing is infallible for in-memory input")
}

/// Decompresses a Snappy block produced by [`compress`].
///
/// # Errors
///
/// Returns [`DecompressError`] if `input` is not a valid Snappy block.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>, DecompressError> {
    Ok(snap::raw::Decoder::new().decompress_vec(input)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let compressed = compress(&original);
        let restored = decompress(&compressed).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn round_trips_empty_input() {
        let compressed = compress(&[]);
        let restored = decompress(&compressed).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn decompress_rejects_garbage() {
        assert!(decompress(b"not a snappy frame at all \xff\xfe\x00").is_err());
    }
}
