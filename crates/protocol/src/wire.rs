//! Big-endian primitive encode/decode, shared by every message body and by
//! the Merkle index's rolled hash (which folds the same byte encoding of
//! relative paths): fixed-width integers, length-prefixed strings and
//! byte vectors, `u64`-counted containers.

use crate::error::WireError;

/// An append-only byte buffer with big-endian primitive writers.
#[derive(Debug, Default)]
pub struct Writer(Vec<u8>);

impl Writer {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Consumes the writer, returning the accumulated bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Current length of the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.0.push(v);
    }

    /// Writes a `bool` as one byte.
    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    /// Writes a big-endian `u16`.
    pub fn write_u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    /// Writes a big-endian `u32`.
    pub fn write_u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    /// Writes a big-endian `u64`.
    pub fn write_u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    /// Writes a big-endian `i64`.
    pub fn write_i64(&mut self, v: i64) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    /// Writes a `u32`-length-prefixed UTF-8 string.
    pub fn write_string(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.0.extend_from_slice(s.as_bytes());
    }

    /// Writes a `u64`-length-prefixed byte vector.
    pub fn write_bytes(&mut self, b: &[u8]) {
        self.write_u64(b.len() as u64);
        self.0.extend_from_slice(b);
    }

    /// Writes a `u64`-counted container using `f` to serialize each element.
    pub fn write_vec<T>(&mut self, items: &[T], mut f: impl FnMut(&mut Self, &T)) {
        self.write_u64(items.len() as u64);
        for item in items {
            f(self, item);
        }
    }

    /// Appends raw bytes with no length prefix (for pre-framed payloads).
    pub fn write_raw(&mut self, b: &[u8]) {
        self.0.extend_from_slice(b);
    }
}

/// A cursor over a borrowed byte slice with big-endian primitive readers.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Wraps `buf` for sequential decoding from the start.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes remaining to be read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                field,
                need: n,
                have: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1, "u8")?[0])
    }

    /// Reads a one-byte `bool`.
    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2, "u16")?;
        Ok(u16::from_be_bytes(b.try_into().unwrap()))
    }

    /// Reads a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4, "u32")?;
        Ok(u32::from_be_bytes(b.try_into().unwrap()))
    }

    /// Reads a big-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8, "u64")?;
        Ok(u64::from_be_bytes(b.try_into().unwrap()))
    }

    /// Reads a big-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, WireError> {
        let b = self.take(8, "i64")?;
        Ok(i64::from_be_bytes(b.try_into().unwrap()))
    }

    /// Reads a `u32`-length-prefixed UTF-8 string, bounded by `limit` bytes.
    pub fn read_string(&mut self, limit: u32) -> Result<String, WireError> {
        let len = self.read_u32()?;
        if len > limit {
            return Err(WireError::LengthLimitExceeded {
                declared: u64::from(len),
                limit: u64::from(limit),
            });
        }
        let b = self.take(len as usize, "string")?;
        String::from_utf8(b.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    /// Reads a `u64`-length-prefixed byte vector, bounded by `limit` bytes.
    pub fn read_bytes(&mut self, limit: u64) -> Result<Vec<u8>, WireError> {
        let len = self.read_u64()?;
        if len > limit {
            return Err(WireError::LengthLimitExceeded {
                declared: len,
                limit,
            });
        }
        Ok(self.take(len as usize, "bytes")?.to_vec())
    }

    /// Reads a `u64`-counted container, bounded by `limit` elements,
    /// decoding each element with `f`.
    pub fn read_vec<T>(
        &mut self,
        limit: u64,
        mut f: impl FnMut(&mut Self) -> Result<T, WireError>,
    ) -> Result<Vec<T>, WireError> {
        let count = self.read_u64()?;
        if count > limit {
            return Err(WireError::LengthLimitExceeded {
                declared: count,
                limit,
            });
        }
        let mut out = Vec::with_capacity(count.min(limit) as usize);
        for _ in 0..count {
            out.push(f(self)?);
        }
        Ok(out)
    }

    /// The remaining unread bytes, consuming the rest of the buffer.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

/// Folds a 64-bit rolled seed the way the Merkle index's hash fold does:
/// `seed := seed*101 + x`. Exposed here because path-byte folding is shared
/// between the wire codec's canonical path bytes and `merkle`'s hash.
#[must_use]
pub fn fold_u64(seed: u64, x: u64) -> u64 {
    seed.wrapping_mul(101).wrapping_add(x)
}

/// Folds each byte of `bytes` into `seed` using [`fold_u64`], in order.
#[must_use]
pub fn fold_bytes(mut seed: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        seed = fold_u64(seed, u64::from(b));
    }
    seed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_all_primitives() {
        let mut w = Writer::new();
        w.write_u8(7);
        w.write_bool(true);
        w.write_u16(1000);
        w.write_u32(70_000);
        w.write_u64(5_000_000_000);
        w.write_i64(-42);
        w.write_string("hello");
        w.write_bytes(b"world");

        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_u16().unwrap(), 1000);
        assert_eq!(r.read_u32().unwrap(), 70_000);
        assert_eq!(r.read_u64().unwrap(), 5_000_000_000);
        assert_eq!(r.read_i64().unwrap(), -42);
        assert_eq!(r.read_string(1024).unwrap(), "hello");
        assert_eq!(r.read_bytes(1024).unwrap(), b"world");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let mut r = Reader::new(&[0x00, 0x01]);
        assert!(matches!(
            r.read_u64(),
            Err(WireError::Truncated { field: "u64", .. })
        ));
    }

    #[test]
    fn string_length_limit_is_enforced() {
        let mut w = Writer::new();
        w.write_string("this string is too long for the limit");
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            r.read_string(4),
            Err(WireError::LengthLimitExceeded { .. })
        ));
    }

    #[test]
    fn fold_is_order_sensitive() {
        let a = fold_bytes(fold_u64(0, 1), b"ab");
        let b = fold_bytes(fold_u64(0, 1), b"ba");
        assert_ne!(a, b);
    }

    proptest::proptest! {
        #[test]
        fn u64_round_trips(v: u64) {
            let mut w = Writer::new();
            w.write_u64(v);
            let bytes = w.into_bytes();
            let mut r = Reader::new(&bytes);
            prop_assert_eq!(r.read_u64().unwrap(), v);
        }

        #[test]
        fn string_round_trips(s: String) {
            let mut w = Writer::new();
            w.write_string(&s);
            let bytes = w.into_bytes();
            let mut r = Reader::new(&bytes);
            prop_assert_eq!(r.read_string(u32::MAX).unwrap(), s);
        }
    }
}
