//! Content hashing used to derive a [`FileRecord`]'s `version` field.
//!
//! Files are hashed with a streaming xxHash-64 over their contents; symlinks
//! are hashed over the bytes of their target string. Directories and gone
//! entries always carry the constant version `0` and never reach this crate.
//!
//! This is deliberately a different hash from the Merkle index's rolled
//! fold (`merkle::fold_u64`): that fold is a low-avalanche wire fingerprint,
//! while this is a real content digest used to detect file changes.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use xxhash_rust::xxh64::Xxh64;

const XXH64_SEED: u64 = 0;
const READ_BUF_SIZE: usize = 64 * 1024;

/// Hashes the contents of `path` with streaming xxHash-64.
///
/// # Errors
///
/// Returns the underlying [`io::Error`] if the file cannot be opened or
/// read. Callers on the scan path treat a `NotFound` error as license to
/// emit a `GONE` record instead of propagating.
pub fn hash_file(path: &Path) -> io::Result<u64> {
    let mut file = File::open(path)?;
    hash_reader(&mut file)
}

/// Hashes an already-open reader with streaming xxHash-64.
///
/// # Errors
///
/// Returns the underlying [`io::Error`] on a read failure.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut hasher = Xxh64::new(XXH64_SEED);
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.digest())
}

/// Hashes a symlink target string, matching the wire-level rule that a
/// symlink's `version` is the hash of its target, not its own bytes.
#[must_use]
pub fn hash_symlink_target(target: &str) -> u64 {
    xxhash_rust::xxh64::xxh64(target.as_bytes(), XXH64_SEED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_is_deterministic_for_same_bytes() {
        let a = hash_reader(&mut &b"hello world"[..]).unwrap();
        let b = hash_reader(&mut &b"hello world"[..]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hash_differs_for_different_bytes() {
        let a = hash_reader(&mut &b"hello"[..]).unwrap();
        let b = hash_reader(&mut &b"world"[..]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn symlink_target_hash_is_stable() {
        assert_eq!(
            hash_symlink_target("/etc/hostname"),
            hash_symlink_target("/etc/hostname")
        );
    }

    #[test]
    fn hash_file_reads_large_content_across_buffer_boundary() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data = vec![0x42u8; READ_BUF_SIZE * 3 + 17];
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();
        let from_file = hash_file(tmp.path()).unwrap();
        let from_reader = hash_reader(&mut &data[..]).unwrap();
        assert_eq!(from_file, from_reader);
    }

    proptest::proptest! {
        #[test]
        fn hash_never_panics_on_arbitrary_bytes(data: Vec<u8>) {
            let _ = hash_reader(&mut &data[..]).unwrap();
        }
    }
}
