//! Shared fixtures for tests across the workspace: a scratch directory
//! builder and a fixed AES-256-GCM key for constructing loopback
//! [`transport::SecureSession`] pairs without each crate's test module
//! re-deriving the same boilerplate.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::fs;
use std::path::Path;

use protocol::path::AbsPath;
use tempfile::TempDir;

/// A fixed key for tests that need a [`transport::SecureSession`] but don't
/// care about key material. Never use outside `#[cfg(test)]` code.
pub const TEST_KEY: [u8; 32] = [0x5a; 32];

/// A scratch directory that is removed when dropped, with a couple of
/// helpers for laying out fixture trees.
pub struct TempRoot {
    dir: TempDir,
}

impl TempRoot {
    /// Creates a fresh empty scratch directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created; acceptable in test code.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp root"),
        }
    }

    /// The scratch directory as an [`AbsPath`].
    #[must_use]
    pub fn abs_path(&self) -> AbsPath {
        AbsPath::new(self.dir.path().to_path_buf())
    }

    /// The scratch directory as a [`Path`].
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `contents` to `relpath` under the root, creating any parent
    /// directories.
    ///
    /// # Panics
    ///
    /// Panics on any I/O failure; acceptable in test code.
    pub fn write_file(&self, relpath: &str, contents: &[u8]) {
        let full = self.dir.path().join(relpath);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(full, contents).expect("write fixture file");
    }

    /// Creates an empty directory at `relpath` under the root.
    ///
    /// # Panics
    ///
    /// Panics on any I/O failure; acceptable in test code.
    pub fn make_dir(&self, relpath: &str) {
        fs::create_dir_all(self.dir.path().join(relpath)).expect("create fixture dir");
    }
}

impl Default for TempRoot {
    fn default() -> Self {
        Self::new()
    }
}
