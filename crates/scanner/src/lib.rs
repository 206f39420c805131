//! The filesystem scanner, change watcher, and exclude-pattern filter: the
//! concrete default behind the core's scanner/watcher/filter trait
//! boundary.
//!
//! These traits are deliberately the only seam between the replication core
//! and the host filesystem; everything above this crate talks in
//! [`protocol::record::FileRecord`] and never touches `std::fs` directly.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod filter;
mod walk;
mod watch;

pub use filter::{FilterError, RegexSetFilter};
pub use walk::{scan_single, DirScanner};
pub use watch::{NoopWatcher, NotifyWatcher, WatchError};

use protocol::path::AbsPath;
use protocol::record::FileRecord;

/// Recursively enumerates a root, emitting one [`FileRecord`] per entry.
///
/// Implementations walk depth-first, lexicographic per directory, so that
/// repeated scans of an unchanged tree produce an identical emission order
/// (this also keeps test fixtures deterministic). `.` and `..` are never
/// emitted; entries a `filter` excludes are skipped entirely, including
/// their descendants when the excluded entry is a directory.
pub trait Scanner {
    /// Walks `root`, calling `emit` once per surviving entry (in walk
    /// order) and once more with a [`FileKind::Gone`](protocol::record::FileKind::Gone)
    /// record for any path that disappears between being listed and being
    /// probed (a `stat`/`readdir` race).
    fn scan(&self, root: &AbsPath, filter: &dyn PathFilter, emit: &mut dyn FnMut(FileRecord));
}

/// Watches a root for changes, invoking `on_change` with the changed
/// absolute path. The concrete default uses the host's native file
/// notification API; a [`NoopWatcher`] is always available as a documented
/// fallback for platforms without one, or for tests that drive change
/// detection through the anti-entropy loop alone.
pub trait Watcher {
    /// Blocks, delivering `on_change` calls until the watch fails or the
    /// underlying event source closes.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError`] if the watch could not be established or was
    /// interrupted by an I/O failure.
    fn watch(&self, root: &AbsPath, on_change: &mut dyn FnMut(AbsPath)) -> Result<(), WatchError>;
}

/// Decides whether a root-relative path is excluded from scanning,
/// watching, and transfer.
pub trait PathFilter: Send + Sync {
    /// Whether `relpath` (in its wire `/`-separated form, without a
    /// leading separator) should be skipped.
    fn excluded(&self, relpath: &str) -> bool;
}

/// A [`PathFilter`] that excludes nothing; used where no `--exclude`
/// patterns were given.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFilter;

impl PathFilter for NoFilter {
    fn excluded(&self, _relpath: &str) -> bool {
        false
    }
}
