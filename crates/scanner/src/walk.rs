//! The default depth-first, lexicographic [`Scanner`](crate::Scanner).

use std::fs::{self, DirEntry, Metadata};
use std::path::Path;

use protocol::path::AbsPath;
use protocol::record::FileRecord;

use crate::{PathFilter, Scanner};

#[cfg(unix)]
fn mode_of(meta: &Metadata) -> u16 {
    use std::os::unix::fs::PermissionsExt;
    (meta.permissions().mode() & 0o7777) as u16
}

#[cfg(not(unix))]
fn mode_of(_meta: &Metadata) -> u16 {
    0o644
}

/// Probes a single path and returns the [`FileRecord`] it currently
/// describes, or a `GONE` record if it no longer exists.
///
/// Used by the replica after applying a transfer, and by the sync server
/// after observing a deletion, where only one entry needs re-probing rather
/// than a full tree walk.
#[must_use]
pub fn scan_single(root: &AbsPath, path: &AbsPath) -> FileRecord {
    probe(path.as_path()).unwrap_or_else(|| FileRecord::gone(path.clone()))
}

fn probe(path: &Path) -> Option<FileRecord> {
    let meta = fs::symlink_metadata(path).ok()?;
    let abs = AbsPath::new(path.to_path_buf());
    if meta.file_type().is_symlink() {
        let target = fs::read_link(path).ok()?;
        let target = target.to_string_lossy().into_owned();
        let version = checksums::hash_symlink_target(&target);
        return Some(FileRecord::symlink(abs, mode_of(&meta), version, target));
    }
    if meta.is_dir() {
        return Some(FileRecord::directory(abs, mode_of(&meta)));
    }
    if meta.is_file() {
        let version = checksums::hash_file(path).ok()?;
        return Some(FileRecord::file(abs, mode_of(&meta), version));
    }
    // Neither file, directory, nor symlink (device, socket, fifo): not part
    // of the replicated data model.
    None
}

fn sorted_children(dir: &Path) -> Vec<DirEntry> {
    let mut entries: Vec<DirEntry> = match fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(Result::ok).collect(),
        Err(_) => return Vec::new(),
    };
    entries.sort_by_key(DirEntry::file_name);
    entries
}

/// The default [`Scanner`]: a depth-first, per-directory lexicographic walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirScanner;

impl Scanner for DirScanner {
    fn scan(&self, root: &AbsPath, filter: &dyn PathFilter, emit: &mut dyn FnMut(FileRecord)) {
        let Some(root_record) = probe(root.as_path()) else {
            tracing::debug!(root = %root, "replicated root vanished before it could be scanned");
            emit(FileRecord::gone(root.clone()));
            return;
        };
        emit(root_record.clone());
        if root_record.kind == protocol::record::FileKind::Directory {
            walk_dir(root, filter, emit);
        }
    }
}

fn walk_dir(dir: &AbsPath, filter: &dyn PathFilter, emit: &mut dyn FnMut(FileRecord)) {
    for entry in sorted_children(dir.as_path()) {
        let child_path = entry.path();
        let child_abs = AbsPath::new(child_path.clone());
        let Some(relpath) = dir_relpath(dir, &child_abs) else {
            continue;
        };
        if filter.excluded(&relpath) {
            tracing::debug!(path = %relpath, "skipped by exclude filter");
            continue;
        }
        match probe(&child_path) {
            None => {
                tracing::debug!(path = %relpath, "lost to a stat race during scan");
                emit(FileRecord::gone(child_abs));
            }
            Some(record) => {
                let is_dir = record.kind == protocol::record::FileKind::Directory;
                emit(record);
                if is_dir {
                    walk_dir(&child_abs, filter, emit);
                }
            }
        }
    }
}

fn dir_relpath(root: &AbsPath, abs: &AbsPath) -> Option<String> {
    root.strip_root(abs.as_path()).map(|r| r.as_str().to_string())
}
