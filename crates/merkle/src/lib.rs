//! The in-memory, hash-summarized Merkle index.
//!
//! `Index` maps root-relative paths to [`IndexEntry`] nodes. Every mutation
//! keeps two invariants intact: every non-root entry's parent is indexed
//! and lists it as a child ("index-path consistency"), and every
//! ancestor's rolled `hash` reflects its subtree's current content
//! ("ancestor coherence").
//!
//! # Concurrency
//!
//! `update()` recurses into itself (deleting a directory walks its
//! children) and `diff()` holds the lock across peer round-trips, which
//! would call for a re-entrant mutex. Rather than reach for a
//! reentrant-mutex crate, this keeps one plain [`std::sync::Mutex`]
//! around the entry table and does all recursion through private helpers
//! that already hold the guard — the lock is acquired exactly once per
//! public call, so no re-entrancy is ever needed. Readers (`hash`, `size`,
//! `children`) take the same lock as any other call.

use std::collections::BTreeSet;
use std::sync::Mutex;

use protocol::path::RelPath;
use protocol::record::{FileKind, FileRecord, PolicyFile};
use protocol::wire::{fold_bytes, fold_u64};
use protocol::AbsPath;

/// One node of the in-memory Merkle tree.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// The entry's kind.
    pub kind: FileKind,
    /// POSIX permission triple.
    pub mode: u16,
    /// Content version (xxHash-64 of file bytes or symlink target).
    pub version: u64,
    /// Symlink target; empty for every other kind.
    pub target: String,
    /// Root-relative children, kept in lexicographic order.
    children: BTreeSet<RelPath>,
    /// Rolled 64-bit hash of this node's subtree.
    pub hash: u64,
    /// Diff-round tag set by the diff oracle before replying.
    pub epoch: u64,
    /// The hash the peer asserted for this path in its last `DIFF_REQ`.
    pub expected_hash: u64,
}

impl IndexEntry {
    fn new_directory() -> Self {
        Self {
            kind: FileKind::Directory,
            mode: 0o755,
            version: 0,
            target: String::new(),
            children: BTreeSet::new(),
            hash: 0,
            epoch: 0,
            expected_hash: 0,
        }
    }

    /// This entry's children, in lexicographic order.
    #[must_use]
    pub fn children(&self) -> impl Iterator<Item = &RelPath> {
        self.children.iter()
    }
}

struct Inner {
    root_abs: AbsPath,
    entries: rustc_hash::FxHashMap<RelPath, IndexEntry>,
    rebuild_in_progress: bool,
}

/// The path→entry map plus the absolute root. Always contains the
/// empty-path (root) entry.
pub struct Index(Mutex<Inner>);

impl Index {
    /// Constructs an index rooted at `root_abs`, with just the root
    /// directory entry present.
    #[must_use]
    pub fn new(root_abs: AbsPath) -> Self {
        let mut entries = rustc_hash::FxHashMap::default();
        entries.insert(RelPath::root(), IndexEntry::new_directory());
        Self(Mutex::new(Inner {
            root_abs,
            entries,
            rebuild_in_progress: false,
        }))
    }

    /// The absolute root directory this index summarizes.
    #[must_use]
    pub fn root_abs(&self) -> AbsPath {
        self.0.lock().unwrap().root_abs.clone()
    }

    /// Applies a single [`FileRecord`], deriving its root-relative path by
    /// stripping the index's root. No-op for the root path itself. Dropped
    /// silently if the parent isn't indexed: a scan event can
    /// outrace its parent directory's own creation record.
    pub fn update(&self, record: FileRecord) {
        let mut inner = self.0.lock().unwrap();
        let Some(relpath) = inner.root_abs.strip_root(record.path.as_path()) else {
            return;
        };
        update_locked(&mut inner, relpath, record.kind, record.mode, record.version, record.target);
    }

    /// Runs `f` with `rebuild_in_progress` set, then recomputes every
    /// node's hash in a single post-order pass. Amortizes N individual
    /// ancestor walks into one traversal for bulk loads.
    pub fn rebuild(&self, f: impl FnOnce(&Index)) {
        {
            let mut inner = self.0.lock().unwrap();
            inner.rebuild_in_progress = true;
        }
        f(self);
        let mut inner = self.0.lock().unwrap();
        post_order_rehash(&mut inner, &RelPath::root());
        inner.rebuild_in_progress = false;
    }

    /// The current rolled hash for `path`; `0` if unindexed.
    #[must_use]
    pub fn hash(&self, path: &RelPath) -> u64 {
        self.0.lock().unwrap().entries.get(path).map_or(0, |e| e.hash)
    }

    /// The number of indexed entries (including the root).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.0.lock().unwrap().entries.len() as u64
    }

    /// A snapshot of `path`'s immediate root-relative children, in
    /// lexicographic order; empty if `path` isn't indexed.
    #[must_use]
    pub fn children(&self, path: &RelPath) -> Vec<RelPath> {
        self.0
            .lock()
            .unwrap()
            .entries
            .get(path)
            .map(|e| e.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// A read-only snapshot of the entry at `path`, if indexed.
    #[must_use]
    pub fn entry(&self, path: &RelPath) -> Option<IndexEntry> {
        self.0.lock().unwrap().entries.get(path).cloned()
    }

    /// Sets the diff-epoch tag on `path`'s entry (no-op if unindexed).
    pub fn set_epoch(&self, path: &RelPath, epoch: u64) {
        if let Some(e) = self.0.lock().unwrap().entries.get_mut(path) {
            e.epoch = epoch;
        }
    }

    /// Records the hash the peer asserted for `path` in its last query.
    pub fn set_expected_hash(&self, path: &RelPath, hash: u64) {
        if let Some(e) = self.0.lock().unwrap().entries.get_mut(path) {
            e.expected_hash = hash;
        }
    }

    /// The level-by-level diff driver. `oracle` receives a frontier
    /// of paths and returns the subset whose local/remote hashes differ;
    /// `emit` is called once per mismatched path, deepest matches pruning
    /// their subtree. The mutex is held for the whole call, including
    /// across `oracle`'s (blocking, network-bound) round-trips — by design,
    /// the primary's diff thread is the only index mutator during its own
    /// diff.
    pub fn diff(
        &self,
        mut oracle: impl FnMut(&[RelPath]) -> Vec<RelPath>,
        mut emit: impl FnMut(PolicyFile),
    ) {
        let inner = self.0.lock().unwrap();
        let mut frontier = vec![RelPath::root()];
        while !frontier.is_empty() {
            let mismatched = oracle(&frontier);
            let mut next_frontier = Vec::new();
            for p in &mismatched {
                let Some(entry) = inner.entries.get(p) else {
                    continue;
                };
                emit(PolicyFile {
                    path: p.clone(),
                    target: entry.target.clone(),
                    kind: entry.kind,
                });
                next_frontier.extend(entry.children.iter().cloned());
            }
            frontier = next_frontier;
        }
    }

    /// Returns the paths not visited in diff epoch `e`: candidates for
    /// deletion on a replica after a `FULLSYNC` round. Matched
    /// subtrees are pruned at their root; missing subtrees collapse to
    /// their topmost missing node, returned root-ward-first.
    #[must_use]
    pub fn commit(&self, epoch: u64) -> Vec<RelPath> {
        let inner = self.0.lock().unwrap();
        let mut out = Vec::new();
        commit_visit(&inner, &RelPath::root(), epoch, &mut out);
        out
    }
}

fn update_locked(
    inner: &mut Inner,
    relpath: RelPath,
    kind: FileKind,
    mode: u16,
    version: u64,
    target: String,
) {
    if relpath.is_root() {
        return;
    }
    let parent = relpath.parent().expect("non-root path has a parent");
    if !inner.entries.contains_key(&parent) {
        return;
    }

    if kind == FileKind::Gone {
        remove_subtree(inner, &relpath);
    } else {
        let entry = inner.entries.entry(relpath.clone()).or_insert_with(IndexEntry::new_directory);
        entry.kind = kind;
        entry.mode = mode;
        entry.version = version;
        entry.target = target;
        inner.entries.get_mut(&parent).unwrap().children.insert(relpath.clone());
    }

    if !inner.rebuild_in_progress {
        rehash_after_update(inner, &relpath);
    }
}

/// Recursively destroys `path` and its descendants, unlinking it from its
/// parent's child set. Equivalent to synthesizing and applying a `GONE`
/// [`FileRecord`] for every descendant, done directly on the entry
/// table rather than round-tripping through path-stripping for each child.
fn remove_subtree(inner: &mut Inner, path: &RelPath) {
    let Some(entry) = inner.entries.get(path) else {
        return;
    };
    let children: Vec<RelPath> = entry.children.iter().cloned().collect();
    for child in children {
        remove_subtree(inner, &child);
    }
    inner.entries.remove(path);
    if let Some(parent) = path.parent() {
        if let Some(parent_entry) = inner.entries.get_mut(&parent) {
            parent_entry.children.remove(path);
        }
    }
}

fn rehash_after_update(inner: &mut Inner, path: &RelPath) {
    if inner.entries.contains_key(path) {
        recompute_hash(inner, path);
    }
    for ancestor in path.ancestors_to_root() {
        recompute_hash(inner, &ancestor);
    }
}

/// Recomputes a single node's rolled hash from its cached version and its
/// children's already-current hashes (the rolled-hash fold definition).
fn recompute_hash(inner: &mut Inner, path: &RelPath) {
    let Some(entry) = inner.entries.get(path) else {
        return;
    };
    let version = entry.version;
    let children: Vec<RelPath> = entry.children.iter().cloned().collect();

    let mut seed = fold_bytes(0, path.as_bytes());
    seed = fold_u64(seed, version);
    for child in &children {
        let child_hash = inner.entries.get(child).map_or(0, |e| e.hash);
        seed = fold_bytes(seed, child.as_bytes());
        seed = fold_u64(seed, child_hash);
    }

    inner.entries.get_mut(path).unwrap().hash = seed;
}

fn post_order_rehash(inner: &mut Inner, path: &RelPath) {
    let children: Vec<RelPath> = inner
        .entries
        .get(path)
        .map(|e| e.children.iter().cloned().collect())
        .unwrap_or_default();
    for child in &children {
        post_order_rehash(inner, child);
    }
    recompute_hash(inner, path);
}

fn commit_visit(inner: &Inner, path: &RelPath, epoch: u64, out: &mut Vec<RelPath>) {
    let Some(entry) = inner.entries.get(path) else {
        return;
    };
    if entry.epoch == epoch {
        if entry.expected_hash == entry.hash {
            return;
        }
        let children: Vec<RelPath> = entry.children.iter().cloned().collect();
        for child in children {
            commit_visit(inner, &child, epoch, out);
        }
    } else {
        out.push(path.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::record::FileRecord;

    fn abs(root: &str, rel: &str) -> AbsPath {
        if rel.is_empty() {
            AbsPath::new(root)
        } else {
            AbsPath::new(format!("{root}/{rel}"))
        }
    }

    #[test]
    fn new_index_contains_only_the_root() {
        let idx = Index::new(AbsPath::new("/srv/data"));
        assert_eq!(idx.size(), 1);
        assert_eq!(idx.hash(&RelPath::root()), 0);
    }

    #[test]
    fn update_with_unindexed_parent_is_dropped() {
        let idx = Index::new(AbsPath::new("/srv/data"));
        idx.update(FileRecord::file(abs("/srv/data", "a/b.txt"), 0o644, 7));
        assert_eq!(idx.size(), 1, "orphan update must not create a node");
    }

    #[test]
    fn update_creates_parent_then_child() {
        let idx = Index::new(AbsPath::new("/srv/data"));
        idx.update(FileRecord::directory(abs("/srv/data", "a"), 0o755));
        idx.update(FileRecord::file(abs("/srv/data", "a/b.txt"), 0o644, 7));
        assert_eq!(idx.size(), 3);
        assert_eq!(idx.children(&RelPath::new("a")), vec![RelPath::new("a/b.txt")]);
        assert_eq!(idx.children(&RelPath::root()), vec![RelPath::new("a")]);
    }

    #[test]
    fn ancestor_coherence_after_incremental_update_matches_rebuild() {
        let root = AbsPath::new("/srv/data");
        let incremental = Index::new(root.clone());
        incremental.update(FileRecord::directory(abs("/srv/data", "a"), 0o755));
        incremental.update(FileRecord::file(abs("/srv/data", "a/b.txt"), 0o644, 7));
        incremental.update(FileRecord::file(abs("/srv/data", "a/c.txt"), 0o644, 9));

        let bulk = Index::new(root);
        bulk.rebuild(|idx| {
            idx.update(FileRecord::directory(abs("/srv/data", "a"), 0o755));
            idx.update(FileRecord::file(abs("/srv/data", "a/b.txt"), 0o644, 7));
            idx.update(FileRecord::file(abs("/srv/data", "a/c.txt"), 0o644, 9));
        });

        assert_eq!(incremental.hash(&RelPath::root()), bulk.hash(&RelPath::root()));
        assert_eq!(incremental.hash(&RelPath::new("a")), bulk.hash(&RelPath::new("a")));
    }

    #[test]
    fn gone_recursively_destroys_descendants() {
        let root = AbsPath::new("/srv/data");
        let idx = Index::new(root);
        idx.update(FileRecord::directory(abs("/srv/data", "x"), 0o755));
        idx.update(FileRecord::directory(abs("/srv/data", "x/y"), 0o755));
        idx.update(FileRecord::file(abs("/srv/data", "x/y/z"), 0o644, 1));
        assert_eq!(idx.size(), 4);

        idx.update(FileRecord::gone(abs("/srv/data", "x")));
        assert_eq!(idx.size(), 1, "the whole subtree must be gone");
        assert!(idx.children(&RelPath::root()).is_empty());
    }

    #[test]
    fn hash_is_deterministic_for_identical_content() {
        let a = Index::new(AbsPath::new("/r"));
        let b = Index::new(AbsPath::new("/r"));
        for idx in [&a, &b] {
            idx.update(FileRecord::directory(abs("/r", "d"), 0o755));
            idx.update(FileRecord::file(abs("/r", "d/f"), 0o644, 42));
        }
        assert_eq!(a.hash(&RelPath::root()), b.hash(&RelPath::root()));
    }

    #[test]
    fn diff_prunes_matched_subtrees_and_emits_only_mismatches() {
        let idx = Index::new(AbsPath::new("/r"));
        idx.update(FileRecord::directory(abs("/r", "same"), 0o755));
        idx.update(FileRecord::file(abs("/r", "same/f"), 0o644, 1));
        idx.update(FileRecord::directory(abs("/r", "diff"), 0o755));
        idx.update(FileRecord::file(abs("/r", "diff/f"), 0o644, 2));

        // The oracle reports root and "diff" (and its descendant) as
        // mismatched, but never "same" — its subtree must never be queried.
        let mut queried: Vec<RelPath> = Vec::new();
        let mut emitted = Vec::new();
        idx.diff(
            |frontier| {
                queried.extend(frontier.iter().cloned());
                frontier
                    .iter()
                    .filter(|p| p.is_root() || p.as_str().starts_with("diff"))
                    .cloned()
                    .collect()
            },
            |file| emitted.push(file.path),
        );
        assert_eq!(
            emitted,
            vec![RelPath::root(), RelPath::new("diff"), RelPath::new("diff/f")]
        );
        assert!(!queried.iter().any(|p| p.as_str().starts_with("same/")));
    }

    #[test]
    fn commit_prunes_matched_and_emits_absent_subtree_root() {
        let idx = Index::new(AbsPath::new("/r"));
        idx.update(FileRecord::directory(abs("/r", "keep"), 0o755));
        idx.update(FileRecord::directory(abs("/r", "stale"), 0o755));
        idx.update(FileRecord::file(abs("/r", "stale/f"), 0o644, 1));

        let epoch = 99;
        idx.set_epoch(&RelPath::root(), epoch);
        idx.set_expected_hash(&RelPath::root(), idx.hash(&RelPath::root()));
        idx.set_epoch(&RelPath::new("keep"), epoch);
        idx.set_expected_hash(&RelPath::new("keep"), idx.hash(&RelPath::new("keep")));
        // "stale" and "stale/f" never appear in a DIFF_REQ this round.

        let deleted = idx.commit(epoch);
        assert_eq!(deleted, vec![RelPath::new("stale")]);
    }

    proptest::proptest! {
        #[test]
        fn size_never_exceeds_updates_plus_root(names in proptest::collection::vec("[a-z]{1,4}", 0..20)) {
            let idx = Index::new(AbsPath::new("/r"));
            for name in &names {
                idx.update(FileRecord::file(abs("/r", name), 0o644, 1));
            }
            prop_assert!(idx.size() <= names.len() as u64 + 1);
        }
    }
}
