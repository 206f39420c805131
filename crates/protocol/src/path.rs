//! Root-relative and absolute path handling.
//!
//! A relative path never begins with the separator and uses `/` as its
//! single canonical separator regardless of host OS; the empty relative
//! path denotes the root itself.

use std::fmt;

/// The canonical path separator used on the wire and as index keys.
pub const SEP: char = '/';

/// A path relative to the replicated root, used as an index key and
/// transported on the wire. The empty relative path is the root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelPath(String);

impl RelPath {
    /// The root's own relative path (the empty string).
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Builds a `RelPath` from a raw string, stripping one leading
    /// separator if present so callers don't need to normalize by hand.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        let mut s = raw.into();
        if s.starts_with(SEP) {
            s.remove(0);
        }
        Self(s)
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The path's string form, as transported on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The UTF-8 bytes folded into the Merkle hash.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// The parent of this path, or `None` if this is the root.
    #[must_use]
    pub fn parent(&self) -> Option<RelPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(SEP) {
            Some(idx) => Some(RelPath(self.0[..idx].to_string())),
            None => Some(RelPath::root()),
        }
    }

    /// Joins a single child name onto this path.
    #[must_use]
    pub fn join(&self, child: &str) -> RelPath {
        if self.is_root() {
            RelPath(child.to_string())
        } else {
            RelPath(format!("{}{SEP}{child}", self.0))
        }
    }

    /// The "path-parents enumeration" from the glossary: `self` followed by
    /// each non-root ancestor, deepest first. For `a/b/c`: `[a/b/c, a/b, a]`.
    #[must_use]
    pub fn path_parents(&self) -> Vec<RelPath> {
        let mut out = Vec::new();
        let mut cur = self.clone();
        loop {
            out.push(cur.clone());
            match cur.parent() {
                Some(p) if !p.is_root() => cur = p,
                _ => break,
            }
        }
        out
    }

    /// Strict ancestors of this path, deepest first, ending with the root.
    /// Unlike [`RelPath::path_parents`] this excludes `self` and includes
    /// the root — the walk `update()` performs "up to the root".
    #[must_use]
    pub fn ancestors_to_root(&self) -> Vec<RelPath> {
        let mut out = Vec::new();
        let mut cur = self.clone();
        while let Some(p) = cur.parent() {
            out.push(p.clone());
            cur = p;
        }
        out
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// An absolute, OS-presented path (a root directory, or `root.join(relpath)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsPath(std::path::PathBuf);

impl AbsPath {
    /// Wraps an absolute path buffer.
    #[must_use]
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self(path.into())
    }

    /// Borrows the underlying [`std::path::Path`].
    #[must_use]
    pub fn as_path(&self) -> &std::path::Path {
        &self.0
    }

    /// Joins a relative path onto this absolute root, translating the
    /// canonical `/`-separated relpath into the host's path conventions.
    #[must_use]
    pub fn join_rel(&self, rel: &RelPath) -> AbsPath {
        if rel.is_root() {
            return self.clone();
        }
        let mut buf = self.0.clone();
        for component in rel.as_str().split(SEP) {
            buf.push(component);
        }
        AbsPath(buf)
    }

    /// Derives a root-relative path by stripping `self` as the prefix of
    /// `abs`. Returns `None` if `abs` does not lie under `self`.
    #[must_use]
    pub fn strip_root<'a>(&self, abs: &'a std::path::Path) -> Option<RelPath> {
        let rel = abs.strip_prefix(&self.0).ok()?;
        if rel.as_os_str().is_empty() {
            return Some(RelPath::root());
        }
        let parts: Vec<&str> = rel.iter().map(|c| c.to_str().unwrap_or("")).collect();
        Some(RelPath::new(parts.join(&SEP.to_string())))
    }
}

impl fmt::Display for AbsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_empty_and_has_no_parent() {
        let root = RelPath::root();
        assert!(root.is_root());
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn path_parents_are_deepest_first() {
        let p = RelPath::new("a/b/c");
        let parents: Vec<String> = p.path_parents().iter().map(|p| p.as_str().to_string()).collect();
        assert_eq!(parents, vec!["a/b/c", "a/b", "a"]);
    }

    #[test]
    fn ancestors_to_root_excludes_self_and_includes_root() {
        let p = RelPath::new("a/b/c");
        let ancestors: Vec<String> = p
            .ancestors_to_root()
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        assert_eq!(ancestors, vec!["a/b", "a", ""]);
    }

    #[test]
    fn join_then_strip_round_trips() {
        let root = AbsPath::new("/srv/data");
        let rel = RelPath::new("a/b/c.txt");
        let abs = root.join_rel(&rel);
        assert_eq!(abs.as_path(), std::path::Path::new("/srv/data/a/b/c.txt"));
        assert_eq!(root.strip_root(abs.as_path()).unwrap(), rel);
    }

    #[test]
    fn leading_separator_is_stripped() {
        assert_eq!(RelPath::new("/a/b").as_str(), "a/b");
    }
}
