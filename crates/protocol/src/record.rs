//! The shared data model: `FileRecord`, `PolicyFile`, and `PolicyPlan`.

use crate::error::WireError;
use crate::path::{AbsPath, RelPath};
use crate::wire::{Reader, Writer};

/// Upper bound on a transported string field (instance ids, symlink
/// targets, relpaths); generous enough for any real path, small enough to
/// reject a hostile or corrupted length prefix outright.
pub const MAX_STRING_LEN: u32 = 64 * 1024;

/// The kind of filesystem entry a [`FileRecord`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// A symbolic link.
    Symlink,
    /// The entry no longer exists (a deletion marker).
    Gone,
}

impl FileKind {
    fn tag(self) -> u8 {
        match self {
            Self::File => 0,
            Self::Directory => 1,
            Self::Symlink => 2,
            Self::Gone => 3,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, WireError> {
        match tag {
            0 => Ok(Self::File),
            1 => Ok(Self::Directory),
            2 => Ok(Self::Symlink),
            3 => Ok(Self::Gone),
            other => Err(WireError::UnknownMessageType(other)),
        }
    }

    fn encode(self, w: &mut Writer) {
        w.write_u8(self.tag());
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Self::from_tag(r.read_u8()?)
    }
}

/// A value produced by a scan or a single-entry probe.
///
/// # Invariants
///
/// - `kind == Symlink ⇒ !target.is_empty()`
/// - `kind == Directory ⇒ version == 0`
/// - `kind == Gone ⇒ version == 0 && target.is_empty()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// The kind of entry.
    pub kind: FileKind,
    /// POSIX permission triple (owner/group/other x r/w/x).
    pub mode: u16,
    /// 64-bit content version: xxHash-64 of file contents, hash of the
    /// symlink target string, or the constant `0` for directories/gone.
    pub version: u64,
    /// The absolute path this record describes.
    pub path: AbsPath,
    /// Link target string; non-empty only for symlinks.
    pub target: String,
}

impl FileRecord {
    /// Builds a `GONE` record for `path`.
    #[must_use]
    pub fn gone(path: AbsPath) -> Self {
        Self {
            kind: FileKind::Gone,
            mode: 0,
            version: 0,
            path,
            target: String::new(),
        }
    }

    /// Builds a `DIRECTORY` record for `path`.
    #[must_use]
    pub fn directory(path: AbsPath, mode: u16) -> Self {
        Self {
            kind: FileKind::Directory,
            mode,
            version: 0,
            path,
            target: String::new(),
        }
    }

    /// Builds a `FILE` record.
    #[must_use]
    pub fn file(path: AbsPath, mode: u16, version: u64) -> Self {
        Self {
            kind: FileKind::File,
            mode,
            version,
            path,
            target: String::new(),
        }
    }

    /// Builds a `SYMLINK` record; `version` is the hash of `target`.
    #[must_use]
    pub fn symlink(path: AbsPath, mode: u16, version: u64, target: String) -> Self {
        Self {
            kind: FileKind::Symlink,
            mode,
            version,
            path,
            target,
        }
    }
}

/// The unit of work enqueued on the transfer policy queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyFile {
    /// Root-relative path.
    pub path: RelPath,
    /// Link target, for symlinks.
    pub target: String,
    /// The kind of entry to transfer.
    pub kind: FileKind,
}

impl PolicyFile {
    pub(crate) fn encode(&self, w: &mut Writer) {
        w.write_string(self.path.as_str());
        w.write_string(&self.target);
        self.kind.encode(w);
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let path = RelPath::new(r.read_string(MAX_STRING_LEN)?);
        let target = r.read_string(MAX_STRING_LEN)?;
        let kind = FileKind::decode(r)?;
        Ok(Self { path, target, kind })
    }
}

/// A peer identifier in a [`PolicyPlan`]'s forwarding tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyHost(pub String);

/// One node of a `PolicyPlan`'s forwarding tree: a peer plus the peers it
/// should in turn forward to. The core implementation only ever produces
/// depth-1 trees (a single direct peer, no further forwarding children) —
/// chain-style forwarding is not exercised here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStep {
    /// The peer this step targets.
    pub host: PolicyHost,
    /// Downstream forwarding steps, empty for the fanout-only core.
    pub children: Vec<PolicyStep>,
}

impl PolicyStep {
    /// A depth-1 step targeting a single peer with no further forwarding.
    #[must_use]
    pub fn direct(host: PolicyHost) -> Self {
        Self {
            host,
            children: Vec::new(),
        }
    }

    fn encode(&self, w: &mut Writer) {
        w.write_string(&self.host.0);
        w.write_vec(&self.children, |w, child| child.encode(w));
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let host = PolicyHost(r.read_string(MAX_STRING_LEN)?);
        let children = r.read_vec(u64::from(u16::MAX), Self::decode)?;
        Ok(Self { host, children })
    }
}

/// `{ file, steps }`: the payload of an `XFR_ESTABLISH_REQ`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyPlan {
    /// The file/directory/symlink/deletion to transfer.
    pub file: PolicyFile,
    /// The (single-step, in the core) forwarding plan.
    pub steps: PolicyStep,
}

impl PolicyPlan {
    pub(crate) fn encode(&self, w: &mut Writer) {
        self.file.encode(w);
        self.steps.encode(w);
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let file = PolicyFile::decode(r)?;
        let steps = PolicyStep::decode(r)?;
        Ok(Self { file, steps })
    }
}
