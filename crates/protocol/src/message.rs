//! The tagged-union message schema.
//!
//! Every message carries a one-byte [`MessageType`] tag followed by a body
//! serialized with the primitives in [`crate::wire`]. `UNSET` and
//! `COMPRESSED` are framing-level tags owned by the transport layer (the
//! compression wrap re-frames a typed frame under `COMPRESSED`); every other
//! tag names a [`Message`] variant decoded here.

use crate::error::WireError;
use crate::path::RelPath;
use crate::record::{PolicyFile, PolicyPlan};
use crate::wire::{Reader, Writer};

/// Maximum `(path, hash)` queries carried by a single `DIFF_REQ`.
pub const MAX_DIFF_QUERIES: u64 = 256;

/// Maximum payload bytes carried by a single `XFR_BLOCK`.
pub const MAX_XFR_BLOCK_BYTES: u64 = 32 * 1024;

/// Upper bound on the number of `InfoPayload`s in an `INFO_RESP` — one per
/// configured replica plus the responder itself, generously bounded.
const MAX_INFO_PAYLOADS: u64 = 4096;

/// Upper bound on `DIFF_RESP` answers and `INSPECT_RESP` children per reply.
const MAX_PATHS_PER_REPLY: u64 = 1 << 20;

/// The one-byte `Type` tag. `Unset` and `Compressed` are owned by the
/// transport framing layer; every other value tags a [`Message`] body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// No message; never sent on the wire.
    Unset = 0,
    /// A compressed re-framing of another typed frame.
    Compressed = 1,
    /// `INFO_REQ`.
    InfoReq = 2,
    /// `INFO_RESP`.
    InfoResp = 3,
    /// `DIFF_REQ`.
    DiffReq = 4,
    /// `DIFF_RESP`.
    DiffResp = 5,
    /// `DIFF_COMMIT`.
    DiffCommit = 6,
    /// `XFR_ESTABLISH_REQ`.
    XfrEstablishReq = 7,
    /// `XFR_BLOCK`.
    XfrBlock = 8,
    /// `SYNC_ESTABLISH_REQ`.
    SyncEstablishReq = 9,
    /// `FULLSYNC_CMD`.
    FullsyncCmd = 10,
    /// `FLUSH_CMD`.
    FlushCmd = 11,
    /// `INSPECT_REQ`.
    InspectReq = 12,
    /// `INSPECT_RESP`.
    InspectResp = 13,
    /// `LOG_REQ`.
    LogReq = 14,
    /// `LOG_RESP`.
    LogResp = 15,
}

impl MessageType {
    /// Decodes a raw tag byte, rejecting anything outside `0..=15`.
    pub fn from_tag(tag: u8) -> Result<Self, WireError> {
        Ok(match tag {
            0 => Self::Unset,
            1 => Self::Compressed,
            2 => Self::InfoReq,
            3 => Self::InfoResp,
            4 => Self::DiffReq,
            5 => Self::DiffResp,
            6 => Self::DiffCommit,
            7 => Self::XfrEstablishReq,
            8 => Self::XfrBlock,
            9 => Self::SyncEstablishReq,
            10 => Self::FullsyncCmd,
            11 => Self::FlushCmd,
            12 => Self::InspectReq,
            13 => Self::InspectResp,
            14 => Self::LogReq,
            15 => Self::LogResp,
            other => return Err(WireError::UnknownMessageType(other)),
        })
    }

    /// The raw tag byte.
    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// One replica's (or the responder's own) status, as carried by `INFO_RESP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoPayload {
    /// The instance id the peer was started with.
    pub instance_id: String,
    /// A short human-readable status string (`"ok"`, `"down"`, ...).
    pub status: String,
    /// Number of entries in that peer's index.
    pub files_indexed: u64,
    /// That peer's current root hash.
    pub hash: u64,
}

/// One `(path, local_hash)` query inside a `DIFF_REQ`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffQuery {
    /// The path being compared.
    pub path: RelPath,
    /// The querier's locally-known hash for that path.
    pub hash: u64,
}

/// One child entry inside an `INSPECT_RESP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectChild {
    /// The child's root-relative path.
    pub path: RelPath,
    /// The child's rolled hash.
    pub hash: u64,
}

/// A decoded message body. The framing/compression/AEAD layers that
/// wrap this live in the `transport` crate; this type is what a session
/// reads and writes once those layers are stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `INFO_REQ {}` — request the responder's own status.
    InfoReq,
    /// `INFO_RESP { payloads }` — a list so a primary can aggregate its
    /// replicas' status into one reply.
    InfoResp {
        /// One entry per responder (usually exactly one).
        payloads: Vec<InfoPayload>,
    },
    /// `DIFF_REQ { epoch, queries }` — at most [`MAX_DIFF_QUERIES`] queries.
    DiffReq {
        /// The diff round's epoch tag.
        epoch: u64,
        /// The paths and locally-known hashes being compared.
        queries: Vec<DiffQuery>,
    },
    /// `DIFF_RESP { answers }` — only the paths whose local hash differs.
    DiffResp {
        /// Mismatched paths, in query order.
        answers: Vec<RelPath>,
    },
    /// `DIFF_COMMIT { epoch }`.
    DiffCommit {
        /// The epoch the diff round ran under.
        epoch: u64,
    },
    /// `XFR_ESTABLISH_REQ { plan }`.
    XfrEstablishReq {
        /// The transfer plan naming the file/dir/symlink/deletion.
        plan: PolicyPlan,
    },
    /// `XFR_BLOCK { data }` — at most [`MAX_XFR_BLOCK_BYTES`] bytes; a
    /// short block closes the stream.
    XfrBlock {
        /// The block's payload bytes.
        data: Vec<u8>,
    },
    /// `SYNC_ESTABLISH_REQ {}`.
    SyncEstablishReq,
    /// `FULLSYNC_CMD {}`.
    FullsyncCmd,
    /// `FLUSH_CMD {}`.
    FlushCmd,
    /// `INSPECT_REQ { path }`.
    InspectReq {
        /// The path to inspect.
        path: RelPath,
    },
    /// `INSPECT_RESP { path, hash, children }`.
    InspectResp {
        /// The inspected path.
        path: RelPath,
        /// Its rolled hash.
        hash: u64,
        /// Its immediate children and their hashes.
        children: Vec<InspectChild>,
    },
    /// `LOG_REQ {}` — tail the responder's recent log lines.
    LogReq,
    /// `LOG_RESP { lines }`.
    LogResp {
        /// Recent log lines, oldest first.
        lines: Vec<String>,
    },
}

impl Message {
    /// The tag this message serializes under.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::InfoReq => MessageType::InfoReq,
            Self::InfoResp { .. } => MessageType::InfoResp,
            Self::DiffReq { .. } => MessageType::DiffReq,
            Self::DiffResp { .. } => MessageType::DiffResp,
            Self::DiffCommit { .. } => MessageType::DiffCommit,
            Self::XfrEstablishReq { .. } => MessageType::XfrEstablishReq,
            Self::XfrBlock { .. } => MessageType::XfrBlock,
            Self::SyncEstablishReq => MessageType::SyncEstablishReq,
            Self::FullsyncCmd => MessageType::FullsyncCmd,
            Self::FlushCmd => MessageType::FlushCmd,
            Self::InspectReq { .. } => MessageType::InspectReq,
            Self::InspectResp { .. } => MessageType::InspectResp,
            Self::LogReq => MessageType::LogReq,
            Self::LogResp { .. } => MessageType::LogResp,
        }
    }

    /// Serializes the body only (no tag, no length prefix — the transport
    /// layer's typed frame owns both).
    pub fn encode_body(&self, w: &mut Writer) {
        match self {
            Self::InfoReq | Self::SyncEstablishReq | Self::FullsyncCmd | Self::FlushCmd | Self::LogReq => {}
            Self::InfoResp { payloads } => {
                w.write_vec(payloads, |w, p| {
                    w.write_string(&p.instance_id);
                    w.write_string(&p.status);
                    w.write_u64(p.files_indexed);
                    w.write_u64(p.hash);
                });
            }
            Self::DiffReq { epoch, queries } => {
                w.write_u64(*epoch);
                w.write_vec(queries, |w, q| {
                    w.write_string(q.path.as_str());
                    w.write_u64(q.hash);
                });
            }
            Self::DiffResp { answers } => {
                w.write_vec(answers, |w, p| w.write_string(p.as_str()));
            }
            Self::DiffCommit { epoch } => w.write_u64(*epoch),
            Self::XfrEstablishReq { plan } => plan.encode(w),
            Self::XfrBlock { data } => w.write_bytes(data),
            Self::InspectReq { path } => w.write_string(path.as_str()),
            Self::InspectResp { path, hash, children } => {
                w.write_string(path.as_str());
                w.write_u64(*hash);
                w.write_vec(children, |w, c| {
                    w.write_string(c.path.as_str());
                    w.write_u64(c.hash);
                });
            }
            Self::LogResp { lines } => {
                w.write_vec(lines, |w, l| w.write_string(l));
            }
        }
    }

    /// Decodes a message body given its already-read [`MessageType`] tag.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] if the buffer is truncated, a declared length
    /// exceeds this schema's limits, or a string is not valid UTF-8.
    pub fn decode_body(message_type: MessageType, r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(match message_type {
            MessageType::Unset | MessageType::Compressed => {
                return Err(WireError::UnknownMessageType(message_type.tag()));
            }
            MessageType::InfoReq => Self::InfoReq,
            MessageType::InfoResp => {
                let payloads = r.read_vec(MAX_INFO_PAYLOADS, |r| {
                    Ok(InfoPayload {
                        instance_id: r.read_string(crate::record::MAX_STRING_LEN)?,
                        status: r.read_string(crate::record::MAX_STRING_LEN)?,
                        files_indexed: r.read_u64()?,
                        hash: r.read_u64()?,
                    })
                })?;
                Self::InfoResp { payloads }
            }
            MessageType::DiffReq => {
                let epoch = r.read_u64()?;
                let queries = r.read_vec(MAX_DIFF_QUERIES, |r| {
                    Ok(DiffQuery {
                        path: RelPath::new(r.read_string(crate::record::MAX_STRING_LEN)?),
                        hash: r.read_u64()?,
                    })
                })?;
                Self::DiffReq { epoch, queries }
            }
            MessageType::DiffResp => {
                let answers = r.read_vec(MAX_PATHS_PER_REPLY, |r| {
                    Ok(RelPath::new(r.read_string(crate::record::MAX_STRING_LEN)?))
                })?;
                Self::DiffResp { answers }
            }
            MessageType::DiffCommit => Self::DiffCommit { epoch: r.read_u64()? },
            MessageType::XfrEstablishReq => Self::XfrEstablishReq {
                plan: PolicyPlan::decode(r)?,
            },
            MessageType::XfrBlock => {
                let data = r.read_bytes(MAX_XFR_BLOCK_BYTES)?;
                Self::XfrBlock { data }
            }
            MessageType::SyncEstablishReq => Self::SyncEstablishReq,
            MessageType::FullsyncCmd => Self::FullsyncCmd,
            MessageType::FlushCmd => Self::FlushCmd,
            MessageType::InspectReq => Self::InspectReq {
                path: RelPath::new(r.read_string(crate::record::MAX_STRING_LEN)?),
            },
            MessageType::InspectResp => {
                let path = RelPath::new(r.read_string(crate::record::MAX_STRING_LEN)?);
                let hash = r.read_u64()?;
                let children = r.read_vec(MAX_PATHS_PER_REPLY, |r| {
                    Ok(InspectChild {
                        path: RelPath::new(r.read_string(crate::record::MAX_STRING_LEN)?),
                        hash: r.read_u64()?,
                    })
                })?;
                Self::InspectResp { path, hash, children }
            }
            MessageType::LogReq => Self::LogReq,
            MessageType::LogResp => {
                let lines = r.read_vec(MAX_PATHS_PER_REPLY, |r| {
                    r.read_string(crate::record::MAX_STRING_LEN)
                })?;
                Self::LogResp { lines }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PolicyHost;

    fn round_trip(msg: Message) {
        let mut w = Writer::new();
        msg.encode_body(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = Message::decode_body(msg.message_type(), &mut r).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn every_variant_round_trips() {
        round_trip(Message::InfoReq);
        round_trip(Message::InfoResp {
            payloads: vec![InfoPayload {
                instance_id: "replica-1".into(),
                status: "ok".into(),
                files_indexed: 42,
                hash: 9,
            }],
        });
        round_trip(Message::DiffReq {
            epoch: 7,
            queries: vec![DiffQuery {
                path: RelPath::new("a/b"),
                hash: 123,
            }],
        });
        round_trip(Message::DiffResp {
            answers: vec![RelPath::new("a/b"), RelPath::root()],
        });
        round_trip(Message::DiffCommit { epoch: 7 });
        round_trip(Message::XfrEstablishReq {
            plan: PolicyPlan {
                file: PolicyFile {
                    path: RelPath::new("a/b.txt"),
                    target: String::new(),
                    kind: crate::record::FileKind::File,
                },
                steps: crate::record::PolicyStep::direct(PolicyHost("replica-1".into())),
            },
        });
        round_trip(Message::XfrBlock { data: vec![1, 2, 3] });
        round_trip(Message::SyncEstablishReq);
        round_trip(Message::FullsyncCmd);
        round_trip(Message::FlushCmd);
        round_trip(Message::InspectReq { path: RelPath::new("a") });
        round_trip(Message::InspectResp {
            path: RelPath::root(),
            hash: 55,
            children: vec![InspectChild {
                path: RelPath::new("a"),
                hash: 1,
            }],
        });
        round_trip(Message::LogReq);
        round_trip(Message::LogResp {
            lines: vec!["started".into()],
        });
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(MessageType::from_tag(200).is_err());
    }

    #[test]
    fn diff_req_over_query_limit_is_rejected() {
        let mut w = Writer::new();
        w.write_u64(0);
        w.write_u64(MAX_DIFF_QUERIES + 1);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            Message::decode_body(MessageType::DiffReq, &mut r),
            Err(WireError::LengthLimitExceeded { .. })
        ));
    }
}
