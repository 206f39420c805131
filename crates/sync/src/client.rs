//! The per-peer sync client: one thread per replica, multiplexing
//! `FULLSYNC`/`INFO` rounds over a single `SYNC_ESTABLISH_REQ`'d connection.
//!
//! A connect loop re-establishes on any I/O error after a fixed backoff;
//! the rest of the daemon drives the client through a typed mailbox
//! (`cast_fullsync`/`call_info`) rather than a type-erased command payload.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use mailbox::Mailbox;
use merkle::Index;
use policy::{Host, TransferQueue};
use protocol::message::{DiffQuery, InfoPayload, Message, MAX_DIFF_QUERIES};
use protocol::path::RelPath;
use transport::SecureSession;

use crate::error::SyncError;

/// Backoff applied after a failed sync session before reconnecting.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Deadline a `call_info` waits for a reply before giving up.
pub const INFO_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// A path has failed to match for this many consecutive rounds before it's
/// logged as a repeat offender.
const REPEAT_OFFENDER_THRESHOLD: u32 = 2;

enum ClientCommand {
    Fullsync,
    Info,
}

type ClientReply = Result<InfoPayload, SyncError>;

/// Drives one replica's sync session from its own thread, reachable only
/// through [`SyncClient::cast_fullsync`] and [`SyncClient::call_info`].
pub struct SyncClient {
    mailbox: Arc<Mailbox<ClientCommand, ClientReply>>,
}

impl SyncClient {
    /// Spawns the driver thread for `host` at `addr`.
    #[must_use]
    pub fn spawn(host: Host, addr: SocketAddr, index: Arc<Index>, queue: Arc<dyn TransferQueue>, session: Arc<SecureSession>) -> Self {
        let mailbox: Arc<Mailbox<ClientCommand, ClientReply>> = Arc::new(Mailbox::new());
        let driver_mailbox = Arc::clone(&mailbox);
        std::thread::spawn(move || drive(&driver_mailbox, &host, addr, &index, queue.as_ref(), &session));
        Self { mailbox }
    }

    /// Requests a `FULLSYNC` round on this replica's next mailbox turn.
    /// Fire-and-forget; failures surface only in logs.
    pub fn cast_fullsync(&self) {
        let _ = self.mailbox.cast(ClientCommand::Fullsync);
    }

    /// Requests this replica's current status, blocking up to
    /// [`INFO_CALL_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// [`SyncError::PeerUnreachable`] if the mailbox call itself times out;
    /// any [`SyncError`] the session reported attempting the round.
    pub fn call_info(&self) -> Result<InfoPayload, SyncError> {
        match self.mailbox.call(ClientCommand::Info, INFO_CALL_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(SyncError::PeerUnreachable),
        }
    }
}

fn drive(
    mailbox: &Arc<Mailbox<ClientCommand, ClientReply>>,
    host: &Host,
    addr: SocketAddr,
    index: &Index,
    queue: &dyn TransferQueue,
    session: &SecureSession,
) {
    let mut offenders = rustc_hash::FxHashMap::default();
    loop {
        match run_session(mailbox, addr, session, index, queue, host, &mut offenders) {
            Err(SyncError::MailboxClosed) => return,
            Err(err) => {
                tracing::warn!(peer = %host.0, error = %err, "sync session failed; retrying");
                std::thread::sleep(RETRY_BACKOFF);
            }
            Ok(()) => unreachable!("a sync session only returns through an error"),
        }
    }
}

fn run_session(
    mailbox: &Mailbox<ClientCommand, ClientReply>,
    addr: SocketAddr,
    session: &SecureSession,
    index: &Index,
    queue: &dyn TransferQueue,
    host: &Host,
    offenders: &mut rustc_hash::FxHashMap<RelPath, u32>,
) -> Result<(), SyncError> {
    let mut stream = TcpStream::connect(addr)?;
    session.send_message(&mut stream, &Message::SyncEstablishReq)?;

    loop {
        let envelope = mailbox.consume().map_err(|_| SyncError::MailboxClosed)?;
        match envelope.msg {
            ClientCommand::Fullsync => {
                perform_fullsync(&mut stream, session, index, queue, host, offenders)?;
            }
            ClientCommand::Info => {
                let result = perform_info(&mut stream, session);
                if let Some(refid) = envelope.refid {
                    let reply = match &result {
                        Ok(payload) => Ok(payload.clone()),
                        Err(_) => Err(SyncError::PeerUnreachable),
                    };
                    mailbox.reply(refid, reply);
                }
                result?;
            }
        }
    }
}

/// Drives one `FULLSYNC` round: the diff walk is the `Index`'s own
/// level-by-level driver, with the oracle performing the `DIFF_REQ`/
/// `DIFF_RESP` round trips and `emit` pushing mismatches onto the transfer
/// queue. A `DIFF_COMMIT` closes the round once the walk is exhausted.
fn perform_fullsync(
    stream: &mut TcpStream,
    session: &SecureSession,
    index: &Index,
    queue: &dyn TransferQueue,
    host: &Host,
    offenders: &mut rustc_hash::FxHashMap<RelPath, u32>,
) -> Result<(), SyncError> {
    let epoch = index.hash(&RelPath::root());
    // Snapshotting every known hash before the walk starts means the oracle
    // closure below never needs to call back into `index` — `Index::diff`
    // holds its lock for the whole walk, and that lock isn't reentrant.
    let snapshot = snapshot_hashes(index);

    let mut io_error = None;
    let mut this_round = Vec::new();

    index.diff(
        |frontier| {
            if io_error.is_some() {
                return Vec::new();
            }
            match diff_oracle(stream, session, epoch, frontier, &snapshot) {
                Ok(mismatched) => mismatched,
                Err(err) => {
                    io_error = Some(err);
                    Vec::new()
                }
            }
        },
        |file| {
            this_round.push(file.path.clone());
            queue.push(host, file);
        },
    );

    if let Some(err) = io_error {
        return Err(err);
    }

    track_repeat_offenders(offenders, &this_round);

    session.send_message(stream, &Message::DiffCommit { epoch })?;
    Ok(())
}

fn snapshot_hashes(index: &Index) -> rustc_hash::FxHashMap<RelPath, u64> {
    let mut out = rustc_hash::FxHashMap::default();
    let mut stack = vec![RelPath::root()];
    while let Some(path) = stack.pop() {
        out.insert(path.clone(), index.hash(&path));
        stack.extend(index.children(&path));
    }
    out
}

fn diff_oracle(
    stream: &mut TcpStream,
    session: &SecureSession,
    epoch: u64,
    frontier: &[RelPath],
    snapshot: &rustc_hash::FxHashMap<RelPath, u64>,
) -> Result<Vec<RelPath>, SyncError> {
    let mut mismatched = Vec::new();
    for chunk in frontier.chunks(MAX_DIFF_QUERIES as usize) {
        let queries = chunk
            .iter()
            .map(|path| DiffQuery {
                path: path.clone(),
                hash: snapshot.get(path).copied().unwrap_or(0),
            })
            .collect();
        session.send_message(stream, &Message::DiffReq { epoch, queries })?;
        match session.recv_message(stream)? {
            Message::DiffResp { answers } => mismatched.extend(answers),
            other => return Err(SyncError::UnexpectedMessage(format!("{:?}", other.message_type()))),
        }
    }
    Ok(mismatched)
}

/// Updates the repeat-offender tally: a path that mismatched again this
/// round is incremented, one that didn't is dropped. Logged at debug once a
/// path has failed [`REPEAT_OFFENDER_THRESHOLD`] rounds running — useful for
/// spotting a peer stuck re-sending the same broken file.
fn track_repeat_offenders(offenders: &mut rustc_hash::FxHashMap<RelPath, u32>, this_round: &[RelPath]) {
    let current: std::collections::HashSet<&RelPath> = this_round.iter().collect();
    offenders.retain(|path, _| current.contains(path));
    for path in this_round {
        let count = offenders.entry(path.clone()).or_insert(0);
        *count += 1;
        if *count >= REPEAT_OFFENDER_THRESHOLD {
            tracing::debug!(path = %path, rounds = *count, "path has failed diff in consecutive rounds");
        }
    }
}

fn perform_info(stream: &mut TcpStream, session: &SecureSession) -> Result<InfoPayload, SyncError> {
    session.send_message(stream, &Message::InfoReq)?;
    match session.recv_message(stream)? {
        Message::InfoResp { mut payloads } => payloads.pop().ok_or(SyncError::EmptyInfoResponse),
        other => Err(SyncError::UnexpectedMessage(format!("{:?}", other.message_type()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::path::AbsPath;
    use protocol::record::FileRecord;
    use std::collections::HashSet;

    #[test]
    fn repeat_offenders_increment_then_clear_when_absent() {
        let mut offenders = rustc_hash::FxHashMap::default();
        let a = RelPath::new("a");
        let b = RelPath::new("b");

        track_repeat_offenders(&mut offenders, std::slice::from_ref(&a));
        assert_eq!(offenders.get(&a), Some(&1));

        track_repeat_offenders(&mut offenders, &[a.clone(), b.clone()]);
        assert_eq!(offenders.get(&a), Some(&2));
        assert_eq!(offenders.get(&b), Some(&1));

        track_repeat_offenders(&mut offenders, std::slice::from_ref(&b));
        assert_eq!(offenders.get(&a), None, "a dropped out of the round and must clear");
        assert_eq!(offenders.get(&b), Some(&2));
    }

    #[test]
    fn snapshot_hashes_covers_every_indexed_path() {
        let root = AbsPath::new("/r");
        let index = Index::new(root.clone());
        index.update(FileRecord::directory(AbsPath::new("/r/a"), 0o755));
        index.update(FileRecord::file(AbsPath::new("/r/a/f"), 0o644, 1));

        let snapshot = snapshot_hashes(&index);
        let expected: HashSet<RelPath> =
            [RelPath::root(), RelPath::new("a"), RelPath::new("a/f")].into_iter().collect();
        let got: HashSet<RelPath> = snapshot.keys().cloned().collect();
        assert_eq!(got, expected);
        assert_eq!(snapshot[&RelPath::root()], index.hash(&RelPath::root()));
    }
}
