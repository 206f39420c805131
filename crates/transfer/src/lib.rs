//! The transfer pipeline: a worker pool of `WORKERS_PER_PEER` threads per
//! peer, each popping a [`PolicyPlan`] from the policy queue, borrowing a
//! persistent connection, and streaming the file/directory/symlink/deletion
//! to the peer over a [`SecureSession`].
//!
//! A plain block-copy `XFR_BLOCK` stream rather than a delta algorithm:
//! every block up to `XFR_BLOCK_SIZE` bytes is read and sent in full, with
//! a short (or empty) final block closing the stream.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use conn::PersistentConnection;
use policy::{Host, TransferQueue};
use protocol::message::Message;
use protocol::path::AbsPath;
use protocol::record::{FileKind, PolicyPlan};
use thiserror::Error;
use transport::SecureSession;

/// Worker threads spawned per peer.
pub const WORKERS_PER_PEER: usize = 2;

/// Maximum bytes carried by one `XFR_BLOCK`.
pub const XFR_BLOCK_SIZE: usize = 32 * 1024;

/// Backoff applied before a failed plan is retried.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Counters a running pipeline exposes for diagnostics (status logging,
/// tests): plain atomics a caller can read at any point, or log as
/// `tracing` fields rather than keeping a separate status-line singleton.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Files that vanished locally between being queued and being opened.
    pub files_gone: AtomicU64,
    /// Plans that failed and were re-queued for retry.
    pub retries: AtomicU64,
    /// Files successfully streamed to a peer.
    pub files_sent: AtomicU64,
    /// Deletions (`GONE` plans) successfully sent to a peer.
    pub deletions_sent: AtomicU64,
    /// Payload bytes successfully streamed to a peer (`XFR_BLOCK` data
    /// only, not wire framing overhead).
    pub bytes_sent: AtomicU64,
}

/// Owns one [`PersistentConnection`] per peer and the worker threads
/// draining the policy queue into it.
pub struct TransferPipeline {
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PipelineStats>,
    in_flight: Arc<AtomicU64>,
}

impl TransferPipeline {
    /// Spawns `WORKERS_PER_PEER` worker threads for every entry in `peers`,
    /// each popping plans for that host off `queue` and streaming them
    /// through `session` over a connection dialed from `root`'s contents.
    #[must_use]
    pub fn spawn(
        root: AbsPath,
        peers: HashMap<Host, SocketAddr>,
        queue: Arc<dyn TransferQueue>,
        session: Arc<SecureSession>,
    ) -> Self {
        let stats = Arc::new(PipelineStats::default());
        let in_flight = Arc::new(AtomicU64::new(0));
        let mut workers = Vec::with_capacity(peers.len() * WORKERS_PER_PEER);

        for (host, addr) in peers {
            let connection = Arc::new(PersistentConnection::spawn(move || TcpStream::connect(addr)));
            for _ in 0..WORKERS_PER_PEER {
                let host = host.clone();
                let root = root.clone();
                let queue = Arc::clone(&queue);
                let session = Arc::clone(&session);
                let connection = Arc::clone(&connection);
                let stats = Arc::clone(&stats);
                let in_flight = Arc::clone(&in_flight);
                workers.push(std::thread::spawn(move || {
                    worker_loop(&host, &root, queue.as_ref(), &connection, &session, &stats, &in_flight);
                }));
            }
        }

        Self {
            workers,
            stats,
            in_flight,
        }
    }

    /// The pipeline's diagnostic counters.
    #[must_use]
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// The number of plans currently between "popped from the queue" and
    /// "connection returned" — what the anti-entropy loop waits to reach
    /// zero before declaring quiescence.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Blocks until every worker thread exits (they don't, under normal
    /// operation; used by tests that tear the pipeline down explicitly).
    pub fn join(self) {
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicU64);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn worker_loop(
    host: &Host,
    root: &AbsPath,
    queue: &dyn TransferQueue,
    connection: &PersistentConnection<TcpStream>,
    session: &SecureSession,
    stats: &PipelineStats,
    in_flight: &AtomicU64,
) {
    loop {
        let plan = queue.pop(host);
        let _guard = InFlightGuard::enter(in_flight);

        let mut conn = match connection.borrow() {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(peer = %host.0, error = %err, "failed to borrow connection; retrying plan");
                requeue(queue, host, plan, stats);
                continue;
            }
        };

        match send_plan(root, &plan, session, &mut conn) {
            Ok(Outcome::Sent { bytes }) => {
                if plan.file.kind == FileKind::Gone {
                    stats.deletions_sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.files_sent.fetch_add(1, Ordering::Relaxed);
                }
                stats.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
                tracing::debug!(
                    peer = %host.0,
                    path = %plan.file.path,
                    bytes,
                    files_sent = stats.files_sent.load(Ordering::Relaxed),
                    deletions_sent = stats.deletions_sent.load(Ordering::Relaxed),
                    "plan delivered"
                );
            }
            Ok(Outcome::FileGone) => {
                stats.files_gone.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                tracing::warn!(peer = %host.0, path = %plan.file.path, error = %err, "transfer failed; retrying");
                conn.invalidate();
                drop(conn);
                requeue(queue, host, plan, stats);
            }
        }
    }
}

fn requeue(queue: &dyn TransferQueue, host: &Host, plan: PolicyPlan, stats: &PipelineStats) {
    stats.retries.fetch_add(1, Ordering::Relaxed);
    queue.push(host, plan.file);
    std::thread::sleep(RETRY_BACKOFF);
}

/// Whether a plan's file was actually streamed, or turned out to be gone
/// before anything was sent — an expected, non-retried outcome.
enum Outcome {
    /// The plan was delivered; `bytes` counts `XFR_BLOCK` payload bytes
    /// sent (zero for directory/symlink/deletion plans).
    Sent {
        /// Payload bytes sent.
        bytes: u64,
    },
    FileGone,
}

/// Failure streaming a single plan to its peer.
#[derive(Debug, Error)]
enum SendError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Transport(#[from] transport::TransportError),
}

fn send_plan(
    root: &AbsPath,
    plan: &PolicyPlan,
    session: &SecureSession,
    stream: &mut TcpStream,
) -> Result<Outcome, SendError> {
    let mut file = if plan.file.kind == FileKind::File {
        let abs = root.join_rel(&plan.file.path);
        match File::open(abs.as_path()) {
            Ok(file) => Some(file),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Outcome::FileGone),
            Err(err) => return Err(err.into()),
        }
    } else {
        None
    };

    session.send_message(stream, &Message::XfrEstablishReq { plan: plan.clone() })?;

    let Some(file) = file.as_mut() else {
        return Ok(Outcome::Sent { bytes: 0 });
    };

    let mut buf = vec![0u8; XFR_BLOCK_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = read_full(file, &mut buf)?;
        total += n as u64;
        session.send_message(stream, &Message::XfrBlock { data: buf[..n].to_vec() })?;
        if n < XFR_BLOCK_SIZE {
            // A short block already terminates the stream; no closing
            // empty block is needed.
            return Ok(Outcome::Sent { bytes: total });
        }
    }
}

/// Reads until `buf` is full or EOF, returning the number of bytes read —
/// `Read::read` alone may return short of a full buffer even before EOF.
fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy::FanoutQueue;
    use protocol::record::{FileKind, PolicyFile, PolicyHost, PolicyStep};
    use protocol::RelPath;
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::Mutex;
    use transport::NonceCounter;

    fn test_session() -> Arc<SecureSession> {
        Arc::new(SecureSession::new(
            [9u8; transport::KEY_LEN],
            Arc::new(Mutex::new(NonceCounter::new_random())),
        ))
    }

    #[test]
    fn sends_establish_then_blocks_for_a_small_file() {
        let tmp = tempfile::tempdir().unwrap();
        let root = AbsPath::new(tmp.path().to_path_buf());
        std::fs::write(tmp.path().join("a.txt"), b"hello world").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let session = test_session();

        let server_session = Arc::clone(&session);
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let establish = server_session.recv_message(&mut stream).unwrap();
            assert!(matches!(establish, Message::XfrEstablishReq { .. }));
            let block = server_session.recv_message(&mut stream).unwrap();
            match block {
                Message::XfrBlock { data } => assert_eq!(data, b"hello world"),
                other => panic!("expected XfrBlock, got {other:?}"),
            }
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        let plan = PolicyPlan {
            file: PolicyFile {
                path: RelPath::new("a.txt"),
                target: String::new(),
                kind: FileKind::File,
            },
            steps: PolicyStep::direct(PolicyHost("replica-1".into())),
        };
        let outcome = send_plan(&root, &plan, &session, &mut stream).unwrap();
        assert!(matches!(outcome, Outcome::Sent { bytes: 11 }));
        server.join().unwrap();
    }

    #[test]
    fn missing_file_is_reported_as_gone_without_sending_anything() {
        let tmp = tempfile::tempdir().unwrap();
        let root = AbsPath::new(tmp.path().to_path_buf());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let session = test_session();

        let server_session = Arc::clone(&session);
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
            assert!(server_session.recv_message(&mut stream).is_err());
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        let plan = PolicyPlan {
            file: PolicyFile {
                path: RelPath::new("missing.txt"),
                target: String::new(),
                kind: FileKind::File,
            },
            steps: PolicyStep::direct(PolicyHost("replica-1".into())),
        };
        let outcome = send_plan(&root, &plan, &session, &mut stream).unwrap();
        assert!(matches!(outcome, Outcome::FileGone));
        server.join().unwrap();
    }

    #[test]
    fn exact_multiple_of_block_size_closes_with_a_short_final_read() {
        // read_full's loop naturally produces a final short (possibly
        // empty) read once the file is exhausted, even when the file's
        // length is an exact multiple of XFR_BLOCK_SIZE — confirming the
        // closing protocol never needs a manually appended empty block.
        let tmp = tempfile::tempdir().unwrap();
        let root = AbsPath::new(tmp.path().to_path_buf());
        let mut f = std::fs::File::create(tmp.path().join("exact.bin")).unwrap();
        f.write_all(&vec![7u8; XFR_BLOCK_SIZE]).unwrap();
        drop(f);

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let session = test_session();

        let server_session = Arc::clone(&session);
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _establish = server_session.recv_message(&mut stream).unwrap();
            let mut total = 0usize;
            loop {
                match server_session.recv_message(&mut stream).unwrap() {
                    Message::XfrBlock { data } => {
                        let len = data.len();
                        total += len;
                        if len < XFR_BLOCK_SIZE {
                            break;
                        }
                    }
                    other => panic!("expected XfrBlock, got {other:?}"),
                }
            }
            assert_eq!(total, XFR_BLOCK_SIZE);
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        let plan = PolicyPlan {
            file: PolicyFile {
                path: RelPath::new("exact.bin"),
                target: String::new(),
                kind: FileKind::File,
            },
            steps: PolicyStep::direct(PolicyHost("replica-1".into())),
        };
        send_plan(&root, &plan, &session, &mut stream).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn directory_plan_sends_only_establish() {
        let tmp = tempfile::tempdir().unwrap();
        let root = AbsPath::new(tmp.path().to_path_buf());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let session = test_session();

        let server_session = Arc::clone(&session);
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let msg = server_session.recv_message(&mut stream).unwrap();
            assert!(matches!(msg, Message::XfrEstablishReq { .. }));
            stream.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
            assert!(server_session.recv_message(&mut stream).is_err());
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        let plan = PolicyPlan {
            file: PolicyFile {
                path: RelPath::new("dir"),
                target: String::new(),
                kind: FileKind::Directory,
            },
            steps: PolicyStep::direct(PolicyHost("replica-1".into())),
        };
        send_plan(&root, &plan, &session, &mut stream).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn pipeline_wires_a_worker_per_peer_and_drains_the_queue() {
        let tmp = tempfile::tempdir().unwrap();
        let root = AbsPath::new(tmp.path().to_path_buf());
        std::fs::write(tmp.path().join("a.txt"), b"x").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let session = test_session();

        let server_session = Arc::clone(&session);
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let _ = server_session.recv_message(&mut stream).unwrap();
            let _ = server_session.recv_message(&mut stream).unwrap();
        });

        let queue: Arc<dyn TransferQueue> = Arc::new(FanoutQueue::new());
        let host = PolicyHost("replica-1".into());
        queue.push(
            &host,
            PolicyFile {
                path: RelPath::new("a.txt"),
                target: String::new(),
                kind: FileKind::File,
            },
        );

        let mut peers = HashMap::new();
        peers.insert(host.clone(), addr);
        let pipeline = TransferPipeline::spawn(root, peers, Arc::clone(&queue), session);

        server.join().unwrap();
        // give the worker a moment to return the connection and decrement
        // in_flight before asserting quiescence.
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(pipeline.in_flight(), 0);
        assert_eq!(pipeline.stats().files_sent.load(Ordering::Relaxed), 1);
        assert_eq!(pipeline.stats().bytes_sent.load(Ordering::Relaxed), 1);
    }
}
