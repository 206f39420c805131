//! The sync server: one thread per accepted connection,
//! dispatching on the first message of each round.
//!
//! A connection that opens with `SYNC_ESTABLISH_REQ` stays in that mode for
//! its whole lifetime, multiplexing `INFO_REQ`/`DIFF_REQ`/`DIFF_COMMIT`
//! rounds over one socket per primary rather than reconnecting every round.
//! A connection that opens with `XFR_ESTABLISH_REQ` applies that one plan and loops back
//! to read the next message on the same socket, since [`transfer::TransferPipeline`]
//! reuses its [`conn::PersistentConnection`] across many sequential plans.

use std::fs::{self, File};
use std::io::Write as _;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use merkle::Index;
use protocol::message::{InfoPayload, Message, MAX_XFR_BLOCK_BYTES};
use protocol::path::AbsPath;
use protocol::record::{FileKind, FileRecord, PolicyFile, PolicyPlan};
use transport::SecureSession;

use crate::error::SyncError;

/// Directory mode applied on replica-side creation. `PolicyFile` carries no
/// mode field, so source permissions are never preserved across a transfer —
/// every created directory gets this fixed mode instead.
const DEFAULT_DIR_MODE: u32 = 0o755;

/// File mode applied on replica-side creation, for the same reason.
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Counters this server exposes for diagnostics, logged as `tracing` fields
/// rather than a separate status-line singleton.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Files received and landed on disk.
    pub files_received: AtomicU64,
    /// Deletions (`GONE` plans, or `DIFF_COMMIT`-driven removals) applied.
    pub deletions_applied: AtomicU64,
    /// Payload bytes received (`XFR_BLOCK` data only).
    pub bytes_received: AtomicU64,
}

/// Everything a connection handler needs: the shared index, the replicated
/// root, the secure session to speak through, and this instance's own id
/// (reported in `INFO_RESP`).
pub struct ServerContext {
    /// The AEAD session every accepted connection is framed through.
    pub session: Arc<SecureSession>,
    /// The index this server keeps current as transfers land.
    pub index: Arc<Index>,
    /// The filesystem root this index summarizes.
    pub root: AbsPath,
    /// This instance's id, reported in `INFO_RESP`.
    pub instance_id: String,
    /// Diagnostic counters for received transfers.
    pub stats: ServerStats,
}

/// Accepts connections on a bound address, one handler thread per peer.
pub struct SyncServer {
    accept_thread: Option<JoinHandle<()>>,
}

impl SyncServer {
    /// Binds `bind_addr` and starts accepting connections in the background.
    ///
    /// # Errors
    ///
    /// Returns any failure binding the listening socket.
    pub fn spawn(bind_addr: SocketAddr, ctx: Arc<ServerContext>) -> Result<Self, SyncError> {
        let listener = TcpListener::bind(bind_addr)?;
        let accept_thread = std::thread::spawn(move || accept_loop(&listener, &ctx));
        Ok(Self {
            accept_thread: Some(accept_thread),
        })
    }

    /// Blocks until the accept loop exits (it doesn't, under normal
    /// operation; used by tests that want a join point).
    pub fn join(mut self) {
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: &TcpListener, ctx: &Arc<ServerContext>) {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                continue;
            }
        };
        let ctx = Arc::clone(ctx);
        std::thread::spawn(move || {
            if let Err(err) = handle_connection(stream, &ctx) {
                tracing::debug!(peer = %peer, error = %err, "connection ended");
            }
        });
    }
}

fn handle_connection(mut stream: TcpStream, ctx: &ServerContext) -> Result<(), SyncError> {
    loop {
        match ctx.session.recv_message(&mut stream)? {
            Message::SyncEstablishReq => return sync_loop(&mut stream, ctx),
            Message::XfrEstablishReq { plan } => {
                xfr_apply(&mut stream, ctx, &plan)?;
            }
            other => {
                return Err(SyncError::UnexpectedMessage(format!("{:?}", other.message_type())));
            }
        }
    }
}

/// The persistent loop for a `SYNC_ESTABLISH_REQ`'d connection: every
/// subsequent message is one round of `INFO_REQ`, `DIFF_REQ`, or
/// `DIFF_COMMIT`, repeated until the connection drops.
fn sync_loop(stream: &mut TcpStream, ctx: &ServerContext) -> Result<(), SyncError> {
    loop {
        match ctx.session.recv_message(stream)? {
            Message::InfoReq => {
                let payload = local_info(ctx);
                ctx.session.send_message(stream, &Message::InfoResp { payloads: vec![payload] })?;
            }
            Message::DiffReq { epoch, queries } => {
                let mut answers = Vec::new();
                for query in &queries {
                    ctx.index.set_epoch(&query.path, epoch);
                    ctx.index.set_expected_hash(&query.path, query.hash);
                    if ctx.index.hash(&query.path) != query.hash {
                        answers.push(query.path.clone());
                    }
                }
                ctx.session.send_message(stream, &Message::DiffResp { answers })?;
            }
            Message::DiffCommit { epoch } => {
                for path in ctx.index.commit(epoch) {
                    let abs = ctx.root.join_rel(&path);
                    remove_path(abs.as_path());
                    ctx.index.update(FileRecord::gone(abs));
                    ctx.stats.deletions_applied.fetch_add(1, Ordering::Relaxed);
                }
            }
            other => {
                return Err(SyncError::UnexpectedMessage(format!("{:?}", other.message_type())));
            }
        }
    }
}

fn local_info(ctx: &ServerContext) -> InfoPayload {
    InfoPayload {
        instance_id: ctx.instance_id.clone(),
        status: "ok".to_string(),
        files_indexed: ctx.index.size(),
        hash: ctx.index.hash(&protocol::path::RelPath::root()),
    }
}

fn xfr_apply(stream: &mut TcpStream, ctx: &ServerContext, plan: &PolicyPlan) -> Result<(), SyncError> {
    let PolicyFile { path, target, kind } = &plan.file;
    let abs = ctx.root.join_rel(path);

    match kind {
        FileKind::Gone => {
            remove_path(abs.as_path());
            ctx.stats.deletions_applied.fetch_add(1, Ordering::Relaxed);
        }
        FileKind::Directory => create_directory(abs.as_path())?,
        FileKind::Symlink => create_symlink(target, abs.as_path())?,
        FileKind::File => receive_file(stream, ctx, abs.as_path())?,
    }

    let record = scanner::scan_single(&ctx.root, &abs);
    ctx.index.update(record);
    tracing::debug!(
        path = %path,
        files_received = ctx.stats.files_received.load(Ordering::Relaxed),
        deletions_applied = ctx.stats.deletions_applied.load(Ordering::Relaxed),
        bytes_received = ctx.stats.bytes_received.load(Ordering::Relaxed),
        "plan applied"
    );
    Ok(())
}

fn create_directory(path: &std::path::Path) -> Result<(), SyncError> {
    fs::create_dir_all(path)?;
    set_mode(path, DEFAULT_DIR_MODE)?;
    Ok(())
}

fn receive_file(stream: &mut TcpStream, ctx: &ServerContext, dest: &std::path::Path) -> Result<(), SyncError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(dest)?;
    loop {
        match ctx.session.recv_message(stream)? {
            Message::XfrBlock { data } => {
                let len = data.len() as u64;
                file.write_all(&data)?;
                ctx.stats.bytes_received.fetch_add(len, Ordering::Relaxed);
                if len < MAX_XFR_BLOCK_BYTES {
                    break;
                }
            }
            other => {
                return Err(SyncError::UnexpectedMessage(format!("{:?}", other.message_type())));
            }
        }
    }
    drop(file);
    set_mode(dest, DEFAULT_FILE_MODE)?;
    ctx.stats.files_received.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &str, dest: &std::path::Path) -> Result<(), SyncError> {
    let _ = fs::remove_file(dest);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    std::os::unix::fs::symlink(target, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_symlink(_target: &str, _dest: &std::path::Path) -> Result<(), SyncError> {
    Err(SyncError::UnexpectedMessage("symlinks are not supported on this platform".to_string()))
}

#[cfg(unix)]
fn set_mode(path: &std::path::Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &std::path::Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Removes a file, symlink, or directory tree at `path`, tolerating its
/// absence — a `DIFF_COMMIT` deletion or `GONE` plan may race a path that's
/// already gone.
fn remove_path(path: &std::path::Path) {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            if let Err(err) = fs::remove_dir_all(path) {
                tracing::debug!(path = %path.display(), error = %err, "remove_dir_all failed");
            }
        }
        Ok(_) => {
            if let Err(err) = fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %err, "remove_file failed");
            }
        }
        Err(_) => {}
    }
}
