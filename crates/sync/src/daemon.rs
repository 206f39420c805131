//! Wires the replication primitives into the two daemon roles: a
//! primary drives a [`SyncClient`] per replica, a change watcher, and the
//! anti-entropy loop; a replica just accepts connections through a
//! [`SyncServer`]. Both expose their instance through a [`CommandEndpoint`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use merkle::Index;
use policy::{FanoutQueue, Host, TransferQueue};
use protocol::path::AbsPath;
use scanner::{DirScanner, NoFilter, NotifyWatcher, PathFilter, RegexSetFilter, Scanner, Watcher};
use transfer::TransferPipeline;
use transport::{NonceCounter, SecureSession};

use crate::client::SyncClient;
use crate::control::{self, CommandEndpoint};
use crate::error::SyncError;
use crate::server::{ServerContext, ServerStats, SyncServer};

/// Wiring for the primary role: the side that watches a root and fans
/// changes out to its replicas.
pub struct PrimaryConfig {
    /// This instance's id, used for its rendezvous socket and reported in
    /// `INFO_RESP`.
    pub instance_id: String,
    /// The shared secret both the peer sessions and the control endpoint
    /// derive their AEAD key from.
    pub cookie: String,
    /// The directory tree being replicated.
    pub root: AbsPath,
    /// Replica hosts to fan transfers out to.
    pub replicas: Vec<(Host, SocketAddr)>,
    /// Compiled `--exclude` regex patterns.
    pub excludes: Vec<String>,
}

/// Wiring for the replica role: the side that accepts a primary's
/// connections and applies the plans it sends.
pub struct ReplicaConfig {
    /// This instance's id.
    pub instance_id: String,
    /// The shared secret the peer session and the control endpoint derive
    /// their AEAD key from.
    pub cookie: String,
    /// The directory tree being replicated into.
    pub root: AbsPath,
    /// The address this replica listens for primary connections on.
    pub bind_addr: SocketAddr,
}

fn build_filter(excludes: &[String]) -> Result<Box<dyn PathFilter>, SyncError> {
    if excludes.is_empty() {
        Ok(Box::new(NoFilter))
    } else {
        Ok(Box::new(RegexSetFilter::new(excludes)?))
    }
}

fn initial_scan(index: &Index, root: &AbsPath, filter: &dyn PathFilter) {
    index.rebuild(|index| {
        DirScanner.scan(root, filter, &mut |record| index.update(record));
    });
}

/// Assembles and runs the primary role. Blocks forever driving the change
/// watcher; returns only if wiring up a component fails.
///
/// # Errors
///
/// Returns [`SyncError`] if the exclude patterns fail to compile or any
/// listening socket can't be bound.
pub fn run_primary(config: PrimaryConfig) -> Result<(), SyncError> {
    let filter = build_filter(&config.excludes)?;
    let index = Arc::new(Index::new(config.root.clone()));
    initial_scan(&index, &config.root, filter.as_ref());

    let nonce = Arc::new(Mutex::new(NonceCounter::new_random()));
    let session = Arc::new(SecureSession::new(control::derive_key(&config.cookie), Arc::clone(&nonce)));

    let queue: Arc<dyn TransferQueue> = Arc::new(FanoutQueue::new());
    let peers: HashMap<Host, SocketAddr> = config.replicas.iter().cloned().collect();
    let pipeline = Arc::new(TransferPipeline::spawn(
        config.root.clone(),
        peers.clone(),
        Arc::clone(&queue),
        Arc::clone(&session),
    ));

    let mut clients = HashMap::new();
    for (host, addr) in &peers {
        let client = Arc::new(SyncClient::spawn(
            host.clone(),
            *addr,
            Arc::clone(&index),
            Arc::clone(&queue),
            Arc::clone(&session),
        ));
        clients.insert(host.clone(), client);
    }

    let _anti_entropy = crate::anti_entropy::AntiEntropyLoop::spawn(
        Arc::clone(&index),
        clients.clone(),
        Arc::clone(&pipeline),
        Arc::clone(&queue),
    );

    let _command_endpoint = CommandEndpoint::spawn(
        config.instance_id.clone(),
        &config.cookie,
        Arc::clone(&index),
        clients.clone(),
    )?;

    for client in clients.values() {
        client.cast_fullsync();
    }

    watch_for_changes(&config.root, &index, filter.as_ref(), &clients);
    Ok(())
}

fn watch_for_changes(root: &AbsPath, index: &Index, filter: &dyn PathFilter, clients: &HashMap<Host, Arc<SyncClient>>) {
    let mut on_change = |changed: AbsPath| {
        let Some(relpath) = root.strip_root(changed.as_path()) else {
            return;
        };
        if filter.excluded(relpath.as_str()) {
            return;
        }
        index.update(scanner::scan_single(root, &changed));
        for client in clients.values() {
            client.cast_fullsync();
        }
    };

    if let Err(err) = NotifyWatcher.watch(root, &mut on_change) {
        tracing::warn!(error = %err, "native filesystem watcher failed; anti-entropy sweeps are now the only change detector");
    }
}

/// Assembles and runs the replica role. Blocks forever accepting
/// connections; returns only if wiring up a component fails.
///
/// # Errors
///
/// Returns [`SyncError`] if the listening socket or control endpoint can't
/// be bound.
pub fn run_replica(config: ReplicaConfig) -> Result<(), SyncError> {
    let index = Arc::new(Index::new(config.root.clone()));
    initial_scan(&index, &config.root, &NoFilter);

    let nonce = Arc::new(Mutex::new(NonceCounter::new_random()));
    let session = Arc::new(SecureSession::new(control::derive_key(&config.cookie), nonce));

    let ctx = Arc::new(ServerContext {
        session: Arc::clone(&session),
        index: Arc::clone(&index),
        root: config.root.clone(),
        instance_id: config.instance_id.clone(),
        stats: ServerStats::default(),
    });
    let server = SyncServer::spawn(config.bind_addr, ctx)?;

    let _command_endpoint = CommandEndpoint::spawn(config.instance_id.clone(), &config.cookie, Arc::clone(&index), HashMap::new())?;

    server.join();
    Ok(())
}
