//! The anti-entropy loop: a periodic sweep that waits for the
//! transfer pipeline to drain, then polls every replica's reported hash
//! against the primary's own and re-triggers a `FULLSYNC` on any mismatch —
//! a backstop against a missed watcher event or a dropped `FULLSYNC_CMD`,
//! independent of whatever drove the last round.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use merkle::Index;
use policy::{Host, TransferQueue};
use protocol::path::RelPath;
use transfer::TransferPipeline;

use crate::client::SyncClient;

/// How often the sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// How long the sweep waits for each replica's `INFO_RESP` before treating
/// it as unreachable this round.
pub const INFO_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives the periodic sweep from its own thread.
pub struct AntiEntropyLoop {
    thread: Option<std::thread::JoinHandle<()>>,
}

impl AntiEntropyLoop {
    /// Spawns the sweep thread.
    #[must_use]
    pub fn spawn(
        index: Arc<Index>,
        clients: HashMap<Host, Arc<SyncClient>>,
        pipeline: Arc<TransferPipeline>,
        queue: Arc<dyn TransferQueue>,
    ) -> Self {
        let thread = std::thread::spawn(move || sweep_loop(&index, &clients, &pipeline, queue.as_ref()));
        Self { thread: Some(thread) }
    }

    /// Blocks until the sweep thread exits (it doesn't, under normal
    /// operation; used by tests that want a join point).
    pub fn join(mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn sweep_loop(index: &Index, clients: &HashMap<Host, Arc<SyncClient>>, pipeline: &TransferPipeline, queue: &dyn TransferQueue) {
    loop {
        std::thread::sleep(SWEEP_INTERVAL);
        run_sweep(index, clients, pipeline, queue);
    }
}

fn run_sweep(index: &Index, clients: &HashMap<Host, Arc<SyncClient>>, pipeline: &TransferPipeline, queue: &dyn TransferQueue) {
    queue.wait_until_empty();
    wait_for_pipeline_quiescence(pipeline);

    let local_hash = index.hash(&RelPath::root());
    for (host, client) in clients {
        match client.call_info() {
            Ok(payload) if payload.hash == local_hash => {}
            Ok(payload) => {
                tracing::info!(peer = %host.0, local = local_hash, remote = payload.hash, "drift detected; re-triggering fullsync");
                client.cast_fullsync();
            }
            Err(err) => {
                tracing::debug!(peer = %host.0, error = %err, "anti-entropy info call failed");
            }
        }
    }
}

fn wait_for_pipeline_quiescence(pipeline: &TransferPipeline) {
    while pipeline.in_flight() != 0 {
        std::thread::sleep(Duration::from_millis(100));
    }
}
