//! Chain policy: one global queue keyed by file, where `pop(host)`
//! only succeeds for the plan's current first hop; the plan's remaining
//! steps would carry it through further downstream peers. Not exercised by
//! the core's single-hop topology, but kept so the forwarding-tree shape in
//! `PolicyPlan::steps` has a real consumer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use protocol::record::{PolicyFile, PolicyPlan, PolicyStep};

use crate::{Host, HostStats, TransferQueue};

struct State {
    pending: VecDeque<PolicyPlan>,
    completed: rustc_hash::FxHashMap<Host, u64>,
}

impl State {
    fn remaining_for(&self, host: &Host) -> u64 {
        self.pending.iter().filter(|p| &p.steps.host == host).count() as u64
    }

    fn total_remaining(&self) -> u64 {
        self.pending.len() as u64
    }
}

/// A single global FIFO; `pop` only dequeues plans whose first hop matches
/// the calling host.
pub struct ChainQueue {
    state: Mutex<State>,
    not_empty: Condvar,
    all_empty: Condvar,
}

impl ChainQueue {
    /// Creates an empty chain queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                completed: rustc_hash::FxHashMap::default(),
            }),
            not_empty: Condvar::new(),
            all_empty: Condvar::new(),
        }
    }
}

impl Default for ChainQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferQueue for ChainQueue {
    fn push(&self, host: &Host, file: PolicyFile) {
        let mut state = self.state.lock().unwrap();
        state.pending.push_back(PolicyPlan {
            file,
            steps: PolicyStep::direct(host.clone()),
        });
        self.not_empty.notify_all();
    }

    fn pop(&self, host: &Host) -> PolicyPlan {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(idx) = state.pending.iter().position(|p| &p.steps.host == host) {
                let plan = state.pending.remove(idx).expect("index just found");
                *state.completed.entry(host.clone()).or_insert(0) += 1;
                if state.total_remaining() == 0 {
                    self.all_empty.notify_all();
                }
                return plan;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    fn stats(&self, host: &Host) -> HostStats {
        let state = self.state.lock().unwrap();
        HostStats {
            remaining: state.remaining_for(host),
            completed: state.completed.get(host).copied().unwrap_or(0),
        }
    }

    fn wait_until_empty(&self) {
        let mut state = self.state.lock().unwrap();
        while state.total_remaining() != 0 {
            state = self.all_empty.wait(state).unwrap();
        }
    }
}
