//! Fanout policy: one independent per-host FIFO. A file queued to N
//! peers is enqueued N times — the caller pushes once per replica.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use protocol::record::{PolicyFile, PolicyPlan, PolicyStep};

use crate::{Host, HostStats, TransferQueue};

struct HostQueue {
    pending: VecDeque<PolicyFile>,
    completed: u64,
}

impl HostQueue {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            completed: 0,
        }
    }
}

struct State {
    hosts: rustc_hash::FxHashMap<Host, HostQueue>,
}

impl State {
    fn total_remaining(&self) -> u64 {
        self.hosts.values().map(|q| q.pending.len() as u64).sum()
    }
}

/// One independent FIFO per peer host.
pub struct FanoutQueue {
    state: Mutex<State>,
    not_empty: Condvar,
    all_empty: Condvar,
}

impl FanoutQueue {
    /// Creates an empty fanout queue with no hosts registered yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                hosts: rustc_hash::FxHashMap::default(),
            }),
            not_empty: Condvar::new(),
            all_empty: Condvar::new(),
        }
    }
}

impl Default for FanoutQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferQueue for FanoutQueue {
    fn push(&self, host: &Host, file: PolicyFile) {
        let mut state = self.state.lock().unwrap();
        state
            .hosts
            .entry(host.clone())
            .or_insert_with(HostQueue::new)
            .pending
            .push_back(file);
        self.not_empty.notify_all();
    }

    fn pop(&self, host: &Host) -> PolicyPlan {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(queue) = state.hosts.get_mut(host) {
                if let Some(file) = queue.pending.pop_front() {
                    queue.completed += 1;
                    if state.total_remaining() == 0 {
                        self.all_empty.notify_all();
                    }
                    return PolicyPlan {
                        file,
                        steps: PolicyStep::direct(host.clone()),
                    };
                }
            }
            state.hosts.entry(host.clone()).or_insert_with(HostQueue::new);
            state = self.not_empty.wait(state).unwrap();
        }
    }

    fn stats(&self, host: &Host) -> HostStats {
        let state = self.state.lock().unwrap();
        state.hosts.get(host).map_or(HostStats::default(), |q| HostStats {
            remaining: q.pending.len() as u64,
            completed: q.completed,
        })
    }

    fn wait_until_empty(&self) {
        let mut state = self.state.lock().unwrap();
        while state.total_remaining() != 0 {
            state = self.all_empty.wait(state).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::record::FileKind;
    use protocol::RelPath;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn file(name: &str) -> PolicyFile {
        PolicyFile {
            path: RelPath::new(name),
            target: String::new(),
            kind: FileKind::File,
        }
    }

    #[test]
    fn push_then_pop_is_fifo_per_host() {
        let q = FanoutQueue::new();
        let host = Host("replica-1".into());
        q.push(&host, file("a"));
        q.push(&host, file("b"));
        assert_eq!(q.pop(&host).file.path, RelPath::new("a"));
        assert_eq!(q.pop(&host).file.path, RelPath::new("b"));
    }

    #[test]
    fn fanout_enqueues_independently_per_host() {
        let q = FanoutQueue::new();
        let h1 = Host("replica-1".into());
        let h2 = Host("replica-2".into());
        q.push(&h1, file("a"));
        q.push(&h2, file("a"));
        assert_eq!(q.stats(&h1).remaining, 1);
        assert_eq!(q.stats(&h2).remaining, 1);
        q.pop(&h1);
        assert_eq!(q.stats(&h1).remaining, 0);
        assert_eq!(q.stats(&h2).remaining, 1, "popping h1 must not drain h2");
    }

    #[test]
    fn pop_blocks_until_pushed() {
        let q = Arc::new(FanoutQueue::new());
        let host = Host("replica-1".into());
        let popper = {
            let q = Arc::clone(&q);
            let host = host.clone();
            thread::spawn(move || q.pop(&host))
        };
        thread::sleep(Duration::from_millis(20));
        q.push(&host, file("late"));
        let plan = popper.join().unwrap();
        assert_eq!(plan.file.path, RelPath::new("late"));
    }

    #[test]
    fn wait_until_empty_unblocks_after_every_host_drains() {
        let q = Arc::new(FanoutQueue::new());
        let h1 = Host("replica-1".into());
        let h2 = Host("replica-2".into());
        q.push(&h1, file("a"));
        q.push(&h2, file("b"));

        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.wait_until_empty())
        };
        thread::sleep(Duration::from_millis(20));
        q.pop(&h1);
        q.pop(&h2);
        waiter.join().unwrap();
    }
}
