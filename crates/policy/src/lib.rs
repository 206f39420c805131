//! The transfer policy queue: per-peer FIFOs of pending transfers,
//! plus the `wait_until_empty` signal the anti-entropy loop uses to detect
//! quiescence.
//!
//! Two concrete policies are specified; the core daemon wires up
//! [`FanoutQueue`]. [`ChainQueue`] is kept for completeness — it isn't
//! exercised by the core's current (single-hop) topology.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod chain;
mod fanout;

pub use chain::ChainQueue;
pub use fanout::FanoutQueue;

use protocol::record::{PolicyFile, PolicyPlan};

/// A peer identifier as seen by the policy queue. Thin wrapper so the
/// queue doesn't need to know about `protocol::PolicyHost`'s forwarding
/// tree shape.
pub type Host = protocol::record::PolicyHost;

/// Per-host counters returned by [`TransferQueue::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostStats {
    /// Files pushed but not yet popped for this host.
    pub remaining: u64,
    /// Files popped (handed to a transfer worker) for this host.
    pub completed: u64,
}

/// The per-peer transfer queue interface shared by both policies.
pub trait TransferQueue: Send + Sync {
    /// Appends `file` to `host`'s pending queue.
    fn push(&self, host: &Host, file: PolicyFile);

    /// Blocks until a plan is available for `host`, then returns it.
    fn pop(&self, host: &Host) -> PolicyPlan;

    /// Current remaining/completed counters for `host`.
    fn stats(&self, host: &Host) -> HostStats;

    /// Blocks until the sum of `remaining` across every host reaches zero.
    fn wait_until_empty(&self);
}
