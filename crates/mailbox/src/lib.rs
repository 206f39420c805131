//! The typed actor mailbox primitive.
//!
//! Every long-running component (persistent connection, transfer worker,
//! sync client, command endpoint) is driven by one owning thread that reads
//! its own unbounded FIFO inbox. `cast` is fire-and-forget; `call` sends a
//! message tagged with a fresh reference id and blocks (with a deadline)
//! for a matching `reply`.
//!
//! Two compile-time-checked generic parameters carry the payload — `M` for
//! inbound messages, `R` for the value a `call` expects back — rather than
//! an opaque `Any`-typed payload, so a component's owner enum is the only
//! type ever boxed, never erased.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

/// Failure modes for mailbox operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MailboxError {
    /// A `call` or `peek` deadline elapsed before a value arrived.
    #[error("mailbox operation timed out")]
    Timeout,
    /// The mailbox's last sender/receiver half was dropped.
    #[error("mailbox is closed")]
    Closed,
}

/// One inbound message: the payload plus the reference id a `call` expects
/// answered, or `None` for a `cast`.
#[derive(Debug)]
pub struct Envelope<M> {
    /// Set when this message came from `call` and expects a `reply`.
    pub refid: Option<u64>,
    /// The message payload.
    pub msg: M,
}

/// An unbounded FIFO inbox supporting `cast`, `call`/`reply`, and the
/// owning thread's `peek`/`consume`.
///
/// `M` is the type of message the mailbox carries; `R` is the type a
/// `call` receives back. Share one `Mailbox` behind an `Arc` between the
/// owning thread and any number of callers — every method takes `&self`.
pub struct Mailbox<M, R> {
    tx: Sender<Envelope<M>>,
    rx: Receiver<Envelope<M>>,
    next_refid: AtomicU64,
    pending: Mutex<HashMap<u64, Sender<R>>>,
}

impl<M, R> Mailbox<M, R> {
    /// Creates an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            next_refid: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn next_refid(&self) -> u64 {
        self.next_refid.fetch_add(1, Ordering::Relaxed)
    }

    /// Fire-and-forget send; returns the assigned reference id (used only
    /// for diagnostics — nothing awaits it).
    ///
    /// # Errors
    ///
    /// Returns [`MailboxError::Closed`] if the owning thread's receiver has
    /// been dropped.
    pub fn cast(&self, msg: M) -> Result<u64, MailboxError> {
        let refid = self.next_refid();
        self.tx
            .send(Envelope { refid: None, msg })
            .map_err(|_| MailboxError::Closed)?;
        Ok(refid)
    }

    /// Sends `msg` tagged with a fresh reference id and blocks up to
    /// `timeout` for a matching [`Mailbox::reply`].
    ///
    /// # Errors
    ///
    /// [`MailboxError::Closed`] if the mailbox is gone; [`MailboxError::Timeout`]
    /// if no reply arrives within `timeout`.
    pub fn call(&self, msg: M, timeout: Duration) -> Result<R, MailboxError> {
        let refid = self.next_refid();
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.pending.lock().unwrap().insert(refid, reply_tx);

        if self.tx.send(Envelope { refid: Some(refid), msg }).is_err() {
            self.pending.lock().unwrap().remove(&refid);
            return Err(MailboxError::Closed);
        }

        match reply_rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => {
                self.pending.lock().unwrap().remove(&refid);
                Err(MailboxError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(MailboxError::Closed),
        }
    }

    /// Completes a pending `call` keyed by `refid`. A `refid` with no
    /// matching `call` (already timed out, or never one) is tolerated and
    /// silently ignored — returns `false` in that case.
    pub fn reply(&self, refid: u64, value: R) -> bool {
        if let Some(sender) = self.pending.lock().unwrap().remove(&refid) {
            sender.send(value).is_ok()
        } else {
            false
        }
    }

    /// Receives the next envelope, blocking at most `timeout` if given, or
    /// indefinitely if `None`. Used by the owning thread's receive loop.
    ///
    /// # Errors
    ///
    /// [`MailboxError::Timeout`] if `timeout` elapses first;
    /// [`MailboxError::Closed`] if every sender has been dropped.
    pub fn peek(&self, timeout: Option<Duration>) -> Result<Envelope<M>, MailboxError> {
        match timeout {
            Some(t) => self.rx.recv_timeout(t).map_err(|e| match e {
                RecvTimeoutError::Timeout => MailboxError::Timeout,
                RecvTimeoutError::Disconnected => MailboxError::Closed,
            }),
            None => self.rx.recv().map_err(|_| MailboxError::Closed),
        }
    }

    /// Blocks indefinitely for the next envelope. Equivalent to
    /// `peek(None)`, named separately to match the owning thread's usual
    /// "consume the mailbox" receive-loop idiom.
    ///
    /// # Errors
    ///
    /// [`MailboxError::Closed`] if every sender has been dropped.
    pub fn consume(&self) -> Result<Envelope<M>, MailboxError> {
        self.peek(None)
    }

}

impl<M, R> Default for Mailbox<M, R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug, PartialEq, Eq)]
    enum Msg {
        Ping,
        Terminate,
    }

    #[test]
    fn cast_is_fire_and_forget() {
        let mailbox: Mailbox<Msg, ()> = Mailbox::new();
        mailbox.cast(Msg::Ping).unwrap();
        let envelope = mailbox.consume().unwrap();
        assert_eq!(envelope.msg, Msg::Ping);
        assert_eq!(envelope.refid, None);
    }

    #[test]
    fn call_blocks_for_matching_reply() {
        let mailbox: Arc<Mailbox<Msg, u32>> = Arc::new(Mailbox::new());
        let owner = Arc::clone(&mailbox);
        let handle = thread::spawn(move || {
            let envelope = owner.consume().unwrap();
            let refid = envelope.refid.expect("call envelopes carry a refid");
            owner.reply(refid, 42);
        });
        let result = mailbox.call(Msg::Ping, Duration::from_secs(1)).unwrap();
        assert_eq!(result, 42);
        handle.join().unwrap();
    }

    #[test]
    fn call_without_a_reply_times_out() {
        let mailbox: Mailbox<Msg, u32> = Mailbox::new();
        let err = mailbox.call(Msg::Ping, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err, MailboxError::Timeout);
        // the inbound envelope is still delivered even though no one replied
        assert_eq!(mailbox.consume().unwrap().msg, Msg::Ping);
    }

    #[test]
    fn reply_with_no_pending_call_is_tolerated() {
        let mailbox: Mailbox<Msg, u32> = Mailbox::new();
        assert!(!mailbox.reply(999, 7));
    }

    #[test]
    fn peek_with_timeout_reports_timeout_on_empty_mailbox() {
        let mailbox: Mailbox<Msg, ()> = Mailbox::new();
        let err = mailbox.peek(Some(Duration::from_millis(10))).unwrap_err();
        assert_eq!(err, MailboxError::Timeout);
    }

    #[test]
    fn closed_mailbox_reports_closed() {
        let mailbox: Mailbox<Msg, ()> = Mailbox::new();
        let rx_clone = mailbox.rx.clone();
        drop(mailbox);
        assert!(rx_clone.recv().is_err());
    }
}
