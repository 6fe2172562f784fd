//! Affinity scheduler: marshals work onto the host's stepping thread

use super::invoke_guarded;
use crate::error::{BridgeError, BridgeResult};
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

/// Callback queued for the affinity thread
pub type AffinityCallback = Box<dyn FnOnce() + Send>;

/// Guarantees that stepping work runs on exactly one designated thread
///
/// Calls made on the affinity thread run synchronously. Calls from any other
/// thread are queued on an MPSC channel and run, in FIFO order, the next time
/// the host drains the queue. There is no ordering between a queued callback
/// and a synchronous call made on the affinity thread in the meantime; callers
/// must not rely on one.
pub struct AffinityScheduler {
    /// The designated thread
    affinity: ThreadId,

    /// Producer side, cloned freely across threads
    tx: Sender<AffinityCallback>,

    /// Consumer side, only read by `drain`
    rx: Receiver<AffinityCallback>,

    /// Set when something was queued since the last drain
    drain_requested: AtomicBool,

    /// Upper bound on callbacks run per drain (None = whatever was queued)
    drain_limit: Option<usize>,
}

impl AffinityScheduler {
    /// Create a scheduler bound to the calling thread
    pub fn new(drain_limit: Option<usize>) -> Self {
        Self::for_thread(thread::current().id(), drain_limit)
    }

    /// Create a scheduler bound to a specific thread
    pub fn for_thread(affinity: ThreadId, drain_limit: Option<usize>) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            affinity,
            tx,
            rx,
            drain_requested: AtomicBool::new(false),
            drain_limit,
        }
    }

    /// The designated thread
    pub fn affinity_thread(&self) -> ThreadId {
        self.affinity
    }

    /// Is the caller on the affinity thread?
    pub fn is_affinity_thread(&self) -> bool {
        thread::current().id() == self.affinity
    }

    /// Run `callback` on the affinity thread
    ///
    /// Synchronous when already there; otherwise queued for the next drain.
    pub fn run_on_affinity<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_affinity_thread() {
            callback();
            return;
        }

        if self.tx.send(Box::new(callback)).is_err() {
            // The receiver lives as long as self, so this cannot happen
            tracing::error!("affinity queue disconnected; callback dropped");
            return;
        }
        self.drain_requested.store(true, Ordering::Release);
    }

    /// Number of callbacks waiting for the next drain
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Whether a drain has been requested since the last one ran
    pub fn drain_requested(&self) -> bool {
        self.drain_requested.load(Ordering::Acquire)
    }

    /// Run queued callbacks; must be called on the affinity thread
    ///
    /// Only the callbacks queued when the drain starts are run (capped by the
    /// drain limit), so producers racing the drain cannot stall the tick.
    /// A panicking callback is logged and the drain moves on.
    pub fn drain(&self) -> BridgeResult<usize> {
        if !self.is_affinity_thread() {
            return Err(BridgeError::NotAffinityThread);
        }

        self.drain_requested.store(false, Ordering::Release);
        let queued = self.rx.len();
        let budget = self.drain_limit.map_or(queued, |limit| queued.min(limit));

        let mut ran = 0;
        while ran < budget {
            let Ok(callback) = self.rx.try_recv() else {
                break;
            };
            invoke_guarded("affinity callback", callback);
            ran += 1;
        }

        if !self.rx.is_empty() {
            self.drain_requested.store(true, Ordering::Release);
        }
        if ran > 0 {
            tracing::trace!(ran, remaining = self.rx.len(), "drained affinity queue");
        }
        Ok(ran)
    }
}

impl std::fmt::Debug for AffinityScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityScheduler")
            .field("affinity", &self.affinity)
            .field("pending", &self.pending())
            .field("drain_limit", &self.drain_limit)
            .finish()
    }
}
