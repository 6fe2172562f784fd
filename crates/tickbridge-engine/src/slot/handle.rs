//! Versioned handles to slot rentals

use super::pool::SlotPool;
use super::work_slot::{SlotStatus, WorkSlot};
use crate::error::BridgeResult;
use crate::future::SlotFuture;
use crate::scheduler::{PendingContinuation, RunPolicy};
use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

/// Identity of one rental: the slot's pool index plus its rental version
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    index: u32,
    version: u16,
}

impl SlotId {
    pub(crate) fn new(index: u32, version: u16) -> Self {
        Self { index, version }
    }

    /// Pool index of the slot
    pub fn index(self) -> u32 {
        self.index
    }

    /// Rental version
    pub fn version(self) -> u16 {
        self.version
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotId({}:{})", self.index, self.version)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.version)
    }
}

/// Handle to one rental of a pooled slot
///
/// Only the pool issues handles. Every operation checks the handle's version
/// against the slot; using a handle after its slot was re-rented panics with
/// `StaleToken`.
pub struct SlotHandle<T> {
    slot: Arc<WorkSlot<T>>,
    version: u16,
    pool: SlotPool<T>,
}

impl<T> Clone for SlotHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            version: self.version,
            pool: self.pool.clone(),
        }
    }
}

impl<T: Send + 'static> SlotHandle<T> {
    pub(crate) fn new(slot: Arc<WorkSlot<T>>, version: u16, pool: SlotPool<T>) -> Self {
        Self {
            slot,
            version,
            pool,
        }
    }

    pub(crate) fn slot(&self) -> &Arc<WorkSlot<T>> {
        &self.slot
    }

    pub(crate) fn version(&self) -> u16 {
        self.version
    }

    /// Identity of this rental
    pub fn id(&self) -> SlotId {
        SlotId::new(self.slot.index(), self.version)
    }

    /// Current status
    #[track_caller]
    pub fn status(&self) -> SlotStatus {
        self.slot.status(self.version)
    }

    /// Whether the rental completed
    #[track_caller]
    pub fn is_complete(&self) -> bool {
        self.status().is_terminal()
    }

    /// Fetch the outcome
    ///
    /// `ResultPending` before completion; the value can be taken once, after
    /// which `ResultConsumed` is returned. Failures are returned every time.
    #[track_caller]
    pub fn take_result(&self) -> BridgeResult<Option<T>> {
        self.slot.take_result(self.version)
    }

    /// Register the single continuation for this rental
    ///
    /// `callback(state)` runs once the slot completes, on the thread chosen by
    /// `policy`. If the slot already completed it is dispatched immediately.
    #[track_caller]
    pub fn register_continuation<S, F>(
        &self,
        callback: F,
        state: S,
        policy: RunPolicy,
    ) -> BridgeResult<()>
    where
        S: Send + 'static,
        F: FnOnce(S) + Send + 'static,
    {
        let continuation = PendingContinuation::new(callback, state, policy);
        tracing::debug!(slot = %self.id(), ?policy, "registering continuation");
        self.pool
            .router()
            .register(&self.slot, self.version, continuation)
    }

    /// Cancel the rental; a no-op once it completed
    #[track_caller]
    pub fn cancel(&self) -> bool {
        // Surface stale handles before touching the slot
        self.status();
        self.slot.cancel(self.version)
    }

    /// Return the slot to its pool
    #[track_caller]
    pub fn release(&self) -> BridgeResult<()> {
        self.pool.release(self)
    }

    /// Block the calling thread until the rental completes
    ///
    /// Must not be called on the affinity thread for stepped work: the
    /// thread that would complete it is the one blocked.
    #[track_caller]
    pub fn wait(&self) -> SlotStatus {
        self.slot.wait(self.version)
    }

    /// Block until completion or timeout; `None` on timeout
    #[track_caller]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<SlotStatus> {
        self.slot.wait_timeout(self.version, timeout)
    }

    /// Wait up to `timeout`, then cancel if still pending
    ///
    /// Returns the final status; `Canceled` when the timeout won.
    #[track_caller]
    pub fn wait_or_cancel(&self, timeout: Duration) -> SlotStatus {
        if let Some(status) = self.wait_timeout(timeout) {
            return status;
        }
        if self.slot.cancel(self.version) {
            tracing::debug!(slot = %self.id(), ?timeout, "canceled after timeout");
        }
        self.status()
    }

    /// Wait for completion, take the result and release the slot
    #[track_caller]
    pub fn into_result(self) -> BridgeResult<Option<T>> {
        self.wait();
        let result = self.take_result();
        self.release()?;
        result
    }
}

impl<T: Send + 'static> IntoFuture for SlotHandle<T> {
    type Output = BridgeResult<Option<T>>;
    type IntoFuture = SlotFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        SlotFuture::new(self)
    }
}

impl<T> fmt::Debug for SlotHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotHandle")
            .field("index", &self.slot.index())
            .field("version", &self.version)
            .finish()
    }
}

impl<T> SlotHandle<T> {
    /// Whether `other` refers to the same rental
    pub fn same_rental(&self, other: &SlotHandle<T>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot) && self.version == other.version
    }
}
