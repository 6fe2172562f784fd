//! Free list of recyclable work slots
//!
//! Slots are rented for one bridging operation and returned once the caller
//! has read the outcome. Returned slots keep their index and their version
//! counter, so a handle from an earlier rental can always be told apart from
//! the current one.

use super::handle::SlotHandle;
use super::work_slot::WorkSlot;
use crate::error::BridgeResult;
use crate::scheduler::ContinuationRouter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Rentals not yet released
    pub rented: usize,
    /// Slots waiting on the free list
    pub pooled: usize,
    /// Slots ever constructed
    pub created: usize,
}

struct PoolInner<T> {
    free: Mutex<Vec<Arc<WorkSlot<T>>>>,
    max_size: usize,
    router: ContinuationRouter,
    next_index: AtomicU32,
    rented: AtomicUsize,
}

/// Thread-safe pool of `WorkSlot<T>`
///
/// Cloning is cheap; clones share the same free list.
pub struct SlotPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for SlotPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> SlotPool<T> {
    /// Create a pool that keeps up to `max_size` idle slots
    pub fn new(max_size: usize, router: ContinuationRouter) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(max_size)),
                max_size,
                router,
                next_index: AtomicU32::new(0),
                rented: AtomicUsize::new(0),
            }),
        }
    }

    /// Take a cleared slot from the free list, or construct one
    ///
    /// The slot's version is bumped before the handle is issued.
    pub fn rent(&self) -> SlotHandle<T> {
        let slot = self.inner.free.lock().pop().unwrap_or_else(|| {
            let index = self.inner.next_index.fetch_add(1, Ordering::Relaxed);
            Arc::new(WorkSlot::new(index, self.inner.router.clone()))
        });
        let version = slot.begin_rental();
        self.inner.rented.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(slot = slot.index(), version, "rented slot");
        SlotHandle::new(slot, version, self.clone())
    }

    /// Return a rental to the pool
    ///
    /// Refused with `ReleasePending` while the rental is pending with a live
    /// continuation. Releasing twice is a no-op.
    #[track_caller]
    pub fn release(&self, handle: &SlotHandle<T>) -> BridgeResult<()> {
        let slot = handle.slot();
        if !slot.release(handle.version())? {
            return Ok(());
        }
        self.inner.rented.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!(slot = slot.index(), version = handle.version(), "released slot");

        let mut free = self.inner.free.lock();
        if free.len() < self.inner.max_size {
            free.push(slot.clone());
        }
        // else: drop, the free list is full
        Ok(())
    }

    /// Maximum number of idle slots kept
    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            rented: self.inner.rented.load(Ordering::Relaxed),
            pooled: self.inner.free.lock().len(),
            created: self.inner.next_index.load(Ordering::Relaxed) as usize,
        }
    }

    pub(crate) fn router(&self) -> &ContinuationRouter {
        &self.inner.router
    }
}

impl<T> std::fmt::Debug for SlotPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPool")
            .field("max_size", &self.inner.max_size)
            .field("rented", &self.inner.rented.load(Ordering::Relaxed))
            .finish()
    }
}
