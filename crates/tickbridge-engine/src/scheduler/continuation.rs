//! Continuation routing: which thread resumes an awaiting caller

use super::affinity::AffinityScheduler;
use super::invoke_guarded;
use crate::error::BridgeResult;
use crate::slot::WorkSlot;
use std::fmt;
use std::sync::Arc;

/// Where a continuation runs once its slot completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunPolicy {
    /// Marshal onto the affinity thread (direct call if already there)
    #[default]
    HostAffine,
    /// Run on whichever thread completed the slot
    WorkerAffine,
}

/// The single continuation attached to a pending slot
pub(crate) struct PendingContinuation {
    callback: Box<dyn FnOnce() + Send>,
    policy: RunPolicy,
}

impl PendingContinuation {
    /// Bind a callback to its opaque state
    pub(crate) fn new<S, F>(callback: F, state: S, policy: RunPolicy) -> Self
    where
        S: Send + 'static,
        F: FnOnce(S) + Send + 'static,
    {
        Self {
            callback: Box::new(move || callback(state)),
            policy,
        }
    }
}

impl fmt::Debug for PendingContinuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingContinuation")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Registers and fires slot continuations according to their run policy
#[derive(Clone)]
pub struct ContinuationRouter {
    scheduler: Arc<AffinityScheduler>,
}

impl ContinuationRouter {
    /// Create a router that marshals host-affine continuations through `scheduler`
    pub fn new(scheduler: Arc<AffinityScheduler>) -> Self {
        Self { scheduler }
    }

    /// The scheduler host-affine continuations go through
    pub fn scheduler(&self) -> &Arc<AffinityScheduler> {
        &self.scheduler
    }

    /// Attach a continuation to a slot rental
    ///
    /// If the slot already completed, the continuation is dispatched right
    /// away. A second registration on a pending slot is rejected with
    /// `DoubleRegistration`.
    #[track_caller]
    pub(crate) fn register<T>(
        &self,
        slot: &WorkSlot<T>,
        version: u16,
        continuation: PendingContinuation,
    ) -> BridgeResult<()> {
        if let Some(ready) = slot.store_continuation(version, continuation)? {
            tracing::trace!(slot = slot.index(), "slot already complete; dispatching continuation");
            self.dispatch(ready);
        }
        Ok(())
    }

    /// Fire a continuation that was taken from a completed slot
    pub(crate) fn dispatch(&self, continuation: PendingContinuation) {
        let PendingContinuation { callback, policy } = continuation;
        match policy {
            RunPolicy::HostAffine => self
                .scheduler
                .run_on_affinity(move || {
                    invoke_guarded("host-affine continuation", callback);
                }),
            RunPolicy::WorkerAffine => {
                invoke_guarded("worker-affine continuation", callback);
            }
        }
    }
}

impl fmt::Debug for ContinuationRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuationRouter")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;

    #[test]
    fn test_worker_affine_runs_on_dispatching_thread() {
        let router = ContinuationRouter::new(Arc::new(AffinityScheduler::new(None)));
        let seen = Arc::new(Mutex::new(None));

        let r = router.clone();
        let s = seen.clone();
        let worker = thread::spawn(move || {
            let cont = PendingContinuation::new(
                |seen: Arc<Mutex<Option<thread::ThreadId>>>| {
                    *seen.lock() = Some(thread::current().id())
                },
                s,
                RunPolicy::WorkerAffine,
            );
            r.dispatch(cont);
            thread::current().id()
        });
        let worker_id = worker.join().unwrap();

        assert_eq!(*seen.lock(), Some(worker_id));
        assert_eq!(router.scheduler().pending(), 0);
    }

    #[test]
    fn test_host_affine_waits_for_drain() {
        let router = ContinuationRouter::new(Arc::new(AffinityScheduler::new(None)));
        let seen = Arc::new(Mutex::new(None));

        let r = router.clone();
        let s = seen.clone();
        thread::spawn(move || {
            let cont = PendingContinuation::new(
                |seen: Arc<Mutex<Option<thread::ThreadId>>>| {
                    *seen.lock() = Some(thread::current().id())
                },
                s,
                RunPolicy::HostAffine,
            );
            r.dispatch(cont);
        })
        .join()
        .unwrap();

        assert_eq!(*seen.lock(), None);
        router.scheduler().drain().unwrap();
        assert_eq!(*seen.lock(), Some(thread::current().id()));
    }

    #[test]
    fn test_panicking_worker_continuation_is_contained() {
        let router = ContinuationRouter::new(Arc::new(AffinityScheduler::new(None)));
        let cont = PendingContinuation::new(
            |_: ()| panic!("continuation failure"),
            (),
            RunPolicy::WorkerAffine,
        );
        router.dispatch(cont);
    }
}
