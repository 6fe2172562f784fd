//! The pooled, versioned future behind every bridging operation

use crate::cancel::CancellationRegistration;
use crate::error::{BridgeError, BridgeResult};
use crate::scheduler::{ContinuationRouter, PendingContinuation};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Completion state of a slot rental
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    /// Not completed yet
    Pending,
    /// Completed with a value (possibly none)
    Succeeded,
    /// Completed with a step failure
    Faulted,
    /// Force-completed by cancellation
    Canceled,
}

impl SlotStatus {
    /// Whether the status is final for the current rental
    pub fn is_terminal(self) -> bool {
        !matches!(self, SlotStatus::Pending)
    }
}

/// Terminal write applied to a slot
pub(crate) enum Completion<T> {
    Succeeded(Option<T>),
    Faulted(BridgeError),
    Canceled(BridgeError),
}

impl<T> Completion<T> {
    fn status(&self) -> SlotStatus {
        match self {
            Completion::Succeeded(_) => SlotStatus::Succeeded,
            Completion::Faulted(_) => SlotStatus::Faulted,
            Completion::Canceled(_) => SlotStatus::Canceled,
        }
    }
}

/// Next rental version; wraps and never lands on the 0 sentinel
pub(crate) fn next_version(version: u16) -> u16 {
    match version.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

struct SlotState<T> {
    version: u16,
    rented: bool,
    status: SlotStatus,
    result: Option<T>,
    result_taken: bool,
    error: Option<BridgeError>,
    continuation: Option<PendingContinuation>,
    registration: Option<CancellationRegistration>,
}

impl<T> SlotState<T> {
    fn new() -> Self {
        Self {
            version: 0,
            rented: false,
            status: SlotStatus::Pending,
            result: None,
            result_taken: false,
            error: None,
            continuation: None,
            registration: None,
        }
    }

    fn accepts(&self, version: u16) -> bool {
        self.rented && self.version == version && self.status == SlotStatus::Pending
    }
}

/// A recyclable future slot
///
/// All state sits behind one mutex: the terminal transition, the hand-off of
/// the continuation and the release of the cancellation registration happen in
/// a single critical section, so exactly one writer wins any race. Callbacks
/// and registry updates run after the lock is dropped.
pub(crate) struct WorkSlot<T> {
    index: u32,
    state: Mutex<SlotState<T>>,
    completed: Condvar,
    router: ContinuationRouter,
}

impl<T> WorkSlot<T> {
    pub(crate) fn new(index: u32, router: ContinuationRouter) -> Self {
        Self {
            index,
            state: Mutex::new(SlotState::new()),
            completed: Condvar::new(),
            router,
        }
    }

    /// Stable index of this slot within its pool
    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    /// Start a new rental; returns its version
    pub(crate) fn begin_rental(&self) -> u16 {
        let mut state = self.state.lock();
        state.version = next_version(state.version);
        state.rented = true;
        state.status = SlotStatus::Pending;
        state.result = None;
        state.result_taken = false;
        state.error = None;
        state.continuation = None;
        state.registration = None;
        state.version
    }

    /// Whether `version` is the current rental and has not been released
    pub(crate) fn is_rented(&self, version: u16) -> bool {
        let state = self.state.lock();
        state.rented && state.version == version
    }

    /// Whether the rental `version` is still waiting for completion
    pub(crate) fn is_live(&self, version: u16) -> bool {
        self.state.lock().accepts(version)
    }

    /// Apply a terminal write; first writer wins
    ///
    /// Returns false if the rental already completed, was released, or was
    /// superseded by a newer one.
    pub(crate) fn latch(&self, version: u16, completion: Completion<T>) -> bool {
        let (continuation, registration) = {
            let mut state = self.state.lock();
            if !state.accepts(version) {
                return false;
            }
            state.status = completion.status();
            match completion {
                Completion::Succeeded(value) => state.result = value,
                Completion::Faulted(err) | Completion::Canceled(err) => state.error = Some(err),
            }
            (state.continuation.take(), state.registration.take())
        };

        self.completed.notify_all();
        tracing::trace!(slot = self.index, version, "slot latched");

        drop(registration);
        if let Some(continuation) = continuation {
            self.router.dispatch(continuation);
        }
        true
    }

    /// Latch `Canceled`; a no-op for completed rentals
    pub(crate) fn cancel(&self, version: u16) -> bool {
        self.latch(version, Completion::Canceled(BridgeError::cancelled()))
    }

    #[track_caller]
    fn checked(&self, version: u16) -> MutexGuard<'_, SlotState<T>> {
        let state = self.state.lock();
        if state.version != version {
            let current = state.version;
            drop(state);
            stale(current, version);
        }
        state
    }

    #[track_caller]
    pub(crate) fn status(&self, version: u16) -> SlotStatus {
        self.checked(version).status
    }

    /// Fetch the outcome; the value can be taken once, errors repeatedly
    #[track_caller]
    pub(crate) fn take_result(&self, version: u16) -> BridgeResult<Option<T>> {
        let mut state = self.checked(version);
        if !state.rented {
            return Err(BridgeError::ResultConsumed);
        }
        match state.status {
            SlotStatus::Pending => Err(BridgeError::ResultPending),
            SlotStatus::Succeeded if state.result_taken => Err(BridgeError::ResultConsumed),
            SlotStatus::Succeeded => {
                state.result_taken = true;
                Ok(state.result.take())
            }
            SlotStatus::Faulted | SlotStatus::Canceled => Err(state
                .error
                .clone()
                .unwrap_or_else(BridgeError::cancelled)),
        }
    }

    /// Store the single continuation
    ///
    /// Hands the continuation back when the rental already completed so the
    /// caller can dispatch it immediately.
    #[track_caller]
    pub(crate) fn store_continuation(
        &self,
        version: u16,
        continuation: PendingContinuation,
    ) -> BridgeResult<Option<PendingContinuation>> {
        let mut state = self.checked(version);
        if state.status.is_terminal() {
            return Ok(Some(continuation));
        }
        if state.continuation.is_some() {
            return Err(BridgeError::DoubleRegistration);
        }
        state.continuation = Some(continuation);
        Ok(None)
    }

    /// Tie a cancellation registration to the rental
    ///
    /// Returns the registration when the rental is no longer live; the caller
    /// drops it outside the slot lock.
    pub(crate) fn attach_registration(
        &self,
        version: u16,
        registration: CancellationRegistration,
    ) -> Option<CancellationRegistration> {
        let mut state = self.state.lock();
        if !state.accepts(version) {
            return Some(registration);
        }
        state.registration = Some(registration);
        None
    }

    /// Block until the rental completes
    #[track_caller]
    pub(crate) fn wait(&self, version: u16) -> SlotStatus {
        let mut state = self.checked(version);
        while state.status == SlotStatus::Pending && state.version == version {
            self.completed.wait(&mut state);
        }
        if state.version != version {
            let current = state.version;
            drop(state);
            stale(current, version);
        }
        state.status
    }

    /// Block until the rental completes or `timeout` elapses
    ///
    /// Returns `None` on timeout.
    #[track_caller]
    pub(crate) fn wait_timeout(&self, version: u16, timeout: Duration) -> Option<SlotStatus> {
        let deadline = Instant::now() + timeout;
        let mut state = self.checked(version);
        while state.status == SlotStatus::Pending && state.version == version {
            if self.completed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        if state.version != version {
            let current = state.version;
            drop(state);
            stale(current, version);
        }
        state.status.is_terminal().then_some(state.status)
    }

    /// End the rental and clear every field
    ///
    /// Returns `Ok(true)` when the slot may go back to the free list and
    /// `Ok(false)` when it was already released.
    #[track_caller]
    pub(crate) fn release(&self, version: u16) -> BridgeResult<bool> {
        let registration = {
            let mut state = self.checked(version);
            if !state.rented {
                return Ok(false);
            }
            if state.status == SlotStatus::Pending && state.continuation.is_some() {
                tracing::warn!(
                    slot = self.index,
                    version,
                    "refusing to release a pending slot with a live continuation"
                );
                return Err(BridgeError::ReleasePending);
            }
            if state.status == SlotStatus::Pending {
                tracing::debug!(slot = self.index, version, "abandoning pending rental");
                state.status = SlotStatus::Canceled;
            }
            state.rented = false;
            state.result = None;
            state.result_taken = true;
            state.error = None;
            state.continuation = None;
            state.registration.take()
        };

        self.completed.notify_all();
        drop(registration);
        Ok(true)
    }
}

#[track_caller]
fn stale(current: u16, presented: u16) -> ! {
    panic!("{}", BridgeError::StaleToken { current, presented })
}
