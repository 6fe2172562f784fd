//! `std::future::Future` over a slot rental

use crate::error::BridgeResult;
use crate::scheduler::RunPolicy;
use crate::slot::{SlotHandle, SlotStatus};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

type SharedWaker = Arc<Mutex<Option<Waker>>>;

/// Resolves with the rental's outcome and returns the slot to its pool
///
/// The first poll registers the slot's continuation (worker-affine, so the
/// waker fires on whichever thread completes the slot). Awaiting a handle that
/// already carries a continuation resolves with `DoubleRegistration`.
///
/// Dropping the future before it resolves, as a losing `select!` branch or an
/// elapsed timeout does, cancels the rental and releases the slot.
pub struct SlotFuture<T: Send + 'static> {
    handle: Option<SlotHandle<T>>,
    waker: SharedWaker,
    registered: bool,
}

impl<T: Send + 'static> SlotFuture<T> {
    pub(crate) fn new(handle: SlotHandle<T>) -> Self {
        Self {
            handle: Some(handle),
            waker: Arc::new(Mutex::new(None)),
            registered: false,
        }
    }

    fn finish(&mut self) -> Poll<BridgeResult<Option<T>>> {
        let Some(handle) = self.handle.take() else {
            return Poll::Pending;
        };
        let result = handle.take_result();
        if let Err(err) = handle.release() {
            tracing::warn!(slot = %handle.id(), error = %err, "could not release awaited slot");
        }
        Poll::Ready(result)
    }
}

impl<T: Send + 'static> Future for SlotFuture<T> {
    type Output = BridgeResult<Option<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(handle) = this.handle.as_ref() else {
            panic!("SlotFuture polled after completion");
        };

        *this.waker.lock() = Some(cx.waker().clone());

        if !this.registered {
            this.registered = true;
            let registration = handle.register_continuation(
                |waker: SharedWaker| {
                    if let Some(waker) = waker.lock().take() {
                        waker.wake();
                    }
                },
                this.waker.clone(),
                RunPolicy::WorkerAffine,
            );
            if let Err(err) = registration {
                this.handle = None;
                return Poll::Ready(Err(err));
            }
        }

        match handle.status() {
            SlotStatus::Pending => Poll::Pending,
            _ => this.finish(),
        }
    }
}

impl<T: Send + 'static> Drop for SlotFuture<T> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if !self.registered {
            return;
        }
        // A clone may have released or re-rented the slot already
        if !handle.slot().is_rented(handle.version()) {
            return;
        }
        if handle.slot().cancel(handle.version()) {
            tracing::debug!(slot = %handle.id(), "awaiting future dropped; canceled rental");
        }
        if let Err(err) = handle.release() {
            tracing::warn!(
                slot = %handle.id(),
                error = %err,
                "could not release dropped future's slot"
            );
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for SlotFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotFuture")
            .field("handle", &self.handle)
            .field("registered", &self.registered)
            .finish()
    }
}
