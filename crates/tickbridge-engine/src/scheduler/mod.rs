//! Thread affinity and continuation routing
//!
//! All stepping happens on one affinity thread. Other threads reach it through
//! a FIFO queue that the host drains at every tick boundary.

mod affinity;
mod continuation;

pub use affinity::{AffinityCallback, AffinityScheduler};
pub use continuation::{ContinuationRouter, RunPolicy};
pub(crate) use continuation::PendingContinuation;

use std::panic::{self, AssertUnwindSafe};
use tickbridge_sdk::StepError;

/// Run a user callback, logging instead of propagating a panic
///
/// Returns false if the callback panicked.
pub(crate) fn invoke_guarded<F: FnOnce()>(what: &'static str, f: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            let err = StepError::from_panic(payload.as_ref());
            tracing::error!(callback = what, error = %err, "callback panicked");
            false
        }
    }
}
