//! Step sequences backed by bridge primitives

use crate::slot::{SlotHandle, SlotStatus};
use tickbridge_sdk::{Step, StepError, StepOutcome, StepSequence, Wait};

/// Waits, one frame at a time, for another rental and finishes with its result
///
/// Lets stepped code consume work completed elsewhere (a background job, a
/// sibling sequence). A failed or canceled rental fails this sequence. The
/// awaited slot is released once its outcome is read.
pub struct AwaitSlot<T> {
    handle: Option<SlotHandle<T>>,
}

/// Step through frames until `handle` completes
pub fn await_slot<T: Send + 'static>(handle: SlotHandle<T>) -> AwaitSlot<T> {
    AwaitSlot {
        handle: Some(handle),
    }
}

impl<T: Send + 'static> StepSequence<T> for AwaitSlot<T> {
    fn advance(&mut self) -> Result<StepOutcome<T>, StepError> {
        let Some(handle) = self.handle.as_ref() else {
            return Ok(StepOutcome::Exhausted(None));
        };
        if handle.status() == SlotStatus::Pending {
            return Ok(StepOutcome::Yielded(Step::Wait(Wait::NextFrame)));
        }

        let result = handle.take_result();
        if let Err(err) = handle.release() {
            tracing::warn!(slot = %handle.id(), error = %err, "could not release awaited slot");
        }
        self.handle = None;
        match result {
            Ok(value) => Ok(StepOutcome::Exhausted(value)),
            Err(err) => Err(StepError::from_error(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{AffinityScheduler, ContinuationRouter};
    use crate::slot::{Completion, SlotPool};
    use std::sync::Arc;

    fn pool() -> SlotPool<String> {
        let router = ContinuationRouter::new(Arc::new(AffinityScheduler::new(None)));
        SlotPool::new(4, router)
    }

    #[test]
    fn test_waits_then_returns_result() {
        let pool = pool();
        let handle = pool.rent();
        let mut seq = await_slot(handle.clone());

        assert!(matches!(
            seq.advance().unwrap(),
            StepOutcome::Yielded(Step::Wait(Wait::NextFrame))
        ));
        let loaded = Some("loaded".to_string());
        handle
            .slot()
            .latch(handle.version(), Completion::Succeeded(loaded));

        match seq.advance().unwrap() {
            StepOutcome::Exhausted(value) => assert_eq!(value.as_deref(), Some("loaded")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(pool.stats().pooled, 1);
        assert!(matches!(
            seq.advance().unwrap(),
            StepOutcome::Exhausted(None)
        ));
    }

    #[test]
    fn test_canceled_rental_fails_sequence() {
        let pool = pool();
        let handle = pool.rent();
        handle.cancel();
        let err = await_slot(handle).advance().unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
