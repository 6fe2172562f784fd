//! Per-slot step driver
//!
//! Advances one nested stack by one host-visible step per tick. Nesting
//! boundaries cost no extra tick: pushing a child, or popping an exhausted one,
//! continues advancing in the same tick until an ordinary yield, completion or
//! failure.

use super::extract::ExtractionTable;
use super::stack::NestedStepStack;
use crate::error::BridgeError;
use crate::slot::{Completion, SlotHandle, SlotId, WorkSlot};
use crate::trace::TraceBuilder;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tickbridge_sdk::{BoxedSequence, Step, StepError, StepOutcome, StepSequence, Wait};

/// What a driver did during one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    /// The stack yielded an ordinary step; resume next tick
    Suspended(Wait),
    /// Nothing left to drive: the slot completed, failed, or was abandoned
    Finished,
}

/// Type-erased driver, so drivers of every result type share one table
pub(crate) trait Drive: Send {
    /// Rental this driver completes
    fn slot_id(&self) -> SlotId;

    /// Advance by one host-visible step
    fn tick(&mut self) -> DriveState;
}

/// Drives one nested stack to completion on the affinity thread
pub(crate) struct StepDriver<T> {
    slot: Arc<WorkSlot<T>>,
    version: u16,
    stack: NestedStepStack<T>,
    last_value: Option<T>,
    extraction: Arc<ExtractionTable<T>>,
    tracer: TraceBuilder,
}

impl<T: Send + 'static> StepDriver<T> {
    pub(crate) fn new(
        handle: &SlotHandle<T>,
        root: BoxedSequence<T>,
        extraction: Arc<ExtractionTable<T>>,
        tracer: TraceBuilder,
    ) -> Self {
        Self {
            slot: handle.slot().clone(),
            version: handle.version(),
            stack: NestedStepStack::with_root(root),
            last_value: None,
            extraction,
            tracer,
        }
    }

    fn advance_top(&mut self) -> Option<Result<StepOutcome<T>, StepError>> {
        let top = self.stack.top_mut()?;
        Some(
            panic::catch_unwind(AssertUnwindSafe(|| top.advance()))
                .unwrap_or_else(|payload| Err(StepError::from_panic(payload.as_ref()))),
        )
    }

    fn fail(&mut self, source: StepError) {
        let trace = self.tracer.build(self.stack.innermost_first());
        tracing::debug!(
            slot = self.slot.index(),
            version = self.version,
            depth = self.stack.len(),
            error = %source,
            "step sequence failed"
        );
        self.stack.clear();
        self.last_value = None;
        let error = BridgeError::StepFailure { trace, source };
        self.slot.latch(self.version, Completion::Faulted(error));
    }

    fn complete(&mut self, mut root: BoxedSequence<T>, terminal: Option<T>) {
        let fallback = terminal.or_else(|| self.last_value.take());
        let value = match self.extraction.extract(root.as_mut(), fallback) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    slot = self.slot.index(),
                    version = self.version,
                    producer = ?root.producer_kind(),
                    error = %err,
                    "result extraction failed; completing without a value"
                );
                None
            }
        };
        self.slot.latch(self.version, Completion::Succeeded(value));
    }
}

impl<T: Send + 'static> Drive for StepDriver<T> {
    fn slot_id(&self) -> SlotId {
        SlotId::new(self.slot.index(), self.version)
    }

    fn tick(&mut self) -> DriveState {
        if self.stack.is_empty() {
            return DriveState::Finished;
        }
        if !self.slot.is_live(self.version) {
            tracing::trace!(
                slot = self.slot.index(),
                version = self.version,
                "rental no longer live; abandoning stack"
            );
            self.stack.clear();
            self.last_value = None;
            return DriveState::Finished;
        }

        while let Some(advanced) = self.advance_top() {
            match advanced {
                Err(source) => {
                    self.fail(source);
                    return DriveState::Finished;
                }
                Ok(StepOutcome::Exhausted(terminal)) => {
                    let Some(finished) = self.stack.pop() else {
                        break;
                    };
                    if self.stack.is_empty() {
                        self.complete(finished, terminal);
                        return DriveState::Finished;
                    }
                    if terminal.is_some() {
                        self.last_value = terminal;
                    }
                }
                Ok(StepOutcome::Yielded(Step::Nest(nested))) => {
                    tracing::trace!(
                        slot = self.slot.index(),
                        depth = self.stack.len() + 1,
                        "nesting"
                    );
                    self.stack.push(nested);
                }
                Ok(StepOutcome::Yielded(Step::Wait(wait))) => {
                    tracing::trace!(slot = self.slot.index(), ?wait, "suspended");
                    return DriveState::Suspended(wait);
                }
                Ok(StepOutcome::Yielded(Step::Value(value))) => {
                    tracing::trace!(slot = self.slot.index(), "suspended with value");
                    self.last_value = Some(value);
                    return DriveState::Suspended(Wait::NextFrame);
                }
            }
        }
        DriveState::Finished
    }
}
