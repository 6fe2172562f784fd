//! Stepping of nested sequences on the affinity thread

mod extract;
mod stack;
mod step_driver;

pub use extract::{prefer_fallback, prefer_producer_result, ExtractionTable, Extractor};
pub use stack::NestedStepStack;
pub use step_driver::DriveState;

pub(crate) use step_driver::{Drive, StepDriver};
