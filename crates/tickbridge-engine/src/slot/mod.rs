//! Pooled, versioned futures
//!
//! A `WorkSlot` holds the outcome of one bridging operation. Slots are rented
//! from a `SlotPool`, completed exactly once, read through a `SlotHandle` and
//! then returned to the pool for the next operation.

mod handle;
mod pool;
mod work_slot;

pub use handle::{SlotHandle, SlotId};
pub use pool::{PoolStats, SlotPool};
pub use work_slot::SlotStatus;

pub(crate) use work_slot::{Completion, WorkSlot};
