//! Tickbridge SDK - the step-sequence contract for adapter authors
//!
//! This crate holds the types an adapter needs to expose a host primitive
//! (a timer, a resource load, a frame marker) to the bridge, without depending
//! on the bridge itself.
//!
//! # Example
//!
//! ```ignore
//! use tickbridge_sdk::{steps, Step, StepSequenceExt, Wait};
//!
//! let intro = steps(
//!     vec![Step::Wait(Wait::NextFrame), Step::Wait(Wait::EndOfFrame)],
//!     Some("ready"),
//! )
//! .owned_by("TitleScreen");
//! ```

#![warn(missing_docs)]

mod adapters;
mod error;
mod sequence;

pub use adapters::{
    delay, from_fn, once, steps, wait_until, Delay, FromFn, Kinded, Once, Owned, StepSequenceExt,
    Steps, WaitUntil,
};
pub use error::{StepError, StepResult};
pub use sequence::{BoxedSequence, ProducerKind, Step, StepOutcome, StepSequence, Wait};
