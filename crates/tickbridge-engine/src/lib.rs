//! Tickbridge engine
//!
//! Makes cooperatively stepped, possibly nested sequences of suspension points
//! observable as pooled, thread-safe futures.
//!
//! # Overview
//!
//! - [`Bridge`]: host entry point (`spawn`, `pump_one_tick`, lifecycle)
//! - [`SlotPool`] / [`SlotHandle`]: pooled, versioned futures
//! - [`NestedStepStack`] and the step driver: depth-first stepping
//! - [`AffinityScheduler`] / [`ContinuationRouter`]: thread affinity
//! - [`TraceBuilder`]: owner traces for failed steps
//! - [`CancellationAuthority`]: session-wide cancellation
//!
//! # Example
//!
//! ```ignore
//! use tickbridge_engine::{Bridge, BridgeConfig};
//! use tickbridge_engine::sdk::{steps, Step, Wait};
//!
//! let bridge = Bridge::new(BridgeConfig::default())?;
//! let handle = bridge.spawn(steps(vec![Step::Wait(Wait::NextFrame)], Some(42u32)))?;
//!
//! // Once per host frame:
//! let report = bridge.pump_one_tick()?;
//! ```

#![warn(missing_docs)]

pub mod adapters;
mod background;
pub mod bridge;
pub mod cancel;
pub mod config;
pub mod driver;
pub mod error;
pub mod future;
pub mod scheduler;
pub mod slot;
pub mod trace;

pub use tickbridge_sdk as sdk;

pub use adapters::{await_slot, AwaitSlot};
pub use bridge::{Bridge, TickReport};
pub use cancel::{
    Cancelable, CancellationAuthority, CancellationRegistration, LifecycleEvent, LifecycleState,
    RegistrationId,
};
pub use config::BridgeConfig;
pub use driver::{
    prefer_fallback, prefer_producer_result, DriveState, ExtractionTable, Extractor,
    NestedStepStack,
};
pub use error::{BridgeError, BridgeResult, CANCELLATION_MESSAGE};
pub use future::SlotFuture;
pub use scheduler::{AffinityCallback, AffinityScheduler, ContinuationRouter, RunPolicy};
pub use slot::{PoolStats, SlotHandle, SlotId, SlotPool, SlotStatus};
pub use trace::{OwnerTrace, TraceBuilder};
