//! Error types for the bridge

use crate::cancel::LifecycleState;
use crate::trace::OwnerTrace;
use tickbridge_sdk::StepError;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Message carried by slots canceled through a host lifecycle transition
pub const CANCELLATION_MESSAGE: &str = "operation cancelled due to host lifecycle transition";

/// Bridge error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// A step sequence failed while advancing
    #[error("{source}{trace}")]
    StepFailure {
        /// Owning contexts of the failed stack, outermost first
        trace: OwnerTrace,
        /// The error raised by the sequence
        source: StepError,
    },

    /// The slot was force-completed by cancellation
    #[error("{0}")]
    CancellationAborted(String),

    /// A handle outlived the rental it was issued for
    #[error("stale slot token: slot is at version {current}, handle presented {presented}")]
    StaleToken {
        /// Version of the slot's current rental
        current: u16,
        /// Version carried by the handle
        presented: u16,
    },

    /// A second continuation was registered on a pending slot
    #[error("a continuation is already registered on this slot")]
    DoubleRegistration,

    /// The slot has not completed yet
    #[error("result is not available yet")]
    ResultPending,

    /// The result was already taken
    #[error("result has already been taken")]
    ResultConsumed,

    /// A pending slot with a live continuation cannot go back to the pool
    #[error("cannot release a pending slot with a live continuation")]
    ReleasePending,

    /// Stepping was requested off the affinity thread
    #[error("operation must run on the affinity thread")]
    NotAffinityThread,

    /// `pump_one_tick` was entered from inside a tick
    #[error("pump_one_tick called while a tick is already running")]
    ReentrantPump,

    /// The cancellation registry is closed for this session
    #[error("cancellation registry is not accepting registrations (session {0:?})")]
    NotRegistrable(LifecycleState),

    /// The bridge has been shut down
    #[error("bridge has been shut down")]
    ShutDown,

    /// A background worker thread could not be started
    #[error("failed to start background worker: {0}")]
    WorkerSpawn(String),

    /// Invalid configuration
    #[error("invalid bridge configuration: {0}")]
    Config(String),
}

impl BridgeError {
    /// Build the error latched into slots canceled by the host
    pub fn cancelled() -> Self {
        BridgeError::CancellationAborted(CANCELLATION_MESSAGE.to_string())
    }

    /// Whether this error is a cancellation signal rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            BridgeError::CancellationAborted(_) | BridgeError::ShutDown
        )
    }

    /// Whether this error came from a failing step
    pub fn is_step_failure(&self) -> bool {
        matches!(self, BridgeError::StepFailure { .. })
    }

    /// The owner trace of a step failure
    pub fn trace(&self) -> Option<&OwnerTrace> {
        match self {
            BridgeError::StepFailure { trace, .. } => Some(trace),
            _ => None,
        }
    }
}
