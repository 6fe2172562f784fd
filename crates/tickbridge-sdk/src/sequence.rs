//! The step-sequence contract consumed by the bridge
//!
//! A step sequence is a lazy, finite, single-use stream of suspension points.
//! The bridge advances it exactly once per host tick (or several times in one
//! tick when nesting boundaries are crossed) and never from more than one
//! thread.

use crate::error::StepError;
use std::fmt;

/// Host-interpreted suspension primitive
///
/// The bridge never looks inside a `Wait`; it hands it to the host and resumes
/// the sequence on the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wait {
    /// Resume on the next host frame
    NextFrame,
    /// Resume once the current frame has finished rendering
    EndOfFrame,
    /// Resume on the next fixed-timestep update
    FixedUpdate,
    /// Host-defined marker, passed through untouched
    Marker(u64),
}

/// Tag identifying a producer that has its own result-extraction rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerKind(&'static str);

impl ProducerKind {
    /// Create a producer tag
    pub const fn new(name: &'static str) -> Self {
        ProducerKind(name)
    }

    /// The tag's name
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ProducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// An owned, type-erased step sequence
pub type BoxedSequence<T> = Box<dyn StepSequence<T>>;

/// A value yielded by one advancement
pub enum Step<T> {
    /// Ordinary suspension handed to the host
    Wait(Wait),
    /// Ordinary suspension carrying a value; the most recent one is the
    /// fallback result of the whole operation
    Value(T),
    /// Nesting request: the sequence runs to exhaustion before the yielding
    /// sequence is advanced again
    Nest(BoxedSequence<T>),
}

impl<T> Step<T> {
    /// Build a nesting request from any sequence
    pub fn nest<S>(sequence: S) -> Self
    where
        S: StepSequence<T> + 'static,
    {
        Step::Nest(Box::new(sequence))
    }

    /// Whether this step is a host-visible suspension point
    pub fn is_ordinary(&self) -> bool {
        !matches!(self, Step::Nest(_))
    }
}

impl<T: fmt::Debug> fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Wait(wait) => f.debug_tuple("Wait").field(wait).finish(),
            Step::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Step::Nest(nested) => f
                .debug_tuple("Nest")
                .field(&nested.owner().unwrap_or("<anonymous>"))
                .finish(),
        }
    }
}

/// Result of advancing a sequence once
#[derive(Debug)]
pub enum StepOutcome<T> {
    /// The sequence produced another step
    Yielded(Step<T>),
    /// The sequence has no more steps; carries its terminal value, if any
    Exhausted(Option<T>),
}

/// A cooperatively stepped sequence of suspension points
///
/// Only `advance` is required. The remaining methods are optional
/// capabilities the bridge probes for diagnostics and result extraction.
pub trait StepSequence<T>: Send {
    /// Advance by one step
    fn advance(&mut self) -> Result<StepOutcome<T>, StepError>;

    /// Name of the context that owns this sequence, used in failure traces
    fn owner(&self) -> Option<&str> {
        None
    }

    /// Producer tag used to look up a custom result-extraction rule
    fn producer_kind(&self) -> Option<ProducerKind> {
        None
    }

    /// Producer-specific result field, read by extraction rules
    fn producer_result(&mut self) -> Option<T> {
        None
    }
}

impl<T, S> StepSequence<T> for Box<S>
where
    S: StepSequence<T> + ?Sized,
{
    fn advance(&mut self) -> Result<StepOutcome<T>, StepError> {
        (**self).advance()
    }

    fn owner(&self) -> Option<&str> {
        (**self).owner()
    }

    fn producer_kind(&self) -> Option<ProducerKind> {
        (**self).producer_kind()
    }

    fn producer_result(&mut self) -> Option<T> {
        (**self).producer_result()
    }
}
