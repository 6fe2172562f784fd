//! Generic adapters that turn common shapes into step sequences
//!
//! Host-specific primitives (timers, asset loads, frame markers) live with the
//! host integration; the adapters here only depend on `std`.

use crate::error::StepError;
use crate::sequence::{BoxedSequence, ProducerKind, Step, StepOutcome, StepSequence, Wait};
use std::borrow::Cow;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

// ============================================================================
// Single instruction
// ============================================================================

/// Yields one host primitive, then exhausts with no value
pub struct Once<T> {
    wait: Option<Wait>,
    _result: PhantomData<fn() -> T>,
}

/// Wrap a single host primitive as a one-step sequence
pub fn once<T>(wait: Wait) -> Once<T> {
    Once {
        wait: Some(wait),
        _result: PhantomData,
    }
}

impl<T> StepSequence<T> for Once<T> {
    fn advance(&mut self) -> Result<StepOutcome<T>, StepError> {
        Ok(match self.wait.take() {
            Some(wait) => StepOutcome::Yielded(Step::Wait(wait)),
            None => StepOutcome::Exhausted(None),
        })
    }
}

// ============================================================================
// Closures and iterators
// ============================================================================

/// Sequence driven by a closure
pub struct FromFn<F> {
    f: F,
}

/// Build a sequence whose every advancement calls `f`
pub fn from_fn<T, F>(f: F) -> FromFn<F>
where
    F: FnMut() -> Result<StepOutcome<T>, StepError> + Send,
{
    FromFn { f }
}

impl<T, F> StepSequence<T> for FromFn<F>
where
    F: FnMut() -> Result<StepOutcome<T>, StepError> + Send,
{
    fn advance(&mut self) -> Result<StepOutcome<T>, StepError> {
        (self.f)()
    }
}

/// Sequence replaying a fixed list of steps, then exhausting with a terminal value
pub struct Steps<I, T> {
    steps: I,
    terminal: Option<T>,
}

/// Replay `steps` in order, then exhaust with `terminal`
pub fn steps<I, T>(steps: I, terminal: Option<T>) -> Steps<I::IntoIter, T>
where
    I: IntoIterator<Item = Step<T>>,
{
    Steps {
        steps: steps.into_iter(),
        terminal,
    }
}

impl<I, T> StepSequence<T> for Steps<I, T>
where
    I: Iterator<Item = Step<T>> + Send,
    T: Send,
{
    fn advance(&mut self) -> Result<StepOutcome<T>, StepError> {
        Ok(match self.steps.next() {
            Some(step) => StepOutcome::Yielded(step),
            None => StepOutcome::Exhausted(self.terminal.take()),
        })
    }
}

// ============================================================================
// Time and conditions
// ============================================================================

/// Yields `NextFrame` until a duration has elapsed
///
/// The clock starts on the first advancement, not on construction.
pub struct Delay<T> {
    duration: Duration,
    deadline: Option<Instant>,
    _result: PhantomData<fn() -> T>,
}

/// Suspend for at least `duration` of wall-clock time
pub fn delay<T>(duration: Duration) -> Delay<T> {
    Delay {
        duration,
        deadline: None,
        _result: PhantomData,
    }
}

impl<T> StepSequence<T> for Delay<T> {
    fn advance(&mut self) -> Result<StepOutcome<T>, StepError> {
        let now = Instant::now();
        let deadline = *self.deadline.get_or_insert(now + self.duration);
        Ok(if now < deadline {
            StepOutcome::Yielded(Step::Wait(Wait::NextFrame))
        } else {
            StepOutcome::Exhausted(None)
        })
    }
}

/// Yields `NextFrame` until a predicate holds
pub struct WaitUntil<P, T> {
    predicate: P,
    _result: PhantomData<fn() -> T>,
}

/// Suspend until `predicate` returns true; it is checked once per tick
pub fn wait_until<T, P>(predicate: P) -> WaitUntil<P, T>
where
    P: FnMut() -> bool + Send,
{
    WaitUntil {
        predicate,
        _result: PhantomData,
    }
}

impl<P, T> StepSequence<T> for WaitUntil<P, T>
where
    P: FnMut() -> bool + Send,
{
    fn advance(&mut self) -> Result<StepOutcome<T>, StepError> {
        Ok(if (self.predicate)() {
            StepOutcome::Exhausted(None)
        } else {
            StepOutcome::Yielded(Step::Wait(Wait::NextFrame))
        })
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Attaches an owning-context name to a sequence
pub struct Owned<S> {
    inner: S,
    owner: Cow<'static, str>,
}

impl<T, S: StepSequence<T>> StepSequence<T> for Owned<S> {
    fn advance(&mut self) -> Result<StepOutcome<T>, StepError> {
        self.inner.advance()
    }

    fn owner(&self) -> Option<&str> {
        Some(&self.owner)
    }

    fn producer_kind(&self) -> Option<ProducerKind> {
        self.inner.producer_kind()
    }

    fn producer_result(&mut self) -> Option<T> {
        self.inner.producer_result()
    }
}

/// Attaches a producer tag to a sequence
pub struct Kinded<S> {
    inner: S,
    kind: ProducerKind,
}

impl<T, S: StepSequence<T>> StepSequence<T> for Kinded<S> {
    fn advance(&mut self) -> Result<StepOutcome<T>, StepError> {
        self.inner.advance()
    }

    fn owner(&self) -> Option<&str> {
        self.inner.owner()
    }

    fn producer_kind(&self) -> Option<ProducerKind> {
        Some(self.kind)
    }

    fn producer_result(&mut self) -> Option<T> {
        self.inner.producer_result()
    }
}

/// Combinators available on every step sequence
pub trait StepSequenceExt<T>: StepSequence<T> + Sized {
    /// Report `owner` as this sequence's owning context in failure traces
    fn owned_by(self, owner: impl Into<Cow<'static, str>>) -> Owned<Self> {
        Owned {
            inner: self,
            owner: owner.into(),
        }
    }

    /// Tag this sequence so a matching extraction rule produces its result
    fn with_kind(self, kind: ProducerKind) -> Kinded<Self> {
        Kinded { inner: self, kind }
    }

    /// Erase the concrete type
    fn boxed(self) -> BoxedSequence<T>
    where
        Self: 'static,
    {
        Box::new(self)
    }
}

impl<T, S: StepSequence<T>> StepSequenceExt<T> for S {}
