//! Owner traces for failed step sequences
//!
//! When a step fails deep inside a nested stack, the error alone rarely says
//! which part of the host started the work. The trace builder walks the stack
//! and collects the owning context each sequence reports, giving a chain such
//! as `SceneController -> AssetLoader`.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tickbridge_sdk::StepSequence;

/// Ordered chain of owning contexts, outermost first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerTrace {
    owners: Vec<String>,
}

impl OwnerTrace {
    /// Create a trace from owners listed outermost first
    pub fn from_owners(owners: Vec<String>) -> Self {
        Self { owners }
    }

    /// Owners, outermost first
    pub fn owners(&self) -> &[String] {
        &self.owners
    }

    /// Number of owners in the chain
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether no owner could be resolved
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Whether `owner` appears anywhere in the chain
    pub fn contains(&self, owner: &str) -> bool {
        self.owners.iter().any(|o| o == owner)
    }
}

/// Renders as a suffix for the originating error; empty when nothing resolved
impl fmt::Display for OwnerTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.owners.is_empty() {
            return Ok(());
        }
        f.write_str("\nStep owner trace: ")?;
        for (i, owner) in self.owners.iter().enumerate() {
            if i > 0 {
                f.write_str("\n -> ")?;
            }
            f.write_str(owner)?;
        }
        Ok(())
    }
}

/// Builds owner traces from a nested step stack
#[derive(Debug, Clone, Copy)]
pub struct TraceBuilder {
    max_depth: usize,
}

impl TraceBuilder {
    /// Create a builder that examines at most `max_depth` frames
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Walk `frames` (innermost first) and build the chain
    ///
    /// Frames without an owner are skipped, as are frames whose owner lookup
    /// panics. Consecutive identical owners collapse into one entry.
    pub fn build<'a, T, I>(&self, frames: I) -> OwnerTrace
    where
        T: 'a,
        I: IntoIterator<Item = &'a (dyn StepSequence<T> + 'a)>,
    {
        let mut owners: Vec<String> = Vec::new();

        for frame in frames.into_iter().take(self.max_depth) {
            let resolve = || frame.owner().map(str::to_owned);
            let resolved = panic::catch_unwind(AssertUnwindSafe(resolve));
            let Ok(Some(owner)) = resolved else {
                continue;
            };
            if owners.last() != Some(&owner) {
                owners.push(owner);
            }
        }

        owners.reverse();
        OwnerTrace { owners }
    }
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickbridge_sdk::{once, BoxedSequence, StepError, StepOutcome, StepSequenceExt, Wait};

    struct PanickingOwner;

    impl StepSequence<()> for PanickingOwner {
        fn advance(&mut self) -> Result<StepOutcome<()>, StepError> {
            Ok(StepOutcome::Exhausted(None))
        }

        fn owner(&self) -> Option<&str> {
            panic!("owner lookup failed")
        }
    }

    fn frames(stack: &[BoxedSequence<()>]) -> impl Iterator<Item = &dyn StepSequence<()>> {
        stack
            .iter()
            .rev()
            .map(|b| b.as_ref() as &dyn StepSequence<()>)
    }

    #[test]
    fn test_trace_outermost_first() {
        let stack: Vec<BoxedSequence<()>> = vec![
            once(Wait::NextFrame).owned_by("Scene").boxed(),
            once(Wait::NextFrame).owned_by("Loader").boxed(),
        ];
        let trace = TraceBuilder::default().build(frames(&stack));
        assert_eq!(trace.owners(), ["Scene".to_string(), "Loader".to_string()]);
    }

    #[test]
    fn test_trace_skips_missing_and_collapses_duplicates() {
        let stack: Vec<BoxedSequence<()>> = vec![
            once(Wait::NextFrame).owned_by("Scene").boxed(),
            once(Wait::NextFrame).owned_by("Loader").boxed(),
            once(Wait::NextFrame).boxed(),
            once(Wait::NextFrame).owned_by("Loader").boxed(),
        ];
        let trace = TraceBuilder::default().build(frames(&stack));
        assert_eq!(trace.owners(), ["Scene".to_string(), "Loader".to_string()]);
    }

    #[test]
    fn test_trace_survives_panicking_owner() {
        let stack: Vec<BoxedSequence<()>> = vec![
            once(Wait::NextFrame).owned_by("Scene").boxed(),
            Box::new(PanickingOwner),
        ];
        let trace = TraceBuilder::default().build(frames(&stack));
        assert_eq!(trace.owners(), ["Scene".to_string()]);
    }

    #[test]
    fn test_trace_respects_max_depth() {
        let stack: Vec<BoxedSequence<()>> = vec![
            once(Wait::NextFrame).owned_by("Outer").boxed(),
            once(Wait::NextFrame).owned_by("Inner").boxed(),
        ];
        let trace = TraceBuilder::new(1).build(frames(&stack));
        assert_eq!(trace.owners(), ["Inner".to_string()]);
    }

    #[test]
    fn test_empty_trace_renders_nothing() {
        assert_eq!(OwnerTrace::default().to_string(), "");
    }
}
