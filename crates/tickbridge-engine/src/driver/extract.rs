//! Producer-specific result extraction
//!
//! By default an operation's result is the root sequence's terminal value, or
//! failing that the last value yielded anywhere in the tree. Producers whose
//! result lives elsewhere (a resource request's loaded asset, say) register an
//! extractor keyed by their `ProducerKind`. The extractor receives that
//! fallback and decides which one wins.

use rustc_hash::FxHashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tickbridge_sdk::{ProducerKind, StepError, StepSequence};

/// Extraction rule for one producer kind
pub type Extractor<T> =
    Arc<dyn Fn(&mut dyn StepSequence<T>, Option<T>) -> Result<Option<T>, StepError> + Send + Sync>;

/// Map from producer kind to extraction rule
pub struct ExtractionTable<T> {
    rules: FxHashMap<ProducerKind, Extractor<T>>,
}

impl<T> Clone for ExtractionTable<T> {
    fn clone(&self) -> Self {
        Self {
            rules: self.rules.clone(),
        }
    }
}

impl<T> ExtractionTable<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            rules: FxHashMap::default(),
        }
    }

    /// Register (or replace) the rule for `kind`
    pub fn register<F>(&mut self, kind: ProducerKind, rule: F)
    where
        F: Fn(&mut dyn StepSequence<T>, Option<T>) -> Result<Option<T>, StepError>
            + Send
            + Sync
            + 'static,
    {
        self.rules.insert(kind, Arc::new(rule));
    }

    /// Whether a rule exists for `kind`
    pub fn contains(&self, kind: ProducerKind) -> bool {
        self.rules.contains_key(&kind)
    }

    /// Number of registered rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rule is registered
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Produce the final result of `root`
    ///
    /// Without a matching rule this is `fallback`. A panicking rule is
    /// reported as an error.
    pub fn extract(
        &self,
        root: &mut dyn StepSequence<T>,
        fallback: Option<T>,
    ) -> Result<Option<T>, StepError> {
        let Some(rule) = root.producer_kind().and_then(|kind| self.rules.get(&kind)) else {
            return Ok(fallback);
        };
        panic::catch_unwind(AssertUnwindSafe(|| rule(root, fallback)))
            .unwrap_or_else(|payload| Err(StepError::from_panic(payload.as_ref())))
    }
}

impl<T> Default for ExtractionTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ExtractionTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.rules.keys()).finish()
    }
}

/// Rule that prefers the producer's own result field over the fallback
pub fn prefer_producer_result<T>(
    root: &mut dyn StepSequence<T>,
    fallback: Option<T>,
) -> Result<Option<T>, StepError> {
    Ok(root.producer_result().or(fallback))
}

/// Rule that keeps the fallback and only reads the producer field when there is none
pub fn prefer_fallback<T>(
    root: &mut dyn StepSequence<T>,
    fallback: Option<T>,
) -> Result<Option<T>, StepError> {
    Ok(match fallback {
        Some(value) => Some(value),
        None => root.producer_result(),
    })
}
