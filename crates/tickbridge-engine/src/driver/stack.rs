//! Explicit stack of active step sequences

use tickbridge_sdk::{BoxedSequence, StepSequence};

/// LIFO stack of sequences; the top is the one currently advancing
///
/// Nested sequences are pushed on top of the sequence that requested them and
/// popped when exhausted, which flattens the tree depth-first without
/// recursion.
pub struct NestedStepStack<T> {
    frames: Vec<BoxedSequence<T>>,
}

impl<T: 'static> NestedStepStack<T> {
    /// Create an empty stack
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Create a stack holding one root sequence
    pub fn with_root(root: BoxedSequence<T>) -> Self {
        Self { frames: vec![root] }
    }

    /// Push a nested sequence
    pub fn push(&mut self, frame: BoxedSequence<T>) {
        self.frames.push(frame);
    }

    /// Pop the top sequence
    pub fn pop(&mut self) -> Option<BoxedSequence<T>> {
        self.frames.pop()
    }

    /// The sequence currently advancing
    pub fn top_mut(&mut self) -> Option<&mut BoxedSequence<T>> {
        self.frames.last_mut()
    }

    /// Frames from the top of the stack down to the root
    pub fn innermost_first(&self) -> impl Iterator<Item = &(dyn StepSequence<T> + '_)> + '_ {
        self.frames
            .iter()
            .rev()
            .map(|frame| frame.as_ref() as &dyn StepSequence<T>)
    }

    /// Drop every frame
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame is left
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl<T: 'static> Default for NestedStepStack<T> {
    fn default() -> Self {
        Self::new()
    }
}
