//! Error types for step sequences

use std::any::Any;
use std::sync::Arc;

/// Result type for a single advancement
pub type StepResult<T> = Result<T, StepError>;

/// Failure raised while advancing a step sequence
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    /// The sequence reported a failure
    #[error("{0}")]
    Failed(String),

    /// The sequence panicked while advancing
    #[error("step panicked: {0}")]
    Panicked(String),

    /// An error raised by the producer behind the sequence
    #[error(transparent)]
    Source(Arc<dyn std::error::Error + Send + Sync>),
}

impl StepError {
    /// Create a plain failure from a message
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }

    /// Wrap an arbitrary error raised by a producer
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StepError::Source(Arc::new(error))
    }

    /// Convert a caught panic payload into a step error
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        StepError::Panicked(message)
    }
}

impl From<String> for StepError {
    fn from(s: String) -> Self {
        StepError::Failed(s)
    }
}

impl From<&str> for StepError {
    fn from(s: &str) -> Self {
        StepError::Failed(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn test_from_panic_str_and_string() {
        let payload = panic::catch_unwind(|| panic!("static message")).unwrap_err();
        let err = StepError::from_panic(payload.as_ref());
        assert_eq!(err.to_string(), "step panicked: static message");

        let payload = panic::catch_unwind(|| panic!("formatted {}", 7)).unwrap_err();
        let err = StepError::from_panic(payload.as_ref());
        assert_eq!(err.to_string(), "step panicked: formatted 7");
    }

    #[test]
    fn test_source_is_transparent() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "asset missing");
        let err = StepError::from_error(io);
        assert_eq!(err.to_string(), "asset missing");
    }

    #[test]
    fn test_from_str() {
        let err: StepError = "boom".into();
        assert!(matches!(err, StepError::Failed(ref m) if m == "boom"));
    }
}
