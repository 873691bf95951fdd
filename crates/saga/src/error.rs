//! Saga error types.

use std::time::Duration;

use common::SagaId;
use saga_store::{SagaStatus, SagaStoreError};
use thiserror::Error;

/// Failure raised by a step's own logic or by its timeout.
///
/// This is the "expected" failure channel: returning a `StepError` from
/// `execute` tells the engine to retry (if the step allows it) and then to
/// enter compensation. Panics remain reserved for programmer errors.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StepError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    timed_out: bool,
}

impl StepError {
    /// Creates a step error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
            timed_out: false,
        }
    }

    /// Wraps an underlying error, preserving it as the source.
    pub fn from_source(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        let source = source.into();
        Self {
            message: source.to_string(),
            source: Some(source),
            timed_out: false,
        }
    }

    /// Creates the error recorded when a step's timeout elapses.
    pub fn timed_out(limit: Duration) -> Self {
        Self {
            message: format!("step timed out after {limit:?}"),
            source: None,
            timed_out: true,
        }
    }

    /// The failure description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true if this failure was a timeout rather than a step
    /// rejection.
    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A definition declared two steps with the same name. Names are the
    /// join key for compensation lookup, so they must be unique.
    #[error("Duplicate step name '{0}' in saga definition")]
    DuplicateStep(String),

    /// A step failed beyond its retry budget. Compensation has already run;
    /// the original step failure is the source.
    #[error("Saga step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: StepError,
    },

    /// Saga store error. Persistence failures are fatal to the current
    /// call: an unpersisted saga must not proceed silently.
    #[error("Saga store error: {0}")]
    Store(#[from] SagaStoreError),

    /// No execution exists for the given saga ID.
    #[error("Saga execution not found: {0}")]
    ExecutionNotFound(SagaId),

    /// The execution is not in a resumable status.
    #[error("Saga {saga_id} cannot be resumed from status {status}")]
    NotResumable { saga_id: SagaId, status: SagaStatus },

    /// A persisted execution belongs to a different definition than the
    /// engine it was resumed on.
    #[error("Saga {saga_id} was created by definition '{actual}', not '{expected}'")]
    DefinitionMismatch {
        saga_id: SagaId,
        expected: String,
        actual: String,
    },
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
