use std::time::Duration;

use async_trait::async_trait;
use saga_store::SagaContext;

use crate::error::StepError;

/// One step of a saga: a forward action plus its compensating action.
///
/// The step name must be unique within a definition - the engine records
/// completed step names in the execution context and uses them to look the
/// step back up when compensating in reverse order.
///
/// Steps may be re-executed after a process restart (`resume` replays the
/// step that was in flight) and compensations run at-least-once, so both
/// actions should be idempotent.
#[async_trait]
pub trait SagaStep<D>: Send + Sync {
    /// The step's name, unique within its definition.
    fn name(&self) -> &str;

    /// Performs the step's forward action against the payload.
    async fn execute(
        &self,
        data: &mut D,
        context: &mut SagaContext,
    ) -> std::result::Result<(), StepError>;

    /// Reverses a previously completed execution of this step.
    ///
    /// `cause` is the failure that triggered compensation - usually from a
    /// later step, not this one.
    async fn compensate(
        &self,
        data: &mut D,
        context: &SagaContext,
        cause: &StepError,
    ) -> std::result::Result<(), StepError>;

    /// Whether failed attempts are retried before entering compensation.
    fn retryable(&self) -> bool {
        false
    }

    /// Retry budget when [`retryable`](SagaStep::retryable) is true.
    fn max_retries(&self) -> u32 {
        3
    }

    /// Optional limit the engine races `execute` against. The losing
    /// future is dropped, so the timeout cancels the step at its next
    /// await point.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}
