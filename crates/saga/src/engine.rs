//! Saga engine: drives step execution, retries, and compensation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{CorrelationId, SagaId};
use event_bus::EventPublisher;
use saga_store::{SagaContext, SagaExecution, SagaStatus, SagaStore};
use serde::{Serialize, de::DeserializeOwned};

use crate::definition::SagaDefinition;
use crate::error::{Result, SagaError, StepError};
use crate::step::SagaStep;

/// Optional per-execution context supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct ContextOverrides {
    /// Joins this execution to an existing causal chain. A fresh ID is
    /// generated when absent.
    pub correlation_id: Option<CorrelationId>,
    pub user_id: Option<String>,
    pub organization_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Executes a saga definition against a persistence adapter.
///
/// The engine owns its immutable definition; each [`execute`] call owns a
/// fresh context/execution pair, so multiple executions of the same
/// definition may be in flight concurrently. Steps within one execution
/// run strictly sequentially, and the snapshot is persisted before every
/// state transition - a persistence failure aborts the call.
///
/// With a publisher wired, the engine emits
/// `saga.<name>.{completed,failed,step.completed,step.compensated}` events.
/// Lifecycle publish failures are logged and never fail the saga.
///
/// [`execute`]: SagaEngine::execute
pub struct SagaEngine<D, S> {
    definition: SagaDefinition<D>,
    store: S,
    publisher: Option<EventPublisher>,
}

impl<D, S> SagaEngine<D, S>
where
    D: Serialize + DeserializeOwned + Send + Sync,
    S: SagaStore<D>,
{
    /// Creates an engine for the given definition and persistence adapter.
    pub fn new(definition: SagaDefinition<D>, store: S) -> Self {
        Self {
            definition,
            store,
            publisher: None,
        }
    }

    /// Wires a publisher for lifecycle events.
    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// The definition this engine executes.
    pub fn definition(&self) -> &SagaDefinition<D> {
        &self.definition
    }

    /// Runs the saga against the given payload.
    ///
    /// Returns the finalized execution on success. An error always means
    /// the saga did not complete: the persisted status tells whether it
    /// was `Compensated` or `Failed`, and for step failures the original
    /// step error is the source of [`SagaError::StepFailed`].
    #[tracing::instrument(skip(self, data, overrides), fields(saga = %self.definition.name()))]
    pub async fn execute(
        &self,
        data: D,
        overrides: ContextOverrides,
    ) -> Result<SagaExecution<D>> {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = std::time::Instant::now();

        let saga_id = SagaId::new();
        let correlation_id = overrides.correlation_id.unwrap_or_default();
        let mut context = SagaContext::new(saga_id, correlation_id);
        context.user_id = overrides.user_id;
        context.organization_id = overrides.organization_id;
        context.metadata = overrides.metadata;

        let mut execution = SagaExecution::new(self.definition.name(), data, context);
        self.store.persist(&execution).await?;

        execution.status = SagaStatus::Running;
        self.store.persist(&execution).await?;
        tracing::info!(%saga_id, "saga started");

        let result = self.complete(&mut execution).await;
        metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
        result.map(|()| execution)
    }

    /// Resumes an interrupted execution after a process restart.
    ///
    /// `Running` executions re-enter the step loop at `current_step`
    /// (already-completed steps are skipped; the in-flight step is re-run,
    /// so steps must be idempotent under replay). `Compensating`
    /// executions finish their reverse compensation and surface the
    /// recorded failure.
    #[tracing::instrument(skip(self), fields(saga = %self.definition.name()))]
    pub async fn resume(&self, saga_id: SagaId) -> Result<SagaExecution<D>> {
        let mut execution = self
            .store
            .load(saga_id)
            .await?
            .ok_or(SagaError::ExecutionNotFound(saga_id))?;

        if execution.name != self.definition.name() {
            return Err(SagaError::DefinitionMismatch {
                saga_id,
                expected: self.definition.name().to_string(),
                actual: execution.name.clone(),
            });
        }

        match execution.status {
            SagaStatus::Running => {
                tracing::info!(%saga_id, current_step = ?execution.current_step, "resuming saga");
                let saga_start = std::time::Instant::now();
                let result = self.complete(&mut execution).await;
                metrics::histogram!("saga_duration_seconds")
                    .record(saga_start.elapsed().as_secs_f64());
                result.map(|()| execution)
            }
            SagaStatus::Compensating => {
                tracing::info!(%saga_id, "resuming saga compensation");
                let cause = StepError::new(
                    execution
                        .context
                        .error
                        .clone()
                        .unwrap_or_else(|| "saga interrupted during compensation".to_string()),
                );
                Err(self.finish_compensation(&mut execution, cause).await)
            }
            status => Err(SagaError::NotResumable { saga_id, status }),
        }
    }

    /// Drives the forward pass and finalizes the execution either way.
    async fn complete(&self, execution: &mut SagaExecution<D>) -> Result<()> {
        match self.drive(execution).await {
            Ok(()) => {
                execution.status = SagaStatus::Completed;
                execution.completed_at = Some(Utc::now());
                self.store.persist(execution).await?;

                if let Some(hook) = self.definition.on_success() {
                    (**hook)(execution).await;
                }
                self.publish_lifecycle(execution, "completed").await;
                metrics::counter!("saga_completed").increment(1);
                tracing::info!(saga_id = %execution.id, "saga completed");
                Ok(())
            }
            Err(error) => {
                // The compensated path finalized its own terminal status;
                // anything else escaping the loop is a hard failure.
                if !execution.status.is_terminal() {
                    execution.status = SagaStatus::Failed;
                    execution.completed_at = Some(Utc::now());
                    execution.error = Some(error.to_string());
                    if let Err(persist_error) = self.store.persist(execution).await {
                        tracing::error!(
                            saga_id = %execution.id,
                            error = %persist_error,
                            "failed to persist Failed status"
                        );
                    }
                    self.publish_lifecycle(execution, "failed").await;
                    metrics::counter!("saga_failed").increment(1);
                }
                Err(error)
            }
        }
    }

    /// Runs steps in declaration order, starting from `current_step` when
    /// resuming. Steps already in `completed_steps` are skipped.
    async fn drive(&self, execution: &mut SagaExecution<D>) -> Result<()> {
        let start = execution
            .current_step
            .as_deref()
            .and_then(|name| self.definition.step_position(name))
            .unwrap_or(0);

        for position in start..self.definition.steps().len() {
            let step = Arc::clone(&self.definition.steps()[position]);
            if execution
                .context
                .completed_steps
                .iter()
                .any(|done| done == step.name())
            {
                continue;
            }

            execution.current_step = Some(step.name().to_string());
            self.store.persist(execution).await?;

            match self.execute_step(step.as_ref(), execution).await {
                Ok(()) => {
                    execution
                        .context
                        .completed_steps
                        .push(step.name().to_string());
                }
                Err(cause) => {
                    return Err(self.enter_compensation(execution, step.name(), cause).await);
                }
            }
        }
        Ok(())
    }

    /// Runs one step with its retry budget and optional timeout.
    ///
    /// Backoff between attempts is exponential: `2^attempt * 1000` ms. A
    /// timeout counts as a failed attempt; the step future is dropped, so
    /// its work is cancelled at the next await point.
    async fn execute_step(
        &self,
        step: &dyn SagaStep<D>,
        execution: &mut SagaExecution<D>,
    ) -> std::result::Result<(), StepError> {
        let max_attempts = if step.retryable() {
            step.max_retries() + 1
        } else {
            1
        };

        let mut attempt = 1u32;
        loop {
            let outcome = match step.timeout() {
                Some(limit) => {
                    match tokio::time::timeout(
                        limit,
                        step.execute(&mut execution.data, &mut execution.context),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(StepError::timed_out(limit)),
                    }
                }
                None => step.execute(&mut execution.data, &mut execution.context).await,
            };

            match outcome {
                Ok(()) => {
                    self.publish_step_event(execution, "step.completed", step.name())
                        .await;
                    return Ok(());
                }
                Err(cause) if attempt < max_attempts => {
                    metrics::counter!("saga_step_retries_total").increment(1);
                    let backoff = Duration::from_millis(1000 * 2u64.pow(attempt));
                    tracing::warn!(
                        saga_id = %execution.id,
                        step = step.name(),
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %cause,
                        "step attempt failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(cause) => return Err(cause),
            }
        }
    }

    /// Records the failure, flips to `Compensating`, and runs the
    /// compensation pass. Returns the error `execute()` surfaces.
    async fn enter_compensation(
        &self,
        execution: &mut SagaExecution<D>,
        failed_step: &str,
        cause: StepError,
    ) -> SagaError {
        tracing::warn!(
            saga_id = %execution.id,
            step = failed_step,
            error = %cause,
            "step failed, compensating completed steps"
        );
        execution.context.failed_step = Some(failed_step.to_string());
        execution.context.error = Some(cause.to_string());
        execution.status = SagaStatus::Compensating;
        if let Err(e) = self.store.persist(execution).await {
            return e.into();
        }

        self.finish_compensation(execution, cause).await
    }

    /// Compensates completed steps in reverse and finalizes `Compensated`.
    /// Assumes `Compensating` has already been persisted.
    async fn finish_compensation(
        &self,
        execution: &mut SagaExecution<D>,
        cause: StepError,
    ) -> SagaError {
        self.compensate_completed_steps(execution, &cause).await;

        execution.status = SagaStatus::Compensated;
        execution.completed_at = Some(Utc::now());
        execution.error = Some(cause.to_string());
        if let Err(e) = self.store.persist(execution).await {
            return e.into();
        }

        if let Some(hook) = self.definition.on_failure() {
            (**hook)(execution).await;
        }
        self.publish_lifecycle(execution, "failed").await;
        metrics::counter!("saga_compensated").increment(1);
        tracing::warn!(saga_id = %execution.id, "saga compensated");

        SagaError::StepFailed {
            step: execution.context.failed_step.clone().unwrap_or_default(),
            source: cause,
        }
    }

    /// Invokes compensations over `completed_steps` in reverse order.
    ///
    /// A compensation that fails is logged and does not abort the
    /// remaining compensations - cleanup is best-effort. Steps recorded as
    /// completed but missing from the definition are skipped with a
    /// warning.
    async fn compensate_completed_steps(
        &self,
        execution: &mut SagaExecution<D>,
        cause: &StepError,
    ) {
        let completed = execution.context.completed_steps.clone();
        for step_name in completed.iter().rev() {
            let Some(step) = self.definition.step_by_name(step_name) else {
                tracing::warn!(
                    saga_id = %execution.id,
                    step = %step_name,
                    "completed step not found in definition, skipping compensation"
                );
                continue;
            };
            let step = Arc::clone(step);

            match step
                .compensate(&mut execution.data, &execution.context, cause)
                .await
            {
                Ok(()) => {
                    tracing::info!(saga_id = %execution.id, step = %step_name, "step compensated");
                    self.publish_step_event(execution, "step.compensated", step_name)
                        .await;
                }
                Err(compensation_error) => {
                    tracing::error!(
                        saga_id = %execution.id,
                        step = %step_name,
                        error = %compensation_error,
                        "compensation step failed, continuing with remaining steps"
                    );
                }
            }
        }
    }

    async fn publish_lifecycle(&self, execution: &SagaExecution<D>, kind: &str) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let event_type = format!("saga.{}.{}", self.definition.name(), kind);
        let data = serde_json::json!({
            "saga_id": execution.id,
            "name": execution.name,
            "status": execution.status.as_str(),
            "failed_step": execution.context.failed_step,
            "error": execution.error,
        });
        if let Err(e) = publisher
            .publish_correlated(&event_type, data, execution.context.correlation_id)
            .await
        {
            // Lifecycle delivery failures never fail the saga.
            tracing::warn!(event_type, error = %e, "failed to publish saga lifecycle event");
        }
    }

    async fn publish_step_event(&self, execution: &SagaExecution<D>, kind: &str, step: &str) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let event_type = format!("saga.{}.{}", self.definition.name(), kind);
        let data = serde_json::json!({
            "saga_id": execution.id,
            "step": step,
        });
        if let Err(e) = publisher
            .publish_correlated(&event_type, data, execution.context.correlation_id)
            .await
        {
            tracing::warn!(event_type, error = %e, "failed to publish saga step event");
        }
    }
}
