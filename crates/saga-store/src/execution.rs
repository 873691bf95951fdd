//! Saga execution state machine and persisted snapshot shapes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{CorrelationId, SagaId};
use serde::{Deserialize, Serialize};

use crate::error::SagaStoreError;

/// The status of a saga execution in its lifecycle.
///
/// Status transitions:
/// ```text
/// Pending ──► Running ──┬──► Completed
///                       ├──► Compensating ──► Compensated
///                       └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Execution has been created but no step has run yet.
    #[default]
    Pending,

    /// Steps are being executed.
    Running,

    /// A step failed and compensating actions are in progress.
    Compensating,

    /// All steps completed successfully (terminal).
    Completed,

    /// Compensation finished after a failure (terminal).
    Compensated,

    /// The execution aborted outside the normal compensation path
    /// (terminal).
    Failed,
}

impl SagaStatus {
    /// Returns true if the execution can begin running.
    pub fn can_run(&self) -> bool {
        matches!(self, SagaStatus::Pending)
    }

    /// Returns true if the execution can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaStatus::Running)
    }

    /// Returns true if an interrupted execution in this status can be
    /// resumed.
    pub fn is_resumable(&self) -> bool {
        matches!(self, SagaStatus::Running | SagaStatus::Compensating)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Compensated | SagaStatus::Failed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "Pending",
            SagaStatus::Running => "Running",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Completed => "Completed",
            SagaStatus::Compensated => "Compensated",
            SagaStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaStatus {
    type Err = SagaStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(SagaStatus::Pending),
            "Running" => Ok(SagaStatus::Running),
            "Compensating" => Ok(SagaStatus::Compensating),
            "Completed" => Ok(SagaStatus::Completed),
            "Compensated" => Ok(SagaStatus::Compensated),
            "Failed" => Ok(SagaStatus::Failed),
            other => Err(SagaStoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// Mutable per-execution state, owned by the engine driving one
/// `execute()` call and never shared across concurrent executions.
///
/// `completed_steps` grows monotonically during the forward pass and is
/// consumed in reverse order during compensation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaContext {
    /// The execution this context belongs to.
    pub saga_id: SagaId,

    /// Identifier threading this execution's events together.
    pub correlation_id: CorrelationId,

    /// The user on whose behalf the saga runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// The organization the saga belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Caller-supplied context carried through the execution.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Names of steps that completed, in execution order.
    #[serde(default)]
    pub completed_steps: Vec<String>,

    /// The step whose failure triggered compensation, if any.
    pub failed_step: Option<String>,

    /// Description of the failure, if any.
    pub error: Option<String>,
}

impl SagaContext {
    /// Creates an empty context for a fresh execution.
    pub fn new(saga_id: SagaId, correlation_id: CorrelationId) -> Self {
        Self {
            saga_id,
            correlation_id,
            user_id: None,
            organization_id: None,
            metadata: HashMap::new(),
            completed_steps: Vec::new(),
            failed_step: None,
            error: None,
        }
    }
}

/// Persisted snapshot of one saga execution.
///
/// Created in `Pending` when `execute()` is entered, persisted before each
/// step transition, and finalized (terminal status plus `completed_at`)
/// exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaExecution<D> {
    /// Execution identifier (equal to `context.saga_id`).
    pub id: SagaId,

    /// The saga definition name.
    pub name: String,

    /// Current lifecycle status.
    pub status: SagaStatus,

    /// The payload the steps operate on.
    pub data: D,

    /// Per-execution mutable state.
    pub context: SagaContext,

    /// The step currently executing (or the one in flight when the
    /// process stopped).
    pub current_step: Option<String>,

    /// When `execute()` was entered.
    pub started_at: DateTime<Utc>,

    /// When a terminal status was reached.
    pub completed_at: Option<DateTime<Utc>>,

    /// Description of the terminal failure, if any.
    pub error: Option<String>,
}

impl<D> SagaExecution<D> {
    /// Creates a fresh `Pending` execution for the given definition name.
    pub fn new(name: impl Into<String>, data: D, context: SagaContext) -> Self {
        Self {
            id: context.saga_id,
            name: name.into(),
            status: SagaStatus::Pending,
            data,
            context,
            current_step: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }
}
