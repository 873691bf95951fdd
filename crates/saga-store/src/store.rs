use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::error::Result;
use crate::execution::{SagaExecution, SagaStatus};

/// Core trait for saga persistence adapters.
///
/// An adapter stores one row per execution, keyed by the saga ID. The
/// engine calls [`persist`](SagaStore::persist) before every state
/// transition, so implementations must treat it as an idempotent upsert -
/// repeated calls with the same id and evolving state leave exactly one
/// record reflecting the latest snapshot.
#[async_trait]
pub trait SagaStore<D>: Send + Sync
where
    D: Serialize + DeserializeOwned + Send + Sync,
{
    /// Upserts the execution snapshot by id.
    async fn persist(&self, execution: &SagaExecution<D>) -> Result<()>;

    /// Returns the latest snapshot for a saga, or `None` if unknown.
    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaExecution<D>>>;

    /// Returns the ids of all executions currently in the given status.
    ///
    /// An operator sweep uses this after a restart to find `Running`/
    /// `Compensating` executions to resume.
    async fn list_by_status(&self, status: SagaStatus) -> Result<Vec<SagaId>>;
}

/// The serialized row shape shared by all adapters.
///
/// `data` and `context` are JSON-serialized here and nowhere else; the
/// engine only handles typed values. The in-memory adapter stores rows in
/// this form too, so serde round-trip bugs surface without a database.
#[derive(Debug, Clone)]
pub struct ExecutionRow {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub data: serde_json::Value,
    pub context: serde_json::Value,
    pub current_step: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExecutionRow {
    /// Serializes an execution into its row form.
    pub fn from_execution<D: Serialize>(execution: &SagaExecution<D>) -> Result<Self> {
        Ok(Self {
            id: execution.id.as_uuid(),
            name: execution.name.clone(),
            status: execution.status.as_str().to_string(),
            data: serde_json::to_value(&execution.data)?,
            context: serde_json::to_value(&execution.context)?,
            current_step: execution.current_step.clone(),
            started_at: execution.started_at,
            completed_at: execution.completed_at,
            error: execution.error.clone(),
        })
    }

    /// Deserializes a row back into a typed execution.
    pub fn into_execution<D: DeserializeOwned>(self) -> Result<SagaExecution<D>> {
        Ok(SagaExecution {
            id: SagaId::from_uuid(self.id),
            name: self.name,
            status: self.status.parse()?,
            data: serde_json::from_value(self.data)?,
            context: serde_json::from_value(self.context)?,
            current_step: self.current_step,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error: self.error,
        })
    }
}
