use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::SagaId;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::execution::{SagaExecution, SagaStatus};
use crate::store::{ExecutionRow, SagaStore};

/// In-memory saga store for testing.
///
/// Executions are serialized into the same row shape the PostgreSQL
/// adapter writes, so round-trip bugs in `data`/`context` serialization
/// surface in unit tests rather than against a live database.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    rows: Arc<RwLock<HashMap<Uuid, ExecutionRow>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored executions.
    pub async fn execution_count(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Returns the raw stored row for a saga, if any.
    pub async fn row(&self, saga_id: SagaId) -> Option<ExecutionRow> {
        self.rows.read().await.get(&saga_id.as_uuid()).cloned()
    }

    /// Clears all stored executions.
    pub async fn clear(&self) {
        self.rows.write().await.clear();
    }
}

#[async_trait]
impl<D> SagaStore<D> for InMemorySagaStore
where
    D: Serialize + DeserializeOwned + Send + Sync,
{
    async fn persist(&self, execution: &SagaExecution<D>) -> Result<()> {
        let row = ExecutionRow::from_execution(execution)?;
        self.rows.write().await.insert(row.id, row);
        Ok(())
    }

    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaExecution<D>>> {
        let rows = self.rows.read().await;
        rows.get(&saga_id.as_uuid())
            .cloned()
            .map(ExecutionRow::into_execution)
            .transpose()
    }

    async fn list_by_status(&self, status: SagaStatus) -> Result<Vec<SagaId>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| row.status == status.as_str())
            .map(|row| SagaId::from_uuid(row.id))
            .collect())
    }
}
