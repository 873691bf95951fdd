use async_trait::async_trait;
use common::SagaId;
use serde::{Serialize, de::DeserializeOwned};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::Result;
use crate::execution::{SagaExecution, SagaStatus};
use crate::store::{ExecutionRow, SagaStore};

/// PostgreSQL-backed saga store.
///
/// One row per execution in `saga_executions`; `persist` is an upsert on
/// the primary key so repeated snapshots of an evolving execution never
/// duplicate rows.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_execution_row(row: PgRow) -> Result<ExecutionRow> {
        Ok(ExecutionRow {
            id: row.try_get::<Uuid, _>("id")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            data: row.try_get("data")?,
            context: row.try_get("context")?,
            current_step: row.try_get("current_step")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error: row.try_get("error")?,
        })
    }
}

#[async_trait]
impl<D> SagaStore<D> for PostgresSagaStore
where
    D: Serialize + DeserializeOwned + Send + Sync,
{
    #[tracing::instrument(skip(self, execution), fields(saga_id = %execution.id, status = %execution.status))]
    async fn persist(&self, execution: &SagaExecution<D>) -> Result<()> {
        let row = ExecutionRow::from_execution(execution)?;

        sqlx::query(
            r#"
            INSERT INTO saga_executions
                (id, name, status, data, context, current_step, started_at, completed_at, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                data = EXCLUDED.data,
                context = EXCLUDED.context,
                current_step = EXCLUDED.current_step,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                error = EXCLUDED.error
            "#,
        )
        .bind(row.id)
        .bind(&row.name)
        .bind(&row.status)
        .bind(&row.data)
        .bind(&row.context)
        .bind(&row.current_step)
        .bind(row.started_at)
        .bind(row.completed_at)
        .bind(&row.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn load(&self, saga_id: SagaId) -> Result<Option<SagaExecution<D>>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, status, data, context, current_step, started_at, completed_at, error
            FROM saga_executions
            WHERE id = $1
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_execution_row)
            .transpose()?
            .map(ExecutionRow::into_execution)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn list_by_status(&self, status: SagaStatus) -> Result<Vec<SagaId>> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM saga_executions
            WHERE status = $1
            ORDER BY started_at ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok(SagaId::from_uuid(row.try_get::<Uuid, _>("id")?)))
            .collect()
    }
}
