use thiserror::Error;

/// Errors that can occur when persisting or loading saga executions.
#[derive(Debug, Error)]
pub enum SagaStoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored status string did not name a known saga status.
    #[error("Invalid saga status: {0}")]
    InvalidStatus(String),
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, SagaStoreError>;
