use stemflow_core::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// A stored row could not be mapped back onto the domain types.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}
