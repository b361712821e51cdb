use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("Template error: {0}")]
    Template(#[from] crate::template::TemplateError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] crate::error::DispatchError),

    #[error("Index error: {0}")]
    Index(#[from] crate::index::IndexError),

    #[error("Callback error: {0}")]
    Callback(#[from] crate::error::CallbackError),

    #[error("No extracted text available for job '{0}'")]
    MissingExtractedText(String),

    #[error("Resolved text too short for ingestion ({length} chars, minimum {minimum})")]
    TrivialText { length: usize, minimum: usize },

    #[error("Job '{job_id}' is not runnable in status '{status}'")]
    NotRunnable { job_id: String, status: String },
}
