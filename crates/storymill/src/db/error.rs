//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// A stored value could not be decoded into its domain type.
    #[error("Corrupt row for {entity} '{id}': {reason}")]
    CorruptRow {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// A step transition violated the step state machine.
    #[error("Illegal step transition for job '{job_id}' phase '{phase}': {from} -> {to}")]
    IllegalTransition {
        job_id: String,
        phase: String,
        from: String,
        to: String,
    },

    /// Requeue refused because the job is mid-flight.
    #[error("Job '{0}' is running; requeue refused")]
    RequeueWhileRunning(String),

    /// The referenced job does not exist.
    #[error("Job '{0}' not found")]
    JobNotFound(String),
}
