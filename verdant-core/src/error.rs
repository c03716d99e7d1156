//! Error types for verdant-core

use thiserror::Error;

/// Main error type for the verdant-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Schema migration failure. Always fatal: the service refuses to run
    /// against a schema it cannot reconcile.
    #[error("migration to version {version} failed: {source}")]
    Migration {
        version: i32,
        #[source]
        source: rusqlite::Error,
    },

    /// An executor operation exhausted its retry budget
    #[error("operation '{operation}' failed after {attempts} attempts: {source}")]
    OperationFailed {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// A critical failure the health monitor could not recover
    #[error("fatal storage error in '{context}': {message}")]
    Fatal { context: String, message: String },

    /// Backup or restore failure
    #[error("backup error: {0}")]
    Backup(String),

    /// The database handle has been closed (service shut down or mid-restore)
    #[error("database connection is closed")]
    ConnectionClosed,

    /// Entity lookup that must succeed came back empty
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Import payload was malformed
    #[error("import error: {0}")]
    Import(String),
}

/// Result type alias for verdant-core
pub type Result<T> = std::result::Result<T, Error>;
