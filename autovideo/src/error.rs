//! Application-wide error types.

use thiserror::Error;

use crate::pipeline::StageKind;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Admission rejected: the owner used up the free quota.
    #[error("Quota exceeded for owner {owner_id}: {consumed}/{limit} free jobs used")]
    QuotaExceeded {
        owner_id: i64,
        consumed: i64,
        limit: i64,
    },

    /// Admission rejected: the job queue has no free slot.
    #[error("Job queue is full")]
    QueueFull,

    #[error("Script generation unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("Script generation timed out after {0}s")]
    GenerationTimeout(u64),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Assembly error: {0}")]
    Assembly(String),

    /// A stage failed and its fallback (if any) failed too.
    #[error("{stage} stage failed: {source}")]
    StageFailed {
        stage: StageKind,
        #[source]
        source: Box<Error>,
    },

    #[error("Job was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {path}: {source}")]
    IoPath {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.display().to_string(),
            source,
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Wrap an error as the unrecoverable failure of `stage`.
    pub fn stage(stage: StageKind, source: Error) -> Self {
        Self::StageFailed {
            stage,
            source: Box::new(source),
        }
    }

    /// Stage that produced this error, if it is an unrecoverable stage failure.
    pub fn failed_stage(&self) -> Option<StageKind> {
        match self {
            Self::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
