//! Application-wide error types.

use std::sync::Arc;

use thiserror::Error;

use crate::domain::{ArtifactKind, ChapterId};

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// The type is `Clone` so every waiter on a single-flight computation can
/// receive its own copy of the same failure. Sources that are not `Clone`
/// are shared behind an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(Arc<sqlx::Error>),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),

    #[error("Quota exceeded for {service}: {reason}")]
    QuotaExceeded { service: String, reason: String },

    #[error("Generation already in progress for chapter {chapter_id} ({kind})")]
    GenerationInProgress {
        chapter_id: ChapterId,
        kind: ArtifactKind,
    },

    #[error("Generation for chapter {chapter_id} ({kind}) was claimed by another worker")]
    PersistenceConflict {
        chapter_id: ChapterId,
        kind: ArtifactKind,
    },

    #[error("Upstream call {call} failed: {message}")]
    Upstream { call: String, message: String },

    #[error("Upstream call {call} timed out after {timeout_ms}ms")]
    UpstreamTimeout { call: String, timeout_ms: u64 },

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseSqlx(Arc::new(err))
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            Self::Other("background computation panicked".to_string())
        } else {
            Self::Other("background computation was cancelled".to_string())
        }
    }
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn upstream(call: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            call: call.into(),
            message: message.into(),
        }
    }

    pub fn quota_exceeded(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// True for both the local in-progress signal and a lost compare-and-set.
    ///
    /// Callers treat the two identically: poll or wait, do not retry immediately.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::GenerationInProgress { .. } | Self::PersistenceConflict { .. }
        )
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    /// Whether an upstream call failing with this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::UpstreamTimeout { .. })
    }
}
