//! Database-specific error types and conversions.

use poolgate_core::error::PoolgateError;

use crate::txn::Abort;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Unique constraint violated on {entity}")]
    Duplicate { entity: String },

    #[error("Malformed row: {0}")]
    Decode(String),

    #[error("Transaction aborted: {0:?}")]
    Aborted(Abort),

    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),
}

impl From<DbError> for PoolgateError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => PoolgateError::NotFound { entity, id },
            DbError::Duplicate { entity } => PoolgateError::AlreadyExists { entity },
            DbError::Conflict(msg) => PoolgateError::Conflict(msg),
            DbError::Aborted(abort) => abort.into_error(),
            other => PoolgateError::Database(other.to_string()),
        }
    }
}
