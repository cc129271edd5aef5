//! Error types for the poolgate system.

use thiserror::Error;

use crate::models::stats::PoolStats;

#[derive(Debug, Error)]
pub enum PoolgateError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Entity already exists: {entity}")]
    AlreadyExists { entity: String },

    #[error("Grant has expired")]
    Expired,

    #[error("Grant is disabled")]
    Disabled,

    #[error("Grant is bound to a different client")]
    IdentityMismatch,

    #[error("Grant capacity exhausted: {max_resources} of {max_resources} used")]
    CapacityExhausted { max_resources: u32 },

    #[error(
        "No available resource in pool ({} total, {} leased, {} available)",
        stats.total,
        stats.leased,
        stats.available
    )]
    PoolExhausted { stats: PoolStats },

    #[error("Allocation conflict: {0}")]
    Conflict(String),

    #[error("Resource {resource_id} is not leased to this grant")]
    NotOwned { resource_id: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PoolgateError {
    /// Stable machine-readable code surfaced to clients.
    pub fn code(&self) -> &'static str {
        match self {
            PoolgateError::NotFound { .. } => "not_found",
            PoolgateError::AlreadyExists { .. } => "already_exists",
            PoolgateError::Expired => "expired",
            PoolgateError::Disabled => "disabled",
            PoolgateError::IdentityMismatch => "identity_mismatch",
            PoolgateError::CapacityExhausted { .. } => "capacity_exhausted",
            PoolgateError::PoolExhausted { .. } => "pool_exhausted",
            PoolgateError::Conflict(_) => "conflict",
            PoolgateError::NotOwned { .. } => "not_owned",
            PoolgateError::Validation { .. } => "validation",
            PoolgateError::Database(_) => "database",
            PoolgateError::Internal(_) => "internal",
        }
    }

    /// Whether the caller may simply re-issue the same request.
    ///
    /// Only lost races are retryable. Exhaustion, expiry and ownership
    /// failures are terminal for the request as issued.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolgateError::Conflict(_))
    }

    /// Whether the end client needs a new grant to make progress.
    ///
    /// A missing resource is not one of these: the grant still works.
    pub fn needs_new_grant(&self) -> bool {
        match self {
            PoolgateError::NotFound { entity, .. } => entity == "grant",
            PoolgateError::Expired
            | PoolgateError::Disabled
            | PoolgateError::IdentityMismatch
            | PoolgateError::CapacityExhausted { .. } => true,
            _ => false,
        }
    }
}

pub type PoolgateResult<T> = Result<T, PoolgateError>;
