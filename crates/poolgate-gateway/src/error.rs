//! Gateway error types.

use poolgate_core::error::PoolgateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("token must not be empty")]
    MissingToken,

    #[error("client identity must not be empty")]
    MissingClientIdentity,

    #[error("grant count must be between 1 and {max}, got {count}")]
    InvalidCount { count: u32, max: u32 },

    #[error("max_resources must be at least 1")]
    InvalidCapacity,

    #[error("invalid expiry: {0}")]
    InvalidExpiry(String),

    #[error("could not generate a unique token after {attempts} attempts")]
    TokenSpaceExhausted { attempts: u32 },
}

impl From<GatewayError> for PoolgateError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::MissingToken
            | GatewayError::MissingClientIdentity
            | GatewayError::InvalidCount { .. }
            | GatewayError::InvalidCapacity
            | GatewayError::InvalidExpiry(_) => PoolgateError::Validation {
                message: err.to_string(),
            },
            GatewayError::TokenSpaceExhausted { .. } => PoolgateError::Internal(err.to_string()),
        }
    }
}
