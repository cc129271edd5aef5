//! Client-facing response shapes.
//!
//! Every gateway call is answered with an [`Envelope`]. Failures carry a
//! stable `code`, and `retryable` tells the client whether to simply try
//! again or to ask the user for a new grant.

use chrono::{DateTime, Utc};
use poolgate_core::error::{PoolgateError, PoolgateResult};
use poolgate_core::models::grant::Grant;
use poolgate_core::models::resource::Resource;
use poolgate_core::models::stats::PoolStats;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const SECS_PER_DAY: i64 = 86_400;
const SECS_PER_HOUR: i64 = 3_600;
const SECS_PER_MINUTE: i64 = 60;

/// Result of a successful `verify`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyView {
    pub max_resources: u32,
    pub used_resources: u32,
    pub remaining: u32,
    pub expires_at: DateTime<Utc>,
    pub seconds_remaining: i64,
    pub days_remaining: i64,
    pub hours_remaining: i64,
    pub minutes_remaining: i64,
}

impl VerifyView {
    pub fn new(grant: &Grant, now: DateTime<Utc>) -> Self {
        let secs = (grant.expire_at - now).num_seconds().max(0);
        Self {
            max_resources: grant.max_resources,
            used_resources: grant.used_resources,
            remaining: grant.remaining(),
            expires_at: grant.expire_at,
            seconds_remaining: secs,
            days_remaining: secs / SECS_PER_DAY,
            hours_remaining: (secs % SECS_PER_DAY) / SECS_PER_HOUR,
            minutes_remaining: (secs % SECS_PER_HOUR) / SECS_PER_MINUTE,
        }
    }
}

/// A leased resource including its credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceView {
    pub id: Uuid,
    pub handle: String,
    pub display_name: String,
    pub credential: String,
}

impl From<Resource> for ResourceView {
    fn from(resource: Resource) -> Self {
        Self {
            id: resource.id,
            handle: resource.handle,
            display_name: resource.display_name,
            credential: resource.credential,
        }
    }
}

/// Result of a successful `checkout`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutView {
    #[serde(flatten)]
    pub resource: ResourceView,
    /// Capacity left on the grant after this checkout.
    pub remaining: u32,
}

/// Entry of `list_leased`; credentials are withheld.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeasedView {
    pub id: Uuid,
    pub handle: String,
    pub display_name: String,
}

impl From<Resource> for LeasedView {
    fn from(resource: Resource) -> Self {
        Self {
            id: resource.id,
            handle: resource.handle,
            display_name: resource.display_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    /// Set when the grant itself is unusable and the user must obtain a
    /// new one.
    pub needs_new_grant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_stats: Option<PoolStats>,
}

impl From<&PoolgateError> for ErrorBody {
    fn from(err: &PoolgateError) -> Self {
        let pool_stats = match err {
            PoolgateError::PoolExhausted { stats } => Some(*stats),
            _ => None,
        };
        Self {
            code: err.code().into(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            needs_new_grant: err.needs_new_grant(),
            pool_stats,
        }
    }
}

/// Success/failure wrapper around every client response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(err: &PoolgateError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody::from(err)),
        }
    }
}

impl<T> From<PoolgateResult<T>> for Envelope<T> {
    fn from(result: PoolgateResult<T>) -> Self {
        match result {
            Ok(data) => Envelope::ok(data),
            Err(err) => Envelope::failure(&err),
        }
    }
}
