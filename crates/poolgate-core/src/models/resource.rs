//! Pool resource domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PoolStatus {
    Available,
    Disabled,
    /// Held by exactly one grant (`assigned_grant` is set).
    Leased,
}

impl PoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Available => "Available",
            PoolStatus::Disabled => "Disabled",
            PoolStatus::Leased => "Leased",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Available" => Some(PoolStatus::Available),
            "Disabled" => Some(PoolStatus::Disabled),
            "Leased" => Some(PoolStatus::Leased),
            _ => None,
        }
    }
}

/// A leasable credential unit drawn from the shared pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    /// Stable unique handle, typically an email address.
    pub handle: String,
    pub display_name: String,
    /// Opaque credential payload handed to the client after checkout.
    pub credential: String,
    pub pool_status: PoolStatus,
    pub assigned_grant: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn is_held_by(&self, grant_id: Uuid) -> bool {
        self.pool_status == PoolStatus::Leased && self.assigned_grant == Some(grant_id)
    }
}

/// Fields required to add a resource to the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResource {
    pub handle: String,
    pub display_name: String,
    pub credential: String,
}

/// Administrative edit of a resource.
///
/// `status` may only move between `Available` and `Disabled`, and only
/// while the resource is not leased.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateResource {
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub credential: Option<String>,
    pub status: Option<PoolStatus>,
}

/// Filter for administrative resource listings.
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub status: Option<PoolStatus>,
    /// Substring match on handle or display name.
    pub search: Option<String>,
}

/// Per-item failure in a bulk add.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub handle: String,
    pub reason: String,
}

/// Outcome of a bulk add. One bad item never aborts the batch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BatchOutcome {
    pub created: Vec<Resource>,
    pub failed: Vec<BatchFailure>,
}
