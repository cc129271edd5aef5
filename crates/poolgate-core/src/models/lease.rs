//! Lease domain model: which of a grant's resources a client treats as
//! current.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per (grant, client identity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub grant_id: Uuid,
    pub client_identity: String,
    /// Always one of the resources assigned to `grant_id`, if set.
    pub active_resource: Option<Uuid>,
    pub first_bound_at: DateTime<Utc>,
    pub last_check_at: DateTime<Utc>,
}
