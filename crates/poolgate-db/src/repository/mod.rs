//! SurrealDB repository implementations.
//!
//! Each owner module (`grant`, `resource`, `lease`, `audit`) is the only
//! place that writes statements against its own table. Besides its
//! repository it exports the statement fragments that
//! [`SurrealAllocationStore`] stitches into cross-owner transactions.

mod allocation;
mod audit;
mod grant;
mod lease;
mod resource;

pub use allocation::SurrealAllocationStore;
pub use audit::SurrealAuditRepository;
pub use grant::SurrealGrantRepository;
pub use lease::{SurrealLeaseRepository, lease_key};
pub use resource::SurrealResourceRepository;

use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

#[derive(Debug, SurrealValue)]
struct IdRow {
    record_id: String,
}

fn parse_uuid(value: &str, what: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(value).map_err(|e| DbError::Decode(format!("invalid {what} UUID: {e}")))
}

fn parse_opt_uuid(value: Option<String>, what: &str) -> Result<Option<Uuid>, DbError> {
    value.map(|v| parse_uuid(&v, what)).transpose()
}

/// First `total` of a `count() ... GROUP ALL` statement, zero when the
/// table is empty.
fn first_count(rows: Vec<CountRow>) -> u64 {
    rows.first().map(|r| r.total).unwrap_or(0)
}
