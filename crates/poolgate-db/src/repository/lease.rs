//! SurrealDB implementation of [`LeaseRepository`] (the lease tracker).
//!
//! A lease is keyed by (grant, client identity). The record id is a
//! digest of that pair so transaction fragments can UPSERT it directly
//! without a lookup.

use chrono::{DateTime, Utc};
use poolgate_core::error::PoolgateResult;
use poolgate_core::models::lease::Lease;
use poolgate_core::repository::LeaseRepository;
use sha2::{Digest, Sha256};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{parse_opt_uuid, parse_uuid};
use crate::error::DbError;

/// Record id of the lease for (grant, client identity).
pub fn lease_key(grant_id: Uuid, client_identity: &str) -> String {
    let digest = Sha256::digest(format!("{grant_id}:{client_identity}").as_bytes());
    hex::encode(digest)
}

// Parameters: $lease_id, $grant_id, $client, $now, and $resource_id where
// a resource is involved.

/// Creates the lease if missing and refreshes `last_check_at`.
pub(crate) const ENSURE: &str = "\
UPSERT type::record('lease', $lease_id) SET \
    grant_id = $grant_id, \
    client_identity = $client, \
    first_bound_at = first_bound_at ?? $now, \
    last_check_at = $now;";

/// Points the lease at the freshly checked-out resource.
pub(crate) const RECORD_CHECKOUT: &str = "\
UPSERT type::record('lease', $lease_id) SET \
    grant_id = $grant_id, \
    client_identity = $client, \
    active_resource = $resource_id, \
    first_bound_at = first_bound_at ?? $now, \
    last_check_at = $now;";

/// Switches the active resource to one the grant already holds.
pub(crate) const REBIND: &str = "\
LET $target = (SELECT * FROM type::record('pool_resource', $resource_id))[0]; \
IF $target = NONE { THROW 'poolgate:resource_missing' }; \
IF $target.pool_status != 'Leased' OR $target.assigned_grant != $grant_id { \
    THROW 'poolgate:not_owned' }; \
UPSERT type::record('lease', $lease_id) SET \
    grant_id = $grant_id, \
    client_identity = $client, \
    active_resource = $resource_id, \
    first_bound_at = first_bound_at ?? $now, \
    last_check_at = $now;";

pub(crate) const CLEAR_FOR_GRANT: &str = "DELETE lease WHERE grant_id = $grant_id;";

pub(crate) const CLEAR_ACTIVE_FOR_RESOURCE: &str = "\
UPDATE lease SET active_resource = NONE WHERE active_resource = $resource_id;";

pub(crate) const CLEAR_ACTIVE_LISTED: &str = "\
UPDATE lease SET active_resource = NONE WHERE active_resource IN $resource_ids;";

#[derive(Debug, SurrealValue)]
struct LeaseRow {
    grant_id: String,
    client_identity: String,
    active_resource: Option<String>,
    first_bound_at: DateTime<Utc>,
    last_check_at: DateTime<Utc>,
}

impl LeaseRow {
    fn try_into_lease(self) -> Result<Lease, DbError> {
        Ok(Lease {
            grant_id: parse_uuid(&self.grant_id, "grant")?,
            client_identity: self.client_identity,
            active_resource: parse_opt_uuid(self.active_resource, "resource")?,
            first_bound_at: self.first_bound_at,
            last_check_at: self.last_check_at,
        })
    }
}

/// SurrealDB implementation of the lease tracker.
#[derive(Clone)]
pub struct SurrealLeaseRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealLeaseRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> LeaseRepository for SurrealLeaseRepository<C> {
    async fn get(&self, grant_id: Uuid, client_identity: &str) -> PoolgateResult<Option<Lease>> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('lease', $lease_id)")
            .bind(("lease_id", lease_key(grant_id, client_identity)))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<LeaseRow> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.try_into_lease()?)),
            None => Ok(None),
        }
    }

    async fn list_for_grant(&self, grant_id: Uuid) -> PoolgateResult<Vec<Lease>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM lease WHERE grant_id = $grant_id \
                 ORDER BY first_bound_at ASC",
            )
            .bind(("grant_id", grant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<LeaseRow> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|row| row.try_into_lease().map_err(Into::into))
            .collect()
    }
}
