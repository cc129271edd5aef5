//! SurrealDB implementation of [`GrantRepository`] (the grant registry).

use chrono::{DateTime, Utc};
use poolgate_core::error::{PoolgateError, PoolgateResult};
use poolgate_core::models::audit::AuditAction;
use poolgate_core::models::grant::{CreateGrant, Grant, GrantFilter, GrantStatus};
use poolgate_core::models::stats::GrantStats;
use poolgate_core::repository::{GrantRepository, PaginatedResult, Pagination};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;
use uuid::Uuid;

use super::{CountRow, first_count, parse_uuid};
use crate::error::DbError;
use crate::repository::audit;
use crate::txn::{self, check_errors, classify_query_error, duplicate_or};

// ---------------------------------------------------------------------------
// Transaction fragments
//
// Parameters: $grant_id, $client, $now.
// ---------------------------------------------------------------------------

/// Loads `$grant` and aborts unless `$client` may use it at `$now`.
pub(crate) const LOAD_USABLE: &str = "\
LET $grant = (SELECT * FROM type::record('access_grant', $grant_id))[0]; \
IF $grant = NONE { THROW 'poolgate:grant_missing' }; \
IF $grant.status = 'Expired' OR $grant.expire_at <= $now { \
    THROW 'poolgate:grant_expired' }; \
IF $grant.status = 'Disabled' { THROW 'poolgate:grant_disabled' }; \
IF $grant.bound_client != NONE AND $grant.bound_client != $client { \
    THROW 'poolgate:identity_mismatch' };";

/// Loads `$grant` for administrative operations; only existence matters.
pub(crate) const LOAD_EXISTING: &str = "\
LET $grant = (SELECT * FROM type::record('access_grant', $grant_id))[0]; \
IF $grant = NONE { THROW 'poolgate:grant_missing' };";

/// Binds `$client` on first use and refreshes `last_used_at`.
pub(crate) const BIND_CLIENT: &str = "\
UPDATE type::record('access_grant', $grant_id) SET \
    bound_client = $client, \
    bound_at = bound_at ?? $now, \
    last_used_at = $now, \
    updated_at = $now;";

/// consumeOne: requires spare capacity, then increments usage. Runs
/// after [`LOAD_USABLE`], so `$grant` is the row read under this
/// transaction.
pub(crate) const CONSUME_ONE: &str = "\
IF $grant.used_resources >= $grant.max_resources { \
    THROW 'poolgate:capacity_exhausted' }; \
UPDATE type::record('access_grant', $grant_id) SET \
    used_resources += 1, \
    bound_client = $client, \
    bound_at = bound_at ?? $now, \
    last_used_at = $now, \
    updated_at = $now;";

pub(crate) const RESET_USAGE: &str = "\
UPDATE type::record('access_grant', $grant_id) SET \
    used_resources = 0, updated_at = $now;";

pub(crate) const RESET_BINDING: &str = "\
UPDATE type::record('access_grant', $grant_id) SET \
    bound_client = NONE, bound_at = NONE, updated_at = $now;";

pub(crate) const DELETE: &str = "DELETE type::record('access_grant', $grant_id);";

/// Flips the status to `Expired` once, and only if due.
const MARK_EXPIRED: &str = "\
LET $flipped = (UPDATE type::record('access_grant', $grant_id) SET \
    status = 'Expired', updated_at = $now \
    WHERE status != 'Expired' AND expire_at <= $now RETURN AFTER); \
IF array::len($flipped) > 0 {";

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
pub(crate) struct GrantRow {
    token: String,
    max_resources: u32,
    used_resources: u32,
    expire_at: DateTime<Utc>,
    status: String,
    bound_client: Option<String>,
    bound_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GrantRow {
    pub(crate) fn into_grant(self, id: Uuid) -> Result<Grant, DbError> {
        let status = GrantStatus::parse(&self.status)
            .ok_or_else(|| DbError::Decode(format!("unknown grant status: {}", self.status)))?;
        Ok(Grant {
            id,
            token: self.token,
            max_resources: self.max_resources,
            used_resources: self.used_resources,
            expire_at: self.expire_at,
            status,
            bound_client: self.bound_client,
            bound_at: self.bound_at,
            last_used_at: self.last_used_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct GrantRowWithId {
    record_id: String,
    token: String,
    max_resources: u32,
    used_resources: u32,
    expire_at: DateTime<Utc>,
    status: String,
    bound_client: Option<String>,
    bound_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GrantRowWithId {
    fn try_into_grant(self) -> Result<Grant, DbError> {
        let id = parse_uuid(&self.record_id, "grant")?;
        GrantRow {
            token: self.token,
            max_resources: self.max_resources,
            used_resources: self.used_resources,
            expire_at: self.expire_at,
            status: self.status,
            bound_client: self.bound_client,
            bound_at: self.bound_at,
            last_used_at: self.last_used_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_grant(id)
    }
}

/// Reads one grant by id.
pub(crate) async fn fetch<C: Connection>(db: &Surreal<C>, id: Uuid) -> Result<Grant, DbError> {
    let id_str = id.to_string();

    let mut result = db
        .query("SELECT * FROM type::record('access_grant', $id)")
        .bind(("id", id_str.clone()))
        .await?;

    let rows: Vec<GrantRow> = result.take(0)?;
    let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
        entity: "grant".into(),
        id: id_str,
    })?;

    row.into_grant(id)
}

/// WHERE clause selecting grants whose effective status is `status`.
fn status_condition(status: GrantStatus) -> &'static str {
    match status {
        GrantStatus::Active => "(status = 'Active' AND expire_at > $now)",
        GrantStatus::Disabled => "(status = 'Disabled' AND expire_at > $now)",
        GrantStatus::Expired => "(status = 'Expired' OR expire_at <= $now)",
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// SurrealDB implementation of the grant registry.
#[derive(Clone)]
pub struct SurrealGrantRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealGrantRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> GrantRepository for SurrealGrantRepository<C> {
    async fn create(&self, input: CreateGrant) -> PoolgateResult<Grant> {
        if input.max_resources == 0 {
            return Err(PoolgateError::Validation {
                message: "max_resources must be at least 1".into(),
            });
        }

        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "CREATE type::record('access_grant', $id) SET \
                 token = $grant_token, \
                 max_resources = $max_resources, \
                 used_resources = 0, \
                 expire_at = $expire_at, \
                 status = 'Active'",
            )
            .bind(("id", id_str.clone()))
            .bind(("grant_token", input.token))
            .bind(("max_resources", input.max_resources))
            .bind(("expire_at", input.expire_at))
            .await
            .map_err(DbError::from)?;

        check_errors(result.take_errors()).map_err(|e| duplicate_or("grant", e))?;

        let rows: Vec<GrantRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "grant".into(),
            id: id_str,
        })?;

        row.into_grant(id).map_err(Into::into)
    }

    async fn get_by_id(&self, id: Uuid) -> PoolgateResult<Grant> {
        fetch(&self.db, id).await.map_err(Into::into)
    }

    async fn get_by_token(&self, token: &str) -> PoolgateResult<Grant> {
        let token_owned = token.to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM access_grant \
                 WHERE token = $grant_token",
            )
            .bind(("grant_token", token_owned.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GrantRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "grant".into(),
            id: format!("token={token_owned}"),
        })?;

        row.try_into_grant().map_err(Into::into)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: GrantStatus,
        now: DateTime<Utc>,
    ) -> PoolgateResult<Grant> {
        if status == GrantStatus::Expired {
            return Err(PoolgateError::Validation {
                message: "expiry is derived from expire_at and cannot be set".into(),
            });
        }

        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "UPDATE type::record('access_grant', $id) SET \
                 status = $status, updated_at = $now",
            )
            .bind(("id", id_str.clone()))
            .bind(("status", status.as_str().to_string()))
            .bind(("now", now))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<GrantRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "grant".into(),
            id: id_str,
        })?;

        info!(grant_id = %id, status = status.as_str(), "Grant status changed");
        row.into_grant(id).map_err(Into::into)
    }

    async fn mark_expired(
        &self,
        id: Uuid,
        client_identity: Option<&str>,
        now: DateTime<Utc>,
    ) -> PoolgateResult<bool> {
        let audit_id = Uuid::new_v4().to_string();
        let flip_and_audit = format!("{MARK_EXPIRED} {} }};", audit::APPEND);
        let script = txn::transaction(&[&flip_and_audit]);

        let mut result = self
            .db
            .query(script)
            .bind(("grant_id", id.to_string()))
            .bind(("now", now))
            .bind(("audit_id", audit_id.clone()))
            .bind(("audit_action", AuditAction::Expire.as_str().to_string()))
            .bind(("audit_resource", None::<String>))
            .bind(("audit_client", client_identity.map(str::to_string)))
            .bind(("audit_description", "grant expired".to_string()))
            .await
            .map_err(classify_query_error)?;
        check_errors(result.take_errors())?;

        // The audit row exists only if this call performed the flip.
        let mut check = self
            .db
            .query("SELECT * FROM type::record('lease_audit', $audit_id)")
            .bind(("audit_id", audit_id))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<audit::AuditRow> = check.take(0).map_err(DbError::from)?;
        let flipped = !rows.is_empty();

        if flipped {
            info!(grant_id = %id, "Grant expired");
        }
        Ok(flipped)
    }

    async fn list(
        &self,
        filter: GrantFilter,
        now: DateTime<Utc>,
        pagination: Pagination,
    ) -> PoolgateResult<PaginatedResult<Grant>> {
        let mut conditions = Vec::new();
        if let Some(status) = filter.status {
            conditions.push(status_condition(status));
        }
        if filter.search.is_some() {
            conditions.push("string::contains(token, $search)");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT count() AS total FROM access_grant{where_clause} GROUP ALL; \
             SELECT meta::id(id) AS record_id, * FROM access_grant{where_clause} \
             ORDER BY created_at DESC LIMIT $limit START $offset;"
        );

        let mut result = self
            .db
            .query(query)
            .bind(("now", now))
            .bind(("search", filter.search.unwrap_or_default()))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let count_rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        let rows: Vec<GrantRowWithId> = result.take(1).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(|row| row.try_into_grant())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total: first_count(count_rows),
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn stats(&self, now: DateTime<Utc>) -> PoolgateResult<GrantStats> {
        let query = format!(
            "SELECT count() AS total FROM access_grant GROUP ALL; \
             SELECT count() AS total FROM access_grant WHERE {} GROUP ALL; \
             SELECT count() AS total FROM access_grant WHERE {} GROUP ALL; \
             SELECT count() AS total FROM access_grant WHERE {} GROUP ALL;",
            status_condition(GrantStatus::Active),
            status_condition(GrantStatus::Disabled),
            status_condition(GrantStatus::Expired),
        );

        let mut result = self
            .db
            .query(query)
            .bind(("now", now))
            .await
            .map_err(DbError::from)?;

        let total: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        let active: Vec<CountRow> = result.take(1).map_err(DbError::from)?;
        let disabled: Vec<CountRow> = result.take(2).map_err(DbError::from)?;
        let expired: Vec<CountRow> = result.take(3).map_err(DbError::from)?;

        Ok(GrantStats {
            total: first_count(total),
            active: first_count(active),
            disabled: first_count(disabled),
            expired: first_count(expired),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_status_conditions_partition_grants() {
        // Every grant matches exactly one of the three conditions: the
        // expired branch claims everything past expire_at.
        assert!(status_condition(GrantStatus::Active).contains("expire_at > $now"));
        assert!(status_condition(GrantStatus::Disabled).contains("expire_at > $now"));
        assert!(status_condition(GrantStatus::Expired).contains("expire_at <= $now"));
    }

    #[test]
    fn usable_check_order_matches_registry_contract() {
        let missing = LOAD_USABLE.find("grant_missing").unwrap();
        let expired = LOAD_USABLE.find("grant_expired").unwrap();
        let disabled = LOAD_USABLE.find("grant_disabled").unwrap();
        let mismatch = LOAD_USABLE.find("identity_mismatch").unwrap();
        assert!(missing < expired && expired < disabled && disabled < mismatch);
    }

    #[test]
    fn consume_checks_capacity_before_incrementing() {
        let check = CONSUME_ONE.find("capacity_exhausted").unwrap();
        let bump = CONSUME_ONE.find("used_resources += 1").unwrap();
        assert!(check < bump);
    }
}
