//! SurrealDB implementation of [`ResourceRepository`] (the resource pool).

use chrono::{DateTime, Utc};
use poolgate_core::error::{PoolgateError, PoolgateResult};
use poolgate_core::models::resource::{
    CreateResource, PoolStatus, Resource, ResourceFilter, UpdateResource,
};
use poolgate_core::models::stats::PoolStats;
use poolgate_core::repository::{PaginatedResult, Pagination, ResourceRepository};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use uuid::Uuid;

use super::{CountRow, IdRow, first_count, parse_opt_uuid, parse_uuid};
use crate::error::DbError;
use crate::txn::{self, check_errors, classify_query_error, duplicate_or};

// ---------------------------------------------------------------------------
// Transaction fragments
//
// Parameters: $resource_id, $grant_id, $now.
// ---------------------------------------------------------------------------

/// Flips the candidate to `Leased`, aborting if another checkout got it
/// first. The read happens under the transaction, so the engine's
/// conflict detection covers the check and the write together.
pub(crate) const CHECKOUT_ONE: &str = "\
LET $candidate = (SELECT * FROM type::record('pool_resource', $resource_id))[0]; \
IF $candidate = NONE OR $candidate.pool_status != 'Available' { \
    THROW 'poolgate:resource_taken' }; \
UPDATE type::record('pool_resource', $resource_id) SET \
    pool_status = 'Leased', \
    assigned_grant = $grant_id, \
    assigned_at = $now, \
    last_used_at = $now, \
    updated_at = $now;";

/// Idempotent: an available or disabled resource is left as is.
pub(crate) const RELEASE_ONE: &str = "\
UPDATE type::record('pool_resource', $resource_id) SET \
    pool_status = 'Available', \
    assigned_grant = NONE, \
    assigned_at = NONE, \
    updated_at = $now \
    WHERE pool_status = 'Leased';";

pub(crate) const RELEASE_ALL_FOR: &str = "\
UPDATE pool_resource SET \
    pool_status = 'Available', \
    assigned_grant = NONE, \
    assigned_at = NONE, \
    updated_at = $now \
    WHERE assigned_grant = $grant_id AND pool_status = 'Leased';";

/// Releases the resources named in `$resource_ids`.
pub(crate) const RELEASE_LISTED: &str = "\
UPDATE pool_resource SET \
    pool_status = 'Available', \
    assigned_grant = NONE, \
    assigned_at = NONE, \
    updated_at = $now \
    WHERE pool_status = 'Leased' AND meta::id(id) IN $resource_ids;";

pub(crate) const DELETE_ONE: &str = "\
LET $doomed = (SELECT * FROM type::record('pool_resource', $resource_id))[0]; \
IF $doomed = NONE { THROW 'poolgate:resource_missing' }; \
DELETE type::record('pool_resource', $resource_id);";

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, SurrealValue)]
struct ResourceRow {
    handle: String,
    display_name: String,
    credential: String,
    pool_status: String,
    assigned_grant: Option<String>,
    assigned_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResourceRow {
    fn into_resource(self, id: Uuid) -> Result<Resource, DbError> {
        let pool_status = PoolStatus::parse(&self.pool_status).ok_or_else(|| {
            DbError::Decode(format!("unknown pool status: {}", self.pool_status))
        })?;
        Ok(Resource {
            id,
            handle: self.handle,
            display_name: self.display_name,
            credential: self.credential,
            pool_status,
            assigned_grant: parse_opt_uuid(self.assigned_grant, "grant")?,
            assigned_at: self.assigned_at,
            last_used_at: self.last_used_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct ResourceRowWithId {
    record_id: String,
    handle: String,
    display_name: String,
    credential: String,
    pool_status: String,
    assigned_grant: Option<String>,
    assigned_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResourceRowWithId {
    fn try_into_resource(self) -> Result<Resource, DbError> {
        let id = parse_uuid(&self.record_id, "resource")?;
        ResourceRow {
            handle: self.handle,
            display_name: self.display_name,
            credential: self.credential,
            pool_status: self.pool_status,
            assigned_grant: self.assigned_grant,
            assigned_at: self.assigned_at,
            last_used_at: self.last_used_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_resource(id)
    }
}

/// Reads one resource by id.
pub(crate) async fn fetch<C: Connection>(
    db: &Surreal<C>,
    id: Uuid,
) -> Result<Resource, DbError> {
    let id_str = id.to_string();

    let mut result = db
        .query("SELECT * FROM type::record('pool_resource', $id)")
        .bind(("id", id_str.clone()))
        .await?;

    let rows: Vec<ResourceRow> = result.take(0)?;
    let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
        entity: "resource".into(),
        id: id_str,
    })?;

    row.into_resource(id)
}

/// Ids of every leased resource, optionally only those held by one grant.
pub(crate) async fn leased_ids<C: Connection>(
    db: &Surreal<C>,
    grant_id: Option<Uuid>,
) -> Result<Vec<String>, DbError> {
    let query = if grant_id.is_some() {
        "SELECT meta::id(id) AS record_id FROM pool_resource \
         WHERE pool_status = 'Leased' AND assigned_grant = $grant_id"
    } else {
        "SELECT meta::id(id) AS record_id FROM pool_resource \
         WHERE pool_status = 'Leased'"
    };

    let mut result = db
        .query(query)
        .bind((
            "grant_id",
            grant_id.map(|id| id.to_string()).unwrap_or_default(),
        ))
        .await?;

    let rows: Vec<IdRow> = result.take(0)?;
    Ok(rows.into_iter().map(|r| r.record_id).collect())
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// SurrealDB implementation of the resource pool.
#[derive(Clone)]
pub struct SurrealResourceRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealResourceRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> ResourceRepository for SurrealResourceRepository<C> {
    async fn create(&self, input: CreateResource) -> PoolgateResult<Resource> {
        if input.handle.trim().is_empty() {
            return Err(PoolgateError::Validation {
                message: "resource handle must not be empty".into(),
            });
        }

        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "CREATE type::record('pool_resource', $id) SET \
                 handle = $handle, \
                 display_name = $display_name, \
                 credential = $credential, \
                 pool_status = 'Available'",
            )
            .bind(("id", id_str.clone()))
            .bind(("handle", input.handle))
            .bind(("display_name", input.display_name))
            .bind(("credential", input.credential))
            .await
            .map_err(DbError::from)?;

        check_errors(result.take_errors()).map_err(|e| duplicate_or("resource", e))?;

        let rows: Vec<ResourceRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "resource".into(),
            id: id_str,
        })?;

        row.into_resource(id).map_err(Into::into)
    }

    async fn get_by_id(&self, id: Uuid) -> PoolgateResult<Resource> {
        fetch(&self.db, id).await.map_err(Into::into)
    }

    async fn update(&self, id: Uuid, input: UpdateResource) -> PoolgateResult<Resource> {
        if input.status == Some(PoolStatus::Leased) {
            return Err(PoolgateError::Validation {
                message: "resources are leased only through checkout".into(),
            });
        }

        let mut sets = Vec::new();
        if input.handle.is_some() {
            sets.push("handle = $handle");
        }
        if input.display_name.is_some() {
            sets.push("display_name = $display_name");
        }
        if input.credential.is_some() {
            sets.push("credential = $credential");
        }
        if input.status.is_some() {
            sets.push("pool_status = $pool_status");
        }
        sets.push("updated_at = time::now()");

        let guard = if input.status.is_some() {
            "IF $current.pool_status = 'Leased' { THROW 'poolgate:resource_leased' };"
        } else {
            ""
        };
        let body = format!(
            "LET $current = (SELECT * FROM type::record('pool_resource', $id))[0]; \
             IF $current = NONE {{ THROW 'poolgate:resource_missing' }}; \
             {guard} \
             UPDATE type::record('pool_resource', $id) SET {};",
            sets.join(", ")
        );
        let script = txn::transaction(&[&body]);

        let mut builder = self.db.query(script).bind(("id", id.to_string()));
        if let Some(handle) = input.handle {
            builder = builder.bind(("handle", handle));
        }
        if let Some(display_name) = input.display_name {
            builder = builder.bind(("display_name", display_name));
        }
        if let Some(credential) = input.credential {
            builder = builder.bind(("credential", credential));
        }
        if let Some(status) = input.status {
            builder = builder.bind(("pool_status", status.as_str().to_string()));
        }

        let mut result = builder.await.map_err(classify_query_error)?;
        check_errors(result.take_errors()).map_err(|e| match duplicate_or("resource", e) {
            DbError::Aborted(txn::Abort::ResourceMissing) => DbError::NotFound {
                entity: "resource".into(),
                id: id.to_string(),
            },
            other => other,
        })?;

        debug!(resource_id = %id, "Resource updated");
        fetch(&self.db, id).await.map_err(Into::into)
    }

    async fn list(
        &self,
        filter: ResourceFilter,
        pagination: Pagination,
    ) -> PoolgateResult<PaginatedResult<Resource>> {
        let mut conditions = Vec::new();
        if filter.status.is_some() {
            conditions.push("pool_status = $pool_status");
        }
        if filter.search.is_some() {
            conditions.push(
                "(string::contains(handle, $search) OR string::contains(display_name, $search))",
            );
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT count() AS total FROM pool_resource{where_clause} GROUP ALL; \
             SELECT meta::id(id) AS record_id, * FROM pool_resource{where_clause} \
             ORDER BY created_at DESC LIMIT $limit START $offset;"
        );

        let mut result = self
            .db
            .query(query)
            .bind((
                "pool_status",
                filter
                    .status
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
            ))
            .bind(("search", filter.search.unwrap_or_default()))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let count_rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        let rows: Vec<ResourceRowWithId> = result.take(1).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(|row| row.try_into_resource())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total: first_count(count_rows),
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn list_leased_to(&self, grant_id: Uuid) -> PoolgateResult<Vec<Resource>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM pool_resource \
                 WHERE assigned_grant = $grant_id AND pool_status = 'Leased' \
                 ORDER BY assigned_at ASC",
            )
            .bind(("grant_id", grant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ResourceRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|row| row.try_into_resource().map_err(Into::into))
            .collect()
    }

    async fn pick_available(&self) -> PoolgateResult<Option<Uuid>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id FROM pool_resource \
                 WHERE pool_status = 'Available' ORDER BY RAND() LIMIT 1",
            )
            .await
            .map_err(DbError::from)?;

        let rows: Vec<IdRow> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(parse_uuid(&row.record_id, "resource")?)),
            None => Ok(None),
        }
    }

    async fn stats(&self) -> PoolgateResult<PoolStats> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM pool_resource GROUP ALL; \
                 SELECT count() AS total FROM pool_resource \
                 WHERE pool_status = 'Available' GROUP ALL; \
                 SELECT count() AS total FROM pool_resource \
                 WHERE pool_status = 'Leased' GROUP ALL; \
                 SELECT count() AS total FROM pool_resource \
                 WHERE pool_status = 'Disabled' GROUP ALL;",
            )
            .await
            .map_err(DbError::from)?;

        let total: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        let available: Vec<CountRow> = result.take(1).map_err(DbError::from)?;
        let leased: Vec<CountRow> = result.take(2).map_err(DbError::from)?;
        let disabled: Vec<CountRow> = result.take(3).map_err(DbError::from)?;

        Ok(PoolStats {
            total: first_count(total),
            available: first_count(available),
            leased: first_count(leased),
            disabled: first_count(disabled),
        })
    }
}
