//! SurrealDB implementation of [`AuditRepository`].
//!
//! Audit entries are append-only: the table denies UPDATE and DELETE
//! at the database level and this repository exposes no such methods.

use chrono::{DateTime, Utc};
use poolgate_core::error::PoolgateResult;
use poolgate_core::models::audit::{AuditAction, AuditEntry};
use poolgate_core::repository::{AuditRepository, PaginatedResult, Pagination};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, first_count, parse_opt_uuid, parse_uuid};
use crate::error::DbError;

/// Appends one entry inside a transaction.
///
/// Parameters: `$audit_id`, `$grant_id`, `$audit_action`,
/// `$audit_resource`, `$audit_client`, `$audit_description`, `$now`.
pub(crate) const APPEND: &str = "\
CREATE type::record('lease_audit', $audit_id) SET \
    grant_id = $grant_id, \
    action = $audit_action, \
    resource_id = $audit_resource, \
    client_identity = $audit_client, \
    description = $audit_description, \
    timestamp = $now;";

#[derive(Debug, SurrealValue)]
pub(crate) struct AuditRow {
    grant_id: String,
    action: String,
    resource_id: Option<String>,
    client_identity: Option<String>,
    description: String,
    timestamp: DateTime<Utc>,
}

impl AuditRow {
    fn into_entry(self, id: Uuid) -> Result<AuditEntry, DbError> {
        let action = AuditAction::parse(&self.action)
            .ok_or_else(|| DbError::Decode(format!("unknown audit action: {}", self.action)))?;
        Ok(AuditEntry {
            id,
            grant_id: parse_uuid(&self.grant_id, "grant")?,
            action,
            resource_id: parse_opt_uuid(self.resource_id, "resource")?,
            client_identity: self.client_identity,
            description: self.description,
            timestamp: self.timestamp,
        })
    }
}

#[derive(Debug, SurrealValue)]
struct AuditRowWithId {
    record_id: String,
    grant_id: String,
    action: String,
    resource_id: Option<String>,
    client_identity: Option<String>,
    description: String,
    timestamp: DateTime<Utc>,
}

impl AuditRowWithId {
    fn try_into_entry(self) -> Result<AuditEntry, DbError> {
        let id = parse_uuid(&self.record_id, "audit entry")?;
        AuditRow {
            grant_id: self.grant_id,
            action: self.action,
            resource_id: self.resource_id,
            client_identity: self.client_identity,
            description: self.description,
            timestamp: self.timestamp,
        }
        .into_entry(id)
    }
}

/// SurrealDB implementation of the audit trail.
#[derive(Clone)]
pub struct SurrealAuditRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAuditRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn page(
        &self,
        grant_id: Option<Uuid>,
        pagination: Pagination,
    ) -> Result<PaginatedResult<AuditEntry>, DbError> {
        let where_clause = if grant_id.is_some() {
            " WHERE grant_id = $grant_id"
        } else {
            ""
        };
        let query = format!(
            "SELECT count() AS total FROM lease_audit{where_clause} GROUP ALL; \
             SELECT meta::id(id) AS record_id, * FROM lease_audit{where_clause} \
             ORDER BY timestamp DESC LIMIT $limit START $offset;"
        );

        let mut result = self
            .db
            .query(query)
            .bind((
                "grant_id",
                grant_id.map(|id| id.to_string()).unwrap_or_default(),
            ))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await?;

        let count_rows: Vec<CountRow> = result.take(0)?;
        let rows: Vec<AuditRowWithId> = result.take(1)?;

        let items = rows
            .into_iter()
            .map(|row| row.try_into_entry())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PaginatedResult {
            items,
            total: first_count(count_rows),
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}

impl<C: Connection> AuditRepository for SurrealAuditRepository<C> {
    async fn list_for_grant(
        &self,
        grant_id: Uuid,
        pagination: Pagination,
    ) -> PoolgateResult<PaginatedResult<AuditEntry>> {
        self.page(Some(grant_id), pagination)
            .await
            .map_err(Into::into)
    }

    async fn list_recent(
        &self,
        pagination: Pagination,
    ) -> PoolgateResult<PaginatedResult<AuditEntry>> {
        self.page(None, pagination).await.map_err(Into::into)
    }
}
