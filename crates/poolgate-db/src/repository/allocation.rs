//! Cross-owner units of work.
//!
//! Each method stitches the statement fragments exported by the owner
//! modules into one `BEGIN … COMMIT` script, so every owner's mutation
//! commits together or not at all. Results are read back with plain
//! queries once the transaction has committed.

use chrono::{DateTime, Utc};
use poolgate_core::error::{PoolgateError, PoolgateResult};
use poolgate_core::models::audit::AuditAction;
use poolgate_core::models::grant::Grant;
use poolgate_core::models::resource::{PoolStatus, Resource};
use poolgate_core::repository::{AllocationStore, CheckoutRequest};
use surrealdb::{Connection, Surreal};
use tracing::{debug, info};
use uuid::Uuid;

use super::{audit, grant, lease, resource};
use crate::error::DbError;
use crate::txn::{self, Abort, check_errors, classify_query_error};

/// Values bound into a transaction script. Every fragment draws from
/// the same parameter names, so one binding routine serves them all.
struct Params {
    grant_id: Option<Uuid>,
    client: Option<String>,
    resource_id: Option<Uuid>,
    resource_ids: Vec<String>,
    now: DateTime<Utc>,
    audit: Option<(AuditAction, String)>,
}

impl Params {
    fn at(now: DateTime<Utc>) -> Self {
        Self {
            grant_id: None,
            client: None,
            resource_id: None,
            resource_ids: Vec::new(),
            now,
            audit: None,
        }
    }

    fn grant(mut self, id: Uuid) -> Self {
        self.grant_id = Some(id);
        self
    }

    fn client(mut self, client: &str) -> Self {
        self.client = Some(client.to_string());
        self
    }

    fn resource(mut self, id: Uuid) -> Self {
        self.resource_id = Some(id);
        self
    }

    fn audited(mut self, action: AuditAction, description: impl Into<String>) -> Self {
        self.audit = Some((action, description.into()));
        self
    }

    fn lease_id(&self) -> String {
        match (self.grant_id, &self.client) {
            (Some(grant_id), Some(client)) => lease::lease_key(grant_id, client),
            _ => String::new(),
        }
    }
}

/// SurrealDB implementation of [`AllocationStore`].
#[derive(Clone)]
pub struct SurrealAllocationStore<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAllocationStore<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn execute(&self, fragments: &[&str], params: Params) -> Result<(), DbError> {
        let lease_id = params.lease_id();
        let (audit_action, audit_description) = match params.audit {
            Some((action, description)) => (action.as_str().to_string(), description),
            None => (String::new(), String::new()),
        };
        let script = txn::transaction(fragments);

        let mut result = self
            .db
            .query(script)
            .bind((
                "grant_id",
                params.grant_id.map(|id| id.to_string()).unwrap_or_default(),
            ))
            .bind(("client", params.client.clone()))
            .bind(("lease_id", lease_id))
            .bind(("resource_id", params.resource_id.map(|id| id.to_string())))
            .bind(("resource_ids", params.resource_ids))
            .bind(("now", params.now))
            .bind(("audit_id", Uuid::new_v4().to_string()))
            .bind(("audit_action", audit_action))
            .bind(("audit_resource", params.resource_id.map(|id| id.to_string())))
            .bind(("audit_client", params.client))
            .bind(("audit_description", audit_description))
            .await
            .map_err(classify_query_error)?;

        check_errors(result.take_errors())
    }

    /// Turns a transaction failure into the domain error, filling in the
    /// ids the abort marker cannot carry.
    async fn explain(
        &self,
        err: DbError,
        grant_id: Option<Uuid>,
        resource_id: Option<Uuid>,
    ) -> PoolgateError {
        let id_of = |id: Option<Uuid>| id.map(|i| i.to_string()).unwrap_or_default();
        match err {
            DbError::Aborted(Abort::GrantMissing) => PoolgateError::NotFound {
                entity: "grant".into(),
                id: id_of(grant_id),
            },
            DbError::Aborted(Abort::ResourceMissing) => PoolgateError::NotFound {
                entity: "resource".into(),
                id: id_of(resource_id),
            },
            DbError::Aborted(Abort::NotOwned) => PoolgateError::NotOwned {
                resource_id: id_of(resource_id),
            },
            DbError::Aborted(Abort::CapacityExhausted) => {
                let max_resources = match grant_id {
                    Some(id) => grant::fetch(&self.db, id)
                        .await
                        .map(|g| g.max_resources)
                        .unwrap_or(0),
                    None => 0,
                };
                PoolgateError::CapacityExhausted { max_resources }
            }
            other => other.into(),
        }
    }
}

impl<C: Connection> AllocationStore for SurrealAllocationStore<C> {
    async fn authorize(
        &self,
        grant_id: Uuid,
        client_identity: &str,
        now: DateTime<Utc>,
        record_validate: bool,
    ) -> PoolgateResult<Grant> {
        let mut fragments = vec![grant::LOAD_USABLE, grant::BIND_CLIENT, lease::ENSURE];
        let mut params = Params::at(now).grant(grant_id).client(client_identity);
        if record_validate {
            fragments.push(audit::APPEND);
            params = params.audited(AuditAction::Validate, "grant validated");
        }

        if let Err(e) = self.execute(&fragments, params).await {
            return Err(self.explain(e, Some(grant_id), None).await);
        }

        grant::fetch(&self.db, grant_id).await.map_err(Into::into)
    }

    async fn checkout(&self, request: CheckoutRequest) -> PoolgateResult<Resource> {
        let CheckoutRequest {
            grant_id,
            client_identity,
            resource_id,
            now,
        } = request;

        let params = Params::at(now)
            .grant(grant_id)
            .client(&client_identity)
            .resource(resource_id)
            .audited(AuditAction::Checkout, "resource checked out");
        let outcome = self
            .execute(
                &[
                    grant::LOAD_USABLE,
                    grant::CONSUME_ONE,
                    resource::CHECKOUT_ONE,
                    lease::RECORD_CHECKOUT,
                    audit::APPEND,
                ],
                params,
            )
            .await;
        if let Err(e) = outcome {
            debug!(grant_id = %grant_id, resource_id = %resource_id, error = %e, "Checkout attempt failed");
            return Err(self.explain(e, Some(grant_id), Some(resource_id)).await);
        }

        info!(
            grant_id = %grant_id,
            resource_id = %resource_id,
            client = %client_identity,
            "Resource checked out"
        );
        resource::fetch(&self.db, resource_id)
            .await
            .map_err(Into::into)
    }

    async fn rebind(
        &self,
        grant_id: Uuid,
        client_identity: &str,
        resource_id: Uuid,
        now: DateTime<Utc>,
    ) -> PoolgateResult<Resource> {
        let params = Params::at(now)
            .grant(grant_id)
            .client(client_identity)
            .resource(resource_id)
            .audited(AuditAction::Rebind, "active resource switched");
        let outcome = self
            .execute(
                &[
                    grant::LOAD_USABLE,
                    grant::BIND_CLIENT,
                    lease::REBIND,
                    audit::APPEND,
                ],
                params,
            )
            .await;
        if let Err(e) = outcome {
            return Err(self.explain(e, Some(grant_id), Some(resource_id)).await);
        }

        debug!(grant_id = %grant_id, resource_id = %resource_id, "Lease rebound");
        resource::fetch(&self.db, resource_id)
            .await
            .map_err(Into::into)
    }

    async fn release_grant(&self, grant_id: Uuid, now: DateTime<Utc>) -> PoolgateResult<u64> {
        let held = resource::leased_ids(&self.db, Some(grant_id)).await?;

        let outcome = self
            .execute(
                &[
                    grant::LOAD_EXISTING,
                    resource::RELEASE_ALL_FOR,
                    grant::RESET_USAGE,
                    lease::CLEAR_FOR_GRANT,
                ],
                Params::at(now).grant(grant_id),
            )
            .await;
        if let Err(e) = outcome {
            return Err(self.explain(e, Some(grant_id), None).await);
        }

        info!(grant_id = %grant_id, released = held.len(), "Grant released");
        Ok(held.len() as u64)
    }

    async fn release_resource(&self, resource_id: Uuid, now: DateTime<Utc>) -> PoolgateResult<bool> {
        let current = resource::fetch(&self.db, resource_id).await?;
        let was_leased = current.pool_status == PoolStatus::Leased;

        self.execute(
            &[resource::RELEASE_ONE, lease::CLEAR_ACTIVE_FOR_RESOURCE],
            Params::at(now).resource(resource_id),
        )
        .await?;

        if was_leased {
            info!(resource_id = %resource_id, "Resource released");
        }
        Ok(was_leased)
    }

    async fn release_all_leased(&self, now: DateTime<Utc>) -> PoolgateResult<u64> {
        let leased = resource::leased_ids(&self.db, None).await?;
        if leased.is_empty() {
            return Ok(0);
        }
        let count = leased.len() as u64;

        let mut params = Params::at(now);
        params.resource_ids = leased;
        self.execute(
            &[resource::RELEASE_LISTED, lease::CLEAR_ACTIVE_LISTED],
            params,
        )
        .await?;

        info!(released = count, "All leased resources released");
        Ok(count)
    }

    async fn reset_binding(&self, grant_id: Uuid, now: DateTime<Utc>) -> PoolgateResult<Grant> {
        let outcome = self
            .execute(
                &[
                    grant::LOAD_EXISTING,
                    grant::RESET_BINDING,
                    lease::CLEAR_FOR_GRANT,
                ],
                Params::at(now).grant(grant_id),
            )
            .await;
        if let Err(e) = outcome {
            return Err(self.explain(e, Some(grant_id), None).await);
        }

        info!(grant_id = %grant_id, "Grant binding reset");
        grant::fetch(&self.db, grant_id).await.map_err(Into::into)
    }

    async fn delete_grant(&self, grant_id: Uuid, now: DateTime<Utc>) -> PoolgateResult<()> {
        let outcome = self
            .execute(
                &[
                    grant::LOAD_EXISTING,
                    resource::RELEASE_ALL_FOR,
                    lease::CLEAR_FOR_GRANT,
                    grant::DELETE,
                ],
                Params::at(now).grant(grant_id),
            )
            .await;
        if let Err(e) = outcome {
            return Err(self.explain(e, Some(grant_id), None).await);
        }

        info!(grant_id = %grant_id, "Grant deleted");
        Ok(())
    }

    async fn delete_resource(&self, resource_id: Uuid) -> PoolgateResult<()> {
        let outcome = self
            .execute(
                &[lease::CLEAR_ACTIVE_FOR_RESOURCE, resource::DELETE_ONE],
                Params::at(Utc::now()).resource(resource_id),
            )
            .await;
        if let Err(e) = outcome {
            return Err(self.explain(e, None, Some(resource_id)).await);
        }

        info!(resource_id = %resource_id, "Resource deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_id_needs_grant_and_client() {
        let now = Utc::now();
        let grant_id = Uuid::new_v4();
        assert!(Params::at(now).grant(grant_id).lease_id().is_empty());
        assert_eq!(
            Params::at(now).grant(grant_id).client("host").lease_id(),
            lease::lease_key(grant_id, "host")
        );
    }
}
