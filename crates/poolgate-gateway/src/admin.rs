//! Administrative service: grant issuance, pool maintenance and the
//! read-only views consumed by dashboards.

use chrono::{DateTime, Duration, Utc};
use poolgate_core::clock::Clock;
use poolgate_core::error::{PoolgateError, PoolgateResult};
use poolgate_core::models::audit::AuditEntry;
use poolgate_core::models::grant::{CreateGrant, Grant, GrantFilter, GrantStatus};
use poolgate_core::models::lease::Lease;
use poolgate_core::models::resource::{
    BatchFailure, BatchOutcome, CreateResource, Resource, ResourceFilter, UpdateResource,
};
use poolgate_core::models::stats::{GrantStats, PoolStats};
use poolgate_core::repository::{
    AllocationStore, AuditRepository, GrantRepository, LeaseRepository, PaginatedResult,
    Pagination, ResourceRepository,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::token::generate_grant_token;

/// Attempts at finding an unused token for one grant.
const TOKEN_ATTEMPTS: u32 = 5;

/// When a newly issued grant stops being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GrantExpiry {
    /// The configured default validity.
    #[default]
    Default,
    ValidDays(u32),
    At(DateTime<Utc>),
}

/// Input for [`AdminService::create_grants`].
#[derive(Debug, Clone)]
pub struct IssueGrants {
    pub max_resources: u32,
    pub expiry: GrantExpiry,
    pub count: u32,
}

/// A grant with everything an operator needs to inspect it.
#[derive(Debug, Clone, Serialize)]
pub struct GrantDetails {
    pub grant: Grant,
    pub effective_status: GrantStatus,
    pub leased: Vec<Resource>,
    pub leases: Vec<Lease>,
    /// Most recent entries first.
    pub audit: Vec<AuditEntry>,
}

pub struct AdminService<G, R, L, A, S, K>
where
    G: GrantRepository,
    R: ResourceRepository,
    L: LeaseRepository,
    A: AuditRepository,
    S: AllocationStore,
    K: Clock,
{
    grants: G,
    resources: R,
    leases: L,
    audit: A,
    store: S,
    clock: K,
    config: GatewayConfig,
}

impl<G, R, L, A, S, K> AdminService<G, R, L, A, S, K>
where
    G: GrantRepository,
    R: ResourceRepository,
    L: LeaseRepository,
    A: AuditRepository,
    S: AllocationStore,
    K: Clock,
{
    pub fn new(
        grants: G,
        resources: R,
        leases: L,
        audit: A,
        store: S,
        clock: K,
        config: GatewayConfig,
    ) -> Self {
        Self {
            grants,
            resources,
            leases,
            audit,
            store,
            clock,
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Grants
    // -----------------------------------------------------------------------

    /// Issue `count` grants sharing one capacity and expiry.
    pub async fn create_grants(&self, input: IssueGrants) -> PoolgateResult<Vec<Grant>> {
        if input.count == 0 || input.count > self.config.max_batch_size {
            return Err(GatewayError::InvalidCount {
                count: input.count,
                max: self.config.max_batch_size,
            }
            .into());
        }
        if input.max_resources == 0 {
            return Err(GatewayError::InvalidCapacity.into());
        }

        let now = self.clock.now();
        let expire_at = self.resolve_expiry(input.expiry, now)?;

        let mut created = Vec::with_capacity(input.count as usize);
        for _ in 0..input.count {
            created.push(self.issue_one(input.max_resources, expire_at).await?);
        }

        info!(
            count = created.len(),
            max_resources = input.max_resources,
            expire_at = %expire_at,
            "Grants issued"
        );
        Ok(created)
    }

    fn resolve_expiry(
        &self,
        expiry: GrantExpiry,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, GatewayError> {
        match expiry {
            GrantExpiry::Default => Ok(now + Duration::days(i64::from(self.config.default_valid_days))),
            GrantExpiry::ValidDays(0) => Err(GatewayError::InvalidExpiry(
                "valid days must be at least 1".into(),
            )),
            GrantExpiry::ValidDays(days) => Ok(now + Duration::days(i64::from(days))),
            GrantExpiry::At(at) if at <= now => Err(GatewayError::InvalidExpiry(
                "expiry must lie in the future".into(),
            )),
            GrantExpiry::At(at) => Ok(at),
        }
    }

    async fn issue_one(&self, max_resources: u32, expire_at: DateTime<Utc>) -> PoolgateResult<Grant> {
        for _ in 0..TOKEN_ATTEMPTS {
            let token =
                generate_grant_token(&self.config.token_prefix, self.config.token_body_length);
            match self
                .grants
                .create(CreateGrant {
                    token,
                    max_resources,
                    expire_at,
                })
                .await
            {
                Err(PoolgateError::AlreadyExists { .. }) => {
                    warn!("Generated grant token collided, regenerating");
                }
                other => return other,
            }
        }
        Err(GatewayError::TokenSpaceExhausted {
            attempts: TOKEN_ATTEMPTS,
        }
        .into())
    }

    pub async fn set_grant_status(&self, id: Uuid, status: GrantStatus) -> PoolgateResult<Grant> {
        self.grants.set_status(id, status, self.clock.now()).await
    }

    pub async fn delete_grant(&self, id: Uuid) -> PoolgateResult<()> {
        self.store.delete_grant(id, self.clock.now()).await
    }

    /// Clear the bound client so another machine may use the grant.
    pub async fn reset_binding(&self, id: Uuid) -> PoolgateResult<Grant> {
        self.store.reset_binding(id, self.clock.now()).await
    }

    /// Return every resource held by the grant and zero its usage.
    pub async fn release_grant(&self, id: Uuid) -> PoolgateResult<u64> {
        self.store.release_grant(id, self.clock.now()).await
    }

    pub async fn list_grants(
        &self,
        filter: GrantFilter,
        pagination: Pagination,
    ) -> PoolgateResult<PaginatedResult<Grant>> {
        self.grants
            .list(filter, self.clock.now(), pagination)
            .await
    }

    pub async fn grant_details(&self, id: Uuid) -> PoolgateResult<GrantDetails> {
        let grant = self.grants.get_by_id(id).await?;
        let leased = self.resources.list_leased_to(id).await?;
        let leases = self.leases.list_for_grant(id).await?;
        let audit = self
            .audit
            .list_for_grant(
                id,
                Pagination {
                    offset: 0,
                    limit: self.config.details_audit_limit,
                },
            )
            .await?
            .items;

        Ok(GrantDetails {
            effective_status: grant.effective_status(self.clock.now()),
            grant,
            leased,
            leases,
            audit,
        })
    }

    // -----------------------------------------------------------------------
    // Resources
    // -----------------------------------------------------------------------

    pub async fn add_resource(&self, input: CreateResource) -> PoolgateResult<Resource> {
        let resource = self.resources.create(input).await?;
        info!(resource_id = %resource.id, handle = %resource.handle, "Resource added");
        Ok(resource)
    }

    /// Add many resources; one bad item never aborts the rest.
    pub async fn add_resources(&self, batch: Vec<CreateResource>) -> PoolgateResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for input in batch {
            let handle = input.handle.clone();
            match self.resources.create(input).await {
                Ok(resource) => outcome.created.push(resource),
                Err(
                    e @ (PoolgateError::AlreadyExists { .. } | PoolgateError::Validation { .. }),
                ) => outcome.failed.push(BatchFailure {
                    handle,
                    reason: e.to_string(),
                }),
                Err(e) => return Err(e),
            }
        }

        info!(
            created = outcome.created.len(),
            failed = outcome.failed.len(),
            "Resource batch added"
        );
        Ok(outcome)
    }

    pub async fn update_resource(
        &self,
        id: Uuid,
        input: UpdateResource,
    ) -> PoolgateResult<Resource> {
        self.resources.update(id, input).await
    }

    pub async fn delete_resource(&self, id: Uuid) -> PoolgateResult<()> {
        self.store.delete_resource(id).await
    }

    /// Returns `true` if the resource was leased.
    pub async fn release_resource(&self, id: Uuid) -> PoolgateResult<bool> {
        self.store.release_resource(id, self.clock.now()).await
    }

    pub async fn release_all_leased(&self) -> PoolgateResult<u64> {
        self.store.release_all_leased(self.clock.now()).await
    }

    pub async fn list_resources(
        &self,
        filter: ResourceFilter,
        pagination: Pagination,
    ) -> PoolgateResult<PaginatedResult<Resource>> {
        self.resources.list(filter, pagination).await
    }

    // -----------------------------------------------------------------------
    // Observability
    // -----------------------------------------------------------------------

    pub async fn pool_stats(&self) -> PoolgateResult<PoolStats> {
        self.resources.stats().await
    }

    pub async fn grant_stats(&self) -> PoolgateResult<GrantStats> {
        self.grants.stats(self.clock.now()).await
    }

    pub async fn audit_for_grant(
        &self,
        grant_id: Uuid,
        pagination: Pagination,
    ) -> PoolgateResult<PaginatedResult<AuditEntry>> {
        self.audit.list_for_grant(grant_id, pagination).await
    }

    pub async fn recent_audit(
        &self,
        pagination: Pagination,
    ) -> PoolgateResult<PaginatedResult<AuditEntry>> {
        self.audit.list_recent(pagination).await
    }
}

