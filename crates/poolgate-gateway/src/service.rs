//! Client gateway: verify, checkout, list, rebind and current.
//!
//! Each call reads the clock once, resolves the grant by token, checks
//! it against that instant and then runs the store transaction that
//! re-checks the same conditions under isolation. Expiry observed at
//! any point is persisted once through [`GrantRepository::mark_expired`].
//!
//! A transaction that loses a write conflict is retried after a short
//! jittered backoff. Before each retry the grant is re-read, so a caller
//! that lost the race for the last unit of capacity gets the terminal
//! `CapacityExhausted` instead of a retryable `Conflict`.

use chrono::{DateTime, Utc};
use poolgate_core::clock::Clock;
use poolgate_core::error::{PoolgateError, PoolgateResult};
use poolgate_core::models::grant::Grant;
use poolgate_core::models::resource::PoolStatus;
use poolgate_core::repository::{
    AllocationStore, CheckoutRequest, GrantRepository, LeaseRepository, ResourceRepository,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::envelope::{CheckoutView, LeasedView, ResourceView, VerifyView};
use crate::error::GatewayError;
use crate::retry::conflict_backoff;
use crate::token::normalize_token;

/// Client-facing gateway.
///
/// Generic over repository implementations so that the gateway has no
/// dependency on the database crate.
pub struct Gateway<G, R, L, S, K>
where
    G: GrantRepository,
    R: ResourceRepository,
    L: LeaseRepository,
    S: AllocationStore,
    K: Clock,
{
    grants: G,
    resources: R,
    leases: L,
    store: S,
    clock: K,
    config: GatewayConfig,
}

impl<G, R, L, S, K> Gateway<G, R, L, S, K>
where
    G: GrantRepository,
    R: ResourceRepository,
    L: LeaseRepository,
    S: AllocationStore,
    K: Clock,
{
    pub fn new(grants: G, resources: R, leases: L, store: S, clock: K, config: GatewayConfig) -> Self {
        Self {
            grants,
            resources,
            leases,
            store,
            clock,
            config,
        }
    }

    /// Validate a grant for `client_identity`, binding it on first use.
    pub async fn verify(&self, token: &str, client_identity: &str) -> PoolgateResult<VerifyView> {
        let now = self.clock.now();
        let (grant, client) = self.resolve(token, client_identity).await?;
        let grant = self.bind(grant, client, now, true).await?;
        debug!(grant_id = %grant.id, "Grant verified");
        Ok(VerifyView::new(&grant, now))
    }

    /// Lease a fresh resource from the pool against the grant's capacity.
    pub async fn checkout(
        &self,
        token: &str,
        client_identity: &str,
    ) -> PoolgateResult<CheckoutView> {
        let now = self.clock.now();
        let (mut grant, client) = self.resolve(token, client_identity).await?;
        // A grant already bound to this client is re-bound by the checkout
        // transaction itself; only first use needs its own binding write.
        if grant.bound_client.as_deref() != Some(client) {
            grant = self.bind(grant, client, now, false).await?;
        }
        // Capacity before pool: a spent grant never reports pool state.
        self.observe(grant.id, client, now, grant.check_can_consume(client, now))
            .await?;

        let attempts = self.config.checkout_attempts.max(1);
        let mut stalled = 0;
        loop {
            let Some(candidate) = self.resources.pick_available().await? else {
                return Err(self.pool_exhausted(grant.id).await);
            };

            let request = CheckoutRequest {
                grant_id: grant.id,
                client_identity: client.to_string(),
                resource_id: candidate,
                now,
            };
            match self.store.checkout(request).await {
                Ok(resource) => {
                    let remaining = self.grants.get_by_id(grant.id).await?.remaining();
                    return Ok(CheckoutView {
                        resource: resource.into(),
                        remaining,
                    });
                }
                Err(e) if e.is_retryable() => {
                    let fresh = self.grants.get_by_id(grant.id).await?;
                    self.observe(grant.id, client, now, fresh.check_can_consume(client, now))
                        .await?;

                    // Losing to a committed write on the same grant or
                    // resource is progress and is not charged against the
                    // attempt budget.
                    let progressed = fresh.updated_at != grant.updated_at
                        || fresh.used_resources != grant.used_resources
                        || self.candidate_taken(candidate).await?;
                    if !progressed {
                        stalled += 1;
                    }
                    if stalled >= attempts {
                        if self.resources.pick_available().await?.is_none() {
                            return Err(self.pool_exhausted(grant.id).await);
                        }
                        warn!(grant_id = %grant.id, attempts, "Checkout gave up after repeated conflicts");
                        return Err(e);
                    }

                    debug!(grant_id = %grant.id, stalled, progressed, "Checkout conflict, retrying");
                    grant = fresh;
                    tokio::time::sleep(conflict_backoff(stalled)).await;
                }
                Err(e) => return self.observe(grant.id, client, now, Err(e)).await,
            }
        }
    }

    /// Resources currently leased to the grant, without credentials.
    pub async fn list_leased(
        &self,
        token: &str,
        client_identity: &str,
    ) -> PoolgateResult<Vec<LeasedView>> {
        let now = self.clock.now();
        let (grant, client) = self.resolve(token, client_identity).await?;
        let grant = self.bind(grant, client, now, false).await?;
        let leased = self.resources.list_leased_to(grant.id).await?;
        Ok(leased.into_iter().map(LeasedView::from).collect())
    }

    /// Make one of the grant's already-leased resources the active one.
    pub async fn rebind(
        &self,
        token: &str,
        client_identity: &str,
        resource_id: Uuid,
    ) -> PoolgateResult<ResourceView> {
        let now = self.clock.now();
        let (grant, client) = self.resolve(token, client_identity).await?;
        let grant = self.bind(grant, client, now, false).await?;

        let resource = self
            .observe(
                grant.id,
                client,
                now,
                self.store.rebind(grant.id, client, resource_id, now).await,
            )
            .await?;
        info!(grant_id = %grant.id, resource_id = %resource_id, "Active resource switched");
        Ok(resource.into())
    }

    /// The client's active resource, if it has one.
    pub async fn current(
        &self,
        token: &str,
        client_identity: &str,
    ) -> PoolgateResult<Option<ResourceView>> {
        let now = self.clock.now();
        let (grant, client) = self.resolve(token, client_identity).await?;
        let grant = self.bind(grant, client, now, false).await?;

        let Some(lease) = self.leases.get(grant.id, client).await? else {
            return Ok(None);
        };
        let Some(resource_id) = lease.active_resource else {
            return Ok(None);
        };

        match self.resources.get_by_id(resource_id).await {
            Ok(resource) if resource.is_held_by(grant.id) => Ok(Some(resource.into())),
            Ok(_) | Err(PoolgateError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Validates the raw inputs and loads the grant behind the token.
    async fn resolve<'a>(
        &self,
        token: &str,
        client_identity: &'a str,
    ) -> PoolgateResult<(Grant, &'a str)> {
        let token = normalize_token(token);
        if token.is_empty() {
            return Err(GatewayError::MissingToken.into());
        }
        let client = client_identity.trim();
        if client.is_empty() {
            return Err(GatewayError::MissingClientIdentity.into());
        }

        let grant = self.grants.get_by_token(token).await?;
        Ok((grant, client))
    }

    /// Checks the grant at `now` and runs the binding transaction shared
    /// by every client call.
    async fn bind(
        &self,
        mut grant: Grant,
        client: &str,
        now: DateTime<Utc>,
        record_validate: bool,
    ) -> PoolgateResult<Grant> {
        let attempts = self.config.checkout_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.observe(grant.id, client, now, grant.check_usable(client, now))
                .await?;

            match self
                .store
                .authorize(grant.id, client, now, record_validate)
                .await
            {
                Err(e) if e.is_retryable() => {
                    let fresh = self.grants.get_by_id(grant.id).await?;
                    self.observe(grant.id, client, now, fresh.check_usable(client, now))
                        .await?;
                    // The winner bound the grant to this same client.
                    if !record_validate && fresh.bound_client.as_deref() == Some(client) {
                        return Ok(fresh);
                    }
                    if attempt >= attempts {
                        warn!(grant_id = %grant.id, attempts, "Authorization gave up after repeated conflicts");
                        return Err(e);
                    }
                    debug!(grant_id = %grant.id, attempt, "Authorization conflict, retrying");
                    grant = fresh;
                    tokio::time::sleep(conflict_backoff(attempt)).await;
                }
                other => return self.observe(grant.id, client, now, other).await,
            }
        }
    }

    /// Passes `result` through, persisting the expiry first when it
    /// reports one.
    async fn observe<T>(
        &self,
        grant_id: Uuid,
        client: &str,
        now: DateTime<Utc>,
        result: PoolgateResult<T>,
    ) -> PoolgateResult<T> {
        if let Err(PoolgateError::Expired) = &result {
            self.expire(grant_id, client, now).await;
        }
        result
    }

    /// Whether the resource a lost checkout aimed for has left the pool.
    async fn candidate_taken(&self, resource_id: Uuid) -> PoolgateResult<bool> {
        match self.resources.get_by_id(resource_id).await {
            Ok(resource) => Ok(resource.pool_status != PoolStatus::Available),
            Err(PoolgateError::NotFound { .. }) => Ok(true),
            Err(e) => Err(e),
        }
    }

    async fn pool_exhausted(&self, grant_id: Uuid) -> PoolgateError {
        match self.resources.stats().await {
            Ok(stats) => {
                info!(
                    grant_id = %grant_id,
                    total = stats.total,
                    leased = stats.leased,
                    "Pool exhausted"
                );
                PoolgateError::PoolExhausted { stats }
            }
            Err(e) => e,
        }
    }

    /// Persists the expiry transition. Failures here never mask the
    /// `Expired` answer already owed to the client.
    async fn expire(&self, grant_id: Uuid, client_identity: &str, now: DateTime<Utc>) {
        match self
            .grants
            .mark_expired(grant_id, Some(client_identity), now)
            .await
        {
            Ok(true) => info!(grant_id = %grant_id, "Grant marked expired"),
            Ok(false) => {}
            Err(e) => warn!(grant_id = %grant_id, error = %e, "Failed to persist grant expiry"),
        }
    }
}
