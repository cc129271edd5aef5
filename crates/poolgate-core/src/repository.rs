//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Each owner repository mutates
//! only its own entity. Operations that must touch several owners at
//! once live on [`AllocationStore`] and run as a single store
//! transaction.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::PoolgateResult;
use crate::models::{
    audit::AuditEntry,
    grant::{CreateGrant, Grant, GrantFilter, GrantStatus},
    lease::Lease,
    resource::{CreateResource, Resource, ResourceFilter, UpdateResource},
    stats::{GrantStats, PoolStats},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

// ---------------------------------------------------------------------------
// Grant Registry
// ---------------------------------------------------------------------------

pub trait GrantRepository: Send + Sync {
    /// Fails with `AlreadyExists` if the token is taken.
    fn create(&self, input: CreateGrant) -> impl Future<Output = PoolgateResult<Grant>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = PoolgateResult<Grant>> + Send;
    fn get_by_token(&self, token: &str) -> impl Future<Output = PoolgateResult<Grant>> + Send;
    /// Administrative status change. Only `Active` and `Disabled` may be set.
    fn set_status(
        &self,
        id: Uuid,
        status: GrantStatus,
        now: DateTime<Utc>,
    ) -> impl Future<Output = PoolgateResult<Grant>> + Send;
    /// Persist the `Expired` status if `now >= expire_at`.
    ///
    /// Returns `true` only for the call that performed the transition;
    /// that call also appends the `Expire` audit entry.
    fn mark_expired(
        &self,
        id: Uuid,
        client_identity: Option<&str>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = PoolgateResult<bool>> + Send;
    fn list(
        &self,
        filter: GrantFilter,
        now: DateTime<Utc>,
        pagination: Pagination,
    ) -> impl Future<Output = PoolgateResult<PaginatedResult<Grant>>> + Send;
    fn stats(&self, now: DateTime<Utc>) -> impl Future<Output = PoolgateResult<GrantStats>> + Send;
}

// ---------------------------------------------------------------------------
// Resource Pool
// ---------------------------------------------------------------------------

pub trait ResourceRepository: Send + Sync {
    /// Adds an available, unassigned resource. Fails with
    /// `AlreadyExists` on a duplicate handle.
    fn create(&self, input: CreateResource)
    -> impl Future<Output = PoolgateResult<Resource>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = PoolgateResult<Resource>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateResource,
    ) -> impl Future<Output = PoolgateResult<Resource>> + Send;
    fn list(
        &self,
        filter: ResourceFilter,
        pagination: Pagination,
    ) -> impl Future<Output = PoolgateResult<PaginatedResult<Resource>>> + Send;
    /// Resources currently assigned to `grant_id`.
    fn list_leased_to(
        &self,
        grant_id: Uuid,
    ) -> impl Future<Output = PoolgateResult<Vec<Resource>>> + Send;
    /// An arbitrary available resource, read without a lock.
    ///
    /// The checkout transaction re-validates availability before the
    /// status flip, so a stale candidate only ever costs a retry.
    fn pick_available(&self) -> impl Future<Output = PoolgateResult<Option<Uuid>>> + Send;
    fn stats(&self) -> impl Future<Output = PoolgateResult<PoolStats>> + Send;
}

// ---------------------------------------------------------------------------
// Lease Tracker
// ---------------------------------------------------------------------------

pub trait LeaseRepository: Send + Sync {
    /// The lease for (grant, client), if any. Read-only.
    fn get(
        &self,
        grant_id: Uuid,
        client_identity: &str,
    ) -> impl Future<Output = PoolgateResult<Option<Lease>>> + Send;
    fn list_for_grant(
        &self,
        grant_id: Uuid,
    ) -> impl Future<Output = PoolgateResult<Vec<Lease>>> + Send;
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

/// Read side of the audit trail. Entries are only written by the
/// allocation transactions that they describe.
pub trait AuditRepository: Send + Sync {
    /// Entries for one grant, newest first.
    fn list_for_grant(
        &self,
        grant_id: Uuid,
        pagination: Pagination,
    ) -> impl Future<Output = PoolgateResult<PaginatedResult<AuditEntry>>> + Send;
    /// Entries across all grants, newest first.
    fn list_recent(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = PoolgateResult<PaginatedResult<AuditEntry>>> + Send;
}

// ---------------------------------------------------------------------------
// Cross-owner units of work
// ---------------------------------------------------------------------------

/// Inputs of one checkout attempt.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub grant_id: Uuid,
    pub client_identity: String,
    /// Candidate from [`ResourceRepository::pick_available`].
    pub resource_id: Uuid,
    pub now: DateTime<Utc>,
}

/// Operations that sequence several owners inside one transaction.
///
/// Either every owner's mutation commits or none does. Typed failures
/// raised inside the transaction (expiry, capacity, lost candidate,
/// ownership) surface as the matching [`crate::PoolgateError`] variant;
/// a lost candidate or a store write conflict surfaces as `Conflict`.
pub trait AllocationStore: Send + Sync {
    /// Re-checks the grant under the transaction, binds `client_identity`
    /// if the grant is unbound, refreshes `last_used_at` and ensures the
    /// lease row exists. Writes a `Validate` audit entry when
    /// `record_validate` is set.
    fn authorize(
        &self,
        grant_id: Uuid,
        client_identity: &str,
        now: DateTime<Utc>,
        record_validate: bool,
    ) -> impl Future<Output = PoolgateResult<Grant>> + Send;

    /// consume one unit of grant capacity, lease the candidate resource,
    /// make it the client's active resource and append the audit entry.
    fn checkout(
        &self,
        request: CheckoutRequest,
    ) -> impl Future<Output = PoolgateResult<Resource>> + Send;

    /// Makes an already-leased resource the client's active one.
    /// Touches neither grant usage nor the pool.
    fn rebind(
        &self,
        grant_id: Uuid,
        client_identity: &str,
        resource_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = PoolgateResult<Resource>> + Send;

    /// Returns every resource held by the grant to the pool, zeroes its
    /// usage and drops its leases. Returns the number of resources freed.
    fn release_grant(
        &self,
        grant_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = PoolgateResult<u64>> + Send;

    /// Returns one resource to the pool. Idempotent: `Ok(false)` if it
    /// was not leased.
    fn release_resource(
        &self,
        resource_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = PoolgateResult<bool>> + Send;

    /// Returns every leased resource to the pool. Grant usage is kept.
    fn release_all_leased(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = PoolgateResult<u64>> + Send;

    /// Clears the grant's bound client and drops its leases.
    fn reset_binding(
        &self,
        grant_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = PoolgateResult<Grant>> + Send;

    /// Hard delete: releases held resources, drops leases, deletes the
    /// grant. Audit entries are retained.
    fn delete_grant(
        &self,
        grant_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = PoolgateResult<()>> + Send;

    /// Deletes a resource, first clearing any lease pointing at it.
    fn delete_resource(&self, resource_id: Uuid) -> impl Future<Output = PoolgateResult<()>> + Send;
}
