//! Integration tests for the client gateway and the admin service.

use std::sync::Arc;

use chrono::{Duration, Utc};
use poolgate_core::PoolgateError;
use poolgate_core::clock::{FixedClock, SystemClock};
use poolgate_core::models::audit::AuditAction;
use poolgate_core::models::grant::{CreateGrant, Grant, GrantFilter, GrantStatus};
use poolgate_core::models::resource::{CreateResource, PoolStatus};
use poolgate_core::repository::{AuditRepository, GrantRepository, Pagination};
use poolgate_db::repository::{
    SurrealAllocationStore, SurrealAuditRepository, SurrealGrantRepository,
    SurrealLeaseRepository, SurrealResourceRepository,
};
use poolgate_gateway::{
    AdminService, Envelope, Gateway, GatewayConfig, GrantExpiry, IssueGrants,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};

type TestGateway = Gateway<
    SurrealGrantRepository<Db>,
    SurrealResourceRepository<Db>,
    SurrealLeaseRepository<Db>,
    SurrealAllocationStore<Db>,
    SystemClock,
>;

type TestAdmin = AdminService<
    SurrealGrantRepository<Db>,
    SurrealResourceRepository<Db>,
    SurrealLeaseRepository<Db>,
    SurrealAuditRepository<Db>,
    SurrealAllocationStore<Db>,
    SystemClock,
>;

struct Harness {
    db: Surreal<Db>,
    gateway: Arc<TestGateway>,
    admin: TestAdmin,
}

/// Uses the shipped configuration, retry budget included.
async fn setup() -> Harness {
    let config = GatewayConfig::default();
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    poolgate_db::run_migrations(&db).await.unwrap();

    let gateway = Gateway::new(
        SurrealGrantRepository::new(db.clone()),
        SurrealResourceRepository::new(db.clone()),
        SurrealLeaseRepository::new(db.clone()),
        SurrealAllocationStore::new(db.clone()),
        SystemClock,
        config.clone(),
    );
    let admin = AdminService::new(
        SurrealGrantRepository::new(db.clone()),
        SurrealResourceRepository::new(db.clone()),
        SurrealLeaseRepository::new(db.clone()),
        SurrealAuditRepository::new(db.clone()),
        SurrealAllocationStore::new(db.clone()),
        SystemClock,
        config,
    );

    Harness {
        db,
        gateway: Arc::new(gateway),
        admin,
    }
}

impl Harness {
    async fn grant(&self, max_resources: u32) -> Grant {
        self.admin
            .create_grants(IssueGrants {
                max_resources,
                expiry: GrantExpiry::Default,
                count: 1,
            })
            .await
            .unwrap()
            .remove(0)
    }

    async fn pool(&self, size: usize) {
        let batch = (0..size)
            .map(|i| CreateResource {
                handle: format!("user{i}@pool.test"),
                display_name: format!("User {i}"),
                credential: format!("key-{i}"),
            })
            .collect();
        let outcome = self.admin.add_resources(batch).await.unwrap();
        assert_eq!(outcome.created.len(), size);
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_checkouts_then_capacity_exhausted() {
    let h = setup().await;
    let grant = h.grant(2).await;
    h.pool(5).await;

    let first = h.gateway.checkout(&grant.token, "X").await.unwrap();
    assert_eq!(first.remaining, 1);
    let second = h.gateway.checkout(&grant.token, "X").await.unwrap();
    assert_eq!(second.remaining, 0);
    assert_ne!(first.resource.id, second.resource.id);

    let err = h.gateway.checkout(&grant.token, "X").await.unwrap_err();
    assert!(matches!(
        err,
        PoolgateError::CapacityExhausted { max_resources: 2 }
    ));
    assert!(!err.is_retryable());

    let view = h.gateway.verify(&grant.token, "X").await.unwrap();
    assert_eq!(view.remaining, 0);
    assert_eq!(view.used_resources, 2);
}

#[tokio::test]
async fn second_client_gets_identity_mismatch() {
    let h = setup().await;
    let grant = h.grant(1).await;

    h.gateway.verify(&grant.token, "X").await.unwrap();
    let err = h.gateway.verify(&grant.token, "Y").await.unwrap_err();
    assert!(matches!(err, PoolgateError::IdentityMismatch));

    // The original client is unaffected.
    h.gateway.verify(&grant.token, "X").await.unwrap();
}

#[tokio::test]
async fn last_resource_goes_to_exactly_one_grant() {
    let h = setup().await;
    let a = h.grant(1).await;
    let b = h.grant(1).await;
    h.pool(1).await;

    let gw_a = h.gateway.clone();
    let gw_b = h.gateway.clone();
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { gw_a.checkout(&a.token, "host-a").await }),
        tokio::spawn(async move { gw_b.checkout(&b.token, "host-b").await }),
    );
    let results = [ra.unwrap(), rb.unwrap()];

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);

    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    match loser {
        PoolgateError::PoolExhausted { stats } => {
            assert_eq!(stats.total, 1);
            assert_eq!(stats.leased, 1);
            assert_eq!(stats.available, 0);
        }
        other => panic!("expected PoolExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn expired_grant_reports_expired_for_verify_and_checkout() {
    let h = setup().await;
    h.pool(3).await;
    let grants = SurrealGrantRepository::new(h.db.clone());
    let grant = grants
        .create(CreateGrant {
            token: "WS-PAST-PAST-PAST-PAST".into(),
            max_resources: 1,
            expire_at: Utc::now() - Duration::seconds(1),
        })
        .await
        .unwrap();

    let err = h.gateway.verify(&grant.token, "X").await.unwrap_err();
    assert!(matches!(err, PoolgateError::Expired));
    assert!(err.needs_new_grant());

    let err = h.gateway.checkout(&grant.token, "X").await.unwrap_err();
    assert!(matches!(err, PoolgateError::Expired));

    assert_eq!(
        grants.get_by_id(grant.id).await.unwrap().status,
        GrantStatus::Expired
    );
    assert_eq!(h.admin.pool_stats().await.unwrap().available, 3);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn parallel_checkouts_respect_capacity() {
    let h = setup().await;
    let grant = h.grant(3).await;
    h.pool(10).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let gw = h.gateway.clone();
        let token = grant.token.clone();
        tasks.push(tokio::spawn(async move { gw.checkout(&token, "X").await }));
    }

    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert!(
                matches!(e, PoolgateError::CapacityExhausted { .. }),
                "unexpected error: {e:?}"
            ),
        }
    }

    assert_eq!(ok, 3);
    let stored = h.admin.grant_details(grant.id).await.unwrap();
    assert_eq!(stored.grant.used_resources, 3);
    assert_eq!(stored.leased.len(), 3);
}

#[tokio::test]
async fn losers_of_capacity_race_get_terminal_exhaustion() {
    let h = setup().await;
    h.pool(80).await;

    for _ in 0..10 {
        let grant = h.grant(3).await;
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let gw = h.gateway.clone();
            let token = grant.token.clone();
            tasks.push(tokio::spawn(async move { gw.checkout(&token, "R").await }));
        }

        let mut ok = 0;
        let mut exhausted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(PoolgateError::CapacityExhausted { max_resources }) => {
                    assert_eq!(max_resources, 3);
                    exhausted += 1;
                }
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }
        assert_eq!((ok, exhausted), (3, 5));

        let stored = h.admin.grant_details(grant.id).await.unwrap();
        assert_eq!(stored.grant.used_resources, 3);
    }
}

#[tokio::test]
async fn parallel_checkouts_never_share_a_resource() {
    let h = setup().await;
    h.pool(4).await;

    let mut tasks = Vec::new();
    for i in 0..7 {
        let grant = h.grant(1).await;
        let gw = h.gateway.clone();
        tasks.push(tokio::spawn(async move {
            gw.checkout(&grant.token, &format!("host-{i}")).await
        }));
    }

    let mut won = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(view) => won.push(view.resource.id),
            Err(e) => assert!(
                matches!(e, PoolgateError::PoolExhausted { .. }),
                "unexpected error: {e:?}"
            ),
        }
    }

    assert_eq!(won.len(), 4);
    won.sort();
    won.dedup();
    assert_eq!(won.len(), 4);
}

#[tokio::test]
async fn expiry_is_written_once() {
    let h = setup().await;
    let grants = SurrealGrantRepository::new(h.db.clone());
    let grant = grants
        .create(CreateGrant {
            token: "WS-ONCE".into(),
            max_resources: 1,
            expire_at: Utc::now() - Duration::seconds(5),
        })
        .await
        .unwrap();

    for _ in 0..2 {
        let err = h.gateway.verify(&grant.token, "X").await.unwrap_err();
        assert!(matches!(err, PoolgateError::Expired));
    }

    let audit = SurrealAuditRepository::new(h.db.clone());
    let entries = audit
        .list_for_grant(grant.id, Pagination::default())
        .await
        .unwrap();
    let expiries = entries
        .items
        .iter()
        .filter(|e| e.action == AuditAction::Expire)
        .count();
    assert_eq!(expiries, 1);
}

#[tokio::test]
async fn rebind_to_foreign_resource_is_not_owned() {
    let h = setup().await;
    let mine = h.grant(2).await;
    let theirs = h.grant(1).await;
    h.pool(4).await;

    let first = h.gateway.checkout(&mine.token, "X").await.unwrap();
    let second = h.gateway.checkout(&mine.token, "X").await.unwrap();
    let foreign = h.gateway.checkout(&theirs.token, "Y").await.unwrap();

    let current = h.gateway.current(&mine.token, "X").await.unwrap().unwrap();
    assert_eq!(current.id, second.resource.id);

    let rebound = h
        .gateway
        .rebind(&mine.token, "X", first.resource.id)
        .await
        .unwrap();
    assert_eq!(rebound.id, first.resource.id);
    let current = h.gateway.current(&mine.token, "X").await.unwrap().unwrap();
    assert_eq!(current.id, first.resource.id);

    let err = h
        .gateway
        .rebind(&mine.token, "X", foreign.resource.id)
        .await
        .unwrap_err();
    assert!(matches!(err, PoolgateError::NotOwned { .. }));

    // An available resource is not owned either.
    let spare = h
        .admin
        .list_resources(
            poolgate_core::models::resource::ResourceFilter {
                status: Some(PoolStatus::Available),
                search: None,
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    let err = h
        .gateway
        .rebind(&mine.token, "X", spare.items[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, PoolgateError::NotOwned { .. }));

    // Rebinding consumed nothing.
    let view = h.gateway.verify(&mine.token, "X").await.unwrap();
    assert_eq!(view.used_resources, 2);
}

#[tokio::test]
async fn release_then_checkout_again() {
    let h = setup().await;
    let grant = h.grant(1).await;
    h.pool(1).await;

    let held = h.gateway.checkout(&grant.token, "X").await.unwrap();
    assert_eq!(h.admin.release_grant(grant.id).await.unwrap(), 1);

    let again = h.gateway.checkout(&grant.token, "X").await.unwrap();
    assert_eq!(again.resource.id, held.resource.id);
    assert_eq!(again.remaining, 0);
}

// ---------------------------------------------------------------------------
// Client calls
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_client_sees_bound_idle_state() {
    let h = setup().await;
    let grant = h.grant(1).await;

    assert!(h.gateway.current(&grant.token, "X").await.unwrap().is_none());
    assert!(h.gateway.list_leased(&grant.token, "X").await.unwrap().is_empty());

    // The first call bound the grant.
    let err = h.gateway.current(&grant.token, "Y").await.unwrap_err();
    assert!(matches!(err, PoolgateError::IdentityMismatch));
}

#[tokio::test]
async fn list_leased_withholds_credentials() {
    let h = setup().await;
    let grant = h.grant(2).await;
    h.pool(2).await;

    h.gateway.checkout(&grant.token, "X").await.unwrap();
    h.gateway.checkout(&grant.token, "X").await.unwrap();

    let leased = h.gateway.list_leased(&grant.token, "X").await.unwrap();
    assert_eq!(leased.len(), 2);
    let json = serde_json::to_value(&leased).unwrap();
    assert!(json[0].get("credential").is_none());
    assert!(json[0].get("displayName").is_some());
}

#[tokio::test]
async fn verify_writes_validate_audit_but_other_calls_do_not() {
    let h = setup().await;
    let grant = h.grant(1).await;

    h.gateway.verify(&grant.token, "X").await.unwrap();
    h.gateway.current(&grant.token, "X").await.unwrap();
    h.gateway.list_leased(&grant.token, "X").await.unwrap();

    let entries = h
        .admin
        .audit_for_grant(grant.id, Pagination::default())
        .await
        .unwrap();
    assert_eq!(entries.total, 1);
    assert_eq!(entries.items[0].action, AuditAction::Validate);
}

#[tokio::test]
async fn disabled_grant_is_rejected() {
    let h = setup().await;
    let grant = h.grant(1).await;
    h.admin
        .set_grant_status(grant.id, GrantStatus::Disabled)
        .await
        .unwrap();

    let err = h.gateway.verify(&grant.token, "X").await.unwrap_err();
    assert!(matches!(err, PoolgateError::Disabled));

    h.admin
        .set_grant_status(grant.id, GrantStatus::Active)
        .await
        .unwrap();
    h.gateway.verify(&grant.token, "X").await.unwrap();
}

#[tokio::test]
async fn unknown_and_blank_inputs() {
    let h = setup().await;

    let err = h.gateway.verify("WS-NOPE", "X").await.unwrap_err();
    assert!(matches!(err, PoolgateError::NotFound { .. }));

    let err = h.gateway.verify("   ", "X").await.unwrap_err();
    assert!(matches!(err, PoolgateError::Validation { .. }));

    let grant = h.grant(1).await;
    let err = h.gateway.verify(&grant.token, "").await.unwrap_err();
    assert!(matches!(err, PoolgateError::Validation { .. }));
}

#[tokio::test]
async fn token_is_trimmed() {
    let h = setup().await;
    let grant = h.grant(1).await;

    let padded = format!("  {}\n", grant.token);
    h.gateway.verify(&padded, "X").await.unwrap();
}

#[tokio::test]
async fn envelope_wraps_gateway_results() {
    let h = setup().await;
    let grant = h.grant(1).await;

    let ok: Envelope<_> = h.gateway.verify(&grant.token, "X").await.into();
    assert!(ok.success);
    assert_eq!(ok.data.unwrap().max_resources, 1);

    let failed: Envelope<_> = h.gateway.checkout(&grant.token, "X").await.into();
    let error = failed.error.unwrap();
    assert_eq!(error.code, "pool_exhausted");
    assert_eq!(error.pool_stats.unwrap().total, 0);
}

#[tokio::test]
async fn rebind_to_unknown_resource_keeps_grant_usable() {
    let h = setup().await;
    let grant = h.grant(1).await;
    h.pool(1).await;
    h.gateway.checkout(&grant.token, "X").await.unwrap();

    let failed: Envelope<_> = h
        .gateway
        .rebind(&grant.token, "X", uuid::Uuid::new_v4())
        .await
        .into();
    assert!(!failed.success);
    let error = failed.error.unwrap();
    assert_eq!(error.code, "not_found");
    assert!(!error.needs_new_grant);
    assert!(!error.retryable);

    let unknown: Envelope<_> = h.gateway.verify("WS-NONE-XIST-ENTX-0000", "X").await.into();
    let error = unknown.error.unwrap();
    assert_eq!(error.code, "not_found");
    assert!(error.needs_new_grant);
}

// ---------------------------------------------------------------------------
// Administration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_grants_in_batch() {
    let h = setup().await;

    let grants = h
        .admin
        .create_grants(IssueGrants {
            max_resources: 4,
            expiry: GrantExpiry::ValidDays(7),
            count: 5,
        })
        .await
        .unwrap();
    assert_eq!(grants.len(), 5);

    let mut tokens: Vec<_> = grants.iter().map(|g| g.token.clone()).collect();
    tokens.sort();
    tokens.dedup();
    assert_eq!(tokens.len(), 5);

    for grant in &grants {
        assert!(grant.token.starts_with("WS-"));
        assert_eq!(grant.max_resources, 4);
        let days = (grant.expire_at - Utc::now()).num_days();
        assert!((6..=7).contains(&days));
    }
}

#[tokio::test]
async fn create_grants_rejects_bad_input() {
    let h = setup().await;

    for input in [
        IssueGrants {
            max_resources: 1,
            expiry: GrantExpiry::Default,
            count: 0,
        },
        IssueGrants {
            max_resources: 1,
            expiry: GrantExpiry::Default,
            count: 101,
        },
        IssueGrants {
            max_resources: 0,
            expiry: GrantExpiry::Default,
            count: 1,
        },
        IssueGrants {
            max_resources: 1,
            expiry: GrantExpiry::At(Utc::now() - Duration::days(1)),
            count: 1,
        },
        IssueGrants {
            max_resources: 1,
            expiry: GrantExpiry::ValidDays(0),
            count: 1,
        },
    ] {
        let err = h.admin.create_grants(input).await.unwrap_err();
        assert!(matches!(err, PoolgateError::Validation { .. }));
    }
}

#[tokio::test]
async fn batch_add_reports_duplicates_per_item() {
    let h = setup().await;
    h.pool(1).await;

    let outcome = h
        .admin
        .add_resources(vec![
            CreateResource {
                handle: "user0@pool.test".into(),
                display_name: "dup".into(),
                credential: "x".into(),
            },
            CreateResource {
                handle: "fresh@pool.test".into(),
                display_name: "fresh".into(),
                credential: "y".into(),
            },
        ])
        .await
        .unwrap();

    assert_eq!(outcome.created.len(), 1);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].handle, "user0@pool.test");
    assert_eq!(h.admin.pool_stats().await.unwrap().total, 2);
}

#[tokio::test]
async fn reset_binding_frees_grant_for_new_client() {
    let h = setup().await;
    let grant = h.grant(2).await;
    h.pool(2).await;

    h.gateway.checkout(&grant.token, "X").await.unwrap();
    h.admin.reset_binding(grant.id).await.unwrap();

    let view = h.gateway.verify(&grant.token, "Y").await.unwrap();
    assert_eq!(view.used_resources, 1);
    // Resources stay with the grant across a binding reset.
    assert_eq!(h.gateway.list_leased(&grant.token, "Y").await.unwrap().len(), 1);
}

#[tokio::test]
async fn release_single_resource_keeps_usage() {
    let h = setup().await;
    let grant = h.grant(2).await;
    h.pool(1).await;

    let held = h.gateway.checkout(&grant.token, "X").await.unwrap();
    assert!(h.admin.release_resource(held.resource.id).await.unwrap());
    assert!(h.gateway.current(&grant.token, "X").await.unwrap().is_none());

    let view = h.gateway.verify(&grant.token, "X").await.unwrap();
    assert_eq!(view.used_resources, 1);
    assert_eq!(view.remaining, 1);
}

#[tokio::test]
async fn delete_grant_returns_resources() {
    let h = setup().await;
    let grant = h.grant(1).await;
    h.pool(1).await;

    h.gateway.checkout(&grant.token, "X").await.unwrap();
    h.admin.delete_grant(grant.id).await.unwrap();

    let stats = h.admin.pool_stats().await.unwrap();
    assert_eq!(stats.available, 1);
    let err = h.gateway.verify(&grant.token, "X").await.unwrap_err();
    assert!(matches!(err, PoolgateError::NotFound { .. }));

    // Audit history outlives the grant.
    let recent = h.admin.recent_audit(Pagination::default()).await.unwrap();
    assert!(recent.items.iter().any(|e| e.grant_id == grant.id));
}

#[tokio::test]
async fn grant_stats_and_filters() {
    let h = setup().await;
    let live = h.grant(1).await;
    let off = h.grant(1).await;
    h.admin
        .set_grant_status(off.id, GrantStatus::Disabled)
        .await
        .unwrap();

    let stats = h.admin.grant_stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.disabled, 1);
    assert_eq!(stats.expired, 0);

    let found = h
        .admin
        .list_grants(
            GrantFilter {
                status: None,
                search: Some(live.token[3..12].to_string()),
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(found.total, 1);
    assert_eq!(found.items[0].id, live.id);
}

#[tokio::test]
async fn grant_details_collects_everything() {
    let h = setup().await;
    let grant = h.grant(1).await;
    h.pool(1).await;

    h.gateway.verify(&grant.token, "X").await.unwrap();
    h.gateway.checkout(&grant.token, "X").await.unwrap();

    let details = h.admin.grant_details(grant.id).await.unwrap();
    assert_eq!(details.effective_status, GrantStatus::Active);
    assert_eq!(details.leased.len(), 1);
    assert_eq!(details.leases.len(), 1);
    assert_eq!(details.leases[0].client_identity, "X");
    assert_eq!(details.audit.len(), 2);
    assert_eq!(details.audit[0].action, AuditAction::Checkout);
}

#[tokio::test]
async fn pinned_clock_drives_remaining_time_and_expiry_boundary() {
    let h = setup().await;
    let issued = Utc::now();
    let expire_at = issued + Duration::days(1) + Duration::hours(2) + Duration::minutes(3);
    let grant = SurrealGrantRepository::new(h.db.clone())
        .create(CreateGrant {
            token: "WS-PINN-EDCL-OCKX-0001".into(),
            max_resources: 1,
            expire_at,
        })
        .await
        .unwrap();

    let at = |instant| {
        Gateway::new(
            SurrealGrantRepository::new(h.db.clone()),
            SurrealResourceRepository::new(h.db.clone()),
            SurrealLeaseRepository::new(h.db.clone()),
            SurrealAllocationStore::new(h.db.clone()),
            FixedClock::new(instant),
            GatewayConfig::default(),
        )
    };

    let view = at(issued).verify(&grant.token, "P").await.unwrap();
    assert_eq!(view.days_remaining, 1);
    assert_eq!(view.hours_remaining, 2);
    assert_eq!(view.minutes_remaining, 3);

    let err = at(expire_at).verify(&grant.token, "P").await.unwrap_err();
    assert!(matches!(err, PoolgateError::Expired));
    let stored = SurrealGrantRepository::new(h.db.clone())
        .get_by_id(grant.id)
        .await
        .unwrap();
    assert_eq!(stored.status, GrantStatus::Expired);
}
