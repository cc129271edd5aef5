//! Grant domain model.
//!
//! A grant is a capacity- and time-bounded token that lets one client
//! check out up to `max_resources` resources before `expire_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PoolgateError, PoolgateResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GrantStatus {
    Active,
    Disabled,
    /// Persisted lazily the first time an access observes `now >= expire_at`.
    Expired,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Active => "Active",
            GrantStatus::Disabled => "Disabled",
            GrantStatus::Expired => "Expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Active" => Some(GrantStatus::Active),
            "Disabled" => Some(GrantStatus::Disabled),
            "Expired" => Some(GrantStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub id: Uuid,
    /// Opaque token presented by clients (e.g. `WS-AB12-CD34-EF56-GH78`).
    pub token: String,
    pub max_resources: u32,
    /// Provisioned count. Only a full grant release resets it.
    pub used_resources: u32,
    pub expire_at: DateTime<Utc>,
    pub status: GrantStatus,
    /// Set on first successful validation; immutable until an admin reset.
    pub bound_client: Option<String>,
    pub bound_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Grant {
    pub fn remaining(&self) -> u32 {
        self.max_resources.saturating_sub(self.used_resources)
    }

    /// True once `now` has reached `expire_at`, whether or not the
    /// transition has been persisted yet.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Expired || now >= self.expire_at
    }

    /// Status as observed at `now`, evaluating expiry lazily.
    pub fn effective_status(&self, now: DateTime<Utc>) -> GrantStatus {
        if self.is_expired_at(now) {
            GrantStatus::Expired
        } else {
            self.status
        }
    }

    /// Checks that `client_identity` may use this grant at `now`.
    ///
    /// Failure order: expired, disabled, then identity mismatch.
    pub fn check_usable(&self, client_identity: &str, now: DateTime<Utc>) -> PoolgateResult<()> {
        if self.is_expired_at(now) {
            return Err(PoolgateError::Expired);
        }
        if self.status == GrantStatus::Disabled {
            return Err(PoolgateError::Disabled);
        }
        match &self.bound_client {
            Some(bound) if bound != client_identity => Err(PoolgateError::IdentityMismatch),
            _ => Ok(()),
        }
    }

    /// Like [`Grant::check_usable`], additionally requiring spare capacity.
    pub fn check_can_consume(&self, client_identity: &str, now: DateTime<Utc>) -> PoolgateResult<()> {
        self.check_usable(client_identity, now)?;
        if self.used_resources >= self.max_resources {
            return Err(PoolgateError::CapacityExhausted {
                max_resources: self.max_resources,
            });
        }
        Ok(())
    }
}

/// Fields required to create a new grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGrant {
    pub token: String,
    pub max_resources: u32,
    pub expire_at: DateTime<Utc>,
}

/// Filter for administrative grant listings.
#[derive(Debug, Clone, Default)]
pub struct GrantFilter {
    /// Matched against the effective status, so unpersisted expiry counts.
    pub status: Option<GrantStatus>,
    /// Substring match on the token.
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(status: GrantStatus, used: u32, max: u32, expire_in: Duration) -> Grant {
        let now = Utc::now();
        Grant {
            id: Uuid::new_v4(),
            token: "WS-TEST-0000-0000-0000".into(),
            max_resources: max,
            used_resources: used,
            expire_at: now + expire_in,
            status,
            bound_client: None,
            bound_at: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn expiry_is_inclusive_of_expire_at() {
        let g = grant(GrantStatus::Active, 0, 1, Duration::zero());
        assert!(g.is_expired_at(g.expire_at));
        assert!(!g.is_expired_at(g.expire_at - Duration::milliseconds(1)));
    }

    #[test]
    fn expired_wins_over_disabled() {
        let g = grant(GrantStatus::Disabled, 0, 1, Duration::seconds(-1));
        let err = g.check_usable("x", Utc::now()).unwrap_err();
        assert!(matches!(err, PoolgateError::Expired));
    }

    #[test]
    fn persisted_expired_status_is_honoured_before_expire_at() {
        let g = grant(GrantStatus::Expired, 0, 1, Duration::days(1));
        assert!(matches!(
            g.check_usable("x", Utc::now()),
            Err(PoolgateError::Expired)
        ));
    }

    #[test]
    fn bound_client_must_match() {
        let mut g = grant(GrantStatus::Active, 0, 1, Duration::days(1));
        g.bound_client = Some("X".into());
        assert!(g.check_usable("X", Utc::now()).is_ok());
        assert!(matches!(
            g.check_usable("Y", Utc::now()),
            Err(PoolgateError::IdentityMismatch)
        ));
    }

    #[test]
    fn capacity_is_a_hard_ceiling() {
        let g = grant(GrantStatus::Active, 2, 2, Duration::days(1));
        assert_eq!(g.remaining(), 0);
        assert!(matches!(
            g.check_can_consume("x", Utc::now()),
            Err(PoolgateError::CapacityExhausted { max_resources: 2 })
        ));
    }

    #[test]
    fn effective_status_evaluates_expiry() {
        let g = grant(GrantStatus::Active, 0, 1, Duration::seconds(-5));
        assert_eq!(g.effective_status(Utc::now()), GrantStatus::Expired);
        let g = grant(GrantStatus::Disabled, 0, 1, Duration::days(1));
        assert_eq!(g.effective_status(Utc::now()), GrantStatus::Disabled);
    }
}
