//! Audit trail domain model (append-only).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditAction {
    Validate,
    Checkout,
    Rebind,
    Expire,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Validate => "Validate",
            AuditAction::Checkout => "Checkout",
            AuditAction::Rebind => "Rebind",
            AuditAction::Expire => "Expire",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Validate" => Some(AuditAction::Validate),
            "Checkout" => Some(AuditAction::Checkout),
            "Rebind" => Some(AuditAction::Rebind),
            "Expire" => Some(AuditAction::Expire),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub grant_id: Uuid,
    pub action: AuditAction,
    pub resource_id: Option<Uuid>,
    pub client_identity: Option<String>,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}
