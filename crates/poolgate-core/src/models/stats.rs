//! Aggregate counts consumed by dashboards and error diagnostics.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total: u64,
    pub available: u64,
    pub leased: u64,
    pub disabled: u64,
}

/// Grant counts by effective status (expiry evaluated at query time).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct GrantStats {
    pub total: u64,
    pub active: u64,
    pub disabled: u64,
    pub expired: u64,
}
