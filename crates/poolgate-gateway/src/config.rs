//! Gateway configuration.

/// Configuration for the client gateway and the admin service.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Prefix of generated grant tokens (default: `WS`).
    pub token_prefix: String,
    /// Random characters after the prefix, grouped in fours (default: 16).
    pub token_body_length: usize,
    /// Validity applied when a grant is created without an explicit
    /// expiry (default: 30 days).
    pub default_valid_days: u32,
    /// Largest number of grants created by one call (default: 100).
    pub max_batch_size: u32,
    /// Conflicts without visible progress tolerated before a `Conflict`
    /// is reported to the client (default: 3). Losing to a committed
    /// write on the same grant or resource is not counted.
    pub checkout_attempts: u32,
    /// Audit entries included in grant details (default: 100).
    pub details_audit_limit: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            token_prefix: "WS".into(),
            token_body_length: 16,
            default_valid_days: 30,
            max_batch_size: 100,
            checkout_attempts: 3,
            details_audit_limit: 100,
        }
    }
}
