//! Server configuration loaded from `POOLGATE_*` environment variables.

use std::str::FromStr;

use poolgate_db::DbConfig;
use poolgate_gateway::GatewayConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Top-level configuration of the server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the JSON-lines listener binds to.
    pub listen_addr: String,
    /// Longest accepted request line in bytes, newline included.
    pub max_line_bytes: usize,
    pub db: DbConfig,
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7420".into(),
            max_line_bytes: 64 * 1024,
            db: DbConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup; unset keys
    /// keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup("POOLGATE_LISTEN_ADDR") {
            config.listen_addr = v;
        }

        if let Some(v) = parse(&lookup, "POOLGATE_MAX_LINE_BYTES")? {
            config.max_line_bytes = v;
        }

        if let Some(v) = lookup("POOLGATE_DB_URL") {
            config.db.url = v;
        }
        if let Some(v) = lookup("POOLGATE_DB_NAMESPACE") {
            config.db.namespace = v;
        }
        if let Some(v) = lookup("POOLGATE_DB_DATABASE") {
            config.db.database = v;
        }
        if let Some(v) = lookup("POOLGATE_DB_USERNAME") {
            config.db.username = v;
        }
        if let Some(v) = lookup("POOLGATE_DB_PASSWORD") {
            config.db.password = v;
        }
        if let Some(v) = parse(&lookup, "POOLGATE_DB_CONNECT_ATTEMPTS")? {
            config.db.connect_attempts = v;
        }

        if let Some(v) = lookup("POOLGATE_TOKEN_PREFIX") {
            config.gateway.token_prefix = v;
        }
        if let Some(v) = parse(&lookup, "POOLGATE_TOKEN_LENGTH")? {
            config.gateway.token_body_length = v;
        }
        if let Some(v) = parse(&lookup, "POOLGATE_DEFAULT_VALID_DAYS")? {
            config.gateway.default_valid_days = v;
        }
        if let Some(v) = parse(&lookup, "POOLGATE_MAX_BATCH_SIZE")? {
            config.gateway.max_batch_size = v;
        }
        if let Some(v) = parse(&lookup, "POOLGATE_CHECKOUT_ATTEMPTS")? {
            config.gateway.checkout_attempts = v;
        }

        Ok(config)
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:7420");
        assert_eq!(config.max_line_bytes, 65_536);
        assert_eq!(config.db.namespace, "poolgate");
        assert_eq!(config.gateway.default_valid_days, 30);
        assert_eq!(config.gateway.checkout_attempts, 3);
    }

    #[test]
    fn overrides_are_applied() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("POOLGATE_LISTEN_ADDR", "0.0.0.0:9000"),
            ("POOLGATE_DB_URL", "db.internal:8000"),
            ("POOLGATE_DB_CONNECT_ATTEMPTS", "10"),
            ("POOLGATE_TOKEN_PREFIX", "AC"),
            ("POOLGATE_DEFAULT_VALID_DAYS", " 7 "),
            ("POOLGATE_CHECKOUT_ATTEMPTS", "5"),
            ("POOLGATE_MAX_LINE_BYTES", "1024"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.db.url, "db.internal:8000");
        assert_eq!(config.db.connect_attempts, 10);
        assert_eq!(config.gateway.token_prefix, "AC");
        assert_eq!(config.gateway.default_valid_days, 7);
        assert_eq!(config.gateway.checkout_attempts, 5);
        assert_eq!(config.max_line_bytes, 1024);
    }

    #[test]
    fn malformed_number_is_an_error() {
        let err = ServerConfig::from_lookup(lookup_from(&[("POOLGATE_MAX_BATCH_SIZE", "lots")]))
            .unwrap_err();
        let ConfigError::Invalid { var, value, .. } = err;
        assert_eq!(var, "POOLGATE_MAX_BATCH_SIZE");
        assert_eq!(value, "lots");
    }
}
