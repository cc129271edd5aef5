//! SurrealDB connection management.
//!
//! The gateway is useless without its store, so start-up retries the
//! connection a few times before giving up. This covers a server that is
//! launched alongside the database and races it.

use std::fmt;
use std::time::Duration;

use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tracing::{info, warn};

use crate::error::DbError;
use crate::schema::run_migrations;

const RETRY_BASE_DELAY_MS: u64 = 250;
const RETRY_MAX_DELAY_MS: u64 = 4_000;

/// Configuration for connecting to SurrealDB.
#[derive(Clone)]
pub struct DbConfig {
    /// WebSocket address, with or without a `ws://` scheme
    /// (e.g., `127.0.0.1:8000`).
    pub url: String,
    pub namespace: String,
    pub database: String,
    /// Root credentials.
    pub username: String,
    pub password: String,
    /// Connection attempts before start-up fails (default: 5).
    pub connect_attempts: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:8000".into(),
            namespace: "poolgate".into(),
            database: "main".into(),
            username: "root".into(),
            password: "root".into(),
            connect_attempts: 5,
        }
    }
}

// Hand-written so the root password never reaches the logs.
impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("url", &self.url)
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("connect_attempts", &self.connect_attempts)
            .finish()
    }
}

impl DbConfig {
    /// The address handed to the WebSocket engine, which expects no scheme.
    pub fn address(&self) -> &str {
        let url = self.url.trim();
        url.strip_prefix("ws://")
            .or_else(|| url.strip_prefix("wss://"))
            .unwrap_or(url)
            .trim_end_matches('/')
    }
}

/// Delay before connection attempt `attempt + 1`: 250ms doubling up to 4s.
fn reconnect_delay(attempt: u32) -> Duration {
    let delay = RETRY_BASE_DELAY_MS.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(RETRY_MAX_DELAY_MS))
}

/// Owns the shared client that every repository clones.
#[derive(Clone)]
pub struct DbManager {
    db: Surreal<Client>,
}

impl DbManager {
    /// Connect, sign in as root and select the configured namespace and
    /// database, retrying with backoff up to `connect_attempts` times.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let attempts = config.connect_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::connect_once(config).await {
                Ok(manager) => return Ok(manager),
                Err(e) if attempt < attempts => {
                    let delay = reconnect_delay(attempt - 1);
                    warn!(
                        attempt,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "SurrealDB not reachable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn connect_once(config: &DbConfig) -> Result<Self, surrealdb::Error> {
        info!(
            address = %config.address(),
            namespace = %config.namespace,
            database = %config.database,
            "Connecting to SurrealDB"
        );

        let db = Surreal::new::<Ws>(config.address()).await?;
        db.signin(Root {
            username: config.username.clone(),
            password: config.password.clone(),
        })
        .await?;
        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        info!("Connected to SurrealDB");
        Ok(Self { db })
    }

    /// Connect and bring the pool schema up to date.
    pub async fn connect_and_migrate(config: &DbConfig) -> Result<Self, DbError> {
        let manager = Self::connect(config).await?;
        run_migrations(&manager.db).await?;
        Ok(manager)
    }

    pub fn client(&self) -> &Surreal<Client> {
        &self.db
    }
}
