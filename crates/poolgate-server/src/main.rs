//! poolgate server: application entry point.

mod config;
mod protocol;
mod server;

use std::sync::Arc;

use poolgate_db::{DbError, DbManager};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, ServerConfig};
use crate::server::{build_gateway, serve};

#[derive(Debug, Error)]
enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "poolgate=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).json().init();

    info!("Starting poolgate server...");

    if let Err(e) = run().await {
        error!(error = %e, "poolgate server failed");
        std::process::exit(1);
    }

    info!("poolgate server stopped.");
}

async fn run() -> Result<(), ServerError> {
    let config = ServerConfig::from_env()?;

    let manager = DbManager::connect_and_migrate(&config.db).await?;
    let gateway = Arc::new(build_gateway(manager.client().clone(), config.gateway));

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for JSON-lines clients");

    serve(listener, gateway, config.max_line_bytes, async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received interrupt"),
            Err(e) => error!(error = %e, "Failed to listen for interrupt"),
        }
    })
    .await?;

    Ok(())
}
