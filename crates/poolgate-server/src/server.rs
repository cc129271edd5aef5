//! TCP listener speaking the JSON-lines protocol.

use std::future::Future;
use std::sync::Arc;

use poolgate_core::clock::SystemClock;
use poolgate_db::repository::{
    SurrealAllocationStore, SurrealGrantRepository, SurrealLeaseRepository,
    SurrealResourceRepository,
};
use poolgate_gateway::{Gateway, GatewayConfig};
use surrealdb::{Connection, Surreal};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::protocol::{handle_line, rejection};

pub type ServerGateway<C> = Gateway<
    SurrealGrantRepository<C>,
    SurrealResourceRepository<C>,
    SurrealLeaseRepository<C>,
    SurrealAllocationStore<C>,
    SystemClock,
>;

pub fn build_gateway<C: Connection>(db: Surreal<C>, config: GatewayConfig) -> ServerGateway<C> {
    Gateway::new(
        SurrealGrantRepository::new(db.clone()),
        SurrealResourceRepository::new(db.clone()),
        SurrealLeaseRepository::new(db.clone()),
        SurrealAllocationStore::new(db),
        SystemClock,
        config,
    )
}

/// Accept connections until `shutdown` resolves. Connections already
/// open keep running on their own tasks.
///
/// A request line longer than `max_line_bytes` is answered with a
/// `validation` failure and the connection is closed.
pub async fn serve<C, F>(
    listener: TcpListener,
    gateway: Arc<ServerGateway<C>>,
    max_line_bytes: usize,
    shutdown: F,
) -> std::io::Result<()>
where
    C: Connection,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("Listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!(%peer, "Connection accepted");
                let gateway = Arc::clone(&gateway);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, gateway, max_line_bytes).await {
                        warn!(%peer, error = %e, "Connection closed with error");
                    }
                });
            }
        }
    }
}

async fn handle_connection<C: Connection>(
    stream: TcpStream,
    gateway: Arc<ServerGateway<C>>,
    max_line_bytes: usize,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        // Bounded read: the line is never buffered past the limit.
        let read = (&mut reader)
            .take(max_line_bytes as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            return Ok(());
        }
        if buf.len() > max_line_bytes {
            warn!(limit = max_line_bytes, "Request line too long, closing connection");
            let mut response =
                rejection(format!("request line exceeds {max_line_bytes} bytes"));
            response.push('\n');
            writer.write_all(response.as_bytes()).await?;
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut response = handle_line(&gateway, line).await;
        response.push('\n');
        writer.write_all(response.as_bytes()).await?;
    }
}
