//! P2P-CI rendezvous server.
//!
//! The primary port is used only to hand each client a freshly allocated
//! dedicated port; all control frames for the session flow over a
//! single-use listener on that port. The in-memory index is lost at
//! restart.

mod handler;
mod index;

use anyhow::{Context, Result};
use handler::SessionHandler;
use index::Index;
use p2p_ci_common::ports::PortPool;
use p2p_ci_common::{DEFAULT_SERVER_PORT, MAX_PORT, MIN_PORT};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

struct Server {
    index: Arc<Index>,
    pool: PortPool,
}

fn primary_port() -> Result<u16> {
    match std::env::var("SERVER_CONNECTIONS_PORT") {
        Ok(value) => value
            .parse()
            .with_context(|| format!("invalid SERVER_CONNECTIONS_PORT: {value}")),
        Err(_) => {
            info!("SERVER_CONNECTIONS_PORT not set, using default port {DEFAULT_SERVER_PORT}");
            Ok(DEFAULT_SERVER_PORT)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let port = primary_port()?;
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding primary port {port}"))?;
    info!(port, "server is running");

    let server = Arc::new(Server {
        index: Arc::new(Index::default()),
        pool: PortPool::new(MIN_PORT, MAX_PORT),
    });

    tokio::select! {
        res = accept_clients(listener, server) => res,
        res = shutdown_signal() => {
            info!("server is shutting down");
            res
        }
    }
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => Ok(res?),
        _ = term.recv() => Ok(()),
    }
}

async fn accept_clients(listener: TcpListener, server: Arc<Server>) -> Result<()> {
    for client_id in 1.. {
        let (stream, addr) = listener.accept().await?;
        info!(client = client_id, %addr, "new connection");
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, client_id, server).await {
                error!(client = client_id, error = %e, "session failed");
            }
        });
    }
    Ok(())
}

/// Moves a freshly accepted client onto a dedicated port and runs its
/// session. Resources acquired before a failure are released in reverse
/// order; dropping the primary socket is what the peer observes as EOF.
async fn handle_client(primary: TcpStream, client_id: usize, server: Arc<Server>) -> Result<()> {
    let port = server.pool.take().context("allocating dedicated port")?;

    let (stream, addr) = match rendezvous(primary, port).await {
        Ok(accepted) => accepted,
        Err(e) => {
            server.pool.release(port);
            return Err(e);
        }
    };
    info!(client = client_id, port, %addr, "client moved to dedicated port");

    let (read, write) = stream.into_split();
    let mut handler = SessionHandler {
        index: server.index.clone(),
        read: BufReader::new(read),
        write,
        client_id,
        remote_host: addr.ip().to_string(),
    };
    let result = handler.run().await;
    server.pool.release(port);
    if result.is_ok() {
        info!(client = client_id, port, "session ended");
    }
    result
}

/// Opens the single-use dedicated listener, tells the client where to
/// reconnect, and accepts exactly one connection. The primary socket and
/// the listener are both dropped on return.
async fn rendezvous(mut primary: TcpStream, port: u16) -> Result<(TcpStream, SocketAddr)> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding dedicated port {port}"))?;
    primary
        .write_all(format!("{port}\n").as_bytes())
        .await
        .context("announcing dedicated port")?;
    let accepted = listener.accept().await.context("accepting on dedicated port");
    if accepted.is_err() {
        warn!(port, "client never connected to dedicated port");
    }
    accepted
}
