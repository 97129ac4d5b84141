//! P2P-CI peer agent.
//!
//! Registers local RFC files with the rendezvous server over a dedicated
//! control channel, then simultaneously runs the interactive command loop
//! and an upload server answering GET requests from other peers.

mod commands;
mod store;
mod upload;

use anyhow::{Context, Result};
use p2p_ci_common::messages::{AddRequest, Request};
use p2p_ci_common::ports::port_available;
use p2p_ci_common::{
    read_next_line, write_frame, APPLICATION_VERSION, DEFAULT_SERVER_PORT, MAX_PORT, MIN_PORT,
    SERVER_RESPONSE_TIMEOUT,
};
use rand::Rng;
use std::path::PathBuf;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn server_port() -> Result<u16> {
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

fn server_address() -> String {
    std::env::var("SERVER_IP_ADDRESS").unwrap_or_else(|_| {
        info!("SERVER_IP_ADDRESS not set, using localhost");
        "localhost".to_owned()
    })
}

/// Samples upload ports until one passes the bind probe.
fn random_upload_port() -> u16 {
    let mut rng = rand::thread_rng();
    loop {
        let port = rng.gen_range(MIN_PORT..MAX_PORT);
        if port_available(port) {
            return port;
        }
    }
}

/// Connects to the primary port, reads the dedicated-port announcement,
/// and reconnects there. The primary connection is dropped; the returned
/// stream is the long-lived control channel.
async fn connect_control_channel(address: &str, port: u16) -> Result<TcpStream> {
    let primary = TcpStream::connect((address, port))
        .await
        .with_context(|| format!("connecting to server {address}:{port}"))?;
    let mut primary = BufReader::new(primary);
    let line = read_next_line(&mut primary)
        .await
        .context("reading dedicated port from server")?;
    let dedicated: u16 = std::str::from_utf8(&line)?
        .trim()
        .parse()
        .context("server sent an invalid dedicated port")?;
    info!(port = dedicated, "server assigned dedicated port");
    TcpStream::connect((address, dedicated))
        .await
        .with_context(|| format!("connecting to dedicated port {dedicated}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let address = server_address();
    let port = server_port()?;
    let control = connect_control_channel(&address, port).await?;
    let local_addr = control.local_addr()?;
    let (control_read, mut control_write) = control.into_split();
    let mut control_read = BufReader::new(control_read);

    let rfc_dir = PathBuf::from(store::RFC_DIR);
    let rfcs = store::scan(&rfc_dir)?;
    info!(count = rfcs.len(), "found local RFC files");

    let upload_port = random_upload_port();
    let upload_listener = TcpListener::bind(("0.0.0.0", upload_port))
        .await
        .with_context(|| format!("binding upload port {upload_port}"))?;
    info!(port = upload_port, "upload server listening");

    // Register every local RFC; responses are awaited and discarded.
    for rfc in &rfcs {
        let request = Request::Add(AddRequest {
            rfc_number: rfc.number.clone(),
            rfc_title: rfc.title.clone(),
            client_ip: local_addr.to_string(),
            client_upload_port: upload_port.to_string(),
            client_version: APPLICATION_VERSION.to_owned(),
        });
        write_frame(&mut control_write, &request.encode()?).await?;
        match timeout(SERVER_RESPONSE_TIMEOUT, read_next_line(&mut control_read)).await {
            Ok(read) => {
                read?;
            }
            Err(_) => warn!(number = %rfc.number, "no response to registration ADD"),
        }
    }
    info!(count = rfcs.len(), "registered local RFCs with server");

    tokio::select! {
        res = commands::interactive_loop(&mut control_read, &mut control_write) => res,
        res = upload::serve(upload_listener, rfc_dir) => res,
        res = shutdown_signal() => {
            info!("client is shutting down");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_port_stays_in_range() {
        for _ in 0..20 {
            let port = random_upload_port();
            assert!((MIN_PORT..MAX_PORT).contains(&port));
        }
    }
}
