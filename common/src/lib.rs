//! Shared pieces of the P2P-CI network: protocol constants, the wire
//! codec, and the dedicated-port pool.

pub mod messages;
pub mod ports;

use anyhow::{bail, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

/// Protocol version literal carried in every request.
pub const APPLICATION_VERSION: &str = "P2P-CI/1.0";

/// Default port for the server's primary accept socket.
pub const DEFAULT_SERVER_PORT: u16 = 7734;

/// Range of ports usable for dedicated sockets and peer upload sockets.
pub const MIN_PORT: u16 = 4000;
pub const MAX_PORT: u16 = 7000;

pub const SERVER_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
pub const PEER_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

// HTTP status code equivalents for the P2P protocol.
pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_VERSION_NOT_SUPPORTED: u16 = 505;

pub fn status_phrase(code: u16) -> &'static str {
    match code {
        STATUS_OK => "OK",
        STATUS_BAD_REQUEST => "Bad Request",
        STATUS_NOT_FOUND => "Not Found",
        STATUS_VERSION_NOT_SUPPORTED => "P2P-CI Version Not Supported",
        _ => "Unknown",
    }
}

pub async fn read_next_line(r: &mut (impl AsyncBufReadExt + Unpin)) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    if 0 == r.read_until(b'\n', &mut line).await? {
        bail!("no message");
    }
    Ok(line)
}

pub async fn write_frame(w: &mut (impl AsyncWriteExt + Unpin), frame: &[u8]) -> Result<()> {
    w.write_all(frame).await?;
    Ok(w.flush().await?)
}
