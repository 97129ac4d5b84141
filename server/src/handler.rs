//! Per-session request loop.
//!
//! One handler per client session, reading tagged control frames off the
//! dedicated connection until EOF. A version mismatch or malformed frame
//! ends the session after the error response; an unknown tag is logged
//! and skipped. Teardown revokes the session's index rows.

use anyhow::Result;
use p2p_ci_common::messages::{
    AddRequest, ListRequest, LookupRequest, Request, ResponseRow, ServerResponse,
};
use p2p_ci_common::{
    read_next_line, status_phrase, write_frame, APPLICATION_VERSION, STATUS_BAD_REQUEST,
    STATUS_NOT_FOUND, STATUS_OK, STATUS_VERSION_NOT_SUPPORTED,
};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{info, warn};

use crate::index::{host_key, Index, RfcEntry};

pub struct SessionHandler<R, W> {
    pub index: Arc<Index>,
    pub read: R,
    pub write: W,
    pub client_id: usize,
    /// IP-only key of the dedicated socket's remote address.
    pub remote_host: String,
}

impl<R, W> SessionHandler<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Serves frames until the session ends, then revokes the session's
    /// index rows whether it ended cleanly or not.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.serve_frames().await;
        self.index.remove_host(&self.remote_host).await;
        result
    }

    async fn serve_frames(&mut self) -> Result<()> {
        loop {
            let frame = match read_next_line(&mut self.read).await {
                Ok(frame) => frame,
                Err(_) => {
                    info!(client = self.client_id, "client disconnected");
                    break;
                }
            };
            match Request::decode(&frame) {
                Ok(Some(req)) => {
                    if req.client_version() != APPLICATION_VERSION {
                        warn!(
                            client = self.client_id,
                            version = req.client_version(),
                            "version mismatch"
                        );
                        self.respond(STATUS_VERSION_NOT_SUPPORTED, vec![]).await?;
                        break;
                    }
                    match req {
                        Request::Add(add) => self.add(add).await?,
                        Request::Lookup(lookup) => self.lookup(lookup).await?,
                        Request::List(list) => self.list(list).await?,
                    }
                }
                Ok(None) => {
                    warn!(client = self.client_id, tag = frame[0], "unknown message type");
                    continue;
                }
                Err(e) => {
                    warn!(client = self.client_id, error = %e, "malformed frame");
                    self.respond(STATUS_BAD_REQUEST, vec![]).await?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// ADD is idempotent: a duplicate entry still gets a 200 echoing the
    /// single row.
    async fn add(&mut self, add: AddRequest) -> Result<()> {
        info!(
            client = self.client_id,
            number = %add.rfc_number,
            title = %add.rfc_title,
            from = %add.client_ip,
            upload_port = %add.client_upload_port,
            "ADD request"
        );
        let host = host_key(&add.client_ip);
        let entry = RfcEntry {
            number: add.rfc_number.clone(),
            title: add.rfc_title.clone(),
        };
        if !self.index.add(host, entry, &add.client_upload_port).await {
            info!(client = self.client_id, number = %add.rfc_number, host, "RFC already indexed");
        }
        let row = ResponseRow {
            rfc_number: add.rfc_number,
            rfc_title: add.rfc_title,
            client_ip: add.client_ip,
            client_upload_port: add.client_upload_port,
        };
        self.respond(STATUS_OK, vec![row]).await
    }

    async fn lookup(&mut self, lookup: LookupRequest) -> Result<()> {
        info!(
            client = self.client_id,
            number = %lookup.rfc_number,
            from = %lookup.client_ip,
            "LOOKUP request"
        );
        let rows = self.index.lookup(&lookup.rfc_number).await;
        if rows.is_empty() {
            self.respond(STATUS_NOT_FOUND, vec![]).await
        } else {
            self.respond(STATUS_OK, rows).await
        }
    }

    async fn list(&mut self, list: ListRequest) -> Result<()> {
        info!(client = self.client_id, from = %list.client_ip, "LIST request");
        let rows = self.index.list().await;
        self.respond(STATUS_OK, rows).await
    }

    async fn respond(&mut self, code: u16, rows: Vec<ResponseRow>) -> Result<()> {
        let response = ServerResponse::new(code, status_phrase(code), rows);
        write_frame(&mut self.write, &response.encode()?).await
    }
}
