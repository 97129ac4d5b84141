//! In-memory RFC index and peer registry.
//!
//! Two independently locked maps, both keyed by the IP-only host key.
//! Writes (ADD, disconnect) take the exclusive lock, reads (LIST, LOOKUP)
//! the shared one. No transaction spans both maps; a LIST may observe a
//! host in the RFC map before its registry entry lands and skips it.

use fxhash::FxHashMap;
use p2p_ci_common::messages::ResponseRow;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Strips the ephemeral port from a reported or observed address,
/// leaving the peer's identity.
pub fn host_key(addr: &str) -> &str {
    addr.split(':').next().unwrap_or(addr)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RfcEntry {
    pub number: String,
    pub title: String,
}

#[derive(Default)]
pub struct Index {
    rfcs: RwLock<FxHashMap<String, Vec<RfcEntry>>>,
    peers: RwLock<FxHashMap<String, String>>,
}

impl Index {
    /// Records an RFC held by `host` and registers the host's upload port
    /// if it has none yet. Returns false when the entry was already
    /// present; duplicates are suppressed per host.
    pub async fn add(&self, host: &str, entry: RfcEntry, upload_port: &str) -> bool {
        let inserted = {
            let mut rfcs = self.rfcs.write().await;
            let list = rfcs.entry(host.to_owned()).or_default();
            if list.contains(&entry) {
                false
            } else {
                debug!(host, number = %entry.number, title = %entry.title, "added RFC to index");
                list.push(entry);
                true
            }
        };
        if inserted {
            let mut peers = self.peers.write().await;
            peers
                .entry(host.to_owned())
                .or_insert_with(|| upload_port.to_owned());
        }
        inserted
    }

    /// All hosts holding the given RFC number, joined with their upload
    /// ports.
    pub async fn lookup(&self, number: &str) -> Vec<ResponseRow> {
        let rfcs = self.rfcs.read().await;
        let peers = self.peers.read().await;
        let mut rows = Vec::new();
        for (host, entries) in rfcs.iter() {
            let Some(upload_port) = peers.get(host) else {
                continue;
            };
            for entry in entries.iter().filter(|e| e.number == number) {
                rows.push(ResponseRow {
                    rfc_number: entry.number.clone(),
                    rfc_title: entry.title.clone(),
                    client_ip: host.clone(),
                    client_upload_port: upload_port.clone(),
                });
            }
        }
        rows
    }

    /// The full listing: every RFC of every registered host.
    pub async fn list(&self) -> Vec<ResponseRow> {
        let rfcs = self.rfcs.read().await;
        let peers = self.peers.read().await;
        let mut rows = Vec::new();
        for (host, entries) in rfcs.iter() {
            let Some(upload_port) = peers.get(host) else {
                warn!(host, "upload port not found, skipping host");
                continue;
            };
            for entry in entries {
                rows.push(ResponseRow {
                    rfc_number: entry.number.clone(),
                    rfc_title: entry.title.clone(),
                    client_ip: host.clone(),
                    client_upload_port: upload_port.clone(),
                });
            }
        }
        rows
    }

    /// Drops everything keyed by the disconnecting peer's host.
    pub async fn remove_host(&self, host: &str) {
        self.rfcs.write().await.remove(host);
        self.peers.write().await.remove(host);
        debug!(host, "removed host from index");
    }
}
