//! Pool of dedicated ports handed out to client sessions.
//!
//! The pool is seeded from a static range at startup, but ports can be
//! taken by other processes at any time, so `take` probes each candidate
//! with a throwaway bind before handing it out.

use anyhow::{bail, Result};
use std::net::TcpListener;
use std::sync::Mutex;
use tracing::debug;

pub struct PortPool {
    free: Mutex<Vec<u16>>,
}

impl PortPool {
    /// Seeds the pool with every port in `[min, max)`. The highest port
    /// is handed out first.
    pub fn new(min: u16, max: u16) -> Self {
        Self {
            free: Mutex::new((min..max).collect()),
        }
    }

    /// Pops ports until one is currently bindable. Ports that fail the
    /// probe stay out of the pool; something else owns them.
    pub fn take(&self) -> Result<u16> {
        let mut free = self.free.lock().unwrap();
        while let Some(port) = free.pop() {
            if port_available(port) {
                return Ok(port);
            }
            debug!(port, "skipping unbindable port");
        }
        bail!("no free ports available in pool");
    }

    /// Returns a port to the pool. Callers release exactly once per
    /// successful take.
    pub fn release(&self, port: u16) {
        let mut free = self.free.lock().unwrap();
        free.push(port);
        debug!(port, available = free.len(), "returned port to pool");
    }

    pub fn available(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

/// Probes a port by opening and immediately closing a listener.
pub fn port_available(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}
