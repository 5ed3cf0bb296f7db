//! Host port allocation
//!
//! Hands out ports from a fixed inclusive range. A port is claimed only if it
//! is not already held by this process and the OS reports it free. Allocation
//! is serialized so two concurrent callers can never claim the same port.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("No available ports in range {start}-{end}")]
    NoPortsAvailable { start: u16, end: u16 },
}

/// OS-level check of whether a port can be bound
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn is_free(&self, port: u16) -> bool;
}

/// Probes by binding a TCP listener on all interfaces and dropping it
#[derive(Debug, Default, Clone)]
pub struct TcpPortProbe;

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn is_free(&self, port: u16) -> bool {
        tokio::net::TcpListener::bind(("0.0.0.0", port)).await.is_ok()
    }
}

/// Port allocator shared by all pipeline runs
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    in_use: Mutex<BTreeSet<u16>>,
    /// Held for the whole scan-and-claim of one allocation
    gate: tokio::sync::Mutex<()>,
    probe: Arc<dyn PortProbe>,
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>, probe: Arc<dyn PortProbe>) -> Self {
        Self {
            range,
            in_use: Mutex::new(BTreeSet::new()),
            gate: tokio::sync::Mutex::new(()),
            probe,
        }
    }

    pub fn range(&self) -> &RangeInclusive<u16> {
        &self.range
    }

    /// Claims the lowest port in the range that is neither held nor busy.
    ///
    /// Ports already held are skipped without consulting the OS.
    pub async fn allocate(&self) -> Result<u16, PortError> {
        let _gate = self.gate.lock().await;

        for port in self.range.clone() {
            if self.is_held(port) {
                continue;
            }

            if !self.probe.is_free(port).await {
                debug!(port, "Port busy at OS level, skipping");
                continue;
            }

            self.lock_in_use().insert(port);
            info!(port, "Allocated port");
            return Ok(port);
        }

        warn!(
            "Port range {}-{} exhausted",
            self.range.start(),
            self.range.end()
        );
        Err(PortError::NoPortsAvailable {
            start: *self.range.start(),
            end: *self.range.end(),
        })
    }

    /// Returns `port` to the pool. Releasing a port that is not held is a no-op.
    pub fn release(&self, port: u16) -> bool {
        let released = self.lock_in_use().remove(&port);
        if released {
            info!(port, "Released port");
        } else {
            debug!(port, "Port was not held, nothing to release");
        }
        released
    }

    pub fn is_held(&self, port: u16) -> bool {
        self.lock_in_use().contains(&port)
    }

    /// Ports currently held, in ascending order
    pub fn in_use(&self) -> Vec<u16> {
        self.lock_in_use().iter().copied().collect()
    }

    fn lock_in_use(&self) -> std::sync::MutexGuard<'_, BTreeSet<u16>> {
        self.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
