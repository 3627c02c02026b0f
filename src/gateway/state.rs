//! Shared Gateway state: process-wide defaults plus the per-terminal session
//! lock.
//!
//! `GatewayState` plays the role the teacher's `DbPool` plays inside
//! `axum::extract::State`: one value built at startup, cloned (behind an
//! `Arc`) into every request handler. Its defaults live behind a
//! `tokio::sync::RwLock` the same way the teacher guards its pooled
//! resources, so `/config` can swap them out without a restart.

use std::{collections::HashMap, net::IpAddr, sync::Arc, time::Duration};

use tokio::sync::{Mutex, RwLock};

use crate::{engine::Timeouts, gateway::config::GatewayConfig};

/// The subset of [`GatewayConfig`] that `/config` is allowed to override at
/// runtime.
#[derive(Debug, Clone)]
pub struct GatewayDefaults {
    /// Default terminal IP address.
    pub terminal_ip: String,
    /// Default primary terminal TCP port.
    pub terminal_port: u16,
    /// Default secondary terminal TCP port.
    pub terminal_port_alt: u16,
    /// Default ECR identity.
    pub ecr_id: String,
    /// Connect timeout ceiling.
    pub connect_timeout: Duration,
    /// Overall session timeout ceiling.
    pub read_timeout: Duration,
    /// Idle-since-last-frame timeout ceiling.
    pub idle_byte_timeout: Duration,
}

impl From<&GatewayConfig> for GatewayDefaults {
    fn from(cfg: &GatewayConfig) -> Self {
        Self {
            terminal_ip: cfg.terminal_ip.clone(),
            terminal_port: cfg.terminal_port,
            terminal_port_alt: cfg.terminal_port_alt,
            ecr_id: cfg.ecr_id.clone(),
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
            read_timeout: Duration::from_millis(cfg.read_timeout_ms),
            idle_byte_timeout: Duration::from_millis(cfg.idle_byte_timeout_ms),
        }
    }
}

impl GatewayDefaults {
    /// Build the [`Timeouts`] the Protocol Engine should use for a session.
    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        Timeouts::new(self.connect_timeout, self.read_timeout, self.idle_byte_timeout)
    }
}

/// Per-`(ip, port)` serialization lock implementing the §5 "terminal
/// multiplexing" rule: the Gateway must not open overlapping sessions to the
/// same physical terminal for transactional commands.
#[derive(Debug, Default)]
pub struct SessionLock {
    locks: Mutex<HashMap<(IpAddr, u16), Arc<Mutex<()>>>>,
}

impl SessionLock {
    /// Fetch (creating if absent) the lock guarding sessions to `(ip, port)`.
    pub async fn lock_for(&self, ip: IpAddr, port: u16) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry((ip, port)).or_insert_with(|| Arc::new(Mutex::new(()))))
    }
}

/// Gateway-wide shared state, constructed once and held behind
/// `axum::extract::State`.
#[derive(Debug)]
pub struct GatewayState {
    /// Runtime-overridable defaults.
    pub defaults: RwLock<GatewayDefaults>,
    /// Per-terminal session serialization.
    pub sessions: SessionLock,
}

impl GatewayState {
    /// Build gateway state from a resolved [`GatewayConfig`].
    #[must_use]
    pub fn new(cfg: &GatewayConfig) -> Self {
        Self {
            defaults: RwLock::new(GatewayDefaults::from(cfg)),
            sessions: SessionLock::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_terminal_shares_one_lock() {
        let sessions = SessionLock::default();
        let ip: IpAddr = "127.0.0.1".parse().expect("valid ip");
        let a = sessions.lock_for(ip, 5600).await;
        let b = sessions.lock_for(ip, 5600).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn distinct_ports_get_distinct_locks() {
        let sessions = SessionLock::default();
        let ip: IpAddr = "127.0.0.1".parse().expect("valid ip");
        let a = sessions.lock_for(ip, 5600).await;
        let b = sessions.lock_for(ip, 5601).await;
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
