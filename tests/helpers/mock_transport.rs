//! Scriptable in-memory transport.
//!
//! Answers commands from a response table, and can fail chosen hosts,
//! commands or gateways, or hang a host until the caller gives up. Every
//! call is counted so tests can assert on network activity.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use smartos_manager::config::Host;
use smartos_manager::ssh::{GatewayKey, GatewayTunnel, Transport, TransportError};

#[derive(Default)]
pub struct MockTransport {
    /// (address, command) -> output.
    responses: Mutex<HashMap<(String, String), String>>,
    failing_hosts: Mutex<HashSet<String>>,
    failing_commands: Mutex<HashSet<(String, String)>>,
    failing_gateways: Mutex<HashSet<String>>,
    hanging_hosts: Mutex<HashSet<String>>,
    open_delay: Duration,
    /// Host address -> address of the tunnel object it was handed.
    tunnel_ids: Mutex<HashMap<String, usize>>,
    pub tunnel_opens: AtomicUsize,
    pub tunnel_closes: AtomicUsize,
    pub runs: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every tunnel opening, widening the window for races.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn respond(&self, address: &str, command: &str, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert((address.to_string(), command.to_string()), output.to_string());
    }

    pub fn fail_host(&self, address: &str) {
        self.failing_hosts.lock().unwrap().insert(address.to_string());
    }

    pub fn recover_host(&self, address: &str) {
        self.failing_hosts.lock().unwrap().remove(address);
    }

    pub fn fail_command(&self, address: &str, command: &str) {
        self.failing_commands
            .lock()
            .unwrap()
            .insert((address.to_string(), command.to_string()));
    }

    pub fn fail_gateway(&self, address: &str) {
        self.failing_gateways.lock().unwrap().insert(address.to_string());
    }

    pub fn hang_host(&self, address: &str) {
        self.hanging_hosts.lock().unwrap().insert(address.to_string());
    }

    /// Returns the identity of the tunnel `address` last ran through.
    pub fn tunnel_id(&self, address: &str) -> Option<usize> {
        self.tunnel_ids.lock().unwrap().get(address).copied()
    }

    pub fn opens(&self) -> usize {
        self.tunnel_opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.tunnel_closes.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_tunnel(&self, key: &GatewayKey) -> Result<GatewayTunnel, TransportError> {
        self.tunnel_opens.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        if self.failing_gateways.lock().unwrap().contains(&key.address) {
            return Err(TransportError::Tunnel {
                gateway: key.to_string(),
                reason: "Connection refused".to_string(),
            });
        }
        Ok(GatewayTunnel::new(key.clone(), None))
    }

    async fn run(
        &self,
        host: &Host,
        tunnel: Option<&GatewayTunnel>,
        command: &str,
    ) -> Result<String, TransportError> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        if let Some(tunnel) = tunnel {
            self.tunnel_ids
                .lock()
                .unwrap()
                .insert(host.address.clone(), tunnel as *const GatewayTunnel as usize);
        }

        let hangs = self.hanging_hosts.lock().unwrap().contains(&host.address);
        if hangs {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let key = (host.address.clone(), command.to_string());
        let fails = self.failing_hosts.lock().unwrap().contains(&host.address)
            || self.failing_commands.lock().unwrap().contains(&key);
        if fails {
            return Err(TransportError::Exit {
                target: host.target(),
                code: Some(255),
                reason: "Permission denied".to_string(),
            });
        }

        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn close_tunnel(&self, _tunnel: &GatewayTunnel) {
        self.tunnel_closes.fetch_add(1, Ordering::SeqCst);
    }
}
