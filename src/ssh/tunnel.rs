//! Gateway tunnel pool.
//!
//! Hosts behind the same jump host share one tunnel. Tunnels are opened
//! lazily, the first time a host needs one, and exactly once per
//! (gateway address, gateway user) pair even when every host of a round
//! asks for it at the same moment.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::transport::{Transport, TransportError};

/// Identity of a gateway tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GatewayKey {
    /// Jump host address.
    pub address: String,
    /// Login user on the jump host.
    pub user: String,
}

impl GatewayKey {
    #[must_use]
    pub fn new(address: impl Into<String>, user: impl Into<String>) -> Self {
        let address = address.into();
        let user = user.into();
        assert!(!address.is_empty(), "gateway address must not be empty");
        assert!(!user.is_empty(), "gateway user must not be empty");

        Self { address, user }
    }

    /// Returns `user@address`.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }
}

impl fmt::Display for GatewayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.address)
    }
}

/// An established route through a jump host.
#[derive(Debug)]
pub struct GatewayTunnel {
    key: GatewayKey,
    /// Control socket of the multiplexed master connection, when the
    /// transport uses one.
    control_path: Option<PathBuf>,
}

impl GatewayTunnel {
    #[must_use]
    pub fn new(key: GatewayKey, control_path: Option<PathBuf>) -> Self {
        Self { key, control_path }
    }

    #[must_use]
    pub fn key(&self) -> &GatewayKey {
        &self.key
    }

    #[must_use]
    pub fn control_path(&self) -> Option<&Path> {
        self.control_path.as_deref()
    }
}

/// Outcome of opening a tunnel, shared by every host behind it.
type TunnelSlot = Result<Arc<GatewayTunnel>, TransportError>;

/// Lazily populated registry of gateway tunnels.
pub struct TunnelPool {
    transport: Arc<dyn Transport>,
    /// One cell per gateway; the mutex only guards fetching the cell.
    tunnels: Mutex<HashMap<GatewayKey, Arc<OnceCell<TunnelSlot>>>>,
}

impl TunnelPool {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            tunnels: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the tunnel for `key`, opening it on first use.
    ///
    /// A failed opening is remembered: every later caller for the same
    /// gateway gets the same error without another attempt.
    pub async fn tunnel_for(&self, key: &GatewayKey) -> TunnelSlot {
        let cell = {
            let mut guard = self.tunnels.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(guard.entry(key.clone()).or_default())
        };

        cell.get_or_init(|| async {
            info!("Opening gateway tunnel {}", key);
            match self.transport.open_tunnel(key).await {
                Ok(tunnel) => {
                    debug!("Gateway tunnel {} established", key);
                    Ok(Arc::new(tunnel))
                }
                Err(e) => {
                    warn!("Gateway tunnel {} failed: {}", key, e);
                    Err(e)
                }
            }
        })
        .await
        .clone()
    }

    /// Returns the number of successfully established tunnels.
    #[must_use]
    pub fn established(&self) -> usize {
        let guard = self.tunnels.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .values()
            .filter(|cell| matches!(cell.get(), Some(Ok(_))))
            .count()
    }

    /// Tears down every established tunnel and empties the pool.
    pub async fn close_all(&self) {
        let cells: Vec<_> = {
            let mut guard = self.tunnels.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain().map(|(_, cell)| cell).collect()
        };

        for cell in cells {
            if let Some(Ok(tunnel)) = cell.get() {
                info!("Closing gateway tunnel {}", tunnel.key());
                self.transport.close_tunnel(tunnel).await;
            }
        }
    }
}

impl fmt::Debug for TunnelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelPool")
            .field("established", &self.established())
            .finish_non_exhaustive()
    }
}
