//! Live fan-out over SSH.
//!
//! Each host of a round runs as its own tokio task; the round completes
//! when every task has answered, failed or hit its time limit. The
//! successful outputs then replace the cached capture of the command.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::cache::ResultCache;
use super::{FanOutResult, FleetExecutor};
use crate::config::{Host, HostDirectory};
use crate::ssh::{Transport, TransportError, TunnelPool};

/// Per-host time budget used when none is configured.
pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(90);

/// Executor that talks to the network and maintains the cache.
pub struct LiveExecutor {
    hosts: Vec<Host>,
    transport: Arc<dyn Transport>,
    tunnels: Arc<TunnelPool>,
    cache: Arc<Mutex<ResultCache>>,
    scope: String,
    /// Upper bound for tunnel + command on one host.
    host_timeout: Duration,
    /// Hosts that failed in any round of this run.
    failed: Mutex<BTreeSet<String>>,
}

impl LiveExecutor {
    #[must_use]
    pub fn new(
        directory: &HostDirectory,
        transport: Arc<dyn Transport>,
        cache: ResultCache,
        scope: impl Into<String>,
    ) -> Self {
        let tunnels = Arc::new(TunnelPool::new(Arc::clone(&transport)));
        Self {
            hosts: directory.hosts().to_vec(),
            transport,
            tunnels,
            cache: Arc::new(Mutex::new(cache)),
            scope: scope.into(),
            host_timeout: DEFAULT_HOST_TIMEOUT,
            failed: Mutex::new(BTreeSet::new()),
        }
    }

    /// Sets the per-host time budget.
    #[must_use]
    pub fn with_host_timeout(mut self, host_timeout: Duration) -> Self {
        self.host_timeout = host_timeout;
        self
    }

    /// Returns the gateway tunnel pool.
    #[must_use]
    pub fn tunnels(&self) -> &TunnelPool {
        &self.tunnels
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns a copy of the current cache contents.
    #[must_use]
    pub fn cache_snapshot(&self) -> ResultCache {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Closes every gateway tunnel opened by this executor.
    pub async fn shutdown(&self) {
        self.tunnels.close_all().await;
    }

    fn record_failures(&self, failed: &BTreeSet<String>) {
        if failed.is_empty() {
            return;
        }
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(failed.iter().cloned());
    }

    /// Replaces the cached capture of the round and writes the cache file.
    ///
    /// The file write runs on the blocking pool.
    async fn store(&self, result: &FanOutResult) {
        let cache = Arc::clone(&self.cache);
        let scope = self.scope.clone();
        let command = result.command.clone();
        let outputs = result.outputs.clone();

        let saved = tokio::task::spawn_blocking(move || {
            let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            cache.put(&scope, &command, outputs);
            cache.save()
        })
        .await;

        match saved {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Cannot persist result cache: {}", e),
            Err(e) => error!("Cache writer aborted: {}", e),
        }
    }
}

/// Runs `command` on one host, through its gateway when it has one.
async fn run_on_host(
    host: &Host,
    transport: &dyn Transport,
    tunnels: &TunnelPool,
    command: &str,
) -> Result<String, TransportError> {
    let tunnel = match host.gateway_key() {
        Some(key) => Some(tunnels.tunnel_for(&key).await?),
        None => None,
    };

    transport.run(host, tunnel.as_deref(), command).await
}

#[async_trait]
impl FleetExecutor for LiveExecutor {
    async fn execute(&self, command: &str) -> FanOutResult {
        let mut result = FanOutResult::new(command);

        if command.trim().is_empty() {
            error!("Refusing to run an empty command");
            result.failed = self.hosts.iter().map(|h| h.address.clone()).collect();
            self.record_failures(&result.failed);
            return result;
        }

        info!("Running on {} hosts: {}", self.hosts.len(), command);

        let command: Arc<str> = Arc::from(command);
        let mut tasks = JoinSet::new();
        let mut addresses = HashMap::with_capacity(self.hosts.len());

        for host in &self.hosts {
            let host = host.clone();
            let transport = Arc::clone(&self.transport);
            let tunnels = Arc::clone(&self.tunnels);
            let command = Arc::clone(&command);
            let limit = self.host_timeout;
            let address = host.address.clone();

            let handle = tasks.spawn(async move {
                let outcome = tokio::time::timeout(
                    limit,
                    run_on_host(&host, transport.as_ref(), &tunnels, &command),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(TransportError::Timeout {
                        target: host.target(),
                        secs: limit.as_secs(),
                    })
                });
                (host.address, outcome)
            });
            addresses.insert(handle.id(), address);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((address, Ok(output))) => {
                    debug!("{} answered ({} bytes)", address, output.len());
                    result.outputs.insert(address, output);
                }
                Ok((address, Err(e))) => {
                    warn!("{} failed ({:?}): {}", address, e.kind(), e);
                    result.failed.insert(address);
                }
                Err(e) => {
                    let address = addresses
                        .get(&e.id())
                        .cloned()
                        .unwrap_or_else(|| "<unknown>".to_string());
                    error!("Task for {} aborted: {}", address, e);
                    result.failed.insert(address);
                }
            }
        }

        info!(
            "Round complete: {} answered, {} failed",
            result.succeeded(),
            result.failed.len()
        );

        self.record_failures(&result.failed);
        self.store(&result).await;
        result
    }

    fn failed_hosts(&self) -> Vec<String> {
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl fmt::Debug for LiveExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveExecutor")
            .field("hosts", &self.hosts.len())
            .field("scope", &self.scope)
            .field("host_timeout", &self.host_timeout)
            .finish_non_exhaustive()
    }
}
