//! Fleet execution.
//!
//! A [`FleetExecutor`] fans one command out to every host of the directory
//! and returns a [`FanOutResult`]. Two executors implement the contract:
//!
//! - [`LiveExecutor`]: runs over SSH in parallel and records what it saw
//!   in the [`ResultCache`]
//! - [`ReplayExecutor`]: answers from the cache only, never from the network

pub mod cache;
pub mod live;
pub mod replay;

use std::collections::BTreeSet;

use async_trait::async_trait;

pub use cache::{CacheError, HostOutputs, ResultCache};
pub use live::LiveExecutor;
pub use replay::ReplayExecutor;

/// Outcome of one command across the fleet.
///
/// A failed host never has an entry in `outputs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutResult {
    /// The command that was run.
    pub command: String,
    /// Raw output per host address.
    pub outputs: HostOutputs,
    /// Addresses of hosts that failed in this round.
    pub failed: BTreeSet<String>,
}

impl FanOutResult {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Returns the output of one host, if it answered.
    #[must_use]
    pub fn output(&self, address: &str) -> Option<&str> {
        self.outputs.get(address).map(String::as_str)
    }

    #[must_use]
    pub fn is_failed(&self, address: &str) -> bool {
        self.failed.contains(address)
    }

    /// Returns the number of hosts that answered.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outputs.len()
    }

    /// Iterates over `(address, output)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outputs.iter().map(|(h, o)| (h.as_str(), o.as_str()))
    }
}

/// Runs a command against the whole fleet.
#[async_trait]
pub trait FleetExecutor: Send + Sync {
    /// Runs `command` on every host and waits for all of them.
    async fn execute(&self, command: &str) -> FanOutResult;

    /// Returns every host address that failed so far in this run, sorted.
    fn failed_hosts(&self) -> Vec<String>;
}
