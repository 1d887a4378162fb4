//! smartos-manager
//!
//! Inventory of a SmartOS hypervisor fleet over SSH.
//!
//! # Architecture
//!
//! - **Config Module**: host directory, defaults and runtime settings
//! - **SSH Module**: OpenSSH transport and shared gateway tunnels
//! - **Fleet Module**: concurrent fan-out, live or replayed from the cache
//! - **Inventory Module**: VM, image, diagnostics and metrics queries
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use smartos_manager::config::Config;
//! use smartos_manager::fleet::{ReplayExecutor, ResultCache};
//! use smartos_manager::inventory::InventoryService;
//!
//! # async fn run() -> Result<(), smartos_manager::Error> {
//! let config = Config::load(Path::new("smartos_hosts.toml"))?;
//! let cache = ResultCache::load(config.cache_path());
//! let executor = Arc::new(ReplayExecutor::new(cache, config.scope()));
//! let service = InventoryService::new(executor, config.directory.clone());
//! let vms = service.list_vms().await;
//! # Ok(())
//! # }
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod error;
pub mod fleet;
pub mod inventory;
pub mod logging;
pub mod ssh;

// Re-export main types
pub use config::{Config, Host, HostDirectory};
pub use error::{Error, Result};
pub use fleet::{FanOutResult, FleetExecutor, LiveExecutor, ReplayExecutor, ResultCache};
pub use inventory::InventoryService;
pub use ssh::{OpenSshTransport, Transport, TunnelPool};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
