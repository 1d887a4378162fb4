//! Inventory queries.
//!
//! [`InventoryService`] turns fan-out rounds into typed records. It only
//! sees the [`FleetExecutor`] contract, so the same queries run live or
//! from the cache.
//!
//! # Queries
//!
//! - [`InventoryService::list_vms`]: guests with resident memory
//! - [`InventoryService::list_images`]: installed images
//! - [`InventoryService::diag`]: hardware identity and free DIMM slots
//! - [`InventoryService::sysinfo`]: memory, disks, ZFS and build metrics
//! - [`InventoryService::overview`]: the above joined into a capacity report

pub mod diag;
pub mod image;
pub mod overview;
pub mod sysinfo;
pub mod units;
pub mod vm;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Host, HostDirectory};
use crate::fleet::{FanOutResult, FleetExecutor};

pub use diag::HostDiagnostics;
pub use image::Image;
pub use overview::{HostOverview, VmOverview};
pub use sysinfo::{HostSysinfo, SysinfoProbe, ZfsVolume};
pub use units::MemorySize;
pub use vm::{UserColumn, VirtualMachine, VmType, humanize_label};

/// Query results keyed by host.
pub type HostMap<T> = BTreeMap<Host, T>;

/// Typed inventory over a fleet executor.
pub struct InventoryService {
    executor: Arc<dyn FleetExecutor>,
    directory: HostDirectory,
}

impl InventoryService {
    #[must_use]
    pub fn new(executor: Arc<dyn FleetExecutor>, directory: HostDirectory) -> Self {
        Self {
            executor,
            directory,
        }
    }

    #[must_use]
    pub fn directory(&self) -> &HostDirectory {
        &self.directory
    }

    /// Lists the VMs of every host, with resident memory when known.
    pub async fn list_vms(&self) -> HostMap<Vec<VirtualMachine>> {
        let rss_round = self.executor.execute(vm::RSS_COMMAND).await;
        let rss_tables: HashMap<&str, _> = rss_round
            .iter()
            .map(|(address, output)| (address, vm::parse_rss_table(output)))
            .collect();

        let user_columns = vm::UserColumn::from_map(self.directory.user_columns());
        let listing = self
            .executor
            .execute(&vm::listing_command(&user_columns))
            .await;

        let empty = HashMap::new();
        self.collect(&listing, |host, output| {
            let rss = rss_tables.get(host.address.as_str()).unwrap_or(&empty);
            Some(vm::parse_vm_listing(&host.address, output, &user_columns, rss))
        })
    }

    /// Lists the images installed on every host.
    pub async fn list_images(&self) -> HostMap<Vec<Image>> {
        let result = self.executor.execute(image::IMAGES_COMMAND).await;

        self.collect(&result, |host, output| match image::parse_images(output) {
            Ok(images) => Some(images),
            Err(e) => {
                warn!("{}: unreadable image list: {}", host.address, e);
                None
            }
        })
    }

    /// Reads hardware diagnostics of every host.
    pub async fn diag(&self) -> HostMap<HostDiagnostics> {
        let result = self.executor.execute(diag::DIAG_COMMAND).await;
        self.collect(&result, |_, output| Some(diag::parse_diag(output)))
    }

    /// Collects live metrics of every host.
    ///
    /// A host that answered any probe gets a record; fields of the probes
    /// it missed stay empty.
    pub async fn sysinfo(&self) -> HostMap<HostSysinfo> {
        let mut merged = HostMap::<HostSysinfo>::new();

        for probe in SysinfoProbe::ALL {
            let result = self.executor.execute(probe.command()).await;
            debug!("{:?} probe answered by {} hosts", probe, result.succeeded());

            for (address, output) in result.iter() {
                let Some(host) = self.host(address) else {
                    continue;
                };
                probe.apply(merged.entry(host.clone()).or_default(), output);
            }
        }

        merged
    }

    /// Builds the capacity report of every host.
    pub async fn overview(&self) -> Vec<HostOverview> {
        let vms = self.list_vms().await;
        let sysinfo = self.sysinfo().await;
        let diagnostics = self.diag().await;

        let report = overview::build_overview(vms, sysinfo, diagnostics);
        info!("Overview built for {} hosts", report.len());
        report
    }

    /// Returns the hosts that failed so far in this run.
    #[must_use]
    pub fn failed_hosts(&self) -> Vec<Host> {
        self.executor
            .failed_hosts()
            .iter()
            .filter_map(|address| self.host(address).cloned())
            .collect()
    }

    fn host(&self, address: &str) -> Option<&Host> {
        let host = self.directory.get(address);
        if host.is_none() {
            debug!("Ignoring output from unknown host {}", address);
        }
        host
    }

    /// Parses every host output of a round, skipping unknown hosts and
    /// hosts for which `parse` gives nothing.
    fn collect<T>(
        &self,
        result: &FanOutResult,
        mut parse: impl FnMut(&Host, &str) -> Option<T>,
    ) -> HostMap<T> {
        result
            .iter()
            .filter_map(|(address, output)| {
                let host = self.host(address)?;
                parse(host, output).map(|value| (host.clone(), value))
            })
            .collect()
    }
}
