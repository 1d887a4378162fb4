//! Per-host capacity report combining VMs, metrics and diagnostics.

use std::collections::BTreeSet;

use serde::Serialize;

use super::HostMap;
use super::diag::HostDiagnostics;
use super::sysinfo::HostSysinfo;
use super::units::MemorySize;
use super::vm::VirtualMachine;
use crate::config::Host;

/// A VM with the disk size its host reports for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmOverview {
    #[serde(flatten)]
    pub vm: VirtualMachine,
    pub disk: Option<MemorySize>,
}

/// Capacity summary of one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostOverview {
    pub host: Host,
    /// `None` when `prtdiag` did not answer.
    pub diagnostics: Option<HostDiagnostics>,
    pub sysinfo: HostSysinfo,
    /// Sum of the configured memory of every VM.
    pub provisioned_memory: MemorySize,
    pub available_memory: Option<MemorySize>,
    pub vms: Vec<VmOverview>,
}

/// Joins the three query results by host.
///
/// A host appears when any of the three has an entry for it.
#[must_use]
pub fn build_overview(
    mut vms: HostMap<Vec<VirtualMachine>>,
    mut sysinfo: HostMap<HostSysinfo>,
    mut diagnostics: HostMap<HostDiagnostics>,
) -> Vec<HostOverview> {
    let hosts: BTreeSet<Host> = vms
        .keys()
        .chain(sysinfo.keys())
        .chain(diagnostics.keys())
        .cloned()
        .collect();

    hosts
        .into_iter()
        .map(|host| {
            let host_vms = vms.remove(&host).unwrap_or_default();
            let host_sysinfo = sysinfo.remove(&host).unwrap_or_default();

            let provisioned_memory = host_vms.iter().map(|vm| vm.memory).sum();
            let available_memory = host_sysinfo.available_memory(&host_vms);
            let vms = host_vms
                .into_iter()
                .map(|vm| VmOverview {
                    disk: vm.disk_label(&host_sysinfo),
                    vm,
                })
                .collect();

            HostOverview {
                diagnostics: diagnostics.remove(&host),
                host,
                sysinfo: host_sysinfo,
                provisioned_memory,
                available_memory,
                vms,
            }
        })
        .collect()
}
