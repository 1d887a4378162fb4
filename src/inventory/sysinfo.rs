//! Live host metrics.
//!
//! A [`HostSysinfo`] is assembled from six independent probes. Each probe
//! is one remote command and one parser that fills its own fields, so a
//! probe that failed on a host simply leaves those fields empty.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use super::units::{MemorySize, parse_sized};
use super::vm::VirtualMachine;

/// Total physical memory, in megabytes.
pub const MEMORY_COMMAND: &str = "prtconf -m";

/// MAC address of the first physical link.
pub const MAC_COMMAND: &str = "dladm show-phys -m -p -o ADDRESS | head -n 1";

/// Disk inventory with sizes.
pub const DISKS_COMMAND: &str = "iostat -En";

/// ZFS datasets with volume size and quota.
pub const ZFS_COMMAND: &str = "zfs list -H -o name,volsize,quota";

/// ARC current size and ceiling, in bytes.
pub const ARC_COMMAND: &str = "kstat -p zfs:0:arcstats:size zfs:0:arcstats:c_max";

/// SmartOS build stamp.
pub const BUILD_COMMAND: &str = "uname -v";

/// Size and quota of one ZFS dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ZfsVolume {
    /// Volume size; only zvols have one.
    pub size: Option<MemorySize>,
    pub quota: Option<MemorySize>,
}

/// Aggregate metrics of one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostSysinfo {
    pub memory: Option<MemorySize>,
    pub mac0: Option<String>,
    /// Disk name -> size.
    pub disks: BTreeMap<String, MemorySize>,
    /// Dataset name -> sizes.
    pub zfs_volumes: BTreeMap<String, ZfsVolume>,
    pub zfs_arc_current: Option<MemorySize>,
    pub zfs_arc_reserved: Option<MemorySize>,
    pub smartos_version: Option<String>,
}

impl HostSysinfo {
    /// Returns the memory left for new VMs.
    ///
    /// Physical memory minus the configured memory of every VM and the
    /// current ARC size, never below one byte. `None` when the physical
    /// memory is unknown.
    #[must_use]
    pub fn available_memory(&self, vms: &[VirtualMachine]) -> Option<MemorySize> {
        let memory = self.memory?;
        let provisioned: MemorySize = vms.iter().map(|vm| vm.memory).sum();
        let arc = self.zfs_arc_current.unwrap_or_default();

        Some(
            memory
                .saturating_sub(provisioned)
                .saturating_sub(arc)
                .max(MemorySize::from_bytes(1)),
        )
    }

    /// Returns the total size of all disks.
    #[must_use]
    pub fn disk_total(&self) -> MemorySize {
        self.disks.values().copied().sum()
    }
}

/// One of the commands feeding [`HostSysinfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysinfoProbe {
    Memory,
    Mac,
    Disks,
    ZfsVolumes,
    Arc,
    Build,
}

impl SysinfoProbe {
    /// Every probe, in the order they are run.
    pub const ALL: [Self; 6] = [
        Self::Memory,
        Self::Mac,
        Self::Disks,
        Self::ZfsVolumes,
        Self::Arc,
        Self::Build,
    ];

    #[must_use]
    pub fn command(self) -> &'static str {
        match self {
            Self::Memory => MEMORY_COMMAND,
            Self::Mac => MAC_COMMAND,
            Self::Disks => DISKS_COMMAND,
            Self::ZfsVolumes => ZFS_COMMAND,
            Self::Arc => ARC_COMMAND,
            Self::Build => BUILD_COMMAND,
        }
    }

    /// Parses `output` into the fields this probe owns.
    pub fn apply(self, sysinfo: &mut HostSysinfo, output: &str) {
        match self {
            Self::Memory => sysinfo.memory = parse_memory(output),
            Self::Mac => sysinfo.mac0 = parse_mac(output),
            Self::Disks => sysinfo.disks = parse_disks(output),
            Self::ZfsVolumes => sysinfo.zfs_volumes = parse_zfs_volumes(output),
            Self::Arc => {
                let (current, reserved) = parse_arc(output);
                sysinfo.zfs_arc_current = current;
                sysinfo.zfs_arc_reserved = reserved;
            }
            Self::Build => {
                sysinfo.smartos_version = Some(output.trim().to_string()).filter(|v| !v.is_empty());
            }
        }
    }
}

/// Parses `prtconf -m`: the first number is the memory in megabytes.
#[must_use]
pub fn parse_memory(output: &str) -> Option<MemorySize> {
    output
        .split_whitespace()
        .find_map(MemorySize::parse_megabytes)
}

/// Parses the first MAC address line, undoing `dladm -p` escaping.
#[must_use]
pub fn parse_mac(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    Some(line.replace("\\:", ":"))
}

/// Parses `iostat -En` into disk sizes.
///
/// A device block starts with the line carrying `Soft Errors:`; its first
/// token is the disk name. The `Size:` line of the block ends with
/// `<N bytes>`. Devices without media (size 0) are left out.
#[must_use]
pub fn parse_disks(output: &str) -> BTreeMap<String, MemorySize> {
    let mut disks = BTreeMap::new();
    let mut current: Option<&str> = None;

    for line in output.lines() {
        if line.contains("Soft Errors:") {
            current = line.split_whitespace().next();
            continue;
        }

        let Some(name) = current else {
            continue;
        };
        if !line.trim_start().starts_with("Size:") {
            continue;
        }

        match parse_bracketed_bytes(line) {
            Some(bytes) if bytes > 0 => {
                disks.insert(name.to_string(), MemorySize::from_bytes(bytes));
            }
            _ => debug!("No usable size for disk {}", name),
        }
        current = None;
    }

    disks
}

/// Extracts `N` from `... <N bytes>`.
fn parse_bracketed_bytes(line: &str) -> Option<u64> {
    let start = line.find('<')? + 1;
    let end = start + line[start..].find('>')?;
    line[start..end]
        .trim()
        .trim_end_matches("bytes")
        .trim()
        .parse()
        .ok()
}

/// Parses `zfs list -H -o name,volsize,quota`.
#[must_use]
pub fn parse_zfs_volumes(output: &str) -> BTreeMap<String, ZfsVolume> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                return None;
            }
            let volume = ZfsVolume {
                size: parse_sized(parts[1]).map(MemorySize::from_bytes),
                quota: parse_sized(parts[2]).map(MemorySize::from_bytes),
            };
            Some((parts[0].to_string(), volume))
        })
        .collect()
}

/// Parses `kstat -p` ARC statistics into (current, reserved).
#[must_use]
pub fn parse_arc(output: &str) -> (Option<MemorySize>, Option<MemorySize>) {
    let mut current = None;
    let mut reserved = None;

    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(bytes) = value.parse::<u64>() else {
            continue;
        };

        match key.rsplit(':').next() {
            Some("size") => current = Some(MemorySize::from_bytes(bytes)),
            Some("c_max") => reserved = Some(MemorySize::from_bytes(bytes)),
            _ => {}
        }
    }

    (current, reserved)
}
