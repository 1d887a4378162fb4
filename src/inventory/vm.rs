//! Virtual machine listing.
//!
//! A VM record is built from two outputs: the `vmadm list` line of the VM
//! and the resident memory table from `zonememstat`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::sysinfo::HostSysinfo;
use super::units::MemorySize;

/// Command reporting resident memory per zone.
pub const RSS_COMMAND: &str = "/usr/bin/zonememstat";

/// Columns every listing requests, in order.
pub const BASE_COLUMNS: [&str; 6] = ["uuid", "type", "ram", "state", "alias", "nics.0.ip"];

/// Kind of virtualization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VmType {
    /// Hardware virtualized.
    Kvm,
    /// SmartOS zone.
    Os,
    /// Linux branded zone.
    Lx,
    /// Anything `vmadm` may add later.
    Other(String),
}

impl VmType {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "KVM" => Self::Kvm,
            "OS" => Self::Os,
            "LX" => Self::Lx,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Kvm => "KVM",
            Self::Os => "OS",
            Self::Lx => "LX",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for VmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for VmType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One guest of a hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualMachine {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub vm_type: VmType,
    /// Configured memory.
    pub memory: MemorySize,
    pub state: String,
    /// Alias.
    pub name: String,
    pub admin_ip: Option<String>,
    /// Resident memory; `None` when the zone has no usage line.
    pub rss: Option<MemorySize>,
    /// Extra listing columns keyed by configured label.
    ///
    /// Serialized under the humanized label, e.g. `owner_id` as "Owner Id".
    #[serde(serialize_with = "serialize_user_fields")]
    pub user_fields: BTreeMap<String, String>,
}

impl VirtualMachine {
    /// Returns the ZFS dataset holding this VM's disk.
    #[must_use]
    pub fn disk_volume_name(&self) -> String {
        match self.vm_type {
            VmType::Kvm => format!("zones/{}-disk0", self.uuid),
            _ => format!("zones/{}", self.uuid),
        }
    }

    /// Returns the disk size of this VM as known by its host.
    ///
    /// KVM guests report the volume size of their first disk; zones report
    /// the quota of their dataset.
    #[must_use]
    pub fn disk_label(&self, sysinfo: &HostSysinfo) -> Option<MemorySize> {
        let volume = sysinfo.zfs_volumes.get(&self.disk_volume_name())?;
        match self.vm_type {
            VmType::Kvm => volume.size,
            _ => volume.quota,
        }
    }

    /// Returns a user column value by configured label.
    #[must_use]
    pub fn user_field(&self, label: &str) -> Option<&str> {
        self.user_fields.get(label).map(String::as_str)
    }
}

fn serialize_user_fields<S: Serializer>(
    fields: &BTreeMap<String, String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(fields.len()))?;
    for (label, value) in fields {
        map.serialize_entry(&humanize_label(label), value)?;
    }
    map.end()
}

/// An extra listing column from `[user_columns]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserColumn<'a> {
    /// Configured label.
    pub label: &'a str,
    /// Remote `vmadm` field.
    pub field: &'a str,
}

impl<'a> UserColumn<'a> {
    #[must_use]
    pub fn new(label: &'a str, field: &'a str) -> Self {
        Self { label, field }
    }

    /// Borrows a label -> field mapping, in label order.
    #[must_use]
    pub fn from_map(columns: &'a BTreeMap<String, String>) -> Vec<Self> {
        columns
            .iter()
            .map(|(label, field)| Self::new(label, field))
            .collect()
    }

    /// Returns the column header shown for this column.
    #[must_use]
    pub fn header(&self) -> String {
        humanize_label(self.label)
    }
}

/// Turns a snake_case label into a header: `owner_id` becomes "Owner Id".
#[must_use]
pub fn humanize_label(label: &str) -> String {
    label
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Why a listing line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmParseError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("invalid uuid {0:?}")]
    Uuid(String),

    #[error("invalid memory {0:?}")]
    Memory(String),
}

/// Builds the listing command for the given extra columns.
#[must_use]
pub fn listing_command(user_columns: &[UserColumn<'_>]) -> String {
    let columns: Vec<&str> = BASE_COLUMNS
        .iter()
        .copied()
        .chain(user_columns.iter().map(|c| c.field))
        .collect();
    format!("vmadm list -p -H -o {}", columns.join(","))
}

/// Parses `zonememstat` output into resident memory per zone.
///
/// Indented lines (header, global zone) are skipped.
#[must_use]
pub fn parse_rss_table(output: &str) -> HashMap<Uuid, MemorySize> {
    let mut table = HashMap::new();

    for line in output.lines() {
        if line.trim().is_empty() || line.starts_with(char::is_whitespace) {
            continue;
        }

        let mut parts = line.split_whitespace();
        let (Some(zone), Some(rss)) = (parts.next(), parts.next()) else {
            continue;
        };

        match (Uuid::parse_str(zone), MemorySize::parse_megabytes(rss)) {
            (Ok(uuid), Some(size)) => {
                table.insert(uuid, size);
            }
            _ => debug!("Skipping zonememstat line: {}", line),
        }
    }

    table
}

/// Splits a `vmadm -p` line on `:`, honoring `\:` escapes.
#[must_use]
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&':') => {
                current.push(':');
                chars.next();
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);

    fields
}

/// Parses one listing line requested with `user_columns` as extra columns.
pub fn parse_vm_line(
    line: &str,
    user_columns: &[UserColumn<'_>],
) -> Result<VirtualMachine, VmParseError> {
    let fields = split_fields(line);
    let expected = BASE_COLUMNS.len() + user_columns.len();
    if fields.len() != expected {
        return Err(VmParseError::FieldCount {
            expected,
            found: fields.len(),
        });
    }

    let uuid = Uuid::parse_str(&fields[0]).map_err(|_| VmParseError::Uuid(fields[0].clone()))?;
    let memory =
        MemorySize::parse_megabytes(&fields[2]).ok_or_else(|| VmParseError::Memory(fields[2].clone()))?;
    let admin_ip = Some(fields[5].clone()).filter(|ip| !ip.is_empty());

    let user_fields = user_columns
        .iter()
        .zip(&fields[BASE_COLUMNS.len()..])
        .map(|(column, value)| (column.label.to_string(), value.clone()))
        .collect();

    Ok(VirtualMachine {
        uuid,
        vm_type: VmType::parse(&fields[1]),
        memory,
        state: fields[3].clone(),
        name: fields[4].clone(),
        admin_ip,
        rss: None,
        user_fields,
    })
}

/// Parses a host's whole listing, attaching resident memory.
///
/// Rejected lines are logged against `host` and left out.
#[must_use]
pub fn parse_vm_listing(
    host: &str,
    output: &str,
    user_columns: &[UserColumn<'_>],
    rss: &HashMap<Uuid, MemorySize>,
) -> Vec<VirtualMachine> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match parse_vm_line(line, user_columns) {
            Ok(mut vm) => {
                vm.rss = rss.get(&vm.uuid).copied();
                Some(vm)
            }
            Err(e) => {
                warn!("{}: rejected vmadm line ({}): {}", host, e, line);
                None
            }
        })
        .collect()
}
