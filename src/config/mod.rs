//! Host directory configuration.
//!
//! Loads the fleet description (`smartos_hosts.toml` by default) and
//! resolves every host against the global defaults, so the rest of the
//! crate only ever sees fully resolved [`Host`] values.
//!
//! ```toml
//! [global]
//! user = "root"
//! gateway = "bastion.example.com"
//!
//! [user_columns]
//! owner = "customer_metadata.owner"
//!
//! [[hosts]]
//! name = "node1"
//! address = "10.0.0.1"
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::{DEFAULT_LOG_LEVEL, DEFAULT_LOG_RETENTION_HOURS, LogConfig, log_directory};
use crate::ssh::GatewayKey;

/// User applied when neither the host nor `[global]` names one.
pub const DEFAULT_USER: &str = "root";

/// SSH port used when a host does not override it.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default connect timeout for hosts and gateways.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default timeout for a single remote command.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Maximum size of the configuration file (1MB).
const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

/// Errors that make the host directory unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// TOML parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// File too large.
    #[error("Config file too large (max {MAX_CONFIG_SIZE} bytes)")]
    FileTooLarge,

    /// A host entry without an address.
    #[error("Host #{index} ({name}) has no address")]
    MissingAddress { index: usize, name: String },

    /// Two hosts share one address.
    #[error("Duplicate host address: {0}")]
    DuplicateAddress(String),

    /// The fleet is empty.
    #[error("No hosts configured")]
    NoHosts,

    /// A host field set to an empty string.
    #[error("Host #{index} ({name}): {field} must not be empty")]
    EmptyField {
        index: usize,
        name: String,
        field: &'static str,
    },

    /// A `[settings]` value set to an empty string.
    #[error("settings.{0} must not be empty")]
    EmptySetting(&'static str),
}

/// Fallback credentials and gateway for hosts that omit them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalDefaults {
    /// Login user.
    pub user: Option<String>,
    /// Jump host address.
    pub gateway: Option<String>,
    /// Login user on the jump host.
    pub gateway_user: Option<String>,
}

/// One managed hypervisor, with defaults already applied.
///
/// Identity (equality, hashing, ordering) is the address alone.
#[derive(Debug, Clone, Serialize)]
pub struct Host {
    /// Display name.
    pub name: String,
    /// Hostname or IP address; unique across the directory.
    pub address: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Jump host address, if the host is not directly reachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Login user on the jump host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_user: Option<String>,
}

impl Host {
    /// Creates a directly reachable host logging in as root.
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        let address = address.into();
        assert!(!address.is_empty(), "address must not be empty");

        Self {
            name: name.into(),
            address,
            port: DEFAULT_SSH_PORT,
            user: DEFAULT_USER.to_string(),
            gateway: None,
            gateway_user: None,
        }
    }

    /// Sets the login user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Routes the host through a jump host.
    #[must_use]
    pub fn with_gateway(mut self, gateway: impl Into<String>, gateway_user: Option<String>) -> Self {
        self.gateway = Some(gateway.into());
        self.gateway_user = gateway_user;
        self
    }

    /// Returns the tunnel identity this host connects through, if any.
    ///
    /// The gateway user falls back to the host's own user.
    #[must_use]
    pub fn gateway_key(&self) -> Option<GatewayKey> {
        let gateway = self.gateway.as_ref()?;
        let user = self.gateway_user.as_deref().unwrap_or(&self.user);
        Some(GatewayKey::new(gateway.clone(), user.to_string()))
    }

    /// Returns `user@address`.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }

    /// Returns the address, with the port when it is not 22.
    #[must_use]
    pub fn connection_string(&self) -> String {
        if self.port == DEFAULT_SSH_PORT {
            self.address.clone()
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl PartialOrd for Host {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Host {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address.cmp(&other.address)
    }
}

/// The resolved fleet: hosts, defaults and extra VM listing columns.
#[derive(Debug, Clone, Default)]
pub struct HostDirectory {
    hosts: Vec<Host>,
    defaults: GlobalDefaults,
    /// Column label -> remote `vmadm` field name.
    user_columns: BTreeMap<String, String>,
}

impl HostDirectory {
    /// Builds a directory, rejecting duplicate addresses.
    pub fn new(
        hosts: Vec<Host>,
        defaults: GlobalDefaults,
        user_columns: BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::with_capacity(hosts.len());
        for host in &hosts {
            if !seen.insert(host.address.as_str()) {
                return Err(ConfigError::DuplicateAddress(host.address.clone()));
            }
        }

        Ok(Self {
            hosts,
            defaults,
            user_columns,
        })
    }

    /// Returns the number of hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Returns true if there are no hosts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Returns the hosts in configuration order.
    #[must_use]
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Looks a host up by address.
    #[must_use]
    pub fn get(&self, address: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.address == address)
    }

    #[must_use]
    pub fn defaults(&self) -> &GlobalDefaults {
        &self.defaults
    }

    /// Returns the user column mapping (label -> remote field).
    #[must_use]
    pub fn user_columns(&self) -> &BTreeMap<String, String> {
        &self.user_columns
    }
}

/// Runtime settings from the `[settings]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Cache scope; defaults to the configuration path.
    pub scope: Option<String>,
    /// Cache file location; defaults to ~/.smartos-manager/cache.json.
    pub cache_path: Option<PathBuf>,
    /// Connect timeout for hosts and gateways, in seconds.
    pub connect_timeout_secs: u64,
    /// Timeout for one remote command, in seconds.
    pub command_timeout_secs: u64,
    /// ssh executable.
    pub ssh_binary: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scope: None,
            cache_path: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            ssh_binary: PathBuf::from("ssh"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct LoggingSection {
    enabled: Option<bool>,
    level: Option<String>,
    retention_hours: Option<u32>,
    directory: Option<PathBuf>,
}

impl LoggingSection {
    fn into_log_config(self) -> LogConfig {
        LogConfig {
            retention_hours: self.retention_hours.unwrap_or(DEFAULT_LOG_RETENTION_HOURS),
            level: self
                .level
                .as_deref()
                .map_or_else(|| DEFAULT_LOG_LEVEL.to_string(), LogConfig::parse_level),
            enabled: self.enabled.unwrap_or(true),
            directory: self.directory.unwrap_or_else(log_directory),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawHost {
    name: Option<String>,
    address: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    gateway: Option<String>,
    gateway_user: Option<String>,
}

impl RawHost {
    fn resolve(self, index: usize, defaults: &GlobalDefaults) -> Result<Host, ConfigError> {
        let address = match self.address.map(|a| a.trim().to_string()) {
            Some(address) if !address.is_empty() => address,
            _ => {
                return Err(ConfigError::MissingAddress {
                    index,
                    name: self.name.unwrap_or_else(|| "unnamed".to_string()),
                });
            }
        };

        let name = self.name.unwrap_or_else(|| address.clone());
        let check = |field: &'static str, value: Option<String>| match value {
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyField {
                index,
                name: name.clone(),
                field,
            }),
            other => Ok(other),
        };

        let user = check("user", self.user.or_else(|| defaults.user.clone()))?
            .unwrap_or_else(|| DEFAULT_USER.to_string());
        let gateway = check("gateway", self.gateway.or_else(|| defaults.gateway.clone()))?;
        let gateway_user = check(
            "gateway_user",
            self.gateway_user.or_else(|| defaults.gateway_user.clone()),
        )?;

        Ok(Host {
            name,
            address,
            port: self.port.unwrap_or(DEFAULT_SSH_PORT),
            user,
            gateway,
            gateway_user,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    global: GlobalDefaults,
    user_columns: BTreeMap<String, String>,
    settings: Settings,
    logging: LoggingSection,
    hosts: Vec<RawHost>,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// The resolved fleet.
    pub directory: HostDirectory,
    /// Runtime settings.
    pub settings: Settings,
    /// Logging configuration.
    pub log_config: LogConfig,
    /// Path the configuration was loaded from.
    pub config_path: PathBuf,
}

impl Config {
    /// Returns the default config file path (`./smartos_hosts.toml`).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        PathBuf::from("smartos_hosts.toml")
    }

    /// Loads and resolves a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        let metadata = fs::metadata(path).map_err(io_error)?;
        if metadata.len() > MAX_CONFIG_SIZE {
            return Err(ConfigError::FileTooLarge);
        }

        let content = fs::read_to_string(path).map_err(io_error)?;
        Self::from_toml_str(&content, path)
    }

    /// Parses configuration text as if it had been read from `path`.
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;

        if file.hosts.is_empty() {
            return Err(ConfigError::NoHosts);
        }

        let hosts = file
            .hosts
            .into_iter()
            .enumerate()
            .map(|(index, raw)| raw.resolve(index, &file.global))
            .collect::<Result<Vec<_>, _>>()?;

        let directory = HostDirectory::new(hosts, file.global, file.user_columns)?;

        if file.settings.ssh_binary.as_os_str().is_empty() {
            return Err(ConfigError::EmptySetting("ssh_binary"));
        }

        Ok(Self {
            directory,
            settings: file.settings,
            log_config: file.logging.into_log_config(),
            config_path: path.to_path_buf(),
        })
    }

    /// Returns the cache scope for this configuration.
    #[must_use]
    pub fn scope(&self) -> String {
        self.settings
            .scope
            .clone()
            .unwrap_or_else(|| self.config_path.display().to_string())
    }

    /// Returns the cache file path.
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.settings
            .cache_path
            .clone()
            .unwrap_or_else(crate::fleet::ResultCache::default_path)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.connect_timeout_secs)
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.command_timeout_secs)
    }
}
