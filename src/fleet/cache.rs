//! Result cache store.
//!
//! Keeps the last captured output of every command, per scope, so a later
//! run can replay it without touching the network. The whole file is
//! rewritten after each live round; a missing or damaged file simply
//! means an empty cache.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum cache file size accepted at load time (64MB).
const MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Raw output per host address.
pub type HostOutputs = BTreeMap<String, String>;

/// Errors raised while persisting the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// File too large.
    #[error("Cache file too large (max {MAX_FILE_SIZE} bytes)")]
    FileTooLarge,
}

/// On-disk layout: scope -> command -> host address -> raw output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
struct CacheFile {
    scopes: BTreeMap<String, BTreeMap<String, HostOutputs>>,
}

/// Scoped store of captured fan-out results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultCache {
    /// Backing file; `None` keeps the cache in memory only.
    path: Option<PathBuf>,
    data: CacheFile,
}

impl ResultCache {
    /// Creates an empty cache that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Returns the default cache path (~/.smartos-manager/cache.json).
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".smartos-manager")
            .join("cache.json")
    }

    /// Loads the cache from `path`.
    ///
    /// Never fails: an absent, unreadable or corrupt file yields an empty
    /// cache bound to the same path.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let data = if path.exists() {
            match Self::read(&path) {
                Ok(data) => {
                    debug!("Loaded result cache from {}", path.display());
                    data
                }
                Err(e) => {
                    warn!(
                        "Ignoring unreadable result cache {}: {}",
                        path.display(),
                        e
                    );
                    CacheFile::default()
                }
            }
        } else {
            debug!("No result cache at {}", path.display());
            CacheFile::default()
        };

        Self {
            path: Some(path),
            data,
        }
    }

    fn read(path: &Path) -> Result<CacheFile, CacheError> {
        let metadata = fs::metadata(path)?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(CacheError::FileTooLarge);
        }

        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the captured outputs of `command` under `scope`.
    #[must_use]
    pub fn get(&self, scope: &str, command: &str) -> Option<&HostOutputs> {
        self.data.scopes.get(scope)?.get(command)
    }

    /// Records the outputs of `command` under `scope`, replacing any
    /// previous capture of the same command.
    pub fn put(&mut self, scope: &str, command: &str, outputs: HostOutputs) {
        self.data
            .scopes
            .entry(scope.to_string())
            .or_default()
            .insert(command.to_string(), outputs);
    }

    /// Returns the number of commands captured under `scope`.
    #[must_use]
    pub fn command_count(&self, scope: &str) -> usize {
        self.data.scopes.get(scope).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.scopes.values().all(BTreeMap::is_empty)
    }

    /// Writes the full cache to its backing file.
    ///
    /// The file is replaced atomically (temp file, then rename) and is only
    /// ever readable by its owner.
    pub fn save(&self) -> Result<(), CacheError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(&self.data)?;
        let temp_path = path.with_extension("tmp");

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        {
            let mut file = options.open(&temp_path)?;
            // a stale temp file keeps its old mode
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                file.set_permissions(fs::Permissions::from_mode(0o600))?;
            }
            file.write_all(content.as_bytes())?;
            file.flush()?;
        }

        fs::rename(&temp_path, path)?;

        Ok(())
    }
}
