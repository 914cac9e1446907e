// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EVENT_CAPACITY: usize = 64;
pub const DEFAULT_MONITOR_CAPACITY: usize = 32;

/// Filesystem types listed in `/proc/mounts` that are surfaced as
/// mounts without a backing volume
pub const DEFAULT_NETWORK_FILESYSTEMS: &[&str] = &[
    "nfs",
    "nfs4",
    "cifs",
    "smb3",
    "sshfs",
    "fuse.sshfs",
    "davfs",
    "9p",
];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LoggingLevel,
    pub to_disk: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LoggingLevel::Info,
            to_disk: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Per-subscriber event bus capacity
    pub event_capacity: usize,
    /// Capacity of the backend's monitor event channel
    pub monitor_capacity: usize,
    pub persistence_path: Option<PathBuf>,
    pub network_filesystems: Vec<String>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            monitor_capacity: DEFAULT_MONITOR_CAPACITY,
            persistence_path: None,
            network_filesystems: DEFAULT_NETWORK_FILESYSTEMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("read config {}", path.display()));
            }
        };
        Self::parse(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(text)?;
        // Zero-capacity channels panic in tokio.
        config.event_capacity = config.event_capacity.max(1);
        config.monitor_capacity = config.monitor_capacity.max(1);
        Ok(config)
    }

    /// Load from [`Config::resolve_path`], falling back to the defaults.
    pub fn load_or_default() -> Self {
        let path = Self::resolve_path();
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("using default config: {e:#}");
                Self::default()
            }
        }
    }

    pub fn resolve_path() -> PathBuf {
        if let Some(path) = std::env::var_os("VOLMAN_CONFIG") {
            return PathBuf::from(path);
        }
        xdg_dir("XDG_CONFIG_HOME", &[".config"]).join("config.toml")
    }

    pub fn persistence_path(&self) -> PathBuf {
        self.persistence_path
            .clone()
            .unwrap_or_else(|| xdg_dir("XDG_DATA_HOME", &[".local", "share"]).join("persistence.json"))
    }

    pub fn is_network_filesystem(&self, fs_type: &str) -> bool {
        self.network_filesystems.iter().any(|t| t == fs_type)
    }
}

/// `$<var>/volman`, else `$HOME/<fallback..>/volman`, else `/tmp/volman`
pub(crate) fn xdg_dir(var: &str, home_fallback: &[&str]) -> PathBuf {
    if let Some(base) = std::env::var_os(var) {
        return PathBuf::from(base).join("volman");
    }

    if let Some(home) = std::env::var_os("HOME") {
        let mut path = PathBuf::from(home);
        for part in home_fallback {
            path.push(part);
        }
        return path.join("volman");
    }

    PathBuf::from("/tmp").join("volman")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.is_network_filesystem("cifs"));
        assert!(!config.is_network_filesystem("ext4"));
    }

    #[test]
    fn partial_document_overrides_only_given_fields() {
        let config = Config::parse(
            r#"
            event_capacity = 8
            network_filesystems = ["nfs"]

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.event_capacity, 8);
        assert_eq!(config.monitor_capacity, DEFAULT_MONITOR_CAPACITY);
        assert_eq!(config.network_filesystems, ["nfs"]);
        assert_eq!(config.logging.level, LoggingLevel::Debug);
        assert!(config.logging.to_disk);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let config = Config::parse("event_capacity = 0").unwrap();
        assert_eq!(config.event_capacity, 1);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let path = std::env::temp_dir().join(format!("volman-missing-{}.toml", std::process::id()));
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("event_capacity = \"many\"").is_err());
    }
}
