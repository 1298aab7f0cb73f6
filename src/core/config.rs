use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ExporterError;

pub const DEFAULT_COLLECTION_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_PORT: u16 = 2112;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_RESOURCE_NAME: &str = "nvidia.com/gpu";
pub const DEFAULT_SOCKET_PATH: &str = "/var/lib/kubelet/pod-resources/kubelet.sock";
pub const DEFAULT_DEVICE_PATH_PATTERN: &str = "/dev/(nvidia[0-9]+)$";

/// Exporter configuration.
///
/// Every field has a default, so a config file only needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Collection interval in milliseconds
    pub collection_interval_ms: u64,
    /// Port the metrics listener binds on all interfaces
    pub port: u16,
    pub metrics_path: String,
    /// Extended resource name the kubelet tracks accelerators under
    pub resource_name: String,
    /// Kubelet pod resources socket
    pub socket_path: PathBuf,
    /// Regex applied to each device path; the first capture group is the device name
    pub device_path_pattern: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collection_interval_ms: DEFAULT_COLLECTION_INTERVAL_MS,
            port: DEFAULT_PORT,
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
            resource_name: DEFAULT_RESOURCE_NAME.to_string(),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            device_path_pattern: DEFAULT_DEVICE_PATH_PATTERN.to_string(),
        }
    }
}

impl Config {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_millis(self.collection_interval_ms)
    }

    /// Compile the device path pattern.
    pub fn device_pattern(&self) -> crate::Result<Regex> {
        let pattern = Regex::new(&self.device_path_pattern).map_err(|e| {
            ExporterError::config(format!(
                "invalid device path pattern {:?}: {}",
                self.device_path_pattern, e
            ))
        })?;

        // captures_len counts the implicit whole-match group
        if pattern.captures_len() < 2 {
            return Err(ExporterError::config(format!(
                "device path pattern {:?} has no capture group for the device name",
                self.device_path_pattern
            )));
        }

        Ok(pattern)
    }

    /// Reject configurations the exporter cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.collection_interval_ms == 0 {
            return Err(ExporterError::config(
                "collection interval must be greater than zero",
            ));
        }

        if !self.metrics_path.starts_with('/') {
            return Err(ExporterError::config(format!(
                "metrics path must start with '/': {:?}",
                self.metrics_path
            )));
        }

        // Parameter and wildcard segments would make the router reject the path
        if self
            .metrics_path
            .split('/')
            .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
        {
            return Err(ExporterError::config(format!(
                "metrics path must be a literal path: {:?}",
                self.metrics_path
            )));
        }

        if self.resource_name.trim().is_empty() {
            return Err(ExporterError::config("resource name must not be empty"));
        }

        if self.socket_path.as_os_str().is_empty() {
            return Err(ExporterError::config("socket path must not be empty"));
        }

        self.device_pattern()?;
        Ok(())
    }
}
