//! Accelerator discovery and name-based lookup.
//!
//! The registry is filled once by [`DeviceRegistry::discover`] and never
//! mutated afterwards, so it can be shared through an `Arc` without locking.

use regex::Regex;
use std::collections::HashMap;

use super::driver::{DeviceDriver, DeviceInfo, UtilizationSample};
use crate::error::{ExporterError, Result};

/// A discovered device and the stable name derived from its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub info: DeviceInfo,
}

/// Owns the driver and the name → device map built at startup.
pub struct DeviceRegistry<D: DeviceDriver> {
    driver: D,
    devices: HashMap<String, Device>,
}

/// Extract the device name from `path` using the first capture group of `pattern`.
///
/// Returns `None` when the path does not match.
pub fn device_name_from_path(pattern: &Regex, path: &str) -> Option<String> {
    pattern
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|name| !name.is_empty())
}

/// Enumerate every device the driver reports and key the ones whose path
/// matches `pattern` by their derived name.
///
/// Fails if the device count cannot be read or a device cannot be opened.
/// Unmatched paths and duplicate names are logged and skipped.
pub fn discover_devices<D: DeviceDriver>(
    driver: &D,
    pattern: &Regex,
) -> Result<HashMap<String, Device>> {
    let count = driver
        .device_count()
        .map_err(|e| ExporterError::driver(format!("failed to get device count: {}", e)))?;

    log::info!("Found {} accelerator devices", count);

    let mut devices = HashMap::new();
    for index in 0..count {
        let info = driver.device(index).map_err(|e| {
            ExporterError::driver(format!(
                "failed to read device with index {}: {}",
                index, e
            ))
        })?;

        let Some(name) = device_name_from_path(pattern, &info.path) else {
            log::error!(
                "Invalid accelerator device path found: {}. Skipping this device",
                info.path
            );
            continue;
        };

        if devices.contains_key(&name) {
            log::warn!(
                "Device {} at {} resolves to an already registered name. Skipping this device",
                name,
                info.path
            );
            continue;
        }

        log::info!(
            "Found device {} ({}, {}) for metrics collection",
            name,
            info.model,
            info.uuid
        );
        devices.insert(name.clone(), Device { name, info });
    }

    Ok(devices)
}

impl<D: DeviceDriver> DeviceRegistry<D> {
    pub fn new(driver: D, devices: HashMap<String, Device>) -> Self {
        Self { driver, devices }
    }

    /// Build a registry from everything [`discover_devices`] finds.
    pub fn discover(driver: D, pattern: &Regex) -> Result<Self> {
        let devices = discover_devices(&driver, pattern)?;
        Ok(Self::new(driver, devices))
    }

    pub fn lookup(&self, name: &str) -> Result<&Device> {
        self.devices
            .get(name)
            .ok_or_else(|| ExporterError::device_not_found(name))
    }

    /// Live status of the named device.
    ///
    /// `DeviceNotFound` if the name was never registered, `DeviceQuery` if the
    /// driver could not answer.
    pub fn status(&self, name: &str) -> Result<(&Device, UtilizationSample)> {
        let device = self.lookup(name)?;
        let sample = self
            .driver
            .status(device.info.index)
            .map_err(|e| ExporterError::device_query(name, e.to_string()))?;
        Ok((device, sample))
    }

    pub fn vendor(&self) -> &str {
        self.driver.vendor()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Registered device names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Give the driver back so it can be shut down.
    pub fn into_driver(self) -> D {
        self.driver
    }
}
