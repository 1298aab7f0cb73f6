//! Mock device driver for tests and local runs without accelerators.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::core::driver::{DeviceDriver, DeviceInfo, UtilizationSample};
use crate::error::{ExporterError, Result};

#[derive(Debug, Clone)]
struct MockDevice {
    path: String,
    model: String,
    memory_total: u64,
    /// `None` makes status queries fail
    status: Option<UtilizationSample>,
}

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<MockDevice>,
    initialized: bool,
    init_calls: usize,
    shutdown_calls: usize,
    status_calls: usize,
    fail_init: bool,
    fail_enumeration: bool,
}

/// In-memory driver. Clones share state, so a test can keep a handle after
/// moving the driver into a registry or server.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device that reports zero utilization until [`set_status`](Self::set_status) is called.
    pub fn with_device(self, path: &str, model: &str, memory_total: u64) -> Self {
        self.state.lock().devices.push(MockDevice {
            path: path.to_string(),
            model: model.to_string(),
            memory_total,
            status: Some(UtilizationSample::default()),
        });
        self
    }

    pub fn fail_init(self) -> Self {
        self.state.lock().fail_init = true;
        self
    }

    pub fn fail_enumeration(self) -> Self {
        self.state.lock().fail_enumeration = true;
        self
    }

    /// Set the reading returned for the device at `index`; `None` makes queries fail.
    pub fn set_status(&self, index: u32, status: Option<UtilizationSample>) {
        if let Some(device) = self.state.lock().devices.get_mut(index as usize) {
            device.status = status;
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn init_calls(&self) -> usize {
        self.state.lock().init_calls
    }

    pub fn shutdown_calls(&self) -> usize {
        self.state.lock().shutdown_calls
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().status_calls
    }

    fn ensure_initialized(state: &MockState) -> Result<()> {
        if state.initialized {
            Ok(())
        } else {
            Err(ExporterError::driver("mock driver is not initialized"))
        }
    }
}

impl DeviceDriver for MockDriver {
    fn vendor(&self) -> &str {
        "mock"
    }

    fn init(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.init_calls += 1;
        if state.fail_init {
            return Err(ExporterError::driver("mock driver refused to initialize"));
        }
        state.initialized = true;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.shutdown_calls += 1;
        state.initialized = false;
        Ok(())
    }

    fn driver_version(&self) -> Result<String> {
        let state = self.state.lock();
        Self::ensure_initialized(&state)?;
        Ok("mock-1.0".to_string())
    }

    fn device_count(&self) -> Result<u32> {
        let state = self.state.lock();
        Self::ensure_initialized(&state)?;
        if state.fail_enumeration {
            return Err(ExporterError::driver("mock enumeration failure"));
        }
        Ok(state.devices.len() as u32)
    }

    fn device(&self, index: u32) -> Result<DeviceInfo> {
        let state = self.state.lock();
        Self::ensure_initialized(&state)?;
        let device = state
            .devices
            .get(index as usize)
            .ok_or_else(|| ExporterError::driver(format!("no device at index {}", index)))?;

        Ok(DeviceInfo {
            index,
            path: device.path.clone(),
            uuid: format!("MOCK-{:08x}", index),
            model: device.model.clone(),
            memory_total: device.memory_total,
        })
    }

    fn status(&self, index: u32) -> Result<UtilizationSample> {
        let mut state = self.state.lock();
        Self::ensure_initialized(&state)?;
        state.status_calls += 1;
        state
            .devices
            .get(index as usize)
            .and_then(|d| d.status)
            .ok_or_else(|| ExporterError::driver(format!("device {} did not answer", index)))
    }
}
