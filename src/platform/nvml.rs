#[cfg(feature = "nvml")]
use nvml_wrapper::{Device, Nvml};

use crate::core::driver::{DeviceDriver, DeviceInfo, UtilizationSample};
use crate::error::{ExporterError, Result};

/// NVIDIA driver backend using NVML
///
/// NVML is initialized by [`DeviceDriver::init`] and released by
/// [`DeviceDriver::shutdown`]; devices are reopened by index on every query
/// because NVML handles borrow the library instance.
#[derive(Default)]
pub struct NvmlDriver {
    #[cfg(feature = "nvml")]
    nvml: Option<Nvml>,
}

impl NvmlDriver {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "nvml")]
    fn nvml(&self) -> Result<&Nvml> {
        self.nvml
            .as_ref()
            .ok_or_else(|| ExporterError::driver("NVML is not initialized"))
    }

    #[cfg(feature = "nvml")]
    fn get_device(&self, index: u32) -> Result<Device<'_>> {
        self.nvml()?
            .device_by_index(index)
            .map_err(|e| ExporterError::driver(format!("failed to open device {}: {}", index, e)))
    }
}

#[cfg(feature = "nvml")]
impl DeviceDriver for NvmlDriver {
    fn vendor(&self) -> &str {
        "nvidia"
    }

    fn init(&mut self) -> Result<()> {
        if self.nvml.is_none() {
            let nvml = Nvml::init()
                .map_err(|e| ExporterError::driver(format!("failed to initialize nvml: {}", e)))?;
            self.nvml = Some(nvml);
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(nvml) = self.nvml.take() {
            nvml.shutdown()
                .map_err(|e| ExporterError::driver(format!("failed to shut down nvml: {}", e)))?;
        }
        Ok(())
    }

    fn driver_version(&self) -> Result<String> {
        self.nvml()?
            .sys_driver_version()
            .map_err(|e| ExporterError::driver(format!("failed to query nvml: {}", e)))
    }

    fn device_count(&self) -> Result<u32> {
        self.nvml()?
            .device_count()
            .map_err(|e| ExporterError::driver(e.to_string()))
    }

    fn device(&self, index: u32) -> Result<DeviceInfo> {
        let device = self.get_device(index)?;

        // NVML exposes the minor number; the device node follows from it
        let minor = device
            .minor_number()
            .map_err(|e| ExporterError::driver(format!("failed to get minor number: {}", e)))?;

        let uuid = device
            .uuid()
            .map_err(|e| ExporterError::driver(format!("failed to get UUID: {}", e)))?;

        let model = device
            .name()
            .unwrap_or_else(|_| "Unknown NVIDIA GPU".to_string());

        let memory_info = device
            .memory_info()
            .map_err(|e| ExporterError::driver(format!("failed to get memory info: {}", e)))?;

        Ok(DeviceInfo {
            index,
            path: format!("/dev/nvidia{}", minor),
            uuid,
            model,
            memory_total: memory_info.total,
        })
    }

    fn status(&self, index: u32) -> Result<UtilizationSample> {
        let device = self.get_device(index)?;

        let utilization = device
            .utilization_rates()
            .map_err(|e| ExporterError::driver(format!("failed to get utilization: {}", e)))?;

        let memory_info = device
            .memory_info()
            .map_err(|e| ExporterError::driver(format!("failed to get memory info: {}", e)))?;

        Ok(UtilizationSample {
            duty_cycle: utilization.gpu,
            memory_used: memory_info.used,
        })
    }
}

/// Fallback when the NVML feature is not enabled
#[cfg(not(feature = "nvml"))]
impl DeviceDriver for NvmlDriver {
    fn vendor(&self) -> &str {
        "nvidia"
    }

    fn init(&mut self) -> Result<()> {
        Err(ExporterError::driver(
            "NVML feature not enabled. Recompile with --features nvml",
        ))
    }

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    fn driver_version(&self) -> Result<String> {
        Err(ExporterError::driver("NVML feature not enabled"))
    }

    fn device_count(&self) -> Result<u32> {
        Err(ExporterError::driver("NVML feature not enabled"))
    }

    fn device(&self, _index: u32) -> Result<DeviceInfo> {
        Err(ExporterError::driver("NVML feature not enabled"))
    }

    fn status(&self, _index: u32) -> Result<UtilizationSample> {
        Err(ExporterError::driver("NVML feature not enabled"))
    }
}
