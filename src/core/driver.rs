use crate::error::Result;

/// Static description of one accelerator, read once when the device is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Enumeration index; also the handle used for live status queries
    pub index: u32,
    /// Device node path, e.g. `/dev/nvidia0`
    pub path: String,
    pub uuid: String,
    pub model: String,
    /// Total memory in bytes
    pub memory_total: u64,
}

/// Point-in-time reading of a device. Never cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UtilizationSample {
    /// Percent of time the device was actively processing
    pub duty_cycle: u32,
    /// Allocated memory in bytes
    pub memory_used: u64,
}

/// Trait for accelerator driver backends
///
/// Abstracts the native management library so the registry and the collection
/// loop can run against NVML in production and a mock in tests. `init` and
/// `shutdown` bracket every other call.
pub trait DeviceDriver: Send + Sync + 'static {
    /// Vendor string exported as the `make` label
    fn vendor(&self) -> &str;

    fn init(&mut self) -> Result<()>;

    fn shutdown(&mut self) -> Result<()>;

    fn driver_version(&self) -> Result<String>;

    fn device_count(&self) -> Result<u32>;

    /// Open the device at `index` and read its static attributes
    fn device(&self, index: u32) -> Result<DeviceInfo>;

    /// Query live utilization for the device at `index`
    fn status(&self, index: u32) -> Result<UtilizationSample>;
}
