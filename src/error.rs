use std::io;
use thiserror::Error;

/// Error type for the accelerator metrics exporter
#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Device driver error: {0}")]
    Driver(String),

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("failed to get status for device {device}: {message}")]
    DeviceQuery { device: String, message: String },

    #[error("error connecting to kubelet PodResourcesLister service: {0}")]
    Connection(String),

    #[error("error listing pod resources: {0}")]
    Request(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Invalid server state: {0}")]
    InvalidState(String),
}

/// Result type alias for the exporter
pub type Result<T> = std::result::Result<T, ExporterError>;

impl ExporterError {
    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        ExporterError::Config(msg.into())
    }

    /// Create a device driver error
    pub fn driver<S: Into<String>>(msg: S) -> Self {
        ExporterError::Driver(msg.into())
    }

    pub fn device_not_found<S: Into<String>>(device: S) -> Self {
        ExporterError::DeviceNotFound(device.into())
    }

    pub fn device_query<S: Into<String>, M: Into<String>>(device: S, message: M) -> Self {
        ExporterError::DeviceQuery {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn connection<S: Into<String>>(msg: S) -> Self {
        ExporterError::Connection(msg.into())
    }

    pub fn request<S: Into<String>>(msg: S) -> Self {
        ExporterError::Request(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        ExporterError::InvalidState(msg.into())
    }

    /// True when a device lookup failed because the name is not registered,
    /// as opposed to the driver failing to answer for a registered device.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExporterError::DeviceNotFound(_))
    }

    /// True for failures that only invalidate the current collection cycle.
    pub fn is_cycle_local(&self) -> bool {
        matches!(
            self,
            ExporterError::Connection(_) | ExporterError::Request(_)
        )
    }
}
