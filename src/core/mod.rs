// Core collection pipeline

pub mod allocation;
pub mod config;
pub mod driver;
pub mod exposition;
pub mod joiner;
pub mod metrics;
pub mod registry;
pub mod server;

// Re-export commonly used items
pub use allocation::{AllocationResolver, AllocationSource, Allocations, ContainerId};
pub use config::Config;
pub use driver::{DeviceDriver, DeviceInfo, UtilizationSample};
pub use joiner::{CycleSummary, TelemetryJoiner};
pub use metrics::AcceleratorMetrics;
pub use registry::{Device, DeviceRegistry};
pub use server::{MetricServer, ServerState};
