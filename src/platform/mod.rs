// Platform-specific backends

pub mod mock;
pub mod nvml;
pub mod podresources;

// Re-exports for clean imports
pub use mock::MockDriver;
pub use nvml::NvmlDriver;
