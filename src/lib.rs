// accel-metrics library - public API

// Re-export error types
pub mod error;
pub use error::{ExporterError, Result};

// Module declarations
pub mod core;
pub mod platform;

// Re-export commonly used types
pub use core::config::Config;
pub use core::server::{MetricServer, ServerState};

/// Initialize logging. `RUST_LOG` still overrides the default level.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}
