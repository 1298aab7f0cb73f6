use std::sync::Arc;

use super::allocation::Allocations;
use super::driver::DeviceDriver;
use super::metrics::{AcceleratorMetrics, DeviceLabels};
use super::registry::DeviceRegistry;

/// Outcome of one [`TelemetryJoiner::update_metrics`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub containers: usize,
    pub devices_updated: usize,
    pub devices_skipped: usize,
}

/// Joins the allocation table against live device status and writes the gauges.
pub struct TelemetryJoiner<D: DeviceDriver> {
    registry: Arc<DeviceRegistry<D>>,
    metrics: Arc<AcceleratorMetrics>,
    resource_name: String,
}

impl<D: DeviceDriver> Clone for TelemetryJoiner<D> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            metrics: Arc::clone(&self.metrics),
            resource_name: self.resource_name.clone(),
        }
    }
}

impl<D: DeviceDriver> TelemetryJoiner<D> {
    pub fn new(
        registry: Arc<DeviceRegistry<D>>,
        metrics: Arc<AcceleratorMetrics>,
        resource_name: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            metrics,
            resource_name: resource_name.into(),
        }
    }

    /// Write request counts and per-device gauges for every allocation.
    ///
    /// A device that is unknown to the registry or fails its status query is
    /// logged and skipped; the rest of the pass continues.
    pub fn update_metrics(&self, allocations: &Allocations) -> CycleSummary {
        let mut summary = CycleSummary {
            containers: allocations.len(),
            ..Default::default()
        };

        for (container, device_ids) in allocations {
            self.metrics
                .set_accelerator_requests(container, &self.resource_name, device_ids.len());

            for device_id in device_ids {
                let (device, sample) = match self.registry.status(device_id) {
                    Ok(found) => found,
                    Err(e) if e.is_not_found() => {
                        log::error!("Failed to get device for {}: {}", device_id, e);
                        summary.devices_skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        log::error!("Failed to get device status for {}: {}", device_id, e);
                        summary.devices_skipped += 1;
                        continue;
                    }
                };

                let labels = DeviceLabels {
                    container,
                    make: self.registry.vendor(),
                    accelerator_id: device_id,
                    model: &device.info.model,
                };
                self.metrics.set_device(&labels, &sample, device.info.memory_total);
                summary.devices_updated += 1;
            }
        }

        summary
    }
}
