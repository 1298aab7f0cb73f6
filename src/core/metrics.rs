//! Exported gauges.
//!
//! Gauge values are atomics inside the prometheus vectors, so a scrape can
//! gather concurrently with a collection cycle writing new values.

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use super::allocation::ContainerId;
use super::driver::UtilizationSample;
use crate::error::{ExporterError, Result};

pub const DUTY_CYCLE: &str = "duty_cycle";
pub const MEMORY_TOTAL: &str = "memory_total";
pub const MEMORY_USED: &str = "memory_used";
pub const ACCELERATOR_REQUESTS: &str = "accelerator_requests";

const DEVICE_LABELS: [&str; 6] = [
    "namespace",
    "pod",
    "container",
    "make",
    "accelerator_id",
    "model",
];
const REQUEST_LABELS: [&str; 4] = ["namespace", "pod", "container", "resource_name"];

/// Label values identifying one device as seen from one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLabels<'a> {
    pub container: &'a ContainerId,
    pub make: &'a str,
    pub accelerator_id: &'a str,
    pub model: &'a str,
}

impl DeviceLabels<'_> {
    fn values(&self) -> [&str; 6] {
        [
            self.container.namespace.as_str(),
            self.container.pod.as_str(),
            self.container.container.as_str(),
            self.make,
            self.accelerator_id,
            self.model,
        ]
    }
}

/// Per-container accelerator gauges backed by a dedicated registry.
#[derive(Debug, Clone)]
pub struct AcceleratorMetrics {
    registry: Registry,
    duty_cycle: GaugeVec,
    memory_total: GaugeVec,
    memory_used: GaugeVec,
    accelerator_requests: GaugeVec,
}

impl AcceleratorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let duty_cycle = GaugeVec::new(
            Opts::new(
                DUTY_CYCLE,
                "Percent of time when the accelerator was actively processing",
            ),
            &DEVICE_LABELS,
        )?;
        let memory_total = GaugeVec::new(
            Opts::new(MEMORY_TOTAL, "Total memory available on the accelerator in bytes"),
            &DEVICE_LABELS,
        )?;
        let memory_used = GaugeVec::new(
            Opts::new(MEMORY_USED, "Allocated accelerator memory in bytes"),
            &DEVICE_LABELS,
        )?;
        let accelerator_requests = GaugeVec::new(
            Opts::new(
                ACCELERATOR_REQUESTS,
                "Number of accelerator devices requested by the container",
            ),
            &REQUEST_LABELS,
        )?;

        registry.register(Box::new(duty_cycle.clone()))?;
        registry.register(Box::new(memory_total.clone()))?;
        registry.register(Box::new(memory_used.clone()))?;
        registry.register(Box::new(accelerator_requests.clone()))?;

        Ok(Self {
            registry,
            duty_cycle,
            memory_total,
            memory_used,
            accelerator_requests,
        })
    }

    pub fn set_accelerator_requests(
        &self,
        container: &ContainerId,
        resource_name: &str,
        count: usize,
    ) {
        self.accelerator_requests
            .with_label_values(&[
                container.namespace.as_str(),
                container.pod.as_str(),
                container.container.as_str(),
                resource_name,
            ])
            .set(count as f64);
    }

    /// Record one status reading; `memory_total` comes from the device's static capacity.
    pub fn set_device(
        &self,
        labels: &DeviceLabels<'_>,
        sample: &UtilizationSample,
        memory_total: u64,
    ) {
        let values = labels.values();
        self.duty_cycle
            .with_label_values(&values)
            .set(f64::from(sample.duty_cycle));
        self.memory_total
            .with_label_values(&values)
            .set(memory_total as f64);
        self.memory_used
            .with_label_values(&values)
            .set(sample.memory_used as f64);
    }

    /// Current value of the series `name` whose labels include every pair in `labels`.
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .flat_map(|family| family.get_metric().iter())
            .find(|metric| {
                labels.iter().all(|(key, value)| {
                    metric
                        .get_label()
                        .iter()
                        .any(|pair| pair.get_name() == *key && pair.get_value() == *value)
                })
            })
            .map(|metric| metric.get_gauge().get_value())
    }

    /// Number of label-sets currently held by the series `name`.
    pub fn series_count(&self, name: &str) -> usize {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == name)
            .map(|family| family.get_metric().len())
            .sum()
    }

    /// Render every series in the prometheus text exposition format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer)
            .map_err(|e| ExporterError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}
