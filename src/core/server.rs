//! Collection scheduler.
//!
//! [`MetricServer`] owns the driver, the device registry and the two background
//! tasks (metrics listener and collection loop). Both tasks watch the same
//! broadcast shutdown signal so [`MetricServer::stop`] can wait for them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::allocation::AllocationSource;
use super::config::Config;
use super::driver::DeviceDriver;
use super::exposition::{create_app, spawn_listener};
use super::joiner::{CycleSummary, TelemetryJoiner};
use super::metrics::AcceleratorMetrics;
use super::registry::{discover_devices, DeviceRegistry};
use crate::error::{ExporterError, Result};

/// Lifecycle of a [`MetricServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
}

struct Running<D: DeviceDriver> {
    registry: Arc<DeviceRegistry<D>>,
    shutdown_tx: broadcast::Sender<()>,
    collector: JoinHandle<()>,
    listener: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Exposes accelerator metrics for all containers on the configured port.
pub struct MetricServer<D: DeviceDriver, A: AllocationSource> {
    config: Config,
    driver: Option<D>,
    source: Arc<A>,
    metrics: Arc<AcceleratorMetrics>,
    state: ServerState,
    running: Option<Running<D>>,
}

impl<D: DeviceDriver, A: AllocationSource> MetricServer<D, A> {
    pub fn new(config: Config, driver: D, source: A) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            driver: Some(driver),
            source: Arc::new(source),
            metrics: Arc::new(AcceleratorMetrics::new()?),
            state: ServerState::Stopped,
            running: None,
        })
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn metrics(&self) -> Arc<AcceleratorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Address the metrics listener is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Registered device names, while running.
    pub fn device_names(&self) -> Vec<String> {
        self.running
            .as_ref()
            .map(|r| r.registry.names().into_iter().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Initialize the driver, discover devices, then launch the listener and
    /// the collection loop. Returns as soon as both are running.
    ///
    /// On failure the driver is shut down again and the server stays stopped.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != ServerState::Stopped {
            return Err(ExporterError::invalid_state(format!(
                "cannot start a server in state {:?}",
                self.state
            )));
        }
        let Some(driver) = self.driver.take() else {
            return Err(ExporterError::invalid_state("device driver is unavailable"));
        };

        log::info!("Starting metrics server");
        self.state = ServerState::Starting;

        match self.launch(driver).await {
            Ok(running) => {
                self.running = Some(running);
                self.state = ServerState::Running;
                Ok(())
            }
            Err((e, mut driver)) => {
                if let Err(shutdown_err) = driver.shutdown() {
                    log::warn!("Driver shutdown after failed start: {}", shutdown_err);
                }
                self.driver = Some(driver);
                self.state = ServerState::Stopped;
                Err(e)
            }
        }
    }

    /// Startup steps in order. Every error hands the driver back to the caller.
    async fn launch(&self, mut driver: D) -> std::result::Result<Running<D>, (ExporterError, D)> {
        if let Err(e) = driver.init() {
            return Err((e, driver));
        }

        match driver.driver_version() {
            Ok(version) => log::info!(
                "{} driver initialized successfully. Driver version: {}",
                driver.vendor(),
                version
            ),
            Err(e) => return Err((e, driver)),
        }

        let discovered = self
            .config
            .device_pattern()
            .and_then(|pattern| discover_devices(&driver, &pattern));
        let devices = match discovered {
            Ok(devices) => devices,
            Err(e) => {
                return Err((
                    ExporterError::driver(format!("failed to discover devices: {}", e)),
                    driver,
                ))
            }
        };

        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let app = create_app(Arc::clone(&self.metrics), &self.config.metrics_path);
        let bound = spawn_listener(addr, app, shutdown_tx.subscribe()).await;
        let (local_addr, listener) = match bound {
            Ok(bound) => bound,
            Err(e) => return Err((e, driver)),
        };

        let registry = Arc::new(DeviceRegistry::new(driver, devices));
        if registry.is_empty() {
            log::warn!(
                "No device path matched {}; no device metrics will be exported",
                self.config.device_path_pattern
            );
        }
        let joiner = TelemetryJoiner::new(
            Arc::clone(&registry),
            Arc::clone(&self.metrics),
            self.config.resource_name.clone(),
        );
        let collector = tokio::spawn(collection_task(
            Arc::clone(&self.source),
            joiner,
            self.config.collection_interval(),
            shutdown_tx.subscribe(),
        ));

        Ok(Running {
            registry,
            shutdown_tx,
            collector,
            listener,
            local_addr,
        })
    }

    /// Signal both background tasks, wait for them to finish, then shut the
    /// driver down.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Err(ExporterError::invalid_state(format!(
                "cannot stop a server in state {:?}",
                self.state
            )));
        };

        log::info!("Stopping metrics server");
        let _ = running.shutdown_tx.send(());

        if let Err(e) = running.collector.await {
            log::warn!("Collection task ended abnormally: {}", e);
        }
        if let Err(e) = running.listener.await {
            log::warn!("Metrics listener ended abnormally: {}", e);
        }

        self.state = ServerState::Stopped;

        match Arc::try_unwrap(running.registry) {
            Ok(registry) => {
                let mut driver = registry.into_driver();
                let result = driver.shutdown();
                self.driver = Some(driver);
                result
            }
            Err(_) => {
                log::warn!("Device registry still referenced after stop; skipping driver shutdown");
                Ok(())
            }
        }
    }
}

/// One collection cycle: resolve allocations, then join them against device status.
///
/// A resolve failure discards the whole cycle; nothing is written.
pub async fn run_cycle<D: DeviceDriver, A: AllocationSource + ?Sized>(
    source: &A,
    joiner: &TelemetryJoiner<D>,
) -> Result<CycleSummary> {
    let allocations = source.resolve().await?;
    Ok(joiner.update_metrics(&allocations))
}

/// Periodic collection loop.
///
/// The first cycle runs one `period` after start. A slow cycle delays the next
/// tick instead of queueing several.
async fn collection_task<D: DeviceDriver, A: AllocationSource>(
    source: Arc<A>,
    joiner: TelemetryJoiner<D>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A hung kubelet must not hold up shutdown
                let result = tokio::select! {
                    result = run_cycle(source.as_ref(), &joiner) => result,
                    _ = shutdown.recv() => {
                        log::debug!("Collection cycle abandoned on shutdown");
                        break;
                    }
                };

                match result {
                    Ok(summary) => log::debug!(
                        "Updated metrics for {} containers ({} devices, {} skipped)",
                        summary.containers,
                        summary.devices_updated,
                        summary.devices_skipped
                    ),
                    Err(e) if e.is_cycle_local() => {
                        log::error!("Failed to get devices for containers: {}", e)
                    }
                    Err(e) => log::error!("Collection cycle failed: {}", e),
                }
            }
            _ = shutdown.recv() => {
                log::debug!("Collection task shutting down");
                break;
            }
        }
    }
}
