use accel_metrics::core::driver::DeviceDriver;
use accel_metrics::core::joiner::TelemetryJoiner;
use accel_metrics::core::metrics::{
    AcceleratorMetrics, ACCELERATOR_REQUESTS, DUTY_CYCLE, MEMORY_TOTAL, MEMORY_USED,
};
use accel_metrics::core::registry::DeviceRegistry;
use accel_metrics::core::server::run_cycle;
use accel_metrics::platform::MockDriver;
use accel_metrics::ExporterError;
use regex::Regex;
use std::sync::Arc;

use super::support::{allocations, sample, ScriptedSource, RESOURCE};

fn joiner_for(driver: MockDriver) -> (TelemetryJoiner<MockDriver>, Arc<AcceleratorMetrics>) {
    let mut driver = driver;
    driver.init().unwrap();
    let pattern = Regex::new("/dev/(accel[0-9]+)$").unwrap();
    let registry = Arc::new(DeviceRegistry::discover(driver, &pattern).unwrap());
    let metrics = Arc::new(AcceleratorMetrics::new().unwrap());
    (
        TelemetryJoiner::new(registry, Arc::clone(&metrics), RESOURCE),
        metrics,
    )
}

fn container_selector<'a>(
    pod: &'a str,
    container: &'a str,
    id: &'a str,
) -> Vec<(&'a str, &'a str)> {
    vec![
        ("namespace", "default"),
        ("pod", pod),
        ("container", container),
        ("accelerator_id", id),
    ]
}

#[tokio::test]
async fn test_single_container_scenario() {
    let driver = MockDriver::new().with_device("/dev/accel0", "Accel 1000", 8192);
    driver.set_status(0, Some(sample(42, 1024)));
    let (joiner, metrics) = joiner_for(driver);

    let source = ScriptedSource::returning(allocations(&[("default", "p1", "c1", &["accel0"])]));
    let summary = run_cycle(&source, &joiner).await.unwrap();
    assert_eq!(summary.devices_updated, 1);

    let selector = container_selector("p1", "c1", "accel0");
    assert_eq!(metrics.value(DUTY_CYCLE, &selector), Some(42.0));
    assert_eq!(metrics.value(MEMORY_USED, &selector), Some(1024.0));
    assert_eq!(metrics.value(MEMORY_TOTAL, &selector), Some(8192.0));
    assert_eq!(
        metrics.value(
            ACCELERATOR_REQUESTS,
            &[("pod", "p1"), ("container", "c1"), ("resource_name", RESOURCE)]
        ),
        Some(1.0)
    );
}

#[tokio::test]
async fn test_unreachable_authority_skips_one_cycle() {
    let driver = MockDriver::new().with_device("/dev/accel0", "Accel 1000", 8192);
    driver.set_status(0, Some(sample(42, 1024)));
    let (joiner, metrics) = joiner_for(driver.clone());

    let source = ScriptedSource::returning(allocations(&[("default", "p1", "c1", &["accel0"])]))
        .then_fail_once();

    let err = run_cycle(&source, &joiner).await.unwrap_err();
    assert!(matches!(err, ExporterError::Connection(_)));
    assert_eq!(metrics.series_count(DUTY_CYCLE), 0);
    assert_eq!(metrics.series_count(ACCELERATOR_REQUESTS), 0);
    assert_eq!(driver.status_calls(), 0);

    run_cycle(&source, &joiner).await.unwrap();
    assert_eq!(
        metrics.value(DUTY_CYCLE, &container_selector("p1", "c1", "accel0")),
        Some(42.0)
    );
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_unknown_device_does_not_block_others() {
    let driver = MockDriver::new()
        .with_device("/dev/accel0", "Accel 1000", 8192)
        .with_device("/dev/accel1", "Accel 1000", 8192);
    driver.set_status(0, Some(sample(10, 100)));
    driver.set_status(1, Some(sample(20, 200)));
    let (joiner, metrics) = joiner_for(driver);

    let source = ScriptedSource::returning(allocations(&[
        ("default", "p1", "c1", &["accel7", "accel0"]),
        ("default", "p2", "c2", &["accel1"]),
    ]));
    let summary = run_cycle(&source, &joiner).await.unwrap();
    assert_eq!(summary.devices_updated, 2);
    assert_eq!(summary.devices_skipped, 1);

    assert_eq!(
        metrics.value(DUTY_CYCLE, &container_selector("p1", "c1", "accel0")),
        Some(10.0)
    );
    assert_eq!(
        metrics.value(DUTY_CYCLE, &container_selector("p2", "c2", "accel1")),
        Some(20.0)
    );
    assert_eq!(metrics.value(DUTY_CYCLE, &[("accelerator_id", "accel7")]), None);
}

#[tokio::test]
async fn test_status_changes_are_picked_up_next_cycle() {
    let driver = MockDriver::new().with_device("/dev/accel0", "Accel 1000", 8192);
    driver.set_status(0, Some(sample(1, 1)));
    let (joiner, metrics) = joiner_for(driver.clone());
    let source = ScriptedSource::returning(allocations(&[("default", "p1", "c1", &["accel0"])]));
    let selector = container_selector("p1", "c1", "accel0");

    run_cycle(&source, &joiner).await.unwrap();
    assert_eq!(metrics.value(DUTY_CYCLE, &selector), Some(1.0));

    driver.set_status(0, Some(sample(99, 4096)));
    run_cycle(&source, &joiner).await.unwrap();
    assert_eq!(metrics.value(DUTY_CYCLE, &selector), Some(99.0));
    assert_eq!(metrics.value(MEMORY_USED, &selector), Some(4096.0));
}

#[tokio::test]
async fn test_failed_query_keeps_previous_value() {
    let driver = MockDriver::new().with_device("/dev/accel0", "Accel 1000", 8192);
    driver.set_status(0, Some(sample(30, 300)));
    let (joiner, metrics) = joiner_for(driver.clone());
    let source = ScriptedSource::returning(allocations(&[("default", "p1", "c1", &["accel0"])]));
    let selector = container_selector("p1", "c1", "accel0");

    run_cycle(&source, &joiner).await.unwrap();
    driver.set_status(0, None);
    let summary = run_cycle(&source, &joiner).await.unwrap();

    assert_eq!(summary.devices_skipped, 1);
    // stale, not zeroed
    assert_eq!(metrics.value(DUTY_CYCLE, &selector), Some(30.0));
}
