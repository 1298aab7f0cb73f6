use accel_metrics::core::metrics::{ACCELERATOR_REQUESTS, DUTY_CYCLE};
use accel_metrics::platform::MockDriver;
use accel_metrics::{Config, ExporterError, MetricServer, ServerState};
use std::net::SocketAddr;
use std::time::Duration;

use super::support::{allocations, sample, test_config, HangingSource, ScriptedSource};

fn mock_driver() -> MockDriver {
    let driver = MockDriver::new()
        .with_device("/dev/accel0", "Accel 1000", 8192)
        .with_device("/dev/accel1", "Accel 1000", 8192);
    driver.set_status(0, Some(sample(42, 1024)));
    driver.set_status(1, Some(sample(7, 512)));
    driver
}

fn scrape_url(addr: SocketAddr, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", addr.port(), path)
}

async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_start_collect_scrape_stop() {
    let driver = mock_driver();
    let source = ScriptedSource::returning(allocations(&[("default", "p1", "c1", &["accel0"])]));
    let mut server = MetricServer::new(test_config(), driver.clone(), source.clone()).unwrap();
    assert_eq!(server.state(), ServerState::Stopped);

    server.start().await.unwrap();
    assert_eq!(server.state(), ServerState::Running);
    assert!(driver.is_initialized());
    assert_eq!(server.device_names(), vec!["accel0", "accel1"]);

    let metrics = server.metrics();
    let accel0 = [("accelerator_id", "accel0")];
    assert!(wait_for(|| metrics.value(DUTY_CYCLE, &accel0).is_some()).await);

    let addr = server.local_addr().unwrap();
    let body = reqwest::get(scrape_url(addr, "/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("duty_cycle{"));
    assert!(body.contains("accelerator_id=\"accel0\""));
    assert!(body.contains("make=\"mock\""));
    assert!(body.contains("accelerator_requests{"));

    server.stop().await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(driver.shutdown_calls(), 1);
    assert!(!driver.is_initialized());
    assert!(server.local_addr().is_none());

    // the loop is quiesced: no further resolves after stop returns
    let calls = source.calls();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(source.calls(), calls);

    assert!(reqwest::get(scrape_url(addr, "/metrics")).await.is_err());
}

#[tokio::test]
async fn test_collection_recovers_after_failed_cycle() {
    let driver = mock_driver();
    let source = ScriptedSource::returning(allocations(&[("default", "p1", "c1", &["accel1"])]))
        .then_fail_once();
    let mut server = MetricServer::new(test_config(), driver, source.clone()).unwrap();

    server.start().await.unwrap();
    let metrics = server.metrics();

    let accel1 = [("accelerator_id", "accel1")];
    assert!(wait_for(|| metrics.value(DUTY_CYCLE, &accel1) == Some(7.0)).await);
    assert!(source.calls() >= 2);
    assert_eq!(server.state(), ServerState::Running);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_no_cycle_before_first_interval() {
    let config = Config {
        collection_interval_ms: 60_000,
        ..test_config()
    };
    let source = ScriptedSource::returning(allocations(&[("default", "p1", "c1", &["accel0"])]));
    let mut server = MetricServer::new(config, mock_driver(), source.clone()).unwrap();

    server.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(source.calls(), 0);
    assert_eq!(server.metrics().series_count(ACCELERATOR_REQUESTS), 0);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_interrupts_a_hung_cycle() {
    let config = Config {
        collection_interval_ms: 20,
        ..test_config()
    };
    let driver = mock_driver();
    let source = HangingSource::default();
    let mut server = MetricServer::new(config, driver.clone(), source.clone()).unwrap();

    server.start().await.unwrap();
    assert!(wait_for(|| source.calls() > 0).await);

    let stopped = tokio::time::timeout(Duration::from_secs(3), server.stop()).await;
    assert!(matches!(stopped, Ok(Ok(()))));
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(driver.shutdown_calls(), 1);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_routing_pattern_metrics_path_is_a_config_error() {
    let config = Config {
        metrics_path: "/*".to_string(),
        ..test_config()
    };
    let driver = mock_driver();

    let result = MetricServer::new(config, driver.clone(), ScriptedSource::default());
    assert!(matches!(result, Err(ExporterError::Config(_))));
    assert_eq!(driver.init_calls(), 0);
}

#[tokio::test]
async fn test_failed_driver_init_leaves_server_stopped() {
    let driver = mock_driver().fail_init();
    let mut server =
        MetricServer::new(test_config(), driver.clone(), ScriptedSource::default()).unwrap();

    let err = server.start().await.unwrap_err();
    assert!(matches!(err, ExporterError::Driver(_)));
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.local_addr().is_none());
}

#[tokio::test]
async fn test_failed_enumeration_shuts_driver_down() {
    let driver = mock_driver().fail_enumeration();
    let mut server =
        MetricServer::new(test_config(), driver.clone(), ScriptedSource::default()).unwrap();

    assert!(server.start().await.is_err());
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(driver.shutdown_calls(), 1);
    assert!(!driver.is_initialized());
}

#[tokio::test]
async fn test_port_in_use_is_a_startup_error() {
    let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let config = Config {
        port: taken.local_addr().unwrap().port(),
        ..test_config()
    };
    let driver = mock_driver();
    let mut server = MetricServer::new(config, driver.clone(), ScriptedSource::default()).unwrap();

    assert!(server.start().await.is_err());
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(!driver.is_initialized());
}

#[tokio::test]
async fn test_state_transitions_are_enforced() {
    let driver = mock_driver();
    let mut server =
        MetricServer::new(test_config(), driver.clone(), ScriptedSource::default()).unwrap();

    assert!(matches!(
        server.stop().await,
        Err(ExporterError::InvalidState(_))
    ));

    server.start().await.unwrap();
    assert!(matches!(
        server.start().await,
        Err(ExporterError::InvalidState(_))
    ));
    server.stop().await.unwrap();

    // a stopped server can be started again with the same driver
    server.start().await.unwrap();
    assert_eq!(driver.init_calls(), 2);
    server.stop().await.unwrap();
    assert_eq!(driver.shutdown_calls(), 2);
}

#[test]
fn test_invalid_config_rejected_at_construction() {
    let config = Config {
        collection_interval_ms: 0,
        ..test_config()
    };
    let result = MetricServer::new(config, mock_driver(), ScriptedSource::default());
    assert!(matches!(result, Err(ExporterError::Config(_))));
}
