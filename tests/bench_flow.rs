//! End-to-end tests through the public API

use bucklebench_core::core::bench::STATUS_CONNECTION_LOST;
use bucklebench_core::core::discovery::DEVICE_NAME;
use bucklebench_core::core::transport::{ScriptStep, ScriptedFactory, ScriptedTransport};
use bucklebench_core::{
    discover, Bench, BenchCommand, BenchError, CommandOutcome, DiscoveryConfig, DiscoveryError, Driver,
    DriverError, ExportError, ExportFormat, Exporter, PipelineConfig, SessionState, SimulatedFactory,
    SimulatorConfig, TransportFactory,
};
use std::path::Path;
use std::time::Duration;

fn quick_discovery() -> DiscoveryConfig {
    DiscoveryConfig {
        settle_delay: Duration::ZERO,
        read_timeout: Duration::from_millis(2),
        ..DiscoveryConfig::default()
    }
}

fn bench(factory: impl TransportFactory + 'static, dir: &Path) -> Bench {
    Bench::new(
        Box::new(factory),
        quick_discovery(),
        PipelineConfig::default(),
        Exporter::new(dir, "result_", ExportFormat::Csv),
    )
}

fn simulator(config: SimulatorConfig) -> SimulatedFactory {
    SimulatedFactory::new(SimulatorConfig {
        seed: Some(42),
        ..config
    })
}

#[tokio::test]
async fn simulated_run_exports_every_sample() {
    let dir = tempfile::tempdir().unwrap();
    let (driver, handle) = Driver::new(bench(simulator(SimulatorConfig::default()), dir.path()), Duration::from_millis(1));
    let task = tokio::spawn(driver.run());

    handle.send_command(BenchCommand::Connect).await.unwrap();
    handle.send_command(BenchCommand::Tare).await.unwrap();
    handle.send_command(BenchCommand::Start).await.unwrap();

    let mut views = handle.view_receiver();
    tokio::time::timeout(Duration::from_secs(5), views.wait_for(|v| v.sample_count >= 20))
        .await
        .unwrap()
        .unwrap();
    // views published mid-run do not pin the growing dataset
    assert!(handle.view().samples.is_none());
    handle.send_command(BenchCommand::Stop).await.unwrap();

    let view = handle.view();
    let samples = view.samples.clone().expect("an idle view carries the dataset");
    assert_eq!(view.state, SessionState::Idle);
    assert!(view.controls.reverse);

    let CommandOutcome::Saved(path) = handle.send_command(BenchCommand::Save("sim".into())).await.unwrap() else {
        panic!("expected a saved file");
    };
    assert_eq!(path.file_name().unwrap(), "result_sim.csv");
    let rows = std::fs::read_to_string(&path).unwrap().lines().count() - 1;
    assert_eq!(rows, samples.len());

    // distances arrive in order while the crosshead advances
    let distances = samples.distances();
    assert!(distances.windows(2).all(|w| w[0] < w[1]));

    handle.send_command(BenchCommand::Shutdown).await.unwrap();
    assert_eq!(task.await.unwrap().state, SessionState::Disconnected);
}

#[tokio::test]
async fn dropping_all_handles_while_running_sends_stop_last() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new("COM7", [DEVICE_NAME, "protocol version: 1", "ready"]);
    let log = transport.log();
    let factory = ScriptedFactory::new().with_port(transport);

    let (driver, handle) = Driver::new(bench(factory, dir.path()), Duration::from_millis(1));
    let task = tokio::spawn(driver.run());
    handle.send_command(BenchCommand::Connect).await.unwrap();
    handle.send_command(BenchCommand::Start).await.unwrap();
    drop(handle);
    task.await.unwrap();

    assert_eq!(log.writes().first().map(String::as_str), Some("go"));
    assert_eq!(log.last_write().as_deref(), Some("stop"));
    assert!(log.is_closed());
}

#[test]
fn discovery_skips_busy_and_foreign_ports() {
    let factory = ScriptedFactory::new()
        .with_busy_port("COM1")
        .with_port(ScriptedTransport::new("COM2", ["Arduino Uno", "hello"]))
        .with_port(ScriptedTransport::new(
            "COM3",
            [DEVICE_NAME, "protocol version: 1", "homing", "ready"],
        ));
    let opened = factory.opened();

    let (transport, identity) = discover(&factory, &quick_discovery()).unwrap();
    assert_eq!(identity.port, "COM3");
    assert!(transport.is_open());
    assert_eq!(*opened.lock(), vec!["COM1", "COM2", "COM3"]);
}

#[test]
fn unsupported_protocol_ends_discovery() {
    let factory = ScriptedFactory::new()
        .with_port(ScriptedTransport::new("COM1", [DEVICE_NAME, "protocol version: 2"]))
        .with_port(ScriptedTransport::new(
            "COM2",
            [DEVICE_NAME, "protocol version: 1", "ready"],
        ));
    let opened = factory.opened();

    let err = discover(&factory, &quick_discovery()).unwrap_err();
    assert!(matches!(err, DiscoveryError::UnsupportedProtocol(Some(2))));
    assert_eq!(*opened.lock(), vec!["COM1"]);
}

#[test]
fn noisy_handshake_is_not_ready() {
    let mut lines = vec![DEVICE_NAME.to_string(), "protocol version: 1".to_string()];
    lines.extend((0..10).map(|i| format!("calibrating {i}")));
    lines.push("ready".to_string());
    let factory = ScriptedFactory::new().with_port(ScriptedTransport::new("COM1", lines));

    let err = discover(&factory, &quick_discovery()).unwrap_err();
    assert!(matches!(err, DiscoveryError::DeviceNotReady));
}

#[tokio::test]
async fn simulated_protocol_mismatch_reports_status() {
    let dir = tempfile::tempdir().unwrap();
    let mut bench = bench(
        simulator(SimulatorConfig {
            protocol_version: 2,
            ..SimulatorConfig::default()
        }),
        dir.path(),
    );

    let err = bench.connect().await.unwrap_err();
    assert!(matches!(err, BenchError::Discovery(DiscoveryError::UnsupportedProtocol(Some(2)))));
    assert_eq!(bench.status(), "UNSUPPORTED PROTOCOL (2)");
    assert_eq!(bench.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn lost_connection_keeps_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let factory = simulator(SimulatorConfig {
        disconnect_after: Some(8),
        debug_probability: 0.0,
        ..SimulatorConfig::default()
    });
    let (driver, handle) = Driver::new(bench(factory, dir.path()), Duration::from_millis(1));
    let task = tokio::spawn(driver.run());

    handle.send_command(BenchCommand::Connect).await.unwrap();
    handle.send_command(BenchCommand::Start).await.unwrap();

    let mut views = handle.view_receiver();
    let view = tokio::time::timeout(
        Duration::from_secs(5),
        views.wait_for(|v| v.state == SessionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(view.status, STATUS_CONNECTION_LOST);
    assert_eq!(view.sample_count, 8);
    assert!(view.controls.connect && view.controls.save && !view.controls.clear);

    let err = handle.send_command(BenchCommand::Stop).await.unwrap_err();
    assert!(matches!(err, DriverError::Command(ref e) if e.is_rejection()));
    assert!(handle.send_command(BenchCommand::Save("partial".into())).await.is_ok());

    handle.send_command(BenchCommand::Shutdown).await.unwrap();
    task.await.unwrap();
}

#[test]
fn export_rejects_mismatched_columns_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mismatch.csv");
    let exporter = Exporter::new(dir.path(), "", ExportFormat::Csv);

    let err = exporter.export_to(&path, &[1.0, 2.0], &[10.0], None).unwrap_err();
    assert!(matches!(err, ExportError::LengthMismatch { distances: 2, forces: 1 }));
    assert!(!path.exists());

    exporter.export_to(&path, &[1.0, 2.0], &[10.0, 20.0], None).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().collect::<Vec<_>>(), vec!["Distance,Load", "1,10", "2,20"]);
}
