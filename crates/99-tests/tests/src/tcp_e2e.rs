//! Full runs over TCP against the simulated device.

use std::net::TcpListener;

use lmem_loopback::{connect, run_loopback, LoopbackConfig, LoopbackError, Mismatch, StepTimings};
use lmem_sim::{SimDevice, SimServer};
use pretty_assertions::assert_eq;

fn config_for(server: &SimServer, size: usize) -> LoopbackConfig {
    let addr = server.local_addr();
    LoopbackConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        size,
        ..LoopbackConfig::default()
    }
}

fn run_tcp(config: &LoopbackConfig) -> Result<lmem_loopback::RunReport, LoopbackError> {
    run_loopback(
        config,
        |config| connect(&config.host, config.port, &config.channel_options()),
        &mut StepTimings::new(),
    )
}

#[test]
fn default_size_passes_and_leaves_nothing_allocated() {
    let server = SimServer::spawn(SimDevice::default()).expect("spawn simulator");
    let report = run_tcp(&config_for(&server, 384)).expect("run");

    assert!(report.passed());
    assert_eq!(report.expected, vec![384; 384]);
    assert_eq!(report.output, report.expected);
    assert_eq!(report.verification.checked, 384);

    let device = server.device();
    let device = device.lock();
    assert_eq!(device.live_handles(), 0);
    assert!(!device.configuration_loaded());
    assert!(!device.engine_loaded());
    assert_eq!(device.executed_actions(), 4);
}

#[test]
fn flipped_lanes_are_reported_exactly() {
    let server =
        SimServer::spawn(SimDevice::default().with_bit_flips([5, 200])).expect("spawn simulator");
    let report = run_tcp(&config_for(&server, 384)).expect("run");

    assert!(!report.passed());
    assert_eq!(
        report.verification.mismatches,
        vec![
            Mismatch {
                index: 5,
                actual: 385,
                expected: 384
            },
            Mismatch {
                index: 200,
                actual: 385,
                expected: 384
            },
        ]
    );
    assert_eq!(report.verification.summary(), "Test failed 2 times!");
}

#[test]
fn consecutive_sessions_reuse_the_service() {
    let server = SimServer::spawn(SimDevice::default()).expect("spawn simulator");
    for size in [1, 17, 384] {
        let report = run_tcp(&config_for(&server, size)).expect("run");
        assert!(report.passed(), "size {size}");
    }
    assert_eq!(server.device().lock().executed_actions(), 12);
}

#[test]
fn unreachable_service_never_passes() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("local addr").port()
    };
    let config = LoopbackConfig {
        host: "127.0.0.1".into(),
        port,
        size: 384,
        ..LoopbackConfig::default()
    };
    let err = run_tcp(&config).unwrap_err();
    assert!(err.is_connect_failure(), "{err:?}");
}

#[test]
fn wrong_configuration_name_is_a_remote_error() {
    let server = SimServer::spawn(SimDevice::default()).expect("spawn simulator");
    let config = LoopbackConfig {
        configuration: "MovingAverage".into(),
        ..config_for(&server, 8)
    };
    let err = run_tcp(&config).unwrap_err();
    assert!(matches!(err, LoopbackError::RemoteOperation(_)), "{err:?}");
    assert!(err.to_string().contains("initConfiguration"), "{err}");
}
