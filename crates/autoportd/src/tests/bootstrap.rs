//! Unit tests for bootstrap orchestration.

use std::sync::Arc;

use rstest::rstest;

use crate::bootstrap::{BootstrapError, ConfigLoader, bootstrap_with};
use crate::health::HealthReporter;
use crate::tests::support::{FailingConfigLoader, HealthEvent, RecordingHealthReporter, TestConfigLoader};

fn reporter() -> (Arc<RecordingHealthReporter>, Arc<dyn HealthReporter>) {
    let recording = Arc::new(RecordingHealthReporter::default());
    let shared = Arc::clone(&recording) as Arc<dyn HealthReporter>;
    (recording, shared)
}

#[rstest]
fn successful_bootstrap_creates_the_log_directory() {
    let loader = TestConfigLoader::new();
    let log_dir = loader.log_dir().join("nested");
    let config = autoport_config::Config {
        log_dir: camino::Utf8PathBuf::from_path_buf(log_dir.clone()).expect("utf8 path"),
        ..loader.load().expect("test configuration")
    };
    let (recording, shared) = reporter();

    let daemon = bootstrap_with(&crate::StaticConfigLoader::new(config), shared)
        .expect("bootstrap should succeed");

    assert!(log_dir.is_dir());
    assert_eq!(daemon.config().control_port, 0);
    assert_eq!(
        recording.events(),
        [HealthEvent::BootstrapStarting, HealthEvent::BootstrapSucceeded]
    );
}

#[rstest]
fn configuration_failures_are_reported() {
    let (recording, shared) = reporter();

    let Err(error) = bootstrap_with(&FailingConfigLoader, shared) else {
        panic!("invalid configuration should fail");
    };

    assert!(matches!(error, BootstrapError::Configuration { .. }));
    let events = recording.events();
    assert_eq!(events.first(), Some(&HealthEvent::BootstrapStarting));
    assert!(matches!(events.last(), Some(HealthEvent::BootstrapFailed(_))));
}
