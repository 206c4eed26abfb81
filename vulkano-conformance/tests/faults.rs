//! A device that ignores part of the synchronization model must fail the scenarios that rely on
//! it.

use vulkano_conformance::{
    device::soft::{SoftDevice, SoftDeviceCreateInfo, SoftFaults},
    scenario::{self, catalog, Outcome, RunReport, ScenarioConfig, ScenarioError},
};

fn run_faulty(faults: SoftFaults, pattern: &str) -> RunReport {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let device = SoftDevice::new(SoftDeviceCreateInfo {
        faults,
        ..Default::default()
    })
    .unwrap();
    let scenarios = catalog::filter(catalog::catalog(), pattern);
    assert!(!scenarios.is_empty());

    scenario::run(&device, &scenarios, &ScenarioConfig::default())
}

#[test]
fn ignored_pipeline_barriers() {
    let faults = SoftFaults {
        ignore_pipeline_barriers: true,
        ..Default::default()
    };

    let report = run_faulty(faults.clone(), "synchronization/op/single_queue/barrier/");
    assert_eq!(report.failed(), report.results.len(), "{}", report);

    let report = run_faulty(faults, "compute/basic/ubo_to_ssbo_single_invocation");
    let Some(Outcome::Fail(failure)) =
        report.outcome("compute/basic/ubo_to_ssbo_single_invocation")
    else {
        panic!("{}", report);
    };
    assert_eq!(failure.mismatch_count, 256);
}

#[test]
fn ignored_semaphore_waits() {
    let faults = SoftFaults {
        ignore_semaphore_waits: true,
        ..Default::default()
    };

    let report = run_faulty(faults, "synchronization/op/multi_queue/semaphore/");
    assert_eq!(report.failed(), report.results.len(), "{}", report);
}

#[test]
fn ignored_layout_transitions() {
    let faults = SoftFaults {
        ignore_layout_transitions: true,
        ..Default::default()
    };

    for name in [
        "compute/basic/image_barrier_multiple",
        "compute/basic/copy_image_to_ssbo_small",
        "compute/basic/copy_ssbo_to_image_small",
    ] {
        let report = run_faulty(faults.clone(), name);
        assert!(
            matches!(report.outcome(name), Some(Outcome::Fail(_))),
            "{}",
            report,
        );
    }
}

#[test]
fn device_loss_stops_the_run() {
    let faults = SoftFaults {
        lose_device_after_submissions: Some(5),
        ..Default::default()
    };

    let report = run_faulty(faults, "compute/basic/");
    assert_eq!(report.passed(), 5);
    assert_eq!(report.errors(), 1);
    assert_eq!(report.results[5].outcome, Outcome::Error(ScenarioError::DeviceLost));
    assert_eq!(report.not_run(), report.results.len() - 6);
    assert!(!report.is_success());
}
