use vulkano_conformance::{
    device::{
        soft::{Scheduling, SoftDevice, SoftDeviceCreateInfo},
        QueueFamilyProperties, QueueFlags,
    },
    scenario::{self, catalog, Outcome, ScenarioConfig},
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn catalog_passes_on_the_soft_device() {
    init_tracing();
    let device = SoftDevice::new(SoftDeviceCreateInfo::default()).unwrap();
    let scenarios = catalog::catalog();

    let report = scenario::run(&device, &scenarios, &ScenarioConfig::default());
    assert_eq!(report.passed(), scenarios.len(), "{}", report);
}

#[test]
fn catalog_passes_with_adversarial_scheduling() {
    init_tracing();
    let device = SoftDevice::new(SoftDeviceCreateInfo {
        scheduling: Scheduling::Adversarial,
        ..Default::default()
    })
    .unwrap();
    let scenarios = catalog::catalog();

    let report = scenario::run(&device, &scenarios, &ScenarioConfig::default());
    assert_eq!(report.passed(), scenarios.len(), "{}", report);
}

#[test]
fn single_queue_device_skips_multi_queue_scenarios() {
    init_tracing();
    let device = SoftDevice::new(SoftDeviceCreateInfo {
        queue_families: vec![QueueFamilyProperties {
            queue_flags: QueueFlags::COMPUTE | QueueFlags::TRANSFER,
            queue_count: 1,
        }],
        ..Default::default()
    })
    .unwrap();
    let scenarios = catalog::catalog();

    let report = scenario::run(&device, &scenarios, &ScenarioConfig::default());
    assert!(report.is_success(), "{}", report);
    assert_eq!(report.skipped(), 17);

    for result in &report.results {
        let multi_queue = result.name.contains("multi_queue");
        assert_eq!(
            matches!(result.outcome, Outcome::Skip(_)),
            multi_queue,
            "{}",
            result.name,
        );
    }
}

#[test]
fn catalog_passes_with_one_queue_per_family() {
    init_tracing();
    let device = SoftDevice::new(SoftDeviceCreateInfo {
        queue_families: vec![
            QueueFamilyProperties {
                queue_flags: QueueFlags::COMPUTE | QueueFlags::TRANSFER,
                queue_count: 1,
            },
            QueueFamilyProperties {
                queue_flags: QueueFlags::COMPUTE,
                queue_count: 1,
            },
            QueueFamilyProperties {
                queue_flags: QueueFlags::TRANSFER,
                queue_count: 1,
            },
        ],
        ..Default::default()
    })
    .unwrap();
    let scenarios = catalog::catalog();

    let report = scenario::run(&device, &scenarios, &ScenarioConfig::default());
    assert!(report.is_success(), "{}", report);

    for name in [
        "synchronization/basic/semaphore/multi_queue",
        "synchronization/basic/semaphore/chain",
        "synchronization/op/multi_queue/semaphore/compute_compute_buffer",
    ] {
        assert_eq!(report.outcome(name), Some(&Outcome::Pass), "{}", name);
    }
}

#[test]
fn filtered_run() {
    init_tracing();
    let device = SoftDevice::new(SoftDeviceCreateInfo::default()).unwrap();
    let scenarios = catalog::filter(catalog::catalog(), "synchronization/op/multi_queue/fence/");

    let report = scenario::run(&device, &scenarios, &ScenarioConfig::default());
    assert_eq!(report.results.len(), 8);
    assert_eq!(
        report.outcome("synchronization/op/multi_queue/fence/transfer_compute_image"),
        Some(&Outcome::Pass),
    );
    assert!(report
        .to_string()
        .ends_with("8 scenarios: 8 passed, 0 failed, 0 skipped, 0 errors, 0 not run"));
}
