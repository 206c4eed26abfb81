// This example runs the scenario catalog against the software device and prints the report.
//
// An optional argument restricts the run to the scenarios whose name contains it, for example
// `cargo run --example run_catalog -- synchronization/op/multi_queue`. Set `RUST_LOG=debug` to
// see what the device does while a scenario runs, including every read of unsynchronized memory.
//
// The process exits with a non-zero code if a scenario failed or could not be carried out.

use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use vulkano_conformance::{
    device::soft::{SoftDevice, SoftDeviceCreateInfo},
    scenario::{self, catalog, ScenarioConfig},
};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let device = match SoftDevice::new(SoftDeviceCreateInfo::default()) {
        Ok(device) => device,
        Err(err) => {
            eprintln!("failed to create the device: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut scenarios = catalog::catalog();

    if let Some(pattern) = std::env::args().nth(1) {
        scenarios = catalog::filter(scenarios, &pattern);
    }

    let report = scenario::run(&device, &scenarios, &ScenarioConfig::default());
    println!("{report}");

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
