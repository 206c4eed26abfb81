#![cfg(test)]

/// Creates a software device with the default configuration.
macro_rules! soft_device {
    () => {{
        $crate::tests::init_tracing();

        $crate::device::soft::SoftDevice::new(
            $crate::device::soft::SoftDeviceCreateInfo::default(),
        )
        .unwrap()
    }};
}

/// Creates a software device with the given faults.
macro_rules! faulty_device {
    ($($field:ident: $value:expr),* $(,)?) => {{
        $crate::tests::init_tracing();

        $crate::device::soft::SoftDevice::new($crate::device::soft::SoftDeviceCreateInfo {
            faults: $crate::device::soft::SoftFaults {
                $($field: $value,)*
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap()
    }};
}

/// Installs a subscriber that prints the logs of the test being run, filtered by `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
