//! The tree of named scenarios.
//!
//! Names are `/`-separated paths. The catalog is rebuilt on every call; scenarios are plain
//! values and carry no state between runs.

use super::{op::all_pairs, ComputeKind, InvertKind, Scenario, ScenarioKind, SyncKind};

const COMPUTE_BASIC: &str = "compute/basic";
const SYNC_SMOKE: &str = "synchronization/smoke";
const SYNC_BASIC: &str = "synchronization/basic";
const SYNC_OP: &str = "synchronization/op";

/// The sizes of the `single_invocation` and `multiple_groups` variants of the in-place and
/// write-multiple scenarios: (number of values, local size, work size).
const IN_PLACE_SIZES: [(&str, u32, [u32; 3], [u32; 3]); 2] = [
    ("single_invocation", 256, [1, 1, 1], [1, 1, 1]),
    ("multiple_groups", 1024, [1, 4, 2], [2, 2, 4]),
];

/// The sizes of the workgroup scenarios: (local size, work size).
const WORKGROUP_SIZES: [(&str, [u32; 3], [u32; 3]); 4] = [
    ("single_invocation", [1, 1, 1], [1, 1, 1]),
    ("single_group", [3, 2, 5], [1, 1, 1]),
    ("multiple_invocations", [1, 1, 1], [2, 5, 4]),
    ("multiple_groups", [3, 4, 1], [2, 7, 3]),
];

/// Returns every scenario of the suite.
pub fn catalog() -> Vec<Scenario> {
    let mut scenarios = Vec::new();
    compute_basic(&mut scenarios);
    synchronization(&mut scenarios);

    scenarios
}

/// Keeps the scenarios whose name contains `pattern`.
pub fn filter(scenarios: Vec<Scenario>, pattern: &str) -> Vec<Scenario> {
    scenarios
        .into_iter()
        .filter(|scenario| scenario.name.contains(pattern))
        .collect()
}

fn compute_basic(scenarios: &mut Vec<Scenario>) {
    let mut push = |name: String, kind: ComputeKind| {
        scenarios.push(Scenario::new(
            format!("{}/{}", COMPUTE_BASIC, name),
            ScenarioKind::Compute(kind),
        ));
    };

    push("empty_shader".into(), ComputeKind::EmptyShader);

    for (prefix, kind) in [
        ("ubo_to_ssbo", InvertKind::Uniform),
        ("copy_ssbo", InvertKind::Storage),
    ] {
        for (suffix, num_values, local_size, work_size) in [
            ("single_invocation", 256, [1, 1, 1], [1, 1, 1]),
            ("single_group", 1024, [2, 1, 4], [1, 1, 1]),
            ("multiple_invocations", 1024, [1, 1, 1], [2, 4, 1]),
            ("multiple_groups", 1024, [1, 4, 2], [2, 2, 4]),
        ] {
            // The storage variant has no single-group case.
            if kind == InvertKind::Storage && suffix == "single_group" {
                continue;
            }

            push(
                format!("{}_{}", prefix, suffix),
                ComputeKind::BufferInvert {
                    kind,
                    num_values,
                    local_size,
                    work_size,
                },
            );
        }
    }

    for (prefix, kind) in [
        ("ssbo_rw", InvertKind::InPlace),
        ("ssbo_unsized_arr", InvertKind::InPlaceUnsized),
    ] {
        for (suffix, num_values, local_size, work_size) in IN_PLACE_SIZES {
            push(
                format!("{}_{}", prefix, suffix),
                ComputeKind::BufferInvert {
                    kind,
                    num_values,
                    local_size,
                    work_size,
                },
            );
        }
    }

    for (prefix, sized) in [
        ("write_multiple_arr", true),
        ("write_multiple_unsized_arr", false),
    ] {
        for (suffix, num_values, local_size, work_size) in IN_PLACE_SIZES {
            push(
                format!("{}_{}", prefix, suffix),
                ComputeKind::WriteMultiple {
                    sized,
                    num_values,
                    local_size,
                    work_size,
                },
            );
        }
    }

    for (suffix, local_size, work_size) in WORKGROUP_SIZES {
        if suffix == "multiple_invocations" {
            continue;
        }

        push(
            format!("ssbo_local_barrier_{}", suffix),
            ComputeKind::LocalBarrier {
                local_size,
                work_size,
            },
        );
    }

    push(
        "ssbo_cmd_barrier_single".into(),
        ComputeKind::CommandBarrier {
            work_size: [1, 1, 1],
        },
    );
    push(
        "ssbo_cmd_barrier_multiple".into(),
        ComputeKind::CommandBarrier {
            work_size: [11, 5, 7],
        },
    );

    for (suffix, local_size, work_size) in WORKGROUP_SIZES {
        push(
            format!("shared_var_{}", suffix),
            ComputeKind::SharedVar {
                local_size,
                work_size,
            },
        );
    }

    for (suffix, local_size, work_size) in WORKGROUP_SIZES {
        push(
            format!("shared_atomic_op_{}", suffix),
            ComputeKind::SharedAtomic {
                local_size,
                work_size,
            },
        );
    }

    for (suffix, local_size, image_size) in [
        ("small", [1, 1], [64, 64]),
        ("large", [2, 4], [512, 512]),
    ] {
        push(
            format!("copy_image_to_ssbo_{}", suffix),
            ComputeKind::CopyImageToBuffer {
                local_size,
                image_size,
            },
        );
        push(
            format!("copy_ssbo_to_image_{}", suffix),
            ComputeKind::CopyBufferToImage {
                local_size,
                image_size,
            },
        );
    }

    for local_size in [1, 8] {
        push(
            format!("image_atomic_op_local_size_{}", local_size),
            ComputeKind::ImageAtomic {
                local_size,
                image_size: [64, 64],
            },
        );
    }

    push(
        "image_barrier_single".into(),
        ComputeKind::ImageBarrier { image_size: [1, 1] },
    );
    push(
        "image_barrier_multiple".into(),
        ComputeKind::ImageBarrier {
            image_size: [64, 64],
        },
    );
}

fn synchronization(scenarios: &mut Vec<Scenario>) {
    let sync = |group: &str, name: &str, kind: SyncKind| {
        Scenario::new(format!("{}/{}", group, name), ScenarioKind::Sync(kind))
    };

    scenarios.extend([
        sync(SYNC_SMOKE, "fences", SyncKind::SmokeFences),
        sync(SYNC_SMOKE, "semaphores", SyncKind::SmokeSemaphores),
        sync(SYNC_SMOKE, "events", SyncKind::SmokeEvents),
        sync(SYNC_BASIC, "fence/one", SyncKind::FenceOne),
        sync(SYNC_BASIC, "fence/multi", SyncKind::FenceMulti),
        sync(SYNC_BASIC, "fence/empty_submit", SyncKind::FenceEmptySubmit),
        sync(
            SYNC_BASIC,
            "fence/unsignaled_wait_times_out",
            SyncKind::FenceUnsignaledWait,
        ),
        sync(SYNC_BASIC, "semaphore/one_queue", SyncKind::SemaphoreOneQueue),
        sync(SYNC_BASIC, "semaphore/multi_queue", SyncKind::SemaphoreMultiQueue),
        sync(
            SYNC_BASIC,
            "semaphore/chain",
            SyncKind::SemaphoreChain { length: 8 },
        ),
        sync(SYNC_BASIC, "event/host_set_reset", SyncKind::EventHostSetReset),
        sync(
            SYNC_BASIC,
            "event/device_set_host_wait",
            SyncKind::EventDeviceSetHostWait,
        ),
        sync(
            SYNC_BASIC,
            "event/host_set_device_wait",
            SyncKind::EventHostSetDeviceWait,
        ),
        sync(
            SYNC_BASIC,
            "event/device_set_device_wait",
            SyncKind::EventDeviceSetDeviceWait,
        ),
    ]);

    scenarios.extend(all_pairs().map(|pair| {
        Scenario::new(
            format!("{}/{}", SYNC_OP, pair.name()),
            ScenarioKind::Operation(pair),
        )
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use foldhash::HashSet;

    #[test]
    fn names_are_unique() {
        let scenarios = catalog();
        let names: HashSet<_> = scenarios.iter().map(|scenario| &scenario.name).collect();

        assert_eq!(names.len(), scenarios.len());
    }

    #[test]
    fn every_scenario_is_valid() {
        for scenario in catalog() {
            assert!(
                scenario.kind.validate().is_ok(),
                "{} is not valid",
                scenario.name,
            );
        }
    }

    #[test]
    fn groups() {
        let scenarios = catalog();
        let count = |prefix: &str| {
            scenarios
                .iter()
                .filter(|scenario| scenario.name.starts_with(prefix))
                .count()
        };

        assert_eq!(count("compute/basic/"), 37);
        assert_eq!(count("synchronization/smoke/"), 3);
        assert_eq!(count("synchronization/basic/"), 11);
        assert_eq!(count("synchronization/op/single_queue/"), 44);
        assert_eq!(count("synchronization/op/multi_queue/"), 16);
        assert!(scenarios
            .iter()
            .any(|scenario| scenario.name == "compute/basic/shared_var_single_group"));
        assert!(scenarios.iter().any(|scenario| {
            scenario.name == "synchronization/op/multi_queue/fence/compute_transfer_image"
        }));
    }

    #[test]
    fn filtering() {
        let scenarios = filter(catalog(), "image_atomic_op");

        assert_eq!(
            scenarios
                .iter()
                .map(|scenario| scenario.name.as_str())
                .collect::<Vec<_>>(),
            [
                "compute/basic/image_atomic_op_local_size_1",
                "compute/basic/image_atomic_op_local_size_8",
            ],
        );
    }
}
