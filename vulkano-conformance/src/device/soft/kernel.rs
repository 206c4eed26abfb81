//! Execution of compute kernels on the host.
//!
//! A dispatch runs one workgroup at a time. Within a workgroup, the kernel runs phase by phase,
//! every invocation finishing a phase before any starts the next, which is what a group barrier
//! guarantees. The order of workgroups and of invocations within a phase is chosen by the
//! scheduling order of the device.

use super::Scheduling;
use crate::{reference, shader::Kernel, UNDEFINED_PATTERN};
use smallvec::SmallVec;

/// The resources bound to a dispatch, as seen by the dispatch.
#[derive(Debug, Default)]
pub(super) struct Bindings {
    slots: SmallVec<[Slot; 4]>,
}

#[derive(Debug)]
pub(super) struct Slot {
    pub(super) binding: u32,
    pub(super) words: Vec<u32>,
    pub(super) dirty: Vec<bool>,
    /// The width and height, for images.
    pub(super) extent: Option<[u32; 2]>,
}

impl Slot {
    pub(super) fn new(binding: u32, words: Vec<u32>, extent: Option<[u32; 2]>) -> Self {
        Slot {
            binding,
            dirty: vec![false; words.len()],
            words,
            extent,
        }
    }

    /// Returns the ranges of words that were stored to.
    pub(super) fn dirty_runs(&self) -> Vec<std::ops::Range<usize>> {
        let mut runs = Vec::new();
        let mut start = None;

        for (index, &dirty) in self.dirty.iter().chain([false].iter()).enumerate() {
            match (dirty, start) {
                (true, None) => start = Some(index),
                (false, Some(run_start)) => {
                    runs.push(run_start..index);
                    start = None;
                }
                _ => (),
            }
        }

        runs
    }
}

impl Bindings {
    pub(super) fn push(&mut self, slot: Slot) {
        self.slots.push(slot);
    }

    pub(super) fn into_slots(self) -> SmallVec<[Slot; 4]> {
        self.slots
    }

    fn slot(&self, binding: u32) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.binding == binding)
    }

    fn slot_mut(&mut self, binding: u32) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.binding == binding)
    }

    fn len(&self, binding: u32) -> u32 {
        self.slot(binding).map_or(0, |slot| slot.words.len() as u32)
    }

    fn load(&self, binding: u32, index: u32) -> u32 {
        self.slot(binding)
            .and_then(|slot| slot.words.get(index as usize))
            .copied()
            .unwrap_or(UNDEFINED_PATTERN)
    }

    fn store(&mut self, binding: u32, index: u32, value: u32) {
        if let Some(slot) = self.slot_mut(binding) {
            if let Some(word) = slot.words.get_mut(index as usize) {
                *word = value;
                slot.dirty[index as usize] = true;
            }
        }
    }

    fn atomic_add(&mut self, binding: u32, index: u32, value: u32) -> u32 {
        let old = self.load(binding, index);
        self.store(binding, index, old.wrapping_add(value));

        old
    }

    fn texel_index(&self, binding: u32, [x, y]: [u32; 2]) -> Option<u32> {
        let [width, height] = self.slot(binding)?.extent?;

        (x < width && y < height).then_some(y * width + x)
    }

    fn image_size(&self, binding: u32) -> [u32; 2] {
        self.slot(binding).and_then(|slot| slot.extent).unwrap_or([0; 2])
    }

    fn image_load(&self, binding: u32, coords: [u32; 2]) -> u32 {
        match self.texel_index(binding, coords) {
            Some(index) => self.load(binding, index),
            None => 0,
        }
    }

    fn image_store(&mut self, binding: u32, coords: [u32; 2], value: u32) {
        if let Some(index) = self.texel_index(binding, coords) {
            self.store(binding, index, value);
        }
    }

    fn image_atomic_add(&mut self, binding: u32, coords: [u32; 2], value: u32) {
        if let Some(index) = self.texel_index(binding, coords) {
            self.atomic_add(binding, index, value);
        }
    }
}

/// The built-in variables of one invocation.
#[derive(Clone, Copy, Debug)]
struct Invocation {
    local_size: [u32; 3],
    num_work_groups: [u32; 3],
    work_group_id: [u32; 3],
    local_id: [u32; 3],
}

impl Invocation {
    fn global_id(&self) -> [u32; 3] {
        [0, 1, 2].map(|i| self.work_group_id[i] * self.local_size[i] + self.local_id[i])
    }

    fn local_invocations(&self) -> u32 {
        self.local_size.iter().product()
    }

    fn local_index(&self) -> u32 {
        let [lx, ly, _] = self.local_size;
        let [x, y, z] = self.local_id;

        lx * ly * z + lx * y + x
    }

    fn work_group_index(&self) -> u32 {
        let [nx, ny, _] = self.num_work_groups;
        let [x, y, z] = self.work_group_id;

        nx * ny * z + nx * y + x
    }

    fn global_size(&self) -> [u32; 3] {
        [0, 1, 2].map(|i| self.num_work_groups[i] * self.local_size[i])
    }

    fn global_index(&self) -> u32 {
        let [sx, sy, _] = self.global_size();
        let [x, y, z] = self.global_id();

        sx * sy * z + sx * y + x
    }

    fn total_invocations(&self) -> u32 {
        self.global_size().iter().product()
    }

    /// The row stride of the 2D kernels that index buffers by global ID.
    fn stride(&self) -> u32 {
        self.num_work_groups[0] * self.local_size[0]
    }
}

/// Runs `kernel` over `group_counts` workgroups of `local_size` invocations.
pub(super) fn dispatch(
    kernel: Kernel,
    local_size: [u32; 3],
    group_counts: [u32; 3],
    bindings: &mut Bindings,
    scheduling: Scheduling,
) {
    let mut work_groups = ids(group_counts);
    let mut local_ids = ids(local_size);

    if scheduling == Scheduling::Adversarial {
        work_groups.reverse();
        local_ids.reverse();
    }

    let local_invocations: u32 = local_size.iter().product();
    let mut shared = vec![0u32; kernel.shared_words(local_invocations)];

    for &work_group_id in &work_groups {
        shared.fill(UNDEFINED_PATTERN);

        for phase in 0..kernel.phase_count() {
            for &local_id in &local_ids {
                let invocation = Invocation {
                    local_size,
                    num_work_groups: group_counts,
                    work_group_id,
                    local_id,
                };

                run_phase(kernel, phase, &invocation, bindings, &mut shared);
            }
        }
    }
}

fn ids([x, y, z]: [u32; 3]) -> Vec<[u32; 3]> {
    (0..z)
        .flat_map(|k| (0..y).flat_map(move |j| (0..x).map(move |i| [i, j, k])))
        .collect()
}

fn run_phase(
    kernel: Kernel,
    phase: usize,
    inv: &Invocation,
    b: &mut Bindings,
    shared: &mut [u32],
) {
    match kernel {
        Kernel::Empty => {}
        Kernel::InvertBuffer => {
            let per_invocation = b.len(1) / inv.total_invocations();
            let offset = per_invocation * inv.global_index();

            for ndx in 0..per_invocation {
                b.store(1, offset + ndx, !b.load(0, offset + ndx));
            }
        }
        Kernel::InvertInPlace => {
            let per_invocation = b.len(0) / inv.total_invocations();
            let offset = per_invocation * inv.global_index();

            for ndx in 0..per_invocation {
                b.store(0, offset + ndx, !b.load(0, offset + ndx));
            }
        }
        Kernel::WriteMultiple => {
            let per_invocation = b.len(0) / inv.total_invocations();
            let offset = per_invocation * inv.global_index();

            for ndx in 0..per_invocation {
                b.store(0, offset + ndx, offset + ndx);
            }

            let len = b.len(1);
            let per_invocation = len / inv.total_invocations();
            let offset = per_invocation * inv.global_index();

            for ndx in 0..per_invocation {
                b.store(1, offset + ndx, len.wrapping_sub(offset).wrapping_sub(ndx));
            }
        }
        Kernel::LocalBarrier => {
            let local_size = inv.local_invocations();
            let global_offs = local_size * inv.work_group_index();
            let local_offs = inv.local_index();

            match phase {
                0 => b.store(0, global_offs + local_offs, global_offs),
                _ => {
                    let index = global_offs + (local_offs + phase as u32) % local_size;
                    let value = b.load(0, index).wrapping_add(local_offs);
                    b.store(0, index, value);
                }
            }
        }
        Kernel::SharedVar => {
            let local_size = inv.local_invocations();
            let global_offs = local_size * inv.work_group_index();
            let local_offs = inv.local_index();

            match phase {
                0 => {
                    shared[(local_size - local_offs - 1) as usize] =
                        global_offs.wrapping_add(local_offs * local_offs);
                }
                _ => b.store(0, global_offs + local_offs, shared[local_offs as usize]),
            }
        }
        Kernel::SharedAtomic => {
            let global_offs = inv.local_invocations() * inv.work_group_index();

            match phase {
                0 => shared[0] = 0,
                _ => {
                    let old = shared[0];
                    shared[0] = old.wrapping_add(1);
                    b.store(0, global_offs + old, old + 1);
                }
            }
        }
        Kernel::CopyImageToBuffer => {
            let [x, y, _] = inv.global_id();
            let value = b.image_load(1, [x, y]);
            b.store(0, y * inv.stride() + x, value);
        }
        Kernel::CopyBufferToImage => {
            let [x, y, _] = inv.global_id();
            let value = b.load(0, y * inv.stride() + x);
            b.image_store(1, [x, y], value);
        }
        Kernel::ImageAtomicSum => {
            let [x, y, _] = inv.global_id();
            let [wx, wy, _] = inv.work_group_id;

            match phase {
                0 => {
                    if inv.local_index() == 0 {
                        b.image_store(1, [wx, wy], 0);
                    }
                }
                _ => {
                    let value = b.load(0, y * inv.stride() + x);
                    b.image_atomic_add(1, [wx, wy], value);
                }
            }
        }
        Kernel::WriteBaseOffset => {
            let offset = inv.work_group_index();
            b.store(1, offset, b.load(2, 0).wrapping_add(offset));
        }
        Kernel::SumBuffer => {
            let value = b.load(1, inv.work_group_index());
            b.atomic_add(0, 0, value);
        }
        Kernel::WriteImageBaseOffset => {
            let [wx, wy, _] = inv.work_group_id;
            let value = inv.work_group_index().wrapping_add(b.load(2, 0));
            b.image_store(1, [wx, wy], value);
        }
        Kernel::SumImage => {
            let [wx, wy, _] = inv.work_group_id;
            let value = b.image_load(1, [wx, wy]);
            b.atomic_add(0, 0, value);
        }
        Kernel::FillBuffer { seed } => {
            let index = inv.global_index();

            if index < b.len(0) {
                b.store(0, index, reference::pattern(seed, index));
            }
        }
        Kernel::FillImage { seed } => {
            let [width, height] = b.image_size(0);
            let [x, y, _] = inv.global_id();

            if x < width && y < height {
                b.image_store(0, [x, y], reference::pattern(seed, y * width + x));
            }
        }
        Kernel::CopyBuffer => {
            let index = inv.global_index();

            if index < b.len(1) {
                b.store(1, index, b.load(0, index));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(
        kernel: Kernel,
        local_size: [u32; 3],
        group_counts: [u32; 3],
        slots: Vec<Slot>,
    ) -> Vec<Slot> {
        let mut bindings = Bindings::default();
        slots.into_iter().for_each(|slot| bindings.push(slot));
        dispatch(kernel, local_size, group_counts, &mut bindings, Scheduling::Adversarial);

        bindings.into_slots().into_vec()
    }

    #[test]
    fn shared_var_reverses_squares() {
        let slots = run(
            Kernel::SharedVar,
            [3, 2, 5],
            [1, 1, 1],
            vec![Slot::new(0, vec![0; 30], None)],
        );

        let expected: Vec<u32> = (0..30).map(|k| (29 - k) * (29 - k)).collect();
        assert_eq!(slots[0].words, expected);
        assert_eq!(slots[0].dirty_runs(), [0..30]);
    }

    #[test]
    fn local_barrier_accumulates() {
        let slots = run(
            Kernel::LocalBarrier,
            [3, 2, 5],
            [1, 1, 1],
            vec![Slot::new(0, vec![0; 30], None)],
        );

        assert_eq!(slots[0].words, reference::local_barrier([3, 2, 5], [1, 1, 1]));
    }

    #[test]
    fn image_atomic_sum() {
        let input: Vec<u32> = (0..32).collect();
        let slots = run(
            Kernel::ImageAtomicSum,
            [8, 1, 1],
            [2, 2, 1],
            vec![
                Slot::new(0, input.clone(), None),
                Slot::new(1, vec![UNDEFINED_PATTERN; 4], Some([2, 2])),
            ],
        );

        assert_eq!(slots[1].words, reference::image_atomic(&input, 8, [2, 2]));
    }

    #[test]
    fn dirty_runs_are_split() {
        let mut slot = Slot::new(0, vec![0; 6], None);
        slot.dirty = vec![true, true, false, false, true, false];

        assert_eq!(slot.dirty_runs(), [0..2, 4..5]);
    }

    #[test]
    fn out_of_bounds_accesses() {
        let mut bindings = Bindings::default();
        bindings.push(Slot::new(0, vec![1, 2], None));

        assert_eq!(bindings.load(0, 5), UNDEFINED_PATTERN);
        assert_eq!(bindings.load(3, 0), UNDEFINED_PATTERN);
        bindings.store(0, 5, 9);
        assert!(bindings.into_slots()[0].dirty_runs().is_empty());
    }
}
