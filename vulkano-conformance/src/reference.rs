//! Closed-form models of what the scenarios compute.
//!
//! Every function is a pure function of the scenario parameters and its seeded input. Indices
//! follow the linearization the shaders use: `x` varies fastest, then `y`, then `z`.

/// Returns the value of the hashed pattern of `seed` at `index`.
///
/// The same function is baked into the fill shaders, so that a buffer or image filled on the
/// device can be checked on the host without a copy of the input.
#[inline]
pub const fn pattern(seed: u32, index: u32) -> u32 {
    let mut x = index.wrapping_mul(0x9e37_79b9).wrapping_add(seed);
    x ^= x >> 16;
    x = x.wrapping_mul(0x85eb_ca6b);
    x ^= x >> 13;

    x
}

/// Returns the first `len` values of the pattern of `seed`.
pub fn pattern_words(seed: u32, len: usize) -> Vec<u32> {
    (0..len as u32).map(|index| pattern(seed, index)).collect()
}

/// Returns the bitwise complement of every word of `input`.
pub fn invert(input: &[u32]) -> Vec<u32> {
    input.iter().map(|&word| !word).collect()
}

/// Returns the two outputs of the write-multiple kernel: the index of every word, and the
/// number of words minus the index.
pub fn write_multiple(num_values: u32) -> (Vec<u32>, Vec<u32>) {
    let first = (0..num_values).collect();
    let second = (0..num_values).map(|i| num_values - i).collect();

    (first, second)
}

fn for_each_group(
    local_size: [u32; 3],
    work_size: [u32; 3],
    mut f: impl FnMut(u32, u32, u32) -> u32,
) -> Vec<u32> {
    let invocations: u32 = local_size.iter().product();
    let groups: u32 = work_size.iter().product();

    (0..groups)
        .flat_map(|group| {
            let global_offset = group * invocations;
            (0..invocations).map(move |local| (global_offset, local))
        })
        .map(|(global_offset, local)| f(global_offset, local, invocations))
        .collect()
}

/// Returns the output of the local barrier kernel.
///
/// Every word starts as the offset of its workgroup, and receives the local index of the two
/// invocations before it, wrapping around within the workgroup.
pub fn local_barrier(local_size: [u32; 3], work_size: [u32; 3]) -> Vec<u32> {
    for_each_group(local_size, work_size, |global_offset, local, size| {
        let offset0 = (local + size - 1) % size;
        let offset1 = (local + 2 * size - 2) % size;

        global_offset + offset0 + offset1
    })
}

/// Returns the output of the shared variable kernel.
///
/// Within each workgroup, the squares of the local indices appear in reverse order, offset by
/// the offset of the workgroup.
pub fn shared_var(local_size: [u32; 3], work_size: [u32; 3]) -> Vec<u32> {
    for_each_group(local_size, work_size, |global_offset, local, size| {
        let mirrored = size - local - 1;

        global_offset.wrapping_add(mirrored * mirrored)
    })
}

/// Returns the output of the shared atomic kernel.
///
/// Every invocation writes one more than the counter value it observed into the word at that
/// value, so each workgroup counts up from one regardless of the order of its invocations.
pub fn shared_atomic(local_size: [u32; 3], work_size: [u32; 3]) -> Vec<u32> {
    for_each_group(local_size, work_size, |_, local, _| local + 1)
}

/// Returns the texels that the image atomic kernel produces.
///
/// Each texel is the wrapping sum of the `local_size` consecutive words of `input` that the
/// workgroup of the texel reads.
pub fn image_atomic(input: &[u32], local_size: u32, image_size: [u32; 2]) -> Vec<u32> {
    let texels = image_size[0] as usize * image_size[1] as usize;
    let local_size = local_size as usize;

    (0..texels)
        .map(|texel| {
            input[texel * local_size..(texel + 1) * local_size]
                .iter()
                .fold(0u32, |sum, &word| sum.wrapping_add(word))
        })
        .collect()
}

/// Returns the wrapping sum of `base + i` for every `i` below `count`.
pub fn base_offset_sum(base: u32, count: u32) -> u32 {
    (0..count).fold(0u32, |sum, i| sum.wrapping_add(base.wrapping_add(i)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_is_deterministic() {
        assert_eq!(pattern(0, 0), 0);
        assert_eq!(pattern(7, 3), pattern(7, 3));
        assert_ne!(pattern(7, 3), pattern(8, 3));
        assert_eq!(pattern_words(5, 4)[2], pattern(5, 2));
    }

    #[test]
    fn shared_var_single_group() {
        let expected: Vec<u32> = (0..30).map(|k| (29 - k) * (29 - k)).collect();
        assert_eq!(shared_var([3, 2, 5], [1, 1, 1]), expected);

        let output = shared_var([1, 1, 1], [2, 5, 4]);
        assert_eq!(output, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn local_barrier_neighbours() {
        assert_eq!(local_barrier([1, 1, 1], [1, 1, 1]), [0]);

        let output = local_barrier([3, 1, 1], [2, 1, 1]);
        // Word 0 of a group receives the indices 2 and 1, word 1 receives 0 and 2, word 2
        // receives 1 and 0.
        assert_eq!(output, [3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn shared_atomic_counts_per_group() {
        assert_eq!(shared_atomic([3, 1, 1], [2, 1, 1]), [1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn image_atomic_sums_runs() {
        let input: Vec<u32> = (0..8).collect();
        assert_eq!(image_atomic(&input, 2, [2, 2]), [1, 5, 9, 13]);
        assert_eq!(image_atomic(&[u32::MAX, 2], 2, [1, 1]), [1]);
    }

    #[test]
    fn base_offset_sums() {
        assert_eq!(base_offset_sum(127, 1), 127);
        assert_eq!(base_offset_sum(127, 4096), 4096 * 127 + 4095 * 4096 / 2);
        assert_eq!(write_multiple(4), (vec![0, 1, 2, 3], vec![4, 3, 2, 1]));
        assert_eq!(invert(&[0, u32::MAX]), [u32::MAX, 0]);
    }
}
