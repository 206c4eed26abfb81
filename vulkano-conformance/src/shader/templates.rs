//! GLSL source templates for every [`Kernel`].
//!
//! Every function here is a pure function of its parameters. Array sizes and constants are baked
//! into the source text, the way a shader compiler would see them.

use super::{ComputeShader, Kernel};
use std::fmt::Write;

/// The kind of buffer that the invert shaders read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvertSource {
    /// The input is bound as a uniform buffer.
    UniformBuffer,

    /// The input is bound as a storage buffer.
    StorageBuffer,
}

const VERSION: &str = "#version 310 es\n";

const WORKGROUP_INDICES: &str = "    uint localSize  = gl_WorkGroupSize.x*gl_WorkGroupSize.y*gl_WorkGroupSize.z;
    uint globalNdx  = gl_NumWorkGroups.x*gl_NumWorkGroups.y*gl_WorkGroupID.z + gl_NumWorkGroups.x*gl_WorkGroupID.y + gl_WorkGroupID.x;
    uint globalOffs = localSize*globalNdx;
    uint localOffs  = gl_WorkGroupSize.x*gl_WorkGroupSize.y*gl_LocalInvocationID.z + gl_WorkGroupSize.x*gl_LocalInvocationID.y + gl_LocalInvocationID.x;
";

const GROUP_NDX: &str = "    uvec3 size      = gl_NumWorkGroups * gl_WorkGroupSize;
    uint groupNdx   = size.x*size.y*gl_GlobalInvocationID.z + size.x*gl_GlobalInvocationID.y + gl_GlobalInvocationID.x;
";

const WORKGROUP_OFFSET: &str = "    uint offset = gl_NumWorkGroups.x*gl_NumWorkGroups.y*gl_WorkGroupID.z + gl_NumWorkGroups.x*gl_WorkGroupID.y + gl_WorkGroupID.x;\n";

const PATTERN_FN: &str = "uint pattern (uint seed, uint index) {
    uint x = index*0x9e3779b9u + seed;
    x ^= x >> 16u;
    x *= 0x85ebca6bu;
    x ^= x >> 13u;
    return x;
}
";

fn local_size_layout(local_size: [u32; 3]) -> String {
    format!(
        "layout (local_size_x = {}, local_size_y = {}, local_size_z = {}) in;\n",
        local_size[0], local_size[1], local_size[2],
    )
}

fn array_len(num_values: u32, sized: bool) -> String {
    if sized {
        num_values.to_string()
    } else {
        String::new()
    }
}

fn shader(
    name: impl Into<String>,
    source: String,
    local_size: [u32; 3],
    kernel: Kernel,
) -> ComputeShader {
    ComputeShader {
        name: name.into(),
        source,
        local_size,
        kernel,
    }
}

/// A shader that does nothing.
pub fn empty() -> ComputeShader {
    let source = format!("{VERSION}layout (local_size_x = 1) in;\nvoid main (void) {{}}\n");

    shader("empty", source, [1, 1, 1], Kernel::Empty)
}

/// Copies `num_values` words from binding 0 to binding 1, complementing every bit.
pub fn buffer_invert(source: InvertSource, num_values: u32, local_size: [u32; 3]) -> ComputeShader {
    let mut src = String::from(VERSION);
    src.push_str(&local_size_layout(local_size));

    let (name, load) = match source {
        InvertSource::UniformBuffer => {
            // std140 rounds the stride of scalar arrays up to 16 bytes, so the words are read as
            // vectors to keep the buffer tightly packed.
            writeln!(
                src,
                "layout(binding = 0) readonly uniform Input {{\n    uvec4 values[{}];\n}} ub_in;",
                num_values.div_ceil(4),
            )
            .ok();

            ("buffer_invert_ubo", "ub_in.values[(offset + ndx) / 4u][(offset + ndx) % 4u]")
        }
        InvertSource::StorageBuffer => {
            writeln!(
                src,
                "layout(binding = 0) readonly buffer Input {{\n    uint values[{}];\n}} sb_in;",
                num_values,
            )
            .ok();

            ("buffer_invert_ssbo", "sb_in.values[offset + ndx]")
        }
    };

    writeln!(
        src,
        "layout(binding = 1) writeonly buffer Output {{\n    uint values[{num_values}];\n}} sb_out;\n\
        void main (void) {{\n{GROUP_NDX}\
        \x20   uint numValuesPerInv = {num_values}u / (size.x*size.y*size.z);\n\
        \x20   uint offset          = numValuesPerInv*groupNdx;\n\
        \n\
        \x20   for (uint ndx = 0u; ndx < numValuesPerInv; ndx++)\n\
        \x20       sb_out.values[offset + ndx] = ~{load};\n\
        }}",
    )
    .ok();

    shader(name, src, local_size, Kernel::InvertBuffer)
}

/// Complements `num_values` words of binding 0 in place.
///
/// If `sized` is false, the array is declared without a size and its length is queried at run
/// time.
pub fn invert_in_place(num_values: u32, sized: bool, local_size: [u32; 3]) -> ComputeShader {
    let source = format!(
        "{VERSION}{}layout(binding = 0) buffer InOut {{\n    uint values[{}];\n}} sb_inout;\n\
        void main (void) {{\n{GROUP_NDX}\
        \x20   uint numValuesPerInv = uint(sb_inout.values.length()) / (size.x*size.y*size.z);\n\
        \x20   uint offset          = numValuesPerInv*groupNdx;\n\
        \n\
        \x20   for (uint ndx = 0u; ndx < numValuesPerInv; ndx++)\n\
        \x20       sb_inout.values[offset + ndx] = ~sb_inout.values[offset + ndx];\n\
        }}\n",
        local_size_layout(local_size),
        array_len(num_values, sized),
    );

    shader("invert_in_place", source, local_size, Kernel::InvertInPlace)
}

/// Writes increasing indices to binding 0 and decreasing ones to binding 1.
pub fn write_multiple(num_values: u32, sized: bool, local_size: [u32; 3]) -> ComputeShader {
    let len = array_len(num_values, sized);
    let source = format!(
        "{VERSION}{}layout(binding = 0) writeonly buffer Out0 {{\n    uint values[{len}];\n}} sb_out0;\n\
        layout(binding = 1) writeonly buffer Out1 {{\n    uint values[{len}];\n}} sb_out1;\n\
        void main (void) {{\n{GROUP_NDX}\
        \n\
        \x20   {{\n\
        \x20       uint numValuesPerInv = uint(sb_out0.values.length()) / (size.x*size.y*size.z);\n\
        \x20       uint offset          = numValuesPerInv*groupNdx;\n\
        \n\
        \x20       for (uint ndx = 0u; ndx < numValuesPerInv; ndx++)\n\
        \x20           sb_out0.values[offset + ndx] = offset + ndx;\n\
        \x20   }}\n\
        \x20   {{\n\
        \x20       uint numValuesPerInv = uint(sb_out1.values.length()) / (size.x*size.y*size.z);\n\
        \x20       uint offset          = numValuesPerInv*groupNdx;\n\
        \n\
        \x20       for (uint ndx = 0u; ndx < numValuesPerInv; ndx++)\n\
        \x20           sb_out1.values[offset + ndx] = uint(sb_out1.values.length()) - offset - ndx;\n\
        \x20   }}\n\
        }}\n",
        local_size_layout(local_size),
    );

    shader("write_multiple", source, local_size, Kernel::WriteMultiple)
}

/// Accumulates local indices into neighbouring words, separated by group barriers.
pub fn local_barrier(num_values: u32, local_size: [u32; 3]) -> ComputeShader {
    let source = format!(
        "{VERSION}{}layout(binding = 0) coherent buffer Output {{\n    uint values[{num_values}];\n}} sb_out;\n\n\
        void main (void) {{\n{WORKGROUP_INDICES}\
        \n\
        \x20   sb_out.values[globalOffs + localOffs] = globalOffs;\n\
        \x20   memoryBarrierBuffer();\n\
        \x20   barrier();\n\
        \x20   sb_out.values[globalOffs + ((localOffs+1u)%localSize)] += localOffs;\n\
        \x20   memoryBarrierBuffer();\n\
        \x20   barrier();\n\
        \x20   sb_out.values[globalOffs + ((localOffs+2u)%localSize)] += localOffs;\n\
        }}\n",
        local_size_layout(local_size),
    );

    shader("local_barrier", source, local_size, Kernel::LocalBarrier)
}

/// Reverses squared local indices through a shared array.
pub fn shared_var(num_values: u32, local_size: [u32; 3]) -> ComputeShader {
    let workgroup_size: u32 = local_size.iter().product();
    let source = format!(
        "{VERSION}{}layout(binding = 0) writeonly buffer Output {{\n    uint values[{num_values}];\n}} sb_out;\n\n\
        shared uint offsets[{workgroup_size}];\n\n\
        void main (void) {{\n{WORKGROUP_INDICES}\
        \n\
        \x20   offsets[localSize-localOffs-1u] = globalOffs + localOffs*localOffs;\n\
        \x20   memoryBarrierShared();\n\
        \x20   barrier();\n\
        \x20   sb_out.values[globalOffs + localOffs] = offsets[localOffs];\n\
        }}\n",
        local_size_layout(local_size),
    );

    shader("shared_var", source, local_size, Kernel::SharedVar)
}

/// Counts invocations with an atomic add on a shared variable.
pub fn shared_atomic(num_values: u32, local_size: [u32; 3]) -> ComputeShader {
    let source = format!(
        "{VERSION}{}layout(binding = 0) writeonly buffer Output {{\n    uint values[{num_values}];\n}} sb_out;\n\n\
        shared uint count;\n\n\
        void main (void) {{\n\
        \x20   uint localSize  = gl_WorkGroupSize.x*gl_WorkGroupSize.y*gl_WorkGroupSize.z;\n\
        \x20   uint globalNdx  = gl_NumWorkGroups.x*gl_NumWorkGroups.y*gl_WorkGroupID.z + gl_NumWorkGroups.x*gl_WorkGroupID.y + gl_WorkGroupID.x;\n\
        \x20   uint globalOffs = localSize*globalNdx;\n\
        \n\
        \x20   count = 0u;\n\
        \x20   memoryBarrierShared();\n\
        \x20   barrier();\n\
        \x20   uint oldVal = atomicAdd(count, 1u);\n\
        \x20   sb_out.values[globalOffs+oldVal] = oldVal+1u;\n\
        }}\n",
        local_size_layout(local_size),
    );

    shader("shared_atomic", source, local_size, Kernel::SharedAtomic)
}

/// Copies a storage image into a storage buffer.
pub fn copy_image_to_buffer(local_size: [u32; 2], image_size: [u32; 2]) -> ComputeShader {
    let source = format!(
        "{VERSION}layout (local_size_x = {}, local_size_y = {}) in;\n\
        layout(binding = 1, r32ui) readonly uniform highp uimage2D u_srcImg;\n\
        layout(binding = 0) writeonly buffer Output {{\n    uint values[{}];\n}} sb_out;\n\n\
        void main (void) {{\n\
        \x20   uint stride = gl_NumWorkGroups.x*gl_WorkGroupSize.x;\n\
        \x20   uint value  = imageLoad(u_srcImg, ivec2(gl_GlobalInvocationID.xy)).x;\n\
        \x20   sb_out.values[gl_GlobalInvocationID.y*stride + gl_GlobalInvocationID.x] = value;\n\
        }}\n",
        local_size[0],
        local_size[1],
        image_size[0] * image_size[1],
    );

    shader(
        "copy_image_to_buffer",
        source,
        [local_size[0], local_size[1], 1],
        Kernel::CopyImageToBuffer,
    )
}

/// Copies a storage buffer into a storage image.
pub fn copy_buffer_to_image(local_size: [u32; 2], image_size: [u32; 2]) -> ComputeShader {
    let source = format!(
        "{VERSION}layout (local_size_x = {}, local_size_y = {}) in;\n\
        layout(binding = 1, r32ui) writeonly uniform highp uimage2D u_dstImg;\n\
        layout(binding = 0) readonly buffer Input {{\n    uint values[{}];\n}} sb_in;\n\n\
        void main (void) {{\n\
        \x20   uint stride = gl_NumWorkGroups.x*gl_WorkGroupSize.x;\n\
        \x20   uint value  = sb_in.values[gl_GlobalInvocationID.y*stride + gl_GlobalInvocationID.x];\n\
        \x20   imageStore(u_dstImg, ivec2(gl_GlobalInvocationID.xy), uvec4(value, 0, 0, 0));\n\
        }}\n",
        local_size[0],
        local_size[1],
        image_size[0] * image_size[1],
    );

    shader(
        "copy_buffer_to_image",
        source,
        [local_size[0], local_size[1], 1],
        Kernel::CopyBufferToImage,
    )
}

/// Sums `local_size` words per texel into an image with image atomics.
pub fn image_atomic_sum(local_size: u32, image_size: [u32; 2]) -> ComputeShader {
    let source = format!(
        "{VERSION}#extension GL_OES_shader_image_atomic : require\n\
        layout (local_size_x = {local_size}) in;\n\
        layout(binding = 1, r32ui) coherent uniform highp uimage2D u_dstImg;\n\
        layout(binding = 0) readonly buffer Input {{\n    uint values[{}];\n}} sb_in;\n\n\
        void main (void) {{\n\
        \x20   uint stride = gl_NumWorkGroups.x*gl_WorkGroupSize.x;\n\
        \x20   uint value  = sb_in.values[gl_GlobalInvocationID.y*stride + gl_GlobalInvocationID.x];\n\
        \n\
        \x20   if (gl_LocalInvocationIndex == 0u)\n\
        \x20       imageStore(u_dstImg, ivec2(gl_WorkGroupID.xy), uvec4(0));\n\
        \x20   memoryBarrierImage();\n\
        \x20   barrier();\n\
        \x20   imageAtomicAdd(u_dstImg, ivec2(gl_WorkGroupID.xy), value);\n\
        }}\n",
        image_size[0] * image_size[1] * local_size,
    );

    shader("image_atomic_sum", source, [local_size, 1, 1], Kernel::ImageAtomicSum)
}

/// Writes a base value plus the workgroup index into a storage buffer.
pub fn write_base_offset() -> ComputeShader {
    let source = format!(
        "{VERSION}layout (local_size_x = 1) in;\n\
        layout(binding = 2) readonly uniform Constants {{\n    uint u_baseVal;\n}};\n\
        layout(binding = 1) writeonly buffer Output {{\n    uint values[];\n}};\n\
        void main (void) {{\n{WORKGROUP_OFFSET}\
        \x20   values[offset] = u_baseVal + offset;\n\
        }}\n",
    );

    shader("write_base_offset", source, [1, 1, 1], Kernel::WriteBaseOffset)
}

/// Sums a storage buffer into a single word with atomics.
pub fn sum_buffer() -> ComputeShader {
    let source = format!(
        "{VERSION}layout (local_size_x = 1) in;\n\
        layout(binding = 1) readonly buffer Input {{\n    uint values[];\n}};\n\
        layout(binding = 0) coherent buffer Output {{\n    uint sum;\n}};\n\
        void main (void) {{\n{WORKGROUP_OFFSET}\
        \x20   uint value  = values[offset];\n\
        \x20   atomicAdd(sum, value);\n\
        }}\n",
    );

    shader("sum_buffer", source, [1, 1, 1], Kernel::SumBuffer)
}

/// Writes a base value plus the workgroup index into a storage image.
pub fn write_image_base_offset() -> ComputeShader {
    let source = format!(
        "{VERSION}layout (local_size_x = 1) in;\n\
        layout(binding = 2) readonly uniform Constants {{\n    uint u_baseVal;\n}};\n\
        layout(binding = 1, r32ui) writeonly uniform highp uimage2D u_img;\n\
        void main (void) {{\n{WORKGROUP_OFFSET}\
        \x20   imageStore(u_img, ivec2(gl_WorkGroupID.xy), uvec4(offset + u_baseVal, 0, 0, 0));\n\
        }}\n",
    );

    shader("write_image_base_offset", source, [1, 1, 1], Kernel::WriteImageBaseOffset)
}

/// Sums a storage image into a single word with atomics.
pub fn sum_image() -> ComputeShader {
    let source = format!(
        "{VERSION}layout (local_size_x = 1) in;\n\
        layout(binding = 1, r32ui) readonly uniform highp uimage2D u_img;\n\
        layout(binding = 0) coherent buffer Output {{\n    uint sum;\n}};\n\
        void main (void) {{\n\
        \x20   uint value = imageLoad(u_img, ivec2(gl_WorkGroupID.xy)).x;\n\
        \x20   atomicAdd(sum, value);\n\
        }}\n",
    );

    shader("sum_image", source, [1, 1, 1], Kernel::SumImage)
}

/// Fills a storage buffer with the pattern of `seed`.
pub fn fill_buffer(seed: u32, num_values: u32, local_size: [u32; 3]) -> ComputeShader {
    let source = format!(
        "{VERSION}{}layout(binding = 0) writeonly buffer Output {{\n    uint values[{num_values}];\n}} sb_out;\n\n\
        {PATTERN_FN}\n\
        void main (void) {{\n{GROUP_NDX}\
        \x20   if (groupNdx < {num_values}u)\n\
        \x20       sb_out.values[groupNdx] = pattern({seed}u, groupNdx);\n\
        }}\n",
        local_size_layout(local_size),
    );

    shader("fill_buffer", source, local_size, Kernel::FillBuffer { seed })
}

/// Fills a storage image with the pattern of `seed`, indexed in row-major order.
pub fn fill_image(seed: u32, local_size: [u32; 2]) -> ComputeShader {
    let source = format!(
        "{VERSION}layout (local_size_x = {}, local_size_y = {}) in;\n\
        layout(binding = 0, r32ui) writeonly uniform highp uimage2D u_dstImg;\n\n\
        {PATTERN_FN}\n\
        void main (void) {{\n\
        \x20   ivec2 size = imageSize(u_dstImg);\n\
        \x20   ivec2 pos  = ivec2(gl_GlobalInvocationID.xy);\n\
        \x20   if (pos.x < size.x && pos.y < size.y)\n\
        \x20       imageStore(u_dstImg, pos, uvec4(pattern({seed}u, uint(pos.y*size.x + pos.x)), 0, 0, 0));\n\
        }}\n",
        local_size[0], local_size[1],
    );

    shader(
        "fill_image",
        source,
        [local_size[0], local_size[1], 1],
        Kernel::FillImage { seed },
    )
}

/// Copies a storage buffer into another storage buffer.
pub fn copy_buffer(num_values: u32, local_size: [u32; 3]) -> ComputeShader {
    let source = format!(
        "{VERSION}{}layout(binding = 0) readonly buffer Input {{\n    uint values[{num_values}];\n}} sb_in;\n\
        layout(binding = 1) writeonly buffer Output {{\n    uint values[{num_values}];\n}} sb_out;\n\n\
        void main (void) {{\n{GROUP_NDX}\
        \x20   if (groupNdx < {num_values}u)\n\
        \x20       sb_out.values[groupNdx] = sb_in.values[groupNdx];\n\
        }}\n",
        local_size_layout(local_size),
    );

    shader("copy_buffer", source, local_size, Kernel::CopyBuffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_size_is_baked_in() {
        let shader = shared_var(30, [3, 2, 5]);

        assert!(shader
            .source
            .contains("layout (local_size_x = 3, local_size_y = 2, local_size_z = 5) in;"));
        assert!(shader.source.contains("shared uint offsets[30];"));
        assert_eq!(shader.invocations_per_workgroup(), 30);
        assert_eq!(shader.kernel, Kernel::SharedVar);
    }

    #[test]
    fn invert_sources() {
        let ubo = buffer_invert(InvertSource::UniformBuffer, 1024, [2, 1, 4]);
        assert!(ubo.source.contains("uvec4 values[256];"));
        assert!(ubo.source.contains("~ub_in.values[(offset + ndx) / 4u][(offset + ndx) % 4u]"));
        assert_eq!(ubo.name, "buffer_invert_ubo");

        let ssbo = buffer_invert(InvertSource::StorageBuffer, 256, [1, 1, 1]);
        assert!(ssbo.source.contains("readonly buffer Input {\n    uint values[256];"));
        assert!(ssbo.source.contains("sb_out.values[offset + ndx] = ~sb_in.values[offset + ndx];"));
        assert_eq!(ssbo.kernel, Kernel::InvertBuffer);
    }

    #[test]
    fn unsized_arrays() {
        let sized = invert_in_place(256, true, [1, 1, 1]);
        let unsized_ = invert_in_place(256, false, [1, 1, 1]);

        assert!(sized.source.contains("uint values[256];"));
        assert!(unsized_.source.contains("uint values[];"));

        let multiple = write_multiple(1024, false, [1, 4, 2]);
        assert_eq!(multiple.source.matches("uint values[];").count(), 2);
    }

    #[test]
    fn read_modify_write_is_kept() {
        let shader = local_barrier(30, [3, 2, 5]);

        assert_eq!(shader.source.matches("    barrier();").count(), 2);
        assert!(shader.source.contains("((localOffs+1u)%localSize)] += localOffs;"));
        assert_eq!(shader.kernel.phase_count(), 3);
    }

    #[test]
    fn image_shaders() {
        let shader = image_atomic_sum(8, [64, 64]);
        assert!(shader.source.contains("uint values[32768];"));
        assert_eq!(shader.local_size, [8, 1, 1]);
        assert_eq!(shader.kernel.phase_count(), 2);

        let shader = copy_image_to_buffer([2, 4], [512, 512]);
        assert!(shader.source.contains("layout (local_size_x = 2, local_size_y = 4) in;"));
        assert_eq!(shader.local_size, [2, 4, 1]);
    }

    #[test]
    fn pattern_seed_is_baked_in() {
        let shader = fill_buffer(0x1234, 4096, [64, 1, 1]);

        assert!(shader.source.contains("pattern(4660u, groupNdx)"));
        assert_eq!(shader.kernel, Kernel::FillBuffer { seed: 0x1234 });
    }
}
