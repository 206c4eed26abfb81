//! Compute shaders used by the scenarios.
//!
//! A [`ComputeShader`] pairs the GLSL source of a shader with a [`Kernel`] that names what the
//! shader computes. A device compiles the source, or, like the software device, executes the
//! kernel directly. The sources are produced by the pure functions in [`templates`].

use ash::vk;
use std::sync::Arc;

pub mod templates;

/// A compute shader, ready to be turned into a shader module by a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputeShader {
    /// The logical name of the shader, unique within a scenario.
    pub name: String,

    /// The GLSL source text.
    pub source: String,

    /// The number of invocations in each workgroup, in three dimensions.
    pub local_size: [u32; 3],

    /// What the shader computes.
    pub kernel: Kernel,
}

impl ComputeShader {
    /// Returns the number of invocations in each workgroup.
    #[inline]
    pub fn invocations_per_workgroup(&self) -> u32 {
        self.local_size.iter().product()
    }
}

/// A shader module created on a device, together with the shader it was created from.
#[derive(Clone, Debug)]
pub struct ShaderModule {
    handle: vk::ShaderModule,
    shader: Arc<ComputeShader>,
}

impl ShaderModule {
    pub(crate) fn new(handle: vk::ShaderModule, shader: Arc<ComputeShader>) -> Self {
        ShaderModule { handle, shader }
    }

    /// Returns the raw handle of the shader module.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    /// Returns the shader the module was created from.
    #[inline]
    pub fn shader(&self) -> &Arc<ComputeShader> {
        &self.shader
    }
}

/// The type of resource that a binding of a shader expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    StorageBuffer,
    StorageImage,
}

/// The computation performed by a compute shader.
///
/// Each variant documents its bindings. Indices of buffer words are computed from the built-in
/// invocation IDs exactly as the GLSL source does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Kernel {
    /// Does nothing.
    Empty,

    /// Each invocation writes the complement of its share of binding 0 (a uniform or storage
    /// buffer) into binding 1.
    InvertBuffer,

    /// Each invocation complements its share of the storage buffer at binding 0 in place.
    InvertInPlace,

    /// Each invocation writes `i` into binding 0 and `len - i` into binding 1, for every index
    /// `i` in its share.
    WriteMultiple,

    /// Every invocation writes the offset of its workgroup into its own word of binding 0, then
    /// after a group barrier adds its local index to its neighbour's word, and after another
    /// group barrier to the word after that.
    LocalBarrier,

    /// Invocations write the square of their local index, plus the workgroup offset, into a
    /// shared array in reverse order, and after a group barrier copy the array to binding 0.
    SharedVar,

    /// Invocations count themselves with an atomic add on a shared counter, and write the
    /// counter value they observed, plus one, into binding 0.
    SharedAtomic,

    /// Copies the storage image at binding 1 into the storage buffer at binding 0, row by row.
    CopyImageToBuffer,

    /// Copies the storage buffer at binding 0 into the storage image at binding 1, row by row.
    CopyBufferToImage,

    /// The first invocation of every workgroup clears the texel of binding 1 selected by the
    /// workgroup ID, then after a group barrier every invocation atomically adds its word of
    /// binding 0 to it.
    ImageAtomicSum,

    /// Every workgroup writes the base value from the uniform buffer at binding 2, plus its own
    /// linear index, into its word of binding 1.
    WriteBaseOffset,

    /// Every workgroup atomically adds its word of binding 1 to the first word of binding 0.
    SumBuffer,

    /// Every workgroup writes the base value from the uniform buffer at binding 2, plus its own
    /// linear index, into the texel of binding 1 selected by the workgroup ID.
    WriteImageBaseOffset,

    /// Every workgroup atomically adds the texel of binding 1 selected by the workgroup ID to
    /// the first word of binding 0.
    SumImage,

    /// Every invocation writes the pattern value of its global index into binding 0.
    FillBuffer { seed: u32 },

    /// Every invocation writes the pattern value of its texel into the storage image at
    /// binding 0.
    FillImage { seed: u32 },

    /// Every invocation copies its word of binding 0 into binding 1.
    CopyBuffer,
}

impl Kernel {
    /// Returns the number of phases the kernel is split into by group barriers.
    #[inline]
    pub const fn phase_count(self) -> usize {
        match self {
            Kernel::LocalBarrier => 3,
            Kernel::SharedVar | Kernel::SharedAtomic | Kernel::ImageAtomicSum => 2,
            _ => 1,
        }
    }

    /// Returns the bindings the kernel uses, with the descriptor types each one accepts.
    pub const fn bindings(self) -> &'static [(u32, &'static [DescriptorType])] {
        const UNIFORM: &[DescriptorType] = &[DescriptorType::UniformBuffer];
        const STORAGE: &[DescriptorType] = &[DescriptorType::StorageBuffer];
        const IMAGE: &[DescriptorType] = &[DescriptorType::StorageImage];
        const ANY_BUFFER: &[DescriptorType] =
            &[DescriptorType::UniformBuffer, DescriptorType::StorageBuffer];

        match self {
            Kernel::Empty => &[],
            Kernel::InvertBuffer => &[(0, ANY_BUFFER), (1, STORAGE)],
            Kernel::InvertInPlace
            | Kernel::LocalBarrier
            | Kernel::SharedVar
            | Kernel::SharedAtomic
            | Kernel::FillBuffer { .. } => &[(0, STORAGE)],
            Kernel::WriteMultiple | Kernel::SumBuffer | Kernel::CopyBuffer => {
                &[(0, STORAGE), (1, STORAGE)]
            }
            Kernel::CopyImageToBuffer
            | Kernel::CopyBufferToImage
            | Kernel::ImageAtomicSum
            | Kernel::SumImage => &[(0, STORAGE), (1, IMAGE)],
            Kernel::WriteBaseOffset => &[(1, STORAGE), (2, UNIFORM)],
            Kernel::WriteImageBaseOffset => &[(1, IMAGE), (2, UNIFORM)],
            Kernel::FillImage { .. } => &[(0, IMAGE)],
        }
    }

    /// Returns the number of shared words each workgroup needs.
    #[inline]
    pub const fn shared_words(self, invocations_per_workgroup: u32) -> usize {
        match self {
            Kernel::SharedVar => invocations_per_workgroup as usize,
            Kernel::SharedAtomic => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_bindings() {
        assert!(Kernel::Empty.bindings().is_empty());
        assert_eq!(
            Kernel::InvertBuffer.bindings()[0].1,
            &[DescriptorType::UniformBuffer, DescriptorType::StorageBuffer][..],
        );
        assert_eq!(
            Kernel::WriteImageBaseOffset.bindings(),
            &[
                (1u32, &[DescriptorType::StorageImage][..]),
                (2u32, &[DescriptorType::UniformBuffer][..]),
            ],
        );
        assert_eq!(Kernel::SharedVar.shared_words(30), 30);
        assert_eq!(Kernel::CopyBuffer.phase_count(), 1);
    }
}
