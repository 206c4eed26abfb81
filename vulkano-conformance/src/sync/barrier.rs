use super::{AccessFlags, DependencyFlags, PipelineStages};
use crate::{
    buffer::Buffer,
    image::{Image, ImageLayout, ImageSubresourceRange},
    DeviceSize, NonExhaustive, ValidationError,
};
use ash::vk;
use smallvec::SmallVec;
use std::ops::Range;

/// Dependency info for barriers in a pipeline barrier or event command.
///
/// A pipeline barrier creates a dependency between commands submitted before the barrier (the
/// source scope) and commands submitted after it (the destination scope). An event command
/// creates a dependency between commands submitted before the event was set, and commands
/// submitted after waiting on the event.
///
/// If no memory barriers are specified, the dependency is an execution dependency only: the
/// destination stages wait for the source stages to finish, but writes are neither made
/// available nor visible.
#[derive(Clone, Debug)]
pub struct DependencyInfo {
    /// Flags to modify how the execution and memory dependencies are formed.
    ///
    /// The default value is empty.
    pub dependency_flags: DependencyFlags,

    /// Memory barriers for global operations and accesses, not limited to a single resource.
    ///
    /// The default value is empty.
    pub memory_barriers: SmallVec<[MemoryBarrier; 2]>,

    /// Memory barriers for individual buffers.
    ///
    /// The default value is empty.
    pub buffer_memory_barriers: SmallVec<[BufferMemoryBarrier; 8]>,

    /// Memory barriers for individual images.
    ///
    /// The default value is empty.
    pub image_memory_barriers: SmallVec<[ImageMemoryBarrier; 8]>,

    pub _ne: NonExhaustive,
}

impl Default for DependencyInfo {
    #[inline]
    fn default() -> Self {
        Self {
            dependency_flags: DependencyFlags::empty(),
            memory_barriers: SmallVec::new(),
            buffer_memory_barriers: SmallVec::new(),
            image_memory_barriers: SmallVec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

impl DependencyInfo {
    /// Returns `true` if `self` doesn't contain any barriers.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.memory_barriers.is_empty()
            && self.buffer_memory_barriers.is_empty()
            && self.image_memory_barriers.is_empty()
    }

    /// Returns the union of the source stages of every barrier.
    pub fn src_stages(&self) -> PipelineStages {
        self.memory_barriers
            .iter()
            .map(|barrier| barrier.src_stages)
            .chain(self.buffer_memory_barriers.iter().map(|barrier| barrier.src_stages))
            .chain(self.image_memory_barriers.iter().map(|barrier| barrier.src_stages))
            .fold(PipelineStages::empty(), PipelineStages::union)
    }

    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        for (index, barrier) in self.memory_barriers.iter().enumerate() {
            barrier
                .validate()
                .map_err(|err| err.add_context(format!("memory_barriers[{}]", index)))?;
        }

        for (index, barrier) in self.buffer_memory_barriers.iter().enumerate() {
            barrier
                .validate()
                .map_err(|err| err.add_context(format!("buffer_memory_barriers[{}]", index)))?;
        }

        for (index, barrier) in self.image_memory_barriers.iter().enumerate() {
            barrier
                .validate()
                .map_err(|err| err.add_context(format!("image_memory_barriers[{}]", index)))?;
        }

        Ok(())
    }

    /// Converts the barriers to their raw `VK_KHR_synchronization2` form, for a driver-backed
    /// device to record.
    pub fn to_vk_fields1(&self) -> DependencyInfoFields1Vk {
        DependencyInfoFields1Vk {
            memory_barriers_vk: self.memory_barriers.iter().map(MemoryBarrier::to_vk).collect(),
            buffer_memory_barriers_vk: self
                .buffer_memory_barriers
                .iter()
                .map(BufferMemoryBarrier::to_vk)
                .collect(),
            image_memory_barriers_vk: self
                .image_memory_barriers
                .iter()
                .map(ImageMemoryBarrier::to_vk)
                .collect(),
        }
    }

    /// Returns the raw dependency info, borrowing the barriers from `fields1_vk`.
    pub fn to_vk<'a>(&self, fields1_vk: &'a DependencyInfoFields1Vk) -> vk::DependencyInfo<'a> {
        let DependencyInfoFields1Vk {
            memory_barriers_vk,
            buffer_memory_barriers_vk,
            image_memory_barriers_vk,
        } = fields1_vk;

        vk::DependencyInfo::default()
            .dependency_flags(self.dependency_flags.into())
            .memory_barriers(memory_barriers_vk)
            .buffer_memory_barriers(buffer_memory_barriers_vk)
            .image_memory_barriers(image_memory_barriers_vk)
    }
}

/// The raw barrier arrays that a [`vk::DependencyInfo`] points to.
pub struct DependencyInfoFields1Vk {
    pub memory_barriers_vk: SmallVec<[vk::MemoryBarrier2<'static>; 2]>,
    pub buffer_memory_barriers_vk: SmallVec<[vk::BufferMemoryBarrier2<'static>; 8]>,
    pub image_memory_barriers_vk: SmallVec<[vk::ImageMemoryBarrier2<'static>; 8]>,
}

/// A memory barrier that is applied globally.
#[derive(Clone, Debug)]
pub struct MemoryBarrier {
    /// The pipeline stages in the source scope to wait for.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub src_stages: PipelineStages,

    /// The memory accesses in the source scope to make available and visible.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub src_access: AccessFlags,

    /// The pipeline stages in the destination scope that must wait for `src_stages`.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub dst_stages: PipelineStages,

    /// The memory accesses in the destination scope that must wait for `src_access` to be made
    /// available and visible.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub dst_access: AccessFlags,

    pub _ne: NonExhaustive,
}

impl Default for MemoryBarrier {
    #[inline]
    fn default() -> Self {
        Self {
            src_stages: PipelineStages::empty(),
            src_access: AccessFlags::empty(),
            dst_stages: PipelineStages::empty(),
            dst_access: AccessFlags::empty(),
            _ne: NonExhaustive(()),
        }
    }
}

impl MemoryBarrier {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        validate_scopes(self.src_stages, self.src_access, self.dst_stages, self.dst_access)
    }

    #[allow(clippy::wrong_self_convention)]
    pub(crate) fn to_vk(&self) -> vk::MemoryBarrier2<'static> {
        let &Self {
            src_stages,
            src_access,
            dst_stages,
            dst_access,
            _ne: _,
        } = self;

        vk::MemoryBarrier2::default()
            .src_stage_mask(src_stages.into())
            .src_access_mask(src_access.into())
            .dst_stage_mask(dst_stages.into())
            .dst_access_mask(dst_access.into())
    }
}

/// A memory barrier that is applied to a single buffer.
#[derive(Clone, Debug)]
pub struct BufferMemoryBarrier {
    /// The pipeline stages in the source scope to wait for.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub src_stages: PipelineStages,

    /// The memory accesses in the source scope to make available and visible.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub src_access: AccessFlags,

    /// The pipeline stages in the destination scope that must wait for `src_stages`.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub dst_stages: PipelineStages,

    /// The memory accesses in the destination scope that must wait for `src_access` to be made
    /// available and visible.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub dst_access: AccessFlags,

    /// For resources created with exclusive sharing, transfers ownership of the resource from
    /// one queue family to another.
    ///
    /// The same barrier is recorded twice: once on a queue of the source family (the release)
    /// and once on a queue of the destination family (the acquire).
    ///
    /// The default value is `None`.
    pub queue_family_ownership_transfer: Option<QueueFamilyOwnershipTransfer>,

    /// The buffer to apply the barrier to.
    pub buffer: Buffer,

    /// The byte range of `buffer` to apply the barrier to.
    ///
    /// The default value is the whole buffer.
    pub range: Range<DeviceSize>,

    pub _ne: NonExhaustive,
}

impl BufferMemoryBarrier {
    /// Returns a `BufferMemoryBarrier` for the whole of `buffer`, with the other fields set to
    /// their defaults.
    #[inline]
    pub fn buffer(buffer: Buffer) -> Self {
        Self {
            src_stages: PipelineStages::empty(),
            src_access: AccessFlags::empty(),
            dst_stages: PipelineStages::empty(),
            dst_access: AccessFlags::empty(),
            queue_family_ownership_transfer: None,
            range: buffer.whole_range(),
            buffer,
            _ne: NonExhaustive(()),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        validate_scopes(self.src_stages, self.src_access, self.dst_stages, self.dst_access)?;

        if let Some(transfer) = &self.queue_family_ownership_transfer {
            transfer
                .validate()
                .map_err(|err| err.add_context("queue_family_ownership_transfer"))?;
        }

        if self.range.is_empty() {
            return Err(ValidationError::new("range", "is empty"));
        }

        if self.range.end > self.buffer.size() {
            return Err(ValidationError::new(
                "range.end",
                "is greater than the size of `buffer`",
            ));
        }

        Ok(())
    }

    #[allow(clippy::wrong_self_convention)]
    pub(crate) fn to_vk(&self) -> vk::BufferMemoryBarrier2<'static> {
        let &Self {
            src_stages,
            src_access,
            dst_stages,
            dst_access,
            queue_family_ownership_transfer,
            buffer,
            ref range,
            _ne: _,
        } = self;

        let (src_queue_family_index, dst_queue_family_index) =
            QueueFamilyOwnershipTransfer::to_vk(queue_family_ownership_transfer);

        vk::BufferMemoryBarrier2::default()
            .src_stage_mask(src_stages.into())
            .src_access_mask(src_access.into())
            .dst_stage_mask(dst_stages.into())
            .dst_access_mask(dst_access.into())
            .src_queue_family_index(src_queue_family_index)
            .dst_queue_family_index(dst_queue_family_index)
            .buffer(buffer.handle())
            .offset(range.start)
            .size(range.end - range.start)
    }
}

/// A memory barrier that is applied to a single image.
#[derive(Clone, Debug)]
pub struct ImageMemoryBarrier {
    /// The pipeline stages in the source scope to wait for.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub src_stages: PipelineStages,

    /// The memory accesses in the source scope to make available and visible.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub src_access: AccessFlags,

    /// The pipeline stages in the destination scope that must wait for `src_stages`.
    ///
    /// The default value is [`PipelineStages::empty()`].
    pub dst_stages: PipelineStages,

    /// The memory accesses in the destination scope that must wait for `src_access` to be made
    /// available and visible.
    ///
    /// The default value is [`AccessFlags::empty()`].
    pub dst_access: AccessFlags,

    /// The layout that the image is expected to be in when the source scope completes.
    ///
    /// If `old_layout` is [`ImageLayout::Undefined`], the contents of the image are discarded.
    ///
    /// The default value is [`ImageLayout::Undefined`].
    pub old_layout: ImageLayout,

    /// The layout that the image will be transitioned to before the destination scope begins.
    ///
    /// The default value is [`ImageLayout::Undefined`], which must be overridden.
    pub new_layout: ImageLayout,

    /// For resources created with exclusive sharing, transfers ownership of the resource from
    /// one queue family to another.
    ///
    /// The default value is `None`.
    pub queue_family_ownership_transfer: Option<QueueFamilyOwnershipTransfer>,

    /// The image to apply the barrier to.
    pub image: Image,

    /// The subresource range of `image` to apply the barrier to.
    ///
    /// The default value is the whole image.
    pub subresource_range: ImageSubresourceRange,

    pub _ne: NonExhaustive,
}

impl ImageMemoryBarrier {
    /// Returns an `ImageMemoryBarrier` for the whole of `image`, with the other fields set to
    /// their defaults.
    #[inline]
    pub fn image(image: Image) -> Self {
        Self {
            src_stages: PipelineStages::empty(),
            src_access: AccessFlags::empty(),
            dst_stages: PipelineStages::empty(),
            dst_access: AccessFlags::empty(),
            old_layout: ImageLayout::Undefined,
            new_layout: ImageLayout::Undefined,
            queue_family_ownership_transfer: None,
            subresource_range: image.subresource_range(),
            image,
            _ne: NonExhaustive(()),
        }
    }

    /// Returns whether the barrier changes the layout of the image.
    #[inline]
    pub fn is_layout_transition(&self) -> bool {
        self.old_layout != self.new_layout
    }

    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        validate_scopes(self.src_stages, self.src_access, self.dst_stages, self.dst_access)?;

        if self.new_layout == ImageLayout::Undefined {
            return Err(ValidationError::new(
                "new_layout",
                "is `ImageLayout::Undefined`",
            ));
        }

        if let Some(transfer) = &self.queue_family_ownership_transfer {
            transfer
                .validate()
                .map_err(|err| err.add_context("queue_family_ownership_transfer"))?;
        }

        self.subresource_range
            .validate()
            .map_err(|err| err.add_context("subresource_range"))?;

        Ok(())
    }

    #[allow(clippy::wrong_self_convention)]
    pub(crate) fn to_vk(&self) -> vk::ImageMemoryBarrier2<'static> {
        let &Self {
            src_stages,
            src_access,
            dst_stages,
            dst_access,
            old_layout,
            new_layout,
            queue_family_ownership_transfer,
            image,
            ref subresource_range,
            _ne: _,
        } = self;

        let (src_queue_family_index, dst_queue_family_index) =
            QueueFamilyOwnershipTransfer::to_vk(queue_family_ownership_transfer);

        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(src_stages.into())
            .src_access_mask(src_access.into())
            .dst_stage_mask(dst_stages.into())
            .dst_access_mask(dst_access.into())
            .old_layout(old_layout.into())
            .new_layout(new_layout.into())
            .src_queue_family_index(src_queue_family_index)
            .dst_queue_family_index(dst_queue_family_index)
            .image(image.handle())
            .subresource_range(subresource_range.to_vk())
    }
}

/// Specifies a queue family ownership transfer for a resource with exclusive sharing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueFamilyOwnershipTransfer {
    /// The queue family that currently owns the resource.
    pub src_index: u32,

    /// The queue family to transfer ownership to.
    pub dst_index: u32,
}

impl QueueFamilyOwnershipTransfer {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.src_index == vk::QUEUE_FAMILY_IGNORED {
            return Err(ValidationError::new(
                "src_index",
                "is `vk::QUEUE_FAMILY_IGNORED`",
            ));
        }

        if self.dst_index == vk::QUEUE_FAMILY_IGNORED {
            return Err(ValidationError::new(
                "dst_index",
                "is `vk::QUEUE_FAMILY_IGNORED`",
            ));
        }

        if self.src_index == self.dst_index {
            return Err(ValidationError::new(
                "dst_index",
                "is equal to `src_index`",
            ));
        }

        Ok(())
    }

    /// Returns the raw source and destination queue family indices, which are both
    /// `vk::QUEUE_FAMILY_IGNORED` if there is no transfer.
    #[allow(clippy::wrong_self_convention)]
    pub(crate) fn to_vk(transfer: Option<Self>) -> (u32, u32) {
        match transfer {
            Some(Self {
                src_index,
                dst_index,
            }) => (src_index, dst_index),
            None => (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
        }
    }
}

fn validate_scopes(
    src_stages: PipelineStages,
    src_access: AccessFlags,
    dst_stages: PipelineStages,
    dst_access: AccessFlags,
) -> Result<(), Box<ValidationError>> {
    if !src_access.is_compatible_with(src_stages) {
        return Err(ValidationError::new(
            "src_access",
            "contains one or more access types that are not performed by any stage in \
            `src_stages`",
        ));
    }

    if !dst_access.is_compatible_with(dst_stages) {
        return Err(ValidationError::new(
            "dst_access",
            "contains one or more access types that are not performed by any stage in \
            `dst_stages`",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buffer::BufferCreateInfo, image::ImageCreateInfo};
    use ash::vk::Handle;

    fn buffer() -> Buffer {
        Buffer::new(
            vk::Buffer::from_raw(1),
            &BufferCreateInfo {
                size: 256,
                usage: crate::buffer::BufferUsage::STORAGE_BUFFER,
                ..Default::default()
            },
        )
    }

    fn image() -> Image {
        Image::new(
            vk::Image::from_raw(2),
            &ImageCreateInfo {
                extent: [4, 4],
                usage: crate::image::ImageUsage::STORAGE,
                ..Default::default()
            },
        )
    }

    #[test]
    fn incompatible_access() {
        let barrier = BufferMemoryBarrier {
            src_stages: PipelineStages::COMPUTE_SHADER,
            src_access: AccessFlags::HOST_WRITE,
            dst_stages: PipelineStages::HOST,
            dst_access: AccessFlags::HOST_READ,
            ..BufferMemoryBarrier::buffer(buffer())
        };
        let err = barrier.validate().unwrap_err();
        assert_eq!(err.context, "src_access");

        let dependency_info = DependencyInfo {
            buffer_memory_barriers: [barrier].into_iter().collect(),
            ..Default::default()
        };
        let err = dependency_info.validate().unwrap_err();
        assert_eq!(err.context, "buffer_memory_barriers[0].src_access");
    }

    #[test]
    fn buffer_range_out_of_bounds() {
        let barrier = BufferMemoryBarrier {
            range: 128..512,
            ..BufferMemoryBarrier::buffer(buffer())
        };
        assert_eq!(barrier.validate().unwrap_err().context, "range.end");
    }

    #[test]
    fn image_new_layout_undefined() {
        let barrier = ImageMemoryBarrier::image(image());
        assert_eq!(barrier.validate().unwrap_err().context, "new_layout");

        let barrier = ImageMemoryBarrier {
            new_layout: ImageLayout::General,
            ..ImageMemoryBarrier::image(image())
        };
        assert!(barrier.validate().is_ok());
        assert!(barrier.is_layout_transition());
    }

    #[test]
    fn ownership_transfer() {
        let transfer = QueueFamilyOwnershipTransfer {
            src_index: 0,
            dst_index: vk::QUEUE_FAMILY_IGNORED,
        };
        assert_eq!(transfer.validate().unwrap_err().context, "dst_index");

        let transfer = QueueFamilyOwnershipTransfer {
            src_index: 1,
            dst_index: 1,
        };
        assert!(transfer.validate().is_err());

        let barrier = BufferMemoryBarrier {
            queue_family_ownership_transfer: Some(QueueFamilyOwnershipTransfer {
                src_index: 0,
                dst_index: 2,
            }),
            ..BufferMemoryBarrier::buffer(buffer())
        };
        let raw = barrier.to_vk();
        assert_eq!(raw.src_queue_family_index, 0);
        assert_eq!(raw.dst_queue_family_index, 2);

        let raw = BufferMemoryBarrier::buffer(buffer()).to_vk();
        assert_eq!(raw.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(raw.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(raw.size, 256);
    }

    #[test]
    fn raw_dependency_info() {
        let dependency_info = DependencyInfo {
            memory_barriers: [MemoryBarrier {
                src_stages: PipelineStages::COMPUTE_SHADER,
                src_access: AccessFlags::SHADER_WRITE,
                dst_stages: PipelineStages::HOST,
                dst_access: AccessFlags::HOST_READ,
                ..Default::default()
            }]
            .into_iter()
            .collect(),
            image_memory_barriers: [ImageMemoryBarrier {
                new_layout: ImageLayout::TransferSrcOptimal,
                ..ImageMemoryBarrier::image(image())
            }]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        assert!(dependency_info.validate().is_ok());
        assert_eq!(
            dependency_info.src_stages(),
            PipelineStages::COMPUTE_SHADER,
        );

        let fields1_vk = dependency_info.to_vk_fields1();
        let raw = dependency_info.to_vk(&fields1_vk);
        assert_eq!(raw.memory_barrier_count, 1);
        assert_eq!(raw.buffer_memory_barrier_count, 0);
        assert_eq!(raw.image_memory_barrier_count, 1);
        assert_eq!(
            fields1_vk.image_memory_barriers_vk[0].new_layout,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
    }
}
