//! Recording of commands for execution on a queue.
//!
//! A [`RecordingCommandBuffer`] validates each command as it is recorded, against the queue
//! family the command buffer is for. [`end`] turns it into an immutable [`CommandBuffer`] that
//! can be submitted any number of times.
//!
//! [`end`]: RecordingCommandBuffer::end

use crate::{
    buffer::{Buffer, BufferUsage},
    device::QueueFlags,
    image::{Image, ImageLayout, ImageUsage},
    shader::{DescriptorType, ShaderModule},
    sync::{DependencyInfo, PipelineStages},
    DeviceSize, ValidationError,
};
use ash::vk;
use smallvec::SmallVec;
use std::mem::size_of;

/// A command buffer in the recording state.
#[derive(Debug)]
pub struct RecordingCommandBuffer {
    queue_family_index: u32,
    queue_flags: QueueFlags,
    commands: Vec<Command>,
}

impl RecordingCommandBuffer {
    /// Begins recording a command buffer for queues of the family at `queue_family_index`,
    /// which has the capabilities in `queue_flags`.
    #[inline]
    pub fn new(queue_family_index: u32, queue_flags: QueueFlags) -> Self {
        RecordingCommandBuffer {
            queue_family_index,
            queue_flags,
            commands: Vec::new(),
        }
    }

    /// Returns the queue family the command buffer is recorded for.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Dispatches `group_counts` workgroups of `shader_module`, with the resources of
    /// `descriptor_set` bound.
    pub fn dispatch(
        &mut self,
        shader_module: &ShaderModule,
        descriptor_set: &DescriptorSet,
        group_counts: [u32; 3],
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_dispatch(shader_module, descriptor_set, group_counts)?;

        self.commands.push(Command::Dispatch {
            shader_module: shader_module.clone(),
            descriptor_set: descriptor_set.clone(),
            group_counts,
        });

        Ok(self)
    }

    fn validate_dispatch(
        &self,
        shader_module: &ShaderModule,
        descriptor_set: &DescriptorSet,
        group_counts: [u32; 3],
    ) -> Result<(), Box<ValidationError>> {
        if !self.queue_flags.intersects(QueueFlags::COMPUTE) {
            return Err(ValidationError::new(
                "queue_family_index",
                "the queue family of the command buffer does not support compute operations",
            ));
        }

        if group_counts.contains(&0) {
            return Err(ValidationError::new("group_counts", "contains zero"));
        }

        for &(binding, types) in shader_module.shader().kernel.bindings() {
            let write = descriptor_set.binding(binding).ok_or_else(|| {
                ValidationError::new(
                    "descriptor_set",
                    format!(
                        "has no resource at binding {}, which `shader_module` uses",
                        binding,
                    ),
                )
            })?;

            if !types.contains(&write.descriptor_type()) {
                return Err(ValidationError::new(
                    "descriptor_set",
                    format!(
                        "the resource at binding {} is of type {:?}, which `shader_module` does \
                        not accept",
                        binding,
                        write.descriptor_type(),
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Copies `region` from `src` to `dst`.
    pub fn copy_buffer(
        &mut self,
        src: Buffer,
        dst: Buffer,
        region: BufferCopy,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_transfer_queue()?;

        if !src.usage().intersects(BufferUsage::TRANSFER_SRC) {
            return Err(ValidationError::new(
                "src",
                "was not created with the `BufferUsage::TRANSFER_SRC` usage",
            ));
        }

        if !dst.usage().intersects(BufferUsage::TRANSFER_DST) {
            return Err(ValidationError::new(
                "dst",
                "was not created with the `BufferUsage::TRANSFER_DST` usage",
            ));
        }

        region.validate(src, dst).map_err(|err| err.add_context("region"))?;

        self.commands.push(Command::CopyBuffer { src, dst, region });

        Ok(self)
    }

    /// Copies the tightly packed texels at the start of `src` into the whole of `dst`, which
    /// must be in `dst_layout`.
    pub fn copy_buffer_to_image(
        &mut self,
        src: Buffer,
        dst: Image,
        dst_layout: ImageLayout,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_transfer_queue()?;

        if !src.usage().intersects(BufferUsage::TRANSFER_SRC) {
            return Err(ValidationError::new(
                "src",
                "was not created with the `BufferUsage::TRANSFER_SRC` usage",
            ));
        }

        if !dst.usage().intersects(ImageUsage::TRANSFER_DST) {
            return Err(ValidationError::new(
                "dst",
                "was not created with the `ImageUsage::TRANSFER_DST` usage",
            ));
        }

        if !dst_layout.allows_transfer_dst() {
            return Err(ValidationError::new(
                "dst_layout",
                "is not `ImageLayout::TransferDstOptimal` or `ImageLayout::General`",
            ));
        }

        if src.len() < dst.texel_count() {
            return Err(ValidationError::new(
                "src",
                "is smaller than the texels of `dst`",
            ));
        }

        self.commands.push(Command::CopyBufferToImage {
            src,
            dst,
            dst_layout,
        });

        Ok(self)
    }

    /// Copies the whole of `src`, which must be in `src_layout`, into the start of `dst` as
    /// tightly packed texels.
    pub fn copy_image_to_buffer(
        &mut self,
        src: Image,
        src_layout: ImageLayout,
        dst: Buffer,
    ) -> Result<&mut Self, Box<ValidationError>> {
        self.validate_transfer_queue()?;

        if !src.usage().intersects(ImageUsage::TRANSFER_SRC) {
            return Err(ValidationError::new(
                "src",
                "was not created with the `ImageUsage::TRANSFER_SRC` usage",
            ));
        }

        if !src_layout.allows_transfer_src() {
            return Err(ValidationError::new(
                "src_layout",
                "is not `ImageLayout::TransferSrcOptimal` or `ImageLayout::General`",
            ));
        }

        if !dst.usage().intersects(BufferUsage::TRANSFER_DST) {
            return Err(ValidationError::new(
                "dst",
                "was not created with the `BufferUsage::TRANSFER_DST` usage",
            ));
        }

        if dst.len() < src.texel_count() {
            return Err(ValidationError::new(
                "dst",
                "is smaller than the texels of `src`",
            ));
        }

        self.commands.push(Command::CopyImageToBuffer {
            src,
            src_layout,
            dst,
        });

        Ok(self)
    }

    fn validate_transfer_queue(&self) -> Result<(), Box<ValidationError>> {
        // Queues that support graphics or compute implicitly support transfer operations.
        if !self
            .queue_flags
            .intersects(QueueFlags::TRANSFER | QueueFlags::COMPUTE | QueueFlags::GRAPHICS)
        {
            return Err(ValidationError::new(
                "queue_family_index",
                "the queue family of the command buffer does not support transfer operations",
            ));
        }

        Ok(())
    }

    /// Inserts a dependency between the commands recorded before and the commands recorded
    /// after, on the same queue.
    pub fn pipeline_barrier(
        &mut self,
        dependency_info: &DependencyInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        dependency_info
            .validate()
            .map_err(|err| err.add_context("dependency_info"))?;

        if dependency_info.is_empty() {
            return Ok(self);
        }

        self.commands.push(Command::PipelineBarrier(dependency_info.clone()));

        Ok(self)
    }

    /// Sets `event` once the commands recorded before have completed `stages`.
    pub fn set_event(
        &mut self,
        event: vk::Event,
        stages: PipelineStages,
    ) -> Result<&mut Self, Box<ValidationError>> {
        validate_event_stages(stages)?;

        self.commands.push(Command::SetEvent { event, stages });

        Ok(self)
    }

    /// Unsets `event` once the commands recorded before have completed `stages`.
    pub fn reset_event(
        &mut self,
        event: vk::Event,
        stages: PipelineStages,
    ) -> Result<&mut Self, Box<ValidationError>> {
        validate_event_stages(stages)?;

        self.commands.push(Command::ResetEvent { event, stages });

        Ok(self)
    }

    /// Waits until all of `events` are set, then inserts the dependency in `dependency_info`
    /// between the work that happened before each event was set and the commands recorded after.
    pub fn wait_events(
        &mut self,
        events: &[vk::Event],
        dependency_info: &DependencyInfo,
    ) -> Result<&mut Self, Box<ValidationError>> {
        if events.is_empty() {
            return Err(ValidationError::new("events", "is empty"));
        }

        dependency_info
            .validate()
            .map_err(|err| err.add_context("dependency_info"))?;

        self.commands.push(Command::WaitEvents {
            events: events.iter().copied().collect(),
            dependency_info: dependency_info.clone(),
        });

        Ok(self)
    }

    /// Ends recording.
    #[inline]
    pub fn end(self) -> CommandBuffer {
        CommandBuffer {
            queue_family_index: self.queue_family_index,
            commands: self.commands,
        }
    }
}

fn validate_event_stages(stages: PipelineStages) -> Result<(), Box<ValidationError>> {
    if stages.intersects(PipelineStages::HOST) {
        return Err(ValidationError::new(
            "stages",
            "contains `PipelineStages::HOST`",
        ));
    }

    Ok(())
}

/// A command buffer that has finished recording.
#[derive(Debug)]
pub struct CommandBuffer {
    queue_family_index: u32,
    commands: Vec<Command>,
}

impl CommandBuffer {
    /// Returns the queue family the command buffer was recorded for.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Returns the recorded commands, in order.
    #[inline]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

/// A recorded command.
#[derive(Clone, Debug)]
pub enum Command {
    Dispatch {
        shader_module: ShaderModule,
        descriptor_set: DescriptorSet,
        group_counts: [u32; 3],
    },
    CopyBuffer {
        src: Buffer,
        dst: Buffer,
        region: BufferCopy,
    },
    CopyBufferToImage {
        src: Buffer,
        dst: Image,
        dst_layout: ImageLayout,
    },
    CopyImageToBuffer {
        src: Image,
        src_layout: ImageLayout,
        dst: Buffer,
    },
    PipelineBarrier(DependencyInfo),
    SetEvent {
        event: vk::Event,
        stages: PipelineStages,
    },
    ResetEvent {
        event: vk::Event,
        stages: PipelineStages,
    },
    WaitEvents {
        events: SmallVec<[vk::Event; 2]>,
        dependency_info: DependencyInfo,
    },
}

/// A region of data to copy between buffers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferCopy {
    /// The offset in bytes from the start of the source buffer.
    pub src_offset: DeviceSize,

    /// The offset in bytes from the start of the destination buffer.
    pub dst_offset: DeviceSize,

    /// The number of bytes to copy.
    pub size: DeviceSize,
}

impl BufferCopy {
    /// Returns a region covering the whole of `buffer`.
    #[inline]
    pub fn whole(buffer: Buffer) -> Self {
        BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: buffer.size(),
        }
    }

    fn validate(&self, src: Buffer, dst: Buffer) -> Result<(), Box<ValidationError>> {
        let word = size_of::<u32>() as DeviceSize;

        if self.size == 0 {
            return Err(ValidationError::new("size", "is zero"));
        }

        if self.src_offset % word != 0 || self.dst_offset % word != 0 || self.size % word != 0 {
            return Err(ValidationError::new(
                "size",
                "the offsets and size are not multiples of the word size",
            ));
        }

        if self.src_offset + self.size > src.size() {
            return Err(ValidationError::new(
                "src_offset",
                "the region is out of bounds of `src`",
            ));
        }

        if self.dst_offset + self.size > dst.size() {
            return Err(ValidationError::new(
                "dst_offset",
                "the region is out of bounds of `dst`",
            ));
        }

        if src == dst
            && self.src_offset < self.dst_offset + self.size
            && self.dst_offset < self.src_offset + self.size
        {
            return Err(ValidationError::new(
                "dst_offset",
                "the source and destination regions overlap",
            ));
        }

        Ok(())
    }
}

/// The resources bound to the bindings of a shader for a dispatch.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSet {
    writes: SmallVec<[WriteDescriptorSet; 4]>,
}

impl DescriptorSet {
    /// Creates a descriptor set from `writes`, each of which binds one resource.
    pub fn new(
        writes: impl IntoIterator<Item = WriteDescriptorSet>,
    ) -> Result<Self, Box<ValidationError>> {
        let writes: SmallVec<[WriteDescriptorSet; 4]> = writes.into_iter().collect();

        for (index, write) in writes.iter().enumerate() {
            if writes[..index]
                .iter()
                .any(|other| other.binding == write.binding)
            {
                return Err(ValidationError::new(
                    format!("writes[{}].binding", index),
                    "is bound more than once",
                ));
            }

            write
                .validate()
                .map_err(|err| err.add_context(format!("writes[{}]", index)))?;
        }

        Ok(DescriptorSet { writes })
    }

    /// Returns the resource bound at `binding`.
    #[inline]
    pub fn binding(&self, binding: u32) -> Option<&WriteDescriptorSet> {
        self.writes.iter().find(|write| write.binding == binding)
    }

    /// Returns every bound resource.
    #[inline]
    pub fn writes(&self) -> &[WriteDescriptorSet] {
        &self.writes
    }
}

/// A resource bound to one binding of a descriptor set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteDescriptorSet {
    binding: u32,
    resource: DescriptorResource,
}

impl WriteDescriptorSet {
    /// Binds the whole of `buffer` as a uniform buffer.
    #[inline]
    pub fn uniform_buffer(binding: u32, buffer: Buffer) -> Self {
        WriteDescriptorSet {
            binding,
            resource: DescriptorResource::UniformBuffer(buffer),
        }
    }

    /// Binds the whole of `buffer` as a storage buffer.
    #[inline]
    pub fn storage_buffer(binding: u32, buffer: Buffer) -> Self {
        WriteDescriptorSet {
            binding,
            resource: DescriptorResource::StorageBuffer(buffer),
        }
    }

    /// Binds `image` as a storage image, which will be in `layout` when the dispatch executes.
    #[inline]
    pub fn storage_image(binding: u32, image: Image, layout: ImageLayout) -> Self {
        WriteDescriptorSet {
            binding,
            resource: DescriptorResource::StorageImage(image, layout),
        }
    }

    /// Returns the binding number.
    #[inline]
    pub fn binding_index(&self) -> u32 {
        self.binding
    }

    /// Returns the bound resource.
    #[inline]
    pub fn resource(&self) -> &DescriptorResource {
        &self.resource
    }

    /// Returns the type of the descriptor.
    #[inline]
    pub fn descriptor_type(&self) -> DescriptorType {
        match self.resource {
            DescriptorResource::UniformBuffer(_) => DescriptorType::UniformBuffer,
            DescriptorResource::StorageBuffer(_) => DescriptorType::StorageBuffer,
            DescriptorResource::StorageImage(..) => DescriptorType::StorageImage,
        }
    }

    fn validate(&self) -> Result<(), Box<ValidationError>> {
        match self.resource {
            DescriptorResource::UniformBuffer(buffer) => {
                if !buffer.usage().intersects(BufferUsage::UNIFORM_BUFFER) {
                    return Err(ValidationError::new(
                        "resource",
                        "the buffer was not created with the `BufferUsage::UNIFORM_BUFFER` usage",
                    ));
                }
            }
            DescriptorResource::StorageBuffer(buffer) => {
                if !buffer.usage().intersects(BufferUsage::STORAGE_BUFFER) {
                    return Err(ValidationError::new(
                        "resource",
                        "the buffer was not created with the `BufferUsage::STORAGE_BUFFER` usage",
                    ));
                }
            }
            DescriptorResource::StorageImage(image, layout) => {
                if !image.usage().intersects(ImageUsage::STORAGE) {
                    return Err(ValidationError::new(
                        "resource",
                        "the image was not created with the `ImageUsage::STORAGE` usage",
                    ));
                }

                if !layout.allows_storage_read() {
                    return Err(ValidationError::new(
                        "resource",
                        "the layout is not `ImageLayout::General` or \
                        `ImageLayout::ShaderReadOnlyOptimal`",
                    ));
                }
            }
        }

        Ok(())
    }
}

/// A resource that can be bound in a descriptor set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorResource {
    UniformBuffer(Buffer),
    StorageBuffer(Buffer),
    StorageImage(Image, ImageLayout),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::BufferCreateInfo,
        image::ImageCreateInfo,
        shader::{templates, ShaderModule},
        sync::{AccessFlags, MemoryBarrier},
    };
    use ash::vk::Handle;
    use std::sync::Arc;

    fn buffer(handle: u64, usage: BufferUsage) -> Buffer {
        Buffer::new(
            vk::Buffer::from_raw(handle),
            &BufferCreateInfo {
                size: 1024,
                usage,
                ..Default::default()
            },
        )
    }

    fn storage_image() -> Image {
        Image::new(
            vk::Image::from_raw(9),
            &ImageCreateInfo {
                extent: [8, 8],
                usage: ImageUsage::STORAGE | ImageUsage::TRANSFER_SRC,
                ..Default::default()
            },
        )
    }

    #[test]
    fn dispatch_checks_bindings() {
        let module = ShaderModule::new(
            vk::ShaderModule::from_raw(1),
            Arc::new(templates::buffer_invert(
                templates::InvertSource::StorageBuffer,
                256,
                [1, 1, 1],
            )),
        );
        let input = buffer(2, BufferUsage::STORAGE_BUFFER);
        let output = buffer(3, BufferUsage::STORAGE_BUFFER);

        let mut cb = RecordingCommandBuffer::new(0, QueueFlags::COMPUTE);

        let partial = DescriptorSet::new([WriteDescriptorSet::storage_buffer(0, input)]).unwrap();
        let err = cb.dispatch(&module, &partial, [1, 1, 1]).unwrap_err();
        assert_eq!(err.context, "descriptor_set");

        let set = DescriptorSet::new([
            WriteDescriptorSet::storage_buffer(0, input),
            WriteDescriptorSet::storage_buffer(1, output),
        ])
        .unwrap();
        assert!(cb.dispatch(&module, &set, [0, 1, 1]).is_err());
        cb.dispatch(&module, &set, [1, 1, 1]).unwrap();

        let cb = cb.end();
        assert_eq!(cb.commands().len(), 1);
    }

    #[test]
    fn dispatch_requires_compute_queue() {
        let module = ShaderModule::new(
            vk::ShaderModule::from_raw(1),
            Arc::new(templates::empty()),
        );
        let mut cb = RecordingCommandBuffer::new(3, QueueFlags::TRANSFER);

        let err = cb
            .dispatch(&module, &DescriptorSet::default(), [1, 1, 1])
            .unwrap_err();
        assert_eq!(err.context, "queue_family_index");
    }

    #[test]
    fn descriptor_set_validation() {
        let uniform = buffer(4, BufferUsage::UNIFORM_BUFFER);

        let err = DescriptorSet::new([WriteDescriptorSet::storage_buffer(0, uniform)]).unwrap_err();
        assert_eq!(err.context, "writes[0].resource");

        let err = DescriptorSet::new([
            WriteDescriptorSet::uniform_buffer(0, uniform),
            WriteDescriptorSet::uniform_buffer(0, uniform),
        ])
        .unwrap_err();
        assert_eq!(err.context, "writes[1].binding");

        let err = DescriptorSet::new([WriteDescriptorSet::storage_image(
            0,
            storage_image(),
            ImageLayout::TransferDstOptimal,
        )])
        .unwrap_err();
        assert_eq!(err.context, "writes[0].resource");
    }

    #[test]
    fn copy_validation() {
        let src = buffer(5, BufferUsage::TRANSFER_SRC);
        let dst = buffer(6, BufferUsage::TRANSFER_DST);
        let mut cb = RecordingCommandBuffer::new(2, QueueFlags::TRANSFER);

        cb.copy_buffer(src, dst, BufferCopy::whole(src)).unwrap();

        let err = cb.copy_buffer(dst, src, BufferCopy::whole(src)).unwrap_err();
        assert_eq!(err.context, "src");

        let region = BufferCopy {
            src_offset: 512,
            dst_offset: 0,
            size: 1024,
        };
        let err = cb.copy_buffer(src, dst, region).unwrap_err();
        assert_eq!(err.context, "region.src_offset");

        let err = cb
            .copy_image_to_buffer(storage_image(), ImageLayout::ShaderReadOnlyOptimal, dst)
            .unwrap_err();
        assert_eq!(err.context, "src_layout");

        cb.copy_image_to_buffer(storage_image(), ImageLayout::General, dst)
            .unwrap();
        assert_eq!(cb.end().commands().len(), 2);
    }

    #[test]
    fn empty_barriers_are_skipped() {
        let mut cb = RecordingCommandBuffer::new(0, QueueFlags::COMPUTE);

        cb.pipeline_barrier(&DependencyInfo::default()).unwrap();
        cb.pipeline_barrier(&DependencyInfo {
            memory_barriers: [MemoryBarrier {
                src_stages: PipelineStages::COMPUTE_SHADER,
                src_access: AccessFlags::SHADER_WRITE,
                dst_stages: PipelineStages::COMPUTE_SHADER,
                dst_access: AccessFlags::SHADER_READ,
                ..Default::default()
            }]
            .into_iter()
            .collect(),
            ..Default::default()
        })
        .unwrap();

        assert!(cb
            .set_event(vk::Event::from_raw(1), PipelineStages::HOST)
            .is_err());
        assert!(cb.wait_events(&[], &DependencyInfo::default()).is_err());
        assert_eq!(cb.end().commands().len(), 1);
    }
}
