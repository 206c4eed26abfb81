//! The device that scenarios run against.
//!
//! [`Device`] is the interface between the scenarios and the implementation under test. It
//! deals in raw `ash` handles, so that an implementation backed by a Vulkan driver can sit behind
//! it as well as the [`SoftDevice`] that this crate provides.
//!
//! [`SoftDevice`]: soft::SoftDevice

use crate::{
    buffer::BufferCreateInfo,
    command_buffer::CommandBuffer,
    image::ImageCreateInfo,
    macros::vulkan_bitflags,
    memory::MemoryPropertyFlags,
    shader::ComputeShader,
    sync::PipelineStages,
    DeviceSize, NonExhaustive,
};
use ash::vk;
use smallvec::SmallVec;
use std::{error::Error, fmt, sync::Arc, time::Duration};

pub mod soft;

vulkan_bitflags! {
    /// Attributes of a queue family.
    QueueFlags = QueueFlags(u32);

    /// Queues of this family can execute graphics operations.
    GRAPHICS = GRAPHICS,

    /// Queues of this family can execute compute operations.
    COMPUTE = COMPUTE,

    /// Queues of this family can execute transfer operations.
    TRANSFER = TRANSFER,
}

/// Properties of a queue family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueFamilyProperties {
    /// Attributes of the queue family.
    pub queue_flags: QueueFlags,

    /// The number of queues in the family.
    pub queue_count: u32,
}

/// A memory type of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryType {
    /// The properties of memory of this type.
    pub property_flags: MemoryPropertyFlags,
}

/// The memory requirements of a buffer or image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRequirements {
    /// The number of bytes of memory required.
    pub size: DeviceSize,

    /// Indicates which memory types can be used. Each bit that is set corresponds to the index
    /// of a memory type of the device.
    pub memory_type_bits: u32,
}

/// Identifies a queue of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Queue {
    /// The index of the queue family the queue belongs to.
    pub family_index: u32,

    /// The index of the queue within its family.
    pub index: u32,
}

/// A semaphore to wait on before a submission starts executing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemaphoreWait {
    /// The semaphore to wait on.
    pub semaphore: vk::Semaphore,

    /// The stages of the submission that must wait for the semaphore to be signaled. Writes
    /// that happened before the signal are made visible to these stages.
    pub stages: PipelineStages,
}

/// A batch of command buffers to submit to a queue.
#[derive(Clone, Debug)]
pub struct SubmitInfo {
    /// The semaphores to wait on before executing the command buffers.
    ///
    /// The default value is empty.
    pub wait_semaphores: SmallVec<[SemaphoreWait; 4]>,

    /// The command buffers to execute, in order.
    ///
    /// The default value is empty.
    pub command_buffers: SmallVec<[Arc<CommandBuffer>; 1]>,

    /// The semaphores to signal once the command buffers have completed.
    ///
    /// The default value is empty.
    pub signal_semaphores: SmallVec<[vk::Semaphore; 4]>,

    pub _ne: NonExhaustive,
}

impl Default for SubmitInfo {
    #[inline]
    fn default() -> Self {
        Self {
            wait_semaphores: SmallVec::new(),
            command_buffers: SmallVec::new(),
            signal_semaphores: SmallVec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

/// The operations of a device that the scenarios use.
///
/// Objects are identified by raw handles. Creating an object never initializes its contents:
/// memory holds undefined data until it is written.
pub trait Device: Send + Sync {
    /// Returns the queue families of the device.
    fn queue_family_properties(&self) -> &[QueueFamilyProperties];

    /// Returns the memory types of the device. Memory type indices index into this slice.
    fn memory_types(&self) -> &[MemoryType];

    fn create_buffer(&self, create_info: &BufferCreateInfo) -> Result<vk::Buffer, DeviceError>;

    fn buffer_memory_requirements(
        &self,
        buffer: vk::Buffer,
    ) -> Result<MemoryRequirements, DeviceError>;

    fn destroy_buffer(&self, buffer: vk::Buffer);

    fn create_image(&self, create_info: &ImageCreateInfo) -> Result<vk::Image, DeviceError>;

    fn image_memory_requirements(&self, image: vk::Image)
        -> Result<MemoryRequirements, DeviceError>;

    fn destroy_image(&self, image: vk::Image);

    /// Allocates `size` bytes of memory of the memory type at `memory_type_index`.
    fn allocate_memory(
        &self,
        size: DeviceSize,
        memory_type_index: u32,
    ) -> Result<vk::DeviceMemory, DeviceError>;

    /// Frees memory. Resources bound to the memory may no longer be used afterwards.
    fn free_memory(&self, memory: vk::DeviceMemory);

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
    ) -> Result<(), DeviceError>;

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory)
        -> Result<(), DeviceError>;

    /// Creates a shader module from a compute shader.
    fn create_shader_module(&self, shader: &ComputeShader)
        -> Result<vk::ShaderModule, DeviceError>;

    fn destroy_shader_module(&self, shader_module: vk::ShaderModule);

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, DeviceError>;

    fn destroy_fence(&self, fence: vk::Fence);

    fn create_semaphore(&self) -> Result<vk::Semaphore, DeviceError>;

    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_event(&self) -> Result<vk::Event, DeviceError>;

    fn destroy_event(&self, event: vk::Event);

    /// Submits batches of command buffers to a queue, and signals `fence` once all of them have
    /// completed.
    ///
    /// The call does not block. Everything the host did before the call happens before the
    /// submitted work.
    fn submit(
        &self,
        queue: Queue,
        submit_infos: &[SubmitInfo],
        fence: Option<vk::Fence>,
    ) -> Result<(), DeviceError>;

    /// Blocks until all of `fences` are signaled, or until `timeout` elapses.
    ///
    /// Returns [`DeviceError::Timeout`] if the timeout elapsed first.
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: Duration) -> Result<(), DeviceError>;

    /// Returns whether a fence is signaled, without blocking.
    fn fence_status(&self, fence: vk::Fence) -> Result<bool, DeviceError>;

    fn reset_fences(&self, fences: &[vk::Fence]) -> Result<(), DeviceError>;

    /// Sets an event from the host.
    fn set_event(&self, event: vk::Event) -> Result<(), DeviceError>;

    /// Unsets an event from the host.
    fn reset_event(&self, event: vk::Event) -> Result<(), DeviceError>;

    /// Returns whether an event is set, without blocking.
    fn event_status(&self, event: vk::Event) -> Result<bool, DeviceError>;

    /// Writes `data` to a host-visible buffer at `offset`, and flushes the write.
    fn write_buffer(
        &self,
        buffer: vk::Buffer,
        offset: DeviceSize,
        data: &[u8],
    ) -> Result<(), DeviceError>;

    /// Invalidates the host's view of a host-visible buffer, and reads `data.len()` bytes from
    /// `offset` into `data`.
    fn read_buffer(
        &self,
        buffer: vk::Buffer,
        offset: DeviceSize,
        data: &mut [u8],
    ) -> Result<(), DeviceError>;

    /// Blocks until all queues are idle.
    fn wait_idle(&self) -> Result<(), DeviceError>;
}

impl<'a> dyn Device + 'a {
    /// Returns the first queue whose family supports all of `flags`, skipping the queues in
    /// `exclude`.
    pub fn find_queue(&self, flags: QueueFlags, exclude: &[Queue]) -> Option<Queue> {
        self.queue_family_properties()
            .iter()
            .enumerate()
            .filter(|(_, properties)| properties.queue_flags.contains(flags))
            .flat_map(|(family_index, properties)| {
                (0..properties.queue_count).map(move |index| Queue {
                    family_index: family_index as u32,
                    index,
                })
            })
            .find(|queue| !exclude.contains(queue))
    }

    /// Returns the index of the first memory type allowed by `memory_type_bits` that has all of
    /// `required` properties.
    pub fn find_memory_type(
        &self,
        memory_type_bits: u32,
        required: MemoryPropertyFlags,
    ) -> Option<u32> {
        self.memory_types()
            .iter()
            .enumerate()
            .find(|&(index, memory_type)| {
                memory_type_bits & (1 << index) != 0
                    && memory_type.property_flags.contains(required)
            })
            .map(|(index, _)| index as u32)
    }
}

/// Error that can happen when calling a [`Device`] operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceError {
    /// There is not enough device memory left for the allocation.
    OutOfDeviceMemory,

    /// No memory type with the requested properties is available.
    MemoryTypeUnsupported,

    /// The memory of a buffer accessed from the host is not host-visible, or not bound.
    MemoryMapFailed,

    /// The device was lost. Any further use of the device fails.
    DeviceLost,

    /// The timeout of a wait elapsed before the wait completed.
    Timeout,

    /// A handle that was passed does not refer to a live object of the right type.
    InvalidHandle,

    /// The queue does not exist on the device.
    InvalidQueue(Queue),

    /// The arguments of the operation were not valid.
    InvalidArgument(&'static str),
}

impl Error for DeviceError {}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfDeviceMemory => write!(f, "no memory available on the device"),
            Self::MemoryTypeUnsupported => {
                write!(f, "no memory type with the requested properties is available")
            }
            Self::MemoryMapFailed => write!(f, "the memory could not be accessed from the host"),
            Self::DeviceLost => write!(f, "the connection to the device has been lost"),
            Self::Timeout => write!(f, "the timeout was reached before the wait completed"),
            Self::InvalidHandle => write!(f, "the handle does not refer to a live object"),
            Self::InvalidQueue(queue) => write!(
                f,
                "queue {} of queue family {} does not exist",
                queue.index, queue.family_index,
            ),
            Self::InvalidArgument(problem) => write!(f, "invalid argument: {}", problem),
        }
    }
}
