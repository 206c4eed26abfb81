//! A software implementation of [`Device`] with a strict memory model.
//!
//! The [`SoftDevice`] executes command buffers on the host, but it does not let memory accesses
//! see each other for free. Every write is tracked until it is superseded, and a read only sees
//! the value of a write if a chain of dependencies ordered the write before the read and made it
//! available and visible to the reading stage and access type. Words that are read without such
//! a chain read as [`UNDEFINED_PATTERN`], and images that are accessed in the wrong layout, or
//! resources that change queue family without an ownership transfer, lose their contents.
//!
//! Work does not start executing in the order it is submitted either. Submissions are executed
//! eagerly whenever their semaphores and events allow it, and with [`Scheduling::Adversarial`],
//! queues and the workgroups and invocations of dispatches run in reverse order.
//!
//! [`SoftFaults`] make the device skip parts of the synchronization model on purpose, which
//! shows that the scenarios detect a device that does so.
//!
//! [`UNDEFINED_PATTERN`]: crate::UNDEFINED_PATTERN

use self::{
    exec::Submission,
    state::{Accessor, Agent, Resource, ResourceKey, Token},
};
use super::{
    Device, DeviceError, MemoryRequirements, MemoryType, Queue, QueueFamilyProperties,
    QueueFlags, SubmitInfo,
};
use crate::{
    buffer::BufferCreateInfo,
    image::ImageCreateInfo,
    memory::MemoryPropertyFlags,
    shader::ComputeShader,
    sync::PipelineStages,
    DeviceSize, NonExhaustive, ValidationError,
};
use ash::vk::{self, Handle};
use foldhash::HashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, trace};

mod exec;
mod kernel;
mod state;

const WORD_SIZE: DeviceSize = size_of::<u32>() as DeviceSize;

/// A device that executes everything on the host, and checks that the work it is given is
/// correctly synchronized.
pub struct SoftDevice {
    queue_families: Vec<QueueFamilyProperties>,
    memory_types: Vec<MemoryType>,
    state: Mutex<State>,
    // Notified whenever a fence or event changes state.
    changed: Condvar,
}

impl SoftDevice {
    /// Creates a new `SoftDevice`.
    pub fn new(create_info: SoftDeviceCreateInfo) -> Result<Self, Box<ValidationError>> {
        create_info
            .validate()
            .map_err(|err| err.add_context("create_info"))?;

        let SoftDeviceCreateInfo {
            queue_families,
            memory_types,
            heap_size,
            scheduling,
            faults,
            _ne: _,
        } = create_info;

        let queues = queue_families
            .iter()
            .enumerate()
            .flat_map(|(family_index, properties)| {
                (0..properties.queue_count).map(move |index| Queue {
                    family_index: family_index as u32,
                    index,
                })
            })
            .map(|queue| QueueState {
                queue,
                pending: VecDeque::new(),
            })
            .collect();

        debug!(
            ?queue_families,
            ?memory_types,
            heap_size,
            ?scheduling,
            ?faults,
            "created software device",
        );

        Ok(SoftDevice {
            memory_types: memory_types
                .into_iter()
                .map(|property_flags| MemoryType { property_flags })
                .collect(),
            queue_families,
            state: Mutex::new(State {
                next_handle: 1,
                next_write: 1,
                next_command: 1,
                heap_size,
                heap_used: 0,
                memories: HashMap::default(),
                resources: HashMap::default(),
                shader_modules: HashMap::default(),
                fences: HashMap::default(),
                semaphores: HashMap::default(),
                events: HashMap::default(),
                queues,
                submissions: 0,
                lost: false,
                scheduling,
                faults,
            }),
            changed: Condvar::new(),
        })
    }

    /// Returns the number of objects of any kind that are currently alive on the device.
    pub fn live_object_count(&self) -> usize {
        let state = self.state.lock();

        state.memories.len()
            + state.resources.len()
            + state.shader_modules.len()
            + state.fences.len()
            + state.semaphores.len()
            + state.events.len()
    }

    /// Returns whether the device has been lost.
    pub fn is_lost(&self) -> bool {
        self.state.lock().lost
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, DeviceError> {
        let state = self.state.lock();

        if state.lost {
            return Err(DeviceError::DeviceLost);
        }

        Ok(state)
    }

    fn memory_requirements(
        &self,
        key: ResourceKey,
    ) -> Result<MemoryRequirements, DeviceError> {
        let state = self.lock()?;
        let resource = state.resources.get(&key).ok_or(DeviceError::InvalidHandle)?;

        Ok(MemoryRequirements {
            size: resource.contents.len() as DeviceSize * WORD_SIZE,
            memory_type_bits: ((1u64 << self.memory_types.len()) - 1) as u32,
        })
    }

    fn bind_memory(&self, key: ResourceKey, memory: vk::DeviceMemory) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        let memory = memory.as_raw();
        let allocation = state.memories.get(&memory).ok_or(DeviceError::InvalidHandle)?;
        let (size, host_visible) = (
            allocation.size,
            self.memory_types[allocation.memory_type_index as usize]
                .property_flags
                .contains(MemoryPropertyFlags::HOST_VISIBLE),
        );

        let resource = state.resources.get_mut(&key).ok_or(DeviceError::InvalidHandle)?;

        if resource.memory.is_some() {
            return Err(DeviceError::InvalidArgument("the resource is already bound to memory"));
        }

        if size < resource.contents.len() as DeviceSize * WORD_SIZE {
            return Err(DeviceError::InvalidArgument("the memory is too small for the resource"));
        }

        resource.memory = Some(memory);
        resource.host_visible = host_visible;

        Ok(())
    }

    fn destroy(&self, key: ResourceKey) {
        if self.state.lock().resources.remove(&key).is_none() {
            debug!(?key, "destroyed a resource that does not exist");
        }
    }

    /// Returns the host-visible buffer and the range of words that a host access refers to.
    fn host_access<'a>(
        state: &'a mut State,
        buffer: vk::Buffer,
        offset: DeviceSize,
        len: usize,
    ) -> Result<(&'a mut Resource, std::ops::Range<usize>), DeviceError> {
        let resource = state
            .resources
            .get_mut(&ResourceKey::Buffer(buffer.as_raw()))
            .ok_or(DeviceError::InvalidHandle)?;

        if resource.memory.is_none() || !resource.host_visible {
            return Err(DeviceError::MemoryMapFailed);
        }

        if offset % WORD_SIZE != 0 || len as DeviceSize % WORD_SIZE != 0 {
            return Err(DeviceError::InvalidArgument(
                "the offset and length must be multiples of the word size",
            ));
        }

        let start = (offset / WORD_SIZE) as usize;
        let end = start + len / WORD_SIZE as usize;

        if end > resource.contents.len() {
            return Err(DeviceError::InvalidArgument("the range is out of bounds of the buffer"));
        }

        Ok((resource, start..end))
    }
}

impl Device for SoftDevice {
    #[inline]
    fn queue_family_properties(&self) -> &[QueueFamilyProperties] {
        &self.queue_families
    }

    #[inline]
    fn memory_types(&self) -> &[MemoryType] {
        &self.memory_types
    }

    fn create_buffer(&self, create_info: &BufferCreateInfo) -> Result<vk::Buffer, DeviceError> {
        create_info
            .validate()
            .map_err(|_| DeviceError::InvalidArgument("the buffer create info is not valid"))?;

        let mut state = self.lock()?;
        let handle = state.next_handle();
        let len = (create_info.size / WORD_SIZE) as usize;
        state
            .resources
            .insert(ResourceKey::Buffer(handle), Resource::buffer(len));

        Ok(vk::Buffer::from_raw(handle))
    }

    fn buffer_memory_requirements(
        &self,
        buffer: vk::Buffer,
    ) -> Result<MemoryRequirements, DeviceError> {
        self.memory_requirements(ResourceKey::Buffer(buffer.as_raw()))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.destroy(ResourceKey::Buffer(buffer.as_raw()));
    }

    fn create_image(&self, create_info: &ImageCreateInfo) -> Result<vk::Image, DeviceError> {
        create_info
            .validate()
            .map_err(|_| DeviceError::InvalidArgument("the image create info is not valid"))?;

        let mut state = self.lock()?;
        let handle = state.next_handle();
        state
            .resources
            .insert(ResourceKey::Image(handle), Resource::image(create_info.extent));

        Ok(vk::Image::from_raw(handle))
    }

    fn image_memory_requirements(
        &self,
        image: vk::Image,
    ) -> Result<MemoryRequirements, DeviceError> {
        self.memory_requirements(ResourceKey::Image(image.as_raw()))
    }

    fn destroy_image(&self, image: vk::Image) {
        self.destroy(ResourceKey::Image(image.as_raw()));
    }

    fn allocate_memory(
        &self,
        size: DeviceSize,
        memory_type_index: u32,
    ) -> Result<vk::DeviceMemory, DeviceError> {
        if memory_type_index as usize >= self.memory_types.len() {
            return Err(DeviceError::MemoryTypeUnsupported);
        }

        if size == 0 {
            return Err(DeviceError::InvalidArgument("the allocation size is zero"));
        }

        let mut state = self.lock()?;

        if state.heap_size - state.heap_used < size {
            debug!(size, heap_used = state.heap_used, "out of device memory");
            return Err(DeviceError::OutOfDeviceMemory);
        }

        state.heap_used += size;
        let handle = state.next_handle();
        state.memories.insert(
            handle,
            Allocation {
                size,
                memory_type_index,
            },
        );

        Ok(vk::DeviceMemory::from_raw(handle))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock();
        let memory = memory.as_raw();

        if let Some(allocation) = state.memories.remove(&memory) {
            state.heap_used -= allocation.size;

            for resource in state.resources.values_mut() {
                if resource.memory == Some(memory) {
                    resource.memory = None;
                }
            }
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
    ) -> Result<(), DeviceError> {
        self.bind_memory(ResourceKey::Buffer(buffer.as_raw()), memory)
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
    ) -> Result<(), DeviceError> {
        self.bind_memory(ResourceKey::Image(image.as_raw()), memory)
    }

    fn create_shader_module(
        &self,
        shader: &ComputeShader,
    ) -> Result<vk::ShaderModule, DeviceError> {
        if shader.local_size.contains(&0) {
            return Err(DeviceError::InvalidArgument("the local size has a zero dimension"));
        }

        let mut state = self.lock()?;
        let handle = state.next_handle();
        state.shader_modules.insert(handle, Arc::new(shader.clone()));
        trace!(name = %shader.name, "created shader module");

        Ok(vk::ShaderModule::from_raw(handle))
    }

    fn destroy_shader_module(&self, shader_module: vk::ShaderModule) {
        self.state.lock().shader_modules.remove(&shader_module.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, DeviceError> {
        let mut state = self.lock()?;
        let handle = state.next_handle();
        state.fences.insert(
            handle,
            Signal {
                signaled,
                token: Token::default(),
            },
        );

        Ok(vk::Fence::from_raw(handle))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state.lock().fences.remove(&fence.as_raw());
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, DeviceError> {
        let mut state = self.lock()?;
        let handle = state.next_handle();
        state.semaphores.insert(handle, Signal::default());

        Ok(vk::Semaphore::from_raw(handle))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().semaphores.remove(&semaphore.as_raw());
    }

    fn create_event(&self) -> Result<vk::Event, DeviceError> {
        let mut state = self.lock()?;
        let handle = state.next_handle();
        state.events.insert(handle, Signal::default());

        Ok(vk::Event::from_raw(handle))
    }

    fn destroy_event(&self, event: vk::Event) {
        self.state.lock().events.remove(&event.as_raw());
    }

    fn submit(
        &self,
        queue: Queue,
        submit_infos: &[SubmitInfo],
        fence: Option<vk::Fence>,
    ) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        let queue_index = state
            .queues
            .iter()
            .position(|queue_state| queue_state.queue == queue)
            .ok_or(DeviceError::InvalidQueue(queue))?;

        state.validate_submit(queue, submit_infos, fence)?;

        state.submissions += 1;

        if let Some(max) = state.faults.lose_device_after_submissions {
            if state.submissions > max {
                state.lost = true;
                error!(submissions = state.submissions, "the device was lost");
                self.changed.notify_all();

                return Err(DeviceError::DeviceLost);
            }
        }

        // Everything the host did so far happens before the submitted work.
        let agent = Agent::Queue(queue_index);
        let stages = PipelineStages::ALL_COMMANDS.expand() | PipelineStages::HOST;
        state.for_each_write(|write| {
            if write.reached(Agent::Host) {
                write.order_before(agent, stages);
            }
        });

        let mut submissions: VecDeque<_> = submit_infos.iter().map(Submission::new).collect();

        if let Some(fence) = fence {
            match submissions.back_mut() {
                Some(submission) => submission.fence = Some(fence),
                None => submissions.push_back(Submission::fence_only(fence)),
            }
        }

        trace!(?queue, count = submissions.len(), "submitted work");
        state.queues[queue_index].pending.extend(submissions);
        state.advance();
        self.changed.notify_all();

        Ok(())
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: Duration) -> Result<(), DeviceError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock()?;

        loop {
            if state.lost {
                return Err(DeviceError::DeviceLost);
            }

            let mut all_signaled = true;

            for fence in fences {
                let fence = state
                    .fences
                    .get(&fence.as_raw())
                    .ok_or(DeviceError::InvalidHandle)?;
                all_signaled &= fence.signaled;
            }

            if all_signaled {
                for fence in fences {
                    state.observe_fence(fence.as_raw());
                }

                return Ok(());
            }

            if self.changed.wait_until(&mut state, deadline).timed_out() {
                debug!(?fences, ?timeout, "timed out waiting for fences");
                return Err(DeviceError::Timeout);
            }
        }
    }

    fn fence_status(&self, fence: vk::Fence) -> Result<bool, DeviceError> {
        let mut state = self.lock()?;
        let signaled = state
            .fences
            .get(&fence.as_raw())
            .ok_or(DeviceError::InvalidHandle)?
            .signaled;

        if signaled {
            state.observe_fence(fence.as_raw());
        }

        Ok(signaled)
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> Result<(), DeviceError> {
        let mut state = self.lock()?;

        for fence in fences {
            let fence = state
                .fences
                .get_mut(&fence.as_raw())
                .ok_or(DeviceError::InvalidHandle)?;
            *fence = Signal::default();
        }

        Ok(())
    }

    fn set_event(&self, event: vk::Event) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        let token = state.token(|write| write.reached(Agent::Host));
        let event = state
            .events
            .get_mut(&event.as_raw())
            .ok_or(DeviceError::InvalidHandle)?;
        *event = Signal {
            signaled: true,
            token,
        };

        state.advance();
        self.changed.notify_all();

        Ok(())
    }

    fn reset_event(&self, event: vk::Event) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        let event = state
            .events
            .get_mut(&event.as_raw())
            .ok_or(DeviceError::InvalidHandle)?;
        *event = Signal::default();

        Ok(())
    }

    fn event_status(&self, event: vk::Event) -> Result<bool, DeviceError> {
        let mut state = self.lock()?;
        let event = state
            .events
            .get(&event.as_raw())
            .ok_or(DeviceError::InvalidHandle)?;

        if !event.signaled {
            return Ok(false);
        }

        let token = event.token.clone();
        state.order_token_before_host(&token);

        Ok(true)
    }

    fn write_buffer(
        &self,
        buffer: vk::Buffer,
        offset: DeviceSize,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        let id = state.next_write();
        let (resource, range) = Self::host_access(&mut state, buffer, offset, data.len())?;

        let words: Vec<u32> = data
            .chunks_exact(size_of::<u32>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        resource
            .contents
            .write(id, range.start, &words, &Accessor::HOST_WRITE);

        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: vk::Buffer,
        offset: DeviceSize,
        data: &mut [u8],
    ) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        let (resource, range) = Self::host_access(&mut state, buffer, offset, data.len())?;

        let (words, undefined) = resource.contents.read(range, &Accessor::HOST_READ);

        if undefined != 0 {
            debug!(?buffer, undefined, "host read of unsynchronized words");
        }

        data.copy_from_slice(bytemuck::cast_slice(&words));

        Ok(())
    }

    fn wait_idle(&self) -> Result<(), DeviceError> {
        let mut state = self.lock()?;
        state.advance();
        let result = state.discard_blocked();

        // Everything that executed happens before the host continues.
        state.for_each_write(|write| write.order_before(Agent::Host, PipelineStages::HOST));
        self.changed.notify_all();

        result
    }
}

/// Parameters to create a new [`SoftDevice`].
#[derive(Clone, Debug)]
pub struct SoftDeviceCreateInfo {
    /// The queue families of the device.
    ///
    /// The default value is a family with graphics, compute and transfer support and 2 queues, a
    /// compute-only family with 1 queue, and a transfer-only family with 1 queue.
    pub queue_families: Vec<QueueFamilyProperties>,

    /// The properties of the memory types of the device, in order of their index.
    ///
    /// The default value is a device-local type, a host-visible and host-coherent type, and a
    /// type with all three properties.
    pub memory_types: Vec<MemoryPropertyFlags>,

    /// The number of bytes of memory that can be allocated at once, across all memory types.
    ///
    /// The default value is 256 MiB.
    pub heap_size: DeviceSize,

    /// The order in which independent work is executed.
    ///
    /// The default value is [`Scheduling::InOrder`].
    pub scheduling: Scheduling,

    /// Parts of the synchronization model that the device ignores.
    ///
    /// The default value is no faults.
    pub faults: SoftFaults,

    pub _ne: NonExhaustive,
}

impl Default for SoftDeviceCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            queue_families: vec![
                QueueFamilyProperties {
                    queue_flags: QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
                    queue_count: 2,
                },
                QueueFamilyProperties {
                    queue_flags: QueueFlags::COMPUTE,
                    queue_count: 1,
                },
                QueueFamilyProperties {
                    queue_flags: QueueFlags::TRANSFER,
                    queue_count: 1,
                },
            ],
            memory_types: vec![
                MemoryPropertyFlags::DEVICE_LOCAL,
                MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
                MemoryPropertyFlags::DEVICE_LOCAL
                    | MemoryPropertyFlags::HOST_VISIBLE
                    | MemoryPropertyFlags::HOST_COHERENT,
            ],
            heap_size: 256 * 1024 * 1024,
            scheduling: Scheduling::InOrder,
            faults: SoftFaults::default(),
            _ne: NonExhaustive(()),
        }
    }
}

impl SoftDeviceCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.queue_families.is_empty() {
            return Err(ValidationError::new("queue_families", "is empty"));
        }

        for (index, properties) in self.queue_families.iter().enumerate() {
            if properties.queue_count == 0 {
                return Err(ValidationError::new(
                    format!("queue_families[{}].queue_count", index),
                    "is zero",
                ));
            }

            if properties.queue_flags.is_empty() {
                return Err(ValidationError::new(
                    format!("queue_families[{}].queue_flags", index),
                    "is empty",
                ));
            }
        }

        if self.memory_types.is_empty() {
            return Err(ValidationError::new("memory_types", "is empty"));
        }

        if self.memory_types.len() > 32 {
            return Err(ValidationError::new(
                "memory_types",
                "has more than 32 elements",
            ));
        }

        if self.heap_size == 0 {
            return Err(ValidationError::new("heap_size", "is zero"));
        }

        Ok(())
    }
}

/// The order in which a [`SoftDevice`] executes work that is not ordered by dependencies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Scheduling {
    /// Queues are serviced in order of their index, and workgroups and invocations execute in
    /// order of their ID.
    #[default]
    InOrder,

    /// Queues are serviced in reverse order of their index, and workgroups and invocations
    /// execute in reverse order of their ID.
    Adversarial,
}

/// Parts of the synchronization model that a [`SoftDevice`] ignores.
///
/// A device with faults shows that the scenarios detect the corresponding driver bugs.
#[derive(Clone, Debug)]
pub struct SoftFaults {
    /// Pipeline barriers have no effect.
    ///
    /// The default value is `false`.
    pub ignore_pipeline_barriers: bool,

    /// Submissions do not wait for their semaphores, and the waits have no memory effects.
    ///
    /// The default value is `false`.
    pub ignore_semaphore_waits: bool,

    /// Image memory barriers do not change the layout of images.
    ///
    /// The default value is `false`.
    pub ignore_layout_transitions: bool,

    /// The device is lost when more than this many submissions have been made.
    ///
    /// The default value is `None`.
    pub lose_device_after_submissions: Option<u32>,

    pub _ne: NonExhaustive,
}

impl Default for SoftFaults {
    #[inline]
    fn default() -> Self {
        Self {
            ignore_pipeline_barriers: false,
            ignore_semaphore_waits: false,
            ignore_layout_transitions: false,
            lose_device_after_submissions: None,
            _ne: NonExhaustive(()),
        }
    }
}

struct State {
    next_handle: u64,
    next_write: u64,
    next_command: u64,
    heap_size: DeviceSize,
    heap_used: DeviceSize,
    memories: HashMap<u64, Allocation>,
    resources: HashMap<ResourceKey, Resource>,
    shader_modules: HashMap<u64, Arc<ComputeShader>>,
    fences: HashMap<u64, Signal>,
    semaphores: HashMap<u64, Signal>,
    events: HashMap<u64, Signal>,
    queues: Vec<QueueState>,
    submissions: u32,
    lost: bool,
    scheduling: Scheduling,
    faults: SoftFaults,
}

struct Allocation {
    size: DeviceSize,
    memory_type_index: u32,
}

/// The state of a fence, semaphore or event, with the writes that happened before it was
/// signaled.
#[derive(Debug, Default)]
struct Signal {
    signaled: bool,
    token: Token,
}

struct QueueState {
    queue: Queue,
    pending: VecDeque<Submission>,
}

impl State {
    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;

        handle
    }

    fn next_write(&mut self) -> u64 {
        let id = self.next_write;
        self.next_write += 1;

        id
    }

    fn for_each_write(&mut self, mut f: impl FnMut(&mut state::Write)) {
        for resource in self.resources.values_mut() {
            resource.contents.writes_mut().iter_mut().for_each(&mut f);
        }
    }

    /// Returns the ids of the writes that satisfy `predicate`.
    fn token(&self, predicate: impl Fn(&state::Write) -> bool) -> Token {
        self.resources
            .values()
            .flat_map(|resource| resource.contents.writes())
            .filter(|write| predicate(write))
            .map(|write| write.id)
            .collect()
    }

    fn order_token_before_host(&mut self, token: &Token) {
        self.for_each_write(|write| {
            if token.contains(&write.id) {
                write.order_before(Agent::Host, PipelineStages::HOST);
            }
        });
    }

    /// Applies the host side of a signaled fence.
    fn observe_fence(&mut self, fence: u64) {
        if let Some(fence) = self.fences.get(&fence) {
            let token = fence.token.clone();
            self.order_token_before_host(&token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::{Buffer, BufferUsage},
        command_buffer::RecordingCommandBuffer,
        device::SemaphoreWait,
        memory::MemoryRequirement,
        resource::Resources,
        sync::{AccessFlags, BufferMemoryBarrier, DependencyInfo, MemoryBarrier},
    };
    use smallvec::smallvec;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn host_buffer(resources: &mut Resources<'_>, len: usize) -> Buffer {
        resources
            .create_buffer(BufferCreateInfo::words(
                len,
                BufferUsage::STORAGE_BUFFER | BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST,
                MemoryRequirement::HOST_VISIBLE,
            ))
            .unwrap()
    }

    fn write_words(device: &dyn Device, buffer: Buffer, words: &[u32]) {
        device
            .write_buffer(buffer.handle(), 0, bytemuck::cast_slice(words))
            .unwrap();
    }

    fn read_words(device: &dyn Device, buffer: Buffer) -> Vec<u32> {
        let mut words = vec![0u32; buffer.len()];
        device
            .read_buffer(buffer.handle(), 0, bytemuck::cast_slice_mut(&mut words))
            .unwrap();

        words
    }

    fn host_write_barrier() -> DependencyInfo {
        DependencyInfo {
            memory_barriers: smallvec![MemoryBarrier {
                src_stages: PipelineStages::HOST,
                src_access: AccessFlags::HOST_WRITE,
                dst_stages: PipelineStages::ALL_TRANSFER,
                dst_access: AccessFlags::TRANSFER_READ,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn host_read_barrier(buffer: Buffer) -> DependencyInfo {
        DependencyInfo {
            buffer_memory_barriers: smallvec![BufferMemoryBarrier {
                src_stages: PipelineStages::ALL_TRANSFER,
                src_access: AccessFlags::TRANSFER_WRITE,
                dst_stages: PipelineStages::HOST,
                dst_access: AccessFlags::HOST_READ,
                ..BufferMemoryBarrier::buffer(buffer)
            }],
            ..Default::default()
        }
    }

    fn submit_copy(
        device: &SoftDevice,
        src: Buffer,
        dst: Buffer,
        barriers: bool,
        fence: vk::Fence,
    ) {
        let queue = Queue {
            family_index: 0,
            index: 0,
        };
        let mut builder = RecordingCommandBuffer::new(0, QueueFlags::all());

        if barriers {
            builder.pipeline_barrier(&host_write_barrier()).unwrap();
        }

        builder
            .copy_buffer(src, dst, crate::command_buffer::BufferCopy::whole(src))
            .unwrap();

        if barriers {
            builder.pipeline_barrier(&host_read_barrier(dst)).unwrap();
        }

        let submit_info = SubmitInfo {
            command_buffers: smallvec![Arc::new(builder.end())],
            ..Default::default()
        };
        device.submit(queue, &[submit_info], Some(fence)).unwrap();
    }

    #[test]
    fn synchronized_copy() {
        let device = soft_device!();
        let mut resources = Resources::new(&device);
        let src = host_buffer(&mut resources, 16);
        let dst = host_buffer(&mut resources, 16);
        let fence = resources.create_fence(false).unwrap();

        let input: Vec<u32> = (0..16).collect();
        write_words(&device, src, &input);
        submit_copy(&device, src, dst, true, fence);

        device.wait_for_fences(&[fence], TIMEOUT).unwrap();
        assert_eq!(read_words(&device, dst), input);
    }

    #[test]
    fn unsynchronized_copy_reads_undefined() {
        let device = soft_device!();
        let mut resources = Resources::new(&device);
        let src = host_buffer(&mut resources, 16);
        let dst = host_buffer(&mut resources, 16);
        let fence = resources.create_fence(false).unwrap();

        write_words(&device, src, &[1; 16]);
        submit_copy(&device, src, dst, false, fence);

        device.wait_for_fences(&[fence], TIMEOUT).unwrap();
        assert_eq!(read_words(&device, dst), [crate::UNDEFINED_PATTERN; 16]);
    }

    #[test]
    fn semaphore_wait_blocks_until_signaled() {
        let device = soft_device!();
        let mut resources = Resources::new(&device);
        let semaphore = resources.create_semaphore().unwrap();
        let fence = resources.create_fence(false).unwrap();

        let waiting = SubmitInfo {
            wait_semaphores: smallvec![SemaphoreWait {
                semaphore,
                stages: PipelineStages::ALL_COMMANDS,
            }],
            ..Default::default()
        };
        let queue = |family_index| Queue {
            family_index,
            index: 0,
        };
        device.submit(queue(1), &[waiting], Some(fence)).unwrap();

        assert_eq!(
            device.wait_for_fences(&[fence], Duration::ZERO),
            Err(DeviceError::Timeout),
        );

        let signaling = SubmitInfo {
            signal_semaphores: smallvec![semaphore],
            ..Default::default()
        };
        device.submit(queue(0), &[signaling], None).unwrap();

        assert_eq!(device.fence_status(fence), Ok(true));
    }

    #[test]
    fn host_event_releases_waiting_work() {
        let device = soft_device!();
        let mut resources = Resources::new(&device);
        let event = resources.create_event().unwrap();
        let fence = resources.create_fence(false).unwrap();

        let mut builder = RecordingCommandBuffer::new(0, QueueFlags::all());
        builder
            .wait_events(&[event], &DependencyInfo::default())
            .unwrap();
        let submit_info = SubmitInfo {
            command_buffers: smallvec![Arc::new(builder.end())],
            ..Default::default()
        };
        let queue = Queue {
            family_index: 0,
            index: 0,
        };
        device.submit(queue, &[submit_info], Some(fence)).unwrap();

        assert_eq!(device.fence_status(fence), Ok(false));
        device.set_event(event).unwrap();
        assert_eq!(device.event_status(event), Ok(true));
        device.wait_for_fences(&[fence], TIMEOUT).unwrap();
    }

    #[test]
    fn deadlock_is_discarded_on_idle() {
        let device = soft_device!();
        let semaphore = device.create_semaphore().unwrap();

        let waiting = SubmitInfo {
            wait_semaphores: smallvec![SemaphoreWait {
                semaphore,
                stages: PipelineStages::ALL_COMMANDS,
            }],
            ..Default::default()
        };
        let queue = Queue {
            family_index: 0,
            index: 0,
        };
        device.submit(queue, &[waiting], None).unwrap();

        assert_eq!(device.wait_idle(), Err(DeviceError::Timeout));
        assert_eq!(device.wait_idle(), Ok(()));
        device.destroy_semaphore(semaphore);
    }

    #[test]
    fn device_loss() {
        let device = SoftDevice::new(SoftDeviceCreateInfo {
            faults: SoftFaults {
                lose_device_after_submissions: Some(1),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        let queue = Queue {
            family_index: 0,
            index: 0,
        };

        device.submit(queue, &[], None).unwrap();
        assert_eq!(device.submit(queue, &[], None), Err(DeviceError::DeviceLost));
        assert!(device.is_lost());
        assert_eq!(device.create_fence(false), Err(DeviceError::DeviceLost));
    }

    #[test]
    fn invalid_queue_and_host_access() {
        let device = soft_device!();
        let queue = Queue {
            family_index: 2,
            index: 1,
        };
        assert_eq!(
            device.submit(queue, &[], None),
            Err(DeviceError::InvalidQueue(queue)),
        );

        let mut resources = Resources::new(&device);
        let buffer = resources
            .create_buffer(BufferCreateInfo::words(
                4,
                BufferUsage::STORAGE_BUFFER,
                MemoryRequirement::DEVICE_LOCAL,
            ))
            .unwrap();
        assert_eq!(
            device.write_buffer(buffer.handle(), 0, &[0; 4]),
            Err(DeviceError::MemoryMapFailed),
        );

        let buffer = host_buffer(&mut resources, 4);
        assert!(matches!(
            device.write_buffer(buffer.handle(), 2, &[0; 4]),
            Err(DeviceError::InvalidArgument(_)),
        ));
        assert!(matches!(
            device.write_buffer(buffer.handle(), 8, &[0; 12]),
            Err(DeviceError::InvalidArgument(_)),
        ));
    }

    #[test]
    fn create_info_validation() {
        assert!(SoftDevice::new(SoftDeviceCreateInfo {
            queue_families: Vec::new(),
            ..Default::default()
        })
        .is_err());
        assert!(SoftDevice::new(SoftDeviceCreateInfo {
            heap_size: 0,
            ..Default::default()
        })
        .is_err());
    }
}
