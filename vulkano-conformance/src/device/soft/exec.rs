//! Execution of submitted work.
//!
//! Each queue holds a list of pending submissions. [`State::advance`] runs whatever can run:
//! a submission first waits for its semaphores, then executes its commands in order until it
//! reaches a wait on an event that is not set, and finally signals its semaphores and fence.
//! Queues are serviced round-robin until none of them can make progress.

use super::{
    kernel::{self, Bindings, Slot},
    state::{Accessor, Agent, ResourceKey, Token},
    Scheduling, Signal, State,
};
use crate::{
    buffer::Buffer,
    command_buffer::{BufferCopy, Command, CommandBuffer, DescriptorResource, DescriptorSet},
    device::{DeviceError, Queue, SemaphoreWait, SubmitInfo},
    image::{Image, ImageLayout},
    shader::ComputeShader,
    sync::{AccessFlags, DependencyInfo, PipelineStages, QueueFamilyOwnershipTransfer},
    DeviceSize, UNDEFINED_PATTERN,
};
use ash::vk::{self, Handle};
use smallvec::SmallVec;
use std::{ops::Range, sync::Arc};
use tracing::{debug, trace, warn};

const WORD_SIZE: DeviceSize = size_of::<u32>() as DeviceSize;

/// A batch of command buffers that has been submitted to a queue and has not completed yet.
pub(super) struct Submission {
    waits: SmallVec<[SemaphoreWait; 4]>,
    waits_done: bool,
    command_buffers: SmallVec<[Arc<CommandBuffer>; 1]>,
    // The command buffer and command to execute next.
    cursor: (usize, usize),
    signals: SmallVec<[vk::Semaphore; 4]>,
    pub(super) fence: Option<vk::Fence>,
}

impl Submission {
    pub(super) fn new(submit_info: &SubmitInfo) -> Self {
        Submission {
            waits: submit_info.wait_semaphores.clone(),
            waits_done: false,
            command_buffers: submit_info.command_buffers.clone(),
            cursor: (0, 0),
            signals: submit_info.signal_semaphores.clone(),
            fence: None,
        }
    }

    pub(super) fn fence_only(fence: vk::Fence) -> Self {
        Submission {
            fence: Some(fence),
            ..Submission::new(&SubmitInfo::default())
        }
    }

    /// Returns the command to execute next, with its position.
    fn next_command(&self) -> Option<((usize, usize), Arc<CommandBuffer>)> {
        let (mut buffer_index, mut command_index) = self.cursor;

        while let Some(command_buffer) = self.command_buffers.get(buffer_index) {
            if command_index < command_buffer.commands().len() {
                return Some(((buffer_index, command_index), command_buffer.clone()));
            }

            buffer_index += 1;
            command_index = 0;
        }

        None
    }
}

impl ResourceKey {
    fn buffer(buffer: Buffer) -> Self {
        ResourceKey::Buffer(buffer.handle().as_raw())
    }

    fn image(image: Image) -> Self {
        ResourceKey::Image(image.handle().as_raw())
    }
}

/// One barrier of a dependency, reduced to what the memory model needs.
struct BarrierScope {
    src_stages: PipelineStages,
    src_access: AccessFlags,
    dst_stages: PipelineStages,
    dst_access: AccessFlags,
    // `None` for a global memory barrier.
    target: Option<(ResourceKey, Range<usize>)>,
}

impl BarrierScope {
    fn covered_range(&self, key: ResourceKey, len: usize) -> Option<Range<usize>> {
        match &self.target {
            None => Some(0..len),
            Some((target, range)) if *target == key => Some(range.clone()),
            Some(_) => None,
        }
    }
}

impl State {
    /// Checks that every object a submission refers to is alive, before anything is queued.
    pub(super) fn validate_submit(
        &self,
        queue: Queue,
        submit_infos: &[SubmitInfo],
        fence: Option<vk::Fence>,
    ) -> Result<(), DeviceError> {
        for submit_info in submit_infos {
            let semaphores = submit_info
                .wait_semaphores
                .iter()
                .map(|wait| wait.semaphore)
                .chain(submit_info.signal_semaphores.iter().copied());

            for semaphore in semaphores {
                if !self.semaphores.contains_key(&semaphore.as_raw()) {
                    return Err(DeviceError::InvalidHandle);
                }
            }

            for command_buffer in &submit_info.command_buffers {
                if command_buffer.queue_family_index() != queue.family_index {
                    return Err(DeviceError::InvalidArgument(
                        "a command buffer was recorded for another queue family",
                    ));
                }

                for command in command_buffer.commands() {
                    self.validate_command(command)?;
                }
            }
        }

        if let Some(fence) = fence {
            match self.fences.get(&fence.as_raw()) {
                None => return Err(DeviceError::InvalidHandle),
                Some(fence) if fence.signaled => {
                    return Err(DeviceError::InvalidArgument("the fence is already signaled"));
                }
                Some(_) => (),
            }
        }

        Ok(())
    }

    fn validate_command(&self, command: &Command) -> Result<(), DeviceError> {
        let check_resource = |key: ResourceKey| match self.resources.get(&key) {
            None => Err(DeviceError::InvalidHandle),
            Some(resource) if resource.memory.is_none() => Err(DeviceError::InvalidArgument(
                "a resource is not bound to memory",
            )),
            Some(_) => Ok(()),
        };
        let check_event = |event: vk::Event| {
            if self.events.contains_key(&event.as_raw()) {
                Ok(())
            } else {
                Err(DeviceError::InvalidHandle)
            }
        };
        let check_dependency = |dependency_info: &DependencyInfo| -> Result<(), DeviceError> {
            for barrier in &dependency_info.buffer_memory_barriers {
                check_resource(ResourceKey::buffer(barrier.buffer))?;
            }

            for barrier in &dependency_info.image_memory_barriers {
                check_resource(ResourceKey::image(barrier.image))?;
            }

            Ok(())
        };

        match command {
            Command::Dispatch {
                shader_module,
                descriptor_set,
                ..
            } => {
                if !self
                    .shader_modules
                    .contains_key(&shader_module.handle().as_raw())
                {
                    return Err(DeviceError::InvalidHandle);
                }

                for write in descriptor_set.writes() {
                    check_resource(descriptor_key(write.resource()))?;
                }

                Ok(())
            }
            Command::CopyBuffer { src, dst, .. } => {
                check_resource(ResourceKey::buffer(*src))?;
                check_resource(ResourceKey::buffer(*dst))
            }
            Command::CopyBufferToImage { src, dst, .. } => {
                check_resource(ResourceKey::buffer(*src))?;
                check_resource(ResourceKey::image(*dst))
            }
            Command::CopyImageToBuffer { src, dst, .. } => {
                check_resource(ResourceKey::image(*src))?;
                check_resource(ResourceKey::buffer(*dst))
            }
            Command::PipelineBarrier(dependency_info) => check_dependency(dependency_info),
            Command::SetEvent { event, .. } | Command::ResetEvent { event, .. } => {
                check_event(*event)
            }
            Command::WaitEvents {
                events,
                dependency_info,
            } => {
                for &event in events {
                    check_event(event)?;
                }

                check_dependency(dependency_info)
            }
        }
    }

    /// Executes pending work until no queue can make progress.
    pub(super) fn advance(&mut self) {
        loop {
            let mut progress = false;

            for index in 0..self.queues.len() {
                let queue_index = match self.scheduling {
                    Scheduling::InOrder => index,
                    Scheduling::Adversarial => self.queues.len() - 1 - index,
                };
                progress |= self.step_queue(queue_index);
            }

            if !progress {
                break;
            }
        }
    }

    /// Executes the pending work of one queue until it blocks. Returns whether anything was
    /// executed.
    fn step_queue(&mut self, queue_index: usize) -> bool {
        let mut progress = false;

        while let Some(submission) = self.queues[queue_index].pending.front() {
            if !submission.waits_done {
                let waits = submission.waits.clone();

                if !self.faults.ignore_semaphore_waits {
                    let signaled = waits.iter().all(|wait| {
                        self.semaphores
                            .get(&wait.semaphore.as_raw())
                            .is_some_and(|semaphore| semaphore.signaled)
                    });

                    if !signaled {
                        return progress;
                    }

                    for wait in &waits {
                        self.wait_semaphore(queue_index, wait);
                    }
                }

                if let Some(submission) = self.queues[queue_index].pending.front_mut() {
                    submission.waits_done = true;
                }

                progress = true;
                continue;
            }

            if let Some(((buffer_index, command_index), command_buffer)) =
                submission.next_command()
            {
                let command = &command_buffer.commands()[command_index];

                if let Command::WaitEvents { events, .. } = command {
                    let all_set = events.iter().all(|event| {
                        self.events
                            .get(&event.as_raw())
                            .is_some_and(|event| event.signaled)
                    });

                    if !all_set {
                        return progress;
                    }
                }

                self.execute(queue_index, command);

                if let Some(submission) = self.queues[queue_index].pending.front_mut() {
                    submission.cursor = (buffer_index, command_index + 1);
                }

                progress = true;
                continue;
            }

            if let Some(submission) = self.queues[queue_index].pending.pop_front() {
                self.complete(queue_index, submission);
            }

            progress = true;
        }

        progress
    }

    fn wait_semaphore(&mut self, queue_index: usize, wait: &SemaphoreWait) {
        let Some(semaphore) = self.semaphores.get_mut(&wait.semaphore.as_raw()) else {
            return;
        };
        let token = std::mem::take(semaphore).token;
        let agent = Agent::Queue(queue_index);
        let stages = wait.stages.expand();

        self.for_each_write(|write| {
            if token.contains(&write.id) {
                write.order_before(agent, stages);

                if write.available {
                    write.make_visible(stages, AccessFlags::all());
                }
            }
        });
    }

    fn complete(&mut self, queue_index: usize, submission: Submission) {
        let agent = Agent::Queue(queue_index);
        let mut token = Token::default();

        self.for_each_write(|write| {
            if write.reached(agent) {
                write.available = true;
                token.insert(write.id);
            }
        });

        for semaphore in &submission.signals {
            if let Some(semaphore) = self.semaphores.get_mut(&semaphore.as_raw()) {
                *semaphore = Signal {
                    signaled: true,
                    token: token.clone(),
                };
            }
        }

        if let Some(fence) = submission.fence {
            if let Some(fence) = self.fences.get_mut(&fence.as_raw()) {
                *fence = Signal {
                    signaled: true,
                    token,
                };
            }
        }

        trace!(queue = ?self.queues[queue_index].queue, "completed submission");
    }

    /// Drops the submissions that are still pending. Returns [`DeviceError::Timeout`] if there
    /// were any, since they could never have completed.
    pub(super) fn discard_blocked(&mut self) -> Result<(), DeviceError> {
        let blocked: usize = self.queues.iter().map(|queue| queue.pending.len()).sum();

        if blocked == 0 {
            return Ok(());
        }

        warn!(blocked, "discarding submissions that wait for something that never happens");

        for queue in &mut self.queues {
            queue.pending.clear();
        }

        Err(DeviceError::Timeout)
    }

    fn execute(&mut self, queue_index: usize, command: &Command) {
        let command_id = self.next_command;
        self.next_command += 1;
        let agent = Agent::Queue(queue_index);

        match command {
            Command::Dispatch {
                shader_module,
                descriptor_set,
                group_counts,
            } => self.dispatch(
                queue_index,
                command_id,
                shader_module.shader(),
                descriptor_set,
                *group_counts,
            ),
            Command::CopyBuffer { src, dst, region } => {
                self.copy_buffer(queue_index, command_id, *src, *dst, region);
            }
            Command::CopyBufferToImage {
                src,
                dst,
                dst_layout,
            } => self.copy_buffer_to_image(queue_index, command_id, *src, *dst, *dst_layout),
            Command::CopyImageToBuffer {
                src,
                src_layout,
                dst,
            } => self.copy_image_to_buffer(queue_index, command_id, *src, *src_layout, *dst),
            Command::PipelineBarrier(dependency_info) => {
                if self.faults.ignore_pipeline_barriers {
                    trace!("ignoring pipeline barrier");
                } else {
                    self.apply_dependency(queue_index, dependency_info, None);
                }
            }
            Command::SetEvent { event, stages } => {
                let stages = stages.expand();
                let token = self.token(|write| write.precedes(agent, stages));

                if let Some(event) = self.events.get_mut(&event.as_raw()) {
                    *event = Signal {
                        signaled: true,
                        token,
                    };
                }
            }
            Command::ResetEvent { event, .. } => {
                if let Some(event) = self.events.get_mut(&event.as_raw()) {
                    *event = Signal::default();
                }
            }
            Command::WaitEvents {
                events,
                dependency_info,
            } => {
                let token: Token = events
                    .iter()
                    .filter_map(|event| self.events.get(&event.as_raw()))
                    .flat_map(|event| event.token.iter().copied())
                    .collect();
                self.apply_dependency(queue_index, dependency_info, Some(&token));
            }
        }
    }

    /// Applies the execution and memory dependencies of `dependency_info`, recorded on
    /// `queue_index`.
    ///
    /// The first synchronization scope is the writes that precede the source stages of each
    /// barrier, or the writes in `events_scope` when waiting on events.
    fn apply_dependency(
        &mut self,
        queue_index: usize,
        dependency_info: &DependencyInfo,
        events_scope: Option<&Token>,
    ) {
        let agent = Agent::Queue(queue_index);
        let family_index = self.queues[queue_index].queue.family_index;
        let barriers = barrier_scopes(dependency_info);

        // All barriers of a dependency take effect at once.
        let first_scopes: Vec<Token> = barriers
            .iter()
            .map(|barrier| match events_scope {
                Some(token) => token.clone(),
                None => {
                    let src_stages = barrier.src_stages.expand();
                    self.token(|write| write.precedes(agent, src_stages))
                }
            })
            .collect();

        for (barrier, first_scope) in barriers.iter().zip(&first_scopes) {
            let src_stages = barrier.src_stages.expand();
            let dst_stages = barrier.dst_stages.expand();
            let src_access = barrier.src_access.scope(barrier.src_stages);
            let dst_access = barrier.dst_access.scope(barrier.dst_stages);

            for (&key, resource) in self.resources.iter_mut() {
                let covered = barrier.covered_range(key, resource.contents.len());

                for write in resource.contents.writes_mut() {
                    if !first_scope.contains(&write.id) {
                        continue;
                    }

                    write.order_before(agent, dst_stages);

                    let Some(covered) = &covered else {
                        continue;
                    };

                    if src_stages.contains(write.stage)
                        && src_access.contains(write.access)
                        && covered.start <= write.range.start
                        && write.range.end <= covered.end
                    {
                        write.available = true;
                    }

                    if write.available {
                        write.make_visible(dst_stages, dst_access);
                    }
                }
            }
        }

        for barrier in &dependency_info.buffer_memory_barriers {
            self.transfer_ownership(
                ResourceKey::buffer(barrier.buffer),
                barrier.queue_family_ownership_transfer,
                family_index,
            );
        }

        for barrier in &dependency_info.image_memory_barriers {
            let key = ResourceKey::image(barrier.image);
            let acquired = self.transfer_ownership(
                key,
                barrier.queue_family_ownership_transfer,
                family_index,
            );

            // The transition happens once, on the releasing side.
            if barrier.is_layout_transition() && !acquired {
                self.transition_layout(key, barrier.old_layout, barrier.new_layout);
            }
        }
    }

    /// Applies one side of a queue family ownership transfer. Returns whether this was the
    /// acquiring side.
    fn transfer_ownership(
        &mut self,
        key: ResourceKey,
        transfer: Option<QueueFamilyOwnershipTransfer>,
        family_index: u32,
    ) -> bool {
        let Some(transfer) = transfer.filter(|transfer| transfer.src_index != transfer.dst_index)
        else {
            return false;
        };
        let Some(resource) = self.resources.get_mut(&key) else {
            return false;
        };

        if family_index == transfer.dst_index {
            if resource.released_to == Some(family_index) {
                debug!(?key, ?transfer, "acquired ownership");
            } else {
                warn!(?key, ?transfer, "acquired a resource that was not released");
                resource.contents.discard();
            }

            resource.owner = Some(family_index);
            resource.released_to = None;

            return true;
        }

        if family_index != transfer.src_index {
            warn!(
                ?key,
                ?transfer,
                family_index,
                "ownership released by a queue family that is not the source",
            );
        }

        resource.released_to = Some(transfer.dst_index);

        false
    }

    fn transition_layout(
        &mut self,
        key: ResourceKey,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        if self.faults.ignore_layout_transitions {
            trace!(?key, "ignoring layout transition");
            return;
        }

        let Some(resource) = self.resources.get_mut(&key) else {
            return;
        };

        if old_layout != ImageLayout::Undefined && resource.layout() != Some(old_layout) {
            warn!(
                ?key,
                ?old_layout,
                current_layout = ?resource.layout(),
                "the old layout of a transition is not the current layout",
            );
        }

        if old_layout == ImageLayout::Undefined || resource.layout() != Some(old_layout) {
            resource.contents.discard();
        }

        resource.set_layout(new_layout);
    }

    /// Records that the queue family is using the resource. Using a resource that another
    /// family owns, without a transfer, loses its contents.
    fn claim(&mut self, key: ResourceKey, family_index: u32) {
        let Some(resource) = self.resources.get_mut(&key) else {
            return;
        };

        match resource.owner {
            None => resource.owner = Some(family_index),
            Some(owner) if owner == family_index => (),
            Some(owner) => {
                warn!(
                    ?key,
                    owner,
                    family_index,
                    "resource used by a queue family that does not own it",
                );
                resource.contents.discard();
                resource.owner = Some(family_index);
                resource.released_to = None;
            }
        }
    }

    fn device_read(
        &self,
        key: ResourceKey,
        range: Option<Range<usize>>,
        accessor: &Accessor,
    ) -> Vec<u32> {
        let Some(resource) = self.resources.get(&key) else {
            return Vec::new();
        };
        let range = range.unwrap_or(0..resource.contents.len());
        let (words, undefined) = resource.contents.read(range, accessor);

        if undefined != 0 {
            trace!(?key, undefined, access = ?accessor.access, "read unsynchronized words");
        }

        words
    }

    fn device_write(
        &mut self,
        key: ResourceKey,
        offset: usize,
        words: &[u32],
        accessor: &Accessor,
    ) {
        let id = self.next_write();

        if let Some(resource) = self.resources.get_mut(&key) {
            let len = words.len().min(resource.contents.len().saturating_sub(offset));
            resource.contents.write(id, offset, &words[..len], accessor);
        }
    }

    fn dispatch(
        &mut self,
        queue_index: usize,
        command_id: u64,
        shader: &ComputeShader,
        descriptor_set: &DescriptorSet,
        group_counts: [u32; 3],
    ) {
        let agent = Agent::Queue(queue_index);
        let family_index = self.queues[queue_index].queue.family_index;
        let mut bindings = Bindings::default();
        let mut targets: SmallVec<[(u32, ResourceKey, bool); 4]> = SmallVec::new();

        for write in descriptor_set.writes() {
            let key = descriptor_key(write.resource());
            let (access, descriptor_layout, writable) = match *write.resource() {
                DescriptorResource::UniformBuffer(_) => (AccessFlags::UNIFORM_READ, None, false),
                DescriptorResource::StorageBuffer(_) => {
                    (AccessFlags::SHADER_STORAGE_READ, None, true)
                }
                DescriptorResource::StorageImage(_, layout) => (
                    AccessFlags::SHADER_STORAGE_READ,
                    Some(layout),
                    layout.allows_storage_write(),
                ),
            };

            self.claim(key, family_index);

            let Some(resource) = self.resources.get(&key) else {
                continue;
            };
            let extent = resource.image.map(|(extent, _)| extent);

            let (words, writable) = match descriptor_layout {
                Some(layout) if resource.layout() != Some(layout) => {
                    warn!(
                        ?key,
                        descriptor_layout = ?layout,
                        current_layout = ?resource.layout(),
                        "image accessed in a layout it is not in",
                    );
                    (vec![UNDEFINED_PATTERN; resource.contents.len()], false)
                }
                _ => {
                    let accessor = Accessor {
                        agent,
                        stage: PipelineStages::COMPUTE_SHADER,
                        access,
                        command: Some(command_id),
                    };
                    (self.device_read(key, None, &accessor), writable)
                }
            };

            bindings.push(Slot::new(write.binding_index(), words, extent));
            targets.push((write.binding_index(), key, writable));
        }

        kernel::dispatch(
            shader.kernel,
            shader.local_size,
            group_counts,
            &mut bindings,
            self.scheduling,
        );

        let accessor = Accessor {
            agent,
            stage: PipelineStages::COMPUTE_SHADER,
            access: AccessFlags::SHADER_STORAGE_WRITE,
            command: Some(command_id),
        };

        for slot in bindings.into_slots() {
            let Some(&(_, key, writable)) =
                targets.iter().find(|(binding, ..)| *binding == slot.binding)
            else {
                continue;
            };
            let runs = slot.dirty_runs();

            if runs.is_empty() {
                continue;
            }

            if !writable {
                warn!(?key, binding = slot.binding, "stores to a read-only binding are dropped");
                continue;
            }

            for run in runs {
                self.device_write(key, run.start, &slot.words[run], &accessor);
            }
        }

        trace!(name = %shader.name, ?group_counts, "executed dispatch");
    }

    fn transfer_accessors(queue_index: usize, command_id: u64) -> (Accessor, Accessor) {
        let accessor = |access| Accessor {
            agent: Agent::Queue(queue_index),
            stage: PipelineStages::COPY,
            access,
            command: Some(command_id),
        };

        (
            accessor(AccessFlags::TRANSFER_READ),
            accessor(AccessFlags::TRANSFER_WRITE),
        )
    }

    fn copy_buffer(
        &mut self,
        queue_index: usize,
        command_id: u64,
        src: Buffer,
        dst: Buffer,
        region: &BufferCopy,
    ) {
        let family_index = self.queues[queue_index].queue.family_index;
        let (read, write) = Self::transfer_accessors(queue_index, command_id);
        let (src_key, dst_key) = (ResourceKey::buffer(src), ResourceKey::buffer(dst));
        self.claim(src_key, family_index);
        self.claim(dst_key, family_index);

        let src_start = (region.src_offset / WORD_SIZE) as usize;
        let len = (region.size / WORD_SIZE) as usize;
        let words = self.device_read(src_key, Some(src_start..src_start + len), &read);
        self.device_write(dst_key, (region.dst_offset / WORD_SIZE) as usize, &words, &write);
    }

    fn copy_buffer_to_image(
        &mut self,
        queue_index: usize,
        command_id: u64,
        src: Buffer,
        dst: Image,
        dst_layout: ImageLayout,
    ) {
        let family_index = self.queues[queue_index].queue.family_index;
        let (read, write) = Self::transfer_accessors(queue_index, command_id);
        let (src_key, dst_key) = (ResourceKey::buffer(src), ResourceKey::image(dst));
        self.claim(src_key, family_index);
        self.claim(dst_key, family_index);

        let current_layout = self.resources.get(&dst_key).and_then(|image| image.layout());

        if current_layout != Some(dst_layout) || !dst_layout.allows_transfer_dst() {
            warn!(
                key = ?dst_key,
                ?dst_layout,
                ?current_layout,
                "copy to an image in a layout it is not in, or that forbids copies",
            );
            return;
        }

        let len = dst.texel_count().min(src.len());
        let words = self.device_read(src_key, Some(0..len), &read);
        self.device_write(dst_key, 0, &words, &write);
    }

    fn copy_image_to_buffer(
        &mut self,
        queue_index: usize,
        command_id: u64,
        src: Image,
        src_layout: ImageLayout,
        dst: Buffer,
    ) {
        let family_index = self.queues[queue_index].queue.family_index;
        let (read, write) = Self::transfer_accessors(queue_index, command_id);
        let (src_key, dst_key) = (ResourceKey::image(src), ResourceKey::buffer(dst));
        self.claim(src_key, family_index);
        self.claim(dst_key, family_index);

        let len = src.texel_count().min(dst.len());
        let current_layout = self.resources.get(&src_key).and_then(|image| image.layout());

        let words = if current_layout != Some(src_layout) || !src_layout.allows_transfer_src() {
            warn!(
                key = ?src_key,
                ?src_layout,
                ?current_layout,
                "copy from an image in a layout it is not in, or that forbids copies",
            );
            vec![UNDEFINED_PATTERN; len]
        } else {
            self.device_read(src_key, Some(0..len), &read)
        };

        self.device_write(dst_key, 0, &words, &write);
    }
}

fn descriptor_key(resource: &DescriptorResource) -> ResourceKey {
    match *resource {
        DescriptorResource::UniformBuffer(buffer) | DescriptorResource::StorageBuffer(buffer) => {
            ResourceKey::buffer(buffer)
        }
        DescriptorResource::StorageImage(image, _) => ResourceKey::image(image),
    }
}

fn barrier_scopes(dependency_info: &DependencyInfo) -> Vec<BarrierScope> {
    let memory = dependency_info
        .memory_barriers
        .iter()
        .map(|barrier| BarrierScope {
            src_stages: barrier.src_stages,
            src_access: barrier.src_access,
            dst_stages: barrier.dst_stages,
            dst_access: barrier.dst_access,
            target: None,
        });

    let buffers = dependency_info
        .buffer_memory_barriers
        .iter()
        .map(|barrier| BarrierScope {
            src_stages: barrier.src_stages,
            src_access: barrier.src_access,
            dst_stages: barrier.dst_stages,
            dst_access: barrier.dst_access,
            target: Some((
                ResourceKey::buffer(barrier.buffer),
                (barrier.range.start / WORD_SIZE) as usize
                    ..barrier.range.end.div_ceil(WORD_SIZE) as usize,
            )),
        });

    let images = dependency_info
        .image_memory_barriers
        .iter()
        .map(|barrier| BarrierScope {
            src_stages: barrier.src_stages,
            src_access: barrier.src_access,
            dst_stages: barrier.dst_stages,
            dst_access: barrier.dst_access,
            target: Some((ResourceKey::image(barrier.image), 0..barrier.image.texel_count())),
        });

    memory.chain(buffers).chain(images).collect()
}

#[cfg(test)]
mod tests {
    use super::super::{SoftDevice, SoftDeviceCreateInfo, SoftFaults};
    use crate::{
        buffer::{Buffer, BufferCreateInfo, BufferUsage},
        command_buffer::{BufferCopy, DescriptorSet, RecordingCommandBuffer, WriteDescriptorSet},
        device::{Device, Queue, QueueFlags, SubmitInfo},
        image::{Image, ImageCreateInfo, ImageLayout, ImageUsage},
        memory::MemoryRequirement,
        resource::Resources,
        shader::templates,
        sync::{
            AccessFlags, BufferMemoryBarrier, DependencyInfo, ImageMemoryBarrier, MemoryBarrier,
            PipelineStages,
        },
        UNDEFINED_PATTERN,
    };
    use smallvec::smallvec;
    use std::{sync::Arc, time::Duration};

    const QUEUE: Queue = Queue {
        family_index: 0,
        index: 0,
    };

    fn submit_and_wait(
        device: &dyn Device,
        resources: &mut Resources<'_>,
        queue: Queue,
        builder: RecordingCommandBuffer,
    ) {
        let fence = resources.create_fence(false).unwrap();
        let submit_info = SubmitInfo {
            command_buffers: smallvec![Arc::new(builder.end())],
            ..Default::default()
        };
        device.submit(queue, &[submit_info], Some(fence)).unwrap();
        device
            .wait_for_fences(&[fence], Duration::from_secs(1))
            .unwrap();
    }

    fn read_back(device: &dyn Device, buffer: Buffer) -> Vec<u32> {
        let mut words = vec![0u32; buffer.len()];
        device
            .read_buffer(buffer.handle(), 0, bytemuck::cast_slice_mut(&mut words))
            .unwrap();

        words
    }

    fn to_host(
        buffer: Buffer,
        src_stages: PipelineStages,
        src_access: AccessFlags,
    ) -> DependencyInfo {
        DependencyInfo {
            buffer_memory_barriers: smallvec![BufferMemoryBarrier {
                src_stages,
                src_access,
                dst_stages: PipelineStages::HOST,
                dst_access: AccessFlags::HOST_READ,
                ..BufferMemoryBarrier::buffer(buffer)
            }],
            ..Default::default()
        }
    }

    fn fill_image_and_copy(device: &SoftDevice, transition: bool) -> Vec<u32> {
        let mut resources = Resources::new(device);
        let image: Image = resources
            .create_image(ImageCreateInfo {
                extent: [4, 4],
                usage: ImageUsage::STORAGE | ImageUsage::TRANSFER_SRC,
                ..Default::default()
            })
            .unwrap();
        let buffer = resources
            .create_buffer(BufferCreateInfo::words(
                16,
                BufferUsage::TRANSFER_DST,
                MemoryRequirement::HOST_VISIBLE,
            ))
            .unwrap();
        let shader = resources
            .create_shader_module(templates::fill_image(7, [4, 4]))
            .unwrap();

        let mut builder = RecordingCommandBuffer::new(0, QueueFlags::all());
        builder
            .pipeline_barrier(&DependencyInfo {
                image_memory_barriers: smallvec![ImageMemoryBarrier {
                    dst_stages: PipelineStages::COMPUTE_SHADER,
                    dst_access: AccessFlags::SHADER_STORAGE_WRITE,
                    new_layout: ImageLayout::General,
                    ..ImageMemoryBarrier::image(image)
                }],
                ..Default::default()
            })
            .unwrap()
            .dispatch(
                &shader,
                &DescriptorSet::new([WriteDescriptorSet::storage_image(
                    0,
                    image,
                    ImageLayout::General,
                )])
                .unwrap(),
                [1, 1, 1],
            )
            .unwrap();

        let new_layout = if transition {
            ImageLayout::TransferSrcOptimal
        } else {
            ImageLayout::General
        };
        builder
            .pipeline_barrier(&DependencyInfo {
                image_memory_barriers: smallvec![ImageMemoryBarrier {
                    src_stages: PipelineStages::COMPUTE_SHADER,
                    src_access: AccessFlags::SHADER_STORAGE_WRITE,
                    dst_stages: PipelineStages::ALL_TRANSFER,
                    dst_access: AccessFlags::TRANSFER_READ,
                    old_layout: ImageLayout::General,
                    new_layout,
                    ..ImageMemoryBarrier::image(image)
                }],
                ..Default::default()
            })
            .unwrap()
            .copy_image_to_buffer(image, ImageLayout::TransferSrcOptimal, buffer)
            .unwrap()
            .pipeline_barrier(&to_host(
                buffer,
                PipelineStages::ALL_TRANSFER,
                AccessFlags::TRANSFER_WRITE,
            ))
            .unwrap();

        submit_and_wait(device, &mut resources, QUEUE, builder);

        read_back(device, buffer)
    }

    #[test]
    fn image_layouts_are_tracked() {
        let device = soft_device!();
        let expected: Vec<u32> = (0..16).map(|i| crate::reference::pattern(7, i)).collect();

        assert_eq!(fill_image_and_copy(&device, true), expected);
        assert_eq!(fill_image_and_copy(&device, false), [UNDEFINED_PATTERN; 16]);
    }

    #[test]
    fn ignored_layout_transitions_are_detected() {
        let device = SoftDevice::new(SoftDeviceCreateInfo {
            faults: SoftFaults {
                ignore_layout_transitions: true,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();

        assert_eq!(fill_image_and_copy(&device, true), [UNDEFINED_PATTERN; 16]);
    }

    #[test]
    fn ignored_barriers_are_detected() {
        let device = SoftDevice::new(SoftDeviceCreateInfo {
            faults: SoftFaults {
                ignore_pipeline_barriers: true,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        let mut resources = Resources::new(&device);
        let buffer = resources
            .create_buffer(BufferCreateInfo::words(
                64,
                BufferUsage::STORAGE_BUFFER,
                MemoryRequirement::HOST_VISIBLE,
            ))
            .unwrap();
        let shader = resources
            .create_shader_module(templates::fill_buffer(3, 64, [64, 1, 1]))
            .unwrap();

        let mut builder = RecordingCommandBuffer::new(0, QueueFlags::all());
        builder
            .dispatch(
                &shader,
                &DescriptorSet::new([WriteDescriptorSet::storage_buffer(0, buffer)]).unwrap(),
                [1, 1, 1],
            )
            .unwrap()
            .pipeline_barrier(&to_host(
                buffer,
                PipelineStages::COMPUTE_SHADER,
                AccessFlags::SHADER_STORAGE_WRITE,
            ))
            .unwrap();
        submit_and_wait(&device, &mut resources, QUEUE, builder);

        assert_eq!(read_back(&device, buffer), [UNDEFINED_PATTERN; 64]);
    }

    fn fill_then_copy_on(device: &SoftDevice, family_index: u32) -> Vec<u32> {
        let mut resources = Resources::new(device);
        let create_info = |usage| {
            BufferCreateInfo::words(
                64,
                BufferUsage::STORAGE_BUFFER | usage,
                MemoryRequirement::HOST_VISIBLE,
            )
        };
        let src = resources.create_buffer(create_info(BufferUsage::TRANSFER_SRC)).unwrap();
        let dst = resources.create_buffer(create_info(BufferUsage::TRANSFER_DST)).unwrap();
        let fill = resources
            .create_shader_module(templates::fill_buffer(3, 64, [64, 1, 1]))
            .unwrap();

        let mut builder = RecordingCommandBuffer::new(0, QueueFlags::all());
        builder
            .dispatch(
                &fill,
                &DescriptorSet::new([WriteDescriptorSet::storage_buffer(0, src)]).unwrap(),
                [1, 1, 1],
            )
            .unwrap()
            .pipeline_barrier(&DependencyInfo {
                memory_barriers: smallvec![MemoryBarrier {
                    src_stages: PipelineStages::COMPUTE_SHADER,
                    src_access: AccessFlags::SHADER_STORAGE_WRITE,
                    dst_stages: PipelineStages::ALL_TRANSFER,
                    dst_access: AccessFlags::TRANSFER_READ,
                    ..Default::default()
                }],
                ..Default::default()
            })
            .unwrap();
        submit_and_wait(device, &mut resources, QUEUE, builder);

        let flags = device.queue_family_properties()[family_index as usize].queue_flags;
        let mut builder = RecordingCommandBuffer::new(family_index, flags);
        builder
            .copy_buffer(src, dst, BufferCopy::whole(src))
            .unwrap()
            .pipeline_barrier(&to_host(
                dst,
                PipelineStages::ALL_TRANSFER,
                AccessFlags::TRANSFER_WRITE,
            ))
            .unwrap();
        let queue = Queue {
            family_index,
            index: 0,
        };
        submit_and_wait(device, &mut resources, queue, builder);

        read_back(device, dst)
    }

    #[test]
    fn use_without_ownership_transfer_discards() {
        let device = soft_device!();
        let expected: Vec<u32> = (0..64).map(|i| crate::reference::pattern(3, i)).collect();

        assert_eq!(fill_then_copy_on(&device, 0), expected);
        assert_eq!(fill_then_copy_on(&device, 2), [UNDEFINED_PATTERN; 64]);
    }
}
