//! Scenarios that write a resource with one operation and read it with another, with a single
//! synchronization primitive in between.
//!
//! The read must observe exactly what the write produced. Every dependency a scenario records is
//! the minimum that the primitive requires, so that a device that drops any part of it is caught
//! by the oracle.

use super::{host_read_dependency, host_write_dependency, Context, ScenarioError};
use crate::{
    buffer::{Buffer, BufferUsage},
    command_buffer::{BufferCopy, DescriptorSet, WriteDescriptorSet},
    device::{Queue, QueueFlags, SemaphoreWait},
    driver::Driver,
    image::{Image, ImageLayout, ImageUsage},
    memory::MemoryRequirement,
    oracle::{CompletionToken, Shape, Verdict},
    reference,
    shader::{templates, ShaderModule},
    sync::{
        AccessFlags, BufferMemoryBarrier, DependencyInfo, ImageMemoryBarrier, PipelineStages,
        QueueFamilyOwnershipTransfer,
    },
    ValidationError,
};
use smallvec::smallvec;

const BUFFER_WORDS: u32 = 4096;
const IMAGE_EXTENT: [u32; 2] = [64, 64];

const BUFFER_LOCAL_SIZE: [u32; 3] = [64, 1, 1];
const BUFFER_GROUP_COUNTS: [u32; 3] = [BUFFER_WORDS / BUFFER_LOCAL_SIZE[0], 1, 1];
const IMAGE_LOCAL_SIZE: [u32; 2] = [8, 8];
const IMAGE_GROUP_COUNTS: [u32; 3] = [
    IMAGE_EXTENT[0] / IMAGE_LOCAL_SIZE[0],
    IMAGE_EXTENT[1] / IMAGE_LOCAL_SIZE[1],
    1,
];

/// Whether the two operations run on one queue or on two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topology {
    SingleQueue,
    MultiQueue,
}

impl Topology {
    pub fn as_str(self) -> &'static str {
        match self {
            Topology::SingleQueue => "single_queue",
            Topology::MultiQueue => "multi_queue",
        }
    }
}

/// The synchronization primitive between the write and the read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// A pipeline barrier between the two operations, in one command buffer.
    Barrier,

    /// An event set after the write and waited on before the read, in one command buffer.
    Event,

    /// The host waits for the fence of the write before submitting the read.
    Fence,

    /// The read is submitted waiting on a semaphore that the write signals.
    Semaphore,
}

impl Primitive {
    pub fn as_str(self) -> &'static str {
        match self {
            Primitive::Barrier => "barrier",
            Primitive::Event => "event",
            Primitive::Fence => "fence",
            Primitive::Semaphore => "semaphore",
        }
    }
}

/// Who performs a write or a read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// A compute shader.
    Compute,

    /// A copy command.
    Transfer,

    /// The host, through mapped memory.
    Host,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Compute => "compute",
            OpKind::Transfer => "transfer",
            OpKind::Host => "host",
        }
    }

    fn queue_flags(self) -> QueueFlags {
        match self {
            OpKind::Compute => QueueFlags::COMPUTE,
            OpKind::Transfer => QueueFlags::TRANSFER,
            OpKind::Host => QueueFlags::empty(),
        }
    }

    fn write_scope(self) -> Scope {
        match self {
            OpKind::Compute => Scope {
                stages: PipelineStages::COMPUTE_SHADER,
                access: AccessFlags::SHADER_STORAGE_WRITE,
                layout: ImageLayout::General,
            },
            OpKind::Transfer => Scope {
                stages: PipelineStages::ALL_TRANSFER,
                access: AccessFlags::TRANSFER_WRITE,
                layout: ImageLayout::TransferDstOptimal,
            },
            OpKind::Host => Scope {
                stages: PipelineStages::HOST,
                access: AccessFlags::HOST_WRITE,
                layout: ImageLayout::General,
            },
        }
    }

    fn read_scope(self) -> Scope {
        match self {
            OpKind::Compute => Scope {
                stages: PipelineStages::COMPUTE_SHADER,
                access: AccessFlags::SHADER_STORAGE_READ,
                layout: ImageLayout::General,
            },
            OpKind::Transfer => Scope {
                stages: PipelineStages::ALL_TRANSFER,
                access: AccessFlags::TRANSFER_READ,
                layout: ImageLayout::TransferSrcOptimal,
            },
            OpKind::Host => Scope {
                stages: PipelineStages::HOST,
                access: AccessFlags::HOST_READ,
                layout: ImageLayout::General,
            },
        }
    }

    fn seed(self) -> u32 {
        match self {
            OpKind::Compute => 0x0c0f_fee5,
            OpKind::Transfer => 0x7a5f_e75d,
            OpKind::Host => 0x0b05_7ed0,
        }
    }
}

/// The resource that is written and read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Image,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Buffer => "buffer",
            ResourceKind::Image => "image",
        }
    }
}

/// A write operation and a read operation of the same resource, separated by a primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperationPair {
    pub topology: Topology,
    pub primitive: Primitive,
    pub write: OpKind,
    pub read: OpKind,
    pub resource: ResourceKind,
}

impl OperationPair {
    /// Returns whether the combination can be expressed at all.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub(super) fn validate(&self) -> Result<(), Box<ValidationError>> {
        let has_host = self.write == OpKind::Host || self.read == OpKind::Host;

        if self.write == OpKind::Host && self.read == OpKind::Host {
            return Err(ValidationError::new(
                "read",
                "the host cannot synchronize with itself through the device",
            ));
        }

        if self.write == OpKind::Host
            && matches!(self.primitive, Primitive::Fence | Primitive::Semaphore)
        {
            return Err(ValidationError::new(
                "primitive",
                "a host write cannot signal a fence or a semaphore",
            ));
        }

        if self.topology == Topology::MultiQueue {
            if matches!(self.primitive, Primitive::Barrier | Primitive::Event) {
                return Err(ValidationError::new(
                    "primitive",
                    "cannot synchronize operations on different queues",
                ));
            }

            if has_host {
                return Err(ValidationError::new(
                    "topology",
                    "a host operation does not run on a queue",
                ));
            }
        }

        if has_host && self.resource == ResourceKind::Image {
            return Err(ValidationError::new(
                "resource",
                "images cannot be accessed by the host",
            ));
        }

        Ok(())
    }

    /// Returns the path of the scenario under `synchronization/op`.
    pub fn name(&self) -> String {
        format!(
            "{}/{}/{}_{}_{}",
            self.topology.as_str(),
            self.primitive.as_str(),
            self.write.as_str(),
            self.read.as_str(),
            self.resource.as_str(),
        )
    }

    pub(super) fn execute(&self, ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
        let plan = Plan::new(ctx, self)?;

        match self.primitive {
            Primitive::Barrier => plan.barrier(ctx),
            Primitive::Event => plan.event(ctx),
            Primitive::Fence | Primitive::Semaphore => plan.separate_submissions(ctx),
        }
    }
}

/// The stages, access and image layout of one side of a dependency.
#[derive(Clone, Copy, Debug)]
struct Scope {
    stages: PipelineStages,
    access: AccessFlags,
    layout: ImageLayout,
}

#[derive(Clone, Copy, Debug)]
enum Target {
    Buffer(Buffer),
    Image(Image),
}

enum Writer {
    Compute(ShaderModule),
    Transfer(Buffer),
    Host,
}

enum Reader {
    Compute(ShaderModule, Buffer),
    Transfer(Buffer),
    Host,
}

/// Everything a pair needs, created up front.
struct Plan {
    pair: OperationPair,
    target: Target,
    writer: Writer,
    reader: Reader,
    write_queue: Option<Queue>,
    read_queue: Option<Queue>,
    expected: Vec<u32>,
}

impl Plan {
    fn new(ctx: &mut Context<'_, '_>, pair: &OperationPair) -> Result<Self, ScenarioError> {
        let seed = pair.write.seed();
        let expected = reference::pattern_words(seed, BUFFER_WORDS as usize);
        let len = BUFFER_WORDS as usize;
        let has_host = pair.write == OpKind::Host || pair.read == OpKind::Host;

        let target = match pair.resource {
            ResourceKind::Buffer => {
                let memory_requirement = if has_host {
                    MemoryRequirement::HOST_VISIBLE
                } else {
                    MemoryRequirement::ANY
                };

                Target::Buffer(ctx.buffer(
                    len,
                    BufferUsage::STORAGE_BUFFER
                        | BufferUsage::TRANSFER_SRC
                        | BufferUsage::TRANSFER_DST,
                    memory_requirement,
                )?)
            }
            ResourceKind::Image => Target::Image(ctx.image(
                IMAGE_EXTENT,
                ImageUsage::STORAGE | ImageUsage::TRANSFER_SRC | ImageUsage::TRANSFER_DST,
            )?),
        };

        let writer = match pair.write {
            OpKind::Compute => Writer::Compute(ctx.shader(match target {
                Target::Buffer(_) => templates::fill_buffer(seed, BUFFER_WORDS, BUFFER_LOCAL_SIZE),
                Target::Image(_) => templates::fill_image(seed, IMAGE_LOCAL_SIZE),
            })?),
            OpKind::Transfer => {
                let staging = ctx.host_buffer(len, BufferUsage::TRANSFER_SRC)?;
                ctx.write(staging, &expected)?;

                Writer::Transfer(staging)
            }
            OpKind::Host => Writer::Host,
        };

        let reader = match pair.read {
            OpKind::Compute => {
                let output = ctx.host_buffer(len, BufferUsage::STORAGE_BUFFER)?;
                let shader = ctx.shader(match target {
                    Target::Buffer(_) => templates::copy_buffer(BUFFER_WORDS, BUFFER_LOCAL_SIZE),
                    Target::Image(_) => {
                        templates::copy_image_to_buffer(IMAGE_LOCAL_SIZE, IMAGE_EXTENT)
                    }
                })?;

                Reader::Compute(shader, output)
            }
            OpKind::Transfer => Reader::Transfer(ctx.host_buffer(len, BufferUsage::TRANSFER_DST)?),
            OpKind::Host => Reader::Host,
        };

        let (write_queue, read_queue) = Self::queues(ctx, pair)?;

        Ok(Plan {
            pair: *pair,
            target,
            writer,
            reader,
            write_queue,
            read_queue,
            expected,
        })
    }

    /// Picks the queues of the device operations. A host operation has no queue.
    fn queues(
        ctx: &Context<'_, '_>,
        pair: &OperationPair,
    ) -> Result<(Option<Queue>, Option<Queue>), ScenarioError> {
        let write_flags = pair.write.queue_flags();
        let read_flags = pair.read.queue_flags();

        match pair.topology {
            Topology::SingleQueue => {
                let queue = ctx.queue(write_flags | read_flags, &[])?;
                let write_queue = (pair.write != OpKind::Host).then_some(queue);
                let read_queue = (pair.read != OpKind::Host).then_some(queue);

                Ok((write_queue, read_queue))
            }
            Topology::MultiQueue => {
                let write_queue = ctx.queue(write_flags, &[])?;

                // Queues of another family exercise ownership transfers.
                let other_family = ctx
                    .device
                    .queue_family_properties()
                    .iter()
                    .enumerate()
                    .find(|&(family_index, properties)| {
                        family_index as u32 != write_queue.family_index
                            && properties.queue_flags.contains(read_flags)
                            && properties.queue_count > 0
                    })
                    .map(|(family_index, _)| Queue {
                        family_index: family_index as u32,
                        index: 0,
                    });

                let read_queue = match other_family {
                    Some(queue) => queue,
                    None => ctx.queue(read_flags, &[write_queue])?,
                };

                Ok((Some(write_queue), Some(read_queue)))
            }
        }
    }

    fn write_scope(&self) -> Scope {
        self.pair.write.write_scope()
    }

    fn read_scope(&self) -> Scope {
        self.pair.read.read_scope()
    }

    /// The ownership transfer between the families of the two queues, if they differ.
    fn ownership_transfer(&self) -> Option<QueueFamilyOwnershipTransfer> {
        match (self.write_queue, self.read_queue) {
            (Some(write), Some(read)) if write.family_index != read.family_index => {
                Some(QueueFamilyOwnershipTransfer {
                    src_index: write.family_index,
                    dst_index: read.family_index,
                })
            }
            _ => None,
        }
    }

    fn device_queue(&self) -> Result<Queue, ScenarioError> {
        self.write_queue.or(self.read_queue).ok_or_else(|| {
            ScenarioError::NotSupported("the pair has no device operation".into())
        })
    }

    /// A dependency on the target from `src` to `dst`, with the layout changing between them.
    fn dependency(
        &self,
        src: Scope,
        dst: Scope,
        transfer: Option<QueueFamilyOwnershipTransfer>,
    ) -> DependencyInfo {
        match self.target {
            Target::Buffer(buffer) => DependencyInfo {
                buffer_memory_barriers: smallvec![BufferMemoryBarrier {
                    src_stages: src.stages,
                    src_access: src.access,
                    dst_stages: dst.stages,
                    dst_access: dst.access,
                    queue_family_ownership_transfer: transfer,
                    ..BufferMemoryBarrier::buffer(buffer)
                }],
                ..Default::default()
            },
            Target::Image(image) => DependencyInfo {
                image_memory_barriers: smallvec![ImageMemoryBarrier {
                    src_stages: src.stages,
                    src_access: src.access,
                    dst_stages: dst.stages,
                    dst_access: dst.access,
                    old_layout: src.layout,
                    new_layout: dst.layout,
                    queue_family_ownership_transfer: transfer,
                    ..ImageMemoryBarrier::image(image)
                }],
                ..Default::default()
            },
        }
    }

    fn host_write(&self, ctx: &Context<'_, '_>) -> Result<(), ScenarioError> {
        match self.target {
            Target::Buffer(buffer) => ctx.write(buffer, &self.expected),
            Target::Image(_) => Err(ScenarioError::NotSupported(
                "images cannot be written by the host".into(),
            )),
        }
    }

    /// Records the write, with the uploads and the initial layout transition it needs.
    fn record_write(&self, driver: &mut Driver<'_>) -> Result<(), ScenarioError> {
        let scope = self.write_scope();

        if let Writer::Transfer(staging) = self.writer {
            driver.pipeline_barrier(&host_write_dependency(
                &[staging],
                PipelineStages::ALL_TRANSFER,
                AccessFlags::TRANSFER_READ,
            ))?;
        }

        if let Target::Image(image) = self.target {
            driver.pipeline_barrier(&DependencyInfo {
                image_memory_barriers: smallvec![ImageMemoryBarrier {
                    dst_stages: scope.stages,
                    dst_access: scope.access,
                    old_layout: ImageLayout::Undefined,
                    new_layout: scope.layout,
                    ..ImageMemoryBarrier::image(image)
                }],
                ..Default::default()
            })?;
        }

        match (&self.writer, self.target) {
            (Writer::Compute(shader), Target::Buffer(buffer)) => {
                let descriptor_set =
                    DescriptorSet::new([WriteDescriptorSet::storage_buffer(0, buffer)])?;
                driver.dispatch(shader, &descriptor_set, BUFFER_GROUP_COUNTS)?;
            }
            (Writer::Compute(shader), Target::Image(image)) => {
                let descriptor_set = DescriptorSet::new([WriteDescriptorSet::storage_image(
                    0,
                    image,
                    scope.layout,
                )])?;
                driver.dispatch(shader, &descriptor_set, IMAGE_GROUP_COUNTS)?;
            }
            (&Writer::Transfer(staging), Target::Buffer(buffer)) => {
                driver.copy_buffer(staging, buffer, BufferCopy::whole(staging))?;
            }
            (&Writer::Transfer(staging), Target::Image(image)) => {
                driver.copy_buffer_to_image(staging, image, scope.layout)?;
            }
            (Writer::Host, _) => (),
        }

        Ok(())
    }

    /// Records the read, and the dependency that makes its result readable by the host.
    fn record_read(&self, driver: &mut Driver<'_>) -> Result<(), ScenarioError> {
        let scope = self.read_scope();

        match (&self.reader, self.target) {
            (&Reader::Compute(ref shader, output), Target::Buffer(buffer)) => {
                let descriptor_set = DescriptorSet::new([
                    WriteDescriptorSet::storage_buffer(0, buffer),
                    WriteDescriptorSet::storage_buffer(1, output),
                ])?;
                driver
                    .dispatch(shader, &descriptor_set, BUFFER_GROUP_COUNTS)?
                    .pipeline_barrier(&host_read_dependency(
                        &[output],
                        PipelineStages::COMPUTE_SHADER,
                        AccessFlags::SHADER_STORAGE_WRITE,
                    ))?;
            }
            (&Reader::Compute(ref shader, output), Target::Image(image)) => {
                let descriptor_set = DescriptorSet::new([
                    WriteDescriptorSet::storage_buffer(0, output),
                    WriteDescriptorSet::storage_image(1, image, scope.layout),
                ])?;
                driver
                    .dispatch(shader, &descriptor_set, IMAGE_GROUP_COUNTS)?
                    .pipeline_barrier(&host_read_dependency(
                        &[output],
                        PipelineStages::COMPUTE_SHADER,
                        AccessFlags::SHADER_STORAGE_WRITE,
                    ))?;
            }
            (&Reader::Transfer(readback), target) => {
                match target {
                    Target::Buffer(buffer) => {
                        driver.copy_buffer(buffer, readback, BufferCopy::whole(buffer))?
                    }
                    Target::Image(image) => {
                        driver.copy_image_to_buffer(image, scope.layout, readback)?
                    }
                };
                driver.pipeline_barrier(&host_read_dependency(
                    &[readback],
                    PipelineStages::ALL_TRANSFER,
                    AccessFlags::TRANSFER_WRITE,
                ))?;
            }
            (Reader::Host, _) => (),
        }

        Ok(())
    }

    /// Compares what the read produced with the written pattern.
    fn verify(
        &self,
        ctx: &Context<'_, '_>,
        token: &CompletionToken,
    ) -> Result<Verdict, ScenarioError> {
        let (buffer, shape) = match (&self.reader, self.target) {
            (&Reader::Compute(_, buffer), target) | (&Reader::Transfer(buffer), target) => {
                let shape = match target {
                    Target::Buffer(_) => Shape::Words,
                    Target::Image(_) => Shape::Texels {
                        width: IMAGE_EXTENT[0],
                    },
                };

                (buffer, shape)
            }
            (Reader::Host, Target::Buffer(buffer)) => (buffer, Shape::Words),
            (Reader::Host, Target::Image(_)) => {
                return Err(ScenarioError::NotSupported(
                    "images cannot be read by the host".into(),
                ));
            }
        };

        ctx.verify(token, buffer, shape, &self.expected)
    }

    /// Both operations in one command buffer, separated by a pipeline barrier.
    fn barrier(&self, ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
        let mut driver = ctx.driver(self.device_queue()?)?;

        if self.pair.write == OpKind::Host {
            self.host_write(ctx)?;
        }

        driver.begin()?;
        self.record_write(&mut driver)?;
        driver.pipeline_barrier(&self.dependency(self.write_scope(), self.read_scope(), None))?;
        self.record_read(&mut driver)?;
        driver.submit(&[], &[])?;
        let token = ctx.wait(&mut driver)?;

        self.verify(ctx, &token)
    }

    /// Both operations in one command buffer, separated by an event.
    fn event(&self, ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
        let event = ctx.resources.create_event()?;
        let mut driver = ctx.driver(self.device_queue()?)?;
        driver.begin()?;

        match (self.pair.write, self.pair.read) {
            (OpKind::Host, _) => {
                // The device waits until the host has written and set the event.
                driver.wait_events(
                    &[event],
                    &self.dependency(self.write_scope(), self.read_scope(), None),
                )?;
                self.record_read(&mut driver)?;
                driver.submit(&[], &[])?;

                self.host_write(ctx)?;

                if ctx.device.fence_status(driver.fence())? {
                    return Ok(Verdict::check(
                        false,
                        "the read completed before the event was set",
                    ));
                }

                ctx.device.set_event(event)?;
                let token = ctx.wait(&mut driver)?;

                self.verify(ctx, &token)
            }
            (_, OpKind::Host) => {
                let write = self.write_scope();
                self.record_write(&mut driver)?;
                driver
                    .pipeline_barrier(&self.dependency(write, self.read_scope(), None))?
                    .set_event(event, write.stages)?
                    .submit(&[], &[])?;

                let token = ctx.wait_event(event)?;
                let verdict = self.verify(ctx, &token)?;
                let _token = ctx.wait(&mut driver)?;

                Ok(verdict)
            }
            _ => {
                let write = self.write_scope();
                self.record_write(&mut driver)?;
                driver
                    .set_event(event, write.stages)?
                    .wait_events(&[event], &self.dependency(write, self.read_scope(), None))?;
                self.record_read(&mut driver)?;
                driver.submit(&[], &[])?;
                let token = ctx.wait(&mut driver)?;

                self.verify(ctx, &token)
            }
        }
    }

    /// The write and the read in separate submissions, ordered by a fence wait on the host or
    /// by a semaphore.
    fn separate_submissions(&self, ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
        let write_queue = self.device_queue()?;
        let read_queue = self.read_queue.unwrap_or(write_queue);
        let transfer = self.ownership_transfer();
        let semaphore = match self.pair.primitive {
            Primitive::Semaphore => Some(ctx.resources.create_semaphore()?),
            _ => None,
        };
        let write = self.write_scope();
        let read = self.read_scope();

        let mut writer = ctx.driver(write_queue)?;
        writer.begin()?;
        self.record_write(&mut writer)?;

        if transfer.is_some() {
            // Release. The layout transition happens here, and the acquire repeats it.
            let release = Scope {
                stages: PipelineStages::empty(),
                access: AccessFlags::empty(),
                layout: read.layout,
            };
            writer.pipeline_barrier(&self.dependency(write, release, transfer))?;
        }

        writer.submit(&[], semaphore.as_slice())?;

        if semaphore.is_none() {
            let _token = ctx.wait(&mut writer)?;
        }

        let mut reader = ctx.driver(read_queue)?;
        reader.begin()?;

        let wait_stages = if self.pair.read == OpKind::Host {
            reader.pipeline_barrier(&self.dependency(
                Scope {
                    stages: PipelineStages::ALL_COMMANDS,
                    access: AccessFlags::MEMORY_WRITE,
                    layout: write.layout,
                },
                read,
                None,
            ))?;

            PipelineStages::ALL_COMMANDS
        } else {
            // Acquire. Only the execution dependency on the read stages is needed in the first
            // scope, since the writes were made available by the fence or the semaphore.
            let acquire = Scope {
                stages: read.stages,
                access: AccessFlags::empty(),
                layout: write.layout,
            };
            reader.pipeline_barrier(&self.dependency(acquire, read, transfer))?;
            self.record_read(&mut reader)?;

            read.stages
        };

        let waits: Vec<SemaphoreWait> = semaphore
            .map(|semaphore| SemaphoreWait {
                semaphore,
                stages: wait_stages,
            })
            .into_iter()
            .collect();
        reader.submit(&waits, &[])?;

        let token = ctx.wait(&mut reader)?;

        if semaphore.is_some() {
            let _token = ctx.wait(&mut writer)?;
        }

        self.verify(ctx, &token)
    }
}

/// Returns every valid pair.
pub(super) fn all_pairs() -> impl Iterator<Item = OperationPair> {
    const TOPOLOGIES: [Topology; 2] = [Topology::SingleQueue, Topology::MultiQueue];
    const PRIMITIVES: [Primitive; 4] = [
        Primitive::Barrier,
        Primitive::Event,
        Primitive::Fence,
        Primitive::Semaphore,
    ];
    const OPS: [OpKind; 3] = [OpKind::Compute, OpKind::Transfer, OpKind::Host];
    const RESOURCES: [ResourceKind; 2] = [ResourceKind::Buffer, ResourceKind::Image];

    TOPOLOGIES.into_iter().flat_map(|topology| {
        PRIMITIVES.into_iter().flat_map(move |primitive| {
            OPS.into_iter().flat_map(move |write| {
                OPS.into_iter().flat_map(move |read| {
                    RESOURCES
                        .into_iter()
                        .map(move |resource| OperationPair {
                            topology,
                            primitive,
                            write,
                            read,
                            resource,
                        })
                        .filter(OperationPair::is_valid)
                })
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::soft::{Scheduling, SoftDevice, SoftDeviceCreateInfo},
        scenario::{run, Scenario, ScenarioConfig, ScenarioKind},
    };

    fn scenarios(filter: impl Fn(&OperationPair) -> bool) -> Vec<Scenario> {
        all_pairs()
            .filter(filter)
            .map(|pair| Scenario::new(pair.name(), ScenarioKind::Operation(pair)))
            .collect()
    }

    #[test]
    fn invalid_pairs_are_not_generated() {
        let pairs: Vec<_> = all_pairs().collect();
        assert_eq!(pairs.len(), 60);

        assert!(pairs.iter().all(|pair| !(pair.write == OpKind::Host
            && pair.read == OpKind::Host)));
        assert!(pairs.iter().all(|pair| pair.topology == Topology::SingleQueue
            || matches!(pair.primitive, Primitive::Fence | Primitive::Semaphore)));

        let host_fence = OperationPair {
            topology: Topology::SingleQueue,
            primitive: Primitive::Fence,
            write: OpKind::Host,
            read: OpKind::Compute,
            resource: ResourceKind::Buffer,
        };
        assert!(!host_fence.is_valid());
        assert_eq!(host_fence.validate().unwrap_err().context, "primitive");
    }

    #[test]
    fn names() {
        let pair = OperationPair {
            topology: Topology::MultiQueue,
            primitive: Primitive::Semaphore,
            write: OpKind::Transfer,
            read: OpKind::Compute,
            resource: ResourceKind::Image,
        };
        assert_eq!(pair.name(), "multi_queue/semaphore/transfer_compute_image");
    }

    #[test]
    fn every_pair_passes() {
        let device = soft_device!();
        let report = run(&device, &scenarios(|_| true), &ScenarioConfig::default());

        assert!(report.is_success(), "{}", report);
        assert_eq!(report.passed(), 60);
    }

    #[test]
    fn adversarial_scheduling() {
        crate::tests::init_tracing();
        let device = SoftDevice::new(SoftDeviceCreateInfo {
            scheduling: Scheduling::Adversarial,
            ..Default::default()
        })
        .unwrap();
        let scenarios = scenarios(|pair| pair.topology == Topology::MultiQueue);

        let report = run(&device, &scenarios, &ScenarioConfig::default());
        assert_eq!(report.passed(), scenarios.len(), "{}", report);
    }

    #[test]
    fn ignored_layout_transitions_break_images() {
        let device = faulty_device!(ignore_layout_transitions: true);
        let scenarios = scenarios(|pair| {
            pair.resource == ResourceKind::Image && pair.primitive == Primitive::Barrier
        });

        let report = run(&device, &scenarios, &ScenarioConfig::default());
        assert_eq!(report.failed(), scenarios.len(), "{}", report);
    }
}
