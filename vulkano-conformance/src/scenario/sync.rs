use super::{buffer_dependency, host_read_dependency, host_write_dependency, Context, ScenarioError};
use crate::{
    buffer::{Buffer, BufferUsage},
    command_buffer::{DescriptorSet, WriteDescriptorSet},
    device::{DeviceError, Queue, QueueFlags, SemaphoreWait, SubmitInfo},
    memory::MemoryRequirement,
    oracle::{Shape, Verdict},
    reference,
    shader::{templates, ShaderModule},
    sync::{
        AccessFlags, BufferMemoryBarrier, DependencyInfo, PipelineStages,
        QueueFamilyOwnershipTransfer,
    },
    ValidationError,
};
use std::time::Duration;

const NUM_VALUES: u32 = 1024;
const LOCAL_SIZE: [u32; 3] = [64, 1, 1];
const GROUP_COUNTS: [u32; 3] = [NUM_VALUES / LOCAL_SIZE[0], 1, 1];

const FENCE_SEED: u32 = 0x5eed_0f01;
const SEMAPHORE_SEED: u32 = 0x5eed_5e4a;
const EVENT_SEED: u32 = 0x5eed_e7e0;

/// How long to wait on a fence that is never signaled.
const UNSIGNALED_WAIT: Duration = Duration::from_millis(1);

/// Scenarios that exercise one synchronization primitive on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncKind {
    /// An empty submission signals a fence.
    SmokeFences,

    /// Two empty submissions on one queue are chained by a semaphore.
    SmokeSemaphores,

    /// An event is set and reset from the host.
    SmokeEvents,

    /// A fence signals the completion of a dispatch, and can be reset.
    FenceOne,

    /// Two submissions on different queues are waited on together.
    FenceMulti,

    /// A submission without command buffers signals its fence.
    FenceEmptySubmit,

    /// Waiting on a fence that nothing will signal times out.
    FenceUnsignaledWait,

    /// A fill and a copy on one queue, ordered by a semaphore.
    SemaphoreOneQueue,

    /// A fill and a copy on two queues, ordered by a semaphore.
    SemaphoreMultiQueue,

    /// A fill followed by `length - 1` copies, each ordered after the previous one by a
    /// semaphore, alternating between queues.
    SemaphoreChain { length: u32 },

    /// The host sets an event and the device resets it.
    EventHostSetReset,

    /// The device sets an event after a dispatch, and the host polls it.
    EventDeviceSetHostWait,

    /// The device waits for an event that the host sets once it has written the input.
    EventHostSetDeviceWait,

    /// One submission sets an event after a dispatch, and a later one waits for it.
    EventDeviceSetDeviceWait,
}

impl SyncKind {
    pub(super) fn validate(&self) -> Result<(), Box<ValidationError>> {
        match *self {
            SyncKind::SemaphoreChain { length: 0 } => {
                Err(ValidationError::new("length", "is zero"))
            }
            _ => Ok(()),
        }
    }

    pub(super) fn execute(&self, ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
        match *self {
            SyncKind::SmokeFences => smoke_fences(ctx),
            SyncKind::SmokeSemaphores => smoke_semaphores(ctx),
            SyncKind::SmokeEvents => smoke_events(ctx),
            SyncKind::FenceOne => fence_one(ctx),
            SyncKind::FenceMulti => fence_multi(ctx),
            SyncKind::FenceEmptySubmit => fence_empty_submit(ctx),
            SyncKind::FenceUnsignaledWait => fence_unsignaled_wait(ctx),
            SyncKind::SemaphoreOneQueue => semaphore_chain(ctx, 2, 1),
            SyncKind::SemaphoreMultiQueue => semaphore_chain(ctx, 2, 2),
            SyncKind::SemaphoreChain { length } => {
                let second_queue = compute_queue(ctx)
                    .and_then(|first| ctx.queue(QueueFlags::COMPUTE, &[first]));
                let queue_count = if second_queue.is_ok() { 2 } else { 1 };

                semaphore_chain(ctx, length, queue_count)
            }
            SyncKind::EventHostSetReset => event_host_set_reset(ctx),
            SyncKind::EventDeviceSetHostWait => event_device_set_host_wait(ctx),
            SyncKind::EventHostSetDeviceWait => event_host_set_device_wait(ctx),
            SyncKind::EventDeviceSetDeviceWait => event_device_set_device_wait(ctx),
        }
    }
}

/// The shaders and buffers of a fill followed by a copy.
struct FillAndCopy {
    fill: ShaderModule,
    copy: ShaderModule,
    seed: u32,
}

impl FillAndCopy {
    fn new(ctx: &mut Context<'_, '_>, seed: u32) -> Result<Self, ScenarioError> {
        Ok(FillAndCopy {
            fill: ctx.shader(templates::fill_buffer(seed, NUM_VALUES, LOCAL_SIZE))?,
            copy: ctx.shader(templates::copy_buffer(NUM_VALUES, LOCAL_SIZE))?,
            seed,
        })
    }

    fn fill_set(&self, dst: Buffer) -> Result<DescriptorSet, ScenarioError> {
        Ok(DescriptorSet::new([WriteDescriptorSet::storage_buffer(0, dst)])?)
    }

    fn copy_set(&self, src: Buffer, dst: Buffer) -> Result<DescriptorSet, ScenarioError> {
        Ok(DescriptorSet::new([
            WriteDescriptorSet::storage_buffer(0, src),
            WriteDescriptorSet::storage_buffer(1, dst),
        ])?)
    }

    fn expected(&self) -> Vec<u32> {
        reference::pattern_words(self.seed, NUM_VALUES as usize)
    }
}

fn compute_queue(ctx: &Context<'_, '_>) -> Result<Queue, ScenarioError> {
    ctx.queue(QueueFlags::COMPUTE, &[])
}

fn storage_buffer(ctx: &mut Context<'_, '_>, host_visible: bool) -> Result<Buffer, ScenarioError> {
    let memory_requirement = if host_visible {
        MemoryRequirement::HOST_VISIBLE
    } else {
        MemoryRequirement::ANY
    };

    ctx.buffer(
        NUM_VALUES as usize,
        BufferUsage::STORAGE_BUFFER,
        memory_requirement,
    )
}

fn compute_to_host(buffer: Buffer) -> DependencyInfo {
    host_read_dependency(
        &[buffer],
        PipelineStages::COMPUTE_SHADER,
        AccessFlags::SHADER_STORAGE_WRITE,
    )
}

/// The ownership transfer of a buffer written on `src` and read on `dst`, if their families
/// differ.
fn ownership_transfer(src: Queue, dst: Queue) -> Option<QueueFamilyOwnershipTransfer> {
    (src.family_index != dst.family_index).then_some(QueueFamilyOwnershipTransfer {
        src_index: src.family_index,
        dst_index: dst.family_index,
    })
}

/// Releases `buffer` after a dispatch wrote it. Availability comes from the semaphore signal.
fn release(buffer: Buffer, transfer: QueueFamilyOwnershipTransfer) -> DependencyInfo {
    buffer_dependency(BufferMemoryBarrier {
        src_stages: PipelineStages::COMPUTE_SHADER,
        src_access: AccessFlags::SHADER_STORAGE_WRITE,
        dst_stages: PipelineStages::empty(),
        dst_access: AccessFlags::empty(),
        queue_family_ownership_transfer: Some(transfer),
        ..BufferMemoryBarrier::buffer(buffer)
    })
}

/// Acquires `buffer` before a dispatch reads it, after a semaphore wait on the compute stage.
fn acquire(buffer: Buffer, transfer: QueueFamilyOwnershipTransfer) -> DependencyInfo {
    buffer_dependency(BufferMemoryBarrier {
        src_stages: PipelineStages::COMPUTE_SHADER,
        src_access: AccessFlags::empty(),
        dst_stages: PipelineStages::COMPUTE_SHADER,
        dst_access: AccessFlags::SHADER_STORAGE_READ,
        queue_family_ownership_transfer: Some(transfer),
        ..BufferMemoryBarrier::buffer(buffer)
    })
}

fn smoke_fences(ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
    let queue = compute_queue(ctx)?;
    let fence = ctx.resources.create_fence(false)?;

    ctx.device.submit(queue, &[], Some(fence))?;
    ctx.device
        .wait_for_fences(&[fence], ctx.config.fence_timeout)?;

    Ok(Verdict::check(
        ctx.device.fence_status(fence)?,
        "the fence is not signaled after the wait",
    ))
}

fn smoke_semaphores(ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
    let queue = compute_queue(ctx)?;
    let semaphore = ctx.resources.create_semaphore()?;
    let mut first = ctx.driver(queue)?;
    let mut second = ctx.driver(queue)?;

    first.begin()?.submit(&[], &[semaphore])?;
    second.begin()?.submit(
        &[SemaphoreWait {
            semaphore,
            stages: PipelineStages::ALL_COMMANDS,
        }],
        &[],
    )?;

    let _token = ctx.wait(&mut first)?;
    let _token = ctx.wait(&mut second)?;

    Ok(Verdict::Pass)
}

fn smoke_events(ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
    let event = ctx.resources.create_event()?;
    let device = ctx.device;

    let initial = device.event_status(event)?;
    device.set_event(event)?;
    let set = device.event_status(event)?;
    device.reset_event(event)?;
    let reset = device.event_status(event)?;

    Ok(Verdict::check(!initial, "a new event is set")
        .and(Verdict::check(set, "the event is not set after setting it"))
        .and(Verdict::check(!reset, "the event is set after resetting it")))
}

fn fence_one(ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
    let queue = compute_queue(ctx)?;
    let shaders = FillAndCopy::new(ctx, FENCE_SEED)?;
    let output = storage_buffer(ctx, true)?;
    let mut driver = ctx.driver(queue)?;

    driver
        .begin()?
        .dispatch(&shaders.fill, &shaders.fill_set(output)?, GROUP_COUNTS)?
        .pipeline_barrier(&compute_to_host(output))?
        .submit(&[], &[])?;
    let token = ctx.wait(&mut driver)?;

    let signaled = ctx.device.fence_status(driver.fence())?;
    ctx.device.reset_fences(&[driver.fence()])?;
    let reset = ctx.device.fence_status(driver.fence())?;

    Ok(Verdict::check(signaled, "the fence is not signaled after the wait")
        .and(Verdict::check(!reset, "the fence is signaled after resetting it"))
        .and(ctx.verify(&token, output, Shape::Words, &shaders.expected())?))
}

fn fence_multi(ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
    let first_queue = compute_queue(ctx)?;
    let second_queue = ctx
        .queue(QueueFlags::COMPUTE, &[first_queue])
        .unwrap_or(first_queue);
    let shaders = [
        FillAndCopy::new(ctx, FENCE_SEED)?,
        FillAndCopy::new(ctx, !FENCE_SEED)?,
    ];
    let outputs = [storage_buffer(ctx, true)?, storage_buffer(ctx, true)?];
    let mut drivers = [ctx.driver(first_queue)?, ctx.driver(second_queue)?];

    for ((driver, shaders), &output) in drivers.iter_mut().zip(&shaders).zip(&outputs) {
        driver
            .begin()?
            .dispatch(&shaders.fill, &shaders.fill_set(output)?, GROUP_COUNTS)?
            .pipeline_barrier(&compute_to_host(output))?
            .submit(&[], &[])?;
    }

    let fences = drivers.each_ref().map(|driver| driver.fence());
    ctx.device
        .wait_for_fences(&fences, ctx.config.fence_timeout)?;

    let mut verdict = Verdict::Pass;

    for ((driver, shaders), &output) in drivers.iter_mut().zip(&shaders).zip(&outputs) {
        let token = ctx.wait(driver)?;
        verdict = verdict.and(ctx.verify(&token, output, Shape::Words, &shaders.expected())?);
    }

    Ok(verdict)
}

fn fence_empty_submit(ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
    let queue = compute_queue(ctx)?;
    let fence = ctx.resources.create_fence(false)?;

    ctx.device
        .submit(queue, &[SubmitInfo::default()], Some(fence))?;
    ctx.device
        .wait_for_fences(&[fence], ctx.config.fence_timeout)?;

    Ok(Verdict::check(
        ctx.device.fence_status(fence)?,
        "the fence of an empty submission is not signaled",
    ))
}

fn fence_unsignaled_wait(ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
    let fence = ctx.resources.create_fence(false)?;

    match ctx.device.wait_for_fences(&[fence], UNSIGNALED_WAIT) {
        Err(DeviceError::Timeout) => Ok(Verdict::Pass),
        Ok(()) => Ok(Verdict::check(
            false,
            "waiting on a fence that was never submitted succeeded",
        )),
        Err(err) => Err(err.into()),
    }
}

/// Fills a buffer, then copies it `length - 1` times, each copy in its own submission waiting
/// on a semaphore signaled by the previous one. Submissions alternate between `queue_count`
/// queues.
fn semaphore_chain(
    ctx: &mut Context<'_, '_>,
    length: u32,
    queue_count: usize,
) -> Result<Verdict, ScenarioError> {
    let mut queues: Vec<Queue> = Vec::with_capacity(queue_count);

    while queues.len() < queue_count {
        queues.push(ctx.queue(QueueFlags::COMPUTE, &queues)?);
    }

    let shaders = FillAndCopy::new(ctx, SEMAPHORE_SEED)?;
    let buffers = (0..length)
        .map(|index| storage_buffer(ctx, index + 1 == length))
        .collect::<Result<Vec<_>, _>>()?;
    let semaphores = (1..length)
        .map(|_| ctx.resources.create_semaphore())
        .collect::<Result<Vec<_>, _>>()?;

    let mut drivers = Vec::with_capacity(length as usize);

    let queue_at = |index: usize| queues[index % queues.len()];

    for (index, &buffer) in buffers.iter().enumerate() {
        let queue = queue_at(index);
        let mut driver = ctx.driver(queue)?;
        driver.begin()?;

        if index == 0 {
            driver.dispatch(&shaders.fill, &shaders.fill_set(buffer)?, GROUP_COUNTS)?;
        } else {
            let input = buffers[index - 1];

            if let Some(transfer) = ownership_transfer(queue_at(index - 1), queue) {
                driver.pipeline_barrier(&acquire(input, transfer))?;
            }

            driver.dispatch(
                &shaders.copy,
                &shaders.copy_set(input, buffer)?,
                GROUP_COUNTS,
            )?;
        }

        if index + 1 == buffers.len() {
            driver.pipeline_barrier(&compute_to_host(buffer))?;
        } else if let Some(transfer) = ownership_transfer(queue, queue_at(index + 1)) {
            driver.pipeline_barrier(&release(buffer, transfer))?;
        }

        let waits: Vec<SemaphoreWait> = index
            .checked_sub(1)
            .map(|previous| SemaphoreWait {
                semaphore: semaphores[previous],
                stages: PipelineStages::COMPUTE_SHADER,
            })
            .into_iter()
            .collect();
        let signals: Vec<_> = semaphores.get(index).copied().into_iter().collect();

        driver.submit(&waits, &signals)?;
        drivers.push(driver);
    }

    let mut token = None;

    for driver in &mut drivers {
        token = Some(ctx.wait(driver)?);
    }

    match (token, buffers.last()) {
        (Some(token), Some(&last)) => ctx.verify(&token, last, Shape::Words, &shaders.expected()),
        _ => Ok(Verdict::Pass),
    }
}

fn event_host_set_reset(ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
    let queue = compute_queue(ctx)?;
    let event = ctx.resources.create_event()?;
    ctx.device.set_event(event)?;

    let mut driver = ctx.driver(queue)?;
    driver
        .begin()?
        .reset_event(event, PipelineStages::COMPUTE_SHADER)?
        .submit(&[], &[])?;
    let _token = ctx.wait(&mut driver)?;

    Ok(Verdict::check(
        !ctx.device.event_status(event)?,
        "the event is still set after the device reset it",
    ))
}

fn event_device_set_host_wait(ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
    let queue = compute_queue(ctx)?;
    let shaders = FillAndCopy::new(ctx, EVENT_SEED)?;
    let output = storage_buffer(ctx, true)?;
    let event = ctx.resources.create_event()?;

    let mut driver = ctx.driver(queue)?;
    driver
        .begin()?
        .dispatch(&shaders.fill, &shaders.fill_set(output)?, GROUP_COUNTS)?
        .pipeline_barrier(&compute_to_host(output))?
        .set_event(event, PipelineStages::COMPUTE_SHADER)?
        .submit(&[], &[])?;

    let token = ctx.wait_event(event)?;
    let verdict = ctx.verify(&token, output, Shape::Words, &shaders.expected())?;
    let _token = ctx.wait(&mut driver)?;

    Ok(verdict)
}

fn event_host_set_device_wait(ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
    let queue = compute_queue(ctx)?;
    let shaders = FillAndCopy::new(ctx, EVENT_SEED)?;
    let input = storage_buffer(ctx, true)?;
    let output = storage_buffer(ctx, true)?;
    let event = ctx.resources.create_event()?;

    let mut driver = ctx.driver(queue)?;
    driver
        .begin()?
        .wait_events(
            &[event],
            &host_write_dependency(
                &[input],
                PipelineStages::COMPUTE_SHADER,
                AccessFlags::SHADER_STORAGE_READ,
            ),
        )?
        .dispatch(&shaders.copy, &shaders.copy_set(input, output)?, GROUP_COUNTS)?
        .pipeline_barrier(&compute_to_host(output))?
        .submit(&[], &[])?;

    // The input is only written once the device is already waiting for the event.
    let expected = shaders.expected();
    ctx.write(input, &expected)?;

    if ctx.device.fence_status(driver.fence())? {
        return Ok(Verdict::check(
            false,
            "the submission completed before the event was set",
        ));
    }

    ctx.device.set_event(event)?;
    let token = ctx.wait(&mut driver)?;

    ctx.verify(&token, output, Shape::Words, &expected)
}

fn event_device_set_device_wait(ctx: &mut Context<'_, '_>) -> Result<Verdict, ScenarioError> {
    let queue = compute_queue(ctx)?;
    let shaders = FillAndCopy::new(ctx, EVENT_SEED)?;
    let intermediate = storage_buffer(ctx, false)?;
    let output = storage_buffer(ctx, true)?;
    let event = ctx.resources.create_event()?;

    let mut producer = ctx.driver(queue)?;
    producer
        .begin()?
        .dispatch(&shaders.fill, &shaders.fill_set(intermediate)?, GROUP_COUNTS)?
        .set_event(event, PipelineStages::COMPUTE_SHADER)?
        .submit(&[], &[])?;

    let mut consumer = ctx.driver(queue)?;
    consumer
        .begin()?
        .wait_events(
            &[event],
            &buffer_dependency(BufferMemoryBarrier {
                src_stages: PipelineStages::COMPUTE_SHADER,
                src_access: AccessFlags::SHADER_STORAGE_WRITE,
                dst_stages: PipelineStages::COMPUTE_SHADER,
                dst_access: AccessFlags::SHADER_STORAGE_READ,
                ..BufferMemoryBarrier::buffer(intermediate)
            }),
        )?
        .dispatch(
            &shaders.copy,
            &shaders.copy_set(intermediate, output)?,
            GROUP_COUNTS,
        )?
        .pipeline_barrier(&compute_to_host(output))?
        .submit(&[], &[])?;

    let _token = ctx.wait(&mut producer)?;
    let token = ctx.wait(&mut consumer)?;

    ctx.verify(&token, output, Shape::Words, &shaders.expected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::{
            soft::{Scheduling, SoftDevice, SoftDeviceCreateInfo},
            QueueFamilyProperties,
        },
        scenario::{run, Outcome, Scenario, ScenarioConfig, ScenarioKind},
    };

    fn outcome(device: &dyn crate::device::Device, kind: SyncKind) -> Outcome {
        let scenario = Scenario::new("sync", ScenarioKind::Sync(kind));

        run(device, &[scenario], &ScenarioConfig::default())
            .results
            .remove(0)
            .outcome
    }

    #[test]
    fn every_primitive_passes() {
        let device = soft_device!();

        for kind in [
            SyncKind::SmokeFences,
            SyncKind::SmokeSemaphores,
            SyncKind::SmokeEvents,
            SyncKind::FenceOne,
            SyncKind::FenceMulti,
            SyncKind::FenceEmptySubmit,
            SyncKind::FenceUnsignaledWait,
            SyncKind::SemaphoreOneQueue,
            SyncKind::SemaphoreMultiQueue,
            SyncKind::SemaphoreChain { length: 5 },
            SyncKind::EventHostSetReset,
            SyncKind::EventDeviceSetHostWait,
            SyncKind::EventHostSetDeviceWait,
            SyncKind::EventDeviceSetDeviceWait,
        ] {
            assert_eq!(outcome(&device, kind), Outcome::Pass, "{:?}", kind);
        }
    }

    #[test]
    fn empty_chain_is_invalid() {
        assert!(SyncKind::SemaphoreChain { length: 0 }.validate().is_err());
        assert!(SyncKind::SemaphoreChain { length: 1 }.validate().is_ok());
    }

    #[test]
    fn ignored_semaphore_waits_are_detected() {
        let device = faulty_device!(ignore_semaphore_waits: true);

        assert!(matches!(
            outcome(&device, SyncKind::SemaphoreChain { length: 3 }),
            Outcome::Fail(_),
        ));
    }

    fn device_with_families(
        families: &[(QueueFlags, u32)],
        scheduling: Scheduling,
    ) -> SoftDevice {
        crate::tests::init_tracing();

        SoftDevice::new(SoftDeviceCreateInfo {
            queue_families: families
                .iter()
                .map(|&(queue_flags, queue_count)| QueueFamilyProperties {
                    queue_flags,
                    queue_count,
                })
                .collect(),
            scheduling,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn semaphores_across_queue_families() {
        // The universal family has a single queue, so the second compute queue is in another
        // family and every buffer changes owner between submissions.
        let families = [
            (QueueFlags::COMPUTE | QueueFlags::TRANSFER, 1),
            (QueueFlags::COMPUTE, 1),
        ];

        for scheduling in [Scheduling::InOrder, Scheduling::Adversarial] {
            let device = device_with_families(&families, scheduling);

            for kind in [
                SyncKind::SemaphoreMultiQueue,
                SyncKind::SemaphoreChain { length: 4 },
                SyncKind::SemaphoreChain { length: 8 },
                SyncKind::FenceMulti,
            ] {
                assert_eq!(
                    outcome(&device, kind),
                    Outcome::Pass,
                    "{:?} with {:?}",
                    kind,
                    scheduling,
                );
            }
        }
    }

    #[test]
    fn missing_second_queue_skips() {
        let device = device_with_families(&[(QueueFlags::COMPUTE, 1)], Scheduling::InOrder);

        assert!(matches!(
            outcome(&device, SyncKind::SemaphoreMultiQueue),
            Outcome::Skip(_),
        ));
        assert_eq!(
            outcome(&device, SyncKind::SemaphoreChain { length: 4 }),
            Outcome::Pass,
        );
    }
}
