//! Sequencing of one command buffer from recording to completion.
//!
//! A [`Driver`] moves through `Idle`, `Recording`, `Submitted` and `Completed`, in that order
//! and only in that order. Commands can only be recorded while recording, the submission always
//! signals a fence of the driver, and [`wait`] on that fence is what produces the
//! [`CompletionToken`] the oracle asks for before reading results back.
//!
//! [`wait`]: Driver::wait

use crate::{
    buffer::Buffer,
    command_buffer::{BufferCopy, DescriptorSet, RecordingCommandBuffer},
    device::{Device, DeviceError, Queue, QueueFlags, SemaphoreWait, SubmitInfo},
    image::{Image, ImageLayout},
    oracle::CompletionToken,
    resource::Resources,
    shader::ShaderModule,
    sync::{DependencyInfo, PipelineStages},
    ValidationError,
};
use ash::vk;
use smallvec::smallvec;
use std::{error::Error, fmt, sync::Arc, time::Duration};
use tracing::{debug, trace};

/// The states of a [`Driver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DriverState {
    Idle,
    Recording,
    Submitted,
    Completed,
}

enum Stage {
    Idle,
    Recording(RecordingCommandBuffer),
    Submitted,
    Completed,
}

impl Stage {
    fn state(&self) -> DriverState {
        match self {
            Stage::Idle => DriverState::Idle,
            Stage::Recording(_) => DriverState::Recording,
            Stage::Submitted => DriverState::Submitted,
            Stage::Completed => DriverState::Completed,
        }
    }
}

/// Records, submits and waits for one command buffer on one queue.
pub struct Driver<'d> {
    device: &'d dyn Device,
    queue: Queue,
    queue_flags: QueueFlags,
    fence: vk::Fence,
    stage: Stage,
}

impl<'d> Driver<'d> {
    /// Creates a driver for `queue`. Its fence is owned by `resources`.
    pub fn new(resources: &mut Resources<'d>, queue: Queue) -> Result<Self, DriverError> {
        let device = resources.device();
        let queue_flags = device
            .queue_family_properties()
            .get(queue.family_index as usize)
            .filter(|properties| queue.index < properties.queue_count)
            .map(|properties| properties.queue_flags)
            .ok_or(DriverError::Device(DeviceError::InvalidQueue(queue)))?;
        let fence = resources.create_fence(false)?;

        Ok(Driver {
            device,
            queue,
            queue_flags,
            fence,
            stage: Stage::Idle,
        })
    }

    /// Returns the queue the driver submits to.
    #[inline]
    pub fn queue(&self) -> Queue {
        self.queue
    }

    /// Returns the fence that the submission signals.
    #[inline]
    pub fn fence(&self) -> vk::Fence {
        self.fence
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> DriverState {
        self.stage.state()
    }

    fn invalid_state(&self, operation: &'static str) -> DriverError {
        DriverError::InvalidState {
            operation,
            state: self.state(),
        }
    }

    /// Starts recording.
    pub fn begin(&mut self) -> Result<&mut Self, DriverError> {
        if !matches!(self.stage, Stage::Idle) {
            return Err(self.invalid_state("begin"));
        }

        self.stage = Stage::Recording(RecordingCommandBuffer::new(
            self.queue.family_index,
            self.queue_flags,
        ));
        trace!(queue = ?self.queue, "began recording");

        Ok(self)
    }

    fn record(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&mut RecordingCommandBuffer) -> Result<(), Box<ValidationError>>,
    ) -> Result<&mut Self, DriverError> {
        let Stage::Recording(builder) = &mut self.stage else {
            return Err(self.invalid_state(operation));
        };

        f(builder).map_err(|err| DriverError::Validation(err.add_context(operation)))?;

        Ok(self)
    }

    pub fn dispatch(
        &mut self,
        shader_module: &ShaderModule,
        descriptor_set: &DescriptorSet,
        group_counts: [u32; 3],
    ) -> Result<&mut Self, DriverError> {
        self.record("dispatch", |builder| {
            builder
                .dispatch(shader_module, descriptor_set, group_counts)
                .map(|_| ())
        })
    }

    pub fn copy_buffer(
        &mut self,
        src: Buffer,
        dst: Buffer,
        region: BufferCopy,
    ) -> Result<&mut Self, DriverError> {
        self.record("copy_buffer", |builder| {
            builder.copy_buffer(src, dst, region).map(|_| ())
        })
    }

    pub fn copy_buffer_to_image(
        &mut self,
        src: Buffer,
        dst: Image,
        dst_layout: ImageLayout,
    ) -> Result<&mut Self, DriverError> {
        self.record("copy_buffer_to_image", |builder| {
            builder.copy_buffer_to_image(src, dst, dst_layout).map(|_| ())
        })
    }

    pub fn copy_image_to_buffer(
        &mut self,
        src: Image,
        src_layout: ImageLayout,
        dst: Buffer,
    ) -> Result<&mut Self, DriverError> {
        self.record("copy_image_to_buffer", |builder| {
            builder.copy_image_to_buffer(src, src_layout, dst).map(|_| ())
        })
    }

    pub fn pipeline_barrier(
        &mut self,
        dependency_info: &DependencyInfo,
    ) -> Result<&mut Self, DriverError> {
        self.record("pipeline_barrier", |builder| {
            builder.pipeline_barrier(dependency_info).map(|_| ())
        })
    }

    pub fn set_event(
        &mut self,
        event: vk::Event,
        stages: PipelineStages,
    ) -> Result<&mut Self, DriverError> {
        self.record("set_event", |builder| {
            builder.set_event(event, stages).map(|_| ())
        })
    }

    pub fn reset_event(
        &mut self,
        event: vk::Event,
        stages: PipelineStages,
    ) -> Result<&mut Self, DriverError> {
        self.record("reset_event", |builder| {
            builder.reset_event(event, stages).map(|_| ())
        })
    }

    pub fn wait_events(
        &mut self,
        events: &[vk::Event],
        dependency_info: &DependencyInfo,
    ) -> Result<&mut Self, DriverError> {
        self.record("wait_events", |builder| {
            builder.wait_events(events, dependency_info).map(|_| ())
        })
    }

    /// Ends recording and submits the command buffer, waiting on `wait_semaphores` first and
    /// signaling `signal_semaphores` and the fence of the driver afterwards.
    ///
    /// If the device rejects the submission, the recorded commands are dropped and the driver
    /// returns to the idle state.
    pub fn submit(
        &mut self,
        wait_semaphores: &[SemaphoreWait],
        signal_semaphores: &[vk::Semaphore],
    ) -> Result<&mut Self, DriverError> {
        let builder = match std::mem::replace(&mut self.stage, Stage::Submitted) {
            Stage::Recording(builder) => builder,
            stage => {
                self.stage = stage;
                return Err(self.invalid_state("submit"));
            }
        };

        let submit_info = SubmitInfo {
            wait_semaphores: wait_semaphores.iter().copied().collect(),
            command_buffers: smallvec![Arc::new(builder.end())],
            signal_semaphores: signal_semaphores.iter().copied().collect(),
            ..Default::default()
        };

        if let Err(err) = self
            .device
            .submit(self.queue, &[submit_info], Some(self.fence))
        {
            self.stage = Stage::Idle;
            return Err(err.into());
        }

        debug!(
            queue = ?self.queue,
            waits = wait_semaphores.len(),
            signals = signal_semaphores.len(),
            "submitted command buffer",
        );

        Ok(self)
    }

    /// Blocks until the submission has completed, or until `timeout` elapses.
    ///
    /// A timeout leaves the driver in the submitted state.
    pub fn wait(&mut self, timeout: Duration) -> Result<CompletionToken, DriverError> {
        if !matches!(self.stage, Stage::Submitted) {
            return Err(self.invalid_state("wait"));
        }

        self.device.wait_for_fences(&[self.fence], timeout)?;
        self.stage = Stage::Completed;
        trace!(queue = ?self.queue, "submission completed");

        Ok(CompletionToken::new())
    }
}

/// Error that can happen when using a [`Driver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverError {
    /// The operation is not allowed in the current state.
    InvalidState {
        operation: &'static str,
        state: DriverState,
    },

    /// A command was not valid.
    Validation(Box<ValidationError>),

    /// The device returned an error.
    Device(DeviceError),
}

impl Error for DriverError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidState { .. } => None,
            Self::Validation(err) => Some(err.as_ref()),
            Self::Device(err) => Some(err),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState { operation, state } => write!(
                f,
                "`{}` is not allowed in the {:?} state",
                operation, state,
            ),
            Self::Validation(_) => write!(f, "a recorded command is not valid"),
            Self::Device(_) => write!(f, "the device returned an error"),
        }
    }
}

impl From<DeviceError> for DriverError {
    fn from(err: DeviceError) -> Self {
        Self::Device(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::templates;

    const QUEUE: Queue = Queue {
        family_index: 0,
        index: 0,
    };

    #[test]
    fn state_machine() {
        let device = soft_device!();
        let mut resources = Resources::new(&device);
        let shader = resources.create_shader_module(templates::empty()).unwrap();
        let descriptor_set = DescriptorSet::new([]).unwrap();
        let mut driver = Driver::new(&mut resources, QUEUE).unwrap();

        assert_eq!(driver.state(), DriverState::Idle);
        assert!(matches!(
            driver.dispatch(&shader, &descriptor_set, [1, 1, 1]),
            Err(DriverError::InvalidState {
                operation: "dispatch",
                state: DriverState::Idle,
            }),
        ));
        assert!(matches!(
            driver.wait(Duration::from_secs(1)),
            Err(DriverError::InvalidState { .. }),
        ));

        driver
            .begin()
            .unwrap()
            .dispatch(&shader, &descriptor_set, [1, 1, 1])
            .unwrap();
        assert_eq!(driver.state(), DriverState::Recording);
        assert!(matches!(driver.begin(), Err(DriverError::InvalidState { .. })));

        driver.submit(&[], &[]).unwrap();
        assert_eq!(driver.state(), DriverState::Submitted);
        assert!(matches!(
            driver.submit(&[], &[]),
            Err(DriverError::InvalidState { .. }),
        ));

        let _token = driver.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(driver.state(), DriverState::Completed);
        assert!(matches!(driver.begin(), Err(DriverError::InvalidState { .. })));
    }

    #[test]
    fn invalid_commands_are_reported() {
        let device = soft_device!();
        let mut resources = Resources::new(&device);
        let shader = resources.create_shader_module(templates::empty()).unwrap();
        let mut driver = Driver::new(&mut resources, QUEUE).unwrap();
        driver.begin().unwrap();

        let err = driver
            .dispatch(&shader, &DescriptorSet::new([]).unwrap(), [0, 1, 1])
            .err()
            .unwrap();
        let DriverError::Validation(err) = err else {
            panic!("unexpected error {:?}", err);
        };
        assert_eq!(err.context, "dispatch.group_counts");
        assert_eq!(driver.state(), DriverState::Recording);
    }

    #[test]
    fn timeout_keeps_the_submission_pending() {
        let device = soft_device!();
        let mut resources = Resources::new(&device);
        let semaphore = resources.create_semaphore().unwrap();
        let mut driver = Driver::new(&mut resources, QUEUE).unwrap();

        driver
            .begin()
            .unwrap()
            .submit(
                &[SemaphoreWait {
                    semaphore,
                    stages: PipelineStages::ALL_COMMANDS,
                }],
                &[],
            )
            .unwrap();

        assert_eq!(
            driver.wait(Duration::from_millis(10)).err(),
            Some(DriverError::Device(DeviceError::Timeout)),
        );
        assert_eq!(driver.state(), DriverState::Submitted);
    }

    #[test]
    fn unknown_queue() {
        let device = soft_device!();
        let mut resources = Resources::new(&device);
        let queue = Queue {
            family_index: 1,
            index: 3,
        };

        assert_eq!(
            Driver::new(&mut resources, queue).err(),
            Some(DriverError::Device(DeviceError::InvalidQueue(queue))),
        );
    }
}
