//! Synchronization between operations on the device and the host.
//!
//! Operations on a queue are not ordered with each other unless a dependency orders them, and
//! writes to memory are not seen by later reads unless a dependency makes them *available* and
//! then *visible* to the reading stage and access type. Dependencies are expressed here as
//! [`DependencyInfo`] values, which are recorded into command buffers as pipeline barriers or
//! as part of waiting on events. Fences order device work with the host, and semaphores order
//! work between queues; those are used through the [`Device`] directly.
//!
//! [`Device`]: crate::device::Device

pub use self::{
    barrier::{
        BufferMemoryBarrier, DependencyInfo, DependencyInfoFields1Vk, ImageMemoryBarrier,
        MemoryBarrier, QueueFamilyOwnershipTransfer,
    },
    pipeline::{AccessFlags, DependencyFlags, PipelineStages},
};

mod barrier;
mod pipeline;
