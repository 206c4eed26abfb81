//! Ownership of the objects a scenario creates.
//!
//! Every scenario creates its objects through one [`Resources`] arena, immediately before it uses
//! them. Buffers and images are created together with the memory that backs them. When the
//! arena is dropped, the objects are destroyed in the reverse order of their creation, and the
//! memory of each buffer or image is freed before the buffer or image itself is destroyed.

use crate::{
    buffer::{Buffer, BufferCreateInfo},
    device::{Device, DeviceError, MemoryRequirements},
    image::{Image, ImageCreateInfo},
    memory::MemoryRequirement,
    shader::{ComputeShader, ShaderModule},
    ValidationError,
};
use ash::vk;
use std::{error::Error, fmt, sync::Arc};
use tracing::{debug, trace};

/// An arena that owns the objects of one scenario.
pub struct Resources<'d> {
    device: &'d dyn Device,
    entries: Vec<Entry>,
}

enum Entry {
    Buffer(vk::Buffer, vk::DeviceMemory),
    Image(vk::Image, vk::DeviceMemory),
    ShaderModule(vk::ShaderModule),
    Fence(vk::Fence),
    Semaphore(vk::Semaphore),
    Event(vk::Event),
}

impl<'d> Resources<'d> {
    /// Creates an empty arena for objects of `device`.
    #[inline]
    pub fn new(device: &'d dyn Device) -> Self {
        Resources {
            device,
            entries: Vec::new(),
        }
    }

    /// Returns the device that the objects belong to.
    #[inline]
    pub fn device(&self) -> &'d dyn Device {
        self.device
    }

    /// Creates a buffer, and binds it to newly allocated memory that satisfies
    /// `create_info.memory_requirement`.
    ///
    /// The contents of the buffer are undefined.
    pub fn create_buffer(
        &mut self,
        create_info: BufferCreateInfo,
    ) -> Result<Buffer, AllocationError> {
        create_info
            .validate()
            .map_err(|err| AllocationError::Validation(err.add_context("create_info")))?;

        let handle = self.device.create_buffer(&create_info)?;

        let memory = self
            .allocate(
                self.device.buffer_memory_requirements(handle),
                create_info.memory_requirement,
            )
            .and_then(|memory| match self.device.bind_buffer_memory(handle, memory) {
                Ok(()) => Ok(memory),
                Err(err) => {
                    self.device.free_memory(memory);
                    Err(err.into())
                }
            });

        let memory = match memory {
            Ok(memory) => memory,
            Err(err) => {
                self.device.destroy_buffer(handle);
                return Err(err);
            }
        };

        debug!(?handle, size = create_info.size, "created buffer");
        self.entries.push(Entry::Buffer(handle, memory));

        Ok(Buffer::new(handle, &create_info))
    }

    /// Creates an image in the [`ImageLayout::Undefined`] layout, and binds it to newly
    /// allocated memory that satisfies `create_info.memory_requirement`.
    ///
    /// [`ImageLayout::Undefined`]: crate::image::ImageLayout::Undefined
    pub fn create_image(
        &mut self,
        create_info: ImageCreateInfo,
    ) -> Result<Image, AllocationError> {
        create_info
            .validate()
            .map_err(|err| AllocationError::Validation(err.add_context("create_info")))?;

        let handle = self.device.create_image(&create_info)?;

        let memory = self
            .allocate(
                self.device.image_memory_requirements(handle),
                create_info.memory_requirement,
            )
            .and_then(|memory| match self.device.bind_image_memory(handle, memory) {
                Ok(()) => Ok(memory),
                Err(err) => {
                    self.device.free_memory(memory);
                    Err(err.into())
                }
            });

        let memory = match memory {
            Ok(memory) => memory,
            Err(err) => {
                self.device.destroy_image(handle);
                return Err(err);
            }
        };

        debug!(?handle, extent = ?create_info.extent, "created image");
        self.entries.push(Entry::Image(handle, memory));

        Ok(Image::new(handle, &create_info))
    }

    fn allocate(
        &self,
        requirements: Result<MemoryRequirements, DeviceError>,
        requirement: MemoryRequirement,
    ) -> Result<vk::DeviceMemory, AllocationError> {
        let requirements = requirements?;
        let memory_type_index = self
            .device
            .find_memory_type(requirements.memory_type_bits, requirement.required_flags())
            .ok_or(AllocationError::Unsupported(requirement))?;

        Ok(self
            .device
            .allocate_memory(requirements.size, memory_type_index)?)
    }

    /// Creates a shader module from `shader`.
    pub fn create_shader_module(
        &mut self,
        shader: ComputeShader,
    ) -> Result<ShaderModule, DeviceError> {
        let handle = self.device.create_shader_module(&shader)?;
        self.entries.push(Entry::ShaderModule(handle));

        Ok(ShaderModule::new(handle, Arc::new(shader)))
    }

    /// Creates a fence, in the signaled state if `signaled` is true.
    pub fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence, DeviceError> {
        let fence = self.device.create_fence(signaled)?;
        self.entries.push(Entry::Fence(fence));

        Ok(fence)
    }

    /// Creates a binary semaphore in the unsignaled state.
    pub fn create_semaphore(&mut self) -> Result<vk::Semaphore, DeviceError> {
        let semaphore = self.device.create_semaphore()?;
        self.entries.push(Entry::Semaphore(semaphore));

        Ok(semaphore)
    }

    /// Creates an event in the unset state.
    pub fn create_event(&mut self) -> Result<vk::Event, DeviceError> {
        let event = self.device.create_event()?;
        self.entries.push(Entry::Event(event));

        Ok(event)
    }

    /// Returns the number of objects the arena owns.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the arena owns no objects.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for Resources<'_> {
    fn drop(&mut self) {
        // Pending work may still use the objects.
        if let Err(err) = self.device.wait_idle() {
            debug!(%err, "failed to wait for the device to become idle");
        }

        while let Some(entry) = self.entries.pop() {
            match entry {
                Entry::Buffer(buffer, memory) => {
                    self.device.free_memory(memory);
                    self.device.destroy_buffer(buffer);
                }
                Entry::Image(image, memory) => {
                    self.device.free_memory(memory);
                    self.device.destroy_image(image);
                }
                Entry::ShaderModule(shader_module) => {
                    self.device.destroy_shader_module(shader_module);
                }
                Entry::Fence(fence) => self.device.destroy_fence(fence),
                Entry::Semaphore(semaphore) => self.device.destroy_semaphore(semaphore),
                Entry::Event(event) => self.device.destroy_event(event),
            }
        }

        trace!("released scenario resources");
    }
}

/// Error that can happen when creating a buffer or image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocationError {
    /// No memory type of the device satisfies the memory requirement.
    Unsupported(MemoryRequirement),

    /// The device ran out of memory.
    OutOfMemory,

    /// The create info was not valid.
    Validation(Box<ValidationError>),

    /// The device returned an error.
    Device(DeviceError),
}

impl Error for AllocationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err.as_ref()),
            Self::Device(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(requirement) => write!(
                f,
                "no memory type has the required properties {:?}",
                requirement.required_flags(),
            ),
            Self::OutOfMemory => write!(f, "not enough memory is left for the allocation"),
            Self::Validation(_) => write!(f, "the create info is not valid"),
            Self::Device(_) => write!(f, "the device returned an error"),
        }
    }
}

impl From<DeviceError> for AllocationError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::OutOfDeviceMemory => Self::OutOfMemory,
            DeviceError::MemoryTypeUnsupported => Self::Unsupported(MemoryRequirement::ANY),
            err => Self::Device(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::BufferUsage,
        device::soft::{SoftDevice, SoftDeviceCreateInfo},
        image::ImageUsage,
        memory::{MemoryPropertyFlags, MemoryRequirement},
    };

    #[test]
    fn release_in_reverse_order() {
        let device = soft_device!();
        let buffer;

        {
            let mut resources = Resources::new(&device);
            buffer = resources
                .create_buffer(BufferCreateInfo::words(
                    64,
                    BufferUsage::STORAGE_BUFFER,
                    MemoryRequirement::HOST_VISIBLE,
                ))
                .unwrap();
            resources
                .create_image(ImageCreateInfo {
                    extent: [4, 4],
                    usage: ImageUsage::STORAGE,
                    ..Default::default()
                })
                .unwrap();
            resources.create_fence(false).unwrap();
            assert_eq!(resources.len(), 3);

            assert_eq!(device.live_object_count(), 5);
        }

        assert_eq!(device.live_object_count(), 0);
        assert_eq!(
            (&device as &dyn Device).write_buffer(buffer.handle(), 0, &[0; 4]),
            Err(DeviceError::InvalidHandle),
        );
    }

    #[test]
    fn unsupported_memory() {
        let device = SoftDevice::new(SoftDeviceCreateInfo {
            memory_types: vec![MemoryPropertyFlags::DEVICE_LOCAL],
            ..Default::default()
        })
        .unwrap();
        let mut resources = Resources::new(&device);

        let err = resources
            .create_buffer(BufferCreateInfo::words(
                16,
                BufferUsage::STORAGE_BUFFER,
                MemoryRequirement::HOST_VISIBLE,
            ))
            .unwrap_err();
        assert_eq!(err, AllocationError::Unsupported(MemoryRequirement::HOST_VISIBLE));
        assert!(resources.is_empty());
        drop(resources);

        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn heap_exhaustion() {
        let device = SoftDevice::new(SoftDeviceCreateInfo {
            heap_size: 1024,
            ..Default::default()
        })
        .unwrap();
        let mut resources = Resources::new(&device);

        let create_info = |len| {
            BufferCreateInfo::words(len, BufferUsage::STORAGE_BUFFER, MemoryRequirement::ANY)
        };

        resources.create_buffer(create_info(128)).unwrap();
        let err = resources.create_buffer(create_info(256)).unwrap_err();
        assert_eq!(err, AllocationError::OutOfMemory);

        let err = resources.create_buffer(BufferCreateInfo::default()).unwrap_err();
        assert!(matches!(err, AllocationError::Validation(_)));
    }
}
