//! Linear arrays of data in device memory.
//!
//! All buffers used by the scenarios hold tightly packed little-endian `u32` words.

use crate::{
    macros::vulkan_bitflags, memory::MemoryRequirement, DeviceSize, NonExhaustive,
    ValidationError,
};
use ash::vk;
use std::{mem::size_of, ops::Range};

vulkan_bitflags! {
    /// Describes how a buffer is going to be used.
    BufferUsage = BufferUsageFlags(u32);

    /// The buffer can be used as a source for transfer commands.
    TRANSFER_SRC = TRANSFER_SRC,

    /// The buffer can be used as a destination for transfer commands.
    TRANSFER_DST = TRANSFER_DST,

    /// The buffer can be bound as a uniform buffer.
    UNIFORM_BUFFER = UNIFORM_BUFFER,

    /// The buffer can be bound as a storage buffer.
    STORAGE_BUFFER = STORAGE_BUFFER,
}

/// Parameters to create a new [`Buffer`].
#[derive(Clone, Debug)]
pub struct BufferCreateInfo {
    /// The size in bytes of the buffer.
    ///
    /// The default value is `0`, which must be overridden.
    pub size: DeviceSize,

    /// How the buffer is going to be used.
    ///
    /// The default value is empty, which must be overridden.
    pub usage: BufferUsage,

    /// The properties that the memory backing the buffer must have.
    ///
    /// The default value is [`MemoryRequirement::ANY`].
    pub memory_requirement: MemoryRequirement,

    pub _ne: NonExhaustive,
}

impl Default for BufferCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            size: 0,
            usage: BufferUsage::empty(),
            memory_requirement: MemoryRequirement::ANY,
            _ne: NonExhaustive(()),
        }
    }
}

impl BufferCreateInfo {
    /// Returns a `BufferCreateInfo` for a buffer holding `len` words.
    #[inline]
    pub fn words(len: usize, usage: BufferUsage, memory_requirement: MemoryRequirement) -> Self {
        Self {
            size: (len * size_of::<u32>()) as DeviceSize,
            usage,
            memory_requirement,
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.size == 0 {
            return Err(ValidationError::new("size", "is zero"));
        }

        if self.size % size_of::<u32>() as DeviceSize != 0 {
            return Err(ValidationError::new(
                "size",
                "is not a multiple of the word size",
            ));
        }

        if self.usage.is_empty() {
            return Err(ValidationError::new("usage", "is empty"));
        }

        Ok(())
    }
}

/// A buffer created through a [`Resources`] arena.
///
/// This is a plain description of the buffer; the arena owns the underlying object and its
/// memory, and destroys them when the scenario ends.
///
/// [`Resources`]: crate::resource::Resources
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Buffer {
    handle: vk::Buffer,
    size: DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    pub(crate) fn new(handle: vk::Buffer, create_info: &BufferCreateInfo) -> Self {
        Buffer {
            handle,
            size: create_info.size,
            usage: create_info.usage,
        }
    }

    /// Returns the raw handle of the buffer.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    /// Returns the size of the buffer in bytes.
    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    /// Returns the number of words in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        (self.size / size_of::<u32>() as DeviceSize) as usize
    }

    /// Returns the usage the buffer was created with.
    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Returns the byte range covering the whole buffer.
    #[inline]
    pub fn whole_range(&self) -> Range<DeviceSize> {
        0..self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_info_validation() {
        let create_info = BufferCreateInfo::words(
            16,
            BufferUsage::STORAGE_BUFFER,
            MemoryRequirement::HOST_VISIBLE,
        );
        assert_eq!(create_info.size, 64);
        assert!(create_info.validate().is_ok());

        let create_info = BufferCreateInfo {
            size: 6,
            usage: BufferUsage::STORAGE_BUFFER,
            ..Default::default()
        };
        assert_eq!(create_info.validate().unwrap_err().context, "size");

        let create_info = BufferCreateInfo {
            size: 16,
            ..Default::default()
        };
        assert_eq!(create_info.validate().unwrap_err().context, "usage");
    }
}
