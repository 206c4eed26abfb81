//! Two-dimensional images in device memory.
//!
//! Every image has a single mip level and array layer, and the `R32_UINT` format, so that a
//! texel is one word. Texels are addressed in row-major order when copied to or from buffers.

use crate::{
    macros::{vulkan_bitflags, vulkan_enum},
    memory::MemoryRequirement,
    NonExhaustive, ValidationError,
};
use ash::vk;
use std::ops::Range;

/// The format of every image.
pub const FORMAT: vk::Format = vk::Format::R32_UINT;

vulkan_bitflags! {
    /// Describes how an image is going to be used.
    ImageUsage = ImageUsageFlags(u32);

    /// The image can be used as a source for transfer commands.
    TRANSFER_SRC = TRANSFER_SRC,

    /// The image can be used as a destination for transfer commands.
    TRANSFER_DST = TRANSFER_DST,

    /// The image can be sampled from a shader.
    SAMPLED = SAMPLED,

    /// The image can be bound as a storage image.
    STORAGE = STORAGE,
}

vulkan_enum! {
    /// In-memory layout of the texels of an image.
    ///
    /// An image is in exactly one layout at a time. Operations other than the one a layout is
    /// meant for may not access the image while it is in that layout; an image memory barrier
    /// transitions it to another layout first.
    ImageLayout impl {
        /// Returns whether storage reads from a shader are allowed in this layout.
        #[inline]
        pub const fn allows_storage_read(self) -> bool {
            matches!(self, Self::General | Self::ShaderReadOnlyOptimal)
        }

        /// Returns whether storage writes and atomics from a shader are allowed in this layout.
        #[inline]
        pub const fn allows_storage_write(self) -> bool {
            matches!(self, Self::General)
        }

        /// Returns whether the image can be the source of a copy in this layout.
        #[inline]
        pub const fn allows_transfer_src(self) -> bool {
            matches!(self, Self::General | Self::TransferSrcOptimal)
        }

        /// Returns whether the image can be the destination of a copy in this layout.
        #[inline]
        pub const fn allows_transfer_dst(self) -> bool {
            matches!(self, Self::General | Self::TransferDstOptimal)
        }
    }
    = ImageLayout(i32);

    /// The layout of the image is not known, and its contents are undefined. Transitioning away
    /// from this layout discards the contents.
    Undefined = UNDEFINED,

    /// A layout that supports every access, but may be slower than the dedicated layouts.
    General = GENERAL,

    /// A layout for reads from a shader.
    ShaderReadOnlyOptimal = SHADER_READ_ONLY_OPTIMAL,

    /// A layout for the source of transfer commands.
    TransferSrcOptimal = TRANSFER_SRC_OPTIMAL,

    /// A layout for the destination of transfer commands.
    TransferDstOptimal = TRANSFER_DST_OPTIMAL,
}

/// Parameters to create a new [`Image`].
#[derive(Clone, Debug)]
pub struct ImageCreateInfo {
    /// The width and height of the image in texels.
    ///
    /// The default value is `[0; 2]`, which must be overridden.
    pub extent: [u32; 2],

    /// How the image is going to be used.
    ///
    /// The default value is empty, which must be overridden.
    pub usage: ImageUsage,

    /// The properties that the memory backing the image must have.
    ///
    /// The default value is [`MemoryRequirement::ANY`].
    pub memory_requirement: MemoryRequirement,

    pub _ne: NonExhaustive,
}

impl Default for ImageCreateInfo {
    #[inline]
    fn default() -> Self {
        Self {
            extent: [0; 2],
            usage: ImageUsage::empty(),
            memory_requirement: MemoryRequirement::ANY,
            _ne: NonExhaustive(()),
        }
    }
}

impl ImageCreateInfo {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.extent.contains(&0) {
            return Err(ValidationError::new("extent", "contains zero"));
        }

        if self.usage.is_empty() {
            return Err(ValidationError::new("usage", "is empty"));
        }

        Ok(())
    }
}

/// An image created through a [`Resources`] arena.
///
/// [`Resources`]: crate::resource::Resources
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Image {
    handle: vk::Image,
    extent: [u32; 2],
    usage: ImageUsage,
}

impl Image {
    pub(crate) fn new(handle: vk::Image, create_info: &ImageCreateInfo) -> Self {
        Image {
            handle,
            extent: create_info.extent,
            usage: create_info.usage,
        }
    }

    /// Returns the raw handle of the image.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    /// Returns the width and height of the image.
    #[inline]
    pub fn extent(&self) -> [u32; 2] {
        self.extent
    }

    /// Returns the number of texels in the image.
    #[inline]
    pub fn texel_count(&self) -> usize {
        self.extent[0] as usize * self.extent[1] as usize
    }

    /// Returns the usage the image was created with.
    #[inline]
    pub fn usage(&self) -> ImageUsage {
        self.usage
    }

    /// Returns the subresource range covering the whole image.
    #[inline]
    pub fn subresource_range(&self) -> ImageSubresourceRange {
        ImageSubresourceRange {
            mip_levels: 0..1,
            array_layers: 0..1,
        }
    }
}

/// A range of mip levels and array layers of an image.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageSubresourceRange {
    /// The range of mip levels.
    pub mip_levels: Range<u32>,

    /// The range of array layers.
    pub array_layers: Range<u32>,
}

impl ImageSubresourceRange {
    pub(crate) fn validate(&self) -> Result<(), Box<ValidationError>> {
        if self.mip_levels.is_empty() || self.mip_levels.end > 1 {
            return Err(ValidationError::new(
                "mip_levels",
                "is empty or exceeds the mip levels of the image",
            ));
        }

        if self.array_layers.is_empty() || self.array_layers.end > 1 {
            return Err(ValidationError::new(
                "array_layers",
                "is empty or exceeds the array layers of the image",
            ));
        }

        Ok(())
    }

    #[allow(clippy::wrong_self_convention)]
    pub(crate) fn to_vk(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: self.mip_levels.start,
            level_count: self.mip_levels.end - self.mip_levels.start,
            base_array_layer: self.array_layers.start,
            layer_count: self.array_layers.end - self.array_layers.start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_rules() {
        assert!(ImageLayout::General.allows_storage_write());
        assert!(!ImageLayout::ShaderReadOnlyOptimal.allows_storage_write());
        assert!(ImageLayout::ShaderReadOnlyOptimal.allows_storage_read());
        assert!(!ImageLayout::TransferDstOptimal.allows_storage_read());
        assert!(ImageLayout::TransferDstOptimal.allows_transfer_dst());
        assert!(!ImageLayout::TransferSrcOptimal.allows_transfer_dst());
        assert!(ImageLayout::General.allows_transfer_src());
        assert!(!ImageLayout::Undefined.allows_transfer_src());
    }

    #[test]
    fn layout_conversions() {
        assert_eq!(
            vk::ImageLayout::from(ImageLayout::TransferSrcOptimal),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        assert_eq!(
            ImageLayout::try_from(vk::ImageLayout::GENERAL),
            Ok(ImageLayout::General),
        );
        assert!(ImageLayout::try_from(vk::ImageLayout::PRESENT_SRC_KHR).is_err());
    }

    #[test]
    fn subresource_range() {
        let range = ImageSubresourceRange {
            mip_levels: 0..1,
            array_layers: 0..1,
        };
        assert!(range.validate().is_ok());

        let raw = range.to_vk();
        assert_eq!(raw.level_count, 1);
        assert_eq!(raw.aspect_mask, vk::ImageAspectFlags::COLOR);

        let range = ImageSubresourceRange {
            mip_levels: 0..2,
            array_layers: 0..1,
        };
        assert!(range.validate().is_err());
    }
}
