//! Memory classes that resources can be bound to.

use crate::macros::vulkan_bitflags;

vulkan_bitflags! {
    /// Properties of a memory type.
    MemoryPropertyFlags = MemoryPropertyFlags(u32);

    /// The memory is located on the device, and is the fastest for device access.
    DEVICE_LOCAL = DEVICE_LOCAL,

    /// The memory can be mapped and accessed by the host.
    HOST_VISIBLE = HOST_VISIBLE,

    /// Host writes and device writes are coherent without explicit flushes or invalidations.
    HOST_COHERENT = HOST_COHERENT,

    /// The memory is cached on the host.
    HOST_CACHED = HOST_CACHED,
}

/// The properties a resource needs from the memory type it is bound to.
///
/// Mirrors the small set of requirements conformance scenarios ask for. A requirement that no
/// memory type of the device satisfies results in an allocation error, which makes the scenario
/// skip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryRequirement {
    required: MemoryPropertyFlags,
}

impl MemoryRequirement {
    /// Any memory type will do.
    pub const ANY: Self = Self {
        required: MemoryPropertyFlags::empty(),
    };

    /// The memory must be mappable by the host.
    pub const HOST_VISIBLE: Self = Self {
        required: MemoryPropertyFlags::HOST_VISIBLE,
    };

    /// The memory must be device-local.
    pub const DEVICE_LOCAL: Self = Self {
        required: MemoryPropertyFlags::DEVICE_LOCAL,
    };

    /// Returns a requirement for all of `flags`.
    #[inline]
    pub const fn new(flags: MemoryPropertyFlags) -> Self {
        Self { required: flags }
    }

    /// Returns the properties that are required.
    #[inline]
    pub const fn required_flags(self) -> MemoryPropertyFlags {
        self.required
    }

    /// Returns whether a memory type with `flags` satisfies the requirement.
    #[inline]
    pub const fn is_satisfied_by(self, flags: MemoryPropertyFlags) -> bool {
        flags.contains(self.required)
    }

    /// Returns whether the requirement includes host visibility.
    #[inline]
    pub const fn is_host_visible(self) -> bool {
        self.required.intersects(MemoryPropertyFlags::HOST_VISIBLE)
    }
}

impl Default for MemoryRequirement {
    #[inline]
    fn default() -> Self {
        Self::ANY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_matching() {
        let host_only = MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT;

        assert!(MemoryRequirement::ANY.is_satisfied_by(MemoryPropertyFlags::empty()));
        assert!(MemoryRequirement::HOST_VISIBLE.is_satisfied_by(host_only));
        assert!(!MemoryRequirement::DEVICE_LOCAL.is_satisfied_by(host_only));
        assert!(
            !MemoryRequirement::HOST_VISIBLE.is_satisfied_by(MemoryPropertyFlags::DEVICE_LOCAL)
        );

        let both = MemoryRequirement::new(
            MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_VISIBLE,
        );
        assert!(both.is_host_visible());
        assert!(!both.is_satisfied_by(host_only));
    }
}
