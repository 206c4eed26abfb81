use crate::macros::vulkan_bitflags;

vulkan_bitflags! {
    /// A set of pipeline stages, the parts of a queue's execution that a dependency waits for
    /// (source scope) or blocks (destination scope).
    ///
    /// Only the stages that compute and transfer queues execute, plus the host pseudo-stage, are
    /// modelled.
    PipelineStages impl {
        /// Returns `self` with the meta-stages replaced by the stages they stand for.
        ///
        /// `ALL_COMMANDS` becomes every stage a queue can execute and `ALL_TRANSFER` becomes
        /// `COPY`. `TOP_OF_PIPE` and `BOTTOM_OF_PIPE` contribute no stages, as in the second
        /// version of the synchronization commands where they are equivalent to `NONE`.
        #[inline]
        pub const fn expand(self) -> Self {
            let mut result = self.difference(Self::TOP_OF_PIPE.union(Self::BOTTOM_OF_PIPE));

            if result.intersects(Self::ALL_COMMANDS) {
                result = result
                    .union(Self::COMPUTE_SHADER)
                    .union(Self::ALL_TRANSFER)
                    .union(Self::COPY);
            }

            if result.intersects(Self::ALL_TRANSFER) {
                result = result.union(Self::COPY);
            }

            result
        }

        /// Returns the concrete access types that operations in these stages can perform.
        #[inline]
        pub const fn supported_access(self) -> AccessFlags {
            let stages = self.expand();
            let mut result = AccessFlags::empty();

            if stages.intersects(Self::COMPUTE_SHADER) {
                result = result
                    .union(AccessFlags::UNIFORM_READ)
                    .union(AccessFlags::SHADER_READ)
                    .union(AccessFlags::SHADER_SAMPLED_READ)
                    .union(AccessFlags::SHADER_STORAGE_READ)
                    .union(AccessFlags::SHADER_WRITE)
                    .union(AccessFlags::SHADER_STORAGE_WRITE);
            }

            if stages.intersects(Self::COPY.union(Self::ALL_TRANSFER)) {
                result = result
                    .union(AccessFlags::TRANSFER_READ)
                    .union(AccessFlags::TRANSFER_WRITE);
            }

            if stages.intersects(Self::HOST) {
                result = result
                    .union(AccessFlags::HOST_READ)
                    .union(AccessFlags::HOST_WRITE);
            }

            result
        }
    }
    = PipelineStageFlags2(u64);

    /// The top of the pipeline, before any command starts executing.
    TOP_OF_PIPE = TOP_OF_PIPE,

    /// Execution of a compute shader.
    COMPUTE_SHADER = COMPUTE_SHADER,

    /// All transfer operations: copies, blits, resolves and clears.
    ALL_TRANSFER = TRANSFER,

    /// Copy commands.
    COPY = COPY,

    /// The bottom of the pipeline, after every command finished executing.
    BOTTOM_OF_PIPE = BOTTOM_OF_PIPE,

    /// A pseudo-stage for reads and writes of device memory by the host.
    HOST = HOST,

    /// All operations performed by any command on the queue.
    ALL_COMMANDS = ALL_COMMANDS,
}

vulkan_bitflags! {
    /// A set of memory access types that a dependency makes available (source scope) or
    /// visible (destination scope).
    AccessFlags impl {
        /// Every read access type.
        pub const ALL_READS: Self = Self::UNIFORM_READ
            .union(Self::SHADER_READ)
            .union(Self::SHADER_SAMPLED_READ)
            .union(Self::SHADER_STORAGE_READ)
            .union(Self::TRANSFER_READ)
            .union(Self::HOST_READ)
            .union(Self::MEMORY_READ);

        /// Every write access type.
        pub const ALL_WRITES: Self = Self::SHADER_WRITE
            .union(Self::SHADER_STORAGE_WRITE)
            .union(Self::TRANSFER_WRITE)
            .union(Self::HOST_WRITE)
            .union(Self::MEMORY_WRITE);

        /// Returns `self` with the aggregate access types replaced by the concrete types they
        /// stand for.
        #[inline]
        pub const fn expand(self) -> Self {
            let mut result = self;

            if result.intersects(Self::SHADER_READ) {
                result = result
                    .union(Self::SHADER_SAMPLED_READ)
                    .union(Self::SHADER_STORAGE_READ);
            }

            if result.intersects(Self::SHADER_WRITE) {
                result = result.union(Self::SHADER_STORAGE_WRITE);
            }

            if result.intersects(Self::MEMORY_READ) {
                result = result.union(Self::ALL_READS);
            }

            if result.intersects(Self::MEMORY_WRITE) {
                result = result.union(Self::ALL_WRITES);
            }

            result
        }

        /// Returns whether these access types can be used together with `stages` in a barrier.
        ///
        /// `MEMORY_READ` and `MEMORY_WRITE` are compatible with any stage that performs memory
        /// accesses at all.
        #[inline]
        pub const fn is_compatible_with(self, stages: PipelineStages) -> bool {
            let supported = stages.supported_access();
            let generic = Self::MEMORY_READ.union(Self::MEMORY_WRITE);

            supported.contains(self.difference(generic))
                && (!self.intersects(generic) || !supported.is_empty())
        }

        /// Returns the concrete access types in the scope formed by `self` and `stages`.
        #[inline]
        pub const fn scope(self, stages: PipelineStages) -> Self {
            self.expand().intersection(stages.supported_access())
        }

        /// Returns whether any of the access types write to memory.
        #[inline]
        pub const fn is_write(self) -> bool {
            self.intersects(Self::ALL_WRITES)
        }
    }
    = AccessFlags2(u64);

    /// Read access to a uniform buffer in a shader.
    UNIFORM_READ = UNIFORM_READ,

    /// Read access to a storage or sampled resource in a shader.
    SHADER_READ = SHADER_READ,

    /// Write access to a storage resource in a shader.
    SHADER_WRITE = SHADER_WRITE,

    /// Read access to a sampled image in a shader.
    SHADER_SAMPLED_READ = SHADER_SAMPLED_READ,

    /// Read access to a storage buffer or storage image in a shader.
    SHADER_STORAGE_READ = SHADER_STORAGE_READ,

    /// Write access to a storage buffer or storage image in a shader.
    SHADER_STORAGE_WRITE = SHADER_STORAGE_WRITE,

    /// Read access by a transfer command.
    TRANSFER_READ = TRANSFER_READ,

    /// Write access by a transfer command.
    TRANSFER_WRITE = TRANSFER_WRITE,

    /// Read access by the host.
    HOST_READ = HOST_READ,

    /// Write access by the host.
    HOST_WRITE = HOST_WRITE,

    /// Any read access.
    MEMORY_READ = MEMORY_READ,

    /// Any write access.
    MEMORY_WRITE = MEMORY_WRITE,
}

vulkan_bitflags! {
    /// Flags that modify how a dependency is formed.
    DependencyFlags = DependencyFlags(u32);

    /// The dependency is framebuffer-local. Meaningless for compute and transfer work, but
    /// accepted.
    BY_REGION = BY_REGION,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_commands_expands_to_queue_stages() {
        let stages = PipelineStages::ALL_COMMANDS.expand();

        assert!(stages.contains(PipelineStages::COMPUTE_SHADER));
        assert!(stages.contains(PipelineStages::COPY));
        assert!(!stages.intersects(PipelineStages::HOST));
    }

    #[test]
    fn top_of_pipe_has_no_access_scope() {
        assert!(PipelineStages::TOP_OF_PIPE.expand().is_empty());
        assert!(PipelineStages::TOP_OF_PIPE.supported_access().is_empty());
        assert!(!AccessFlags::UNIFORM_READ.is_compatible_with(PipelineStages::TOP_OF_PIPE));
    }

    #[test]
    fn compatibility_table() {
        assert!(AccessFlags::SHADER_WRITE.is_compatible_with(PipelineStages::COMPUTE_SHADER));
        assert!(AccessFlags::TRANSFER_READ.is_compatible_with(PipelineStages::ALL_TRANSFER));
        assert!(AccessFlags::HOST_WRITE.is_compatible_with(PipelineStages::HOST));
        assert!(AccessFlags::MEMORY_READ.is_compatible_with(PipelineStages::COPY));

        assert!(!AccessFlags::HOST_READ.is_compatible_with(PipelineStages::COMPUTE_SHADER));
        assert!(!AccessFlags::TRANSFER_WRITE.is_compatible_with(PipelineStages::HOST));
        assert!(!AccessFlags::SHADER_READ.is_compatible_with(PipelineStages::COPY));
    }

    #[test]
    fn scope_is_limited_by_stages() {
        let scope = AccessFlags::MEMORY_WRITE.scope(PipelineStages::COMPUTE_SHADER);

        assert!(scope.contains(AccessFlags::SHADER_STORAGE_WRITE));
        assert!(!scope.intersects(AccessFlags::TRANSFER_WRITE));
        assert!(!scope.intersects(AccessFlags::HOST_WRITE));

        let scope = AccessFlags::SHADER_READ.scope(PipelineStages::COMPUTE_SHADER);
        assert!(scope.contains(AccessFlags::SHADER_STORAGE_READ));
        assert!(!scope.contains(AccessFlags::UNIFORM_READ));
    }

    #[test]
    fn ash_conversions() {
        let stages = PipelineStages::COMPUTE_SHADER | PipelineStages::HOST;
        let raw = ash::vk::PipelineStageFlags2::from(stages);

        assert_eq!(
            raw,
            ash::vk::PipelineStageFlags2::COMPUTE_SHADER | ash::vk::PipelineStageFlags2::HOST,
        );
        assert_eq!(PipelineStages::from(raw), stages);
        assert_eq!(format!("{:?}", stages), "COMPUTE_SHADER | HOST");
        assert_eq!(format!("{:?}", AccessFlags::empty()), "empty()");
    }
}
