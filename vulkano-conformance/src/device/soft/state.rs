//! The memory model of the software device.
//!
//! Every resource keeps the latest values of its words together with the writes that produced
//! them and have not been superseded. A write tracks which agents (queues or the host) it has
//! been ordered before, whether it has been made available, and which (stages, access) scopes it
//! has been made visible to. A read of a word sees its value only if every write covering the
//! word is ordered before the reader and visible to the reader's stage and access type;
//! otherwise the word reads as [`UNDEFINED_PATTERN`].

use crate::{
    image::ImageLayout,
    sync::{AccessFlags, PipelineStages},
    UNDEFINED_PATTERN,
};
use foldhash::HashSet;
use smallvec::SmallVec;
use std::ops::Range;

/// Something that accesses memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(super) enum Agent {
    Host,
    Queue(usize),
}

/// Identifies a buffer or image by its raw handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(super) enum ResourceKey {
    Buffer(u64),
    Image(u64),
}

/// A single memory access: who performs it, in which stage, with which access type.
#[derive(Clone, Copy, Debug)]
pub(super) struct Accessor {
    pub(super) agent: Agent,
    pub(super) stage: PipelineStages,
    pub(super) access: AccessFlags,
    pub(super) command: Option<u64>,
}

impl Accessor {
    pub(super) const HOST_READ: Self = Accessor {
        agent: Agent::Host,
        stage: PipelineStages::HOST,
        access: AccessFlags::HOST_READ,
        command: None,
    };

    pub(super) const HOST_WRITE: Self = Accessor {
        agent: Agent::Host,
        stage: PipelineStages::HOST,
        access: AccessFlags::HOST_WRITE,
        command: None,
    };
}

/// A write that has not been superseded yet.
#[derive(Clone, Debug)]
pub(super) struct Write {
    pub(super) id: u64,
    pub(super) agent: Agent,
    pub(super) command: Option<u64>,
    pub(super) stage: PipelineStages,
    pub(super) access: AccessFlags,
    pub(super) range: Range<usize>,
    pub(super) available: bool,
    visible: SmallVec<[(PipelineStages, AccessFlags); 4]>,
    ordered: SmallVec<[(Agent, PipelineStages); 4]>,
}

impl Write {
    /// Returns the stages of `agent` that the write is ordered before.
    pub(super) fn ordered_stages(&self, agent: Agent) -> PipelineStages {
        self.ordered
            .iter()
            .filter(|&&(ordered_agent, _)| ordered_agent == agent)
            .fold(PipelineStages::empty(), |acc, &(_, stages)| acc | stages)
    }

    /// Orders the write before the work of `agent` in `stages`.
    pub(super) fn order_before(&mut self, agent: Agent, stages: PipelineStages) {
        if stages.is_empty() {
            return;
        }

        match self.ordered.iter_mut().find(|(ordered_agent, _)| *ordered_agent == agent) {
            Some((_, ordered_stages)) => *ordered_stages |= stages,
            None => self.ordered.push((agent, stages)),
        }
    }

    /// Makes the write visible to `access` in `stages`.
    pub(super) fn make_visible(&mut self, stages: PipelineStages, access: AccessFlags) {
        if stages.is_empty() || access.is_empty() {
            return;
        }

        if !self
            .visible
            .iter()
            .any(|&(s, a)| s.contains(stages) && a.contains(access))
        {
            self.visible.push((stages, access));
        }
    }

    /// Returns whether the write is in the first synchronization scope of an operation of
    /// `agent` whose source stages are `stages`.
    pub(super) fn precedes(&self, agent: Agent, stages: PipelineStages) -> bool {
        (self.agent == agent && stages.contains(self.stage))
            || self.ordered_stages(agent).intersects(stages)
    }

    /// Returns whether the write happened before the current point of execution of `agent`.
    pub(super) fn reached(&self, agent: Agent) -> bool {
        self.agent == agent || !self.ordered_stages(agent).is_empty()
    }

    /// Returns whether `accessor` is guaranteed to observe the write.
    fn is_seen_by(&self, accessor: &Accessor) -> bool {
        if accessor.command.is_some() && self.command == accessor.command {
            return true;
        }

        if self.agent == Agent::Host && accessor.agent == Agent::Host {
            return true;
        }

        self.ordered_stages(accessor.agent).contains(accessor.stage)
            && self
                .visible
                .iter()
                .any(|&(s, a)| s.contains(accessor.stage) && a.contains(accessor.access))
    }

    /// Returns whether a later write by `accessor` is ordered after this one.
    fn is_ordered_before(&self, accessor: &Accessor) -> bool {
        (accessor.command.is_some() && self.command == accessor.command)
            || (self.agent == Agent::Host && accessor.agent == Agent::Host)
            || self.ordered_stages(accessor.agent).contains(accessor.stage)
    }
}

/// The words of a buffer or image, and the writes that produced them.
#[derive(Debug)]
pub(super) struct Contents {
    data: Vec<u32>,
    writes: Vec<Write>,
}

impl Contents {
    pub(super) fn new(len: usize) -> Self {
        Contents {
            data: vec![UNDEFINED_PATTERN; len],
            writes: Vec::new(),
        }
    }

    pub(super) fn len(&self) -> usize {
        self.data.len()
    }

    pub(super) fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub(super) fn writes_mut(&mut self) -> &mut [Write] {
        &mut self.writes
    }

    /// Discards the contents, as after a layout transition from an undefined layout.
    pub(super) fn discard(&mut self) {
        self.data.fill(UNDEFINED_PATTERN);
        self.writes.clear();
    }

    /// Reads `range` as observed by `accessor`. Words with a write that the accessor is not
    /// guaranteed to observe read as [`UNDEFINED_PATTERN`].
    pub(super) fn read(&self, range: Range<usize>, accessor: &Accessor) -> (Vec<u32>, usize) {
        let mut words = self.data[range.clone()].to_vec();
        let mut undefined = 0;

        for write in &self.writes {
            if write.is_seen_by(accessor) {
                continue;
            }

            let start = write.range.start.max(range.start);
            let end = write.range.end.min(range.end);

            for word in words
                .iter_mut()
                .take(end.saturating_sub(range.start))
                .skip(start.saturating_sub(range.start))
            {
                if *word != UNDEFINED_PATTERN {
                    *word = UNDEFINED_PATTERN;
                    undefined += 1;
                }
            }
        }

        (words, undefined)
    }

    /// Writes `values` at `offset`, as one write by `accessor` with the given `id`.
    ///
    /// Writes that are ordered before `accessor` are superseded where they overlap.
    pub(super) fn write(&mut self, id: u64, offset: usize, values: &[u32], accessor: &Accessor) {
        let range = offset..offset + values.len();
        self.data[range.clone()].copy_from_slice(values);

        let mut remaining = Vec::with_capacity(self.writes.len() + 1);

        for write in self.writes.drain(..) {
            if write.range.end <= range.start
                || range.end <= write.range.start
                || !write.is_ordered_before(accessor)
            {
                remaining.push(write);
                continue;
            }

            if write.range.start < range.start {
                remaining.push(Write {
                    range: write.range.start..range.start,
                    ..write.clone()
                });
            }

            if range.end < write.range.end {
                remaining.push(Write {
                    range: range.end..write.range.end,
                    ..write
                });
            }
        }

        remaining.push(Write {
            id,
            agent: accessor.agent,
            command: accessor.command,
            stage: accessor.stage,
            access: accessor.access,
            range,
            available: false,
            visible: SmallVec::new(),
            ordered: SmallVec::new(),
        });

        self.writes = remaining;
    }
}

/// Writes that a synchronization primitive carries from its signal to its wait, by id.
pub(super) type Token = HashSet<u64>;

/// A buffer or image of the software device.
#[derive(Debug)]
pub(super) struct Resource {
    pub(super) contents: Contents,
    pub(super) memory: Option<u64>,
    pub(super) host_visible: bool,
    /// The extent and current layout, for images.
    pub(super) image: Option<([u32; 2], ImageLayout)>,
    /// The queue family that owns the resource, once it has been used on the device.
    pub(super) owner: Option<u32>,
    /// The queue family that a pending release transfers ownership to.
    pub(super) released_to: Option<u32>,
}

impl Resource {
    pub(super) fn buffer(len: usize) -> Self {
        Resource {
            contents: Contents::new(len),
            memory: None,
            host_visible: false,
            image: None,
            owner: None,
            released_to: None,
        }
    }

    pub(super) fn image(extent: [u32; 2]) -> Self {
        Resource {
            contents: Contents::new(extent[0] as usize * extent[1] as usize),
            image: Some((extent, ImageLayout::Undefined)),
            ..Resource::buffer(0)
        }
    }

    pub(super) fn layout(&self) -> Option<ImageLayout> {
        self.image.map(|(_, layout)| layout)
    }

    pub(super) fn set_layout(&mut self, new_layout: ImageLayout) {
        if let Some((_, layout)) = &mut self.image {
            *layout = new_layout;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_write(queue: usize, command: u64) -> Accessor {
        Accessor {
            agent: Agent::Queue(queue),
            stage: PipelineStages::COMPUTE_SHADER,
            access: AccessFlags::SHADER_STORAGE_WRITE,
            command: Some(command),
        }
    }

    fn queue_read(queue: usize, command: u64) -> Accessor {
        Accessor {
            agent: Agent::Queue(queue),
            stage: PipelineStages::COMPUTE_SHADER,
            access: AccessFlags::SHADER_STORAGE_READ,
            command: Some(command),
        }
    }

    #[test]
    fn fresh_contents_are_undefined() {
        let contents = Contents::new(4);
        let (words, _) = contents.read(0..4, &Accessor::HOST_READ);

        assert_eq!(words, [UNDEFINED_PATTERN; 4]);
    }

    #[test]
    fn host_sees_own_writes() {
        let mut contents = Contents::new(4);
        contents.write(1, 1, &[7, 8], &Accessor::HOST_WRITE);

        let (words, undefined) = contents.read(0..4, &Accessor::HOST_READ);
        assert_eq!(words, [UNDEFINED_PATTERN, 7, 8, UNDEFINED_PATTERN]);
        assert_eq!(undefined, 0);
    }

    #[test]
    fn unsynchronized_read_is_undefined() {
        let mut contents = Contents::new(4);
        contents.write(1, 0, &[1, 2, 3, 4], &queue_write(0, 10));

        let (words, undefined) = contents.read(0..4, &queue_read(0, 10));
        assert_eq!(words, [1, 2, 3, 4]);
        assert_eq!(undefined, 0);

        let (words, undefined) = contents.read(1..3, &queue_read(0, 11));
        assert_eq!(words, [UNDEFINED_PATTERN; 2]);
        assert_eq!(undefined, 2);
    }

    #[test]
    fn ordered_and_visible_read() {
        let mut contents = Contents::new(4);
        contents.write(1, 0, &[1, 2, 3, 4], &queue_write(0, 10));

        let write = &mut contents.writes_mut()[0];
        write.order_before(Agent::Queue(0), PipelineStages::COMPUTE_SHADER);
        let (words, _) = contents.read(0..4, &queue_read(0, 11));
        assert_eq!(words, [UNDEFINED_PATTERN; 4]);

        let write = &mut contents.writes_mut()[0];
        write.available = true;
        write.make_visible(PipelineStages::COMPUTE_SHADER, AccessFlags::SHADER_STORAGE_READ);
        let (words, _) = contents.read(0..4, &queue_read(0, 11));
        assert_eq!(words, [1, 2, 3, 4]);

        let (words, _) = contents.read(0..4, &queue_read(1, 12));
        assert_eq!(words, [UNDEFINED_PATTERN; 4]);
    }

    #[test]
    fn ordered_writes_are_superseded() {
        let mut contents = Contents::new(8);
        contents.write(1, 0, &[1; 8], &queue_write(0, 10));
        contents.writes_mut()[0].order_before(Agent::Queue(0), PipelineStages::COMPUTE_SHADER);

        contents.write(2, 2, &[2; 4], &queue_write(0, 11));
        let ranges: Vec<_> = contents
            .writes()
            .iter()
            .map(|write| (write.id, write.range.clone()))
            .collect();
        assert_eq!(ranges, [(1, 0..2), (1, 6..8), (2, 2..6)]);

        // Not ordered after the previous writes, so those stay outstanding.
        contents.write(3, 0, &[3; 8], &queue_write(1, 12));
        assert_eq!(contents.writes().len(), 4);
    }

    #[test]
    fn precedes_and_reached() {
        let mut contents = Contents::new(1);
        contents.write(1, 0, &[1], &queue_write(0, 10));
        let write = &mut contents.writes_mut()[0];

        assert!(write.precedes(Agent::Queue(0), PipelineStages::ALL_COMMANDS.expand()));
        assert!(!write.precedes(Agent::Queue(0), PipelineStages::COPY));
        assert!(write.reached(Agent::Queue(0)));
        assert!(!write.reached(Agent::Queue(1)));

        write.order_before(Agent::Queue(1), PipelineStages::COPY);
        assert!(write.precedes(Agent::Queue(1), PipelineStages::COPY));
        assert!(write.reached(Agent::Queue(1)));
        assert!(!write.reached(Agent::Host));
    }
}
