//! Heap placement, queue types and resource usage flags.

use bitflags::bitflags;

/// Memory heap a resource lives in.
///
/// Only host-visible heaps can be mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeapType {
    /// Device-local memory, not visible to the CPU.
    #[default]
    Gpu,
    /// CPU-only memory.
    Cpu,
    /// Host-visible memory read by the GPU (upload heap).
    CpuGpu,
    /// Host-visible memory written by the GPU and read back by the CPU.
    GpuCpu,
}

impl HeapType {
    /// Returns true if resources in this heap can be mapped from the CPU.
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, Self::Gpu)
    }
}

/// GPU queue a command list submits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum QueueType {
    /// Graphics queue. Accepts every command.
    #[default]
    Graphics,
    /// Async compute queue.
    Compute,
    /// Transfer-only queue.
    Copy,
}

impl QueueType {
    /// All queue types, in index order.
    pub const ALL: [QueueType; 3] = [Self::Graphics, Self::Compute, Self::Copy];

    /// Dense index of this queue type.
    pub fn index(&self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Compute => 1,
            Self::Copy => 2,
        }
    }

    /// Human readable queue name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
            Self::Copy => "copy",
        }
    }
}

bitflags! {
    /// Current or requested usage state of a resource.
    ///
    /// An empty set is the undefined state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceUsage: u32 {
        /// Vertex or constant buffer read.
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        /// Index buffer read.
        const INDEX_BUFFER = 1 << 1;
        /// Color attachment write.
        const RENDER_TARGET = 1 << 2;
        /// Read/write storage access.
        const UNORDERED_ACCESS = 1 << 3;
        /// Depth attachment write.
        const DEPTH_WRITE = 1 << 4;
        /// Depth attachment read.
        const DEPTH_READ = 1 << 5;
        /// Non-pixel shader read.
        const SHADER_RESOURCE = 1 << 6;
        /// Pixel shader read.
        const PIXEL_SHADER_RESOURCE = 1 << 7;
        /// Stream output write.
        const STREAM_OUT = 1 << 8;
        /// Indirect argument read.
        const INDIRECT_ARGUMENT = 1 << 9;
        /// Copy destination.
        const COPY_DST = 1 << 10;
        /// Copy source.
        const COPY_SRC = 1 << 11;
        /// Any read state.
        const GENERIC_READ = 1 << 12;
        /// Presentable swap chain image.
        const PRESENT = 1 << 13;
        /// Common state usable on every queue.
        const COMMON = 1 << 14;
        /// Acceleration structure traversal or build input.
        const ACCELERATION_STRUCTURE_READ = 1 << 15;
        /// Acceleration structure build output.
        const ACCELERATION_STRUCTURE_WRITE = 1 << 16;
    }
}

impl ResourceUsage {
    /// Undefined contents. Transitions out of this state discard data.
    pub const UNDEFINED: Self = Self::empty();

    /// Returns true if any flag in the set writes to the resource.
    pub fn is_write(&self) -> bool {
        self.intersects(
            Self::RENDER_TARGET
                | Self::UNORDERED_ACCESS
                | Self::DEPTH_WRITE
                | Self::STREAM_OUT
                | Self::COPY_DST
                | Self::ACCELERATION_STRUCTURE_WRITE,
        )
    }

    /// Returns true if a transition from `self` to `next` needs a barrier.
    ///
    /// Read-to-read transitions within the same state set are free; every
    /// other change, and any write followed by another write, is not.
    pub fn needs_barrier(&self, next: ResourceUsage) -> bool {
        *self != next || self.intersects(Self::UNORDERED_ACCESS)
    }
}

bitflags! {
    /// How a resource may be viewed by shaders and the fixed-function pipeline.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceDescriptor: u32 {
        /// Read-only buffer view.
        const BUFFER = 1 << 0;
        /// Read/write buffer view.
        const RW_BUFFER = 1 << 1;
        /// Sampled texture view.
        const TEXTURE = 1 << 2;
        /// Storage texture view.
        const RW_TEXTURE = 1 << 3;
        /// Color attachment.
        const RENDER_TARGET = 1 << 4;
        /// Depth/stencil attachment.
        const DEPTH_STENCIL = 1 << 5;
        /// Sampler.
        const SAMPLER = 1 << 6;
        /// Constant (uniform) buffer.
        const UNIFORM_BUFFER = 1 << 7;
        /// Root constants.
        const ROOT_CONSTANT = 1 << 8;
        /// Index buffer.
        const INDEX_BUFFER = 1 << 9;
        /// Vertex buffer.
        const VERTEX_BUFFER = 1 << 10;
        /// Indirect argument buffer.
        const INDIRECT_BUFFER = 1 << 11;
        /// Cube map texture.
        const TEXTURE_CUBE = 1 << 12;
        /// Structured buffer with a fixed element stride.
        const STRUCTURED_BUFFER = 1 << 13;
        /// Acceleration structure storage.
        const ACCELERATION_STRUCTURE = 1 << 14;
    }
}

/// Index element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexType {
    /// 16-bit indices.
    Uint16,
    /// 32-bit indices.
    #[default]
    Uint32,
}

impl IndexType {
    /// Size of one index in bytes.
    pub fn num_bytes(&self) -> u64 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_visibility() {
        assert!(!HeapType::Gpu.is_host_visible());
        assert!(HeapType::CpuGpu.is_host_visible());
        assert!(HeapType::GpuCpu.is_host_visible());
    }

    #[test]
    fn test_usage_writes() {
        assert!(ResourceUsage::COPY_DST.is_write());
        assert!(!(ResourceUsage::COPY_SRC | ResourceUsage::SHADER_RESOURCE).is_write());
        assert!(ResourceUsage::UNDEFINED.is_empty());
    }

    #[test]
    fn test_needs_barrier() {
        let read = ResourceUsage::SHADER_RESOURCE;
        assert!(!read.needs_barrier(read));
        assert!(read.needs_barrier(ResourceUsage::COPY_DST));
        assert!(ResourceUsage::UNORDERED_ACCESS.needs_barrier(ResourceUsage::UNORDERED_ACCESS));
    }

    #[test]
    fn test_queue_indices() {
        for (i, queue) in QueueType::ALL.iter().enumerate() {
            assert_eq!(queue.index(), i);
        }
    }
}
