//! # Obsidian Graphics
//!
//! Device, resource and synchronization layer over Vulkan, DirectX 12 and
//! Metal, with a CPU-emulated headless backend for tests.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GraphicsContext`] - Process-wide configuration and device creation
//! - [`LogicalDevice`] - Factory for every GPU object
//! - [`CommandList`], [`CommandListPool`], [`CommandListRing`] - Recording and submission
//! - [`Fence`], [`Semaphore`] - CPU-GPU and queue-to-queue synchronization
//! - [`RootSignature`], [`ResourceBindGroup`] - Shader resource binding
//! - [`BatchResourceCopy`] - Multi-threaded uploads on the copy queue
//! - [`RenderGraph`] - Frame graph across the graphics, compute and copy queues
//! - [`BottomLevelAs`], [`TopLevelAs`] - Ray-tracing acceleration structures
//!
//! ## Example
//!
//! ```ignore
//! use obsidian_graphics::*;
//!
//! let context = GraphicsContext::new(GraphicsConfiguration::default())?;
//! let device = context.create_logical_device(&BackendPreference::platform_default())?;
//!
//! let batch = BatchResourceCopy::new(&device, BatchResourceCopyDesc::default())?;
//! batch.begin();
//! let vertices = batch.create_vertex_buffer(bytemuck::cast_slice(&positions), 12)?;
//! batch.end(None)?.wait();
//! ```

pub(crate) mod backend;
pub mod batch_copy;
pub mod binding;
pub mod command;
pub mod config;
pub mod context;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod profiling;
pub mod raytracing;
pub mod resources;
pub mod swapchain;
pub mod sync;
pub mod tracking;
pub mod types;

// Re-export main types for convenience
pub use batch_copy::{
    BatchCopyStats, BatchResourceCopy, BatchResourceCopyDesc, CopyDataToTextureDesc,
    CopyToGpuBufferDesc,
};
pub use binding::{
    BindGroupEntry, BindGroupResource, BindGroupUpdateDesc, ResourceBindGroup,
    ResourceBindGroupDesc, ResourceBindingDesc, RootConstantDesc, RootSignature,
    RootSignatureDesc, RootSignatureLayout, ShaderLocalDataDesc, ShaderLocalDataLayout,
    StaticSamplerDesc,
};
pub use command::{
    BufferBarrierDesc, CommandList, CommandListPool, CommandListPoolDesc, CommandListRing,
    CommandListRingDesc, CommandListState, CopyBufferRegionDesc, CopyBufferToTextureDesc,
    CopyTextureRegionDesc, CopyTextureToBufferDesc, ExecuteDesc, LoadOp, PipelineBarrierDesc,
    RenderingAttachmentDesc, RenderingDesc, StoreOp, TextureBarrierDesc,
};
pub use config::{BackendPreference, DescriptorPoolConfig, GraphicsConfiguration};
pub use context::GraphicsContext;
pub use descriptors::{DescriptorAllocation, DescriptorAllocator, DescriptorHeapType};
pub use device::LogicalDevice;
pub use error::GraphicsError;
pub use graph::{
    GraphError, GraphResource, NodeContext, NodeDesc, PresentNodeDesc, RenderGraph,
    RenderGraphDesc, RequiredState,
};
pub use pipeline::{
    BindPoint, CompiledShaderStage, GraphicsPipelineDesc, InputLayout, Pipeline, PipelineDesc,
    ShaderBytecode, ShaderStage,
};
pub use raytracing::{
    AsBuildFlags, AsBuildSummary, AsGeometryDesc, AsGeometrySource, AsIndices, AsInstanceDesc,
    BottomLevelAs, BottomLevelAsDesc, GeometryFlags, TopLevelAs, TopLevelAsDesc,
    UpdateTopLevelAsDesc,
};
pub use resources::{
    BufferDesc, BufferResource, MappedMemory, Sampler, StagingAllocation, StagingBuffer,
    TextureDesc, TextureResource,
};
pub use swapchain::{GraphicsWindowHandle, PresentMode, PresentResult, SwapChain, SwapChainDesc};
pub use sync::{Fence, Semaphore};
pub use tracking::{BatchTransitionDesc, ResourceTracking, TrackedState, TransitionDesc};
pub use types::{
    BackendKind, ClearValue, DeviceConstants, Extent3d, Format, HeapType, IndexType, Offset3d,
    PhysicalDevice, QueueType, ResourceBindingSlot, ResourceBindingType, ResourceDescriptor,
    ResourceUsage, SamplerDesc, ScissorRect, ShaderStages, Viewport,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(all(test, feature = "headless"))]
pub(crate) mod test_utils {
    use std::sync::Arc;

    use crate::{BackendPreference, GraphicsConfiguration, GraphicsContext, LogicalDevice};

    /// A headless device with the default configuration.
    pub fn headless_device() -> Arc<LogicalDevice> {
        let _ = env_logger::builder().is_test(true).try_init();
        GraphicsContext::new(GraphicsConfiguration::default())
            .and_then(|context| context.create_logical_device(&BackendPreference::headless()))
            .expect("headless device")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
