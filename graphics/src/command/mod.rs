//! Command recording and submission.
//!
//! A [`CommandList`] records a backend-neutral command stream that the
//! backend encodes into native command buffers at [`CommandList::execute`].
//! Lists are bound to one [`QueueType`](crate::QueueType) for their lifetime
//! and are organised in [`CommandListPool`]s that round-robin across frames
//! in flight. [`CommandListRing`] adds per-frame fences and present
//! semaphores on top.

mod desc;
mod list;
mod pool;
mod ring;

pub use desc::{
    BufferBarrierDesc, CopyBufferRegionDesc, CopyBufferToTextureDesc, CopyTextureRegionDesc,
    CopyTextureToBufferDesc, ExecuteDesc, LoadOp, PipelineBarrierDesc, RenderingAttachmentDesc,
    RenderingDesc, StoreOp, TextureBarrierDesc,
};
pub use list::{CommandList, CommandListState};
pub use pool::{CommandListPool, CommandListPoolDesc};
pub use ring::{CommandListRing, CommandListRingDesc};

use std::sync::Arc;

use crate::backend::{GpuBindGroup, GpuBuffer, GpuPipeline, GpuRootSignature, GpuTexture};
use crate::raytracing::AsGeometry;
use crate::types::{ClearValue, Extent3d, IndexType, Offset3d, ResourceUsage, ScissorRect, Viewport};

/// One color or depth attachment of a rendering scope.
#[derive(Debug, Clone)]
pub(crate) struct AttachmentCommand {
    pub texture: Arc<GpuTexture>,
    pub load: LoadOp,
    pub store: StoreOp,
    pub clear: ClearValue,
}

#[derive(Debug, Clone)]
pub(crate) struct RenderingCommand {
    pub color: Vec<AttachmentCommand>,
    pub depth: Option<AttachmentCommand>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct BufferTransition {
    pub buffer: Arc<GpuBuffer>,
    pub old: ResourceUsage,
    pub new: ResourceUsage,
}

#[derive(Debug, Clone)]
pub(crate) struct TextureTransition {
    pub texture: Arc<GpuTexture>,
    pub old: ResourceUsage,
    pub new: ResourceUsage,
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

/// Layout of texel data in a buffer for buffer-texture copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BufferTextureLayout {
    pub offset: u64,
    /// Bytes between rows of blocks.
    pub row_pitch: u64,
    /// Rows of blocks between depth slices.
    pub rows_per_slice: u32,
}

/// Subresource and region of a texture copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TextureRegion {
    pub mip_level: u32,
    pub array_layer: u32,
    pub offset: Offset3d,
    pub extent: Extent3d,
}

/// A recorded command.
///
/// Resource handles are shared, so a recorded command keeps the native
/// objects it references alive until the list is reset.
#[derive(Debug, Clone)]
pub(crate) enum Command {
    BeginRendering(RenderingCommand),
    EndRendering,
    BindPipeline(Arc<GpuPipeline>),
    BindVertexBuffer {
        slot: u32,
        buffer: Arc<GpuBuffer>,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: Arc<GpuBuffer>,
        offset: u64,
        index_type: IndexType,
    },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    BindResourceGroup {
        root_signature: Arc<GpuRootSignature>,
        group: Arc<GpuBindGroup>,
        register_space: u32,
        /// (byte offset, bytes) of root constants set on the group.
        root_constants: Vec<(u32, Vec<u8>)>,
    },
    PipelineBarrier {
        buffers: Vec<BufferTransition>,
        textures: Vec<TextureTransition>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBufferRegion {
        src: Arc<GpuBuffer>,
        src_offset: u64,
        dst: Arc<GpuBuffer>,
        dst_offset: u64,
        num_bytes: u64,
    },
    CopyTextureRegion {
        src: Arc<GpuTexture>,
        src_region: TextureRegion,
        dst: Arc<GpuTexture>,
        dst_region: TextureRegion,
    },
    CopyBufferToTexture {
        src: Arc<GpuBuffer>,
        layout: BufferTextureLayout,
        dst: Arc<GpuTexture>,
        region: TextureRegion,
    },
    CopyTextureToBuffer {
        src: Arc<GpuTexture>,
        region: TextureRegion,
        dst: Arc<GpuBuffer>,
        layout: BufferTextureLayout,
    },
    BuildBottomLevelAs {
        geometries: Arc<[AsGeometry]>,
        result: Arc<GpuBuffer>,
    },
    /// `update` refits the previous build in place.
    BuildTopLevelAs {
        instances: Arc<GpuBuffer>,
        blas_results: Arc<[Arc<GpuBuffer>]>,
        result: Arc<GpuBuffer>,
        update: bool,
    },
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::BeginRendering(_) => "begin_rendering",
            Self::EndRendering => "end_rendering",
            Self::BindPipeline(_) => "bind_pipeline",
            Self::BindVertexBuffer { .. } => "bind_vertex_buffer",
            Self::BindIndexBuffer { .. } => "bind_index_buffer",
            Self::SetViewport(_) => "bind_viewport",
            Self::SetScissor(_) => "bind_scissor_rect",
            Self::BindResourceGroup { .. } => "bind_resource_group",
            Self::PipelineBarrier { .. } => "pipeline_barrier",
            Self::Draw { .. } => "draw",
            Self::DrawIndexed { .. } => "draw_indexed",
            Self::Dispatch { .. } => "dispatch",
            Self::CopyBufferRegion { .. } => "copy_buffer_region",
            Self::CopyTextureRegion { .. } => "copy_texture_region",
            Self::CopyBufferToTexture { .. } => "copy_buffer_to_texture",
            Self::CopyTextureToBuffer { .. } => "copy_texture_to_buffer",
            Self::BuildBottomLevelAs { .. } => "build_bottom_level_as",
            Self::BuildTopLevelAs { update: false, .. } => "build_top_level_as",
            Self::BuildTopLevelAs { update: true, .. } => "update_top_level_as",
        }
    }
}
