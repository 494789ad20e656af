//! Descriptors passed to command list operations.

use crate::resources::{BufferResource, TextureResource};
use crate::sync::{Fence, Semaphore};
use crate::types::{ClearValue, Extent3d, Offset3d, ResourceUsage};

/// What happens to an attachment's contents when rendering begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    /// Keep the existing contents.
    Load,
    /// Clear to the attachment's clear value.
    #[default]
    Clear,
    /// Contents are undefined.
    DontCare,
}

/// What happens to an attachment's contents when rendering ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

/// One attachment of a rendering scope.
#[derive(Debug, Clone, Copy)]
pub struct RenderingAttachmentDesc<'a> {
    pub resource: &'a TextureResource,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: ClearValue,
}

impl<'a> RenderingAttachmentDesc<'a> {
    /// Clear to opaque black and store.
    pub fn new(resource: &'a TextureResource) -> Self {
        let clear_value = if resource.format().is_depth_stencil() {
            ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            }
        } else {
            ClearValue::default()
        };
        Self {
            resource,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_value,
        }
    }

    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    pub fn with_store_op(mut self, store_op: StoreOp) -> Self {
        self.store_op = store_op;
        self
    }

    pub fn with_clear_value(mut self, clear_value: ClearValue) -> Self {
        self.clear_value = clear_value;
        self
    }
}

/// Attachments of a dynamic rendering scope.
#[derive(Debug, Clone, Default)]
pub struct RenderingDesc<'a> {
    pub color_attachments: Vec<RenderingAttachmentDesc<'a>>,
    pub depth_attachment: Option<RenderingAttachmentDesc<'a>>,
    /// Render area, defaults to the size of the first attachment.
    pub render_area: Option<(u32, u32)>,
}

impl<'a> RenderingDesc<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color(mut self, attachment: RenderingAttachmentDesc<'a>) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    pub fn with_depth(mut self, attachment: RenderingAttachmentDesc<'a>) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }

    pub fn with_render_area(mut self, width: u32, height: u32) -> Self {
        self.render_area = Some((width, height));
        self
    }
}

/// Transition of one buffer.
#[derive(Debug, Clone, Copy)]
pub struct BufferBarrierDesc<'a> {
    pub resource: &'a BufferResource,
    pub old_state: ResourceUsage,
    pub new_state: ResourceUsage,
}

impl<'a> BufferBarrierDesc<'a> {
    /// Transition from the buffer's current usage to `new_state`.
    pub fn new(resource: &'a BufferResource, new_state: ResourceUsage) -> Self {
        Self {
            resource,
            old_state: resource.current_usage(),
            new_state,
        }
    }

    pub fn with_old_state(mut self, old_state: ResourceUsage) -> Self {
        self.old_state = old_state;
        self
    }
}

/// Transition of a range of texture subresources.
#[derive(Debug, Clone, Copy)]
pub struct TextureBarrierDesc<'a> {
    pub resource: &'a TextureResource,
    pub old_state: ResourceUsage,
    pub new_state: ResourceUsage,
    pub base_mip: u32,
    /// Zero means every mip from `base_mip`.
    pub mip_count: u32,
    pub base_layer: u32,
    /// Zero means every layer from `base_layer`.
    pub layer_count: u32,
}

impl<'a> TextureBarrierDesc<'a> {
    /// Transition every subresource from the texture's current usage to `new_state`.
    pub fn new(resource: &'a TextureResource, new_state: ResourceUsage) -> Self {
        Self {
            resource,
            old_state: resource.current_usage(),
            new_state,
            base_mip: 0,
            mip_count: 0,
            base_layer: 0,
            layer_count: 0,
        }
    }

    pub fn with_old_state(mut self, old_state: ResourceUsage) -> Self {
        self.old_state = old_state;
        self
    }

    pub fn with_mips(mut self, base_mip: u32, mip_count: u32) -> Self {
        self.base_mip = base_mip;
        self.mip_count = mip_count;
        self
    }

    pub fn with_layers(mut self, base_layer: u32, layer_count: u32) -> Self {
        self.base_layer = base_layer;
        self.layer_count = layer_count;
        self
    }
}

/// A batch of transitions recorded as one barrier.
#[derive(Debug, Clone, Default)]
pub struct PipelineBarrierDesc<'a> {
    pub buffer_barriers: Vec<BufferBarrierDesc<'a>>,
    pub texture_barriers: Vec<TextureBarrierDesc<'a>>,
}

impl<'a> PipelineBarrierDesc<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(mut self, barrier: BufferBarrierDesc<'a>) -> Self {
        self.buffer_barriers.push(barrier);
        self
    }

    pub fn texture(mut self, barrier: TextureBarrierDesc<'a>) -> Self {
        self.texture_barriers.push(barrier);
        self
    }

    /// Freshly acquired swap chain image to color attachment.
    pub fn undefined_to_render_target(texture: &'a TextureResource) -> Self {
        Self::new().texture(
            TextureBarrierDesc::new(texture, ResourceUsage::RENDER_TARGET)
                .with_old_state(ResourceUsage::UNDEFINED),
        )
    }

    /// Color attachment to presentable image.
    pub fn render_target_to_present(texture: &'a TextureResource) -> Self {
        Self::new().texture(
            TextureBarrierDesc::new(texture, ResourceUsage::PRESENT)
                .with_old_state(ResourceUsage::RENDER_TARGET),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.buffer_barriers.is_empty() && self.texture_barriers.is_empty()
    }
}

/// Buffer to buffer copy.
#[derive(Debug, Clone, Copy)]
pub struct CopyBufferRegionDesc<'a> {
    pub src_buffer: &'a BufferResource,
    pub src_offset: u64,
    pub dst_buffer: &'a BufferResource,
    pub dst_offset: u64,
    pub num_bytes: u64,
}

impl<'a> CopyBufferRegionDesc<'a> {
    /// Copy the whole source buffer to the start of `dst`.
    pub fn whole(src: &'a BufferResource, dst: &'a BufferResource) -> Self {
        Self {
            src_buffer: src,
            src_offset: 0,
            dst_buffer: dst,
            dst_offset: 0,
            num_bytes: src.num_bytes(),
        }
    }
}

/// Texture to texture copy.
#[derive(Debug, Clone, Copy)]
pub struct CopyTextureRegionDesc<'a> {
    pub src_texture: &'a TextureResource,
    pub src_mip: u32,
    pub src_layer: u32,
    pub src_offset: Offset3d,
    pub dst_texture: &'a TextureResource,
    pub dst_mip: u32,
    pub dst_layer: u32,
    pub dst_offset: Offset3d,
    /// Region size, `None` for the whole source mip.
    pub extent: Option<Extent3d>,
}

impl<'a> CopyTextureRegionDesc<'a> {
    /// Copy mip 0, layer 0 of `src` to `dst`.
    pub fn new(src: &'a TextureResource, dst: &'a TextureResource) -> Self {
        Self {
            src_texture: src,
            src_mip: 0,
            src_layer: 0,
            src_offset: Offset3d::ZERO,
            dst_texture: dst,
            dst_mip: 0,
            dst_layer: 0,
            dst_offset: Offset3d::ZERO,
            extent: None,
        }
    }
}

/// Buffer to texture copy.
#[derive(Debug, Clone, Copy)]
pub struct CopyBufferToTextureDesc<'a> {
    pub src_buffer: &'a BufferResource,
    pub src_offset: u64,
    /// Bytes between rows, zero for tightly packed rows.
    pub row_pitch: u64,
    pub dst_texture: &'a TextureResource,
    pub mip_level: u32,
    pub array_layer: u32,
    pub dst_offset: Offset3d,
    /// Region size, `None` for the whole mip.
    pub extent: Option<Extent3d>,
}

impl<'a> CopyBufferToTextureDesc<'a> {
    /// Copy tightly packed data at `src_offset` into mip 0, layer 0.
    pub fn new(src: &'a BufferResource, src_offset: u64, dst: &'a TextureResource) -> Self {
        Self {
            src_buffer: src,
            src_offset,
            row_pitch: 0,
            dst_texture: dst,
            mip_level: 0,
            array_layer: 0,
            dst_offset: Offset3d::ZERO,
            extent: None,
        }
    }

    pub fn with_row_pitch(mut self, row_pitch: u64) -> Self {
        self.row_pitch = row_pitch;
        self
    }

    pub fn with_subresource(mut self, mip_level: u32, array_layer: u32) -> Self {
        self.mip_level = mip_level;
        self.array_layer = array_layer;
        self
    }
}

/// Texture to buffer copy.
#[derive(Debug, Clone, Copy)]
pub struct CopyTextureToBufferDesc<'a> {
    pub src_texture: &'a TextureResource,
    pub mip_level: u32,
    pub array_layer: u32,
    pub src_offset: Offset3d,
    /// Region size, `None` for the whole mip.
    pub extent: Option<Extent3d>,
    pub dst_buffer: &'a BufferResource,
    pub dst_offset: u64,
    /// Bytes between rows, zero for tightly packed rows.
    pub row_pitch: u64,
}

impl<'a> CopyTextureToBufferDesc<'a> {
    /// Copy mip 0, layer 0 tightly packed to `dst_offset`.
    pub fn new(src: &'a TextureResource, dst: &'a BufferResource, dst_offset: u64) -> Self {
        Self {
            src_texture: src,
            mip_level: 0,
            array_layer: 0,
            src_offset: Offset3d::ZERO,
            extent: None,
            dst_buffer: dst,
            dst_offset,
            row_pitch: 0,
        }
    }

    pub fn with_row_pitch(mut self, row_pitch: u64) -> Self {
        self.row_pitch = row_pitch;
        self
    }

    pub fn with_subresource(mut self, mip_level: u32, array_layer: u32) -> Self {
        self.mip_level = mip_level;
        self.array_layer = array_layer;
        self
    }
}

/// Synchronization of one submission.
///
/// `notify` is signaled when the submission completes, so the CPU can wait
/// on it. The submission does not start before every semaphore in
/// `wait_on_semaphores` is signaled, and it signals every semaphore in
/// `notify_semaphores` when done.
#[derive(Debug, Clone, Default)]
pub struct ExecuteDesc<'a> {
    pub notify: Option<&'a Fence>,
    pub wait_on_semaphores: Vec<&'a Semaphore>,
    pub notify_semaphores: Vec<&'a Semaphore>,
}

impl<'a> ExecuteDesc<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notify(mut self, fence: &'a Fence) -> Self {
        self.notify = Some(fence);
        self
    }

    pub fn wait_on(mut self, semaphore: &'a Semaphore) -> Self {
        self.wait_on_semaphores.push(semaphore);
        self
    }

    pub fn notify_semaphore(mut self, semaphore: &'a Semaphore) -> Self {
        self.notify_semaphores.push(semaphore);
        self
    }
}
