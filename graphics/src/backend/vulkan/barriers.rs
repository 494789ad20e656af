//! Pipeline barriers from resource usage transitions.
//!
//! All transitions of one `pipeline_barrier` call are collected into a batch
//! and submitted as a single `vkCmdPipelineBarrier`.

use ash::vk;

use crate::command::{BufferTransition, TextureTransition};
use crate::types::ResourceUsage;

use super::layout::{TextureLayout, UsageScope};
use super::resources::VulkanTexture;

/// Barriers recorded together.
#[derive(Default)]
pub(super) struct BarrierBatch<'a> {
    buffer_barriers: Vec<vk::BufferMemoryBarrier<'a>>,
    image_barriers: Vec<vk::ImageMemoryBarrier<'a>>,
    /// Textures whose tracked layout changes when the batch is recorded.
    layout_updates: Vec<(&'a VulkanTexture, vk::ImageLayout)>,
    src_stage_mask: vk::PipelineStageFlags,
    dst_stage_mask: vk::PipelineStageFlags,
}

impl<'a> BarrierBatch<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_buffer(
        &mut self,
        buffer: vk::Buffer,
        old: ResourceUsage,
        new: ResourceUsage,
        queue_stages: vk::PipelineStageFlags,
    ) {
        let src = UsageScope::new(old, queue_stages);
        let dst = UsageScope::new(new, queue_stages);
        self.buffer_barriers.push(
            vk::BufferMemoryBarrier::default()
                .src_access_mask(src.access)
                .dst_access_mask(dst.access)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE),
        );
        self.src_stage_mask |= src.stages;
        self.dst_stage_mask |= dst.stages;
    }

    /// Add an image transition. `old` of `UNDEFINED` discards the contents.
    pub fn add_texture(
        &mut self,
        texture: &'a VulkanTexture,
        old: ResourceUsage,
        new: ResourceUsage,
        range: vk::ImageSubresourceRange,
        queue_stages: vk::PipelineStageFlags,
    ) {
        let src = UsageScope::new(old, queue_stages);
        let dst = UsageScope::new(new, queue_stages);
        let old_layout = if old.is_empty() {
            vk::ImageLayout::UNDEFINED
        } else {
            TextureLayout::from_usage(old).to_vk()
        };
        let new_layout = TextureLayout::from_usage(new).to_vk();

        self.image_barriers.push(
            vk::ImageMemoryBarrier::default()
                .src_access_mask(src.access)
                .dst_access_mask(dst.access)
                .old_layout(old_layout)
                .new_layout(new_layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(texture.image)
                .subresource_range(range),
        );
        self.layout_updates.push((texture, new_layout));
        self.src_stage_mask |= src.stages;
        self.dst_stage_mask |= dst.stages;
    }

    /// Add a transition from whatever layout the texture is in now.
    pub fn add_layout_change(&mut self, texture: &'a VulkanTexture, new_layout: vk::ImageLayout) {
        let old_layout = texture.layout();
        if old_layout == new_layout {
            return;
        }
        self.image_barriers.push(
            vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
                .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
                .old_layout(old_layout)
                .new_layout(new_layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(texture.image)
                .subresource_range(full_range(texture)),
        );
        self.layout_updates.push((texture, new_layout));
        self.src_stage_mask |= vk::PipelineStageFlags::ALL_COMMANDS;
        self.dst_stage_mask |= vk::PipelineStageFlags::ALL_COMMANDS;
    }

    pub fn is_empty(&self) -> bool {
        self.buffer_barriers.is_empty() && self.image_barriers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer_barriers.len() + self.image_barriers.len()
    }

    /// Record the batch and update the tracked layouts.
    pub fn submit(self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.src_stage_mask,
                self.dst_stage_mask,
                vk::DependencyFlags::empty(),
                &[],
                &self.buffer_barriers,
                &self.image_barriers,
            );
        }
        for (texture, layout) in self.layout_updates {
            texture.set_layout(layout);
        }
    }
}

/// Every mip and layer of a texture.
pub(super) fn full_range(texture: &VulkanTexture) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: texture.aspect_mask(),
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

/// Subresource range of a recorded transition.
pub(super) fn transition_range(
    texture: &VulkanTexture,
    transition: &TextureTransition,
) -> vk::ImageSubresourceRange {
    let count = |n: u32, remaining: u32| if n == 0 || n == u32::MAX { remaining } else { n };
    vk::ImageSubresourceRange {
        aspect_mask: texture.aspect_mask(),
        base_mip_level: transition.base_mip,
        level_count: count(transition.mip_count, vk::REMAINING_MIP_LEVELS),
        base_array_layer: transition.base_layer,
        layer_count: count(transition.layer_count, vk::REMAINING_ARRAY_LAYERS),
    }
}

/// Build the batch for one recorded barrier command.
///
/// Handles from other backends are skipped with an error log.
pub(super) fn batch_transitions<'a>(
    buffers: &'a [BufferTransition],
    textures: &'a [TextureTransition],
    queue_stages: vk::PipelineStageFlags,
) -> BarrierBatch<'a> {
    let mut batch = BarrierBatch::new();
    for transition in buffers {
        match transition.buffer.as_vulkan() {
            Some(buffer) => batch.add_buffer(buffer.buffer, transition.old, transition.new, queue_stages),
            None => log::error!("Vulkan: barrier on a buffer from another backend"),
        }
    }
    for transition in textures {
        match transition.texture.as_vulkan() {
            Some(texture) => batch.add_texture(
                texture,
                transition.old,
                transition.new,
                transition_range(texture, transition),
                queue_stages,
            ),
            None => log::error!("Vulkan: barrier on a texture from another backend"),
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QueueType;

    use super::super::layout::queue_stages;

    #[test]
    fn test_buffer_barrier_masks() {
        let mut batch = BarrierBatch::new();
        batch.add_buffer(
            vk::Buffer::null(),
            ResourceUsage::COPY_DST,
            ResourceUsage::VERTEX_AND_CONSTANT_BUFFER,
            queue_stages(QueueType::Graphics),
        );
        assert_eq!(batch.len(), 1);
        assert!(batch.src_stage_mask.contains(vk::PipelineStageFlags::TRANSFER));
        assert!(batch.dst_stage_mask.contains(vk::PipelineStageFlags::VERTEX_INPUT));
        let barrier = &batch.buffer_barriers[0];
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert!(barrier.dst_access_mask.contains(vk::AccessFlags::UNIFORM_READ));
    }

    #[test]
    fn test_copy_queue_drops_graphics_stages() {
        let mut batch = BarrierBatch::new();
        batch.add_buffer(
            vk::Buffer::null(),
            ResourceUsage::COPY_DST,
            ResourceUsage::VERTEX_AND_CONSTANT_BUFFER,
            queue_stages(QueueType::Copy),
        );
        assert!(!batch.dst_stage_mask.contains(vk::PipelineStageFlags::VERTEX_INPUT));
        assert!(!batch.is_empty());
    }
}
