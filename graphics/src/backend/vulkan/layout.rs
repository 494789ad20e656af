//! Image layouts derived from resource usage states.
//!
//! Vulkan images carry a layout that must match how they are accessed. The
//! crate tracks [`ResourceUsage`] states instead, so every transition is
//! translated here: a single usage bit picks its optimal layout, mixed usages
//! fall back to `GENERAL` unless they are all depth reads.

use ash::vk;

use crate::types::{QueueType, ResourceUsage};

/// Image layouts the backend moves textures between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(super) enum TextureLayout {
    /// Contents undefined.
    #[default]
    Undefined,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
    General,
}

impl TextureLayout {
    pub fn from_usage(usage: ResourceUsage) -> Self {
        if usage.is_empty() {
            return Self::Undefined;
        }
        let shader_read = ResourceUsage::SHADER_RESOURCE | ResourceUsage::PIXEL_SHADER_RESOURCE;
        if usage == ResourceUsage::RENDER_TARGET {
            Self::ColorAttachment
        } else if usage.contains(ResourceUsage::DEPTH_WRITE) {
            Self::DepthStencilAttachment
        } else if usage.contains(ResourceUsage::DEPTH_READ)
            && (usage - shader_read) == ResourceUsage::DEPTH_READ
        {
            Self::DepthStencilReadOnly
        } else if shader_read.contains(usage) {
            Self::ShaderReadOnly
        } else if usage == ResourceUsage::COPY_SRC {
            Self::TransferSrc
        } else if usage == ResourceUsage::COPY_DST {
            Self::TransferDst
        } else if usage == ResourceUsage::PRESENT {
            Self::PresentSrc
        } else {
            Self::General
        }
    }

    pub fn to_vk(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Self::DepthStencilReadOnly => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            Self::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
            Self::General => vk::ImageLayout::GENERAL,
        }
    }
}

/// Pipeline stages and memory accesses covered by a usage state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct UsageScope {
    pub stages: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
}

impl UsageScope {
    /// Scope of `usage` on a queue that supports `queue_stages`.
    pub fn new(usage: ResourceUsage, queue_stages: vk::PipelineStageFlags) -> Self {
        use vk::AccessFlags as A;
        use vk::PipelineStageFlags as S;

        let shader_stages = S::VERTEX_SHADER | S::FRAGMENT_SHADER | S::COMPUTE_SHADER;
        let table: [(ResourceUsage, S, A); 14] = [
            (
                ResourceUsage::VERTEX_AND_CONSTANT_BUFFER,
                S::VERTEX_INPUT | shader_stages,
                A::VERTEX_ATTRIBUTE_READ | A::UNIFORM_READ,
            ),
            (ResourceUsage::INDEX_BUFFER, S::VERTEX_INPUT, A::INDEX_READ),
            (
                ResourceUsage::RENDER_TARGET,
                S::COLOR_ATTACHMENT_OUTPUT,
                A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            ),
            (
                ResourceUsage::UNORDERED_ACCESS,
                shader_stages,
                A::SHADER_READ | A::SHADER_WRITE,
            ),
            (
                ResourceUsage::DEPTH_WRITE,
                S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
                A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            (
                ResourceUsage::DEPTH_READ,
                S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
                A::DEPTH_STENCIL_ATTACHMENT_READ,
            ),
            (
                ResourceUsage::SHADER_RESOURCE,
                S::VERTEX_SHADER | S::COMPUTE_SHADER,
                A::SHADER_READ,
            ),
            (ResourceUsage::PIXEL_SHADER_RESOURCE, S::FRAGMENT_SHADER, A::SHADER_READ),
            (ResourceUsage::STREAM_OUT, S::VERTEX_SHADER, A::SHADER_WRITE),
            (
                ResourceUsage::INDIRECT_ARGUMENT,
                S::DRAW_INDIRECT,
                A::INDIRECT_COMMAND_READ,
            ),
            (ResourceUsage::COPY_DST, S::TRANSFER, A::TRANSFER_WRITE),
            (ResourceUsage::COPY_SRC, S::TRANSFER, A::TRANSFER_READ),
            (ResourceUsage::GENERIC_READ, S::ALL_COMMANDS, A::MEMORY_READ),
            (ResourceUsage::COMMON, S::ALL_COMMANDS, A::MEMORY_READ | A::MEMORY_WRITE),
        ];

        let mut scope = Self::default();
        for (bit, stages, access) in table {
            let stages = stages & queue_stages;
            if usage.contains(bit) && !stages.is_empty() {
                scope.stages |= stages;
                scope.access |= access;
            }
        }
        if scope.stages.is_empty() {
            // Present and undefined states have no accesses to wait for.
            scope.stages = if usage.contains(ResourceUsage::PRESENT) {
                S::BOTTOM_OF_PIPE
            } else {
                S::TOP_OF_PIPE
            };
            scope.access = A::empty();
        }
        scope
    }
}

/// Stages usable on each queue type.
pub(super) fn queue_stages(queue: QueueType) -> vk::PipelineStageFlags {
    use vk::PipelineStageFlags as S;
    let compute = S::COMPUTE_SHADER | S::DRAW_INDIRECT | S::TRANSFER | S::ALL_COMMANDS;
    match queue {
        QueueType::Graphics => {
            compute
                | S::VERTEX_INPUT
                | S::VERTEX_SHADER
                | S::FRAGMENT_SHADER
                | S::EARLY_FRAGMENT_TESTS
                | S::LATE_FRAGMENT_TESTS
                | S::COLOR_ATTACHMENT_OUTPUT
        }
        QueueType::Compute => compute,
        QueueType::Copy => S::TRANSFER | S::ALL_COMMANDS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_usage_layouts() {
        assert_eq!(TextureLayout::from_usage(ResourceUsage::UNDEFINED), TextureLayout::Undefined);
        assert_eq!(
            TextureLayout::from_usage(ResourceUsage::RENDER_TARGET),
            TextureLayout::ColorAttachment
        );
        assert_eq!(
            TextureLayout::from_usage(ResourceUsage::COPY_DST).to_vk(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(
            TextureLayout::from_usage(ResourceUsage::PRESENT).to_vk(),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }

    #[test]
    fn test_mixed_usage_layouts() {
        assert_eq!(
            TextureLayout::from_usage(
                ResourceUsage::SHADER_RESOURCE | ResourceUsage::PIXEL_SHADER_RESOURCE
            ),
            TextureLayout::ShaderReadOnly
        );
        assert_eq!(
            TextureLayout::from_usage(ResourceUsage::DEPTH_READ | ResourceUsage::PIXEL_SHADER_RESOURCE),
            TextureLayout::DepthStencilReadOnly
        );
        assert_eq!(
            TextureLayout::from_usage(ResourceUsage::COPY_DST | ResourceUsage::SHADER_RESOURCE),
            TextureLayout::General
        );
    }

    #[test]
    fn test_scope_respects_queue() {
        let scope = UsageScope::new(
            ResourceUsage::PIXEL_SHADER_RESOURCE | ResourceUsage::COPY_DST,
            vk::PipelineStageFlags::TRANSFER,
        );
        assert_eq!(scope.stages, vk::PipelineStageFlags::TRANSFER);

        let undefined = UsageScope::new(ResourceUsage::UNDEFINED, queue_stages(QueueType::Graphics));
        assert_eq!(undefined.stages, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert!(undefined.access.is_empty());
    }
}
