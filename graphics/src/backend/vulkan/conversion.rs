//! Conversions from crate types to Vulkan types.

use ash::vk;

use crate::command::{LoadOp, StoreOp};
use crate::pipeline::{CullMode, PrimitiveTopology, ShaderStage, VertexAttributeFormat, VertexStepMode};
use crate::swapchain::PresentMode;
use crate::types::{
    AddressMode, ClearValue, CompareOp, Filter, Format, MipmapMode, ResourceBindingType,
    ResourceDescriptor, ResourceUsage, ShaderStages,
};

/// Buffer usage flags for every way the buffer may be bound or copied.
pub(super) fn buffer_usage(
    descriptor: ResourceDescriptor,
    usages: ResourceUsage,
) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;

    if descriptor.intersects(ResourceDescriptor::VERTEX_BUFFER)
        || usages.contains(ResourceUsage::VERTEX_AND_CONSTANT_BUFFER)
    {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if descriptor.intersects(ResourceDescriptor::UNIFORM_BUFFER)
        || usages.contains(ResourceUsage::VERTEX_AND_CONSTANT_BUFFER)
    {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if descriptor.intersects(ResourceDescriptor::INDEX_BUFFER)
        || usages.contains(ResourceUsage::INDEX_BUFFER)
    {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if descriptor.intersects(ResourceDescriptor::INDIRECT_BUFFER)
        || usages.contains(ResourceUsage::INDIRECT_ARGUMENT)
    {
        result |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if descriptor.intersects(
        ResourceDescriptor::BUFFER
            | ResourceDescriptor::RW_BUFFER
            | ResourceDescriptor::STRUCTURED_BUFFER,
    ) || usages.intersects(ResourceUsage::UNORDERED_ACCESS | ResourceUsage::SHADER_RESOURCE)
    {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }

    result
}

/// Image usage flags. Attachment usage depends on whether the format has depth.
pub(super) fn image_usage(
    format: Format,
    descriptor: ResourceDescriptor,
    usages: ResourceUsage,
) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;

    if descriptor.intersects(ResourceDescriptor::TEXTURE | ResourceDescriptor::TEXTURE_CUBE)
        || usages.intersects(ResourceUsage::SHADER_RESOURCE | ResourceUsage::PIXEL_SHADER_RESOURCE)
    {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if descriptor.contains(ResourceDescriptor::RW_TEXTURE)
        || usages.contains(ResourceUsage::UNORDERED_ACCESS)
    {
        result |= vk::ImageUsageFlags::STORAGE;
    }
    let attachment = descriptor
        .intersects(ResourceDescriptor::RENDER_TARGET | ResourceDescriptor::DEPTH_STENCIL)
        || usages.intersects(
            ResourceUsage::RENDER_TARGET | ResourceUsage::DEPTH_WRITE | ResourceUsage::DEPTH_READ,
        );
    if attachment {
        if format.is_depth_stencil() {
            result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
    }

    result
}

pub(super) fn format(format: Format) -> vk::Format {
    match format {
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::R8Snorm => vk::Format::R8_SNORM,
        Format::R8Uint => vk::Format::R8_UINT,
        Format::R8Sint => vk::Format::R8_SINT,

        Format::R16Unorm => vk::Format::R16_UNORM,
        Format::R16Float => vk::Format::R16_SFLOAT,
        Format::R16Uint => vk::Format::R16_UINT,
        Format::Rg8Unorm => vk::Format::R8G8_UNORM,

        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::R32Uint => vk::Format::R32_UINT,
        Format::R32Sint => vk::Format::R32_SINT,
        Format::Rg16Float => vk::Format::R16G16_SFLOAT,
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        Format::Rgba8Uint => vk::Format::R8G8B8A8_UINT,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        Format::Rgb10a2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,

        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::Rg32Float => vk::Format::R32G32_SFLOAT,
        Format::Rg32Uint => vk::Format::R32G32_UINT,

        Format::Rgb32Float => vk::Format::R32G32B32_SFLOAT,
        Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::Rgba32Uint => vk::Format::R32G32B32A32_UINT,

        Format::D16Unorm => vk::Format::D16_UNORM,
        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        Format::D32Float => vk::Format::D32_SFLOAT,

        Format::Bc1Unorm => vk::Format::BC1_RGBA_UNORM_BLOCK,
        Format::Bc1UnormSrgb => vk::Format::BC1_RGBA_SRGB_BLOCK,
        Format::Bc3Unorm => vk::Format::BC3_UNORM_BLOCK,
        Format::Bc5Unorm => vk::Format::BC5_UNORM_BLOCK,
        Format::Bc7Unorm => vk::Format::BC7_UNORM_BLOCK,
        Format::Bc7UnormSrgb => vk::Format::BC7_SRGB_BLOCK,

        _ => vk::Format::UNDEFINED,
    }
}

/// Inverse of [`format`] for the formats a surface can report.
pub(super) fn surface_format(format: vk::Format) -> Option<Format> {
    Some(match format {
        vk::Format::B8G8R8A8_UNORM => Format::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => Format::Bgra8UnormSrgb,
        vk::Format::R8G8B8A8_UNORM => Format::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::Rgba8UnormSrgb,
        vk::Format::A2B10G10R10_UNORM_PACK32 => Format::Rgb10a2Unorm,
        vk::Format::R16G16B16A16_SFLOAT => Format::Rgba16Float,
        _ => return None,
    })
}

pub(super) fn aspect_mask(format: Format) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth_stencil() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub(super) fn filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

pub(super) fn mipmap_mode(mode: MipmapMode) -> vk::SamplerMipmapMode {
    match mode {
        MipmapMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        MipmapMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub(super) fn address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub(super) fn compare_op(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub(super) fn load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub(super) fn store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub(super) fn clear_value(value: ClearValue) -> vk::ClearValue {
    match value {
        ClearValue::Color(rgba) => vk::ClearValue {
            color: vk::ClearColorValue { float32: rgba },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

pub(super) fn present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
    }
}

pub(super) fn shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut result = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        result |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::PIXEL) {
        result |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        result |= vk::ShaderStageFlags::COMPUTE;
    }
    if stages.contains(ShaderStages::GEOMETRY) {
        result |= vk::ShaderStageFlags::GEOMETRY;
    }
    if stages.contains(ShaderStages::HULL) {
        result |= vk::ShaderStageFlags::TESSELLATION_CONTROL;
    }
    if stages.contains(ShaderStages::DOMAIN) {
        result |= vk::ShaderStageFlags::TESSELLATION_EVALUATION;
    }
    result
}

pub(super) fn shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

/// Descriptor type of a binding. Buffers and textures share the SRV and UAV
/// registers, so the binding's descriptor kind decides between the two.
pub(super) fn descriptor_type(
    binding_type: ResourceBindingType,
    descriptor: ResourceDescriptor,
) -> vk::DescriptorType {
    let is_texture = descriptor.intersects(
        ResourceDescriptor::TEXTURE | ResourceDescriptor::RW_TEXTURE | ResourceDescriptor::TEXTURE_CUBE,
    );
    match (binding_type, is_texture) {
        (ResourceBindingType::ConstantBuffer, _) => vk::DescriptorType::UNIFORM_BUFFER,
        (ResourceBindingType::ShaderResource, true) => vk::DescriptorType::SAMPLED_IMAGE,
        (ResourceBindingType::UnorderedAccess, true) => vk::DescriptorType::STORAGE_IMAGE,
        (ResourceBindingType::ShaderResource | ResourceBindingType::UnorderedAccess, false) => {
            vk::DescriptorType::STORAGE_BUFFER
        }
        (ResourceBindingType::Sampler, _) => vk::DescriptorType::SAMPLER,
    }
}

pub(super) fn vertex_format(format: VertexAttributeFormat) -> vk::Format {
    match format {
        VertexAttributeFormat::Float => vk::Format::R32_SFLOAT,
        VertexAttributeFormat::Float2 => vk::Format::R32G32_SFLOAT,
        VertexAttributeFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        VertexAttributeFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexAttributeFormat::Uint => vk::Format::R32_UINT,
        VertexAttributeFormat::Uint2 => vk::Format::R32G32_UINT,
        VertexAttributeFormat::Uint4 => vk::Format::R32G32B32A32_UINT,
        VertexAttributeFormat::Unorm8x4 => vk::Format::R8G8B8A8_UNORM,
    }
}

pub(super) fn step_mode(mode: VertexStepMode) -> vk::VertexInputRate {
    match mode {
        VertexStepMode::Vertex => vk::VertexInputRate::VERTEX,
        VertexStepMode::Instance => vk::VertexInputRate::INSTANCE,
    }
}

pub(super) fn topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub(super) fn cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub(super) fn sample_count(count: u32) -> vk::SampleCountFlags {
    match count {
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_attachment_usage() {
        let usage = image_usage(
            Format::D32Float,
            ResourceDescriptor::DEPTH_STENCIL,
            ResourceUsage::DEPTH_WRITE,
        );
        assert!(usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(!usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert_eq!(
            aspect_mask(Format::D24UnormS8Uint),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_surface_format_round_trip() {
        for format in [Format::Bgra8Unorm, Format::Rgba8UnormSrgb, Format::Rgba16Float] {
            assert_eq!(surface_format(super::format(format)), Some(format));
        }
        assert_eq!(surface_format(vk::Format::D32_SFLOAT), None);
    }

    #[test]
    fn test_shader_stage_flags() {
        assert_eq!(
            shader_stages(ShaderStages::VERTEX | ShaderStages::PIXEL),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert!(shader_stages(ShaderStages::ALL).contains(vk::ShaderStageFlags::COMPUTE));
    }

    #[test]
    fn test_descriptor_types() {
        assert_eq!(
            descriptor_type(ResourceBindingType::ShaderResource, ResourceDescriptor::TEXTURE),
            vk::DescriptorType::SAMPLED_IMAGE
        );
        assert_eq!(
            descriptor_type(
                ResourceBindingType::ShaderResource,
                ResourceDescriptor::STRUCTURED_BUFFER
            ),
            vk::DescriptorType::STORAGE_BUFFER
        );
        assert_eq!(
            descriptor_type(ResourceBindingType::UnorderedAccess, ResourceDescriptor::RW_TEXTURE),
            vk::DescriptorType::STORAGE_IMAGE
        );
    }

    #[test]
    fn test_index_buffer_usage() {
        let usage = buffer_usage(ResourceDescriptor::INDEX_BUFFER, ResourceUsage::INDEX_BUFFER);
        assert!(usage.contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert!(usage.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(!usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
    }
}
