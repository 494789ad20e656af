//! Conversions from crate types to wgpu types.

use crate::command::{LoadOp, StoreOp};
use crate::pipeline::{CullMode, PrimitiveTopology, VertexAttributeFormat, VertexStepMode};
use crate::swapchain::PresentMode;
use crate::types::{
    AddressMode, BackendKind, ClearValue, CompareOp, Filter, Format, MipmapMode, ResourceUsage,
    ShaderStages,
};

/// Native format, `None` for formats wgpu cannot store in a texture.
pub fn format(format: Format) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as T;
    Some(match format {
        Format::R8Unorm => T::R8Unorm,
        Format::R8Snorm => T::R8Snorm,
        Format::R8Uint => T::R8Uint,
        Format::R8Sint => T::R8Sint,
        Format::R16Unorm => T::R16Unorm,
        Format::R16Float => T::R16Float,
        Format::R16Uint => T::R16Uint,
        Format::Rg8Unorm => T::Rg8Unorm,
        Format::R32Float => T::R32Float,
        Format::R32Uint => T::R32Uint,
        Format::R32Sint => T::R32Sint,
        Format::Rg16Float => T::Rg16Float,
        Format::Rgba8Unorm => T::Rgba8Unorm,
        Format::Rgba8UnormSrgb => T::Rgba8UnormSrgb,
        Format::Rgba8Uint => T::Rgba8Uint,
        Format::Bgra8Unorm => T::Bgra8Unorm,
        Format::Bgra8UnormSrgb => T::Bgra8UnormSrgb,
        Format::Rgb10a2Unorm => T::Rgb10a2Unorm,
        Format::Rgba16Float => T::Rgba16Float,
        Format::Rg32Float => T::Rg32Float,
        Format::Rg32Uint => T::Rg32Uint,
        Format::Rgba32Float => T::Rgba32Float,
        Format::Rgba32Uint => T::Rgba32Uint,
        Format::D16Unorm => T::Depth16Unorm,
        Format::D24UnormS8Uint => T::Depth24PlusStencil8,
        Format::D32Float => T::Depth32Float,
        Format::Bc1Unorm => T::Bc1RgbaUnorm,
        Format::Bc1UnormSrgb => T::Bc1RgbaUnormSrgb,
        Format::Bc3Unorm => T::Bc3RgbaUnorm,
        Format::Bc5Unorm => T::Bc5RgUnorm,
        Format::Bc7Unorm => T::Bc7RgbaUnorm,
        Format::Bc7UnormSrgb => T::Bc7RgbaUnormSrgb,
        _ => return None,
    })
}

/// Crate format of a surface format.
pub fn surface_format(format: wgpu::TextureFormat) -> Option<Format> {
    use wgpu::TextureFormat as T;
    Some(match format {
        T::Bgra8Unorm => Format::Bgra8Unorm,
        T::Bgra8UnormSrgb => Format::Bgra8UnormSrgb,
        T::Rgba8Unorm => Format::Rgba8Unorm,
        T::Rgba8UnormSrgb => Format::Rgba8UnormSrgb,
        T::Rgb10a2Unorm => Format::Rgb10a2Unorm,
        T::Rgba16Float => Format::Rgba16Float,
        _ => return None,
    })
}

pub fn buffer_usages(usages: ResourceUsage) -> wgpu::BufferUsages {
    let mut result = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
    if usages.contains(ResourceUsage::VERTEX_AND_CONSTANT_BUFFER) {
        result |= wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::UNIFORM;
    }
    if usages.contains(ResourceUsage::INDEX_BUFFER) {
        result |= wgpu::BufferUsages::INDEX;
    }
    if usages.contains(ResourceUsage::INDIRECT_ARGUMENT) {
        result |= wgpu::BufferUsages::INDIRECT;
    }
    if usages.intersects(
        ResourceUsage::UNORDERED_ACCESS
            | ResourceUsage::SHADER_RESOURCE
            | ResourceUsage::PIXEL_SHADER_RESOURCE,
    ) {
        result |= wgpu::BufferUsages::STORAGE;
    }
    result
}

pub fn texture_usages(usages: ResourceUsage) -> wgpu::TextureUsages {
    let mut result = wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
    if usages.intersects(ResourceUsage::SHADER_RESOURCE | ResourceUsage::PIXEL_SHADER_RESOURCE) {
        result |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usages.contains(ResourceUsage::UNORDERED_ACCESS) {
        result |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if usages.intersects(
        ResourceUsage::RENDER_TARGET | ResourceUsage::DEPTH_WRITE | ResourceUsage::DEPTH_READ,
    ) {
        result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    result
}

pub fn backends(kind: BackendKind) -> wgpu::Backends {
    match kind {
        BackendKind::DirectX12 => wgpu::Backends::DX12,
        BackendKind::Metal => wgpu::Backends::METAL,
        BackendKind::Vulkan => wgpu::Backends::VULKAN,
        BackendKind::Headless => wgpu::Backends::empty(),
    }
}

pub fn shader_stages(stages: ShaderStages) -> wgpu::ShaderStages {
    let mut result = wgpu::ShaderStages::empty();
    if stages.contains(ShaderStages::VERTEX) {
        result |= wgpu::ShaderStages::VERTEX;
    }
    if stages.contains(ShaderStages::PIXEL) {
        result |= wgpu::ShaderStages::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        result |= wgpu::ShaderStages::COMPUTE;
    }
    result
}

pub fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::ClampToBorder => wgpu::AddressMode::ClampToBorder,
    }
}

pub fn filter(filter: Filter) -> wgpu::FilterMode {
    match filter {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    }
}

pub fn mipmap_filter(mode: MipmapMode) -> wgpu::MipmapFilterMode {
    match mode {
        MipmapMode::Nearest => wgpu::MipmapFilterMode::Nearest,
        MipmapMode::Linear => wgpu::MipmapFilterMode::Linear,
    }
}

pub fn compare_op(op: CompareOp) -> wgpu::CompareFunction {
    match op {
        CompareOp::Never => wgpu::CompareFunction::Never,
        CompareOp::Less => wgpu::CompareFunction::Less,
        CompareOp::Equal => wgpu::CompareFunction::Equal,
        CompareOp::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareOp::Greater => wgpu::CompareFunction::Greater,
        CompareOp::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareOp::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareOp::Always => wgpu::CompareFunction::Always,
    }
}

pub fn vertex_format(format: VertexAttributeFormat) -> wgpu::VertexFormat {
    match format {
        VertexAttributeFormat::Float => wgpu::VertexFormat::Float32,
        VertexAttributeFormat::Float2 => wgpu::VertexFormat::Float32x2,
        VertexAttributeFormat::Float3 => wgpu::VertexFormat::Float32x3,
        VertexAttributeFormat::Float4 => wgpu::VertexFormat::Float32x4,
        VertexAttributeFormat::Uint => wgpu::VertexFormat::Uint32,
        VertexAttributeFormat::Uint2 => wgpu::VertexFormat::Uint32x2,
        VertexAttributeFormat::Uint4 => wgpu::VertexFormat::Uint32x4,
        VertexAttributeFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
    }
}

pub fn step_mode(mode: VertexStepMode) -> wgpu::VertexStepMode {
    match mode {
        VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
        VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
    }
}

pub fn topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

/// Strip topologies need the index format up front.
pub fn strip_index_format(topology: PrimitiveTopology) -> Option<wgpu::IndexFormat> {
    matches!(topology, PrimitiveTopology::LineStrip | PrimitiveTopology::TriangleStrip)
        .then_some(wgpu::IndexFormat::Uint32)
}

pub fn cull_mode(mode: CullMode) -> Option<wgpu::Face> {
    match mode {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    }
}

pub fn present_mode(mode: PresentMode) -> wgpu::PresentMode {
    match mode {
        PresentMode::Immediate => wgpu::PresentMode::Immediate,
        PresentMode::Mailbox => wgpu::PresentMode::Mailbox,
        PresentMode::Fifo => wgpu::PresentMode::Fifo,
    }
}

/// wgpu has no don't-care load, so those attachments load.
pub fn color_load_op(op: LoadOp, clear: ClearValue) -> wgpu::LoadOp<wgpu::Color> {
    match (op, clear) {
        (LoadOp::Clear, ClearValue::Color([r, g, b, a])) => wgpu::LoadOp::Clear(wgpu::Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            a: a as f64,
        }),
        (LoadOp::Clear, ClearValue::DepthStencil { .. }) => {
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
        }
        (LoadOp::Load | LoadOp::DontCare, _) => wgpu::LoadOp::Load,
    }
}

pub fn depth_load_op(op: LoadOp, clear: ClearValue) -> wgpu::LoadOp<f32> {
    match (op, clear) {
        (LoadOp::Clear, ClearValue::DepthStencil { depth, .. }) => wgpu::LoadOp::Clear(depth),
        (LoadOp::Clear, ClearValue::Color(_)) => wgpu::LoadOp::Clear(1.0),
        (LoadOp::Load | LoadOp::DontCare, _) => wgpu::LoadOp::Load,
    }
}

pub fn stencil_load_op(op: LoadOp, clear: ClearValue) -> wgpu::LoadOp<u32> {
    match (op, clear) {
        (LoadOp::Clear, ClearValue::DepthStencil { stencil, .. }) => wgpu::LoadOp::Clear(stencil),
        (LoadOp::Clear, ClearValue::Color(_)) => wgpu::LoadOp::Clear(0),
        (LoadOp::Load | LoadOp::DontCare, _) => wgpu::LoadOp::Load,
    }
}

pub fn store_op(op: StoreOp) -> wgpu::StoreOp {
    match op {
        StoreOp::Store => wgpu::StoreOp::Store,
        StoreOp::DontCare => wgpu::StoreOp::Discard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_only_formats_rejected() {
        assert_eq!(format(Format::Rgb32Float), None);
        assert_eq!(format(Format::Undefined), None);
        assert_eq!(format(Format::D24UnormS8Uint), Some(wgpu::TextureFormat::Depth24PlusStencil8));
    }

    #[test]
    fn test_buffer_usages_always_copyable() {
        let usages = buffer_usages(ResourceUsage::INDEX_BUFFER);
        assert!(usages.contains(wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::INDEX));
        assert!(!usages.contains(wgpu::BufferUsages::STORAGE));
    }

    #[test]
    fn test_dont_care_loads() {
        let clear = ClearValue::Color([1.0, 0.0, 0.0, 1.0]);
        assert!(matches!(color_load_op(LoadOp::DontCare, clear), wgpu::LoadOp::Load));
        assert!(matches!(color_load_op(LoadOp::Clear, clear), wgpu::LoadOp::Clear(c) if c.r == 1.0));
    }
}
