//! Pipeline state objects.
//!
//! A [`Pipeline`] pairs compiled shader bytecode with the fixed-function
//! state of a draw or dispatch and the [`RootSignature`] its shaders bind
//! through. Shader compilation happens offline; the backends only accept the
//! bytecode kinds they can load ([`ShaderBytecode`]).

use std::sync::Arc;

use crate::backend::GpuPipeline;
use crate::binding::RootSignature;
use crate::error::GraphicsError;
use crate::types::{CompareOp, Format};

/// Shader stage of a compiled module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

/// Compiled shader code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ShaderBytecode {
    /// SPIR-V words, loaded by Vulkan and the headless backend.
    SpirV(Vec<u32>),
    /// WGSL source, loaded by the wgpu backends and the headless backend.
    Wgsl(String),
    /// DXIL container.
    Dxil(Vec<u8>),
    /// Metal library.
    MetalLib(Vec<u8>),
}

impl ShaderBytecode {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::SpirV(_) => "SPIR-V",
            Self::Wgsl(_) => "WGSL",
            Self::Dxil(_) => "DXIL",
            Self::MetalLib(_) => "metallib",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::SpirV(words) => words.is_empty(),
            Self::Wgsl(source) => source.is_empty(),
            Self::Dxil(bytes) | Self::MetalLib(bytes) => bytes.is_empty(),
        }
    }
}

/// One stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShaderStage {
    pub stage: ShaderStage,
    pub bytecode: ShaderBytecode,
    pub entry_point: String,
}

impl CompiledShaderStage {
    pub fn new(stage: ShaderStage, bytecode: ShaderBytecode, entry_point: impl Into<String>) -> Self {
        Self {
            stage,
            bytecode,
            entry_point: entry_point.into(),
        }
    }

    pub fn vertex(bytecode: ShaderBytecode, entry_point: impl Into<String>) -> Self {
        Self::new(ShaderStage::Vertex, bytecode, entry_point)
    }

    pub fn pixel(bytecode: ShaderBytecode, entry_point: impl Into<String>) -> Self {
        Self::new(ShaderStage::Pixel, bytecode, entry_point)
    }

    pub fn compute(bytecode: ShaderBytecode, entry_point: impl Into<String>) -> Self {
        Self::new(ShaderStage::Compute, bytecode, entry_point)
    }
}

/// Format of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexAttributeFormat {
    Float,
    Float2,
    Float3,
    Float4,
    Uint,
    Uint2,
    Uint4,
    /// Four 8-bit unsigned integers normalized to 0.0-1.0.
    Unorm8x4,
}

impl VertexAttributeFormat {
    pub fn size(&self) -> u32 {
        match self {
            Self::Float | Self::Uint | Self::Unorm8x4 => 4,
            Self::Float2 | Self::Uint2 => 8,
            Self::Float3 => 12,
            Self::Float4 | Self::Uint4 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexStepMode {
    #[default]
    Vertex,
    Instance,
}

/// One vertex buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub stride: u32,
    pub step_mode: VertexStepMode,
}

/// One vertex shader input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader input location.
    pub location: u32,
    pub format: VertexAttributeFormat,
    /// Byte offset within the vertex.
    pub offset: u32,
    /// Index of the vertex buffer the attribute reads from.
    pub buffer_index: u32,
}

/// Vertex data layout across one or more buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct InputLayout {
    pub buffers: Vec<VertexBufferLayout>,
    pub attributes: Vec<VertexAttribute>,
}

impl InputLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(mut self, stride: u32, step_mode: VertexStepMode) -> Self {
        self.buffers.push(VertexBufferLayout { stride, step_mode });
        self
    }

    pub fn with_attribute(
        mut self,
        location: u32,
        format: VertexAttributeFormat,
        offset: u32,
        buffer_index: u32,
    ) -> Self {
        self.attributes.push(VertexAttribute {
            location,
            format,
            offset,
            buffer_index,
        });
        self
    }

    fn validate(&self) -> Result<(), String> {
        for attribute in &self.attributes {
            let Some(buffer) = self.buffers.get(attribute.buffer_index as usize) else {
                return Err(format!(
                    "attribute at location {} reads missing vertex buffer {}",
                    attribute.location, attribute.buffer_index
                ));
            };
            if attribute.offset + attribute.format.size() > buffer.stride {
                return Err(format!(
                    "attribute at location {} overruns the {}-byte stride of buffer {}",
                    attribute.location, buffer.stride, attribute.buffer_index
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Fixed-function state of a graphics pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineDesc {
    pub input_layout: InputLayout,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub render_target_formats: Vec<Format>,
    pub depth_stencil_format: Option<Format>,
    pub depth_test: Option<CompareOp>,
    pub depth_write: bool,
    pub sample_count: u32,
}

impl Default for GraphicsPipelineDesc {
    fn default() -> Self {
        Self {
            input_layout: InputLayout::default(),
            topology: PrimitiveTopology::TriangleList,
            cull_mode: CullMode::Back,
            render_target_formats: Vec::new(),
            depth_stencil_format: None,
            depth_test: None,
            depth_write: false,
            sample_count: 1,
        }
    }
}

/// Which pipeline slot a pipeline binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindPoint {
    Graphics,
    Compute,
}

/// Descriptor for creating a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub root_signature: RootSignature,
    pub bind_point: BindPoint,
    pub shaders: Vec<CompiledShaderStage>,
    /// Ignored for compute pipelines.
    pub graphics: GraphicsPipelineDesc,
    pub debug_name: Option<String>,
}

impl PipelineDesc {
    pub fn compute(root_signature: &RootSignature, shader: CompiledShaderStage) -> Self {
        Self {
            root_signature: root_signature.clone(),
            bind_point: BindPoint::Compute,
            shaders: vec![shader],
            graphics: GraphicsPipelineDesc::default(),
            debug_name: None,
        }
    }

    pub fn graphics(
        root_signature: &RootSignature,
        shaders: Vec<CompiledShaderStage>,
        graphics: GraphicsPipelineDesc,
    ) -> Self {
        Self {
            root_signature: root_signature.clone(),
            bind_point: BindPoint::Graphics,
            shaders,
            graphics,
            debug_name: None,
        }
    }

    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    pub fn stage(&self, stage: ShaderStage) -> Option<&CompiledShaderStage> {
        self.shaders.iter().find(|s| s.stage == stage)
    }

    pub(crate) fn validate(&self) -> Result<(), GraphicsError> {
        let invalid = |msg: String| {
            Err(GraphicsError::InvalidParameter(format!(
                "pipeline {:?}: {msg}",
                self.debug_name
            )))
        };
        if let Some(empty) = self.shaders.iter().find(|s| s.bytecode.is_empty()) {
            return invalid(format!("{:?} stage has no bytecode", empty.stage));
        }
        match self.bind_point {
            BindPoint::Compute => {
                if self.shaders.len() != 1 || self.shaders[0].stage != ShaderStage::Compute {
                    return invalid("compute pipelines take exactly one compute stage".into());
                }
            }
            BindPoint::Graphics => {
                if self.stage(ShaderStage::Vertex).is_none() {
                    return invalid("graphics pipelines need a vertex stage".into());
                }
                if self.stage(ShaderStage::Compute).is_some() {
                    return invalid("graphics pipelines cannot contain a compute stage".into());
                }
                let g = &self.graphics;
                if g.render_target_formats.is_empty() && g.depth_stencil_format.is_none() {
                    return invalid("graphics pipelines need at least one attachment format".into());
                }
                if g.render_target_formats
                    .iter()
                    .any(|f| *f == Format::Undefined || f.is_depth_stencil())
                {
                    return invalid("render target formats must be defined color formats".into());
                }
                if let Some(depth) = g.depth_stencil_format
                    && !depth.is_depth_stencil()
                {
                    return invalid(format!("{depth:?} is not a depth format"));
                }
                if !g.sample_count.is_power_of_two() {
                    return invalid(format!("sample count {} is not a power of two", g.sample_count));
                }
                if let Err(msg) = g.input_layout.validate() {
                    return invalid(msg);
                }
            }
        }
        Ok(())
    }
}

/// A compiled pipeline state object. Cloning shares it.
#[derive(Clone)]
pub struct Pipeline {
    id: u64,
    handle: Arc<GpuPipeline>,
    bind_point: BindPoint,
    root_signature: RootSignature,
}

impl Pipeline {
    pub(crate) fn new(id: u64, handle: GpuPipeline, desc: &PipelineDesc) -> Self {
        Self {
            id,
            handle: Arc::new(handle),
            bind_point: desc.bind_point,
            root_signature: desc.root_signature.clone(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn bind_point(&self) -> BindPoint {
        self.bind_point
    }

    pub fn root_signature(&self) -> &RootSignature {
        &self.root_signature
    }

    pub(crate) fn handle(&self) -> &Arc<GpuPipeline> {
        &self.handle
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("bind_point", &self.bind_point)
            .finish()
    }
}

static_assertions::assert_impl_all!(Pipeline: Send, Sync, Clone);

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::binding::RootSignatureDesc;
    use crate::test_utils::headless_device;

    fn wgsl() -> ShaderBytecode {
        ShaderBytecode::Wgsl("@compute @workgroup_size(1) fn main() {}".into())
    }

    #[test]
    fn test_compute_pipeline_rules() {
        let device = headless_device();
        let signature = device.create_root_signature(&RootSignatureDesc::new()).unwrap();

        let ok = PipelineDesc::compute(&signature, CompiledShaderStage::compute(wgsl(), "main"));
        let pipeline = device.create_pipeline(&ok).unwrap();
        assert_eq!(pipeline.bind_point(), BindPoint::Compute);

        let wrong_stage = PipelineDesc::compute(&signature, CompiledShaderStage::vertex(wgsl(), "main"));
        assert!(device.create_pipeline(&wrong_stage).is_err());

        let empty = PipelineDesc::compute(
            &signature,
            CompiledShaderStage::compute(ShaderBytecode::SpirV(Vec::new()), "main"),
        );
        assert!(device.create_pipeline(&empty).is_err());
    }

    #[test]
    fn test_graphics_pipeline_rules() {
        let device = headless_device();
        let signature = device.create_root_signature(&RootSignatureDesc::new()).unwrap();
        let graphics = GraphicsPipelineDesc {
            render_target_formats: vec![Format::Rgba8Unorm],
            input_layout: InputLayout::new()
                .with_buffer(12, VertexStepMode::Vertex)
                .with_attribute(0, VertexAttributeFormat::Float3, 0, 0),
            ..Default::default()
        };

        let no_vertex = PipelineDesc::graphics(
            &signature,
            vec![CompiledShaderStage::pixel(wgsl(), "fs")],
            graphics.clone(),
        );
        assert!(device.create_pipeline(&no_vertex).is_err());

        let ok = PipelineDesc::graphics(
            &signature,
            vec![
                CompiledShaderStage::vertex(wgsl(), "vs"),
                CompiledShaderStage::pixel(wgsl(), "fs"),
            ],
            graphics.clone(),
        );
        assert!(device.create_pipeline(&ok).is_ok());

        let mut overrun = ok.clone();
        overrun.graphics.input_layout = InputLayout::new()
            .with_buffer(8, VertexStepMode::Vertex)
            .with_attribute(0, VertexAttributeFormat::Float3, 0, 0);
        assert!(device.create_pipeline(&overrun).is_err());
    }
}
