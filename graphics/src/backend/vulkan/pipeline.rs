//! Root signatures and pipeline state objects.
//!
//! A root signature becomes one descriptor set layout per register space and
//! a pipeline layout. HLSL registers of different types share numbers, so each
//! binding type is moved to its own range of Vulkan bindings:
//!
//! | register | binding          |
//! |----------|------------------|
//! | `b<n>`   | 1000 + n         |
//! | `t<n>`   | 2000 + n         |
//! | `u<n>`   | 3000 + n         |
//! | `s<n>`   | 4000 + n         |
//!
//! Root constants become one push constant range.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use crate::binding::{RegisterSpaceLayout, RootSignatureLayout};
use crate::error::GraphicsError;
use crate::pipeline::{BindPoint, CompiledShaderStage, PipelineDesc, ShaderBytecode};
use crate::types::{ResourceBindingSlot, ResourceBindingType, ShaderStages};

use super::deferred::DeferredResource;
use super::resources::create_sampler;
use super::{VulkanDevice, conversion, vk_error};

const CONSTANT_BUFFER_SHIFT: u32 = 1000;
const SHADER_RESOURCE_SHIFT: u32 = 2000;
const UNORDERED_ACCESS_SHIFT: u32 = 3000;
const SAMPLER_SHIFT: u32 = 4000;

/// Vulkan binding number of a register slot.
pub(super) fn binding_index(slot: &ResourceBindingSlot) -> u32 {
    let shift = match slot.binding_type {
        ResourceBindingType::ConstantBuffer => CONSTANT_BUFFER_SHIFT,
        ResourceBindingType::ShaderResource => SHADER_RESOURCE_SHIFT,
        ResourceBindingType::UnorderedAccess => UNORDERED_ACCESS_SHIFT,
        ResourceBindingType::Sampler => SAMPLER_SHIFT,
    };
    shift + slot.binding
}

pub struct VulkanRootSignature {
    device: Arc<VulkanDevice>,
    pub(super) layout: vk::PipelineLayout,
    /// Indexed by set index.
    pub(super) set_layouts: Vec<vk::DescriptorSetLayout>,
    static_samplers: Vec<vk::Sampler>,
    /// Stages that see the push constant range, empty without root constants.
    pub(super) push_constant_stages: vk::ShaderStageFlags,
}

impl VulkanRootSignature {
    pub(super) fn new(
        device: Arc<VulkanDevice>,
        layout: &RootSignatureLayout,
    ) -> Result<Self, GraphicsError> {
        // Partially built signatures are released by Drop.
        let mut signature = Self {
            device,
            layout: vk::PipelineLayout::null(),
            set_layouts: Vec::with_capacity(layout.spaces().len()),
            static_samplers: Vec::new(),
            push_constant_stages: vk::ShaderStageFlags::empty(),
        };

        for space in layout.spaces() {
            let set_layout = signature.create_set_layout(space)?;
            signature.set_layouts.push(set_layout);
        }

        let mut push_constant_ranges = Vec::new();
        if layout.root_constant_bytes() > 0 {
            let stages = layout
                .root_constants()
                .iter()
                .fold(ShaderStages::empty(), |stages, constant| stages | constant.stages);
            signature.push_constant_stages = conversion::shader_stages(stages);
            push_constant_ranges.push(vk::PushConstantRange {
                stage_flags: signature.push_constant_stages,
                offset: 0,
                size: layout.root_constant_bytes(),
            });
        }

        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&signature.set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        signature.layout = unsafe {
            signature
                .device
                .device
                .create_pipeline_layout(&create_info, None)
        }
        .map_err(|e| vk_error("create pipeline layout", e))?;
        signature
            .device
            .namer
            .set_name(signature.layout, layout.debug_name());

        log::debug!(
            "Vulkan: root signature {:?} with {} sets, {} bytes of push constants",
            layout.debug_name(),
            signature.set_layouts.len(),
            layout.root_constant_bytes()
        );
        Ok(signature)
    }

    fn create_set_layout(
        &mut self,
        space: &RegisterSpaceLayout,
    ) -> Result<vk::DescriptorSetLayout, GraphicsError> {
        let first_sampler = self.static_samplers.len();
        for sampler in &space.static_samplers {
            let handle = create_sampler(&self.device.device, &sampler.sampler)?;
            self.static_samplers.push(handle);
        }
        let immutable = &self.static_samplers[first_sampler..];

        let mut bindings = Vec::with_capacity(space.bindings.len() + immutable.len());
        let mut flags = Vec::with_capacity(bindings.capacity());
        for binding in &space.bindings {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding_index(&binding.slot))
                    .descriptor_type(conversion::descriptor_type(
                        binding.slot.binding_type,
                        binding.descriptor,
                    ))
                    .descriptor_count(binding.array_size)
                    .stage_flags(conversion::shader_stages(binding.stages)),
            );
            flags.push(if binding.is_bindless {
                vk::DescriptorBindingFlags::PARTIALLY_BOUND
            } else {
                vk::DescriptorBindingFlags::empty()
            });
        }
        for (desc, sampler) in space.static_samplers.iter().zip(immutable) {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding_index(&desc.slot()))
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .stage_flags(conversion::shader_stages(desc.stages))
                    .immutable_samplers(std::slice::from_ref(sampler)),
            );
            flags.push(vk::DescriptorBindingFlags::empty());
        }

        let mut binding_flags =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&flags);
        let mut create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        if flags.iter().any(|f| !f.is_empty()) {
            create_info = create_info.push_next(&mut binding_flags);
        }
        unsafe { self.device.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(|e| vk_error("create descriptor set layout", e))
    }
}

impl Drop for VulkanRootSignature {
    fn drop(&mut self) {
        self.device.defer(DeferredResource::RootSignature {
            layout: self.layout,
            set_layouts: std::mem::take(&mut self.set_layouts),
            samplers: std::mem::take(&mut self.static_samplers),
        });
    }
}

impl std::fmt::Debug for VulkanRootSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanRootSignature")
            .field("layout", &self.layout)
            .field("sets", &self.set_layouts.len())
            .finish()
    }
}

pub struct VulkanPipeline {
    device: Arc<VulkanDevice>,
    pub(super) pipeline: vk::Pipeline,
    pub(super) bind_point: vk::PipelineBindPoint,
}

/// Shader modules live only until the pipeline is created.
struct ShaderModules<'a> {
    device: &'a ash::Device,
    modules: Vec<vk::ShaderModule>,
    entry_points: Vec<CString>,
}

impl<'a> ShaderModules<'a> {
    fn load(device: &'a ash::Device, stages: &[CompiledShaderStage]) -> Result<Self, GraphicsError> {
        let mut modules = Self {
            device,
            modules: Vec::with_capacity(stages.len()),
            entry_points: Vec::with_capacity(stages.len()),
        };
        for stage in stages {
            let ShaderBytecode::SpirV(words) = &stage.bytecode else {
                return Err(GraphicsError::FeatureNotSupported(format!(
                    "Vulkan loads SPIR-V shaders, the {:?} stage is {}",
                    stage.stage,
                    stage.bytecode.kind_name()
                )));
            };
            let entry_point = CString::new(stage.entry_point.as_str()).map_err(|e| {
                GraphicsError::InvalidParameter(format!("invalid entry point name: {e}"))
            })?;
            let create_info = vk::ShaderModuleCreateInfo::default().code(words);
            let module = unsafe { device.create_shader_module(&create_info, None) }
                .map_err(|e| vk_error("create shader module", e))?;
            modules.modules.push(module);
            modules.entry_points.push(entry_point);
        }
        Ok(modules)
    }

    fn stage_infos(&self, stages: &[CompiledShaderStage]) -> Vec<vk::PipelineShaderStageCreateInfo<'_>> {
        stages
            .iter()
            .zip(&self.modules)
            .zip(&self.entry_points)
            .map(|((stage, module), entry_point)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(conversion::shader_stage(stage.stage))
                    .module(*module)
                    .name(entry_point)
            })
            .collect()
    }
}

impl Drop for ShaderModules<'_> {
    fn drop(&mut self) {
        for module in self.modules.drain(..) {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
    }
}

impl VulkanPipeline {
    pub(super) fn new(
        device: Arc<VulkanDevice>,
        desc: &PipelineDesc,
        root_signature: &VulkanRootSignature,
    ) -> Result<Self, GraphicsError> {
        let modules = ShaderModules::load(&device.device, &desc.shaders)?;
        let stages = modules.stage_infos(&desc.shaders);

        let (pipeline, bind_point) = match desc.bind_point {
            BindPoint::Compute => {
                let stage = stages.first().copied().ok_or_else(|| {
                    GraphicsError::InvalidParameter("compute pipeline without a stage".into())
                })?;
                let create_info = vk::ComputePipelineCreateInfo::default()
                    .stage(stage)
                    .layout(root_signature.layout);
                let pipelines = unsafe {
                    device.device.create_compute_pipelines(
                        vk::PipelineCache::null(),
                        &[create_info],
                        None,
                    )
                }
                .map_err(|(_, e)| vk_error("create compute pipeline", e))?;
                (pipelines[0], vk::PipelineBindPoint::COMPUTE)
            }
            BindPoint::Graphics => (
                create_graphics_pipeline(&device.device, desc, &stages, root_signature.layout)?,
                vk::PipelineBindPoint::GRAPHICS,
            ),
        };
        drop(stages);
        drop(modules);

        device.namer.set_name(pipeline, desc.debug_name.as_deref());
        Ok(Self {
            device,
            pipeline,
            bind_point,
        })
    }
}

fn create_graphics_pipeline(
    device: &ash::Device,
    desc: &PipelineDesc,
    stages: &[vk::PipelineShaderStageCreateInfo<'_>],
    layout: vk::PipelineLayout,
) -> Result<vk::Pipeline, GraphicsError> {
    let state = &desc.graphics;

    let binding_descriptions: Vec<_> = state
        .input_layout
        .buffers
        .iter()
        .enumerate()
        .map(|(i, buffer)| {
            vk::VertexInputBindingDescription::default()
                .binding(i as u32)
                .stride(buffer.stride)
                .input_rate(conversion::step_mode(buffer.step_mode))
        })
        .collect();
    let attribute_descriptions: Vec<_> = state
        .input_layout
        .attributes
        .iter()
        .map(|attribute| {
            vk::VertexInputAttributeDescription::default()
                .location(attribute.location)
                .binding(attribute.buffer_index)
                .format(conversion::vertex_format(attribute.format))
                .offset(attribute.offset)
        })
        .collect();
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(conversion::topology(state.topology))
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    // The encoder flips the viewport to match D3D clip space, which reverses
    // the winding order.
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(conversion::cull_mode(state.cull_mode))
        .front_face(vk::FrontFace::CLOCKWISE);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(conversion::sample_count(state.sample_count));

    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(state.depth_test.is_some())
        .depth_write_enable(state.depth_write)
        .depth_compare_op(state.depth_test.map_or(vk::CompareOp::ALWAYS, conversion::compare_op));

    let blend_attachments: Vec<_> = state
        .render_target_formats
        .iter()
        .map(|_| {
            vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
        })
        .collect();
    let color_blend_state =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_formats: Vec<_> = state
        .render_target_formats
        .iter()
        .map(|format| conversion::format(*format))
        .collect();
    let depth_format = state
        .depth_stencil_format
        .map_or(vk::Format::UNDEFINED, conversion::format);
    let stencil_format = match state.depth_stencil_format {
        Some(format) if format.has_stencil() => depth_format,
        _ => vk::Format::UNDEFINED,
    };
    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(depth_format)
        .stencil_attachment_format(stencil_format);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
    }
    .map_err(|(_, e)| vk_error("create graphics pipeline", e))?;
    Ok(pipelines[0])
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        self.device.defer(DeferredResource::Pipeline(self.pipeline));
    }
}

impl std::fmt::Debug for VulkanPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanPipeline")
            .field("pipeline", &self.pipeline)
            .field("bind_point", &self.bind_point)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_shifts() {
        assert_eq!(binding_index(&ResourceBindingSlot::cbv(0, 0)), 1000);
        assert_eq!(binding_index(&ResourceBindingSlot::srv(3, 1)), 2003);
        assert_eq!(binding_index(&ResourceBindingSlot::uav(7, 0)), 3007);
        assert_eq!(binding_index(&ResourceBindingSlot::sampler(1, 2)), 4001);
    }
}
