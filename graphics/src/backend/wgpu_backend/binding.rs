//! Root signatures, pipelines and bind groups.
//!
//! Register classes share one binding namespace per bind group: a slot's
//! binding index is its register plus the offset of its class.

use std::num::NonZeroU64;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{BoundResource, DescriptorWrite};
use crate::binding::{LayoutBinding, RegisterSpaceLayout, RootSignatureLayout};
use crate::descriptors::{DescriptorAllocation, DescriptorAllocator};
use crate::error::GraphicsError;
use crate::pipeline::{BindPoint, PipelineDesc, ShaderBytecode, ShaderStage};
use crate::types::{ResourceBindingSlot, ResourceBindingType, ResourceDescriptor};

use super::conversion;
use super::resources::create_sampler;

const SRV_BINDING_OFFSET: u32 = 200;
const UAV_BINDING_OFFSET: u32 = 400;
const SAMPLER_BINDING_OFFSET: u32 = 600;

/// Binding index of a slot inside its bind group.
pub(super) fn binding_index(slot: &ResourceBindingSlot) -> u32 {
    let offset = match slot.binding_type {
        ResourceBindingType::ConstantBuffer => 0,
        ResourceBindingType::ShaderResource => SRV_BINDING_OFFSET,
        ResourceBindingType::UnorderedAccess => UAV_BINDING_OFFSET,
        ResourceBindingType::Sampler => SAMPLER_BINDING_OFFSET,
    };
    offset + slot.binding
}

fn layout_entry(binding: &LayoutBinding) -> Result<wgpu::BindGroupLayoutEntry, GraphicsError> {
    if binding.array_size > 1 || binding.is_bindless {
        return Err(GraphicsError::FeatureNotSupported(format!(
            "descriptor arrays ({}) on wgpu",
            binding.name
        )));
    }
    let is_texture = binding
        .descriptor
        .intersects(ResourceDescriptor::TEXTURE | ResourceDescriptor::RW_TEXTURE | ResourceDescriptor::TEXTURE_CUBE);
    let view_dimension = if binding.descriptor.contains(ResourceDescriptor::TEXTURE_CUBE) {
        wgpu::TextureViewDimension::Cube
    } else {
        wgpu::TextureViewDimension::D2
    };
    let ty = match (binding.slot.binding_type, is_texture) {
        (ResourceBindingType::ConstantBuffer, _) => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        (ResourceBindingType::ShaderResource, true) => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension,
            multisampled: false,
        },
        (ResourceBindingType::ShaderResource, false) => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        (ResourceBindingType::UnorderedAccess, true) => {
            return Err(GraphicsError::FeatureNotSupported(format!(
                "storage texture {} on wgpu",
                binding.name
            )));
        }
        (ResourceBindingType::UnorderedAccess, false) => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        (ResourceBindingType::Sampler, _) => {
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
        }
    };
    Ok(wgpu::BindGroupLayoutEntry {
        binding: binding_index(&binding.slot),
        visibility: conversion::shader_stages(binding.stages),
        ty,
        count: None,
    })
}

/// One bind group layout per register space, plus the samplers of the
/// space's static sampler slots.
#[derive(Debug)]
pub struct WgpuRootSignature {
    pub(super) layout: wgpu::PipelineLayout,
    pub(super) group_layouts: Vec<wgpu::BindGroupLayout>,
    pub(super) static_samplers: Vec<Vec<(u32, wgpu::Sampler)>>,
}

impl WgpuRootSignature {
    pub(super) fn new(device: &wgpu::Device, layout: &RootSignatureLayout) -> Result<Self, GraphicsError> {
        if layout.root_constant_bytes() > 0 {
            return Err(GraphicsError::FeatureNotSupported(
                "root constants on wgpu".into(),
            ));
        }
        let mut group_layouts = Vec::with_capacity(layout.spaces().len());
        let mut static_samplers = Vec::with_capacity(layout.spaces().len());
        for space in layout.spaces() {
            let mut entries = space
                .bindings
                .iter()
                .map(layout_entry)
                .collect::<Result<Vec<_>, _>>()?;
            let mut samplers = Vec::new();
            for sampler in &space.static_samplers {
                let binding = binding_index(&sampler.slot());
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding,
                    visibility: conversion::shader_stages(sampler.stages),
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                });
                samplers.push((binding, create_sampler(device, &sampler.sampler)));
            }
            group_layouts.push(device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: layout.debug_name(),
                entries: &entries,
            }));
            static_samplers.push(samplers);
        }
        let layout_refs: Vec<_> = group_layouts.iter().collect();
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: layout.debug_name(),
            bind_group_layouts: &layout_refs,
            immediate_size: 0,
        });
        Ok(Self {
            layout: pipeline_layout,
            group_layouts,
            static_samplers,
        })
    }
}

#[derive(Debug)]
pub enum WgpuPipeline {
    Render(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

fn shader_module(
    device: &wgpu::Device,
    desc: &PipelineDesc,
    stage: ShaderStage,
) -> Result<Option<(wgpu::ShaderModule, String)>, GraphicsError> {
    let Some(shader) = desc.stage(stage) else {
        return Ok(None);
    };
    let ShaderBytecode::Wgsl(source) = &shader.bytecode else {
        return Err(GraphicsError::FeatureNotSupported(format!(
            "{} shaders on wgpu, WGSL is required",
            shader.bytecode.kind_name()
        )));
    };
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: desc.debug_name.as_deref(),
        source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
    });
    Ok(Some((module, shader.entry_point.clone())))
}

impl WgpuPipeline {
    pub(super) fn new(
        device: &wgpu::Device,
        desc: &PipelineDesc,
        root_signature: &WgpuRootSignature,
    ) -> Result<Self, GraphicsError> {
        let missing = |stage: &str| {
            GraphicsError::InvalidParameter(format!("pipeline {:?} has no {stage} shader", desc.debug_name))
        };
        if desc.bind_point == BindPoint::Compute {
            let (module, entry_point) =
                shader_module(device, desc, ShaderStage::Compute)?.ok_or_else(|| missing("compute"))?;
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: desc.debug_name.as_deref(),
                layout: Some(&root_signature.layout),
                module: &module,
                entry_point: Some(&entry_point),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            return Ok(Self::Compute(pipeline));
        }

        let graphics = &desc.graphics;
        let (vertex_module, vertex_entry) =
            shader_module(device, desc, ShaderStage::Vertex)?.ok_or_else(|| missing("vertex"))?;
        let pixel = shader_module(device, desc, ShaderStage::Pixel)?;

        let attributes: Vec<Vec<wgpu::VertexAttribute>> = (0..graphics.input_layout.buffers.len())
            .map(|index| {
                graphics
                    .input_layout
                    .attributes
                    .iter()
                    .filter(|a| a.buffer_index as usize == index)
                    .map(|a| wgpu::VertexAttribute {
                        format: conversion::vertex_format(a.format),
                        offset: a.offset as u64,
                        shader_location: a.location,
                    })
                    .collect()
            })
            .collect();
        let vertex_buffers: Vec<_> = graphics
            .input_layout
            .buffers
            .iter()
            .zip(&attributes)
            .map(|(buffer, attributes)| wgpu::VertexBufferLayout {
                array_stride: buffer.stride as u64,
                step_mode: conversion::step_mode(buffer.step_mode),
                attributes,
            })
            .collect();

        let targets = graphics
            .render_target_formats
            .iter()
            .map(|format| {
                conversion::format(*format)
                    .map(|format| {
                        Some(wgpu::ColorTargetState {
                            format,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })
                    })
                    .ok_or_else(|| GraphicsError::FeatureNotSupported(format!("{format:?} render targets")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let depth_stencil = match graphics.depth_stencil_format {
            Some(format) => Some(wgpu::DepthStencilState {
                format: conversion::format(format).ok_or_else(|| {
                    GraphicsError::FeatureNotSupported(format!("{format:?} depth targets"))
                })?,
                depth_write_enabled: graphics.depth_write,
                depth_compare: graphics
                    .depth_test
                    .map(conversion::compare_op)
                    .unwrap_or(wgpu::CompareFunction::Always),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            None => None,
        };

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: desc.debug_name.as_deref(),
            layout: Some(&root_signature.layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some(&vertex_entry),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &vertex_buffers,
            },
            fragment: pixel.as_ref().map(|(module, entry_point)| wgpu::FragmentState {
                module,
                entry_point: Some(entry_point),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &targets,
            }),
            primitive: wgpu::PrimitiveState {
                topology: conversion::topology(graphics.topology),
                strip_index_format: conversion::strip_index_format(graphics.topology),
                front_face: wgpu::FrontFace::Cw,
                cull_mode: conversion::cull_mode(graphics.cull_mode),
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil,
            multisample: wgpu::MultisampleState {
                count: graphics.sample_count.max(1),
                ..Default::default()
            },
            multiview_mask: None,
            cache: None,
        });
        Ok(Self::Render(pipeline))
    }
}

#[derive(Debug, Default)]
struct GroupState {
    group: Option<wgpu::BindGroup>,
    resources: Option<DescriptorAllocation>,
    samplers: Option<DescriptorAllocation>,
}

/// Bind group of one register space. wgpu groups are immutable, so every
/// write creates a new native group.
#[derive(Debug)]
pub struct WgpuBindGroup {
    device: wgpu::Device,
    group_layout: wgpu::BindGroupLayout,
    static_samplers: Vec<(u32, wgpu::Sampler)>,
    space: RegisterSpaceLayout,
    resource_heap: Arc<DescriptorAllocator>,
    sampler_heap: Arc<DescriptorAllocator>,
    state: Mutex<GroupState>,
}

/// A resolved descriptor, owned so that entries can borrow it.
enum Resolved {
    Buffer {
        buffer: wgpu::Buffer,
        offset: u64,
        size: u64,
    },
    View(wgpu::TextureView),
    Sampler(wgpu::Sampler),
}

impl WgpuBindGroup {
    pub(super) fn new(
        device: &wgpu::Device,
        root_signature: &WgpuRootSignature,
        layout: &RootSignatureLayout,
        register_space: u32,
        resource_heap: Arc<DescriptorAllocator>,
        sampler_heap: Arc<DescriptorAllocator>,
    ) -> Result<Self, GraphicsError> {
        let space = layout.space(register_space).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "register space {register_space} is not part of the root signature"
            ))
        })?;
        let index = space.set_index as usize;
        let group_layout = root_signature
            .group_layouts
            .get(index)
            .cloned()
            .ok_or_else(|| GraphicsError::Internal("missing bind group layout".into()))?;
        Ok(Self {
            device: device.clone(),
            group_layout,
            static_samplers: root_signature.static_samplers.get(index).cloned().unwrap_or_default(),
            space: space.clone(),
            resource_heap,
            sampler_heap,
            state: Mutex::new(GroupState::default()),
        })
    }

    pub(super) fn set_index(&self) -> u32 {
        self.space.set_index
    }

    pub(super) fn bind_group(&self) -> Option<wgpu::BindGroup> {
        self.state.lock().group.clone()
    }

    /// Every binding of the space must be written.
    pub(crate) fn write(&self, writes: &[DescriptorWrite]) -> Result<(), GraphicsError> {
        let resolved = self
            .space
            .bindings
            .iter()
            .map(|binding| {
                let write = writes
                    .iter()
                    .find(|w| w.slot == binding.slot && w.array_element == 0)
                    .ok_or_else(|| {
                        GraphicsError::InvalidParameter(format!(
                            "{} ({}) is not bound",
                            binding.name, binding.slot
                        ))
                    })?;
                Ok((binding_index(&binding.slot), resolve(write)?))
            })
            .collect::<Result<Vec<_>, GraphicsError>>()?;

        let mut state = self.state.lock();
        self.release(&mut state);
        if self.space.num_resources > 0 {
            state.resources = Some(self.resource_heap.allocate(self.space.num_resources)?);
        }
        if self.space.num_samplers > 0 {
            state.samplers = Some(self.sampler_heap.allocate(self.space.num_samplers)?);
        }

        let mut entries: Vec<_> = resolved
            .iter()
            .map(|(binding, resource)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: match resource {
                    Resolved::Buffer {
                        buffer,
                        offset,
                        size,
                    } => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer,
                        offset: *offset,
                        size: NonZeroU64::new(*size),
                    }),
                    Resolved::View(view) => wgpu::BindingResource::TextureView(view),
                    Resolved::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                },
            })
            .collect();
        entries.extend(self.static_samplers.iter().map(|(binding, sampler)| wgpu::BindGroupEntry {
            binding: *binding,
            resource: wgpu::BindingResource::Sampler(sampler),
        }));
        state.group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &self.group_layout,
            entries: &entries,
        }));
        Ok(())
    }

    fn release(&self, state: &mut GroupState) {
        state.group = None;
        if let Some(allocation) = state.resources.take() {
            self.resource_heap.free(allocation);
        }
        if let Some(allocation) = state.samplers.take() {
            self.sampler_heap.free(allocation);
        }
    }
}

fn resolve(write: &DescriptorWrite) -> Result<Resolved, GraphicsError> {
    let wrong_backend =
        || GraphicsError::InvalidParameter(format!("{} holds a non-wgpu resource", write.slot));
    Ok(match &write.resource {
        BoundResource::Buffer {
            buffer,
            offset,
            size,
        } => Resolved::Buffer {
            buffer: buffer.as_wgpu().ok_or_else(wrong_backend)?.buffer.clone(),
            offset: *offset,
            size: *size,
        },
        BoundResource::Texture(texture) => {
            Resolved::View(texture.as_wgpu().ok_or_else(wrong_backend)?.views()?.view)
        }
        BoundResource::Sampler(sampler) => {
            Resolved::Sampler(sampler.as_wgpu().ok_or_else(wrong_backend)?.sampler.clone())
        }
    })
}

impl Drop for WgpuBindGroup {
    fn drop(&mut self) {
        let mut state = std::mem::take(self.state.get_mut());
        self.release(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_classes_do_not_collide() {
        let indices = [
            binding_index(&ResourceBindingSlot::cbv(3, 0)),
            binding_index(&ResourceBindingSlot::srv(3, 0)),
            binding_index(&ResourceBindingSlot::uav(3, 0)),
            binding_index(&ResourceBindingSlot::sampler(3, 0)),
        ];
        assert_eq!(indices, [3, 203, 403, 603]);
    }
}
