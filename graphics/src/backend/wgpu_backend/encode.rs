//! Command stream encoding into wgpu passes.
//!
//! Rendering scopes become render passes and each dispatch its own compute
//! pass. Pipeline, vertex/index buffer and bind group state recorded outside
//! a pass is replayed when the next pass opens. wgpu tracks resource states
//! itself, so barriers are dropped.

use std::collections::BTreeMap;

use crate::command::{BufferTextureLayout, Command, RenderingCommand, TextureRegion};
use crate::error::GraphicsError;
use crate::types::{IndexType, Viewport};

use super::binding::WgpuPipeline;
use super::conversion;
use super::resources::{TextureViews, WgpuBuffer, WgpuTexture};

fn wrong_backend(what: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{what} was not created by the wgpu backend"))
}

fn buffer(handle: &crate::backend::GpuBuffer) -> Result<&WgpuBuffer, GraphicsError> {
    handle.as_wgpu().ok_or_else(|| wrong_backend("buffer"))
}

fn texture(handle: &crate::backend::GpuTexture) -> Result<&WgpuTexture, GraphicsError> {
    handle.as_wgpu().ok_or_else(|| wrong_backend("texture"))
}

#[derive(Default)]
struct BoundState {
    render_pipeline: Option<wgpu::RenderPipeline>,
    compute_pipeline: Option<wgpu::ComputePipeline>,
    vertex_buffers: BTreeMap<u32, (wgpu::Buffer, u64)>,
    index_buffer: Option<(wgpu::Buffer, u64, wgpu::IndexFormat)>,
    bind_groups: BTreeMap<u32, wgpu::BindGroup>,
}

impl BoundState {
    /// Record a binding command. Returns false for commands that bind nothing.
    fn apply(&mut self, command: &Command) -> Result<bool, GraphicsError> {
        match command {
            Command::BindPipeline(pipeline) => {
                match pipeline.as_wgpu().ok_or_else(|| wrong_backend("pipeline"))? {
                    WgpuPipeline::Render(pipeline) => self.render_pipeline = Some(pipeline.clone()),
                    WgpuPipeline::Compute(pipeline) => self.compute_pipeline = Some(pipeline.clone()),
                }
            }
            Command::BindVertexBuffer { slot, buffer: b, offset } => {
                self.vertex_buffers.insert(*slot, (buffer(b)?.buffer.clone(), *offset));
            }
            Command::BindIndexBuffer {
                buffer: b,
                offset,
                index_type,
            } => {
                let format = match index_type {
                    IndexType::Uint16 => wgpu::IndexFormat::Uint16,
                    IndexType::Uint32 => wgpu::IndexFormat::Uint32,
                };
                self.index_buffer = Some((buffer(b)?.buffer.clone(), *offset, format));
            }
            Command::BindResourceGroup {
                group,
                root_constants,
                ..
            } => {
                if !root_constants.is_empty() {
                    return Err(GraphicsError::FeatureNotSupported("root constants on wgpu".into()));
                }
                let group = group.as_wgpu().ok_or_else(|| wrong_backend("bind group"))?;
                let native = group.bind_group().ok_or_else(|| {
                    GraphicsError::InvalidParameter("bind group bound before being written".into())
                })?;
                self.bind_groups.insert(group.set_index(), native);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Encode `commands` into a finished command buffer.
pub(super) fn encode(device: &wgpu::Device, commands: &[Command]) -> Result<wgpu::CommandBuffer, GraphicsError> {
    crate::profile_scope!("wgpu_encode");
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    let mut state = BoundState::default();
    let mut index = 0;
    while index < commands.len() {
        let command = &commands[index];
        index += 1;
        if state.apply(command)? {
            continue;
        }
        match command {
            Command::BeginRendering(rendering) => {
                let end = commands[index..]
                    .iter()
                    .position(|c| matches!(c, Command::EndRendering))
                    .map(|offset| index + offset)
                    .ok_or_else(|| GraphicsError::InvalidParameter("rendering scope is never closed".into()))?;
                encode_render_pass(&mut encoder, &mut state, rendering, &commands[index..end])?;
                index = end + 1;
            }
            Command::EndRendering => {
                return Err(GraphicsError::InvalidParameter("end_rendering without begin_rendering".into()));
            }
            Command::Dispatch { x, y, z } => {
                let pipeline = state.compute_pipeline.as_ref().ok_or_else(|| {
                    GraphicsError::InvalidParameter("dispatch without a compute pipeline".into())
                })?;
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: None,
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                for (set, group) in &state.bind_groups {
                    pass.set_bind_group(*set, group, &[]);
                }
                pass.dispatch_workgroups(*x, *y, *z);
            }
            Command::PipelineBarrier { .. } | Command::SetViewport(_) | Command::SetScissor(_) => {}
            Command::CopyBufferRegion {
                src,
                src_offset,
                dst,
                dst_offset,
                num_bytes,
            } => {
                encoder.copy_buffer_to_buffer(
                    &buffer(src)?.buffer,
                    *src_offset,
                    &buffer(dst)?.buffer,
                    *dst_offset,
                    *num_bytes,
                );
            }
            Command::CopyTextureRegion {
                src,
                src_region,
                dst,
                dst_region,
            } => {
                let src_views = texture(src)?.views()?;
                let dst_views = texture(dst)?.views()?;
                encoder.copy_texture_to_texture(
                    texel_copy(&src_views, src_region),
                    texel_copy(&dst_views, dst_region),
                    extent(src_region),
                );
            }
            Command::CopyBufferToTexture {
                src,
                layout,
                dst,
                region,
            } => {
                let dst = texture(dst)?;
                let views = dst.views()?;
                encoder.copy_buffer_to_texture(
                    buffer_copy(&buffer(src)?.buffer, layout),
                    texel_copy(&views, region),
                    extent(region),
                );
            }
            Command::CopyTextureToBuffer {
                src,
                region,
                dst,
                layout,
            } => {
                let views = texture(src)?.views()?;
                encoder.copy_texture_to_buffer(
                    texel_copy(&views, region),
                    buffer_copy(&buffer(dst)?.buffer, layout),
                    extent(region),
                );
            }
            Command::Draw { .. } | Command::DrawIndexed { .. } => {
                return Err(GraphicsError::InvalidParameter(format!(
                    "{} outside a rendering scope",
                    command.name()
                )));
            }
            Command::BuildBottomLevelAs { .. } | Command::BuildTopLevelAs { .. } => {
                return Err(GraphicsError::FeatureNotSupported(format!(
                    "{} on wgpu",
                    command.name()
                )));
            }
            Command::BindPipeline(_)
            | Command::BindVertexBuffer { .. }
            | Command::BindIndexBuffer { .. }
            | Command::BindResourceGroup { .. } => {}
        }
    }
    Ok(encoder.finish())
}

fn encode_render_pass(
    encoder: &mut wgpu::CommandEncoder,
    state: &mut BoundState,
    rendering: &RenderingCommand,
    commands: &[Command],
) -> Result<(), GraphicsError> {
    let color_views = rendering
        .color
        .iter()
        .map(|attachment| texture(&attachment.texture)?.views())
        .collect::<Result<Vec<_>, _>>()?;
    let depth = match &rendering.depth {
        Some(attachment) => {
            let depth_texture = texture(&attachment.texture)?;
            Some((depth_texture.views()?, depth_texture.format.has_stencil(), attachment))
        }
        None => None,
    };

    let color_attachments: Vec<_> = rendering
        .color
        .iter()
        .zip(&color_views)
        .map(|(attachment, views)| {
            Some(wgpu::RenderPassColorAttachment {
                view: &views.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: conversion::color_load_op(attachment.load, attachment.clear),
                    store: conversion::store_op(attachment.store),
                },
                depth_slice: None,
            })
        })
        .collect();
    let depth_stencil_attachment = depth.as_ref().map(|(views, has_stencil, attachment)| {
        wgpu::RenderPassDepthStencilAttachment {
            view: &views.view,
            depth_ops: Some(wgpu::Operations {
                load: conversion::depth_load_op(attachment.load, attachment.clear),
                store: conversion::store_op(attachment.store),
            }),
            stencil_ops: has_stencil.then(|| wgpu::Operations {
                load: conversion::stencil_load_op(attachment.load, attachment.clear),
                store: conversion::store_op(attachment.store),
            }),
        }
    });

    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: None,
        color_attachments: &color_attachments,
        depth_stencil_attachment,
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    });
    let full = Viewport::new(0.0, 0.0, rendering.width as f32, rendering.height as f32);
    pass.set_viewport(full.x, full.y, full.width, full.height, full.min_depth, full.max_depth);

    let bind_all = |pass: &mut wgpu::RenderPass<'_>, state: &BoundState| {
        if let Some(pipeline) = &state.render_pipeline {
            pass.set_pipeline(pipeline);
        }
        for (slot, (buffer, offset)) in &state.vertex_buffers {
            pass.set_vertex_buffer(*slot, buffer.slice(*offset..));
        }
        if let Some((buffer, offset, format)) = &state.index_buffer {
            pass.set_index_buffer(buffer.slice(*offset..), *format);
        }
        for (set, group) in &state.bind_groups {
            pass.set_bind_group(*set, group, &[]);
        }
    };
    bind_all(&mut pass, state);

    for command in commands {
        if state.apply(command)? {
            bind_all(&mut pass, state);
            continue;
        }
        match command {
            Command::SetViewport(viewport) => pass.set_viewport(
                viewport.x,
                viewport.y,
                viewport.width,
                viewport.height,
                viewport.min_depth,
                viewport.max_depth,
            ),
            Command::SetScissor(rect) => {
                let x = rect.x.max(0) as u32;
                let y = rect.y.max(0) as u32;
                let width = rect.width.min(rendering.width.saturating_sub(x));
                let height = rect.height.min(rendering.height.saturating_sub(y));
                pass.set_scissor_rect(x, y, width, height);
            }
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => pass.draw(
                *first_vertex..first_vertex + vertex_count,
                *first_instance..first_instance + instance_count,
            ),
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => pass.draw_indexed(
                *first_index..first_index + index_count,
                *vertex_offset,
                *first_instance..first_instance + instance_count,
            ),
            Command::PipelineBarrier { .. } => {}
            other => {
                return Err(GraphicsError::InvalidParameter(format!(
                    "{} inside a rendering scope",
                    other.name()
                )));
            }
        }
    }
    Ok(())
}

fn texel_copy<'a>(views: &'a TextureViews, region: &TextureRegion) -> wgpu::TexelCopyTextureInfo<'a> {
    wgpu::TexelCopyTextureInfo {
        texture: &views.texture,
        mip_level: region.mip_level,
        origin: wgpu::Origin3d {
            x: region.offset.x,
            y: region.offset.y,
            z: region.offset.z + region.array_layer,
        },
        aspect: wgpu::TextureAspect::All,
    }
}

fn buffer_copy<'a>(buffer: &'a wgpu::Buffer, layout: &BufferTextureLayout) -> wgpu::TexelCopyBufferInfo<'a> {
    wgpu::TexelCopyBufferInfo {
        buffer,
        layout: wgpu::TexelCopyBufferLayout {
            offset: layout.offset,
            bytes_per_row: Some(layout.row_pitch as u32),
            rows_per_image: Some(layout.rows_per_slice),
        },
    }
}

fn extent(region: &TextureRegion) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: region.extent.width,
        height: region.extent.height,
        depth_or_array_layers: region.extent.depth,
    }
}
