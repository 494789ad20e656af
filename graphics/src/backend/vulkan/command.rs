//! Command pools and the command stream encoder.

use ash::vk;

use crate::command::{AttachmentCommand, BufferTextureLayout, Command, RenderingCommand, TextureRegion};
use crate::error::GraphicsError;
use crate::types::{IndexType, Offset3d, ScissorRect, Viewport};

use super::barriers::{BarrierBatch, batch_transitions};
use super::resources::VulkanTexture;
use super::{VulkanDevice, conversion, vk_error};

/// Create a command pool whose buffers can be reset one by one.
pub(super) fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, GraphicsError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&pool_info, None) }
        .map_err(|e| vk_error("create command pool", e))
}

fn wrong_backend(what: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{what} was not created by the Vulkan backend"))
}

/// Records a crate command stream into one native command buffer.
pub(super) struct Encoder<'a> {
    device: &'a VulkanDevice,
    cmd: vk::CommandBuffer,
    queue_stages: vk::PipelineStageFlags,
    bind_point: vk::PipelineBindPoint,
    in_rendering: bool,
}

impl<'a> Encoder<'a> {
    pub fn new(
        device: &'a VulkanDevice,
        cmd: vk::CommandBuffer,
        queue_stages: vk::PipelineStageFlags,
        default_bind_point: vk::PipelineBindPoint,
    ) -> Self {
        Self {
            device,
            cmd,
            queue_stages,
            bind_point: default_bind_point,
            in_rendering: false,
        }
    }

    /// Begin the command buffer, encode `commands` and end it.
    pub fn encode(mut self, commands: &[Command]) -> Result<(), GraphicsError> {
        crate::profile_scope!("vulkan_encode");
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.device.begin_command_buffer(self.cmd, &begin_info) }
            .map_err(|e| vk_error("begin command buffer", e))?;

        for command in commands {
            self.command(command)?;
        }
        if self.in_rendering {
            log::warn!("Vulkan: command stream ended inside a rendering scope");
            self.device.end_rendering(self.cmd);
        }

        unsafe { self.device.device.end_command_buffer(self.cmd) }
            .map_err(|e| vk_error("end command buffer", e))
    }

    fn command(&mut self, command: &Command) -> Result<(), GraphicsError> {
        let vk_device = self.device;
        let device = &vk_device.device;
        let cmd = self.cmd;
        match command {
            Command::BeginRendering(rendering) => self.begin_rendering(rendering)?,
            Command::EndRendering => {
                vk_device.end_rendering(cmd);
                self.in_rendering = false;
            }
            Command::BindPipeline(pipeline) => {
                let pipeline = pipeline.as_vulkan().ok_or_else(|| wrong_backend("pipeline"))?;
                self.bind_point = pipeline.bind_point;
                unsafe { device.cmd_bind_pipeline(cmd, pipeline.bind_point, pipeline.pipeline) };
            }
            Command::BindVertexBuffer { slot, buffer, offset } => {
                let buffer = buffer.as_vulkan().ok_or_else(|| wrong_backend("vertex buffer"))?;
                unsafe { device.cmd_bind_vertex_buffers(cmd, *slot, &[buffer.buffer], &[*offset]) };
            }
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            } => {
                let buffer = buffer.as_vulkan().ok_or_else(|| wrong_backend("index buffer"))?;
                let index_type = match index_type {
                    IndexType::Uint16 => vk::IndexType::UINT16,
                    IndexType::Uint32 => vk::IndexType::UINT32,
                };
                unsafe { device.cmd_bind_index_buffer(cmd, buffer.buffer, *offset, index_type) };
            }
            Command::SetViewport(viewport) => self.set_viewport(viewport),
            Command::SetScissor(scissor) => self.set_scissor(scissor),
            Command::BindResourceGroup {
                root_signature,
                group,
                register_space,
                root_constants,
            } => {
                let root_signature = root_signature
                    .as_vulkan()
                    .ok_or_else(|| wrong_backend("root signature"))?;
                let group = group.as_vulkan().ok_or_else(|| wrong_backend("bind group"))?;
                match group.descriptor_set() {
                    Some(set) => unsafe {
                        device.cmd_bind_descriptor_sets(
                            cmd,
                            self.bind_point,
                            root_signature.layout,
                            group.set_index(),
                            &[set],
                            &[],
                        );
                    },
                    None => log::warn!(
                        "Vulkan: bind group for space{register_space} bound before its first update"
                    ),
                }
                for (offset, bytes) in root_constants {
                    unsafe {
                        device.cmd_push_constants(
                            cmd,
                            root_signature.layout,
                            root_signature.push_constant_stages,
                            *offset,
                            bytes,
                        );
                    }
                }
            }
            Command::PipelineBarrier { buffers, textures } => {
                batch_transitions(buffers, textures, self.queue_stages).submit(device, cmd);
            }
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => unsafe {
                device.cmd_draw(cmd, *vertex_count, *instance_count, *first_vertex, *first_instance);
            },
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => unsafe {
                device.cmd_draw_indexed(
                    cmd,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                );
            },
            Command::Dispatch { x, y, z } => unsafe { device.cmd_dispatch(cmd, *x, *y, *z) },
            Command::CopyBufferRegion {
                src,
                src_offset,
                dst,
                dst_offset,
                num_bytes,
            } => {
                let src = src.as_vulkan().ok_or_else(|| wrong_backend("copy source"))?;
                let dst = dst.as_vulkan().ok_or_else(|| wrong_backend("copy destination"))?;
                let region = vk::BufferCopy {
                    src_offset: *src_offset,
                    dst_offset: *dst_offset,
                    size: *num_bytes,
                };
                unsafe { device.cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]) };
            }
            Command::CopyTextureRegion {
                src,
                src_region,
                dst,
                dst_region,
            } => {
                let src = src.as_vulkan().ok_or_else(|| wrong_backend("copy source"))?;
                let dst = dst.as_vulkan().ok_or_else(|| wrong_backend("copy destination"))?;
                let src_layout = self.ensure_copy_layout(src, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
                let dst_layout = self.ensure_copy_layout(dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
                let region = vk::ImageCopy {
                    src_subresource: subresource_layers(src, src_region),
                    src_offset: offset(src_region.offset),
                    dst_subresource: subresource_layers(dst, dst_region),
                    dst_offset: offset(dst_region.offset),
                    extent: extent(src_region),
                };
                unsafe {
                    device.cmd_copy_image(cmd, src.image, src_layout, dst.image, dst_layout, &[region]);
                }
            }
            Command::CopyBufferToTexture {
                src,
                layout,
                dst,
                region,
            } => {
                let src = src.as_vulkan().ok_or_else(|| wrong_backend("copy source"))?;
                let dst = dst.as_vulkan().ok_or_else(|| wrong_backend("copy destination"))?;
                let dst_layout = self.ensure_copy_layout(dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
                let copy = buffer_image_copy(dst, layout, region);
                unsafe {
                    device.cmd_copy_buffer_to_image(cmd, src.buffer, dst.image, dst_layout, &[copy]);
                }
            }
            Command::CopyTextureToBuffer {
                src,
                region,
                dst,
                layout,
            } => {
                let src = src.as_vulkan().ok_or_else(|| wrong_backend("copy source"))?;
                let dst = dst.as_vulkan().ok_or_else(|| wrong_backend("copy destination"))?;
                let src_layout = self.ensure_copy_layout(src, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
                let copy = buffer_image_copy(src, layout, region);
                unsafe {
                    device.cmd_copy_image_to_buffer(cmd, src.image, src_layout, dst.buffer, &[copy]);
                }
            }
            Command::BuildBottomLevelAs { .. } | Command::BuildTopLevelAs { .. } => {
                return Err(GraphicsError::FeatureNotSupported(format!(
                    "{} on Vulkan",
                    command.name()
                )));
            }
        }
        Ok(())
    }

    /// Layout to copy with, moving the texture first when its current
    /// layout cannot be used for copies.
    fn ensure_copy_layout(&self, texture: &VulkanTexture, preferred: vk::ImageLayout) -> vk::ImageLayout {
        let current = texture.layout();
        if current == preferred || current == vk::ImageLayout::GENERAL {
            return current;
        }
        log::trace!("Vulkan: implicit {current:?} -> {preferred:?} transition for a copy");
        let mut batch = BarrierBatch::new();
        batch.add_layout_change(texture, preferred);
        batch.submit(&self.device.device, self.cmd);
        preferred
    }

    fn attachment_info<'c>(
        &self,
        attachment: &AttachmentCommand,
        layout: vk::ImageLayout,
        batch: &mut BarrierBatch<'c>,
        texture: &'c VulkanTexture,
    ) -> vk::RenderingAttachmentInfo<'static> {
        let current = texture.layout();
        let layout = if current == layout || current == vk::ImageLayout::GENERAL {
            current
        } else {
            batch.add_layout_change(texture, layout);
            layout
        };
        vk::RenderingAttachmentInfo::default()
            .image_view(texture.view)
            .image_layout(layout)
            .load_op(conversion::load_op(attachment.load))
            .store_op(conversion::store_op(attachment.store))
            .clear_value(conversion::clear_value(attachment.clear))
    }

    fn begin_rendering(&mut self, rendering: &RenderingCommand) -> Result<(), GraphicsError> {
        let mut batch = BarrierBatch::new();
        let mut color_attachments = Vec::with_capacity(rendering.color.len());
        for attachment in &rendering.color {
            let texture = attachment
                .texture
                .as_vulkan()
                .ok_or_else(|| wrong_backend("render target"))?;
            color_attachments.push(self.attachment_info(
                attachment,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                &mut batch,
                texture,
            ));
        }
        let depth_attachment = match &rendering.depth {
            Some(attachment) => {
                let texture = attachment
                    .texture
                    .as_vulkan()
                    .ok_or_else(|| wrong_backend("depth target"))?;
                Some((
                    self.attachment_info(
                        attachment,
                        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                        &mut batch,
                        texture,
                    ),
                    texture.format.has_stencil(),
                ))
            }
            None => None,
        };
        if !batch.is_empty() {
            log::trace!("Vulkan: {} implicit attachment transitions", batch.len());
            batch.submit(&self.device.device, self.cmd);
        }

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: rendering.width,
                height: rendering.height,
            },
        };
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some((depth, has_stencil)) = &depth_attachment {
            rendering_info = rendering_info.depth_attachment(depth);
            if *has_stencil {
                rendering_info = rendering_info.stencil_attachment(depth);
            }
        }
        self.device.begin_rendering(self.cmd, &rendering_info);
        self.in_rendering = true;

        self.set_viewport(&Viewport::from_dimensions(rendering.width, rendering.height));
        self.set_scissor(&ScissorRect::from_dimensions(rendering.width, rendering.height));
        Ok(())
    }

    /// Flipped so that +Y points up in clip space as on D3D.
    fn set_viewport(&self, viewport: &Viewport) {
        let flipped = vk::Viewport {
            x: viewport.x,
            y: viewport.y + viewport.height,
            width: viewport.width,
            height: -viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.device.device.cmd_set_viewport(self.cmd, 0, &[flipped]) };
    }

    fn set_scissor(&self, scissor: &ScissorRect) {
        let rect = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x,
                y: scissor.y,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        unsafe { self.device.device.cmd_set_scissor(self.cmd, 0, &[rect]) };
    }
}

fn subresource_layers(texture: &VulkanTexture, region: &TextureRegion) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: texture.aspect_mask(),
        mip_level: region.mip_level,
        base_array_layer: region.array_layer,
        layer_count: 1,
    }
}

fn offset(offset: Offset3d) -> vk::Offset3D {
    vk::Offset3D {
        x: offset.x as i32,
        y: offset.y as i32,
        z: offset.z as i32,
    }
}

fn extent(region: &TextureRegion) -> vk::Extent3D {
    vk::Extent3D {
        width: region.extent.width,
        height: region.extent.height,
        depth: region.extent.depth.max(1),
    }
}

/// Buffer rows are given in bytes; Vulkan wants them in texels.
fn buffer_image_copy(
    texture: &VulkanTexture,
    layout: &BufferTextureLayout,
    region: &TextureRegion,
) -> vk::BufferImageCopy {
    let block_size = u64::from(texture.format.block_size().max(1));
    let block_dimension = texture.format.block_dimension().max(1);
    vk::BufferImageCopy {
        buffer_offset: layout.offset,
        buffer_row_length: (layout.row_pitch / block_size) as u32 * block_dimension,
        buffer_image_height: layout.rows_per_slice * block_dimension,
        image_subresource: subresource_layers(texture, region),
        image_offset: offset(region.offset),
        image_extent: extent(region),
    }
}
