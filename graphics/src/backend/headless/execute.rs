//! CPU execution of recorded command streams.
//!
//! Copies and attachment clears are carried out on host memory. Draws and
//! dispatches are only counted; barriers and binds have no effect.
//! Acceleration structure builds compute the bounds of their input and
//! write an [`AsBuildSummary`] to the result buffer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{GpuBuffer, GpuTexture};
use crate::command::{
    AttachmentCommand, BufferTextureLayout, Command, LoadOp, RenderingCommand, TextureRegion,
};
use crate::error::GraphicsError;
use crate::raytracing::{AsBuildSummary, AsGeometry, Bounds, IndexData, InstanceRecord};
use crate::types::{ClearValue, Format, IndexType};

use super::memory::{HeadlessBuffer, HeadlessTexture};

/// Work counters of one queue.
#[derive(Debug, Default)]
pub(crate) struct ExecutionStats {
    pub draws: AtomicU64,
    pub dispatches: AtomicU64,
    pub copies: AtomicU64,
    pub as_builds: AtomicU64,
    pub submissions: AtomicU64,
}

impl std::fmt::Display for ExecutionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} submissions, {} draws, {} dispatches, {} copies, {} acceleration structure builds",
            self.submissions.load(Ordering::Relaxed),
            self.draws.load(Ordering::Relaxed),
            self.dispatches.load(Ordering::Relaxed),
            self.copies.load(Ordering::Relaxed),
            self.as_builds.load(Ordering::Relaxed)
        )
    }
}

fn foreign() -> GraphicsError {
    GraphicsError::InvalidParameter("resource belongs to another backend".into())
}

fn buffer(handle: &GpuBuffer) -> Result<&HeadlessBuffer, GraphicsError> {
    handle.as_headless().ok_or_else(foreign)
}

fn texture(handle: &GpuTexture) -> Result<&HeadlessTexture, GraphicsError> {
    handle.as_headless().ok_or_else(foreign)
}

fn check_region(texture: &HeadlessTexture, region: &TextureRegion) -> Result<(), GraphicsError> {
    let extent = texture.extent(region.mip_level);
    let fits = |offset: u32, size: u32, limit: u32| {
        offset.checked_add(size).is_some_and(|end| end <= limit)
    };
    if fits(region.offset.x, region.extent.width, extent.width)
        && fits(region.offset.y, region.extent.height, extent.height)
        && fits(region.offset.z, region.extent.depth, extent.depth)
    {
        Ok(())
    } else {
        Err(GraphicsError::InvalidParameter(format!(
            "copy region {:?}+{:?} exceeds mip {} extent {:?}",
            region.offset, region.extent, region.mip_level, extent
        )))
    }
}

/// Calls `f(z, block_row)` for every block row of a region.
fn for_each_row(
    format: Format,
    region: &TextureRegion,
    mut f: impl FnMut(u32, u32) -> Result<(), GraphicsError>,
) -> Result<(), GraphicsError> {
    for z in 0..region.extent.depth {
        for row in 0..format.num_rows(region.extent.height) {
            f(z, row)?;
        }
    }
    Ok(())
}

fn buffer_row_offset(layout: &BufferTextureLayout, z: u32, row: u32) -> u64 {
    layout.offset
        + u64::from(z) * u64::from(layout.rows_per_slice) * layout.row_pitch
        + u64::from(row) * layout.row_pitch
}

fn texture_row_offset(texture: &HeadlessTexture, region: &TextureRegion, z: u32, row: u32) -> usize {
    let block = texture.format().block_dimension();
    texture.texel_offset(
        region.mip_level,
        region.offset.x,
        region.offset.y + row * block,
        region.offset.z + z,
    )
}

fn copy_buffer_region(
    src: &GpuBuffer,
    src_offset: u64,
    dst: &GpuBuffer,
    dst_offset: u64,
    num_bytes: u64,
) -> Result<(), GraphicsError> {
    let data = buffer(src)?.read(src_offset, num_bytes)?;
    buffer(dst)?.write(dst_offset, &data)
}

fn copy_buffer_to_texture(
    src: &GpuBuffer,
    layout: &BufferTextureLayout,
    dst: &GpuTexture,
    region: &TextureRegion,
) -> Result<(), GraphicsError> {
    let (src, dst) = (buffer(src)?, texture(dst)?);
    check_region(dst, region)?;
    let format = dst.format();
    let row_bytes = format.row_bytes(region.extent.width);
    let mut texels = dst.subresource(region.mip_level, region.array_layer)?.write();
    for_each_row(format, region, |z, row| {
        let data = src.read(buffer_row_offset(layout, z, row), u64::from(row_bytes))?;
        let start = texture_row_offset(dst, region, z, row);
        texels[start..start + data.len()].copy_from_slice(&data);
        Ok(())
    })
}

fn copy_texture_to_buffer(
    src: &GpuTexture,
    region: &TextureRegion,
    dst: &GpuBuffer,
    layout: &BufferTextureLayout,
) -> Result<(), GraphicsError> {
    let (src, dst) = (texture(src)?, buffer(dst)?);
    check_region(src, region)?;
    let format = src.format();
    let row_bytes = format.row_bytes(region.extent.width) as usize;
    let texels = src.subresource(region.mip_level, region.array_layer)?.read();
    for_each_row(format, region, |z, row| {
        let start = texture_row_offset(src, region, z, row);
        dst.write(buffer_row_offset(layout, z, row), &texels[start..start + row_bytes])
    })
}

fn copy_texture_region(
    src: &GpuTexture,
    src_region: &TextureRegion,
    dst: &GpuTexture,
    dst_region: &TextureRegion,
) -> Result<(), GraphicsError> {
    let (src, dst) = (texture(src)?, texture(dst)?);
    check_region(src, src_region)?;
    check_region(dst, dst_region)?;
    if src.format().block_size() != dst.format().block_size() {
        return Err(GraphicsError::InvalidParameter(format!(
            "cannot copy {:?} texels into {:?}",
            src.format(),
            dst.format()
        )));
    }
    let format = src.format();
    let row_bytes = format.row_bytes(src_region.extent.width) as usize;
    // Staged through a temporary so a texture can copy onto itself.
    let mut rows = Vec::new();
    {
        let texels = src.subresource(src_region.mip_level, src_region.array_layer)?.read();
        for_each_row(format, src_region, |z, row| {
            let start = texture_row_offset(src, src_region, z, row);
            rows.extend_from_slice(&texels[start..start + row_bytes]);
            Ok(())
        })?;
    }
    let mut texels = dst.subresource(dst_region.mip_level, dst_region.array_layer)?.write();
    let mut chunks = rows.chunks_exact(row_bytes.max(1));
    for_each_row(format, dst_region, |z, row| {
        let start = texture_row_offset(dst, dst_region, z, row);
        if let Some(chunk) = chunks.next() {
            texels[start..start + row_bytes].copy_from_slice(chunk);
        }
        Ok(())
    })
}

fn read_f32s<const N: usize>(src: &HeadlessBuffer, offset: u64) -> Result<[f32; N], GraphicsError> {
    let bytes = src.read(offset, 4 * N as u64)?;
    let mut values = [0.0; N];
    for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(4)) {
        *value = bytemuck::pod_read_unaligned(chunk);
    }
    Ok(values)
}

fn read_indices(indices: &IndexData) -> Result<Vec<u32>, GraphicsError> {
    let bytes = buffer(&indices.buffer)?.read(
        indices.offset,
        u64::from(indices.num_indices) * indices.index_type.num_bytes(),
    )?;
    Ok(match indices.index_type {
        IndexType::Uint16 => bytes
            .chunks_exact(2)
            .map(|c| u32::from(bytemuck::pod_read_unaligned::<u16>(c)))
            .collect(),
        IndexType::Uint32 => bytes.chunks_exact(4).map(bytemuck::pod_read_unaligned::<u32>).collect(),
    })
}

fn build_bottom_level_as(geometries: &[AsGeometry], result: &GpuBuffer) -> Result<(), GraphicsError> {
    let mut bounds = Bounds::default();
    for geometry in geometries {
        match geometry {
            AsGeometry::Triangles {
                vertices,
                vertex_offset,
                vertex_stride,
                num_vertices,
                vertex_format,
                indices,
            } => {
                let vertices = buffer(vertices)?;
                let referenced = match indices {
                    Some(indices) => read_indices(indices)?,
                    None => (0..*num_vertices).collect(),
                };
                for index in referenced {
                    if index >= *num_vertices {
                        return Err(GraphicsError::InvalidParameter(format!(
                            "index {index} out of range of {num_vertices} vertices"
                        )));
                    }
                    let offset = vertex_offset + u64::from(index) * u64::from(*vertex_stride);
                    let position = match vertex_format {
                        Format::Rg32Float => {
                            let [x, y] = read_f32s::<2>(vertices, offset)?;
                            [x, y, 0.0]
                        }
                        _ => read_f32s::<3>(vertices, offset)?,
                    };
                    bounds.extend(position);
                }
            }
            AsGeometry::Aabbs {
                buffer: boxes,
                offset,
                stride,
                num_aabbs,
            } => {
                let boxes = buffer(boxes)?;
                for i in 0..u64::from(*num_aabbs) {
                    let at = offset + i * u64::from(*stride);
                    let [x0, y0, z0, x1, y1, z1] = read_f32s::<6>(boxes, at)?;
                    bounds.extend([x0, y0, z0]);
                    bounds.extend([x1, y1, z1]);
                }
            }
        }
    }
    let count = geometries.iter().map(AsGeometry::num_primitives).sum();
    let summary = AsBuildSummary::new(AsBuildSummary::BOTTOM_LEVEL, count, &bounds);
    buffer(result)?.write(0, bytemuck::bytes_of(&summary))
}

fn build_top_level_as(
    instances: &GpuBuffer,
    blas_results: &[Arc<GpuBuffer>],
    result: &GpuBuffer,
) -> Result<(), GraphicsError> {
    let records = buffer(instances)?.read(0, InstanceRecord::SIZE * blas_results.len() as u64)?;
    let mut bounds = Bounds::default();
    for (record, blas) in records.chunks_exact(InstanceRecord::SIZE as usize).zip(blas_results) {
        let record: InstanceRecord = bytemuck::pod_read_unaligned(record);
        let blas = buffer(blas)?.read(0, AsBuildSummary::SIZE)?;
        match AsBuildSummary::from_bytes(&blas) {
            Some(summary) if summary.is_built() => {
                for corner in summary.corners() {
                    bounds.extend(record.transform_point(corner));
                }
            }
            _ => log::warn!(
                "Headless: instance {} references a bottom level structure that was never built",
                record.id
            ),
        }
    }
    let summary = AsBuildSummary::new(AsBuildSummary::TOP_LEVEL, blas_results.len() as u32, &bounds);
    buffer(result)?.write(0, bytemuck::bytes_of(&summary))
}

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Bytes of one texel cleared to `clear`, or `None` if the format is not emulated.
fn clear_pattern(format: Format, clear: &ClearValue) -> Option<Vec<u8>> {
    match (format, clear) {
        (Format::Rgba8Unorm | Format::Rgba8UnormSrgb, ClearValue::Color([r, g, b, a])) => {
            Some(vec![unorm8(*r), unorm8(*g), unorm8(*b), unorm8(*a)])
        }
        (Format::Bgra8Unorm | Format::Bgra8UnormSrgb, ClearValue::Color([r, g, b, a])) => {
            Some(vec![unorm8(*b), unorm8(*g), unorm8(*r), unorm8(*a)])
        }
        (Format::R8Unorm, ClearValue::Color([r, ..])) => Some(vec![unorm8(*r)]),
        (Format::R32Float, ClearValue::Color([r, ..])) => Some(r.to_le_bytes().to_vec()),
        (Format::Rg32Float, ClearValue::Color([r, g, ..])) => {
            Some(bytemuck::cast_slice(&[*r, *g]).to_vec())
        }
        (Format::Rgba32Float, ClearValue::Color(color)) => {
            Some(bytemuck::cast_slice(color.as_slice()).to_vec())
        }
        (Format::D32Float, ClearValue::DepthStencil { depth, .. }) => {
            Some(depth.to_le_bytes().to_vec())
        }
        _ => None,
    }
}

fn clear_attachment(attachment: &AttachmentCommand) -> Result<(), GraphicsError> {
    if attachment.load != LoadOp::Clear {
        return Ok(());
    }
    let target = texture(&attachment.texture)?;
    let Some(pattern) = clear_pattern(target.format(), &attachment.clear) else {
        log::trace!("Headless: clear of {:?} not emulated", target.format());
        return Ok(());
    };
    let mut texels = target.subresource(0, 0)?.write();
    for texel in texels.chunks_exact_mut(pattern.len()) {
        texel.copy_from_slice(&pattern);
    }
    Ok(())
}

fn begin_rendering(rendering: &RenderingCommand) -> Result<(), GraphicsError> {
    for attachment in rendering.color.iter().chain(rendering.depth.as_ref()) {
        clear_attachment(attachment)?;
    }
    Ok(())
}

/// Run a command stream to completion on the calling thread.
pub(crate) fn execute(commands: &[Command], stats: &ExecutionStats) -> Result<(), GraphicsError> {
    for command in commands {
        match command {
            Command::BeginRendering(rendering) => begin_rendering(rendering)?,
            Command::Draw { .. } | Command::DrawIndexed { .. } => {
                stats.draws.fetch_add(1, Ordering::Relaxed);
            }
            Command::Dispatch { x, y, z } => {
                log::trace!("Headless: dispatch {x}x{y}x{z}");
                stats.dispatches.fetch_add(1, Ordering::Relaxed);
            }
            Command::CopyBufferRegion {
                src,
                src_offset,
                dst,
                dst_offset,
                num_bytes,
            } => {
                copy_buffer_region(src, *src_offset, dst, *dst_offset, *num_bytes)?;
                stats.copies.fetch_add(1, Ordering::Relaxed);
            }
            Command::CopyTextureRegion {
                src,
                src_region,
                dst,
                dst_region,
            } => {
                copy_texture_region(src, src_region, dst, dst_region)?;
                stats.copies.fetch_add(1, Ordering::Relaxed);
            }
            Command::CopyBufferToTexture {
                src,
                layout,
                dst,
                region,
            } => {
                copy_buffer_to_texture(src, layout, dst, region)?;
                stats.copies.fetch_add(1, Ordering::Relaxed);
            }
            Command::CopyTextureToBuffer {
                src,
                region,
                dst,
                layout,
            } => {
                copy_texture_to_buffer(src, region, dst, layout)?;
                stats.copies.fetch_add(1, Ordering::Relaxed);
            }
            Command::BuildBottomLevelAs { geometries, result } => {
                build_bottom_level_as(geometries, result)?;
                stats.as_builds.fetch_add(1, Ordering::Relaxed);
            }
            Command::BuildTopLevelAs {
                instances,
                blas_results,
                result,
                ..
            } => {
                build_top_level_as(instances, blas_results, result)?;
                stats.as_builds.fetch_add(1, Ordering::Relaxed);
            }
            Command::EndRendering
            | Command::BindPipeline(_)
            | Command::BindVertexBuffer { .. }
            | Command::BindIndexBuffer { .. }
            | Command::SetViewport(_)
            | Command::SetScissor(_)
            | Command::BindResourceGroup { .. }
            | Command::PipelineBarrier { .. } => {}
        }
    }
    stats.submissions.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::command::StoreOp;
    use crate::resources::{BufferDesc, TextureDesc};
    use crate::types::{Extent3d, Offset3d};

    fn gpu_buffer(bytes: u64) -> Arc<GpuBuffer> {
        Arc::new(GpuBuffer::Headless(HeadlessBuffer::new(&BufferDesc::new(bytes)).unwrap()))
    }

    fn gpu_texture(width: u32, height: u32, format: Format) -> Arc<GpuTexture> {
        let desc = TextureDesc::new_2d(width, height, format);
        Arc::new(GpuTexture::Headless(HeadlessTexture::new(&desc).unwrap()))
    }

    fn region(x: u32, y: u32, width: u32, height: u32) -> TextureRegion {
        TextureRegion {
            mip_level: 0,
            array_layer: 0,
            offset: Offset3d::new(x, y, 0),
            extent: Extent3d::new_2d(width, height),
        }
    }

    #[test]
    fn test_buffer_texture_round_trip_with_pitch() {
        let stats = ExecutionStats::default();
        let upload = gpu_buffer(256 * 2);
        let bytes: Vec<u8> = (0..8).collect();
        upload.write(0, &bytes[..4]).unwrap();
        upload.write(256, &bytes[4..]).unwrap();

        let target = gpu_texture(4, 4, Format::R8Unorm);
        let readback = gpu_buffer(4);
        let layout = BufferTextureLayout {
            offset: 0,
            row_pitch: 256,
            rows_per_slice: 2,
        };
        let commands = vec![
            Command::CopyBufferToTexture {
                src: Arc::clone(&upload),
                layout,
                dst: Arc::clone(&target),
                region: region(0, 1, 4, 2),
            },
            Command::CopyTextureToBuffer {
                src: Arc::clone(&target),
                region: region(2, 2, 2, 2),
                dst: Arc::clone(&readback),
                layout: BufferTextureLayout {
                    offset: 0,
                    row_pitch: 2,
                    rows_per_slice: 2,
                },
            },
        ];
        execute(&commands, &stats).unwrap();

        // Row 2 of the texture holds bytes 4..8; row 3 is still zero.
        assert_eq!(readback.read(0, 4).unwrap(), vec![6, 7, 0, 0]);
        assert_eq!(stats.copies.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_region_out_of_bounds() {
        let target = gpu_texture(4, 4, Format::Rgba8Unorm);
        let command = Command::CopyTextureToBuffer {
            src: target,
            region: region(2, 0, 4, 1),
            dst: gpu_buffer(64),
            layout: BufferTextureLayout {
                offset: 0,
                row_pitch: 16,
                rows_per_slice: 1,
            },
        };
        assert!(execute(&[command], &ExecutionStats::default()).is_err());
    }

    #[test]
    fn test_clear_on_begin_rendering() {
        let target = gpu_texture(2, 2, Format::Bgra8Unorm);
        let rendering = RenderingCommand {
            color: vec![AttachmentCommand {
                texture: Arc::clone(&target),
                load: LoadOp::Clear,
                store: StoreOp::Store,
                clear: ClearValue::Color([1.0, 0.0, 0.0, 1.0]),
            }],
            depth: None,
            width: 2,
            height: 2,
        };
        let stats = ExecutionStats::default();
        execute(
            &[
                Command::BeginRendering(rendering),
                Command::Draw {
                    vertex_count: 3,
                    instance_count: 1,
                    first_vertex: 0,
                    first_instance: 0,
                },
                Command::EndRendering,
            ],
            &stats,
        )
        .unwrap();

        let texels = texture(&target).unwrap().subresource(0, 0).unwrap().read().clone();
        assert_eq!(&texels[..4], &[0, 0, 255, 255]);
        assert_eq!(stats.draws.load(Ordering::Relaxed), 1);
    }
}
