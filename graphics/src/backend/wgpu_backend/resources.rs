//! Buffers, textures and samplers.

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::resources::{BufferDesc, TextureDesc};
use crate::types::{Format, ResourceDescriptor, SamplerDesc};

use super::conversion;

/// Copies and queue writes work on multiples of this many bytes.
const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

/// Smallest aligned range covering `offset..offset + size`.
fn aligned_range(offset: u64, size: u64) -> (u64, u64) {
    let start = offset / COPY_ALIGNMENT * COPY_ALIGNMENT;
    let end = (offset + size).div_ceil(COPY_ALIGNMENT) * COPY_ALIGNMENT;
    (start, end)
}

/// Host access goes through queue writes and staging copies, so every heap
/// type is backed by the same kind of native buffer.
#[derive(Debug)]
pub struct WgpuBuffer {
    pub(super) buffer: wgpu::Buffer,
    device: wgpu::Device,
    queue: wgpu::Queue,
    num_bytes: u64,
}

impl WgpuBuffer {
    pub(super) fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        desc: &BufferDesc,
    ) -> Result<Self, GraphicsError> {
        let (_, size) = aligned_range(0, desc.num_bytes);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.debug_name.as_deref(),
            size,
            usage: conversion::buffer_usages(desc.all_usages()),
            mapped_at_creation: false,
        });
        Ok(Self {
            buffer,
            device: device.clone(),
            queue: queue.clone(),
            num_bytes: desc.num_bytes,
        })
    }

    fn check_range(&self, offset: u64, size: u64) -> Result<(), GraphicsError> {
        match offset.checked_add(size) {
            Some(end) if end <= self.num_bytes => Ok(()),
            _ => Err(GraphicsError::InvalidParameter(format!(
                "buffer range {offset}..{} exceeds {} bytes",
                offset.saturating_add(size),
                self.num_bytes
            ))),
        }
    }

    /// Unaligned writes are widened with the bytes already in the buffer.
    pub(crate) fn write(&self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        self.check_range(offset, data.len() as u64)?;
        if data.is_empty() {
            return Ok(());
        }
        let (start, end) = aligned_range(offset, data.len() as u64);
        if start == offset && end == offset + data.len() as u64 {
            self.queue.write_buffer(&self.buffer, offset, data);
        } else {
            let mut widened = self.read_aligned(start, end)?;
            let from = (offset - start) as usize;
            widened[from..from + data.len()].copy_from_slice(data);
            self.queue.write_buffer(&self.buffer, start, &widened);
        }
        self.queue.submit(std::iter::empty());
        Ok(())
    }

    pub(crate) fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>, GraphicsError> {
        self.check_range(offset, size)?;
        if size == 0 {
            return Ok(Vec::new());
        }
        let (start, end) = aligned_range(offset, size);
        let data = self.read_aligned(start, end)?;
        let from = (offset - start) as usize;
        Ok(data[from..from + size as usize].to_vec())
    }

    /// Copy an aligned range into a staging buffer and map it.
    fn read_aligned(&self, start: u64, end: u64) -> Result<Vec<u8>, GraphicsError> {
        crate::profile_scope!("wgpu_buffer_read");
        let size = end - start;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, start, &staging, 0, size);
        let submission = self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission),
                timeout: None,
            })
            .map_err(|e| GraphicsError::Internal(format!("readback wait failed: {e}")))?;
        match receiver.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(GraphicsError::Internal(format!("failed to map buffer: {e}"))),
            Err(_) => return Err(GraphicsError::DeviceLost),
        }
        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }
}

#[derive(Debug, Clone)]
pub(super) struct TextureViews {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

/// A texture and its default view.
///
/// Swap chain images are refilled on every acquire, so the native objects
/// sit behind a lock and are cloned out for encoding.
#[derive(Debug)]
pub struct WgpuTexture {
    views: Mutex<Option<TextureViews>>,
    pub(super) format: Format,
}

impl WgpuTexture {
    pub(super) fn new(device: &wgpu::Device, desc: &TextureDesc) -> Result<Self, GraphicsError> {
        let format = conversion::format(desc.format).ok_or_else(|| {
            GraphicsError::FeatureNotSupported(format!("{:?} textures", desc.format))
        })?;
        let is_3d = desc.depth > 1;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: desc.debug_name.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: if is_3d { desc.depth } else { desc.array_size.max(1) },
            },
            mip_level_count: desc.mip_levels.max(1),
            sample_count: desc.sample_count.max(1),
            dimension: if is_3d {
                wgpu::TextureDimension::D3
            } else {
                wgpu::TextureDimension::D2
            },
            format,
            usage: conversion::texture_usages(desc.all_usages()),
            view_formats: &[],
        });
        let dimension = if is_3d {
            wgpu::TextureViewDimension::D3
        } else if desc.descriptor.contains(ResourceDescriptor::TEXTURE_CUBE) {
            wgpu::TextureViewDimension::Cube
        } else if desc.array_size > 1 {
            wgpu::TextureViewDimension::D2Array
        } else {
            wgpu::TextureViewDimension::D2
        };
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: desc.debug_name.as_deref(),
            dimension: Some(dimension),
            ..Default::default()
        });
        Ok(Self {
            views: Mutex::new(Some(TextureViews { texture, view })),
            format: desc.format,
        })
    }

    /// Empty slot filled by a swap chain acquire.
    pub(super) fn surface_slot(format: Format) -> Self {
        Self {
            views: Mutex::new(None),
            format,
        }
    }

    pub(super) fn fill(&self, texture: wgpu::Texture) {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        *self.views.lock() = Some(TextureViews { texture, view });
    }

    pub(super) fn clear(&self) {
        self.views.lock().take();
    }

    pub(super) fn views(&self) -> Result<TextureViews, GraphicsError> {
        self.views.lock().clone().ok_or_else(|| {
            GraphicsError::InvalidParameter("swap chain image used without being acquired".into())
        })
    }
}

#[derive(Debug)]
pub struct WgpuSampler {
    pub(super) sampler: wgpu::Sampler,
}

impl WgpuSampler {
    pub(super) fn new(device: &wgpu::Device, desc: &SamplerDesc) -> Self {
        Self {
            sampler: create_sampler(device, desc),
        }
    }
}

pub(super) fn create_sampler(device: &wgpu::Device, desc: &SamplerDesc) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: desc.debug_name.as_deref(),
        address_mode_u: conversion::address_mode(desc.address_mode_u),
        address_mode_v: conversion::address_mode(desc.address_mode_v),
        address_mode_w: conversion::address_mode(desc.address_mode_w),
        mag_filter: conversion::filter(desc.mag_filter),
        min_filter: conversion::filter(desc.min_filter),
        mipmap_filter: conversion::mipmap_filter(desc.mipmap_mode),
        lod_min_clamp: desc.min_lod,
        lod_max_clamp: desc.max_lod.min(32.0),
        compare: desc.compare_op.map(conversion::compare_op),
        anisotropy_clamp: desc.max_anisotropy.max(1),
        border_color: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_range() {
        assert_eq!(aligned_range(0, 8), (0, 8));
        assert_eq!(aligned_range(3, 2), (0, 8));
        assert_eq!(aligned_range(4, 1), (4, 8));
        assert_eq!(aligned_range(0, 13), (0, 16));
    }
}
