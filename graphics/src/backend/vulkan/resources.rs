//! Buffers, textures and samplers backed by gpu-allocator memory.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::resources::{BufferDesc, TextureDesc};
use crate::types::{Extent3d, Format, ResourceDescriptor, SamplerDesc};

use super::allocator::{allocation_error, memory_location};
use super::deferred::DeferredResource;
use super::{VulkanDevice, conversion, vk_error};

pub struct VulkanBuffer {
    device: Arc<VulkanDevice>,
    pub(super) buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

impl VulkanBuffer {
    pub(super) fn new(device: Arc<VulkanDevice>, desc: &BufferDesc) -> Result<Self, GraphicsError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.num_bytes)
            .usage(conversion::buffer_usage(desc.descriptor, desc.all_usages()))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .map_err(|e| vk_error("create buffer", e))?;
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name: desc.debug_name.as_deref().unwrap_or("buffer"),
            requirements,
            location: memory_location(desc.heap_type),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(allocation_error(e));
            }
        };

        let buffer = Self {
            buffer,
            allocation: Some(allocation),
            size: desc.num_bytes,
            device,
        };
        if let Some(allocation) = &buffer.allocation {
            unsafe {
                buffer
                    .device
                    .device
                    .bind_buffer_memory(buffer.buffer, allocation.memory(), allocation.offset())
            }
            .map_err(|e| vk_error("bind buffer memory", e))?;
        }
        buffer
            .device
            .namer
            .set_name(buffer.buffer, desc.debug_name.as_deref());
        Ok(buffer)
    }

    fn mapped(&self, offset: u64, len: u64) -> Result<*mut u8, GraphicsError> {
        let ptr = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter("buffer is not in a host-visible heap".into())
            })?;
        match offset.checked_add(len) {
            // SAFETY: the range lies inside the mapped allocation.
            Some(end) if end <= self.size => Ok(unsafe { ptr.as_ptr().cast::<u8>().add(offset as usize) }),
            _ => Err(GraphicsError::InvalidParameter(format!(
                "buffer range {offset}+{len} exceeds {} bytes",
                self.size
            ))),
        }
    }

    pub(crate) fn write(&self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        let dst = self.mapped(offset, data.len() as u64)?;
        // SAFETY: `mapped` checked the destination range.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
        Ok(())
    }

    pub(crate) fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>, GraphicsError> {
        let src = self.mapped(offset, size)?;
        let mut data = vec![0u8; size as usize];
        // SAFETY: `mapped` checked the source range.
        unsafe { std::ptr::copy_nonoverlapping(src, data.as_mut_ptr(), data.len()) };
        Ok(data)
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.device.defer(DeferredResource::Buffer {
                buffer: self.buffer,
                allocation,
            });
        }
    }
}

impl std::fmt::Debug for VulkanBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBuffer")
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .finish()
    }
}

/// Backing memory of an image.
enum ImageMemory {
    Owned(Allocation),
    /// Owned by a swap chain; only the view is destroyed with the texture.
    Swapchain,
}

pub struct VulkanTexture {
    device: Arc<VulkanDevice>,
    pub(super) image: vk::Image,
    pub(super) view: vk::ImageView,
    memory: Option<ImageMemory>,
    pub(super) format: Format,
    pub(super) extent: Extent3d,
    /// Layout at the end of the most recently encoded command stream.
    layout: Mutex<vk::ImageLayout>,
}

impl VulkanTexture {
    pub(super) fn new(device: Arc<VulkanDevice>, desc: &TextureDesc) -> Result<Self, GraphicsError> {
        let vk_format = conversion::format(desc.format);
        if vk_format == vk::Format::UNDEFINED {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} cannot be used for textures",
                desc.format
            )));
        }
        let is_cube = desc.descriptor.contains(ResourceDescriptor::TEXTURE_CUBE);
        let (image_type, depth) = if desc.depth > 1 {
            (vk::ImageType::TYPE_3D, desc.depth)
        } else {
            (vk::ImageType::TYPE_2D, 1)
        };
        let image_info = vk::ImageCreateInfo::default()
            .flags(if is_cube {
                vk::ImageCreateFlags::CUBE_COMPATIBLE
            } else {
                vk::ImageCreateFlags::empty()
            })
            .image_type(image_type)
            .format(vk_format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth,
            })
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(desc.array_size.max(1))
            .samples(conversion::sample_count(desc.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(conversion::image_usage(desc.format, desc.descriptor, desc.all_usages()))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .map_err(|e| vk_error("create image", e))?;
        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name: desc.debug_name.as_deref().unwrap_or("texture"),
            requirements,
            location: memory_location(desc.heap_type),
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(allocation_error(e));
            }
        };
        let bound = unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { device.device.destroy_image(image, None) };
            if let Err(free) = device.allocator().free(allocation) {
                log::error!("Failed to free image memory: {free}");
            }
            return Err(vk_error("bind image memory", e));
        }

        let view_type = if depth > 1 {
            vk::ImageViewType::TYPE_3D
        } else if is_cube && desc.array_size > 6 {
            vk::ImageViewType::CUBE_ARRAY
        } else if is_cube {
            vk::ImageViewType::CUBE
        } else if desc.array_size > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let view = match create_view(&device.device, image, desc.format, view_type, desc.mip_levels, desc.array_size) {
            Ok(view) => view,
            Err(e) => {
                device.defer(DeferredResource::Image {
                    image,
                    view: vk::ImageView::null(),
                    allocation,
                });
                return Err(e);
            }
        };

        device.namer.set_name(image, desc.debug_name.as_deref());
        Ok(Self {
            device,
            image,
            view,
            memory: Some(ImageMemory::Owned(allocation)),
            format: desc.format,
            extent: Extent3d::new(desc.width, desc.height, depth),
            layout: Mutex::new(vk::ImageLayout::UNDEFINED),
        })
    }

    /// Wrap an image owned by a swap chain.
    pub(super) fn from_swapchain(
        device: Arc<VulkanDevice>,
        image: vk::Image,
        format: Format,
        width: u32,
        height: u32,
    ) -> Result<Self, GraphicsError> {
        let view = create_view(&device.device, image, format, vk::ImageViewType::TYPE_2D, 1, 1)?;
        Ok(Self {
            device,
            image,
            view,
            memory: Some(ImageMemory::Swapchain),
            format,
            extent: Extent3d::new_2d(width, height),
            layout: Mutex::new(vk::ImageLayout::UNDEFINED),
        })
    }

    pub(super) fn aspect_mask(&self) -> vk::ImageAspectFlags {
        conversion::aspect_mask(self.format)
    }

    pub(super) fn layout(&self) -> vk::ImageLayout {
        *self.layout.lock()
    }

    pub(super) fn set_layout(&self, layout: vk::ImageLayout) {
        *self.layout.lock() = layout;
    }
}

fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: Format,
    view_type: vk::ImageViewType,
    mip_levels: u32,
    array_size: u32,
) -> Result<vk::ImageView, GraphicsError> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(conversion::format(format))
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: conversion::aspect_mask(format),
            base_mip_level: 0,
            level_count: mip_levels.max(1),
            base_array_layer: 0,
            layer_count: array_size.max(1),
        });
    unsafe { device.create_image_view(&view_info, None) }.map_err(|e| vk_error("create image view", e))
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        match self.memory.take() {
            Some(ImageMemory::Owned(allocation)) => self.device.defer(DeferredResource::Image {
                image: self.image,
                view: self.view,
                allocation,
            }),
            Some(ImageMemory::Swapchain) => self.device.defer(DeferredResource::ImageView(self.view)),
            None => {}
        }
    }
}

impl std::fmt::Debug for VulkanTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanTexture")
            .field("image", &self.image)
            .field("format", &self.format)
            .field("extent", &self.extent)
            .finish()
    }
}

pub struct VulkanSampler {
    device: Arc<VulkanDevice>,
    pub(super) sampler: vk::Sampler,
}

impl VulkanSampler {
    pub(super) fn new(device: Arc<VulkanDevice>, desc: &SamplerDesc) -> Result<Self, GraphicsError> {
        let sampler = create_sampler(&device.device, desc)?;
        device.namer.set_name(sampler, desc.debug_name.as_deref());
        Ok(Self { device, sampler })
    }
}

/// Create a raw sampler. Static samplers of root signatures use this too.
pub(super) fn create_sampler(
    device: &ash::Device,
    desc: &SamplerDesc,
) -> Result<vk::Sampler, GraphicsError> {
    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(conversion::filter(desc.mag_filter))
        .min_filter(conversion::filter(desc.min_filter))
        .mipmap_mode(conversion::mipmap_mode(desc.mipmap_mode))
        .address_mode_u(conversion::address_mode(desc.address_mode_u))
        .address_mode_v(conversion::address_mode(desc.address_mode_v))
        .address_mode_w(conversion::address_mode(desc.address_mode_w))
        .mip_lod_bias(desc.mip_lod_bias)
        .anisotropy_enable(desc.max_anisotropy > 1)
        .max_anisotropy(f32::from(desc.max_anisotropy.max(1)))
        .compare_enable(desc.compare_op.is_some())
        .compare_op(desc.compare_op.map_or(vk::CompareOp::ALWAYS, conversion::compare_op))
        .min_lod(desc.min_lod)
        .max_lod(desc.max_lod.min(vk::LOD_CLAMP_NONE))
        .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
        .unnormalized_coordinates(false);

    unsafe { device.create_sampler(&sampler_info, None) }.map_err(|e| vk_error("create sampler", e))
}

impl Drop for VulkanSampler {
    fn drop(&mut self) {
        self.device.defer(DeferredResource::Sampler(self.sampler));
    }
}

impl std::fmt::Debug for VulkanSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSampler")
            .field("sampler", &self.sampler)
            .finish()
    }
}
