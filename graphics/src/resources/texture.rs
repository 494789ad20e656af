//! Texture resources.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::backend::GpuTexture;
use crate::error::GraphicsError;
use crate::types::{Extent3d, Format, HeapType, ResourceDescriptor, ResourceUsage};

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    /// Depth of 3D textures, 1 otherwise.
    pub depth: u32,
    /// Array layers, 6 per cube for cube maps.
    pub array_size: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub heap_type: HeapType,
    pub descriptor: ResourceDescriptor,
    pub initial_usage: ResourceUsage,
    /// Every state the texture will be transitioned to.
    pub usages: ResourceUsage,
    pub sample_count: u32,
    pub debug_name: Option<String>,
}

impl TextureDesc {
    /// Sampled 2D texture with one mip level.
    pub fn new_2d(width: u32, height: u32, format: Format) -> Self {
        Self {
            width,
            height,
            depth: 1,
            array_size: 1,
            mip_levels: 1,
            format,
            heap_type: HeapType::Gpu,
            descriptor: ResourceDescriptor::TEXTURE,
            initial_usage: ResourceUsage::UNDEFINED,
            usages: ResourceUsage::COPY_DST | ResourceUsage::COPY_SRC,
            sample_count: 1,
            debug_name: None,
        }
    }

    /// Color attachment that can also be sampled.
    pub fn render_target(width: u32, height: u32, format: Format) -> Self {
        Self::new_2d(width, height, format)
            .with_descriptor(ResourceDescriptor::RENDER_TARGET | ResourceDescriptor::TEXTURE)
            .with_usages(ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE)
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_descriptor(mut self, descriptor: ResourceDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn with_initial_usage(mut self, usage: ResourceUsage) -> Self {
        self.initial_usage = usage;
        self
    }

    pub fn with_usages(mut self, usages: ResourceUsage) -> Self {
        self.usages |= usages;
        self
    }

    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    pub fn extent(&self) -> Extent3d {
        Extent3d::new(self.width, self.height, self.depth)
    }

    /// Extent of mip level `mip`.
    pub fn subresource_extent(&self, mip: u32) -> Extent3d {
        self.extent().mip(mip)
    }

    /// Tightly packed byte size of one subresource.
    pub fn subresource_num_bytes(&self, mip: u32) -> u64 {
        let extent = self.subresource_extent(mip);
        self.format.row_bytes(extent.width) as u64
            * self.format.num_rows(extent.height) as u64
            * extent.depth as u64
    }

    /// Every usage the native texture must support.
    pub fn all_usages(&self) -> ResourceUsage {
        let mut usages = self.usages | self.initial_usage;
        let d = self.descriptor;
        if d.intersects(ResourceDescriptor::TEXTURE | ResourceDescriptor::TEXTURE_CUBE) {
            usages |= ResourceUsage::SHADER_RESOURCE;
        }
        if d.contains(ResourceDescriptor::RW_TEXTURE) {
            usages |= ResourceUsage::UNORDERED_ACCESS;
        }
        if d.contains(ResourceDescriptor::RENDER_TARGET) {
            usages |= ResourceUsage::RENDER_TARGET;
        }
        if d.contains(ResourceDescriptor::DEPTH_STENCIL) {
            usages |= ResourceUsage::DEPTH_WRITE | ResourceUsage::DEPTH_READ;
        }
        usages
    }

    pub(crate) fn validate(&self) -> Result<(), GraphicsError> {
        let name = &self.debug_name;
        if self.width == 0 || self.height == 0 || self.depth == 0 || self.array_size == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {name:?}: dimensions cannot be zero"
            )));
        }
        if self.format == Format::Undefined {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {name:?}: format is undefined"
            )));
        }
        let max_mips = 32 - self.width.max(self.height).max(self.depth).leading_zeros();
        if self.mip_levels == 0 || self.mip_levels > max_mips {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {name:?}: {} mip levels, at most {max_mips} allowed",
                self.mip_levels
            )));
        }
        if self.descriptor.contains(ResourceDescriptor::TEXTURE_CUBE) && self.array_size % 6 != 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {name:?}: cube maps need a multiple of 6 array layers"
            )));
        }
        if self.descriptor.contains(ResourceDescriptor::DEPTH_STENCIL)
            && !self.format.is_depth_stencil()
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {name:?}: depth-stencil descriptor with color format {:?}",
                self.format
            )));
        }
        if !self.sample_count.is_power_of_two() {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {name:?}: sample count {} is not a power of two",
                self.sample_count
            )));
        }
        Ok(())
    }
}

/// A GPU texture.
///
/// Move-only, like [`BufferResource`](crate::BufferResource).
pub struct TextureResource {
    id: u64,
    handle: Arc<GpuTexture>,
    desc: TextureDesc,
    current_usage: AtomicU32,
}

impl TextureResource {
    pub(crate) fn new(id: u64, handle: Arc<GpuTexture>, desc: TextureDesc) -> Self {
        let current_usage = AtomicU32::new(desc.initial_usage.bits());
        Self {
            id,
            handle,
            desc,
            current_usage,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn depth(&self) -> u32 {
        self.desc.depth
    }

    pub fn format(&self) -> Format {
        self.desc.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    pub fn array_size(&self) -> u32 {
        self.desc.array_size
    }

    pub fn heap_type(&self) -> HeapType {
        self.desc.heap_type
    }

    pub fn descriptor(&self) -> ResourceDescriptor {
        self.desc.descriptor
    }

    pub fn initial_usage(&self) -> ResourceUsage {
        self.desc.initial_usage
    }

    /// Usage recorded by the last barrier on this texture.
    pub fn current_usage(&self) -> ResourceUsage {
        ResourceUsage::from_bits_truncate(self.current_usage.load(Ordering::Acquire))
    }

    pub(crate) fn set_current_usage(&self, usage: ResourceUsage) {
        self.current_usage.store(usage.bits(), Ordering::Release);
    }

    pub fn debug_name(&self) -> Option<&str> {
        self.desc.debug_name.as_deref()
    }

    /// Extent of mip level `mip`.
    pub fn subresource_extent(&self, mip: u32) -> Extent3d {
        self.desc.subresource_extent(mip)
    }

    pub(crate) fn handle(&self) -> &Arc<GpuTexture> {
        &self.handle
    }
}

impl std::fmt::Debug for TextureResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureResource")
            .field("id", &self.id)
            .field("width", &self.desc.width)
            .field("height", &self.desc.height)
            .field("format", &self.desc.format)
            .field("debug_name", &self.desc.debug_name)
            .finish()
    }
}

static_assertions::assert_impl_all!(TextureResource: Send, Sync);
static_assertions::assert_not_impl_any!(TextureResource: Clone);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(TextureDesc::new_2d(4, 4, Format::Rgba8Unorm).validate().is_ok());
        assert!(TextureDesc::new_2d(0, 4, Format::Rgba8Unorm).validate().is_err());
        assert!(TextureDesc::new_2d(4, 4, Format::Undefined).validate().is_err());
        assert!(
            TextureDesc::new_2d(4, 4, Format::Rgba8Unorm)
                .with_mip_levels(4)
                .validate()
                .is_err()
        );
        assert!(
            TextureDesc::new_2d(4, 4, Format::Rgba8Unorm)
                .with_mip_levels(3)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_depth_descriptor_needs_depth_format() {
        let desc = TextureDesc::new_2d(4, 4, Format::Rgba8Unorm)
            .with_descriptor(ResourceDescriptor::DEPTH_STENCIL);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_subresource_sizes() {
        let desc = TextureDesc::new_2d(8, 4, Format::Rgba8Unorm).with_mip_levels(2);
        assert_eq!(desc.subresource_num_bytes(0), 8 * 4 * 4);
        assert_eq!(desc.subresource_num_bytes(1), 4 * 2 * 4);
    }

    #[test]
    fn test_render_target_usages() {
        let usages = TextureDesc::render_target(4, 4, Format::Bgra8Unorm).all_usages();
        assert!(usages.contains(ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE));
    }
}
