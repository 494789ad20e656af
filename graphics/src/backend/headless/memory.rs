//! Buffers and textures backed by host memory.

use parking_lot::RwLock;

use crate::error::GraphicsError;
use crate::resources::{BufferDesc, TextureDesc};
use crate::types::{Extent3d, Format};

fn out_of_bounds(what: &str, offset: u64, size: u64, len: u64) -> GraphicsError {
    GraphicsError::InvalidParameter(format!(
        "{what} range of {size} bytes at {offset} exceeds {len} bytes"
    ))
}

/// Buffer contents live in a plain byte vector, whatever the heap type.
#[derive(Debug)]
pub struct HeadlessBuffer {
    data: RwLock<Vec<u8>>,
}

impl HeadlessBuffer {
    pub(crate) fn new(desc: &BufferDesc) -> Result<Self, GraphicsError> {
        let len = usize::try_from(desc.num_bytes).map_err(|_| GraphicsError::OutOfMemory)?;
        Ok(Self {
            data: RwLock::new(vec![0; len]),
        })
    }

    pub fn len(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn range(&self, offset: u64, size: u64) -> Result<std::ops::Range<usize>, GraphicsError> {
        let len = self.len();
        match offset.checked_add(size) {
            Some(end) if end <= len => Ok(offset as usize..end as usize),
            _ => Err(out_of_bounds("buffer", offset, size, len)),
        }
    }

    pub(crate) fn write(&self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        let range = self.range(offset, data.len() as u64)?;
        self.data.write()[range].copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>, GraphicsError> {
        let range = self.range(offset, size)?;
        Ok(self.data.read()[range].to_vec())
    }
}

/// Texture subresources stored tightly packed, one vector per (layer, mip).
#[derive(Debug)]
pub struct HeadlessTexture {
    format: Format,
    extent: Extent3d,
    mip_levels: u32,
    array_size: u32,
    subresources: Vec<RwLock<Vec<u8>>>,
}

impl HeadlessTexture {
    pub(crate) fn new(desc: &TextureDesc) -> Result<Self, GraphicsError> {
        if desc.format.block_size() == 0 {
            return Err(GraphicsError::InvalidParameter(
                "texture format cannot be undefined".into(),
            ));
        }
        let extent = Extent3d::new(desc.width, desc.height, desc.depth.max(1));
        let mip_levels = desc.mip_levels.max(1);
        let array_size = desc.array_size.max(1);
        let subresources = (0..array_size)
            .flat_map(|_| 0..mip_levels)
            .map(|mip| {
                let mip_extent = extent.mip(mip);
                let bytes = desc.format.row_bytes(mip_extent.width) as usize
                    * desc.format.num_rows(mip_extent.height) as usize
                    * mip_extent.depth as usize;
                RwLock::new(vec![0; bytes])
            })
            .collect();
        Ok(Self {
            format: desc.format,
            extent,
            mip_levels,
            array_size,
            subresources,
        })
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Extent of a mip level.
    pub fn extent(&self, mip: u32) -> Extent3d {
        self.extent.mip(mip)
    }

    pub(crate) fn subresource(
        &self,
        mip: u32,
        layer: u32,
    ) -> Result<&RwLock<Vec<u8>>, GraphicsError> {
        if mip >= self.mip_levels || layer >= self.array_size {
            return Err(GraphicsError::InvalidParameter(format!(
                "subresource mip {mip} layer {layer} out of range ({} mips, {} layers)",
                self.mip_levels, self.array_size
            )));
        }
        Ok(&self.subresources[(layer * self.mip_levels + mip) as usize])
    }

    /// Byte offset of the block at (x, y, z) inside a packed subresource.
    pub(crate) fn texel_offset(&self, mip: u32, x: u32, y: u32, z: u32) -> usize {
        let extent = self.extent(mip);
        let row = self.format.row_bytes(extent.width) as usize;
        let slice = row * self.format.num_rows(extent.height) as usize;
        let block = self.format.block_dimension();
        z as usize * slice
            + (y / block) as usize * row
            + (x / block) as usize * self.format.block_size() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_bounds() {
        let buffer = HeadlessBuffer::new(&BufferDesc::new(16)).unwrap();
        buffer.write(12, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.read(12, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(buffer.write(13, &[0; 4]).is_err());
        assert!(buffer.read(u64::MAX, 2).is_err());
    }

    #[test]
    fn test_texture_subresources() {
        let desc = TextureDesc::new_2d(8, 4, Format::Rgba8Unorm)
            .with_mip_levels(3)
            .with_array_size(2);
        let texture = HeadlessTexture::new(&desc).unwrap();
        assert!(texture.subresource(2, 1).is_ok());
        assert!(texture.subresource(0, 2).is_err());
        assert_eq!(texture.subresource(0, 1).unwrap().read().len(), 8 * 4 * 4);
        assert_eq!(texture.subresource(2, 0).unwrap().read().len(), 2 * 4);
        assert!(texture.subresource(3, 0).is_err());
        assert_eq!(texture.texel_offset(0, 2, 1, 0), 8 * 4 + 2 * 4);
    }

    #[test]
    fn test_block_compressed_texel_offset() {
        let texture = HeadlessTexture::new(&TextureDesc::new_2d(16, 16, Format::Bc7Unorm)).unwrap();
        // Second block row starts after four 16-byte blocks.
        assert_eq!(texture.texel_offset(0, 4, 4, 0), 64 + 16);
    }
}
