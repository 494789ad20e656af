//! Pixel and vertex formats.

/// Format of texels, vertex attributes and typed buffer views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum Format {
    /// No format. Invalid for resource creation.
    #[default]
    Undefined,

    // 8-bit formats
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,
    /// 8-bit red channel, signed normalized.
    R8Snorm,
    /// 8-bit red channel, unsigned integer.
    R8Uint,
    /// 8-bit red channel, signed integer.
    R8Sint,

    // 16-bit formats
    /// 16-bit red channel, unsigned normalized.
    R16Unorm,
    /// 16-bit red channel, float.
    R16Float,
    /// 16-bit red channel, unsigned integer.
    R16Uint,
    /// 8-bit RG channels, unsigned normalized.
    Rg8Unorm,

    // 32-bit formats
    /// 32-bit red channel, float.
    R32Float,
    /// 32-bit red channel, unsigned integer.
    R32Uint,
    /// 32-bit red channel, signed integer.
    R32Sint,
    /// 16-bit RG channels, float.
    Rg16Float,
    /// 8-bit RGBA channels, unsigned normalized.
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit RGBA channels, unsigned integer.
    Rgba8Uint,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 8-bit BGRA channels, sRGB.
    Bgra8UnormSrgb,
    /// 10-bit RGB with 2-bit alpha, unsigned normalized.
    Rgb10a2Unorm,

    // 64-bit formats
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RG channels, float.
    Rg32Float,
    /// 32-bit RG channels, unsigned integer.
    Rg32Uint,

    // 96/128-bit formats
    /// 32-bit RGB channels, float. Vertex data only.
    Rgb32Float,
    /// 32-bit RGBA channels, float.
    Rgba32Float,
    /// 32-bit RGBA channels, unsigned integer.
    Rgba32Uint,

    // Depth/stencil formats
    /// 16-bit depth.
    D16Unorm,
    /// 24-bit depth with 8-bit stencil.
    D24UnormS8Uint,
    /// 32-bit depth, float.
    D32Float,

    // Block compressed formats
    /// BC1 (DXT1), unsigned normalized.
    Bc1Unorm,
    /// BC1 (DXT1), sRGB.
    Bc1UnormSrgb,
    /// BC3 (DXT5), unsigned normalized.
    Bc3Unorm,
    /// BC5 two-channel, unsigned normalized.
    Bc5Unorm,
    /// BC7, unsigned normalized.
    Bc7Unorm,
    /// BC7, sRGB.
    Bc7UnormSrgb,
}

impl Format {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(self, Self::D16Unorm | Self::D24UnormS8Uint | Self::D32Float)
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::D24UnormS8Uint)
    }

    /// Returns true for block-compressed formats.
    pub fn is_block_compressed(&self) -> bool {
        matches!(
            self,
            Self::Bc1Unorm
                | Self::Bc1UnormSrgb
                | Self::Bc3Unorm
                | Self::Bc5Unorm
                | Self::Bc7Unorm
                | Self::Bc7UnormSrgb
        )
    }

    /// Returns true for sRGB-encoded formats.
    pub fn is_srgb(&self) -> bool {
        matches!(
            self,
            Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb | Self::Bc1UnormSrgb | Self::Bc7UnormSrgb
        )
    }

    /// Width and height in texels of one block (4 for BC formats, 1 otherwise).
    pub fn block_dimension(&self) -> u32 {
        if self.is_block_compressed() { 4 } else { 1 }
    }

    /// Size in bytes of one texel, or of one block for compressed formats.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::Undefined => 0,
            Self::R8Unorm | Self::R8Snorm | Self::R8Uint | Self::R8Sint => 1,
            Self::R16Unorm | Self::R16Float | Self::R16Uint | Self::Rg8Unorm | Self::D16Unorm => 2,
            Self::R32Float
            | Self::R32Uint
            | Self::R32Sint
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Rgba8Uint
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Rgb10a2Unorm
            | Self::D24UnormS8Uint
            | Self::D32Float => 4,
            Self::Rgba16Float | Self::Rg32Float | Self::Rg32Uint => 8,
            Self::Bc1Unorm | Self::Bc1UnormSrgb => 8,
            Self::Rgb32Float => 12,
            Self::Rgba32Float | Self::Rgba32Uint => 16,
            Self::Bc3Unorm | Self::Bc5Unorm | Self::Bc7Unorm | Self::Bc7UnormSrgb => 16,
        }
    }

    /// Tightly packed bytes of one row of `width` texels.
    pub fn row_bytes(&self, width: u32) -> u32 {
        width.div_ceil(self.block_dimension()) * self.block_size()
    }

    /// Number of block rows covering `height` texels.
    pub fn num_rows(&self, height: u32) -> u32 {
        height.div_ceil(self.block_dimension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes() {
        assert_eq!(Format::Rgba8Unorm.block_size(), 4);
        assert_eq!(Format::Rgba32Float.block_size(), 16);
        assert_eq!(Format::Bc1Unorm.block_size(), 8);
        assert_eq!(Format::Undefined.block_size(), 0);
    }

    #[test]
    fn test_row_layout() {
        assert_eq!(Format::Rgba8Unorm.row_bytes(3), 12);
        assert_eq!(Format::Rgba8Unorm.num_rows(5), 5);
        // 10 texels wide is three 4x4 blocks.
        assert_eq!(Format::Bc7Unorm.row_bytes(10), 48);
        assert_eq!(Format::Bc7Unorm.num_rows(10), 3);
    }

    #[test]
    fn test_depth_flags() {
        assert!(Format::D24UnormS8Uint.is_depth_stencil());
        assert!(Format::D24UnormS8Uint.has_stencil());
        assert!(!Format::D32Float.has_stencil());
        assert!(!Format::Rgba8Unorm.is_depth_stencil());
    }
}
