//! Common types shared across the graphics system.

/// Viewport transform for rasterization.
///
/// Depth uses the `[0, 1]` convention on every backend; the origin is the
/// top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

impl Viewport {
    /// Create a viewport with the `[0, 1]` depth range.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Viewport covering `width` x `height` from the origin.
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }
}

/// Scissor rectangle. Fragments outside are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Scissor covering `width` x `height` from the origin.
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Texel offset inside a texture subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Offset3d {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Offset3d {
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };

    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// Size of a texture region in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// 2D extent with a depth of one.
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self::new(width, height, 1)
    }

    /// Extent of mip level `mip` of a resource of this size.
    pub fn mip(&self, mip: u32) -> Self {
        Self {
            width: (self.width >> mip).max(1),
            height: (self.height >> mip).max(1),
            depth: (self.depth >> mip).max(1),
        }
    }
}

/// Clear value applied when an attachment is loaded with [`LoadOp::Clear`].
///
/// [`LoadOp::Clear`]: crate::command::LoadOp::Clear
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// RGBA color.
    Color([f32; 4]),
    /// Depth and stencil.
    DepthStencil { depth: f32, stencil: u32 },
}

impl Default for ClearValue {
    fn default() -> Self {
        Self::Color([0.0, 0.0, 0.0, 1.0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_extent_clamps_to_one() {
        let extent = Extent3d::new_2d(16, 4);
        assert_eq!(extent.mip(1), Extent3d::new(8, 2, 1));
        assert_eq!(extent.mip(4), Extent3d::new(1, 1, 1));
    }

    #[test]
    fn test_viewport_from_dimensions() {
        let viewport = Viewport::from_dimensions(1280, 720);
        assert_eq!(viewport.width, 1280.0);
        assert_eq!(viewport.max_depth, 1.0);
    }
}
