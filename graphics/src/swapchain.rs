//! Swap chains.
//!
//! A [`SwapChain`] owns the presentable images of a window, exposed as
//! [`TextureResource`]s, plus an optional depth buffer of the same size.
//! On the headless backend a swap chain without a window renders to
//! offscreen images that are "presented" by cycling through them.
//!
//! # Example
//!
//! ```ignore
//! let swap_chain = device.create_swap_chain(&SwapChainDesc::new(1280, 720)
//!     .with_window(GraphicsWindowHandle::from_window(&window)?))?;
//!
//! let image = swap_chain.acquire_next_image(&image_ready)?;
//! // ... render to swap_chain.render_target(image) ...
//! list.present(&swap_chain, image, &[&image_rendered]);
//! ```

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::backend::{GpuBackend, GpuSemaphore, GpuSwapChain};
use crate::error::GraphicsError;
use crate::resources::{TextureDesc, TextureResource};
use crate::sync::Semaphore;
use crate::types::{Format, ResourceDescriptor, ResourceUsage, Viewport};

/// Presentation mode for the swap chain.
///
/// Controls how frames are synchronized with the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// No synchronization. May cause tearing but has lowest latency.
    Immediate,
    /// Triple buffering. Low latency without tearing.
    Mailbox,
    /// VSync enabled. No tearing, but may have higher latency.
    #[default]
    Fifo,
}

/// Outcome of a present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentResult {
    Success,
    Timeout,
    DeviceLost,
    /// The surface no longer matches the swap chain; resize it.
    Suboptimal,
}

/// Raw handles of the window a swap chain presents to.
///
/// The window must outlive every swap chain created from the handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphicsWindowHandle {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

// The handles are only dereferenced by the native surface calls made while
// creating a swap chain; afterwards they are plain identifiers.
unsafe impl Send for GraphicsWindowHandle {}
unsafe impl Sync for GraphicsWindowHandle {}

impl GraphicsWindowHandle {
    pub fn from_window<W>(window: &W) -> Result<Self, GraphicsError>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let display = window.display_handle().map_err(|e| {
            GraphicsError::InvalidParameter(format!("failed to get display handle: {e}"))
        })?;
        let handle = window.window_handle().map_err(|e| {
            GraphicsError::InvalidParameter(format!("failed to get window handle: {e}"))
        })?;
        Ok(Self {
            display: display.as_raw(),
            window: handle.as_raw(),
        })
    }
}

/// Descriptor for creating a swap chain.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapChainDesc {
    /// `None` creates offscreen images, headless only.
    pub window: Option<GraphicsWindowHandle>,
    pub width: u32,
    pub height: u32,
    pub num_buffers: u32,
    pub back_buffer_format: Format,
    pub depth_buffer_format: Option<Format>,
    pub present_mode: PresentMode,
    pub image_usages: ResourceUsage,
}

impl SwapChainDesc {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            window: None,
            width,
            height,
            num_buffers: 3,
            back_buffer_format: Format::Bgra8Unorm,
            depth_buffer_format: None,
            present_mode: PresentMode::Fifo,
            image_usages: ResourceUsage::RENDER_TARGET
                | ResourceUsage::PRESENT
                | ResourceUsage::COPY_SRC
                | ResourceUsage::COPY_DST,
        }
    }

    pub fn with_window(mut self, window: GraphicsWindowHandle) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_num_buffers(mut self, num_buffers: u32) -> Self {
        self.num_buffers = num_buffers;
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.back_buffer_format = format;
        self
    }

    pub fn with_depth_buffer(mut self, format: Format) -> Self {
        self.depth_buffer_format = Some(format);
        self
    }

    pub fn with_present_mode(mut self, present_mode: PresentMode) -> Self {
        self.present_mode = present_mode;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), GraphicsError> {
        if self.width == 0 || self.height == 0 {
            return Err(GraphicsError::InvalidParameter(
                "swap chain dimensions cannot be zero".into(),
            ));
        }
        if !(2..=8).contains(&self.num_buffers) {
            return Err(GraphicsError::InvalidParameter(format!(
                "swap chain needs 2 to 8 buffers, got {}",
                self.num_buffers
            )));
        }
        if self.back_buffer_format == Format::Undefined || self.back_buffer_format.is_depth_stencil() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{:?} is not a presentable format",
                self.back_buffer_format
            )));
        }
        if let Some(depth) = self.depth_buffer_format
            && !depth.is_depth_stencil()
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "{depth:?} is not a depth format"
            )));
        }
        Ok(())
    }

    pub(crate) fn image_desc(&self, index: usize) -> TextureDesc {
        TextureDesc::new_2d(self.width, self.height, self.back_buffer_format)
            .with_descriptor(ResourceDescriptor::RENDER_TARGET)
            .with_initial_usage(ResourceUsage::UNDEFINED)
            .with_usages(self.image_usages)
            .with_debug_name(format!("swap chain image {index}"))
    }

    fn depth_desc(&self) -> Option<TextureDesc> {
        self.depth_buffer_format.map(|format| {
            TextureDesc::new_2d(self.width, self.height, format)
                .with_descriptor(ResourceDescriptor::DEPTH_STENCIL)
                .with_usages(ResourceUsage::DEPTH_WRITE | ResourceUsage::DEPTH_READ)
                .with_debug_name("swap chain depth")
        })
    }
}

/// Presentable images of a window.
pub struct SwapChain {
    id: u64,
    handle: Arc<GpuSwapChain>,
    backend: Arc<dyn GpuBackend>,
    desc: SwapChainDesc,
    image_ids: Vec<u64>,
    depth_id: u64,
    render_targets: Vec<TextureResource>,
    depth_buffer: Option<TextureResource>,
}

impl SwapChain {
    /// `ids` supplies one id per image plus one for the depth buffer.
    pub(crate) fn new(
        id: u64,
        handle: GpuSwapChain,
        backend: Arc<dyn GpuBackend>,
        desc: &SwapChainDesc,
        mut ids: impl FnMut() -> u64,
    ) -> Result<Self, GraphicsError> {
        let image_ids: Vec<u64> = (0..desc.num_buffers).map(|_| ids()).collect();
        let mut swap_chain = Self {
            id,
            handle: Arc::new(handle),
            backend,
            desc: SwapChainDesc {
                window: None,
                ..desc.clone()
            },
            image_ids,
            depth_id: ids(),
            render_targets: Vec::new(),
            depth_buffer: None,
        };
        swap_chain.rebuild_targets(swap_chain.handle.images())?;
        Ok(swap_chain)
    }

    fn rebuild_targets(&mut self, images: Vec<Arc<crate::backend::GpuTexture>>) -> Result<(), GraphicsError> {
        self.desc.back_buffer_format = self.handle.format();
        self.render_targets = images
            .into_iter()
            .enumerate()
            .map(|(i, image)| {
                let id = self.image_ids.get(i).copied().unwrap_or(self.id);
                TextureResource::new(id, image, self.desc.image_desc(i))
            })
            .collect();
        self.desc.num_buffers = self.render_targets.len() as u32;
        self.depth_buffer = match self.desc.depth_desc() {
            Some(depth_desc) => {
                let handle = self.backend.create_texture(&depth_desc)?;
                Some(TextureResource::new(self.depth_id, Arc::new(handle), depth_desc))
            }
            None => None,
        };
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Format of the back buffers, which may differ from the requested one.
    pub fn preferred_format(&self) -> Format {
        self.desc.back_buffer_format
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn num_buffers(&self) -> u32 {
        self.desc.num_buffers
    }

    pub fn present_mode(&self) -> PresentMode {
        self.desc.present_mode
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::from_dimensions(self.desc.width, self.desc.height)
    }

    /// # Panics
    ///
    /// Panics if `image` is not a valid image index.
    pub fn render_target(&self, image: u32) -> &TextureResource {
        &self.render_targets[image as usize]
    }

    pub fn depth_buffer(&self) -> Option<&TextureResource> {
        self.depth_buffer.as_ref()
    }

    /// Acquire the next image. `signal` is signaled once it may be rendered to.
    pub fn acquire_next_image(&self, signal: &Semaphore) -> Result<u32, GraphicsError> {
        crate::profile_scope!("SwapChain::acquire_next_image");
        self.handle.acquire_next_image(signal.handle())
    }

    /// Queue `image` for presentation after every semaphore in `wait` is signaled.
    pub fn present(&self, image: u32, wait: &[&Semaphore]) -> PresentResult {
        crate::profile_scope!("SwapChain::present");
        let wait: Vec<&GpuSemaphore> = wait.iter().map(|s| s.handle()).collect();
        let result = self.handle.present(image, &wait);
        if result != PresentResult::Success {
            log::debug!("SwapChain {}: present returned {:?}", self.id, result);
        }
        result
    }

    /// Recreate the images at a new size.
    ///
    /// The caller must make sure no submitted work still uses the old images.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), GraphicsError> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::InvalidParameter(
                "swap chain dimensions cannot be zero".into(),
            ));
        }
        if width == self.desc.width && height == self.desc.height {
            return Ok(());
        }
        log::info!(
            "SwapChain {}: resizing {}x{} -> {width}x{height}",
            self.id,
            self.desc.width,
            self.desc.height
        );
        let images = self.handle.resize(width, height)?;
        self.desc.width = width;
        self.desc.height = height;
        self.rebuild_targets(images)
    }
}

impl std::fmt::Debug for SwapChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapChain")
            .field("id", &self.id)
            .field("width", &self.desc.width)
            .field("height", &self.desc.height)
            .field("format", &self.desc.back_buffer_format)
            .field("num_buffers", &self.desc.num_buffers)
            .finish()
    }
}

static_assertions::assert_impl_all!(SwapChainDesc: Send, Sync);
static_assertions::assert_impl_all!(SwapChain: Send);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desc_defaults() {
        let desc = SwapChainDesc::new(800, 600);
        assert_eq!(desc.num_buffers, 3);
        assert_eq!(desc.present_mode, PresentMode::Fifo);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_desc_validation() {
        assert!(SwapChainDesc::new(0, 600).validate().is_err());
        assert!(SwapChainDesc::new(8, 8).with_num_buffers(1).validate().is_err());
        assert!(SwapChainDesc::new(8, 8).with_format(Format::D32Float).validate().is_err());
        assert!(SwapChainDesc::new(8, 8).with_depth_buffer(Format::Rgba8Unorm).validate().is_err());
        assert!(SwapChainDesc::new(8, 8).with_depth_buffer(Format::D32Float).validate().is_ok());
    }

    #[cfg(feature = "headless")]
    #[test]
    fn test_offscreen_swap_chain_cycles_and_resizes() {
        let device = crate::test_utils::headless_device();
        let mut swap_chain = device
            .create_swap_chain(&SwapChainDesc::new(64, 32).with_depth_buffer(Format::D32Float))
            .unwrap();
        let semaphore = device.create_semaphore().unwrap();

        let images: Vec<u32> = (0..4)
            .map(|_| {
                let image = swap_chain.acquire_next_image(&semaphore).unwrap();
                assert_eq!(swap_chain.present(image, &[]), PresentResult::Success);
                image
            })
            .collect();
        assert_eq!(images, vec![0, 1, 2, 0]);
        assert_eq!(swap_chain.render_target(1).width(), 64);

        let id = swap_chain.render_target(0).id();
        swap_chain.resize(128, 96).unwrap();
        assert_eq!(swap_chain.render_target(0).height(), 96);
        assert_eq!(swap_chain.render_target(0).id(), id);
        assert_eq!(swap_chain.depth_buffer().unwrap().width(), 128);
        assert_eq!(swap_chain.viewport().width, 128.0);
    }
}
