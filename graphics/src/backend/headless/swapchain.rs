//! Offscreen swap chain.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::backend::{GpuSemaphore, GpuTexture};
use crate::error::GraphicsError;
use crate::swapchain::{PresentResult, SwapChainDesc};
use crate::types::Format;

use super::memory::HeadlessTexture;

/// Cycles through offscreen images. Presenting only waits for rendering.
#[derive(Debug)]
pub struct HeadlessSwapChain {
    desc: RwLock<SwapChainDesc>,
    images: RwLock<Vec<Arc<GpuTexture>>>,
    next: AtomicU32,
}

fn create_images(desc: &SwapChainDesc) -> Result<Vec<Arc<GpuTexture>>, GraphicsError> {
    (0..desc.num_buffers as usize)
        .map(|index| {
            HeadlessTexture::new(&desc.image_desc(index))
                .map(|texture| Arc::new(GpuTexture::Headless(texture)))
        })
        .collect()
}

impl HeadlessSwapChain {
    pub(crate) fn new(desc: &SwapChainDesc) -> Result<Self, GraphicsError> {
        Ok(Self {
            images: RwLock::new(create_images(desc)?),
            desc: RwLock::new(SwapChainDesc {
                window: None,
                ..desc.clone()
            }),
            next: AtomicU32::new(0),
        })
    }

    pub(crate) fn acquire_next_image(&self, signal: &GpuSemaphore) -> Result<u32, GraphicsError> {
        let semaphore = signal.as_headless().ok_or_else(|| {
            GraphicsError::InvalidParameter("semaphore belongs to another backend".into())
        })?;
        let count = self.desc.read().num_buffers.max(1);
        let image = self.next.fetch_add(1, Ordering::AcqRel) % count;
        semaphore.signal_now();
        Ok(image)
    }

    pub(crate) fn present(&self, image: u32, wait: &[&GpuSemaphore]) -> PresentResult {
        for semaphore in wait {
            match semaphore.as_headless() {
                Some(semaphore) => semaphore.wait_latest(),
                None => return PresentResult::DeviceLost,
            }
        }
        log::trace!("HeadlessSwapChain: presented image {image}");
        PresentResult::Success
    }

    pub(crate) fn resize(
        &self,
        width: u32,
        height: u32,
    ) -> Result<Vec<Arc<GpuTexture>>, GraphicsError> {
        let mut desc = self.desc.write();
        desc.width = width;
        desc.height = height;
        let images = create_images(&desc)?;
        *self.images.write() = images.clone();
        self.next.store(0, Ordering::Release);
        Ok(images)
    }

    pub(crate) fn images(&self) -> Vec<Arc<GpuTexture>> {
        self.images.read().clone()
    }

    pub(crate) fn format(&self) -> Format {
        self.desc.read().back_buffer_format
    }
}
