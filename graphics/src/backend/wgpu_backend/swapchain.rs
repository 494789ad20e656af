//! Window surfaces.
//!
//! wgpu hands out one surface texture at a time, so the swap chain exposes
//! `num_buffers` image slots and fills them round robin on acquire.

use std::sync::Arc;

use parking_lot::Mutex;
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};

use crate::backend::{GpuSemaphore, GpuTexture};
use crate::error::GraphicsError;
use crate::swapchain::{GraphicsWindowHandle, PresentResult, SwapChainDesc};
use crate::types::Format;

use super::conversion;
use super::resources::WgpuTexture;

struct RawWindow(GraphicsWindowHandle);

impl HasWindowHandle for RawWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        // The caller of `SwapChainDesc::with_window` keeps the window alive.
        Ok(unsafe { WindowHandle::borrow_raw(self.0.window) })
    }
}

impl HasDisplayHandle for RawWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        Ok(unsafe { DisplayHandle::borrow_raw(self.0.display) })
    }
}

struct SurfaceState {
    config: wgpu::SurfaceConfiguration,
    images: Vec<Arc<GpuTexture>>,
    format: Format,
    next: usize,
    acquired: Vec<Option<wgpu::SurfaceTexture>>,
}

impl SurfaceState {
    fn rebuild_images(&mut self, count: usize) {
        self.images = (0..count)
            .map(|_| Arc::new(GpuTexture::Wgpu(WgpuTexture::surface_slot(self.format))))
            .collect();
        self.acquired = (0..count).map(|_| None).collect();
        self.next = 0;
    }

    fn slot(&self, image: usize) -> Option<&WgpuTexture> {
        self.images.get(image).and_then(|image| image.as_wgpu())
    }
}

pub struct WgpuSwapChain {
    device: wgpu::Device,
    surface: wgpu::Surface<'static>,
    state: Mutex<SurfaceState>,
}

impl WgpuSwapChain {
    pub(super) fn new(
        instance: &wgpu::Instance,
        adapter: &wgpu::Adapter,
        device: &wgpu::Device,
        desc: &SwapChainDesc,
    ) -> Result<Self, GraphicsError> {
        let window = desc.window.ok_or_else(|| {
            GraphicsError::InvalidParameter("wgpu swap chains need a window".into())
        })?;
        let target = unsafe { wgpu::SurfaceTargetUnsafe::from_window(&RawWindow(window)) }
            .map_err(|e| GraphicsError::InitializationFailed(format!("invalid window handle: {e}")))?;
        let surface = unsafe { instance.create_surface_unsafe(target) }
            .map_err(|e| GraphicsError::InitializationFailed(format!("Failed to create surface: {e}")))?;

        let capabilities = surface.get_capabilities(adapter);
        let wanted = conversion::format(desc.back_buffer_format);
        let native_format = capabilities
            .formats
            .iter()
            .copied()
            .find(|f| Some(*f) == wanted)
            .or_else(|| capabilities.formats.first().copied())
            .ok_or_else(|| GraphicsError::FeatureNotSupported("surface reports no formats".into()))?;
        let format = conversion::surface_format(native_format).unwrap_or(desc.back_buffer_format);
        if format != desc.back_buffer_format {
            log::warn!(
                "wgpu: {:?} is not supported by the surface, using {format:?}",
                desc.back_buffer_format
            );
        }
        let present_mode = conversion::present_mode(desc.present_mode);
        let present_mode = if capabilities.present_modes.contains(&present_mode) {
            present_mode
        } else {
            wgpu::PresentMode::Fifo
        };

        let config = wgpu::SurfaceConfiguration {
            usage: conversion::texture_usages(desc.image_usages),
            format: native_format,
            width: desc.width,
            height: desc.height,
            present_mode,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: desc.num_buffers.saturating_sub(1).max(1),
        };
        surface.configure(device, &config);
        log::info!(
            "wgpu: created swap chain {}x{} {format:?} {present_mode:?}",
            desc.width,
            desc.height
        );

        let mut state = SurfaceState {
            config,
            images: Vec::new(),
            format,
            next: 0,
            acquired: Vec::new(),
        };
        state.rebuild_images(desc.num_buffers as usize);
        Ok(Self {
            device: device.clone(),
            surface,
            state: Mutex::new(state),
        })
    }

    /// Image acquisition completes on the host, so `signal` has nothing to wait for.
    pub(crate) fn acquire_next_image(&self, signal: &GpuSemaphore) -> Result<u32, GraphicsError> {
        let _ = signal;
        let frame = self.surface.get_current_texture().map_err(|e| match e {
            wgpu::SurfaceError::Outdated => GraphicsError::SurfaceOutdated,
            wgpu::SurfaceError::Lost => GraphicsError::SurfaceLost,
            wgpu::SurfaceError::OutOfMemory => GraphicsError::OutOfMemory,
            other => GraphicsError::Internal(format!("failed to acquire surface texture: {other}")),
        })?;
        let mut state = self.state.lock();
        let image = state.next;
        let count = state.images.len();
        state.next = (image + 1) % count;
        let slot = state
            .slot(image)
            .ok_or_else(|| GraphicsError::Internal("swap chain slot is not a wgpu texture".into()))?;
        slot.fill(frame.texture.clone());
        state.acquired[image] = Some(frame);
        Ok(image as u32)
    }

    /// Submissions execute in order on the single queue, so earlier work is
    /// already ahead of the present.
    pub(crate) fn present(&self, image: u32, wait: &[&GpuSemaphore]) -> PresentResult {
        let _ = wait;
        let mut state = self.state.lock();
        let Some(frame) = state.acquired.get_mut(image as usize).and_then(Option::take) else {
            log::warn!("wgpu: presenting image {image} that was not acquired");
            return PresentResult::Timeout;
        };
        let suboptimal = frame.suboptimal;
        frame.present();
        if let Some(slot) = state.slot(image as usize) {
            slot.clear();
        }
        if suboptimal {
            PresentResult::Suboptimal
        } else {
            PresentResult::Success
        }
    }

    pub(crate) fn resize(&self, width: u32, height: u32) -> Result<Vec<Arc<GpuTexture>>, GraphicsError> {
        let mut state = self.state.lock();
        state.acquired.iter_mut().for_each(|frame| drop(frame.take()));
        state.config.width = width;
        state.config.height = height;
        self.surface.configure(&self.device, &state.config);
        let count = state.images.len();
        state.rebuild_images(count);
        Ok(state.images.clone())
    }

    pub(crate) fn images(&self) -> Vec<Arc<GpuTexture>> {
        self.state.lock().images.clone()
    }

    pub(crate) fn format(&self) -> Format {
        self.state.lock().format
    }
}

impl std::fmt::Debug for WgpuSwapChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("WgpuSwapChain")
            .field("width", &state.config.width)
            .field("height", &state.config.height)
            .field("format", &state.format)
            .finish()
    }
}
