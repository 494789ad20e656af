//! Window surfaces and swap chains.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::backend::{GpuSemaphore, GpuTexture};
use crate::error::GraphicsError;
use crate::swapchain::{PresentResult, SwapChainDesc};
use crate::types::Format;

use super::deferred::DeferredResource;
use super::resources::VulkanTexture;
use super::{QueueHandle, VulkanDevice, conversion, vk_error};

struct SwapchainState {
    swapchain: vk::SwapchainKHR,
    images: Vec<Arc<GpuTexture>>,
    format: Format,
    desc: SwapChainDesc,
}

pub struct VulkanSwapChain {
    device: Arc<VulkanDevice>,
    surface: vk::SurfaceKHR,
    present_queue: QueueHandle,
    state: Mutex<SwapchainState>,
}

impl VulkanSwapChain {
    pub(super) fn new(
        device: Arc<VulkanDevice>,
        present_queue: QueueHandle,
        desc: &SwapChainDesc,
    ) -> Result<Self, GraphicsError> {
        let window = desc.window.ok_or_else(|| {
            GraphicsError::InvalidParameter("Vulkan swap chains need a window".into())
        })?;
        let surface = unsafe {
            ash_window::create_surface(
                &device.entry,
                &device.instance.instance,
                window.display,
                window.window,
                None,
            )
        }
        .map_err(|e| GraphicsError::InitializationFailed(format!("Failed to create surface: {e:?}")))?;

        let supported = unsafe {
            device.surface_loader.get_physical_device_surface_support(
                device.physical_device,
                present_queue.family,
                surface,
            )
        }
        .unwrap_or(false);
        if !supported {
            unsafe { device.surface_loader.destroy_surface(surface, None) };
            return Err(GraphicsError::FeatureNotSupported(
                "the graphics queue cannot present to this window".into(),
            ));
        }

        let swap_chain = Self {
            device,
            surface,
            present_queue,
            state: Mutex::new(SwapchainState {
                swapchain: vk::SwapchainKHR::null(),
                images: Vec::new(),
                format: desc.back_buffer_format,
                desc: desc.clone(),
            }),
        };
        swap_chain.recreate(&mut swap_chain.state.lock())?;
        Ok(swap_chain)
    }

    /// Create the swap chain for `state.desc`, retiring the current one.
    fn recreate(&self, state: &mut SwapchainState) -> Result<(), GraphicsError> {
        let device = &self.device;
        let capabilities = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, self.surface)
        }
        .map_err(|e| vk_error("query surface capabilities", e))?;
        let formats = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_formats(device.physical_device, self.surface)
        }
        .map_err(|e| vk_error("query surface formats", e))?;
        let present_modes = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, self.surface)
        }
        .map_err(|e| vk_error("query present modes", e))?;

        let wanted = conversion::format(state.desc.back_buffer_format);
        let surface_format = formats
            .iter()
            .find(|f| f.format == wanted)
            .or_else(|| formats.first())
            .copied()
            .ok_or_else(|| GraphicsError::FeatureNotSupported("surface reports no formats".into()))?;
        let format = conversion::surface_format(surface_format.format).unwrap_or(state.desc.back_buffer_format);
        if format != state.desc.back_buffer_format {
            log::warn!(
                "Vulkan: {:?} is not supported by the surface, using {format:?}",
                state.desc.back_buffer_format
            );
        }

        let present_mode = conversion::present_mode(state.desc.present_mode);
        let present_mode = if present_modes.contains(&present_mode) {
            present_mode
        } else {
            vk::PresentModeKHR::FIFO
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: state.desc.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: state.desc.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };
        let max_images = if capabilities.max_image_count > 0 {
            capabilities.max_image_count
        } else {
            u32::MAX
        };
        let image_count = state.desc.num_buffers.clamp(capabilities.min_image_count, max_images);
        let usage = (vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST)
            & capabilities.supported_usage_flags;

        let old_swapchain = state.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| vk_error("create swapchain", e))?;
        if old_swapchain != vk::SwapchainKHR::null() {
            device.defer(DeferredResource::Swapchain(old_swapchain));
        }
        state.swapchain = swapchain;

        let images = unsafe { device.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(|e| vk_error("get swapchain images", e))?;
        state.images = images
            .into_iter()
            .map(|image| {
                VulkanTexture::from_swapchain(Arc::clone(device), image, format, extent.width, extent.height)
                    .map(|texture| Arc::new(GpuTexture::Vulkan(texture)))
            })
            .collect::<Result<_, _>>()?;
        state.format = format;

        log::info!(
            "Vulkan: swap chain {}x{} {:?}, {} images, {:?}",
            extent.width,
            extent.height,
            format,
            state.images.len(),
            present_mode
        );
        Ok(())
    }

    pub(crate) fn acquire_next_image(&self, signal: &GpuSemaphore) -> Result<u32, GraphicsError> {
        let semaphore = signal.as_vulkan().ok_or_else(|| {
            GraphicsError::InvalidParameter("semaphore belongs to another backend".into())
        })?;
        let swapchain = self.state.lock().swapchain;
        let acquired = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                swapchain,
                u64::MAX,
                semaphore.semaphore,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Vulkan: acquired image {index} from a suboptimal swap chain");
                }
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GraphicsError::SurfaceOutdated),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Err(GraphicsError::SurfaceLost),
            Err(e) => Err(self.device.check_lost(vk_error("acquire swapchain image", e))),
        }
    }

    pub(crate) fn present(&self, image: u32, wait: &[&GpuSemaphore]) -> PresentResult {
        let Some(wait_semaphores) = wait
            .iter()
            .map(|s| s.as_vulkan().map(|s| s.semaphore))
            .collect::<Option<Vec<_>>>()
        else {
            log::error!("Vulkan: present waits on a semaphore from another backend");
            return PresentResult::DeviceLost;
        };
        let swapchains = [self.state.lock().swapchain];
        let image_indices = [image];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = {
            let _queue = self.present_queue.lock.lock();
            unsafe {
                self.device
                    .swapchain_loader
                    .queue_present(self.present_queue.queue, &present_info)
            }
        };
        match result {
            Ok(false) => PresentResult::Success,
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => PresentResult::Suboptimal,
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                self.device.mark_lost();
                PresentResult::DeviceLost
            }
            Err(vk::Result::TIMEOUT) => PresentResult::Timeout,
            Err(e) => {
                log::error!("Vulkan: present failed: {e:?}");
                PresentResult::DeviceLost
            }
        }
    }

    pub(crate) fn resize(&self, width: u32, height: u32) -> Result<Vec<Arc<GpuTexture>>, GraphicsError> {
        // The old images may still be referenced by queued presents.
        unsafe { self.device.device.device_wait_idle() }
            .map_err(|e| self.device.check_lost(vk_error("wait for idle", e)))?;
        let mut state = self.state.lock();
        state.desc.width = width;
        state.desc.height = height;
        self.recreate(&mut state)?;
        Ok(state.images.clone())
    }

    pub(crate) fn images(&self) -> Vec<Arc<GpuTexture>> {
        self.state.lock().images.clone()
    }

    pub(crate) fn format(&self) -> Format {
        self.state.lock().format
    }
}

impl Drop for VulkanSwapChain {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.images.clear();
        if state.swapchain != vk::SwapchainKHR::null() {
            self.device.defer(DeferredResource::Swapchain(state.swapchain));
        }
        self.device.defer(DeferredResource::Surface(self.surface));
    }
}

impl std::fmt::Debug for VulkanSwapChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("VulkanSwapChain")
            .field("swapchain", &state.swapchain)
            .field("images", &state.images.len())
            .field("format", &state.format)
            .finish()
    }
}
