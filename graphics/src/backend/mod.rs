//! GPU backend abstraction layer.
//!
//! Each backend implements [`GpuBackend`], the single dynamic dispatch point
//! used by [`LogicalDevice`](crate::LogicalDevice) for object creation and
//! submission. Objects created by a backend are returned as handle enums
//! ([`GpuBuffer`], [`GpuFence`], ...) with one variant per compiled backend.
//! Per-object operations (fence waits, buffer mapping, swap chain acquire)
//! dispatch with a `match` on the handle, so nothing needs to call back into
//! the device.
//!
//! # Available Backends
//!
//! - `headless` (default): CPU emulation with one worker thread per queue
//! - `vulkan-backend`: native Vulkan through ash
//! - `wgpu-backend`: DirectX 12 and Metal through wgpu

#[cfg(feature = "headless")]
pub mod headless;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

#[cfg(not(any(
    feature = "headless",
    feature = "vulkan-backend",
    feature = "wgpu-backend"
)))]
compile_error!("enable at least one of the `headless`, `vulkan-backend` or `wgpu-backend` features");

use std::sync::Arc;
use std::time::Duration;

use crate::binding::RootSignatureLayout;
use crate::command::Command;
use crate::config::GraphicsConfiguration;
use crate::error::GraphicsError;
use crate::pipeline::PipelineDesc;
use crate::resources::{BufferDesc, TextureDesc};
use crate::swapchain::{PresentResult, SwapChainDesc};
use crate::types::{
    BackendKind, Format, PhysicalDevice, QueueType, ResourceBindingSlot, SamplerDesc,
};

/// Declares a handle enum with one variant per compiled backend.
macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident {
        headless: $headless:ty,
        vulkan: $vulkan:ty,
        wgpu: $wgpu:ty $(,)?
    }) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub enum $name {
            #[cfg(feature = "headless")]
            Headless($headless),
            #[cfg(feature = "vulkan-backend")]
            Vulkan($vulkan),
            #[cfg(feature = "wgpu-backend")]
            Wgpu($wgpu),
        }

        #[allow(dead_code, unreachable_patterns)]
        impl $name {
            #[cfg(feature = "headless")]
            pub(crate) fn as_headless(&self) -> Option<&$headless> {
                match self {
                    Self::Headless(inner) => Some(inner),
                    _ => None,
                }
            }

            #[cfg(feature = "vulkan-backend")]
            pub(crate) fn as_vulkan(&self) -> Option<&$vulkan> {
                match self {
                    Self::Vulkan(inner) => Some(inner),
                    _ => None,
                }
            }

            #[cfg(feature = "wgpu-backend")]
            pub(crate) fn as_wgpu(&self) -> Option<&$wgpu> {
                match self {
                    Self::Wgpu(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

/// Forwards a call to whichever backend variant a handle holds.
macro_rules! dispatch {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            #[cfg(feature = "headless")]
            Self::Headless($inner) => $body,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan($inner) => $body,
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu($inner) => $body,
        }
    };
}

gpu_handle! {
    /// Handle to a native buffer.
    GpuBuffer {
        headless: headless::HeadlessBuffer,
        vulkan: vulkan::VulkanBuffer,
        wgpu: wgpu_backend::WgpuBuffer,
    }
}

gpu_handle! {
    /// Handle to a native texture and its default view.
    GpuTexture {
        headless: headless::HeadlessTexture,
        vulkan: vulkan::VulkanTexture,
        wgpu: wgpu_backend::WgpuTexture,
    }
}

gpu_handle! {
    /// Handle to a native sampler.
    GpuSampler {
        headless: headless::HeadlessSampler,
        vulkan: vulkan::VulkanSampler,
        wgpu: wgpu_backend::WgpuSampler,
    }
}

gpu_handle! {
    /// Handle to a CPU-waitable fence.
    GpuFence {
        headless: headless::HeadlessFence,
        vulkan: vulkan::VulkanFence,
        wgpu: wgpu_backend::WgpuFence,
    }
}

gpu_handle! {
    /// Handle to a queue-to-queue semaphore.
    GpuSemaphore {
        headless: headless::HeadlessSemaphore,
        vulkan: vulkan::VulkanSemaphore,
        wgpu: wgpu_backend::WgpuSemaphore,
    }
}

gpu_handle! {
    /// Native root signature (descriptor set layouts + pipeline layout).
    GpuRootSignature {
        headless: headless::HeadlessRootSignature,
        vulkan: vulkan::VulkanRootSignature,
        wgpu: wgpu_backend::WgpuRootSignature,
    }
}

gpu_handle! {
    /// Native pipeline state object.
    GpuPipeline {
        headless: headless::HeadlessPipeline,
        vulkan: vulkan::VulkanPipeline,
        wgpu: wgpu_backend::WgpuPipeline,
    }
}

gpu_handle! {
    /// Native descriptor table for one register space.
    GpuBindGroup {
        headless: headless::HeadlessBindGroup,
        vulkan: vulkan::VulkanBindGroup,
        wgpu: wgpu_backend::WgpuBindGroup,
    }
}

gpu_handle! {
    /// Native swap chain.
    GpuSwapChain {
        headless: headless::HeadlessSwapChain,
        vulkan: vulkan::VulkanSwapChain,
        wgpu: wgpu_backend::WgpuSwapChain,
    }
}

impl GpuBuffer {
    /// Copy `data` into a host-visible buffer at `offset`.
    pub(crate) fn write(&self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        dispatch!(self, buffer => buffer.write(offset, data))
    }

    /// Read `size` bytes at `offset` from a host-visible buffer.
    pub(crate) fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>, GraphicsError> {
        dispatch!(self, buffer => buffer.read(offset, size))
    }
}

impl GpuFence {
    /// Block until the last submission signaling this fence has completed.
    pub(crate) fn wait(&self) -> Result<(), GraphicsError> {
        dispatch!(self, fence => fence.wait())
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Result<bool, GraphicsError> {
        dispatch!(self, fence => fence.wait_timeout(timeout))
    }

    pub(crate) fn is_signaled(&self) -> bool {
        dispatch!(self, fence => fence.is_signaled())
    }

    /// Return the native object to the unsignaled state.
    pub(crate) fn reset(&self) -> Result<(), GraphicsError> {
        dispatch!(self, fence => fence.reset())
    }
}

impl GpuBindGroup {
    /// Replace the group's descriptors. The previous allocation is released.
    pub(crate) fn write(&self, writes: &[DescriptorWrite]) -> Result<(), GraphicsError> {
        dispatch!(self, group => group.write(writes))
    }
}

impl GpuSwapChain {
    pub(crate) fn acquire_next_image(&self, signal: &GpuSemaphore) -> Result<u32, GraphicsError> {
        dispatch!(self, swap_chain => swap_chain.acquire_next_image(signal))
    }

    pub(crate) fn present(&self, image: u32, wait: &[&GpuSemaphore]) -> PresentResult {
        dispatch!(self, swap_chain => swap_chain.present(image, wait))
    }

    /// Recreate the images at a new size and return them.
    pub(crate) fn resize(&self, width: u32, height: u32) -> Result<Vec<Arc<GpuTexture>>, GraphicsError> {
        dispatch!(self, swap_chain => swap_chain.resize(width, height))
    }

    pub(crate) fn images(&self) -> Vec<Arc<GpuTexture>> {
        dispatch!(self, swap_chain => swap_chain.images())
    }

    pub(crate) fn format(&self) -> Format {
        dispatch!(self, swap_chain => swap_chain.format())
    }
}

/// A resource written into a descriptor slot.
#[derive(Debug, Clone)]
pub enum BoundResource {
    /// Buffer range.
    Buffer {
        buffer: Arc<GpuBuffer>,
        offset: u64,
        size: u64,
    },
    Texture(Arc<GpuTexture>),
    Sampler(Arc<GpuSampler>),
}

/// One descriptor written by a bind group update.
#[derive(Debug, Clone)]
pub struct DescriptorWrite {
    pub slot: ResourceBindingSlot,
    pub array_element: u32,
    pub resource: BoundResource,
}

/// One queue submission.
pub(crate) struct Submission<'a> {
    pub queue: QueueType,
    pub commands: &'a [Command],
    pub wait_semaphores: &'a [&'a GpuSemaphore],
    pub signal_semaphores: &'a [&'a GpuSemaphore],
    pub signal_fence: Option<&'a GpuFence>,
}

/// GPU backend trait for abstracting different GPU APIs.
pub trait GpuBackend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    /// Get the backend name.
    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// The physical device this backend was created on.
    fn physical_device(&self) -> &PhysicalDevice;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<GpuBuffer, GraphicsError>;

    fn create_texture(&self, desc: &TextureDesc) -> Result<GpuTexture, GraphicsError>;

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<GpuSampler, GraphicsError>;

    /// Create an unsignaled fence.
    fn create_fence(&self) -> Result<GpuFence, GraphicsError>;

    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError>;

    fn create_root_signature(
        &self,
        layout: &RootSignatureLayout,
    ) -> Result<GpuRootSignature, GraphicsError>;

    fn create_pipeline(
        &self,
        desc: &PipelineDesc,
        root_signature: &GpuRootSignature,
    ) -> Result<GpuPipeline, GraphicsError>;

    /// Create an empty descriptor table for one register space of a root signature.
    fn create_bind_group(
        &self,
        root_signature: &GpuRootSignature,
        layout: &RootSignatureLayout,
        register_space: u32,
    ) -> Result<GpuBindGroup, GraphicsError>;

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<GpuSwapChain, GraphicsError>;

    /// Encode and submit a recorded command stream.
    ///
    /// A fence passed here is reset natively before the submission.
    fn submit(&self, submission: Submission<'_>) -> Result<(), GraphicsError>;

    /// Block until every queue is idle.
    fn wait_idle(&self) -> Result<(), GraphicsError>;

    fn is_device_lost(&self) -> bool;

    /// Age deferred destruction by one frame.
    fn advance_frame(&self);
}

/// Enumerate the physical devices a backend kind can run on.
///
/// Backends not compiled in, or not supported on this platform, return
/// [`GraphicsError::BackendUnavailable`].
pub(crate) fn list_physical_devices(
    kind: BackendKind,
    config: &GraphicsConfiguration,
) -> Result<Vec<PhysicalDevice>, GraphicsError> {
    let _ = config;
    match kind {
        #[cfg(feature = "headless")]
        BackendKind::Headless => Ok(vec![PhysicalDevice::headless()]),
        #[cfg(feature = "vulkan-backend")]
        BackendKind::Vulkan => vulkan::VulkanBackend::list_physical_devices(config),
        #[cfg(feature = "wgpu-backend")]
        BackendKind::DirectX12 | BackendKind::Metal if kind.is_compiled() => {
            wgpu_backend::WgpuBackend::list_physical_devices(kind)
        }
        _ => Err(GraphicsError::BackendUnavailable(format!(
            "{kind} support is not compiled in for this platform"
        ))),
    }
}

/// Create a backend of the given kind on a physical device.
pub(crate) fn create_backend(
    kind: BackendKind,
    physical_device: Option<u32>,
    config: &GraphicsConfiguration,
) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    let _ = (physical_device, config);
    match kind {
        #[cfg(feature = "headless")]
        BackendKind::Headless => Ok(Arc::new(headless::HeadlessBackend::new(config)?)),
        #[cfg(feature = "vulkan-backend")]
        BackendKind::Vulkan => Ok(Arc::new(vulkan::VulkanBackend::new(
            config,
            physical_device,
        )?)),
        #[cfg(feature = "wgpu-backend")]
        BackendKind::DirectX12 | BackendKind::Metal if kind.is_compiled() => Ok(Arc::new(
            wgpu_backend::WgpuBackend::new(kind, config, physical_device)?,
        )),
        _ => Err(GraphicsError::BackendUnavailable(format!(
            "{kind} support is not compiled in for this platform"
        ))),
    }
}
