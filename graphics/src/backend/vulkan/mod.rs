//! Native Vulkan backend using ash.
//!
//! - gpu-allocator for device memory
//! - Dynamic rendering (core in 1.3, `VK_KHR_dynamic_rendering` on MoltenVK)
//! - One native queue per [`QueueType`], shared when the device has fewer
//! - Deferred destruction: dropped objects are destroyed once
//!   `frames_in_flight` frames have been started since the drop
//! - Validation layers and object names when validation is requested

mod allocator;
mod barriers;
mod bind_group;
mod command;
mod conversion;
mod debug;
mod deferred;
mod device;
mod instance;
mod layout;
mod pipeline;
mod resources;
mod swapchain;
mod sync;

pub use bind_group::VulkanBindGroup;
pub use pipeline::{VulkanPipeline, VulkanRootSignature};
pub use resources::{VulkanBuffer, VulkanSampler, VulkanTexture};
pub use swapchain::VulkanSwapChain;
pub use sync::{VulkanFence, VulkanSemaphore};

use std::collections::VecDeque;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::{Mutex, MutexGuard};

use crate::binding::RootSignatureLayout;
use crate::config::GraphicsConfiguration;
use crate::error::GraphicsError;
use crate::pipeline::PipelineDesc;
use crate::resources::{BufferDesc, TextureDesc};
use crate::swapchain::SwapChainDesc;
use crate::types::{BackendKind, PhysicalDevice, QueueType, SamplerDesc};

use super::{
    GpuBackend, GpuBindGroup, GpuBuffer, GpuFence, GpuPipeline, GpuRootSignature, GpuSampler,
    GpuSemaphore, GpuSwapChain, GpuTexture, Submission,
};
use bind_group::DescriptorPools;
use command::Encoder;
use deferred::{DeferredQueue, DeferredResource};
use instance::InstanceBundle;

/// Map a failed Vulkan call to a crate error.
pub(super) fn vk_error(what: &str, e: vk::Result) -> GraphicsError {
    match e {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GraphicsError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        _ if what.starts_with("create") => {
            GraphicsError::ResourceCreationFailed(format!("failed to {what}: {e:?}"))
        }
        _ => GraphicsError::Internal(format!("failed to {what}: {e:?}")),
    }
}

/// The logical device and everything sharing its lifetime.
///
/// Every native object holds an `Arc` to it, so the device is destroyed
/// after the last object has been queued for destruction.
pub struct VulkanDevice {
    pub(super) entry: ash::Entry,
    pub(super) instance: InstanceBundle,
    pub(super) physical_device: vk::PhysicalDevice,
    pub(super) device: ash::Device,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    deferred: DeferredQueue<DeferredResource>,
    pub(super) namer: debug::ObjectNamer,
    pub(super) surface_loader: ash::khr::surface::Instance,
    pub(super) swapchain_loader: ash::khr::swapchain::Device,
    /// Loaded when dynamic rendering is an extension rather than core.
    dynamic_rendering: Option<ash::khr::dynamic_rendering::Device>,
    device_lost: AtomicBool,
}

impl VulkanDevice {
    pub(super) fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock()
    }

    /// Queue an object for destruction once the GPU is done with it.
    pub(super) fn defer(&self, resource: DeferredResource) {
        self.deferred.push(resource);
    }

    /// Record device loss carried by `error` and pass the error on.
    pub(super) fn check_lost(&self, error: GraphicsError) -> GraphicsError {
        if error == GraphicsError::DeviceLost {
            self.mark_lost();
        }
        error
    }

    pub(super) fn mark_lost(&self) {
        if !self.device_lost.swap(true, Ordering::AcqRel) {
            log::error!("Vulkan: device lost");
        }
    }

    fn advance_frame(&self) {
        self.deferred.advance(|resource| unsafe {
            resource.destroy(
                &self.device,
                &self.allocator,
                &self.swapchain_loader,
                &self.surface_loader,
            )
        });
    }

    pub(super) fn begin_rendering(&self, cmd: vk::CommandBuffer, info: &vk::RenderingInfo<'_>) {
        match &self.dynamic_rendering {
            Some(loader) => unsafe { loader.cmd_begin_rendering(cmd, info) },
            None => unsafe { self.device.cmd_begin_rendering(cmd, info) },
        }
    }

    pub(super) fn end_rendering(&self, cmd: vk::CommandBuffer) {
        match &self.dynamic_rendering {
            Some(loader) => unsafe { loader.cmd_end_rendering(cmd) },
            None => unsafe { self.device.cmd_end_rendering(cmd) },
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("Vulkan: wait for idle on shutdown failed: {e:?}");
            }
            let pending = self.deferred.pending();
            self.deferred.flush(|resource| {
                resource.destroy(
                    &self.device,
                    &self.allocator,
                    &self.swapchain_loader,
                    &self.surface_loader,
                )
            });
            log::debug!("Vulkan: destroyed {pending} deferred objects on shutdown");

            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.instance.destroy();
        }
    }
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("physical_device", &self.physical_device)
            .field("pending_destruction", &self.deferred.pending())
            .field("device_lost", &self.device_lost.load(Ordering::Relaxed))
            .finish()
    }
}

/// A native queue. Queue types mapped to the same native queue share the lock.
#[derive(Clone)]
pub(super) struct QueueHandle {
    pub queue: vk::Queue,
    pub family: u32,
    pub lock: Arc<Mutex<()>>,
}

/// Command buffers and fences of submissions still running.
struct QueueState {
    command_pool: vk::CommandPool,
    in_flight: VecDeque<(vk::Fence, vk::CommandBuffer)>,
    free_fences: Vec<vk::Fence>,
    free_buffers: Vec<vk::CommandBuffer>,
}

struct VulkanQueue {
    queue_type: QueueType,
    handle: QueueHandle,
    state: Mutex<QueueState>,
}

impl VulkanQueue {
    /// Recycle command buffers whose submissions have completed.
    fn retire(&self, device: &ash::Device, state: &mut QueueState) -> Result<(), GraphicsError> {
        while let Some(&(fence, cmd)) = state.in_flight.front() {
            match unsafe { device.get_fence_status(fence) } {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => return Err(vk_error("query fence", e)),
            }
            state.in_flight.pop_front();
            unsafe {
                device
                    .reset_fences(&[fence])
                    .map_err(|e| vk_error("reset fence", e))?;
                device
                    .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                    .map_err(|e| vk_error("reset command buffer", e))?;
            }
            state.free_fences.push(fence);
            state.free_buffers.push(cmd);
        }
        Ok(())
    }

    fn acquire(
        &self,
        device: &ash::Device,
        state: &mut QueueState,
    ) -> Result<(vk::Fence, vk::CommandBuffer), GraphicsError> {
        let cmd = match state.free_buffers.pop() {
            Some(cmd) => cmd,
            None => {
                let allocate_info = vk::CommandBufferAllocateInfo::default()
                    .command_pool(state.command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1);
                unsafe { device.allocate_command_buffers(&allocate_info) }
                    .map_err(|e| vk_error("allocate command buffer", e))?[0]
            }
        };
        let fence = match state.free_fences.pop() {
            Some(fence) => fence,
            None => match unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) } {
                Ok(fence) => fence,
                Err(e) => {
                    state.free_buffers.push(cmd);
                    return Err(vk_error("create fence", e));
                }
            },
        };
        Ok((fence, cmd))
    }

    fn submit(&self, device: &VulkanDevice, submission: &Submission<'_>) -> Result<(), GraphicsError> {
        crate::profile_scope!("vulkan_submit");
        let vk_device = &device.device;
        let mut state = self.state.lock();
        self.retire(vk_device, &mut state)?;
        let (fence, cmd) = self.acquire(vk_device, &mut state)?;

        let default_bind_point = if self.queue_type == QueueType::Compute {
            vk::PipelineBindPoint::COMPUTE
        } else {
            vk::PipelineBindPoint::GRAPHICS
        };
        let encoded = Encoder::new(device, cmd, layout::queue_stages(self.queue_type), default_bind_point)
            .encode(submission.commands);
        if let Err(e) = encoded {
            unsafe {
                if let Err(reset) = vk_device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty()) {
                    log::error!("Vulkan: failed to reset command buffer: {reset:?}");
                }
            }
            state.free_buffers.push(cmd);
            state.free_fences.push(fence);
            return Err(e);
        }

        let semaphores = |list: &[&GpuSemaphore]| {
            list.iter()
                .map(|s| s.as_vulkan().map(|s| s.semaphore))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| GraphicsError::InvalidParameter("semaphore belongs to another backend".into()))
        };
        let waits = semaphores(submission.wait_semaphores)?;
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; waits.len()];
        let signals = semaphores(submission.signal_semaphores)?;
        let user_fence = match submission.signal_fence {
            Some(fence) => Some(
                fence
                    .as_vulkan()
                    .ok_or_else(|| GraphicsError::InvalidParameter("fence belongs to another backend".into()))?
                    .fence,
            ),
            None => None,
        };

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signals);
        {
            let _queue = self.handle.lock.lock();
            unsafe { vk_device.queue_submit(self.handle.queue, &[submit_info], fence) }
                .map_err(|e| device.check_lost(vk_error("submit", e)))?;
            // An empty batch signals the caller's fence after the work above.
            if let Some(user_fence) = user_fence {
                unsafe { vk_device.queue_submit(self.handle.queue, &[], user_fence) }
                    .map_err(|e| device.check_lost(vk_error("submit fence", e)))?;
            }
        }
        state.in_flight.push_back((fence, cmd));
        log::trace!(
            "Vulkan: {} queue submitted {} commands ({} in flight)",
            self.queue_type.name(),
            submission.commands.len(),
            state.in_flight.len()
        );
        Ok(())
    }

    /// Destroy the pool and fences. The device must be idle.
    unsafe fn destroy(&mut self, device: &ash::Device) {
        let state = self.state.get_mut();
        unsafe {
            for (fence, _) in state.in_flight.drain(..) {
                device.destroy_fence(fence, None);
            }
            for fence in state.free_fences.drain(..) {
                device.destroy_fence(fence, None);
            }
            state.free_buffers.clear();
            device.destroy_command_pool(state.command_pool, None);
        }
    }
}

/// Vulkan implementation of [`GpuBackend`].
pub struct VulkanBackend {
    device: Arc<VulkanDevice>,
    physical: PhysicalDevice,
    queues: Vec<VulkanQueue>,
    descriptor_pools: Arc<DescriptorPools>,
}

impl VulkanBackend {
    /// Create the backend on physical device `physical_device`, or on the
    /// best one when `None`.
    pub fn new(
        config: &GraphicsConfiguration,
        physical_device: Option<u32>,
    ) -> Result<Self, GraphicsError> {
        let entry = load_entry()?;
        let instance = instance::create_instance(&entry, config.validation)?;

        let opened = device::enumerate(&instance.instance)
            .and_then(|candidates| device::choose(candidates, physical_device))
            .and_then(|candidate| {
                device::create_logical_device(&instance.instance, &candidate)
                    .map(|device| (candidate, device))
            });
        let (candidate, device) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                unsafe { instance.destroy() };
                return Err(e);
            }
        };
        let allocator =
            match allocator::create_allocator(&instance.instance, candidate.handle, device.clone()) {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe {
                        device.destroy_device(None);
                        instance.destroy();
                    }
                    return Err(e);
                }
            };

        let namer = debug::ObjectNamer::new(&instance.instance, &device, instance.debug_utils.is_some());
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance.instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance.instance, &device);
        let dynamic_rendering = cfg!(target_os = "macos")
            .then(|| ash::khr::dynamic_rendering::Device::new(&instance.instance, &device));

        let vulkan_device = Arc::new(VulkanDevice {
            entry,
            instance,
            physical_device: candidate.handle,
            device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            deferred: DeferredQueue::new(config.frames_in_flight),
            namer,
            surface_loader,
            swapchain_loader,
            dynamic_rendering,
            device_lost: AtomicBool::new(false),
        });

        let mut locks: Vec<(device::QueueSlot, Arc<Mutex<()>>)> = Vec::new();
        let mut queues = Vec::with_capacity(QueueType::ALL.len());
        for queue_type in QueueType::ALL {
            let slot = candidate.families.slot(queue_type);
            let lock = match locks.iter().find(|(s, _)| *s == slot) {
                Some((_, lock)) => Arc::clone(lock),
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.push((slot, Arc::clone(&lock)));
                    lock
                }
            };
            let queue = unsafe { vulkan_device.device.get_device_queue(slot.family, slot.index) };
            let command_pool = command::create_command_pool(&vulkan_device.device, slot.family)?;
            queues.push(VulkanQueue {
                queue_type,
                handle: QueueHandle {
                    queue,
                    family: slot.family,
                    lock,
                },
                state: Mutex::new(QueueState {
                    command_pool,
                    in_flight: VecDeque::new(),
                    free_fences: Vec::new(),
                    free_buffers: Vec::new(),
                }),
            });
            log::debug!(
                "Vulkan: {} queue on family {} index {}",
                queue_type.name(),
                slot.family,
                slot.index
            );
        }

        let descriptor_pools = Arc::new(DescriptorPools::new(
            Arc::clone(&vulkan_device),
            &config.descriptor_pools,
        ));

        log::info!(
            "Vulkan backend initialized on {} (validation: {})",
            candidate.description.name,
            vulkan_device.instance.debug_utils.is_some()
        );
        Ok(Self {
            device: vulkan_device,
            physical: candidate.description,
            queues,
            descriptor_pools,
        })
    }

    /// Enumerate usable GPUs without creating a device.
    pub fn list_physical_devices(
        config: &GraphicsConfiguration,
    ) -> Result<Vec<PhysicalDevice>, GraphicsError> {
        let entry = load_entry()?;
        let instance = instance::create_instance(&entry, config.validation)?;
        let candidates = device::enumerate(&instance.instance);
        unsafe { instance.destroy() };
        Ok(candidates?
            .into_iter()
            .map(|candidate| candidate.description)
            .collect())
    }

    fn queue(&self, queue_type: QueueType) -> &VulkanQueue {
        &self.queues[queue_type.index()]
    }

    /// Objects waiting for deferred destruction.
    pub fn pending_destruction(&self) -> usize {
        self.device.deferred.pending()
    }
}

fn load_entry() -> Result<ash::Entry, GraphicsError> {
    unsafe { ash::Entry::load() }
        .map_err(|e| GraphicsError::BackendUnavailable(format!("failed to load Vulkan: {e}")))
}

fn wrong_backend(what: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{what} was not created by the Vulkan backend"))
}

impl GpuBackend for VulkanBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    fn physical_device(&self) -> &PhysicalDevice {
        &self.physical
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<GpuBuffer, GraphicsError> {
        log::trace!("Vulkan: creating buffer {:?} ({} bytes)", desc.debug_name, desc.num_bytes);
        Ok(GpuBuffer::Vulkan(VulkanBuffer::new(Arc::clone(&self.device), desc)?))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<GpuTexture, GraphicsError> {
        log::trace!(
            "Vulkan: creating texture {:?} ({}x{}x{}, {:?})",
            desc.debug_name,
            desc.width,
            desc.height,
            desc.depth,
            desc.format
        );
        Ok(GpuTexture::Vulkan(VulkanTexture::new(Arc::clone(&self.device), desc)?))
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<GpuSampler, GraphicsError> {
        Ok(GpuSampler::Vulkan(VulkanSampler::new(Arc::clone(&self.device), desc)?))
    }

    fn create_fence(&self) -> Result<GpuFence, GraphicsError> {
        Ok(GpuFence::Vulkan(VulkanFence::new(Arc::clone(&self.device))?))
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError> {
        Ok(GpuSemaphore::Vulkan(VulkanSemaphore::new(Arc::clone(&self.device))?))
    }

    fn create_root_signature(
        &self,
        layout: &RootSignatureLayout,
    ) -> Result<GpuRootSignature, GraphicsError> {
        Ok(GpuRootSignature::Vulkan(VulkanRootSignature::new(
            Arc::clone(&self.device),
            layout,
        )?))
    }

    fn create_pipeline(
        &self,
        desc: &PipelineDesc,
        root_signature: &GpuRootSignature,
    ) -> Result<GpuPipeline, GraphicsError> {
        let root_signature = root_signature
            .as_vulkan()
            .ok_or_else(|| wrong_backend("root signature"))?;
        Ok(GpuPipeline::Vulkan(VulkanPipeline::new(
            Arc::clone(&self.device),
            desc,
            root_signature,
        )?))
    }

    fn create_bind_group(
        &self,
        root_signature: &GpuRootSignature,
        layout: &RootSignatureLayout,
        register_space: u32,
    ) -> Result<GpuBindGroup, GraphicsError> {
        let root_signature = root_signature
            .as_vulkan()
            .ok_or_else(|| wrong_backend("root signature"))?;
        Ok(GpuBindGroup::Vulkan(VulkanBindGroup::new(
            Arc::clone(&self.descriptor_pools),
            root_signature,
            layout,
            register_space,
        )?))
    }

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<GpuSwapChain, GraphicsError> {
        Ok(GpuSwapChain::Vulkan(VulkanSwapChain::new(
            Arc::clone(&self.device),
            self.queue(QueueType::Graphics).handle.clone(),
            desc,
        )?))
    }

    fn submit(&self, submission: Submission<'_>) -> Result<(), GraphicsError> {
        if self.is_device_lost() {
            return Err(GraphicsError::DeviceLost);
        }
        self.queue(submission.queue).submit(&self.device, &submission)
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        unsafe { self.device.device.device_wait_idle() }
            .map_err(|e| self.device.check_lost(vk_error("wait for idle", e)))?;
        for queue in &self.queues {
            let mut state = queue.state.lock();
            queue.retire(&self.device.device, &mut state)?;
        }
        Ok(())
    }

    fn is_device_lost(&self) -> bool {
        self.device.device_lost.load(Ordering::Acquire)
    }

    fn advance_frame(&self) {
        self.device.advance_frame();
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.device.device_wait_idle() } {
            log::warn!("Vulkan: wait for idle on shutdown failed: {e:?}");
        }
        for queue in &mut self.queues {
            unsafe { queue.destroy(&self.device.device) };
        }
    }
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("physical_device", &self.physical.name)
            .field("device", &self.device)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            vk_error("submit", vk::Result::ERROR_DEVICE_LOST),
            GraphicsError::DeviceLost
        );
        assert_eq!(
            vk_error("create buffer", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GraphicsError::OutOfMemory
        );
        assert!(matches!(
            vk_error("create image", vk::Result::ERROR_FORMAT_NOT_SUPPORTED),
            GraphicsError::ResourceCreationFailed(_)
        ));
        assert!(matches!(
            vk_error("reset fence", vk::Result::ERROR_UNKNOWN),
            GraphicsError::Internal(_)
        ));
    }

    /// Runs only where a Vulkan driver is installed.
    #[test]
    fn test_upload_buffer_round_trip() {
        let backend = match VulkanBackend::new(&GraphicsConfiguration::default(), None) {
            Ok(backend) => backend,
            Err(e) => {
                eprintln!("Vulkan not available, skipping: {e}");
                return;
            }
        };
        let buffer = backend.create_buffer(&BufferDesc::upload(64)).unwrap();
        buffer.write(16, &[1, 2, 3, 4]).unwrap();
        assert_eq!(buffer.read(16, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(buffer.write(62, &[0; 4]).is_err());

        let fence = backend.create_fence().unwrap();
        backend
            .submit(Submission {
                queue: QueueType::Copy,
                commands: &[],
                wait_semaphores: &[],
                signal_semaphores: &[],
                signal_fence: Some(&fence),
            })
            .unwrap();
        fence.wait().unwrap();
        assert!(fence.is_signaled());
        backend.wait_idle().unwrap();
    }
}
