//! DirectX 12 and Metal through wgpu.
//!
//! wgpu exposes one queue per device that executes submissions in order and
//! tracks resource states itself. Every `QueueType` maps onto that queue,
//! semaphores and barriers carry no work, and fences wait on submission
//! indices.
//!
//! Root constants, descriptor arrays, storage textures and non-WGSL shaders
//! are reported as [`GraphicsError::FeatureNotSupported`].

mod binding;
mod conversion;
mod encode;
mod resources;
mod swapchain;
mod sync;

pub use binding::{WgpuBindGroup, WgpuPipeline, WgpuRootSignature};
pub use resources::{WgpuBuffer, WgpuSampler, WgpuTexture};
pub use swapchain::WgpuSwapChain;
pub use sync::{WgpuFence, WgpuSemaphore};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::binding::RootSignatureLayout;
use crate::config::GraphicsConfiguration;
use crate::descriptors::{DescriptorAllocator, DescriptorHeapType};
use crate::error::GraphicsError;
use crate::pipeline::PipelineDesc;
use crate::resources::{BufferDesc, TextureDesc};
use crate::swapchain::SwapChainDesc;
use crate::types::{
    BackendKind, DeviceConstants, PhysicalDevice, PhysicalDeviceCapabilities,
    PhysicalDeviceProperties, SamplerDesc,
};

use super::{
    GpuBackend, GpuBindGroup, GpuBuffer, GpuFence, GpuPipeline, GpuRootSignature, GpuSampler,
    GpuSemaphore, GpuSwapChain, GpuTexture, Submission,
};

fn wrong_backend(what: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{what} was not created by the wgpu backend"))
}

fn create_instance(kind: BackendKind, validation: bool) -> wgpu::Instance {
    let mut flags = wgpu::InstanceFlags::default();
    if validation {
        flags |= wgpu::InstanceFlags::VALIDATION | wgpu::InstanceFlags::DEBUG;
    }
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: conversion::backends(kind),
        flags,
        backend_options: wgpu::BackendOptions::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
    })
}

/// Adapters reachable through the power preferences, deduplicated by name.
fn adapters(instance: &wgpu::Instance) -> Vec<wgpu::Adapter> {
    let mut adapters: Vec<wgpu::Adapter> = Vec::new();
    for power_preference in [
        wgpu::PowerPreference::HighPerformance,
        wgpu::PowerPreference::LowPower,
    ] {
        let request = instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        });
        match pollster::block_on(request) {
            Ok(adapter) => {
                let name = adapter.get_info().name;
                if !adapters.iter().any(|a| a.get_info().name == name) {
                    adapters.push(adapter);
                }
            }
            Err(e) => log::debug!("wgpu: no adapter for {power_preference:?}: {e}"),
        }
    }
    adapters
}

fn describe(id: u32, kind: BackendKind, adapter: &wgpu::Adapter) -> PhysicalDevice {
    let info = adapter.get_info();
    let limits = adapter.limits();
    PhysicalDevice {
        id,
        name: info.name,
        backend: kind,
        properties: PhysicalDeviceProperties {
            is_dedicated: info.device_type == wgpu::DeviceType::DiscreteGpu,
            memory_available_in_mb: 0,
        },
        capabilities: PhysicalDeviceCapabilities::default(),
        constants: DeviceConstants {
            storage_buffer_alignment: u64::from(limits.min_storage_buffer_offset_alignment),
            constant_buffer_alignment: u64::from(limits.min_uniform_buffer_offset_alignment),
            buffer_texture_row_alignment: u64::from(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
            ..DeviceConstants::default()
        },
    }
}

pub struct WgpuBackend {
    kind: BackendKind,
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    physical: PhysicalDevice,
    device_lost: Arc<AtomicBool>,
    resource_heap: Arc<DescriptorAllocator>,
    sampler_heap: Arc<DescriptorAllocator>,
    frame: AtomicU64,
}

impl WgpuBackend {
    pub(crate) fn list_physical_devices(kind: BackendKind) -> Result<Vec<PhysicalDevice>, GraphicsError> {
        let instance = create_instance(kind, false);
        let devices: Vec<PhysicalDevice> = adapters(&instance)
            .iter()
            .enumerate()
            .map(|(id, adapter)| describe(id as u32, kind, adapter))
            .collect();
        if devices.is_empty() {
            return Err(GraphicsError::BackendUnavailable(format!("no {kind} adapter found")));
        }
        Ok(devices)
    }

    pub(crate) fn new(
        kind: BackendKind,
        config: &GraphicsConfiguration,
        physical_device: Option<u32>,
    ) -> Result<Self, GraphicsError> {
        crate::profile_scope!("WgpuBackend::new");
        let instance = create_instance(kind, config.validation);
        let id = physical_device.unwrap_or(0);
        let adapter = adapters(&instance)
            .into_iter()
            .nth(id as usize)
            .ok_or_else(|| GraphicsError::BackendUnavailable(format!("no {kind} adapter with id {id}")))?;
        let physical = describe(id, kind, &adapter);
        log::info!("wgpu: using {} ({kind})", physical.name);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("obsidian device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| GraphicsError::InitializationFailed(format!("Device creation failed: {e}")))?;

        let device_lost = Arc::new(AtomicBool::new(false));
        {
            let device_lost = Arc::clone(&device_lost);
            device.set_device_lost_callback(move |reason, message| {
                log::error!("wgpu: device lost ({reason:?}): {message}");
                device_lost.store(true, Ordering::Release);
            });
        }

        let pools = &config.descriptor_pools;
        Ok(Self {
            kind,
            instance,
            adapter,
            device,
            queue,
            physical,
            device_lost,
            resource_heap: Arc::new(DescriptorAllocator::new(
                DescriptorHeapType::CbvSrvUav,
                pools.resources_per_pool,
                pools.max_pools,
            )),
            sampler_heap: Arc::new(DescriptorAllocator::new(
                DescriptorHeapType::Sampler,
                pools.samplers_per_pool,
                pools.max_pools,
            )),
            frame: AtomicU64::new(0),
        })
    }
}

impl GpuBackend for WgpuBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn physical_device(&self) -> &PhysicalDevice {
        &self.physical
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<GpuBuffer, GraphicsError> {
        log::trace!("wgpu: creating buffer {:?} ({} bytes)", desc.debug_name, desc.num_bytes);
        Ok(GpuBuffer::Wgpu(WgpuBuffer::new(&self.device, &self.queue, desc)?))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<GpuTexture, GraphicsError> {
        log::trace!(
            "wgpu: creating texture {:?} ({}x{}x{}, {:?})",
            desc.debug_name,
            desc.width,
            desc.height,
            desc.depth,
            desc.format
        );
        Ok(GpuTexture::Wgpu(WgpuTexture::new(&self.device, desc)?))
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<GpuSampler, GraphicsError> {
        Ok(GpuSampler::Wgpu(WgpuSampler::new(&self.device, desc)))
    }

    fn create_fence(&self) -> Result<GpuFence, GraphicsError> {
        Ok(GpuFence::Wgpu(WgpuFence::new(self.device.clone())))
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError> {
        Ok(GpuSemaphore::Wgpu(WgpuSemaphore))
    }

    fn create_root_signature(
        &self,
        layout: &RootSignatureLayout,
    ) -> Result<GpuRootSignature, GraphicsError> {
        Ok(GpuRootSignature::Wgpu(WgpuRootSignature::new(&self.device, layout)?))
    }

    fn create_pipeline(
        &self,
        desc: &PipelineDesc,
        root_signature: &GpuRootSignature,
    ) -> Result<GpuPipeline, GraphicsError> {
        let root_signature = root_signature
            .as_wgpu()
            .ok_or_else(|| wrong_backend("root signature"))?;
        Ok(GpuPipeline::Wgpu(WgpuPipeline::new(&self.device, desc, root_signature)?))
    }

    fn create_bind_group(
        &self,
        root_signature: &GpuRootSignature,
        layout: &RootSignatureLayout,
        register_space: u32,
    ) -> Result<GpuBindGroup, GraphicsError> {
        let root_signature = root_signature
            .as_wgpu()
            .ok_or_else(|| wrong_backend("root signature"))?;
        Ok(GpuBindGroup::Wgpu(WgpuBindGroup::new(
            &self.device,
            root_signature,
            layout,
            register_space,
            Arc::clone(&self.resource_heap),
            Arc::clone(&self.sampler_heap),
        )?))
    }

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<GpuSwapChain, GraphicsError> {
        Ok(GpuSwapChain::Wgpu(WgpuSwapChain::new(
            &self.instance,
            &self.adapter,
            &self.device,
            desc,
        )?))
    }

    fn submit(&self, submission: Submission<'_>) -> Result<(), GraphicsError> {
        crate::profile_scope!("WgpuBackend::submit");
        if self.is_device_lost() {
            return Err(GraphicsError::DeviceLost);
        }
        let fence = match submission.signal_fence {
            Some(fence) => Some(fence.as_wgpu().ok_or_else(|| wrong_backend("fence"))?),
            None => None,
        };
        let commands = encode::encode(&self.device, submission.commands)?;
        let index = self.queue.submit(std::iter::once(commands));
        log::trace!(
            "wgpu: submitted {} commands to the {} queue",
            submission.commands.len(),
            submission.queue.name()
        );
        if let Some(fence) = fence {
            fence.track(&self.queue, index);
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map(|_| ())
            .map_err(|e| GraphicsError::Internal(format!("wait for idle failed: {e}")))
    }

    fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::Acquire)
    }

    fn advance_frame(&self) {
        self.frame.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("wgpu: poll failed: {e}");
        }
    }
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("kind", &self.kind)
            .field("physical_device", &self.physical.name)
            .field("frame", &self.frame.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled_kind() -> Option<BackendKind> {
        [BackendKind::DirectX12, BackendKind::Metal]
            .into_iter()
            .find(BackendKind::is_compiled)
    }

    #[test]
    fn test_unaligned_buffer_write_round_trip() {
        let Some(kind) = compiled_kind() else {
            return;
        };
        let backend = match WgpuBackend::new(kind, &GraphicsConfiguration::default(), None) {
            Ok(backend) => backend,
            Err(e) => {
                eprintln!("{kind} not available, skipping: {e}");
                return;
            }
        };
        let buffer = backend
            .create_buffer(&BufferDesc::upload(30).with_debug_name("round trip"))
            .unwrap();
        buffer.write(0, &[7; 30]).unwrap();
        buffer.write(3, &[1, 2, 3]).unwrap();
        let data = buffer.read(0, 30).unwrap();
        assert_eq!(&data[..8], &[7, 7, 7, 1, 2, 3, 7, 7]);
        assert_eq!(data.len(), 30);
    }
}
