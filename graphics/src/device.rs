//! Logical device.
//!
//! The [`LogicalDevice`] is the factory for every GPU object and the only
//! place that talks to the backend through `dyn GpuBackend`. It is created by
//! [`GraphicsContext::create_logical_device`](crate::GraphicsContext::create_logical_device).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::backend::{GpuBackend, GpuBuffer, GpuTexture, Submission};
use crate::binding::{
    ResourceBindGroup, ResourceBindGroupDesc, RootSignature, RootSignatureDesc, RootSignatureLayout,
    ShaderLocalDataDesc, ShaderLocalDataLayout,
};
use crate::command::{
    CommandList, CommandListPool, CommandListPoolDesc, CopyBufferRegionDesc, CopyTextureToBufferDesc,
    ExecuteDesc,
};
use crate::config::GraphicsConfiguration;
use crate::error::GraphicsError;
use crate::pipeline::{Pipeline, PipelineDesc};
use crate::raytracing::{BottomLevelAs, BottomLevelAsDesc, TopLevelAs, TopLevelAsDesc};
use crate::resources::{BufferDesc, BufferResource, Sampler, TextureDesc, TextureResource};
use crate::swapchain::{SwapChain, SwapChainDesc};
use crate::sync::{Fence, Semaphore};
use crate::types::{BackendKind, PhysicalDevice, QueueType, SamplerDesc, align_up};

/// A logical device on one backend.
///
/// # Thread Safety
///
/// `LogicalDevice` is `Send + Sync`; every creation method takes `&self`.
///
/// # Example
///
/// ```ignore
/// let context = GraphicsContext::new(GraphicsConfiguration::default())?;
/// let device = context.create_logical_device(&BackendPreference::platform_default())?;
///
/// let buffer = device.create_buffer_resource(&BufferDesc::new(1024)
///     .with_descriptor(ResourceDescriptor::VERTEX_BUFFER))?;
/// let texture = device.create_texture_resource(&TextureDesc::new_2d(1920, 1080, Format::Rgba8Unorm))?;
/// ```
pub struct LogicalDevice {
    backend: Arc<dyn GpuBackend>,
    config: Arc<GraphicsConfiguration>,
    next_id: AtomicU64,
    // Live native objects, for leak diagnostics
    buffers: RwLock<Vec<Weak<GpuBuffer>>>,
    textures: RwLock<Vec<Weak<GpuTexture>>>,
}

impl LogicalDevice {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>, config: Arc<GraphicsConfiguration>) -> Self {
        log::info!(
            "LogicalDevice: created on {} ({})",
            backend.name(),
            backend.physical_device().name
        );
        Self {
            backend,
            config,
            next_id: AtomicU64::new(1),
            buffers: RwLock::new(Vec::new()),
            textures: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// The physical device, with its alignment constants and capabilities.
    pub fn device_info(&self) -> &PhysicalDevice {
        self.backend.physical_device()
    }

    pub fn config(&self) -> &GraphicsConfiguration {
        &self.config
    }

    /// Create a buffer.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] for a zero size or a
    /// structured buffer without stride.
    pub fn create_buffer_resource(&self, desc: &BufferDesc) -> Result<BufferResource, GraphicsError> {
        desc.validate()?;
        let handle = Arc::new(self.backend.create_buffer(desc)?);
        self.buffers.write().push(Arc::downgrade(&handle));
        let id = self.next_id();
        log::trace!(
            "LogicalDevice: created buffer {id} {:?}, {} bytes in {:?}",
            desc.debug_name,
            desc.num_bytes,
            desc.heap_type
        );
        Ok(BufferResource::new(id, handle, desc.clone()))
    }

    pub fn create_texture_resource(&self, desc: &TextureDesc) -> Result<TextureResource, GraphicsError> {
        desc.validate()?;
        let handle = Arc::new(self.backend.create_texture(desc)?);
        self.textures.write().push(Arc::downgrade(&handle));
        let id = self.next_id();
        log::trace!(
            "LogicalDevice: created texture {id} {:?}, {}x{}x{} {:?}",
            desc.debug_name,
            desc.width,
            desc.height,
            desc.depth,
            desc.format
        );
        Ok(TextureResource::new(id, handle, desc.clone()))
    }

    pub fn create_sampler(&self, desc: &SamplerDesc) -> Result<Sampler, GraphicsError> {
        if !(1..=16).contains(&desc.max_anisotropy) {
            return Err(GraphicsError::InvalidParameter(format!(
                "sampler {:?}: anisotropy {} outside 1..=16",
                desc.debug_name, desc.max_anisotropy
            )));
        }
        if desc.min_lod > desc.max_lod {
            return Err(GraphicsError::InvalidParameter(format!(
                "sampler {:?}: min_lod {} exceeds max_lod {}",
                desc.debug_name, desc.min_lod, desc.max_lod
            )));
        }
        let handle = self.backend.create_sampler(desc)?;
        Ok(Sampler::new(self.next_id(), Arc::new(handle), desc.clone()))
    }

    /// Create a single command list on `queue`.
    pub fn create_command_list(&self, queue: QueueType) -> Result<CommandList, GraphicsError> {
        Ok(CommandList::new(self.next_id(), queue, Arc::clone(&self.backend)))
    }

    /// Create a pool of command lists.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] when the pool has no lists
    /// or fewer lists than frames in flight.
    pub fn create_command_list_pool(
        &self,
        desc: &CommandListPoolDesc,
    ) -> Result<CommandListPool, GraphicsError> {
        desc.validate()?;
        let lists = (0..desc.num_command_lists)
            .map(|_| self.create_command_list(desc.queue_type))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!(
            "LogicalDevice: created {} pool of {} lists",
            desc.queue_type.name(),
            desc.num_command_lists
        );
        Ok(CommandListPool::new(*desc, lists))
    }

    pub fn create_fence(&self) -> Result<Fence, GraphicsError> {
        Ok(Fence::new(self.next_id(), self.backend.create_fence()?))
    }

    pub fn create_semaphore(&self) -> Result<Semaphore, GraphicsError> {
        Ok(Semaphore::new(self.next_id(), self.backend.create_semaphore()?))
    }

    pub fn create_root_signature(&self, desc: &RootSignatureDesc) -> Result<RootSignature, GraphicsError> {
        let layout = RootSignatureLayout::from_desc(desc, &self.config)?;
        let handle = self.backend.create_root_signature(&layout)?;
        let id = self.next_id();
        log::trace!(
            "LogicalDevice: created root signature {id} {:?} with {} register spaces",
            desc.debug_name,
            layout.spaces().len()
        );
        Ok(RootSignature::new(id, handle, layout))
    }

    /// Create an empty bind group for one register space of a root signature.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] if the root signature
    /// declares nothing in that space.
    pub fn create_resource_bind_group(
        &self,
        desc: &ResourceBindGroupDesc<'_>,
    ) -> Result<ResourceBindGroup, GraphicsError> {
        let layout = desc.root_signature.layout();
        if layout.space(desc.register_space).is_none() {
            return Err(GraphicsError::InvalidParameter(format!(
                "root signature {:?} declares no bindings in space{}",
                layout.debug_name(),
                desc.register_space
            )));
        }
        let handle = self.backend.create_bind_group(
            desc.root_signature.handle(),
            layout,
            desc.register_space,
        )?;
        ResourceBindGroup::new(
            self.next_id(),
            desc.root_signature.clone(),
            desc.register_space,
            handle,
        )
    }

    pub fn create_pipeline(&self, desc: &PipelineDesc) -> Result<Pipeline, GraphicsError> {
        desc.validate()?;
        let handle = self
            .backend
            .create_pipeline(desc, desc.root_signature.handle())?;
        let id = self.next_id();
        log::trace!(
            "LogicalDevice: created {:?} pipeline {id} {:?}",
            desc.bind_point,
            desc.debug_name
        );
        Ok(Pipeline::new(id, handle, desc))
    }

    /// Create a bottom level acceleration structure. Build it with
    /// [`CommandList::build_bottom_level_as`].
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::FeatureNotSupported`] on devices without
    /// ray tracing, and [`GraphicsError::InvalidParameter`] for empty or
    /// out-of-bounds geometry.
    pub fn create_bottom_level_as(&self, desc: &BottomLevelAsDesc<'_>) -> Result<BottomLevelAs, GraphicsError> {
        self.require_ray_tracing("bottom level acceleration structures")?;
        let geometries = BottomLevelAs::geometry(desc)?;
        let buffer = self.create_buffer_resource(&BottomLevelAs::result_buffer_desc(desc))?;
        let id = self.next_id();
        log::trace!(
            "LogicalDevice: created bottom level structure {id} {:?} with {} geometries",
            desc.debug_name,
            geometries.len()
        );
        Ok(BottomLevelAs::new(id, buffer, geometries, desc.build_flags))
    }

    /// Create a top level acceleration structure over built or yet to be
    /// built bottom level structures.
    pub fn create_top_level_as(&self, desc: &TopLevelAsDesc<'_>) -> Result<TopLevelAs, GraphicsError> {
        self.require_ray_tracing("top level acceleration structures")?;
        let instances = self.create_buffer_resource(&TopLevelAs::instance_buffer_desc(desc)?)?;
        let buffer = self.create_buffer_resource(&TopLevelAs::result_buffer_desc(desc))?;
        let id = self.next_id();
        log::trace!(
            "LogicalDevice: created top level structure {id} {:?} with {} instances",
            desc.debug_name,
            desc.instances.len()
        );
        TopLevelAs::new(id, buffer, instances, desc)
    }

    fn require_ray_tracing(&self, what: &str) -> Result<(), GraphicsError> {
        if self.device_info().capabilities.ray_tracing {
            Ok(())
        } else {
            Err(GraphicsError::FeatureNotSupported(format!(
                "{what} on {}",
                self.backend_kind()
            )))
        }
    }

    pub fn create_shader_local_data_layout(
        &self,
        desc: &ShaderLocalDataDesc,
    ) -> Result<ShaderLocalDataLayout, GraphicsError> {
        ShaderLocalDataLayout::new(desc)
    }

    /// Create a swap chain. Without a window only the headless backend can
    /// create one, backed by offscreen images.
    pub fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<SwapChain, GraphicsError> {
        desc.validate()?;
        if desc.window.is_none() && self.backend_kind() != BackendKind::Headless {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} swap chains need a window",
                self.backend_kind()
            )));
        }
        let handle = self.backend.create_swap_chain(desc)?;
        let id = self.next_id();
        log::debug!(
            "LogicalDevice: created swap chain {id}, {}x{} x{}",
            desc.width,
            desc.height,
            desc.num_buffers
        );
        SwapChain::new(id, handle, Arc::clone(&self.backend), desc, || self.next_id())
    }

    /// Submit an empty batch to `queue` that signals `fence` once every
    /// earlier submission to that queue has completed.
    pub fn queue_signal(&self, queue: QueueType, fence: &Fence) -> Result<(), GraphicsError> {
        fence.begin_submit()?;
        self.backend.submit(Submission {
            queue,
            commands: &[],
            wait_semaphores: &[],
            signal_semaphores: &[],
            signal_fence: Some(fence.handle()),
        })?;
        fence.end_submit();
        Ok(())
    }

    /// Read a buffer back to the CPU, waiting for the GPU.
    ///
    /// GPU-only buffers are copied through a readback buffer on the copy
    /// queue. Meant for tests and debugging; it stalls.
    pub fn debug_read_buffer(&self, buffer: &BufferResource) -> Result<Vec<u8>, GraphicsError> {
        if buffer.heap_type().is_host_visible() {
            return buffer.read_data();
        }
        let readback = self.create_buffer_resource(
            &BufferDesc::readback(buffer.num_bytes()).with_debug_name("debug readback"),
        )?;
        self.copy_and_wait(|list| list.copy_buffer_region(&CopyBufferRegionDesc::whole(buffer, &readback)))?;
        readback.read_data()
    }

    /// Read one subresource of a texture back, rows tightly packed.
    pub fn debug_read_texture(
        &self,
        texture: &TextureResource,
        mip_level: u32,
        array_layer: u32,
    ) -> Result<Vec<u8>, GraphicsError> {
        let format = texture.format();
        let extent = texture.subresource_extent(mip_level);
        let row_bytes = format.row_bytes(extent.width) as u64;
        let num_rows = format.num_rows(extent.height) as u64 * extent.depth as u64;
        let row_pitch = align_up(row_bytes, self.device_info().constants.buffer_texture_row_alignment);

        let readback = self.create_buffer_resource(
            &BufferDesc::readback(row_pitch * num_rows).with_debug_name("debug texture readback"),
        )?;
        self.copy_and_wait(|list| {
            list.copy_texture_to_buffer(
                &CopyTextureToBufferDesc::new(texture, &readback, 0)
                    .with_row_pitch(row_pitch)
                    .with_subresource(mip_level, array_layer),
            )
        })?;

        let padded = readback.read_data()?;
        let mut packed = Vec::with_capacity((row_bytes * num_rows) as usize);
        for row in 0..num_rows {
            let start = (row * row_pitch) as usize;
            packed.extend_from_slice(&padded[start..start + row_bytes as usize]);
        }
        Ok(packed)
    }

    fn copy_and_wait(&self, record: impl FnOnce(&mut CommandList)) -> Result<(), GraphicsError> {
        let fence = self.create_fence()?;
        let mut list = self.create_command_list(QueueType::Copy)?;
        list.begin();
        record(&mut list);
        list.end();
        list.execute(&ExecuteDesc::new().with_notify(&fence))?;
        fence.wait();
        Ok(())
    }

    /// Block until every queue is idle.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        crate::profile_function!();
        self.backend.wait_idle()
    }

    pub fn is_device_lost(&self) -> bool {
        self.backend.is_device_lost()
    }

    /// Mark the end of a frame: ages deferred destruction and prunes the
    /// live-object lists.
    pub fn advance_frame(&self) {
        self.backend.advance_frame();
        self.cleanup_dead_resources();
    }

    /// Number of live native buffers, including those only kept alive by
    /// recorded command lists.
    pub fn buffer_count(&self) -> usize {
        self.buffers.read().iter().filter(|b| b.strong_count() > 0).count()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.read().iter().filter(|t| t.strong_count() > 0).count()
    }

    /// Drop tracking entries of destroyed buffers and textures.
    pub fn cleanup_dead_resources(&self) {
        self.buffers.write().retain(|b| b.strong_count() > 0);
        self.textures.write().retain(|t| t.strong_count() > 0);
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::error!("LogicalDevice: wait_idle on drop failed: {e}");
        }
        let (buffers, textures) = (self.buffer_count(), self.texture_count());
        if buffers + textures > 0 {
            log::debug!(
                "LogicalDevice: dropped with {buffers} buffers and {textures} textures still alive"
            );
        }
    }
}

impl std::fmt::Debug for LogicalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalDevice")
            .field("backend", &self.backend.kind())
            .field("physical_device", &self.backend.physical_device().name)
            .field("buffer_count", &self.buffer_count())
            .field("texture_count", &self.texture_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(LogicalDevice: Send, Sync);

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::test_utils::headless_device;
    use crate::types::{Format, HeapType, ResourceUsage};

    #[test]
    fn test_zero_sized_buffer_rejected() {
        let device = headless_device();
        assert!(matches!(
            device.create_buffer_resource(&BufferDesc::new(0)),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_buffer_count_tracks_live_buffers() {
        let device = headless_device();
        let a = device.create_buffer_resource(&BufferDesc::new(16)).unwrap();
        let b = device.create_buffer_resource(&BufferDesc::new(16)).unwrap();
        assert_eq!(device.buffer_count(), 2);
        drop(a);
        device.advance_frame();
        assert_eq!(device.buffer_count(), 1);
        assert_ne!(b.id(), 0);
    }

    #[test]
    fn test_pool_depth_below_frames_rejected() {
        let device = headless_device();
        assert!(
            device
                .create_command_list_pool(&CommandListPoolDesc::new(QueueType::Graphics, 2, 3))
                .is_err()
        );
        assert!(
            device
                .create_command_list_pool(&CommandListPoolDesc::new(QueueType::Graphics, 3, 3))
                .is_ok()
        );
    }

    #[test]
    fn test_queue_signal() {
        let device = headless_device();
        let fence = device.create_fence().unwrap();
        device.queue_signal(QueueType::Compute, &fence).unwrap();
        fence.wait();
        assert!(fence.is_signaled());
    }

    #[test]
    fn test_debug_read_gpu_buffer() {
        let device = headless_device();
        let mut upload = device.create_buffer_resource(&BufferDesc::upload(8)).unwrap();
        upload.write_data(0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let gpu = device.create_buffer_resource(&BufferDesc::new(8)).unwrap();
        assert_eq!(gpu.heap_type(), HeapType::Gpu);

        let fence = device.create_fence().unwrap();
        let mut list = device.create_command_list(QueueType::Copy).unwrap();
        list.begin();
        list.copy_buffer_region(&CopyBufferRegionDesc::whole(&upload, &gpu));
        list.end();
        list.execute(&ExecuteDesc::new().with_notify(&fence)).unwrap();
        fence.wait();

        assert_eq!(device.debug_read_buffer(&gpu).unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_swap_chain_without_window_is_headless_only() {
        let device = headless_device();
        let swap_chain = device.create_swap_chain(&SwapChainDesc::new(16, 16)).unwrap();
        assert_eq!(swap_chain.num_buffers(), 3);
        assert_eq!(swap_chain.render_target(0).format(), Format::Bgra8Unorm);
        assert_eq!(swap_chain.render_target(0).initial_usage(), ResourceUsage::UNDEFINED);
    }

    #[test]
    fn test_invalid_sampler_rejected() {
        let device = headless_device();
        assert!(device.create_sampler(&SamplerDesc::default().with_anisotropy(0)).is_err());
        assert!(device.create_sampler(&SamplerDesc::default().with_anisotropy(16)).is_ok());
    }
}
