//! Batched uploads through the copy queue.
//!
//! [`BatchResourceCopy`] collects CPU-to-GPU uploads from any number of
//! threads into one copy command list, submits them together and frees the
//! staging memory on a background thread once the GPU is done with it.
//!
//! ```ignore
//! let batch = BatchResourceCopy::new(&device, BatchResourceCopyDesc::default())?;
//! batch.begin();
//! std::thread::scope(|s| {
//!     for (buffer, data) in uploads.iter() {
//!         s.spawn(|| batch.copy_to_gpu_buffer(&CopyToGpuBufferDesc::new(buffer, 0, data)));
//!     }
//! });
//! let fence = batch.end(None)?;
//! fence.wait();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::command::{
    BufferBarrierDesc, CommandList, CopyBufferRegionDesc, CopyBufferToTextureDesc,
    CopyTextureRegionDesc, ExecuteDesc, PipelineBarrierDesc, TextureBarrierDesc,
};
use crate::device::LogicalDevice;
use crate::error::GraphicsError;
use crate::resources::{BufferDesc, BufferResource, StagingBuffer, TextureResource};
use crate::sync::{Fence, Semaphore};
use crate::types::{
    IndexType, QueueType, ResourceDescriptor, ResourceUsage, align_up,
};

/// Options of a [`BatchResourceCopy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchResourceCopyDesc {
    /// Transition copied resources to their shader-visible usage on the
    /// graphics queue after the copy completes.
    pub issue_barriers: bool,
}

impl BatchResourceCopyDesc {
    pub fn with_barriers(mut self) -> Self {
        self.issue_barriers = true;
        self
    }
}

/// Upload of bytes into a buffer.
#[derive(Debug, Clone, Copy)]
pub struct CopyToGpuBufferDesc<'a> {
    pub dst_buffer: &'a BufferResource,
    pub dst_offset: u64,
    pub data: &'a [u8],
}

impl<'a> CopyToGpuBufferDesc<'a> {
    pub fn new(dst_buffer: &'a BufferResource, dst_offset: u64, data: &'a [u8]) -> Self {
        Self {
            dst_buffer,
            dst_offset,
            data,
        }
    }
}

/// Upload of texel data into one texture subresource.
#[derive(Debug, Clone, Copy)]
pub struct CopyDataToTextureDesc<'a> {
    pub dst_texture: &'a TextureResource,
    pub data: &'a [u8],
    pub mip_level: u32,
    pub array_layer: u32,
    /// Bytes between rows of `data`, zero for tightly packed rows.
    pub row_pitch: u64,
    /// Bytes between depth slices of `data`, zero for tightly packed slices.
    pub slice_pitch: u64,
}

impl<'a> CopyDataToTextureDesc<'a> {
    pub fn new(dst_texture: &'a TextureResource, data: &'a [u8]) -> Self {
        Self {
            dst_texture,
            data,
            mip_level: 0,
            array_layer: 0,
            row_pitch: 0,
            slice_pitch: 0,
        }
    }

    pub fn with_subresource(mut self, mip_level: u32, array_layer: u32) -> Self {
        self.mip_level = mip_level;
        self.array_layer = array_layer;
        self
    }

    pub fn with_pitches(mut self, row_pitch: u64, slice_pitch: u64) -> Self {
        self.row_pitch = row_pitch;
        self.slice_pitch = slice_pitch;
        self
    }
}

/// Counters of a [`BatchResourceCopy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchCopyStats {
    pub staging_buffers_created: u64,
    pub staging_buffers_freed: u64,
    /// Staging buffers released before their batch fence signaled. Always
    /// zero unless the release protocol is broken.
    pub freed_before_fence_signaled: u64,
    pub bytes_staged: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    staging_buffers_created: AtomicU64,
    staging_buffers_freed: AtomicU64,
    freed_before_fence_signaled: AtomicU64,
    bytes_staged: AtomicU64,
}

struct BarrierPass {
    list: Mutex<CommandList>,
    semaphore: Semaphore,
    fence: Fence,
}

/// Multi-threaded upload batcher on the copy queue.
///
/// Usage per batch is `begin`, any number of copies (from any thread),
/// then `end`. Staging buffers live until the fence returned by `end`
/// signals.
pub struct BatchResourceCopy {
    device: Arc<LogicalDevice>,
    copy_list: Mutex<CommandList>,
    fence: Fence,
    barriers: Option<BarrierPass>,
    staging: Mutex<Vec<BufferResource>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<StatsCounters>,
}

impl BatchResourceCopy {
    pub fn new(device: &Arc<LogicalDevice>, desc: BatchResourceCopyDesc) -> Result<Self, GraphicsError> {
        let barriers = if desc.issue_barriers {
            Some(BarrierPass {
                list: Mutex::new(device.create_command_list(QueueType::Graphics)?),
                semaphore: device.create_semaphore()?,
                fence: device.create_fence()?,
            })
        } else {
            None
        };
        Ok(Self {
            device: Arc::clone(device),
            copy_list: Mutex::new(device.create_command_list(QueueType::Copy)?),
            fence: device.create_fence()?,
            barriers,
            staging: Mutex::new(Vec::new()),
            cleanup: Mutex::new(None),
            stats: Arc::new(StatsCounters::default()),
        })
    }

    pub fn stats(&self) -> BatchCopyStats {
        BatchCopyStats {
            staging_buffers_created: self.stats.staging_buffers_created.load(Ordering::Acquire),
            staging_buffers_freed: self.stats.staging_buffers_freed.load(Ordering::Acquire),
            freed_before_fence_signaled: self
                .stats
                .freed_before_fence_signaled
                .load(Ordering::Acquire),
            bytes_staged: self.stats.bytes_staged.load(Ordering::Acquire),
        }
    }

    /// Open a new batch.
    ///
    /// Waits for the previous batch's copy list if it is still in flight.
    pub fn begin(&self) {
        self.copy_list.lock().begin();
        if let Some(barriers) = &self.barriers {
            barriers.list.lock().begin();
        }
    }

    fn track_staging(&self, buffer: BufferResource, bytes: u64) {
        self.stats.staging_buffers_created.fetch_add(1, Ordering::AcqRel);
        let total = self.stats.bytes_staged.fetch_add(bytes, Ordering::AcqRel) + bytes;
        crate::profile_plot!("staged bytes", total);
        self.staging.lock().push(buffer);
    }

    fn reject_empty(len: usize, what: &str) -> Result<(), GraphicsError> {
        if len == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "{what}: zero-sized copy"
            )));
        }
        Ok(())
    }

    /// Stage `data` and record its copy into the destination buffer.
    ///
    /// # Panics
    ///
    /// Panics if the batch is not open or the range exceeds the buffer.
    pub fn copy_to_gpu_buffer(&self, desc: &CopyToGpuBufferDesc<'_>) -> Result<(), GraphicsError> {
        crate::profile_scope!("BatchResourceCopy::copy_to_gpu_buffer");
        Self::reject_empty(desc.data.len(), "copy_to_gpu_buffer")?;
        let num_bytes = desc.data.len() as u64;
        let alignment = self.device.device_info().constants.constant_buffer_alignment;

        let mut staging = self.device.create_buffer_resource(
            &BufferDesc::upload(align_up(num_bytes, alignment)).with_debug_name("batch staging"),
        )?;
        staging.write_data(0, desc.data)?;

        {
            let mut list = self.copy_list.lock();
            if desc.dst_buffer.current_usage() != ResourceUsage::COPY_DST {
                list.pipeline_barrier(&PipelineBarrierDesc::new().buffer(BufferBarrierDesc::new(
                    desc.dst_buffer,
                    ResourceUsage::COPY_DST,
                )));
            }
            list.copy_buffer_region(&CopyBufferRegionDesc {
                src_buffer: &staging,
                src_offset: 0,
                dst_buffer: desc.dst_buffer,
                dst_offset: desc.dst_offset,
                num_bytes,
            });
        }
        self.record_buffer_barrier(desc.dst_buffer);
        self.track_staging(staging, num_bytes);
        Ok(())
    }

    /// Stage texel data for one subresource, re-pitching rows to the copy
    /// alignment, and record the copy.
    pub fn copy_data_to_texture(&self, desc: &CopyDataToTextureDesc<'_>) -> Result<(), GraphicsError> {
        crate::profile_scope!("BatchResourceCopy::copy_data_to_texture");
        Self::reject_empty(desc.data.len(), "copy_data_to_texture")?;
        let texture = desc.dst_texture;
        if desc.mip_level >= texture.mip_levels() || desc.array_layer >= texture.array_size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "copy_data_to_texture: subresource (mip {}, layer {}) out of range",
                desc.mip_level, desc.array_layer
            )));
        }

        let format = texture.format();
        let extent = texture.subresource_extent(desc.mip_level);
        let row_bytes = format.row_bytes(extent.width) as u64;
        let num_rows = format.num_rows(extent.height) as u64;
        let src_row_pitch = if desc.row_pitch == 0 { row_bytes } else { desc.row_pitch };
        let src_slice_pitch = if desc.slice_pitch == 0 {
            src_row_pitch * num_rows
        } else {
            desc.slice_pitch
        };
        let required = src_slice_pitch * (extent.depth as u64 - 1)
            + src_row_pitch * (num_rows - 1)
            + row_bytes;
        if (desc.data.len() as u64) < required {
            return Err(GraphicsError::InvalidParameter(format!(
                "copy_data_to_texture: {} bytes supplied, subresource needs {required}",
                desc.data.len()
            )));
        }

        let constants = self.device.device_info().constants;
        let dst_row_pitch = align_up(row_bytes, constants.buffer_texture_row_alignment);
        let staged_bytes = dst_row_pitch * num_rows * extent.depth as u64;
        let mut packed = vec![0u8; staged_bytes as usize];
        for slice in 0..extent.depth as u64 {
            for row in 0..num_rows {
                let src = (slice * src_slice_pitch + row * src_row_pitch) as usize;
                let dst = ((slice * num_rows + row) * dst_row_pitch) as usize;
                packed[dst..dst + row_bytes as usize]
                    .copy_from_slice(&desc.data[src..src + row_bytes as usize]);
            }
        }

        let mut staging = StagingBuffer::new(&self.device, staged_bytes)?;
        let Some(allocation) = staging.allocate(staged_bytes, constants.buffer_texture_alignment)
        else {
            return Err(GraphicsError::Internal(
                "staging buffer sized for the upload cannot hold it".into(),
            ));
        };
        staging.write(&allocation, &packed)?;

        {
            let mut list = self.copy_list.lock();
            list.pipeline_barrier(&PipelineBarrierDesc::new().texture(
                TextureBarrierDesc::new(texture, ResourceUsage::COPY_DST)
                    .with_mips(desc.mip_level, 1)
                    .with_layers(desc.array_layer, 1),
            ));
            list.copy_buffer_to_texture(
                &CopyBufferToTextureDesc::new(staging.buffer(), allocation.offset, texture)
                    .with_row_pitch(dst_row_pitch)
                    .with_subresource(desc.mip_level, desc.array_layer),
            );
        }
        if let Some(barriers) = &self.barriers {
            barriers.list.lock().pipeline_barrier(&PipelineBarrierDesc::new().texture(
                TextureBarrierDesc::new(texture, ResourceUsage::SHADER_RESOURCE)
                    .with_old_state(ResourceUsage::COPY_DST)
                    .with_mips(desc.mip_level, 1)
                    .with_layers(desc.array_layer, 1),
            ));
        }
        self.track_staging(staging.into_buffer(), staged_bytes);
        Ok(())
    }

    /// Record a buffer-to-buffer copy into the batch.
    pub fn copy_buffer_region(&self, desc: &CopyBufferRegionDesc<'_>) -> Result<(), GraphicsError> {
        Self::reject_empty(desc.num_bytes as usize, "copy_buffer_region")?;
        self.copy_list.lock().copy_buffer_region(desc);
        Ok(())
    }

    /// Record a texture-to-texture copy into the batch.
    pub fn copy_texture_region(&self, desc: &CopyTextureRegionDesc<'_>) {
        self.copy_list.lock().copy_texture_region(desc);
    }

    fn create_filled_buffer(
        &self,
        data: &[u8],
        descriptor: ResourceDescriptor,
        stride: u32,
        name: &str,
    ) -> Result<BufferResource, GraphicsError> {
        Self::reject_empty(data.len(), name)?;
        let alignment = self.device.device_info().constants.constant_buffer_alignment;
        let size = if descriptor.contains(ResourceDescriptor::UNIFORM_BUFFER) {
            align_up(data.len() as u64, alignment)
        } else {
            data.len() as u64
        };
        let buffer = self.device.create_buffer_resource(
            &BufferDesc::new(size)
                .with_descriptor(descriptor)
                .with_stride(stride)
                .with_debug_name(name),
        )?;
        self.copy_to_gpu_buffer(&CopyToGpuBufferDesc::new(&buffer, 0, data))?;
        Ok(buffer)
    }

    /// Create a constant buffer holding `data`, sized to the constant buffer alignment.
    pub fn create_uniform_buffer(&self, data: &[u8]) -> Result<BufferResource, GraphicsError> {
        self.create_filled_buffer(data, ResourceDescriptor::UNIFORM_BUFFER, 0, "uniform buffer")
    }

    pub fn create_vertex_buffer(&self, data: &[u8], stride: u32) -> Result<BufferResource, GraphicsError> {
        self.create_filled_buffer(data, ResourceDescriptor::VERTEX_BUFFER, stride, "vertex buffer")
    }

    pub fn create_index_buffer(&self, data: &[u8], index_type: IndexType) -> Result<BufferResource, GraphicsError> {
        if data.len() % index_type.num_bytes() as usize != 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "index data of {} bytes is not a multiple of {:?}",
                data.len(),
                index_type
            )));
        }
        self.create_filled_buffer(
            data,
            ResourceDescriptor::INDEX_BUFFER,
            index_type.num_bytes() as u32,
            "index buffer",
        )
    }

    fn record_buffer_barrier(&self, buffer: &BufferResource) {
        let Some(barriers) = &self.barriers else {
            return;
        };
        let descriptor = buffer.descriptor();
        let usage = if descriptor.contains(ResourceDescriptor::INDEX_BUFFER) {
            ResourceUsage::INDEX_BUFFER
        } else if descriptor
            .intersects(ResourceDescriptor::VERTEX_BUFFER | ResourceDescriptor::UNIFORM_BUFFER)
        {
            ResourceUsage::VERTEX_AND_CONSTANT_BUFFER
        } else if descriptor.contains(ResourceDescriptor::INDIRECT_BUFFER) {
            ResourceUsage::INDIRECT_ARGUMENT
        } else {
            ResourceUsage::SHADER_RESOURCE
        };
        barriers.list.lock().pipeline_barrier(&PipelineBarrierDesc::new().buffer(
            BufferBarrierDesc::new(buffer, usage).with_old_state(ResourceUsage::COPY_DST),
        ));
    }

    /// Submit the batch and schedule staging cleanup.
    ///
    /// `notify` is signaled when the batch (including post-copy barriers)
    /// completes. The returned fence covers the whole batch and is reused by
    /// the next `end`.
    pub fn end(&self, notify: Option<&Semaphore>) -> Result<Fence, GraphicsError> {
        crate::profile_scope!("BatchResourceCopy::end");
        self.join_cleanup();

        let batch_fence = {
            let mut list = self.copy_list.lock();
            list.end();
            let mut execute = ExecuteDesc::new().with_notify(&self.fence);
            match &self.barriers {
                Some(barriers) => {
                    execute = execute.notify_semaphore(&barriers.semaphore);
                    list.execute(&execute)?;

                    let mut barrier_list = barriers.list.lock();
                    barrier_list.end();
                    let mut execute = ExecuteDesc::new()
                        .with_notify(&barriers.fence)
                        .wait_on(&barriers.semaphore);
                    if let Some(notify) = notify {
                        execute = execute.notify_semaphore(notify);
                    }
                    barrier_list.execute(&execute)?;
                    barriers.fence.clone()
                }
                None => {
                    if let Some(notify) = notify {
                        execute = execute.notify_semaphore(notify);
                    }
                    list.execute(&execute)?;
                    self.fence.clone()
                }
            }
        };

        let staging = std::mem::take(&mut *self.staging.lock());
        let copy_fence = self.fence.clone();
        let stats = Arc::clone(&self.stats);
        log::debug!(
            "BatchResourceCopy: submitted batch with {} staging buffers",
            staging.len()
        );
        let handle = std::thread::Builder::new()
            .name("batch-copy-cleanup".into())
            .spawn(move || {
                copy_fence.wait();
                for buffer in staging {
                    // Checked on the native fence: a reset of the returned
                    // fence clears its pending flag but not native completion.
                    if !copy_fence.handle().is_signaled() {
                        stats.freed_before_fence_signaled.fetch_add(1, Ordering::AcqRel);
                    }
                    drop(buffer);
                    stats.staging_buffers_freed.fetch_add(1, Ordering::AcqRel);
                }
            })
            .map_err(|e| GraphicsError::Internal(format!("failed to spawn cleanup thread: {e}")))?;
        *self.cleanup.lock() = Some(handle);
        Ok(batch_fence)
    }

    fn join_cleanup(&self) {
        if let Some(handle) = self.cleanup.lock().take()
            && handle.join().is_err()
        {
            log::error!("BatchResourceCopy: staging cleanup thread panicked");
        }
    }

    /// Wait for the last batch and its staging cleanup.
    pub fn wait(&self) {
        self.join_cleanup();
        if let Some(barriers) = &self.barriers {
            barriers.fence.wait();
        }
    }
}

impl Drop for BatchResourceCopy {
    fn drop(&mut self) {
        self.join_cleanup();
    }
}

impl std::fmt::Debug for BatchResourceCopy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchResourceCopy")
            .field("stats", &self.stats())
            .field("barriers", &self.barriers.is_some())
            .finish()
    }
}

static_assertions::assert_impl_all!(BatchResourceCopy: Send, Sync);

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::resources::TextureDesc;
    use crate::test_utils::headless_device;
    use crate::types::Format;

    #[test]
    fn test_buffer_upload_round_trip() {
        let device = headless_device();
        let batch = BatchResourceCopy::new(&device, BatchResourceCopyDesc::default()).unwrap();
        let dst = device.create_buffer_resource(&BufferDesc::new(256)).unwrap();
        let data: Vec<u8> = (0..=255).collect();

        batch.begin();
        batch.copy_to_gpu_buffer(&CopyToGpuBufferDesc::new(&dst, 0, &data)).unwrap();
        let fence = batch.end(None).unwrap();
        fence.wait();
        batch.wait();

        assert_eq!(device.debug_read_buffer(&dst).unwrap(), data);
        let stats = batch.stats();
        assert_eq!(stats.staging_buffers_created, 1);
        assert_eq!(stats.staging_buffers_freed, 1);
        assert_eq!(stats.freed_before_fence_signaled, 0);
        assert_eq!(stats.bytes_staged, 256);
    }

    #[test]
    fn test_staging_outlives_stalled_copy_queue() {
        let device = headless_device();
        // Park the copy queue behind a semaphore signal that is scheduled
        // but not yet delivered.
        let gate = device.create_semaphore().unwrap();
        let gate_timeline = Arc::clone(gate.handle().as_headless().unwrap().timeline());
        let gate_ticket = gate_timeline.schedule();
        let mut blocker = device.create_command_list(QueueType::Copy).unwrap();
        blocker.begin();
        blocker.end();
        blocker.execute(&ExecuteDesc::new().wait_on(&gate)).unwrap();

        let batch = BatchResourceCopy::new(&device, BatchResourceCopyDesc::default()).unwrap();
        let dst = device.create_buffer_resource(&BufferDesc::new(64)).unwrap();
        batch.begin();
        batch.copy_to_gpu_buffer(&CopyToGpuBufferDesc::new(&dst, 0, &[1; 32])).unwrap();
        batch.copy_to_gpu_buffer(&CopyToGpuBufferDesc::new(&dst, 32, &[2; 32])).unwrap();
        let fence = batch.end(None).unwrap();

        // Resetting the returned fence must not release the staging early.
        let resetter = {
            let fence = fence.clone();
            std::thread::spawn(move || fence.reset())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(batch.stats().staging_buffers_freed, 0);
        assert!(!fence.handle().is_signaled());

        gate_timeline.signal(gate_ticket);
        resetter.join().unwrap();
        batch.wait();

        let stats = batch.stats();
        assert_eq!(stats.staging_buffers_created, 2);
        assert_eq!(stats.staging_buffers_freed, 2);
        assert_eq!(stats.freed_before_fence_signaled, 0);
        let mut expected = vec![1; 32];
        expected.extend([2; 32]);
        assert_eq!(device.debug_read_buffer(&dst).unwrap(), expected);
    }

    #[test]
    fn test_zero_sized_copy_rejected() {
        let device = headless_device();
        let batch = BatchResourceCopy::new(&device, BatchResourceCopyDesc::default()).unwrap();
        let dst = device.create_buffer_resource(&BufferDesc::new(16)).unwrap();
        batch.begin();
        assert!(matches!(
            batch.copy_to_gpu_buffer(&CopyToGpuBufferDesc::new(&dst, 0, &[])),
            Err(GraphicsError::InvalidParameter(_))
        ));
        batch.end(None).unwrap();
    }

    #[test]
    fn test_texture_upload_repitches_rows() {
        let device = headless_device();
        let batch = BatchResourceCopy::new(&device, BatchResourceCopyDesc::default().with_barriers())
            .unwrap();
        let texture = device
            .create_texture_resource(&TextureDesc::new_2d(3, 2, Format::Rgba8Unorm))
            .unwrap();
        let pixels: Vec<u8> = (0..24).collect();

        batch.begin();
        batch
            .copy_data_to_texture(&CopyDataToTextureDesc::new(&texture, &pixels))
            .unwrap();
        batch.end(None).unwrap().wait();
        batch.wait();
        assert_eq!(texture.current_usage(), ResourceUsage::SHADER_RESOURCE);
        assert_eq!(device.debug_read_texture(&texture, 0, 0).unwrap(), pixels);
    }

    #[test]
    fn test_create_buffers() {
        let device = headless_device();
        let batch = BatchResourceCopy::new(&device, BatchResourceCopyDesc::default()).unwrap();
        batch.begin();
        let uniform = batch.create_uniform_buffer(&[1; 20]).unwrap();
        assert_eq!(uniform.num_bytes(), 256);
        let index = batch.create_index_buffer(&[0; 12], IndexType::Uint16).unwrap();
        assert_eq!(index.num_bytes(), 12);
        assert!(batch.create_index_buffer(&[0; 3], IndexType::Uint16).is_err());
        batch.end(None).unwrap().wait();
        batch.wait();
        assert_eq!(batch.stats().staging_buffers_freed, 2);
    }
}
