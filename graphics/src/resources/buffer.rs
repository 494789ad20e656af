//! Buffer resources and CPU mapping.

use std::ops::{Deref, DerefMut, Range};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::backend::GpuBuffer;
use crate::error::GraphicsError;
use crate::types::{HeapType, ResourceDescriptor, ResourceUsage, range_fits};

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub heap_type: HeapType,
    pub descriptor: ResourceDescriptor,
    /// Size in bytes. Must be non-zero.
    pub num_bytes: u64,
    /// State the buffer is in after creation.
    pub initial_usage: ResourceUsage,
    /// Every state the buffer will be transitioned to.
    pub usages: ResourceUsage,
    /// Element stride for structured buffers, zero otherwise.
    pub stride: u32,
    pub debug_name: Option<String>,
}

impl BufferDesc {
    /// Device-local buffer that can be copied into and out of.
    pub fn new(num_bytes: u64) -> Self {
        Self {
            heap_type: HeapType::Gpu,
            descriptor: ResourceDescriptor::BUFFER,
            num_bytes,
            initial_usage: ResourceUsage::COMMON,
            usages: ResourceUsage::COPY_DST | ResourceUsage::COPY_SRC,
            stride: 0,
            debug_name: None,
        }
    }

    /// Host-visible buffer used as a copy source.
    pub fn upload(num_bytes: u64) -> Self {
        Self::new(num_bytes)
            .with_heap_type(HeapType::CpuGpu)
            .with_initial_usage(ResourceUsage::COPY_SRC)
    }

    /// Host-visible buffer used as a copy destination and read by the CPU.
    pub fn readback(num_bytes: u64) -> Self {
        Self::new(num_bytes)
            .with_heap_type(HeapType::GpuCpu)
            .with_initial_usage(ResourceUsage::COPY_DST)
    }

    pub fn with_heap_type(mut self, heap_type: HeapType) -> Self {
        self.heap_type = heap_type;
        self
    }

    pub fn with_descriptor(mut self, descriptor: ResourceDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn with_initial_usage(mut self, usage: ResourceUsage) -> Self {
        self.initial_usage = usage;
        self
    }

    pub fn with_usages(mut self, usages: ResourceUsage) -> Self {
        self.usages |= usages;
        self
    }

    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    /// Every usage the native buffer must support, including those implied
    /// by the descriptor flags.
    pub fn all_usages(&self) -> ResourceUsage {
        let mut usages = self.usages | self.initial_usage;
        let d = self.descriptor;
        if d.intersects(ResourceDescriptor::VERTEX_BUFFER | ResourceDescriptor::UNIFORM_BUFFER) {
            usages |= ResourceUsage::VERTEX_AND_CONSTANT_BUFFER;
        }
        if d.contains(ResourceDescriptor::INDEX_BUFFER) {
            usages |= ResourceUsage::INDEX_BUFFER;
        }
        if d.contains(ResourceDescriptor::INDIRECT_BUFFER) {
            usages |= ResourceUsage::INDIRECT_ARGUMENT;
        }
        if d.contains(ResourceDescriptor::RW_BUFFER) {
            usages |= ResourceUsage::UNORDERED_ACCESS;
        }
        if d.intersects(ResourceDescriptor::BUFFER | ResourceDescriptor::STRUCTURED_BUFFER) {
            usages |= ResourceUsage::SHADER_RESOURCE;
        }
        usages
    }

    pub(crate) fn validate(&self) -> Result<(), GraphicsError> {
        if self.num_bytes == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer {:?}: size cannot be zero",
                self.debug_name
            )));
        }
        if self.descriptor.contains(ResourceDescriptor::STRUCTURED_BUFFER) && self.stride == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer {:?}: structured buffers need a stride",
                self.debug_name
            )));
        }
        Ok(())
    }
}

/// A GPU buffer.
///
/// Move-only: the owner decides when the buffer is released. The native
/// buffer is shared with recorded command lists, so dropping a buffer that a
/// submitted list still references is safe; the memory lives until that list
/// is reset.
pub struct BufferResource {
    id: u64,
    handle: Arc<GpuBuffer>,
    desc: BufferDesc,
    current_usage: AtomicU32,
}

impl BufferResource {
    pub(crate) fn new(id: u64, handle: Arc<GpuBuffer>, desc: BufferDesc) -> Self {
        let current_usage = AtomicU32::new(desc.initial_usage.bits());
        Self {
            id,
            handle,
            desc,
            current_usage,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    pub fn num_bytes(&self) -> u64 {
        self.desc.num_bytes
    }

    pub fn heap_type(&self) -> HeapType {
        self.desc.heap_type
    }

    pub fn descriptor(&self) -> ResourceDescriptor {
        self.desc.descriptor
    }

    pub fn initial_usage(&self) -> ResourceUsage {
        self.desc.initial_usage
    }

    /// Usage recorded by the last barrier on this buffer.
    pub fn current_usage(&self) -> ResourceUsage {
        ResourceUsage::from_bits_truncate(self.current_usage.load(Ordering::Acquire))
    }

    pub(crate) fn set_current_usage(&self, usage: ResourceUsage) {
        self.current_usage.store(usage.bits(), Ordering::Release);
    }

    pub fn debug_name(&self) -> Option<&str> {
        self.desc.debug_name.as_deref()
    }

    pub(crate) fn handle(&self) -> &Arc<GpuBuffer> {
        &self.handle
    }

    /// Map the buffer for CPU access.
    ///
    /// Writes become visible to the GPU when the returned guard is unmapped
    /// or dropped.
    ///
    /// # Panics
    ///
    /// Panics if the buffer lives in [`HeapType::Gpu`].
    pub fn map_memory(&mut self) -> Result<MappedMemory<'_>, GraphicsError> {
        assert!(
            self.desc.heap_type.is_host_visible(),
            "buffer {:?} is in a GPU-only heap and cannot be mapped",
            self.desc.debug_name
        );
        let shadow = self.handle.read(0, self.desc.num_bytes)?;
        Ok(MappedMemory {
            buffer: self,
            shadow,
            dirty: None,
            unmapped: false,
        })
    }

    /// Map, copy `data` at `offset`, unmap.
    pub fn write_data(&mut self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        assert!(
            self.desc.heap_type.is_host_visible(),
            "buffer {:?} is in a GPU-only heap and cannot be written from the CPU",
            self.desc.debug_name
        );
        assert!(
            range_fits(offset, data.len() as u64, self.desc.num_bytes),
            "write of {} bytes at {offset} exceeds buffer size {}",
            data.len(),
            self.desc.num_bytes
        );
        self.handle.write(offset, data)
    }

    /// Read the whole buffer back.
    ///
    /// Only meaningful after the GPU work writing the buffer has been waited on.
    ///
    /// # Panics
    ///
    /// Panics if the buffer lives in [`HeapType::Gpu`]; use
    /// [`LogicalDevice::debug_read_buffer`](crate::LogicalDevice::debug_read_buffer) instead.
    pub fn read_data(&self) -> Result<Vec<u8>, GraphicsError> {
        assert!(
            self.desc.heap_type.is_host_visible(),
            "buffer {:?} is in a GPU-only heap and cannot be read from the CPU",
            self.desc.debug_name
        );
        self.handle.read(0, self.desc.num_bytes)
    }
}

impl std::fmt::Debug for BufferResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferResource")
            .field("id", &self.id)
            .field("num_bytes", &self.desc.num_bytes)
            .field("heap_type", &self.desc.heap_type)
            .field("debug_name", &self.desc.debug_name)
            .finish()
    }
}

/// CPU view of a mapped buffer.
///
/// Dereferences to the buffer contents. Modified bytes are flushed on
/// [`unmap`](Self::unmap) or drop.
pub struct MappedMemory<'a> {
    buffer: &'a BufferResource,
    shadow: Vec<u8>,
    dirty: Option<Range<usize>>,
    unmapped: bool,
}

impl MappedMemory<'_> {
    /// Copy `data` into the mapping at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the buffer.
    pub fn copy_data(&mut self, offset: usize, data: &[u8]) {
        let end = offset.checked_add(data.len()).filter(|&end| end <= self.shadow.len());
        let Some(end) = end else {
            panic!(
                "copy of {} bytes at {offset} exceeds mapped size {}",
                data.len(),
                self.shadow.len()
            );
        };
        self.shadow[offset..end].copy_from_slice(data);
        self.mark_dirty(offset..end);
    }

    fn mark_dirty(&mut self, range: Range<usize>) {
        self.dirty = Some(match self.dirty.take() {
            Some(dirty) => dirty.start.min(range.start)..dirty.end.max(range.end),
            None => range,
        });
    }

    fn flush(&mut self) -> Result<(), GraphicsError> {
        self.unmapped = true;
        match self.dirty.take() {
            Some(range) if !range.is_empty() => self
                .buffer
                .handle
                .write(range.start as u64, &self.shadow[range]),
            _ => Ok(()),
        }
    }

    /// Flush written bytes and end the mapping.
    pub fn unmap(mut self) -> Result<(), GraphicsError> {
        self.flush()
    }
}

impl Deref for MappedMemory<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.shadow
    }
}

impl DerefMut for MappedMemory<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        let len = self.shadow.len();
        self.mark_dirty(0..len);
        &mut self.shadow
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        if !self.unmapped
            && let Err(e) = self.flush()
        {
            log::error!(
                "BufferResource {}: flushing mapped memory failed: {}",
                self.buffer.id,
                e
            );
        }
    }
}

static_assertions::assert_impl_all!(BufferResource: Send, Sync);
static_assertions::assert_not_impl_any!(BufferResource: Clone);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            BufferDesc::new(0).validate(),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(BufferDesc::new(16).validate().is_ok());
    }

    #[test]
    fn test_structured_needs_stride() {
        let desc = BufferDesc::new(64).with_descriptor(ResourceDescriptor::STRUCTURED_BUFFER);
        assert!(desc.validate().is_err());
        assert!(desc.with_stride(16).validate().is_ok());
    }

    #[test]
    fn test_all_usages_include_descriptor_usages() {
        let desc = BufferDesc::new(64)
            .with_descriptor(ResourceDescriptor::VERTEX_BUFFER | ResourceDescriptor::INDEX_BUFFER);
        let usages = desc.all_usages();
        assert!(usages.contains(ResourceUsage::VERTEX_AND_CONSTANT_BUFFER));
        assert!(usages.contains(ResourceUsage::INDEX_BUFFER));
        assert!(usages.contains(ResourceUsage::COPY_DST));
    }

    #[test]
    fn test_upload_desc() {
        let desc = BufferDesc::upload(256);
        assert_eq!(desc.heap_type, HeapType::CpuGpu);
        assert_eq!(desc.initial_usage, ResourceUsage::COPY_SRC);
    }

    #[cfg(feature = "headless")]
    mod headless {
        use super::*;
        use crate::backend::headless::HeadlessBuffer;

        fn buffer(desc: BufferDesc) -> BufferResource {
            let handle = GpuBuffer::Headless(HeadlessBuffer::new(&desc).unwrap());
            BufferResource::new(1, Arc::new(handle), desc)
        }

        #[test]
        fn test_map_copy_unmap() {
            let mut buffer = buffer(BufferDesc::upload(8));
            let mut mapped = buffer.map_memory().unwrap();
            mapped.copy_data(2, &[1, 2, 3]);
            assert_eq!(&mapped[..5], &[0, 0, 1, 2, 3]);
            mapped.unmap().unwrap();
            assert_eq!(buffer.read_data().unwrap(), vec![0, 0, 1, 2, 3, 0, 0, 0]);
        }

        #[test]
        #[should_panic(expected = "exceeds mapped size")]
        fn test_copy_data_with_overflowing_offset_panics_with_bounds_message() {
            let mut buffer = buffer(BufferDesc::upload(8));
            let mut mapped = buffer.map_memory().unwrap();
            mapped.copy_data(usize::MAX, &[1, 2]);
        }

        #[test]
        fn test_drop_flushes() {
            let mut buffer = buffer(BufferDesc::upload(4));
            {
                let mut mapped = buffer.map_memory().unwrap();
                mapped[3] = 9;
            }
            assert_eq!(buffer.read_data().unwrap(), vec![0, 0, 0, 9]);
        }

        #[test]
        #[should_panic(expected = "GPU-only heap")]
        fn test_map_gpu_heap_panics() {
            let mut buffer = buffer(BufferDesc::new(4));
            let _ = buffer.map_memory();
        }

        #[test]
        fn test_current_usage_tracks_barriers() {
            let buffer = buffer(BufferDesc::new(4));
            assert_eq!(buffer.current_usage(), ResourceUsage::COMMON);
            buffer.set_current_usage(ResourceUsage::COPY_DST);
            assert_eq!(buffer.current_usage(), ResourceUsage::COPY_DST);
        }
    }
}
