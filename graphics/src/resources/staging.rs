//! Host-visible staging memory with a bump cursor.
//!
//! A [`StagingBuffer`] is one `CPU_GPU` buffer that transfers are packed into
//! back to back. Check [`can_fit`](StagingBuffer::can_fit) (or handle `None`
//! from [`allocate`](StagingBuffer::allocate)) before writing, and only
//! [`reset`](StagingBuffer::reset) once the copy reading the buffer is done;
//! `reset` takes the copy's fence and waits on it.
//!
//! ```ignore
//! let mut staging = StagingBuffer::new(&device, 64 * 1024)?;
//! if let Some(alloc) = staging.allocate(pixels.len() as u64, 512) {
//!     staging.write(&alloc, &pixels)?;
//!     list.copy_buffer_to_texture(&CopyBufferToTextureDesc::new(staging.buffer(), alloc.offset, &texture));
//! }
//! // ... execute with `fence` ...
//! staging.reset(&fence);
//! ```

use crate::device::LogicalDevice;
use crate::error::GraphicsError;
use crate::resources::{BufferDesc, BufferResource};
use crate::sync::Fence;
use crate::types::{ResourceDescriptor, align_up, range_fits};

/// A sub-allocation of a staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StagingAllocation {
    /// Byte offset into the staging buffer.
    pub offset: u64,
    pub size: u64,
}

impl StagingAllocation {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Bump-allocated upload buffer.
///
/// Not thread-safe; wrap it in a mutex or use one per thread.
pub struct StagingBuffer {
    buffer: BufferResource,
    cursor: u64,
}

impl StagingBuffer {
    /// Create a staging buffer of `num_bytes` in the upload heap.
    pub fn new(device: &LogicalDevice, num_bytes: u64) -> Result<Self, GraphicsError> {
        let buffer = device.create_buffer_resource(
            &BufferDesc::upload(num_bytes)
                .with_descriptor(ResourceDescriptor::BUFFER)
                .with_debug_name("staging"),
        )?;
        Ok(Self::from_buffer(buffer))
    }

    pub(crate) fn from_buffer(buffer: BufferResource) -> Self {
        Self { buffer, cursor: 0 }
    }

    /// The underlying buffer, used as the source of recorded copies.
    pub fn buffer(&self) -> &BufferResource {
        &self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.buffer.num_bytes()
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> u64 {
        self.capacity() - self.cursor
    }

    /// Returns true if `size` bytes aligned to `alignment` fit.
    pub fn can_fit(&self, size: u64, alignment: u64) -> bool {
        range_fits(align_up(self.cursor, alignment), size, self.capacity())
    }

    /// Reserve `size` bytes aligned to `alignment`.
    ///
    /// Returns `None` when the buffer is full.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<StagingAllocation> {
        if !self.can_fit(size, alignment) {
            return None;
        }
        let offset = align_up(self.cursor, alignment);
        self.cursor = offset + size;
        Some(StagingAllocation { offset, size })
    }

    /// Copy `data` into a previous allocation.
    ///
    /// # Panics
    ///
    /// Panics if `data` is larger than the allocation.
    pub fn write(&mut self, allocation: &StagingAllocation, data: &[u8]) -> Result<(), GraphicsError> {
        assert!(
            data.len() as u64 <= allocation.size,
            "staging write of {} bytes into a {}-byte allocation",
            data.len(),
            allocation.size
        );
        self.buffer.write_data(allocation.offset, data)
    }

    /// Wait on `fence`, then rewind the cursor.
    pub fn reset(&mut self, fence: &Fence) {
        fence.wait();
        self.cursor = 0;
    }

    pub(crate) fn into_buffer(self) -> BufferResource {
        self.buffer
    }
}

impl std::fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("capacity", &self.capacity())
            .field("cursor", &self.cursor)
            .finish()
    }
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::test_utils::headless_device;

    #[test]
    fn test_allocation_alignment() {
        let device = headless_device();
        let mut staging = StagingBuffer::new(&device, 1024).unwrap();

        let a = staging.allocate(100, 64).unwrap();
        assert_eq!(a.offset, 0);
        let b = staging.allocate(50, 256).unwrap();
        assert_eq!(b.offset, 256);
        assert_eq!(staging.remaining(), 1024 - 306);
    }

    #[test]
    fn test_can_fit_and_overflow() {
        let device = headless_device();
        let mut staging = StagingBuffer::new(&device, 512).unwrap();

        staging.allocate(400, 64).unwrap();
        assert!(!staging.can_fit(200, 64));
        assert!(staging.allocate(200, 64).is_none());
        // 400 rounds up to 448, leaving exactly 64 bytes
        assert!(staging.can_fit(64, 64));
        assert_eq!(staging.allocate(64, 64).unwrap().offset, 448);
        assert!(staging.allocate(1, 1).is_none());
    }

    #[test]
    fn test_huge_size_never_fits() {
        let device = headless_device();
        let mut staging = StagingBuffer::new(&device, 512).unwrap();

        staging.allocate(10, 1).unwrap();
        assert!(!staging.can_fit(u64::MAX, 1));
        assert!(!staging.can_fit(u64::MAX - 4, 16));
        assert!(staging.allocate(u64::MAX, 1).is_none());
        assert_eq!(staging.remaining(), 502);
    }

    #[test]
    fn test_reset_after_fence() {
        let device = headless_device();
        let mut staging = StagingBuffer::new(&device, 256).unwrap();
        let fence = device.create_fence().unwrap();

        let alloc = staging.allocate(256, 1).unwrap();
        staging.write(&alloc, &[7; 256]).unwrap();
        assert_eq!(staging.remaining(), 0);

        // Never submitted, so the wait returns at once.
        staging.reset(&fence);
        assert_eq!(staging.remaining(), 256);
        assert_eq!(staging.buffer().read_data().unwrap(), vec![7; 256]);
    }
}
