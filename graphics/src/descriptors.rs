//! Descriptor slot allocation.
//!
//! A [`DescriptorAllocator`] hands out contiguous ranges of descriptor slots
//! from fixed-capacity pools. Freed ranges are recycled first-fit and merged
//! with their neighbours. When no pool can hold a request a new pool is
//! appended, up to an optional hard cap.
//!
//! The headless backend uses the allocator directly as its emulated descriptor
//! heap. The Vulkan backend mirrors every pool with a `VkDescriptorPool`.

use parking_lot::Mutex;

use crate::error::GraphicsError;

/// Descriptor heap an allocator serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// Constant buffer, shader resource and unordered access views.
    CbvSrvUav,
    /// Samplers.
    Sampler,
}

/// A contiguous range of slots inside one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorAllocation {
    pub heap_type: DescriptorHeapType,
    /// Index of the pool the range lives in.
    pub pool: usize,
    /// First slot of the range.
    pub offset: u32,
    /// Number of slots.
    pub count: u32,
}

#[derive(Debug, Clone, Copy)]
struct FreeRange {
    offset: u32,
    count: u32,
}

#[derive(Debug)]
struct DescriptorPool {
    /// Sorted by offset, never adjacent.
    free: Vec<FreeRange>,
}

impl DescriptorPool {
    fn new(capacity: u32) -> Self {
        Self {
            free: vec![FreeRange {
                offset: 0,
                count: capacity,
            }],
        }
    }

    fn allocate(&mut self, count: u32) -> Option<u32> {
        let index = self.free.iter().position(|range| range.count >= count)?;
        let range = &mut self.free[index];
        let offset = range.offset;
        range.offset += count;
        range.count -= count;
        if range.count == 0 {
            self.free.remove(index);
        }
        Some(offset)
    }

    fn free(&mut self, offset: u32, count: u32) {
        let index = self.free.partition_point(|range| range.offset < offset);
        debug_assert!(
            index == self.free.len() || offset + count <= self.free[index].offset,
            "descriptor range freed twice"
        );
        self.free.insert(index, FreeRange { offset, count });

        // Merge with the following range, then with the preceding one.
        if index + 1 < self.free.len() {
            let next = self.free[index + 1];
            if offset + count == next.offset {
                self.free[index].count += next.count;
                self.free.remove(index + 1);
            }
        }
        if index > 0 {
            let prev = self.free[index - 1];
            if prev.offset + prev.count == offset {
                self.free[index - 1].count += self.free[index].count;
                self.free.remove(index);
            }
        }
    }

    fn largest_free_range(&self) -> u32 {
        self.free.iter().map(|range| range.count).max().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct AllocatorState {
    pools: Vec<DescriptorPool>,
    allocated: u32,
}

/// Thread-safe descriptor slot allocator for one heap type.
#[derive(Debug)]
pub struct DescriptorAllocator {
    heap_type: DescriptorHeapType,
    capacity_per_pool: u32,
    max_pools: Option<usize>,
    state: Mutex<AllocatorState>,
}

impl DescriptorAllocator {
    /// Create an allocator. No pool is created until the first allocation.
    pub fn new(heap_type: DescriptorHeapType, capacity_per_pool: u32, max_pools: Option<usize>) -> Self {
        Self {
            heap_type,
            capacity_per_pool,
            max_pools,
            state: Mutex::new(AllocatorState::default()),
        }
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    pub fn capacity_per_pool(&self) -> u32 {
        self.capacity_per_pool
    }

    /// Allocate `count` contiguous slots.
    ///
    /// # Errors
    ///
    /// - [`GraphicsError::InvalidParameter`] if `count` is zero or larger than a pool.
    /// - [`GraphicsError::OutOfDescriptors`] if a new pool is needed and the
    ///   pool cap is reached.
    pub fn allocate(&self, count: u32) -> Result<DescriptorAllocation, GraphicsError> {
        if count == 0 || count > self.capacity_per_pool {
            return Err(GraphicsError::InvalidParameter(format!(
                "descriptor allocation of {count} slots, pool capacity is {}",
                self.capacity_per_pool
            )));
        }

        let mut state = self.state.lock();
        let found = state
            .pools
            .iter_mut()
            .enumerate()
            .find_map(|(pool, p)| p.allocate(count).map(|offset| (pool, offset)));

        let (pool, offset) = match found {
            Some(slot) => slot,
            None => {
                if let Some(max) = self.max_pools
                    && state.pools.len() >= max
                {
                    log::error!(
                        "DescriptorAllocator: {:?} heap exhausted ({} pools of {})",
                        self.heap_type,
                        max,
                        self.capacity_per_pool
                    );
                    return Err(GraphicsError::OutOfDescriptors(format!(
                        "{:?} heap, {max} pools",
                        self.heap_type
                    )));
                }
                let mut new_pool = DescriptorPool::new(self.capacity_per_pool);
                let offset = new_pool.allocate(count).ok_or_else(|| {
                    GraphicsError::Internal("fresh descriptor pool rejected allocation".to_string())
                })?;
                state.pools.push(new_pool);
                log::debug!(
                    "DescriptorAllocator: grew {:?} heap to {} pools",
                    self.heap_type,
                    state.pools.len()
                );
                (state.pools.len() - 1, offset)
            }
        };

        state.allocated += count;
        Ok(DescriptorAllocation {
            heap_type: self.heap_type,
            pool,
            offset,
            count,
        })
    }

    /// Return a range to its pool.
    pub fn free(&self, allocation: DescriptorAllocation) {
        debug_assert_eq!(allocation.heap_type, self.heap_type);
        let mut state = self.state.lock();
        if let Some(pool) = state.pools.get_mut(allocation.pool) {
            pool.free(allocation.offset, allocation.count);
            state.allocated -= allocation.count;
        } else {
            log::error!(
                "DescriptorAllocator: freeing range in unknown pool {}",
                allocation.pool
            );
        }
    }

    /// Number of pools created so far.
    pub fn num_pools(&self) -> usize {
        self.state.lock().pools.len()
    }

    /// Number of slots currently allocated.
    pub fn allocated(&self) -> u32 {
        self.state.lock().allocated
    }

    /// Size of the largest range that fits without growing.
    pub fn largest_free_range(&self) -> u32 {
        let state = self.state.lock();
        state
            .pools
            .iter()
            .map(DescriptorPool::largest_free_range)
            .max()
            .unwrap_or(0)
    }
}

static_assertions::assert_impl_all!(DescriptorAllocator: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(max_pools: Option<usize>) -> DescriptorAllocator {
        DescriptorAllocator::new(DescriptorHeapType::CbvSrvUav, 8, max_pools)
    }

    #[test]
    fn test_contiguous_allocation() {
        let alloc = allocator(None);
        let a = alloc.allocate(3).unwrap();
        let b = alloc.allocate(2).unwrap();
        assert_eq!((a.pool, a.offset), (0, 0));
        assert_eq!((b.pool, b.offset), (0, 3));
        assert_eq!(alloc.allocated(), 5);
    }

    #[test]
    fn test_grows_when_full() {
        let alloc = allocator(None);
        let _a = alloc.allocate(6).unwrap();
        let b = alloc.allocate(4).unwrap();
        assert_eq!(b.pool, 1);
        assert_eq!(alloc.num_pools(), 2);
    }

    #[test]
    fn test_recycles_freed_ranges() {
        let alloc = allocator(None);
        let a = alloc.allocate(4).unwrap();
        let _b = alloc.allocate(4).unwrap();
        alloc.free(a);
        let c = alloc.allocate(4).unwrap();
        assert_eq!((c.pool, c.offset), (0, 0));
        assert_eq!(alloc.num_pools(), 1);
    }

    #[test]
    fn test_coalesces_neighbours() {
        let alloc = allocator(None);
        let a = alloc.allocate(2).unwrap();
        let b = alloc.allocate(2).unwrap();
        let c = alloc.allocate(2).unwrap();
        let _d = alloc.allocate(2).unwrap();
        alloc.free(a);
        alloc.free(c);
        alloc.free(b);
        // a, b and c merged back into one 6-slot range
        assert_eq!(alloc.largest_free_range(), 6);
        let e = alloc.allocate(6).unwrap();
        assert_eq!((e.pool, e.offset), (0, 0));
    }

    #[test]
    fn test_hard_cap() {
        let alloc = allocator(Some(1));
        let _a = alloc.allocate(8).unwrap();
        let err = alloc.allocate(1).unwrap_err();
        assert!(matches!(err, GraphicsError::OutOfDescriptors(_)));
    }

    #[test]
    fn test_rejects_oversized_and_empty() {
        let alloc = allocator(None);
        assert!(matches!(
            alloc.allocate(9),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(matches!(
            alloc.allocate(0),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert_eq!(alloc.num_pools(), 0);
    }

    #[test]
    fn test_concurrent_allocation() {
        let alloc = std::sync::Arc::new(allocator(None));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let alloc = alloc.clone();
                std::thread::spawn(move || {
                    (0..16).map(|_| alloc.allocate(1).unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .map(|a| (a.pool, a.offset))
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 64);
        assert_eq!(alloc.num_pools(), 8);
    }
}
