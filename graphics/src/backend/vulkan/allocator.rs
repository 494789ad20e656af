//! Device memory through gpu-allocator.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};

use crate::error::GraphicsError;
use crate::types::HeapType;

pub(super) fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> Result<Allocator, GraphicsError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {e}"))
    })
}

pub(super) fn memory_location(heap_type: HeapType) -> MemoryLocation {
    match heap_type {
        HeapType::Gpu => MemoryLocation::GpuOnly,
        HeapType::Cpu | HeapType::CpuGpu => MemoryLocation::CpuToGpu,
        HeapType::GpuCpu => MemoryLocation::GpuToCpu,
    }
}

pub(super) fn allocation_error(e: gpu_allocator::AllocationError) -> GraphicsError {
    match e {
        gpu_allocator::AllocationError::OutOfMemory => GraphicsError::OutOfMemory,
        other => GraphicsError::ResourceCreationFailed(format!("Failed to allocate memory: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_locations() {
        assert_eq!(memory_location(HeapType::Gpu), MemoryLocation::GpuOnly);
        assert_eq!(memory_location(HeapType::CpuGpu), MemoryLocation::CpuToGpu);
        assert_eq!(memory_location(HeapType::GpuCpu), MemoryLocation::GpuToCpu);
    }
}
