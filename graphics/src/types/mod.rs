//! Common types shared by every module.
//!
//! Formats, heap and usage flags, binding slots, sampler state and device
//! descriptions.

mod binding;
mod common;
mod device_info;
mod format;
mod sampler;
mod usage;

pub use binding::{ResourceBindingSlot, ResourceBindingType, ShaderStages};
pub use common::{ClearValue, Extent3d, Offset3d, ScissorRect, Viewport};
pub use device_info::{
    BackendKind, DeviceConstants, PhysicalDevice, PhysicalDeviceCapabilities,
    PhysicalDeviceProperties,
};
pub use format::Format;
pub use sampler::{AddressMode, CompareOp, Filter, MipmapMode, SamplerDesc};
pub use usage::{HeapType, IndexType, QueueType, ResourceDescriptor, ResourceUsage};

/// Rounds `value` up to a multiple of `alignment` (a power of two, or zero for none).
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Returns true if `offset..offset + size` lies within `len` bytes.
/// Ranges whose end overflows never fit.
pub(crate) fn range_fits(offset: u64, size: u64, len: u64) -> bool {
    offset.checked_add(size).is_some_and(|end| end <= len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(13, 0), 13);
    }

    #[test]
    fn test_range_fits() {
        assert!(range_fits(0, 16, 16));
        assert!(range_fits(16, 0, 16));
        assert!(!range_fits(1, 16, 16));
        assert!(!range_fits(u64::MAX, 2, u64::MAX));
        assert!(!range_fits(2, u64::MAX, u64::MAX));
    }
}
