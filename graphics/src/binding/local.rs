//! Shader-local data layouts.
//!
//! Ray tracing shader tables carry a small record per shader: descriptor
//! handles for its local bindings followed by inline constants. Only the
//! record layout lives here; building shader tables is out of scope.

use std::collections::HashSet;

use crate::error::GraphicsError;
use crate::types::{ResourceBindingSlot, align_up};

/// Alignment of a shader record.
pub const SHADER_RECORD_ALIGNMENT: u32 = 32;

/// Size of one descriptor handle inside a record.
pub const LOCAL_DESCRIPTOR_SIZE: u32 = 8;

/// Local bindings and inline constants of a shader record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderLocalDataDesc {
    pub bindings: Vec<ResourceBindingSlot>,
    /// Bytes of inline constants, a multiple of 4.
    pub inline_constant_bytes: u32,
}

impl ShaderLocalDataDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binding(mut self, slot: ResourceBindingSlot) -> Self {
        self.bindings.push(slot);
        self
    }

    pub fn with_inline_constants(mut self, num_bytes: u32) -> Self {
        self.inline_constant_bytes = num_bytes;
        self
    }
}

/// Byte layout of a shader record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderLocalDataLayout {
    /// (slot, byte offset) in declaration order.
    bindings: Vec<(ResourceBindingSlot, u32)>,
    constants_offset: u32,
    constants_size: u32,
    record_size: u32,
}

impl ShaderLocalDataLayout {
    pub fn new(desc: &ShaderLocalDataDesc) -> Result<Self, GraphicsError> {
        if desc.inline_constant_bytes % 4 != 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "shader-local constants of {} bytes are not a multiple of 4",
                desc.inline_constant_bytes
            )));
        }
        let mut seen = HashSet::new();
        let mut bindings = Vec::with_capacity(desc.bindings.len());
        for (index, slot) in desc.bindings.iter().enumerate() {
            if !seen.insert(*slot) {
                return Err(GraphicsError::InvalidParameter(format!(
                    "duplicate shader-local binding {slot}"
                )));
            }
            bindings.push((*slot, index as u32 * LOCAL_DESCRIPTOR_SIZE));
        }
        let constants_offset = bindings.len() as u32 * LOCAL_DESCRIPTOR_SIZE;
        let unaligned = constants_offset + desc.inline_constant_bytes;
        let record_size = align_up(unaligned as u64, SHADER_RECORD_ALIGNMENT as u64) as u32;
        Ok(Self {
            bindings,
            constants_offset,
            constants_size: desc.inline_constant_bytes,
            record_size,
        })
    }

    /// Byte offset of a binding's descriptor handle.
    pub fn offset(&self, slot: &ResourceBindingSlot) -> Option<u32> {
        self.bindings
            .iter()
            .find(|(s, _)| s == slot)
            .map(|(_, offset)| *offset)
    }

    pub fn constants_offset(&self) -> u32 {
        self.constants_offset
    }

    pub fn constants_size(&self) -> u32 {
        self.constants_size
    }

    /// Record size rounded up to [`SHADER_RECORD_ALIGNMENT`].
    pub fn record_size(&self) -> u32 {
        self.record_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let desc = ShaderLocalDataDesc::new()
            .with_binding(ResourceBindingSlot::srv(0, 0))
            .with_binding(ResourceBindingSlot::cbv(0, 0))
            .with_inline_constants(12);
        let layout = ShaderLocalDataLayout::new(&desc).unwrap();
        assert_eq!(layout.offset(&ResourceBindingSlot::srv(0, 0)), Some(0));
        assert_eq!(layout.offset(&ResourceBindingSlot::cbv(0, 0)), Some(8));
        assert_eq!(layout.offset(&ResourceBindingSlot::uav(0, 0)), None);
        assert_eq!(layout.constants_offset(), 16);
        assert_eq!(layout.record_size(), 32);
    }

    #[test]
    fn test_empty_record() {
        let layout = ShaderLocalDataLayout::new(&ShaderLocalDataDesc::new()).unwrap();
        assert_eq!(layout.record_size(), 0);
    }

    #[test]
    fn test_invalid_local_data() {
        assert!(ShaderLocalDataLayout::new(&ShaderLocalDataDesc::new().with_inline_constants(3)).is_err());
        let dup = ShaderLocalDataDesc::new()
            .with_binding(ResourceBindingSlot::srv(1, 0))
            .with_binding(ResourceBindingSlot::srv(1, 0));
        assert!(ShaderLocalDataLayout::new(&dup).is_err());
    }
}
