//! Shader-visible binding slots.

use bitflags::bitflags;

/// Class of descriptor bound at a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ResourceBindingType {
    /// Constant (uniform) buffer view.
    #[default]
    ConstantBuffer,
    /// Read-only buffer or texture view.
    ShaderResource,
    /// Read/write buffer or texture view.
    UnorderedAccess,
    /// Sampler.
    Sampler,
}

impl ResourceBindingType {
    /// Returns true for the sampler heap, false for the CBV/SRV/UAV heap.
    pub fn is_sampler(&self) -> bool {
        matches!(self, Self::Sampler)
    }
}

/// A (type, binding, register space) triple identifying one shader slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ResourceBindingSlot {
    pub register_space: u32,
    pub binding_type: ResourceBindingType,
    pub binding: u32,
}

impl ResourceBindingSlot {
    pub fn new(binding_type: ResourceBindingType, binding: u32, register_space: u32) -> Self {
        Self {
            register_space,
            binding_type,
            binding,
        }
    }

    /// Constant buffer slot (`b` register).
    pub fn cbv(binding: u32, register_space: u32) -> Self {
        Self::new(ResourceBindingType::ConstantBuffer, binding, register_space)
    }

    /// Shader resource slot (`t` register).
    pub fn srv(binding: u32, register_space: u32) -> Self {
        Self::new(ResourceBindingType::ShaderResource, binding, register_space)
    }

    /// Unordered access slot (`u` register).
    pub fn uav(binding: u32, register_space: u32) -> Self {
        Self::new(ResourceBindingType::UnorderedAccess, binding, register_space)
    }

    /// Sampler slot (`s` register).
    pub fn sampler(binding: u32, register_space: u32) -> Self {
        Self::new(ResourceBindingType::Sampler, binding, register_space)
    }

    /// Packs the slot into a single sortable key.
    pub fn key(&self) -> u64 {
        ((self.register_space as u64) << 40)
            | ((self.binding_type as u64) << 32)
            | self.binding as u64
    }
}

impl std::fmt::Display for ResourceBindingSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let register = match self.binding_type {
            ResourceBindingType::ConstantBuffer => 'b',
            ResourceBindingType::ShaderResource => 't',
            ResourceBindingType::UnorderedAccess => 'u',
            ResourceBindingType::Sampler => 's',
        };
        write!(f, "{register}{}, space{}", self.binding, self.register_space)
    }
}

bitflags! {
    /// Shader stages a binding is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStages: u32 {
        /// Vertex shader.
        const VERTEX = 1 << 0;
        /// Pixel (fragment) shader.
        const PIXEL = 1 << 1;
        /// Compute shader.
        const COMPUTE = 1 << 2;
        /// Geometry shader.
        const GEOMETRY = 1 << 3;
        /// Hull (tessellation control) shader.
        const HULL = 1 << 4;
        /// Domain (tessellation evaluation) shader.
        const DOMAIN = 1 << 5;
        /// Every graphics stage.
        const ALL_GRAPHICS = Self::VERTEX.bits()
            | Self::PIXEL.bits()
            | Self::GEOMETRY.bits()
            | Self::HULL.bits()
            | Self::DOMAIN.bits();
        /// Every stage.
        const ALL = Self::ALL_GRAPHICS.bits() | Self::COMPUTE.bits();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_key_orders_by_space_then_type() {
        let a = ResourceBindingSlot::cbv(5, 0);
        let b = ResourceBindingSlot::srv(0, 0);
        let c = ResourceBindingSlot::cbv(0, 1);
        assert!(a.key() < b.key());
        assert!(b.key() < c.key());
        assert_eq!(a.cmp(&b), a.key().cmp(&b.key()));
    }

    #[test]
    fn test_slot_display() {
        assert_eq!(ResourceBindingSlot::srv(3, 1).to_string(), "t3, space1");
        assert_eq!(ResourceBindingSlot::sampler(0, 0).to_string(), "s0, space0");
    }
}
