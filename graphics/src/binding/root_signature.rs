//! Root signatures and their resolved layouts.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::GpuRootSignature;
use crate::config::GraphicsConfiguration;
use crate::error::GraphicsError;
use crate::types::{
    ResourceBindingSlot, ResourceBindingType, ResourceDescriptor, SamplerDesc, ShaderStages,
};

/// Largest root constant block accepted by every backend.
pub const MAX_ROOT_CONSTANT_BYTES: u32 = 128;

/// One binding a shader expects.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBindingDesc {
    /// Reflected name, for diagnostics.
    pub name: String,
    pub binding_type: ResourceBindingType,
    pub binding: u32,
    pub register_space: u32,
    pub stages: ShaderStages,
    /// Number of descriptors, at least one.
    pub array_size: u32,
    /// Unbounded array indexed dynamically by the shader.
    pub is_bindless: bool,
    /// Kind of view bound at the slot. Decides between image and buffer
    /// descriptors on backends that distinguish them.
    pub descriptor: ResourceDescriptor,
}

impl ResourceBindingDesc {
    pub fn new(
        name: impl Into<String>,
        binding_type: ResourceBindingType,
        binding: u32,
        register_space: u32,
    ) -> Self {
        Self {
            name: name.into(),
            binding_type,
            binding,
            register_space,
            stages: ShaderStages::ALL,
            array_size: 1,
            is_bindless: false,
            descriptor: default_descriptor(binding_type),
        }
    }

    pub fn cbv(name: impl Into<String>, binding: u32, register_space: u32) -> Self {
        Self::new(name, ResourceBindingType::ConstantBuffer, binding, register_space)
    }

    pub fn srv(name: impl Into<String>, binding: u32, register_space: u32) -> Self {
        Self::new(name, ResourceBindingType::ShaderResource, binding, register_space)
    }

    pub fn uav(name: impl Into<String>, binding: u32, register_space: u32) -> Self {
        Self::new(name, ResourceBindingType::UnorderedAccess, binding, register_space)
    }

    pub fn sampler(name: impl Into<String>, binding: u32, register_space: u32) -> Self {
        Self::new(name, ResourceBindingType::Sampler, binding, register_space)
    }

    pub fn with_stages(mut self, stages: ShaderStages) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size;
        self
    }

    pub fn bindless(mut self) -> Self {
        self.is_bindless = true;
        self
    }

    /// Bind buffers instead of textures at an SRV or UAV slot, and so on.
    pub fn with_descriptor(mut self, descriptor: ResourceDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn slot(&self) -> ResourceBindingSlot {
        ResourceBindingSlot::new(self.binding_type, self.binding, self.register_space)
    }
}

fn default_descriptor(binding_type: ResourceBindingType) -> ResourceDescriptor {
    match binding_type {
        ResourceBindingType::ConstantBuffer => ResourceDescriptor::UNIFORM_BUFFER,
        ResourceBindingType::ShaderResource => ResourceDescriptor::TEXTURE,
        ResourceBindingType::UnorderedAccess => ResourceDescriptor::RW_TEXTURE,
        ResourceBindingType::Sampler => ResourceDescriptor::SAMPLER,
    }
}

/// A sampler baked into the root signature.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticSamplerDesc {
    pub binding: u32,
    pub register_space: u32,
    pub stages: ShaderStages,
    pub sampler: SamplerDesc,
}

impl StaticSamplerDesc {
    pub fn new(binding: u32, register_space: u32, sampler: SamplerDesc) -> Self {
        Self {
            binding,
            register_space,
            stages: ShaderStages::ALL,
            sampler,
        }
    }

    pub fn slot(&self) -> ResourceBindingSlot {
        ResourceBindingSlot::sampler(self.binding, self.register_space)
    }
}

/// Inline constants set directly on the command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootConstantDesc {
    pub binding: u32,
    pub register_space: u32,
    /// Size in bytes, a multiple of 4.
    pub num_bytes: u32,
    pub stages: ShaderStages,
}

impl RootConstantDesc {
    pub fn new(binding: u32, register_space: u32, num_bytes: u32) -> Self {
        Self {
            binding,
            register_space,
            num_bytes,
            stages: ShaderStages::ALL,
        }
    }

    pub fn with_stages(mut self, stages: ShaderStages) -> Self {
        self.stages = stages;
        self
    }
}

/// Reflected binding set of a shader program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RootSignatureDesc {
    pub resource_bindings: Vec<ResourceBindingDesc>,
    pub static_samplers: Vec<StaticSamplerDesc>,
    pub root_constants: Vec<RootConstantDesc>,
    /// Allow bindless bindings.
    pub bindless_resources: bool,
    pub debug_name: Option<String>,
}

impl RootSignatureDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binding(mut self, binding: ResourceBindingDesc) -> Self {
        self.resource_bindings.push(binding);
        self
    }

    pub fn with_static_sampler(mut self, sampler: StaticSamplerDesc) -> Self {
        self.static_samplers.push(sampler);
        self
    }

    pub fn with_root_constant(mut self, constant: RootConstantDesc) -> Self {
        self.root_constants.push(constant);
        self
    }

    pub fn with_bindless_resources(mut self) -> Self {
        self.bindless_resources = true;
        self
    }

    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }
}

/// A binding resolved to its place in the space's descriptor table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutBinding {
    pub name: String,
    pub slot: ResourceBindingSlot,
    pub stages: ShaderStages,
    pub array_size: u32,
    pub is_bindless: bool,
    pub descriptor: ResourceDescriptor,
    /// Offset into the resource table, or the sampler table for samplers.
    pub descriptor_offset: u32,
}

/// Bindings of one register space.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterSpaceLayout {
    pub register_space: u32,
    /// Compact index of the space among the signature's spaces.
    pub set_index: u32,
    /// Sorted by slot.
    pub bindings: Vec<LayoutBinding>,
    pub static_samplers: Vec<StaticSamplerDesc>,
    /// Descriptors in the CBV/SRV/UAV table.
    pub num_resources: u32,
    /// Descriptors in the sampler table.
    pub num_samplers: u32,
}

impl RegisterSpaceLayout {
    pub fn binding(&self, slot: &ResourceBindingSlot) -> Option<&LayoutBinding> {
        self.bindings
            .binary_search_by(|b| b.slot.cmp(slot))
            .ok()
            .map(|i| &self.bindings[i])
    }
}

/// A root constant block placed in the constant range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootConstantLayout {
    pub binding: u32,
    pub stages: ShaderStages,
    /// Byte offset into the constant range.
    pub offset: u32,
    pub num_bytes: u32,
}

/// A validated root signature, the input to the backends.
#[derive(Debug, Clone, PartialEq)]
pub struct RootSignatureLayout {
    spaces: Vec<RegisterSpaceLayout>,
    root_constants: Vec<RootConstantLayout>,
    root_constant_bytes: u32,
    bindless: bool,
    debug_name: Option<String>,
}

impl RootSignatureLayout {
    /// Validate `desc` and resolve descriptor offsets.
    pub fn from_desc(
        desc: &RootSignatureDesc,
        config: &GraphicsConfiguration,
    ) -> Result<Self, GraphicsError> {
        let invalid = |msg: String| {
            Err(GraphicsError::InvalidParameter(format!(
                "root signature {:?}: {msg}",
                desc.debug_name
            )))
        };

        let mut by_space: BTreeMap<u32, (Vec<LayoutBinding>, Vec<StaticSamplerDesc>)> =
            BTreeMap::new();
        let mut seen = std::collections::HashSet::new();

        for binding in &desc.resource_bindings {
            let slot = binding.slot();
            if binding.register_space == config.root_constant_register_space {
                return invalid(format!(
                    "binding {:?} ({slot}) uses the root constant register space",
                    binding.name
                ));
            }
            if binding.array_size == 0 {
                return invalid(format!("binding {:?} has an array size of zero", binding.name));
            }
            if binding.is_bindless && !desc.bindless_resources {
                return invalid(format!(
                    "binding {:?} is bindless but bindless resources are disabled",
                    binding.name
                ));
            }
            if !seen.insert(slot) {
                return invalid(format!("duplicate binding slot {slot}"));
            }
            by_space
                .entry(binding.register_space)
                .or_default()
                .0
                .push(LayoutBinding {
                    name: binding.name.clone(),
                    slot,
                    stages: binding.stages,
                    array_size: binding.array_size,
                    is_bindless: binding.is_bindless,
                    descriptor: binding.descriptor,
                    descriptor_offset: 0,
                });
        }

        for sampler in &desc.static_samplers {
            if !seen.insert(sampler.slot()) {
                return invalid(format!("duplicate binding slot {}", sampler.slot()));
            }
            by_space
                .entry(sampler.register_space)
                .or_default()
                .1
                .push(sampler.clone());
        }

        let mut root_constants = Vec::with_capacity(desc.root_constants.len());
        let mut root_constant_bytes = 0;
        let mut constant_bindings = std::collections::HashSet::new();
        for constant in &desc.root_constants {
            if constant.register_space != config.root_constant_register_space {
                return invalid(format!(
                    "root constant b{} must live in space{}, found space{}",
                    constant.binding, config.root_constant_register_space, constant.register_space
                ));
            }
            if constant.num_bytes == 0 || constant.num_bytes % 4 != 0 {
                return invalid(format!(
                    "root constant b{} is {} bytes, expected a positive multiple of 4",
                    constant.binding, constant.num_bytes
                ));
            }
            if !constant_bindings.insert(constant.binding) {
                return invalid(format!("duplicate root constant b{}", constant.binding));
            }
            root_constants.push(RootConstantLayout {
                binding: constant.binding,
                stages: constant.stages,
                offset: root_constant_bytes,
                num_bytes: constant.num_bytes,
            });
            root_constant_bytes += constant.num_bytes;
        }
        if root_constant_bytes > MAX_ROOT_CONSTANT_BYTES {
            return invalid(format!(
                "{root_constant_bytes} bytes of root constants exceed the {MAX_ROOT_CONSTANT_BYTES}-byte limit"
            ));
        }

        let spaces = by_space
            .into_iter()
            .enumerate()
            .map(|(set_index, (register_space, (mut bindings, static_samplers)))| {
                bindings.sort_by(|a, b| a.slot.cmp(&b.slot));
                let mut num_resources = 0;
                let mut num_samplers = 0;
                for binding in &mut bindings {
                    let cursor = if binding.slot.binding_type.is_sampler() {
                        &mut num_samplers
                    } else {
                        &mut num_resources
                    };
                    binding.descriptor_offset = *cursor;
                    *cursor += binding.array_size;
                }
                RegisterSpaceLayout {
                    register_space,
                    set_index: set_index as u32,
                    bindings,
                    static_samplers,
                    num_resources,
                    num_samplers,
                }
            })
            .collect();

        Ok(Self {
            spaces,
            root_constants,
            root_constant_bytes,
            bindless: desc.bindless_resources,
            debug_name: desc.debug_name.clone(),
        })
    }

    /// Register spaces in ascending order.
    pub fn spaces(&self) -> &[RegisterSpaceLayout] {
        &self.spaces
    }

    pub fn space(&self, register_space: u32) -> Option<&RegisterSpaceLayout> {
        self.spaces
            .iter()
            .find(|s| s.register_space == register_space)
    }

    pub fn set_index(&self, register_space: u32) -> Option<u32> {
        self.space(register_space).map(|s| s.set_index)
    }

    pub fn root_constants(&self) -> &[RootConstantLayout] {
        &self.root_constants
    }

    pub fn root_constant(&self, binding: u32) -> Option<&RootConstantLayout> {
        self.root_constants.iter().find(|c| c.binding == binding)
    }

    /// Total size of the root constant range.
    pub fn root_constant_bytes(&self) -> u32 {
        self.root_constant_bytes
    }

    pub fn is_bindless(&self) -> bool {
        self.bindless
    }

    pub fn debug_name(&self) -> Option<&str> {
        self.debug_name.as_deref()
    }
}

/// A root signature: the native layout plus its resolved description.
///
/// Cloning shares the native object.
#[derive(Clone)]
pub struct RootSignature {
    id: u64,
    handle: Arc<GpuRootSignature>,
    layout: Arc<RootSignatureLayout>,
}

impl RootSignature {
    pub(crate) fn new(id: u64, handle: GpuRootSignature, layout: RootSignatureLayout) -> Self {
        Self {
            id,
            handle: Arc::new(handle),
            layout: Arc::new(layout),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn layout(&self) -> &RootSignatureLayout {
        &self.layout
    }

    pub(crate) fn handle(&self) -> &Arc<GpuRootSignature> {
        &self.handle
    }
}

impl std::fmt::Debug for RootSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootSignature")
            .field("id", &self.id)
            .field("debug_name", &self.layout.debug_name)
            .field("spaces", &self.layout.spaces.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(RootSignature: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GraphicsConfiguration {
        GraphicsConfiguration::default()
    }

    #[test]
    fn test_offsets_per_space() {
        let desc = RootSignatureDesc::new()
            .with_binding(ResourceBindingDesc::srv("albedo", 0, 1))
            .with_binding(ResourceBindingDesc::srv("normals", 1, 1).with_array_size(4))
            .with_binding(ResourceBindingDesc::cbv("camera", 0, 1))
            .with_binding(ResourceBindingDesc::sampler("linear", 0, 1))
            .with_binding(ResourceBindingDesc::cbv("frame", 0, 0));
        let layout = RootSignatureLayout::from_desc(&desc, &config()).unwrap();

        assert_eq!(layout.spaces().len(), 2);
        assert_eq!(layout.set_index(0), Some(0));
        assert_eq!(layout.set_index(1), Some(1));
        assert_eq!(layout.set_index(7), None);

        let space = layout.space(1).unwrap();
        assert_eq!(space.num_resources, 6);
        assert_eq!(space.num_samplers, 1);
        let offsets: Vec<u32> = space.bindings.iter().map(|b| b.descriptor_offset).collect();
        // cbv b0, srv t0, srv t1[4], sampler s0
        assert_eq!(offsets, vec![0, 1, 2, 0]);
        assert_eq!(
            space.binding(&ResourceBindingSlot::srv(1, 1)).unwrap().array_size,
            4
        );
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let desc = RootSignatureDesc::new()
            .with_binding(ResourceBindingDesc::srv("a", 0, 0))
            .with_binding(ResourceBindingDesc::srv("b", 0, 0));
        assert!(matches!(
            RootSignatureLayout::from_desc(&desc, &config()),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_root_constant_rules() {
        let space = config().root_constant_register_space;
        let ok = RootSignatureDesc::new()
            .with_root_constant(RootConstantDesc::new(0, space, 16))
            .with_root_constant(RootConstantDesc::new(1, space, 8));
        let layout = RootSignatureLayout::from_desc(&ok, &config()).unwrap();
        assert_eq!(layout.root_constant(1).unwrap().offset, 16);
        assert_eq!(layout.root_constant_bytes(), 24);

        let unaligned = RootSignatureDesc::new().with_root_constant(RootConstantDesc::new(0, space, 6));
        assert!(RootSignatureLayout::from_desc(&unaligned, &config()).is_err());

        let wrong_space = RootSignatureDesc::new().with_root_constant(RootConstantDesc::new(0, 0, 16));
        assert!(RootSignatureLayout::from_desc(&wrong_space, &config()).is_err());

        let too_big = RootSignatureDesc::new().with_root_constant(RootConstantDesc::new(0, space, 256));
        assert!(RootSignatureLayout::from_desc(&too_big, &config()).is_err());
    }

    #[test]
    fn test_bindless_requires_opt_in() {
        let binding = ResourceBindingDesc::srv("textures", 0, 2)
            .with_array_size(1024)
            .bindless();
        let desc = RootSignatureDesc::new().with_binding(binding);
        assert!(RootSignatureLayout::from_desc(&desc, &config()).is_err());
        assert!(RootSignatureLayout::from_desc(&desc.with_bindless_resources(), &config()).is_ok());
    }

    #[test]
    fn test_static_samplers_do_not_take_table_slots() {
        let desc = RootSignatureDesc::new()
            .with_binding(ResourceBindingDesc::srv("t", 0, 0))
            .with_static_sampler(StaticSamplerDesc::new(0, 0, SamplerDesc::default()));
        let layout = RootSignatureLayout::from_desc(&desc, &config()).unwrap();
        let space = layout.space(0).unwrap();
        assert_eq!(space.num_samplers, 0);
        assert_eq!(space.static_samplers.len(), 1);
    }
}
