//! Descriptor tables for one register space.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::RootSignature;
use crate::backend::{BoundResource, DescriptorWrite, GpuBindGroup};
use crate::error::GraphicsError;
use crate::resources::{BufferResource, Sampler, TextureResource};
use crate::types::{ResourceBindingSlot, ResourceBindingType};

/// Parameters of a [`ResourceBindGroup`].
#[derive(Debug, Clone, Copy)]
pub struct ResourceBindGroupDesc<'a> {
    pub root_signature: &'a RootSignature,
    pub register_space: u32,
}

impl<'a> ResourceBindGroupDesc<'a> {
    pub fn new(root_signature: &'a RootSignature, register_space: u32) -> Self {
        Self {
            root_signature,
            register_space,
        }
    }
}

/// A resource written by [`BindGroupUpdateDesc`].
#[derive(Debug, Clone, Copy)]
pub enum BindGroupResource<'a> {
    ConstantBuffer(&'a BufferResource),
    ShaderResourceBuffer(&'a BufferResource),
    ShaderResourceTexture(&'a TextureResource),
    UnorderedAccessBuffer(&'a BufferResource),
    UnorderedAccessTexture(&'a TextureResource),
    Sampler(&'a Sampler),
}

impl BindGroupResource<'_> {
    fn binding_type(&self) -> ResourceBindingType {
        match self {
            Self::ConstantBuffer(_) => ResourceBindingType::ConstantBuffer,
            Self::ShaderResourceBuffer(_) | Self::ShaderResourceTexture(_) => {
                ResourceBindingType::ShaderResource
            }
            Self::UnorderedAccessBuffer(_) | Self::UnorderedAccessTexture(_) => {
                ResourceBindingType::UnorderedAccess
            }
            Self::Sampler(_) => ResourceBindingType::Sampler,
        }
    }

    fn id(&self) -> u64 {
        match self {
            Self::ConstantBuffer(b) | Self::ShaderResourceBuffer(b) | Self::UnorderedAccessBuffer(b) => {
                b.id()
            }
            Self::ShaderResourceTexture(t) | Self::UnorderedAccessTexture(t) => t.id(),
            Self::Sampler(s) => s.id(),
        }
    }

    fn bound(&self) -> BoundResource {
        match self {
            Self::ConstantBuffer(b) | Self::ShaderResourceBuffer(b) | Self::UnorderedAccessBuffer(b) => {
                BoundResource::Buffer {
                    buffer: Arc::clone(b.handle()),
                    offset: 0,
                    size: b.num_bytes(),
                }
            }
            Self::ShaderResourceTexture(t) | Self::UnorderedAccessTexture(t) => {
                BoundResource::Texture(Arc::clone(t.handle()))
            }
            Self::Sampler(s) => BoundResource::Sampler(Arc::clone(s.handle())),
        }
    }
}

/// One entry of a [`BindGroupUpdateDesc`].
#[derive(Debug, Clone, Copy)]
pub struct BindGroupEntry<'a> {
    pub binding: u32,
    pub array_element: u32,
    pub resource: BindGroupResource<'a>,
}

impl<'a> BindGroupEntry<'a> {
    pub fn new(binding: u32, resource: BindGroupResource<'a>) -> Self {
        Self {
            binding,
            array_element: 0,
            resource,
        }
    }

    pub fn with_array_element(mut self, array_element: u32) -> Self {
        self.array_element = array_element;
        self
    }
}

/// A full rebinding of a group.
#[derive(Debug, Clone, Default)]
pub struct BindGroupUpdateDesc<'a> {
    pub entries: Vec<BindGroupEntry<'a>>,
}

impl<'a> BindGroupUpdateDesc<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, binding: u32, resource: BindGroupResource<'a>) -> Self {
        self.entries.push(BindGroupEntry::new(binding, resource));
        self
    }

    pub fn with_entry(mut self, entry: BindGroupEntry<'a>) -> Self {
        self.entries.push(entry);
        self
    }
}

/// Resources bound to one register space of a root signature.
///
/// Updates follow a begin/bind/end protocol: [`begin_update`] discards the
/// previous bindings, each bind call records one descriptor, and
/// [`end_update`] writes them to a freshly allocated descriptor range.
/// Binding the same resources again yields the same
/// [`descriptor_layout`](Self::descriptor_layout).
///
/// # Panics
///
/// Binding a slot the register space does not declare, or with a mismatched
/// descriptor type, panics with "bind group capacity exceeded".
///
/// [`begin_update`]: Self::begin_update
/// [`end_update`]: Self::end_update
pub struct ResourceBindGroup {
    id: u64,
    root_signature: RootSignature,
    register_space: u32,
    handle: Arc<GpuBindGroup>,
    capacity_resources: u32,
    capacity_samplers: u32,
    writes: Vec<DescriptorWrite>,
    /// (slot, array element) → resource id.
    bound: BTreeMap<(ResourceBindingSlot, u32), u64>,
    num_resources: u32,
    num_samplers: u32,
    updating: bool,
    /// (byte offset, data) per root constant block.
    root_constants: BTreeMap<u32, Vec<u8>>,
}

impl ResourceBindGroup {
    pub(crate) fn new(
        id: u64,
        root_signature: RootSignature,
        register_space: u32,
        handle: GpuBindGroup,
    ) -> Result<Self, GraphicsError> {
        let space = root_signature.layout().space(register_space).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "root signature {:?} declares no bindings in space{register_space}",
                root_signature.layout().debug_name()
            ))
        })?;
        let (capacity_resources, capacity_samplers) = (space.num_resources, space.num_samplers);
        Ok(Self {
            id,
            root_signature,
            register_space,
            handle: Arc::new(handle),
            capacity_resources,
            capacity_samplers,
            writes: Vec::new(),
            bound: BTreeMap::new(),
            num_resources: 0,
            num_samplers: 0,
            updating: false,
            root_constants: BTreeMap::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn register_space(&self) -> u32 {
        self.register_space
    }

    pub fn root_signature(&self) -> &RootSignature {
        &self.root_signature
    }

    /// Descriptors the space holds in the resource table.
    pub fn resource_capacity(&self) -> u32 {
        self.capacity_resources
    }

    pub fn sampler_capacity(&self) -> u32 {
        self.capacity_samplers
    }

    pub fn num_bound_resources(&self) -> u32 {
        self.num_resources
    }

    pub fn num_bound_samplers(&self) -> u32 {
        self.num_samplers
    }

    /// Bound slots in order, with the ids of the resources bound to them.
    pub fn descriptor_layout(&self) -> Vec<(ResourceBindingSlot, u32, u64)> {
        self.bound
            .iter()
            .map(|((slot, element), id)| (*slot, *element, *id))
            .collect()
    }

    pub(crate) fn is_updating(&self) -> bool {
        self.updating
    }

    pub(crate) fn handle(&self) -> &Arc<GpuBindGroup> {
        &self.handle
    }

    pub(crate) fn root_constant_snapshot(&self) -> Vec<(u32, Vec<u8>)> {
        self.root_constants
            .iter()
            .map(|(offset, data)| (*offset, data.clone()))
            .collect()
    }

    /// Discard the current bindings and start recording new ones.
    pub fn begin_update(&mut self) -> &mut Self {
        self.writes.clear();
        self.bound.clear();
        self.num_resources = 0;
        self.num_samplers = 0;
        self.updating = true;
        self
    }

    pub fn cbv(&mut self, binding: u32, buffer: &BufferResource) -> &mut Self {
        self.bind(BindGroupEntry::new(binding, BindGroupResource::ConstantBuffer(buffer)))
    }

    pub fn srv_buffer(&mut self, binding: u32, buffer: &BufferResource) -> &mut Self {
        self.bind(BindGroupEntry::new(binding, BindGroupResource::ShaderResourceBuffer(buffer)))
    }

    pub fn srv_texture(&mut self, binding: u32, texture: &TextureResource) -> &mut Self {
        self.bind(BindGroupEntry::new(binding, BindGroupResource::ShaderResourceTexture(texture)))
    }

    pub fn uav_buffer(&mut self, binding: u32, buffer: &BufferResource) -> &mut Self {
        self.bind(BindGroupEntry::new(binding, BindGroupResource::UnorderedAccessBuffer(buffer)))
    }

    pub fn uav_texture(&mut self, binding: u32, texture: &TextureResource) -> &mut Self {
        self.bind(BindGroupEntry::new(binding, BindGroupResource::UnorderedAccessTexture(texture)))
    }

    pub fn sampler(&mut self, binding: u32, sampler: &Sampler) -> &mut Self {
        self.bind(BindGroupEntry::new(binding, BindGroupResource::Sampler(sampler)))
    }

    /// Record one descriptor.
    pub fn bind(&mut self, entry: BindGroupEntry<'_>) -> &mut Self {
        assert!(
            self.updating,
            "bind group {}: bind called outside begin_update/end_update",
            self.id
        );
        let slot = ResourceBindingSlot::new(
            entry.resource.binding_type(),
            entry.binding,
            self.register_space,
        );
        let layout = self.root_signature.layout();
        let declared = layout
            .space(self.register_space)
            .and_then(|space| space.binding(&slot));
        let Some(declared) = declared else {
            panic!(
                "bind group capacity exceeded: slot {slot} is not declared by root signature {:?}",
                layout.debug_name()
            );
        };
        assert!(
            entry.array_element < declared.array_size,
            "bind group capacity exceeded: element {} of {slot} ({:?}) holds {} descriptors",
            entry.array_element,
            declared.name,
            declared.array_size
        );

        let is_new = self
            .bound
            .insert((slot, entry.array_element), entry.resource.id())
            .is_none();
        if is_new {
            let (count, capacity) = if slot.binding_type.is_sampler() {
                (&mut self.num_samplers, self.capacity_samplers)
            } else {
                (&mut self.num_resources, self.capacity_resources)
            };
            *count += 1;
            assert!(
                *count <= capacity,
                "bind group capacity exceeded: {count} descriptors bound, space{} holds {capacity}",
                self.register_space
            );
        } else {
            self.writes
                .retain(|w| !(w.slot == slot && w.array_element == entry.array_element));
        }
        self.writes.push(DescriptorWrite {
            slot,
            array_element: entry.array_element,
            resource: entry.resource.bound(),
        });
        self
    }

    /// Write the recorded descriptors.
    ///
    /// # Panics
    ///
    /// Panics without a matching [`begin_update`](Self::begin_update).
    pub fn end_update(&mut self) -> Result<(), GraphicsError> {
        assert!(
            self.updating,
            "bind group {}: end_update without begin_update",
            self.id
        );
        self.handle.write(&self.writes)?;
        self.updating = false;
        log::trace!(
            "ResourceBindGroup {}: wrote {} resources and {} samplers in space{}",
            self.id,
            self.num_resources,
            self.num_samplers,
            self.register_space
        );
        Ok(())
    }

    /// `begin_update`, bind every entry, `end_update`.
    pub fn update(&mut self, desc: &BindGroupUpdateDesc<'_>) -> Result<(), GraphicsError> {
        self.begin_update();
        for entry in &desc.entries {
            self.bind(*entry);
        }
        self.end_update()
    }

    /// Set the data of a root constant block, applied whenever the group is bound.
    ///
    /// # Panics
    ///
    /// Panics if the root signature has no such block or `data` is larger than it.
    pub fn set_root_constants(&mut self, binding: u32, data: &[u8]) {
        let layout = self.root_signature.layout();
        let Some(constant) = layout.root_constant(binding) else {
            panic!(
                "root signature {:?} has no root constant b{binding}",
                layout.debug_name()
            );
        };
        assert!(
            data.len() as u32 <= constant.num_bytes && data.len() % 4 == 0,
            "root constant b{binding}: {} bytes do not fit a {}-byte block",
            data.len(),
            constant.num_bytes
        );
        self.root_constants.insert(constant.offset, data.to_vec());
    }
}

impl std::fmt::Debug for ResourceBindGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceBindGroup")
            .field("id", &self.id)
            .field("register_space", &self.register_space)
            .field("num_resources", &self.num_resources)
            .field("num_samplers", &self.num_samplers)
            .finish()
    }
}

static_assertions::assert_impl_all!(ResourceBindGroup: Send, Sync);

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::binding::{ResourceBindingDesc, RootConstantDesc, RootSignatureDesc};
    use crate::resources::{BufferDesc, TextureDesc};
    use crate::test_utils::headless_device;
    use crate::types::{Format, SamplerDesc};

    fn material_signature(device: &crate::LogicalDevice) -> RootSignature {
        device
            .create_root_signature(
                &RootSignatureDesc::new()
                    .with_binding(ResourceBindingDesc::cbv("params", 0, 0))
                    .with_binding(ResourceBindingDesc::srv("albedo", 0, 0))
                    .with_binding(ResourceBindingDesc::sampler("linear", 0, 0))
                    .with_root_constant(RootConstantDesc::new(0, 31, 8)),
            )
            .unwrap()
    }

    #[test]
    fn test_bind_and_rebind_is_idempotent() {
        let device = headless_device();
        let signature = material_signature(&device);
        let mut group = device
            .create_resource_bind_group(&ResourceBindGroupDesc::new(&signature, 0))
            .unwrap();
        let params = device.create_buffer_resource(&BufferDesc::new(256)).unwrap();
        let albedo = device
            .create_texture_resource(&TextureDesc::new_2d(8, 8, Format::Rgba8Unorm))
            .unwrap();
        let sampler = device.create_sampler(&SamplerDesc::default()).unwrap();

        let bind = |group: &mut ResourceBindGroup| {
            group
                .begin_update()
                .cbv(0, &params)
                .srv_texture(0, &albedo)
                .sampler(0, &sampler)
                .end_update()
                .unwrap();
        };
        bind(&mut group);
        let first = group.descriptor_layout();
        assert_eq!(group.num_bound_resources(), 2);
        assert_eq!(group.num_bound_samplers(), 1);

        bind(&mut group);
        assert_eq!(group.descriptor_layout(), first);
        assert_eq!(group.num_bound_resources(), 2);
    }

    #[test]
    fn test_update_desc() {
        let device = headless_device();
        let signature = material_signature(&device);
        let mut group = device
            .create_resource_bind_group(&ResourceBindGroupDesc::new(&signature, 0))
            .unwrap();
        let params = device.create_buffer_resource(&BufferDesc::new(64)).unwrap();
        group
            .update(&BindGroupUpdateDesc::new().with(0, BindGroupResource::ConstantBuffer(&params)))
            .unwrap();
        assert_eq!(group.num_bound_resources(), 1);
        assert!(!group.is_updating());

        group.set_root_constants(0, &[1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(group.root_constant_snapshot(), vec![(0, vec![1, 0, 0, 0, 2, 0, 0, 0])]);
    }

    #[test]
    #[should_panic(expected = "bind group capacity exceeded")]
    fn test_undeclared_slot_panics() {
        let device = headless_device();
        let signature = material_signature(&device);
        let mut group = device
            .create_resource_bind_group(&ResourceBindGroupDesc::new(&signature, 0))
            .unwrap();
        let texture = device
            .create_texture_resource(&TextureDesc::new_2d(4, 4, Format::Rgba8Unorm))
            .unwrap();
        group.begin_update().srv_texture(0, &texture).srv_texture(1, &texture);
    }

    #[test]
    fn test_missing_space_rejected() {
        let device = headless_device();
        let signature = material_signature(&device);
        assert!(matches!(
            device.create_resource_bind_group(&ResourceBindGroupDesc::new(&signature, 5)),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }
}
