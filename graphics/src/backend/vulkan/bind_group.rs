//! Descriptor sets for resource bind groups.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::backend::{BoundResource, DescriptorWrite};
use crate::binding::{RegisterSpaceLayout, RootSignatureLayout};
use crate::config::DescriptorPoolConfig;
use crate::descriptors::{DescriptorAllocation, DescriptorAllocator, DescriptorHeapType};
use crate::error::GraphicsError;
use crate::types::ResourceBindingType;

use super::deferred::DeferredResource;
use super::pipeline::{VulkanRootSignature, binding_index};
use super::{VulkanDevice, conversion, vk_error};

/// Native descriptor pools, grown on demand.
///
/// Slot accounting, including the pool cap, happens in the two
/// [`DescriptorAllocator`]s; the native pools only provide the memory.
pub(super) struct DescriptorPools {
    device: Arc<VulkanDevice>,
    config: DescriptorPoolConfig,
    pools: Mutex<Vec<vk::DescriptorPool>>,
    pub resource_heap: DescriptorAllocator,
    pub sampler_heap: DescriptorAllocator,
}

impl DescriptorPools {
    pub fn new(device: Arc<VulkanDevice>, config: &DescriptorPoolConfig) -> Self {
        Self {
            device,
            config: *config,
            pools: Mutex::new(Vec::new()),
            resource_heap: DescriptorAllocator::new(
                DescriptorHeapType::CbvSrvUav,
                config.resources_per_pool,
                config.max_pools,
            ),
            sampler_heap: DescriptorAllocator::new(
                DescriptorHeapType::Sampler,
                config.samplers_per_pool,
                config.max_pools,
            ),
        }
    }

    fn create_pool(&self) -> Result<vk::DescriptorPool, GraphicsError> {
        let resources = self.config.resources_per_pool.max(1);
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: resources,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: resources,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: resources,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: resources,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: self.config.samplers_per_pool.max(1),
            },
        ];
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(resources)
            .pool_sizes(&pool_sizes);
        unsafe { self.device.device.create_descriptor_pool(&create_info, None) }
            .map_err(|e| vk_error("create descriptor pool", e))
    }

    /// Allocate a set from the newest pool, adding a pool when it is full.
    fn allocate(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> Result<(vk::DescriptorPool, vk::DescriptorSet), GraphicsError> {
        let mut pools = self.pools.lock();
        let layouts = [layout];
        if let Some(&pool) = pools.last() {
            let allocate_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(pool)
                .set_layouts(&layouts);
            match unsafe { self.device.device.allocate_descriptor_sets(&allocate_info) } {
                Ok(sets) => return Ok((pool, sets[0])),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {}
                Err(e) => return Err(vk_error("allocate descriptor set", e)),
            }
        }

        let pool = self.create_pool()?;
        pools.push(pool);
        log::debug!("Vulkan: descriptor pool {} created", pools.len());
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.device.allocate_descriptor_sets(&allocate_info) }
            .map_err(|e| vk_error("allocate descriptor set", e))?;
        Ok((pool, sets[0]))
    }
}

impl Drop for DescriptorPools {
    fn drop(&mut self) {
        // Queued after the sets of every bind group, which hold the pools alive.
        for pool in self.pools.get_mut().drain(..) {
            self.device.defer(DeferredResource::DescriptorPool(pool));
        }
    }
}

#[derive(Default)]
struct SetState {
    set: Option<(vk::DescriptorPool, vk::DescriptorSet)>,
    resources: Option<DescriptorAllocation>,
    samplers: Option<DescriptorAllocation>,
}

/// Descriptor set of one register space.
pub struct VulkanBindGroup {
    pools: Arc<DescriptorPools>,
    set_layout: vk::DescriptorSetLayout,
    set_index: u32,
    space: RegisterSpaceLayout,
    state: Mutex<SetState>,
}

impl VulkanBindGroup {
    pub(super) fn new(
        pools: Arc<DescriptorPools>,
        root_signature: &VulkanRootSignature,
        layout: &RootSignatureLayout,
        register_space: u32,
    ) -> Result<Self, GraphicsError> {
        let space = layout.space(register_space).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "register space {register_space} is not part of the root signature"
            ))
        })?;
        let set_layout = *root_signature
            .set_layouts
            .get(space.set_index as usize)
            .ok_or_else(|| GraphicsError::Internal("missing descriptor set layout".into()))?;
        Ok(Self {
            pools,
            set_layout,
            set_index: space.set_index,
            space: space.clone(),
            state: Mutex::new(SetState::default()),
        })
    }

    pub(super) fn set_index(&self) -> u32 {
        self.set_index
    }

    /// Set bound by the command encoder, if the group was ever written.
    pub(super) fn descriptor_set(&self) -> Option<vk::DescriptorSet> {
        self.state.lock().set.map(|(_, set)| set)
    }

    /// Allocate a fresh set and write `writes` into it.
    ///
    /// The previous set may still be read by submitted work, so it is
    /// released through deferred destruction.
    pub(crate) fn write(&self, writes: &[DescriptorWrite]) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        self.release(&mut state);

        if self.space.num_resources > 0 {
            state.resources = Some(self.pools.resource_heap.allocate(self.space.num_resources)?);
        }
        if self.space.num_samplers > 0 {
            state.samplers = Some(self.pools.sampler_heap.allocate(self.space.num_samplers)?);
        }
        let (pool, set) = self.pools.allocate(self.set_layout)?;
        state.set = Some((pool, set));

        let infos = writes
            .iter()
            .map(|write| self.descriptor_info(write))
            .collect::<Result<Vec<_>, _>>()?;
        let vk_writes: Vec<_> = writes
            .iter()
            .zip(&infos)
            .map(|(write, info)| {
                let vk_write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding_index(&write.slot))
                    .dst_array_element(write.array_element)
                    .descriptor_type(info.descriptor_type);
                match &info.kind {
                    InfoKind::Buffer(buffer) => vk_write.buffer_info(std::slice::from_ref(buffer)),
                    InfoKind::Image(image) => vk_write.image_info(std::slice::from_ref(image)),
                }
            })
            .collect();
        unsafe { self.pools.device.device.update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }

    fn descriptor_info(&self, write: &DescriptorWrite) -> Result<DescriptorInfo, GraphicsError> {
        let binding = self.space.binding(&write.slot).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("{} is not declared in the layout", write.slot))
        })?;
        let descriptor_type = conversion::descriptor_type(binding.slot.binding_type, binding.descriptor);
        let wrong_backend =
            || GraphicsError::InvalidParameter(format!("{} holds a non-Vulkan resource", write.slot));

        let kind = match &write.resource {
            BoundResource::Buffer {
                buffer,
                offset,
                size,
            } => InfoKind::Buffer(vk::DescriptorBufferInfo {
                buffer: buffer.as_vulkan().ok_or_else(wrong_backend)?.buffer,
                offset: *offset,
                range: *size,
            }),
            BoundResource::Texture(texture) => {
                let image_layout = if binding.slot.binding_type == ResourceBindingType::UnorderedAccess {
                    vk::ImageLayout::GENERAL
                } else {
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                };
                InfoKind::Image(vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: texture.as_vulkan().ok_or_else(wrong_backend)?.view,
                    image_layout,
                })
            }
            BoundResource::Sampler(sampler) => InfoKind::Image(vk::DescriptorImageInfo {
                sampler: sampler.as_vulkan().ok_or_else(wrong_backend)?.sampler,
                image_view: vk::ImageView::null(),
                image_layout: vk::ImageLayout::UNDEFINED,
            }),
        };
        Ok(DescriptorInfo {
            descriptor_type,
            kind,
        })
    }

    fn release(&self, state: &mut SetState) {
        if let Some((pool, set)) = state.set.take() {
            self.pools.device.defer(DeferredResource::DescriptorSet { pool, set });
        }
        if let Some(allocation) = state.resources.take() {
            self.pools.resource_heap.free(allocation);
        }
        if let Some(allocation) = state.samplers.take() {
            self.pools.sampler_heap.free(allocation);
        }
    }
}

struct DescriptorInfo {
    descriptor_type: vk::DescriptorType,
    kind: InfoKind,
}

enum InfoKind {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

impl Drop for VulkanBindGroup {
    fn drop(&mut self) {
        let mut state = std::mem::take(self.state.get_mut());
        self.release(&mut state);
    }
}

impl std::fmt::Debug for VulkanBindGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBindGroup")
            .field("register_space", &self.space.register_space)
            .field("set", &self.state.lock().set)
            .finish()
    }
}
