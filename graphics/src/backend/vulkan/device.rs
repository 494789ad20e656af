//! Physical device enumeration and logical device creation.

use ash::vk;

use crate::error::GraphicsError;
use crate::types::{
    BackendKind, DeviceConstants, PhysicalDevice, PhysicalDeviceCapabilities,
    PhysicalDeviceProperties, QueueType,
};

use super::instance::REQUIRED_API_VERSION;

/// A queue inside a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct QueueSlot {
    pub family: u32,
    pub index: u32,
}

/// Where each queue type is created.
///
/// Queue types fall back to the graphics family when the device has no
/// dedicated family for them. Types sharing a family get distinct queues
/// while the family has enough of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct QueueFamilies {
    pub slots: [QueueSlot; 3],
}

impl QueueFamilies {
    pub fn select(families: &[vk::QueueFamilyProperties]) -> Option<Self> {
        let find = |required: vk::QueueFlags, excluded: vk::QueueFlags| {
            families.iter().position(|family| {
                family.queue_count > 0
                    && family.queue_flags.contains(required)
                    && !family.queue_flags.intersects(excluded)
            })
        };

        let graphics = find(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, vk::QueueFlags::empty())?;
        let compute = find(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS).unwrap_or(graphics);
        let copy = find(
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
        .unwrap_or(compute);

        let mut used = vec![0u32; families.len()];
        let mut slot = |family: usize| {
            let index = used[family].min(families[family].queue_count - 1);
            used[family] += 1;
            QueueSlot {
                family: family as u32,
                index,
            }
        };
        Some(Self {
            slots: [slot(graphics), slot(compute), slot(copy)],
        })
    }

    pub fn slot(&self, queue: QueueType) -> QueueSlot {
        self.slots[queue.index()]
    }

    /// Families to create, with the number of queues each needs.
    pub fn create_counts(&self) -> Vec<(u32, u32)> {
        let mut counts: Vec<(u32, u32)> = Vec::new();
        for slot in &self.slots {
            match counts.iter_mut().find(|(family, _)| *family == slot.family) {
                Some((_, count)) => *count = (*count).max(slot.index + 1),
                None => counts.push((slot.family, slot.index + 1)),
            }
        }
        counts
    }

    pub fn has_dedicated(&self, queue: QueueType) -> bool {
        let family = self.slot(queue).family;
        QueueType::ALL
            .iter()
            .filter(|other| **other != queue)
            .all(|other| self.slot(*other).family != family)
    }
}

/// A usable physical device with its crate-level description.
pub(super) struct Candidate {
    pub handle: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub description: PhysicalDevice,
}

/// Enumerate devices that support the required API version and a graphics queue.
pub(super) fn enumerate(instance: &ash::Instance) -> Result<Vec<Candidate>, GraphicsError> {
    let handles = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to enumerate physical devices: {e:?}"))
    })?;

    let mut candidates = Vec::new();
    for handle in handles {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        if properties.api_version < REQUIRED_API_VERSION {
            log::info!("Skipping GPU {name}: Vulkan {}.{} is too old",
                vk::api_version_major(properties.api_version),
                vk::api_version_minor(properties.api_version));
            continue;
        }
        let family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let Some(families) = QueueFamilies::select(&family_properties) else {
            log::info!("Skipping GPU {name}: no graphics queue");
            continue;
        };

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut features12);
        unsafe { instance.get_physical_device_features2(handle, &mut features) };
        let runtime_array = features12.runtime_descriptor_array == vk::TRUE;
        let timeline = features12.timeline_semaphore == vk::TRUE;

        let memory = unsafe { instance.get_physical_device_memory_properties(handle) };
        let device_local: u64 = memory
            .memory_heaps_as_slice()
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum();

        let limits = properties.limits;
        let description = PhysicalDevice {
            id: candidates.len() as u32,
            name,
            backend: BackendKind::Vulkan,
            properties: PhysicalDeviceProperties {
                is_dedicated: properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
                memory_available_in_mb: device_local / (1024 * 1024),
            },
            capabilities: PhysicalDeviceCapabilities {
                dedicated_copy_queue: families.has_dedicated(QueueType::Copy),
                compute_queue: families.has_dedicated(QueueType::Compute),
                root_constants: limits.max_push_constants_size >= 128,
                bindless: runtime_array,
                tearing: !cfg!(target_os = "macos"),
                timeline_semaphores: timeline,
                // VK_KHR_acceleration_structure is not enabled
                ray_tracing: false,
            },
            constants: DeviceConstants {
                storage_buffer_alignment: limits.min_storage_buffer_offset_alignment.max(4),
                constant_buffer_alignment: limits.min_uniform_buffer_offset_alignment.max(4),
                buffer_texture_alignment: limits.optimal_buffer_copy_offset_alignment.max(4),
                buffer_texture_row_alignment: limits.optimal_buffer_copy_row_pitch_alignment.max(1),
            },
        };
        log::info!(
            "Found GPU {}: {} ({:?}, {} MiB)",
            description.id,
            description.name,
            properties.device_type,
            description.properties.memory_available_in_mb
        );
        candidates.push(Candidate {
            handle,
            families,
            description,
        });
    }
    Ok(candidates)
}

/// Pick the requested device, or the best scoring one.
pub(super) fn choose(
    mut candidates: Vec<Candidate>,
    requested: Option<u32>,
) -> Result<Candidate, GraphicsError> {
    if let Some(id) = requested {
        return candidates
            .into_iter()
            .find(|candidate| candidate.description.id == id)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("no Vulkan physical device with id {id}"))
            });
    }
    candidates.sort_by_key(|candidate| std::cmp::Reverse(score(&candidate.description)));
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| GraphicsError::BackendUnavailable("no Vulkan-capable GPU found".into()))
}

/// Discrete GPUs first, then the amount of device memory.
fn score(device: &PhysicalDevice) -> u64 {
    let mut score = device.properties.memory_available_in_mb;
    if device.properties.is_dedicated {
        score += 1 << 32;
    }
    if device.capabilities.dedicated_copy_queue {
        score += 1 << 20;
    }
    score
}

/// Create the logical device with one queue per queue type.
pub(super) fn create_logical_device(
    instance: &ash::Instance,
    candidate: &Candidate,
) -> Result<ash::Device, GraphicsError> {
    let counts = candidate.families.create_counts();
    let priorities = [1.0f32; 3];
    let queue_create_infos: Vec<_> = counts
        .iter()
        .map(|(family, count)| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(*family)
                .queue_priorities(&priorities[..*count as usize])
        })
        .collect();

    let mut device_extensions = vec![ash::khr::swapchain::NAME.as_ptr()];
    if cfg!(target_os = "macos") {
        device_extensions.push(ash::khr::dynamic_rendering::NAME.as_ptr());
        device_extensions.push(ash::khr::portability_subset::NAME.as_ptr());
    }

    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(true)
        .independent_blend(true);
    let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default()
        .timeline_semaphore(candidate.description.capabilities.timeline_semaphores)
        .runtime_descriptor_array(candidate.description.capabilities.bindless)
        .descriptor_binding_partially_bound(candidate.description.capabilities.bindless);
    let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_12_features)
        .push_next(&mut vulkan_13_features);

    unsafe { instance.create_device(candidate.handle, &create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create logical device: {e:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn test_dedicated_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 16),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 8),
            family(vk::QueueFlags::TRANSFER, 2),
        ];
        let selected = QueueFamilies::select(&families).unwrap();
        assert_eq!(selected.slot(QueueType::Graphics), QueueSlot { family: 0, index: 0 });
        assert_eq!(selected.slot(QueueType::Compute), QueueSlot { family: 1, index: 0 });
        assert_eq!(selected.slot(QueueType::Copy), QueueSlot { family: 2, index: 0 });
        assert!(selected.has_dedicated(QueueType::Copy));
        assert_eq!(selected.create_counts(), vec![(0, 1), (1, 1), (2, 1)]);
    }

    #[test]
    fn test_single_family_shares_queues() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            2,
        )];
        let selected = QueueFamilies::select(&families).unwrap();
        assert_eq!(selected.slot(QueueType::Compute), QueueSlot { family: 0, index: 1 });
        // Only two queues exist, so copy shares the compute queue.
        assert_eq!(selected.slot(QueueType::Copy), QueueSlot { family: 0, index: 1 });
        assert!(!selected.has_dedicated(QueueType::Compute));
        assert_eq!(selected.create_counts(), vec![(0, 2)]);
    }

    #[test]
    fn test_no_graphics_family() {
        assert!(QueueFamilies::select(&[family(vk::QueueFlags::TRANSFER, 1)]).is_none());
    }
}
