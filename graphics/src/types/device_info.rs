//! Backend kinds and physical device descriptions.

/// Native API a logical device runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// CPU-emulated backend executing command streams on worker threads.
    Headless,
    /// Vulkan through ash.
    Vulkan,
    /// DirectX 12 through wgpu.
    DirectX12,
    /// Metal through wgpu.
    Metal,
}

impl BackendKind {
    /// Human readable backend name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Headless => "Headless",
            Self::Vulkan => "Vulkan",
            Self::DirectX12 => "DirectX12",
            Self::Metal => "Metal",
        }
    }

    /// Returns true if support for this backend was compiled in.
    pub fn is_compiled(&self) -> bool {
        match self {
            Self::Headless => cfg!(feature = "headless"),
            Self::Vulkan => cfg!(feature = "vulkan-backend"),
            Self::DirectX12 => cfg!(all(feature = "wgpu-backend", target_os = "windows")),
            Self::Metal => cfg!(all(
                feature = "wgpu-backend",
                any(target_os = "macos", target_os = "ios")
            )),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Alignment requirements reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConstants {
    /// Offset alignment of storage buffer views.
    pub storage_buffer_alignment: u64,
    /// Offset and size alignment of constant buffer views.
    pub constant_buffer_alignment: u64,
    /// Offset alignment of buffer-texture copies.
    pub buffer_texture_alignment: u64,
    /// Row pitch alignment of buffer-texture copies.
    pub buffer_texture_row_alignment: u64,
}

impl Default for DeviceConstants {
    fn default() -> Self {
        Self {
            storage_buffer_alignment: 16,
            constant_buffer_alignment: 256,
            buffer_texture_alignment: 512,
            buffer_texture_row_alignment: 256,
        }
    }
}

/// Optional capabilities of a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysicalDeviceCapabilities {
    /// A queue family dedicated to transfers exists.
    pub dedicated_copy_queue: bool,
    /// A queue family for async compute exists.
    pub compute_queue: bool,
    /// Root constants (push constants) are supported.
    pub root_constants: bool,
    /// Unbounded descriptor arrays are supported.
    pub bindless: bool,
    /// Tearing (immediate) presentation is supported.
    pub tearing: bool,
    /// Semaphores are timeline counters rather than binary.
    pub timeline_semaphores: bool,
    /// Acceleration structures can be created and built.
    pub ray_tracing: bool,
}

/// Static properties of a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhysicalDeviceProperties {
    /// Discrete GPU with its own memory.
    pub is_dedicated: bool,
    /// Device-local memory in megabytes, 0 when unknown.
    pub memory_available_in_mb: u64,
}

/// A GPU (or the emulated headless device) a logical device can be created on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalDevice {
    /// Index within its backend's enumeration.
    pub id: u32,
    /// Adapter name.
    pub name: String,
    /// Backend that enumerated the device.
    pub backend: BackendKind,
    pub properties: PhysicalDeviceProperties,
    pub capabilities: PhysicalDeviceCapabilities,
    pub constants: DeviceConstants,
}

impl PhysicalDevice {
    /// The device exposed by the headless backend.
    pub fn headless() -> Self {
        Self {
            id: 0,
            name: "Headless CPU device".to_string(),
            backend: BackendKind::Headless,
            properties: PhysicalDeviceProperties::default(),
            capabilities: PhysicalDeviceCapabilities {
                dedicated_copy_queue: true,
                compute_queue: true,
                root_constants: true,
                bindless: true,
                tearing: true,
                timeline_semaphores: true,
                ray_tracing: true,
            },
            constants: DeviceConstants::default(),
        }
    }
}
