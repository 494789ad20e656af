//! Vulkan instance creation.

use std::ffi::{CStr, c_char};

use ash::vk;

use crate::error::GraphicsError;

use super::debug;

/// MoltenVK only exposes Vulkan 1.2; dynamic rendering comes from the extension there.
#[cfg(target_os = "macos")]
pub(super) const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

#[cfg(not(target_os = "macos"))]
pub(super) const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Surface extensions for the current platform. Missing ones are skipped so
/// the instance can still be created on machines without a display server.
fn surface_extensions() -> Vec<&'static CStr> {
    let mut extensions = vec![ash::khr::surface::NAME];

    #[cfg(target_os = "windows")]
    extensions.push(ash::khr::win32_surface::NAME);

    #[cfg(all(unix, not(target_os = "macos")))]
    extensions.extend([
        ash::khr::xlib_surface::NAME,
        ash::khr::xcb_surface::NAME,
        ash::khr::wayland_surface::NAME,
    ]);

    #[cfg(target_os = "macos")]
    extensions.extend([
        ash::khr::portability_enumeration::NAME,
        ash::ext::metal_surface::NAME,
    ]);

    extensions
}

/// Instance plus the optional validation messenger.
pub(super) struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

/// Create a Vulkan instance, with validation layers when requested and available.
pub(super) fn create_instance(
    entry: &ash::Entry,
    validation_enabled: bool,
) -> Result<InstanceBundle, GraphicsError> {
    let validation_available = validation_enabled && has_layer(entry, VALIDATION_LAYER_NAME);
    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"Obsidian")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Obsidian Graphics")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let available = unsafe { entry.enumerate_instance_extension_properties(None) }
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to enumerate instance extensions: {e:?}"
            ))
        })?;
    let is_available = |name: &CStr| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|n| n == name))
    };

    let mut extensions: Vec<*const c_char> = Vec::new();
    for name in surface_extensions() {
        if is_available(name) {
            extensions.push(name.as_ptr());
        } else {
            log::debug!("Instance extension {name:?} not available, skipping");
        }
    }
    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let layer_names: Vec<*const c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();
    #[cfg(target_os = "macos")]
    {
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {e:?}"))
    })?;

    let (debug_utils, debug_messenger) = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        match debug::create_debug_messenger(&debug_utils) {
            Ok(messenger) => (Some(debug_utils), Some(messenger)),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        }
    } else {
        (None, None)
    };

    Ok(InstanceBundle {
        instance,
        debug_utils,
        debug_messenger,
    })
}

impl InstanceBundle {
    /// Destroy the messenger and the instance. Every device must be gone.
    pub(super) unsafe fn destroy(&self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn has_layer(entry: &ash::Entry, layer: &CStr) -> bool {
    let Ok(available_layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    available_layers
        .iter()
        .any(|properties| properties.layer_name_as_c_str().is_ok_and(|name| name == layer))
}
