//! Vulkan instance creation and configuration.

use std::ffi::CStr;

use ash::vk;

use crate::error::RhiError;

use super::debug;

/// Required Vulkan API version: dynamic rendering, synchronization2 and timeline
/// semaphores are core in 1.3.
pub const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Surface extensions enabled when the loader offers them.
const SURFACE_EXTENSIONS: &[&CStr] = &[
    ash::khr::surface::NAME,
    #[cfg(target_os = "windows")]
    ash::khr::win32_surface::NAME,
    #[cfg(target_os = "linux")]
    ash::khr::xlib_surface::NAME,
    #[cfg(target_os = "linux")]
    ash::khr::xcb_surface::NAME,
    #[cfg(target_os = "linux")]
    ash::khr::wayland_surface::NAME,
    #[cfg(target_os = "macos")]
    ash::ext::metal_surface::NAME,
];

/// Instance and its optional validation objects.
pub struct InstanceObjects {
    pub instance: ash::Instance,
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

/// Create a Vulkan instance with optional validation layers.
pub fn create_instance(
    entry: &ash::Entry,
    validation_enabled: bool,
) -> Result<InstanceObjects, RhiError> {
    let available = available_extensions(entry);
    let validation_available = validation_enabled && check_validation_layer_support(entry);

    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_info = vk::ApplicationInfo::default()
        .application_name(c"RedLilium")
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"RedLilium Engine")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions: Vec<*const std::ffi::c_char> = SURFACE_EXTENSIONS
        .iter()
        .filter(|name| {
            let present = available.iter().any(|a| a.as_c_str() == **name);
            if !present {
                log::debug!("Instance extension {name:?} not available");
            }
            present
        })
        .map(|name| name.as_ptr())
        .collect();

    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let layer_names: Vec<*const std::ffi::c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        RhiError::InitializationFailed(format!("Failed to create Vulkan instance: {e:?}"))
    })?;

    let (debug_utils, debug_messenger) = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        let messenger = debug::create_debug_messenger(&debug_utils)?;
        (Some(debug_utils), Some(messenger))
    } else {
        (None, None)
    };

    log::info!(
        "Created Vulkan instance ({} extensions, validation {})",
        extensions.len(),
        if validation_available { "on" } else { "off" }
    );
    Ok(InstanceObjects {
        instance,
        debug_utils,
        debug_messenger,
    })
}

fn available_extensions(entry: &ash::Entry) -> Vec<std::ffi::CString> {
    unsafe { entry.enumerate_instance_extension_properties(None) }
        .unwrap_or_default()
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect()
}

/// Check if the validation layer is available.
fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let Ok(available_layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    available_layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER_NAME))
}
