//! Vulkan validation layer output and debug labels.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::error::RhiError;

/// Create a debug messenger for validation layer output.
pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> Result<vk::DebugUtilsMessengerEXT, RhiError> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }.map_err(|e| {
        RhiError::InitializationFailed(format!("Failed to create debug messenger: {e:?}"))
    })
}

/// Debug callback function for validation layer messages.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() {
        String::from("(no message)")
    } else {
        // SAFETY: callback_data is valid for the duration of the callback
        let data = unsafe { *callback_data };
        if data.p_message.is_null() {
            String::from("(null message)")
        } else {
            // SAFETY: p_message is a valid null-terminated string from the driver
            unsafe { CStr::from_ptr(data.p_message) }
                .to_string_lossy()
                .into_owned()
        }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[Vulkan {type_str}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[Vulkan {type_str}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::info!("[Vulkan {type_str}] {message}"),
        _ => log::trace!("[Vulkan {type_str}] {message}"),
    }

    vk::FALSE
}

/// Debug names and command buffer labels. Everything is a no-op without the
/// debug utils extension.
#[derive(Clone)]
pub struct DebugLabels {
    device: Option<ash::ext::debug_utils::Device>,
}

impl DebugLabels {
    pub fn new(instance: &ash::Instance, device: &ash::Device, enabled: bool) -> Self {
        Self {
            device: enabled.then(|| ash::ext::debug_utils::Device::new(instance, device)),
        }
    }

    /// Name a Vulkan object for validation messages and capture tools.
    pub fn set_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(device) = &self.device else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        if let Err(e) = unsafe { device.set_debug_utils_object_name(&info) } {
            log::trace!("Failed to name Vulkan object {name:?}: {e:?}");
        }
    }

    /// Open a label region in a command buffer.
    pub fn begin(&self, cmd: vk::CommandBuffer, name: &str) {
        let Some(device) = &self.device else {
            return;
        };
        let name = CString::new(name).unwrap_or_default();
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
        unsafe { device.cmd_begin_debug_utils_label(cmd, &label) };
    }

    /// Close the innermost label region.
    pub fn end(&self, cmd: vk::CommandBuffer) {
        if let Some(device) = &self.device {
            unsafe { device.cmd_end_debug_utils_label(cmd) };
        }
    }
}
