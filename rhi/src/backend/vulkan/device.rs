//! Vulkan physical and logical device management.

use ash::vk;

use crate::error::RhiError;

use super::instance::REQUIRED_API_VERSION;

/// Device extensions the backend cannot run without.
pub const DEVICE_EXTENSIONS: &[&std::ffi::CStr] =
    &[ash::khr::swapchain::NAME, ash::khr::push_descriptor::NAME];

/// Score a physical device, or `None` if it cannot run the backend.
///
/// Software rasterizers are rejected; discrete GPUs are preferred over
/// integrated ones.
pub fn score_device(
    properties: &vk::PhysicalDeviceProperties,
    has_extensions: bool,
    has_graphics_queue: bool,
) -> Option<u32> {
    if properties.device_type == vk::PhysicalDeviceType::CPU
        || properties.api_version < REQUIRED_API_VERSION
        || !has_extensions
        || !has_graphics_queue
    {
        return None;
    }

    let mut score = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 10,
    };
    score += properties.limits.max_image_dimension2_d / 1024;
    Some(score)
}

fn supports_extensions(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(available) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };
    DEVICE_EXTENSIONS.iter().all(|required| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(*required))
    })
}

/// Select the best physical device for rendering.
pub fn select_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, u32), RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        RhiError::InitializationFailed(format!("Failed to enumerate physical devices: {e:?}"))
    })?;

    if devices.is_empty() {
        return Err(RhiError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best: Option<(u32, vk::PhysicalDevice, u32)> = None;
    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let queue_family = find_graphics_queue_family(instance, device);
        let score = score_device(
            &properties,
            supports_extensions(instance, device),
            queue_family.is_some(),
        );

        let name = properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!(
            "Found GPU: {name} (type: {:?}, score: {score:?})",
            properties.device_type
        );

        if let (Some(score), Some(family)) = (score, queue_family)
            && best.is_none_or(|(best_score, ..)| score > best_score)
        {
            best = Some((score, device, family));
        }
    }

    best.map(|(_, device, family)| (device, family)).ok_or_else(|| {
        RhiError::InitializationFailed("No suitable hardware GPU with Vulkan 1.3 found".to_string())
    })
}

/// Find a queue family that supports graphics and compute.
pub fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<u32> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                && family.timestamp_valid_bits > 0
        })
        .map(|index| index as u32)
}

/// Create a logical device with required features and extensions.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
) -> Result<ash::Device, RhiError> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(graphics_queue_family)
        .queue_priorities(&queue_priorities)];

    let device_extensions: Vec<_> = DEVICE_EXTENSIONS.iter().map(|n| n.as_ptr()).collect();

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);
    let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default()
        .timeline_semaphore(true)
        .host_query_reset(true);
    let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_12_features)
        .push_next(&mut vulkan_13_features);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        RhiError::InitializationFailed(format!("Failed to create logical device: {e:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(device_type: vk::PhysicalDeviceType) -> vk::PhysicalDeviceProperties {
        vk::PhysicalDeviceProperties {
            device_type,
            api_version: REQUIRED_API_VERSION,
            limits: vk::PhysicalDeviceLimits {
                max_image_dimension2_d: 16384,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_cpu_adapters_are_rejected() {
        assert_eq!(
            score_device(&properties(vk::PhysicalDeviceType::CPU), true, true),
            None
        );
    }

    #[test]
    fn test_discrete_preferred() {
        let discrete = score_device(&properties(vk::PhysicalDeviceType::DISCRETE_GPU), true, true);
        let integrated =
            score_device(&properties(vk::PhysicalDeviceType::INTEGRATED_GPU), true, true);
        assert!(discrete > integrated);
    }

    #[test]
    fn test_missing_requirements_are_rejected() {
        let discrete = properties(vk::PhysicalDeviceType::DISCRETE_GPU);
        assert_eq!(score_device(&discrete, false, true), None);
        assert_eq!(score_device(&discrete, true, false), None);

        let old = vk::PhysicalDeviceProperties {
            api_version: vk::make_api_version(0, 1, 1, 0),
            ..discrete
        };
        assert_eq!(score_device(&old, true, true), None);
    }
}
