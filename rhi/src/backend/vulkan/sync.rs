//! Vulkan synchronization primitives.
//!
//! Frame completion is tracked with a single timeline semaphore whose value
//! is the fence value handed out by the frame driver. Binary semaphores are
//! only used where the swapchain requires them.

use ash::vk;

use crate::error::RhiError;

use super::conversion::convert_result;

/// Timeout for blocking waits, in nanoseconds.
const WAIT_TIMEOUT_NS: u64 = 5_000_000_000;

/// Create a timeline semaphore starting at `initial`.
pub fn create_timeline(device: &ash::Device, initial: u64) -> Result<vk::Semaphore, RhiError> {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(initial);
    let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
    unsafe { device.create_semaphore(&info, None) }.map_err(|e| {
        RhiError::InitializationFailed(format!("Failed to create timeline semaphore: {e:?}"))
    })
}

/// Create a binary semaphore.
pub fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore, RhiError> {
    unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
        .map_err(|e| convert_result("create semaphore", e))
}

/// Create an unsignaled fence.
pub fn create_fence(device: &ash::Device) -> Result<vk::Fence, RhiError> {
    unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
        .map_err(|e| convert_result("create fence", e))
}

/// Current value of a timeline semaphore. Returns 0 if the query fails.
pub fn timeline_value(device: &ash::Device, semaphore: vk::Semaphore) -> u64 {
    unsafe { device.get_semaphore_counter_value(semaphore) }.unwrap_or_else(|e| {
        log::error!("Failed to query timeline value: {e:?}");
        0
    })
}

/// Block until the timeline reaches `value`.
pub fn wait_timeline(
    device: &ash::Device,
    semaphore: vk::Semaphore,
    value: u64,
) -> Result<(), RhiError> {
    let semaphores = [semaphore];
    let values = [value];
    let info = vk::SemaphoreWaitInfo::default()
        .semaphores(&semaphores)
        .values(&values);
    match unsafe { device.wait_semaphores(&info, WAIT_TIMEOUT_NS) } {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => {
            log::error!("Timed out waiting for fence value {value}");
            Err(RhiError::DeviceLost)
        }
        Err(e) => Err(convert_result("wait for timeline", e)),
    }
}

/// Block until a fence is signaled, then reset it.
pub fn wait_and_reset(device: &ash::Device, fence: vk::Fence) -> Result<(), RhiError> {
    unsafe {
        device
            .wait_for_fences(&[fence], true, WAIT_TIMEOUT_NS)
            .map_err(|e| convert_result("wait for fence", e))?;
        device
            .reset_fences(&[fence])
            .map_err(|e| convert_result("reset fence", e))
    }
}
