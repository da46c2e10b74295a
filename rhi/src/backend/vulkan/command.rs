//! Vulkan command pool and buffer management.

use ash::vk;

use crate::error::RhiError;

use super::conversion::convert_result;

/// Create a command pool for graphics operations.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, RhiError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::TRANSIENT);

    unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        RhiError::InitializationFailed(format!("Failed to create command pool: {e:?}"))
    })
}

/// A command pool with one primary command buffer, reset as a whole before
/// each recording.
pub struct CommandSlot {
    pub pool: vk::CommandPool,
    pub cmd: vk::CommandBuffer,
}

impl CommandSlot {
    pub fn new(device: &ash::Device, queue_family_index: u32) -> Result<Self, RhiError> {
        let pool = create_command_pool(device, queue_family_index)?;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(RhiError::InitializationFailed(format!(
                    "Failed to allocate command buffer: {e:?}"
                )));
            }
        };
        Ok(Self { pool, cmd })
    }

    /// Reset the pool and begin a one-time recording.
    ///
    /// The caller guarantees the GPU finished the previous recording.
    pub fn begin(&self, device: &ash::Device) -> Result<vk::CommandBuffer, RhiError> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
                .map_err(|e| convert_result("reset command pool", e))?;
            device
                .begin_command_buffer(self.cmd, &begin_info)
                .map_err(|e| convert_result("begin command buffer", e))?;
        }
        Ok(self.cmd)
    }

    /// Finish the recording started by [`CommandSlot::begin`].
    pub fn end(&self, device: &ash::Device) -> Result<(), RhiError> {
        unsafe { device.end_command_buffer(self.cmd) }
            .map_err(|e| convert_result("end command buffer", e))
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_command_pool(self.pool, None) };
    }
}
