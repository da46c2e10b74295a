//! Barrier batching for the Vulkan backend.
//!
//! Consecutive `Transition` and `UavBarrier` commands of a command list are
//! collected into one [`BarrierBatch`] and submitted as a single
//! `vkCmdPipelineBarrier2` call when the next non-barrier command is encoded.

use ash::vk;

use crate::backend::{GpuBuffer, GpuTexture};
use crate::command::BarrierResource;
use crate::types::{ResourceState, Subresource};

use super::conversion::{state_layout, state_scope};

/// A batch of memory, buffer and image barriers submitted together.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    memory: Vec<vk::MemoryBarrier2<'static>>,
    buffers: Vec<vk::BufferMemoryBarrier2<'static>>,
    images: Vec<vk::ImageMemoryBarrier2<'static>>,
}

impl BarrierBatch {
    /// Create a new empty barrier batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the batch has any barriers.
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty() && self.buffers.is_empty() && self.images.is_empty()
    }

    /// Number of barriers in the batch.
    pub fn len(&self) -> usize {
        self.memory.len() + self.buffers.len() + self.images.len()
    }

    /// Add a state transition.
    ///
    /// With `discard` the previous contents are dropped and the image starts
    /// from `UNDEFINED`, the layout of fresh allocations and swapchain images.
    pub fn transition(
        &mut self,
        resource: &BarrierResource,
        subresource: Subresource,
        before: ResourceState,
        after: ResourceState,
        discard: bool,
    ) {
        let (src_stage, src_access) = state_scope(before);
        let (dst_stage, dst_access) = state_scope(after);

        match resource {
            BarrierResource::Buffer(buffer) => {
                let GpuBuffer::Vulkan { buffer, .. } = buffer.as_ref() else {
                    return;
                };
                self.buffers.push(
                    vk::BufferMemoryBarrier2::default()
                        .src_stage_mask(src_stage)
                        .src_access_mask(src_access)
                        .dst_stage_mask(dst_stage)
                        .dst_access_mask(dst_access)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .buffer(*buffer)
                        .offset(0)
                        .size(vk::WHOLE_SIZE),
                );
            }
            BarrierResource::Texture(texture) => {
                let GpuTexture::Vulkan {
                    image,
                    aspect,
                    mip_levels,
                    ..
                } = texture.as_ref()
                else {
                    return;
                };
                let (base_mip, mip_count) = match subresource {
                    Subresource::All => (0, *mip_levels),
                    Subresource::Mip(mip) => (mip, 1),
                };
                let old_layout = if discard {
                    vk::ImageLayout::UNDEFINED
                } else {
                    state_layout(before)
                };
                self.images.push(
                    vk::ImageMemoryBarrier2::default()
                        .src_stage_mask(src_stage)
                        .src_access_mask(src_access)
                        .dst_stage_mask(dst_stage)
                        .dst_access_mask(dst_access)
                        .old_layout(old_layout)
                        .new_layout(state_layout(after))
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(*image)
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: *aspect,
                            base_mip_level: base_mip,
                            level_count: mip_count,
                            base_array_layer: 0,
                            layer_count: 1,
                        }),
                );
            }
        }
    }

    /// Make shader writes visible to later shader reads and writes.
    pub fn uav(&mut self) {
        let shaders = vk::PipelineStageFlags2::VERTEX_SHADER
            | vk::PipelineStageFlags2::FRAGMENT_SHADER
            | vk::PipelineStageFlags2::COMPUTE_SHADER;
        self.memory.push(
            vk::MemoryBarrier2::default()
                .src_stage_mask(shaders)
                .src_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
                .dst_stage_mask(shaders)
                .dst_access_mask(
                    vk::AccessFlags2::SHADER_STORAGE_READ
                        | vk::AccessFlags2::SHADER_SAMPLED_READ
                        | vk::AccessFlags2::SHADER_STORAGE_WRITE,
                ),
        );
    }

    /// Record all barriers in one command and empty the batch.
    pub fn flush(&mut self, device: &ash::Device, cmd: vk::CommandBuffer) {
        if self.is_empty() {
            return;
        }
        let dependency = vk::DependencyInfo::default()
            .memory_barriers(&self.memory)
            .buffer_memory_barriers(&self.buffers)
            .image_memory_barriers(&self.images);
        unsafe {
            device.cmd_pipeline_barrier2(cmd, &dependency);
        }
        self.memory.clear();
        self.buffers.clear();
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_batch() {
        let mut batch = BarrierBatch::new();
        assert!(batch.is_empty());
        batch.uav();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_non_vulkan_resources_are_skipped() {
        let mut batch = BarrierBatch::new();
        let buffer = std::sync::Arc::new(GpuBuffer::dummy(16));
        batch.transition(
            &BarrierResource::Buffer(buffer),
            Subresource::All,
            ResourceState::Common,
            ResourceState::CopySrc,
            false,
        );
        assert!(batch.is_empty());
    }
}
