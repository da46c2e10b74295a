//! Native Vulkan backend implementation using ash.
//!
//! The backend targets Vulkan 1.3 and relies on:
//! - dynamic rendering instead of render pass objects
//! - synchronization2 barriers
//! - a timeline semaphore as the frame fence
//! - push descriptors for the single binding group of every pipeline
//! - gpu-allocator for memory management
//!
//! Command lists are recorded on the CPU by the RHI core and translated into a
//! command buffer of the submitting frame slot by the [`encoder`].

mod allocator;
pub mod barriers;
mod command;
pub(crate) mod conversion;
mod debug;
mod device;
mod encoder;
mod instance;
mod pipeline;
pub mod swapchain;
mod sync;

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocationScheme, Allocator};
use parking_lot::Mutex;

use crate::BUFFERED_FRAMES;
use crate::command::CommandList;
use crate::error::RhiError;
use crate::profiling::profile_scope;
use crate::types::{BufferUsage, TextureUsage};

use super::{
    BackendLimits, FrameSubmit, GpuBackend, GpuBuffer, GpuPipeline, GpuQueryPool, GpuTexture,
    GpuTextureView, PipelineBuild, SurfaceConfig, SurfaceInfo, SurfaceTarget, TextureAlloc,
    ViewDesc, ViewKind,
};

use self::command::CommandSlot;
use self::conversion::{
    convert_buffer_usage, convert_result, convert_texture_format, convert_texture_usage,
    format_aspect,
};
use self::debug::DebugLabels;
use self::encoder::Encoder;
use self::swapchain::Swapchain;

/// Uniform offsets are aligned to at least this many bytes on every device.
const UNIFORM_ALIGNMENT_FLOOR: u64 = 256;

/// Largest push constant block the binding layout promotes.
const PUSH_CONSTANT_CEILING: u32 = 128;

/// Logical distance between descriptors in the CPU-side pools. Vulkan
/// descriptors are pushed, so no device heap backs the pools.
const DESCRIPTOR_STRIDE: u32 = 32;

/// Vulkan-based GPU backend using ash.
pub struct VulkanBackend {
    /// Vulkan entry points (function loader).
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    physical_device: vk::PhysicalDevice,
    adapter_name: String,
    limits: BackendLimits,
    device: ash::Device,
    queue_family: u32,
    /// Graphics queue. Queue access must be externally synchronized.
    queue: Mutex<vk::Queue>,
    /// Dropped explicitly before the device is destroyed.
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    push_descriptor: ash::khr::push_descriptor::Device,
    labels: DebugLabels,
    /// Timeline semaphore carrying the frame fence values.
    timeline: vk::Semaphore,
    /// One command pool per buffered frame.
    frames: Mutex<Vec<CommandSlot>>,
    /// Command pool and fence for blocking submissions.
    immediate: Mutex<(CommandSlot, vk::Fence)>,
    swapchain: Mutex<Option<Swapchain>>,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("adapter", &self.adapter_name)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl VulkanBackend {
    /// Create a new Vulkan backend.
    ///
    /// Loads the Vulkan library, creates an instance (with validation layers
    /// when `validation` is set and available), selects a hardware adapter and
    /// creates the logical device, allocator and per-frame command pools.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InitializationFailed`] when Vulkan is missing or no
    /// adapter supports Vulkan 1.3 with push descriptors.
    pub fn new(validation: bool) -> Result<Self, RhiError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            RhiError::InitializationFailed(format!("Failed to load Vulkan: {e}"))
        })?;

        let instance::InstanceObjects {
            instance,
            debug_utils,
            debug_messenger,
        } = instance::create_instance(&entry, validation)?;

        let (physical_device, queue_family) = match device::select_physical_device(&instance) {
            Ok(selected) => selected,
            Err(e) => {
                unsafe {
                    if let (Some(utils), Some(messenger)) = (&debug_utils, debug_messenger) {
                        utils.destroy_debug_utils_messenger(messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let adapter_name = properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        let limits = BackendLimits {
            min_uniform_alignment: properties
                .limits
                .min_uniform_buffer_offset_alignment
                .max(UNIFORM_ALIGNMENT_FLOOR),
            timestamp_period_ns: properties.limits.timestamp_period,
            descriptor_stride: DESCRIPTOR_STRIDE,
            max_push_constant_size: properties
                .limits
                .max_push_constants_size
                .min(PUSH_CONSTANT_CEILING),
        };

        let device = device::create_logical_device(&instance, physical_device, queue_family)?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let allocator = Arc::new(Mutex::new(allocator::create_allocator(
            &instance,
            physical_device,
            device.clone(),
        )?));

        let timeline = sync::create_timeline(&device, 0)?;
        let frames = (0..BUFFERED_FRAMES)
            .map(|_| CommandSlot::new(&device, queue_family))
            .collect::<Result<Vec<_>, _>>()?;
        let immediate = (
            CommandSlot::new(&device, queue_family)?,
            sync::create_fence(&device)?,
        );

        let push_descriptor = ash::khr::push_descriptor::Device::new(&instance, &device);
        let labels = DebugLabels::new(&instance, &device, debug_utils.is_some());

        log::info!(
            "Vulkan backend initialized on {adapter_name} (validation: {})",
            debug_utils.is_some()
        );

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
            physical_device,
            adapter_name,
            limits,
            device,
            queue_family,
            queue: Mutex::new(queue),
            allocator: ManuallyDrop::new(allocator),
            push_descriptor,
            labels,
            timeline,
            frames: Mutex::new(frames),
            immediate: Mutex::new(immediate),
            swapchain: Mutex::new(None),
        })
    }

    fn encode(&self, slot: &CommandSlot, list: &CommandList) -> Result<vk::CommandBuffer, RhiError> {
        let cmd = slot.begin(&self.device)?;
        Encoder::new(&self.device, &self.push_descriptor, &self.labels, cmd).encode(list)?;
        slot.end(&self.device)?;
        Ok(cmd)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("Vulkan: wait idle on shutdown failed: {e:?}");
            }

            if let Some(mut swapchain) = self.swapchain.lock().take() {
                swapchain.destroy();
            }
            for slot in self.frames.lock().drain(..) {
                slot.destroy(&self.device);
            }
            {
                let immediate = self.immediate.lock();
                immediate.0.destroy(&self.device);
                self.device.destroy_fence(immediate.1, None);
            }
            self.device.destroy_semaphore(self.timeline, None);

            let live = Arc::strong_count(&*self.allocator) - 1;
            ManuallyDrop::drop(&mut self.allocator);
            if live > 0 {
                // Destroying the device now would leave those objects dangling.
                log::warn!("Vulkan: {live} GPU objects outlive the backend; leaking the device");
                return;
            }

            self.device.destroy_device(None);
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::info!("Vulkan backend destroyed");
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn adapter_name(&self) -> String {
        self.adapter_name.clone()
    }

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    fn create_buffer(
        &self,
        label: &str,
        size: u64,
        usage: BufferUsage,
    ) -> Result<GpuBuffer, RhiError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(convert_buffer_usage(usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| convert_result("create buffer", e))?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = self.allocator.lock().allocate(&AllocationCreateDesc {
            name: label,
            requirements,
            location: allocator::memory_location(usage.heap()),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(allocator::allocation_error("buffer memory", e));
            }
        };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        // The buffer owns its memory from here on and frees it on drop.
        let gpu = GpuBuffer::Vulkan {
            device: self.device.clone(),
            buffer,
            allocation: Mutex::new(Some(allocation)),
            allocator: (*self.allocator).clone(),
            size,
        };
        bound.map_err(|e| convert_result("bind buffer memory", e))?;

        self.labels.set_name(buffer, label);
        log::trace!("Vulkan: created buffer '{label}' ({size} bytes, {usage:?})");
        Ok(gpu)
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<(), RhiError> {
        let GpuBuffer::Vulkan {
            allocation, size, ..
        } = buffer
        else {
            return Err(RhiError::internal("write_buffer called with non-Vulkan buffer"));
        };
        if offset + data.len() as u64 > *size {
            return Err(RhiError::invalid(format!(
                "write of {} bytes at offset {offset} exceeds buffer size {size}",
                data.len()
            )));
        }

        let mut guard = allocation.lock();
        let slice = guard
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or_else(|| RhiError::internal("Buffer is not mapped for CPU access"))?;
        let start = offset as usize;
        slice[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, RhiError> {
        let GpuBuffer::Vulkan {
            allocation,
            size: total,
            ..
        } = buffer
        else {
            return Err(RhiError::internal("read_buffer called with non-Vulkan buffer"));
        };
        if offset + size > *total {
            return Err(RhiError::invalid(format!(
                "read of {size} bytes at offset {offset} exceeds buffer size {total}"
            )));
        }

        let guard = allocation.lock();
        let slice = guard
            .as_ref()
            .and_then(|a| a.mapped_slice())
            .ok_or_else(|| RhiError::internal("Buffer is not mapped for CPU access"))?;
        let start = offset as usize;
        Ok(slice[start..start + size as usize].to_vec())
    }

    fn create_texture(&self, desc: &TextureAlloc<'_>) -> Result<GpuTexture, RhiError> {
        let format = convert_texture_format(desc.format);
        let extent = vk::Extent2D {
            width: desc.width,
            height: desc.height,
        };

        // sRGB images are written through a linear storage view.
        let flags = if desc.format.is_srgb() && desc.usage.contains(TextureUsage::STORAGE) {
            vk::ImageCreateFlags::MUTABLE_FORMAT | vk::ImageCreateFlags::EXTENDED_USAGE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_count)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| convert_result("create image", e))?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = self.allocator.lock().allocate(&AllocationCreateDesc {
            name: desc.label,
            requirements,
            location: gpu_allocator::MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(allocator::allocation_error("texture memory", e));
            }
        };

        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        let gpu = GpuTexture::Vulkan {
            device: self.device.clone(),
            image,
            allocation: Mutex::new(Some(allocation)),
            allocator: Some((*self.allocator).clone()),
            format,
            aspect: format_aspect(desc.format),
            extent,
            mip_levels: desc.mip_count,
        };
        bound.map_err(|e| convert_result("bind image memory", e))?;

        self.labels.set_name(image, desc.label);
        log::trace!(
            "Vulkan: created texture '{}' ({}x{} {:?}, {} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.format,
            desc.mip_count
        );
        Ok(gpu)
    }

    fn create_view(
        &self,
        texture: &Arc<GpuTexture>,
        desc: &ViewDesc,
    ) -> Result<GpuTextureView, RhiError> {
        let GpuTexture::Vulkan {
            image,
            format,
            aspect,
            ..
        } = texture.as_ref()
        else {
            return Err(RhiError::internal("create_view called with non-Vulkan texture"));
        };

        // Views reuse the image format, so typeless depth storage is viewed as
        // its depth format. Shaders read the depth aspect only.
        let view_aspect = match desc.kind {
            ViewKind::DepthStencil => *aspect,
            _ if aspect.contains(vk::ImageAspectFlags::DEPTH) => vk::ImageAspectFlags::DEPTH,
            _ => *aspect,
        };
        let view_format = match desc.kind {
            ViewKind::Storage => convert_texture_format(desc.format),
            _ => *format,
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(*image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(view_format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: view_aspect,
                base_mip_level: desc.base_mip,
                level_count: desc.mip_count,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { self.device.create_image_view(&view_info, None) }
            .map_err(|e| convert_result("create image view", e))?;

        Ok(GpuTextureView::Vulkan {
            device: self.device.clone(),
            view,
            texture: Arc::clone(texture),
            base_mip: desc.base_mip,
            mip_count: desc.mip_count,
        })
    }

    fn create_pipeline(&self, build: &PipelineBuild<'_>) -> Result<GpuPipeline, RhiError> {
        pipeline::create_pipeline(&self.device, &self.labels, build)
    }

    fn create_query_pool(&self, count: u32) -> Result<GpuQueryPool, RhiError> {
        let info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(count);
        let pool = unsafe { self.device.create_query_pool(&info, None) }
            .map_err(|e| convert_result("create query pool", e))?;
        Ok(GpuQueryPool::Vulkan {
            device: self.device.clone(),
            pool,
            count,
        })
    }

    fn create_surface(
        &self,
        target: SurfaceTarget,
        config: &SurfaceConfig,
    ) -> Result<Option<SurfaceInfo>, RhiError> {
        let SurfaceTarget::Window { display, window } = target else {
            log::info!("Vulkan: offscreen target, no swapchain created");
            return Ok(None);
        };

        let mut slot = self.swapchain.lock();
        if let Some(mut old) = slot.take() {
            self.wait_idle()?;
            old.destroy();
        }
        let swapchain = Swapchain::new(
            &self.entry,
            &self.instance,
            &self.device,
            self.physical_device,
            self.queue_family,
            display,
            window,
            config,
        )?;
        let info = swapchain.info();
        *slot = Some(swapchain);
        Ok(Some(info))
    }

    fn surface_images(&self) -> Vec<Arc<GpuTexture>> {
        self.swapchain
            .lock()
            .as_ref()
            .map(|s| s.images().to_vec())
            .unwrap_or_default()
    }

    fn surface_extent(&self) -> Option<(u32, u32)> {
        self.swapchain.lock().as_ref()?.window_extent()
    }

    fn resize_surface(&self, width: u32, height: u32) -> Result<SurfaceInfo, RhiError> {
        profile_scope!("vulkan_resize_surface");
        self.swapchain
            .lock()
            .as_mut()
            .ok_or_else(|| RhiError::invalid("resize_surface without a surface"))?
            .recreate(width, height)
    }

    fn acquire_image(&self, frame_index: usize) -> Result<u32, RhiError> {
        profile_scope!("vulkan_acquire");
        self.swapchain
            .lock()
            .as_mut()
            .ok_or_else(|| RhiError::invalid("acquire_image without a surface"))?
            .acquire(frame_index)
    }

    fn submit(&self, list: &CommandList, submit: &FrameSubmit) -> Result<(), RhiError> {
        profile_scope!("vulkan_submit");

        let frames = self.frames.lock();
        let slot = &frames[submit.frame_index % frames.len()];
        let cmd = self.encode(slot, list)?;

        let (acquire, render_finished) = match submit.present_image {
            Some(image) => match self.swapchain.lock().as_mut() {
                Some(swapchain) => {
                    let (wait, signal) = swapchain.take_submit_semaphores(image);
                    (wait, Some(signal))
                }
                None => (None, None),
            },
            None => (None, None),
        };

        let waits: Vec<vk::SemaphoreSubmitInfo> = acquire
            .into_iter()
            .map(|semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            })
            .collect();
        let mut signals = vec![
            vk::SemaphoreSubmitInfo::default()
                .semaphore(self.timeline)
                .value(submit.fence_value)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
        ];
        if let Some(semaphore) = render_finished {
            signals.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
            );
        }
        let command_buffers = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&waits)
            .command_buffer_infos(&command_buffers)
            .signal_semaphore_infos(&signals);

        let queue = self.queue.lock();
        unsafe { self.device.queue_submit2(*queue, &[submit_info], vk::Fence::null()) }
            .map_err(|e| convert_result("queue submit", e))?;
        log::trace!(
            "Vulkan: submitted {} commands (fence {}, image {:?})",
            list.len(),
            submit.fence_value,
            submit.present_image
        );
        Ok(())
    }

    fn present(&self, image_index: u32) -> Result<(), RhiError> {
        profile_scope!("vulkan_present");
        let swapchain = self.swapchain.lock();
        let swapchain = swapchain
            .as_ref()
            .ok_or_else(|| RhiError::invalid("present without a surface"))?;
        swapchain.present(*self.queue.lock(), image_index)
    }

    fn completed_fence(&self) -> u64 {
        sync::timeline_value(&self.device, self.timeline)
    }

    fn wait_for_fence(&self, value: u64) -> Result<(), RhiError> {
        profile_scope!("vulkan_wait_fence");
        sync::wait_timeline(&self.device, self.timeline, value)
    }

    fn execute_immediate(&self, list: &CommandList) -> Result<(), RhiError> {
        profile_scope!("vulkan_execute_immediate");
        let immediate = self.immediate.lock();
        let (slot, fence) = (&immediate.0, immediate.1);
        let cmd = self.encode(slot, list)?;

        let command_buffers = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
        let submit_info = vk::SubmitInfo2::default().command_buffer_infos(&command_buffers);
        {
            let queue = self.queue.lock();
            unsafe { self.device.queue_submit2(*queue, &[submit_info], fence) }
                .map_err(|e| convert_result("immediate submit", e))?;
        }
        sync::wait_and_reset(&self.device, fence)
    }

    fn wait_idle(&self) -> Result<(), RhiError> {
        let _queue = self.queue.lock();
        unsafe { self.device.device_wait_idle() }.map_err(|e| convert_result("wait idle", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires a Vulkan 1.3 GPU"]
    fn test_vulkan_buffer_round_trip() {
        let backend = VulkanBackend::new(false).unwrap();
        let buffer = backend
            .create_buffer("round trip", 64, BufferUsage::Uniform)
            .unwrap();
        backend.write_buffer(&buffer, 16, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            backend.read_buffer(&buffer, 16, 4).unwrap(),
            vec![1, 2, 3, 4]
        );
        assert!(backend.write_buffer(&buffer, 62, &[0; 4]).is_err());
    }

    #[test]
    #[ignore = "requires a Vulkan 1.3 GPU"]
    fn test_vulkan_limits() {
        let backend = VulkanBackend::new(false).unwrap();
        let limits = backend.limits();
        assert!(limits.min_uniform_alignment >= UNIFORM_ALIGNMENT_FLOOR);
        assert!(limits.max_push_constant_size <= PUSH_CONSTANT_CEILING);
        assert_eq!(backend.completed_fence(), 0);
    }
}
