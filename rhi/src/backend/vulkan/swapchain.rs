//! Vulkan surface and swapchain.
//!
//! One acquire semaphore exists per buffered frame: the frame driver only
//! reuses a slot after its previous submission completed, so the semaphore is
//! guaranteed to be unsignaled again. Render-finished semaphores exist per
//! back buffer, because presentation of an image may still be pending when
//! the next frame slot comes around.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::BUFFERED_FRAMES;
use crate::backend::{GpuTexture, SurfaceConfig, SurfaceInfo};
use crate::error::RhiError;
use crate::types::TextureFormat;

use super::conversion::{convert_result, convert_texture_format, surface_format};
use super::sync::create_semaphore;

/// Formats tried in order when picking a back buffer format.
const PREFERRED_FORMATS: &[TextureFormat] = &[
    TextureFormat::Bgra8Unorm,
    TextureFormat::Rgba8Unorm,
    TextureFormat::Bgra8UnormSrgb,
    TextureFormat::Rgba8UnormSrgb,
];

/// Pick the first preferred format the surface supports.
pub fn choose_format(available: &[vk::SurfaceFormatKHR]) -> Option<(vk::SurfaceFormatKHR, TextureFormat)> {
    PREFERRED_FORMATS.iter().find_map(|wanted| {
        available
            .iter()
            .find(|f| {
                f.format == convert_texture_format(*wanted)
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .map(|f| (*f, *wanted))
    })
    .or_else(|| {
        available
            .iter()
            .find_map(|f| surface_format(f.format).map(|format| (*f, format)))
    })
}

/// Clamp the requested size to what the surface allows.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Clamp the requested image count to the surface limits.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let max = if capabilities.max_image_count > 0 {
        capabilities.max_image_count
    } else {
        u32::MAX
    };
    requested.max(capabilities.min_image_count).min(max)
}

/// A window surface and its swapchain.
pub struct Swapchain {
    device: ash::Device,
    surface_loader: ash::khr::surface::Instance,
    loader: ash::khr::swapchain::Device,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    texture_format: TextureFormat,
    extent: vk::Extent2D,
    requested_images: u32,
    vsync: bool,
    images: Vec<Arc<GpuTexture>>,
    acquire_semaphores: Vec<vk::Semaphore>,
    render_finished: Vec<vk::Semaphore>,
    /// Frame slot whose acquire semaphore the next submission waits on.
    pending_acquire: Option<usize>,
}

impl Swapchain {
    /// Create a surface for a native window and a swapchain on it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
        display: raw_window_handle::RawDisplayHandle,
        window: raw_window_handle::RawWindowHandle,
        config: &SurfaceConfig,
    ) -> Result<Self, RhiError> {
        let surface_loader = ash::khr::surface::Instance::new(entry, instance);
        let surface =
            unsafe { ash_window::create_surface(entry, instance, display, window, None) }.map_err(
                |e| RhiError::InitializationFailed(format!("Failed to create surface: {e:?}")),
            )?;

        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(physical_device, queue_family, surface)
        }
        .unwrap_or(false);
        if !supported {
            unsafe { surface_loader.destroy_surface(surface, None) };
            return Err(RhiError::InitializationFailed(
                "Graphics queue cannot present to the window surface".to_string(),
            ));
        }

        let mut acquire_semaphores = Vec::with_capacity(BUFFERED_FRAMES);
        for _ in 0..BUFFERED_FRAMES {
            acquire_semaphores.push(create_semaphore(device)?);
        }

        let mut swapchain = Self {
            device: device.clone(),
            surface_loader,
            loader: ash::khr::swapchain::Device::new(instance, device),
            physical_device,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            format: vk::SurfaceFormatKHR::default(),
            texture_format: TextureFormat::Bgra8Unorm,
            extent: vk::Extent2D::default(),
            requested_images: config.image_count,
            vsync: config.vsync,
            images: Vec::new(),
            acquire_semaphores,
            render_finished: Vec::new(),
            pending_acquire: None,
        };
        swapchain.recreate(config.width, config.height)?;
        Ok(swapchain)
    }

    /// Surface description as created.
    pub fn info(&self) -> SurfaceInfo {
        SurfaceInfo {
            format: self.texture_format,
            width: self.extent.width,
            height: self.extent.height,
            image_count: self.images.len() as u32,
        }
    }

    /// Back buffers wrapped as textures. They are owned by the swapchain.
    pub fn images(&self) -> &[Arc<GpuTexture>] {
        &self.images
    }

    /// Current size of the window, or `None` while it is minimized.
    pub fn window_extent(&self) -> Option<(u32, u32)> {
        let capabilities = self.capabilities().ok()?;
        let extent = capabilities.current_extent;
        (extent.width != u32::MAX && extent.width > 0 && extent.height > 0)
            .then_some((extent.width, extent.height))
    }

    fn capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR, RhiError> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .map_err(|e| convert_result("query surface capabilities", e))
    }

    /// Create a new swapchain at the given size, retiring the old one.
    /// The GPU must be idle.
    pub fn recreate(&mut self, width: u32, height: u32) -> Result<SurfaceInfo, RhiError> {
        let capabilities = self.capabilities()?;
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }
        .map_err(|e| convert_result("query surface formats", e))?;
        let (format, texture_format) = choose_format(&formats).ok_or_else(|| {
            RhiError::InitializationFailed("Surface offers no usable color format".to_string())
        })?;

        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }
        .unwrap_or_default();
        let present_mode = if !self.vsync && present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
            vk::PresentModeKHR::IMMEDIATE
        } else if !self.vsync && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else {
            vk::PresentModeKHR::FIFO
        };

        let extent = choose_extent(&capabilities, width, height);
        let image_count = choose_image_count(&capabilities, self.requested_images);

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }
            .map_err(|e| convert_result("create swapchain", e))?;

        self.images.clear();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;
        self.format = format;
        self.texture_format = texture_format;
        self.extent = extent;
        self.pending_acquire = None;

        let images = unsafe { self.loader.get_swapchain_images(swapchain) }
            .map_err(|e| convert_result("get swapchain images", e))?;
        self.images = images
            .into_iter()
            .map(|image| {
                Arc::new(GpuTexture::Vulkan {
                    device: self.device.clone(),
                    image,
                    allocation: Mutex::new(None),
                    allocator: None,
                    format: format.format,
                    aspect: vk::ImageAspectFlags::COLOR,
                    extent,
                    mip_levels: 1,
                })
            })
            .collect();

        while self.render_finished.len() < self.images.len() {
            self.render_finished.push(create_semaphore(&self.device)?);
        }

        log::info!(
            "Vulkan swapchain: {}x{} {:?} ({} images, {:?})",
            extent.width,
            extent.height,
            texture_format,
            self.images.len(),
            present_mode
        );
        Ok(self.info())
    }

    /// Acquire the next back buffer for a frame slot.
    pub fn acquire(&mut self, frame_index: usize) -> Result<u32, RhiError> {
        let semaphore = self.acquire_semaphores[frame_index % self.acquire_semaphores.len()];
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Vulkan: swapchain is suboptimal");
                }
                self.pending_acquire = Some(frame_index % self.acquire_semaphores.len());
                Ok(index)
            }
            Err(e) => Err(convert_result("acquire swapchain image", e)),
        }
    }

    /// Semaphores a submission presenting `image_index` waits on and signals.
    pub fn take_submit_semaphores(&mut self, image_index: u32) -> (Option<vk::Semaphore>, vk::Semaphore) {
        let wait = self
            .pending_acquire
            .take()
            .map(|slot| self.acquire_semaphores[slot]);
        (wait, self.render_finished[image_index as usize])
    }

    /// Queue a back buffer for presentation.
    pub fn present(&self, queue: vk::Queue, image_index: u32) -> Result<(), RhiError> {
        let wait = [self.render_finished[image_index as usize]];
        let swapchains = [self.swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(_) => Ok(()),
            Err(e) => Err(convert_result("present", e)),
        }
    }

    /// Destroy the swapchain, its semaphores and the surface. The GPU must be idle.
    pub fn destroy(&mut self) {
        self.images.clear();
        unsafe {
            for semaphore in self.acquire_semaphores.drain(..).chain(self.render_finished.drain(..)) {
                self.device.destroy_semaphore(semaphore, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
        self.swapchain = vk::SwapchainKHR::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_extent_is_clamped() {
        let extent = choose_extent(&capabilities(), 8000, 900);
        assert_eq!((extent.width, extent.height), (4096, 900));

        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1600,
                height: 900,
            },
            ..capabilities()
        };
        assert_eq!(choose_extent(&fixed, 10, 10).width, 1600);
    }

    #[test]
    fn test_image_count_is_clamped() {
        assert_eq!(choose_image_count(&capabilities(), 1), 2);
        assert_eq!(choose_image_count(&capabilities(), 2), 2);
        assert_eq!(choose_image_count(&capabilities(), 8), 3);
    }

    #[test]
    fn test_format_preference() {
        let available = [
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let (_, format) = choose_format(&available).unwrap();
        assert_eq!(format, TextureFormat::Bgra8Unorm);
        assert!(choose_format(&[]).is_none());
    }
}
