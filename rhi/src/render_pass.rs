//! Render passes and their attachments.
//!
//! A render pass is either offscreen, owning one texture per declared format, or
//! a swapchain pass bound to the presentation surface's back buffers:
//!
//! ```text
//! offscreen:  [color 0] [color 1] ... [depth]      each SHADER_READ between passes
//! swapchain:  [back buffer 0] [back buffer 1] ...  PRESENT between passes, one per image
//!             [depth]                              optional, sized like the surface
//! ```
//!
//! The back buffer records belong to the device and are shared by every
//! swapchain pass. They start undefined after each surface (re)creation.
//!
//! # Lifecycle
//!
//! ```text
//! Inactive ──begin──► Active ──end──► Inactive
//!            colors -> RENDER_TARGET     colors -> SHADER_READ (or PRESENT)
//!            depth  -> DEPTH_WRITE
//! ```
//!
//! When the declared size and the attachment size disagree at begin, the
//! attachments are recreated in place. Recreation keeps every texture handle and
//! every descriptor index, so a resize never allocates from the descriptor pools.

use crate::arena::Handle;
use crate::backend::SurfaceInfo;
use crate::command::{ColorAttachment, Command, CommandList, DepthAttachment};
use crate::device::{Device, stale};
use crate::error::RhiError;
use crate::profiling::profile_scope;
use crate::resources::TextureHandle;
use crate::types::{ClearColor, ResourceState, TextureDesc, TextureFormat, TextureUsage};

/// Most attachments a pass may declare, depth included.
pub const MAX_ATTACHMENTS: usize = 8;

/// Handle to a [`RenderPass`] owned by the device.
pub type RenderPassHandle = Handle<RenderPass>;

/// Description of a render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassDesc {
    /// Debug label.
    pub label: Option<String>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Attachment formats in binding order; depth formats are detected.
    /// A swapchain pass only lists its optional depth format.
    pub formats: Vec<TextureFormat>,
    /// Clear color of every color attachment.
    pub clear_color: ClearColor,
    /// Depth clear value.
    pub clear_depth: f32,
    /// Render into the presentation surface.
    pub swapchain: bool,
}

impl RenderPassDesc {
    /// Offscreen pass with one attachment per format.
    pub fn offscreen(width: u32, height: u32, formats: &[TextureFormat]) -> Self {
        Self {
            label: None,
            width,
            height,
            formats: formats.to_vec(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
            swapchain: false,
        }
    }

    /// Pass rendering into the back buffers of the presentation surface.
    pub fn swapchain(width: u32, height: u32) -> Self {
        Self {
            swapchain: true,
            ..Self::offscreen(width, height, &[])
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a depth attachment.
    pub fn with_depth(mut self, format: TextureFormat) -> Self {
        self.formats.push(format);
        self
    }

    /// Set the clear color.
    pub fn with_clear_color(mut self, color: ClearColor) -> Self {
        self.clear_color = color;
        self
    }

    /// Set the depth clear value.
    pub fn with_clear_depth(mut self, depth: f32) -> Self {
        self.clear_depth = depth;
        self
    }

    /// Label used in logs and debug markers.
    pub fn debug_name(&self) -> &str {
        self.label.as_deref().unwrap_or("render pass")
    }

    fn color_formats(&self) -> Vec<TextureFormat> {
        self.formats
            .iter()
            .copied()
            .filter(|f| !f.is_depth_stencil())
            .collect()
    }

    fn depth_formats(&self) -> Vec<TextureFormat> {
        self.formats
            .iter()
            .copied()
            .filter(|f| f.is_depth_stencil())
            .collect()
    }

    fn validate(&self) -> Result<(), RhiError> {
        let name = self.debug_name();
        if self.width == 0 || self.height == 0 {
            return Err(RhiError::invalid(format!(
                "render pass '{name}' has zero size ({}x{})",
                self.width, self.height
            )));
        }
        let colors = self.color_formats().len();
        let depths = self.depth_formats().len();
        if self.swapchain && colors > 0 {
            return Err(RhiError::invalid(format!(
                "swapchain pass '{name}' renders into the back buffers and cannot declare color formats"
            )));
        }
        let total = depths + if self.swapchain { 1 } else { colors };
        if total == 0 {
            return Err(RhiError::invalid(format!(
                "render pass '{name}' has no attachments"
            )));
        }
        if total > MAX_ATTACHMENTS {
            return Err(RhiError::invalid(format!(
                "render pass '{name}' has {total} attachments, at most {MAX_ATTACHMENTS} are supported"
            )));
        }
        if depths > 1 {
            return Err(RhiError::invalid(format!(
                "render pass '{name}' has {depths} depth attachments, at most one is supported"
            )));
        }
        Ok(())
    }
}

/// A render pass record.
#[derive(Debug)]
pub struct RenderPass {
    desc: RenderPassDesc,
    colors: Vec<TextureHandle>,
    depth: Option<TextureHandle>,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
    extent: (u32, u32),
    recreations: u32,
    active: bool,
}

impl RenderPass {
    /// The description, with the current declared size.
    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    /// Declared width.
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    /// Declared height.
    pub fn height(&self) -> u32 {
        self.desc.height
    }

    /// Whether the pass renders into the presentation surface.
    pub fn is_swapchain(&self) -> bool {
        self.desc.swapchain
    }

    /// Whether the pass is between begin and end.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Color attachments. For a swapchain pass, one per back buffer.
    pub fn color_attachments(&self) -> &[TextureHandle] {
        &self.colors
    }

    /// Depth attachment.
    pub fn depth_attachment(&self) -> Option<TextureHandle> {
        self.depth
    }

    /// Formats pipelines targeting this pass render into.
    pub fn color_formats(&self) -> &[TextureFormat] {
        &self.color_formats
    }

    /// Depth format pipelines targeting this pass test against.
    pub fn depth_format(&self) -> Option<TextureFormat> {
        self.depth_format
    }

    /// How often the attachments were recreated for a new size.
    pub fn recreations(&self) -> u32 {
        self.recreations
    }

    fn attachment_count(&self) -> usize {
        let colors = if self.desc.swapchain { 1 } else { self.colors.len() };
        colors + usize::from(self.depth.is_some())
    }

    fn targets(&self, image: Option<u32>) -> Result<Vec<TextureHandle>, RhiError> {
        if !self.desc.swapchain {
            return Ok(self.colors.clone());
        }
        let image = image.ok_or_else(|| {
            RhiError::invalid(format!(
                "swapchain pass '{}' needs an acquired back buffer; call begin_render first",
                self.desc.debug_name()
            ))
        })?;
        self.colors
            .get(image as usize)
            .map(|handle| vec![*handle])
            .ok_or_else(|| RhiError::internal(format!("back buffer {image} is not bound")))
    }
}

impl Device {
    fn attachment_desc(pass: &RenderPassDesc, format: TextureFormat, index: usize) -> TextureDesc {
        let usage = if format.is_depth_stencil() {
            TextureUsage::SAMPLED | TextureUsage::DEPTH_STENCIL
        } else {
            TextureUsage::SAMPLED | TextureUsage::RENDER_TARGET
        };
        let kind = if format.is_depth_stencil() { "depth" } else { "color" };
        TextureDesc::new_2d(pass.width, pass.height, format)
            .with_usage(usage)
            .with_label(format!("{} {kind} {index}", pass.debug_name()))
    }

    /// Create a render pass and its attachments.
    ///
    /// A swapchain pass needs the presentation surface in `surface`; its size
    /// follows the surface.
    pub(crate) fn create_render_pass(
        &mut self,
        desc: &RenderPassDesc,
        surface: Option<SurfaceInfo>,
    ) -> Result<RenderPassHandle, RhiError> {
        profile_scope!("create_render_pass");

        desc.validate()?;
        let mut desc = desc.clone();

        let mut created = Vec::new();
        let result = self.create_attachments(&mut desc, surface, &mut created);
        let (colors, color_formats) = match result {
            Ok(colors) => colors,
            Err(e) => {
                for handle in created {
                    self.release_texture(handle);
                }
                return Err(e);
            }
        };

        let depth_format = desc.depth_formats().first().copied();
        let depth = match depth_format {
            Some(format) => {
                match self.create_texture(&Self::attachment_desc(&desc, format, 0), None) {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        if !desc.swapchain {
                            for handle in colors {
                                self.release_texture(handle);
                            }
                        }
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        let pass = RenderPass {
            extent: (desc.width, desc.height),
            desc,
            colors,
            depth,
            color_formats,
            depth_format,
            recreations: 0,
            active: false,
        };
        log::debug!(
            "Device: created {} pass '{}' ({}x{}, {} attachments)",
            if pass.desc.swapchain { "swapchain" } else { "offscreen" },
            pass.desc.debug_name(),
            pass.desc.width,
            pass.desc.height,
            pass.attachment_count()
        );
        Ok(self.render_passes.insert(pass))
    }

    fn create_attachments(
        &mut self,
        desc: &mut RenderPassDesc,
        surface: Option<SurfaceInfo>,
        created: &mut Vec<TextureHandle>,
    ) -> Result<(Vec<TextureHandle>, Vec<TextureFormat>), RhiError> {
        if desc.swapchain {
            let info = surface.ok_or_else(|| {
                RhiError::invalid(format!(
                    "swapchain pass '{}' needs a presentation surface",
                    desc.debug_name()
                ))
            })?;
            desc.width = info.width;
            desc.height = info.height;
            if self.back_buffers.is_empty() {
                self.bind_surface(&info)?;
            }
            return Ok((self.back_buffers.clone(), vec![info.format]));
        }

        let formats = desc.color_formats();
        for (index, format) in formats.iter().enumerate() {
            created.push(self.create_texture(&Self::attachment_desc(desc, *format, index), None)?);
        }
        Ok((created.clone(), formats))
    }

    /// Release a render pass. Attachments shared with other users stay alive
    /// until those release them too. Back buffers belong to the surface.
    pub fn release_render_pass(&mut self, handle: RenderPassHandle) {
        if let Some(pass) = self.render_passes.release(handle) {
            let colors = if pass.desc.swapchain { Vec::new() } else { pass.colors };
            for texture in colors.into_iter().chain(pass.depth) {
                self.release_texture(texture);
            }
            log::trace!("Device: released render pass '{}'", pass.desc.debug_name());
        }
    }

    /// Change the declared size of an offscreen pass and recreate its attachments.
    ///
    /// Returns whether anything was recreated; resizing to the current size does
    /// nothing. Descriptor indices and texture handles are kept.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidParameter`] for swapchain passes, which follow
    /// the surface through [`Rhi::resize`](crate::Rhi::resize), for zero sizes,
    /// for passes that are currently active and while a frame is open.
    pub fn resize_render_pass(
        &mut self,
        handle: RenderPassHandle,
        width: u32,
        height: u32,
    ) -> Result<bool, RhiError> {
        self.check_no_open_frame("resize_render_pass")?;
        let pass = self
            .render_passes
            .get_mut(handle)
            .ok_or_else(|| stale("render pass", handle))?;
        if pass.desc.swapchain {
            return Err(RhiError::invalid(format!(
                "swapchain pass '{}' is resized with the surface",
                pass.desc.debug_name()
            )));
        }
        if width == 0 || height == 0 {
            return Err(RhiError::invalid(format!(
                "render pass '{}' cannot be resized to {width}x{height}",
                pass.desc.debug_name()
            )));
        }
        if pass.active {
            return Err(RhiError::invalid(format!(
                "render pass '{}' cannot be resized while active",
                pass.desc.debug_name()
            )));
        }
        pass.desc.width = width;
        pass.desc.height = height;
        self.sync_attachments(handle)
    }

    /// Recreate attachments whose size disagrees with the declared size.
    fn sync_attachments(&mut self, handle: RenderPassHandle) -> Result<bool, RhiError> {
        let pass = self
            .render_passes
            .get(handle)
            .ok_or_else(|| stale("render pass", handle))?;
        let (width, height) = (pass.desc.width, pass.desc.height);
        if pass.extent == (width, height) {
            return Ok(false);
        }
        profile_scope!("recreate_attachments");

        let owned: Vec<TextureHandle> = if pass.desc.swapchain {
            pass.depth.into_iter().collect()
        } else {
            pass.colors.iter().copied().chain(pass.depth).collect()
        };
        let name = pass.desc.debug_name().to_string();

        let mut list = CommandList::new();
        for texture in &owned {
            self.recreate_texture(*texture, width, height)?;
            self.ensure_state(&mut list, *texture, ResourceState::SHADER_READ)?;
        }
        self.backend().execute_immediate(&list)?;

        let pass = self
            .render_passes
            .get_mut(handle)
            .ok_or_else(|| stale("render pass", handle))?;
        pass.extent = (width, height);
        pass.recreations += 1;
        log::debug!(
            "Device: recreated {} attachments of '{name}' at {width}x{height}",
            owned.len()
        );
        Ok(true)
    }

    /// Point a swapchain pass at the back buffers bound by
    /// [`Device::bind_surface`] after the surface was recreated.
    pub(crate) fn rebind_back_buffers(
        &mut self,
        handle: RenderPassHandle,
        info: &SurfaceInfo,
    ) -> Result<(), RhiError> {
        let colors = self.back_buffers.clone();
        let pass = self
            .render_passes
            .get_mut(handle)
            .ok_or_else(|| stale("render pass", handle))?;
        if !pass.desc.swapchain {
            return Ok(());
        }
        pass.colors = colors;
        pass.color_formats = vec![info.format];
        pass.desc.width = info.width;
        pass.desc.height = info.height;
        self.sync_attachments(handle)?;
        Ok(())
    }

    /// Handles of every swapchain pass.
    pub(crate) fn swapchain_passes(&self) -> Vec<RenderPassHandle> {
        self.render_passes
            .iter()
            .filter(|(_, pass)| pass.desc.swapchain)
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Record the start of a pass: recreate stale attachments, transition them for
    /// writing and open the pass. Returns the pass size.
    pub(crate) fn begin_render_pass(
        &mut self,
        list: &mut CommandList,
        handle: RenderPassHandle,
        image: Option<u32>,
    ) -> Result<(u32, u32), RhiError> {
        let pass = self
            .render_passes
            .get(handle)
            .ok_or_else(|| stale("render pass", handle))?;
        if pass.active {
            return Err(RhiError::invalid(format!(
                "render pass '{}' is already active",
                pass.desc.debug_name()
            )));
        }
        self.sync_attachments(handle)?;

        let pass = self
            .render_passes
            .get(handle)
            .ok_or_else(|| stale("render pass", handle))?;
        let targets = pass.targets(image)?;
        let depth = pass.depth;
        let (width, height) = (pass.desc.width, pass.desc.height);
        let (clear, clear_depth) = (pass.desc.clear_color, pass.desc.clear_depth);
        list.push(Command::BeginMarker(pass.desc.debug_name().to_string()));

        let mut colors = Vec::with_capacity(targets.len());
        for texture in &targets {
            self.ensure_state(list, *texture, ResourceState::RenderTarget)?;
            let view = self
                .texture_ref(*texture)?
                .views
                .render_target
                .clone()
                .ok_or_else(|| RhiError::internal("color attachment without a render target view"))?;
            colors.push(ColorAttachment { view, clear });
        }
        let depth = match depth {
            Some(texture) => {
                self.ensure_state(list, texture, ResourceState::DepthWrite)?;
                let view = self
                    .texture_ref(texture)?
                    .views
                    .depth_stencil
                    .clone()
                    .ok_or_else(|| RhiError::internal("depth attachment without a depth view"))?;
                Some(DepthAttachment {
                    view,
                    clear: clear_depth,
                })
            }
            None => None,
        };
        list.push(Command::BeginRenderPass {
            colors,
            depth,
            width,
            height,
        });

        if let Some(pass) = self.render_passes.get_mut(handle) {
            pass.active = true;
        }
        Ok((width, height))
    }

    /// Record the end of a pass and return its attachments to their resting states.
    pub(crate) fn end_render_pass(
        &mut self,
        list: &mut CommandList,
        handle: RenderPassHandle,
        image: Option<u32>,
    ) -> Result<(), RhiError> {
        let pass = self
            .render_passes
            .get(handle)
            .ok_or_else(|| stale("render pass", handle))?;
        if !pass.active {
            return Err(RhiError::invalid(format!(
                "render pass '{}' is not active",
                pass.desc.debug_name()
            )));
        }
        let targets = pass.targets(image)?;
        let depth = pass.depth;
        let swapchain = pass.desc.swapchain;

        list.push(Command::EndRenderPass);
        let color_state = if swapchain {
            ResourceState::Present
        } else {
            ResourceState::SHADER_READ
        };
        for texture in targets {
            self.ensure_state(list, texture, color_state)?;
        }
        if let Some(texture) = depth
            && !swapchain
        {
            self.ensure_state(list, texture, ResourceState::SHADER_READ)?;
        }
        list.push(Command::EndMarker);

        if let Some(pass) = self.render_passes.get_mut(handle) {
            pass.active = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::DummyBackend;
    use crate::config::RhiConfig;

    fn device() -> Device {
        Device::new(Arc::new(DummyBackend::new()), &RhiConfig::default())
    }

    #[test]
    fn test_offscreen_attachments_rest_in_shader_read() {
        let mut device = device();
        let handle = device
            .create_render_pass(
                &RenderPassDesc::offscreen(
                    64,
                    32,
                    &[TextureFormat::Rgba8Unorm, TextureFormat::Rgba16Float],
                )
                .with_depth(TextureFormat::Depth32Float),
                None,
            )
            .unwrap();

        let pass = device.render_pass(handle).unwrap();
        assert_eq!(pass.color_attachments().len(), 2);
        assert_eq!(pass.depth_format(), Some(TextureFormat::Depth32Float));
        let depth = pass.depth_attachment().unwrap();
        for texture in pass.color_attachments().iter().chain([&depth]) {
            assert_eq!(
                device.texture(*texture).unwrap().state(),
                ResourceState::SHADER_READ
            );
        }
        assert_eq!(
            device.texture(depth).unwrap().storage_format(),
            TextureFormat::R32Typeless
        );
    }

    #[test]
    fn test_attachment_limits() {
        let mut device = device();
        assert!(
            device
                .create_render_pass(&RenderPassDesc::offscreen(8, 8, &[]), None)
                .is_err()
        );
        assert!(
            device
                .create_render_pass(
                    &RenderPassDesc::offscreen(8, 8, &[TextureFormat::R8Unorm; 9]),
                    None
                )
                .is_err()
        );
        assert!(
            device
                .create_render_pass(
                    &RenderPassDesc::offscreen(8, 8, &[TextureFormat::R8Unorm])
                        .with_depth(TextureFormat::Depth32Float)
                        .with_depth(TextureFormat::Depth16Unorm),
                    None
                )
                .is_err()
        );
        assert!(
            device
                .create_render_pass(&RenderPassDesc::offscreen(8, 8, &[TextureFormat::R8Unorm; 8]), None)
                .is_ok()
        );
    }

    #[test]
    fn test_swapchain_pass_requires_surface() {
        let mut device = device();
        let err = device
            .create_render_pass(&RenderPassDesc::swapchain(1600, 900), None)
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidParameter(_)));
    }

    #[test]
    fn test_resize_reuses_descriptor_indices() {
        let mut device = device();
        let handle = device
            .create_render_pass(
                &RenderPassDesc::offscreen(64, 64, &[TextureFormat::Rgba8Unorm])
                    .with_depth(TextureFormat::Depth24PlusStencil8),
                None,
            )
            .unwrap();
        let pass = device.render_pass(handle).unwrap();
        let color = pass.color_attachments()[0];
        let depth = pass.depth_attachment().unwrap();
        let before = (
            device.texture(color).unwrap().descriptors(),
            device.texture(depth).unwrap().descriptors(),
        );
        let allocated = device
            .descriptors()
            .pool(crate::DescriptorPoolKind::ShaderVisible)
            .allocated();

        assert!(device.resize_render_pass(handle, 128, 96).unwrap());
        assert!(!device.resize_render_pass(handle, 128, 96).unwrap());

        let pass = device.render_pass(handle).unwrap();
        assert_eq!(pass.recreations(), 1);
        let texture = device.texture(color).unwrap();
        assert_eq!((texture.width(), texture.height()), (128, 96));
        assert_eq!(texture.state(), ResourceState::SHADER_READ);
        assert_eq!(
            before,
            (
                device.texture(color).unwrap().descriptors(),
                device.texture(depth).unwrap().descriptors(),
            )
        );
        assert_eq!(
            device
                .descriptors()
                .pool(crate::DescriptorPoolKind::ShaderVisible)
                .allocated(),
            allocated
        );
    }

    #[test]
    fn test_begin_end_transitions() {
        let mut device = device();
        let handle = device
            .create_render_pass(
                &RenderPassDesc::offscreen(16, 16, &[TextureFormat::Rgba8Unorm])
                    .with_depth(TextureFormat::Depth32Float)
                    .with_label("gbuffer"),
                None,
            )
            .unwrap();
        let pass = device.render_pass(handle).unwrap();
        let (color, depth) = (pass.color_attachments()[0], pass.depth_attachment().unwrap());

        let mut list = CommandList::new();
        assert_eq!(
            device.begin_render_pass(&mut list, handle, None).unwrap(),
            (16, 16)
        );
        assert_eq!(
            device.texture(color).unwrap().state(),
            ResourceState::RenderTarget
        );
        assert_eq!(
            device.texture(depth).unwrap().state(),
            ResourceState::DepthWrite
        );
        assert!(device.render_pass(handle).unwrap().is_active());
        assert!(device.begin_render_pass(&mut list, handle, None).is_err());

        device.end_render_pass(&mut list, handle, None).unwrap();
        assert_eq!(
            device.texture(color).unwrap().state(),
            ResourceState::SHADER_READ
        );
        assert!(!device.render_pass(handle).unwrap().is_active());
        assert_eq!(list.count(|c| matches!(c, Command::BeginMarker(name) if name == "gbuffer")), 1);
        assert_eq!(list.count(|c| matches!(c, Command::EndMarker)), 1);
    }
}
