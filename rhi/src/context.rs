//! The RHI context.
//!
//! [`Rhi`] is the explicit context object applications hold: it owns the
//! [`Device`] (resources, descriptor pools, pipelines, render passes) and the
//! [`FrameDriver`] (buffered frames and the presentation surface). There is no
//! global state; everything goes through an `Rhi` value.
//!
//! # Frame Flow
//!
//! ```text
//! begin_render
//!   begin_render_pass(pass)
//!     bind_pipeline / bind_vertex_buffer / bind_parameter / draw ...
//!   end_render_pass
//!   dispatch ...
//! end_render
//! render          submit ─► present ─► advance ─► wait for the reused slot
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use redlilium_rhi::{DummyBackend, RenderPassDesc, Rhi, RhiConfig, SurfaceTarget};
//!
//! let mut rhi = Rhi::with_backend(
//!     Arc::new(DummyBackend::new()),
//!     &RhiConfig::default(),
//!     SurfaceTarget::Offscreen,
//!     1600,
//!     900,
//! )
//! .unwrap();
//! let pass = rhi.create_render_pass(&RenderPassDesc::swapchain(1600, 900)).unwrap();
//!
//! rhi.begin_render().unwrap();
//! rhi.begin_render_pass(pass).unwrap();
//! rhi.end_render_pass().unwrap();
//! rhi.end_render().unwrap();
//! rhi.render().unwrap();
//! assert_eq!(rhi.present_count(), 1);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::BUFFERED_FRAMES;
use crate::backend::{GpuBackend, SurfaceConfig, SurfaceInfo, SurfaceTarget, create_backend};
use crate::command::{Command, CommandList};
use crate::config::RhiConfig;
use crate::device::Device;
use crate::error::RhiError;
use crate::frame::{FrameDriver, FrameOutcome};
use crate::pipeline::PipelineHandle;
use crate::profiling::{frame_mark, profile_scope};
use crate::render_pass::{RenderPassDesc, RenderPassHandle};
use crate::types::ResourceState;

/// Callback invoked with the new size after the surface was resized.
pub type ResizeCallback = Box<dyn FnMut(u32, u32) + Send>;

/// Per-frame recording state.
#[derive(Debug, Default)]
pub(crate) struct Session {
    /// Commands of the frame being recorded.
    pub(crate) list: CommandList,
    /// Between `begin_render` and `end_render`.
    pub(crate) recording: bool,
    /// Recorded and closed, waiting for `render`.
    pub(crate) closed: Option<CommandList>,
    /// Pipeline bind calls resolve against.
    pub(crate) pipeline: Option<PipelineHandle>,
    /// Active render pass.
    pub(crate) pass: Option<RenderPassHandle>,
    /// Viewport of the active pass was set.
    pub(crate) viewport_set: bool,
    /// Fence cells of timers stopped this frame, filled once it is submitted.
    pub(crate) timers: Vec<Arc<AtomicU64>>,
}

/// The RHI context.
pub struct Rhi {
    pub(crate) device: Device,
    pub(crate) frames: FrameDriver,
    pub(crate) session: Session,
    resize_callback: Option<ResizeCallback>,
}

impl Rhi {
    /// Create the backend selected by `config` and a presentation surface for
    /// `target` of `width` x `height` pixels.
    ///
    /// # Panics
    ///
    /// Panics when no backend can be created; without a device nothing can be
    /// rendered.
    pub fn new(
        config: &RhiConfig,
        target: SurfaceTarget,
        width: u32,
        height: u32,
    ) -> Result<Self, RhiError> {
        let backend = match create_backend(config.backend, config.validation) {
            Ok(backend) => backend,
            Err(e) => panic!("no compatible GPU adapter for the {} backend: {e}", config.backend.name()),
        };
        Self::with_backend(backend, config, target, width, height)
    }

    /// Create a context on an existing backend.
    pub fn with_backend(
        backend: Arc<dyn GpuBackend>,
        config: &RhiConfig,
        target: SurfaceTarget,
        width: u32,
        height: u32,
    ) -> Result<Self, RhiError> {
        let mut rhi = Self::headless(backend, config);
        let surface = rhi.frames.create_surface(
            target,
            &SurfaceConfig {
                width,
                height,
                image_count: BUFFERED_FRAMES as u32,
                vsync: config.vsync,
            },
        )?;
        if let Some(info) = surface {
            rhi.device.bind_surface(&info)?;
        }
        Ok(rhi)
    }

    /// Create a context without a presentation surface.
    pub fn headless(backend: Arc<dyn GpuBackend>, config: &RhiConfig) -> Self {
        log::info!(
            "Creating RHI on {} with {BUFFERED_FRAMES} buffered frames",
            backend.name()
        );
        Self {
            device: Device::new(backend.clone(), config),
            frames: FrameDriver::new(backend, BUFFERED_FRAMES),
            session: Session::default(),
            resize_callback: None,
        }
    }

    /// The device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The device, for creating resources.
    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    /// Buffered-frame bookkeeping.
    pub fn frames(&self) -> &FrameDriver {
        &self.frames
    }

    /// Slot of the frame being recorded.
    pub fn frame_index(&self) -> usize {
        self.frames.frame_index()
    }

    /// Presentation calls made so far.
    pub fn present_count(&self) -> u64 {
        self.frames.present_count()
    }

    /// The presentation surface, if any.
    pub fn surface(&self) -> Option<SurfaceInfo> {
        self.frames.surface()
    }

    /// Whether a frame is being recorded.
    pub fn is_recording(&self) -> bool {
        self.session.recording
    }

    /// Pipeline bind calls currently resolve against.
    pub fn bound_pipeline(&self) -> Option<PipelineHandle> {
        self.session.pipeline
    }

    /// Create a render pass. Swapchain passes bind to the presentation surface.
    pub fn create_render_pass(&mut self, desc: &RenderPassDesc) -> Result<RenderPassHandle, RhiError> {
        self.device.create_render_pass(desc, self.frames.surface())
    }

    /// Register the callback [`resize`](Self::resize) invokes after the surface and
    /// swapchain attachments were recreated.
    pub fn set_resize_callback(&mut self, callback: impl FnMut(u32, u32) + Send + 'static) {
        self.resize_callback = Some(Box::new(callback));
    }

    pub(crate) fn recording_list(&mut self) -> Result<&mut CommandList, RhiError> {
        if !self.session.recording {
            return Err(RhiError::invalid("no frame is being recorded; call begin_render first"));
        }
        Ok(&mut self.session.list)
    }

    /// Start recording a frame and acquire the back buffer it renders into.
    ///
    /// Until [`render`](Self::render) returns, calls that execute on the GPU
    /// immediately, like [`Device::read_texture`], are rejected.
    pub fn begin_render(&mut self) -> Result<(), RhiError> {
        profile_scope!("begin_render");

        if self.session.recording || self.session.closed.is_some() {
            return Err(RhiError::invalid(
                "begin_render called before the previous frame was rendered",
            ));
        }
        self.frames.begin_frame()?;
        self.session = Session {
            recording: true,
            ..Session::default()
        };
        self.session
            .list
            .push(Command::BeginMarker(format!("frame {}", self.frames.frame_count())));
        self.device.frame_open = true;
        Ok(())
    }

    /// Begin a render pass.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidParameter`] outside a frame, while another pass is
    /// active, and for stale handles.
    pub fn begin_render_pass(&mut self, pass: RenderPassHandle) -> Result<(), RhiError> {
        profile_scope!("begin_render_pass");

        if let Some(active) = self.session.pass {
            return Err(RhiError::invalid(format!(
                "render pass {active:?} is still active; end it before beginning {pass:?}"
            )));
        }
        self.recording_list()?;
        let image = self.frames.current_image();
        self.device
            .begin_render_pass(&mut self.session.list, pass, image)?;
        self.session.pass = Some(pass);
        self.session.viewport_set = false;
        Ok(())
    }

    /// End the active render pass.
    pub fn end_render_pass(&mut self) -> Result<(), RhiError> {
        let pass = self
            .session
            .pass
            .ok_or_else(|| RhiError::invalid("no render pass is active"))?;
        let image = self.frames.current_image();
        self.device
            .end_render_pass(&mut self.session.list, pass, image)?;
        self.session.pass = None;
        self.session.viewport_set = false;
        Ok(())
    }

    /// Close the frame's recording. The acquired back buffer is made presentable
    /// whether or not a pass rendered into it.
    pub fn end_render(&mut self) -> Result<(), RhiError> {
        profile_scope!("end_render");

        if !self.session.recording {
            return Err(RhiError::invalid("end_render called without begin_render"));
        }
        if let Some(pass) = self.session.pass {
            return Err(RhiError::invalid(format!(
                "render pass {pass:?} is still active at end_render"
            )));
        }

        if let Some(image) = self.frames.current_image() {
            let texture = self
                .device
                .back_buffers()
                .get(image as usize)
                .copied()
                .ok_or_else(|| RhiError::internal(format!("back buffer {image} is not bound")))?;
            self.device
                .ensure_state(&mut self.session.list, texture, ResourceState::Present)?;
        }

        self.session.list.push(Command::EndMarker);
        self.session.recording = false;
        self.session.closed = Some(std::mem::take(&mut self.session.list));
        Ok(())
    }

    /// Submit the closed frame, present it and advance to the next buffered frame.
    ///
    /// When presentation reports an outdated surface, the surface is resized to the
    /// window's current size before this returns.
    pub fn render(&mut self) -> Result<FrameOutcome, RhiError> {
        profile_scope!("render");

        let list = self
            .session
            .closed
            .take()
            .ok_or_else(|| RhiError::invalid("render called without a closed frame; call end_render first"))?;
        let timers = std::mem::take(&mut self.session.timers);
        let result = self.frames.end_frame(list);
        self.device.frame_open = false;
        self.session.pipeline = None;
        let outcome = result?;
        for fence in timers {
            fence.store(outcome.fence_value, Ordering::Release);
        }
        frame_mark!();

        if outcome.surface_outdated {
            let extent = self
                .device
                .backend()
                .surface_extent()
                .or_else(|| self.frames.surface().map(|s| (s.width, s.height)));
            if let Some((width, height)) = extent {
                log::debug!("Surface outdated, resizing to {width}x{height}");
                self.resize(width, height)?;
            }
        }
        Ok(outcome)
    }

    /// Resize the presentation surface and every swapchain pass.
    ///
    /// Waits for all frames in flight. Returns whether anything changed: resizing
    /// to the current size and to a zero size (a minimized window) does nothing.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool, RhiError> {
        profile_scope!("resize");

        if self.session.recording || self.session.closed.is_some() {
            return Err(RhiError::invalid(
                "cannot resize while a frame is open; call it before begin_render or after render",
            ));
        }
        let Some(surface) = self.frames.surface() else {
            return Ok(false);
        };
        if width == 0 || height == 0 || (surface.width, surface.height) == (width, height) {
            return Ok(false);
        }

        let info = self.frames.resize_surface(width, height)?;
        self.device.bind_surface(&info)?;
        for pass in self.device.swapchain_passes() {
            self.device.rebind_back_buffers(pass, &info)?;
        }
        if let Some(callback) = self.resize_callback.as_mut() {
            callback(info.width, info.height);
        }
        Ok(true)
    }

    /// Block until every submitted frame finished on the GPU.
    pub fn wait_for_gpu(&mut self) -> Result<(), RhiError> {
        self.frames.wait_idle()?;
        self.device.wait_idle()
    }
}

impl Drop for Rhi {
    fn drop(&mut self) {
        if let Err(e) = self.frames.wait_idle() {
            log::error!("Failed to wait for in-flight frames on shutdown: {e}");
        }
    }
}

impl std::fmt::Debug for Rhi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rhi")
            .field("device", &self.device)
            .field("frames", &self.frames)
            .field("recording", &self.session.recording)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::backend::DummyBackend;

    fn rhi() -> (Arc<DummyBackend>, Rhi) {
        let backend = Arc::new(DummyBackend::new());
        let rhi = Rhi::with_backend(
            backend.clone(),
            &RhiConfig::default(),
            SurfaceTarget::Offscreen,
            1600,
            900,
        )
        .unwrap();
        (backend, rhi)
    }

    #[test]
    fn test_swapchain_pass_has_one_attachment_per_back_buffer() {
        let (_, mut rhi) = rhi();
        let pass = rhi
            .create_render_pass(&RenderPassDesc::swapchain(1600, 900))
            .unwrap();
        let pass = rhi.device().render_pass(pass).unwrap();
        assert_eq!(pass.color_attachments().len(), BUFFERED_FRAMES);
        assert_eq!((pass.width(), pass.height()), (1600, 900));
    }

    #[test]
    fn test_frame_without_passes_still_presents() {
        let (backend, mut rhi) = rhi();
        rhi.create_render_pass(&RenderPassDesc::swapchain(1600, 900))
            .unwrap();
        for _ in 0..3 {
            rhi.begin_render().unwrap();
            rhi.end_render().unwrap();
            rhi.render().unwrap();
        }
        let stats = backend.stats();
        assert_eq!(stats.presents, 3);
        assert_eq!(stats.state_mismatches, 0);
    }

    #[test]
    fn test_call_order_is_checked() {
        let (_, mut rhi) = rhi();
        assert!(rhi.end_render().is_err());
        assert!(rhi.render().is_err());
        rhi.begin_render().unwrap();
        assert!(rhi.begin_render().is_err());
        assert!(rhi.end_render_pass().is_err());
        rhi.end_render().unwrap();
        assert!(rhi.begin_render().is_err());
        rhi.render().unwrap();
    }

    #[test]
    fn test_resize_invokes_callback_once() {
        let (backend, mut rhi) = rhi();
        let pass = rhi
            .create_render_pass(
                &RenderPassDesc::swapchain(1600, 900).with_depth(crate::TextureFormat::Depth32Float),
            )
            .unwrap();
        let rtvs: Vec<_> = rhi
            .device()
            .render_pass(pass)
            .unwrap()
            .color_attachments()
            .iter()
            .map(|t| rhi.device().texture(*t).unwrap().descriptors().rtv)
            .collect();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        rhi.set_resize_callback(move |w, h| {
            assert_eq!((w, h), (800, 600));
            counter.fetch_add(1, Ordering::Relaxed);
        });

        assert!(rhi.resize(800, 600).unwrap());
        assert!(!rhi.resize(800, 600).unwrap());
        assert!(!rhi.resize(0, 0).unwrap());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(backend.stats().surface_resizes, 1);

        let pass = rhi.device().render_pass(pass).unwrap();
        assert_eq!((pass.width(), pass.height()), (800, 600));
        assert_eq!(pass.recreations(), 1);
        let depth = rhi.device().texture(pass.depth_attachment().unwrap()).unwrap();
        assert_eq!((depth.width(), depth.height()), (800, 600));
        let rebound: Vec<_> = pass
            .color_attachments()
            .iter()
            .map(|t| rhi.device().texture(*t).unwrap().descriptors().rtv)
            .collect();
        assert_eq!(rtvs, rebound);
    }

    #[test]
    fn test_outdated_surface_resizes_during_render() {
        let (backend, mut rhi) = rhi();
        rhi.create_render_pass(&RenderPassDesc::swapchain(1600, 900))
            .unwrap();
        rhi.begin_render().unwrap();
        rhi.end_render().unwrap();
        backend.simulate_window_resize(1280, 720);
        let outcome = rhi.render().unwrap();
        assert!(outcome.surface_outdated);
        let surface = rhi.surface().unwrap();
        assert_eq!((surface.width, surface.height), (1280, 720));
    }
}
