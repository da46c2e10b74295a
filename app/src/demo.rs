//! Triangle demo: one swapchain pass, one pipeline, one draw per frame.

use redlilium_rhi::{
    BUFFERED_FRAMES, FrameOutcome, GpuTimer, PipelineDesc, PipelineHandle, RenderPassDesc,
    RenderPassHandle, Rhi, RhiError, ShaderSource, TextureFormat,
};

/// Program name under the shader root.
pub const TRIANGLE_PROGRAM: &str = "triangle";

/// Embedded copy of `shaders/triangle.wgsl`, used when the file is missing.
const TRIANGLE_SOURCE: &str = include_str!("../shaders/triangle.wgsl");

/// Per-frame state of the triangle demo.
pub struct TriangleDemo {
    pass: RenderPassHandle,
    pipeline: PipelineHandle,
    /// One timer per buffered frame so a measurement is never reset in flight.
    timers: Vec<GpuTimer>,
    frames: u64,
}

impl TriangleDemo {
    /// Create the pass and pipeline on `rhi`'s surface.
    pub fn new(rhi: &mut Rhi) -> Result<Self, RhiError> {
        let (width, height) = rhi
            .surface()
            .map(|s| (s.width, s.height))
            .ok_or_else(|| {
                RhiError::InvalidParameter("the triangle demo needs a presentation surface".into())
            })?;

        let pass = rhi.create_render_pass(
            &RenderPassDesc::swapchain(width, height)
                .with_depth(TextureFormat::Depth32Float)
                .with_clear_color([0.1, 0.1, 0.12, 1.0])
                .with_label("main"),
        )?;

        let source = if ShaderSource::program(TRIANGLE_PROGRAM)
            .path(rhi.device().shader_root())
            .is_some_and(|p| p.exists())
        {
            ShaderSource::program(TRIANGLE_PROGRAM)
        } else {
            log::debug!("Shader file for '{TRIANGLE_PROGRAM}' not found, using the embedded copy");
            ShaderSource::inline(TRIANGLE_PROGRAM, TRIANGLE_SOURCE)
        };
        let pipeline = rhi
            .device_mut()
            .create_pipeline(&PipelineDesc::graphics(source, pass).with_label("triangle"))?;

        let timers = (0..BUFFERED_FRAMES)
            .map(|i| GpuTimer::new(rhi.device(), format!("frame {i}")))
            .collect::<Result<Vec<_>, _>>()?;

        log::info!("Triangle demo ready at {width}x{height}");
        Ok(Self {
            pass,
            pipeline,
            timers,
            frames: 0,
        })
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Record, submit and present one frame.
    ///
    /// An outdated surface at acquire time resizes to `window_size` and skips the
    /// frame; `Ok(None)` is returned in that case.
    pub fn frame(
        &mut self,
        rhi: &mut Rhi,
        window_size: (u32, u32),
    ) -> Result<Option<FrameOutcome>, RhiError> {
        let slot = rhi.frame_index();
        // The slot's previous frame has retired once begin_render returns.
        match rhi.begin_render() {
            Ok(()) => {}
            Err(RhiError::SurfaceOutdated) => {
                log::debug!("Surface outdated at acquire, resizing");
                rhi.resize(window_size.0, window_size.1)?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
        if let Some(ms) = self.timers[slot].elapsed_ms(rhi.device()) {
            log::trace!("GPU frame time: {ms:.3} ms");
        }

        let timer = &mut self.timers[slot];
        rhi.begin_timer(timer)?;
        rhi.begin_render_pass(self.pass)?;
        rhi.bind_pipeline(self.pipeline)?;
        rhi.draw(3)?;
        rhi.end_render_pass()?;
        rhi.end_timer(timer)?;
        rhi.end_render()?;

        let outcome = rhi.render()?;
        self.frames += 1;
        if self.frames % 120 == 0
            && let Some(ms) = self.timers[slot].elapsed_ms(rhi.device())
        {
            log::info!("Frame {}: {ms:.3} ms on the GPU", self.frames);
        }
        Ok(Some(outcome))
    }

    /// Reload the pipeline from its source file.
    pub fn reload(&mut self, rhi: &mut Rhi) {
        if let Err(e) = rhi.device_mut().reload_pipeline(self.pipeline) {
            log::error!("Reload failed, keeping the previous pipeline: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use redlilium_rhi::{DummyBackend, RhiConfig, SurfaceTarget};

    use super::*;

    #[test]
    fn test_embedded_shader_compiles() {
        let backend = Arc::new(DummyBackend::new());
        let mut rhi = Rhi::with_backend(
            backend.clone(),
            &RhiConfig::new().with_shader_root("does-not-exist"),
            SurfaceTarget::Offscreen,
            1600,
            900,
        )
        .unwrap();
        let mut demo = TriangleDemo::new(&mut rhi).unwrap();

        for _ in 0..4 {
            assert!(demo.frame(&mut rhi, (1600, 900)).unwrap().unwrap().presented);
        }
        assert_eq!(demo.frames(), 4);
        assert_eq!(backend.stats().presents, 4);
        assert_eq!(backend.stats().draws, 4);
    }

    #[test]
    fn test_outdated_surface_follows_window() {
        let backend = Arc::new(DummyBackend::new());
        let mut rhi = Rhi::with_backend(
            backend.clone(),
            &RhiConfig::new().with_shader_root("does-not-exist"),
            SurfaceTarget::Offscreen,
            1600,
            900,
        )
        .unwrap();
        let mut demo = TriangleDemo::new(&mut rhi).unwrap();

        demo.frame(&mut rhi, (1600, 900)).unwrap();
        backend.simulate_window_resize(800, 600);
        demo.frame(&mut rhi, (800, 600)).unwrap();
        let surface = rhi.surface().unwrap();
        assert_eq!((surface.width, surface.height), (800, 600));
    }
}
