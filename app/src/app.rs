//! Window host and event loop.

use std::error::Error;

use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::{Window, WindowId};

use redlilium_rhi::{Rhi, RhiError, SurfaceTarget};

use crate::args::AppArgs;
use crate::demo::TriangleDemo;

/// Frames rendered by a headless run without `--max-frames`.
pub const HEADLESS_FRAMES: u64 = 60;

/// Windowed demo application.
///
/// Field order matters: the demo and the context go before the window whose
/// surface they render into.
pub struct App {
    demo: Option<TriangleDemo>,
    rhi: Option<Rhi>,
    window: Option<Window>,
    args: AppArgs,
    error: Option<Box<dyn Error>>,
}

impl App {
    /// Create an application for `args`. Nothing is opened until the event loop runs.
    pub fn new(args: AppArgs) -> Self {
        Self {
            demo: None,
            rhi: None,
            window: None,
            args,
            error: None,
        }
    }

    /// Run the demo: in a window, or headless for the dummy backend.
    pub fn run(args: AppArgs) -> Result<(), Box<dyn Error>> {
        crate::init();
        if args.headless() {
            return run_headless(&args).map_err(Into::into);
        }

        let event_loop = EventLoop::new()?;
        let mut app = Self::new(args);
        event_loop.run_app(&mut app)?;
        match app.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn init_graphics(&mut self, window: &Window) -> Result<(), Box<dyn Error>> {
        let size = window.inner_size();
        let target = SurfaceTarget::Window {
            display: window.display_handle()?.as_raw(),
            window: window.window_handle()?.as_raw(),
        };
        let mut rhi = Rhi::new(&self.args.rhi_config(), target, size.width, size.height)?;
        rhi.set_resize_callback(|width, height| {
            log::info!("Swapchain resized to {width}x{height}");
        });
        log::info!(
            "Graphics initialized: {} ({}x{})",
            rhi.device().backend().name(),
            size.width,
            size.height
        );

        self.demo = Some(TriangleDemo::new(&mut rhi)?);
        self.rhi = Some(rhi);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: Box<dyn Error>) {
        log::error!("{error}");
        self.error = Some(error);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(rhi) = self.rhi.as_mut()
            && let Err(e) = rhi.wait_for_gpu()
        {
            log::error!("Failed to wait for the GPU on shutdown: {e}");
        }
        event_loop.exit();
    }

    fn render_frame(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(rhi), Some(demo), Some(window)) =
            (self.rhi.as_mut(), self.demo.as_mut(), self.window.as_ref())
        else {
            return;
        };
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return;
        }

        match demo.frame(rhi, (size.width, size.height)) {
            Ok(_) => {}
            Err(e) => {
                self.fail(event_loop, e.into());
                return;
            }
        }

        if let Some(max_frames) = self.args.max_frames
            && demo.frames() >= max_frames
        {
            log::info!("Reached max frames limit ({max_frames}), exiting");
            self.shutdown(event_loop);
        }
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, event: &KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        match event.physical_key {
            PhysicalKey::Code(KeyCode::Escape) => self.shutdown(event_loop),
            PhysicalKey::Code(KeyCode::F5) => {
                if let (Some(rhi), Some(demo)) = (self.rhi.as_mut(), self.demo.as_mut()) {
                    log::info!("Reloading shaders");
                    demo.reload(rhi);
                }
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("RedLilium RHI")
            .with_inner_size(PhysicalSize::new(self.args.width, self.args.height));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, e.into());
                return;
            }
        };
        log::info!("Window created");

        if let Err(e) = self.init_graphics(&window) {
            self.window = Some(window);
            self.fail(event_loop, e);
            return;
        }
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                self.shutdown(event_loop);
            }
            WindowEvent::Resized(size) => {
                if let Some(rhi) = self.rhi.as_mut()
                    && let Err(e) = rhi.resize(size.width, size.height)
                {
                    self.fail(event_loop, e.into());
                }
            }
            WindowEvent::RedrawRequested => self.render_frame(event_loop),
            WindowEvent::KeyboardInput { event, .. } => self.on_key(event_loop, &event),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

/// Render the demo without a window.
pub fn run_headless(args: &AppArgs) -> Result<(), RhiError> {
    let mut rhi = Rhi::new(
        &args.rhi_config(),
        SurfaceTarget::Offscreen,
        args.width,
        args.height,
    )?;
    let mut demo = TriangleDemo::new(&mut rhi)?;

    let frames = args.max_frames.unwrap_or(HEADLESS_FRAMES);
    while demo.frames() < frames {
        demo.frame(&mut rhi, (args.width, args.height))?;
    }
    rhi.wait_for_gpu()?;
    log::info!(
        "Headless run finished: {} frames, {} presents",
        demo.frames(),
        rhi.present_count()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_run_stops_at_max_frames() {
        let args = AppArgs::try_parse_lenient(["redlilium-app", "--dummy", "--max-frames", "5"])
            .unwrap()
            .0;
        run_headless(&args).unwrap();
    }
}
