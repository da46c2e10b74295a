//! # RedLilium App
//!
//! Windowed host for the RedLilium RHI: command line parsing, the winit event
//! loop and a triangle demo that exercises the whole frame path.
//!
//! ## Overview
//!
//! - [`AppArgs`] - Command line arguments (`--vulkan`, `--dummy`, ...)
//! - [`App`] - Window, event loop and graphics context
//! - [`TriangleDemo`] - One swapchain pass and one draw per frame
//!
//! ## Example
//!
//! ```no_run
//! use redlilium_app::{App, AppArgs};
//!
//! let args = AppArgs::parse();
//! App::run(args).unwrap();
//! ```

pub mod app;
pub mod args;
pub mod demo;

pub use app::{App, run_headless};
pub use args::AppArgs;
pub use demo::TriangleDemo;

/// App library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library versions.
pub fn init() {
    log::info!(
        "RedLilium App v{} (RHI v{}) initialized",
        VERSION,
        redlilium_rhi::VERSION
    );
}
