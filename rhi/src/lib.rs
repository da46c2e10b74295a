//! # RedLilium RHI
//!
//! Render hardware interface of the RedLilium engine: a thin layer over the GPU
//! API that owns devices, resources, pipelines and render passes, and drives a
//! double-buffered frame loop.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Rhi`] - The rendering context: frame recording, binding and presentation
//! - [`Device`] - Resource factory with descriptor pools and state tracking
//! - [`GpuBackend`] - Trait for backend implementations
//! - Multiple backend support: Vulkan and Dummy (for testing)
//!
//! ## Frame Structure
//!
//! ```text
//! begin_render ─► begin_render_pass ─► bind_pipeline ─► bind_parameter ─► draw
//!       ▲                                                                  │
//!       │           render ◄─ end_render ◄─ end_render_pass ◄──────────────┘
//!       │             │
//!       └─ wait N-1 ◄─┴─ submit, signal fence, present
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use redlilium_rhi::{DummyBackend, RenderPassDesc, Rhi, RhiConfig, SurfaceTarget};
//!
//! let mut rhi = Rhi::with_backend(
//!     Arc::new(DummyBackend::new()),
//!     &RhiConfig::default(),
//!     SurfaceTarget::Offscreen,
//!     640,
//!     480,
//! )?;
//! let pass = rhi.create_render_pass(&RenderPassDesc::swapchain(640, 480))?;
//!
//! rhi.begin_render()?;
//! rhi.begin_render_pass(pass)?;
//! rhi.end_render_pass()?;
//! rhi.end_render()?;
//! rhi.render()?;
//! assert_eq!(rhi.present_count(), 1);
//! # Ok::<(), redlilium_rhi::RhiError>(())
//! ```

pub mod arena;
pub mod backend;
pub mod binding;
pub mod command;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod mips;
pub mod pipeline;
pub mod profiling;
pub mod render_pass;
pub mod resources;
pub mod shader;
pub mod timer;
pub mod types;

// Re-export main types for convenience
pub use arena::Handle;
pub use backend::{
    BackendLimits, BackendType, DummyBackend, DummyStats, GpuBackend, SurfaceInfo, SurfaceTarget,
    create_backend, has_gpu_backend,
};
pub use binding::Parameter;
pub use config::RhiConfig;
pub use context::Rhi;
pub use descriptor::{DescriptorIndex, DescriptorPoolKind, PoolCapacities};
pub use device::Device;
pub use error::RhiError;
pub use frame::FrameOutcome;
pub use pipeline::{
    BindingLayout, BlendMode, CompareFunction, CullMode, DrawState, PipelineDesc,
    PipelineHandle, PrimitiveTopology,
};
pub use render_pass::{MAX_ATTACHMENTS, RenderPassDesc, RenderPassHandle};
pub use resources::{BufferHandle, TextureHandle};
pub use shader::ShaderSource;
pub use timer::GpuTimer;
pub use types::{
    BufferDesc, BufferUsage, ClearColor, ResourceState, TextureDesc, TextureFormat, TextureUsage,
};

/// Number of frames the CPU may record ahead of the GPU.
pub const BUFFERED_FRAMES: usize = 2;

/// RHI library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
