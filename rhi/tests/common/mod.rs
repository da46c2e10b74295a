//! Common utilities for RHI integration tests.
//!
//! This module provides shared test infrastructure that can be reused
//! across different backend implementations.

use std::path::PathBuf;
use std::sync::Arc;

use redlilium_rhi::{
    BackendType, DummyBackend, DummyStats, Rhi, RhiConfig, SurfaceTarget, create_backend,
};

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available GPU backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dummy backend (no actual GPU operations).
    Dummy,
    /// Vulkan backend (native via ash).
    Vulkan,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            Backend::Vulkan => cfg!(feature = "vulkan-backend"),
        }
    }

    /// Get the backend name for display.
    #[allow(dead_code)]
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Dummy => "dummy",
            Backend::Vulkan => "vulkan",
        }
    }

    fn backend_type(self) -> BackendType {
        match self {
            Backend::Dummy => BackendType::Dummy,
            Backend::Vulkan => BackendType::Vulkan,
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// An offscreen context on one backend.
pub struct TestContext {
    pub rhi: Rhi,
    /// Set when running on the dummy backend, for call statistics.
    pub dummy: Option<Arc<DummyBackend>>,
}

impl TestContext {
    /// Create a context with default configuration.
    ///
    /// Returns `None` when the backend is unavailable on this machine.
    pub fn new(backend: Backend) -> Option<Self> {
        Self::with_config(backend, RhiConfig::default())
    }

    /// Create a context with a custom configuration.
    pub fn with_config(backend: Backend, config: RhiConfig) -> Option<Self> {
        if !backend.is_available() {
            return None;
        }
        let config = config.with_backend(backend.backend_type());

        let (gpu, dummy) = match backend {
            Backend::Dummy => {
                let dummy = Arc::new(DummyBackend::new());
                (dummy.clone() as Arc<dyn redlilium_rhi::GpuBackend>, Some(dummy))
            }
            Backend::Vulkan => match create_backend(config.backend, config.validation) {
                Ok(gpu) => (gpu, None),
                Err(e) => {
                    eprintln!("Skipping: {} backend failed to initialize: {e}", backend.name());
                    return None;
                }
            },
        };

        let rhi = Rhi::with_backend(gpu, &config, SurfaceTarget::Offscreen, 1600, 900).ok()?;
        Some(Self { rhi, dummy })
    }

    /// Dummy backend statistics, if running on the dummy backend.
    #[allow(dead_code)]
    pub fn stats(&self) -> Option<DummyStats> {
        self.dummy.as_ref().map(|d| d.stats())
    }
}

/// A scratch shader root unique to one test.
#[allow(dead_code)]
pub fn scratch_shader_root(test: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!(
        "redlilium-rhi-{test}-{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&root).expect("create scratch shader root");
    root
}

/// Full-screen triangle shader with a texture, a sampler and a uniform block.
#[allow(dead_code)]
pub const BLIT_SHADER: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var linear_clamp: sampler;

struct Tint {
    color: vec4<f32>,
    exposure: vec4<f32>,
    offsets: array<vec4<f32>, 8>,
}
@group(0) @binding(2) var<uniform> tint: Tint;

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VsOut {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VsOut;
    out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let offset = tint.offsets[0].xy;
    return textureSample(source, linear_clamp, in.uv + offset) * tint.color * tint.exposure.x;
}
"#;

/// Minimal triangle with no resources.
#[allow(dead_code)]
pub const TRIANGLE_SHADER: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(index) - 1);
    let y = f32(i32(index & 1u) * 2 - 1);
    return vec4<f32>(x * 0.5, y * 0.5, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.5, 0.0, 1.0);
}
"#;
