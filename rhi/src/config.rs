//! RHI configuration.

use std::path::PathBuf;

use crate::backend::BackendType;
use crate::descriptor::{DescriptorPoolKind, PoolCapacities};

/// Parameters for creating an [`Rhi`](crate::Rhi) or a [`Device`](crate::Device).
///
/// # Example
///
/// ```
/// use redlilium_rhi::{BackendType, DescriptorPoolKind, RhiConfig};
///
/// let config = RhiConfig::new()
///     .with_backend(BackendType::Dummy)
///     .with_shader_root("assets/shaders")
///     .with_pool_capacity(DescriptorPoolKind::ShaderVisible, 1024);
/// assert_eq!(config.pool_capacities.shader_visible, 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RhiConfig {
    /// Backend to create.
    pub backend: BackendType,
    /// Enable API validation layers.
    pub validation: bool,
    /// Directory shader programs are read from.
    pub shader_root: PathBuf,
    /// Write per-stage SPIR-V under `<shader_root>/intermediate/`.
    pub shader_intermediates: bool,
    /// Descriptor pool sizes.
    pub pool_capacities: PoolCapacities,
    /// Wait for vertical blank when presenting.
    pub vsync: bool,
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Auto,
            validation: cfg!(debug_assertions),
            shader_root: PathBuf::from("shaders"),
            shader_intermediates: false,
            pool_capacities: PoolCapacities::default(),
            vsync: true,
        }
    }
}

impl RhiConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the backend.
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the shader directory.
    pub fn with_shader_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.shader_root = root.into();
        self
    }

    /// Enable or disable writing SPIR-V intermediates.
    pub fn with_shader_intermediates(mut self, enabled: bool) -> Self {
        self.shader_intermediates = enabled;
        self
    }

    /// Set the capacity of one descriptor pool.
    pub fn with_pool_capacity(mut self, kind: DescriptorPoolKind, capacity: u32) -> Self {
        match kind {
            DescriptorPoolKind::ShaderVisible => self.pool_capacities.shader_visible = capacity,
            DescriptorPoolKind::RenderTarget => self.pool_capacities.render_target = capacity,
            DescriptorPoolKind::DepthStencil => self.pool_capacities.depth_stencil = capacity,
        }
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RhiConfig::default();
        assert_eq!(config.backend, BackendType::Auto);
        assert_eq!(config.shader_root, PathBuf::from("shaders"));
        assert_eq!(config.pool_capacities.render_target, 64);
        assert_eq!(config.pool_capacities.depth_stencil, 32);
        assert!(config.vsync);
    }

    #[test]
    fn test_builder() {
        let config = RhiConfig::new()
            .with_backend(BackendType::Vulkan)
            .with_validation(true)
            .with_shader_intermediates(true)
            .with_pool_capacity(DescriptorPoolKind::DepthStencil, 4)
            .with_vsync(false);
        assert_eq!(config.backend, BackendType::Vulkan);
        assert!(config.validation);
        assert!(config.shader_intermediates);
        assert_eq!(config.pool_capacities.depth_stencil, 4);
        assert!(!config.vsync);
    }
}
