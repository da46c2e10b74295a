//! GPU texture resource.

use std::sync::Arc;

use crate::arena::Handle;
use crate::backend::{GpuTexture, GpuTextureView};
use crate::descriptor::DescriptorIndex;
use crate::types::{ResourceState, TextureDesc, TextureFormat};

/// Handle to a [`Texture`] owned by the device.
pub type TextureHandle = Handle<Texture>;

/// Views of a texture, one per way it can be bound.
#[derive(Debug, Clone, Default)]
pub struct TextureViews {
    /// Whole mip chain, sampled. Absent only for back buffers.
    pub sampled: Option<Arc<GpuTextureView>>,
    /// Mip 0, writable from shaders.
    pub storage: Option<Arc<GpuTextureView>>,
    /// Mip 0 as a color attachment.
    pub render_target: Option<Arc<GpuTextureView>>,
    /// Mip 0 as a depth attachment.
    pub depth_stencil: Option<Arc<GpuTextureView>>,
}

/// Descriptor-pool entries of a texture. They outlive attachment recreation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureDescriptors {
    /// Shader-resource view.
    pub srv: Option<DescriptorIndex>,
    /// Unordered-access view.
    pub uav: Option<DescriptorIndex>,
    /// Render-target view.
    pub rtv: Option<DescriptorIndex>,
    /// Depth-stencil view.
    pub dsv: Option<DescriptorIndex>,
}

/// A GPU texture record.
pub struct Texture {
    pub(crate) desc: TextureDesc,
    pub(crate) mip_count: u32,
    /// Format of the allocation; typeless for depth textures.
    pub(crate) storage_format: TextureFormat,
    pub(crate) gpu: Arc<GpuTexture>,
    pub(crate) state: ResourceState,
    /// No transition was recorded since the allocation was made.
    pub(crate) fresh: bool,
    pub(crate) views: TextureViews,
    pub(crate) descriptors: TextureDescriptors,
    pub(crate) back_buffer: bool,
}

impl Texture {
    /// Get the texture descriptor.
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.desc.height
    }

    /// Declared format.
    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    /// Format of the underlying allocation.
    pub fn storage_format(&self) -> TextureFormat {
        self.storage_format
    }

    /// Number of mip levels.
    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    /// Current state tag.
    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Views.
    pub fn views(&self) -> &TextureViews {
        &self.views
    }

    /// Descriptor-pool entries.
    pub fn descriptors(&self) -> TextureDescriptors {
        self.descriptors
    }

    /// Whether this is a presentation surface image.
    pub fn is_back_buffer(&self) -> bool {
        self.back_buffer
    }

    /// Backend object.
    pub fn gpu(&self) -> &Arc<GpuTexture> {
        &self.gpu
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("label", &self.desc.label)
            .field("width", &self.desc.width)
            .field("height", &self.desc.height)
            .field("format", &self.desc.format)
            .field("mip_count", &self.mip_count)
            .field("state", &self.state)
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);
