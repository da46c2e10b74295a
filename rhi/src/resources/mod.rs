//! GPU resources.
//!
//! Buffers and textures are records in the device's arenas, addressed by
//! generational handles:
//! - [`Buffer`] - GPU memory buffer
//! - [`Texture`] - 2D image with its views and descriptor entries
//!
//! A record lives until its last reference is released. Command lists hold their
//! own `Arc`s of the backend objects, so the GPU memory itself is freed only once
//! no submitted frame uses it.

mod buffer;
mod texture;

pub use buffer::{Buffer, BufferHandle};
pub use texture::{Texture, TextureDescriptors, TextureHandle, TextureViews};

/// Any resource with a state tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Buffer(BufferHandle),
    Texture(TextureHandle),
}

impl From<BufferHandle> for ResourceId {
    fn from(handle: BufferHandle) -> Self {
        Self::Buffer(handle)
    }
}

impl From<TextureHandle> for ResourceId {
    fn from(handle: TextureHandle) -> Self {
        Self::Texture(handle)
    }
}
