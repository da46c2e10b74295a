//! Common types and descriptors for GPU resources.
//!
//! Format enums, usage kinds, resource states and the descriptor structs passed
//! to the resource factories.

mod buffer;
mod common;
mod state;
mod texture;

pub use buffer::{
    BufferDesc, BufferUsage, IndexFormat, MemoryHeap, UNIFORM_BUFFER_ALIGNMENT, align_up,
};
pub use common::{ClearColor, ScissorRect, ShaderStage, ShaderStages, Viewport};
pub use state::{ReadScope, ResourceState, Subresource};
pub use texture::{
    DepthFormatSplit, TextureDesc, TextureFormat, TextureUsage, full_mip_count, mip_extent,
};
