//! Backend-agnostic command recording.
//!
//! The RHI records every frame into a [`CommandList`]; backends translate it on
//! submission. Commands hold `Arc`s of the GPU objects they touch, so a resource
//! released while a frame is in flight stays alive until that frame's list is
//! dropped by the frame driver.

use std::sync::Arc;

use crate::backend::{GpuBuffer, GpuPipeline, GpuQueryPool, GpuTexture, GpuTextureView};
use crate::descriptor::DescriptorContents;
use crate::types::{
    ClearColor, IndexFormat, ResourceState, ScissorRect, Subresource, Viewport,
};

/// Resource a barrier applies to.
#[derive(Debug, Clone)]
pub enum BarrierResource {
    /// A buffer.
    Buffer(Arc<GpuBuffer>),
    /// A texture.
    Texture(Arc<GpuTexture>),
}

/// Color attachment of a render pass.
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    /// View rendered into.
    pub view: Arc<GpuTextureView>,
    /// Clear color applied at the start of the pass.
    pub clear: ClearColor,
}

/// Depth attachment of a render pass.
#[derive(Debug, Clone)]
pub struct DepthAttachment {
    /// View rendered into.
    pub view: Arc<GpuTextureView>,
    /// Depth clear value applied at the start of the pass.
    pub clear: f32,
}

/// A single recorded command.
#[derive(Debug, Clone)]
pub enum Command {
    /// State transition barrier.
    Transition {
        resource: BarrierResource,
        subresource: Subresource,
        before: ResourceState,
        after: ResourceState,
        /// Previous contents may be discarded.
        discard: bool,
    },
    /// Makes prior shader writes to the resource visible to later shader reads.
    UavBarrier { resource: BarrierResource },
    /// Opens a named debug region.
    BeginMarker(String),
    /// Closes the innermost debug region.
    EndMarker,
    BeginRenderPass {
        colors: Vec<ColorAttachment>,
        depth: Option<DepthAttachment>,
        width: u32,
        height: u32,
    },
    EndRenderPass,
    SetViewport {
        viewport: Viewport,
        scissor: ScissorRect,
    },
    BindPipeline(Arc<GpuPipeline>),
    BindVertexBuffer {
        buffer: Arc<GpuBuffer>,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: Arc<GpuBuffer>,
        format: IndexFormat,
    },
    /// Binds descriptor contents to a binding of the current pipeline.
    BindDescriptor {
        binding: u32,
        contents: DescriptorContents,
    },
    /// Writes inline constants of the current pipeline.
    PushConstants { offset: u32, data: Vec<u8> },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    Dispatch { x: u32, y: u32, z: u32 },
    CopyBuffer {
        src: Arc<GpuBuffer>,
        dst: Arc<GpuBuffer>,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    /// Copies tightly packed texels into one mip level.
    CopyBufferToTexture {
        src: Arc<GpuBuffer>,
        dst: Arc<GpuTexture>,
        mip: u32,
        width: u32,
        height: u32,
    },
    /// Copies one mip level into a buffer, tightly packed.
    CopyTextureToBuffer {
        src: Arc<GpuTexture>,
        dst: Arc<GpuBuffer>,
        mip: u32,
        width: u32,
        height: u32,
    },
    ResetQueries {
        pool: Arc<GpuQueryPool>,
        first: u32,
        count: u32,
    },
    WriteTimestamp {
        pool: Arc<GpuQueryPool>,
        index: u32,
    },
    /// Copies query results as `u64` values into a buffer.
    ResolveQueries {
        pool: Arc<GpuQueryPool>,
        first: u32,
        count: u32,
        dst: Arc<GpuBuffer>,
        offset: u64,
    },
}

impl Command {
    /// Whether this command is a barrier.
    pub fn is_barrier(&self) -> bool {
        matches!(self, Self::Transition { .. } | Self::UavBarrier { .. })
    }
}

/// Ordered list of recorded commands.
#[derive(Debug, Default)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command.
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Recorded commands in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of transition and UAV barriers.
    pub fn barrier_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_barrier()).count()
    }

    /// Number of commands matching a predicate.
    pub fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        self.commands.iter().filter(|c| predicate(c)).count()
    }

    /// Remove every command, dropping the resources they kept alive.
    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_count() {
        let buffer = Arc::new(GpuBuffer::dummy(16));
        let mut list = CommandList::new();
        list.push(Command::BeginMarker("pass".into()));
        list.push(Command::Transition {
            resource: BarrierResource::Buffer(buffer.clone()),
            subresource: Subresource::All,
            before: ResourceState::Common,
            after: ResourceState::CopySrc,
            discard: false,
        });
        list.push(Command::UavBarrier {
            resource: BarrierResource::Buffer(buffer),
        });
        list.push(Command::EndMarker);

        assert_eq!(list.len(), 4);
        assert_eq!(list.barrier_count(), 2);
        assert_eq!(list.count(|c| matches!(c, Command::EndMarker)), 1);
    }

    #[test]
    fn test_clear_releases_resources() {
        let buffer = Arc::new(GpuBuffer::dummy(16));
        let mut list = CommandList::new();
        list.push(Command::BindVertexBuffer {
            buffer: buffer.clone(),
            offset: 0,
        });
        assert_eq!(Arc::strong_count(&buffer), 2);
        list.clear();
        assert_eq!(Arc::strong_count(&buffer), 1);
        assert!(list.is_empty());
    }
}
