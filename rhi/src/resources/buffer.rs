//! GPU buffer resource.

use std::sync::Arc;

use crate::arena::Handle;
use crate::backend::GpuBuffer;
use crate::descriptor::{DescriptorContents, DescriptorIndex};
use crate::types::{BufferDesc, BufferUsage, ResourceState};

/// Handle to a [`Buffer`] owned by the device.
pub type BufferHandle = Handle<Buffer>;

/// A GPU buffer record.
///
/// Buffers are created by [`Device::create_buffer`](crate::Device::create_buffer) with
/// their final size. Host-visible buffers stay mapped for their whole lifetime.
pub struct Buffer {
    pub(crate) desc: BufferDesc,
    pub(crate) size: u64,
    pub(crate) gpu: Arc<GpuBuffer>,
    pub(crate) state: ResourceState,
    pub(crate) descriptor: Option<DescriptorIndex>,
}

impl Buffer {
    /// Get the buffer descriptor.
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    /// Allocated size in bytes, including uniform padding.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes per element.
    pub fn stride(&self) -> u32 {
        self.desc.stride
    }

    /// Number of elements.
    pub fn element_count(&self) -> u32 {
        self.desc.element_count
    }

    /// Usage.
    pub fn usage(&self) -> BufferUsage {
        self.desc.usage
    }

    /// Current state tag.
    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Shader-visible descriptor of uniform and storage buffers.
    pub fn descriptor(&self) -> Option<DescriptorIndex> {
        self.descriptor
    }

    /// Backend object.
    pub fn gpu(&self) -> &Arc<GpuBuffer> {
        &self.gpu
    }

    /// What a descriptor of this buffer points at.
    pub(crate) fn contents(&self, writable: bool) -> DescriptorContents {
        match self.desc.usage {
            BufferUsage::Uniform => DescriptorContents::UniformBuffer {
                buffer: self.gpu.clone(),
                offset: 0,
                size: self.size,
            },
            _ => DescriptorContents::StorageBuffer {
                buffer: self.gpu.clone(),
                offset: 0,
                size: self.size,
                writable,
            },
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("label", &self.desc.label)
            .field("size", &self.size)
            .field("usage", &self.desc.usage)
            .field("state", &self.state)
            .finish()
    }
}

static_assertions::assert_impl_all!(Buffer: Send, Sync);
