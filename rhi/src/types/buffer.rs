//! Buffer types and descriptors.

/// Minimum constant-buffer alignment carried regardless of what the device reports.
pub const UNIFORM_BUFFER_ALIGNMENT: u64 = 256;

/// How a buffer is used. Decides its heap and its initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferUsage {
    /// Per-vertex data bound with `bind_vertex_buffer`.
    #[default]
    Vertex,
    /// Index data bound with `bind_index_buffer`.
    Index,
    /// Constant data read by shaders. Size is padded to the uniform alignment.
    Uniform,
    /// Structured data read or written by shaders.
    Storage,
    /// Written by the GPU, read back on the CPU.
    Readback,
    /// CPU-written source of copies.
    Staging,
}

/// Memory heap a buffer is allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryHeap {
    /// Host-visible, written by the CPU and read by the GPU.
    Upload,
    /// Device-local, GPU only.
    Default,
    /// Host-visible, written by the GPU and read by the CPU.
    Readback,
}

impl BufferUsage {
    /// Heap buffers of this usage live in.
    pub fn heap(&self) -> MemoryHeap {
        match self {
            Self::Readback => MemoryHeap::Readback,
            _ => MemoryHeap::Upload,
        }
    }

    /// Whether the CPU may write initial data or later updates.
    pub fn is_cpu_writable(&self) -> bool {
        self.heap() == MemoryHeap::Upload
    }

    /// Whether shaders address the buffer through a descriptor.
    pub fn needs_descriptor(&self) -> bool {
        matches!(self, Self::Uniform | Self::Storage)
    }
}

/// Round `value` up to a multiple of `alignment` (a power of two).
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDesc {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size of one element in bytes.
    pub stride: u32,
    /// Number of elements.
    pub element_count: u32,
    /// Usage.
    pub usage: BufferUsage,
}

impl BufferDesc {
    /// Create a buffer descriptor.
    pub fn new(stride: u32, element_count: u32, usage: BufferUsage) -> Self {
        Self {
            label: None,
            stride,
            element_count,
            usage,
        }
    }

    /// Vertex buffer holding `count` elements of type `T`.
    pub fn vertices<T>(count: u32) -> Self {
        Self::new(std::mem::size_of::<T>() as u32, count, BufferUsage::Vertex)
    }

    /// Single-element uniform buffer of type `T`.
    pub fn uniform<T>() -> Self {
        Self::new(std::mem::size_of::<T>() as u32, 1, BufferUsage::Uniform)
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Unpadded size: `stride * element_count`.
    pub fn raw_size(&self) -> u64 {
        self.stride as u64 * self.element_count as u64
    }

    /// Allocation size, with uniform buffers padded to `uniform_alignment`.
    pub fn byte_size(&self, uniform_alignment: u64) -> u64 {
        let raw = self.raw_size();
        if self.usage == BufferUsage::Uniform {
            align_up(raw, uniform_alignment.max(UNIFORM_BUFFER_ALIGNMENT))
        } else {
            raw
        }
    }

    /// Label used in logs and debug names.
    pub fn debug_name(&self) -> &str {
        self.label.as_deref().unwrap_or("buffer")
    }
}

/// Index element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    /// 16-bit indices.
    Uint16,
    /// 32-bit indices.
    #[default]
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }

    /// Index format matching an index buffer's stride.
    pub fn from_stride(stride: u32) -> Option<Self> {
        match stride {
            2 => Some(Self::Uint16),
            4 => Some(Self::Uint32),
            _ => None,
        }
    }
}
