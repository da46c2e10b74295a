//! Descriptor pools.
//!
//! Three fixed-capacity bump allocators, one per [`DescriptorPoolKind`], created once
//! with the [`Device`](crate::Device) and never shrunk. Each allocated index maps to a
//! stable CPU handle (and, for the shader-visible pool, a GPU handle) computed as
//! `base + index * stride`, and to the descriptor contents written for it.
//!
//! Running out of indices is a configuration error: [`DescriptorAllocator::allocate`]
//! panics instead of returning an error.

use std::fmt;
use std::sync::Arc;

use crate::backend::{GpuBuffer, GpuTextureView};

/// The three descriptor pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorPoolKind {
    /// Buffer and texture views addressed by shaders.
    ShaderVisible,
    /// Color attachment views.
    RenderTarget,
    /// Depth attachment views.
    DepthStencil,
}

impl DescriptorPoolKind {
    fn slot(self) -> usize {
        match self {
            Self::ShaderVisible => 0,
            Self::RenderTarget => 1,
            Self::DepthStencil => 2,
        }
    }
}

impl fmt::Display for DescriptorPoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShaderVisible => write!(f, "shader-visible"),
            Self::RenderTarget => write!(f, "render-target"),
            Self::DepthStencil => write!(f, "depth-stencil"),
        }
    }
}

/// Index of an allocated descriptor inside one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorIndex {
    /// Pool the index belongs to.
    pub kind: DescriptorPoolKind,
    /// Position inside the pool.
    pub index: u32,
}

/// CPU-side address of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptorHandle(pub u64);

/// GPU-side address of a shader-visible descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptorHandle(pub u64);

/// What a descriptor points at.
#[derive(Debug, Clone)]
pub enum DescriptorContents {
    /// Constant buffer range.
    UniformBuffer {
        buffer: Arc<GpuBuffer>,
        offset: u64,
        size: u64,
    },
    /// Structured buffer range.
    StorageBuffer {
        buffer: Arc<GpuBuffer>,
        offset: u64,
        size: u64,
        writable: bool,
    },
    /// Sampled texture view.
    SampledTexture(Arc<GpuTextureView>),
    /// Storage texture view.
    StorageTexture(Arc<GpuTextureView>),
    /// Color attachment view.
    RenderTarget(Arc<GpuTextureView>),
    /// Depth attachment view.
    DepthStencil(Arc<GpuTextureView>),
}

impl DescriptorContents {
    /// Texture view behind this descriptor, if any.
    pub fn view(&self) -> Option<&Arc<GpuTextureView>> {
        match self {
            Self::SampledTexture(view)
            | Self::StorageTexture(view)
            | Self::RenderTarget(view)
            | Self::DepthStencil(view) => Some(view),
            Self::UniformBuffer { .. } | Self::StorageBuffer { .. } => None,
        }
    }
}

/// Pool sizes, one per [`DescriptorPoolKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCapacities {
    /// Capacity of the shader-visible pool.
    pub shader_visible: u32,
    /// Capacity of the render-target pool.
    pub render_target: u32,
    /// Capacity of the depth-stencil pool.
    pub depth_stencil: u32,
}

impl Default for PoolCapacities {
    fn default() -> Self {
        Self {
            shader_visible: 4096,
            render_target: 64,
            depth_stencil: 32,
        }
    }
}

/// One fixed-capacity bump pool.
pub struct DescriptorPool {
    kind: DescriptorPoolKind,
    capacity: u32,
    offset: u32,
    stride: u64,
    cpu_base: u64,
    gpu_base: Option<u64>,
    entries: Vec<Option<DescriptorContents>>,
}

impl DescriptorPool {
    /// Create a pool. Only shader-visible pools get a GPU base address.
    pub fn new(kind: DescriptorPoolKind, capacity: u32, stride: u32) -> Self {
        let cpu_base = (kind.slot() as u64 + 1) << 32;
        let gpu_base = (kind == DescriptorPoolKind::ShaderVisible).then_some(0x10_0000_0000u64);
        Self {
            kind,
            capacity,
            offset: 0,
            stride: stride as u64,
            cpu_base,
            gpu_base,
            entries: Vec::with_capacity(capacity as usize),
        }
    }

    /// Pool kind.
    pub fn kind(&self) -> DescriptorPoolKind {
        self.kind
    }

    /// Total number of indices.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of indices handed out so far.
    pub fn allocated(&self) -> u32 {
        self.offset
    }

    /// Hand out the next index.
    ///
    /// # Panics
    ///
    /// Panics when the pool is exhausted.
    pub fn allocate(&mut self) -> DescriptorIndex {
        if self.offset >= self.capacity {
            panic!(
                "{} descriptor pool exhausted ({} descriptors); raise its capacity in RhiConfig",
                self.kind, self.capacity
            );
        }
        let index = self.offset;
        self.offset += 1;
        self.entries.push(None);
        DescriptorIndex {
            kind: self.kind,
            index,
        }
    }

    fn check(&self, index: DescriptorIndex) -> usize {
        assert_eq!(
            index.kind, self.kind,
            "descriptor index from the {} pool used with the {} pool",
            index.kind, self.kind
        );
        assert!(
            index.index < self.offset,
            "descriptor index {} out of range for the {} pool ({} allocated)",
            index.index,
            self.kind,
            self.offset
        );
        index.index as usize
    }

    /// CPU address of an allocated index.
    pub fn cpu_handle(&self, index: DescriptorIndex) -> CpuDescriptorHandle {
        let slot = self.check(index) as u64;
        CpuDescriptorHandle(self.cpu_base + slot * self.stride)
    }

    /// GPU address of an allocated index.
    ///
    /// # Panics
    ///
    /// Panics for pools that are not shader-visible and for unallocated indices.
    pub fn gpu_handle(&self, index: DescriptorIndex) -> GpuDescriptorHandle {
        let slot = self.check(index) as u64;
        let base = self
            .gpu_base
            .unwrap_or_else(|| panic!("the {} pool is not shader-visible", self.kind));
        GpuDescriptorHandle(base + slot * self.stride)
    }

    /// Store contents for an index, replacing what was there.
    pub fn write(&mut self, index: DescriptorIndex, contents: DescriptorContents) {
        let slot = self.check(index);
        self.entries[slot] = Some(contents);
    }

    /// Drop the contents of an index. The index stays allocated.
    pub fn clear(&mut self, index: DescriptorIndex) {
        let slot = self.check(index);
        self.entries[slot] = None;
    }

    /// Contents of an index.
    pub fn get(&self, index: DescriptorIndex) -> Option<&DescriptorContents> {
        let slot = self.check(index);
        self.entries[slot].as_ref()
    }
}

/// Owner of the three pools.
pub struct DescriptorAllocator {
    pools: [DescriptorPool; 3],
}

impl DescriptorAllocator {
    /// Create all pools with the given capacities and handle stride.
    pub fn new(capacities: PoolCapacities, stride: u32) -> Self {
        Self {
            pools: [
                DescriptorPool::new(
                    DescriptorPoolKind::ShaderVisible,
                    capacities.shader_visible,
                    stride,
                ),
                DescriptorPool::new(
                    DescriptorPoolKind::RenderTarget,
                    capacities.render_target,
                    stride,
                ),
                DescriptorPool::new(
                    DescriptorPoolKind::DepthStencil,
                    capacities.depth_stencil,
                    stride,
                ),
            ],
        }
    }

    /// Allocate one index from the given pool.
    ///
    /// # Panics
    ///
    /// Panics when the pool is exhausted.
    pub fn allocate(&mut self, kind: DescriptorPoolKind) -> DescriptorIndex {
        self.pool_mut(kind).allocate()
    }

    /// Allocate an index and write its contents in one step.
    pub fn allocate_with(
        &mut self,
        kind: DescriptorPoolKind,
        contents: DescriptorContents,
    ) -> DescriptorIndex {
        let index = self.allocate(kind);
        self.write(index, contents);
        index
    }

    /// Pool of the given kind.
    pub fn pool(&self, kind: DescriptorPoolKind) -> &DescriptorPool {
        &self.pools[kind.slot()]
    }

    fn pool_mut(&mut self, kind: DescriptorPoolKind) -> &mut DescriptorPool {
        &mut self.pools[kind.slot()]
    }

    /// Store contents for an index.
    pub fn write(&mut self, index: DescriptorIndex, contents: DescriptorContents) {
        self.pool_mut(index.kind).write(index, contents);
    }

    /// Drop the contents of an index.
    pub fn clear(&mut self, index: DescriptorIndex) {
        self.pool_mut(index.kind).clear(index);
    }

    /// Contents of an index.
    pub fn get(&self, index: DescriptorIndex) -> Option<&DescriptorContents> {
        self.pool(index.kind).get(index)
    }

    /// CPU address of an index.
    pub fn cpu_handle(&self, index: DescriptorIndex) -> CpuDescriptorHandle {
        self.pool(index.kind).cpu_handle(index)
    }

    /// GPU address of a shader-visible index.
    pub fn gpu_handle(&self, index: DescriptorIndex) -> GpuDescriptorHandle {
        self.pool(index.kind).gpu_handle(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> PoolCapacities {
        PoolCapacities {
            shader_visible: 4,
            render_target: 2,
            depth_stencil: 1,
        }
    }

    #[test]
    fn test_bump_allocation() {
        let mut allocator = DescriptorAllocator::new(small(), 32);
        let a = allocator.allocate(DescriptorPoolKind::ShaderVisible);
        let b = allocator.allocate(DescriptorPoolKind::ShaderVisible);
        let c = allocator.allocate(DescriptorPoolKind::RenderTarget);
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
        assert_eq!(c.index, 0);
        assert_eq!(allocator.pool(DescriptorPoolKind::ShaderVisible).allocated(), 2);
    }

    #[test]
    fn test_handles_are_base_plus_stride() {
        let mut allocator = DescriptorAllocator::new(small(), 32);
        let a = allocator.allocate(DescriptorPoolKind::ShaderVisible);
        let b = allocator.allocate(DescriptorPoolKind::ShaderVisible);

        let cpu_a = allocator.cpu_handle(a);
        let cpu_b = allocator.cpu_handle(b);
        assert_eq!(cpu_b.0 - cpu_a.0, 32);

        let gpu_a = allocator.gpu_handle(a);
        let gpu_b = allocator.gpu_handle(b);
        assert_eq!(gpu_b.0 - gpu_a.0, 32);

        // Pure computations: repeated calls agree.
        assert_eq!(allocator.cpu_handle(a), cpu_a);
    }

    #[test]
    fn test_pools_do_not_alias() {
        let mut allocator = DescriptorAllocator::new(small(), 32);
        let sv = allocator.allocate(DescriptorPoolKind::ShaderVisible);
        let rt = allocator.allocate(DescriptorPoolKind::RenderTarget);
        assert_ne!(allocator.cpu_handle(sv), allocator.cpu_handle(rt));
    }

    #[test]
    #[should_panic(expected = "shader-visible descriptor pool exhausted")]
    fn test_shader_visible_exhaustion_panics() {
        let mut allocator = DescriptorAllocator::new(small(), 32);
        for _ in 0..5 {
            allocator.allocate(DescriptorPoolKind::ShaderVisible);
        }
    }

    #[test]
    #[should_panic(expected = "depth-stencil descriptor pool exhausted")]
    fn test_depth_stencil_exhaustion_panics() {
        let mut allocator = DescriptorAllocator::new(small(), 32);
        allocator.allocate(DescriptorPoolKind::DepthStencil);
        allocator.allocate(DescriptorPoolKind::DepthStencil);
    }

    #[test]
    #[should_panic(expected = "not shader-visible")]
    fn test_gpu_handle_requires_shader_visible() {
        let mut allocator = DescriptorAllocator::new(small(), 32);
        let rt = allocator.allocate(DescriptorPoolKind::RenderTarget);
        allocator.gpu_handle(rt);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_unallocated_index_panics() {
        let allocator = DescriptorAllocator::new(small(), 32);
        allocator.cpu_handle(DescriptorIndex {
            kind: DescriptorPoolKind::ShaderVisible,
            index: 3,
        });
    }

    #[test]
    fn test_write_and_clear() {
        let mut allocator = DescriptorAllocator::new(small(), 32);
        let index = allocator.allocate(DescriptorPoolKind::ShaderVisible);
        assert!(allocator.get(index).is_none());

        let buffer = Arc::new(GpuBuffer::dummy(256));
        allocator.write(
            index,
            DescriptorContents::UniformBuffer {
                buffer,
                offset: 0,
                size: 256,
            },
        );
        assert!(matches!(
            allocator.get(index),
            Some(DescriptorContents::UniformBuffer { size: 256, .. })
        ));

        allocator.clear(index);
        assert!(allocator.get(index).is_none());
        assert_eq!(allocator.pool(DescriptorPoolKind::ShaderVisible).allocated(), 1);
    }
}
