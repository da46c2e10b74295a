//! GPU memory allocator integration using gpu-allocator.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};

use crate::error::RhiError;
use crate::types::MemoryHeap;

/// Create a memory allocator for the Vulkan device.
pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> Result<Allocator, RhiError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| RhiError::InitializationFailed(format!("Failed to create memory allocator: {e}")))
}

/// Memory location of a heap.
pub fn memory_location(heap: MemoryHeap) -> MemoryLocation {
    match heap {
        MemoryHeap::Upload => MemoryLocation::CpuToGpu,
        MemoryHeap::Default => MemoryLocation::GpuOnly,
        MemoryHeap::Readback => MemoryLocation::GpuToCpu,
    }
}

/// Map an allocation failure to an RHI error.
pub fn allocation_error(what: &str, error: gpu_allocator::AllocationError) -> RhiError {
    match error {
        gpu_allocator::AllocationError::OutOfMemory => RhiError::OutOfMemory,
        other => RhiError::Internal(format!("Failed to allocate {what}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_locations() {
        assert_eq!(memory_location(MemoryHeap::Upload), MemoryLocation::CpuToGpu);
        assert_eq!(memory_location(MemoryHeap::Readback), MemoryLocation::GpuToCpu);
    }

    #[test]
    fn test_out_of_memory_maps_to_rhi_error() {
        assert_eq!(
            allocation_error("buffer", gpu_allocator::AllocationError::OutOfMemory),
            RhiError::OutOfMemory
        );
    }
}
