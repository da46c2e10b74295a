//! GPU backend abstraction layer.
//!
//! Each backend implements [`GpuBackend`]. The RHI core records backend-agnostic
//! [`CommandList`]s and hands them to the backend on submission; GPU objects are
//! returned as enum handles with one variant per backend.
//!
//! # Available Backends
//!
//! - `vulkan-backend` (default): native Vulkan through `ash`
//! - `dummy`: always compiled; records what it is asked to do without a GPU

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub mod dummy;

use std::sync::Arc;

#[cfg(feature = "vulkan-backend")]
use ash::vk;
#[cfg(feature = "vulkan-backend")]
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::command::CommandList;
use crate::error::RhiError;
use crate::pipeline::{DescriptorKind, DrawState, PushConstantRange, StaticSampler};
use crate::shader::VertexLayout;
use crate::types::{
    BufferUsage, ResourceState, ShaderStage, ShaderStages, TextureFormat, TextureUsage,
};

pub use dummy::{DummyBackend, DummyLevel, DummyStats};

/// Which backend to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// The first implemented backend that initializes, falling back to dummy.
    #[default]
    Auto,
    /// Native Vulkan.
    Vulkan,
    /// Recording backend without GPU access.
    Dummy,
}

impl BackendType {
    /// Name used on the command line and in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Vulkan => "vulkan",
            Self::Dummy => "dummy",
        }
    }
}

/// Device limits the core needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendLimits {
    /// Minimum offset alignment for constant buffers.
    pub min_uniform_alignment: u64,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period_ns: f32,
    /// Distance between consecutive descriptor handles.
    pub descriptor_stride: u32,
    /// Largest push constant block in bytes.
    pub max_push_constant_size: u32,
}

/// Handle to a GPU buffer resource.
#[allow(clippy::large_enum_variant)]
pub enum GpuBuffer {
    /// Dummy backend buffer kept in host memory.
    Dummy { data: Mutex<Vec<u8>> },
    /// Vulkan backend buffer
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        buffer: vk::Buffer,
        allocation: Mutex<Option<Allocation>>,
        allocator: Arc<Mutex<Allocator>>,
        size: u64,
    },
}

impl GpuBuffer {
    /// Zero-filled dummy buffer.
    pub fn dummy(size: u64) -> Self {
        Self::Dummy {
            data: Mutex::new(vec![0; size as usize]),
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Dummy { data } => data.lock().len() as u64,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { size, .. } => *size,
        }
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { data } => f
                .debug_struct("GpuBuffer::Dummy")
                .field("size", &data.lock().len())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, size, .. } => f
                .debug_struct("GpuBuffer::Vulkan")
                .field("buffer", buffer)
                .field("size", size)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU texture resource.
#[allow(clippy::large_enum_variant)]
pub enum GpuTexture {
    /// Dummy backend texture with per-mip contents and state.
    Dummy {
        width: u32,
        height: u32,
        format: TextureFormat,
        levels: Mutex<Vec<DummyLevel>>,
    },
    /// Vulkan backend texture. `allocator` is `None` for swapchain images,
    /// which are owned by the swapchain.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        image: vk::Image,
        allocation: Mutex<Option<Allocation>>,
        allocator: Option<Arc<Mutex<Allocator>>>,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        extent: vk::Extent2D,
        mip_levels: u32,
    },
}

impl GpuTexture {
    /// Number of mip levels.
    pub fn mip_count(&self) -> u32 {
        match self {
            Self::Dummy { levels, .. } => levels.lock().len() as u32,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { mip_levels, .. } => *mip_levels,
        }
    }
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy {
                width,
                height,
                format,
                ..
            } => f
                .debug_struct("GpuTexture::Dummy")
                .field("width", width)
                .field("height", height)
                .field("format", format)
                .finish_non_exhaustive(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                image,
                format,
                extent,
                mip_levels,
                ..
            } => f
                .debug_struct("GpuTexture::Vulkan")
                .field("image", image)
                .field("format", format)
                .field("extent", extent)
                .field("mip_levels", mip_levels)
                .finish_non_exhaustive(),
        }
    }
}

/// What a texture view is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// Sampled from shaders.
    Sampled,
    /// Written from shaders.
    Storage,
    /// Color attachment.
    RenderTarget,
    /// Depth attachment.
    DepthStencil,
}

/// Descriptor for creating a texture view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewDesc {
    /// View usage.
    pub kind: ViewKind,
    /// Format the view interprets the texels as.
    pub format: TextureFormat,
    /// First mip level.
    pub base_mip: u32,
    /// Number of mip levels.
    pub mip_count: u32,
}

/// Handle to a texture view. Keeps its texture alive.
pub enum GpuTextureView {
    /// Dummy backend view.
    Dummy {
        texture: Arc<GpuTexture>,
        kind: ViewKind,
        base_mip: u32,
        mip_count: u32,
    },
    /// Vulkan backend image view.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        view: vk::ImageView,
        texture: Arc<GpuTexture>,
        base_mip: u32,
        mip_count: u32,
    },
}

impl GpuTextureView {
    /// Texture the view belongs to.
    pub fn texture(&self) -> &Arc<GpuTexture> {
        match self {
            Self::Dummy { texture, .. } => texture,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { texture, .. } => texture,
        }
    }

    /// First mip level of the view.
    pub fn base_mip(&self) -> u32 {
        match self {
            Self::Dummy { base_mip, .. } => *base_mip,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { base_mip, .. } => *base_mip,
        }
    }

    /// Number of mip levels in the view.
    pub fn mip_count(&self) -> u32 {
        match self {
            Self::Dummy { mip_count, .. } => *mip_count,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { mip_count, .. } => *mip_count,
        }
    }
}

impl std::fmt::Debug for GpuTextureView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy {
                kind,
                base_mip,
                mip_count,
                ..
            } => f
                .debug_struct("GpuTextureView::Dummy")
                .field("kind", kind)
                .field("base_mip", base_mip)
                .field("mip_count", mip_count)
                .finish_non_exhaustive(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                view,
                base_mip,
                mip_count,
                ..
            } => f
                .debug_struct("GpuTextureView::Vulkan")
                .field("view", view)
                .field("base_mip", base_mip)
                .field("mip_count", mip_count)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a compiled pipeline and its binding layout objects.
pub enum GpuPipeline {
    /// Dummy backend pipeline.
    Dummy { label: String, compute: bool },
    /// Vulkan backend pipeline.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        set_layout: vk::DescriptorSetLayout,
        samplers: Vec<vk::Sampler>,
        bind_point: vk::PipelineBindPoint,
        push_stages: vk::ShaderStageFlags,
    },
}

impl std::fmt::Debug for GpuPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { label, compute } => f
                .debug_struct("GpuPipeline::Dummy")
                .field("label", label)
                .field("compute", compute)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                pipeline,
                bind_point,
                ..
            } => f
                .debug_struct("GpuPipeline::Vulkan")
                .field("pipeline", pipeline)
                .field("bind_point", bind_point)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a pool of timestamp queries.
pub enum GpuQueryPool {
    /// Dummy backend queries.
    Dummy { values: Mutex<Vec<u64>> },
    /// Vulkan backend query pool.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pool: vk::QueryPool,
        count: u32,
    },
}

impl std::fmt::Debug for GpuQueryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { values } => f
                .debug_struct("GpuQueryPool::Dummy")
                .field("count", &values.lock().len())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { pool, count, .. } => f
                .debug_struct("GpuQueryPool::Vulkan")
                .field("pool", pool)
                .field("count", count)
                .finish_non_exhaustive(),
        }
    }
}

// ============================================================================
// Vulkan Resource Cleanup (Drop implementations)
// ============================================================================

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let GpuBuffer::Vulkan {
            device,
            buffer,
            allocation,
            allocator,
            ..
        } = self
        {
            if let Some(allocation) = allocation.lock().take()
                && let Err(e) = allocator.lock().free(allocation)
            {
                log::error!("Failed to free buffer memory: {e}");
            }
            unsafe {
                device.destroy_buffer(*buffer, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuTexture {
    fn drop(&mut self) {
        if let GpuTexture::Vulkan {
            device,
            image,
            allocation,
            allocator: Some(allocator),
            ..
        } = self
        {
            if let Some(allocation) = allocation.lock().take()
                && let Err(e) = allocator.lock().free(allocation)
            {
                log::error!("Failed to free texture memory: {e}");
            }
            unsafe {
                device.destroy_image(*image, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuTextureView {
    fn drop(&mut self) {
        if let GpuTextureView::Vulkan { device, view, .. } = self {
            unsafe {
                device.destroy_image_view(*view, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuPipeline {
    fn drop(&mut self) {
        if let GpuPipeline::Vulkan {
            device,
            pipeline,
            layout,
            set_layout,
            samplers,
            ..
        } = self
        {
            unsafe {
                device.destroy_pipeline(*pipeline, None);
                device.destroy_pipeline_layout(*layout, None);
                device.destroy_descriptor_set_layout(*set_layout, None);
                for sampler in samplers.drain(..) {
                    device.destroy_sampler(sampler, None);
                }
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuQueryPool {
    fn drop(&mut self) {
        if let GpuQueryPool::Vulkan { device, pool, .. } = self {
            unsafe {
                device.destroy_query_pool(*pool, None);
            }
        }
    }
}

/// Texture allocation request.
#[derive(Debug, Clone)]
pub struct TextureAlloc<'a> {
    /// Debug name.
    pub label: &'a str,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Storage format (typeless for depth attachments).
    pub format: TextureFormat,
    /// Number of mip levels.
    pub mip_count: u32,
    /// Usage flags.
    pub usage: TextureUsage,
    /// State the core's tag starts in.
    pub initial_state: ResourceState,
}

/// One compiled shader stage.
#[derive(Debug, Clone)]
pub struct CompiledStage {
    /// Stage.
    pub stage: ShaderStage,
    /// Entry point name.
    pub entry_point: String,
    /// SPIR-V words.
    pub spirv: Vec<u32>,
}

/// A descriptor binding of a pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutEntry {
    /// Binding number in group 0.
    pub binding: u32,
    /// Descriptor type.
    pub kind: DescriptorKind,
    /// Stages that read the binding.
    pub visibility: ShaderStages,
}

/// A static sampler baked into a pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerEntry {
    /// Binding number in group 0.
    pub binding: u32,
    /// Sampler configuration.
    pub sampler: StaticSampler,
    /// Stages that sample with it.
    pub visibility: ShaderStages,
}

/// Fixed-function state of a graphics pipeline.
#[derive(Debug, Clone)]
pub struct RasterTarget<'a> {
    /// Vertex buffer layout derived from the vertex stage inputs.
    pub vertex_layout: &'a VertexLayout,
    /// Color attachment formats of the target pass.
    pub color_formats: &'a [TextureFormat],
    /// Depth attachment format of the target pass.
    pub depth_format: Option<TextureFormat>,
    /// Blend, cull and depth state.
    pub state: DrawState,
}

/// Everything a backend needs to build a pipeline object.
#[derive(Debug, Clone)]
pub struct PipelineBuild<'a> {
    /// Debug name.
    pub label: &'a str,
    /// Compiled stages, vertex before fragment.
    pub stages: &'a [CompiledStage],
    /// Descriptor bindings.
    pub entries: Vec<LayoutEntry>,
    /// Static samplers.
    pub samplers: Vec<SamplerEntry>,
    /// Inline constants, if a constant buffer was promoted.
    pub push_constants: Option<PushConstantRange>,
    /// Graphics state; `None` for compute pipelines.
    pub raster: Option<RasterTarget<'a>>,
}

/// Where frames are presented.
#[derive(Debug, Clone, Copy)]
pub enum SurfaceTarget {
    /// A native window.
    Window {
        display: RawDisplayHandle,
        window: RawWindowHandle,
    },
    /// No window. The dummy backend still simulates back buffers.
    Offscreen,
}

/// Presentation surface request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceConfig {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Number of back buffers requested.
    pub image_count: u32,
    /// Wait for vertical blank.
    pub vsync: bool,
}

/// Presentation surface as created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceInfo {
    /// Back buffer format.
    pub format: TextureFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Number of back buffers.
    pub image_count: u32,
}

/// Submission of one buffered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSubmit {
    /// Buffered-frame slot recording resources belong to.
    pub frame_index: usize,
    /// Fence value signaled when the GPU finishes the frame.
    pub fence_value: u64,
    /// Back buffer presented after this submission, if any.
    pub present_image: Option<u32>,
}

/// GPU backend trait for abstracting different GPU APIs.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Name of the selected adapter.
    fn adapter_name(&self) -> String;

    /// Device limits.
    fn limits(&self) -> BackendLimits;

    /// Create a buffer in the heap matching `usage`, mapped when host-visible.
    fn create_buffer(
        &self,
        label: &str,
        size: u64,
        usage: BufferUsage,
    ) -> Result<GpuBuffer, RhiError>;

    /// Copy data into a host-visible buffer.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<(), RhiError>;

    /// Read data from a host-visible buffer.
    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64)
    -> Result<Vec<u8>, RhiError>;

    /// Create a GPU-only 2D texture.
    fn create_texture(&self, desc: &TextureAlloc<'_>) -> Result<GpuTexture, RhiError>;

    /// Create a view of a texture.
    fn create_view(
        &self,
        texture: &Arc<GpuTexture>,
        desc: &ViewDesc,
    ) -> Result<GpuTextureView, RhiError>;

    /// Create a pipeline and its layout objects.
    fn create_pipeline(&self, build: &PipelineBuild<'_>) -> Result<GpuPipeline, RhiError>;

    /// Create a pool of `count` timestamp queries.
    fn create_query_pool(&self, count: u32) -> Result<GpuQueryPool, RhiError>;

    /// Create the presentation surface. Returns `Ok(None)` when the backend
    /// cannot present to `target`.
    fn create_surface(
        &self,
        target: SurfaceTarget,
        config: &SurfaceConfig,
    ) -> Result<Option<SurfaceInfo>, RhiError>;

    /// Back buffers of the current surface.
    fn surface_images(&self) -> Vec<Arc<GpuTexture>>;

    /// Current size of the window behind the surface, if known.
    fn surface_extent(&self) -> Option<(u32, u32)>;

    /// Recreate the surface at a new size. The GPU must be idle.
    fn resize_surface(&self, width: u32, height: u32) -> Result<SurfaceInfo, RhiError>;

    /// Acquire the next back buffer for the given buffered frame.
    fn acquire_image(&self, frame_index: usize) -> Result<u32, RhiError>;

    /// Submit a frame's commands, signaling `submit.fence_value` on completion.
    fn submit(&self, list: &CommandList, submit: &FrameSubmit) -> Result<(), RhiError>;

    /// Present a back buffer. Returns [`RhiError::SurfaceOutdated`] when the
    /// surface must be resized.
    fn present(&self, image_index: u32) -> Result<(), RhiError>;

    /// Last fence value the GPU completed.
    fn completed_fence(&self) -> u64;

    /// Block until the GPU completes `value`.
    fn wait_for_fence(&self, value: u64) -> Result<(), RhiError>;

    /// Submit commands and block until they finish.
    fn execute_immediate(&self, list: &CommandList) -> Result<(), RhiError>;

    /// Block until the GPU is idle.
    fn wait_idle(&self) -> Result<(), RhiError>;
}

/// Creates the requested backend.
///
/// [`BackendType::Auto`] tries Vulkan first and falls back to the dummy backend.
pub fn create_backend(
    backend: BackendType,
    validation: bool,
) -> Result<Arc<dyn GpuBackend>, RhiError> {
    match backend {
        BackendType::Dummy => {
            log::info!("Using dummy backend");
            Ok(Arc::new(DummyBackend::new()))
        }
        BackendType::Vulkan => create_vulkan(validation),
        BackendType::Auto => match create_vulkan(validation) {
            Ok(backend) => Ok(backend),
            Err(e) => {
                log::warn!("Failed to create Vulkan backend: {e}");
                log::info!("Using dummy backend");
                Ok(Arc::new(DummyBackend::new()))
            }
        },
    }
}

#[cfg(feature = "vulkan-backend")]
fn create_vulkan(validation: bool) -> Result<Arc<dyn GpuBackend>, RhiError> {
    let backend = vulkan::VulkanBackend::new(validation)?;
    log::info!("Using Vulkan backend (ash) on {}", backend.adapter_name());
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "vulkan-backend"))]
fn create_vulkan(_validation: bool) -> Result<Arc<dyn GpuBackend>, RhiError> {
    Err(RhiError::InitializationFailed(
        "built without the vulkan-backend feature".to_string(),
    ))
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "vulkan-backend")
}
