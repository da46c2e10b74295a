//! Graphics device.
//!
//! The [`Device`] owns the backend, the three descriptor pools and the arenas every
//! resource, pipeline and render pass lives in. Resources are addressed by
//! generational handles; the device is the only place their state tags change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::arena::{Arena, Handle};
use crate::backend::{
    BackendLimits, GpuBackend, GpuTexture, GpuTextureView, SurfaceInfo, TextureAlloc, ViewDesc,
    ViewKind,
};
use crate::command::{BarrierResource, Command, CommandList};
use crate::config::RhiConfig;
use crate::descriptor::{
    DescriptorAllocator, DescriptorContents, DescriptorIndex, DescriptorPoolKind,
};
use crate::error::RhiError;
use crate::pipeline::{Pipeline, PipelineHandle};
use crate::profiling::profile_scope;
use crate::render_pass::{RenderPass, RenderPassHandle};
use crate::resources::{
    Buffer, BufferHandle, ResourceId, Texture, TextureDescriptors, TextureHandle, TextureViews,
};
use crate::types::{
    BufferDesc, BufferUsage, ResourceState, Subresource, TextureDesc, TextureFormat, TextureUsage,
    mip_extent,
};

pub(crate) fn stale<T>(kind: &str, handle: Handle<T>) -> RhiError {
    RhiError::invalid(format!("stale or unknown {kind} handle {handle:?}"))
}

/// The GPU device: resource factory, state tracker and owner of the descriptor pools.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use redlilium_rhi::{BufferDesc, BufferUsage, Device, DummyBackend, RhiConfig};
///
/// let mut device = Device::new(Arc::new(DummyBackend::new()), &RhiConfig::default());
/// let buffer = device
///     .create_buffer(&BufferDesc::new(4, 3, BufferUsage::Uniform), None)
///     .unwrap();
/// assert_eq!(device.buffer(buffer).unwrap().size(), 256);
/// ```
pub struct Device {
    limits: BackendLimits,
    pub(crate) descriptors: DescriptorAllocator,
    pub(crate) buffers: Arena<Buffer>,
    pub(crate) textures: Arena<Texture>,
    pub(crate) pipelines: Arena<Pipeline>,
    pub(crate) render_passes: Arena<RenderPass>,
    pub(crate) shader_root: PathBuf,
    pub(crate) shader_intermediates: bool,
    pub(crate) mip_pipelines: HashMap<TextureFormat, PipelineHandle>,
    /// One record per presentation image, shared by every swapchain pass.
    pub(crate) back_buffers: Vec<TextureHandle>,
    /// A frame's commands are recorded but not yet submitted.
    pub(crate) frame_open: bool,
    // Dropped last so every GPU object above is destroyed while the backend is alive.
    backend: Arc<dyn GpuBackend>,
}

impl Device {
    /// Create a device on top of a backend.
    pub fn new(backend: Arc<dyn GpuBackend>, config: &RhiConfig) -> Self {
        let limits = backend.limits();
        log::info!(
            "Device: {} on {} (descriptor stride {}, uniform alignment {})",
            backend.name(),
            backend.adapter_name(),
            limits.descriptor_stride,
            limits.min_uniform_alignment
        );

        Self {
            limits,
            descriptors: DescriptorAllocator::new(config.pool_capacities, limits.descriptor_stride),
            buffers: Arena::new(),
            textures: Arena::new(),
            pipelines: Arena::new(),
            render_passes: Arena::new(),
            shader_root: config.shader_root.clone(),
            shader_intermediates: config.shader_intermediates,
            mip_pipelines: HashMap::new(),
            back_buffers: Vec::new(),
            frame_open: false,
            backend,
        }
    }

    /// The backend.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// Device limits.
    pub fn limits(&self) -> BackendLimits {
        self.limits
    }

    /// The descriptor pools.
    pub fn descriptors(&self) -> &DescriptorAllocator {
        &self.descriptors
    }

    /// Directory shader programs are read from.
    pub fn shader_root(&self) -> &Path {
        &self.shader_root
    }

    /// Look up a buffer.
    pub fn buffer(&self, handle: BufferHandle) -> Option<&Buffer> {
        self.buffers.get(handle)
    }

    /// Look up a texture.
    pub fn texture(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(handle)
    }

    /// Look up a pipeline.
    pub fn pipeline(&self, handle: PipelineHandle) -> Option<&Pipeline> {
        self.pipelines.get(handle)
    }

    /// Look up a render pass.
    pub fn render_pass(&self, handle: RenderPassHandle) -> Option<&RenderPass> {
        self.render_passes.get(handle)
    }

    pub(crate) fn buffer_ref(&self, handle: BufferHandle) -> Result<&Buffer, RhiError> {
        self.buffers.get(handle).ok_or_else(|| stale("buffer", handle))
    }

    pub(crate) fn texture_ref(&self, handle: TextureHandle) -> Result<&Texture, RhiError> {
        self.textures.get(handle).ok_or_else(|| stale("texture", handle))
    }

    /// Back buffer records of the presentation surface, one per image.
    pub fn back_buffers(&self) -> &[TextureHandle] {
        &self.back_buffers
    }

    /// Fail calls that execute on the GPU right away while a frame is open.
    ///
    /// The state tags of an open frame describe the end of its recording, which
    /// the GPU has not reached yet.
    pub(crate) fn check_no_open_frame(&self, call: &str) -> Result<(), RhiError> {
        if self.frame_open {
            return Err(RhiError::invalid(format!(
                "{call} executes immediately and cannot run while a frame is open; \
                 call it before begin_render or after render"
            )));
        }
        Ok(())
    }

    pub(crate) fn texture_mut(&mut self, handle: TextureHandle) -> Result<&mut Texture, RhiError> {
        self.textures
            .get_mut(handle)
            .ok_or_else(|| stale("texture", handle))
    }

    /// Reserve one descriptor for a collaborator that manages its contents itself,
    /// such as an editor overlay.
    pub fn reserve_descriptor_slot(&mut self, kind: DescriptorPoolKind) -> DescriptorIndex {
        self.descriptors.allocate(kind)
    }

    // ------------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------------

    /// Create a buffer, optionally filled with `data`.
    ///
    /// Uniform buffers are padded to the constant-buffer alignment. Uniform and
    /// storage buffers get a shader-visible descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidParameter`] for a zero stride or element count,
    /// initial data for a read-back buffer, or data larger than the buffer.
    pub fn create_buffer(
        &mut self,
        desc: &BufferDesc,
        data: Option<&[u8]>,
    ) -> Result<BufferHandle, RhiError> {
        profile_scope!("create_buffer");

        if desc.stride == 0 || desc.element_count == 0 {
            return Err(RhiError::invalid(format!(
                "buffer '{}' has zero size ({} x {})",
                desc.debug_name(),
                desc.stride,
                desc.element_count
            )));
        }
        if data.is_some() && !desc.usage.is_cpu_writable() {
            return Err(RhiError::invalid(format!(
                "read-back buffer '{}' cannot receive initial data",
                desc.debug_name()
            )));
        }

        let size = desc.byte_size(self.limits.min_uniform_alignment);
        if let Some(data) = data
            && data.len() as u64 > size
        {
            return Err(RhiError::invalid(format!(
                "initial data of {} bytes exceeds buffer '{}' of {size} bytes",
                data.len(),
                desc.debug_name()
            )));
        }

        let gpu = Arc::new(
            self.backend
                .create_buffer(desc.debug_name(), size, desc.usage)?,
        );
        if let Some(data) = data {
            self.backend.write_buffer(&gpu, 0, data)?;
        }

        let state = match desc.usage {
            BufferUsage::Readback => ResourceState::CopyDst,
            BufferUsage::Storage => ResourceState::UnorderedAccess,
            _ => ResourceState::Common,
        };
        let mut buffer = Buffer {
            desc: desc.clone(),
            size,
            gpu,
            state,
            descriptor: None,
        };
        if desc.usage.needs_descriptor() {
            let contents = buffer.contents(desc.usage == BufferUsage::Storage);
            buffer.descriptor = Some(
                self.descriptors
                    .allocate_with(DescriptorPoolKind::ShaderVisible, contents),
            );
        }

        log::trace!(
            "Device: created buffer '{}' ({size} bytes, {:?})",
            desc.debug_name(),
            desc.usage
        );
        Ok(self.buffers.insert(buffer))
    }

    /// Write into a host-visible buffer through its mapping.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidParameter`] for read-back buffers, stale handles and
    /// writes past the end.
    pub fn write_buffer(
        &self,
        handle: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), RhiError> {
        let buffer = self.buffer_ref(handle)?;
        if !buffer.desc.usage.is_cpu_writable() {
            return Err(RhiError::invalid(format!(
                "buffer '{}' is a read-back buffer and is written by the GPU",
                buffer.desc.debug_name()
            )));
        }
        self.backend.write_buffer(&buffer.gpu, offset, data)
    }

    /// Read from a host-visible buffer.
    ///
    /// The caller is responsible for waiting on the frame that wrote it.
    pub fn read_buffer(
        &self,
        handle: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, RhiError> {
        let buffer = self.buffer_ref(handle)?;
        self.backend.read_buffer(&buffer.gpu, offset, size)
    }

    /// Add a reference to a buffer.
    pub fn retain_buffer(&mut self, handle: BufferHandle) -> bool {
        self.buffers.retain(handle)
    }

    /// Drop a reference to a buffer; the last one destroys it.
    pub fn release_buffer(&mut self, handle: BufferHandle) {
        if let Some(buffer) = self.buffers.release(handle) {
            if let Some(index) = buffer.descriptor {
                self.descriptors.clear(index);
            }
            log::trace!("Device: released buffer '{}'", buffer.desc.debug_name());
        }
    }

    // ------------------------------------------------------------------
    // Textures
    // ------------------------------------------------------------------

    fn validate_texture(&self, desc: &TextureDesc, data: Option<&[u8]>) -> Result<(), RhiError> {
        let name = desc.debug_name();
        if desc.width == 0 || desc.height == 0 {
            return Err(RhiError::invalid(format!(
                "texture '{name}' has zero size ({}x{})",
                desc.width, desc.height
            )));
        }
        if desc.format.is_typeless() {
            return Err(RhiError::invalid(format!(
                "texture '{name}' cannot be created with typeless format {:?}",
                desc.format
            )));
        }
        let depth = desc.format.is_depth_stencil();
        if depth && (desc.is_storage() || desc.generate_mips || data.is_some()) {
            return Err(RhiError::invalid(format!(
                "depth texture '{name}' cannot be storage, mipmapped or initialized with data"
            )));
        }
        if desc.usage.contains(TextureUsage::DEPTH_STENCIL) != depth {
            return Err(RhiError::invalid(format!(
                "texture '{name}': depth-stencil usage requires a depth format and vice versa"
            )));
        }
        if desc.usage.contains(TextureUsage::STORAGE) && desc.format.storage_texel_name().is_none()
        {
            return Err(RhiError::invalid(format!(
                "texture '{name}': format {:?} cannot be written from shaders",
                desc.format
            )));
        }
        if desc.generate_mips && desc.format.mip_storage_format().is_none() {
            return Err(RhiError::invalid(format!(
                "texture '{name}': mip generation needs a shader-writable format, not {:?}",
                desc.format
            )));
        }
        if let Some(data) = data {
            let expected = desc.width as u64 * desc.height as u64 * desc.format.block_size() as u64;
            if data.len() as u64 != expected {
                return Err(RhiError::invalid(format!(
                    "texture '{name}' expects {expected} bytes of pixel data, got {}",
                    data.len()
                )));
            }
        }
        Ok(())
    }

    /// Create a 2D texture, optionally uploading `data` into mip 0 and generating
    /// the rest of the mip chain.
    ///
    /// The texture ends in [`ResourceState::UnorderedAccess`] when it is a storage
    /// texture and in [`ResourceState::SHADER_READ`] otherwise. Creation blocks
    /// until the upload and mip generation finished on the GPU.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidParameter`] for zero sizes, pixel data of the
    /// wrong length and usages the format does not support.
    pub fn create_texture(
        &mut self,
        desc: &TextureDesc,
        data: Option<&[u8]>,
    ) -> Result<TextureHandle, RhiError> {
        profile_scope!("create_texture");

        self.validate_texture(desc, data)?;
        let handle = self.allocate_texture(desc)?;
        if let Err(e) = self.initialize_texture(handle, desc, data) {
            self.release_texture(handle);
            return Err(e);
        }

        log::debug!(
            "Device: created texture '{}' ({}x{}, {:?}, {} mips)",
            desc.debug_name(),
            desc.width,
            desc.height,
            desc.format,
            desc.mip_count()
        );
        Ok(handle)
    }

    fn initialize_texture(
        &mut self,
        handle: TextureHandle,
        desc: &TextureDesc,
        data: Option<&[u8]>,
    ) -> Result<(), RhiError> {
        let mut list = CommandList::new();
        list.push(Command::BeginMarker(format!("create {}", desc.debug_name())));

        if let Some(data) = data {
            self.ensure_state(&mut list, handle, ResourceState::CopyDst)?;
            let staging = Arc::new(self.backend.create_buffer(
                "texture staging",
                data.len() as u64,
                BufferUsage::Staging,
            )?);
            self.backend.write_buffer(&staging, 0, data)?;
            list.push(Command::CopyBufferToTexture {
                src: staging,
                dst: self.texture_ref(handle)?.gpu.clone(),
                mip: 0,
                width: desc.width,
                height: desc.height,
            });
        }

        if desc.generate_mips && desc.mip_count() > 1 {
            self.generate_mips(&mut list, handle)?;
        }

        let steady = if desc.is_storage() {
            ResourceState::UnorderedAccess
        } else {
            ResourceState::SHADER_READ
        };
        self.ensure_state(&mut list, handle, steady)?;
        list.push(Command::EndMarker);

        self.backend.execute_immediate(&list)
    }

    fn create_view(
        &self,
        texture: &Arc<GpuTexture>,
        kind: ViewKind,
        format: TextureFormat,
        mip_count: u32,
    ) -> Result<Arc<GpuTextureView>, RhiError> {
        let view = self.backend.create_view(
            texture,
            &ViewDesc {
                kind,
                format,
                base_mip: 0,
                mip_count,
            },
        )?;
        Ok(Arc::new(view))
    }

    /// Allocate the GPU image and its views for `desc`.
    fn create_texture_objects(
        &self,
        desc: &TextureDesc,
    ) -> Result<(Arc<GpuTexture>, TextureViews, TextureFormat), RhiError> {
        let mip_count = desc.mip_count();
        let split = desc.format.depth_split();
        let storage_format = split.map_or(desc.format, |s| s.storage);

        let mut usage = desc.usage | TextureUsage::SAMPLED | TextureUsage::COPY_SRC;
        if split.is_none() {
            usage |= TextureUsage::COPY_DST;
        }
        if desc.generate_mips {
            usage |= TextureUsage::STORAGE;
        }

        let gpu = Arc::new(self.backend.create_texture(&TextureAlloc {
            label: desc.debug_name(),
            width: desc.width,
            height: desc.height,
            format: storage_format,
            mip_count,
            usage,
            initial_state: ResourceState::Common,
        })?);

        let sampled_format = split.map_or(desc.format, |s| s.sampled);
        let mut views = TextureViews {
            sampled: Some(self.create_view(&gpu, ViewKind::Sampled, sampled_format, mip_count)?),
            ..Default::default()
        };
        if desc.is_storage() {
            views.storage = Some(self.create_view(&gpu, ViewKind::Storage, desc.format, 1)?);
        }
        if desc.usage.contains(TextureUsage::RENDER_TARGET) {
            views.render_target =
                Some(self.create_view(&gpu, ViewKind::RenderTarget, desc.format, 1)?);
        }
        if let Some(split) = split {
            views.depth_stencil =
                Some(self.create_view(&gpu, ViewKind::DepthStencil, split.depth, 1)?);
        }

        Ok((gpu, views, storage_format))
    }

    fn write_texture_descriptors(&mut self, descriptors: &TextureDescriptors, views: &TextureViews) {
        let pairs = [
            (descriptors.srv, views.sampled.clone().map(DescriptorContents::SampledTexture)),
            (descriptors.uav, views.storage.clone().map(DescriptorContents::StorageTexture)),
            (descriptors.rtv, views.render_target.clone().map(DescriptorContents::RenderTarget)),
            (descriptors.dsv, views.depth_stencil.clone().map(DescriptorContents::DepthStencil)),
        ];
        for (index, contents) in pairs {
            if let (Some(index), Some(contents)) = (index, contents) {
                self.descriptors.write(index, contents);
            }
        }
    }

    /// Create the record of a texture: image, views and descriptor entries.
    pub(crate) fn allocate_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, RhiError> {
        let (gpu, views, storage_format) = self.create_texture_objects(desc)?;

        let descriptors = TextureDescriptors {
            srv: Some(self.descriptors.allocate(DescriptorPoolKind::ShaderVisible)),
            uav: views
                .storage
                .as_ref()
                .map(|_| self.descriptors.allocate(DescriptorPoolKind::ShaderVisible)),
            rtv: views
                .render_target
                .as_ref()
                .map(|_| self.descriptors.allocate(DescriptorPoolKind::RenderTarget)),
            dsv: views
                .depth_stencil
                .as_ref()
                .map(|_| self.descriptors.allocate(DescriptorPoolKind::DepthStencil)),
        };
        self.write_texture_descriptors(&descriptors, &views);

        Ok(self.textures.insert(Texture {
            desc: desc.clone(),
            mip_count: desc.mip_count(),
            storage_format,
            gpu,
            state: ResourceState::Common,
            fresh: true,
            views,
            descriptors,
            back_buffer: false,
        }))
    }

    /// Recreate a texture at a new size, keeping its handle and descriptor indices.
    /// The new allocation starts in [`ResourceState::Common`].
    pub(crate) fn recreate_texture(
        &mut self,
        handle: TextureHandle,
        width: u32,
        height: u32,
    ) -> Result<(), RhiError> {
        let texture = self.texture_ref(handle)?;
        let mut desc = texture.desc.clone();
        let descriptors = texture.descriptors;
        desc.width = width;
        desc.height = height;

        let (gpu, views, storage_format) = self.create_texture_objects(&desc)?;
        self.write_texture_descriptors(&descriptors, &views);

        let texture = self.texture_mut(handle)?;
        texture.mip_count = desc.mip_count();
        texture.desc = desc;
        texture.storage_format = storage_format;
        texture.gpu = gpu;
        texture.views = views;
        texture.state = ResourceState::Common;
        texture.fresh = true;
        Ok(())
    }

    /// Replace the back buffer records with the current images of the
    /// presentation surface. Render-target descriptor indices are reused.
    pub(crate) fn bind_surface(&mut self, info: &SurfaceInfo) -> Result<(), RhiError> {
        let old = std::mem::take(&mut self.back_buffers);
        let rtvs: Vec<DescriptorIndex> = old
            .iter()
            .filter_map(|texture| self.texture(*texture).and_then(|t| t.descriptors().rtv))
            .collect();
        for texture in old {
            self.release_texture(texture);
        }

        let images = self.backend.surface_images();
        for (index, image) in images.into_iter().enumerate() {
            let handle = self.import_back_buffer(image, info, index, rtvs.get(index).copied())?;
            self.back_buffers.push(handle);
        }
        log::debug!(
            "Device: bound {} back buffers at {}x{}",
            self.back_buffers.len(),
            info.width,
            info.height
        );
        Ok(())
    }

    /// Wrap a presentation surface image as a texture record. The image content
    /// is undefined until the first transition.
    ///
    /// `rtv` reuses the render-target descriptor of a previous back buffer.
    fn import_back_buffer(
        &mut self,
        gpu: Arc<GpuTexture>,
        info: &SurfaceInfo,
        index: usize,
        rtv: Option<DescriptorIndex>,
    ) -> Result<TextureHandle, RhiError> {
        let view = self.create_view(&gpu, ViewKind::RenderTarget, info.format, 1)?;
        let rtv = rtv.unwrap_or_else(|| self.descriptors.allocate(DescriptorPoolKind::RenderTarget));
        self.descriptors
            .write(rtv, DescriptorContents::RenderTarget(view.clone()));

        let desc = TextureDesc::new_2d(info.width, info.height, info.format)
            .with_usage(TextureUsage::RENDER_TARGET)
            .with_label(format!("back buffer {index}"));
        Ok(self.textures.insert(Texture {
            desc,
            mip_count: 1,
            storage_format: info.format,
            gpu,
            state: ResourceState::Common,
            fresh: true,
            views: TextureViews {
                render_target: Some(view),
                ..Default::default()
            },
            descriptors: TextureDescriptors {
                rtv: Some(rtv),
                ..Default::default()
            },
            back_buffer: true,
        }))
    }

    /// Read one mip level back to the CPU, tightly packed. Blocks until the copy
    /// finished.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidParameter`] for depth textures, back buffers,
    /// mip levels the texture does not have, and while a frame is open.
    pub fn read_texture(&mut self, handle: TextureHandle, mip: u32) -> Result<Vec<u8>, RhiError> {
        profile_scope!("read_texture");

        self.check_no_open_frame("read_texture")?;
        let texture = self.texture_ref(handle)?;
        if texture.desc.format.is_depth_stencil() || texture.back_buffer {
            return Err(RhiError::invalid(format!(
                "texture '{}' cannot be read back",
                texture.desc.debug_name()
            )));
        }
        if mip >= texture.mip_count {
            return Err(RhiError::invalid(format!(
                "texture '{}' has {} mips, mip {mip} requested",
                texture.desc.debug_name(),
                texture.mip_count
            )));
        }

        let width = mip_extent(texture.desc.width, mip);
        let height = mip_extent(texture.desc.height, mip);
        let size = width as u64 * height as u64 * texture.desc.format.block_size() as u64;
        let previous = texture.state;
        let src = texture.gpu.clone();
        let readback = Arc::new(self.backend.create_buffer(
            "texture readback",
            size,
            BufferUsage::Readback,
        )?);

        let mut list = CommandList::new();
        self.ensure_state(&mut list, handle, ResourceState::CopySrc)?;
        list.push(Command::CopyTextureToBuffer {
            src,
            dst: readback.clone(),
            mip,
            width,
            height,
        });
        self.ensure_state(&mut list, handle, previous)?;
        self.backend.execute_immediate(&list)?;

        self.backend.read_buffer(&readback, 0, size)
    }

    /// Add a reference to a texture, e.g. when a material starts sampling a render
    /// pass output.
    pub fn retain_texture(&mut self, handle: TextureHandle) -> bool {
        self.textures.retain(handle)
    }

    /// Drop a reference to a texture; the last one destroys it.
    pub fn release_texture(&mut self, handle: TextureHandle) {
        if let Some(texture) = self.textures.release(handle) {
            let d = texture.descriptors;
            for index in [d.srv, d.uav, d.rtv, d.dsv].into_iter().flatten() {
                self.descriptors.clear(index);
            }
            log::trace!("Device: released texture '{}'", texture.desc.debug_name());
        }
    }

    // ------------------------------------------------------------------
    // State tracking
    // ------------------------------------------------------------------

    /// Make sure a resource is in `state`, recording one barrier if it is not.
    ///
    /// Returns whether a barrier was recorded. Calling it again with the same state
    /// records nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidParameter`] for stale handles and states the
    /// resource cannot be in (attachment states for buffers, depth states for
    /// color textures and vice versa).
    pub fn ensure_state(
        &mut self,
        list: &mut CommandList,
        id: impl Into<ResourceId>,
        state: ResourceState,
    ) -> Result<bool, RhiError> {
        match id.into() {
            ResourceId::Buffer(handle) => {
                let buffer = self
                    .buffers
                    .get_mut(handle)
                    .ok_or_else(|| stale("buffer", handle))?;
                if buffer.state == state {
                    return Ok(false);
                }
                if state.is_depth()
                    || matches!(state, ResourceState::RenderTarget | ResourceState::Present)
                {
                    return Err(RhiError::invalid(format!(
                        "buffer '{}' cannot be in state {state:?}",
                        buffer.desc.debug_name()
                    )));
                }
                list.push(Command::Transition {
                    resource: BarrierResource::Buffer(buffer.gpu.clone()),
                    subresource: Subresource::All,
                    before: buffer.state,
                    after: state,
                    discard: false,
                });
                buffer.state = state;
            }
            ResourceId::Texture(handle) => {
                let texture = self
                    .textures
                    .get_mut(handle)
                    .ok_or_else(|| stale("texture", handle))?;
                if texture.state == state {
                    return Ok(false);
                }
                let depth = texture.desc.format.is_depth_stencil();
                let invalid = (state.is_depth() && !depth)
                    || (depth && matches!(state, ResourceState::RenderTarget | ResourceState::UnorderedAccess))
                    || (state == ResourceState::Present && !texture.back_buffer);
                if invalid {
                    return Err(RhiError::invalid(format!(
                        "texture '{}' ({:?}) cannot be in state {state:?}",
                        texture.desc.debug_name(),
                        texture.desc.format
                    )));
                }
                list.push(Command::Transition {
                    resource: BarrierResource::Texture(texture.gpu.clone()),
                    subresource: Subresource::All,
                    before: texture.state,
                    after: state,
                    discard: texture.fresh,
                });
                texture.state = state;
                texture.fresh = false;
            }
        }
        Ok(true)
    }

    /// Transition a single mip level without touching the aggregate tag.
    ///
    /// Only mip generation uses this; it leaves every level in the aggregate state
    /// again before it returns.
    pub(crate) fn transition_mip(
        &mut self,
        list: &mut CommandList,
        handle: TextureHandle,
        mip: u32,
        before: ResourceState,
        after: ResourceState,
        discard: bool,
    ) -> Result<(), RhiError> {
        let texture = self.texture_ref(handle)?;
        debug_assert!(mip < texture.mip_count);
        list.push(Command::Transition {
            resource: BarrierResource::Texture(texture.gpu.clone()),
            subresource: Subresource::Mip(mip),
            before,
            after,
            discard,
        });
        Ok(())
    }

    /// Block until the GPU is idle.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        self.backend.wait_idle()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::error!("Device: failed to wait for the GPU on shutdown: {e}");
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("backend", &self.backend.name())
            .field("buffers", &self.buffers.len())
            .field("textures", &self.textures.len())
            .field("pipelines", &self.pipelines.len())
            .field("render_passes", &self.render_passes.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::types::UNIFORM_BUFFER_ALIGNMENT;

    fn device() -> Device {
        Device::new(Arc::new(DummyBackend::new()), &RhiConfig::default())
    }

    #[test]
    fn test_uniform_buffer_is_aligned() {
        let mut device = device();
        for (stride, count) in [(4, 1), (64, 3), (256, 1), (100, 5)] {
            let handle = device
                .create_buffer(&BufferDesc::new(stride, count, BufferUsage::Uniform), None)
                .unwrap();
            let buffer = device.buffer(handle).unwrap();
            let raw = stride as u64 * count as u64;
            assert_eq!(buffer.size(), raw.div_ceil(256) * UNIFORM_BUFFER_ALIGNMENT);
            assert!(buffer.descriptor().is_some());
        }
    }

    #[test]
    fn test_vertex_buffer_initial_data() {
        let mut device = device();
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let handle = device
            .create_buffer(&BufferDesc::new(4, 2, BufferUsage::Vertex), Some(&data))
            .unwrap();
        assert_eq!(device.read_buffer(handle, 0, 8).unwrap(), data.to_vec());
        assert!(device.buffer(handle).unwrap().descriptor().is_none());
    }

    #[test]
    fn test_readback_buffer_rejects_data() {
        let mut device = device();
        let err = device
            .create_buffer(&BufferDesc::new(4, 2, BufferUsage::Readback), Some(&[0; 8]))
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidParameter(_)));

        let handle = device
            .create_buffer(&BufferDesc::new(4, 2, BufferUsage::Readback), None)
            .unwrap();
        assert!(device.write_buffer(handle, 0, &[1]).is_err());
        assert_eq!(device.buffer(handle).unwrap().state(), ResourceState::CopyDst);
    }

    #[test]
    fn test_zero_sized_buffer_rejected() {
        let mut device = device();
        assert!(
            device
                .create_buffer(&BufferDesc::new(0, 2, BufferUsage::Vertex), None)
                .is_err()
        );
    }

    #[test]
    fn test_ensure_state_is_idempotent() {
        let mut device = device();
        let handle = device
            .create_texture(&TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm), None)
            .unwrap();
        let mut list = CommandList::new();
        assert!(
            device
                .ensure_state(&mut list, handle, ResourceState::CopySrc)
                .unwrap()
        );
        assert!(
            !device
                .ensure_state(&mut list, handle, ResourceState::CopySrc)
                .unwrap()
        );
        assert_eq!(list.barrier_count(), 1);
        assert_eq!(device.texture(handle).unwrap().state(), ResourceState::CopySrc);
    }

    #[test]
    fn test_texture_steady_states() {
        let mut device = device();
        let sampled = device
            .create_texture(&TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm), None)
            .unwrap();
        let storage = device
            .create_texture(
                &TextureDesc::new_2d(4, 4, TextureFormat::Rgba16Float).with_storage(),
                None,
            )
            .unwrap();
        let sampled = device.texture(sampled).unwrap();
        let storage = device.texture(storage).unwrap();
        assert_eq!(sampled.state(), ResourceState::SHADER_READ);
        assert!(sampled.descriptors().uav.is_none());
        assert_eq!(storage.state(), ResourceState::UnorderedAccess);
        assert!(storage.descriptors().uav.is_some());
        assert!(storage.descriptors().srv.is_some());
    }

    #[test]
    fn test_texture_upload_and_read_back() {
        let mut device = device();
        let pixels: Vec<u8> = (0..64).collect();
        let handle = device
            .create_texture(
                &TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm),
                Some(&pixels),
            )
            .unwrap();
        assert_eq!(device.read_texture(handle, 0).unwrap(), pixels);
        assert_eq!(
            device.texture(handle).unwrap().state(),
            ResourceState::SHADER_READ
        );
    }

    #[test]
    fn test_texture_data_length_checked() {
        let mut device = device();
        let err = device
            .create_texture(
                &TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm),
                Some(&[0; 10]),
            )
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidParameter(_)));
    }

    #[test]
    fn test_depth_texture_uses_typeless_storage() {
        let mut device = device();
        let handle = device
            .create_texture(
                &TextureDesc::new_2d(8, 8, TextureFormat::Depth32Float)
                    .with_usage(TextureUsage::DEPTH_STENCIL),
                None,
            )
            .unwrap();
        let texture = device.texture(handle).unwrap();
        assert_eq!(texture.storage_format(), TextureFormat::R32Typeless);
        assert!(texture.descriptors().dsv.is_some());
        assert!(texture.descriptors().srv.is_some());

        let mut list = CommandList::new();
        assert!(
            device
                .ensure_state(&mut list, handle, ResourceState::RenderTarget)
                .is_err()
        );
    }

    #[test]
    fn test_released_handle_is_stale() {
        let mut device = device();
        let handle = device
            .create_buffer(&BufferDesc::new(4, 1, BufferUsage::Storage), None)
            .unwrap();
        let index = device.buffer(handle).unwrap().descriptor().unwrap();
        device.release_buffer(handle);
        assert!(device.buffer(handle).is_none());
        assert!(device.descriptors().get(index).is_none());
        assert!(device.read_buffer(handle, 0, 4).is_err());
    }
}
