//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to a GPU. It keeps buffer and texel contents in host
//! memory, executes copies and timestamp writes on the CPU, signals fences as soon
//! as work is submitted and simulates a presentation surface. Everything it is
//! asked to do is counted in [`DummyStats`], and every texture transition is checked
//! against the per-mip state it tracks on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::command::{BarrierResource, Command, CommandList};
use crate::descriptor::DescriptorContents;
use crate::error::RhiError;
use crate::types::{
    BufferUsage, ResourceState, Subresource, TextureFormat, TextureUsage, mip_extent,
};

use super::{
    BackendLimits, FrameSubmit, GpuBackend, GpuBuffer, GpuPipeline, GpuQueryPool, GpuTexture,
    GpuTextureView, PipelineBuild, SurfaceConfig, SurfaceInfo, SurfaceTarget, TextureAlloc,
    ViewDesc,
};

/// Contents and bookkeeping of one mip level of a dummy texture.
#[derive(Debug, Clone, PartialEq)]
pub struct DummyLevel {
    /// Width of the level.
    pub width: u32,
    /// Height of the level.
    pub height: u32,
    /// Tightly packed texels.
    pub data: Vec<u8>,
    /// Whether a copy, dispatch or render pass wrote the level.
    pub written: bool,
    /// State the level was last transitioned to.
    pub state: ResourceState,
}

/// Counters of everything the dummy backend executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Frame submissions.
    pub submissions: u64,
    /// Blocking one-shot submissions.
    pub immediate_submissions: u64,
    /// Back buffer acquisitions.
    pub acquires: u64,
    /// Present calls.
    pub presents: u64,
    /// Presents of an image that was not in the PRESENT state.
    pub invalid_presents: u64,
    /// Transition and UAV barriers.
    pub barriers: u64,
    /// Transitions whose `before` state disagreed with the tracked state.
    pub state_mismatches: u64,
    /// Render passes begun.
    pub render_passes: u64,
    /// Debug markers opened.
    pub markers: u64,
    /// Draw and indexed draw calls.
    pub draws: u64,
    /// Compute dispatches.
    pub dispatches: u64,
    /// Pipelines created.
    pub pipelines: u64,
    /// Surface recreations.
    pub surface_resizes: u64,
}

struct DummySurface {
    info: SurfaceInfo,
    images: Vec<Arc<GpuTexture>>,
    next_image: u32,
    pending_extent: Option<(u32, u32)>,
}

/// Dummy GPU backend.
pub struct DummyBackend {
    stats: Mutex<DummyStats>,
    completed: AtomicU64,
    ticks: AtomicU64,
    surface: Mutex<Option<DummySurface>>,
    lose_device: AtomicBool,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(DummyStats::default()),
            completed: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            surface: Mutex::new(None),
            lose_device: AtomicBool::new(false),
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> DummyStats {
        *self.stats.lock()
    }

    /// Pretend the window was resized: the next present reports an outdated
    /// surface and [`GpuBackend::surface_extent`] returns the new size.
    pub fn simulate_window_resize(&self, width: u32, height: u32) {
        if let Some(surface) = self.surface.lock().as_mut() {
            surface.pending_extent = Some((width, height));
        }
    }

    /// Fail the next frame submission with [`RhiError::DeviceLost`].
    pub fn simulate_device_lost(&self) {
        self.lose_device.store(true, Ordering::Release);
    }

    fn surface_textures(info: &SurfaceInfo) -> Vec<Arc<GpuTexture>> {
        (0..info.image_count)
            .map(|_| {
                Arc::new(dummy_texture(
                    info.width,
                    info.height,
                    info.format,
                    1,
                    ResourceState::Common,
                ))
            })
            .collect()
    }

    fn execute(&self, list: &CommandList) {
        let mut stats = self.stats.lock();
        let mut bound: HashMap<u32, DescriptorContents> = HashMap::new();

        for command in list.commands() {
            match command {
                Command::Transition {
                    resource,
                    subresource,
                    before,
                    after,
                    ..
                } => {
                    stats.barriers += 1;
                    if let BarrierResource::Texture(texture) = resource {
                        transition_levels(texture, *subresource, *before, *after, &mut stats);
                    }
                }
                Command::UavBarrier { .. } => stats.barriers += 1,
                Command::BeginMarker(name) => {
                    stats.markers += 1;
                    log::trace!("DummyBackend: marker '{name}'");
                }
                Command::BeginRenderPass { colors, depth, .. } => {
                    stats.render_passes += 1;
                    for color in colors {
                        mark_written(&color.view);
                    }
                    if let Some(depth) = depth {
                        mark_written(&depth.view);
                    }
                }
                Command::BindPipeline(_) => bound.clear(),
                Command::BindDescriptor { binding, contents } => {
                    bound.insert(*binding, contents.clone());
                }
                Command::Draw { .. } | Command::DrawIndexed { .. } => stats.draws += 1,
                Command::Dispatch { .. } => {
                    stats.dispatches += 1;
                    for contents in bound.values() {
                        if let DescriptorContents::StorageTexture(view) = contents {
                            mark_written(view);
                        }
                    }
                }
                Command::CopyBuffer {
                    src,
                    dst,
                    src_offset,
                    dst_offset,
                    size,
                } => copy_buffer(src, dst, *src_offset, *dst_offset, *size),
                Command::CopyBufferToTexture { src, dst, mip, .. } => {
                    if let (Some(src), GpuTexture::Dummy { levels, .. }) =
                        (dummy_data(src), dst.as_ref())
                    {
                        let src = src.lock();
                        let mut levels = levels.lock();
                        if let Some(level) = levels.get_mut(*mip as usize) {
                            let len = level.data.len().min(src.len());
                            level.data[..len].copy_from_slice(&src[..len]);
                            level.written = true;
                        }
                    }
                }
                Command::CopyTextureToBuffer { src, dst, mip, .. } => {
                    if let (GpuTexture::Dummy { levels, .. }, Some(dst)) =
                        (src.as_ref(), dummy_data(dst))
                    {
                        let levels = levels.lock();
                        let mut dst = dst.lock();
                        if let Some(level) = levels.get(*mip as usize) {
                            let len = level.data.len().min(dst.len());
                            dst[..len].copy_from_slice(&level.data[..len]);
                        }
                    }
                }
                Command::ResetQueries { pool, first, count } => {
                    if let GpuQueryPool::Dummy { values } = pool.as_ref() {
                        let mut values = values.lock();
                        for value in values.iter_mut().skip(*first as usize).take(*count as usize)
                        {
                            *value = 0;
                        }
                    }
                }
                Command::WriteTimestamp { pool, index } => {
                    if let GpuQueryPool::Dummy { values } = pool.as_ref()
                        && let Some(value) = values.lock().get_mut(*index as usize)
                    {
                        *value = self.ticks.fetch_add(1000, Ordering::Relaxed) + 1000;
                    }
                }
                Command::ResolveQueries {
                    pool,
                    first,
                    count,
                    dst,
                    offset,
                } => {
                    if let (GpuQueryPool::Dummy { values }, Some(dst)) =
                        (pool.as_ref(), dummy_data(dst))
                    {
                        let values = values.lock();
                        let mut dst = dst.lock();
                        let mut at = *offset as usize;
                        for value in values.iter().skip(*first as usize).take(*count as usize) {
                            if at + 8 > dst.len() {
                                break;
                            }
                            dst[at..at + 8].copy_from_slice(&value.to_le_bytes());
                            at += 8;
                        }
                    }
                }
                Command::EndMarker
                | Command::EndRenderPass
                | Command::SetViewport { .. }
                | Command::BindVertexBuffer { .. }
                | Command::BindIndexBuffer { .. }
                | Command::PushConstants { .. } => {}
            }
        }
    }
}

fn dummy_texture(
    width: u32,
    height: u32,
    format: TextureFormat,
    mip_count: u32,
    state: ResourceState,
) -> GpuTexture {
    let levels = (0..mip_count)
        .map(|mip| {
            let w = mip_extent(width, mip);
            let h = mip_extent(height, mip);
            DummyLevel {
                width: w,
                height: h,
                data: vec![0; (w * h * format.block_size()) as usize],
                written: false,
                state,
            }
        })
        .collect();
    GpuTexture::Dummy {
        width,
        height,
        format,
        levels: Mutex::new(levels),
    }
}

fn dummy_data(buffer: &GpuBuffer) -> Option<&Mutex<Vec<u8>>> {
    match buffer {
        GpuBuffer::Dummy { data } => Some(data),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn copy_buffer(
    src: &Arc<GpuBuffer>,
    dst: &Arc<GpuBuffer>,
    src_offset: u64,
    dst_offset: u64,
    size: u64,
) {
    let (Some(src_data), Some(dst_data)) = (dummy_data(src), dummy_data(dst)) else {
        return;
    };
    let (src_offset, dst_offset, size) = (src_offset as usize, dst_offset as usize, size as usize);
    if Arc::ptr_eq(src, dst) {
        src_data
            .lock()
            .copy_within(src_offset..src_offset + size, dst_offset);
        return;
    }
    let src_data = src_data.lock();
    let mut dst_data = dst_data.lock();
    dst_data[dst_offset..dst_offset + size]
        .copy_from_slice(&src_data[src_offset..src_offset + size]);
}

fn mark_written(view: &GpuTextureView) {
    if let GpuTexture::Dummy { levels, .. } = view.texture().as_ref() {
        let mut levels = levels.lock();
        let first = view.base_mip() as usize;
        for level in levels.iter_mut().skip(first).take(view.mip_count() as usize) {
            level.written = true;
        }
    }
}

fn transition_levels(
    texture: &GpuTexture,
    subresource: Subresource,
    before: ResourceState,
    after: ResourceState,
    stats: &mut DummyStats,
) {
    let GpuTexture::Dummy { levels, .. } = texture else {
        return;
    };
    let mut levels = levels.lock();
    let range = match subresource {
        Subresource::All => 0..levels.len(),
        Subresource::Mip(mip) => mip as usize..mip as usize + 1,
    };
    for (mip, level) in levels.iter_mut().enumerate() {
        if !range.contains(&mip) {
            continue;
        }
        if level.state != before {
            stats.state_mismatches += 1;
            log::warn!(
                "DummyBackend: mip {mip} transitioned from {before:?} but was in {:?}",
                level.state
            );
        }
        level.state = after;
    }
}

impl GpuTexture {
    /// Per-mip written flags of a dummy texture.
    pub fn written_mips(&self) -> Option<Vec<bool>> {
        match self {
            Self::Dummy { levels, .. } => Some(levels.lock().iter().map(|l| l.written).collect()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Per-mip tracked states of a dummy texture.
    pub fn mip_states(&self) -> Option<Vec<ResourceState>> {
        match self {
            Self::Dummy { levels, .. } => Some(levels.lock().iter().map(|l| l.state).collect()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn adapter_name(&self) -> String {
        "Dummy Adapter".to_string()
    }

    fn limits(&self) -> BackendLimits {
        BackendLimits {
            min_uniform_alignment: 256,
            timestamp_period_ns: 1.0,
            descriptor_stride: 32,
            max_push_constant_size: 128,
        }
    }

    fn create_buffer(
        &self,
        label: &str,
        size: u64,
        usage: BufferUsage,
    ) -> Result<GpuBuffer, RhiError> {
        log::trace!("DummyBackend: creating buffer '{label}' ({size} bytes, {usage:?})");
        Ok(GpuBuffer::dummy(size))
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<(), RhiError> {
        let storage = dummy_data(buffer)
            .ok_or_else(|| RhiError::invalid("buffer does not belong to the dummy backend"))?;
        let mut storage = storage.lock();
        let start = offset as usize;
        let end = start + data.len();
        if end > storage.len() {
            return Err(RhiError::invalid(format!(
                "write of {} bytes at offset {offset} exceeds buffer size {}",
                data.len(),
                storage.len()
            )));
        }
        storage[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, RhiError> {
        let storage = dummy_data(buffer)
            .ok_or_else(|| RhiError::invalid("buffer does not belong to the dummy backend"))?;
        let storage = storage.lock();
        let start = offset as usize;
        let end = start + size as usize;
        if end > storage.len() {
            return Err(RhiError::invalid(format!(
                "read of {size} bytes at offset {offset} exceeds buffer size {}",
                storage.len()
            )));
        }
        Ok(storage[start..end].to_vec())
    }

    fn create_texture(&self, desc: &TextureAlloc<'_>) -> Result<GpuTexture, RhiError> {
        log::trace!(
            "DummyBackend: creating texture '{}' ({}x{}, {:?}, {} mips, {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format,
            desc.mip_count,
            desc.usage
        );
        if desc.usage.contains(TextureUsage::STORAGE) && desc.format.is_typeless() {
            return Err(RhiError::invalid("depth textures cannot be storage textures"));
        }
        Ok(dummy_texture(
            desc.width,
            desc.height,
            desc.format,
            desc.mip_count,
            desc.initial_state,
        ))
    }

    fn create_view(
        &self,
        texture: &Arc<GpuTexture>,
        desc: &ViewDesc,
    ) -> Result<GpuTextureView, RhiError> {
        if desc.mip_count == 0 || desc.base_mip + desc.mip_count > texture.mip_count() {
            return Err(RhiError::invalid(format!(
                "view mips {}..{} out of range for a texture with {} mips",
                desc.base_mip,
                desc.base_mip + desc.mip_count,
                texture.mip_count()
            )));
        }
        Ok(GpuTextureView::Dummy {
            texture: texture.clone(),
            kind: desc.kind,
            base_mip: desc.base_mip,
            mip_count: desc.mip_count,
        })
    }

    fn create_pipeline(&self, build: &PipelineBuild<'_>) -> Result<GpuPipeline, RhiError> {
        log::trace!(
            "DummyBackend: creating pipeline '{}' ({} bindings, {} samplers)",
            build.label,
            build.entries.len(),
            build.samplers.len()
        );
        self.stats.lock().pipelines += 1;
        Ok(GpuPipeline::Dummy {
            label: build.label.to_string(),
            compute: build.raster.is_none(),
        })
    }

    fn create_query_pool(&self, count: u32) -> Result<GpuQueryPool, RhiError> {
        Ok(GpuQueryPool::Dummy {
            values: Mutex::new(vec![0; count as usize]),
        })
    }

    fn create_surface(
        &self,
        _target: SurfaceTarget,
        config: &SurfaceConfig,
    ) -> Result<Option<SurfaceInfo>, RhiError> {
        let info = SurfaceInfo {
            format: TextureFormat::Bgra8UnormSrgb,
            width: config.width,
            height: config.height,
            image_count: config.image_count.max(1),
        };
        log::trace!(
            "DummyBackend: creating surface {}x{} with {} images",
            info.width,
            info.height,
            info.image_count
        );
        *self.surface.lock() = Some(DummySurface {
            info,
            images: Self::surface_textures(&info),
            next_image: 0,
            pending_extent: None,
        });
        Ok(Some(info))
    }

    fn surface_images(&self) -> Vec<Arc<GpuTexture>> {
        self.surface
            .lock()
            .as_ref()
            .map(|surface| surface.images.clone())
            .unwrap_or_default()
    }

    fn surface_extent(&self) -> Option<(u32, u32)> {
        self.surface.lock().as_ref().map(|surface| {
            surface
                .pending_extent
                .unwrap_or((surface.info.width, surface.info.height))
        })
    }

    fn resize_surface(&self, width: u32, height: u32) -> Result<SurfaceInfo, RhiError> {
        let mut guard = self.surface.lock();
        let surface = guard
            .as_mut()
            .ok_or_else(|| RhiError::invalid("no surface to resize"))?;
        surface.info.width = width;
        surface.info.height = height;
        surface.images = Self::surface_textures(&surface.info);
        surface.next_image = 0;
        surface.pending_extent = None;
        self.stats.lock().surface_resizes += 1;
        Ok(surface.info)
    }

    fn acquire_image(&self, _frame_index: usize) -> Result<u32, RhiError> {
        let mut guard = self.surface.lock();
        let surface = guard
            .as_mut()
            .ok_or_else(|| RhiError::invalid("no surface to acquire from"))?;
        let image = surface.next_image;
        surface.next_image = (image + 1) % surface.info.image_count;
        self.stats.lock().acquires += 1;
        Ok(image)
    }

    fn submit(&self, list: &CommandList, submit: &FrameSubmit) -> Result<(), RhiError> {
        log::trace!(
            "DummyBackend: submitting frame slot {} ({} commands, fence {})",
            submit.frame_index,
            list.len(),
            submit.fence_value
        );
        if self.lose_device.swap(false, Ordering::AcqRel) {
            return Err(RhiError::DeviceLost);
        }
        self.execute(list);
        self.stats.lock().submissions += 1;
        self.completed.fetch_max(submit.fence_value, Ordering::AcqRel);
        Ok(())
    }

    fn present(&self, image_index: u32) -> Result<(), RhiError> {
        log::trace!("DummyBackend: presenting image {image_index}");
        let (outdated, state) = match self.surface.lock().as_ref() {
            Some(surface) => (
                surface.pending_extent.is_some(),
                surface
                    .images
                    .get(image_index as usize)
                    .and_then(|image| image.mip_states())
                    .and_then(|states| states.first().copied()),
            ),
            None => (false, None),
        };
        let mut stats = self.stats.lock();
        stats.presents += 1;
        if state != Some(ResourceState::Present) {
            stats.invalid_presents += 1;
            log::warn!("DummyBackend: presenting image {image_index} in state {state:?}");
        }
        drop(stats);
        if outdated {
            return Err(RhiError::SurfaceOutdated);
        }
        Ok(())
    }

    fn completed_fence(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn wait_for_fence(&self, value: u64) -> Result<(), RhiError> {
        let completed = self.completed_fence();
        if completed < value {
            return Err(RhiError::internal(format!(
                "waiting on fence {value} that was never submitted (completed: {completed})"
            )));
        }
        Ok(())
    }

    fn execute_immediate(&self, list: &CommandList) -> Result<(), RhiError> {
        self.execute(list);
        self.stats.lock().immediate_submissions += 1;
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), RhiError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ViewKind;

    fn texture(backend: &DummyBackend, mips: u32) -> Arc<GpuTexture> {
        Arc::new(
            backend
                .create_texture(&TextureAlloc {
                    label: "test",
                    width: 8,
                    height: 8,
                    format: TextureFormat::Rgba8Unorm,
                    mip_count: mips,
                    usage: TextureUsage::SAMPLED | TextureUsage::STORAGE,
                    initial_state: ResourceState::Common,
                })
                .unwrap(),
        )
    }

    #[test]
    fn test_buffer_write_read() {
        let backend = DummyBackend::new();
        let buffer = backend.create_buffer("b", 8, BufferUsage::Vertex).unwrap();
        backend.write_buffer(&buffer, 2, &[1, 2, 3]).unwrap();
        assert_eq!(
            backend.read_buffer(&buffer, 0, 8).unwrap(),
            vec![0, 0, 1, 2, 3, 0, 0, 0]
        );
        assert!(backend.write_buffer(&buffer, 7, &[1, 2]).is_err());
    }

    #[test]
    fn test_transition_tracking() {
        let backend = DummyBackend::new();
        let tex = texture(&backend, 3);
        let mut list = CommandList::new();
        list.push(Command::Transition {
            resource: BarrierResource::Texture(tex.clone()),
            subresource: Subresource::All,
            before: ResourceState::Common,
            after: ResourceState::CopyDst,
            discard: true,
        });
        list.push(Command::Transition {
            resource: BarrierResource::Texture(tex.clone()),
            subresource: Subresource::Mip(1),
            before: ResourceState::CopyDst,
            after: ResourceState::UnorderedAccess,
            discard: false,
        });
        backend.execute_immediate(&list).unwrap();

        assert_eq!(backend.stats().state_mismatches, 0);
        assert_eq!(
            tex.mip_states().unwrap(),
            vec![
                ResourceState::CopyDst,
                ResourceState::UnorderedAccess,
                ResourceState::CopyDst
            ]
        );
    }

    #[test]
    fn test_transition_mismatch_is_counted() {
        let backend = DummyBackend::new();
        let tex = texture(&backend, 1);
        let mut list = CommandList::new();
        list.push(Command::Transition {
            resource: BarrierResource::Texture(tex),
            subresource: Subresource::All,
            before: ResourceState::RenderTarget,
            after: ResourceState::Present,
            discard: false,
        });
        backend.execute_immediate(&list).unwrap();
        assert_eq!(backend.stats().state_mismatches, 1);
    }

    #[test]
    fn test_dispatch_marks_bound_storage_mip() {
        let backend = DummyBackend::new();
        let tex = texture(&backend, 3);
        let view = backend
            .create_view(
                &tex,
                &ViewDesc {
                    kind: ViewKind::Storage,
                    format: TextureFormat::Rgba8Unorm,
                    base_mip: 2,
                    mip_count: 1,
                },
            )
            .unwrap();
        let mut list = CommandList::new();
        list.push(Command::BindDescriptor {
            binding: 1,
            contents: DescriptorContents::StorageTexture(Arc::new(view)),
        });
        list.push(Command::Dispatch { x: 1, y: 1, z: 1 });
        backend.execute_immediate(&list).unwrap();
        assert_eq!(tex.written_mips().unwrap(), vec![false, false, true]);
    }

    #[test]
    fn test_fences_signal_on_submit() {
        let backend = DummyBackend::new();
        assert!(backend.wait_for_fence(0).is_ok());
        assert!(backend.wait_for_fence(1).is_err());
        backend
            .submit(
                &CommandList::new(),
                &FrameSubmit {
                    frame_index: 0,
                    fence_value: 1,
                    present_image: None,
                },
            )
            .unwrap();
        assert_eq!(backend.completed_fence(), 1);
        assert!(backend.wait_for_fence(1).is_ok());
    }

    #[test]
    fn test_surface_images_rotate() {
        let backend = DummyBackend::new();
        let info = backend
            .create_surface(
                SurfaceTarget::Offscreen,
                &SurfaceConfig {
                    width: 64,
                    height: 32,
                    image_count: 2,
                    vsync: true,
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(info.image_count, 2);
        assert_eq!(backend.acquire_image(0).unwrap(), 0);
        assert_eq!(backend.acquire_image(1).unwrap(), 1);
        assert_eq!(backend.acquire_image(0).unwrap(), 0);

        backend.simulate_window_resize(128, 64);
        assert_eq!(backend.present(0), Err(RhiError::SurfaceOutdated));
        assert_eq!(backend.surface_extent(), Some((128, 64)));
        backend.resize_surface(128, 64).unwrap();
        assert!(backend.present(0).is_ok());
        assert_eq!(backend.stats().invalid_presents, 2);
    }

    #[test]
    fn test_present_requires_present_state() {
        let backend = DummyBackend::new();
        backend
            .create_surface(
                SurfaceTarget::Offscreen,
                &SurfaceConfig {
                    width: 16,
                    height: 16,
                    image_count: 2,
                    vsync: false,
                },
            )
            .unwrap();
        let image = backend.surface_images().swap_remove(0);
        assert_eq!(image.mip_states().unwrap(), vec![ResourceState::Common]);

        let mut list = CommandList::new();
        list.push(Command::Transition {
            resource: BarrierResource::Texture(image),
            subresource: Subresource::All,
            before: ResourceState::Common,
            after: ResourceState::Present,
            discard: true,
        });
        backend.execute_immediate(&list).unwrap();
        backend.present(0).unwrap();
        backend.present(1).unwrap();

        let stats = backend.stats();
        assert_eq!(stats.state_mismatches, 0);
        assert_eq!(stats.invalid_presents, 1);
    }

    #[test]
    fn test_lost_device_fails_one_submission() {
        let backend = DummyBackend::new();
        let submit = FrameSubmit {
            frame_index: 0,
            fence_value: 1,
            present_image: None,
        };
        backend.simulate_device_lost();
        assert_eq!(
            backend.submit(&CommandList::new(), &submit),
            Err(RhiError::DeviceLost)
        );
        assert_eq!(backend.completed_fence(), 0);
        backend.submit(&CommandList::new(), &submit).unwrap();
        assert_eq!(backend.completed_fence(), 1);
    }
}
