//! Translation of a recorded [`CommandList`] into a Vulkan command buffer.
//!
//! ```text
//! CommandList ──► Encoder ──► vk::CommandBuffer
//!                   │
//!                   ├─ Transition / UavBarrier ─► BarrierBatch (flushed lazily)
//!                   ├─ BindDescriptor ──────────► descriptor table (pushed lazily)
//!                   └─ everything else ─────────► recorded in order
//! ```
//!
//! Barriers cannot be recorded inside dynamic rendering. A barrier batch that
//! is flushed while a pass is open suspends the pass, records the barriers and
//! resumes it with `LOAD` operations.

use std::collections::BTreeMap;

use ash::vk;

use crate::backend::{GpuBuffer, GpuPipeline, GpuQueryPool, GpuTexture, GpuTextureView};
use crate::command::{Command, CommandList};
use crate::descriptor::DescriptorContents;
use crate::error::RhiError;
use crate::types::{IndexFormat, ResourceState};

use super::barriers::BarrierBatch;
use super::conversion::state_layout;
use super::debug::DebugLabels;

fn buffer_handle(buffer: &GpuBuffer) -> Result<vk::Buffer, RhiError> {
    match buffer {
        GpuBuffer::Vulkan { buffer, .. } => Ok(*buffer),
        _ => Err(RhiError::internal("buffer does not belong to the Vulkan backend")),
    }
}

fn image_handle(texture: &GpuTexture) -> Result<(vk::Image, vk::ImageAspectFlags), RhiError> {
    match texture {
        GpuTexture::Vulkan { image, aspect, .. } => Ok((*image, *aspect)),
        _ => Err(RhiError::internal("texture does not belong to the Vulkan backend")),
    }
}

fn view_handle(view: &GpuTextureView) -> Result<vk::ImageView, RhiError> {
    match view {
        GpuTextureView::Vulkan { view, .. } => Ok(*view),
        _ => Err(RhiError::internal("view does not belong to the Vulkan backend")),
    }
}

fn query_handle(pool: &GpuQueryPool) -> Result<vk::QueryPool, RhiError> {
    match pool {
        GpuQueryPool::Vulkan { pool, .. } => Ok(*pool),
        _ => Err(RhiError::internal("query pool does not belong to the Vulkan backend")),
    }
}

/// A descriptor waiting to be pushed before the next draw or dispatch.
#[derive(Debug, Clone, Copy)]
enum DescriptorWrite {
    Buffer(vk::DescriptorType, vk::DescriptorBufferInfo),
    Image(vk::DescriptorType, vk::DescriptorImageInfo),
}

fn descriptor_write(contents: &DescriptorContents) -> Result<Option<DescriptorWrite>, RhiError> {
    let write = match contents {
        DescriptorContents::UniformBuffer {
            buffer,
            offset,
            size,
        } => DescriptorWrite::Buffer(
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorBufferInfo {
                buffer: buffer_handle(buffer)?,
                offset: *offset,
                range: *size,
            },
        ),
        DescriptorContents::StorageBuffer {
            buffer,
            offset,
            size,
            ..
        } => DescriptorWrite::Buffer(
            vk::DescriptorType::STORAGE_BUFFER,
            vk::DescriptorBufferInfo {
                buffer: buffer_handle(buffer)?,
                offset: *offset,
                range: *size,
            },
        ),
        DescriptorContents::SampledTexture(view) => DescriptorWrite::Image(
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view_handle(view)?,
                image_layout: state_layout(ResourceState::SHADER_READ),
            },
        ),
        DescriptorContents::StorageTexture(view) => DescriptorWrite::Image(
            vk::DescriptorType::STORAGE_IMAGE,
            vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view_handle(view)?,
                image_layout: state_layout(ResourceState::UnorderedAccess),
            },
        ),
        // Attachments are bound by the pass, never through the table.
        DescriptorContents::RenderTarget(_) | DescriptorContents::DepthStencil(_) => {
            return Ok(None);
        }
    };
    Ok(Some(write))
}

/// Attachments of the open pass, kept to resume it after a barrier.
struct OpenPass {
    colors: Vec<(vk::ImageView, [f32; 4])>,
    depth: Option<(vk::ImageView, f32, bool)>,
    extent: vk::Extent2D,
}

/// Pipeline state needed by binds.
#[derive(Clone, Copy)]
struct BoundPipeline {
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
    push_stages: vk::ShaderStageFlags,
}

/// Records one command list into one command buffer.
pub struct Encoder<'a> {
    device: &'a ash::Device,
    push_descriptor: &'a ash::khr::push_descriptor::Device,
    labels: &'a DebugLabels,
    cmd: vk::CommandBuffer,
    barriers: BarrierBatch,
    pass: Option<OpenPass>,
    pipeline: Option<BoundPipeline>,
    table: BTreeMap<u32, DescriptorWrite>,
    table_dirty: bool,
}

impl<'a> Encoder<'a> {
    pub fn new(
        device: &'a ash::Device,
        push_descriptor: &'a ash::khr::push_descriptor::Device,
        labels: &'a DebugLabels,
        cmd: vk::CommandBuffer,
    ) -> Self {
        Self {
            device,
            push_descriptor,
            labels,
            cmd,
            barriers: BarrierBatch::new(),
            pass: None,
            pipeline: None,
            table: BTreeMap::new(),
            table_dirty: false,
        }
    }

    /// Record every command of `list`.
    pub fn encode(&mut self, list: &CommandList) -> Result<(), RhiError> {
        for command in list.commands() {
            self.record(command)?;
        }
        self.flush_barriers();
        if self.pass.take().is_some() {
            log::warn!("Vulkan: command list ended inside a render pass");
            unsafe { self.device.cmd_end_rendering(self.cmd) };
        }
        Ok(())
    }

    fn record(&mut self, command: &Command) -> Result<(), RhiError> {
        match command {
            Command::Transition {
                resource,
                subresource,
                before,
                after,
                discard,
            } => {
                self.barriers
                    .transition(resource, *subresource, *before, *after, *discard);
                return Ok(());
            }
            Command::UavBarrier { .. } => {
                self.barriers.uav();
                return Ok(());
            }
            _ => self.flush_barriers(),
        }

        let device = self.device;
        let cmd = self.cmd;
        match command {
            Command::Transition { .. } | Command::UavBarrier { .. } => {}
            Command::BeginMarker(name) => self.labels.begin(cmd, name),
            Command::EndMarker => self.labels.end(cmd),
            Command::BeginRenderPass {
                colors,
                depth,
                width,
                height,
            } => {
                let colors = colors
                    .iter()
                    .map(|c| Ok((view_handle(&c.view)?, c.clear)))
                    .collect::<Result<Vec<_>, RhiError>>()?;
                let depth = match depth {
                    Some(d) => {
                        let (_, aspect) = image_handle(d.view.texture())?;
                        Some((
                            view_handle(&d.view)?,
                            d.clear,
                            aspect.contains(vk::ImageAspectFlags::STENCIL),
                        ))
                    }
                    None => None,
                };
                let pass = OpenPass {
                    colors,
                    depth,
                    extent: vk::Extent2D {
                        width: *width,
                        height: *height,
                    },
                };
                self.begin_rendering(&pass, true);
                self.pass = Some(pass);
            }
            Command::EndRenderPass => {
                if self.pass.take().is_some() {
                    unsafe { device.cmd_end_rendering(cmd) };
                }
            }
            Command::SetViewport { viewport, scissor } => {
                // Negative height flips Y to match the other backends' clip space.
                let vk_viewport = vk::Viewport {
                    x: viewport.x,
                    y: viewport.y + viewport.height,
                    width: viewport.width,
                    height: -viewport.height,
                    min_depth: viewport.min_depth,
                    max_depth: viewport.max_depth,
                };
                let vk_scissor = vk::Rect2D {
                    offset: vk::Offset2D {
                        x: scissor.x,
                        y: scissor.y,
                    },
                    extent: vk::Extent2D {
                        width: scissor.width,
                        height: scissor.height,
                    },
                };
                unsafe {
                    device.cmd_set_viewport(cmd, 0, &[vk_viewport]);
                    device.cmd_set_scissor(cmd, 0, &[vk_scissor]);
                }
            }
            Command::BindPipeline(pipeline) => {
                let GpuPipeline::Vulkan {
                    pipeline,
                    layout,
                    bind_point,
                    push_stages,
                    ..
                } = pipeline.as_ref()
                else {
                    return Err(RhiError::internal(
                        "pipeline does not belong to the Vulkan backend",
                    ));
                };
                unsafe { device.cmd_bind_pipeline(cmd, *bind_point, *pipeline) };
                self.pipeline = Some(BoundPipeline {
                    layout: *layout,
                    bind_point: *bind_point,
                    push_stages: *push_stages,
                });
                self.table.clear();
                self.table_dirty = false;
            }
            Command::BindVertexBuffer { buffer, offset } => unsafe {
                device.cmd_bind_vertex_buffers(cmd, 0, &[buffer_handle(buffer)?], &[*offset]);
            },
            Command::BindIndexBuffer { buffer, format } => {
                let index_type = match format {
                    IndexFormat::Uint16 => vk::IndexType::UINT16,
                    IndexFormat::Uint32 => vk::IndexType::UINT32,
                };
                unsafe { device.cmd_bind_index_buffer(cmd, buffer_handle(buffer)?, 0, index_type) };
            }
            Command::BindDescriptor { binding, contents } => {
                if let Some(write) = descriptor_write(contents)? {
                    self.table.insert(*binding, write);
                    self.table_dirty = true;
                }
            }
            Command::PushConstants { offset, data } => {
                let pipeline = self.bound_pipeline()?;
                unsafe {
                    device.cmd_push_constants(
                        cmd,
                        pipeline.layout,
                        pipeline.push_stages,
                        *offset,
                        data,
                    )
                };
            }
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                self.push_table()?;
                unsafe {
                    device.cmd_draw(
                        cmd,
                        *vertex_count,
                        *instance_count,
                        *first_vertex,
                        *first_instance,
                    )
                };
            }
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            } => {
                self.push_table()?;
                unsafe {
                    device.cmd_draw_indexed(
                        cmd,
                        *index_count,
                        *instance_count,
                        *first_index,
                        *base_vertex,
                        *first_instance,
                    )
                };
            }
            Command::Dispatch { x, y, z } => {
                self.push_table()?;
                unsafe { device.cmd_dispatch(cmd, *x, *y, *z) };
            }
            Command::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            } => {
                let region = vk::BufferCopy {
                    src_offset: *src_offset,
                    dst_offset: *dst_offset,
                    size: *size,
                };
                unsafe {
                    device.cmd_copy_buffer(cmd, buffer_handle(src)?, buffer_handle(dst)?, &[region])
                };
            }
            Command::CopyBufferToTexture {
                src,
                dst,
                mip,
                width,
                height,
            } => {
                let (image, aspect) = image_handle(dst)?;
                let region = copy_region(aspect, *mip, *width, *height);
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        buffer_handle(src)?,
                        image,
                        state_layout(ResourceState::CopyDst),
                        &[region],
                    )
                };
            }
            Command::CopyTextureToBuffer {
                src,
                dst,
                mip,
                width,
                height,
            } => {
                let (image, aspect) = image_handle(src)?;
                let region = copy_region(aspect, *mip, *width, *height);
                unsafe {
                    device.cmd_copy_image_to_buffer(
                        cmd,
                        image,
                        state_layout(ResourceState::CopySrc),
                        buffer_handle(dst)?,
                        &[region],
                    )
                };
            }
            Command::ResetQueries { pool, first, count } => unsafe {
                device.cmd_reset_query_pool(cmd, query_handle(pool)?, *first, *count);
            },
            Command::WriteTimestamp { pool, index } => unsafe {
                device.cmd_write_timestamp2(
                    cmd,
                    vk::PipelineStageFlags2::ALL_COMMANDS,
                    query_handle(pool)?,
                    *index,
                );
            },
            Command::ResolveQueries {
                pool,
                first,
                count,
                dst,
                offset,
            } => unsafe {
                device.cmd_copy_query_pool_results(
                    cmd,
                    query_handle(pool)?,
                    *first,
                    *count,
                    buffer_handle(dst)?,
                    *offset,
                    std::mem::size_of::<u64>() as u64,
                    vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                );
            },
        }
        Ok(())
    }

    fn bound_pipeline(&self) -> Result<BoundPipeline, RhiError> {
        self.pipeline
            .ok_or_else(|| RhiError::internal("no pipeline bound"))
    }

    fn flush_barriers(&mut self) {
        if self.barriers.is_empty() {
            return;
        }
        let Some(pass) = self.pass.take() else {
            self.barriers.flush(self.device, self.cmd);
            return;
        };
        unsafe { self.device.cmd_end_rendering(self.cmd) };
        self.barriers.flush(self.device, self.cmd);
        self.begin_rendering(&pass, false);
        self.pass = Some(pass);
    }

    fn begin_rendering(&self, pass: &OpenPass, clear: bool) {
        let load_op = if clear {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::LOAD
        };
        let color_attachments: Vec<vk::RenderingAttachmentInfo> = pass
            .colors
            .iter()
            .map(|(view, color)| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(*view)
                    .image_layout(state_layout(ResourceState::RenderTarget))
                    .load_op(load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue { float32: *color },
                    })
            })
            .collect();
        let depth_attachment = pass.depth.map(|(view, depth, _)| {
            vk::RenderingAttachmentInfo::default()
                .image_view(view)
                .image_layout(state_layout(ResourceState::DepthWrite))
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
                })
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: pass.extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
            if pass.depth.is_some_and(|(_, _, stencil)| stencil) {
                rendering_info = rendering_info.stencil_attachment(depth);
            }
        }
        unsafe { self.device.cmd_begin_rendering(self.cmd, &rendering_info) };
    }

    fn push_table(&mut self) -> Result<(), RhiError> {
        if !self.table_dirty {
            return Ok(());
        }
        let pipeline = self.bound_pipeline()?;

        let buffer_infos: Vec<(u32, vk::DescriptorType, vk::DescriptorBufferInfo)> = self
            .table
            .iter()
            .filter_map(|(binding, write)| match write {
                DescriptorWrite::Buffer(ty, info) => Some((*binding, *ty, *info)),
                DescriptorWrite::Image(..) => None,
            })
            .collect();
        let image_infos: Vec<(u32, vk::DescriptorType, vk::DescriptorImageInfo)> = self
            .table
            .iter()
            .filter_map(|(binding, write)| match write {
                DescriptorWrite::Image(ty, info) => Some((*binding, *ty, *info)),
                DescriptorWrite::Buffer(..) => None,
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet> = buffer_infos
            .iter()
            .map(|(binding, ty, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .buffer_info(std::slice::from_ref(info))
            })
            .chain(image_infos.iter().map(|(binding, ty, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .image_info(std::slice::from_ref(info))
            }))
            .collect();

        unsafe {
            self.push_descriptor.cmd_push_descriptor_set(
                self.cmd,
                pipeline.bind_point,
                pipeline.layout,
                0,
                &writes,
            )
        };
        self.table_dirty = false;
        Ok(())
    }
}

fn copy_region(
    aspect: vk::ImageAspectFlags,
    mip: u32,
    width: u32,
    height: u32,
) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            // Copies address a single aspect.
            aspect_mask: if aspect.contains(vk::ImageAspectFlags::DEPTH) {
                vk::ImageAspectFlags::DEPTH
            } else {
                aspect
            },
            mip_level: mip,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: vk::Extent3D {
            width,
            height,
            depth: 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_attachment_views_are_not_table_writes() {
        let texture = Arc::new(GpuTexture::Dummy {
            width: 4,
            height: 4,
            format: crate::types::TextureFormat::Rgba8Unorm,
            levels: parking_lot::Mutex::new(Vec::new()),
        });
        let view = Arc::new(GpuTextureView::Dummy {
            texture,
            kind: crate::backend::ViewKind::RenderTarget,
            base_mip: 0,
            mip_count: 1,
        });
        assert!(matches!(
            descriptor_write(&DescriptorContents::RenderTarget(view)),
            Ok(None)
        ));
    }

    #[test]
    fn test_foreign_resources_are_rejected() {
        let buffer = Arc::new(GpuBuffer::dummy(64));
        let contents = DescriptorContents::UniformBuffer {
            buffer,
            offset: 0,
            size: 64,
        };
        assert!(descriptor_write(&contents).is_err());
    }

    #[test]
    fn test_depth_copies_use_depth_aspect() {
        let region = copy_region(
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            2,
            8,
            8,
        );
        assert_eq!(region.image_subresource.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(region.image_subresource.mip_level, 2);
    }
}
