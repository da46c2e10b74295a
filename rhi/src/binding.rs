//! Binding protocol.
//!
//! Bind calls are session-scoped: they resolve names through the binding layout of
//! the pipeline bound last and record straight into the frame's command list.
//!
//! A name the pipeline does not use is not an error. Shader variants legitimately
//! drop parameters, so [`Rhi::bind_parameter`] reports the miss with `Ok(false)`
//! and callers move on.

use crate::command::Command;
use crate::descriptor::DescriptorContents;
use crate::device::stale;
use crate::context::Rhi;
use crate::error::RhiError;
use crate::pipeline::{DescriptorKind, Pipeline, PipelineHandle, SlotKind};
use crate::resources::{BufferHandle, TextureHandle};
use crate::types::{BufferUsage, IndexFormat, ResourceState, ScissorRect, Viewport};

/// A value bound to a named shader parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter<'a> {
    /// A uniform or storage buffer.
    Buffer(BufferHandle),
    /// A sampled or storage texture.
    Texture(TextureHandle),
    /// Raw bytes for the pipeline's push constants.
    Bytes(&'a [u8]),
}

impl Parameter<'_> {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Texture(_) => "texture",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl Rhi {
    fn current_pipeline(&self) -> Result<(PipelineHandle, &Pipeline), RhiError> {
        let handle = self
            .session
            .pipeline
            .ok_or_else(|| RhiError::invalid("no pipeline is bound"))?;
        let pipeline = self
            .device
            .pipeline(handle)
            .ok_or_else(|| stale("pipeline", handle))?;
        Ok((handle, pipeline))
    }

    /// Bind a pipeline. Later parameter names resolve against its layout.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidParameter`] for a graphics pipeline built for a
    /// render pass other than the active one.
    pub fn bind_pipeline(&mut self, handle: PipelineHandle) -> Result<(), RhiError> {
        self.recording_list()?;
        let pipeline = self
            .device
            .pipeline(handle)
            .ok_or_else(|| stale("pipeline", handle))?;
        if let (Some(active), Some(target)) = (self.session.pass, pipeline.render_pass())
            && active != target
        {
            return Err(RhiError::invalid(format!(
                "pipeline '{}' targets {target:?} but is bound inside {active:?}",
                pipeline.desc().debug_name()
            )));
        }
        let gpu = pipeline.gpu().clone();
        self.session.list.push(Command::BindPipeline(gpu));
        self.session.pipeline = Some(handle);
        Ok(())
    }

    /// Bind the vertex buffer of the next draws.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidParameter`] without a bound graphics pipeline and
    /// for buffers that are not vertex buffers.
    pub fn bind_vertex_buffer(&mut self, handle: BufferHandle) -> Result<(), RhiError> {
        self.recording_list()?;
        self.require_graphics("bind_vertex_buffer")?;
        let buffer = self.device.buffer_ref(handle)?;
        if buffer.usage() != BufferUsage::Vertex {
            return Err(RhiError::invalid(format!(
                "buffer '{}' is a {:?} buffer, not a vertex buffer",
                buffer.desc().debug_name(),
                buffer.usage()
            )));
        }
        let gpu = buffer.gpu().clone();
        self.session.list.push(Command::BindVertexBuffer {
            buffer: gpu,
            offset: 0,
        });
        Ok(())
    }

    /// Bind the index buffer of the next indexed draws. The index format follows
    /// the buffer's stride.
    pub fn bind_index_buffer(&mut self, handle: BufferHandle) -> Result<(), RhiError> {
        self.recording_list()?;
        self.require_graphics("bind_index_buffer")?;
        let buffer = self.device.buffer_ref(handle)?;
        let format = match (buffer.usage(), IndexFormat::from_stride(buffer.stride())) {
            (BufferUsage::Index, Some(format)) => format,
            _ => {
                return Err(RhiError::invalid(format!(
                    "buffer '{}' ({:?}, stride {}) is not a 16- or 32-bit index buffer",
                    buffer.desc().debug_name(),
                    buffer.usage(),
                    buffer.stride()
                )));
            }
        };
        let gpu = buffer.gpu().clone();
        self.session.list.push(Command::BindIndexBuffer { buffer: gpu, format });
        Ok(())
    }

    fn require_graphics(&self, call: &str) -> Result<(), RhiError> {
        let (_, pipeline) = self.current_pipeline()?;
        if pipeline.is_compute() {
            return Err(RhiError::invalid(format!(
                "{call} with compute pipeline '{}' bound",
                pipeline.desc().debug_name()
            )));
        }
        Ok(())
    }

    /// Bind a value to a named parameter of the bound pipeline.
    ///
    /// Returns `Ok(false)` when the pipeline does not use `name`, or when the value
    /// does not fit the parameter (which is also logged); nothing is recorded then.
    /// Buffers and textures are transitioned to the state the binding needs.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidParameter`] without a bound pipeline, for stale
    /// handles and for push-constant data larger than the pipeline's range.
    pub fn bind_parameter(&mut self, name: &str, value: Parameter<'_>) -> Result<bool, RhiError> {
        self.recording_list()?;
        let (_, pipeline) = self.current_pipeline()?;
        let Some(slot) = pipeline.layout().slot(name).copied() else {
            log::trace!(
                "Pipeline '{}' does not use '{name}', skipping bind",
                pipeline.desc().debug_name()
            );
            return Ok(false);
        };
        let pipeline_name = pipeline.desc().debug_name().to_string();

        let command = match (slot.kind, value) {
            (SlotKind::Constants { size }, Parameter::Bytes(data)) => {
                if data.len() > size as usize {
                    return Err(RhiError::invalid(format!(
                        "{} bytes bound to '{name}' of pipeline '{pipeline_name}', which holds {size}",
                        data.len()
                    )));
                }
                Command::PushConstants {
                    offset: 0,
                    data: data.to_vec(),
                }
            }
            (SlotKind::Table { binding, kind }, Parameter::Buffer(handle)) => {
                let Some(contents) = self.buffer_contents(handle, kind)? else {
                    return Ok(self.mismatch(&pipeline_name, name, kind, value));
                };
                Command::BindDescriptor { binding, contents }
            }
            (SlotKind::Table { binding, kind }, Parameter::Texture(handle)) => {
                let Some(contents) = self.texture_contents(handle, kind)? else {
                    return Ok(self.mismatch(&pipeline_name, name, kind, value));
                };
                Command::BindDescriptor { binding, contents }
            }
            (SlotKind::Table { kind, .. }, Parameter::Bytes(_)) => {
                return Ok(self.mismatch(&pipeline_name, name, kind, value));
            }
            (SlotKind::Constants { .. }, _) => {
                log::warn!(
                    "'{name}' of pipeline '{pipeline_name}' is inline constants; bind bytes, not a {}",
                    value.kind_name()
                );
                return Ok(false);
            }
        };
        self.session.list.push(command);
        Ok(true)
    }

    fn mismatch(&self, pipeline: &str, name: &str, kind: DescriptorKind, value: Parameter<'_>) -> bool {
        log::warn!(
            "'{name}' of pipeline '{pipeline}' is a {kind:?} slot; a {} does not fit",
            value.kind_name()
        );
        false
    }

    fn buffer_contents(
        &mut self,
        handle: BufferHandle,
        kind: DescriptorKind,
    ) -> Result<Option<DescriptorContents>, RhiError> {
        let buffer = self.device.buffer_ref(handle)?;
        let (state, writable) = match (kind, buffer.usage()) {
            (DescriptorKind::UniformBuffer, BufferUsage::Uniform) => (None, false),
            (DescriptorKind::StorageBuffer { writable: true }, BufferUsage::Storage) => {
                (Some(ResourceState::UnorderedAccess), true)
            }
            (DescriptorKind::StorageBuffer { writable: false }, BufferUsage::Storage) => {
                (Some(ResourceState::SHADER_READ), false)
            }
            _ => return Ok(None),
        };
        let contents = buffer.contents(writable);
        if let Some(state) = state {
            self.device
                .ensure_state(&mut self.session.list, handle, state)?;
        }
        Ok(Some(contents))
    }

    fn texture_contents(
        &mut self,
        handle: TextureHandle,
        kind: DescriptorKind,
    ) -> Result<Option<DescriptorContents>, RhiError> {
        let views = self.device.texture_ref(handle)?.views();
        let (state, contents) = match kind {
            DescriptorKind::SampledTexture => match views.sampled.clone() {
                Some(view) => (ResourceState::SHADER_READ, DescriptorContents::SampledTexture(view)),
                None => return Ok(None),
            },
            DescriptorKind::StorageTexture => match views.storage.clone() {
                Some(view) => (
                    ResourceState::UnorderedAccess,
                    DescriptorContents::StorageTexture(view),
                ),
                None => return Ok(None),
            },
            DescriptorKind::UniformBuffer | DescriptorKind::StorageBuffer { .. } => return Ok(None),
        };
        self.device
            .ensure_state(&mut self.session.list, handle, state)?;
        Ok(Some(contents))
    }

    /// Check a draw can be recorded and set the viewport on the first draw of a pass.
    /// Check the bound pipeline can draw into the active pass and set the
    /// viewport to the pipeline's target on the pass's first draw.
    fn prepare_draw(&mut self, call: &str) -> Result<(), RhiError> {
        self.recording_list()?;
        self.require_graphics(call)?;
        let active = self
            .session
            .pass
            .ok_or_else(|| RhiError::invalid(format!("{call} outside a render pass")))?;
        let (_, pipeline) = self.current_pipeline()?;
        let target = pipeline.render_pass().unwrap_or(active);
        if target != active {
            return Err(RhiError::invalid(format!(
                "{call} with pipeline '{}' that targets {target:?} inside {active:?}",
                pipeline.desc().debug_name()
            )));
        }
        if !self.session.viewport_set {
            let pass = self
                .device
                .render_pass(target)
                .ok_or_else(|| stale("render pass", target))?;
            let (width, height) = (pass.width(), pass.height());
            self.session.list.push(Command::SetViewport {
                viewport: Viewport::from_dimensions(width, height),
                scissor: ScissorRect::from_dimensions(width, height),
            });
            self.session.viewport_set = true;
        }
        Ok(())
    }

    /// Draw `vertex_count` vertices of one instance.
    pub fn draw(&mut self, vertex_count: u32) -> Result<(), RhiError> {
        self.draw_instanced(vertex_count, 1, 0, 0)
    }

    /// Draw instanced, non-indexed primitives.
    pub fn draw_instanced(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), RhiError> {
        self.prepare_draw("draw")?;
        self.session.list.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        Ok(())
    }

    /// Draw `index_count` indices of one instance.
    pub fn draw_indexed(&mut self, index_count: u32) -> Result<(), RhiError> {
        self.draw_indexed_instanced(index_count, 1, 0, 0, 0)
    }

    /// Draw instanced, indexed primitives.
    pub fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<(), RhiError> {
        self.prepare_draw("draw_indexed")?;
        self.session.list.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
        Ok(())
    }

    /// Dispatch compute workgroups with the bound compute pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidParameter`] without a bound compute pipeline and
    /// inside a render pass.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), RhiError> {
        self.recording_list()?;
        let (_, pipeline) = self.current_pipeline()?;
        if !pipeline.is_compute() {
            return Err(RhiError::invalid(format!(
                "dispatch with graphics pipeline '{}' bound",
                pipeline.desc().debug_name()
            )));
        }
        if self.session.pass.is_some() {
            return Err(RhiError::invalid("dispatch inside a render pass"));
        }
        self.session.list.push(Command::Dispatch { x, y, z });
        Ok(())
    }
}
