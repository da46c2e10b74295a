//! Pipelines and their reflection-driven binding layouts.
//!
//! A pipeline is built from one WGSL program:
//!
//! ```text
//! load + validate ─► reflect each stage ─► LayoutBuilder ─► rewrite bindings ─► SPIR-V ─► backend
//! ```
//!
//! The resulting [`BindingLayout`] maps resource names to slots and is what
//! [`Rhi::bind_parameter`](crate::Rhi::bind_parameter) resolves against. Reloading a
//! pipeline repeats the whole process from the same [`PipelineDesc`] and swaps the
//! backend objects in place, so the [`PipelineHandle`] stays valid.

mod layout;

use std::sync::Arc;

pub use layout::{
    BindingLayout, BindingSlot, DescriptorKind, LayoutBuilder, LayoutPlan, PushConstantRange,
    SlotKind, StaticSampler,
};

use crate::arena::Handle;
use crate::backend::{CompiledStage, GpuPipeline, PipelineBuild, RasterTarget};
use crate::device::{Device, stale};
use crate::error::RhiError;
use crate::profiling::profile_scope;
use crate::render_pass::RenderPassHandle;
use crate::shader::{
    ShaderSource, VertexLayout, load_program, reflect_stage, reflect_vertex_inputs,
    write_intermediate,
};
use crate::types::{ShaderStage, TextureFormat};

/// Handle to a [`Pipeline`] owned by the device.
pub type PipelineHandle = Handle<Pipeline>;

/// Color blending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Overwrite the target.
    #[default]
    Opaque,
    /// Premultiplied-free alpha blending: `src * a + dst * (1 - a)`.
    Alpha,
    /// `src + dst`.
    Additive,
}

/// Face culling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

/// Depth comparison function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
    Always,
}

/// Primitive assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

/// Fixed-function state of a graphics pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawState {
    /// Color blending.
    pub blend: BlendMode,
    /// Face culling.
    pub cull: CullMode,
    /// Depth test; `None` disables it. Ignored for passes without depth.
    pub depth_compare: Option<CompareFunction>,
    /// Write depth.
    pub depth_write: bool,
    /// Primitive assembly.
    pub topology: PrimitiveTopology,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            blend: BlendMode::Opaque,
            cull: CullMode::Back,
            depth_compare: Some(CompareFunction::Less),
            depth_write: true,
            topology: PrimitiveTopology::TriangleList,
        }
    }
}

/// Graphics or compute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Vertex + fragment stages rendering into a render pass.
    Graphics {
        vertex_entry: String,
        fragment_entry: String,
        render_pass: RenderPassHandle,
    },
    /// A compute stage.
    Compute { entry: String },
}

/// Everything needed to (re)build a pipeline.
///
/// # Example
///
/// ```ignore
/// let desc = PipelineDesc::graphics("triangle", pass)
///     .with_label("triangle")
///     .with_cull(CullMode::None);
/// let pipeline = rhi.device_mut().create_pipeline(&desc)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineDesc {
    /// Debug label.
    pub label: Option<String>,
    /// Program source.
    pub program: ShaderSource,
    /// Stages and target.
    pub kind: PipelineKind,
    /// Fixed-function state; unused by compute pipelines.
    pub state: DrawState,
}

impl PipelineDesc {
    /// Graphics pipeline with entry points `vs_main` and `fs_main`.
    pub fn graphics(program: impl Into<ShaderSource>, render_pass: RenderPassHandle) -> Self {
        Self {
            label: None,
            program: program.into(),
            kind: PipelineKind::Graphics {
                vertex_entry: "vs_main".to_string(),
                fragment_entry: "fs_main".to_string(),
                render_pass,
            },
            state: DrawState::default(),
        }
    }

    /// Compute pipeline with entry point `cs_main`.
    pub fn compute(program: impl Into<ShaderSource>) -> Self {
        Self {
            label: None,
            program: program.into(),
            kind: PipelineKind::Compute {
                entry: "cs_main".to_string(),
            },
            state: DrawState::default(),
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Override the entry point(s): `(vertex, fragment)` for graphics, the first
    /// name for compute.
    pub fn with_entry_points(mut self, first: impl Into<String>, second: impl Into<String>) -> Self {
        match &mut self.kind {
            PipelineKind::Graphics {
                vertex_entry,
                fragment_entry,
                ..
            } => {
                *vertex_entry = first.into();
                *fragment_entry = second.into();
            }
            PipelineKind::Compute { entry } => *entry = first.into(),
        }
        self
    }

    /// Replace the fixed-function state.
    pub fn with_state(mut self, state: DrawState) -> Self {
        self.state = state;
        self
    }

    /// Set blending.
    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.state.blend = blend;
        self
    }

    /// Set culling.
    pub fn with_cull(mut self, cull: CullMode) -> Self {
        self.state.cull = cull;
        self
    }

    /// Set the depth test and depth writes.
    pub fn with_depth(mut self, compare: Option<CompareFunction>, write: bool) -> Self {
        self.state.depth_compare = compare;
        self.state.depth_write = write;
        self
    }

    /// Whether this is a compute pipeline.
    pub fn is_compute(&self) -> bool {
        matches!(self.kind, PipelineKind::Compute { .. })
    }

    /// Stages with their entry points, vertex before fragment.
    pub fn stages(&self) -> Vec<(ShaderStage, &str)> {
        match &self.kind {
            PipelineKind::Graphics {
                vertex_entry,
                fragment_entry,
                ..
            } => vec![
                (ShaderStage::Vertex, vertex_entry.as_str()),
                (ShaderStage::Fragment, fragment_entry.as_str()),
            ],
            PipelineKind::Compute { entry } => vec![(ShaderStage::Compute, entry.as_str())],
        }
    }

    /// Label used in logs and debug names.
    pub fn debug_name(&self) -> &str {
        self.label.as_deref().unwrap_or_else(|| self.program.name())
    }
}

/// A compiled pipeline record.
pub struct Pipeline {
    pub(crate) desc: PipelineDesc,
    pub(crate) layout: BindingLayout,
    pub(crate) vertex_layout: VertexLayout,
    pub(crate) color_formats: Vec<TextureFormat>,
    pub(crate) depth_format: Option<TextureFormat>,
    pub(crate) gpu: Arc<GpuPipeline>,
    pub(crate) reloads: u32,
}

impl Pipeline {
    /// The description it was built from.
    pub fn desc(&self) -> &PipelineDesc {
        &self.desc
    }

    /// Name to slot map.
    pub fn layout(&self) -> &BindingLayout {
        &self.layout
    }

    /// Vertex buffer layout; empty for compute pipelines.
    pub fn vertex_layout(&self) -> &VertexLayout {
        &self.vertex_layout
    }

    /// Whether this is a compute pipeline.
    pub fn is_compute(&self) -> bool {
        self.desc.is_compute()
    }

    /// Render pass a graphics pipeline targets.
    pub fn render_pass(&self) -> Option<RenderPassHandle> {
        match self.desc.kind {
            PipelineKind::Graphics { render_pass, .. } => Some(render_pass),
            PipelineKind::Compute { .. } => None,
        }
    }

    /// Color formats it was built for.
    pub fn color_formats(&self) -> &[TextureFormat] {
        &self.color_formats
    }

    /// How often it was reloaded.
    pub fn reloads(&self) -> u32 {
        self.reloads
    }

    /// Backend object.
    pub fn gpu(&self) -> &Arc<GpuPipeline> {
        &self.gpu
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("label", &self.desc.debug_name())
            .field("slots", &self.layout.len())
            .field("reloads", &self.reloads)
            .finish_non_exhaustive()
    }
}

struct BuiltPipeline {
    layout: BindingLayout,
    vertex_layout: VertexLayout,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
    gpu: Arc<GpuPipeline>,
}

impl Device {
    /// Compile a pipeline and build its binding layout.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderCompilationFailed`] when the program cannot be
    /// read, parsed, validated or translated, and [`RhiError::InvalidParameter`]
    /// for a stale render pass handle.
    pub fn create_pipeline(&mut self, desc: &PipelineDesc) -> Result<PipelineHandle, RhiError> {
        profile_scope!("create_pipeline");

        let built = self.build_pipeline(desc)?;
        log::debug!(
            "Device: created pipeline '{}' ({} slots, {} samplers, push constants: {:?})",
            desc.debug_name(),
            built.layout.len(),
            built.layout.named_samplers().len(),
            built.layout.push_constants().map(|p| p.size)
        );

        Ok(self.pipelines.insert(Pipeline {
            desc: desc.clone(),
            layout: built.layout,
            vertex_layout: built.vertex_layout,
            color_formats: built.color_formats,
            depth_format: built.depth_format,
            gpu: built.gpu,
            reloads: 0,
        }))
    }

    /// Rebuild a pipeline from its description, e.g. after its source changed.
    ///
    /// The handle stays valid. When the rebuild fails, the previous pipeline is kept
    /// and the error is returned.
    pub fn reload_pipeline(&mut self, handle: PipelineHandle) -> Result<(), RhiError> {
        profile_scope!("reload_pipeline");

        let desc = self
            .pipelines
            .get(handle)
            .ok_or_else(|| stale("pipeline", handle))?
            .desc
            .clone();
        let built = self.build_pipeline(&desc)?;

        let pipeline = self
            .pipelines
            .get_mut(handle)
            .ok_or_else(|| stale("pipeline", handle))?;
        pipeline.layout = built.layout;
        pipeline.vertex_layout = built.vertex_layout;
        pipeline.color_formats = built.color_formats;
        pipeline.depth_format = built.depth_format;
        pipeline.gpu = built.gpu;
        pipeline.reloads += 1;

        log::info!(
            "Device: reloaded pipeline '{}' (reload #{})",
            desc.debug_name(),
            pipeline.reloads
        );
        Ok(())
    }

    /// Destroy a pipeline. Frames in flight keep its backend objects alive.
    pub fn release_pipeline(&mut self, handle: PipelineHandle) {
        if let Some(pipeline) = self.pipelines.release(handle) {
            log::trace!("Device: released pipeline '{}'", pipeline.desc.debug_name());
        }
    }

    fn build_pipeline(&self, desc: &PipelineDesc) -> Result<BuiltPipeline, RhiError> {
        let stages = desc.stages();
        let stage_kinds: Vec<ShaderStage> = stages.iter().map(|(stage, _)| *stage).collect();

        let mut program = load_program(&desc.program, &self.shader_root, &stage_kinds)?;
        let entries = stages
            .iter()
            .map(|(stage, entry)| program.entry_point(*stage, entry))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = LayoutBuilder::new(self.limits().max_push_constant_size);
        for ((stage, _), entry) in stages.iter().zip(&entries) {
            let bindings = reflect_stage(&program, *stage, *entry)?;
            builder.visit_stage(*stage, &bindings);
        }
        let vertex_layout = if desc.is_compute() {
            VertexLayout::default()
        } else {
            reflect_vertex_inputs(&program, entries[0])?
        };

        let plan = builder.finish();
        plan.apply(&mut program.module);
        program.revalidate(&stage_kinds)?;

        let compiled = stages
            .iter()
            .map(|(stage, entry)| {
                let spirv = program.emit_spirv(*stage, entry)?;
                if self.shader_intermediates {
                    write_intermediate(&self.shader_root, &program.name, *stage, &spirv);
                }
                Ok(CompiledStage {
                    stage: *stage,
                    entry_point: entry.to_string(),
                    spirv,
                })
            })
            .collect::<Result<Vec<_>, RhiError>>()?;

        let (color_formats, depth_format) = match &desc.kind {
            PipelineKind::Graphics { render_pass, .. } => {
                let pass = self
                    .render_passes
                    .get(*render_pass)
                    .ok_or_else(|| stale("render pass", *render_pass))?;
                (pass.color_formats().to_vec(), pass.depth_format())
            }
            PipelineKind::Compute { .. } => (Vec::new(), None),
        };

        let layout = plan.layout;
        let raster = (!desc.is_compute()).then(|| RasterTarget {
            vertex_layout: &vertex_layout,
            color_formats: &color_formats,
            depth_format,
            state: desc.state,
        });
        let gpu = self.backend().create_pipeline(&PipelineBuild {
            label: desc.debug_name(),
            stages: &compiled,
            entries: layout.entries(),
            samplers: layout.samplers(),
            push_constants: layout.push_constants(),
            raster,
        })?;

        Ok(BuiltPipeline {
            layout,
            vertex_layout,
            color_formats,
            depth_format,
            gpu: Arc::new(gpu),
        })
    }
}
