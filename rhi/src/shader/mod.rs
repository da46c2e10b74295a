//! Shader loading, compilation and reflection.
//!
//! Programs are WGSL files read from `<shader_root>/<program>.wgsl`. A program is
//! parsed once per pipeline build with naga, reflected per entry point (see
//! [`reflection`]), rewritten with the binding numbers the layout builder
//! assigns, and finally emitted as SPIR-V per stage.
//!
//! Every diagnostic produced here names the file, the stage(s) and the message
//! reported by the compiler, e.g. `shaders/triangle.wgsl [vertex]: ...`.

pub mod reflection;

use std::path::{Path, PathBuf};

use crate::error::RhiError;
use crate::profiling::profile_scope;
use crate::types::ShaderStage;

pub use reflection::{
    ReflectedBinding, ReflectedResource, StorageKind, VertexAttribute, VertexFormat,
    VertexLayout, reflect_stage, reflect_vertex_inputs,
};

/// File extension of shader programs.
pub const SHADER_EXTENSION: &str = "wgsl";

/// Where a program's source comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShaderSource {
    /// `<shader_root>/<name>.wgsl`.
    Program(String),
    /// Source embedded in the binary, named for diagnostics.
    Inline { name: String, source: String },
}

impl ShaderSource {
    /// Program read from the shader root.
    pub fn program(name: impl Into<String>) -> Self {
        Self::Program(name.into())
    }

    /// Program embedded in the binary.
    pub fn inline(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self::Inline {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Program name.
    pub fn name(&self) -> &str {
        match self {
            Self::Program(name) => name,
            Self::Inline { name, .. } => name,
        }
    }

    /// Path of a file-backed program under `root`.
    pub fn path(&self, root: &Path) -> Option<PathBuf> {
        match self {
            Self::Program(name) => Some(root.join(format!("{name}.{SHADER_EXTENSION}"))),
            Self::Inline { .. } => None,
        }
    }
}

impl From<&str> for ShaderSource {
    fn from(name: &str) -> Self {
        Self::Program(name.to_string())
    }
}

impl From<String> for ShaderSource {
    fn from(name: String) -> Self {
        Self::Program(name)
    }
}

/// A parsed and validated program.
pub struct ShaderProgram {
    /// Program name.
    pub name: String,
    /// File name used in diagnostics.
    pub file: String,
    /// naga IR.
    pub module: naga::Module,
    /// Validation results for `module`.
    pub info: naga::valid::ModuleInfo,
}

impl std::fmt::Debug for ShaderProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("entry_points", &self.module.entry_points.len())
            .finish_non_exhaustive()
    }
}

fn stage_list(stages: &[ShaderStage]) -> String {
    stages
        .iter()
        .map(|s| s.name())
        .collect::<Vec<_>>()
        .join("+")
}

/// Build a compilation error naming the file, stage(s) and message.
pub fn compile_error(file: &str, stages: &[ShaderStage], message: impl AsRef<str>) -> RhiError {
    RhiError::ShaderCompilationFailed(format!(
        "{file} [{}]: {}",
        stage_list(stages),
        message.as_ref()
    ))
}

/// Load, parse and validate a program for the given stages.
pub fn load_program(
    source: &ShaderSource,
    root: &Path,
    stages: &[ShaderStage],
) -> Result<ShaderProgram, RhiError> {
    profile_scope!("shader_load");

    let (file, text) = match source {
        ShaderSource::Program(name) => {
            let path = root.join(format!("{name}.{SHADER_EXTENSION}"));
            let file = path.display().to_string();
            let text = std::fs::read_to_string(&path)
                .map_err(|e| compile_error(&file, stages, format!("cannot read file: {e}")))?;
            (file, text)
        }
        ShaderSource::Inline { name, source } => {
            (format!("<inline:{name}>"), source.clone())
        }
    };

    let module = naga::front::wgsl::parse_str(&text)
        .map_err(|e| compile_error(&file, stages, e.message()))?;
    let info = validate(&module, &file, stages)?;

    log::trace!("Parsed shader program {file}");
    Ok(ShaderProgram {
        name: source.name().to_string(),
        file,
        module,
        info,
    })
}

/// Validate a module, e.g. again after binding rewrites.
pub fn validate(
    module: &naga::Module,
    file: &str,
    stages: &[ShaderStage],
) -> Result<naga::valid::ModuleInfo, RhiError> {
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(module)
        .map_err(|e| compile_error(file, stages, format!("validation error: {e}")))
}

/// Convert a stage to naga's stage enum.
pub fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
        ShaderStage::Compute => naga::ShaderStage::Compute,
    }
}

impl ShaderProgram {
    /// Index of the entry point `name` for `stage`.
    pub fn entry_point(&self, stage: ShaderStage, name: &str) -> Result<usize, RhiError> {
        let naga_stage = naga_stage(stage);
        self.module
            .entry_points
            .iter()
            .position(|ep| ep.name == name && ep.stage == naga_stage)
            .ok_or_else(|| {
                compile_error(
                    &self.file,
                    &[stage],
                    format!("entry point '{name}' not found"),
                )
            })
    }

    /// Re-validate after the module was rewritten.
    pub fn revalidate(&mut self, stages: &[ShaderStage]) -> Result<(), RhiError> {
        self.info = validate(&self.module, &self.file, stages)?;
        Ok(())
    }

    /// Emit SPIR-V for one entry point.
    pub fn emit_spirv(&self, stage: ShaderStage, entry_point: &str) -> Result<Vec<u32>, RhiError> {
        profile_scope!("shader_emit_spirv");

        self.entry_point(stage, entry_point)?;

        let options = naga::back::spv::Options {
            lang_version: (1, 3),
            flags: naga::back::spv::WriterFlags::empty(),
            capabilities: None,
            bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
            binding_map: Default::default(),
            debug_info: None,
            zero_initialize_workgroup_memory:
                naga::back::spv::ZeroInitializeWorkgroupMemoryMode::None,
        };

        let pipeline_options = naga::back::spv::PipelineOptions {
            shader_stage: naga_stage(stage),
            entry_point: entry_point.to_string(),
        };

        naga::back::spv::write_vec(&self.module, &self.info, &options, Some(&pipeline_options))
            .map_err(|e| {
                compile_error(
                    &self.file,
                    &[stage],
                    format!("SPIR-V generation error: {e}"),
                )
            })
    }
}

/// Path of the intermediate SPIR-V written for a program stage.
pub fn intermediate_path(root: &Path, program: &str, stage: ShaderStage) -> PathBuf {
    root.join("intermediate")
        .join(format!("{program}.{}.spv", stage.name()))
}

/// Write a stage's SPIR-V under `<root>/intermediate/` for profiler symbolication.
///
/// Failures are logged; they never fail pipeline creation.
pub fn write_intermediate(root: &Path, program: &str, stage: ShaderStage, spirv: &[u32]) {
    let path = intermediate_path(root, program, stage);
    let result = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|_| std::fs::write(&path, bytemuck::cast_slice::<u32, u8>(spirv)));
    match result {
        Ok(()) => log::trace!("Wrote shader intermediate {}", path.display()),
        Err(e) => log::warn!(
            "Failed to write shader intermediate {}: {e}",
            path.display()
        ),
    }
}
