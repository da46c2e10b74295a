//! Reflection over naga IR.
//!
//! [`reflect_stage`] reports every resource an entry point actually uses, tagged
//! with the kind the binding-layout builder dispatches on. [`reflect_vertex_inputs`]
//! derives the vertex buffer layout from a vertex entry point's `@location` inputs.

use naga::{AddressSpace, Binding, ImageClass, ScalarKind, StorageAccess, TypeInner, VectorSize};

use crate::error::RhiError;
use crate::types::ShaderStage;

use super::{ShaderProgram, compile_error};

/// Whether a read-write resource is a buffer or a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Buffer,
    Texture,
}

/// A shader resource classified for slot assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectedResource {
    /// Sampled or depth texture.
    Texture { name: String },
    /// Read-only storage buffer.
    StructuredBuffer { name: String },
    /// Uniform block.
    ConstantBuffer {
        name: String,
        /// Number of struct members (1 for a non-struct block).
        members: u32,
        /// Size of the whole block in bytes.
        size: u32,
        /// Size of the first member in bytes.
        member_size: u32,
    },
    /// Read-write storage buffer or storage texture.
    StorageResource { name: String, kind: StorageKind },
    /// Sampler.
    Sampler { name: String },
}

impl ReflectedResource {
    /// Name the resource is declared with.
    pub fn name(&self) -> &str {
        match self {
            Self::Texture { name }
            | Self::StructuredBuffer { name }
            | Self::ConstantBuffer { name, .. }
            | Self::StorageResource { name, .. }
            | Self::Sampler { name } => name,
        }
    }
}

/// A resource used by an entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedBinding {
    /// Global variable the resource is declared as.
    pub global: naga::Handle<naga::GlobalVariable>,
    /// Bind group it was declared in.
    pub group: u32,
    /// Classification.
    pub resource: ReflectedResource,
}

/// Report the resources used by entry point `entry_index`, in declaration order.
pub fn reflect_stage(
    program: &ShaderProgram,
    stage: ShaderStage,
    entry_index: usize,
) -> Result<Vec<ReflectedBinding>, RhiError> {
    let module = &program.module;
    let usage = program.info.get_entry_point(entry_index);
    let mut bindings = Vec::new();

    for (handle, global) in module.global_variables.iter() {
        if usage[handle].is_empty() {
            continue;
        }

        let name = global
            .name
            .clone()
            .unwrap_or_else(|| format!("{handle:?}"));
        let inner = &module.types[global.ty].inner;
        let group = global.binding.as_ref().map_or(0, |b| b.group);
        if group != 0 {
            return Err(compile_error(
                &program.file,
                &[stage],
                format!("resource '{name}' is in group {group}; all resources must be in group 0"),
            ));
        }

        let resource = match global.space {
            AddressSpace::Uniform => {
                let (members, member_size) = match inner {
                    TypeInner::Struct { members, .. } => (
                        members.len() as u32,
                        members
                            .first()
                            .map_or(0, |m| module.types[m.ty].inner.size(module.to_ctx())),
                    ),
                    other => (1, other.size(module.to_ctx())),
                };
                ReflectedResource::ConstantBuffer {
                    name,
                    members,
                    size: inner.size(module.to_ctx()),
                    member_size,
                }
            }
            AddressSpace::Storage { access } => {
                if access.contains(StorageAccess::STORE) {
                    ReflectedResource::StorageResource {
                        name,
                        kind: StorageKind::Buffer,
                    }
                } else {
                    ReflectedResource::StructuredBuffer { name }
                }
            }
            AddressSpace::Handle => match inner {
                TypeInner::Image {
                    class: ImageClass::Storage { .. },
                    ..
                } => ReflectedResource::StorageResource {
                    name,
                    kind: StorageKind::Texture,
                },
                TypeInner::Image { .. } => ReflectedResource::Texture { name },
                TypeInner::Sampler { .. } => ReflectedResource::Sampler { name },
                _ => {
                    return Err(compile_error(
                        &program.file,
                        &[stage],
                        format!("resource '{name}' has an unsupported type (binding arrays are not supported)"),
                    ));
                }
            },
            AddressSpace::PushConstant => {
                return Err(compile_error(
                    &program.file,
                    &[stage],
                    format!(
                        "'{name}' is a push_constant variable; declare inline constants as a single-member uniform block"
                    ),
                ));
            }
            AddressSpace::Function | AddressSpace::Private | AddressSpace::WorkGroup => continue,
        };

        bindings.push(ReflectedBinding {
            global: handle,
            group,
            resource,
        });
    }

    Ok(bindings)
}

/// Format of one vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float,
    Float2,
    Float3,
    Float4,
    Uint,
    Uint2,
    Uint3,
    Uint4,
    Sint,
    Sint2,
    Sint3,
    Sint4,
}

impl VertexFormat {
    /// Format for a component count and numeric kind.
    pub fn from_components(kind: ScalarKind, components: u32) -> Option<Self> {
        use VertexFormat::*;
        let format = match (kind, components) {
            (ScalarKind::Float, 1) => Float,
            (ScalarKind::Float, 2) => Float2,
            (ScalarKind::Float, 3) => Float3,
            (ScalarKind::Float, 4) => Float4,
            (ScalarKind::Uint, 1) => Uint,
            (ScalarKind::Uint, 2) => Uint2,
            (ScalarKind::Uint, 3) => Uint3,
            (ScalarKind::Uint, 4) => Uint4,
            (ScalarKind::Sint, 1) => Sint,
            (ScalarKind::Sint, 2) => Sint2,
            (ScalarKind::Sint, 3) => Sint3,
            (ScalarKind::Sint, 4) => Sint4,
            _ => return None,
        };
        Some(format)
    }

    /// Number of 32-bit components.
    pub fn components(&self) -> u32 {
        use VertexFormat::*;
        match self {
            Float | Uint | Sint => 1,
            Float2 | Uint2 | Sint2 => 2,
            Float3 | Uint3 | Sint3 => 3,
            Float4 | Uint4 | Sint4 => 4,
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> u32 {
        self.components() * 4
    }
}

/// One attribute of the vertex buffer layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader location.
    pub location: u32,
    /// Format.
    pub format: VertexFormat,
    /// Offset in bytes within a vertex.
    pub offset: u32,
    /// Input name, for diagnostics.
    pub name: String,
}

/// Interleaved layout of a single vertex buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    /// Bytes per vertex.
    pub stride: u32,
    /// Attributes in location order, tightly packed.
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Whether the vertex stage reads no vertex buffer.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

fn vector_components(size: VectorSize) -> u32 {
    match size {
        VectorSize::Bi => 2,
        VectorSize::Tri => 3,
        VectorSize::Quad => 4,
    }
}

/// Derive the vertex layout from a vertex entry point's location inputs.
pub fn reflect_vertex_inputs(
    program: &ShaderProgram,
    entry_index: usize,
) -> Result<VertexLayout, RhiError> {
    let module = &program.module;
    let entry = &program.module.entry_points[entry_index];

    let mut inputs: Vec<(u32, String, naga::Handle<naga::Type>)> = Vec::new();
    for argument in &entry.function.arguments {
        let arg_name = argument.name.clone().unwrap_or_default();
        match &argument.binding {
            Some(Binding::Location { location, .. }) => {
                inputs.push((*location, arg_name, argument.ty));
            }
            Some(Binding::BuiltIn(_)) => {}
            None => {
                if let TypeInner::Struct { members, .. } = &module.types[argument.ty].inner {
                    for member in members {
                        if let Some(Binding::Location { location, .. }) = member.binding {
                            let name = member.name.clone().unwrap_or_else(|| arg_name.clone());
                            inputs.push((location, name, member.ty));
                        }
                    }
                }
            }
        }
    }
    inputs.sort_by_key(|(location, ..)| *location);

    let mut layout = VertexLayout::default();
    for (location, name, ty) in inputs {
        let (kind, width, components) = match module.types[ty].inner {
            TypeInner::Scalar(scalar) => (scalar.kind, scalar.width, 1),
            TypeInner::Vector { size, scalar } => (scalar.kind, scalar.width, vector_components(size)),
            _ => (ScalarKind::Bool, 0, 0),
        };
        let format = VertexFormat::from_components(kind, components)
            .filter(|_| width == 4)
            .ok_or_else(|| {
                compile_error(
                    &program.file,
                    &[ShaderStage::Vertex],
                    format!("vertex input '{name}' at location {location} has an unsupported type"),
                )
            })?;
        layout.attributes.push(VertexAttribute {
            location,
            format,
            offset: layout.stride,
            name,
        });
        layout.stride += format.size();
    }

    Ok(layout)
}
