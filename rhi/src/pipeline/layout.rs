//! Reflection-driven binding layouts.
//!
//! [`LayoutBuilder`] visits every [`ReflectedResource`] of every stage of a
//! pipeline, in stage order and then declaration order, and turns each into a
//! slot of the pipeline's [`BindingLayout`]:
//!
//! | Resource | Result |
//! |----------|--------|
//! | texture, read-only storage buffer | table slot, deduplicated by name |
//! | uniform block with one member | push constants (first such block only) |
//! | uniform block with several members | table slot, deduplicated by name |
//! | read-write buffer or storage texture | table slot, deduplicated by name |
//! | sampler | static sampler chosen by name |
//!
//! Table bindings are numbered from 0 in visit order; static samplers follow the
//! last table binding. The builder then rewrites the naga module so the shader
//! uses exactly these numbers.
//!
//! A name used for two different kinds of resource has no layout. The builder
//! panics on it instead of returning an error.

use std::collections::{BTreeMap, HashMap};

use naga::{AddressSpace, ResourceBinding};

use crate::backend::{LayoutEntry, SamplerEntry};
use crate::shader::{ReflectedBinding, ReflectedResource, StorageKind};
use crate::types::{ShaderStage, ShaderStages, align_up};

/// Type of a descriptor-table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Uniform buffer.
    UniformBuffer,
    /// Storage buffer, read-only unless `writable`.
    StorageBuffer { writable: bool },
    /// Sampled texture.
    SampledTexture,
    /// Storage texture.
    StorageTexture,
}

/// The two sampler configurations baked into every pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticSampler {
    /// Linear filtering, clamp-to-edge addressing.
    LinearClamp,
    /// Linear filtering, repeat addressing.
    LinearWrap,
}

impl StaticSampler {
    /// Pick the configuration from a sampler's name: `clamp` selects
    /// [`StaticSampler::LinearClamp`], anything else wraps.
    pub fn from_name(name: &str) -> Self {
        if name.to_ascii_lowercase().contains("clamp") {
            Self::LinearClamp
        } else {
            Self::LinearWrap
        }
    }
}

/// Inline constants of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    /// Size in bytes, a multiple of 4.
    pub size: u32,
    /// Stages that read them.
    pub visibility: ShaderStages,
}

/// What a slot binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// A descriptor at `binding` of group 0.
    Table { binding: u32, kind: DescriptorKind },
    /// The pipeline's push constants.
    Constants { size: u32 },
}

/// One named slot of a binding layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSlot {
    /// Slot index, in visit order.
    pub index: u32,
    /// Binding target.
    pub kind: SlotKind,
    /// Stages that use the resource.
    pub visibility: ShaderStages,
}

/// A pipeline's name to slot map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingLayout {
    slots: BTreeMap<String, BindingSlot>,
    samplers: Vec<(String, SamplerEntry)>,
    push_constants: Option<PushConstantRange>,
}

impl BindingLayout {
    /// Slot bound to `name`, if the pipeline uses it.
    pub fn slot(&self, name: &str) -> Option<&BindingSlot> {
        self.slots.get(name)
    }

    /// Name to slot index map.
    pub fn slot_map(&self) -> BTreeMap<String, u32> {
        self.slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.index))
            .collect()
    }

    /// Number of slots, push constants included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pipeline binds nothing by name.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Descriptor-table entries ordered by binding.
    pub fn entries(&self) -> Vec<LayoutEntry> {
        let mut entries: Vec<_> = self
            .slots
            .values()
            .filter_map(|slot| match slot.kind {
                SlotKind::Table { binding, kind } => Some(LayoutEntry {
                    binding,
                    kind,
                    visibility: slot.visibility,
                }),
                SlotKind::Constants { .. } => None,
            })
            .collect();
        entries.sort_by_key(|e| e.binding);
        entries
    }

    /// Static samplers with their names.
    pub fn named_samplers(&self) -> &[(String, SamplerEntry)] {
        &self.samplers
    }

    /// Static samplers.
    pub fn samplers(&self) -> Vec<SamplerEntry> {
        self.samplers.iter().map(|(_, entry)| *entry).collect()
    }

    /// Push constant range, if a uniform block was promoted.
    pub fn push_constants(&self) -> Option<PushConstantRange> {
        self.push_constants
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assignment {
    Binding(u32),
    PushConstant,
}

struct PendingSampler {
    name: String,
    sampler: StaticSampler,
    visibility: ShaderStages,
    globals: Vec<naga::Handle<naga::GlobalVariable>>,
}

/// Builds a [`BindingLayout`] by visiting reflected resources.
pub struct LayoutBuilder {
    max_push_constant_size: u32,
    slots: BTreeMap<String, BindingSlot>,
    next_slot: u32,
    next_binding: u32,
    push_constants: Option<PushConstantRange>,
    samplers: Vec<PendingSampler>,
    assignments: HashMap<naga::Handle<naga::GlobalVariable>, Assignment>,
    slot_globals: HashMap<String, naga::Handle<naga::GlobalVariable>>,
}

/// A finished layout and the rewrites that make a module match it.
pub struct LayoutPlan {
    /// The layout.
    pub layout: BindingLayout,
    assignments: HashMap<naga::Handle<naga::GlobalVariable>, Assignment>,
}

impl LayoutBuilder {
    /// Create a builder. Single-member uniform blocks larger than
    /// `max_push_constant_size` stay table slots.
    pub fn new(max_push_constant_size: u32) -> Self {
        Self {
            max_push_constant_size,
            slots: BTreeMap::new(),
            next_slot: 0,
            next_binding: 0,
            push_constants: None,
            samplers: Vec::new(),
            assignments: HashMap::new(),
            slot_globals: HashMap::new(),
        }
    }

    /// Visit every resource of one stage.
    pub fn visit_stage(&mut self, stage: ShaderStage, bindings: &[ReflectedBinding]) {
        for binding in bindings {
            self.visit(stage, binding);
        }
    }

    /// Visit one resource.
    pub fn visit(&mut self, stage: ShaderStage, binding: &ReflectedBinding) {
        let visibility = ShaderStages::from(stage);
        match &binding.resource {
            ReflectedResource::Texture { name } => {
                self.table_slot(name, binding.global, DescriptorKind::SampledTexture, visibility)
            }
            ReflectedResource::StructuredBuffer { name } => self.table_slot(
                name,
                binding.global,
                DescriptorKind::StorageBuffer { writable: false },
                visibility,
            ),
            ReflectedResource::ConstantBuffer {
                name,
                members,
                member_size,
                ..
            } => {
                if *members == 1 && !self.slots.contains_key(name) && self.can_promote(*member_size)
                {
                    self.push_constant_slot(name, binding.global, *member_size, visibility);
                } else {
                    self.table_slot(
                        name,
                        binding.global,
                        DescriptorKind::UniformBuffer,
                        visibility,
                    );
                }
            }
            ReflectedResource::StorageResource { name, kind } => {
                let kind = match kind {
                    StorageKind::Buffer => DescriptorKind::StorageBuffer { writable: true },
                    StorageKind::Texture => DescriptorKind::StorageTexture,
                };
                self.table_slot(name, binding.global, kind, visibility)
            }
            ReflectedResource::Sampler { name } => {
                if let Some(slot) = self.slots.get(name) {
                    conflict(name, &describe(slot.kind), "sampler");
                }
                if let Some(pending) = self.samplers.iter_mut().find(|s| &s.name == name) {
                    pending.visibility |= visibility;
                    if !pending.globals.contains(&binding.global) {
                        pending.globals.push(binding.global);
                    }
                    return;
                }
                self.samplers.push(PendingSampler {
                    name: name.clone(),
                    sampler: StaticSampler::from_name(name),
                    visibility,
                    globals: vec![binding.global],
                });
            }
        }
    }

    fn can_promote(&self, member_size: u32) -> bool {
        self.push_constants.is_none() && member_size > 0 && member_size <= self.max_push_constant_size
    }

    fn push_constant_slot(
        &mut self,
        name: &str,
        global: naga::Handle<naga::GlobalVariable>,
        member_size: u32,
        visibility: ShaderStages,
    ) {
        if self.samplers.iter().any(|s| s.name == name) {
            conflict(name, "sampler", "push constants");
        }
        let size = align_up(member_size as u64, 4) as u32;
        self.push_constants = Some(PushConstantRange { size, visibility });
        self.insert_slot(name, global, SlotKind::Constants { size }, visibility);
        self.assignments.insert(global, Assignment::PushConstant);
    }

    fn table_slot(
        &mut self,
        name: &str,
        global: naga::Handle<naga::GlobalVariable>,
        kind: DescriptorKind,
        visibility: ShaderStages,
    ) {
        if self.samplers.iter().any(|s| s.name == name) {
            conflict(name, "sampler", &format!("{kind:?}"));
        }
        if let Some(slot) = self.slots.get(name) {
            let compatible = match slot.kind {
                SlotKind::Table { kind: existing, .. } => existing == kind,
                SlotKind::Constants { .. } => kind == DescriptorKind::UniformBuffer,
            };
            if !compatible {
                conflict(name, &describe(slot.kind), &format!("{kind:?}"));
            }
        }
        if self.widen(name, visibility) {
            if let Some(binding) = self.binding_of(name) {
                self.assignments.entry(global).or_insert(binding);
            }
            return;
        }
        let binding = self.next_binding;
        self.next_binding += 1;
        self.insert_slot(name, global, SlotKind::Table { binding, kind }, visibility);
        self.assignments.insert(global, Assignment::Binding(binding));
    }

    /// Widen the visibility of an existing slot; returns whether it existed.
    fn widen(&mut self, name: &str, visibility: ShaderStages) -> bool {
        let Some(slot) = self.slots.get_mut(name) else {
            return false;
        };
        slot.visibility |= visibility;
        if let SlotKind::Constants { .. } = slot.kind
            && let Some(range) = self.push_constants.as_mut()
        {
            range.visibility |= visibility;
        }
        true
    }

    fn binding_of(&self, name: &str) -> Option<Assignment> {
        self.slot_globals
            .get(name)
            .and_then(|global| self.assignments.get(global))
            .copied()
    }

    fn insert_slot(
        &mut self,
        name: &str,
        global: naga::Handle<naga::GlobalVariable>,
        kind: SlotKind,
        visibility: ShaderStages,
    ) {
        let index = self.next_slot;
        self.next_slot += 1;
        self.slots.insert(
            name.to_string(),
            BindingSlot {
                index,
                kind,
                visibility,
            },
        );
        self.slot_globals.insert(name.to_string(), global);
    }

    /// Number the samplers after the table and produce the layout.
    pub fn finish(mut self) -> LayoutPlan {
        let mut samplers = Vec::with_capacity(self.samplers.len());
        for pending in std::mem::take(&mut self.samplers) {
            let binding = self.next_binding;
            self.next_binding += 1;
            for global in &pending.globals {
                self.assignments.insert(*global, Assignment::Binding(binding));
            }
            samplers.push((
                pending.name,
                SamplerEntry {
                    binding,
                    sampler: pending.sampler,
                    visibility: pending.visibility,
                },
            ));
        }

        LayoutPlan {
            layout: BindingLayout {
                slots: self.slots,
                samplers,
                push_constants: self.push_constants,
            },
            assignments: self.assignments,
        }
    }
}

fn describe(kind: SlotKind) -> String {
    match kind {
        SlotKind::Table { kind, .. } => format!("{kind:?}"),
        SlotKind::Constants { .. } => "push constants".to_string(),
    }
}

fn conflict(name: &str, first: &str, second: &str) -> ! {
    panic!("binding layout: '{name}' is declared as {first} and as {second}")
}

impl LayoutPlan {
    /// Rewrite binding numbers and promote push constants in `module`.
    /// The module must be validated again afterwards.
    pub fn apply(&self, module: &mut naga::Module) {
        for (global, assignment) in &self.assignments {
            let variable = &mut module.global_variables[*global];
            match assignment {
                Assignment::Binding(binding) => {
                    variable.binding = Some(ResourceBinding {
                        group: 0,
                        binding: *binding,
                    });
                }
                Assignment::PushConstant => {
                    variable.space = AddressSpace::PushConstant;
                    variable.binding = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Handle of the `index`-th global of a module.
    fn global(index: usize) -> naga::Handle<naga::GlobalVariable> {
        let mut module = naga::Module::default();
        let ty = module.types.insert(
            naga::Type {
                name: None,
                inner: naga::TypeInner::Sampler { comparison: false },
            },
            naga::Span::UNDEFINED,
        );
        let handles: Vec<_> = (0..=index)
            .map(|i| {
                module.global_variables.append(
                    naga::GlobalVariable {
                        name: Some(format!("g{i}")),
                        space: AddressSpace::Handle,
                        binding: None,
                        ty,
                        init: None,
                    },
                    naga::Span::UNDEFINED,
                )
            })
            .collect();
        handles[index]
    }

    fn binding(index: usize, resource: ReflectedResource) -> ReflectedBinding {
        ReflectedBinding {
            global: global(index),
            group: 0,
            resource,
        }
    }

    fn texture(index: usize, name: &str) -> ReflectedBinding {
        binding(index, ReflectedResource::Texture { name: name.into() })
    }

    fn constants(index: usize, name: &str, members: u32, member_size: u32) -> ReflectedBinding {
        binding(
            index,
            ReflectedResource::ConstantBuffer {
                name: name.into(),
                members,
                size: member_size * members,
                member_size,
            },
        )
    }

    #[test]
    fn test_textures_dedupe_by_name() {
        let mut builder = LayoutBuilder::new(128);
        builder.visit_stage(ShaderStage::Vertex, &[texture(0, "albedo")]);
        builder.visit_stage(
            ShaderStage::Fragment,
            &[texture(0, "albedo"), texture(1, "normal")],
        );
        let layout = builder.finish().layout;

        assert_eq!(layout.len(), 2);
        let albedo = layout.slot("albedo").unwrap();
        assert_eq!(albedo.index, 0);
        assert_eq!(albedo.visibility, ShaderStages::VERTEX | ShaderStages::FRAGMENT);
        assert_eq!(
            layout.slot("normal").unwrap().kind,
            SlotKind::Table {
                binding: 1,
                kind: DescriptorKind::SampledTexture
            }
        );
    }

    #[test]
    fn test_single_member_constants_become_push_constants() {
        let mut builder = LayoutBuilder::new(128);
        builder.visit_stage(
            ShaderStage::Vertex,
            &[constants(0, "object", 1, 64), constants(1, "camera", 3, 16)],
        );
        let layout = builder.finish().layout;

        assert_eq!(
            layout.slot("object").unwrap().kind,
            SlotKind::Constants { size: 64 }
        );
        assert_eq!(
            layout.slot("camera").unwrap().kind,
            SlotKind::Table {
                binding: 0,
                kind: DescriptorKind::UniformBuffer
            }
        );
        assert_eq!(
            layout.push_constants(),
            Some(PushConstantRange {
                size: 64,
                visibility: ShaderStages::VERTEX
            })
        );
    }

    #[test]
    fn test_only_first_single_member_block_is_promoted() {
        let mut builder = LayoutBuilder::new(128);
        builder.visit_stage(
            ShaderStage::Fragment,
            &[constants(0, "a", 1, 16), constants(1, "b", 1, 16)],
        );
        let layout = builder.finish().layout;
        assert!(matches!(layout.slot("a").unwrap().kind, SlotKind::Constants { .. }));
        assert!(matches!(layout.slot("b").unwrap().kind, SlotKind::Table { .. }));
    }

    #[test]
    fn test_oversized_block_stays_in_table() {
        let mut builder = LayoutBuilder::new(128);
        builder.visit(ShaderStage::Compute, &constants(0, "big", 1, 256));
        let layout = builder.finish().layout;
        assert!(layout.push_constants().is_none());
        assert_eq!(layout.entries().len(), 1);
    }

    #[test]
    fn test_storage_resources() {
        let mut builder = LayoutBuilder::new(128);
        builder.visit_stage(
            ShaderStage::Compute,
            &[
                binding(
                    0,
                    ReflectedResource::StructuredBuffer {
                        name: "input".into(),
                    },
                ),
                binding(
                    1,
                    ReflectedResource::StorageResource {
                        name: "output".into(),
                        kind: StorageKind::Texture,
                    },
                ),
                binding(
                    2,
                    ReflectedResource::StorageResource {
                        name: "counters".into(),
                        kind: StorageKind::Buffer,
                    },
                ),
            ],
        );
        let entries = builder.finish().layout.entries();
        let kinds: Vec<_> = entries.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DescriptorKind::StorageBuffer { writable: false },
                DescriptorKind::StorageTexture,
                DescriptorKind::StorageBuffer { writable: true },
            ]
        );
    }

    #[test]
    fn test_samplers_follow_table() {
        let mut builder = LayoutBuilder::new(128);
        builder.visit_stage(
            ShaderStage::Fragment,
            &[
                binding(
                    0,
                    ReflectedResource::Sampler {
                        name: "linear_clamp".into(),
                    },
                ),
                texture(1, "albedo"),
                binding(
                    2,
                    ReflectedResource::Sampler {
                        name: "tiling".into(),
                    },
                ),
            ],
        );
        let layout = builder.finish().layout;

        assert!(layout.slot("linear_clamp").is_none());
        let samplers = layout.samplers();
        assert_eq!(samplers.len(), 2);
        assert_eq!(samplers[0].binding, 1);
        assert_eq!(samplers[0].sampler, StaticSampler::LinearClamp);
        assert_eq!(samplers[1].binding, 2);
        assert_eq!(samplers[1].sampler, StaticSampler::LinearWrap);
    }

    #[test]
    fn test_same_kind_in_two_stages_is_one_slot() {
        let mut builder = LayoutBuilder::new(128);
        builder.visit(ShaderStage::Vertex, &constants(0, "object", 1, 64));
        builder.visit(ShaderStage::Fragment, &constants(1, "object", 1, 64));
        let layout = builder.finish().layout;
        assert_eq!(layout.len(), 1);
        assert_eq!(
            layout.push_constants().unwrap().visibility,
            ShaderStages::VERTEX | ShaderStages::FRAGMENT
        );
    }

    #[test]
    #[should_panic(expected = "'albedo' is declared as SampledTexture and as StorageTexture")]
    fn test_name_with_two_kinds_panics() {
        let mut builder = LayoutBuilder::new(128);
        builder.visit(ShaderStage::Vertex, &texture(0, "albedo"));
        builder.visit(
            ShaderStage::Fragment,
            &binding(
                1,
                ReflectedResource::StorageResource {
                    name: "albedo".into(),
                    kind: StorageKind::Texture,
                },
            ),
        );
    }

    #[test]
    #[should_panic(expected = "'shadow' is declared as sampler and as SampledTexture")]
    fn test_sampler_name_reused_by_texture_panics() {
        let mut builder = LayoutBuilder::new(128);
        builder.visit(
            ShaderStage::Fragment,
            &binding(
                0,
                ReflectedResource::Sampler {
                    name: "shadow".into(),
                },
            ),
        );
        builder.visit(ShaderStage::Fragment, &texture(1, "shadow"));
    }

    #[test]
    fn test_static_sampler_names() {
        assert_eq!(StaticSampler::from_name("ClampSampler"), StaticSampler::LinearClamp);
        assert_eq!(StaticSampler::from_name("wrap_sampler"), StaticSampler::LinearWrap);
        assert_eq!(StaticSampler::from_name("s"), StaticSampler::LinearWrap);
    }
}
