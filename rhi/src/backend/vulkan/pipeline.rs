//! Vulkan pipeline creation.
//!
//! Every pipeline owns its layout objects. Group 0 is a push-descriptor set
//! layout, so binding a resource is a `vkCmdPushDescriptorSetKHR` write and
//! no descriptor pools are needed. Static samplers are immutable samplers of
//! that set layout.

use std::ffi::CString;

use ash::vk;

use crate::backend::{CompiledStage, GpuPipeline, PipelineBuild, RasterTarget};
use crate::error::RhiError;
use crate::pipeline::StaticSampler;
use crate::types::ShaderStage;

use super::conversion::{
    convert_blend_mode, convert_compare_function, convert_cull_mode, convert_descriptor_kind,
    convert_result, convert_shader_stages, convert_texture_format, convert_topology,
    convert_vertex_format,
};
use super::debug::DebugLabels;

/// Objects created on the way to a pipeline, destroyed on failure.
#[derive(Default)]
struct Partial {
    samplers: Vec<vk::Sampler>,
    set_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    modules: Vec<vk::ShaderModule>,
}

impl Partial {
    fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for module in self.modules.drain(..) {
                device.destroy_shader_module(module, None);
            }
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
            for sampler in self.samplers.drain(..) {
                device.destroy_sampler(sampler, None);
            }
        }
    }
}

/// Build a pipeline and its layout objects.
pub fn create_pipeline(
    device: &ash::Device,
    labels: &DebugLabels,
    build: &PipelineBuild<'_>,
) -> Result<GpuPipeline, RhiError> {
    let mut partial = Partial::default();
    match build_objects(device, build, &mut partial) {
        Ok((pipeline, bind_point, push_stages)) => {
            unsafe {
                for module in partial.modules.drain(..) {
                    device.destroy_shader_module(module, None);
                }
            }
            labels.set_name(pipeline, build.label);
            log::trace!("Vulkan: created pipeline '{}'", build.label);
            Ok(GpuPipeline::Vulkan {
                device: device.clone(),
                pipeline,
                layout: partial.layout,
                set_layout: partial.set_layout,
                samplers: std::mem::take(&mut partial.samplers),
                bind_point,
                push_stages,
            })
        }
        Err(e) => {
            partial.destroy(device);
            Err(e)
        }
    }
}

fn build_objects(
    device: &ash::Device,
    build: &PipelineBuild<'_>,
    partial: &mut Partial,
) -> Result<(vk::Pipeline, vk::PipelineBindPoint, vk::ShaderStageFlags), RhiError> {
    for entry in &build.samplers {
        partial
            .samplers
            .push(create_sampler(device, entry.sampler)?);
    }

    let mut bindings: Vec<vk::DescriptorSetLayoutBinding> = build
        .entries
        .iter()
        .map(|entry| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(entry.binding)
                .descriptor_type(convert_descriptor_kind(entry.kind))
                .descriptor_count(1)
                .stage_flags(convert_shader_stages(entry.visibility))
        })
        .collect();
    for (entry, sampler) in build.samplers.iter().zip(&partial.samplers) {
        bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(entry.binding)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .descriptor_count(1)
                .stage_flags(convert_shader_stages(entry.visibility))
                .immutable_samplers(std::slice::from_ref(sampler)),
        );
    }

    let set_layout_info = vk::DescriptorSetLayoutCreateInfo::default()
        .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR)
        .bindings(&bindings);
    // A pipeline without its layout objects cannot be drawn with at all.
    partial.set_layout = match unsafe { device.create_descriptor_set_layout(&set_layout_info, None) } {
        Ok(layout) => layout,
        Err(e) => panic!("Vulkan: failed to create descriptor set layout for '{}': {e}", build.label),
    };

    let push_stages = build
        .push_constants
        .map(|range| convert_shader_stages(range.visibility))
        .unwrap_or_default();
    let push_ranges: Vec<vk::PushConstantRange> = build
        .push_constants
        .iter()
        .map(|range| {
            vk::PushConstantRange::default()
                .stage_flags(push_stages)
                .offset(0)
                .size(range.size)
        })
        .collect();

    let set_layouts = [partial.set_layout];
    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_ranges);
    partial.layout = match unsafe { device.create_pipeline_layout(&layout_info, None) } {
        Ok(layout) => layout,
        Err(e) => panic!("Vulkan: failed to create pipeline layout for '{}': {e}", build.label),
    };

    let mut entry_names = Vec::with_capacity(build.stages.len());
    for stage in build.stages {
        partial.modules.push(create_shader_module(device, stage)?);
        entry_names.push(CString::new(stage.entry_point.as_str()).map_err(|e| {
            RhiError::InvalidParameter(format!("Invalid entry point name: {e}"))
        })?);
    }
    let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = build
        .stages
        .iter()
        .zip(&partial.modules)
        .zip(&entry_names)
        .map(|((stage, module), name)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(stage_flag(stage.stage))
                .module(*module)
                .name(name)
        })
        .collect();

    match &build.raster {
        Some(raster) => {
            let pipeline = create_graphics(device, partial.layout, &stage_infos, raster)?;
            Ok((pipeline, vk::PipelineBindPoint::GRAPHICS, push_stages))
        }
        None => {
            let stage = stage_infos.first().copied().ok_or_else(|| {
                RhiError::InvalidParameter("compute pipeline without a stage".to_string())
            })?;
            let info = vk::ComputePipelineCreateInfo::default()
                .stage(stage)
                .layout(partial.layout);
            let pipelines = unsafe {
                device.create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
            }
            .map_err(|(_, e)| convert_result("create compute pipeline", e))?;
            Ok((pipelines[0], vk::PipelineBindPoint::COMPUTE, push_stages))
        }
    }
}

fn stage_flag(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

fn create_shader_module(
    device: &ash::Device,
    stage: &CompiledStage,
) -> Result<vk::ShaderModule, RhiError> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(&stage.spirv);
    unsafe { device.create_shader_module(&create_info, None) }.map_err(|e| {
        RhiError::ShaderCompilationFailed(format!(
            "Failed to create shader module for '{}': {e:?}",
            stage.entry_point
        ))
    })
}

/// Sampler create info of a static sampler configuration.
pub fn sampler_info(sampler: StaticSampler) -> vk::SamplerCreateInfo<'static> {
    let address = match sampler {
        StaticSampler::LinearClamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        StaticSampler::LinearWrap => vk::SamplerAddressMode::REPEAT,
    };
    vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(address)
        .address_mode_v(address)
        .address_mode_w(address)
        .max_lod(vk::LOD_CLAMP_NONE)
}

fn create_sampler(device: &ash::Device, sampler: StaticSampler) -> Result<vk::Sampler, RhiError> {
    unsafe { device.create_sampler(&sampler_info(sampler), None) }
        .map_err(|e| convert_result("create sampler", e))
}

fn create_graphics(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    stages: &[vk::PipelineShaderStageCreateInfo<'_>],
    raster: &RasterTarget<'_>,
) -> Result<vk::Pipeline, RhiError> {
    let vertex_layout = raster.vertex_layout;
    let binding_descriptions: Vec<vk::VertexInputBindingDescription> = if vertex_layout.is_empty()
    {
        Vec::new()
    } else {
        vec![
            vk::VertexInputBindingDescription::default()
                .binding(0)
                .stride(vertex_layout.stride)
                .input_rate(vk::VertexInputRate::VERTEX),
        ]
    };
    let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = vertex_layout
        .attributes
        .iter()
        .map(|attr| {
            vk::VertexInputAttributeDescription::default()
                .location(attr.location)
                .binding(0)
                .format(convert_vertex_format(attr.format))
                .offset(attr.offset)
        })
        .collect();

    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_topology(raster.state.topology))
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    // CLOCKWISE compensates for the negative viewport height used to flip Y.
    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(convert_cull_mode(raster.state.cull))
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_test = raster.depth_format.and(raster.state.depth_compare);
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(depth_test.is_some())
        .depth_write_enable(depth_test.is_some() && raster.state.depth_write)
        .depth_compare_op(depth_test.map_or(vk::CompareOp::ALWAYS, convert_compare_function))
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = raster
        .color_formats
        .iter()
        .map(|_| convert_blend_mode(raster.state.blend))
        .collect();
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_attachment_formats: Vec<vk::Format> = raster
        .color_formats
        .iter()
        .map(|f| convert_texture_format(*f))
        .collect();
    let depth_attachment_format = raster
        .depth_format
        .map(convert_texture_format)
        .unwrap_or(vk::Format::UNDEFINED);
    let stencil_attachment_format = match raster.depth_format {
        Some(format) if format.has_stencil() => depth_attachment_format,
        _ => vk::Format::UNDEFINED,
    };

    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_attachment_formats)
        .depth_attachment_format(depth_attachment_format)
        .stencil_attachment_format(stencil_attachment_format);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| convert_result("create graphics pipeline", e))?;

    Ok(pipelines[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_addressing() {
        let clamp = sampler_info(StaticSampler::LinearClamp);
        assert_eq!(clamp.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_EDGE);
        assert_eq!(clamp.min_filter, vk::Filter::LINEAR);

        let wrap = sampler_info(StaticSampler::LinearWrap);
        assert_eq!(wrap.address_mode_v, vk::SamplerAddressMode::REPEAT);
    }
}
