//! Type conversions between RHI types and Vulkan types.

use ash::vk;

use crate::pipeline::{BlendMode, CompareFunction, CullMode, DescriptorKind, PrimitiveTopology};
use crate::shader::VertexFormat;
use crate::types::{
    BufferUsage, ReadScope, ResourceState, ShaderStages, TextureFormat, TextureUsage,
};

/// Convert a buffer usage to Vulkan buffer usage flags.
///
/// Every buffer can be a copy source and destination; readback targets, staging
/// sources and uploads all go through copies.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let copy = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    copy | match usage {
        BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
        BufferUsage::Readback | BufferUsage::Staging => vk::BufferUsageFlags::empty(),
    }
}

/// Convert a texture format to a Vulkan format.
///
/// Vulkan has no typeless formats: the typeless storage of a depth attachment is
/// the depth format itself, and its sampled view reads the depth aspect.
pub fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::R16Unorm => vk::Format::R16_UNORM,
        TextureFormat::R16Float => vk::Format::R16_SFLOAT,
        TextureFormat::Rg8Unorm => vk::Format::R8G8_UNORM,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rg32Float => vk::Format::R32G32_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Depth16Unorm | TextureFormat::R16Typeless => vk::Format::D16_UNORM,
        TextureFormat::Depth24PlusStencil8
        | TextureFormat::R24G8Typeless
        | TextureFormat::R24UnormX8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32Float | TextureFormat::R32Typeless => vk::Format::D32_SFLOAT,
    }
}

/// Map a surface format back to the RHI format, if it has one.
pub fn surface_format(format: vk::Format) -> Option<TextureFormat> {
    match format {
        vk::Format::B8G8R8A8_SRGB => Some(TextureFormat::Bgra8UnormSrgb),
        vk::Format::B8G8R8A8_UNORM => Some(TextureFormat::Bgra8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(TextureFormat::Rgba8UnormSrgb),
        vk::Format::R8G8B8A8_UNORM => Some(TextureFormat::Rgba8Unorm),
        vk::Format::R16G16B16A16_SFLOAT => Some(TextureFormat::Rgba16Float),
        _ => None,
    }
}

/// Image aspects of a texture stored in `format`.
pub fn format_aspect(format: TextureFormat) -> vk::ImageAspectFlags {
    let depth = format.is_depth_stencil() || format.is_typeless();
    match (depth, format.has_stencil()) {
        (false, _) => vk::ImageAspectFlags::COLOR,
        (true, false) => vk::ImageAspectFlags::DEPTH,
        (true, true) => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
    }
}

/// Convert texture usage flags to Vulkan image usage flags.
pub fn convert_texture_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(TextureUsage::SAMPLED) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE) {
        result |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::RENDER_TARGET) {
        result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(TextureUsage::DEPTH_STENCIL) {
        result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(TextureUsage::COPY_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }

    result
}

/// Image layout a texture has in `state`.
pub fn state_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Common | ResourceState::UnorderedAccess => vk::ImageLayout::GENERAL,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        ResourceState::ShaderRead(_) => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::CopySrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::CopyDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::DepthRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceState::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    }
}

fn shader_stages(scope: ReadScope) -> vk::PipelineStageFlags2 {
    let non_pixel =
        vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER;
    match scope {
        ReadScope::Pixel => vk::PipelineStageFlags2::FRAGMENT_SHADER,
        ReadScope::NonPixel => non_pixel,
        ReadScope::All => non_pixel | vk::PipelineStageFlags2::FRAGMENT_SHADER,
    }
}

/// Pipeline stages and memory accesses that use a resource in `state`.
pub fn state_scope(state: ResourceState) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    match state {
        ResourceState::Common => (
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        ),
        ResourceState::RenderTarget => (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        ResourceState::Present => (
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::NONE,
        ),
        ResourceState::UnorderedAccess => (
            shader_stages(ReadScope::All),
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
        ),
        ResourceState::ShaderRead(scope) => (
            shader_stages(scope),
            vk::AccessFlags2::SHADER_SAMPLED_READ
                | vk::AccessFlags2::SHADER_STORAGE_READ
                | vk::AccessFlags2::UNIFORM_READ,
        ),
        ResourceState::CopySrc => (
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        ),
        ResourceState::CopyDst => (
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
        ResourceState::DepthRead => (
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        ResourceState::DepthWrite => (
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
    }
}

/// Convert shader stage flags.
pub fn convert_shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut result = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        result |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        result |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        result |= vk::ShaderStageFlags::COMPUTE;
    }
    result
}

/// Descriptor type of a layout entry.
pub fn convert_descriptor_kind(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorKind::SampledTexture => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorKind::StorageTexture => vk::DescriptorType::STORAGE_IMAGE,
    }
}

/// Convert a compare function to a Vulkan compare op.
pub fn convert_compare_function(func: CompareFunction) -> vk::CompareOp {
    match func {
        CompareFunction::Never => vk::CompareOp::NEVER,
        CompareFunction::Less => vk::CompareOp::LESS,
        CompareFunction::Equal => vk::CompareOp::EQUAL,
        CompareFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareFunction::Greater => vk::CompareOp::GREATER,
        CompareFunction::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareFunction::Always => vk::CompareOp::ALWAYS,
    }
}

/// Convert a cull mode.
pub fn convert_cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::Front => vk::CullModeFlags::FRONT,
    }
}

/// Convert a primitive topology.
pub fn convert_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
    }
}

/// Color blend state of one attachment.
pub fn convert_blend_mode(mode: BlendMode) -> vk::PipelineColorBlendAttachmentState {
    let state = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA);
    match mode {
        BlendMode::Opaque => state.blend_enable(false),
        BlendMode::Alpha => state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD),
        BlendMode::Additive => state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ONE)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD),
    }
}

/// Convert a vertex attribute format.
pub fn convert_vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float => vk::Format::R32_SFLOAT,
        VertexFormat::Float2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Uint => vk::Format::R32_UINT,
        VertexFormat::Uint2 => vk::Format::R32G32_UINT,
        VertexFormat::Uint3 => vk::Format::R32G32B32_UINT,
        VertexFormat::Uint4 => vk::Format::R32G32B32A32_UINT,
        VertexFormat::Sint => vk::Format::R32_SINT,
        VertexFormat::Sint2 => vk::Format::R32G32_SINT,
        VertexFormat::Sint3 => vk::Format::R32G32B32_SINT,
        VertexFormat::Sint4 => vk::Format::R32G32B32A32_SINT,
    }
}

/// Map a Vulkan result to an RHI error.
pub fn convert_result(what: &str, result: vk::Result) -> crate::error::RhiError {
    use crate::error::RhiError;
    match result {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            RhiError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR => RhiError::SurfaceOutdated,
        other => RhiError::Internal(format!("{what}: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_storage_uses_depth_format() {
        for format in [
            TextureFormat::Depth16Unorm,
            TextureFormat::Depth24PlusStencil8,
            TextureFormat::Depth32Float,
        ] {
            let split = format.depth_split().unwrap();
            assert_eq!(
                convert_texture_format(split.storage),
                convert_texture_format(format)
            );
            assert!(format_aspect(split.storage).contains(vk::ImageAspectFlags::DEPTH));
        }
        assert_eq!(
            format_aspect(TextureFormat::R24G8Typeless),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(format_aspect(TextureFormat::Rgba8Unorm), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_state_layouts() {
        assert_eq!(
            state_layout(ResourceState::SHADER_READ),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
        assert_eq!(
            state_layout(ResourceState::UnorderedAccess),
            vk::ImageLayout::GENERAL
        );
        assert_eq!(
            state_layout(ResourceState::Present),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }

    #[test]
    fn test_read_scopes_narrow_stages() {
        let (pixel, _) = state_scope(ResourceState::ShaderRead(ReadScope::Pixel));
        let (all, _) = state_scope(ResourceState::SHADER_READ);
        assert_eq!(pixel, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert!(all.contains(pixel));
        assert!(all.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
    }

    #[test]
    fn test_surface_format_round_trip() {
        assert_eq!(
            surface_format(convert_texture_format(TextureFormat::Bgra8UnormSrgb)),
            Some(TextureFormat::Bgra8UnormSrgb)
        );
        assert_eq!(surface_format(vk::Format::R5G6B5_UNORM_PACK16), None);
    }
}
