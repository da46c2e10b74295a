//! Compute-shader mip chain generation.
//!
//! Every level is produced from the one above it with a bilinear downsample:
//!
//! ```text
//! mip 0 ──sample──► mip 1 ──sample──► mip 2 ──► ... ──► mip n-1
//!        dispatch    ▲     dispatch    ▲
//!                    └ UAV barrier ────┘
//! ```
//!
//! sRGB textures are sampled through their sRGB view, so filtering happens on
//! linear values, and written through a linear view with the encoding done in
//! the shader.
//!
//! The levels depend on each other, so dispatches run strictly in order with a
//! UAV barrier after each. While a level is written it is the only one in
//! [`ResourceState::UnorderedAccess`]; all others stay readable from compute.

use std::sync::Arc;

use crate::backend::{ViewDesc, ViewKind};
use crate::command::{BarrierResource, Command, CommandList};
use crate::descriptor::DescriptorContents;
use crate::device::Device;
use crate::error::RhiError;
use crate::pipeline::{PipelineDesc, PipelineHandle, SlotKind};
use crate::profiling::profile_scope;
use crate::resources::TextureHandle;
use crate::shader::ShaderSource;
use crate::types::{ReadScope, ResourceState, TextureFormat, mip_extent};

/// Threads per workgroup along each axis.
pub const MIP_WORKGROUP_SIZE: u32 = 8;

const MIP_SHADER: &str = r#"
@group(0) @binding(0) var src_mip: texture_2d<f32>;
@group(0) @binding(1) var dst_mip: texture_storage_2d<{FORMAT}, write>;
@group(0) @binding(2) var linear_clamp: sampler;

struct MipParams {
    texel_size: vec2<f32>,
}
@group(0) @binding(3) var<uniform> params: MipParams;

fn encode_linear(color: vec4<f32>) -> vec4<f32> {
    return color;
}

fn encode_srgb(color: vec4<f32>) -> vec4<f32> {
    let rgb = clamp(color.rgb, vec3<f32>(0.0), vec3<f32>(1.0));
    let low = rgb * 12.92;
    let high = 1.055 * pow(rgb, vec3<f32>(1.0 / 2.4)) - vec3<f32>(0.055);
    return vec4<f32>(select(high, low, rgb <= vec3<f32>(0.0031308)), color.a);
}

@compute @workgroup_size(8, 8, 1)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(dst_mip);
    if (id.x >= size.x || id.y >= size.y) {
        return;
    }
    let uv = (vec2<f32>(id.xy) + vec2<f32>(0.5, 0.5)) * params.texel_size;
    let color = textureSampleLevel(src_mip, linear_clamp, uv, 0.0);
    textureStore(dst_mip, vec2<i32>(id.xy), {ENCODE}(color));
}
"#;

const COMPUTE_READ: ResourceState = ResourceState::ShaderRead(ReadScope::NonPixel);

/// Workgroups needed to cover `width` x `height` texels.
pub fn dispatch_size(width: u32, height: u32) -> (u32, u32, u32) {
    (
        width.div_ceil(MIP_WORKGROUP_SIZE),
        height.div_ceil(MIP_WORKGROUP_SIZE),
        1,
    )
}

/// Storage texel name and encode function of the downsample shader for `format`.
fn mip_shader_variant(format: TextureFormat) -> Result<(&'static str, &'static str), RhiError> {
    let texel = format
        .mip_storage_format()
        .and_then(|storage| storage.storage_texel_name())
        .ok_or_else(|| RhiError::invalid(format!("cannot generate mips for format {format:?}")))?;
    let encode = if format.is_srgb() { "encode_srgb" } else { "encode_linear" };
    Ok((texel, encode))
}

/// Binding numbers of the downsample pipeline.
struct MipBindings {
    src: u32,
    dst: u32,
}

impl Device {
    /// Downsample pipeline for `format`, created on first use.
    fn mip_pipeline(&mut self, format: TextureFormat) -> Result<PipelineHandle, RhiError> {
        if let Some(handle) = self.mip_pipelines.get(&format)
            && self.pipelines.contains(*handle)
        {
            return Ok(*handle);
        }

        let (texel, encode) = mip_shader_variant(format)?;
        let source = MIP_SHADER
            .replace("{FORMAT}", texel)
            .replace("{ENCODE}", encode);
        let variant = if format.is_srgb() {
            format!("{texel}_srgb")
        } else {
            texel.to_string()
        };
        let desc = PipelineDesc::compute(ShaderSource::inline(
            format!("generate_mips_{variant}"),
            source,
        ))
        .with_label(format!("generate mips ({variant})"));

        let handle = self.create_pipeline(&desc)?;
        self.mip_pipelines.insert(format, handle);
        Ok(handle)
    }

    fn mip_bindings(&self, pipeline: PipelineHandle) -> Result<MipBindings, RhiError> {
        let layout = &self
            .pipelines
            .get(pipeline)
            .ok_or_else(|| RhiError::internal("mip pipeline vanished"))?
            .layout;
        let table = |name: &str| match layout.slot(name).map(|slot| slot.kind) {
            Some(SlotKind::Table { binding, .. }) => Ok(binding),
            _ => Err(RhiError::internal(format!(
                "mip pipeline has no table slot '{name}'"
            ))),
        };
        Ok(MipBindings {
            src: table("src_mip")?,
            dst: table("dst_mip")?,
        })
    }

    /// Record generation of mips `1..mip_count` from mip 0.
    ///
    /// The texture must have been created with storage usage. It ends in
    /// compute-readable state with every level in that state.
    pub(crate) fn generate_mips(
        &mut self,
        list: &mut CommandList,
        handle: TextureHandle,
    ) -> Result<(), RhiError> {
        profile_scope!("generate_mips");

        let texture = self.texture_ref(handle)?;
        let format = texture.desc.format;
        let storage_format = format
            .mip_storage_format()
            .ok_or_else(|| RhiError::invalid(format!("cannot generate mips for format {format:?}")))?;
        let (width, height, mip_count) = (texture.desc.width, texture.desc.height, texture.mip_count);
        let name = texture.desc.debug_name().to_string();

        let pipeline = self.mip_pipeline(format)?;
        let bindings = self.mip_bindings(pipeline)?;
        let gpu_pipeline = self
            .pipelines
            .get(pipeline)
            .ok_or_else(|| RhiError::internal("mip pipeline vanished"))?
            .gpu
            .clone();

        list.push(Command::BeginMarker(format!("generate mips {name}")));
        self.ensure_state(list, handle, COMPUTE_READ)?;

        let gpu = self.texture_ref(handle)?.gpu.clone();
        list.push(Command::BindPipeline(gpu_pipeline));
        for mip in 1..mip_count {
            let dst_width = mip_extent(width, mip);
            let dst_height = mip_extent(height, mip);

            self.transition_mip(list, handle, mip, COMPUTE_READ, ResourceState::UnorderedAccess, true)?;

            let src = self.backend().create_view(
                &gpu,
                &ViewDesc {
                    kind: ViewKind::Sampled,
                    format,
                    base_mip: mip - 1,
                    mip_count: 1,
                },
            )?;
            let dst = self.backend().create_view(
                &gpu,
                &ViewDesc {
                    kind: ViewKind::Storage,
                    format: storage_format,
                    base_mip: mip,
                    mip_count: 1,
                },
            )?;
            list.push(Command::BindDescriptor {
                binding: bindings.src,
                contents: DescriptorContents::SampledTexture(Arc::new(src)),
            });
            list.push(Command::BindDescriptor {
                binding: bindings.dst,
                contents: DescriptorContents::StorageTexture(Arc::new(dst)),
            });

            let texel_size = [1.0 / dst_width as f32, 1.0 / dst_height as f32];
            list.push(Command::PushConstants {
                offset: 0,
                data: bytemuck::cast_slice(&texel_size).to_vec(),
            });

            let (x, y, z) = dispatch_size(dst_width, dst_height);
            list.push(Command::Dispatch { x, y, z });
            list.push(Command::UavBarrier {
                resource: BarrierResource::Texture(gpu.clone()),
            });

            self.transition_mip(list, handle, mip, ResourceState::UnorderedAccess, COMPUTE_READ, false)?;
        }
        list.push(Command::EndMarker);

        log::trace!("Device: recorded {} mip levels for '{name}'", mip_count - 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::config::RhiConfig;
    use crate::types::TextureDesc;

    #[test]
    fn test_dispatch_size_rounds_up() {
        assert_eq!(dispatch_size(128, 128), (16, 16, 1));
        assert_eq!(dispatch_size(9, 1), (2, 1, 1));
        assert_eq!(dispatch_size(1, 1), (1, 1, 1));
    }

    #[test]
    fn test_mip_shader_parses_for_every_storage_format() {
        for format in [
            TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float,
            TextureFormat::R32Float,
        ] {
            let (texel, encode) = mip_shader_variant(format).unwrap();
            let source = MIP_SHADER
                .replace("{FORMAT}", texel)
                .replace("{ENCODE}", encode);
            assert!(
                naga::front::wgsl::parse_str(&source).is_ok(),
                "mip shader fails to parse for {texel}"
            );
        }
    }

    #[test]
    fn test_every_mip_is_written() {
        let backend = Arc::new(DummyBackend::new());
        let mut device = Device::new(backend.clone(), &RhiConfig::default());
        let handle = device
            .create_texture(
                &TextureDesc::new_2d(256, 256, TextureFormat::Rgba8Unorm).with_mips(),
                Some(&vec![255; 256 * 256 * 4]),
            )
            .unwrap();

        let texture = device.texture(handle).unwrap();
        assert_eq!(texture.mip_count(), 9);
        assert_eq!(texture.gpu().written_mips().unwrap(), vec![true; 9]);
        assert_eq!(
            texture.gpu().mip_states().unwrap(),
            vec![ResourceState::SHADER_READ; 9]
        );
        let stats = backend.stats();
        assert_eq!(stats.dispatches, 8);
        assert_eq!(stats.state_mismatches, 0);
    }

    #[test]
    fn test_srgb_mips_are_written_through_linear_view() {
        let backend = Arc::new(DummyBackend::new());
        let mut device = Device::new(backend.clone(), &RhiConfig::default());
        let handle = device
            .create_texture(
                &TextureDesc::new_2d(256, 256, TextureFormat::Rgba8UnormSrgb).with_mips(),
                Some(&vec![128; 256 * 256 * 4]),
            )
            .unwrap();

        let texture = device.texture(handle).unwrap();
        assert_eq!(texture.mip_count(), 9);
        assert_eq!(texture.gpu().written_mips().unwrap(), vec![true; 9]);
        assert_eq!(backend.stats().state_mismatches, 0);
        // sRGB and linear textures of the same texel layout use different shaders.
        device
            .create_texture(
                &TextureDesc::new_2d(16, 16, TextureFormat::Rgba8Unorm).with_mips(),
                None,
            )
            .unwrap();
        assert_eq!(device.mip_pipelines.len(), 2);
    }

    #[test]
    fn test_mip_pipeline_is_cached_per_format() {
        let backend = Arc::new(DummyBackend::new());
        let mut device = Device::new(backend.clone(), &RhiConfig::default());
        for _ in 0..3 {
            device
                .create_texture(
                    &TextureDesc::new_2d(16, 16, TextureFormat::Rgba16Float).with_mips(),
                    None,
                )
                .unwrap();
        }
        assert_eq!(backend.stats().pipelines, 1);
        assert_eq!(device.mip_pipelines.len(), 1);
    }
}
