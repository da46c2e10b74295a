//! Integration tests for the RHI.
//!
//! These tests drive the public API the way an application does: create a
//! context, build passes and pipelines, record frames and present them.
//! Tests are parameterized using `rstest` to run against multiple backends;
//! a backend that cannot initialize on this machine is skipped.
//!
//! # Test Categories
//!
//! - **Frame Tests**: Recording, submission and presentation
//! - **Resource Tests**: Buffers, textures and mip generation
//! - **Pipeline Tests**: Reflection and hot reload
//! - **Resize Tests**: Surface and render pass recreation
//!
//! ```bash
//! cargo test --test rhi_tests
//! ```

mod common;

use std::collections::BTreeSet;

use rstest::rstest;

use common::{BLIT_SHADER, Backend, TRIANGLE_SHADER, TestContext, scratch_shader_root};
use redlilium_rhi::{
    BUFFERED_FRAMES, BufferDesc, BufferUsage, DescriptorPoolKind, GpuTimer, Parameter,
    PipelineDesc, RenderPassDesc, ResourceState, RhiConfig, RhiError, ShaderSource, TextureDesc,
    TextureFormat,
};

// ============================================================================
// Frame Tests
// ============================================================================

/// One frame into the back buffer at 1600x900 with a single triangle.
#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_single_triangle_frame_presents_once(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let rhi = &mut ctx.rhi;

    let pass = rhi
        .create_render_pass(&RenderPassDesc::swapchain(1600, 900).with_label("main"))
        .unwrap();
    let pipeline = rhi
        .device_mut()
        .create_pipeline(&PipelineDesc::graphics(
            ShaderSource::inline("triangle", TRIANGLE_SHADER),
            pass,
        ))
        .unwrap();

    let index_before = rhi.frame_index();
    rhi.begin_render().unwrap();
    rhi.begin_render_pass(pass).unwrap();
    rhi.bind_pipeline(pipeline).unwrap();
    rhi.draw(3).unwrap();
    rhi.end_render_pass().unwrap();
    rhi.end_render().unwrap();
    let outcome = rhi.render().unwrap();

    assert!(outcome.presented);
    assert!(!outcome.surface_outdated);
    assert_eq!(rhi.present_count(), 1);
    assert_eq!(rhi.frame_index(), (index_before + 1) % BUFFERED_FRAMES);

    let stats = ctx.stats().unwrap();
    assert_eq!(stats.presents, 1);
    assert_eq!(stats.draws, 1);
    assert_eq!(stats.render_passes, 1);
    assert_eq!(stats.state_mismatches, 0);
}

/// Frame indices cycle through the buffered frames while fences only grow.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_offscreen_frames_cycle(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let rhi = &mut ctx.rhi;

    let pass = rhi
        .create_render_pass(
            &RenderPassDesc::offscreen(256, 256, &[TextureFormat::Rgba8Unorm])
                .with_depth(TextureFormat::Depth32Float),
        )
        .unwrap();
    let pipeline = rhi
        .device_mut()
        .create_pipeline(&PipelineDesc::graphics(
            ShaderSource::inline("triangle", TRIANGLE_SHADER),
            pass,
        ))
        .unwrap();

    let mut indices = Vec::new();
    let mut last_fence = 0;
    for _ in 0..5 {
        indices.push(rhi.frame_index());
        rhi.begin_render().unwrap();
        rhi.begin_render_pass(pass).unwrap();
        rhi.bind_pipeline(pipeline).unwrap();
        rhi.draw(3).unwrap();
        rhi.end_render_pass().unwrap();
        rhi.end_render().unwrap();
        let outcome = rhi.render().unwrap();
        assert!(outcome.fence_value > last_fence);
        last_fence = outcome.fence_value;
    }
    assert_eq!(indices, vec![0, 1, 0, 1, 0]);
    rhi.wait_for_gpu().unwrap();

    // Offscreen attachments are left readable by later passes.
    let color = rhi.device().render_pass(pass).unwrap().color_attachments()[0];
    assert_eq!(
        rhi.device().texture(color).unwrap().state(),
        ResourceState::SHADER_READ
    );
}

/// Timestamps bracket a frame and resolve once the GPU has finished it.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_gpu_timer(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let rhi = &mut ctx.rhi;
    let mut timer = GpuTimer::new(rhi.device(), "frame").unwrap();

    rhi.begin_render().unwrap();
    rhi.begin_timer(&mut timer).unwrap();
    rhi.end_timer(&mut timer).unwrap();
    rhi.end_render().unwrap();
    rhi.render().unwrap();
    rhi.wait_for_gpu().unwrap();

    let elapsed = timer.elapsed_ms(rhi.device()).unwrap();
    assert!(elapsed >= 0.0);
}

/// A frame that only renders offscreen still hands a presentable back buffer to
/// the surface, starting with the very first frame.
#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_offscreen_only_frames_present_valid_images(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let rhi = &mut ctx.rhi;

    let pass = rhi
        .create_render_pass(&RenderPassDesc::offscreen(256, 256, &[TextureFormat::Rgba8Unorm]))
        .unwrap();
    let pipeline = rhi
        .device_mut()
        .create_pipeline(&PipelineDesc::graphics(
            ShaderSource::inline("triangle", TRIANGLE_SHADER),
            pass,
        ))
        .unwrap();

    for _ in 0..3 {
        rhi.begin_render().unwrap();
        rhi.begin_render_pass(pass).unwrap();
        rhi.bind_pipeline(pipeline).unwrap();
        rhi.draw(3).unwrap();
        rhi.end_render_pass().unwrap();
        rhi.end_render().unwrap();
        assert!(rhi.render().unwrap().presented);
    }

    let stats = ctx.stats().unwrap();
    assert_eq!(stats.presents, 3);
    assert_eq!(stats.invalid_presents, 0);
    assert_eq!(stats.state_mismatches, 0);
}

/// Every swapchain pass renders into the same back buffer records; releasing
/// one pass leaves them to the others.
#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_swapchain_passes_share_back_buffers(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let rhi = &mut ctx.rhi;

    let scene = rhi
        .create_render_pass(&RenderPassDesc::swapchain(1600, 900).with_label("scene"))
        .unwrap();
    let overlay = rhi
        .create_render_pass(&RenderPassDesc::swapchain(1600, 900).with_label("overlay"))
        .unwrap();
    let back_buffers = rhi.device().back_buffers().to_vec();
    assert_eq!(back_buffers.len(), BUFFERED_FRAMES);
    for pass in [scene, overlay] {
        assert_eq!(
            rhi.device().render_pass(pass).unwrap().color_attachments(),
            back_buffers.as_slice()
        );
    }

    rhi.device_mut().release_render_pass(scene);
    for texture in &back_buffers {
        assert!(rhi.device().texture(*texture).is_some());
    }

    for _ in 0..BUFFERED_FRAMES + 1 {
        rhi.begin_render().unwrap();
        rhi.begin_render_pass(overlay).unwrap();
        rhi.end_render_pass().unwrap();
        rhi.end_render().unwrap();
        rhi.render().unwrap();
    }
    let stats = ctx.stats().unwrap();
    assert_eq!(stats.invalid_presents, 0);
    assert_eq!(stats.state_mismatches, 0);
}

/// Calls that execute on the GPU right away are rejected while a frame is open,
/// so the recorded frame never sees states it did not track.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_immediate_calls_rejected_while_frame_is_open(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let rhi = &mut ctx.rhi;

    let pass = rhi
        .create_render_pass(&RenderPassDesc::offscreen(64, 64, &[TextureFormat::Rgba8Unorm]))
        .unwrap();
    let target = rhi.device().render_pass(pass).unwrap().color_attachments()[0];
    let blit = rhi
        .device_mut()
        .create_pipeline(&PipelineDesc::graphics(
            ShaderSource::inline("blit", BLIT_SHADER),
            pass,
        ))
        .unwrap();
    let source = rhi
        .device_mut()
        .create_texture(&TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm), Some(&[255; 64]))
        .unwrap();
    let uniforms = rhi
        .device_mut()
        .create_buffer(&BufferDesc::new(160, 1, BufferUsage::Uniform), Some(&[0; 160]))
        .unwrap();

    rhi.begin_render().unwrap();
    rhi.begin_render_pass(pass).unwrap();
    rhi.bind_pipeline(blit).unwrap();
    assert!(rhi.bind_parameter("source", Parameter::Texture(source)).unwrap());
    assert!(rhi.bind_parameter("tint", Parameter::Buffer(uniforms)).unwrap());
    rhi.draw(3).unwrap();
    rhi.end_render_pass().unwrap();

    for texture in [source, target] {
        let read = rhi.device_mut().read_texture(texture, 0);
        assert!(matches!(read, Err(RhiError::InvalidParameter(_))), "{read:?}");
    }
    let resized = rhi.device_mut().resize_render_pass(pass, 128, 128);
    assert!(matches!(resized, Err(RhiError::InvalidParameter(_))), "{resized:?}");

    rhi.end_render().unwrap();
    assert!(matches!(rhi.resize(800, 600), Err(RhiError::InvalidParameter(_))));
    rhi.render().unwrap();

    // The frame is retired once render returns; the calls work again.
    assert_eq!(rhi.device_mut().read_texture(source, 0).unwrap(), vec![255; 64]);
    assert_eq!(rhi.device_mut().read_texture(target, 0).unwrap().len(), 64 * 64 * 4);
    assert!(rhi.device_mut().resize_render_pass(pass, 128, 128).unwrap());
    let resized = rhi.resize(800, 600).unwrap();

    if let Some(stats) = ctx.stats() {
        assert!(resized);
        assert_eq!(stats.state_mismatches, 0);
        assert_eq!(stats.invalid_presents, 0);
    }
}

// ============================================================================
// Resource Tests
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_uniform_size_is_rounded_to_256(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let device = ctx.rhi.device_mut();

    for (stride, count, expected) in [(16, 1, 256), (64, 4, 256), (100, 3, 512), (256, 2, 512)] {
        let handle = device
            .create_buffer(&BufferDesc::new(stride, count, BufferUsage::Uniform), None)
            .unwrap();
        assert_eq!(device.buffer(handle).unwrap().size(), expected);
    }
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_buffer_round_trip(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let device = ctx.rhi.device_mut();

    let data: Vec<u8> = (0..=255).collect();
    let handle = device
        .create_buffer(&BufferDesc::new(4, 64, BufferUsage::Vertex), Some(&data))
        .unwrap();
    assert_eq!(device.read_buffer(handle, 0, 256).unwrap(), data);
    assert_eq!(device.read_buffer(handle, 250, 6).unwrap(), data[250..]);
    assert!(device.read_buffer(handle, 250, 7).is_err());
}

/// A 256x256 texture with mips has nine levels and every level holds data,
/// for linear and sRGB formats alike.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_mip_chain_is_generated(
    #[case] backend: Backend,
    #[values(TextureFormat::Rgba8Unorm, TextureFormat::Rgba8UnormSrgb)] format: TextureFormat,
) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let device = ctx.rhi.device_mut();

    let pixels = vec![200u8; 256 * 256 * 4];
    let handle = device
        .create_texture(
            &TextureDesc::new_2d(256, 256, format).with_mips(),
            Some(&pixels),
        )
        .unwrap();
    assert_eq!(device.texture(handle).unwrap().mip_count(), 9);

    for mip in 0..9 {
        let side = (256usize >> mip).max(1);
        assert_eq!(device.read_texture(handle, mip).unwrap().len(), side * side * 4);
    }

    match device.texture(handle).unwrap().gpu().written_mips() {
        // The dummy backend records writes instead of running the shader.
        Some(written) => assert_eq!(written, vec![true; 9]),
        None => {
            for mip in 1..9 {
                let texels = device.read_texture(handle, mip).unwrap();
                // A flat image averages to itself; allow one step of rounding.
                assert!(
                    texels.iter().all(|t| t.abs_diff(200) <= 1),
                    "mip {mip} was not written"
                );
            }
        }
    }
    assert_eq!(
        device.texture(handle).unwrap().state(),
        ResourceState::SHADER_READ
    );
}

#[test]
#[should_panic(expected = "descriptor pool exhausted")]
fn test_render_target_pool_overflow_panics() {
    let config = RhiConfig::new().with_pool_capacity(DescriptorPoolKind::RenderTarget, 2);
    let mut ctx = TestContext::with_config(Backend::Dummy, config).unwrap();
    let _ = ctx.rhi.create_render_pass(&RenderPassDesc::offscreen(
        64,
        64,
        &[
            TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float,
            TextureFormat::Rgba8Unorm,
        ],
    ));
}

// ============================================================================
// Pipeline Tests
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_reflection_and_binding(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let rhi = &mut ctx.rhi;

    let pass = rhi
        .create_render_pass(&RenderPassDesc::offscreen(128, 128, &[TextureFormat::Rgba8Unorm]))
        .unwrap();
    let blit = rhi
        .device_mut()
        .create_pipeline(&PipelineDesc::graphics(
            ShaderSource::inline("blit", BLIT_SHADER),
            pass,
        ))
        .unwrap();

    let names: BTreeSet<String> = rhi
        .device()
        .pipeline(blit)
        .unwrap()
        .layout()
        .slot_map()
        .into_keys()
        .collect();
    assert!(names.contains("source"));
    assert!(names.contains("tint"));
    // Samplers named after a static sampler are baked into the layout.
    assert!(!names.contains("linear_clamp"));

    let texture = rhi
        .device_mut()
        .create_texture(&TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm), Some(&[255; 64]))
        .unwrap();
    let uniforms = rhi
        .device_mut()
        .create_buffer(&BufferDesc::new(160, 1, BufferUsage::Uniform), Some(&[0; 160]))
        .unwrap();

    rhi.begin_render().unwrap();
    rhi.begin_render_pass(pass).unwrap();
    rhi.bind_pipeline(blit).unwrap();
    assert!(rhi.bind_parameter("source", Parameter::Texture(texture)).unwrap());
    assert!(rhi.bind_parameter("tint", Parameter::Buffer(uniforms)).unwrap());
    assert!(!rhi.bind_parameter("no_such_input", Parameter::Texture(texture)).unwrap());
    rhi.draw(3).unwrap();
    rhi.end_render_pass().unwrap();
    rhi.end_render().unwrap();
    rhi.render().unwrap();
    rhi.wait_for_gpu().unwrap();
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_vertex_buffer_on_compute_pipeline_is_error(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let rhi = &mut ctx.rhi;

    let compute = rhi
        .device_mut()
        .create_pipeline(&PipelineDesc::compute(ShaderSource::inline(
            "clear",
            r#"
@group(0) @binding(0) var<storage, read_write> values: array<u32>;

@compute @workgroup_size(64)
fn cs_main(@builtin(global_invocation_id) id: vec3<u32>) {
    values[id.x] = 0u;
}
"#,
        )))
        .unwrap();
    let vertices = rhi
        .device_mut()
        .create_buffer(&BufferDesc::new(12, 3, BufferUsage::Vertex), None)
        .unwrap();

    rhi.begin_render().unwrap();
    rhi.bind_pipeline(compute).unwrap();
    assert!(matches!(
        rhi.bind_vertex_buffer(vertices),
        Err(RhiError::InvalidParameter(_))
    ));
    assert!(rhi.bind_index_buffer(vertices).is_err());
}

/// Reloading a changed program keeps the handle and the name to slot map.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_reload_keeps_slot_map(#[case] backend: Backend) {
    let root = scratch_shader_root(&format!("reload-{}", backend.name()));
    let path = root.join("blit.wgsl");
    std::fs::write(&path, BLIT_SHADER).unwrap();

    let config = RhiConfig::new().with_shader_root(&root);
    let Some(mut ctx) = TestContext::with_config(backend, config) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let pass = ctx
        .rhi
        .create_render_pass(&RenderPassDesc::offscreen(64, 64, &[TextureFormat::Rgba8Unorm]))
        .unwrap();
    let device = ctx.rhi.device_mut();
    let handle = device
        .create_pipeline(&PipelineDesc::graphics(ShaderSource::program("blit"), pass))
        .unwrap();
    let before = device.pipeline(handle).unwrap().layout().slot_map();

    // Same interface, different body.
    let edited = BLIT_SHADER.replace("* tint.exposure.x", "* tint.exposure.y");
    std::fs::write(&path, edited).unwrap();
    device.reload_pipeline(handle).unwrap();

    let pipeline = device.pipeline(handle).unwrap();
    assert_eq!(pipeline.reloads(), 1);
    assert_eq!(pipeline.layout().slot_map(), before);

    // A broken edit keeps the previous pipeline.
    std::fs::write(&path, "fn broken( {").unwrap();
    assert!(matches!(
        device.reload_pipeline(handle),
        Err(RhiError::ShaderCompilationFailed(_))
    ));
    let pipeline = device.pipeline(handle).unwrap();
    assert_eq!(pipeline.reloads(), 1);
    assert_eq!(pipeline.layout().slot_map(), before);

    let _ = std::fs::remove_dir_all(&root);
}

// ============================================================================
// Resize Tests
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_resize_twice_recreates_once(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let rhi = &mut ctx.rhi;

    let pass = rhi
        .create_render_pass(
            &RenderPassDesc::swapchain(1600, 900).with_depth(TextureFormat::Depth24PlusStencil8),
        )
        .unwrap();
    let depth = rhi.device().render_pass(pass).unwrap().depth_attachment().unwrap();
    let dsv = rhi.device().texture(depth).unwrap().descriptors().dsv;

    assert!(rhi.resize(1280, 720).unwrap());
    assert!(!rhi.resize(1280, 720).unwrap());

    let render_pass = rhi.device().render_pass(pass).unwrap();
    assert_eq!(render_pass.recreations(), 1);
    assert_eq!((render_pass.width(), render_pass.height()), (1280, 720));
    let depth = render_pass.depth_attachment().unwrap();
    assert_eq!(rhi.device().texture(depth).unwrap().descriptors().dsv, dsv);
    assert_eq!(ctx.stats().unwrap().surface_resizes, 1);

    // The resized pass still renders and presents.
    let rhi = &mut ctx.rhi;
    rhi.begin_render().unwrap();
    rhi.begin_render_pass(pass).unwrap();
    rhi.end_render_pass().unwrap();
    rhi.end_render().unwrap();
    assert!(rhi.render().unwrap().presented);
}

/// The images of a recreated surface start undefined; the first frame after a
/// resize transitions them like the first frame after creation.
#[rstest]
#[case::dummy(Backend::Dummy)]
fn test_first_frames_after_resize_present_valid_images(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let rhi = &mut ctx.rhi;
    let pass = rhi
        .create_render_pass(&RenderPassDesc::swapchain(1600, 900))
        .unwrap();
    let offscreen = rhi
        .create_render_pass(&RenderPassDesc::offscreen(64, 64, &[TextureFormat::Rgba8Unorm]))
        .unwrap();

    rhi.begin_render().unwrap();
    rhi.begin_render_pass(pass).unwrap();
    rhi.end_render_pass().unwrap();
    rhi.end_render().unwrap();
    rhi.render().unwrap();

    assert!(rhi.resize(1024, 768).unwrap());
    for texture in rhi.device().back_buffers() {
        assert_eq!(rhi.device().texture(*texture).unwrap().state(), ResourceState::Common);
    }

    // One frame that skips the swapchain pass, then one per back buffer that uses it.
    rhi.begin_render().unwrap();
    rhi.begin_render_pass(offscreen).unwrap();
    rhi.end_render_pass().unwrap();
    rhi.end_render().unwrap();
    rhi.render().unwrap();
    for _ in 0..BUFFERED_FRAMES {
        rhi.begin_render().unwrap();
        rhi.begin_render_pass(pass).unwrap();
        rhi.end_render_pass().unwrap();
        rhi.end_render().unwrap();
        rhi.render().unwrap();
    }

    let stats = ctx.stats().unwrap();
    assert_eq!(stats.presents, 2 + BUFFERED_FRAMES as u64);
    assert_eq!(stats.invalid_presents, 0);
    assert_eq!(stats.state_mismatches, 0);
}

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_offscreen_pass_resize(#[case] backend: Backend) {
    let Some(mut ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    let pass = ctx
        .rhi
        .create_render_pass(
            &RenderPassDesc::offscreen(
                320,
                240,
                &[TextureFormat::Rgba8Unorm, TextureFormat::Rgba16Float],
            )
            .with_depth(TextureFormat::Depth32Float),
        )
        .unwrap();
    let device = ctx.rhi.device_mut();
    let before: Vec<_> = device
        .render_pass(pass)
        .unwrap()
        .color_attachments()
        .iter()
        .map(|t| device.texture(*t).unwrap().descriptors())
        .collect();

    assert!(device.resize_render_pass(pass, 640, 480).unwrap());
    assert!(!device.resize_render_pass(pass, 640, 480).unwrap());

    let render_pass = device.render_pass(pass).unwrap();
    assert_eq!(render_pass.recreations(), 1);
    let after: Vec<_> = render_pass
        .color_attachments()
        .iter()
        .map(|t| device.texture(*t).unwrap().descriptors())
        .collect();
    assert_eq!(before, after);
    for texture in render_pass.color_attachments() {
        let texture = device.texture(*texture).unwrap();
        assert_eq!((texture.width(), texture.height()), (640, 480));
        assert_eq!(texture.state(), ResourceState::SHADER_READ);
    }
}
