//! End-to-end rendering on a headless device, read back through a
//! host-visible buffer. Every test skips when Vulkan is unavailable.

mod common;

use std::f32::consts::FRAC_PI_2;

use ash::vk;
use glam::{Quat, Vec3, Vec4};
use lumen_renderer::{
    ForwardSubpass, GeometrySubpass, LightingSubpass, RenderContext, RenderContextDesc,
    RenderError, RenderPipeline, RenderTarget, SceneView,
};
use lumen_rhi::command::CommandBufferResetMode;
use lumen_scene::{AlphaMode, Camera, CameraId, Geometry, Light, Material, Scene, Transform};

use common::{
    EXTENT, TriangleSubpass, assert_near, center, gpu, gpu_with_headless_surface, headless_context,
    render_and_read, render_and_read_with,
};

/// A scene with a camera at (0, 5, 0) looking straight down.
fn top_down_scene() -> (Scene, CameraId) {
    let mut scene = Scene::new("test");
    let camera_node = scene.add_node(
        "camera",
        Transform::new()
            .with_position(Vec3::new(0.0, 5.0, 0.0))
            .with_rotation(Quat::from_rotation_x(-FRAC_PI_2)),
        None,
    );
    let camera = scene.add_camera(Camera::perspective(60f32.to_radians(), 1.0, 0.1, 100.0), camera_node);
    (scene, camera)
}

fn add_quad(scene: &mut Scene, device: &std::sync::Arc<lumen_rhi::device::Device>, height: f32, mut material: Material) {
    material.double_sided = true;
    let material = scene.add_material(material);
    let mesh = Geometry::quad(20.0)
        .upload(device, "quad", Some(material))
        .expect("upload quad");
    let mesh = scene.add_mesh(mesh);
    let node = scene.add_node(
        "quad",
        Transform::new().with_position(Vec3::new(0.0, height, 0.0)),
        None,
    );
    scene.node_mut(node).mesh = Some(mesh);
}

#[test]
fn test_clear_to_black() {
    let Some(gpu) = gpu() else { return };
    let mut context = headless_context(&gpu, RenderTarget::with_depth);
    let mut pipeline = RenderPipeline::new(vec![Box::new(TriangleSubpass::clear_only())]);
    let (scene, camera) = top_down_scene();

    let pixels = render_and_read(&mut context, &mut pipeline, SceneView::new(&scene, camera));
    assert_eq!(center(&pixels), [0, 0, 0, 255]);
    assert_eq!(&pixels[..4], &[0, 0, 0, 255]);
}

#[test]
fn test_red_triangle_covers_viewport() {
    let Some(gpu) = gpu() else { return };
    let mut context = headless_context(&gpu, RenderTarget::with_depth);
    let mut pipeline = RenderPipeline::new(vec![Box::new(TriangleSubpass::red())]);
    pipeline.prepare(&gpu.cache).expect("prepare");
    let (scene, camera) = top_down_scene();

    let pixels = render_and_read(&mut context, &mut pipeline, SceneView::new(&scene, camera));
    assert_eq!(center(&pixels), [255, 0, 0, 255]);
    assert_eq!(common::pixel(&pixels, EXTENT.width, 0, 0), [255, 0, 0, 255]);

    // A second frame through the same context reuses the cached objects.
    let before = gpu.cache.stats();
    let pixels = render_and_read(&mut context, &mut pipeline, SceneView::new(&scene, camera));
    assert_eq!(center(&pixels), [255, 0, 0, 255]);
    assert_eq!(gpu.cache.stats().graphics_pipelines, before.graphics_pipelines);
}

#[test]
fn test_transparent_over_opaque_blends() {
    let Some(gpu) = gpu() else { return };
    let mut context = headless_context(&gpu, RenderTarget::with_depth);
    let mut pipeline = RenderPipeline::new(vec![Box::new(ForwardSubpass::new())]);
    pipeline.prepare(&gpu.cache).expect("prepare");

    let (mut scene, camera) = top_down_scene();
    add_quad(
        &mut scene,
        &gpu.device,
        0.0,
        Material::new("green")
            .with_base_color(Vec4::new(0.0, 0.0, 0.0, 1.0))
            .with_emissive(Vec3::new(0.0, 1.0, 0.0)),
    );
    add_quad(
        &mut scene,
        &gpu.device,
        1.0,
        Material::new("red glass")
            .with_base_color(Vec4::new(0.0, 0.0, 0.0, 0.5))
            .with_emissive(Vec3::new(1.0, 0.0, 0.0))
            .with_alpha_mode(AlphaMode::Blend),
    );

    let pixels = render_and_read(&mut context, &mut pipeline, SceneView::new(&scene, camera));
    assert_near(center(&pixels), [128, 128, 0, 255], 2);
}

#[test]
fn test_deferred_directional_light() {
    let Some(gpu) = gpu() else { return };
    let mut context = headless_context(&gpu, RenderTarget::deferred);
    let mut pipeline = RenderPipeline::new(vec![
        Box::new(GeometrySubpass::new()),
        Box::new(LightingSubpass::new()),
    ]);
    pipeline.prepare(&gpu.cache).expect("prepare");

    let (mut scene, camera) = top_down_scene();
    add_quad(
        &mut scene,
        &gpu.device,
        0.0,
        Material::new("white").with_base_color(Vec4::ONE),
    );
    // Nodes look down -Z; pitching by -90 degrees points the light at -Y.
    let sun = scene.add_node(
        "sun",
        Transform::new().with_rotation(Quat::from_rotation_x(-FRAC_PI_2)),
        None,
    );
    scene.add_light(Light::directional(Vec3::ONE, 1.0), sun);

    let pixels = render_and_read(&mut context, &mut pipeline, SceneView::new(&scene, camera));
    assert_near(center(&pixels), [255, 255, 255, 255], 2);
    assert_eq!(pipeline.active_subpass_index(), 0);
}

#[test]
fn test_lighting_subpass_does_not_inherit_transparent_blending() {
    let Some(gpu) = gpu() else { return };
    let mut context = headless_context(&gpu, RenderTarget::deferred);
    let mut pipeline = RenderPipeline::new(vec![
        Box::new(GeometrySubpass::new()),
        Box::new(LightingSubpass::new()),
    ]);
    pipeline.prepare(&gpu.cache).expect("prepare");

    let (mut scene, camera) = top_down_scene();
    add_quad(
        &mut scene,
        &gpu.device,
        0.0,
        Material::new("white").with_base_color(Vec4::ONE),
    );
    add_quad(
        &mut scene,
        &gpu.device,
        1.0,
        Material::new("glass")
            .with_base_color(Vec4::new(1.0, 1.0, 1.0, 0.5))
            .with_alpha_mode(AlphaMode::Blend),
    );
    let sun = scene.add_node(
        "sun",
        Transform::new().with_rotation(Quat::from_rotation_x(-FRAC_PI_2)),
        None,
    );
    scene.add_light(Light::directional(Vec3::ONE, 1.0), sun);

    render_and_read_with(&mut context, &mut pipeline, SceneView::new(&scene, camera), |recorder, _| {
        let state = recorder.pipeline_state();
        assert_eq!(state.subpass_index(), 1);
        let outputs = state.render_pass().expect("render pass").color_output_count(1) as usize;
        let attachments = &state.color_blend_state().attachments;
        assert_eq!(attachments.len(), outputs);
        assert!(attachments.iter().all(|attachment| !attachment.blend_enable));
    });
}

#[test]
fn test_zero_count_draws_reach_the_backend() {
    let Some(gpu) = gpu() else { return };
    let mut context = headless_context(&gpu, RenderTarget::with_depth);
    let mut pipeline = RenderPipeline::new(vec![Box::new(ForwardSubpass::new())]);
    pipeline.prepare(&gpu.cache).expect("prepare");

    let (mut scene, camera) = top_down_scene();
    let mut mesh = Geometry::quad(20.0)
        .upload(&gpu.device, "quad", None)
        .expect("upload quad");
    let mut no_vertices = mesh.submeshes[0].clone();
    no_vertices.index_buffer = None;
    no_vertices.vertex_count = 0;
    let mut no_indices = mesh.submeshes[0].clone();
    no_indices.index_count = 0;
    mesh.submeshes = vec![no_vertices, no_indices];
    let mesh = scene.add_mesh(mesh);
    let node = scene.add_node("empty", Transform::new(), None);
    scene.node_mut(node).mesh = Some(mesh);

    let pixels = render_and_read_with(&mut context, &mut pipeline, SceneView::new(&scene, camera), |recorder, _| {
        assert!(recorder.pipeline_state().pipeline_layout().is_some());
        assert!(!recorder.pipeline_state().is_dirty());
    });
    // Both draws flushed the same pipeline and drew nothing over the clear.
    assert_eq!(gpu.cache.stats().graphics_pipelines, 1);
    assert_eq!(center(&pixels), [0, 0, 0, 255]);
}

#[test]
fn test_resize_during_recording_keeps_the_stale_target() {
    let Some(gpu) = gpu() else { return };
    let mut context = headless_context(&gpu, RenderTarget::with_depth);
    let mut pipeline = RenderPipeline::new(vec![Box::new(TriangleSubpass::red())]);
    pipeline.prepare(&gpu.cache).expect("prepare");
    let (scene, camera) = top_down_scene();
    let larger = vk::Extent2D {
        width: 128,
        height: 128,
    };

    let pixels = render_and_read_with(&mut context, &mut pipeline, SceneView::new(&scene, camera), |_, context| {
        context.update_swapchain_extent(larger).expect("resize");
        assert_eq!(context.surface_extent(), EXTENT);
        let frame = context.active_frame().expect("frame still active");
        assert_eq!(frame.render_target().extent(), EXTENT);
    });
    assert_eq!(pixels.len(), (EXTENT.width * EXTENT.height * 4) as usize);
    assert_eq!(center(&pixels), [255, 0, 0, 255]);
    assert_eq!(context.surface_extent(), EXTENT);

    let pixels = render_and_read(&mut context, &mut pipeline, SceneView::new(&scene, camera));
    assert_eq!(context.surface_extent(), larger);
    assert_eq!(pixels.len(), (larger.width * larger.height * 4) as usize);
    assert_eq!(common::pixel(&pixels, larger.width, 64, 64), [255, 0, 0, 255]);
    let frame = context.last_rendered_frame().expect("last frame");
    assert_eq!(frame.render_target().extent(), larger);
}

#[test]
fn test_push_constants_over_device_limit() {
    let Some(gpu) = gpu() else { return };
    let mut context = headless_context(&gpu, RenderTarget::with_depth);
    let mut recorder = context
        .begin(CommandBufferResetMode::ResetPool)
        .expect("begin")
        .expect("frame available");
    recorder
        .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)
        .expect("begin recording");

    let limit = gpu.device.limits().max_push_constants_size as usize;
    recorder.push_constants_bytes(&vec![0u8; limit]).expect("exactly at the limit");
    let result = recorder.push_constants_bytes(&[0u8]);
    assert!(matches!(
        result,
        Err(RenderError::PushConstantOverflow { size, .. }) if size == limit + 1
    ));
    assert_eq!(recorder.stored_push_constants().len(), limit);

    recorder.end().expect("end recording");
    context.submit(&[&recorder]).expect("submit");
    context.wait_frame().expect("wait");
}

#[test]
fn test_headless_surface_resize() {
    let Some(gpu) = gpu_with_headless_surface() else { return };
    let mut desc = RenderContextDesc::new(vk::Extent2D {
        width: 800,
        height: 600,
    });
    desc.surface_format_priority.insert(
        0,
        vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        },
    );
    let mut context = RenderContext::new(
        gpu.device.clone(),
        gpu.cache.clone(),
        gpu.surface,
        gpu.instance.surface_loader(),
        desc,
    )
    .expect("context");
    context.prepare(1, RenderTarget::with_depth).expect("prepare");
    assert_eq!(context.surface_extent().width, 800);

    let mut pipeline = RenderPipeline::new(vec![Box::new(TriangleSubpass::red())]);
    let (scene, camera) = top_down_scene();
    let mut present_frame = |context: &mut RenderContext| {
        let mut recorder = context
            .begin(CommandBufferResetMode::ResetPool)
            .expect("begin")
            .expect("frame available");
        recorder
            .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)
            .expect("begin recording");
        let target = context.active_frame_mut().expect("active frame").render_target_mut();
        pipeline
            .draw(&mut recorder, target, SceneView::new(&scene, camera), vk::SubpassContents::INLINE)
            .expect("draw");
        recorder.end_render_pass();
        target
            .transition(&recorder, 0, vk::ImageLayout::PRESENT_SRC_KHR)
            .expect("transition");
        recorder.end().expect("end recording");
        context.submit(&[&recorder]).expect("submit");
    };

    for _ in 0..3 {
        present_frame(&mut context);
    }
    assert!(gpu.cache.stats().framebuffers > 0);
    assert_eq!(context.surface_extent(), vk::Extent2D { width: 800, height: 600 });

    context
        .update_swapchain_extent(vk::Extent2D {
            width: 1024,
            height: 768,
        })
        .expect("resize");
    assert_eq!(gpu.cache.stats().framebuffers, 0);
    assert_eq!(context.surface_extent(), vk::Extent2D { width: 1024, height: 768 });
    for frame in context.render_frames() {
        assert_eq!(frame.render_target().extent(), vk::Extent2D { width: 1024, height: 768 });
    }

    present_frame(&mut context);
    let frame = context.last_rendered_frame().expect("last frame");
    assert_eq!(frame.render_target().extent().width, 1024);
    assert_eq!(frame.render_target().extent().height, 768);
}
