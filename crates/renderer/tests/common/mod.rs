//! Shared setup for the GPU integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use ash::vk;
use lumen_renderer::subpass::{FrameContext, Subpass, SubpassCore};
use lumen_renderer::{
    CommandRecorder, RenderContext, RenderContextDesc, RenderPipeline, RenderResult, RenderTarget,
    ResourceCache, SceneView,
};
use lumen_rhi::RhiError;
use lumen_rhi::buffer::{Buffer, BufferUsage};
use lumen_rhi::command::CommandBufferResetMode;
use lumen_rhi::device::Device;
use lumen_rhi::instance::{Instance, InstanceDesc};
use lumen_rhi::physical_device::select_physical_device;
use lumen_rhi::pipeline_state::{CullMode, RasterizationState};
use lumen_rhi::shader::{ShaderSource, ShaderStage, ShaderVariant};

pub const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 64,
    height: 64,
};

/// Device objects in drop order: cache, device, then instance.
pub struct Gpu {
    pub cache: Arc<ResourceCache>,
    pub device: Arc<Device>,
    pub surface: Option<vk::SurfaceKHR>,
    pub instance: Instance,
}

impl Drop for Gpu {
    fn drop(&mut self) {
        if let Some(surface) = self.surface.take() {
            let _ = self.device.wait_idle();
            unsafe { self.instance.destroy_surface(surface) };
        }
    }
}

/// A device without presentation, or `None` when Vulkan is unavailable.
pub fn gpu() -> Option<Gpu> {
    open(InstanceDesc::default(), false)
}

/// A device that can present to a headless surface, or `None` when the
/// loader or driver does not offer one.
pub fn gpu_with_headless_surface() -> Option<Gpu> {
    let desc = InstanceDesc {
        enable_headless_surface: true,
        ..Default::default()
    };
    open(desc, true)
}

fn open(desc: InstanceDesc, want_surface: bool) -> Option<Gpu> {
    let instance = match Instance::new(&desc) {
        Ok(instance) => instance,
        Err(RhiError::LoadingError(_)) => {
            eprintln!("Skipping test: Vulkan not available");
            return None;
        }
        Err(e) => panic!("Unexpected error: {:?}", e),
    };

    let surface = if want_surface {
        if !instance.supports_headless_surface() {
            eprintln!("Skipping test: VK_EXT_headless_surface not available");
            return None;
        }
        Some(instance.create_headless_surface().expect("headless surface"))
    } else {
        None
    };

    let info = match select_physical_device(&instance, surface) {
        Ok(info) => info,
        Err(_) => {
            eprintln!("Skipping test: no suitable Vulkan device");
            if let Some(surface) = surface {
                unsafe { instance.destroy_surface(surface) };
            }
            return None;
        }
    };
    let device = Device::new(&instance, &info).expect("device");
    let cache = Arc::new(ResourceCache::new(device.clone()).expect("resource cache"));
    Some(Gpu {
        cache,
        device,
        surface,
        instance,
    })
}

/// Headless render context rendering into an `R8G8B8A8_UNORM` image.
pub fn headless_context(
    gpu: &Gpu,
    create_target: impl Fn(lumen_rhi::image::Image) -> RenderResult<RenderTarget> + Send + Sync + 'static,
) -> RenderContext {
    let mut desc = RenderContextDesc::new(EXTENT);
    desc.headless_format = vk::Format::R8G8B8A8_UNORM;
    let mut context =
        RenderContext::new(gpu.device.clone(), gpu.cache.clone(), None, None, desc).expect("context");
    context.prepare(1, create_target).expect("prepare");
    context
}

/// Records `pipeline` into the next frame, copies attachment 0 to host
/// memory and returns its RGBA8 pixels.
pub fn render_and_read(
    context: &mut RenderContext,
    pipeline: &mut RenderPipeline,
    view: SceneView<'_>,
) -> Vec<u8> {
    render_and_read_with(context, pipeline, view, |_, _| {})
}

/// [`render_and_read`] with `before_submit` run once the frame is recorded
/// and still active.
pub fn render_and_read_with(
    context: &mut RenderContext,
    pipeline: &mut RenderPipeline,
    view: SceneView<'_>,
    before_submit: impl FnOnce(&CommandRecorder, &mut RenderContext),
) -> Vec<u8> {
    let device = context.device().clone();
    let mut recorder = context
        .begin(CommandBufferResetMode::ResetPool)
        .expect("begin")
        .expect("frame available");
    recorder
        .begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)
        .expect("begin recording");

    let target = context.active_frame_mut().expect("active frame").render_target_mut();
    pipeline
        .draw(&mut recorder, target, view, vk::SubpassContents::INLINE)
        .expect("draw");
    recorder.end_render_pass();

    let extent = target.extent();
    let size = u64::from(extent.width) * u64::from(extent.height) * 4;
    let readback = Buffer::new(device, BufferUsage::Readback, size).expect("readback buffer");
    target
        .transition(&recorder, 0, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .expect("transition");
    let region = vk::BufferImageCopy::default()
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        });
    let image = target.image(0).expect("color image");
    recorder.copy_image_to_buffer(image, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, &readback, &[region]);
    recorder.buffer_memory_barrier(
        &readback,
        0,
        vk::WHOLE_SIZE,
        &lumen_renderer::command_recorder::BufferBarrier::transfer_to_host(),
    );
    before_submit(&recorder, context);
    recorder.end().expect("end recording");

    context.submit(&[&recorder]).expect("submit");
    context.wait_frame().expect("wait");
    readback.read(0, size as usize).expect("read back")
}

pub fn pixel(data: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let offset = ((y * width + x) * 4) as usize;
    [data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]
}

pub fn center(data: &[u8]) -> [u8; 4] {
    pixel(data, EXTENT.width, EXTENT.width / 2, EXTENT.height / 2)
}

pub fn assert_near(actual: [u8; 4], expected: [u8; 4], tolerance: u8) {
    for (a, e) in actual.iter().zip(expected) {
        assert!(
            a.abs_diff(e) <= tolerance,
            "pixel {actual:?} differs from {expected:?} by more than {tolerance}"
        );
    }
}

const TRIANGLE_VERT: &str = "#version 450
void main() {
    vec2 uv = vec2(float((gl_VertexIndex << 1) & 2), float(gl_VertexIndex & 2));
    gl_Position = vec4(uv * 2.0 - 1.0, 0.0, 1.0);
}
";

const RED_FRAG: &str = "#version 450
layout(location = 0) out vec4 o_color;
void main() {
    o_color = vec4(1.0, 0.0, 0.0, 1.0);
}
";

/// Full-viewport red triangle without vertex buffers. With `draws` unset
/// the subpass records nothing and only the clear remains.
pub struct TriangleSubpass {
    core: SubpassCore,
    draws: bool,
}

impl TriangleSubpass {
    pub fn red() -> Self {
        let mut core = SubpassCore::new(
            ShaderSource::new("triangle.vert", TRIANGLE_VERT),
            ShaderSource::new("red.frag", RED_FRAG),
        );
        core.set_debug_name("triangle");
        Self { core, draws: true }
    }

    pub fn clear_only() -> Self {
        Self {
            draws: false,
            ..Self::red()
        }
    }
}

impl Subpass for TriangleSubpass {
    fn core(&self) -> &SubpassCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SubpassCore {
        &mut self.core
    }

    fn draw(&mut self, recorder: &mut CommandRecorder, _ctx: &FrameContext<'_>) -> RenderResult<()> {
        if !self.draws {
            return Ok(());
        }
        let cache = recorder.frame().cache().clone();
        let variant = ShaderVariant::new();
        let vertex = cache.request_shader_module(ShaderStage::Vertex, self.core.vertex_source(), &variant)?;
        let fragment =
            cache.request_shader_module(ShaderStage::Fragment, self.core.fragment_source(), &variant)?;
        let layout = cache.request_pipeline_layout(&[vertex, fragment])?;
        recorder.bind_pipeline_layout(layout);
        recorder.set_rasterization_state(RasterizationState {
            cull_mode: CullMode::None,
            ..Default::default()
        });
        recorder.draw(3, 1, 0, 0)
    }
}
