//! Lumen sample: a procedural scene rendered with a forward or deferred
//! pipeline, chosen by `[sample] pipeline` in `lumen.toml`.

mod demo_scene;
mod free_camera;

use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use lumen_core::{Config, FrameTimer, PipelineKind};
use lumen_platform::{ActiveEventLoop, DeviceEvent, EventLoop, InputState, KeyCode, Surface, Window, WindowEvent};
use lumen_renderer::render_frame::command_buffer_reset_mode;
use lumen_renderer::{
    ForwardSubpass, GeometrySubpass, LightingSubpass, RenderContext, RenderContextDesc, RenderPipeline,
    RenderResult, RenderTarget, ResourceCache, SceneView,
};
use lumen_rhi::command::CommandBufferResetMode;
use lumen_rhi::device::Device;
use lumen_rhi::image::Image;
use lumen_rhi::instance::{Instance, InstanceDesc};
use lumen_rhi::physical_device::select_physical_device;
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::DeviceId;
use winit::event_loop::ControlFlow;
use winit::window::WindowId;

use demo_scene::DemoScene;
use free_camera::FreeCamera;

const CONFIG_PATH: &str = "lumen.toml";
const HEADLESS_FRAMES: u32 = 3;

type CreateTarget = fn(Image) -> RenderResult<RenderTarget>;

fn build_pipeline(kind: PipelineKind) -> (RenderPipeline, CreateTarget) {
    match kind {
        PipelineKind::Forward => (
            RenderPipeline::new(vec![Box::new(ForwardSubpass::new())]),
            RenderTarget::with_depth,
        ),
        PipelineKind::Deferred => (
            RenderPipeline::new(vec![
                Box::new(GeometrySubpass::new()),
                Box::new(LightingSubpass::new()),
            ]),
            RenderTarget::deferred,
        ),
    }
}

/// GPU objects, declared in teardown order: the swapchain goes before the
/// surface and the surface before the instance.
struct Renderer {
    pipeline: RenderPipeline,
    demo: DemoScene,
    context: RenderContext,
    cache: Arc<ResourceCache>,
    device: Arc<Device>,
    surface: Option<Surface>,
    instance: Instance,
    reset_mode: CommandBufferResetMode,
}

impl Renderer {
    fn new(config: &Config, window: Option<&Window>) -> Result<Self> {
        let instance = Instance::new(&InstanceDesc {
            application_name: config.window.title.clone(),
            enable_validation: config.renderer.validation,
            surface_extensions: window.map(Window::required_extensions).transpose()?.unwrap_or_default(),
            enable_headless_surface: false,
        })?;
        let surface = window
            .map(|w| w.create_surface(instance.entry(), instance.handle()))
            .transpose()?;

        let info = select_physical_device(&instance, surface.as_ref().map(Surface::handle))?;
        let device = Device::new(&instance, &info)?;
        let cache = Arc::new(ResourceCache::new(device.clone())?);

        let extent = window.map_or(
            vk::Extent2D {
                width: config.window.width,
                height: config.window.height,
            },
            Window::extent,
        );
        let desc = RenderContextDesc::from_config(&config.renderer, extent);
        let mut context = RenderContext::new(
            device.clone(),
            cache.clone(),
            surface.as_ref().map(Surface::handle),
            surface.as_ref().map(Surface::loader),
            desc,
        )?;

        let (mut pipeline, create_target) = build_pipeline(config.sample.pipeline);
        context.prepare(config.renderer.thread_count, create_target)?;
        pipeline.prepare(&cache)?;

        let surface_extent = context.surface_extent();
        let demo = demo_scene::build(
            &device,
            surface_extent.width as f32 / surface_extent.height.max(1) as f32,
        )?;
        info!("Renderer ready with the {:?} pipeline", config.sample.pipeline);

        Ok(Self {
            pipeline,
            demo,
            context,
            cache,
            device,
            surface,
            instance,
            reset_mode: command_buffer_reset_mode(config.renderer.command_buffer_reset_mode),
        })
    }

    /// Records and submits one frame. Returns whether a frame was rendered.
    fn render(&mut self) -> RenderResult<bool> {
        let extent = self.context.surface_extent();
        if extent.width > 0 && extent.height > 0 {
            self.demo
                .scene
                .camera_mut(self.demo.camera)
                .set_aspect(extent.width as f32 / extent.height as f32);
        }

        let Some(mut recorder) = self.context.begin(self.reset_mode)? else {
            return Ok(false);
        };
        recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)?;

        let presents = self.context.has_swapchain();
        let target = self.context.active_frame_mut()?.render_target_mut();
        let view = SceneView::new(&self.demo.scene, self.demo.camera);
        self.pipeline
            .draw(&mut recorder, target, view, vk::SubpassContents::INLINE)?;
        recorder.end_render_pass();
        if presents {
            target.transition(&recorder, 0, vk::ImageLayout::PRESENT_SRC_KHR)?;
        }
        recorder.end()?;

        self.context.submit(&[&recorder])?;
        Ok(true)
    }

    fn update_camera(&mut self, controller: &mut FreeCamera, input: &InputState, delta_time: f32) {
        let node = self.demo.scene.node_mut(self.demo.camera_node);
        controller.update(&mut node.transform, input, delta_time);
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Device wait before shutdown failed: {}", e);
        }
        let stats = self.cache.stats();
        debug!(
            "Resource cache at shutdown: {} pipeline(s), {} render pass(es), {} framebuffer(s)",
            stats.graphics_pipelines, stats.render_passes, stats.framebuffers
        );
    }
}

struct App {
    config: Config,
    window: Option<Window>,
    renderer: Option<Renderer>,
    controller: Option<FreeCamera>,
    input: InputState,
    timer: FrameTimer,
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            controller: None,
            input: InputState::new(),
            timer: FrameTimer::new(),
            error: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        error!("{:#}", error);
        self.error = Some(error);
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let delta_time = self.timer.tick().as_secs_f32();
        let (Some(window), Some(renderer), Some(controller)) =
            (&self.window, &mut self.renderer, &mut self.controller)
        else {
            return;
        };
        if window.is_minimized() {
            return;
        }

        renderer.update_camera(controller, &self.input, delta_time);
        self.input.end_frame();

        if let Err(e) = renderer.render() {
            self.fail(event_loop, e.into());
            return;
        }
        if self.timer.frame_count() % 240 == 0 {
            debug!("{:.1} fps", self.timer.fps());
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window = match Window::new(event_loop, &self.config.window) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, e.into()),
        };
        match Renderer::new(&self.config, Some(&window)) {
            Ok(renderer) => {
                let camera = renderer.demo.scene.node(renderer.demo.camera_node).transform;
                self.controller = Some(FreeCamera::from_transform(&camera));
                self.renderer = Some(renderer);
                self.window = Some(window);
                info!("Entering main loop");
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        self.input.process_event(&event);
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { .. } if self.input.was_key_pressed(KeyCode::Escape) => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = &mut self.renderer
                    && size.width > 0
                    && size.height > 0
                    && let Err(e) = renderer.context.handle_surface_changes(false)
                {
                    self.fail(event_loop, e.into());
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            self.input.on_mouse_motion(dx, dy);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

/// Renders a few frames offscreen, for machines without a display.
fn run_headless(config: &Config) -> Result<()> {
    let mut renderer = Renderer::new(config, None)?;
    let mut rendered = 0;
    for _ in 0..HEADLESS_FRAMES {
        if renderer.render()? {
            rendered += 1;
        }
    }
    renderer.context.wait_frame()?;
    info!("Rendered {} headless frame(s)", rendered);
    Ok(())
}

fn main() -> Result<()> {
    lumen_core::init_logging();
    let config = Config::load_or_default(CONFIG_PATH)?;
    info!("Starting Lumen ({:?} pipeline)", config.sample.pipeline);

    if config.renderer.headless {
        return run_headless(&config);
    }

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
