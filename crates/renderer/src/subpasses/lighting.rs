//! Deferred lighting over the G-buffer written by the geometry subpass.

use std::sync::Arc;

use glam::Vec2;
use lumen_rhi::buffer::BufferUsage;
use lumen_rhi::pipeline_state::{CullMode, DepthStencilState, RasterizationState, VertexInputState};
use lumen_rhi::sampler::{Sampler, SamplerDesc};
use lumen_rhi::shader::{ShaderSource, ShaderStage, ShaderVariant};
use tracing::debug;

use crate::command_recorder::CommandRecorder;
use crate::error::{RenderError, RenderResult};
use crate::render_target::gbuffer;
use crate::resource_cache::ResourceCache;
use crate::subpass::{FrameContext, Subpass, SubpassCore, expand_includes};
use crate::ubo::DeferredUniform;

pub const LIGHTING_VERT: &str = include_str!("../../shaders/lighting.vert");
pub const LIGHTING_FRAG: &str = include_str!("../../shaders/lighting.frag");

pub const DEFERRED_UNIFORM_BINDING: u32 = 6;
pub const DEFERRED_LIGHTS_BINDING: u32 = 7;
pub const GBUFFER_SAMPLER_BINDING: u32 = 8;

pub struct LightingSubpass {
    core: SubpassCore,
    sampler: Option<Arc<Sampler>>,
}

impl Default for LightingSubpass {
    fn default() -> Self {
        Self::new()
    }
}

impl LightingSubpass {
    /// Reads depth, albedo, normal, material, position and emissive (bindings
    /// 0 to 5) and writes the lit color to attachment 0.
    pub fn new() -> Self {
        let mut core = SubpassCore::new(
            ShaderSource::new("lighting.vert", LIGHTING_VERT),
            ShaderSource::new("lighting.frag", expand_includes(LIGHTING_FRAG)),
        );
        core.set_input_attachments(vec![
            gbuffer::DEPTH,
            gbuffer::ALBEDO,
            gbuffer::NORMAL,
            gbuffer::MATERIAL,
            gbuffer::POSITION,
            gbuffer::EMISSIVE,
        ]);
        core.set_output_attachments(vec![gbuffer::SWAPCHAIN]);
        core.set_disable_depth_stencil_attachment(true);
        core.set_debug_name("lighting");
        Self {
            core,
            sampler: None,
        }
    }

    fn sampler(&mut self, cache: &ResourceCache) -> RenderResult<Arc<Sampler>> {
        if let Some(sampler) = &self.sampler {
            return Ok(sampler.clone());
        }
        let sampler = Arc::new(Sampler::new(cache.device().clone(), &SamplerDesc::nearest_clamp())?);
        debug!("Created G-buffer sampler");
        Ok(self.sampler.insert(sampler).clone())
    }
}

impl Subpass for LightingSubpass {
    fn core(&self) -> &SubpassCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SubpassCore {
        &mut self.core
    }

    fn prepare(&mut self, cache: &ResourceCache) -> RenderResult<()> {
        self.core.prepare_shaders(cache)?;
        self.sampler(cache)?;
        Ok(())
    }

    fn draw(&mut self, recorder: &mut CommandRecorder, ctx: &FrameContext<'_>) -> RenderResult<()> {
        let cache = recorder.frame().cache().clone();
        let variant = ShaderVariant::new();
        let vertex = cache.request_shader_module(ShaderStage::Vertex, self.core.vertex_source(), &variant)?;
        let fragment =
            cache.request_shader_module(ShaderStage::Fragment, self.core.fragment_source(), &variant)?;
        let layout = cache.request_pipeline_layout(&[vertex, fragment])?;

        recorder.bind_pipeline_layout(layout);
        recorder.set_vertex_input_state(VertexInputState::default());
        recorder.set_rasterization_state(RasterizationState {
            cull_mode: CullMode::None,
            ..Default::default()
        });
        recorder.set_depth_stencil_state(DepthStencilState {
            depth_test_enable: false,
            depth_write_enable: false,
            ..Default::default()
        });

        for (binding, &attachment) in self.core.input_attachments().iter().enumerate() {
            let view = ctx.target.view(attachment).ok_or_else(|| {
                RenderError::InvalidState(format!(
                    "lighting reads attachment {attachment} but the target has {}",
                    ctx.target.views().len()
                ))
            })?;
            recorder.bind_input(view, 0, binding as u32, 0);
        }

        let scene = ctx.scene();
        let extent = ctx.target.extent();
        let uniform = DeferredUniform::new(
            scene.camera_view_proj(ctx.camera()),
            Vec2::new(extent.width as f32, extent.height as f32),
            scene.world_position(scene.camera_node(ctx.camera())),
        );
        let allocation = recorder.allocate_buffer(BufferUsage::Uniform, DeferredUniform::SIZE as u64)?;
        allocation.update_pod(&uniform)?;
        recorder.bind_allocation(&allocation, 0, DEFERRED_UNIFORM_BINDING, 0);

        self.core.lighting.collect(scene);
        let lights = self.core.lighting.allocate(recorder)?;
        recorder.bind_allocation(lights, 0, DEFERRED_LIGHTS_BINDING, 0);

        let sampler = self.sampler(&cache)?;
        recorder.bind_sampler(&sampler, 0, GBUFFER_SAMPLER_BINDING, 0);

        recorder.draw(3, 1, 0, 0)
    }
}
