//! The subpass abstraction a [`RenderPipeline`](crate::RenderPipeline) is
//! built from.

use ash::vk;
use lumen_rhi::render_pass::SubpassInfo;
use lumen_rhi::shader::{ShaderSource, ShaderStage, ShaderVariant};
use lumen_scene::{CameraId, Scene};

use crate::command_recorder::CommandRecorder;
use crate::error::RenderResult;
use crate::lighting::LightingState;
use crate::render_target::RenderTarget;
use crate::resource_cache::ResourceCache;

/// What a frame renders: a scene seen through one of its cameras.
#[derive(Clone, Copy)]
pub struct SceneView<'a> {
    pub scene: &'a Scene,
    pub camera: CameraId,
}

impl<'a> SceneView<'a> {
    pub fn new(scene: &'a Scene, camera: CameraId) -> Self {
        Self { scene, camera }
    }
}

/// Everything a subpass sees while drawing.
pub struct FrameContext<'a> {
    pub view: SceneView<'a>,
    pub target: &'a RenderTarget,
}

impl<'a> FrameContext<'a> {
    pub fn scene(&self) -> &'a Scene {
        self.view.scene
    }

    pub fn camera(&self) -> CameraId {
        self.view.camera
    }
}

/// Replaces `#include "lighting.glsl"` with the shared lighting functions.
pub fn expand_includes(source: &str) -> String {
    source.replace(
        "#include \"lighting.glsl\"",
        include_str!("../shaders/lighting.glsl"),
    )
}

/// State every subpass shares: shaders, attachment use and lighting.
pub struct SubpassCore {
    vertex_source: ShaderSource,
    fragment_source: ShaderSource,
    input_attachments: Vec<u32>,
    output_attachments: Vec<u32>,
    color_resolve_attachments: Vec<u32>,
    disable_depth_stencil_attachment: bool,
    depth_stencil_resolve_attachment: Option<u32>,
    depth_stencil_resolve_mode: vk::ResolveModeFlags,
    sample_count: vk::SampleCountFlags,
    debug_name: String,
    pub lighting: LightingState,
}

impl SubpassCore {
    /// Writes to attachment 0 with the depth attachment enabled.
    pub fn new(vertex_source: ShaderSource, fragment_source: ShaderSource) -> Self {
        Self {
            vertex_source,
            fragment_source,
            input_attachments: Vec::new(),
            output_attachments: vec![0],
            color_resolve_attachments: Vec::new(),
            disable_depth_stencil_attachment: false,
            depth_stencil_resolve_attachment: None,
            depth_stencil_resolve_mode: vk::ResolveModeFlags::NONE,
            sample_count: vk::SampleCountFlags::TYPE_1,
            debug_name: String::new(),
            lighting: LightingState::new(),
        }
    }

    pub fn vertex_source(&self) -> &ShaderSource {
        &self.vertex_source
    }

    pub fn fragment_source(&self) -> &ShaderSource {
        &self.fragment_source
    }

    pub fn input_attachments(&self) -> &[u32] {
        &self.input_attachments
    }

    pub fn set_input_attachments(&mut self, inputs: Vec<u32>) {
        self.input_attachments = inputs;
    }

    pub fn output_attachments(&self) -> &[u32] {
        &self.output_attachments
    }

    pub fn set_output_attachments(&mut self, outputs: Vec<u32>) {
        self.output_attachments = outputs;
    }

    pub fn set_color_resolve_attachments(&mut self, resolves: Vec<u32>) {
        self.color_resolve_attachments = resolves;
    }

    pub fn set_disable_depth_stencil_attachment(&mut self, disable: bool) {
        self.disable_depth_stencil_attachment = disable;
    }

    pub fn set_depth_stencil_resolve(&mut self, attachment: Option<u32>, mode: vk::ResolveModeFlags) {
        self.depth_stencil_resolve_attachment = attachment;
        self.depth_stencil_resolve_mode = mode;
    }

    pub fn sample_count(&self) -> vk::SampleCountFlags {
        self.sample_count
    }

    pub fn set_sample_count(&mut self, sample_count: vk::SampleCountFlags) {
        self.sample_count = sample_count;
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn set_debug_name(&mut self, name: impl Into<String>) {
        self.debug_name = name.into();
    }

    /// Render pass description of this subpass.
    pub fn subpass_info(&self) -> SubpassInfo {
        SubpassInfo {
            input_attachments: self.input_attachments.clone(),
            output_attachments: self.output_attachments.clone(),
            color_resolve_attachments: self.color_resolve_attachments.clone(),
            disable_depth_stencil_attachment: self.disable_depth_stencil_attachment,
            depth_stencil_resolve_attachment: self.depth_stencil_resolve_attachment,
            depth_stencil_resolve_mode: self.depth_stencil_resolve_mode,
            debug_name: self.debug_name.clone(),
        }
    }

    /// Points the target's input and output lists at this subpass's
    /// attachments.
    pub fn update_render_target_attachments(&self, target: &mut RenderTarget) {
        target.set_input_attachments(self.input_attachments.clone());
        target.set_output_attachments(self.output_attachments.clone());
    }

    /// Compiles both stages with the default variant so the first frame does
    /// not pay for it.
    pub fn prepare_shaders(&self, cache: &ResourceCache) -> RenderResult<()> {
        let variant = ShaderVariant::new();
        cache.request_shader_module(ShaderStage::Vertex, &self.vertex_source, &variant)?;
        cache.request_shader_module(ShaderStage::Fragment, &self.fragment_source, &variant)?;
        Ok(())
    }
}

/// One subpass of a render pipeline.
pub trait Subpass {
    fn core(&self) -> &SubpassCore;

    fn core_mut(&mut self) -> &mut SubpassCore;

    /// Called once before the first draw.
    fn prepare(&mut self, cache: &ResourceCache) -> RenderResult<()> {
        self.core().prepare_shaders(cache)
    }

    /// Records this subpass. The render pass is already at this subpass.
    fn draw(&mut self, recorder: &mut CommandRecorder, ctx: &FrameContext<'_>) -> RenderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> SubpassCore {
        SubpassCore::new(
            ShaderSource::new("test.vert", "#version 450\nvoid main() {}"),
            ShaderSource::new("test.frag", "#version 450\nvoid main() {}"),
        )
    }

    #[test]
    fn test_default_subpass_info() {
        let info = core().subpass_info();
        assert_eq!(info, SubpassInfo::default());
    }

    #[test]
    fn test_subpass_info_carries_attachments() {
        let mut core = core();
        core.set_input_attachments(vec![1, 2]);
        core.set_output_attachments(vec![0]);
        core.set_disable_depth_stencil_attachment(true);
        core.set_debug_name("lighting");

        let info = core.subpass_info();
        assert_eq!(info.input_attachments, vec![1, 2]);
        assert!(info.disable_depth_stencil_attachment);
        assert_eq!(info.debug_name, "lighting");
    }

    #[test]
    fn test_expand_includes() {
        let source = "#version 450\n#include \"lighting.glsl\"\nvoid main() {}";
        let expanded = expand_includes(source);
        assert!(!expanded.contains("#include"));
        assert!(expanded.contains("struct LightData"));
        assert!(expanded.starts_with("#version 450"));
    }
}
