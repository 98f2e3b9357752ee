//! Forward shading: geometry traversal with every light evaluated per
//! fragment.

use lumen_rhi::shader::ShaderSource;

use crate::command_recorder::CommandRecorder;
use crate::error::RenderResult;
use crate::subpass::{FrameContext, Subpass, SubpassCore, expand_includes};
use crate::subpasses::geometry::{GEOMETRY_VERT, draw_scene};

pub const FORWARD_FRAG: &str = include_str!("../../shaders/forward.frag");

/// Binding of the forward lights uniform in set 0.
pub const FORWARD_LIGHTS_BINDING: u32 = 4;

pub struct ForwardSubpass {
    core: SubpassCore,
}

impl Default for ForwardSubpass {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwardSubpass {
    pub fn new() -> Self {
        let mut core = SubpassCore::new(
            ShaderSource::new("geometry.vert", GEOMETRY_VERT),
            ShaderSource::new("forward.frag", expand_includes(FORWARD_FRAG)),
        );
        core.set_debug_name("forward");
        Self { core }
    }
}

impl Subpass for ForwardSubpass {
    fn core(&self) -> &SubpassCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SubpassCore {
        &mut self.core
    }

    fn draw(&mut self, recorder: &mut CommandRecorder, ctx: &FrameContext<'_>) -> RenderResult<()> {
        self.core.lighting.collect(ctx.scene());
        let lights = self.core.lighting.allocate(recorder)?;
        recorder.bind_allocation(lights, 0, FORWARD_LIGHTS_BINDING, 0);

        draw_scene(&self.core, recorder, ctx)
    }
}
