//! A sequence of subpasses recorded as one render pass.

use ash::vk;
use lumen_rhi::render_pass::{LoadStoreInfo, SubpassInfo};
use tracing::debug;

use crate::command_recorder::CommandRecorder;
use crate::error::RenderResult;
use crate::render_target::RenderTarget;
use crate::resource_cache::ResourceCache;
use crate::subpass::{FrameContext, SceneView, Subpass};

const LABEL_COLOR: [f32; 4] = [0.3, 0.6, 0.9, 1.0];

fn color_clear() -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue {
            float32: [0.0, 0.0, 0.0, 1.0],
        },
    }
}

fn depth_clear() -> vk::ClearValue {
    vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: 0,
        },
    }
}

pub struct RenderPipeline {
    subpasses: Vec<Box<dyn Subpass>>,
    load_store: Vec<LoadStoreInfo>,
    clear_value: Vec<vk::ClearValue>,
    active_subpass_index: usize,
}

impl RenderPipeline {
    /// A pipeline whose first two attachments are a stored color image and a
    /// transient depth buffer.
    pub fn new(subpasses: Vec<Box<dyn Subpass>>) -> Self {
        Self {
            subpasses,
            load_store: vec![LoadStoreInfo::default(), LoadStoreInfo::transient()],
            clear_value: vec![color_clear(), depth_clear()],
            active_subpass_index: 0,
        }
    }

    /// Prepares every subpass.
    pub fn prepare(&mut self, cache: &ResourceCache) -> RenderResult<()> {
        for subpass in &mut self.subpasses {
            subpass.prepare(cache)?;
        }
        debug!("Prepared render pipeline with {} subpass(es)", self.subpasses.len());
        Ok(())
    }

    pub fn add_subpass(&mut self, subpass: Box<dyn Subpass>) {
        self.subpasses.push(subpass);
    }

    pub fn subpasses(&self) -> &[Box<dyn Subpass>] {
        &self.subpasses
    }

    pub fn subpasses_mut(&mut self) -> &mut [Box<dyn Subpass>] {
        &mut self.subpasses
    }

    pub fn load_store(&self) -> &[LoadStoreInfo] {
        &self.load_store
    }

    pub fn set_load_store(&mut self, load_store: Vec<LoadStoreInfo>) {
        self.load_store = load_store;
    }

    pub fn clear_value(&self) -> &[vk::ClearValue] {
        &self.clear_value
    }

    pub fn set_clear_value(&mut self, clear_value: Vec<vk::ClearValue>) {
        self.clear_value = clear_value;
    }

    /// Index of the subpass being recorded; 0 outside [`Self::draw`].
    pub fn active_subpass_index(&self) -> usize {
        self.active_subpass_index
    }

    /// Records every subpass into `recorder`.
    ///
    /// The first subpass begins the render pass and each later one advances
    /// to the next subpass. The render pass is left open so the caller can
    /// record more into the last subpass before ending it.
    pub fn draw(
        &mut self,
        recorder: &mut CommandRecorder,
        target: &mut RenderTarget,
        view: SceneView<'_>,
        contents: vk::SubpassContents,
    ) -> RenderResult<()> {
        self.pad_to(target);

        let infos: Vec<SubpassInfo> = self.subpasses.iter().map(|s| s.core().subpass_info()).collect();

        for (index, subpass) in self.subpasses.iter_mut().enumerate() {
            self.active_subpass_index = index;
            subpass.core().update_render_target_attachments(target);

            if index == 0 {
                recorder.begin_render_pass(target, &self.load_store, &self.clear_value, &infos, contents)?;
            } else {
                recorder.next_subpass(contents)?;
            }

            let label = match subpass.core().debug_name() {
                "" => format!("subpass {index}"),
                name => name.to_string(),
            };
            recorder.begin_label(&label, LABEL_COLOR);
            let ctx = FrameContext { view, target: &*target };
            let result = subpass.draw(recorder, &ctx);
            recorder.end_label();
            result?;
        }

        self.active_subpass_index = 0;
        Ok(())
    }

    fn pad_to(&mut self, target: &RenderTarget) {
        for attachment in target.attachments().iter().skip(self.clear_value.len()) {
            self.clear_value.push(if attachment.is_depth() {
                depth_clear()
            } else {
                color_clear()
            });
        }
        for attachment in target.attachments().iter().skip(self.load_store.len()) {
            self.load_store.push(if attachment.is_depth() {
                LoadStoreInfo::transient()
            } else {
                LoadStoreInfo::default()
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_load_store() {
        let pipeline = RenderPipeline::new(Vec::new());
        assert_eq!(pipeline.load_store().len(), 2);
        assert_eq!(pipeline.load_store()[0].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(pipeline.load_store()[1].store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(pipeline.active_subpass_index(), 0);
    }

    #[test]
    fn test_default_clear_values() {
        let pipeline = RenderPipeline::new(Vec::new());
        let clear = pipeline.clear_value();
        unsafe {
            assert_eq!(clear[0].color.float32, [0.0, 0.0, 0.0, 1.0]);
            assert_eq!(clear[1].depth_stencil.depth, 1.0);
        }
    }
}
