//! Swapchain ownership and the per-frame acquire/submit/present loop.
//!
//! A [`RenderContext`] keeps one [`RenderFrame`] per swapchain image and
//! walks each of them through:
//!
//! ```text
//! reclaimable --begin_frame--> acquired --begin--> recording
//!      ^                                               |
//!      +------ reset() <-- submitted <---- submit -----+
//! ```
//!
//! `begin_frame` borrows an acquire semaphore from the previous frame's
//! pool; `submit` waits on it, signals a render semaphore and a fence from
//! the active frame, then presents. Out-of-date and suboptimal surfaces are
//! recovered here and never reach the caller. Swapchain updates requested
//! while a frame is recording wait for the next `begin_frame`, so that frame
//! completes against its current target.
//!
//! Without a surface the context runs headless: one frame around an
//! offscreen color image, no acquire and no present.

use std::sync::Arc;

use ash::vk;
use lumen_core::{PresentModePreference, RendererConfig};
use lumen_rhi::command::CommandBufferResetMode;
use lumen_rhi::device::Device;
use lumen_rhi::image::{Image, ImageDesc};
use lumen_rhi::swapchain::{
    DEFAULT_PRESENT_MODE_PRIORITY, DEFAULT_SURFACE_FORMAT_PRIORITY, Swapchain, SwapchainDesc,
};
use tracing::{debug, error, info, warn};

use crate::command_recorder::CommandRecorder;
use crate::error::{RenderError, RenderResult};
use crate::render_frame::{FrameConfig, RenderFrame};
use crate::render_target::RenderTarget;
use crate::resource_cache::ResourceCache;

/// Format of the offscreen color image in headless mode.
pub const DEFAULT_HEADLESS_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Default acquire timeout, in nanoseconds (5 s).
pub const DEFAULT_ACQUIRE_TIMEOUT: u64 = 5_000_000_000;

/// Builds the render target of a frame around its color image.
pub type CreateTargetFn = Box<dyn Fn(Image) -> RenderResult<RenderTarget> + Send + Sync>;

/// What the render context asks of the swapchain and its frames.
#[derive(Debug, Clone)]
pub struct RenderContextDesc {
    /// Requested extent; the surface's current extent wins when defined.
    pub extent: vk::Extent2D,
    pub present_mode_priority: Vec<vk::PresentModeKHR>,
    pub surface_format_priority: Vec<vk::SurfaceFormatKHR>,
    pub headless_format: vk::Format,
    pub image_usage: vk::ImageUsageFlags,
    /// Requested swapchain image count; `0` lets the surface decide.
    pub image_count: u32,
    /// Acquire timeout in nanoseconds.
    pub acquire_timeout: u64,
    pub frame_config: FrameConfig,
}

impl RenderContextDesc {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            present_mode_priority: DEFAULT_PRESENT_MODE_PRIORITY.to_vec(),
            surface_format_priority: DEFAULT_SURFACE_FORMAT_PRIORITY.to_vec(),
            headless_format: DEFAULT_HEADLESS_FORMAT,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            image_count: 0,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            frame_config: FrameConfig::default(),
        }
    }

    pub fn from_config(config: &RendererConfig, extent: vk::Extent2D) -> Self {
        let mut desc = Self::new(extent);
        if !config.present_modes.is_empty() {
            desc.present_mode_priority = config.present_modes.iter().map(|m| present_mode(*m)).collect();
        }
        desc.acquire_timeout = config.acquire_timeout_ms.saturating_mul(1_000_000);
        desc.frame_config = FrameConfig::from(config);
        desc
    }

    fn swapchain_desc(&self) -> SwapchainDesc {
        SwapchainDesc {
            extent: self.extent,
            image_count: self.image_count,
            transform: None,
            image_usage: self.image_usage,
            present_mode_priority: self.present_mode_priority.clone(),
            surface_format_priority: self.surface_format_priority.clone(),
        }
    }
}

fn present_mode(preference: PresentModePreference) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

/// Outcome of [`RenderContext::begin_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame is active and ready to record.
    Ready,
    /// No image could be acquired in time; try again next iteration.
    Skipped,
}

fn is_surface_change(result: &Result<(u32, bool), vk::Result>) -> bool {
    matches!(result, Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR))
}

/// Whether an acquire that still fails after surface recovery skips the
/// frame instead of reaching the caller.
fn skips_frame(error: vk::Result) -> bool {
    matches!(
        error,
        vk::Result::TIMEOUT
            | vk::Result::NOT_READY
            | vk::Result::SUBOPTIMAL_KHR
            | vk::Result::ERROR_OUT_OF_DATE_KHR
    )
}

/// Frame that lent the acquire semaphore, clamped to the frames that exist.
fn lending_frame(active_frame_index: usize, frame_count: usize) -> usize {
    active_frame_index.min(frame_count.saturating_sub(1))
}

/// `owner` if it still exists among `frame_count` frames. A dropped frame
/// destroyed its semaphores with its pool.
fn surviving_frame(owner: usize, frame_count: usize) -> Option<usize> {
    (owner < frame_count).then_some(owner)
}

pub struct RenderContext {
    device: Arc<Device>,
    cache: Arc<ResourceCache>,
    frames: Vec<RenderFrame>,
    swapchain: Option<Swapchain>,
    desc: RenderContextDesc,
    surface_extent: vk::Extent2D,
    create_target: Option<CreateTargetFn>,
    thread_count: usize,
    active_frame_index: usize,
    frame_active: bool,
    acquired_semaphore: Option<vk::Semaphore>,
    surface_check_pending: bool,
    /// Swapchain update requested while a frame was active.
    pending_swapchain: Option<SwapchainDesc>,
}

impl RenderContext {
    /// Creates the context, with a swapchain when `surface` is given.
    ///
    /// # Errors
    ///
    /// Returns an error if `surface` is set without a surface loader, or if
    /// the swapchain cannot be created.
    pub fn new(
        device: Arc<Device>,
        cache: Arc<ResourceCache>,
        surface: Option<vk::SurfaceKHR>,
        surface_loader: Option<&ash::khr::surface::Instance>,
        desc: RenderContextDesc,
    ) -> RenderResult<Self> {
        let swapchain = match (surface, surface_loader) {
            (Some(surface), Some(loader)) => {
                Some(Swapchain::new(device.clone(), loader, surface, &desc.swapchain_desc())?)
            }
            (Some(_), None) => {
                return Err(RenderError::InvalidState(
                    "a surface needs the surface extension loader".to_string(),
                ));
            }
            (None, _) => {
                info!(
                    "Render context is headless: {}x{} {:?}",
                    desc.extent.width, desc.extent.height, desc.headless_format
                );
                None
            }
        };
        let surface_extent = swapchain.as_ref().map_or(desc.extent, Swapchain::extent);

        Ok(Self {
            device,
            cache,
            frames: Vec::new(),
            swapchain,
            desc,
            surface_extent,
            create_target: None,
            thread_count: 1,
            active_frame_index: 0,
            frame_active: false,
            acquired_semaphore: None,
            surface_check_pending: false,
            pending_swapchain: None,
        })
    }

    /// Builds one render frame per swapchain image, or a single one when
    /// headless. Must run once before [`Self::begin`].
    pub fn prepare(
        &mut self,
        thread_count: usize,
        create_target: impl Fn(Image) -> RenderResult<RenderTarget> + Send + Sync + 'static,
    ) -> RenderResult<()> {
        self.device.wait_idle()?;
        self.thread_count = thread_count.max(1);
        self.create_target = Some(Box::new(create_target));
        self.frames.clear();
        self.active_frame_index = 0;
        self.rebuild_frames()?;
        info!(
            "Prepared {} render frame(s) with {} recording thread(s)",
            self.frames.len(),
            self.thread_count
        );
        Ok(())
    }

    /// Begins a frame and hands out a primary recorder for the graphics
    /// queue. `None` when no image was available in time.
    pub fn begin(&mut self, reset_mode: CommandBufferResetMode) -> RenderResult<Option<CommandRecorder>> {
        if self.begin_frame()? == FrameStatus::Skipped {
            return Ok(None);
        }
        let recorder = self.active_frame()?.request_command_buffer(
            self.device.graphics_family(),
            reset_mode,
            vk::CommandBufferLevel::PRIMARY,
            0,
        )?;
        Ok(Some(recorder))
    }

    /// Acquires the next swapchain image and resets its frame.
    ///
    /// # Errors
    ///
    /// [`RenderError::Acquire`] for acquire failures other than a timeout or
    /// a surface change, [`RenderError::InvalidState`] if a frame is already
    /// active or the context was never prepared.
    pub fn begin_frame(&mut self) -> RenderResult<FrameStatus> {
        if self.frame_active {
            return Err(RenderError::InvalidState("a frame is already active".to_string()));
        }
        if self.frames.is_empty() {
            return Err(RenderError::InvalidState(
                "render context was not prepared".to_string(),
            ));
        }
        if let Some(desc) = self.pending_swapchain.take() {
            self.rebuild_swapchain(desc)?;
        }
        if std::mem::take(&mut self.surface_check_pending) {
            self.handle_surface_changes(false)?;
        }

        if self.swapchain.is_none() {
            self.active_frame_index = 0;
            self.frames[0].reset()?;
            self.frame_active = true;
            return Ok(FrameStatus::Ready);
        }

        let mut previous = lending_frame(self.active_frame_index, self.frames.len());
        let mut semaphore = self.frames[previous].request_semaphore_with_ownership()?;
        let mut result = self.acquire(semaphore);

        if is_surface_change(&result) {
            let out_of_date = result == Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
            if self.handle_surface_changes(out_of_date)? {
                self.release_semaphore(previous, semaphore);
                if self.frames.is_empty() {
                    return Err(RenderError::InvalidState(
                        "swapchain rebuilt without images".to_string(),
                    ));
                }
                previous = lending_frame(self.active_frame_index, self.frames.len());
                semaphore = self.frames[previous].request_semaphore_with_ownership()?;
                result = self.acquire(semaphore);
            }
        }

        match result {
            Ok((image_index, suboptimal)) => {
                let index = image_index as usize;
                if index >= self.frames.len() {
                    self.release_semaphore(previous, semaphore);
                    return Err(RenderError::InvalidState(format!(
                        "acquired image {index} but only {} frame(s) exist",
                        self.frames.len()
                    )));
                }
                if suboptimal {
                    self.surface_check_pending = true;
                }
                self.active_frame_index = index;
                self.acquired_semaphore = Some(semaphore);
                self.frames[index].reset()?;
                self.frame_active = true;
                Ok(FrameStatus::Ready)
            }
            Err(e) => {
                self.release_semaphore(previous, semaphore);
                if let Some(frame) = self.frames.get_mut(previous) {
                    frame.reset()?;
                }
                if skips_frame(e) {
                    debug!("Acquire returned {:?}, skipping frame", e);
                    return Ok(FrameStatus::Skipped);
                }
                Err(RenderError::Acquire(e))
            }
        }
    }

    /// Returns an acquire semaphore to the pool of frame `owner`, unless a
    /// swapchain rebuild dropped that frame.
    fn release_semaphore(&self, owner: usize, semaphore: vk::Semaphore) {
        match surviving_frame(owner, self.frames.len()) {
            Some(owner) => self.frames[owner].release_owned_semaphore(semaphore),
            None => debug!("Frame {} dropped with its acquire semaphore", owner),
        }
    }

    fn acquire(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        match &self.swapchain {
            Some(swapchain) => swapchain.acquire_next_image(semaphore, self.desc.acquire_timeout),
            None => Err(vk::Result::ERROR_SURFACE_LOST_KHR),
        }
    }

    /// Submits `recorders` on the graphics queue and presents the frame.
    ///
    /// # Errors
    ///
    /// [`RenderError::InvalidState`] outside an active frame, or the
    /// submit/present failure.
    pub fn submit(&mut self, recorders: &[&CommandRecorder]) -> RenderResult<()> {
        if !self.frame_active {
            return Err(RenderError::InvalidState("submit without an active frame".to_string()));
        }
        let handles: Vec<vk::CommandBuffer> = recorders.iter().map(|r| r.handle()).collect();
        let frame = &self.frames[self.active_frame_index];

        if self.swapchain.is_none() {
            let fence = frame.request_fence();
            let result = fence.and_then(|fence| {
                let submit = vk::SubmitInfo::default().command_buffers(&handles);
                unsafe { self.device.submit(&[submit], fence) }.map_err(RenderError::from)
            });
            self.frame_active = false;
            return result;
        }

        let submitted = self.submit_to_queue(frame, &handles);

        if let Some(acquired) = self.acquired_semaphore.take() {
            frame.release_owned_semaphore(acquired);
        }

        match submitted {
            Ok(render_semaphore) => self.end_frame(render_semaphore),
            Err(e) => {
                self.frame_active = false;
                Err(e)
            }
        }
    }

    /// Waits on the acquire semaphore and signals a render semaphore and a
    /// fence of `frame`.
    fn submit_to_queue(
        &self,
        frame: &RenderFrame,
        handles: &[vk::CommandBuffer],
    ) -> RenderResult<vk::Semaphore> {
        let render_semaphore = frame.request_semaphore()?;
        let fence = frame.request_fence()?;
        let wait_semaphores: Vec<vk::Semaphore> = self.acquired_semaphore.into_iter().collect();
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphores.len()];
        let signal_semaphores = [render_semaphore];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(handles)
            .signal_semaphores(&signal_semaphores);
        unsafe { self.device.submit(&[submit], fence)? };
        Ok(render_semaphore)
    }

    /// Presents the active frame once `render_semaphore` is signalled.
    ///
    /// A suboptimal or out-of-date swapchain schedules a surface check
    /// before the next acquire.
    pub fn end_frame(&mut self, render_semaphore: vk::Semaphore) -> RenderResult<()> {
        self.frame_active = false;
        let Some(swapchain) = &self.swapchain else {
            return Ok(());
        };
        match swapchain.present(self.active_frame_index as u32, render_semaphore) {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Present reported a surface change");
                self.surface_check_pending = true;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Waits for the active frame's work and rewinds its pools.
    pub fn wait_frame(&mut self) -> RenderResult<()> {
        let index = self.active_frame_index;
        match self.frames.get_mut(index) {
            Some(frame) => frame.reset(),
            None => Err(RenderError::InvalidState(
                "render context was not prepared".to_string(),
            )),
        }
    }

    /// Rebuilds the swapchain if the surface extent changed (or `force`).
    ///
    /// Returns whether a rebuild happened. An undefined or zero extent, as
    /// reported for minimised windows, never triggers one. While a frame is
    /// active the check moves to the next [`Self::begin_frame`].
    pub fn handle_surface_changes(&mut self, force: bool) -> RenderResult<bool> {
        let Some(swapchain) = &self.swapchain else {
            return Ok(false);
        };
        if self.frame_active {
            self.surface_check_pending = true;
            return Ok(false);
        }
        let capabilities = swapchain.surface_capabilities()?;
        let extent = capabilities.current_extent;
        if extent.width == u32::MAX || extent.width == 0 || extent.height == 0 {
            return Ok(false);
        }
        if extent != self.surface_extent || force {
            self.update_swapchain_extent(extent)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn update_swapchain_extent(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.update_swapchain(|desc| desc.extent = extent)
    }

    pub fn update_swapchain_image_count(&mut self, image_count: u32) -> RenderResult<()> {
        self.update_swapchain(|desc| desc.image_count = image_count)
    }

    pub fn update_swapchain_usage(&mut self, usage: vk::ImageUsageFlags) -> RenderResult<()> {
        self.update_swapchain(|desc| desc.image_usage = usage)
    }

    pub fn update_swapchain_extent_transform(
        &mut self,
        extent: vk::Extent2D,
        transform: vk::SurfaceTransformFlagsKHR,
    ) -> RenderResult<()> {
        let Some(swapchain) = self.swapchain.as_ref() else {
            return self.update_swapchain_extent(extent);
        };
        let mut desc = self
            .pending_swapchain
            .clone()
            .unwrap_or_else(|| swapchain.desc().clone());
        desc.extent = extent;
        desc.transform = Some(transform);
        self.request_rebuild(desc)
    }

    /// Rebuilds the swapchain and every frame's target at the current extent.
    pub fn recreate(&mut self) -> RenderResult<()> {
        let extent = self.surface_extent;
        self.update_swapchain_extent(extent)
    }

    fn update_swapchain(&mut self, apply: impl FnOnce(&mut RenderContextDesc)) -> RenderResult<()> {
        apply(&mut self.desc);
        let transform = match &self.pending_swapchain {
            Some(pending) => pending.transform,
            None => self.swapchain.as_ref().and_then(|s| s.desc().transform),
        };
        let desc = SwapchainDesc {
            transform,
            ..self.desc.swapchain_desc()
        };
        self.request_rebuild(desc)
    }

    /// Rebuilds now, or at the next [`Self::begin_frame`] while a frame is
    /// recording against the current targets.
    fn request_rebuild(&mut self, desc: SwapchainDesc) -> RenderResult<()> {
        if self.frame_active {
            debug!(
                "Swapchain update to {}x{} deferred until the active frame is submitted",
                desc.extent.width, desc.extent.height
            );
            self.pending_swapchain = Some(desc);
            return Ok(());
        }
        self.rebuild_swapchain(desc)
    }

    fn rebuild_swapchain(&mut self, desc: SwapchainDesc) -> RenderResult<()> {
        self.device.wait_idle()?;
        self.cache.clear_framebuffers();
        self.pending_swapchain = None;

        match self.swapchain.take() {
            Some(old) => {
                let rebuilt = match old.rebuild(&desc) {
                    Ok(rebuilt) => rebuilt,
                    Err(e) => {
                        self.swapchain = Some(old);
                        return Err(e.into());
                    }
                };
                drop(old);
                self.surface_extent = rebuilt.extent();
                self.desc.extent = rebuilt.extent();
                self.swapchain = Some(rebuilt);
            }
            None => {
                self.surface_extent = desc.extent;
                self.desc.extent = desc.extent;
            }
        }

        self.rebuild_frames()
    }

    /// Hands every frame a fresh target, appending or dropping frames to
    /// match the image count.
    fn rebuild_frames(&mut self) -> RenderResult<()> {
        let Some(create_target) = &self.create_target else {
            return Ok(());
        };
        let images = self.target_images()?;
        let count = images.len();

        for (index, image) in images.into_iter().enumerate() {
            let target = create_target(image)?;
            match self.frames.get_mut(index) {
                Some(frame) => frame.update_render_target(target),
                None => self.frames.push(RenderFrame::new(
                    self.device.clone(),
                    self.cache.clone(),
                    target,
                    self.thread_count,
                    self.desc.frame_config,
                )),
            }
        }
        if self.frames.len() > count {
            warn!("Swapchain shrank to {} image(s), dropping frames", count);
            self.frames.truncate(count);
        }
        if self.active_frame_index >= count {
            self.active_frame_index = 0;
        }
        debug!(
            "Render targets rebuilt at {}x{}",
            self.surface_extent.width, self.surface_extent.height
        );
        Ok(())
    }

    fn target_images(&self) -> RenderResult<Vec<Image>> {
        match &self.swapchain {
            Some(swapchain) => Ok(swapchain
                .images()
                .iter()
                .map(|&image| {
                    Image::from_swapchain(
                        self.device.clone(),
                        image,
                        swapchain.extent(),
                        swapchain.format(),
                        swapchain.image_usage(),
                    )
                })
                .collect()),
            None => {
                let desc = ImageDesc::new_2d(self.surface_extent, self.desc.headless_format, self.desc.image_usage)
                    .with_name("headless color");
                Ok(vec![Image::new(self.device.clone(), &desc)?])
            }
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// The frame between [`Self::begin_frame`] and [`Self::submit`].
    pub fn active_frame(&self) -> RenderResult<&RenderFrame> {
        if !self.frame_active {
            return Err(RenderError::InvalidState("no frame is active".to_string()));
        }
        Ok(&self.frames[self.active_frame_index])
    }

    pub fn active_frame_mut(&mut self) -> RenderResult<&mut RenderFrame> {
        if !self.frame_active {
            return Err(RenderError::InvalidState("no frame is active".to_string()));
        }
        Ok(&mut self.frames[self.active_frame_index])
    }

    pub fn active_frame_index(&self) -> usize {
        self.active_frame_index
    }

    pub fn is_frame_active(&self) -> bool {
        self.frame_active
    }

    /// The most recently submitted frame.
    pub fn last_rendered_frame(&self) -> RenderResult<&RenderFrame> {
        if self.frame_active {
            return Err(RenderError::InvalidState(
                "the last frame has not been submitted".to_string(),
            ));
        }
        self.frames
            .get(self.active_frame_index)
            .ok_or_else(|| RenderError::InvalidState("render context was not prepared".to_string()))
    }

    pub fn has_swapchain(&self) -> bool {
        self.swapchain.is_some()
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    pub fn surface_extent(&self) -> vk::Extent2D {
        self.surface_extent
    }

    pub fn format(&self) -> vk::Format {
        self.swapchain
            .as_ref()
            .map_or(self.desc.headless_format, Swapchain::format)
    }

    pub fn render_frames(&self) -> &[RenderFrame] {
        &self.frames
    }

    pub fn desc(&self) -> &RenderContextDesc {
        &self.desc
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Device wait before render context teardown failed: {}", e);
        }
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desc_defaults() {
        let desc = RenderContextDesc::new(vk::Extent2D { width: 800, height: 600 });
        assert_eq!(desc.acquire_timeout, 5_000_000_000);
        assert_eq!(desc.headless_format, vk::Format::R8G8B8A8_SRGB);
        assert_eq!(desc.present_mode_priority[0], vk::PresentModeKHR::FIFO);
        assert!(desc.image_usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }

    #[test]
    fn test_desc_from_config() {
        let config = RendererConfig {
            present_modes: vec![PresentModePreference::Mailbox, PresentModePreference::Fifo],
            acquire_timeout_ms: 5,
            ..Default::default()
        };
        let desc = RenderContextDesc::from_config(&config, vk::Extent2D { width: 1, height: 1 });
        assert_eq!(
            desc.present_mode_priority,
            vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO]
        );
        assert_eq!(desc.acquire_timeout, 5_000_000);
    }

    #[test]
    fn test_surface_change_classification() {
        assert!(is_surface_change(&Ok((0, true))));
        assert!(is_surface_change(&Err(vk::Result::ERROR_OUT_OF_DATE_KHR)));
        assert!(!is_surface_change(&Ok((1, false))));
        assert!(!is_surface_change(&Err(vk::Result::TIMEOUT)));
    }

    #[test]
    fn test_repeated_surface_failures_skip_the_frame() {
        assert!(skips_frame(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert!(skips_frame(vk::Result::SUBOPTIMAL_KHR));
        assert!(skips_frame(vk::Result::TIMEOUT));
        assert!(skips_frame(vk::Result::NOT_READY));
        assert!(!skips_frame(vk::Result::ERROR_DEVICE_LOST));
        assert!(!skips_frame(vk::Result::ERROR_SURFACE_LOST_KHR));
        assert!(!skips_frame(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
    }

    #[test]
    fn test_semaphore_owner_after_shrink() {
        // Frame 2 lent the semaphore, then the swapchain shrank to two images.
        let owner = lending_frame(2, 3);
        assert_eq!(owner, 2);
        assert_eq!(surviving_frame(owner, 3), Some(2));
        assert_eq!(surviving_frame(owner, 2), None);
        // The retry borrows from a frame that still exists.
        assert_eq!(lending_frame(2, 2), 1);
        assert_eq!(lending_frame(0, 2), 0);
    }
}
