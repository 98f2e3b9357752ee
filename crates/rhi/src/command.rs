//! Command pools with per-frame recycling.
//!
//! A [`CommandPool`] belongs to one queue family and one recording thread.
//! Command buffers handed out by [`CommandPool::request_command_buffer`] are
//! recycled on [`CommandPool::reset`] according to the pool's
//! [`CommandBufferResetMode`].

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// How the command buffers of a pool are reclaimed between frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CommandBufferResetMode {
    /// Reset the whole pool at once and reuse the buffers.
    #[default]
    ResetPool,
    /// Reset each buffer before it is handed out again.
    ResetIndividually,
    /// Free every buffer on reset and allocate fresh ones.
    AlwaysAllocate,
}

impl CommandBufferResetMode {
    pub fn pool_flags(self) -> vk::CommandPoolCreateFlags {
        match self {
            CommandBufferResetMode::ResetIndividually => {
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
            }
            CommandBufferResetMode::ResetPool | CommandBufferResetMode::AlwaysAllocate => {
                vk::CommandPoolCreateFlags::TRANSIENT
            }
        }
    }
}

/// Handed-out buffers of one level.
#[derive(Default)]
struct LevelBuffers {
    buffers: Vec<vk::CommandBuffer>,
    active: usize,
}

/// Vulkan command pool wrapper.
///
/// Command pools are not thread-safe; each recording thread owns its pool.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
    thread_index: usize,
    reset_mode: CommandBufferResetMode,
    primary: LevelBuffers,
    secondary: LevelBuffers,
}

impl CommandPool {
    pub fn new(
        device: Arc<Device>,
        queue_family_index: u32,
        thread_index: usize,
        reset_mode: CommandBufferResetMode,
    ) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(reset_mode.pool_flags());

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        debug!(
            "Command pool created for queue family {} (thread {}, {:?})",
            queue_family_index, thread_index, reset_mode
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
            thread_index,
            reset_mode,
            primary: LevelBuffers::default(),
            secondary: LevelBuffers::default(),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    pub fn reset_mode(&self) -> CommandBufferResetMode {
        self.reset_mode
    }

    /// Number of buffers of `level` handed out since the last reset.
    pub fn active_count(&self, level: vk::CommandBufferLevel) -> usize {
        if level == vk::CommandBufferLevel::SECONDARY {
            self.secondary.active
        } else {
            self.primary.active
        }
    }

    /// Returns a command buffer in the initial state.
    ///
    /// Buffers left over from previous frames are reused before new ones
    /// are allocated.
    pub fn request_command_buffer(
        &mut self,
        level: vk::CommandBufferLevel,
    ) -> RhiResult<vk::CommandBuffer> {
        let reset_mode = self.reset_mode;
        let pool = self.pool;
        let device = self.device.clone();
        let buffers = if level == vk::CommandBufferLevel::SECONDARY {
            &mut self.secondary
        } else {
            &mut self.primary
        };

        if let Some(&buffer) = buffers.buffers.get(buffers.active) {
            if reset_mode == CommandBufferResetMode::ResetIndividually {
                unsafe {
                    device
                        .handle()
                        .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())?;
                }
            }
            buffers.active += 1;
            return Ok(buffer);
        }

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(level)
            .command_buffer_count(1);
        let buffer = unsafe { device.handle().allocate_command_buffers(&alloc_info)?[0] };
        buffers.buffers.push(buffer);
        buffers.active += 1;
        Ok(buffer)
    }

    /// Makes every buffer of the pool available again.
    ///
    /// The caller guarantees none of them is still executing.
    pub fn reset(&mut self) -> RhiResult<()> {
        match self.reset_mode {
            CommandBufferResetMode::ResetPool => unsafe {
                self.device
                    .handle()
                    .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
            },
            // Buffers are reset lazily when handed out again.
            CommandBufferResetMode::ResetIndividually => {}
            CommandBufferResetMode::AlwaysAllocate => {
                self.free_all();
            }
        }
        self.primary.active = 0;
        self.secondary.active = 0;
        Ok(())
    }

    fn free_all(&mut self) {
        for level in [&mut self.primary, &mut self.secondary] {
            if !level.buffers.is_empty() {
                unsafe {
                    self.device
                        .handle()
                        .free_command_buffers(self.pool, &level.buffers);
                }
                level.buffers.clear();
            }
        }
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!(
            "Command pool destroyed for queue family {} (thread {})",
            self.queue_family_index, self.thread_index
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_flags_follow_reset_mode() {
        assert!(
            CommandBufferResetMode::ResetIndividually
                .pool_flags()
                .contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        );
        assert!(
            !CommandBufferResetMode::ResetPool
                .pool_flags()
                .contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        );
        assert_eq!(
            CommandBufferResetMode::AlwaysAllocate.pool_flags(),
            vk::CommandPoolCreateFlags::TRANSIENT
        );
    }
}
