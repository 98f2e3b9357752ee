//! Pool-backed synchronization primitives.
//!
//! - [`FencePool`] hands out fences and waits on / resets all of them as a
//!   group. Render frames use one to know when their GPU work has retired.
//! - [`SemaphorePool`] hands out two kinds of semaphores. *Transient*
//!   semaphores are reused wholesale after [`SemaphorePool::reset`].
//!   *Owned* semaphores are handed to the caller, who returns them with
//!   [`SemaphorePool::release_owned_semaphore`]; they re-enter circulation at
//!   the next reset.
//!
//! Both pools keep the raw `ash::Device` function table rather than an
//! `Arc<Device>`, which lets the logical device own a fence pool itself.
//! Dropping a pool destroys its handles without waiting; owners wait for
//! the GPU first.
//!
//! # Example
//!
//! ```no_run
//! use lumen_rhi::sync::{FencePool, SemaphorePool};
//!
//! # fn example(device: &lumen_rhi::device::Device) -> lumen_rhi::RhiResult<()> {
//! let mut fences = FencePool::new(device.handle().clone());
//! let mut semaphores = SemaphorePool::new(device.handle().clone());
//!
//! let acquired = semaphores.request_semaphore_with_ownership()?;
//! let rendered = semaphores.request_semaphore()?;
//! let fence = fences.request_fence()?;
//! // ... submit work waiting on `acquired`, signalling `rendered` and `fence` ...
//! semaphores.release_owned_semaphore(acquired);
//!
//! fences.wait(u64::MAX)?;
//! fences.reset()?;
//! semaphores.reset();
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;

/// Bookkeeping shared by the fence and semaphore pools.
///
/// Handles below `active` are in use; handles at or above it are free for
/// the next request. Released owned handles wait in `released` until the
/// next reset.
#[derive(Debug)]
pub(crate) struct RecyclingPool<H> {
    handles: Vec<H>,
    active: usize,
    released: Vec<H>,
    outstanding_owned: usize,
}

impl<H: Copy + PartialEq> RecyclingPool<H> {
    pub(crate) fn new() -> Self {
        Self {
            handles: Vec::new(),
            active: 0,
            released: Vec::new(),
            outstanding_owned: 0,
        }
    }

    /// Next reusable handle, or `create`'s result pushed into the pool.
    pub(crate) fn request(&mut self, create: impl FnOnce() -> RhiResult<H>) -> RhiResult<H> {
        if self.active < self.handles.len() {
            let handle = self.handles[self.active];
            self.active += 1;
            return Ok(handle);
        }
        let handle = create()?;
        self.handles.push(handle);
        self.active += 1;
        Ok(handle)
    }

    /// Hands out a handle the pool forgets about until it is released.
    pub(crate) fn request_owned(
        &mut self,
        create: impl FnOnce() -> RhiResult<H>,
    ) -> RhiResult<H> {
        let handle = if self.active < self.handles.len() {
            // Swap the free slot out of the reusable range.
            self.handles.swap_remove(self.active)
        } else {
            create()?
        };
        self.outstanding_owned += 1;
        Ok(handle)
    }

    pub(crate) fn release_owned(&mut self, handle: H) {
        debug_assert!(!self.released.contains(&handle), "double release");
        self.outstanding_owned = self.outstanding_owned.saturating_sub(1);
        self.released.push(handle);
    }

    pub(crate) fn active(&self) -> &[H] {
        &self.handles[..self.active]
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active
    }

    pub(crate) fn outstanding_owned(&self) -> usize {
        self.outstanding_owned
    }

    /// Marks everything reusable and folds released handles back in.
    pub(crate) fn reset(&mut self) {
        self.active = 0;
        self.handles.append(&mut self.released);
    }

    /// Every handle the pool still knows about.
    pub(crate) fn drain_all(&mut self) -> Vec<H> {
        self.active = 0;
        let mut all = std::mem::take(&mut self.handles);
        all.append(&mut self.released);
        all
    }
}

/// A group of fences waited on and reset together.
pub struct FencePool {
    device: ash::Device,
    pool: RecyclingPool<vk::Fence>,
}

impl FencePool {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            pool: RecyclingPool::new(),
        }
    }

    /// Returns an unsignaled fence, reusing one from a previous reset if possible.
    ///
    /// # Errors
    ///
    /// Returns an error if a new fence has to be created and creation fails.
    pub fn request_fence(&mut self) -> RhiResult<vk::Fence> {
        let device = &self.device;
        self.pool.request(|| {
            let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None)? };
            debug!("Created pooled fence");
            Ok(fence)
        })
    }

    /// Waits for every fence handed out since the last reset.
    ///
    /// Returns `Ok` immediately when no fence is active.
    ///
    /// # Errors
    ///
    /// Returns the raw Vulkan result on timeout or device loss, so callers
    /// can decide whether the failure is fatal.
    pub fn wait(&self, timeout: u64) -> Result<(), vk::Result> {
        let active = self.pool.active();
        if active.is_empty() {
            return Ok(());
        }
        unsafe { self.device.wait_for_fences(active, true, timeout) }
    }

    /// Resets every active fence and makes all of them reusable.
    ///
    /// # Errors
    ///
    /// Returns an error if `vkResetFences` fails.
    pub fn reset(&mut self) -> RhiResult<()> {
        let active = self.pool.active();
        if !active.is_empty() {
            unsafe { self.device.reset_fences(active)? };
        }
        self.pool.reset();
        Ok(())
    }

    /// Number of fences handed out since the last reset.
    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }
}

impl Drop for FencePool {
    fn drop(&mut self) {
        let fences = self.pool.drain_all();
        if fences.is_empty() {
            return;
        }
        for fence in &fences {
            unsafe { self.device.destroy_fence(*fence, None) };
        }
        debug!("Destroyed {} pooled fence(s)", fences.len());
    }
}

/// Binary semaphores recycled per render frame.
pub struct SemaphorePool {
    device: ash::Device,
    pool: RecyclingPool<vk::Semaphore>,
}

impl SemaphorePool {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            pool: RecyclingPool::new(),
        }
    }

    fn create(device: &ash::Device) -> RhiResult<vk::Semaphore> {
        let semaphore =
            unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
        debug!("Created pooled semaphore");
        Ok(semaphore)
    }

    /// Transient semaphore, valid until the next [`SemaphorePool::reset`].
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn request_semaphore(&mut self) -> RhiResult<vk::Semaphore> {
        let device = &self.device;
        self.pool.request(|| Self::create(device))
    }

    /// Semaphore whose lifetime the caller manages.
    ///
    /// It must be handed back with [`SemaphorePool::release_owned_semaphore`]
    /// once no queue operation references it any more.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn request_semaphore_with_ownership(&mut self) -> RhiResult<vk::Semaphore> {
        let device = &self.device;
        self.pool.request_owned(|| Self::create(device))
    }

    /// Returns an owned semaphore; it is recycled at the next reset.
    pub fn release_owned_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.pool.release_owned(semaphore);
    }

    /// Makes every transient and released semaphore available again.
    pub fn reset(&mut self) {
        self.pool.reset();
    }

    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }

    /// Owned semaphores handed out and not yet released.
    pub fn outstanding_owned(&self) -> usize {
        self.pool.outstanding_owned()
    }
}

impl Drop for SemaphorePool {
    fn drop(&mut self) {
        let semaphores = self.pool.drain_all();
        for semaphore in &semaphores {
            unsafe { self.device.destroy_semaphore(*semaphore, None) };
        }
        if !semaphores.is_empty() {
            debug!("Destroyed {} pooled semaphore(s)", semaphores.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> impl FnMut() -> RhiResult<u64> {
        let mut next = 0;
        move || {
            next += 1;
            Ok(next)
        }
    }

    #[test]
    fn test_reset_reuses_transient_handles() {
        let mut pool = RecyclingPool::new();
        let mut create = counter();
        let a = pool.request(&mut create).unwrap();
        let b = pool.request(&mut create).unwrap();
        assert_eq!(pool.active(), &[a, b]);

        pool.reset();
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.request(&mut create).unwrap(), a);
        assert_eq!(pool.request(&mut create).unwrap(), b);
        assert_eq!(pool.request(&mut create).unwrap(), 3);
    }

    #[test]
    fn test_owned_handle_not_reused_until_released_and_reset() {
        let mut pool = RecyclingPool::new();
        let mut create = counter();
        let owned = pool.request_owned(&mut create).unwrap();
        assert_eq!(pool.outstanding_owned(), 1);

        let transient = pool.request(&mut create).unwrap();
        assert_ne!(owned, transient);

        pool.release_owned(owned);
        assert_eq!(pool.outstanding_owned(), 0);
        // Released handles wait for the reset.
        assert_ne!(pool.request(&mut create).unwrap(), owned);

        pool.reset();
        let recycled: Vec<u64> = (0..3).map(|_| pool.request(&mut create).unwrap()).collect();
        assert!(recycled.contains(&owned));
    }

    #[test]
    fn test_owned_request_takes_free_slot() {
        let mut pool = RecyclingPool::new();
        let mut create = counter();
        let first = pool.request(&mut create).unwrap();
        pool.reset();

        let owned = pool.request_owned(&mut create).unwrap();
        assert_eq!(owned, first);
        // The slot left the reusable range, so the next transient is new.
        assert_ne!(pool.request(&mut create).unwrap(), first);
    }

    #[test]
    fn test_every_handle_accounted_for() {
        let mut pool = RecyclingPool::new();
        let mut create = counter();
        let owned = pool.request_owned(&mut create).unwrap();
        pool.request(&mut create).unwrap();
        pool.release_owned(owned);
        let all = pool.drain_all();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&owned));
    }

    #[test]
    fn test_failed_creation_does_not_count() {
        let mut pool: RecyclingPool<u64> = RecyclingPool::new();
        let result = pool.request(|| Err(crate::RhiError::NoSuitableGpu));
        assert!(result.is_err());
        assert_eq!(pool.active_count(), 0);
    }
}
