//! Per-frame dynamic buffer memory.
//!
//! A [`BufferPool`] owns a list of host-visible [`BufferBlock`]s of one
//! usage. Allocations are linear sub-ranges of a block; resetting the pool
//! rewinds every block without freeing it.

use std::sync::Arc;

use ash::vk;
use lumen_core::BufferAllocationStrategy;
use lumen_rhi::buffer::{Buffer, BufferUsage};
use lumen_rhi::device::Device;
use tracing::debug;

use crate::error::RenderResult;

/// Default block size for pooled frame memory.
pub const DEFAULT_BLOCK_SIZE: vk::DeviceSize = 256 * 1024;

/// Rounds `value` up to a multiple of `alignment`.
pub fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    let alignment = alignment.max(1);
    value.div_ceil(alignment) * alignment
}

/// Linear cursor over a block of `size` bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockCursor {
    size: vk::DeviceSize,
    alignment: vk::DeviceSize,
    offset: vk::DeviceSize,
}

impl BlockCursor {
    pub fn new(size: vk::DeviceSize, alignment: vk::DeviceSize) -> Self {
        Self {
            size,
            alignment: alignment.max(1),
            offset: 0,
        }
    }

    pub fn can_allocate(&self, size: vk::DeviceSize) -> bool {
        size > 0 && align_up(self.offset, self.alignment) + size <= self.size
    }

    /// Offset of a new `size`-byte range, or `None` if it does not fit.
    pub fn allocate(&mut self, size: vk::DeviceSize) -> Option<vk::DeviceSize> {
        if !self.can_allocate(size) {
            return None;
        }
        let offset = align_up(self.offset, self.alignment);
        self.offset = offset + size;
        Some(offset)
    }

    pub fn used(&self) -> vk::DeviceSize {
        self.offset
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

/// Index of the smallest unused block that holds `size` bytes.
fn best_free_block<'a>(
    cursors: impl IntoIterator<Item = &'a BlockCursor>,
    size: vk::DeviceSize,
) -> Option<usize> {
    cursors
        .into_iter()
        .enumerate()
        .filter(|(_, cursor)| cursor.used() == 0 && cursor.can_allocate(size))
        .min_by_key(|(_, cursor)| cursor.size())
        .map(|(index, _)| index)
}

/// A sub-range of a pooled buffer, valid until its frame is reset.
#[derive(Clone)]
pub struct BufferAllocation {
    buffer: Arc<Buffer>,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
}

impl BufferAllocation {
    pub fn new(buffer: Arc<Buffer>, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        Self {
            buffer,
            offset,
            size,
        }
    }

    /// Writes `data` at `offset` bytes into the allocation.
    pub fn update(&self, data: &[u8], offset: vk::DeviceSize) -> RenderResult<()> {
        if offset + data.len() as vk::DeviceSize > self.size {
            return Err(lumen_rhi::RhiError::InvalidArgument(format!(
                "write of {} bytes at {} exceeds allocation of {}",
                data.len(),
                offset,
                self.size
            ))
            .into());
        }
        self.buffer.update(data, self.offset + offset)?;
        Ok(())
    }

    pub fn update_pod<T: bytemuck::Pod>(&self, value: &T) -> RenderResult<()> {
        self.update(bytemuck::bytes_of(value), 0)
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// One host-visible buffer handed out linearly.
pub struct BufferBlock {
    buffer: Arc<Buffer>,
    cursor: BlockCursor,
}

impl BufferBlock {
    pub fn new(
        device: Arc<Device>,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RenderResult<Self> {
        let alignment = device.limits().buffer_alignment(usage);
        let buffer = Buffer::new(device, usage, size)?;
        Ok(Self {
            buffer: Arc::new(buffer),
            cursor: BlockCursor::new(size, alignment),
        })
    }

    pub fn can_allocate(&self, size: vk::DeviceSize) -> bool {
        self.cursor.can_allocate(size)
    }

    pub fn allocate(&mut self, size: vk::DeviceSize) -> Option<BufferAllocation> {
        let offset = self.cursor.allocate(size)?;
        Some(BufferAllocation::new(self.buffer.clone(), offset, size))
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.buffer.size()
    }

    pub fn reset(&mut self) {
        self.cursor.reset();
    }
}

/// Growing list of blocks of one usage.
pub struct BufferPool {
    device: Arc<Device>,
    usage: BufferUsage,
    block_size: vk::DeviceSize,
    blocks: Vec<BufferBlock>,
    active_block_index: usize,
}

impl BufferPool {
    pub fn new(device: Arc<Device>, usage: BufferUsage, block_size: vk::DeviceSize) -> Self {
        Self {
            device,
            usage,
            block_size: block_size.max(1),
            blocks: Vec::new(),
            active_block_index: 0,
        }
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Allocates `size` bytes.
    ///
    /// `MultipleAllocationsPerBuffer` walks forward through the blocks and
    /// adds a block of at least `block_size` bytes when none fits.
    /// `OneAllocationPerBuffer` gives every allocation a block of its own:
    /// the smallest unused block that holds it, or a new block sized to it.
    pub fn allocate(
        &mut self,
        size: vk::DeviceSize,
        strategy: BufferAllocationStrategy,
    ) -> RenderResult<BufferAllocation> {
        let minimal = strategy == BufferAllocationStrategy::OneAllocationPerBuffer;
        let size = size.max(1);

        if minimal {
            if let Some(index) = best_free_block(self.blocks.iter().map(|b| &b.cursor), size)
                && let Some(allocation) = self.blocks[index].allocate(size)
            {
                return Ok(allocation);
            }
        } else {
            while let Some(block) = self.blocks.get_mut(self.active_block_index) {
                if let Some(allocation) = block.allocate(size) {
                    return Ok(allocation);
                }
                self.active_block_index += 1;
            }
        }

        let block_size = if minimal { size } else { size.max(self.block_size) };
        debug!(
            "Adding {} byte {} block ({} in pool)",
            block_size,
            self.usage.name(),
            self.blocks.len() + 1
        );
        let mut block = BufferBlock::new(self.device.clone(), self.usage, block_size)?;
        let allocation = block.allocate(size).ok_or_else(|| {
            lumen_rhi::RhiError::InvalidArgument(format!("{size} bytes do not fit a fresh block"))
        })?;
        self.blocks.push(block);
        if !minimal {
            self.active_block_index = self.blocks.len() - 1;
        }
        Ok(allocation)
    }

    /// Rewinds every block; the memory is reused by the next frame.
    pub fn reset(&mut self) {
        for block in &mut self.blocks {
            block.reset();
        }
        self.active_block_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 16), 272);
        assert_eq!(align_up(5, 0), 5);
    }

    #[test]
    fn test_cursor_respects_alignment() {
        let mut cursor = BlockCursor::new(1024, 256);
        assert_eq!(cursor.allocate(100), Some(0));
        assert_eq!(cursor.allocate(100), Some(256));
        assert_eq!(cursor.allocate(16), Some(512));
        assert_eq!(cursor.used(), 528);
    }

    #[test]
    fn test_cursor_rejects_overflow_and_empty() {
        let mut cursor = BlockCursor::new(512, 256);
        assert_eq!(cursor.allocate(300), Some(0));
        assert!(!cursor.can_allocate(300));
        assert_eq!(cursor.allocate(300), None);
        assert_eq!(cursor.allocate(0), None);
        assert_eq!(cursor.allocate(256), Some(256));
    }

    #[test]
    fn test_cursor_reset_rewinds() {
        let mut cursor = BlockCursor::new(64, 16);
        cursor.allocate(64);
        assert!(!cursor.can_allocate(1));
        cursor.reset();
        assert_eq!(cursor.allocate(8), Some(0));
    }

    #[test]
    fn test_free_blocks_are_reused_in_any_order() {
        let mut cursors: Vec<BlockCursor> = [100, 200, 300]
            .into_iter()
            .map(|size| BlockCursor::new(size, 16))
            .collect();

        // Same sizes as the previous frame, requested largest first.
        for size in [300, 100, 200] {
            let index = best_free_block(&cursors, size).expect("a free block fits");
            assert_eq!(cursors[index].size(), size);
            assert_eq!(cursors[index].allocate(size), Some(0));
        }
        assert_eq!(best_free_block(&cursors, 1), None);
    }

    #[test]
    fn test_best_free_block_prefers_smallest_fit() {
        let mut cursors: Vec<BlockCursor> = [300, 100, 200]
            .into_iter()
            .map(|size| BlockCursor::new(size, 16))
            .collect();
        assert_eq!(best_free_block(&cursors, 150), Some(2));
        assert_eq!(best_free_block(&cursors, 50), Some(1));
        assert_eq!(best_free_block(&cursors, 301), None);

        // A partly used block is never shared.
        cursors[1].allocate(10);
        assert_eq!(best_free_block(&cursors, 50), Some(2));
    }

    #[test]
    fn test_vertex_alignment_is_sixteen_bytes() {
        let mut cursor = BlockCursor::new(256, lumen_rhi::device::DEFAULT_BUFFER_ALIGNMENT);
        assert_eq!(cursor.allocate(12), Some(0));
        assert_eq!(cursor.allocate(12), Some(16));
    }
}
