//! Frame buffer pools on a real device. Every test skips when Vulkan is
//! unavailable.

mod common;

use lumen_core::BufferAllocationStrategy;
use lumen_renderer::buffer_pool::BufferPool;
use lumen_rhi::buffer::BufferUsage;

use common::gpu;

#[test]
fn test_shared_blocks_align_offsets() {
    let Some(gpu) = gpu() else { return };
    let alignment = gpu.device.limits().buffer_alignment(BufferUsage::Uniform);
    let mut pool = BufferPool::new(gpu.device.clone(), BufferUsage::Uniform, 64 * 1024);

    let mut previous_end = 0;
    for size in [100, 36, 256, 1] {
        let allocation = pool
            .allocate(size, BufferAllocationStrategy::MultipleAllocationsPerBuffer)
            .expect("allocate");
        assert_eq!(allocation.offset() % alignment, 0);
        assert!(allocation.offset() >= previous_end);
        assert_eq!(allocation.size(), size);
        previous_end = allocation.offset() + size;
    }
    assert_eq!(pool.block_count(), 1);

    let allocation = pool
        .allocate(16, BufferAllocationStrategy::MultipleAllocationsPerBuffer)
        .expect("allocate");
    allocation.update(&[7u8; 16], 0).expect("write within the allocation");
    assert!(allocation.update(&[7u8; 17], 0).is_err());
}

#[test]
fn test_shared_blocks_grow_then_rewind() {
    let Some(gpu) = gpu() else { return };
    let mut pool = BufferPool::new(gpu.device.clone(), BufferUsage::Vertex, 1024);
    let strategy = BufferAllocationStrategy::MultipleAllocationsPerBuffer;

    let first = pool.allocate(800, strategy).expect("allocate");
    let second = pool.allocate(800, strategy).expect("allocate");
    assert_eq!(pool.block_count(), 2);
    assert!(!std::sync::Arc::ptr_eq(first.buffer(), second.buffer()));

    // Larger than a block: gets a block of its own size.
    let large = pool.allocate(4096, strategy).expect("allocate");
    assert_eq!(large.offset(), 0);
    assert_eq!(pool.block_count(), 3);

    pool.reset();
    let reused = pool.allocate(800, strategy).expect("allocate");
    assert_eq!(reused.offset(), 0);
    assert!(std::sync::Arc::ptr_eq(reused.buffer(), first.buffer()));
    assert_eq!(pool.block_count(), 3);
}

#[test]
fn test_one_allocation_per_buffer() {
    let Some(gpu) = gpu() else { return };
    let mut pool = BufferPool::new(gpu.device.clone(), BufferUsage::Uniform, 64 * 1024);
    let strategy = BufferAllocationStrategy::OneAllocationPerBuffer;

    let a = pool.allocate(64, strategy).expect("allocate");
    let b = pool.allocate(64, strategy).expect("allocate");
    assert_eq!(a.offset(), 0);
    assert_eq!(b.offset(), 0);
    assert!(!std::sync::Arc::ptr_eq(a.buffer(), b.buffer()));
    assert_eq!(a.buffer().size(), 64);
    assert_eq!(pool.block_count(), 2);
}

#[test]
fn test_one_allocation_per_buffer_reuses_blocks_across_frames() {
    let Some(gpu) = gpu() else { return };
    let mut pool = BufferPool::new(gpu.device.clone(), BufferUsage::Uniform, 64 * 1024);
    let strategy = BufferAllocationStrategy::OneAllocationPerBuffer;

    for size in [64, 128, 256] {
        pool.allocate(size, strategy).expect("allocate");
    }
    assert_eq!(pool.block_count(), 3);

    // The next frames ask for the same sizes in other orders.
    for order in [[256, 128, 64], [128, 256, 64], [64, 64, 64]] {
        pool.reset();
        for size in order {
            let allocation = pool.allocate(size, strategy).expect("allocate");
            assert_eq!(allocation.offset(), 0);
            assert!(allocation.buffer().size() >= size);
        }
        assert_eq!(pool.block_count(), 3);
    }
}
