//! GPU buffers backed by `gpu-allocator`.
//!
//! - [`BufferUsage`] names the roles the runtime allocates buffers for and
//!   maps each to Vulkan usage flags and a memory location.
//! - [`BufferDesc`] is the full creation contract: size, usage flags,
//!   memory location, sharing queue families and a debug name.
//! - [`Buffer`] owns the `VkBuffer` and its allocation. Host-visible
//!   allocations stay persistently mapped; [`Buffer::update`] writes through
//!   the mapping and flushes when the memory is not host-coherent.
//!
//! Device-local data goes through [`Buffer::new_device_local`], which stages
//! the bytes in a host-visible buffer and copies them on a one-shot command
//! buffer (see [`Device::execute_one_shot`]).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_rhi::buffer::{Buffer, BufferUsage};
//! use lumen_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> lumen_rhi::RhiResult<()> {
//! let positions: [f32; 9] = [-1.0, -1.0, 0.0, 3.0, -1.0, 0.0, -1.0, 3.0, 0.0];
//! let vertex_buffer =
//!     Buffer::new_device_local(device, BufferUsage::Vertex, bytemuck::cast_slice(&positions))?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Role a buffer is created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
    Storage,
    UniformTexel,
    StorageTexel,
    Indirect,
    /// Host-visible upload source
    Staging,
    /// Host-visible copy destination for reading results back
    Readback,
}

impl BufferUsage {
    /// Usages a render frame keeps dynamic buffer pools for.
    pub const FRAME_POOLED: [BufferUsage; 4] = [
        BufferUsage::Uniform,
        BufferUsage::Storage,
        BufferUsage::Vertex,
        BufferUsage::Index,
    ];

    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => {
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::UniformTexel => vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER,
            BufferUsage::StorageTexel => vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER,
            BufferUsage::Indirect => {
                vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Memory location for buffers written by the host every frame.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Readback => MemoryLocation::GpuToCpu,
            _ => MemoryLocation::CpuToGpu,
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::UniformTexel => "uniform texel",
            BufferUsage::StorageTexel => "storage texel",
            BufferUsage::Indirect => "indirect",
            BufferUsage::Staging => "staging",
            BufferUsage::Readback => "readback",
        }
    }
}

/// Buffer creation parameters.
#[derive(Clone, Debug)]
pub struct BufferDesc<'a> {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    /// Queue families sharing the buffer; empty or one entry means exclusive
    pub queue_families: &'a [u32],
    pub name: &'a str,
}

impl BufferDesc<'static> {
    /// Host-visible buffer for the given role.
    pub fn for_usage(usage: BufferUsage, size: vk::DeviceSize) -> Self {
        Self {
            size,
            usage: usage.to_vk_usage(),
            location: usage.memory_location(),
            queue_families: &[],
            name: usage.name(),
        }
    }
}

/// Memory facts recorded once the allocation is bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryBinding {
    pub memory: vk::DeviceMemory,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub coherent: bool,
    pub persistently_mapped: bool,
}

impl MemoryBinding {
    fn post_create(allocation: &Allocation) -> Self {
        Self {
            memory: unsafe { allocation.memory() },
            offset: allocation.offset(),
            size: allocation.size(),
            coherent: allocation
                .memory_properties()
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT),
            persistently_mapped: allocation.mapped_ptr().is_some(),
        }
    }
}

/// GPU buffer with allocator-managed memory.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    binding: MemoryBinding,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    name: String,
}

impl Buffer {
    /// Creates a buffer from a full description.
    ///
    /// # Errors
    ///
    /// Returns an error if `desc.size` is zero, or if buffer creation,
    /// allocation or binding fails.
    pub fn with_desc(device: Arc<Device>, desc: &BufferDesc<'_>) -> RhiResult<Self> {
        if desc.size == 0 {
            return Err(RhiError::InvalidArgument(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let mut buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage);
        buffer_info = if desc.queue_families.len() > 1 {
            buffer_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(desc.queue_families)
        } else {
            buffer_info.sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
            name: desc.name,
            requirements,
            location: desc.location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let binding = MemoryBinding::post_create(&allocation);
        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, binding.memory, binding.offset)?;
        }

        debug!("Created {} buffer: {} bytes", desc.name, desc.size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            binding,
            size: desc.size,
            usage: desc.usage,
            name: desc.name.to_string(),
        })
    }

    /// Creates a host-visible buffer for the given role.
    ///
    /// # Errors
    ///
    /// See [`Buffer::with_desc`].
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        Self::with_desc(device, &BufferDesc::for_usage(usage, size))
    }

    /// Creates a host-visible buffer and writes `data` into it.
    ///
    /// # Errors
    ///
    /// See [`Buffer::with_desc`] and [`Buffer::update`].
    pub fn new_with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.update(data, 0)?;
        Ok(buffer)
    }

    /// Creates a device-local buffer initialised through a staging copy.
    ///
    /// # Errors
    ///
    /// Returns an error if either buffer cannot be created or the one-shot
    /// copy fails.
    pub fn new_device_local(
        device: Arc<Device>,
        usage: BufferUsage,
        data: &[u8],
    ) -> RhiResult<Self> {
        let staging = Self::new_with_data(device.clone(), BufferUsage::Staging, data)?;
        let buffer = Self::with_desc(
            device.clone(),
            &BufferDesc {
                size: data.len() as vk::DeviceSize,
                usage: usage.to_vk_usage() | vk::BufferUsageFlags::TRANSFER_DST,
                location: MemoryLocation::GpuOnly,
                queue_families: &[],
                name: usage.name(),
            },
        )?;

        let region = vk::BufferCopy::default().size(data.len() as vk::DeviceSize);
        device.execute_one_shot(|dev, cmd| unsafe {
            dev.cmd_copy_buffer(cmd, staging.handle(), buffer.handle(), &[region]);
        })?;

        Ok(buffer)
    }

    /// Mapped bytes of the whole buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the memory is not host-visible.
    pub fn map(&mut self) -> RhiResult<&mut [u8]> {
        let size = self.size as usize;
        self.allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .map(|slice| &mut slice[..size])
            .ok_or_else(|| RhiError::InvalidArgument(format!("{} buffer is not mapped", self.name)))
    }

    /// Host-visible allocations stay mapped for their whole lifetime, so this
    /// only flushes pending writes on non-coherent memory.
    ///
    /// # Errors
    ///
    /// See [`Buffer::flush`].
    pub fn unmap(&mut self) -> RhiResult<()> {
        self.flush(0, self.size)
    }

    /// Makes host writes in `[offset, offset + size)` visible to the device.
    ///
    /// A no-op on host-coherent memory.
    ///
    /// # Errors
    ///
    /// Returns an error if `vkFlushMappedMemoryRanges` fails.
    pub fn flush(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> RhiResult<()> {
        if self.binding.coherent || size == 0 {
            return Ok(());
        }
        let (flush_offset, flush_size) = flush_range(
            self.binding.offset,
            self.binding.size,
            offset,
            size,
            self.device.limits().non_coherent_atom_size,
        );
        let range = vk::MappedMemoryRange::default()
            .memory(self.binding.memory)
            .offset(flush_offset)
            .size(flush_size);
        unsafe { self.device.handle().flush_mapped_memory_ranges(&[range])? };
        Ok(())
    }

    /// Copies `data` into the buffer at `offset`, flushing if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write is out of bounds, the memory is not
    /// host-visible, or the flush fails.
    pub fn update(&self, data: &[u8], offset: vk::DeviceSize) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidArgument(format!(
                "Write exceeds {} buffer: offset {} + data {} > size {}",
                self.name,
                offset,
                data.len(),
                self.size
            )));
        }

        let mapped_ptr = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .ok_or_else(|| RhiError::InvalidArgument(format!("{} buffer is not mapped", self.name)))?;

        unsafe {
            let dst = mapped_ptr.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        self.flush(offset, data.len() as vk::DeviceSize)
    }

    /// Writes a plain-old-data value at `offset`.
    ///
    /// # Errors
    ///
    /// See [`Buffer::update`].
    pub fn update_pod<T: bytemuck::Pod>(&self, value: &T, offset: vk::DeviceSize) -> RhiResult<()> {
        self.update(bytemuck::bytes_of(value), offset)
    }

    /// Copies `len` bytes starting at `offset` out of a mapped buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is out of bounds or the buffer is not
    /// host-visible.
    pub fn read(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        let end = offset + len as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidArgument(format!(
                "Read exceeds {} buffer size {}",
                self.name, self.size
            )));
        }
        let slice = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .ok_or_else(|| RhiError::InvalidArgument(format!("{} buffer is not mapped", self.name)))?;
        Ok(slice[offset as usize..end as usize].to_vec())
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    #[inline]
    pub fn is_coherent(&self) -> bool {
        self.binding.coherent
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.binding.persistently_mapped
    }

    #[inline]
    pub fn memory_binding(&self) -> &MemoryBinding {
        &self.binding
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.name)
            .field("handle", &self.buffer)
            .field("size", &self.size)
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.device.allocator().lock().free(allocation)
        {
            error!("Failed to free {} buffer allocation: {:?}", self.name, e);
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.name);
    }
}

/// Expands a flush request to `nonCoherentAtomSize` boundaries.
///
/// Offsets are relative to the buffer; the result is relative to the memory
/// object. When rounding up would cross the end of the allocation the size
/// becomes `VK_WHOLE_SIZE`.
pub fn flush_range(
    allocation_offset: vk::DeviceSize,
    allocation_size: vk::DeviceSize,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    atom: vk::DeviceSize,
) -> (vk::DeviceSize, vk::DeviceSize) {
    let atom = atom.max(1);
    let start = allocation_offset + offset;
    let aligned_start = start - start % atom;
    let end = start + size;
    let aligned_end = end.div_ceil(atom) * atom;
    if aligned_end > allocation_offset + allocation_size {
        (aligned_start, vk::WHOLE_SIZE)
    } else {
        (aligned_start, aligned_end - aligned_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert!(
            BufferUsage::Indirect
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDIRECT_BUFFER)
        );
        assert_eq!(
            BufferUsage::Readback.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_DST
        );
    }

    #[test]
    fn test_readback_lives_in_host_readable_memory() {
        assert_eq!(
            BufferUsage::Readback.memory_location(),
            MemoryLocation::GpuToCpu
        );
        for usage in BufferUsage::FRAME_POOLED {
            assert_eq!(usage.memory_location(), MemoryLocation::CpuToGpu);
        }
    }

    #[test]
    fn test_flush_range_rounds_to_atoms() {
        // allocation at 1024, 4096 bytes; write 10 bytes at 70 with 64-byte atoms
        assert_eq!(flush_range(1024, 4096, 70, 10, 64), (1088, 64));
        // straddling an atom boundary
        assert_eq!(flush_range(0, 4096, 60, 10, 64), (0, 128));
    }

    #[test]
    fn test_flush_range_past_allocation_end_uses_whole_size() {
        assert_eq!(flush_range(0, 100, 90, 10, 64), (64, vk::WHOLE_SIZE));
    }

    #[test]
    fn test_desc_for_usage() {
        let desc = BufferDesc::for_usage(BufferUsage::Uniform, 256);
        assert_eq!(desc.size, 256);
        assert_eq!(desc.name, "uniform");
        assert!(desc.queue_families.is_empty());
    }
}
