//! Bump-allocated device-local geometry arenas.
//!
//! Vertex and index data live in two large device-local buffers sized at
//! startup. Uploads append at a monotonically increasing cursor; nothing
//! is ever freed individually, the whole arena is torn down at shutdown.

use ash::vk;
use slither_gpu::command::{execute_one_shot, CommandPool};
use slither_gpu::error::{GpuError, Result};
use slither_gpu::Buffer;

/// Cursor state of a bump arena, separated out so the allocation policy
/// is testable without a device.
#[derive(Debug, Clone, Copy)]
pub struct ArenaCursor {
    head: u64,
    capacity: u64,
}

impl ArenaCursor {
    pub fn new(capacity: u64) -> Self {
        Self { head: 0, capacity }
    }

    /// Reserve `size` bytes, returning the offset at which they start.
    pub fn reserve(&mut self, size: u64) -> Result<u64> {
        let remaining = self.capacity - self.head;
        if size > remaining {
            return Err(GpuError::ArenaOverflow {
                requested: size,
                remaining,
            });
        }
        let offset = self.head;
        self.head += size;
        Ok(offset)
    }

    pub fn used(&self) -> u64 {
        self.head
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

/// A device-local buffer filled front to back by staged uploads.
pub struct ArenaBuffer {
    buffer: Buffer,
    cursor: ArenaCursor,
}

impl ArenaBuffer {
    /// Create a device-local arena of `capacity` bytes.
    ///
    /// `usage` is combined with `TRANSFER_DST` so staged copies can land
    /// in it. `queue_families` lists the families that will touch the
    /// buffer (transfer for the copy, graphics for drawing).
    ///
    /// # Safety
    /// The device must be valid and `memory_properties` must describe its
    /// physical device.
    pub unsafe fn new(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        usage: vk::BufferUsageFlags,
        capacity: u64,
        queue_families: &[u32],
    ) -> Result<Self> {
        let buffer = Buffer::new_shared(
            device,
            memory_properties,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            capacity,
            queue_families,
        )?;

        Ok(Self {
            buffer,
            cursor: ArenaCursor::new(capacity),
        })
    }

    /// Upload `data` into the arena via a staging buffer and a blocking
    /// one-shot copy on the transfer queue. Returns the byte offset the
    /// data starts at, for use as a vertex-buffer or index-buffer base.
    ///
    /// # Safety
    /// The device, pool and queue must be valid; the pool must belong to
    /// the queue's family.
    pub unsafe fn upload(
        &mut self,
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        transfer_pool: &CommandPool,
        transfer_queue: vk::Queue,
        data: &[u8],
    ) -> Result<u64> {
        let offset = self.cursor.reserve(data.len() as u64)?;

        let mut staging = Buffer::new_staging(device, memory_properties, data)?;

        let copy = execute_one_shot(device, transfer_pool, transfer_queue, |cmd| {
            let region = vk::BufferCopy::default()
                .src_offset(0)
                .dst_offset(offset)
                .size(data.len() as u64);
            device.cmd_copy_buffer(cmd, staging.buffer, self.buffer.buffer, &[region]);
        });

        staging.destroy(device);
        copy?;

        Ok(offset)
    }

    /// Raw buffer handle for binding.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.buffer
    }

    /// Bytes currently in use.
    pub fn used(&self) -> u64 {
        self.cursor.used()
    }

    /// Destroy the arena buffer.
    ///
    /// # Safety
    /// The buffer must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.buffer.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_offsets_are_monotonic() {
        let mut cursor = ArenaCursor::new(1024);
        assert_eq!(cursor.reserve(100).unwrap(), 0);
        assert_eq!(cursor.reserve(200).unwrap(), 100);
        assert_eq!(cursor.reserve(24).unwrap(), 300);
        assert_eq!(cursor.used(), 324);
    }

    #[test]
    fn cursor_allows_exact_fill() {
        let mut cursor = ArenaCursor::new(64);
        assert_eq!(cursor.reserve(64).unwrap(), 0);
        assert_eq!(cursor.used(), cursor.capacity());
    }

    #[test]
    fn cursor_rejects_overflow() {
        let mut cursor = ArenaCursor::new(256);
        cursor.reserve(200).unwrap();

        let result = cursor.reserve(100);
        assert!(matches!(
            result,
            Err(GpuError::ArenaOverflow {
                requested: 100,
                remaining: 56,
            })
        ));
        // A failed reservation must not move the cursor
        assert_eq!(cursor.used(), 200);
    }

    #[test]
    fn cursor_zero_size_reservation_is_free() {
        let mut cursor = ArenaCursor::new(16);
        assert_eq!(cursor.reserve(0).unwrap(), 0);
        assert_eq!(cursor.used(), 0);
    }
}
