//! Buffer primitive: a handle paired with its backing device memory.

use crate::error::{GpuError, Result};
use ash::vk;

/// Alignment used by the dynamic-uniform-buffer path. Per-object offsets
/// into a shared uniform buffer must respect the device's minimum offset
/// alignment, which this renderer requires to be 256.
pub const DYNAMIC_UNIFORM_ALIGNMENT: u64 = 256;

/// Find the first memory type whose property flags are a superset of the
/// requested ones. First match wins; no scoring.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32> {
    for i in 0..memory_properties.memory_type_count {
        let type_supported = (type_bits & (1 << i)) != 0;
        let flags_supported = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(flags);

        if type_supported && flags_supported {
            return Ok(i);
        }
    }

    // No fallback memory pool exists; the caller treats this as fatal
    Err(GpuError::NoCompatibleMemoryType { type_bits, flags })
}

/// A buffer with its bound device memory.
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
    mapped: Option<*mut u8>,
    coherent: bool,
}

impl Buffer {
    /// Create a buffer: handle, memory requirements, first-match memory
    /// type, allocate, bind at offset 0.
    ///
    /// # Safety
    /// The device must be valid and `memory_properties` must describe its
    /// physical device.
    pub unsafe fn new(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        size: u64,
    ) -> Result<Self> {
        Self::with_size(device, memory_properties, usage, properties, size, size, &[])
    }

    /// Create a buffer shared between queue families. Falls back to
    /// exclusive sharing when fewer than two distinct families are given.
    ///
    /// # Safety
    /// Same as [`Buffer::new`].
    pub unsafe fn new_shared(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        size: u64,
        queue_families: &[u32],
    ) -> Result<Self> {
        Self::with_size(
            device,
            memory_properties,
            usage,
            properties,
            size,
            size,
            queue_families,
        )
    }

    /// Create a buffer for the dynamic-uniform path: the requested size is
    /// rounded up to the next 256-byte boundary and the driver-reported
    /// alignment is asserted to be exactly 256.
    ///
    /// # Safety
    /// Same as [`Buffer::new`].
    pub unsafe fn new_dynamic_uniform(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        size: u64,
    ) -> Result<Self> {
        let aligned = align_up(size, DYNAMIC_UNIFORM_ALIGNMENT);
        Self::with_size(
            device,
            memory_properties,
            usage,
            properties,
            size,
            aligned,
            &[],
        )
    }

    #[allow(clippy::too_many_arguments)]
    unsafe fn with_size(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        requested: u64,
        size: u64,
        queue_families: &[u32],
    ) -> Result<Self> {
        let sharing_mode = if queue_families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(queue_families);

        let buffer = device.create_buffer(&buffer_info, None)?;

        let requirements = device.get_buffer_memory_requirements(buffer);
        if size != requested {
            assert_eq!(
                requirements.alignment, DYNAMIC_UNIFORM_ALIGNMENT,
                "dynamic uniform buffers require 256-byte alignment"
            );
        }

        let memory_type = match find_memory_type(
            memory_properties,
            requirements.memory_type_bits,
            properties,
        ) {
            Ok(index) => index,
            Err(e) => {
                device.destroy_buffer(buffer, None);
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = match device.allocate_memory(&alloc_info, None) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_buffer(buffer, None);
                return Err(e.into());
            }
        };

        device.bind_buffer_memory(buffer, memory, 0)?;

        Ok(Self {
            buffer,
            memory,
            size,
            mapped: None,
            coherent: properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT),
        })
    }

    /// Create a host-visible staging buffer prefilled with `data`.
    ///
    /// # Safety
    /// Same as [`Buffer::new`].
    pub unsafe fn new_staging(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        data: &[u8],
    ) -> Result<Self> {
        let mut buffer = Self::new(
            device,
            memory_properties,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            data.len() as u64,
        )?;

        let ptr = buffer.map(device)?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
        buffer.unmap(device);

        Ok(buffer)
    }

    /// Map the whole buffer for CPU access.
    ///
    /// # Safety
    /// The memory must be host-visible.
    pub unsafe fn map(&mut self, device: &ash::Device) -> Result<*mut u8> {
        if let Some(ptr) = self.mapped {
            return Ok(ptr);
        }
        let ptr = device.map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?;
        let ptr = ptr.cast::<u8>();
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    /// Unmap the buffer.
    ///
    /// # Safety
    /// The buffer must be mapped.
    pub unsafe fn unmap(&mut self, device: &ash::Device) {
        if self.mapped.take().is_some() {
            device.unmap_memory(self.memory);
        }
    }

    /// Write bytes at `offset` through a persistent mapping.
    ///
    /// # Safety
    /// The memory must be host-visible.
    pub unsafe fn write_bytes(
        &mut self,
        device: &ash::Device,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::Other("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::Other(
                "Data range too large for buffer".to_string(),
            ));
        }

        let ptr = self.map(device)?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        self.flush(device)?;

        Ok(())
    }

    /// Flush host writes. A no-op for HOST_COHERENT memory.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn flush(&self, device: &ash::Device) -> Result<()> {
        if self.coherent {
            return Ok(());
        }

        let range = vk::MappedMemoryRange::default()
            .memory(self.memory)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        device.flush_mapped_memory_ranges(&[range])?;

        Ok(())
    }

    /// Destroy the buffer and free its memory.
    ///
    /// # Safety
    /// The buffer must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.unmap(device);
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
        self.buffer = vk::Buffer::null();
        self.memory = vk::DeviceMemory::null();
    }
}

/// True when offsets stepped by [`DYNAMIC_UNIFORM_ALIGNMENT`] also satisfy
/// a device's reported `minUniformBufferOffsetAlignment` (a power of two).
pub fn uniform_alignment_compatible(min_alignment: u64) -> bool {
    min_alignment == 0 || DYNAMIC_UNIFORM_ALIGNMENT % min_alignment == 0
}

/// Round `value` up to the next multiple of `alignment` (a power of two).
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index: 0,
            };
        }
        props
    }

    #[test]
    fn memory_type_first_match_wins() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let index = find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn memory_type_respects_type_bits() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        // Type 0 excluded by the resource's type bits
        let index = find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn memory_type_superset_required() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);

        let result = find_memory_type(
            &props,
            0b1,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert!(matches!(
            result,
            Err(GpuError::NoCompatibleMemoryType { .. })
        ));
    }

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }

    #[test]
    fn uniform_alignment_covers_common_device_limits() {
        for min_alignment in [1, 16, 64, 256] {
            assert!(uniform_alignment_compatible(min_alignment));
        }
        assert!(!uniform_alignment_compatible(512));
    }
}
