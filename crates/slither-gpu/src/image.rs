//! Image primitive and depth-format selection.

use crate::buffer::find_memory_type;
use crate::error::{GpuError, Result};
use ash::vk;

/// A 2D image with its bound memory and a single view.
pub struct Image {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Image {
    /// Create a 2D image, bind memory resolved with the same first-match
    /// policy as buffers, and create a view with the given aspect mask.
    ///
    /// # Safety
    /// The device must be valid and `memory_properties` must describe its
    /// physical device.
    pub unsafe fn new(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        format: vk::Format,
        extent: vk::Extent2D,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(tiling)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = device.create_image(&image_info, None)?;

        let requirements = device.get_image_memory_requirements(image);
        let memory_type =
            match find_memory_type(memory_properties, requirements.memory_type_bits, properties) {
                Ok(index) => index,
                Err(e) => {
                    device.destroy_image(image, None);
                    return Err(e);
                }
            };

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = match device.allocate_memory(&alloc_info, None) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_image(image, None);
                return Err(e.into());
            }
        };

        device.bind_image_memory(image, memory, 0)?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = match device.create_image_view(&view_info, None) {
            Ok(view) => view,
            Err(e) => {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
                return Err(e.into());
            }
        };

        Ok(Self {
            image,
            memory,
            view,
            format,
            extent,
        })
    }

    /// Destroy the view, image and memory.
    ///
    /// # Safety
    /// The image must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
        self.image = vk::Image::null();
        self.view = vk::ImageView::null();
        self.memory = vk::DeviceMemory::null();
    }
}

/// Probe `candidates` in preference order and return the first format
/// whose feature flags for the given tiling contain `features`.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn find_supported_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> Result<vk::Format> {
    for &format in candidates {
        let props = instance.get_physical_device_format_properties(physical_device, format);
        let supported = match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            _ => props.optimal_tiling_features.contains(features),
        };
        if supported {
            return Ok(format);
        }
    }

    Err(GpuError::NoSupportedDepthFormat)
}

/// Depth formats the renderer accepts, in preference order.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Find a depth format usable as a depth/stencil attachment with optimal
/// tiling. Fatal (error) when none of the candidates qualify.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn find_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<vk::Format> {
    find_supported_format(
        instance,
        physical_device,
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}
