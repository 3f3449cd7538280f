//! Swapchain management.
//!
//! The swapchain owns the chain of presentable images and one view per
//! image. It is destroyed and recreated wholesale on resize or when
//! acquire/present report an out-of-date condition; recreation invalidates
//! every prior image and view handle, so framebuffers built from them must
//! be rebuilt by the caller.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::surface::SurfaceContext;
use ash::vk;

/// Swapchain wrapper.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for the surface, negotiating format, present
    /// mode, extent and image count against what the surface reports.
    ///
    /// # Safety
    /// The context and surface must be valid.
    pub unsafe fn create(
        gpu: &GpuContext,
        surface: &SurfaceContext,
        desired_format: vk::SurfaceFormatKHR,
        desired_present_mode: vk::PresentModeKHR,
        width: u32,
        height: u32,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        let caps = surface.capabilities(gpu)?;

        let surface_format = find_best_surface_format(&caps.formats, desired_format);
        let present_mode = find_best_present_mode(&caps.present_modes, desired_present_mode);
        let extent = resolve_extent(&caps.capabilities, width, height);
        let image_count = resolve_image_count(&caps.capabilities);

        Self::new(
            gpu.device(),
            &surface.swapchain_loader,
            surface.surface,
            &caps.capabilities,
            surface_format,
            present_mode,
            extent,
            image_count,
            old_swapchain,
            gpu.graphics_queue_family(),
            gpu.graphics_queue_family(),
        )
    }

    /// Create a swapchain from fully-negotiated parameters.
    ///
    /// Sharing is CONCURRENT across the graphics and present families only
    /// when they differ; EXCLUSIVE otherwise.
    ///
    /// # Safety
    /// All handles must be valid.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface: vk::SurfaceKHR,
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        surface_format: vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        extent: vk::Extent2D,
        image_count: u32,
        old_swapchain: Option<vk::SwapchainKHR>,
        graphics_queue_family: u32,
        present_queue_family: u32,
    ) -> Result<Self> {
        let queue_families = [graphics_queue_family, present_queue_family];
        let (sharing_mode, family_slice): (vk::SharingMode, &[u32]) =
            if graphics_queue_family == present_queue_family {
                (vk::SharingMode::EXCLUSIVE, &[])
            } else {
                (vk::SharingMode::CONCURRENT, &queue_families)
            };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_slice)
            .pre_transform(surface_capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        let swapchain = swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        // Get swapchain images
        let images = swapchain_loader.get_swapchain_images(swapchain)?;

        // Create image views
        let image_views: Vec<_> = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );

                device.create_image_view(&view_info, None)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: surface_format.format,
            extent,
        })
    }

    /// Destroy this swapchain and build a fresh one for the new size.
    ///
    /// The render pass stays valid across recreation (the color format
    /// does not change on resize); framebuffers do not and are rebuilt by
    /// the frame loop.
    ///
    /// # Safety
    /// The old swapchain must not be in use.
    pub unsafe fn recreate(
        &mut self,
        gpu: &GpuContext,
        surface: &SurfaceContext,
        desired_format: vk::SurfaceFormatKHR,
        desired_present_mode: vk::PresentModeKHR,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.destroy(gpu.device(), &surface.swapchain_loader);
        *self = Self::create(
            gpu,
            surface,
            desired_format,
            desired_present_mode,
            width,
            height,
            None,
        )?;

        tracing::info!(
            "Swapchain recreated: {}x{} ({} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );

        Ok(())
    }

    /// Acquire the next image, signaling `semaphore` when it is ready.
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    /// `ERROR_OUT_OF_DATE_KHR` is surfaced as an error; no image was
    /// acquired and the caller must recreate the swapchain.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn acquire_next_image(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<(u32, bool)> {
        let result = swapchain_loader.acquire_next_image(
            self.swapchain,
            timeout_ns,
            semaphore,
            vk::Fence::null(),
        );

        match result {
            Ok((index, suboptimal)) => Ok((index, suboptimal)),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Present an image, waiting on the given semaphores.
    ///
    /// Returns `true` when the swapchain should be recreated
    /// (out-of-date or suboptimal).
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = swapchain_loader.queue_present(queue, &present_info);

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy the swapchain and its image views.
    ///
    /// # Safety
    /// All handles must be valid and the swapchain must not be in use.
    pub unsafe fn destroy(
        &self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        swapchain_loader.destroy_swapchain(self.swapchain, None);
    }
}

/// Pick the surface format closest to the desired one.
///
/// A surface reporting a single UNDEFINED format accepts anything, so the
/// desired format is used outright. Otherwise an exact (format, color
/// space) match wins; failing that, a matching format keeps the desired
/// color space; failing that, the first reported format. Never fails and
/// never returns UNDEFINED.
pub fn find_best_surface_format(
    available: &[vk::SurfaceFormatKHR],
    desired: vk::SurfaceFormatKHR,
) -> vk::SurfaceFormatKHR {
    if available.len() == 1 && available[0].format == vk::Format::UNDEFINED {
        return desired;
    }

    for format in available {
        if format.format == desired.format && format.color_space == desired.color_space {
            return *format;
        }
    }

    // Best-effort degrade: keep the desired color space if at least the
    // format is reported
    if available.iter().any(|f| f.format == desired.format) {
        return vk::SurfaceFormatKHR {
            format: desired.format,
            color_space: desired.color_space,
        };
    }

    available[0]
}

/// Pick the desired present mode when the surface lists it, otherwise the
/// universally-guaranteed FIFO.
pub fn find_best_present_mode(
    available: &[vk::PresentModeKHR],
    desired: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&desired) {
        desired
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Resolve the swapchain extent.
///
/// A defined `current_extent` is dictated by the platform and used
/// verbatim; the `u32::MAX` sentinel means the window size decides,
/// clamped into the reported min/max bounds.
pub fn resolve_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Resolve the image count: one above the minimum, clamped to the maximum
/// when the surface reports one (0 means unbounded).
pub fn resolve_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    const DESIRED: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    #[test]
    fn surface_format_accepts_desired_when_undefined() {
        let available = [fmt(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(find_best_surface_format(&available, DESIRED), DESIRED);
    }

    #[test]
    fn surface_format_exact_match() {
        let available = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            DESIRED,
        ];
        assert_eq!(find_best_surface_format(&available, DESIRED), DESIRED);
    }

    #[test]
    fn surface_format_keeps_color_space_on_format_match() {
        let available = [fmt(
            vk::Format::B8G8R8A8_UNORM,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        )];
        let chosen = find_best_surface_format(&available, DESIRED);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let a = fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let b = fmt(vk::Format::R5G6B5_UNORM_PACK16, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let chosen = find_best_surface_format(&[a, b], DESIRED);
        assert_eq!(chosen, a);
        assert_ne!(chosen.format, vk::Format::UNDEFINED);
    }

    #[test]
    fn present_mode_accepts_listed_desired() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            find_best_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            find_best_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_current_when_defined() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..Default::default()
        };
        let extent = resolve_extent(&caps, 50, 50);
        assert_eq!(extent.width, 1280);
        assert_eq!(extent.height, 720);
    }

    #[test]
    fn extent_clamps_to_reported_minimum() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 200,
                height: 200,
            },
            max_image_extent: vk::Extent2D {
                width: 4000,
                height: 4000,
            },
            ..Default::default()
        };
        let extent = resolve_extent(&caps, 50, 50);
        assert_eq!(extent.width, 200);
        assert_eq!(extent.height, 200);
    }

    #[test]
    fn extent_clamps_to_reported_maximum() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 200,
                height: 200,
            },
            max_image_extent: vk::Extent2D {
                width: 4000,
                height: 4000,
            },
            ..Default::default()
        };
        let extent = resolve_extent(&caps, 8000, 8000);
        assert_eq!(extent.width, 4000);
        assert_eq!(extent.height, 4000);
    }

    #[test]
    fn image_count_is_min_plus_one() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(resolve_image_count(&caps), 3);
    }

    #[test]
    fn image_count_clamps_to_max() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(resolve_image_count(&caps), 3);
    }

    #[test]
    fn image_count_unbounded_when_max_is_zero() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 4,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(resolve_image_count(&caps), 5);
    }
}
