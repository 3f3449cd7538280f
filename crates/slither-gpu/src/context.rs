//! GPU context management.
//!
//! The context owns the Vulkan instance and logical device. It is the root
//! of the renderer's ownership tree: the surface, swapchain and render
//! device all hold non-owning references to it and must be torn down first.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::instance::{create_debug_messenger, create_instance};
use crate::surface::SurfaceContext;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) capabilities: GpuCapabilities,

    // Queue families and queues
    pub(crate) graphics_queue_family: u32,
    pub(crate) transfer_queue_family: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) transfer_queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get the graphics queue. Also capable of presenting to the surface
    /// the context was built against.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the transfer queue.
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get the transfer queue family index.
    pub fn transfer_queue_family(&self) -> u32 {
        self.transfer_queue_family
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Wait for the device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Reverse order of creation: device before instance
            self.device.destroy_device(None);
            if let Some((loader, messenger)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Slither".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context and the surface for the given window.
    ///
    /// Device selection is surface-aware: a physical device qualifies only
    /// if it carries the required device extensions, reports at least one
    /// surface format and present mode, and has a queue family that can
    /// both draw and present.
    ///
    /// # Safety
    /// The window must have valid display and window handles for the
    /// lifetime of the returned surface.
    pub unsafe fn build<W>(self, window: &W) -> Result<(GpuContext, SurfaceContext)>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        // Load Vulkan entry point
        let entry = ash::Entry::load()
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        // Create Vulkan instance
        let instance = create_instance(&entry, &self.app_name, self.enable_validation)?;

        let debug_messenger = if self.enable_validation {
            Some(create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // The surface must exist before device selection so presentation
        // support can be checked per candidate
        let (surface, surface_loader) = SurfaceContext::create_surface(&entry, &instance, window)?;

        let required_extensions = required_device_extensions();

        // Select a physical device that can present to this surface
        let selection = pick_suitable_gpu(
            &instance,
            &surface_loader,
            surface,
            &required_extensions,
        )?;

        let capabilities = GpuCapabilities::query(&instance, selection.physical_device);
        tracing::info!("Selected GPU: {}", capabilities.summary());

        // Create logical device and retrieve queues
        let (device, graphics_queue, transfer_queue) = create_device(
            &instance,
            selection.physical_device,
            &selection.queue_families,
            &required_extensions,
        )?;

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let context = GpuContext {
            entry,
            instance,
            debug_messenger,
            physical_device: selection.physical_device,
            device,
            capabilities,
            graphics_queue_family: selection.queue_families.graphics,
            transfer_queue_family: selection.queue_families.transfer,
            graphics_queue,
            transfer_queue,
        };

        let surface_ctx = SurfaceContext::new(surface, surface_loader, swapchain_loader);

        Ok((context, surface_ctx))
    }
}

/// Queue family indices resolved during device selection.
#[derive(Clone, Copy)]
pub(crate) struct QueueFamilyIndices {
    /// Graphics-capable family that can also present to the surface.
    pub graphics: u32,
    /// Transfer-capable family; a non-graphics family when one exists.
    pub transfer: u32,
}

struct DeviceSelection {
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilyIndices,
}

/// Required device extensions.
pub(crate) fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Enumerate physical devices and pick the first that satisfies all
/// renderer requirements. Among equally-suitable devices a discrete GPU
/// is preferred.
///
/// # Safety
/// The instance, surface loader and surface must be valid.
unsafe fn pick_suitable_gpu(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    required_extensions: &[&CStr],
) -> Result<DeviceSelection> {
    let devices = instance.enumerate_physical_devices()?;

    let mut best: Option<(i32, DeviceSelection)> = None;

    for device in devices {
        let Some(queue_families) =
            check_device_suitable(instance, surface_loader, surface, device, required_extensions)?
        else {
            continue;
        };

        let properties = instance.get_physical_device_properties(device);
        let score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
            _ => 0,
        };

        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((
                score,
                DeviceSelection {
                    physical_device: device,
                    queue_families,
                },
            ));
        }
    }

    best.map(|(_, sel)| sel).ok_or(GpuError::NoSuitableDevice)
}

/// Check a single physical device against the renderer's requirements.
///
/// Returns the resolved queue families when the device qualifies.
unsafe fn check_device_suitable(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
    required_extensions: &[&CStr],
) -> Result<Option<QueueFamilyIndices>> {
    // Required device extensions must all be present
    let available = instance.enumerate_device_extension_properties(device)?;
    let all_present = required_extensions.iter().all(|required| {
        available
            .iter()
            .any(|props| CStr::from_ptr(props.extension_name.as_ptr()) == *required)
    });
    if !all_present {
        return Ok(None);
    }

    // The device must be able to present something to this surface
    let formats = surface_loader.get_physical_device_surface_formats(device, surface)?;
    let present_modes =
        surface_loader.get_physical_device_surface_present_modes(device, surface)?;
    if formats.is_empty() || present_modes.is_empty() {
        return Ok(None);
    }

    Ok(find_queue_families(instance, surface_loader, surface, device)?)
}

/// Resolve a graphics+present family and a transfer family.
///
/// Tie-break for transfer: prefer a family supporting TRANSFER without
/// GRAPHICS; when none exists, share the graphics family.
///
/// # Safety
/// All handles must be valid.
unsafe fn find_queue_families(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> Result<Option<QueueFamilyIndices>> {
    let families = instance.get_physical_device_queue_family_properties(device);

    let mut graphics_family = None;
    let mut dedicated_transfer_family = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;

        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
            let can_present =
                surface_loader.get_physical_device_surface_support(device, i, surface)?;
            if can_present {
                graphics_family = Some(i);
            }
        }

        if family.queue_flags.contains(vk::QueueFlags::TRANSFER)
            && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && dedicated_transfer_family.is_none()
        {
            dedicated_transfer_family = Some(i);
        }
    }

    let Some(graphics) = graphics_family else {
        return Ok(None);
    };

    let transfer = dedicated_transfer_family.unwrap_or(graphics);

    Ok(Some(QueueFamilyIndices { graphics, transfer }))
}

/// Create the logical device and retrieve queues.
///
/// One queue-create entry per distinct family. No optional device
/// features are enabled.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
    required_extensions: &[&CStr],
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let mut unique_families = vec![queue_families.graphics];
    if queue_families.transfer != queue_families.graphics {
        unique_families.push(queue_families.transfer);
    }

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const i8> =
        required_extensions.iter().map(|ext| ext.as_ptr()).collect();

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    // Queue index 0 in each family
    let graphics_queue = device.get_device_queue(queue_families.graphics, 0);
    let transfer_queue = device.get_device_queue(queue_families.transfer, 0);

    Ok((device, graphics_queue, transfer_queue))
}
