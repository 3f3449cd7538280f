//! Vulkan instance creation and validation messaging.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{c_void, CStr, CString};

/// Required instance extensions for presenting to the host window system.
pub fn required_instance_extensions() -> Vec<&'static CStr> {
    let extensions = vec![
        ash::khr::surface::NAME,
        #[cfg(target_os = "windows")]
        ash::khr::win32_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::xlib_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::wayland_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::ext::metal_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::portability_enumeration::NAME,
    ];

    extensions
}

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance.
///
/// Surface support for the host window system is mandatory; a missing
/// required instance extension is reported as `ExtensionNotSupported`
/// since there is no fallback rendering backend.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name).map_err(|e| GpuError::Other(e.to_string()))?;
    let engine_name = c"Slither";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_0);

    // Verify the required surface extensions exist before asking for them
    let available = entry.enumerate_instance_extension_properties(None)?;
    let required = required_instance_extensions();
    for ext in &required {
        let found = available.iter().any(|props| {
            let name = CStr::from_ptr(props.extension_name.as_ptr());
            name == *ext
        });
        if !found {
            return Err(GpuError::ExtensionNotSupported(
                ext.to_string_lossy().into_owned(),
            ));
        }
    }

    let mut extension_names: Vec<*const i8> = required.iter().map(|ext| ext.as_ptr()).collect();
    if enable_validation {
        extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    // Check that requested layers are available
    let layers = if enable_validation {
        validation_layers()
    } else {
        vec![]
    };

    let available_layers = entry.enumerate_instance_layer_properties()?;
    let layers: Vec<&CStr> = layers
        .into_iter()
        .filter(|layer| {
            let found = available_layers.iter().any(|props| {
                let name = CStr::from_ptr(props.layer_name.as_ptr());
                name == *layer
            });
            if !found {
                tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
            }
            found
        })
        .collect();

    let layer_names: Vec<*const i8> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;

    Ok(instance)
}

/// Install a debug-utils messenger routing validation messages to tracing.
///
/// # Safety
/// The entry and instance must be valid.
pub unsafe fn create_debug_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = loader.create_debug_utils_messenger(&create_info, None)?;

    Ok((loader, messenger))
}

/// Validation message sink.
///
/// Error-severity messages indicate API misuse, not a runtime condition;
/// in debug builds they abort so the bug cannot be missed.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        let data = *callback_data;
        if data.p_message.is_null() {
            std::borrow::Cow::Borrowed("<no message>")
        } else {
            CStr::from_ptr(data.p_message).to_string_lossy()
        }
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!("[vulkan] {message}");
        debug_assert!(false, "Vulkan validation error: {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!("[vulkan] {message}");
    } else {
        tracing::debug!("[vulkan] {message}");
    }

    vk::FALSE
}
