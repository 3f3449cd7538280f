//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No physical device satisfies the renderer's requirements.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// No memory type matches the requested property flags.
    #[error("No compatible memory type (type bits {type_bits:#x}, flags {flags:?})")]
    NoCompatibleMemoryType {
        /// Memory type bits reported by the driver for the resource.
        type_bits: u32,
        /// Property flags the allocation asked for.
        flags: vk::MemoryPropertyFlags,
    },

    /// None of the candidate depth formats support attachment usage.
    #[error("No supported depth format among candidates")]
    NoSupportedDepthFormat,

    /// A bump-allocated arena ran out of space.
    #[error("Arena overflow: requested {requested} bytes, {remaining} remaining")]
    ArenaOverflow {
        /// Bytes the upload asked for.
        requested: u64,
        /// Bytes left in the arena.
        remaining: u64,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
