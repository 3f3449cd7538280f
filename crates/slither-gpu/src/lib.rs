//! Vulkan abstraction layer for the Slither renderer.
//!
//! This crate provides:
//! - Vulkan instance and device management
//! - Surface and swapchain handling
//! - Buffer/image primitives with explicit memory-type resolution
//! - Command buffer, synchronization and timestamp-query helpers

pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod image;
pub mod instance;
pub mod query;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::{
    find_memory_type, uniform_alignment_compatible, Buffer, DYNAMIC_UNIFORM_ALIGNMENT,
};
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::CommandPool;
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{write_uniform_buffer, DescriptorPool};
pub use error::{GpuError, Result};
pub use image::{find_depth_format, Image};
pub use query::TimestampQueryPool;
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::Swapchain;
pub use sync::{create_fence, create_semaphore};
