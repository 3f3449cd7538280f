//! Application context.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use slither_gpu::error::Result;
use slither_gpu::{GpuContext, GpuContextBuilder, SurfaceContext, Swapchain};
use slither_render::{Frame, RenderDevice};
use winit::window::Window;

/// Application context shared across all app methods.
///
/// Owns the window, GPU context, surface, swapchain and render device,
/// and keeps their teardown order straight.
pub struct AppContext {
    /// The window handle.
    pub window: Arc<Window>,
    /// GPU context with device and queues.
    pub gpu: GpuContext,
    /// Surface context for windowed rendering.
    pub surface: SurfaceContext,
    /// Current swapchain.
    pub swapchain: Swapchain,
    /// Render device driving the frame loop.
    pub render: RenderDevice,
    /// Total frames rendered.
    pub frame_count: u64,
    /// Time of last frame, for delta-time calculation.
    pub(crate) last_frame_time: Instant,
}

impl AppContext {
    /// Create a new application context.
    ///
    /// # Safety
    /// The window must have valid handles for the context's lifetime.
    pub(crate) unsafe fn new(
        window: Arc<Window>,
        app_name: &str,
        validation: bool,
        vsync: bool,
    ) -> anyhow::Result<Self> {
        let (gpu, surface) = GpuContextBuilder::new()
            .app_name(app_name)
            .validation(validation)
            .build(window.as_ref())?;

        let size = window.inner_size();
        let width = size.width.max(1);
        let height = size.height.max(1);

        let desired_format = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        // FIFO is the only mode guaranteed everywhere; MAILBOX gives
        // uncapped frame rates without tearing when available
        let desired_present_mode = if vsync {
            vk::PresentModeKHR::FIFO
        } else {
            vk::PresentModeKHR::MAILBOX
        };

        let swapchain = Swapchain::create(
            &gpu,
            &surface,
            desired_format,
            desired_present_mode,
            width,
            height,
            None,
        )?;

        tracing::info!(
            "Swapchain created: {}x{} ({} images, {:?})",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len(),
            swapchain.format
        );

        let render = RenderDevice::new(&gpu, &swapchain, desired_format, desired_present_mode)?;

        Ok(Self {
            window,
            gpu,
            surface,
            swapchain,
            render,
            frame_count: 0,
            last_frame_time: Instant::now(),
        })
    }

    /// Begin a frame against the current window size.
    ///
    /// Returns `None` while the window is minimized.
    ///
    /// # Safety
    /// No other frame may be open.
    pub unsafe fn begin_frame(&mut self) -> Result<Option<Frame>> {
        let size = self.window.inner_size();
        self.render.begin_frame(
            &self.gpu,
            &self.surface,
            &mut self.swapchain,
            size.width,
            size.height,
        )
    }

    /// Finish the frame opened by [`AppContext::begin_frame`].
    ///
    /// # Safety
    /// `frame` must be the handle from the matching `begin_frame`.
    pub unsafe fn end_frame(&mut self, frame: Frame) -> Result<()> {
        self.render
            .end_frame(&self.gpu, &self.surface, &mut self.swapchain, frame)
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Get the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent.width as f32 / self.swapchain.extent.height.max(1) as f32
    }

    /// Recreate the swapchain and size-dependent resources after a
    /// resize.
    ///
    /// # Safety
    /// No frame may be open.
    pub(crate) unsafe fn handle_resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.render
            .recreate_sized(&self.gpu, &self.surface, &mut self.swapchain, width, height)?;
        Ok(())
    }

    /// Cleanup all resources.
    ///
    /// # Safety
    /// The GPU must be idle and all resources must not be in use.
    pub(crate) unsafe fn cleanup(&mut self) {
        if let Err(e) = self.render.destroy(&self.gpu) {
            tracing::error!("Render device teardown failed: {e}");
        }
        self.swapchain
            .destroy(self.gpu.device(), &self.surface.swapchain_loader);
        self.surface.destroy();
        // The GpuContext destroys the device and instance on drop
    }
}
