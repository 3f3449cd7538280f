//! `GameApp` trait definition.

use crate::context::AppContext;
use slither_render::Frame;
use winit::event::WindowEvent;

/// Trait for applications built on the Slither renderer.
///
/// Implement this to get window creation, GPU initialization, swapchain
/// management and the frame loop for free; the app only records draw
/// commands and reacts to events.
pub trait GameApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the GPU context, swapchain and render device
    /// have been created. Upload geometry and build pipelines here.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before rendering with the delta time in
    /// seconds since the last frame.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record draw commands for a frame.
    ///
    /// Called between `begin_frame` and `end_frame`: the render pass is
    /// already open on `frame.command_buffer` with color and depth
    /// cleared. Submission and presentation are handled by the runner.
    fn render(&mut self, ctx: &AppContext, frame: &Frame) -> anyhow::Result<()>;

    /// Handle window resize.
    ///
    /// The swapchain and depth buffer have already been recreated; use
    /// this for app-side size-dependent state (projection matrices).
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events.
    ///
    /// Return `true` if the event was consumed and should not be
    /// processed further.
    ///
    /// Default implementation does nothing and returns `false`.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Cleanup resources before shutdown.
    ///
    /// The GPU is idle when this is called, so destroying GPU resources
    /// is safe.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
