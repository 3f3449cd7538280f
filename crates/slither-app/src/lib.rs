//! Application framework for the Slither renderer.
//!
//! Provides a trait-based application framework that handles the common
//! boilerplate:
//! - Window creation and management
//! - GPU context and render device initialization
//! - Swapchain creation and recreation
//! - Frame synchronization and presentation
//! - Event loop handling
//!
//! # Example
//!
//! ```no_run
//! use slither_app::{run_app, AppConfig, AppContext, Frame, GameApp};
//!
//! struct MyGame;
//!
//! impl GameApp for MyGame {
//!     fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyGame)
//!     }
//!
//!     fn update(&mut self, ctx: &AppContext, dt: f32) {}
//!
//!     fn render(&mut self, ctx: &AppContext, frame: &Frame) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyGame>(AppConfig::new("My Game"))
//! }
//! ```

mod app;
mod context;
mod runner;

pub use app::GameApp;
pub use context::AppContext;
pub use runner::{run_app, AppConfig};

// Re-export commonly used types for convenience
pub use slither_gpu::{GpuContext, GpuContextBuilder};
pub use slither_render::{Frame, FrameUniforms, RenderDevice};
pub use winit::event::WindowEvent;
