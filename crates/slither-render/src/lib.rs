//! Frame orchestration for the Slither renderer.
//!
//! Builds on `slither-gpu` to provide a begin/end frame protocol with
//! three frames in flight, a shared depth buffer, bump-allocated
//! geometry arenas and GPU frame timing.

pub mod arena;
pub mod device;
pub mod frame;
pub mod pass;
pub mod uniforms;

pub use arena::{ArenaBuffer, ArenaCursor};
pub use device::{Frame, RenderDevice, INDEX_ARENA_SIZE, VERTEX_ARENA_SIZE};
pub use frame::{FrameResources, GpuTimeAverage, TimestampGate, MAX_FRAMES_IN_FLIGHT};
pub use pass::{create_framebuffer, create_render_pass};
pub use uniforms::FrameUniforms;
