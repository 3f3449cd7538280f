//! Per-frame uniform data.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Camera matrices uploaded once per frame. Layout mirrors the shader's
/// uniform block: two column-major mat4s.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view: Mat4,
    pub projection: Mat4,
}

impl FrameUniforms {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self { view, projection }
    }
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn frame_uniforms_layout() {
        assert_eq!(offset_of!(FrameUniforms, view), 0);
        assert_eq!(offset_of!(FrameUniforms, projection), 64);
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 128);
    }

    #[test]
    fn frame_uniforms_cast_to_bytes() {
        let uniforms = FrameUniforms::default();
        let bytes: &[u8] = bytemuck::bytes_of(&uniforms);
        assert_eq!(bytes.len(), FrameUniforms::SIZE as usize);
    }
}
