//! Per-frame-in-flight resources.

use ash::vk;
use slither_gpu::command::CommandPool;
use slither_gpu::error::Result;
use slither_gpu::query::TimestampQueryPool;
use slither_gpu::sync::{create_fence, create_semaphore};

/// Number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Resources for one frame-in-flight slot.
///
/// A slot may only be touched by the CPU while its `drawing_finished`
/// fence is known-signaled; the wait in `begin_frame` is the sole
/// mechanism preventing the CPU from re-recording a command buffer the
/// GPU is still executing.
pub struct FrameResources {
    /// Command buffer, reset (not freed) between frames.
    pub command_buffer: vk::CommandBuffer,
    /// Signaled by the presentation engine when the acquired image is ready.
    pub image_acquired: vk::Semaphore,
    /// Signaled by the graphics queue when rendering completes.
    pub ready_to_present: vk::Semaphore,
    /// CPU-waitable completion fence, created pre-signaled.
    pub drawing_finished: vk::Fence,
    /// Transient framebuffer, rebuilt every cycle because the bound
    /// swapchain image view changes.
    pub framebuffer: Option<vk::Framebuffer>,
    /// Begin/end GPU timestamps for this slot.
    pub timestamps: TimestampQueryPool,
    /// Whether the slot's query pool holds results from an executed
    /// submission.
    pub timestamp_gate: TimestampGate,
    /// Swapchain image index acquired for the current cycle.
    pub image_index: u32,
}

impl FrameResources {
    /// Create the slot's command buffer, sync objects and query pool.
    ///
    /// # Safety
    /// The device and pool must be valid.
    pub unsafe fn new(device: &ash::Device, pool: &CommandPool) -> Result<Self> {
        Ok(Self {
            command_buffer: pool.allocate_command_buffer(device)?,
            image_acquired: create_semaphore(device)?,
            ready_to_present: create_semaphore(device)?,
            drawing_finished: create_fence(device, true)?,
            framebuffer: None,
            timestamps: TimestampQueryPool::new(device)?,
            timestamp_gate: TimestampGate::default(),
            image_index: 0,
        })
    }

    /// Destroy the slot's framebuffer if one exists.
    ///
    /// # Safety
    /// The slot's fence must be signaled.
    pub unsafe fn destroy_framebuffer(&mut self, device: &ash::Device) {
        if let Some(framebuffer) = self.framebuffer.take() {
            device.destroy_framebuffer(framebuffer, None);
        }
    }

    /// Destroy all owned resources. The command buffer is freed with its
    /// pool.
    ///
    /// # Safety
    /// The GPU must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.destroy_framebuffer(device);
        self.timestamps.destroy(device);
        device.destroy_semaphore(self.image_acquired, None);
        device.destroy_semaphore(self.ready_to_present, None);
        device.destroy_fence(self.drawing_finished, None);
    }
}

/// Guards timestamp reads on a frame slot.
///
/// A freshly created query pool is in the uninitialized state; reading it
/// is invalid until a submission has executed the recorded reset and both
/// writes. The gate flips once such a submission is queued — by the time
/// the slot comes around again, the fence wait at the top of the cycle
/// guarantees that submission has executed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampGate {
    submitted: bool,
}

impl TimestampGate {
    /// True once a prior submission carried the reset and both writes.
    pub fn ready(&self) -> bool {
        self.submitted
    }

    /// Record that a submission carrying the timestamp writes was queued.
    pub fn mark_submitted(&mut self) {
        self.submitted = true;
    }
}

/// Advance a frame index one slot, wrapping at `MAX_FRAMES_IN_FLIGHT`.
pub fn next_frame_index(frame_index: usize) -> usize {
    (frame_index + 1) % MAX_FRAMES_IN_FLIGHT
}

/// Exponentially-weighted moving average of GPU frame time, for display.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuTimeAverage {
    avg_ms: f32,
}

impl GpuTimeAverage {
    /// Fold in a new sample: `avg = avg * 0.95 + sample * 0.05`.
    pub fn update(&mut self, sample_ms: f32) {
        self.avg_ms = self.avg_ms * 0.95 + sample_ms * 0.05;
    }

    /// Current average in milliseconds.
    pub fn average_ms(&self) -> f32 {
        self.avg_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index_cycles_modulo_frames_in_flight() {
        let mut index = 0;
        for n in 1..=10 {
            index = next_frame_index(index);
            assert_eq!(index, n % MAX_FRAMES_IN_FLIGHT);
        }
    }

    #[test]
    fn frame_index_wraps_to_zero() {
        assert_eq!(next_frame_index(MAX_FRAMES_IN_FLIGHT - 1), 0);
    }

    #[test]
    fn timestamp_gate_blocks_until_first_submission() {
        let mut gate = TimestampGate::default();
        assert!(!gate.ready());
        gate.mark_submitted();
        assert!(gate.ready());
    }

    #[test]
    fn timestamp_fetch_skipped_exactly_once_per_slot() {
        // Simulate a slot's end-of-frame sequence over several cycles
        let mut gate = TimestampGate::default();
        let mut fetches = 0;
        for _ in 0..5 {
            if gate.ready() {
                fetches += 1;
            }
            gate.mark_submitted();
        }
        assert_eq!(fetches, 4);
    }

    #[test]
    fn gpu_time_average_weights_samples() {
        let mut avg = GpuTimeAverage::default();
        avg.update(10.0);
        assert!((avg.average_ms() - 0.5).abs() < 1e-6);
        avg.update(10.0);
        assert!((avg.average_ms() - (0.5 * 0.95 + 0.5)).abs() < 1e-6);
    }

    #[test]
    fn gpu_time_average_converges_to_steady_sample() {
        let mut avg = GpuTimeAverage::default();
        for _ in 0..2000 {
            avg.update(4.0);
        }
        assert!((avg.average_ms() - 4.0).abs() < 1e-3);
    }
}
