//! GPU timestamp queries for frame profiling.

use crate::error::Result;
use ash::vk;

/// Index of the frame-begin timestamp within a pool.
pub const TIMESTAMP_BEGIN: u32 = 0;
/// Index of the frame-end timestamp within a pool.
pub const TIMESTAMP_END: u32 = 1;

/// A two-slot timestamp query pool: one begin and one end timestamp per
/// frame slot.
pub struct TimestampQueryPool {
    pool: vk::QueryPool,
}

impl TimestampQueryPool {
    /// Create a query pool holding a begin/end timestamp pair.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let create_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(2);

        let pool = device.create_query_pool(&create_info, None)?;
        Ok(Self { pool })
    }

    /// Reset both slots and write the begin timestamp.
    ///
    /// Must be recorded outside a render pass.
    ///
    /// # Safety
    /// The command buffer must be in the recording state.
    pub unsafe fn record_begin(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_reset_query_pool(cmd, self.pool, 0, 2);
        device.cmd_write_timestamp(
            cmd,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            self.pool,
            TIMESTAMP_BEGIN,
        );
    }

    /// Write the end timestamp.
    ///
    /// # Safety
    /// The command buffer must be in the recording state.
    pub unsafe fn record_end(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_write_timestamp(
            cmd,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            self.pool,
            TIMESTAMP_END,
        );
    }

    /// Fetch both timestamps and return the GPU time delta in
    /// milliseconds, or `None` when the results are not yet available.
    ///
    /// `timestamp_period` is the device's nanoseconds-per-tick value.
    ///
    /// # Safety
    /// The device must be valid, and at least one submission must have
    /// executed `record_begin`/`record_end` for this pool; reading a
    /// never-reset pool is invalid.
    pub unsafe fn fetch_delta_ms(
        &self,
        device: &ash::Device,
        timestamp_period: f32,
    ) -> Result<Option<f32>> {
        let mut results = [0u64; 2];
        let fetch = device.get_query_pool_results(
            self.pool,
            0,
            &mut results,
            vk::QueryResultFlags::TYPE_64,
        );

        match fetch {
            Ok(()) => {
                let ticks = results[1].saturating_sub(results[0]);
                Ok(Some(timestamp_ticks_to_ms(ticks, timestamp_period)))
            }
            // Results from the previous use of this slot may still be in flight
            Err(vk::Result::NOT_READY) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Destroy the query pool.
    ///
    /// # Safety
    /// The pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_query_pool(self.pool, None);
    }
}

/// Convert a tick delta to milliseconds using the device timestamp period.
pub fn timestamp_ticks_to_ms(ticks: u64, timestamp_period: f32) -> f32 {
    ticks as f32 * timestamp_period / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_to_ms_uses_period() {
        // 1_000_000 ticks at 1ns/tick is one millisecond
        let ms = timestamp_ticks_to_ms(1_000_000, 1.0);
        assert!((ms - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn ticks_to_ms_scales_with_period() {
        let ms = timestamp_ticks_to_ms(500_000, 2.0);
        assert!((ms - 1.0).abs() < f32::EPSILON);
    }
}
