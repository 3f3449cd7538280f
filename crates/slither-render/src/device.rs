//! Frame orchestration.
//!
//! [`RenderDevice`] ties the GPU context, surface and swapchain together
//! into a begin/end frame protocol with a fixed number of frames in
//! flight. It owns everything whose lifetime is the renderer's: the
//! render pass, command pools, depth buffer, geometry arenas, per-frame
//! sync objects and uniform buffers.

use ash::vk;
use slither_gpu::buffer::uniform_alignment_compatible;
use slither_gpu::command::{execute_one_shot, submit_command_buffers, CommandPool};
use slither_gpu::descriptors::{write_uniform_buffer, DescriptorPool};
use slither_gpu::error::{GpuError, Result};
use slither_gpu::sync::{reset_fence, wait_for_fence};
use slither_gpu::{find_depth_format, Buffer, GpuContext, Image, SurfaceContext, Swapchain};

use crate::arena::ArenaBuffer;
use crate::frame::{next_frame_index, FrameResources, GpuTimeAverage, MAX_FRAMES_IN_FLIGHT};
use crate::pass::{create_framebuffer, create_render_pass};
use crate::uniforms::FrameUniforms;

/// Device-local bytes reserved for vertex data at startup.
pub const VERTEX_ARENA_SIZE: u64 = 16 * 1024 * 1024;
/// Device-local bytes reserved for index data at startup.
pub const INDEX_ARENA_SIZE: u64 = 4 * 1024 * 1024;

/// Background clear color.
const CLEAR_COLOR: [f32; 4] = [0.01, 0.01, 0.02, 1.0];

/// Handle to a frame between `begin_frame` and `end_frame`. Drawing
/// commands are recorded into `command_buffer`; the render pass is
/// already begun.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub command_buffer: vk::CommandBuffer,
    pub frame_index: usize,
    pub image_index: u32,
    pub extent: vk::Extent2D,
}

/// Owns per-renderer GPU resources and drives the frame loop.
pub struct RenderDevice {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    render_pass: vk::RenderPass,
    depth_format: vk::Format,
    depth: Image,

    graphics_pool: CommandPool,
    transfer_pool: CommandPool,

    vertex_arena: ArenaBuffer,
    index_arena: ArenaBuffer,

    frames: Vec<FrameResources>,
    frame_index: usize,

    descriptor_pool: DescriptorPool,
    uniform_buffers: Vec<Buffer>,

    gpu_time: GpuTimeAverage,

    // Negotiation inputs, reused on every swapchain recreation
    desired_format: vk::SurfaceFormatKHR,
    desired_present_mode: vk::PresentModeKHR,
    window_size: (u32, u32),
}

impl RenderDevice {
    /// Create the render device against an existing swapchain.
    ///
    /// Creation order matters: render pass (needs formats only), command
    /// pools, arenas, depth buffer with its layout transition, then the
    /// per-frame slots.
    ///
    /// # Safety
    /// The context, surface and swapchain must be valid.
    pub unsafe fn new(
        gpu: &GpuContext,
        swapchain: &Swapchain,
        desired_format: vk::SurfaceFormatKHR,
        desired_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let device = gpu.device();
        let memory_properties = gpu
            .instance()
            .get_physical_device_memory_properties(gpu.physical_device());

        let depth_format = find_depth_format(gpu.instance(), gpu.physical_device())?;
        let render_pass = create_render_pass(device, swapchain.format, depth_format)?;

        let graphics_pool = CommandPool::new(
            device,
            gpu.graphics_queue_family(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let transfer_pool = CommandPool::new(
            device,
            gpu.transfer_queue_family(),
            vk::CommandPoolCreateFlags::empty(),
        )?;

        let mut arena_families = vec![gpu.graphics_queue_family()];
        if gpu.transfer_queue_family() != gpu.graphics_queue_family() {
            arena_families.push(gpu.transfer_queue_family());
        }

        let vertex_arena = ArenaBuffer::new(
            device,
            &memory_properties,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            VERTEX_ARENA_SIZE,
            &arena_families,
        )?;
        let index_arena = ArenaBuffer::new(
            device,
            &memory_properties,
            vk::BufferUsageFlags::INDEX_BUFFER,
            INDEX_ARENA_SIZE,
            &arena_families,
        )?;

        let depth = create_depth_image(
            gpu,
            &memory_properties,
            depth_format,
            swapchain.extent,
            &graphics_pool,
        )?;

        let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            frames.push(FrameResources::new(device, &graphics_pool)?);
        }

        let descriptor_pool = DescriptorPool::new_uniform(device, MAX_FRAMES_IN_FLIGHT as u32)?;

        // Per-object offsets step by 256 bytes; the device's own minimum
        // must divide that step
        assert!(
            uniform_alignment_compatible(
                gpu.capabilities().min_uniform_buffer_offset_alignment
            ),
            "device minUniformBufferOffsetAlignment incompatible with the 256-byte uniform step"
        );

        let mut uniform_buffers = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            uniform_buffers.push(Buffer::new_dynamic_uniform(
                device,
                &memory_properties,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                FrameUniforms::SIZE,
            )?);
        }

        tracing::info!(
            "Render device ready: {}x{}, depth {:?}, {} frames in flight",
            swapchain.extent.width,
            swapchain.extent.height,
            depth_format,
            MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            memory_properties,
            render_pass,
            depth_format,
            depth,
            graphics_pool,
            transfer_pool,
            vertex_arena,
            index_arena,
            frames,
            frame_index: 0,
            descriptor_pool,
            uniform_buffers,
            gpu_time: GpuTimeAverage::default(),
            desired_format,
            desired_present_mode,
            window_size: (swapchain.extent.width, swapchain.extent.height),
        })
    }

    /// Begin a frame: block until the slot's previous submission has
    /// retired, acquire a swapchain image (recreating the swapchain when
    /// it has gone out of date), build the slot's framebuffer and open
    /// the render pass.
    ///
    /// Returns `None` for a zero-area (minimized) window: there is
    /// nothing to acquire or present to until the window has size again,
    /// and the swapchain cannot be rebuilt at that size.
    ///
    /// # Safety
    /// The context, surface and swapchain must be the ones the device was
    /// created against.
    pub unsafe fn begin_frame(
        &mut self,
        gpu: &GpuContext,
        surface: &SurfaceContext,
        swapchain: &mut Swapchain,
        window_width: u32,
        window_height: u32,
    ) -> Result<Option<Frame>> {
        if !is_drawable(window_width, window_height) {
            return Ok(None);
        }

        let device = gpu.device();
        let idx = self.frame_index;
        self.window_size = (window_width, window_height);

        wait_for_fence(device, self.frames[idx].drawing_finished, u64::MAX)?;

        // Safe now: the framebuffer from this slot's previous cycle is
        // no longer referenced by any in-flight command buffer
        self.frames[idx].destroy_framebuffer(device);

        let image_index = loop {
            let acquire = swapchain.acquire_next_image(
                &surface.swapchain_loader,
                self.frames[idx].image_acquired,
                u64::MAX,
            );
            match acquire {
                // Suboptimal still acquired an image; render this frame
                // and let present trigger the recreation
                Ok((index, _suboptimal)) => break index,
                Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)) => {
                    // A declined rebuild would spin on the same stale
                    // swapchain forever; bow out instead
                    if !self.recreate_sized(gpu, surface, swapchain, window_width, window_height)? {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e),
            }
        };

        // Reset only after a successful acquire so an early return above
        // leaves the fence signaled
        reset_fence(device, self.frames[idx].drawing_finished)?;

        let framebuffer = create_framebuffer(
            device,
            self.render_pass,
            swapchain.image_views[image_index as usize],
            self.depth.view,
            swapchain.extent,
        )?;
        self.frames[idx].framebuffer = Some(framebuffer);
        self.frames[idx].image_index = image_index;

        let cmd = self.frames[idx].command_buffer;
        device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
        device.begin_command_buffer(cmd, &begin_info)?;

        // Timestamps must be written outside the render pass
        self.frames[idx].timestamps.record_begin(device, cmd);

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_pass_begin = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: swapchain.extent,
            })
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(cmd, &render_pass_begin, vk::SubpassContents::INLINE);

        Ok(Some(Frame {
            command_buffer: cmd,
            frame_index: idx,
            image_index,
            extent: swapchain.extent,
        }))
    }

    /// End a frame: close the render pass, harvest GPU timing, submit and
    /// present, then advance to the next slot.
    ///
    /// # Safety
    /// `frame` must be the handle returned by the matching `begin_frame`.
    pub unsafe fn end_frame(
        &mut self,
        gpu: &GpuContext,
        surface: &SurfaceContext,
        swapchain: &mut Swapchain,
        frame: Frame,
    ) -> Result<()> {
        let device = gpu.device();
        let idx = frame.frame_index;
        let cmd = frame.command_buffer;

        device.cmd_end_render_pass(cmd);
        self.frames[idx].timestamps.record_end(device, cmd);

        // These results are from the slot's previous cycle; the pool is
        // unreadable until a first submission has reset and written it
        if self.frames[idx].timestamp_gate.ready() {
            if let Some(delta_ms) = self.frames[idx]
                .timestamps
                .fetch_delta_ms(device, gpu.capabilities().timestamp_period)?
            {
                self.gpu_time.update(delta_ms);
            }
        }

        device.end_command_buffer(cmd)?;

        let wait_semaphores = [self.frames[idx].image_acquired];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.frames[idx].ready_to_present];
        let command_buffers = [cmd];

        submit_command_buffers(
            device,
            gpu.graphics_queue(),
            &command_buffers,
            &wait_semaphores,
            &wait_stages,
            &signal_semaphores,
            self.frames[idx].drawing_finished,
        )?;
        self.frames[idx].timestamp_gate.mark_submitted();

        let needs_recreate = swapchain.present(
            &surface.swapchain_loader,
            gpu.graphics_queue(),
            frame.image_index,
            &signal_semaphores,
        )?;

        if needs_recreate {
            let (width, height) = self.window_size;
            self.recreate_sized(gpu, surface, swapchain, width, height)?;
        }

        self.frame_index = next_frame_index(self.frame_index);
        Ok(())
    }

    /// Recreate everything sized to the surface: the swapchain and the
    /// depth buffer. Framebuffers are dropped here and rebuilt lazily by
    /// `begin_frame`.
    ///
    /// Returns whether a rebuild happened; a zero-sized window declines,
    /// since the swapchain cannot exist at that size.
    ///
    /// # Safety
    /// The context, surface and swapchain must be valid.
    pub unsafe fn recreate_sized(
        &mut self,
        gpu: &GpuContext,
        surface: &SurfaceContext,
        swapchain: &mut Swapchain,
        width: u32,
        height: u32,
    ) -> Result<bool> {
        if !is_drawable(width, height) {
            return Ok(false);
        }

        gpu.wait_idle()?;

        swapchain.recreate(
            gpu,
            surface,
            self.desired_format,
            self.desired_present_mode,
            width,
            height,
        )?;

        self.depth.destroy(gpu.device());
        self.depth = create_depth_image(
            gpu,
            &self.memory_properties,
            self.depth_format,
            swapchain.extent,
            &self.graphics_pool,
        )?;

        for frame in &mut self.frames {
            frame.destroy_framebuffer(gpu.device());
        }

        Ok(true)
    }

    /// Upload vertex data into the vertex arena. Returns the byte offset
    /// to bind the vertex buffer at.
    ///
    /// # Safety
    /// The context must be the one the device was created against.
    pub unsafe fn upload_vertex_data(&mut self, gpu: &GpuContext, data: &[u8]) -> Result<u64> {
        self.vertex_arena.upload(
            gpu.device(),
            &self.memory_properties,
            &self.transfer_pool,
            gpu.transfer_queue(),
            data,
        )
    }

    /// Upload index data into the index arena. Returns the byte offset to
    /// bind the index buffer at.
    ///
    /// # Safety
    /// The context must be the one the device was created against.
    pub unsafe fn upload_index_data(&mut self, gpu: &GpuContext, data: &[u8]) -> Result<u64> {
        self.index_arena.upload(
            gpu.device(),
            &self.memory_properties,
            &self.transfer_pool,
            gpu.transfer_queue(),
            data,
        )
    }

    /// Write this frame's camera matrices into its uniform buffer.
    ///
    /// # Safety
    /// `frame_index` must come from a live [`Frame`].
    pub unsafe fn update_uniforms(
        &mut self,
        gpu: &GpuContext,
        frame_index: usize,
        uniforms: &FrameUniforms,
    ) -> Result<()> {
        self.uniform_buffers[frame_index].write_bytes(
            gpu.device(),
            0,
            bytemuck::bytes_of(uniforms),
        )
    }

    /// Allocate one descriptor set per frame slot from the device's pool
    /// and point each at its frame's uniform buffer.
    ///
    /// # Safety
    /// The layout must contain a uniform-buffer binding at index 0.
    pub unsafe fn create_uniform_descriptor_sets(
        &self,
        gpu: &GpuContext,
        layout: vk::DescriptorSetLayout,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; MAX_FRAMES_IN_FLIGHT];
        let sets = self.descriptor_pool.allocate(gpu.device(), &layouts)?;

        for (set, buffer) in sets.iter().zip(&self.uniform_buffers) {
            write_uniform_buffer(
                gpu.device(),
                *set,
                0,
                buffer.buffer,
                0,
                FrameUniforms::SIZE,
            );
        }

        Ok(sets)
    }

    /// The forward render pass; needed by clients to build pipelines.
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// The negotiated depth format.
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Vertex arena buffer handle for binding.
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_arena.handle()
    }

    /// Index arena buffer handle for binding.
    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_arena.handle()
    }

    /// Smoothed GPU frame time in milliseconds.
    pub fn gpu_time_ms(&self) -> f32 {
        self.gpu_time.average_ms()
    }

    /// Tear everything down in reverse creation order.
    ///
    /// # Safety
    /// Must be called before the context is dropped; waits for the GPU to
    /// go idle first.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) -> Result<()> {
        gpu.wait_idle()?;
        let device = gpu.device();

        for buffer in &mut self.uniform_buffers {
            buffer.destroy(device);
        }
        self.descriptor_pool.destroy(device);

        for frame in &mut self.frames {
            frame.destroy(device);
        }

        self.depth.destroy(device);
        self.vertex_arena.destroy(device);
        self.index_arena.destroy(device);

        self.transfer_pool.destroy(device);
        self.graphics_pool.destroy(device);

        device.destroy_render_pass(self.render_pass, None);

        Ok(())
    }
}

/// Create the shared depth attachment and transition it to
/// `DEPTH_STENCIL_ATTACHMENT_OPTIMAL` with a one-shot command buffer on
/// the graphics queue (depth pipeline stages are not valid on a
/// transfer-only queue).
unsafe fn create_depth_image(
    gpu: &GpuContext,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    format: vk::Format,
    extent: vk::Extent2D,
    graphics_pool: &CommandPool,
) -> Result<Image> {
    let image = Image::new(
        gpu.device(),
        memory_properties,
        format,
        extent,
        vk::ImageTiling::OPTIMAL,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        depth_aspect_mask(format),
    )?;

    execute_one_shot(gpu.device(), graphics_pool, gpu.graphics_queue(), |cmd| {
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(depth_aspect_mask(format))
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        gpu.device().cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    })?;

    Ok(image)
}

/// A zero-area window (minimized) has nothing to acquire or present to.
fn is_drawable(width: u32, height: u32) -> bool {
    width > 0 && height > 0
}

/// Aspect flags for a depth format, including stencil for combined
/// depth/stencil formats.
fn depth_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimized_window_is_not_drawable() {
        assert!(!is_drawable(0, 0));
        assert!(!is_drawable(0, 720));
        assert!(!is_drawable(1280, 0));
        assert!(is_drawable(1, 1));
        assert!(is_drawable(1280, 720));
    }

    #[test]
    fn combined_formats_carry_stencil_aspect() {
        assert_eq!(
            depth_aspect_mask(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            depth_aspect_mask(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }
}
