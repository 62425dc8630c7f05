//! Per-frame interface between the renderer and the presentation layer.
//!
//! The presentation layer owns the window, swapchain, queues and frame
//! pacing. It hands the renderer a command buffer per frame and submits the
//! result: compute work on the compute queue, the composite on the graphics
//! queue, ordered by a per-frame semaphore. The renderer records into
//! whatever it is given and never touches a queue itself, so it needs no
//! internal locking.

use ash::vk;

use crate::cascade::renderer::CascadeRenderer;
use crate::cascade::settings::CascadeSettings;
use crate::error::RenderResult;
use crate::gpu::GpuContext;

/// User input latched for the next frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput {
    /// Brush position in output pixels, or `None` when not painting.
    pub cursor: Option<(u32, u32)>,
    /// Brush radius in pixels.
    pub brush_radius: u8,
    /// Brush color, 8-bit sRGB-ish channels.
    pub brush_color: [u8; 3],
    /// Request a one-shot scene clear this frame.
    pub clear_scene: bool,
}

impl Default for FrameInput {
    fn default() -> Self {
        Self {
            cursor: None,
            brush_radius: 8,
            brush_color: [255, 255, 255],
            clear_scene: false,
        }
    }
}

/// Everything the presentation layer provides for recording one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    /// Command buffer in the recording state.
    pub cmd: vk::CommandBuffer,
    /// Composite target, already in `TRANSFER_DST_OPTIMAL` for the
    /// composite stage. Unused by the compute stage.
    pub target_image: vk::Image,
    /// View of the composite target.
    pub target_view: vk::ImageView,
    /// Extent of the composite target.
    pub target_extent: vk::Extent2D,
    /// Monotonic frame counter.
    pub frame_index: u64,
    /// True exactly once, on the first recorded frame.
    pub first_frame: bool,
}

/// A renderer stage driven by the presentation layer.
pub trait RenderStage {
    /// Latch input for the next recorded frame.
    fn update(&mut self, input: &FrameInput);

    /// Record the compute work of one frame.
    fn record_compute(&mut self, frame: &FrameContext) -> RenderResult<()>;

    /// Record the composite of the frame onto the target image.
    fn record_composite(&mut self, frame: &FrameContext) -> RenderResult<()>;

    /// Apply new cascade settings. Waits for the device to go idle and
    /// rebuilds every per-level resource; never call this per-frame.
    fn request_settings(&mut self, settings: CascadeSettings) -> RenderResult<()>;

    /// Release all GPU resources. Must be called before the device is
    /// destroyed.
    fn shutdown(&mut self) -> RenderResult<()>;
}

/// Available renderer stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageKind {
    #[default]
    RadianceCascades,
}

/// Create a renderer stage rendering at the given output resolution.
pub fn create_stage(
    kind: StageKind,
    ctx: GpuContext,
    output_extent: vk::Extent2D,
) -> RenderResult<Box<dyn RenderStage>> {
    match kind {
        StageKind::RadianceCascades => Ok(Box::new(CascadeRenderer::new(ctx, output_extent)?)),
    }
}
