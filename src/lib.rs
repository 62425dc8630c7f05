//! 2D global illumination renderer based on radiance cascades.
//!
//! The renderer is driven entirely by Vulkan compute: the scene is an
//! emissive texture painted by the user, a stack of cascade textures gathers
//! radiance intervals at increasing angular resolution, the levels are
//! merged top-down, averaged into a GI texture and composited into a display
//! texture that the presentation layer blits to the swapchain.
//!
//! The presentation layer owns the window, device, queues and frame pacing;
//! it creates a stage via [`create_stage`] and calls into [`RenderStage`]
//! each frame.

pub mod app;
pub mod cascade;
pub mod error;
pub mod gpu;

pub use app::{create_stage, FrameContext, FrameInput, RenderStage, StageKind};
pub use cascade::renderer::CascadeRenderer;
pub use cascade::settings::{CascadeResolution, CascadeSettings, MAX_CASCADE_LEVEL};
pub use error::{RenderError, RenderResult};
pub use gpu::GpuContext;
