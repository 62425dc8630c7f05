//! GPU image resources with explicit layout tracking.
//!
//! Each [`GpuImage`] owns its Vulkan image, view and memory allocation, and
//! carries its current layout as part of its state. The only way to change
//! the layout is [`GpuImage::transition`], which records the matching image
//! memory barrier in the same step, so the tracked layout can never drift
//! from what the GPU actually sees. A destroyed and recreated image starts
//! over in `Undefined`.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;

/// Image layout states used by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Initial state, contents undefined.
    #[default]
    Undefined,
    /// Storage reads and writes from compute shaders.
    General,
    /// Source of a blit or copy.
    TransferSrc,
}

impl ImageLayout {
    /// Convert to Vulkan image layout.
    pub fn to_vk(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::General => vk::ImageLayout::GENERAL,
            Self::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        }
    }

    /// Get the access mask for this layout (as source).
    pub fn src_access_mask(self) -> vk::AccessFlags {
        match self {
            Self::Undefined => vk::AccessFlags::empty(),
            Self::General => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            Self::TransferSrc => vk::AccessFlags::TRANSFER_READ,
        }
    }

    /// Get the access mask for this layout (as destination).
    pub fn dst_access_mask(self) -> vk::AccessFlags {
        match self {
            Self::Undefined => vk::AccessFlags::empty(),
            Self::General => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            Self::TransferSrc => vk::AccessFlags::TRANSFER_READ,
        }
    }

    /// Get the pipeline stage for this layout (as source).
    pub fn src_stage(self) -> vk::PipelineStageFlags {
        match self {
            Self::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,
            Self::General => vk::PipelineStageFlags::COMPUTE_SHADER,
            Self::TransferSrc => vk::PipelineStageFlags::TRANSFER,
        }
    }

    /// Get the pipeline stage for this layout (as destination).
    pub fn dst_stage(self) -> vk::PipelineStageFlags {
        match self {
            Self::Undefined => vk::PipelineStageFlags::TOP_OF_PIPE,
            Self::General => vk::PipelineStageFlags::COMPUTE_SHADER,
            Self::TransferSrc => vk::PipelineStageFlags::TRANSFER,
        }
    }
}

/// Parameters for creating a [`GpuImage`].
#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub name: &'static str,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

/// A 2D GPU image with its view, memory and current layout.
pub struct GpuImage {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
    layout: ImageLayout,
    name: &'static str,
    destroyed: bool,
}

impl GpuImage {
    /// Create a 2D image with dedicated GPU memory and a default color view.
    pub fn new(ctx: &GpuContext, desc: &ImageDesc) -> RenderResult<Self> {
        let image_info = vk::ImageCreateInfo {
            image_type: vk::ImageType::TYPE_2D,
            extent: vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            format: desc.format,
            tiling: vk::ImageTiling::OPTIMAL,
            initial_layout: vk::ImageLayout::UNDEFINED,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };

        let image = unsafe { ctx.device.create_image(&image_info, None) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!(
                "Failed to create image '{}': {:?}",
                desc.name, e
            ))
        })?;

        let requirements = unsafe { ctx.device.get_image_memory_requirements(image) };

        let allocation = ctx
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: desc.name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { ctx.device.destroy_image(image, None) };
                RenderError::AllocationFailed(format!("image '{}': {}", desc.name, e))
            })?;

        unsafe {
            ctx.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!(
                "Failed to bind memory for image '{}': {:?}",
                desc.name, e
            ))
        })?;

        let view_info = vk::ImageViewCreateInfo {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: desc.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };

        let view = unsafe { ctx.device.create_image_view(&view_info, None) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!(
                "Failed to create view for image '{}': {:?}",
                desc.name, e
            ))
        })?;

        Ok(Self {
            image,
            view,
            allocation: Some(allocation),
            format: desc.format,
            extent: desc.extent,
            layout: ImageLayout::Undefined,
            name: desc.name,
            destroyed: false,
        })
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    /// Transition the image to `new_layout`, recording the barrier.
    ///
    /// Transitioning to the current layout records nothing.
    pub fn transition(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        new_layout: ImageLayout,
    ) {
        if self.layout == new_layout {
            return;
        }

        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(self.layout.src_access_mask())
            .dst_access_mask(new_layout.dst_access_mask())
            .old_layout(self.layout.to_vk())
            .new_layout(new_layout.to_vk())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.layout.src_stage(),
                new_layout.dst_stage(),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }

        self.layout = new_layout;
    }

    /// Destroy the view, image and free the allocation.
    ///
    /// The caller must ensure the GPU is idle. A second call is a no-op.
    pub fn destroy(&mut self, ctx: &GpuContext) {
        if self.destroyed {
            return;
        }

        unsafe {
            ctx.device.destroy_image_view(self.view, None);
            ctx.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            let _ = ctx.allocator.lock().free(allocation);
        }

        self.destroyed = true;
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }

        log::warn!(
            "GpuImage '{}' dropped without explicit destroy(). GPU memory has leaked.",
            self.name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_layout_to_vk() {
        assert_eq!(ImageLayout::Undefined.to_vk(), vk::ImageLayout::UNDEFINED);
        assert_eq!(ImageLayout::General.to_vk(), vk::ImageLayout::GENERAL);
        assert_eq!(
            ImageLayout::TransferSrc.to_vk(),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL
        );
    }

    #[test]
    fn test_undefined_has_no_access() {
        assert_eq!(
            ImageLayout::Undefined.src_access_mask(),
            vk::AccessFlags::empty()
        );
        assert_eq!(
            ImageLayout::Undefined.src_stage(),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
    }

    #[test]
    fn test_general_covers_compute_access() {
        let mask = ImageLayout::General.dst_access_mask();
        assert!(mask.contains(vk::AccessFlags::SHADER_READ));
        assert!(mask.contains(vk::AccessFlags::SHADER_WRITE));
        assert_eq!(
            ImageLayout::General.dst_stage(),
            vk::PipelineStageFlags::COMPUTE_SHADER
        );
    }

    #[test]
    fn test_transfer_src_access() {
        assert_eq!(
            ImageLayout::TransferSrc.dst_access_mask(),
            vk::AccessFlags::TRANSFER_READ
        );
        assert_eq!(
            ImageLayout::TransferSrc.dst_stage(),
            vk::PipelineStageFlags::TRANSFER
        );
    }
}
