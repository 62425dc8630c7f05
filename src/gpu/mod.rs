//! Device context and shared GPU helpers.

pub mod image;
pub mod pipeline;
pub mod shader;

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;

use crate::error::{RenderError, RenderResult};

/// Shared handle to the Vulkan device and memory allocator.
///
/// The device and allocator are created by the presentation layer and shared
/// with the renderer. Cloning is cheap; `ash::Device` is internally a
/// function-pointer table.
#[derive(Clone)]
pub struct GpuContext {
    pub device: ash::Device,
    pub allocator: Arc<Mutex<Allocator>>,
}

impl GpuContext {
    pub fn new(device: ash::Device, allocator: Arc<Mutex<Allocator>>) -> Self {
        Self { device, allocator }
    }

    /// Block until the device is idle.
    ///
    /// This is the single heavyweight sync point of the renderer and is only
    /// used on reconfiguration and shutdown, never per-frame.
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(RenderError::from)
    }

    /// Record a full compute-to-compute execution and memory barrier.
    pub fn compute_barrier(&self, cmd: vk::CommandBuffer) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE);

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    /// Create a 2D sampler with clamp-to-edge addressing.
    pub fn create_sampler(&self, filter: vk::Filter) -> RenderResult<vk::Sampler> {
        let info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);

        unsafe { self.device.create_sampler(&info, None) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to create sampler: {:?}", e))
        })
    }
}
