//! Compute pipeline declaration, construction and recording.
//!
//! Pipelines are described by a [`PipelineDesc`], a plain-data declaration of
//! descriptor sets, bindings and push-constant ranges that can be validated
//! without a device. [`PipelineBuilder`] turns one declaration into one
//! [`Pipeline`] and is consumed by [`PipelineBuilder::build`], so a builder
//! can never be accidentally reused with stale state.

use std::collections::BTreeMap;
use std::ffi::CString;

use ash::vk;
use bytemuck::Pod;

use crate::error::{RenderError, RenderResult};
use crate::gpu::shader;

/// Kind of pipeline to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineKind {
    #[default]
    Compute,
    /// Declared for completeness; building one fails with `NotImplemented`.
    Graphics,
}

/// Descriptor kinds used by the renderer.
///
/// Sampled images and samplers are separate kinds because the WGSL pipeline
/// emits separate bindings for textures and samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    SampledImage,
    StorageImage,
    CombinedImageSampler,
    Sampler,
}

impl BindingKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::Sampler => vk::DescriptorType::SAMPLER,
        }
    }
}

/// A single binding slot within a descriptor set.
#[derive(Debug, Clone, Copy)]
pub struct BindingDesc {
    pub binding: u32,
    pub kind: BindingKind,
    pub count: u32,
    pub visibility: vk::ShaderStageFlags,
}

impl BindingDesc {
    /// Compute-visible binding with a descriptor count of one.
    pub fn compute(binding: u32, kind: BindingKind) -> Self {
        Self {
            binding,
            kind,
            count: 1,
            visibility: vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// Plain-data pipeline declaration.
///
/// Sets are keyed by set index; iteration order is ascending by construction.
#[derive(Debug, Clone, Default)]
pub struct PipelineDesc {
    pub kind: PipelineKind,
    pub sets: BTreeMap<u32, Vec<BindingDesc>>,
    /// Push-constant ranges as (stage mask, byte size). At most one range
    /// per distinct stage mask; re-declaring replaces.
    pub push_ranges: Vec<(vk::ShaderStageFlags, u32)>,
}

impl PipelineDesc {
    /// Add a binding to a set.
    pub fn add_binding(&mut self, set: u32, binding: BindingDesc) {
        self.sets.entry(set).or_default().push(binding);
    }

    /// Declare a push-constant range, replacing any range with the same
    /// stage mask.
    pub fn set_push_constant_range(&mut self, stages: vk::ShaderStageFlags, size: u32) {
        if let Some(entry) = self.push_ranges.iter_mut().find(|(s, _)| *s == stages) {
            entry.1 = size;
        } else {
            self.push_ranges.push((stages, size));
        }
    }

    /// Look up the declared push-constant size for a stage mask.
    pub fn push_range_size(&self, stages: vk::ShaderStageFlags) -> Option<u32> {
        self.push_ranges
            .iter()
            .find(|(s, _)| *s == stages)
            .map(|(_, size)| *size)
    }

    /// Check the declaration for structural errors.
    pub fn validate(&self) -> RenderResult<()> {
        if self.kind == PipelineKind::Graphics {
            return Err(RenderError::NotImplemented(
                "graphics pipelines".to_string(),
            ));
        }

        for (set, bindings) in &self.sets {
            for (i, a) in bindings.iter().enumerate() {
                if bindings[i + 1..].iter().any(|b| b.binding == a.binding) {
                    return Err(RenderError::InvalidState(format!(
                        "duplicate binding {} in set {}",
                        a.binding, set
                    )));
                }
            }
        }

        for (stages, size) in &self.push_ranges {
            if *size == 0 || stages.is_empty() {
                return Err(RenderError::InvalidState(
                    "empty push-constant range".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Exact per-type descriptor counts across all sets.
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        let mut counts: BTreeMap<vk::DescriptorType, u32> = BTreeMap::new();
        for bindings in self.sets.values() {
            for binding in bindings {
                *counts.entry(binding.kind.descriptor_type()).or_default() += binding.count;
            }
        }
        counts
            .into_iter()
            .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count,
            })
            .collect()
    }

    /// Number of descriptor sets the pipeline will allocate.
    pub fn max_sets(&self) -> u32 {
        self.sets.len() as u32
    }
}

enum StageSource {
    Wgsl { source: String, entry: String },
    Module { module: vk::ShaderModule, entry: String },
}

/// One-shot builder for a [`Pipeline`].
///
/// `build` consumes the builder; every pipeline starts from a fresh
/// declaration.
pub struct PipelineBuilder {
    device: ash::Device,
    desc: PipelineDesc,
    stage: Option<StageSource>,
}

impl PipelineBuilder {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            desc: PipelineDesc::default(),
            stage: None,
        }
    }

    pub fn set_kind(&mut self, kind: PipelineKind) -> &mut Self {
        self.desc.kind = kind;
        self
    }

    pub fn add_binding(&mut self, set: u32, binding: BindingDesc) -> &mut Self {
        self.desc.add_binding(set, binding);
        self
    }

    pub fn set_push_constant_range(
        &mut self,
        stages: vk::ShaderStageFlags,
        size: u32,
    ) -> &mut Self {
        self.desc.set_push_constant_range(stages, size);
        self
    }

    /// Set the compute stage from WGSL source. The shader module is owned by
    /// the builder and destroyed once the pipeline exists.
    pub fn set_shader_wgsl(&mut self, source: &str, entry: &str) -> &mut Self {
        self.stage = Some(StageSource::Wgsl {
            source: source.to_string(),
            entry: entry.to_string(),
        });
        self
    }

    /// Set the compute stage from an externally owned shader module. The
    /// builder never destroys it.
    pub fn set_shader_module(&mut self, module: vk::ShaderModule, entry: &str) -> &mut Self {
        self.stage = Some(StageSource::Module {
            module,
            entry: entry.to_string(),
        });
        self
    }

    /// Build the pipeline, consuming the builder.
    pub fn build(self) -> RenderResult<Pipeline> {
        self.desc.validate()?;

        let stage = self
            .stage
            .ok_or_else(|| RenderError::InvalidState("no compute shader stage set".to_string()))?;

        let (module, entry, owned_module) = match stage {
            StageSource::Wgsl { source, entry } => {
                let spv = shader::compile_wgsl(&source, &entry)?;
                let module = shader::create_shader_module(&self.device, &spv)?;
                (module, entry, true)
            }
            StageSource::Module { module, entry } => (module, entry, false),
        };

        let result = Self::build_inner(&self.device, &self.desc, module, &entry);

        if owned_module {
            unsafe { self.device.destroy_shader_module(module, None) };
        }

        result.map(|(pipeline, layout, set_layouts, pool, sets)| Pipeline {
            device: self.device,
            desc: self.desc,
            pipeline,
            layout,
            set_layouts,
            pool,
            sets,
            state: PipelineState::Valid,
        })
    }

    #[allow(clippy::type_complexity)]
    fn build_inner(
        device: &ash::Device,
        desc: &PipelineDesc,
        module: vk::ShaderModule,
        entry: &str,
    ) -> RenderResult<(
        vk::Pipeline,
        vk::PipelineLayout,
        Vec<vk::DescriptorSetLayout>,
        vk::DescriptorPool,
        Vec<(u32, vk::DescriptorSet)>,
    )> {
        // Descriptor set layouts, ascending set index
        let mut set_layouts = Vec::with_capacity(desc.sets.len());
        for bindings in desc.sets.values() {
            let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
                .iter()
                .map(|b| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(b.binding)
                        .descriptor_type(b.kind.descriptor_type())
                        .descriptor_count(b.count)
                        .stage_flags(b.visibility)
                })
                .collect();

            let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
            let layout = unsafe { device.create_descriptor_set_layout(&create_info, None) }
                .map_err(|e| {
                    RenderError::ResourceCreationFailed(format!(
                        "Failed to create descriptor set layout: {:?}",
                        e
                    ))
                })?;
            set_layouts.push(layout);
        }

        // A pool sized exactly for this pipeline, never shared
        let pool = if set_layouts.is_empty() {
            vk::DescriptorPool::null()
        } else {
            let pool_sizes = desc.pool_sizes();
            let pool_info = vk::DescriptorPoolCreateInfo::default()
                .max_sets(desc.max_sets())
                .pool_sizes(&pool_sizes);
            unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(|e| {
                RenderError::ResourceCreationFailed(format!(
                    "Failed to create descriptor pool: {:?}",
                    e
                ))
            })?
        };

        let mut sets = Vec::with_capacity(set_layouts.len());
        for (set_index, layout) in desc.sets.keys().zip(set_layouts.iter()) {
            let layouts = [*layout];
            let alloc_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(pool)
                .set_layouts(&layouts);
            let allocated =
                unsafe { device.allocate_descriptor_sets(&alloc_info) }.map_err(|e| {
                    RenderError::ResourceCreationFailed(format!(
                        "Failed to allocate descriptor set: {:?}",
                        e
                    ))
                })?;
            sets.push((*set_index, allocated[0]));
        }

        let push_ranges: Vec<vk::PushConstantRange> = desc
            .push_ranges
            .iter()
            .map(|(stages, size)| vk::PushConstantRange {
                stage_flags: *stages,
                offset: 0,
                size: *size,
            })
            .collect();

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!(
                "Failed to create pipeline layout: {:?}",
                e
            ))
        })?;

        let entry_c = CString::new(entry).map_err(|e| {
            RenderError::InvalidState(format!("entry point name contains null byte: {e}"))
        })?;
        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry_c);

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage_info)
            .layout(layout);

        let pipelines = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| {
            RenderError::ResourceCreationFailed(format!(
                "Failed to create compute pipeline: {:?}",
                e
            ))
        })?;

        Ok((pipelines[0], layout, set_layouts, pool, sets))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Valid,
    Destroyed,
}

/// A wired compute pipeline with its descriptor sets.
pub struct Pipeline {
    device: ash::Device,
    desc: PipelineDesc,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    pool: vk::DescriptorPool,
    /// Descriptor sets paired with their set index, ascending.
    sets: Vec<(u32, vk::DescriptorSet)>,
    state: PipelineState,
}

impl Pipeline {
    fn ensure_valid(&self) -> RenderResult<()> {
        if self.state != PipelineState::Valid {
            return Err(RenderError::InvalidState(
                "pipeline has been destroyed".to_string(),
            ));
        }
        Ok(())
    }

    /// Bind the pipeline and all its descriptor sets, ascending set index.
    pub fn bind(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        self.ensure_valid()?;

        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            for (set_index, set) in &self.sets {
                self.device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::COMPUTE,
                    self.layout,
                    *set_index,
                    &[*set],
                    &[],
                );
            }
        }
        Ok(())
    }

    /// Repoint an image binding at a new view.
    ///
    /// Takes effect for command buffers recorded afterwards. Rewiring sets
    /// referenced by in-flight command buffers requires the caller to wait
    /// for the device first.
    pub fn write_image_binding(
        &self,
        set: u32,
        binding: u32,
        kind: BindingKind,
        view: vk::ImageView,
        layout: vk::ImageLayout,
        sampler: Option<vk::Sampler>,
    ) -> RenderResult<()> {
        self.ensure_valid()?;

        let (_, descriptor_set) = self
            .sets
            .iter()
            .find(|(i, _)| *i == set)
            .ok_or_else(|| RenderError::InvalidState(format!("no descriptor set {}", set)))?;

        let image_info = vk::DescriptorImageInfo {
            sampler: sampler.unwrap_or_default(),
            image_view: view,
            image_layout: layout,
        };
        let image_infos = [image_info];

        let write = vk::WriteDescriptorSet::default()
            .dst_set(*descriptor_set)
            .dst_binding(binding)
            .descriptor_type(kind.descriptor_type())
            .image_info(&image_infos);

        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    /// Push constants for a declared stage mask. The value must fit within
    /// the declared range.
    pub fn set_push_constants<T: Pod>(
        &self,
        cmd: vk::CommandBuffer,
        stages: vk::ShaderStageFlags,
        value: &T,
    ) -> RenderResult<()> {
        self.ensure_valid()?;

        let declared = self.desc.push_range_size(stages).ok_or_else(|| {
            RenderError::InvalidState(format!("no push-constant range for stages {:?}", stages))
        })?;
        let bytes = bytemuck::bytes_of(value);
        if bytes.len() as u32 > declared {
            return Err(RenderError::InvalidState(format!(
                "push-constant value of {} bytes exceeds declared range of {} bytes",
                bytes.len(),
                declared
            )));
        }

        unsafe {
            self.device
                .cmd_push_constants(cmd, self.layout, stages, 0, bytes)
        };
        Ok(())
    }

    /// Record a dispatch.
    pub fn dispatch(&self, cmd: vk::CommandBuffer, groups: [u32; 3]) -> RenderResult<()> {
        self.ensure_valid()?;
        unsafe {
            self.device
                .cmd_dispatch(cmd, groups[0], groups[1], groups[2])
        };
        Ok(())
    }

    /// Destroy all owned Vulkan objects.
    ///
    /// The caller must ensure the GPU is idle. A second call fails with
    /// `InvalidState`.
    pub fn destroy(&mut self) -> RenderResult<()> {
        self.ensure_valid()?;

        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
            for layout in self.set_layouts.drain(..) {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
            if self.pool != vk::DescriptorPool::null() {
                self.device.destroy_descriptor_pool(self.pool, None);
            }
        }

        self.sets.clear();
        self.state = PipelineState::Destroyed;
        Ok(())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.state == PipelineState::Destroyed {
            return;
        }

        log::warn!("Pipeline dropped without explicit destroy(). Vulkan objects have leaked.");
    }
}

/// Workgroup count covering `extent` with the given workgroup size.
pub fn group_count(extent: u32, local_size: u32) -> u32 {
    (extent + local_size - 1) / local_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graphics_kind_not_implemented() {
        let desc = PipelineDesc {
            kind: PipelineKind::Graphics,
            ..Default::default()
        };
        assert!(matches!(
            desc.validate(),
            Err(RenderError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let mut desc = PipelineDesc::default();
        desc.add_binding(0, BindingDesc::compute(0, BindingKind::StorageImage));
        desc.add_binding(0, BindingDesc::compute(0, BindingKind::SampledImage));
        assert!(matches!(desc.validate(), Err(RenderError::InvalidState(_))));
    }

    #[test]
    fn test_same_binding_in_different_sets_ok() {
        let mut desc = PipelineDesc::default();
        desc.add_binding(0, BindingDesc::compute(0, BindingKind::StorageImage));
        desc.add_binding(1, BindingDesc::compute(0, BindingKind::SampledImage));
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_pool_sizes_exact() {
        let mut desc = PipelineDesc::default();
        desc.add_binding(0, BindingDesc::compute(0, BindingKind::SampledImage));
        desc.add_binding(0, BindingDesc::compute(1, BindingKind::StorageImage));
        desc.add_binding(1, BindingDesc::compute(0, BindingKind::StorageImage));
        desc.add_binding(1, BindingDesc::compute(1, BindingKind::Sampler));

        let sizes = desc.pool_sizes();
        let get = |ty: vk::DescriptorType| {
            sizes
                .iter()
                .find(|s| s.ty == ty)
                .map(|s| s.descriptor_count)
        };
        assert_eq!(get(vk::DescriptorType::SAMPLED_IMAGE), Some(1));
        assert_eq!(get(vk::DescriptorType::STORAGE_IMAGE), Some(2));
        assert_eq!(get(vk::DescriptorType::SAMPLER), Some(1));
        assert_eq!(get(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), None);
        assert_eq!(desc.max_sets(), 2);
    }

    #[test]
    fn test_sets_iterate_ascending() {
        let mut desc = PipelineDesc::default();
        desc.add_binding(2, BindingDesc::compute(0, BindingKind::StorageImage));
        desc.add_binding(0, BindingDesc::compute(0, BindingKind::StorageImage));
        desc.add_binding(1, BindingDesc::compute(0, BindingKind::StorageImage));

        let indices: Vec<u32> = desc.sets.keys().copied().collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_push_range_replace() {
        let mut desc = PipelineDesc::default();
        desc.set_push_constant_range(vk::ShaderStageFlags::COMPUTE, 16);
        desc.set_push_constant_range(vk::ShaderStageFlags::COMPUTE, 32);
        assert_eq!(desc.push_ranges.len(), 1);
        assert_eq!(
            desc.push_range_size(vk::ShaderStageFlags::COMPUTE),
            Some(32)
        );
    }

    #[test]
    fn test_empty_push_range_rejected() {
        let mut desc = PipelineDesc::default();
        desc.set_push_constant_range(vk::ShaderStageFlags::COMPUTE, 0);
        assert!(matches!(desc.validate(), Err(RenderError::InvalidState(_))));
    }

    #[test]
    fn test_group_count() {
        assert_eq!(group_count(1920, 8), 240);
        assert_eq!(group_count(1080, 8), 135);
        assert_eq!(group_count(1, 16), 1);
        assert_eq!(group_count(16, 16), 1);
        assert_eq!(group_count(17, 16), 2);
    }
}
