//! The cascade renderer: resource ownership and frame recording.

use ash::vk;
use glam::{IVec2, Vec4};

use crate::app::{FrameContext, FrameInput, RenderStage};
use crate::cascade::plan::{FramePlan, PassKind};
use crate::cascade::settings::{CascadeResolution, CascadeSettings};
use crate::cascade::shaders;
use crate::cascade::{BrushParams, CascadeParams, ClearParams};
use crate::error::{RenderError, RenderResult};
use crate::gpu::image::{GpuImage, ImageDesc, ImageLayout};
use crate::gpu::pipeline::{BindingDesc, BindingKind, Pipeline, PipelineBuilder};
use crate::gpu::GpuContext;

const CASCADE_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

/// One cascade level: its image and the pipelines wired to it.
///
/// `merge` is `None` exactly at the top level, which has nothing above it
/// to fold in.
pub struct CascadeLevel {
    pub image: GpuImage,
    pub raymarch: Pipeline,
    pub merge: Option<Pipeline>,
}

/// Owns every GPU resource of the radiance cascade renderer and records its
/// passes each frame.
pub struct CascadeRenderer {
    ctx: GpuContext,
    output_extent: vk::Extent2D,
    linear_sampler: vk::Sampler,
    scene: GpuImage,
    display: GpuImage,
    draw_input: Pipeline,
    clear_scene: Pipeline,
    build_gi: Pipeline,
    final_pass: Pipeline,
    levels: Vec<CascadeLevel>,
    gi: Option<GpuImage>,
    settings: CascadeSettings,
    resolution: CascadeResolution,
    input: FrameInput,
    clear_requested: bool,
    destroyed: bool,
}

impl CascadeRenderer {
    /// Create the renderer at the given output resolution, with default
    /// cascade settings applied.
    pub fn new(ctx: GpuContext, output_extent: vk::Extent2D) -> RenderResult<Self> {
        let scene = GpuImage::new(
            &ctx,
            &ImageDesc {
                name: "scene",
                extent: output_extent,
                format: CASCADE_FORMAT,
                usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
            },
        )?;
        let display = GpuImage::new(
            &ctx,
            &ImageDesc {
                name: "display",
                extent: output_extent,
                format: CASCADE_FORMAT,
                usage: vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC,
            },
        )?;

        let linear_sampler = ctx.create_sampler(vk::Filter::LINEAR)?;

        let draw_input = build_pipeline(
            &ctx,
            shaders::DRAW_INPUT_SHADER,
            &[(0, BindingKind::StorageImage)],
            Some(std::mem::size_of::<BrushParams>() as u32),
        )?;
        draw_input.write_image_binding(
            0,
            0,
            BindingKind::StorageImage,
            scene.view(),
            vk::ImageLayout::GENERAL,
            None,
        )?;

        let clear_scene = build_pipeline(
            &ctx,
            shaders::CLEAR_SCENE_SHADER,
            &[(0, BindingKind::StorageImage)],
            Some(std::mem::size_of::<ClearParams>() as u32),
        )?;
        clear_scene.write_image_binding(
            0,
            0,
            BindingKind::StorageImage,
            scene.view(),
            vk::ImageLayout::GENERAL,
            None,
        )?;

        // GI-side bindings of these two are wired in apply_settings once the
        // cascade images exist
        let build_gi = build_pipeline(
            &ctx,
            shaders::BUILD_GI_SHADER,
            &[
                (0, BindingKind::SampledImage),
                (1, BindingKind::StorageImage),
            ],
            None,
        )?;

        let final_pass = build_pipeline(
            &ctx,
            shaders::FINAL_PASS_SHADER,
            &[
                (0, BindingKind::SampledImage),
                (1, BindingKind::SampledImage),
                (2, BindingKind::Sampler),
                (3, BindingKind::StorageImage),
            ],
            None,
        )?;
        final_pass.write_image_binding(
            0,
            0,
            BindingKind::SampledImage,
            scene.view(),
            vk::ImageLayout::GENERAL,
            None,
        )?;
        final_pass.write_image_binding(
            0,
            2,
            BindingKind::Sampler,
            vk::ImageView::null(),
            vk::ImageLayout::UNDEFINED,
            Some(linear_sampler),
        )?;
        final_pass.write_image_binding(
            0,
            3,
            BindingKind::StorageImage,
            display.view(),
            vk::ImageLayout::GENERAL,
            None,
        )?;

        let settings = CascadeSettings::default();
        let resolution = CascadeResolution::derive(&settings, output_extent);

        let mut renderer = Self {
            ctx,
            output_extent,
            linear_sampler,
            scene,
            display,
            draw_input,
            clear_scene,
            build_gi,
            final_pass,
            levels: Vec::new(),
            gi: None,
            settings,
            resolution,
            input: FrameInput::default(),
            clear_requested: true,
            destroyed: false,
        };
        renderer.apply_settings(settings)?;

        Ok(renderer)
    }

    pub fn settings(&self) -> &CascadeSettings {
        &self.settings
    }

    pub fn resolution(&self) -> &CascadeResolution {
        &self.resolution
    }

    /// Tear down and rebuild every per-level resource for new settings.
    ///
    /// Waits for the device to go idle first; the old images and pipelines
    /// are fully destroyed before any replacement is created. O(levels),
    /// only ever triggered by an explicit request.
    pub fn apply_settings(&mut self, settings: CascadeSettings) -> RenderResult<()> {
        settings.validate()?;
        self.ctx.wait_idle()?;

        for mut level in self.levels.drain(..) {
            level.raymarch.destroy()?;
            if let Some(mut merge) = level.merge.take() {
                merge.destroy()?;
            }
            level.image.destroy(&self.ctx);
        }
        if let Some(mut gi) = self.gi.take() {
            gi.destroy(&self.ctx);
        }

        let resolution = CascadeResolution::derive(&settings, self.output_extent);
        log::info!(
            "applying cascade settings: {} levels, cascade {}x{}, gi {}x{}",
            settings.max_level,
            resolution.cascade_extent.width,
            resolution.cascade_extent.height,
            resolution.gi_extent.width,
            resolution.gi_extent.height,
        );

        let mut levels = Vec::with_capacity(settings.max_level as usize);
        for _ in 0..settings.max_level {
            let image = GpuImage::new(
                &self.ctx,
                &ImageDesc {
                    name: "cascade",
                    extent: resolution.cascade_extent,
                    format: CASCADE_FORMAT,
                    usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
                },
            )?;

            let raymarch = build_pipeline(
                &self.ctx,
                shaders::RAYMARCH_SHADER,
                &[
                    (0, BindingKind::SampledImage),
                    (1, BindingKind::StorageImage),
                ],
                Some(std::mem::size_of::<CascadeParams>() as u32),
            )?;
            raymarch.write_image_binding(
                0,
                0,
                BindingKind::SampledImage,
                self.scene.view(),
                vk::ImageLayout::GENERAL,
                None,
            )?;
            raymarch.write_image_binding(
                0,
                1,
                BindingKind::StorageImage,
                image.view(),
                vk::ImageLayout::GENERAL,
                None,
            )?;

            levels.push(CascadeLevel {
                image,
                raymarch,
                merge: None,
            });
        }

        // Merges fold level i+1 into level i, in place on level i
        let views: Vec<vk::ImageView> = levels.iter().map(|l| l.image.view()).collect();
        for i in 0..settings.max_level.saturating_sub(1) as usize {
            let merge = build_pipeline(
                &self.ctx,
                shaders::MERGE_CASCADES_SHADER,
                &[
                    (0, BindingKind::SampledImage),
                    (1, BindingKind::SampledImage),
                    (2, BindingKind::StorageImage),
                ],
                Some(std::mem::size_of::<CascadeParams>() as u32),
            )?;
            merge.write_image_binding(
                0,
                0,
                BindingKind::SampledImage,
                views[i + 1],
                vk::ImageLayout::GENERAL,
                None,
            )?;
            merge.write_image_binding(
                0,
                1,
                BindingKind::SampledImage,
                views[i],
                vk::ImageLayout::GENERAL,
                None,
            )?;
            merge.write_image_binding(
                0,
                2,
                BindingKind::StorageImage,
                views[i],
                vk::ImageLayout::GENERAL,
                None,
            )?;
            levels[i].merge = Some(merge);
        }

        let gi = GpuImage::new(
            &self.ctx,
            &ImageDesc {
                name: "gi",
                extent: resolution.gi_extent,
                format: CASCADE_FORMAT,
                usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE,
            },
        )?;
        self.build_gi.write_image_binding(
            0,
            0,
            BindingKind::SampledImage,
            views[0],
            vk::ImageLayout::GENERAL,
            None,
        )?;
        self.build_gi.write_image_binding(
            0,
            1,
            BindingKind::StorageImage,
            gi.view(),
            vk::ImageLayout::GENERAL,
            None,
        )?;
        self.final_pass.write_image_binding(
            0,
            1,
            BindingKind::SampledImage,
            gi.view(),
            vk::ImageLayout::GENERAL,
            None,
        )?;

        self.levels = levels;
        self.gi = Some(gi);
        self.settings = settings;
        self.resolution = resolution;
        Ok(())
    }

    fn brush_params(&self) -> BrushParams {
        match self.input.cursor {
            Some((x, y)) => BrushParams {
                cursor: IVec2::new(x as i32, y as i32),
                radius: u32::from(self.input.brush_radius),
                _pad: 0,
                color: Vec4::new(
                    f32::from(self.input.brush_color[0]) / 255.0,
                    f32::from(self.input.brush_color[1]) / 255.0,
                    f32::from(self.input.brush_color[2]) / 255.0,
                    1.0,
                ),
            },
            None => BrushParams::none(),
        }
    }

    /// Release every owned GPU resource. Idempotent.
    pub fn destroy(&mut self) -> RenderResult<()> {
        if self.destroyed {
            return Ok(());
        }
        self.ctx.wait_idle()?;

        for mut level in self.levels.drain(..) {
            level.raymarch.destroy()?;
            if let Some(mut merge) = level.merge.take() {
                merge.destroy()?;
            }
            level.image.destroy(&self.ctx);
        }
        if let Some(mut gi) = self.gi.take() {
            gi.destroy(&self.ctx);
        }

        self.draw_input.destroy()?;
        self.clear_scene.destroy()?;
        self.build_gi.destroy()?;
        self.final_pass.destroy()?;
        self.scene.destroy(&self.ctx);
        self.display.destroy(&self.ctx);

        unsafe {
            self.ctx.device.destroy_sampler(self.linear_sampler, None);
        }

        self.destroyed = true;
        Ok(())
    }
}

impl RenderStage for CascadeRenderer {
    fn update(&mut self, input: &FrameInput) {
        self.input = *input;
    }

    fn record_compute(&mut self, frame: &FrameContext) -> RenderResult<()> {
        let cmd = frame.cmd;
        let device = self.ctx.device.clone();

        if frame.first_frame {
            self.clear_requested = true;
        }
        let clear = self.clear_requested || self.input.clear_scene;
        self.clear_requested = false;

        // Every compute target lives in General while being dispatched
        // against. Freshly recreated images start in Undefined, so these are
        // real transitions after apply_settings and no-ops otherwise.
        self.scene.transition(&device, cmd, ImageLayout::General);
        self.display.transition(&device, cmd, ImageLayout::General);
        for level in &mut self.levels {
            level.image.transition(&device, cmd, ImageLayout::General);
        }
        if let Some(gi) = self.gi.as_mut() {
            gi.transition(&device, cmd, ImageLayout::General);
        }

        let plan = FramePlan::build(&self.settings, self.output_extent, clear);
        for step in &plan.steps {
            if step.barrier_before {
                self.ctx.compute_barrier(cmd);
            }

            match step.kind {
                PassKind::DrawInput => {
                    let params = self.brush_params();
                    self.draw_input.bind(cmd)?;
                    self.draw_input.set_push_constants(
                        cmd,
                        vk::ShaderStageFlags::COMPUTE,
                        &params,
                    )?;
                    self.draw_input.dispatch(cmd, step.groups)?;
                }
                PassKind::ClearScene => {
                    let params = ClearParams { color: Vec4::ZERO };
                    self.clear_scene.bind(cmd)?;
                    self.clear_scene.set_push_constants(
                        cmd,
                        vk::ShaderStageFlags::COMPUTE,
                        &params,
                    )?;
                    self.clear_scene.dispatch(cmd, step.groups)?;
                }
                PassKind::Raymarch { level } => {
                    let params = CascadeParams::new(&self.settings, level);
                    let pipeline = &self.levels[level as usize].raymarch;
                    pipeline.bind(cmd)?;
                    pipeline.set_push_constants(cmd, vk::ShaderStageFlags::COMPUTE, &params)?;
                    pipeline.dispatch(cmd, step.groups)?;
                }
                PassKind::MergeCascades { output_level } => {
                    let params = CascadeParams::new(&self.settings, output_level);
                    let pipeline = self.levels[output_level as usize]
                        .merge
                        .as_ref()
                        .ok_or_else(|| {
                            RenderError::InvalidState(format!(
                                "no merge pipeline for level {}",
                                output_level
                            ))
                        })?;
                    pipeline.bind(cmd)?;
                    pipeline.set_push_constants(cmd, vk::ShaderStageFlags::COMPUTE, &params)?;
                    pipeline.dispatch(cmd, step.groups)?;
                }
                PassKind::BuildGi => {
                    self.build_gi.bind(cmd)?;
                    self.build_gi.dispatch(cmd, step.groups)?;
                }
                PassKind::FinalPass => {
                    self.final_pass.bind(cmd)?;
                    self.final_pass.dispatch(cmd, step.groups)?;
                }
            }
        }

        Ok(())
    }

    fn record_composite(&mut self, frame: &FrameContext) -> RenderResult<()> {
        let device = self.ctx.device.clone();
        self.display
            .transition(&device, frame.cmd, ImageLayout::TransferSrc);

        let src = self.display.extent();
        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = vk::ImageBlit::default()
            .src_subresource(subresource)
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: src.width as i32,
                    y: src.height as i32,
                    z: 1,
                },
            ])
            .dst_subresource(subresource)
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: frame.target_extent.width as i32,
                    y: frame.target_extent.height as i32,
                    z: 1,
                },
            ]);

        unsafe {
            device.cmd_blit_image(
                frame.cmd,
                self.display.image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                frame.target_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                vk::Filter::LINEAR,
            );
        }

        Ok(())
    }

    fn request_settings(&mut self, settings: CascadeSettings) -> RenderResult<()> {
        self.apply_settings(settings)
    }

    fn shutdown(&mut self) -> RenderResult<()> {
        self.destroy()
    }
}

impl Drop for CascadeRenderer {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }

        log::warn!("CascadeRenderer dropped without explicit shutdown(). GPU resources leaked.");
    }
}

fn build_pipeline(
    ctx: &GpuContext,
    shader: &str,
    bindings: &[(u32, BindingKind)],
    push_size: Option<u32>,
) -> RenderResult<Pipeline> {
    let mut builder = PipelineBuilder::new(ctx.device.clone());
    for (binding, kind) in bindings {
        builder.add_binding(0, BindingDesc::compute(*binding, *kind));
    }
    if let Some(size) = push_size {
        builder.set_push_constant_range(vk::ShaderStageFlags::COMPUTE, size);
    }
    builder.set_shader_wgsl(shader, "main");
    builder.build()
}
