//! Per-frame pass sequence.
//!
//! [`FramePlan`] is a plain-data description of the compute passes of one
//! frame: which pass runs, with how many workgroups, and whether an
//! execution barrier must precede it. The renderer replays the plan into a
//! command buffer; tests inspect it directly.

use ash::vk;

use crate::cascade::settings::{CascadeResolution, CascadeSettings};
use crate::gpu::pipeline::group_count;

/// Workgroup edge for full-resolution passes.
pub const LOCAL_SIZE: u32 = 8;
/// Workgroup edge for the GI gather pass.
pub const LOCAL_SIZE_GI: u32 = 16;

/// A compute pass of the cascade frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Stamp pending brush input into the scene texture.
    DrawInput,
    /// Fill the scene texture with the clear color.
    ClearScene,
    /// Gather radiance intervals for one cascade level.
    Raymarch { level: u32 },
    /// Fold level `output_level + 1` into level `output_level`.
    MergeCascades { output_level: u32 },
    /// Average level-0 probe directions into the GI texture.
    BuildGi,
    /// Composite scene and GI into the display texture.
    FinalPass,
}

/// One step of the frame: a pass, its dispatch size and barrier requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassStep {
    pub kind: PassKind,
    pub groups: [u32; 3],
    pub barrier_before: bool,
}

/// The ordered pass sequence of a single frame.
#[derive(Debug, Clone)]
pub struct FramePlan {
    pub steps: Vec<PassStep>,
}

impl FramePlan {
    /// Build the pass sequence for one frame.
    ///
    /// The order is fixed: draw input, optional scene clear, raymarch every
    /// level, merge top-down, gather GI, composite. Raymarch levels are
    /// independent and need no barriers between them; every merge reads the
    /// previous merge's output and is fenced individually.
    pub fn build(settings: &CascadeSettings, output: vk::Extent2D, clear_scene: bool) -> Self {
        let res = CascadeResolution::derive(settings, output);
        let output_groups = [
            group_count(output.width, LOCAL_SIZE),
            group_count(output.height, LOCAL_SIZE),
            1,
        ];
        let cascade_groups = [
            group_count(res.cascade_extent.width, LOCAL_SIZE),
            group_count(res.cascade_extent.height, LOCAL_SIZE),
            1,
        ];
        let gi_groups = [
            group_count(res.gi_extent.width, LOCAL_SIZE_GI),
            group_count(res.gi_extent.height, LOCAL_SIZE_GI),
            1,
        ];

        let mut steps = Vec::new();

        steps.push(PassStep {
            kind: PassKind::DrawInput,
            groups: output_groups,
            barrier_before: false,
        });

        if clear_scene {
            steps.push(PassStep {
                kind: PassKind::ClearScene,
                groups: output_groups,
                barrier_before: true,
            });
        }

        for level in 0..settings.max_level {
            steps.push(PassStep {
                kind: PassKind::Raymarch { level },
                groups: cascade_groups,
                // Fence the scene writes once; levels do not read each other
                barrier_before: level == 0,
            });
        }

        for output_level in (0..settings.max_level.saturating_sub(1)).rev() {
            steps.push(PassStep {
                kind: PassKind::MergeCascades { output_level },
                groups: cascade_groups,
                barrier_before: true,
            });
        }

        steps.push(PassStep {
            kind: PassKind::BuildGi,
            groups: gi_groups,
            barrier_before: true,
        });

        steps.push(PassStep {
            kind: PassKind::FinalPass,
            groups: output_groups,
            barrier_before: true,
        });

        Self { steps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_level: u32) -> CascadeSettings {
        CascadeSettings {
            max_level,
            ..Default::default()
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_pass_order_five_levels() {
        let plan = FramePlan::build(&settings(5), extent(1920, 1080), false);
        let kinds: Vec<PassKind> = plan.steps.iter().map(|s| s.kind).collect();

        assert_eq!(
            kinds,
            vec![
                PassKind::DrawInput,
                PassKind::Raymarch { level: 0 },
                PassKind::Raymarch { level: 1 },
                PassKind::Raymarch { level: 2 },
                PassKind::Raymarch { level: 3 },
                PassKind::Raymarch { level: 4 },
                PassKind::MergeCascades { output_level: 3 },
                PassKind::MergeCascades { output_level: 2 },
                PassKind::MergeCascades { output_level: 1 },
                PassKind::MergeCascades { output_level: 0 },
                PassKind::BuildGi,
                PassKind::FinalPass,
            ]
        );
    }

    #[test]
    fn test_single_level_has_no_merges() {
        let plan = FramePlan::build(&settings(1), extent(800, 600), false);
        let merges = plan
            .steps
            .iter()
            .filter(|s| matches!(s.kind, PassKind::MergeCascades { .. }))
            .count();
        let raymarches = plan
            .steps
            .iter()
            .filter(|s| matches!(s.kind, PassKind::Raymarch { .. }))
            .count();

        assert_eq!(merges, 0);
        assert_eq!(raymarches, 1);
    }

    #[test]
    fn test_clear_scene_inserted_after_draw() {
        let plan = FramePlan::build(&settings(3), extent(800, 600), true);
        assert_eq!(plan.steps[0].kind, PassKind::DrawInput);
        assert_eq!(plan.steps[1].kind, PassKind::ClearScene);
        assert!(plan.steps[1].barrier_before);

        let plan = FramePlan::build(&settings(3), extent(800, 600), false);
        assert!(!plan.steps.iter().any(|s| s.kind == PassKind::ClearScene));
    }

    #[test]
    fn test_barrier_placement() {
        let plan = FramePlan::build(&settings(4), extent(800, 600), false);

        for step in &plan.steps {
            match step.kind {
                PassKind::DrawInput => assert!(!step.barrier_before),
                PassKind::Raymarch { level } => {
                    assert_eq!(step.barrier_before, level == 0)
                }
                PassKind::MergeCascades { .. } | PassKind::BuildGi | PassKind::FinalPass => {
                    assert!(step.barrier_before)
                }
                PassKind::ClearScene => unreachable!(),
            }
        }
    }

    #[test]
    fn test_output_resolution_groups() {
        let plan = FramePlan::build(&settings(8), extent(1920, 1080), false);
        assert_eq!(plan.steps[0].groups, [240, 135, 1]);

        let last = plan.steps.last().unwrap();
        assert_eq!(last.kind, PassKind::FinalPass);
        assert_eq!(last.groups, [240, 135, 1]);
    }

    #[test]
    fn test_gi_groups_use_half_resolution() {
        let s = settings(8);
        let out = extent(1920, 1080);
        let res = CascadeResolution::derive(&s, out);
        let plan = FramePlan::build(&s, out, false);

        let gi = plan
            .steps
            .iter()
            .find(|s| s.kind == PassKind::BuildGi)
            .unwrap();
        assert_eq!(
            gi.groups,
            [
                group_count(res.gi_extent.width, LOCAL_SIZE_GI),
                group_count(res.gi_extent.height, LOCAL_SIZE_GI),
                1
            ]
        );
        // 1024 x 512 at 16 x 16
        assert_eq!(gi.groups, [64, 32, 1]);
    }
}
