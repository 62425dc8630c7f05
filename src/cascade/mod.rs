//! Radiance cascade passes and their per-pass parameters.

pub mod plan;
pub mod renderer;
pub mod settings;
pub mod shaders;

use bytemuck::{Pod, Zeroable};
use glam::{IVec2, Vec4};

use crate::cascade::settings::CascadeSettings;

/// Push constants of the draw-input pass. 32 bytes, fully padded.
///
/// A negative cursor encodes "no edit".
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BrushParams {
    pub cursor: IVec2,
    pub radius: u32,
    pub _pad: u32,
    pub color: Vec4,
}

impl BrushParams {
    /// The no-op brush; the shader returns without writing.
    pub fn none() -> Self {
        Self {
            cursor: IVec2::splat(-1),
            radius: 0,
            _pad: 0,
            color: Vec4::ZERO,
        }
    }
}

/// Push constants of the scene-clear pass. 16 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ClearParams {
    pub color: Vec4,
}

/// Push constants shared by the raymarch and merge passes. 32 bytes, fully
/// padded. `level` is the level being written.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CascadeParams {
    pub max_level: u32,
    pub vertical_probes: u32,
    pub radius: f32,
    pub radius_multiplier: f32,
    pub step_size: f32,
    pub attenuation: f32,
    pub level: u32,
    pub _pad: u32,
}

impl CascadeParams {
    pub fn new(settings: &CascadeSettings, level: u32) -> Self {
        Self {
            max_level: settings.max_level,
            vertical_probes: settings.vertical_probes,
            radius: settings.radius,
            radius_multiplier: settings.radius_multiplier,
            step_size: settings.step_size,
            attenuation: settings.attenuation,
            level,
            _pad: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_param_sizes_are_stable() {
        assert_eq!(size_of::<BrushParams>(), 32);
        assert_eq!(size_of::<ClearParams>(), 16);
        assert_eq!(size_of::<CascadeParams>(), 32);
    }

    #[test]
    fn test_brush_none_is_out_of_range() {
        let params = BrushParams::none();
        assert!(params.cursor.x < 0);
        assert!(params.cursor.y < 0);
    }

    #[test]
    fn test_cascade_params_carry_level() {
        let settings = CascadeSettings::default();
        let params = CascadeParams::new(&settings, 3);
        assert_eq!(params.level, 3);
        assert_eq!(params.max_level, settings.max_level);
        assert_eq!(params.attenuation, settings.attenuation);
    }
}
