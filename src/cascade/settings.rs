//! Cascade configuration and resolution derivation.

use ash::vk;

use crate::error::{RenderError, RenderResult};

/// Upper bound on the number of cascade levels.
pub const MAX_CASCADE_LEVEL: u32 = 10;

/// User-facing cascade configuration.
///
/// Applying new settings is a heavyweight operation that recreates every
/// per-level resource; see `CascadeRenderer::apply_settings`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeSettings {
    /// Number of cascade levels.
    pub max_level: u32,
    /// Vertical probe count at the highest level.
    pub vertical_probes: u32,
    /// Base ray interval length in UV space.
    pub radius: f32,
    /// Per-level growth factor of the ray interval.
    pub radius_multiplier: f32,
    /// Raymarch step length in UV space.
    pub step_size: f32,
    /// Exponential falloff applied over ray distance.
    pub attenuation: f32,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            max_level: 8,
            vertical_probes: 4,
            radius: 0.01,
            radius_multiplier: 1.5,
            step_size: 0.01,
            attenuation: 100.0,
        }
    }
}

impl CascadeSettings {
    /// Check every field against its accepted range.
    pub fn validate(&self) -> RenderResult<()> {
        if self.max_level < 1 || self.max_level > MAX_CASCADE_LEVEL {
            return Err(RenderError::InvalidSettings(format!(
                "max_level {} outside 1..={}",
                self.max_level, MAX_CASCADE_LEVEL
            )));
        }
        if self.vertical_probes < 1 || self.vertical_probes > 10 {
            return Err(RenderError::InvalidSettings(format!(
                "vertical_probes {} outside 1..=10",
                self.vertical_probes
            )));
        }
        if !(0.001..=0.5).contains(&self.radius) {
            return Err(RenderError::InvalidSettings(format!(
                "radius {} outside 0.001..=0.5",
                self.radius
            )));
        }
        if !(0.1..=10.0).contains(&self.radius_multiplier) {
            return Err(RenderError::InvalidSettings(format!(
                "radius_multiplier {} outside 0.1..=10.0",
                self.radius_multiplier
            )));
        }
        if !(0.001..=0.1).contains(&self.step_size) {
            return Err(RenderError::InvalidSettings(format!(
                "step_size {} outside 0.001..=0.1",
                self.step_size
            )));
        }
        if !(0.1..=100.0).contains(&self.attenuation) {
            return Err(RenderError::InvalidSettings(format!(
                "attenuation {} outside 0.1..=100.0",
                self.attenuation
            )));
        }
        Ok(())
    }
}

/// Image resolutions derived from settings and the output extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeResolution {
    /// Directions per probe axis at the highest level, `2^max_level`.
    pub probe_resolution: u32,
    /// Horizontal probe count at the highest level.
    pub horizontal_probes: u32,
    /// Vertical probe count at the highest level.
    pub vertical_probes: u32,
    /// Extent of every cascade image.
    pub cascade_extent: vk::Extent2D,
    /// Extent of the GI image, half the cascade extent.
    pub gi_extent: vk::Extent2D,
}

impl CascadeResolution {
    /// Derive all extents for the given settings and output resolution.
    pub fn derive(settings: &CascadeSettings, output: vk::Extent2D) -> Self {
        let probe_resolution = 1u32 << settings.max_level;
        let aspect = (output.width + output.height - 1) / output.height;
        let horizontal_probes = aspect * settings.vertical_probes;

        let cascade_extent = vk::Extent2D {
            width: horizontal_probes * probe_resolution,
            height: settings.vertical_probes * probe_resolution,
        };
        let gi_extent = vk::Extent2D {
            width: cascade_extent.width / 2,
            height: cascade_extent.height / 2,
        };

        Self {
            probe_resolution,
            horizontal_probes,
            vertical_probes: settings.vertical_probes,
            cascade_extent,
            gi_extent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(CascadeSettings::default().validate().is_ok());
    }

    #[test]
    fn test_max_level_bounds() {
        let mut settings = CascadeSettings::default();
        settings.max_level = 0;
        assert!(matches!(
            settings.validate(),
            Err(RenderError::InvalidSettings(_))
        ));
        settings.max_level = MAX_CASCADE_LEVEL + 1;
        assert!(settings.validate().is_err());
        settings.max_level = MAX_CASCADE_LEVEL;
        assert!(settings.validate().is_ok());
        settings.max_level = 1;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_float_range_bounds() {
        let mut settings = CascadeSettings::default();
        settings.radius = 0.0;
        assert!(settings.validate().is_err());

        settings = CascadeSettings::default();
        settings.radius_multiplier = 0.0;
        assert!(settings.validate().is_err());

        settings = CascadeSettings::default();
        settings.step_size = 1.0;
        assert!(settings.validate().is_err());

        settings = CascadeSettings::default();
        settings.attenuation = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_derive_default_1080p() {
        let settings = CascadeSettings::default();
        let res = CascadeResolution::derive(
            &settings,
            vk::Extent2D {
                width: 1920,
                height: 1080,
            },
        );

        // ceil(1920 / 1080) = 2, so 8 horizontal probes
        assert_eq!(res.probe_resolution, 256);
        assert_eq!(res.horizontal_probes, 8);
        assert_eq!(res.vertical_probes, 4);
        assert_eq!(res.cascade_extent.width, 2048);
        assert_eq!(res.cascade_extent.height, 1024);
        assert_eq!(res.gi_extent.width, 1024);
        assert_eq!(res.gi_extent.height, 512);
    }

    #[test]
    fn test_derive_square_output() {
        let settings = CascadeSettings {
            max_level: 4,
            vertical_probes: 2,
            ..Default::default()
        };
        let res = CascadeResolution::derive(
            &settings,
            vk::Extent2D {
                width: 512,
                height: 512,
            },
        );

        assert_eq!(res.probe_resolution, 16);
        assert_eq!(res.horizontal_probes, 2);
        assert_eq!(res.cascade_extent.width, 32);
        assert_eq!(res.cascade_extent.height, 32);
        assert_eq!(res.gi_extent.width, 16);
        assert_eq!(res.gi_extent.height, 16);
    }

    #[test]
    fn test_derive_min_level() {
        let settings = CascadeSettings {
            max_level: 1,
            vertical_probes: 1,
            ..Default::default()
        };
        let res = CascadeResolution::derive(
            &settings,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );

        assert_eq!(res.probe_resolution, 2);
        assert_eq!(res.horizontal_probes, 2);
        assert_eq!(res.cascade_extent.width, 4);
        assert_eq!(res.cascade_extent.height, 2);
        assert_eq!(res.gi_extent.width, res.cascade_extent.width / 2);
        assert_eq!(res.gi_extent.height, res.cascade_extent.height / 2);
    }
}
