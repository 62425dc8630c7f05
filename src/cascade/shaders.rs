//! Embedded WGSL compute shaders for the cascade passes.
//!
//! All storage textures are `rgba32float`. Reads go through `texture_2d`
//! bindings with `textureLoad`, writes through write-only storage bindings,
//! so no pass depends on read-write storage formats. Full-resolution passes
//! use an 8x8 workgroup; the GI gather uses 16x16.
//!
//! The scene texture encodes `rgb` as emitted radiance and `a` as occupancy.
//! Cascade texels encode `rgb` as gathered radiance and `a` as transmittance
//! along the ray interval, which is what the merge folds on.

/// Stamps the brush into the scene texture. A negative cursor means no edit;
/// untouched texels keep their previous contents.
pub const DRAW_INPUT_SHADER: &str = r#"
struct BrushParams {
    cursor: vec2<i32>,
    radius: u32,
    _pad: u32,
    color: vec4<f32>,
}

var<push_constant> pc: BrushParams;

@group(0) @binding(0) var scene: texture_storage_2d<rgba32float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = textureDimensions(scene);
    if gid.x >= dims.x || gid.y >= dims.y {
        return;
    }
    if pc.cursor.x < 0 || pc.cursor.y < 0 {
        return;
    }

    let d = distance(vec2<f32>(vec2<i32>(gid.xy)), vec2<f32>(pc.cursor));
    if d <= f32(pc.radius) {
        textureStore(scene, vec2<i32>(gid.xy), pc.color);
    }
}
"#;

/// Fills the scene texture with a single color.
pub const CLEAR_SCENE_SHADER: &str = r#"
struct ClearParams {
    color: vec4<f32>,
}

var<push_constant> pc: ClearParams;

@group(0) @binding(0) var scene: texture_storage_2d<rgba32float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = textureDimensions(scene);
    if gid.x >= dims.x || gid.y >= dims.y {
        return;
    }
    textureStore(scene, vec2<i32>(gid.xy), pc.color);
}
"#;

/// Gathers one radiance interval per cascade texel. Each texel encodes one
/// (probe, direction) pair; the block edge for level `l` is `2^(l + 1)`.
pub const RAYMARCH_SHADER: &str = r#"
struct CascadeParams {
    max_level: u32,
    vertical_probes: u32,
    radius: f32,
    radius_multiplier: f32,
    step_size: f32,
    attenuation: f32,
    level: u32,
    _pad: u32,
}

var<push_constant> pc: CascadeParams;

@group(0) @binding(0) var scene: texture_2d<f32>;
@group(0) @binding(1) var cascade: texture_storage_2d<rgba32float, write>;

const PI: f32 = 3.14159265358979;

fn interval_start(level: f32) -> f32 {
    if abs(pc.radius_multiplier - 1.0) < 1e-3 {
        return pc.radius * level;
    }
    let m = pc.radius_multiplier;
    return pc.radius * (pow(m, level) - 1.0) / (m - 1.0);
}

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = textureDimensions(cascade);
    if gid.x >= dims.x || gid.y >= dims.y {
        return;
    }

    let block = 1u << (pc.level + 1u);
    let probe = gid.xy / block;
    let local = gid.xy % block;
    let dir_count = block * block;
    let dir_index = local.y * block + local.x;
    let angle = 2.0 * PI * (f32(dir_index) + 0.5) / f32(dir_count);
    let dir = vec2<f32>(cos(angle), sin(angle));

    let probe_count = dims / block;
    let origin = (vec2<f32>(probe) + 0.5) / vec2<f32>(probe_count);

    let t0 = interval_start(f32(pc.level));
    let t1 = interval_start(f32(pc.level) + 1.0);

    let scene_dims = vec2<f32>(textureDimensions(scene));
    var radiance = vec3<f32>(0.0);
    var transmittance = 1.0;

    for (var t = t0; t < t1; t = t + pc.step_size) {
        let uv = origin + dir * t;
        if uv.x < 0.0 || uv.y < 0.0 || uv.x >= 1.0 || uv.y >= 1.0 {
            break;
        }
        let src = textureLoad(scene, vec2<i32>(uv * scene_dims), 0);
        if src.a > 0.5 {
            radiance = src.rgb * exp(-pc.attenuation * t);
            transmittance = 0.0;
            break;
        }
    }

    textureStore(cascade, vec2<i32>(gid.xy), vec4<f32>(radiance, transmittance));
}
"#;

/// Folds the upper cascade level into the lower one. Each lower direction
/// averages its four child directions at the containing upper probe and
/// composites them behind the lower interval's transmittance.
pub const MERGE_CASCADES_SHADER: &str = r#"
struct CascadeParams {
    max_level: u32,
    vertical_probes: u32,
    radius: f32,
    radius_multiplier: f32,
    step_size: f32,
    attenuation: f32,
    level: u32,
    _pad: u32,
}

var<push_constant> pc: CascadeParams;

@group(0) @binding(0) var upper_cascade: texture_2d<f32>;
@group(0) @binding(1) var lower_cascade: texture_2d<f32>;
@group(0) @binding(2) var merged: texture_storage_2d<rgba32float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = textureDimensions(merged);
    if gid.x >= dims.x || gid.y >= dims.y {
        return;
    }

    let block = 1u << (pc.level + 1u);
    let probe = gid.xy / block;
    let local = gid.xy % block;
    let dir_index = local.y * block + local.x;

    let ublock = block * 2u;
    let uprobe = probe / 2u;

    var up = vec4<f32>(0.0);
    for (var k = 0u; k < 4u; k = k + 1u) {
        let udir = dir_index * 4u + k;
        let ulocal = vec2<u32>(udir % ublock, udir / ublock);
        let texel = uprobe * ublock + ulocal;
        up = up + textureLoad(upper_cascade, vec2<i32>(texel), 0);
    }
    up = up * 0.25;

    let own = textureLoad(lower_cascade, vec2<i32>(gid.xy), 0);
    let radiance = own.rgb + own.a * up.rgb;
    let transmittance = own.a * up.a;
    textureStore(merged, vec2<i32>(gid.xy), vec4<f32>(radiance, transmittance));
}
"#;

/// Averages the four level-0 directions of each probe into one GI texel.
pub const BUILD_GI_SHADER: &str = r#"
@group(0) @binding(0) var cascade: texture_2d<f32>;
@group(0) @binding(1) var gi: texture_storage_2d<rgba32float, write>;

@compute @workgroup_size(16, 16, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = textureDimensions(gi);
    if gid.x >= dims.x || gid.y >= dims.y {
        return;
    }

    var sum = vec3<f32>(0.0);
    for (var k = 0u; k < 4u; k = k + 1u) {
        let texel = gid.xy * 2u + vec2<u32>(k % 2u, k / 2u);
        sum = sum + textureLoad(cascade, vec2<i32>(texel), 0).rgb;
    }
    sum = sum * 0.25;

    textureStore(gi, vec2<i32>(gid.xy), vec4<f32>(sum, 1.0));
}
"#;

/// Composites emissive scene content over bilinearly upsampled GI.
pub const FINAL_PASS_SHADER: &str = r#"
@group(0) @binding(0) var scene: texture_2d<f32>;
@group(0) @binding(1) var gi: texture_2d<f32>;
@group(0) @binding(2) var gi_sampler: sampler;
@group(0) @binding(3) var display: texture_storage_2d<rgba32float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = textureDimensions(display);
    if gid.x >= dims.x || gid.y >= dims.y {
        return;
    }

    let uv = (vec2<f32>(gid.xy) + 0.5) / vec2<f32>(dims);
    let indirect = textureSampleLevel(gi, gi_sampler, uv, 0.0);
    let src = textureLoad(scene, vec2<i32>(gid.xy), 0);
    let color = src.rgb + indirect.rgb * (1.0 - src.a);

    textureStore(display, vec2<i32>(gid.xy), vec4<f32>(color, 1.0));
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::shader::compile_wgsl;

    #[test]
    fn test_all_shaders_compile() {
        let _ = env_logger::builder().is_test(true).try_init();

        for (name, source) in [
            ("draw_input", DRAW_INPUT_SHADER),
            ("clear_scene", CLEAR_SCENE_SHADER),
            ("raymarch", RAYMARCH_SHADER),
            ("merge_cascades", MERGE_CASCADES_SHADER),
            ("build_gi", BUILD_GI_SHADER),
            ("final_pass", FINAL_PASS_SHADER),
        ] {
            let spv = compile_wgsl(source, "main")
                .unwrap_or_else(|e| panic!("{name} failed to compile: {e}"));
            assert!(!spv.is_empty(), "{name} produced empty SPIR-V");
        }
    }
}
