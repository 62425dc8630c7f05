//! WGSL to SPIR-V shader compilation.

use ash::vk;

use crate::error::{RenderError, RenderResult};

/// Compile a WGSL compute shader to SPIR-V.
pub fn compile_wgsl(source: &str, entry_point: &str) -> RenderResult<Vec<u32>> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| RenderError::ShaderCompilationFailed(format!("WGSL parse error: {e}")))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator
        .validate(&module)
        .map_err(|e| RenderError::ShaderCompilationFailed(format!("Validation error: {e}")))?;

    // Verify the entry point exists
    module
        .entry_points
        .iter()
        .position(|ep| ep.name == entry_point && ep.stage == naga::ShaderStage::Compute)
        .ok_or_else(|| {
            RenderError::ShaderCompilationFailed(format!(
                "Compute entry point '{}' not found",
                entry_point
            ))
        })?;

    let options = naga::back::spv::Options {
        lang_version: (1, 3),
        flags: naga::back::spv::WriterFlags::empty(),
        capabilities: None,
        bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
        binding_map: Default::default(),
        debug_info: None,
        zero_initialize_workgroup_memory: naga::back::spv::ZeroInitializeWorkgroupMemoryMode::None,
    };

    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: naga::ShaderStage::Compute,
        entry_point: entry_point.to_string(),
    };

    naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| RenderError::ShaderCompilationFailed(format!("SPIR-V generation error: {e}")))
}

/// Create a Vulkan shader module from SPIR-V words.
pub fn create_shader_module(device: &ash::Device, spv: &[u32]) -> RenderResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(spv);

    unsafe { device.create_shader_module(&create_info, None) }.map_err(|e| {
        RenderError::ShaderCompilationFailed(format!("Failed to create shader module: {:?}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIVIAL: &str = r#"
@group(0) @binding(0) var output: texture_storage_2d<rgba32float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let dims = textureDimensions(output);
    if gid.x >= dims.x || gid.y >= dims.y {
        return;
    }
    textureStore(output, vec2<i32>(gid.xy), vec4<f32>(0.0, 0.0, 0.0, 1.0));
}
"#;

    #[test]
    fn test_compile_trivial_shader() {
        let spv = compile_wgsl(TRIVIAL, "main").unwrap();
        assert!(!spv.is_empty());
        // SPIR-V magic number
        assert_eq!(spv[0], 0x0723_0203);
    }

    #[test]
    fn test_missing_entry_point() {
        let err = compile_wgsl(TRIVIAL, "not_there").unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompilationFailed(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = compile_wgsl("fn main( {", "main").unwrap_err();
        assert!(matches!(err, RenderError::ShaderCompilationFailed(_)));
    }
}
