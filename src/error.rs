//! Renderer error types.

use ash::vk;
use thiserror::Error;

/// Errors that can occur in the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// GPU memory allocation failed. Not recoverable at runtime.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),
    /// Failed to create a Vulkan resource.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// WGSL parse, validation or SPIR-V generation failed.
    #[error("shader compilation failed: {0}")]
    ShaderCompilationFailed(String),
    /// An operation was issued against an object in the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// A requested pipeline kind has no implementation.
    #[error("not implemented: {0}")]
    NotImplemented(String),
    /// A cascade setting is outside its accepted range.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    /// A Vulkan call failed outside resource creation.
    #[error("vulkan error: {0:?}")]
    Vulkan(vk::Result),
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        Self::Vulkan(result)
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RenderError::AllocationFailed("cascade image".to_string());
        assert_eq!(err.to_string(), "allocation failed: cascade image");

        let err = RenderError::NotImplemented("graphics pipelines".to_string());
        assert_eq!(err.to_string(), "not implemented: graphics pipelines");
    }

    #[test]
    fn test_vulkan_conversion() {
        let err: RenderError = vk::Result::ERROR_DEVICE_LOST.into();
        assert_eq!(err, RenderError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
    }
}
