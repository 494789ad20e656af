//! Graphics error types.
//!
//! Errors returned here are either descriptor validation failures, which the
//! caller is expected to treat as fatal and propagate, or native API failures.
//! Contract violations during recording (binding past capacity, illegal
//! command list transitions) panic instead.

use std::fmt;

/// Errors that can occur in the graphics system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize a backend or device.
    InitializationFailed(String),
    /// No backend from the preference list could be created.
    BackendUnavailable(String),
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// A requested feature is not supported by the selected backend.
    FeatureNotSupported(String),
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// Out of GPU memory.
    OutOfMemory,
    /// A descriptor allocator reached its configured pool limit.
    OutOfDescriptors(String),
    /// The GPU device was lost.
    DeviceLost,
    /// The surface is outdated and needs to be reconfigured.
    SurfaceOutdated,
    /// The surface was lost and needs to be recreated.
    SurfaceLost,
    /// An internal error occurred.
    Internal(String),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::BackendUnavailable(msg) => write!(f, "no usable backend: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::FeatureNotSupported(msg) => write!(f, "feature not supported: {msg}"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::OutOfDescriptors(msg) => write!(f, "out of descriptors: {msg}"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::SurfaceOutdated => write!(f, "surface outdated, needs reconfiguration"),
            Self::SurfaceLost => write!(f, "surface lost, needs recreation"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GraphicsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::InitializationFailed("no GPU found".to_string());
        assert_eq!(err.to_string(), "initialization failed: no GPU found");

        let err = GraphicsError::OutOfDescriptors("sampler heap, 4 pools".to_string());
        assert_eq!(err.to_string(), "out of descriptors: sampler heap, 4 pools");
    }
}
