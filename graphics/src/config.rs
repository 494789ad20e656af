//! Process-wide graphics configuration and backend selection.
//!
//! A [`GraphicsConfiguration`] is handed to [`GraphicsContext::new`] once and
//! shared read-only by every device the context creates.
//!
//! [`GraphicsContext::new`]: crate::GraphicsContext::new

use crate::types::BackendKind;

/// Sizing policy for descriptor pools.
///
/// Allocators grow by appending pools of the configured size. With
/// `max_pools` set, an allocation that would need one more pool fails with
/// [`GraphicsError::OutOfDescriptors`](crate::GraphicsError::OutOfDescriptors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolConfig {
    /// CBV/SRV/UAV slots per pool.
    pub resources_per_pool: u32,
    /// Sampler slots per pool.
    pub samplers_per_pool: u32,
    /// Hard cap on pools per allocator, `None` for unbounded growth.
    pub max_pools: Option<usize>,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            resources_per_pool: 4096,
            samplers_per_pool: 256,
            max_pools: None,
        }
    }
}

/// Configuration shared by every logical device of a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsConfiguration {
    /// Register space holding root-level (dynamic) buffers.
    pub root_level_buffer_register_space: u32,
    /// Register space holding root constants.
    pub root_constant_register_space: u32,
    /// Default number of frames the CPU may record ahead of the GPU.
    pub frames_in_flight: u32,
    pub descriptor_pools: DescriptorPoolConfig,
    /// Enable API validation layers where the backend has them.
    pub validation: bool,
}

impl Default for GraphicsConfiguration {
    fn default() -> Self {
        Self {
            root_level_buffer_register_space: 30,
            root_constant_register_space: 31,
            frames_in_flight: 3,
            descriptor_pools: DescriptorPoolConfig::default(),
            validation: cfg!(debug_assertions),
        }
    }
}

impl GraphicsConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_descriptor_pools(mut self, pools: DescriptorPoolConfig) -> Self {
        self.descriptor_pools = pools;
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }

    pub fn with_root_constant_register_space(mut self, space: u32) -> Self {
        self.root_constant_register_space = space;
        self
    }

    pub fn with_root_level_buffer_register_space(mut self, space: u32) -> Self {
        self.root_level_buffer_register_space = space;
        self
    }

    /// Returns true if `space` is reserved for root-level buffers or constants.
    pub fn is_reserved_register_space(&self, space: u32) -> bool {
        space == self.root_level_buffer_register_space || space == self.root_constant_register_space
    }
}

/// Ordered list of backends to try when creating a logical device.
///
/// The first backend that initializes wins; there is no renegotiation later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendPreference {
    pub backends: Vec<BackendKind>,
    /// Fall back to the headless backend when every listed backend fails.
    pub allow_headless_fallback: bool,
}

impl BackendPreference {
    /// The native backends of the current platform, most preferred first.
    pub fn platform_default() -> Self {
        let backends = if cfg!(target_os = "windows") {
            vec![BackendKind::DirectX12, BackendKind::Vulkan]
        } else if cfg!(any(target_os = "macos", target_os = "ios")) {
            vec![BackendKind::Metal]
        } else {
            vec![BackendKind::Vulkan]
        };
        Self {
            backends,
            allow_headless_fallback: false,
        }
    }

    /// Exactly one backend, no fallback.
    pub fn only(kind: BackendKind) -> Self {
        Self {
            backends: vec![kind],
            allow_headless_fallback: false,
        }
    }

    /// The headless backend.
    pub fn headless() -> Self {
        Self::only(BackendKind::Headless)
    }

    pub fn with_headless_fallback(mut self) -> Self {
        self.allow_headless_fallback = true;
        self
    }
}

impl Default for BackendPreference {
    fn default() -> Self {
        Self::platform_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_register_spaces() {
        let config = GraphicsConfiguration::default();
        assert_eq!(config.root_level_buffer_register_space, 30);
        assert_eq!(config.root_constant_register_space, 31);
        assert!(config.is_reserved_register_space(31));
        assert!(!config.is_reserved_register_space(0));
    }

    #[test]
    fn test_builder() {
        let config = GraphicsConfiguration::new()
            .with_frames_in_flight(2)
            .with_validation(false);
        assert_eq!(config.frames_in_flight, 2);
        assert!(!config.validation);
    }

    #[test]
    fn test_platform_default_is_not_empty() {
        let pref = BackendPreference::platform_default();
        assert!(!pref.backends.is_empty());
        assert!(!pref.backends.contains(&BackendKind::Headless));
    }
}
