//! Graphics context.
//!
//! The [`GraphicsContext`] is the top-level entry point. It owns the
//! process-wide [`GraphicsConfiguration`], enumerates physical devices and
//! creates [`LogicalDevice`]s.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::backend;
use crate::config::{BackendPreference, GraphicsConfiguration};
use crate::device::LogicalDevice;
use crate::error::GraphicsError;
use crate::types::{BackendKind, PhysicalDevice};

/// Every backend kind, in the order [`GraphicsContext::list_backends`] reports them.
const ALL_BACKENDS: [BackendKind; 4] = [
    BackendKind::Headless,
    BackendKind::Vulkan,
    BackendKind::DirectX12,
    BackendKind::Metal,
];

/// Owns the configuration shared by every device.
///
/// # Thread Safety
///
/// `GraphicsContext` is `Send + Sync` and can be shared across threads.
///
/// # Example
///
/// ```ignore
/// let context = GraphicsContext::new(GraphicsConfiguration::default())?;
/// let device = context.create_logical_device(&BackendPreference::platform_default().with_headless_fallback())?;
/// ```
pub struct GraphicsContext {
    config: Arc<GraphicsConfiguration>,
    /// Devices created by this context.
    devices: RwLock<Vec<Weak<LogicalDevice>>>,
}

impl GraphicsContext {
    /// Create a context.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] if the configuration is
    /// inconsistent.
    pub fn new(config: GraphicsConfiguration) -> Result<Arc<Self>, GraphicsError> {
        if config.root_constant_register_space == config.root_level_buffer_register_space {
            return Err(GraphicsError::InvalidParameter(format!(
                "root constants and root-level buffers share register space {}",
                config.root_constant_register_space
            )));
        }
        if config.frames_in_flight == 0 {
            return Err(GraphicsError::InvalidParameter(
                "frames_in_flight must be at least 1".into(),
            ));
        }
        if config.descriptor_pools.resources_per_pool == 0
            || config.descriptor_pools.samplers_per_pool == 0
        {
            return Err(GraphicsError::InvalidParameter(
                "descriptor pools cannot be empty".into(),
            ));
        }
        log::info!(
            "Creating GraphicsContext (validation: {}, frames in flight: {})",
            config.validation,
            config.frames_in_flight
        );
        Ok(Arc::new(Self {
            config: Arc::new(config),
            devices: RwLock::new(Vec::new()),
        }))
    }

    pub fn config(&self) -> &GraphicsConfiguration {
        &self.config
    }

    /// Backend kinds compiled in and supported on this platform.
    pub fn list_backends(&self) -> Vec<BackendKind> {
        ALL_BACKENDS.into_iter().filter(BackendKind::is_compiled).collect()
    }

    /// Physical devices a backend can run on.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::BackendUnavailable`] if the backend is not
    /// compiled in or fails to initialize.
    pub fn list_physical_devices(&self, kind: BackendKind) -> Result<Vec<PhysicalDevice>, GraphicsError> {
        backend::list_physical_devices(kind, &self.config)
    }

    /// Create a device on the first backend of `preference` that works.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::BackendUnavailable`] listing every failure
    /// when no backend could be created.
    pub fn create_logical_device(
        &self,
        preference: &BackendPreference,
    ) -> Result<Arc<LogicalDevice>, GraphicsError> {
        let mut failures = Vec::new();
        for &kind in &preference.backends {
            match self.create_logical_device_with(kind, None) {
                Ok(device) => return Ok(device),
                Err(e) => {
                    log::info!("Skipping {kind} backend: {e}");
                    failures.push(format!("{kind}: {e}"));
                }
            }
        }
        if preference.allow_headless_fallback && !preference.backends.contains(&BackendKind::Headless) {
            log::warn!("Falling back to the headless backend");
            match self.create_logical_device_with(BackendKind::Headless, None) {
                Ok(device) => return Ok(device),
                Err(e) => failures.push(format!("{}: {e}", BackendKind::Headless)),
            }
        }
        Err(GraphicsError::BackendUnavailable(if failures.is_empty() {
            "the backend preference list is empty".into()
        } else {
            failures.join("; ")
        }))
    }

    /// Create a device on a specific backend and physical device.
    ///
    /// `physical_device` is an id from
    /// [`list_physical_devices`](Self::list_physical_devices); `None` picks
    /// the backend's preferred device.
    pub fn create_logical_device_with(
        &self,
        kind: BackendKind,
        physical_device: Option<u32>,
    ) -> Result<Arc<LogicalDevice>, GraphicsError> {
        let backend = backend::create_backend(kind, physical_device, &self.config)?;
        log::info!("Using GPU backend: {}", backend.name());
        let device = Arc::new(LogicalDevice::new(backend, Arc::clone(&self.config)));

        let mut devices = self.devices.write();
        devices.retain(|d| d.strong_count() > 0);
        devices.push(Arc::downgrade(&device));
        Ok(device)
    }

    /// Number of live devices created by this context.
    pub fn device_count(&self) -> usize {
        self.devices.read().iter().filter(|d| d.strong_count() > 0).count()
    }

    /// Live devices created by this context.
    pub fn devices(&self) -> Vec<Arc<LogicalDevice>> {
        self.devices.read().iter().filter_map(Weak::upgrade).collect()
    }
}

impl std::fmt::Debug for GraphicsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsContext")
            .field("config", &self.config)
            .field("device_count", &self.device_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsContext: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicting_register_spaces_rejected() {
        let config = GraphicsConfiguration::default().with_root_constant_register_space(30);
        assert!(matches!(
            GraphicsContext::new(config),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_empty_preference_fails() {
        let context = GraphicsContext::new(GraphicsConfiguration::default()).unwrap();
        let preference = BackendPreference {
            backends: Vec::new(),
            allow_headless_fallback: false,
        };
        assert!(matches!(
            context.create_logical_device(&preference),
            Err(GraphicsError::BackendUnavailable(_))
        ));
    }

    #[cfg(feature = "headless")]
    #[test]
    fn test_headless_device() {
        let context = GraphicsContext::new(GraphicsConfiguration::default()).unwrap();
        assert!(context.list_backends().contains(&BackendKind::Headless));
        assert_eq!(context.list_physical_devices(BackendKind::Headless).unwrap().len(), 1);

        let device = context.create_logical_device(&BackendPreference::headless()).unwrap();
        assert_eq!(device.backend_kind(), BackendKind::Headless);
        assert_eq!(context.device_count(), 1);
        drop(device);
        assert_eq!(context.device_count(), 0);
    }

    #[cfg(feature = "headless")]
    #[test]
    fn test_headless_fallback() {
        let context = GraphicsContext::new(GraphicsConfiguration::default()).unwrap();
        // Metal and DirectX12 are never both compiled in
        let preference = BackendPreference {
            backends: vec![BackendKind::Metal, BackendKind::DirectX12],
            allow_headless_fallback: true,
        };
        let device = context.create_logical_device(&preference).unwrap();
        assert!(context.list_backends().contains(&device.backend_kind()));
    }
}
