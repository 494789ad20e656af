//! Common utilities for GPU integration tests.
//!
//! Every test is parameterized over the backends with `rstest`. Backends that
//! are not compiled in, or have no usable device on this machine, make
//! [`TestContext::new`] return `None` and the test returns early.

#![allow(dead_code)]

use std::sync::Arc;

use obsidian_graphics::{
    BackendKind, BackendPreference, BufferDesc, BufferResource, GraphicsConfiguration,
    GraphicsContext, LogicalDevice, ResourceDescriptor, TextureDesc, TextureResource, Format,
};

/// Backends the integration tests run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Headless,
    Vulkan,
    DirectX12,
    Metal,
}

impl Backend {
    pub fn kind(self) -> BackendKind {
        match self {
            Backend::Headless => BackendKind::Headless,
            Backend::Vulkan => BackendKind::Vulkan,
            Backend::DirectX12 => BackendKind::DirectX12,
            Backend::Metal => BackendKind::Metal,
        }
    }

    /// Compiled in for this target. A compiled backend may still fail to
    /// find a device.
    pub fn is_available(self) -> bool {
        self.kind().is_compiled()
    }

    /// Root constants and descriptor arrays are not available through wgpu.
    pub fn supports_root_constants(self) -> bool {
        matches!(self, Backend::Headless | Backend::Vulkan)
    }
}

/// A context and logical device for one backend.
pub struct TestContext {
    pub backend: Backend,
    pub context: Arc<GraphicsContext>,
    pub device: Arc<LogicalDevice>,
}

impl TestContext {
    /// Returns `None` if the backend is not compiled in or has no device.
    pub fn new(backend: Backend) -> Option<Self> {
        Self::with_config(backend, GraphicsConfiguration::default().with_validation(false))
    }

    pub fn with_config(backend: Backend, config: GraphicsConfiguration) -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();
        if !backend.is_available() {
            return None;
        }
        let context = GraphicsContext::new(config).ok()?;
        let device = match context.create_logical_device(&BackendPreference::only(backend.kind())) {
            Ok(device) => device,
            Err(e) => {
                eprintln!("Backend {backend:?} has no usable device: {e}");
                return None;
            }
        };
        Some(Self {
            backend,
            context,
            device,
        })
    }

    /// Device-local buffer.
    pub fn gpu_buffer(&self, num_bytes: u64) -> BufferResource {
        self.device
            .create_buffer_resource(&BufferDesc::new(num_bytes).with_debug_name("test gpu buffer"))
            .expect("failed to create gpu buffer")
    }

    /// Device-local buffer usable as a constant buffer.
    pub fn constant_buffer(&self, num_bytes: u64) -> BufferResource {
        self.device
            .create_buffer_resource(
                &BufferDesc::new(num_bytes)
                    .with_descriptor(ResourceDescriptor::UNIFORM_BUFFER)
                    .with_debug_name("test constant buffer"),
            )
            .expect("failed to create constant buffer")
    }

    pub fn upload_buffer(&self, data: &[u8]) -> BufferResource {
        let mut buffer = self
            .device
            .create_buffer_resource(&BufferDesc::upload(data.len() as u64).with_debug_name("test upload"))
            .expect("failed to create upload buffer");
        buffer.write_data(0, data).expect("failed to write upload buffer");
        buffer
    }

    pub fn texture(&self, width: u32, height: u32) -> TextureResource {
        self.device
            .create_texture_resource(
                &TextureDesc::new_2d(width, height, Format::Rgba8Unorm).with_debug_name("test texture"),
            )
            .expect("failed to create texture")
    }

    pub fn read_buffer(&self, buffer: &BufferResource) -> Vec<u8> {
        self.device.debug_read_buffer(buffer).expect("failed to read buffer")
    }
}

/// Deterministic bytes that differ between neighbouring offsets.
pub fn generate_test_pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 7 + i / 256) as u8).collect()
}

/// Test pattern shifted by `seed`, for telling uploads apart.
pub fn seeded_pattern(size: usize, seed: u8) -> Vec<u8> {
    generate_test_pattern(size)
        .into_iter()
        .map(|b| b.wrapping_add(seed))
        .collect()
}
