//! Fences and binary semaphores.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use crate::error::GraphicsError;

use super::deferred::DeferredResource;
use super::{VulkanDevice, vk_error};

pub struct VulkanFence {
    device: Arc<VulkanDevice>,
    pub(super) fence: vk::Fence,
}

impl VulkanFence {
    pub(super) fn new(device: Arc<VulkanDevice>) -> Result<Self, GraphicsError> {
        let fence = unsafe {
            device
                .device
                .create_fence(&vk::FenceCreateInfo::default(), None)
        }
        .map_err(|e| vk_error("create fence", e))?;
        Ok(Self { device, fence })
    }

    pub(crate) fn wait(&self) -> Result<(), GraphicsError> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.fence], true, u64::MAX)
        }
        .map_err(|e| self.device.check_lost(vk_error("wait for fence", e)))
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Result<bool, GraphicsError> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.device.wait_for_fences(&[self.fence], true, nanos) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(self.device.check_lost(vk_error("wait for fence", e))),
        }
    }

    pub(crate) fn is_signaled(&self) -> bool {
        unsafe { self.device.device.get_fence_status(self.fence) }.unwrap_or(false)
    }

    pub(crate) fn reset(&self) -> Result<(), GraphicsError> {
        unsafe { self.device.device.reset_fences(&[self.fence]) }
            .map_err(|e| vk_error("reset fence", e))
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        self.device.defer(DeferredResource::Fence(self.fence));
    }
}

impl std::fmt::Debug for VulkanFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanFence").field("fence", &self.fence).finish()
    }
}

/// Binary semaphore. Every signal must be consumed by exactly one wait.
pub struct VulkanSemaphore {
    device: Arc<VulkanDevice>,
    pub(super) semaphore: vk::Semaphore,
}

impl VulkanSemaphore {
    pub(super) fn new(device: Arc<VulkanDevice>) -> Result<Self, GraphicsError> {
        let semaphore = unsafe {
            device
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .map_err(|e| vk_error("create semaphore", e))?;
        Ok(Self { device, semaphore })
    }
}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        self.device.defer(DeferredResource::Semaphore(self.semaphore));
    }
}

impl std::fmt::Debug for VulkanSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSemaphore")
            .field("semaphore", &self.semaphore)
            .finish()
    }
}
