//! Deferred destruction of native objects.
//!
//! Dropping a handle does not destroy the Vulkan object right away: the GPU
//! may still be reading it from a submission of a previous frame. Handles are
//! queued with the frame they were dropped in and destroyed once
//! `frames_in_flight` more frames have been started.
//!
//! ```text
//! drop(buffer)     -> queue(Buffer, frame N)
//! advance_frame()  -> frame N+1
//! ...
//! advance_frame()  -> frame N+frames_in_flight: destroy everything from frame N
//! ```

use std::collections::VecDeque;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;

/// Items tagged with the frame they were queued in.
#[derive(Debug)]
pub(super) struct DeferredQueue<T> {
    frames_in_flight: u64,
    state: Mutex<QueueState<T>>,
}

#[derive(Debug)]
struct QueueState<T> {
    frame: u64,
    pending: VecDeque<(u64, T)>,
}

impl<T> DeferredQueue<T> {
    pub fn new(frames_in_flight: u32) -> Self {
        Self {
            frames_in_flight: u64::from(frames_in_flight.max(1)),
            state: Mutex::new(QueueState {
                frame: 0,
                pending: VecDeque::new(),
            }),
        }
    }

    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        let frame = state.frame;
        state.pending.push_back((frame, item));
    }

    /// Start a new frame and hand every expired item to `destroy`.
    pub fn advance(&self, mut destroy: impl FnMut(T)) {
        let expired: Vec<T> = {
            let mut state = self.state.lock();
            state.frame += 1;
            let frame = state.frame;
            let count = state
                .pending
                .iter()
                .take_while(|(queued, _)| queued + self.frames_in_flight <= frame)
                .count();
            state.pending.drain(..count).map(|(_, item)| item).collect()
        };
        expired.into_iter().for_each(&mut destroy);
    }

    /// Hand every pending item to `destroy`, whatever its age.
    pub fn flush(&self, destroy: impl FnMut(T)) {
        let pending: Vec<T> = self
            .state
            .lock()
            .pending
            .drain(..)
            .map(|(_, item)| item)
            .collect();
        pending.into_iter().for_each(destroy);
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn frame(&self) -> u64 {
        self.state.lock().frame
    }
}

/// A native object waiting for the GPU to finish with it.
#[derive(Debug)]
pub(super) enum DeferredResource {
    Buffer {
        buffer: vk::Buffer,
        allocation: Allocation,
    },
    Image {
        image: vk::Image,
        view: vk::ImageView,
        allocation: Allocation,
    },
    /// View of an image owned elsewhere, such as a swap chain image.
    ImageView(vk::ImageView),
    Sampler(vk::Sampler),
    Fence(vk::Fence),
    Semaphore(vk::Semaphore),
    Pipeline(vk::Pipeline),
    RootSignature {
        layout: vk::PipelineLayout,
        set_layouts: Vec<vk::DescriptorSetLayout>,
        samplers: Vec<vk::Sampler>,
    },
    DescriptorSet {
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
    },
    DescriptorPool(vk::DescriptorPool),
    Swapchain(vk::SwapchainKHR),
    Surface(vk::SurfaceKHR),
}

impl DeferredResource {
    /// Destroy the object now.
    ///
    /// # Safety
    ///
    /// No pending GPU work may reference the object.
    pub unsafe fn destroy(
        self,
        device: &ash::Device,
        allocator: &Mutex<Allocator>,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface_loader: &ash::khr::surface::Instance,
    ) {
        let free = |allocation: Allocation| {
            if let Err(e) = allocator.lock().free(allocation) {
                log::error!("Failed to free device memory: {e}");
            }
        };
        unsafe {
            match self {
                Self::Buffer { buffer, allocation } => {
                    device.destroy_buffer(buffer, None);
                    free(allocation);
                }
                Self::Image {
                    image,
                    view,
                    allocation,
                } => {
                    device.destroy_image_view(view, None);
                    device.destroy_image(image, None);
                    free(allocation);
                }
                Self::ImageView(view) => device.destroy_image_view(view, None),
                Self::Sampler(sampler) => device.destroy_sampler(sampler, None),
                Self::Fence(fence) => device.destroy_fence(fence, None),
                Self::Semaphore(semaphore) => device.destroy_semaphore(semaphore, None),
                Self::Pipeline(pipeline) => device.destroy_pipeline(pipeline, None),
                Self::RootSignature {
                    layout,
                    set_layouts,
                    samplers,
                } => {
                    device.destroy_pipeline_layout(layout, None);
                    for set_layout in set_layouts {
                        device.destroy_descriptor_set_layout(set_layout, None);
                    }
                    for sampler in samplers {
                        device.destroy_sampler(sampler, None);
                    }
                }
                Self::DescriptorSet { pool, set } => {
                    if let Err(e) = device.free_descriptor_sets(pool, &[set]) {
                        log::error!("Failed to free descriptor set: {e:?}");
                    }
                }
                Self::DescriptorPool(pool) => device.destroy_descriptor_pool(pool, None),
                Self::Swapchain(swapchain) => swapchain_loader.destroy_swapchain(swapchain, None),
                Self::Surface(surface) => surface_loader.destroy_surface(surface, None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_expire_after_frames_in_flight() {
        let queue = DeferredQueue::new(2);
        queue.push("a");
        queue.advance(|_| panic!("destroyed too early"));
        queue.push("b");

        let mut destroyed = Vec::new();
        queue.advance(|item| destroyed.push(item));
        assert_eq!(destroyed, vec!["a"]);
        assert_eq!(queue.pending(), 1);

        queue.advance(|item| destroyed.push(item));
        assert_eq!(destroyed, vec!["a", "b"]);
        assert_eq!(queue.frame(), 3);
    }

    #[test]
    fn test_flush_ignores_age() {
        let queue = DeferredQueue::new(3);
        queue.push(1);
        queue.push(2);
        let mut destroyed = Vec::new();
        queue.flush(|item| destroyed.push(item));
        assert_eq!(destroyed, vec![1, 2]);
        assert_eq!(queue.pending(), 0);
    }
}
