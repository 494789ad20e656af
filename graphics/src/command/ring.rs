//! Per-frame command lists with frame fences and present semaphores.

use super::{CommandList, CommandListPool, CommandListPoolDesc, ExecuteDesc};
use crate::device::LogicalDevice;
use crate::error::GraphicsError;
use crate::swapchain::{PresentResult, SwapChain};
use crate::sync::{Fence, Semaphore};
use crate::types::QueueType;

/// Parameters of a [`CommandListRing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandListRingDesc {
    pub queue_type: QueueType,
    /// Create a fence and image-ready / image-rendered semaphores per frame.
    pub create_sync_objects: bool,
    pub num_frames: u32,
    pub num_command_lists_per_frame: u32,
}

impl Default for CommandListRingDesc {
    fn default() -> Self {
        Self {
            queue_type: QueueType::Graphics,
            create_sync_objects: true,
            num_frames: 3,
            num_command_lists_per_frame: 1,
        }
    }
}

impl CommandListRingDesc {
    pub fn with_queue_type(mut self, queue_type: QueueType) -> Self {
        self.queue_type = queue_type;
        self
    }

    pub fn with_sync_objects(mut self, enabled: bool) -> Self {
        self.create_sync_objects = enabled;
        self
    }

    pub fn with_num_frames(mut self, num_frames: u32) -> Self {
        self.num_frames = num_frames;
        self
    }

    pub fn with_command_lists_per_frame(mut self, count: u32) -> Self {
        self.num_command_lists_per_frame = count;
        self
    }
}

struct FrameSync {
    fence: Fence,
    image_ready: Semaphore,
    image_rendered: Semaphore,
}

/// One command list pool per frame in flight.
///
/// ```ignore
/// ring.next_frame();
/// let image = ring.current_image(&swap_chain)?;
/// let list = ring.frame_command_list(0);
/// list.begin();
/// // ...
/// list.end();
/// ring.execute_and_present(0, &swap_chain, image)?;
/// ```
pub struct CommandListRing {
    desc: CommandListRingDesc,
    pools: Vec<CommandListPool>,
    sync: Vec<FrameSync>,
    frame: usize,
}

impl CommandListRing {
    pub fn new(device: &LogicalDevice, desc: CommandListRingDesc) -> Result<Self, GraphicsError> {
        if desc.num_frames == 0 {
            return Err(GraphicsError::InvalidParameter(
                "command list ring needs at least one frame".into(),
            ));
        }
        let pool_desc =
            CommandListPoolDesc::new(desc.queue_type, desc.num_command_lists_per_frame, 1);
        let pools = (0..desc.num_frames)
            .map(|_| device.create_command_list_pool(&pool_desc))
            .collect::<Result<Vec<_>, _>>()?;

        let sync = if desc.create_sync_objects {
            (0..desc.num_frames)
                .map(|_| {
                    Ok(FrameSync {
                        fence: device.create_fence()?,
                        image_ready: device.create_semaphore()?,
                        image_rendered: device.create_semaphore()?,
                    })
                })
                .collect::<Result<Vec<_>, GraphicsError>>()?
        } else {
            log::warn!(
                "CommandListRing: created without sync objects, the caller must fence frame reuse"
            );
            Vec::new()
        };

        log::debug!(
            "CommandListRing: {} frames x {} {} lists",
            desc.num_frames,
            desc.num_command_lists_per_frame,
            desc.queue_type.name()
        );
        Ok(Self {
            desc,
            pools,
            sync,
            frame: 0,
        })
    }

    pub fn desc(&self) -> &CommandListRingDesc {
        &self.desc
    }

    pub fn current_frame(&self) -> usize {
        self.frame
    }

    /// Advance to the next frame slot and wait for its previous work.
    pub fn next_frame(&mut self) {
        self.frame = (self.frame + 1) % self.pools.len();
        if let Some(sync) = self.sync.get(self.frame) {
            sync.fence.wait();
        }
    }

    /// Command list `index` of the current frame.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below `num_command_lists_per_frame`.
    pub fn frame_command_list(&mut self, index: usize) -> &mut CommandList {
        let count = self.desc.num_command_lists_per_frame;
        self.pools[self.frame]
            .command_list_mut(index)
            .unwrap_or_else(|| panic!("frame command list {index} out of range (ring has {count})"))
    }

    /// Fence of the current frame, if sync objects were created.
    pub fn frame_fence(&self) -> Option<&Fence> {
        self.sync.get(self.frame).map(|s| &s.fence)
    }

    /// Acquire the next swap chain image, signaling the frame's image-ready semaphore.
    pub fn current_image(&mut self, swap_chain: &SwapChain) -> Result<u32, GraphicsError> {
        let sync = self.sync.get(self.frame).ok_or_else(|| {
            GraphicsError::InvalidParameter("ring has no sync objects to acquire with".into())
        })?;
        swap_chain.acquire_next_image(&sync.image_ready)
    }

    /// Execute a frame list, notifying the frame fence.
    pub fn execute_last(&mut self, index: usize) -> Result<(), GraphicsError> {
        let mut desc = ExecuteDesc::new();
        if let Some(sync) = self.sync.get(self.frame) {
            desc = desc.with_notify(&sync.fence);
        }
        let count = self.desc.num_command_lists_per_frame;
        self.pools[self.frame]
            .command_list_mut(index)
            .unwrap_or_else(|| panic!("frame command list {index} out of range (ring has {count})"))
            .execute(&desc)
    }

    /// Execute a frame list after the image is acquired, then present it once rendered.
    pub fn execute_and_present(
        &mut self,
        index: usize,
        swap_chain: &SwapChain,
        image: u32,
    ) -> Result<PresentResult, GraphicsError> {
        let count = self.desc.num_command_lists_per_frame;
        let list = self.pools[self.frame]
            .command_list_mut(index)
            .unwrap_or_else(|| panic!("frame command list {index} out of range (ring has {count})"));
        match self.sync.get(self.frame) {
            Some(sync) => {
                list.execute(
                    &ExecuteDesc::new()
                        .with_notify(&sync.fence)
                        .wait_on(&sync.image_ready)
                        .notify_semaphore(&sync.image_rendered),
                )?;
                Ok(list.present(swap_chain, image, &[&sync.image_rendered]))
            }
            None => {
                list.execute(&ExecuteDesc::new())?;
                Ok(list.present(swap_chain, image, &[]))
            }
        }
    }

    /// Wait for every frame's outstanding work.
    pub fn wait_idle(&mut self) {
        for sync in &self.sync {
            sync.fence.wait();
        }
        for pool in &mut self.pools {
            pool.wait_idle();
        }
    }
}

impl std::fmt::Debug for CommandListRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandListRing")
            .field("desc", &self.desc)
            .field("frame", &self.frame)
            .finish()
    }
}

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::test_utils::headless_device;

    #[test]
    fn test_ring_cycles_frames() {
        let device = headless_device();
        let mut ring = CommandListRing::new(
            &device,
            CommandListRingDesc::default().with_queue_type(QueueType::Copy),
        )
        .unwrap();

        let first = ring.frame_command_list(0).id();
        for expected in [1, 2, 0] {
            let list = ring.frame_command_list(0);
            list.begin();
            list.end();
            ring.execute_last(0).unwrap();
            ring.next_frame();
            assert_eq!(ring.current_frame(), expected);
        }
        assert_eq!(ring.frame_command_list(0).id(), first);
        ring.wait_idle();
        assert!(ring.frame_fence().is_some_and(|f| !f.is_pending() || f.is_signaled()));
    }

    #[test]
    fn test_ring_without_sync_objects() {
        let device = headless_device();
        let mut ring = CommandListRing::new(
            &device,
            CommandListRingDesc::default()
                .with_queue_type(QueueType::Compute)
                .with_sync_objects(false)
                .with_num_frames(2),
        )
        .unwrap();
        assert!(ring.frame_fence().is_none());
        let list = ring.frame_command_list(0);
        list.begin();
        list.end();
        ring.execute_last(0).unwrap();
        ring.wait_idle();
    }

    #[test]
    fn test_zero_frames_rejected() {
        let device = headless_device();
        assert!(CommandListRing::new(&device, CommandListRingDesc::default().with_num_frames(0)).is_err());
    }
}
