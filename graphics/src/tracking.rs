//! Resource state tracking.
//!
//! [`ResourceTracking`] remembers the last usage and queue of each resource
//! and turns requested usages into the minimal set of barriers. Resources are
//! tracked on first use with their initial usage.
//!
//! ```ignore
//! tracking.batch_transition(list, &BatchTransitionDesc::new()
//!     .with(TransitionDesc::texture(&shadow_map, ResourceUsage::SHADER_RESOURCE))
//!     .with(TransitionDesc::buffer(&lights, ResourceUsage::VERTEX_AND_CONSTANT_BUFFER)));
//! ```

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::command::{BufferBarrierDesc, CommandList, PipelineBarrierDesc, TextureBarrierDesc};
use crate::resources::{BufferResource, TextureResource};
use crate::types::{QueueType, ResourceUsage};

/// Last known state of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedState {
    pub usage: ResourceUsage,
    /// Queue of the last transition.
    pub queue: QueueType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TrackedKey {
    Buffer(u64),
    Texture(u64),
}

/// A resource whose state is tracked.
#[derive(Debug, Clone, Copy)]
pub enum TrackedResource<'a> {
    Buffer(&'a BufferResource),
    Texture(&'a TextureResource),
}

impl TrackedResource<'_> {
    fn key(&self) -> TrackedKey {
        match self {
            Self::Buffer(b) => TrackedKey::Buffer(b.id()),
            Self::Texture(t) => TrackedKey::Texture(t.id()),
        }
    }

    fn initial_usage(&self) -> ResourceUsage {
        match self {
            Self::Buffer(b) => b.initial_usage(),
            Self::Texture(t) => t.initial_usage(),
        }
    }
}

/// Requested usage of one resource.
#[derive(Debug, Clone, Copy)]
pub struct TransitionDesc<'a> {
    pub resource: TrackedResource<'a>,
    pub usage: ResourceUsage,
}

impl<'a> TransitionDesc<'a> {
    pub fn buffer(buffer: &'a BufferResource, usage: ResourceUsage) -> Self {
        Self {
            resource: TrackedResource::Buffer(buffer),
            usage,
        }
    }

    pub fn texture(texture: &'a TextureResource, usage: ResourceUsage) -> Self {
        Self {
            resource: TrackedResource::Texture(texture),
            usage,
        }
    }
}

/// Several transitions recorded as one barrier.
#[derive(Debug, Clone, Default)]
pub struct BatchTransitionDesc<'a> {
    pub transitions: Vec<TransitionDesc<'a>>,
}

impl<'a> BatchTransitionDesc<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, transition: TransitionDesc<'a>) -> Self {
        self.transitions.push(transition);
        self
    }
}

/// Usage and queue of every tracked resource.
#[derive(Debug, Default)]
pub struct ResourceTracking {
    entries: RwLock<HashMap<TrackedKey, Mutex<TrackedState>>>,
}

impl ResourceTracking {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&self, key: TrackedKey, state: TrackedState) {
        self.entries.write().insert(key, Mutex::new(state));
    }

    /// Start tracking a buffer in `usage`, replacing any previous state.
    pub fn track_buffer(&self, buffer: &BufferResource, usage: ResourceUsage, queue: QueueType) {
        self.track(TrackedKey::Buffer(buffer.id()), TrackedState { usage, queue });
    }

    pub fn track_texture(&self, texture: &TextureResource, usage: ResourceUsage, queue: QueueType) {
        self.track(TrackedKey::Texture(texture.id()), TrackedState { usage, queue });
    }

    pub fn untrack_buffer(&self, buffer: &BufferResource) {
        self.entries.write().remove(&TrackedKey::Buffer(buffer.id()));
    }

    pub fn untrack_texture(&self, texture: &TextureResource) {
        self.entries.write().remove(&TrackedKey::Texture(texture.id()));
    }

    pub fn buffer_state(&self, buffer: &BufferResource) -> Option<TrackedState> {
        self.entries
            .read()
            .get(&TrackedKey::Buffer(buffer.id()))
            .map(|state| *state.lock())
    }

    pub fn texture_state(&self, texture: &TextureResource) -> Option<TrackedState> {
        self.entries
            .read()
            .get(&TrackedKey::Texture(texture.id()))
            .map(|state| *state.lock())
    }

    pub fn num_tracked(&self) -> usize {
        self.entries.read().len()
    }

    /// Transition one buffer. Returns true if a barrier was recorded.
    pub fn transition_buffer(&self, list: &mut CommandList, buffer: &BufferResource, usage: ResourceUsage) -> bool {
        self.batch_transition(list, &BatchTransitionDesc::new().with(TransitionDesc::buffer(buffer, usage))) > 0
    }

    /// Transition one texture. Returns true if a barrier was recorded.
    pub fn transition_texture(&self, list: &mut CommandList, texture: &TextureResource, usage: ResourceUsage) -> bool {
        self.batch_transition(list, &BatchTransitionDesc::new().with(TransitionDesc::texture(texture, usage))) > 0
    }

    /// Record one barrier with every transition whose usage changes.
    ///
    /// Returns the number of transitions recorded.
    pub fn batch_transition(&self, list: &mut CommandList, desc: &BatchTransitionDesc<'_>) -> usize {
        let queue = list.queue_type();
        let mut barrier = PipelineBarrierDesc::new();
        let mut count = 0;

        for transition in &desc.transitions {
            let key = transition.resource.key();
            if !self.entries.read().contains_key(&key) {
                self.entries.write().entry(key).or_insert_with(|| {
                    Mutex::new(TrackedState {
                        usage: transition.resource.initial_usage(),
                        queue,
                    })
                });
            }
            let entries = self.entries.read();
            let Some(entry) = entries.get(&key) else {
                continue;
            };
            let mut state = entry.lock();
            if !state.usage.needs_barrier(transition.usage) {
                state.queue = queue;
                continue;
            }
            barrier = match transition.resource {
                TrackedResource::Buffer(buffer) => barrier.buffer(
                    BufferBarrierDesc::new(buffer, transition.usage).with_old_state(state.usage),
                ),
                TrackedResource::Texture(texture) => barrier.texture(
                    TextureBarrierDesc::new(texture, transition.usage).with_old_state(state.usage),
                ),
            };
            *state = TrackedState {
                usage: transition.usage,
                queue,
            };
            count += 1;
        }

        if count > 0 {
            list.pipeline_barrier(&barrier);
            log::trace!(
                "ResourceTracking: {count} transitions on the {} queue",
                queue.name()
            );
        }
        count
    }
}

static_assertions::assert_impl_all!(ResourceTracking: Send, Sync);

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::command::CommandListPoolDesc;
    use crate::resources::{BufferDesc, TextureDesc};
    use crate::test_utils::headless_device;
    use crate::types::Format;

    #[test]
    fn test_barrier_only_on_change() {
        let device = headless_device();
        let mut pool = device
            .create_command_list_pool(&CommandListPoolDesc::new(QueueType::Graphics, 1, 1))
            .unwrap();
        let texture = device
            .create_texture_resource(&TextureDesc::new_2d(4, 4, Format::Rgba8Unorm))
            .unwrap();
        let tracking = ResourceTracking::new();
        let list = pool.get_next_in_flight();
        list.begin();

        assert!(tracking.transition_texture(list, &texture, ResourceUsage::COPY_DST));
        assert!(!tracking.transition_texture(list, &texture, ResourceUsage::COPY_DST));
        assert_eq!(list.num_commands(), 1);
        assert!(tracking.transition_texture(list, &texture, ResourceUsage::SHADER_RESOURCE));
        assert_eq!(list.num_commands(), 2);
        assert_eq!(
            tracking.texture_state(&texture),
            Some(TrackedState {
                usage: ResourceUsage::SHADER_RESOURCE,
                queue: QueueType::Graphics
            })
        );
        list.end();
    }

    #[test]
    fn test_batch_records_one_barrier() {
        let device = headless_device();
        let mut pool = device
            .create_command_list_pool(&CommandListPoolDesc::new(QueueType::Compute, 1, 1))
            .unwrap();
        let a = device.create_buffer_resource(&BufferDesc::new(16)).unwrap();
        let b = device.create_buffer_resource(&BufferDesc::new(16)).unwrap();
        let tracking = ResourceTracking::new();
        tracking.track_buffer(&b, ResourceUsage::UNORDERED_ACCESS, QueueType::Compute);

        let list = pool.get_next_in_flight();
        list.begin();
        let recorded = tracking.batch_transition(
            list,
            &BatchTransitionDesc::new()
                .with(TransitionDesc::buffer(&a, ResourceUsage::COPY_SRC))
                .with(TransitionDesc::buffer(&b, ResourceUsage::UNORDERED_ACCESS)),
        );
        // UAV to UAV still needs a barrier
        assert_eq!(recorded, 2);
        assert_eq!(list.num_commands(), 1);
        assert_eq!(tracking.num_tracked(), 2);
        tracking.untrack_buffer(&a);
        assert_eq!(tracking.buffer_state(&a), None);
    }
}
