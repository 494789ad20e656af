use std::sync::Arc;

use crate::command::CommandList;
use crate::resources::{BufferResource, TextureResource};
use crate::swapchain::SwapChain;
use crate::tracking::TransitionDesc;
use crate::types::{QueueType, ResourceUsage};

/// What a node callback records into.
pub struct NodeContext<'a> {
    pub list: &'a mut CommandList,
    pub frame_index: usize,
    /// The acquired back buffer, for the present node only.
    pub back_buffer: Option<&'a TextureResource>,
}

/// Records a node's commands. Called once per frame.
pub type NodeCallback = Box<dyn FnMut(&mut NodeContext<'_>) + Send>;

/// A resource shared with the graph.
#[derive(Debug, Clone)]
pub enum GraphResource {
    Buffer(Arc<BufferResource>),
    Texture(Arc<TextureResource>),
}

/// Usage a node needs a resource in before its callback runs.
#[derive(Debug, Clone)]
pub struct RequiredState {
    pub resource: GraphResource,
    pub usage: ResourceUsage,
}

impl RequiredState {
    pub fn buffer(buffer: &Arc<BufferResource>, usage: ResourceUsage) -> Self {
        Self {
            resource: GraphResource::Buffer(Arc::clone(buffer)),
            usage,
        }
    }

    pub fn texture(texture: &Arc<TextureResource>, usage: ResourceUsage) -> Self {
        Self {
            resource: GraphResource::Texture(Arc::clone(texture)),
            usage,
        }
    }

    pub(crate) fn transition(&self) -> TransitionDesc<'_> {
        match &self.resource {
            GraphResource::Buffer(buffer) => TransitionDesc::buffer(buffer, self.usage),
            GraphResource::Texture(texture) => TransitionDesc::texture(texture, self.usage),
        }
    }
}

/// A unit of GPU work on one queue.
pub struct NodeDesc {
    pub name: String,
    pub queue_type: QueueType,
    /// Names of nodes that must finish first.
    pub dependencies: Vec<String>,
    pub required_states: Vec<RequiredState>,
    pub execute: NodeCallback,
}

impl NodeDesc {
    pub fn new(
        name: impl Into<String>,
        queue_type: QueueType,
        execute: impl FnMut(&mut NodeContext<'_>) + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            queue_type,
            dependencies: Vec::new(),
            required_states: Vec::new(),
            execute: Box::new(execute),
        }
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    pub fn with_required_state(mut self, state: RequiredState) -> Self {
        self.required_states.push(state);
        self
    }
}

impl std::fmt::Debug for NodeDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDesc")
            .field("name", &self.name)
            .field("queue_type", &self.queue_type)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// The final node: renders into the swap chain image and presents it.
///
/// Always runs on the graphics queue. The back buffer is in
/// `RENDER_TARGET` usage while the callback runs.
pub struct PresentNodeDesc {
    pub dependencies: Vec<String>,
    pub required_states: Vec<RequiredState>,
    pub swap_chain: SwapChain,
    pub execute: NodeCallback,
}

impl PresentNodeDesc {
    pub fn new(
        swap_chain: SwapChain,
        execute: impl FnMut(&mut NodeContext<'_>) + Send + 'static,
    ) -> Self {
        Self {
            dependencies: Vec::new(),
            required_states: Vec::new(),
            swap_chain,
            execute: Box::new(execute),
        }
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    pub fn with_required_state(mut self, state: RequiredState) -> Self {
        self.required_states.push(state);
        self
    }
}

impl std::fmt::Debug for PresentNodeDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresentNodeDesc")
            .field("dependencies", &self.dependencies)
            .field("swap_chain", &self.swap_chain)
            .finish()
    }
}
