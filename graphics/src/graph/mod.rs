//! Render graph.
//!
//! A [`RenderGraph`] is a set of named nodes, each recording GPU work on one
//! queue, connected by dependencies. [`RenderGraph::build`] orders the nodes
//! and provisions per-frame command lists, fences and one semaphore per
//! dependency edge. [`RenderGraph::update`] records and submits one frame.
//!
//! An optional present node runs last on the graphics queue, renders into
//! the acquired swap chain image and presents it.
//!
//! # Example
//!
//! ```ignore
//! let mut graph = RenderGraph::new(&device, RenderGraphDesc::default());
//! graph.add_node(NodeDesc::new("upload", QueueType::Copy, |ctx| { /* ... */ }))?;
//! graph.add_node(
//!     NodeDesc::new("simulate", QueueType::Compute, |ctx| { /* ... */ })
//!         .with_dependency("upload"),
//! )?;
//! graph.set_present_node(
//!     PresentNodeDesc::new(swap_chain, |ctx| { /* draw into ctx.back_buffer */ })
//!         .with_dependency("simulate"),
//! );
//! graph.build()?;
//!
//! loop {
//!     graph.update()?;
//! }
//! ```

mod error;
mod node;

pub use error::GraphError;
pub use node::{GraphResource, NodeCallback, NodeContext, NodeDesc, PresentNodeDesc, RequiredState};

use std::sync::Arc;

use crate::command::{CommandList, CommandListPool, CommandListPoolDesc, ExecuteDesc, PipelineBarrierDesc};
use crate::device::LogicalDevice;
use crate::error::GraphicsError;
use crate::profiling::profile_scope;
use crate::swapchain::{PresentResult, SwapChain};
use crate::sync::{Fence, Semaphore};
use crate::tracking::{BatchTransitionDesc, ResourceTracking};
use crate::types::QueueType;

/// Name reported for the present node by [`RenderGraph::execution_order`].
pub const PRESENT_NODE_NAME: &str = "present";

/// Sizing of a render graph's per-frame command list pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderGraphDesc {
    pub num_frames: u32,
    pub num_graphics_command_lists: u32,
    pub num_compute_command_lists: u32,
    pub num_copy_command_lists: u32,
}

impl Default for RenderGraphDesc {
    fn default() -> Self {
        Self {
            num_frames: 3,
            num_graphics_command_lists: 8,
            num_compute_command_lists: 2,
            num_copy_command_lists: 1,
        }
    }
}

impl RenderGraphDesc {
    pub fn with_num_frames(mut self, num_frames: u32) -> Self {
        self.num_frames = num_frames;
        self
    }

    pub fn with_command_lists(mut self, queue: QueueType, count: u32) -> Self {
        match queue {
            QueueType::Graphics => self.num_graphics_command_lists = count,
            QueueType::Compute => self.num_compute_command_lists = count,
            QueueType::Copy => self.num_copy_command_lists = count,
        }
        self
    }

    pub fn num_command_lists(&self, queue: QueueType) -> u32 {
        match queue {
            QueueType::Graphics => self.num_graphics_command_lists,
            QueueType::Compute => self.num_compute_command_lists,
            QueueType::Copy => self.num_copy_command_lists,
        }
    }
}

/// Per-frame objects of a built graph.
struct FrameResources {
    /// Indexed by [`QueueType::index`]; `None` when the queue has no lists.
    pools: [Option<CommandListPool>; 3],
    /// One per edge, indexed like [`BuiltGraph::edges`].
    edge_semaphores: Vec<Semaphore>,
    /// One per node; the present node's fence is last.
    node_fences: Vec<Fence>,
    image_ready: Semaphore,
    image_rendered: Semaphore,
}

fn frame_list<'a>(
    pools: &'a mut [Option<CommandListPool>; 3],
    queue: QueueType,
    index: usize,
) -> &'a mut CommandList {
    pools[queue.index()]
        .as_mut()
        .and_then(|pool| pool.command_list_mut(index))
        .unwrap_or_else(|| panic!("render graph: no {} command list {index}", queue.name()))
}

struct BuiltGraph {
    /// Node indices in execution order, present node excluded.
    order: Vec<usize>,
    /// Command list index of each node within its queue's pool.
    list_indices: Vec<usize>,
    /// `(producer, consumer)` node indices; the present node is `nodes.len()`.
    edges: Vec<(usize, usize)>,
    frames: Vec<FrameResources>,
}

/// Frame graph of GPU work across the graphics, compute and copy queues.
pub struct RenderGraph {
    device: Arc<LogicalDevice>,
    desc: RenderGraphDesc,
    nodes: Vec<NodeDesc>,
    present: Option<PresentNodeDesc>,
    built: Option<BuiltGraph>,
    tracking: ResourceTracking,
    frame_index: usize,
}

impl RenderGraph {
    pub fn new(device: &Arc<LogicalDevice>, desc: RenderGraphDesc) -> Self {
        Self {
            device: Arc::clone(device),
            desc,
            nodes: Vec::new(),
            present: None,
            built: None,
            tracking: ResourceTracking::new(),
            frame_index: 0,
        }
    }

    pub fn desc(&self) -> &RenderGraphDesc {
        &self.desc
    }

    /// Add a node. The graph must be rebuilt before the next update.
    pub fn add_node(&mut self, node: NodeDesc) -> Result<(), GraphError> {
        if node.name.is_empty() {
            return Err(GraphError::EmptyNodeName);
        }
        if node.name == PRESENT_NODE_NAME || self.nodes.iter().any(|n| n.name == node.name) {
            return Err(GraphError::DuplicateNode(node.name));
        }
        self.nodes.push(node);
        self.invalidate();
        Ok(())
    }

    /// Set the node that renders to and presents the swap chain. Replaces any
    /// previous present node.
    pub fn set_present_node(&mut self, node: PresentNodeDesc) {
        self.present = Some(node);
        self.invalidate();
    }

    pub fn swap_chain(&self) -> Option<&SwapChain> {
        self.present.as_ref().map(|p| &p.swap_chain)
    }

    /// The present node's swap chain, e.g. to resize it.
    ///
    /// Call [`wait_idle`](Self::wait_idle) before resizing.
    pub fn swap_chain_mut(&mut self) -> Option<&mut SwapChain> {
        self.present.as_mut().map(|p| &mut p.swap_chain)
    }

    /// Remove every node after waiting for in-flight frames.
    pub fn reset(&mut self) {
        self.wait_idle();
        self.nodes.clear();
        self.present = None;
        self.built = None;
        self.frame_index = 0;
    }

    fn invalidate(&mut self) {
        if self.built.is_some() {
            self.wait_idle();
            self.built = None;
        }
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Order nodes and create the per-frame command lists and sync objects.
    pub fn build(&mut self) -> Result<(), GraphError> {
        profile_scope!("RenderGraph::build");
        self.wait_idle();
        self.built = None;

        let index_of = |name: &str| self.nodes.iter().position(|n| n.name == name);
        let present_index = self.nodes.len();

        let mut edges = Vec::new();
        let mut dependencies: Vec<Vec<usize>> = Vec::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            let mut deps = Vec::with_capacity(node.dependencies.len());
            for dependency in &node.dependencies {
                let d = index_of(dependency).ok_or_else(|| GraphError::MissingDependency {
                    node: node.name.clone(),
                    dependency: dependency.clone(),
                })?;
                if !deps.contains(&d) {
                    deps.push(d);
                    edges.push((d, i));
                }
            }
            dependencies.push(deps);
        }
        if let Some(present) = &self.present {
            for dependency in &present.dependencies {
                let d = index_of(dependency).ok_or_else(|| GraphError::MissingDependency {
                    node: PRESENT_NODE_NAME.to_string(),
                    dependency: dependency.clone(),
                })?;
                if !edges.contains(&(d, present_index)) {
                    edges.push((d, present_index));
                }
            }
        }

        let order = resolve_order(&self.nodes, &dependencies)?;
        let list_indices = self.assign_command_lists()?;

        let mut frames = Vec::with_capacity(self.desc.num_frames as usize);
        for _ in 0..self.desc.num_frames.max(1) {
            frames.push(self.create_frame_resources(edges.len())?);
        }

        log::debug!(
            "RenderGraph: built {} nodes, {} edges, {} frames",
            self.nodes.len() + usize::from(self.present.is_some()),
            edges.len(),
            frames.len()
        );
        self.built = Some(BuiltGraph {
            order,
            list_indices,
            edges,
            frames,
        });
        self.frame_index = 0;
        Ok(())
    }

    /// Graphics list 0 is reserved for the present node.
    fn assign_command_lists(&self) -> Result<Vec<usize>, GraphError> {
        let mut next = [1usize, 0, 0];
        let mut indices = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let slot = &mut next[node.queue_type.index()];
            indices.push(*slot);
            *slot += 1;
        }
        let uses_graphics = self.present.is_some()
            || self.nodes.iter().any(|n| n.queue_type == QueueType::Graphics);
        if !uses_graphics {
            next[QueueType::Graphics.index()] = 0;
        }
        for queue in QueueType::ALL {
            let requested = next[queue.index()];
            let available = self.desc.num_command_lists(queue) as usize;
            if requested > available {
                return Err(GraphError::NotEnoughCommandLists {
                    queue,
                    requested,
                    available,
                });
            }
        }
        Ok(indices)
    }

    fn create_frame_resources(&self, num_edges: usize) -> Result<FrameResources, GraphicsError> {
        let mut pools: [Option<CommandListPool>; 3] = [None, None, None];
        for queue in QueueType::ALL {
            let count = self.desc.num_command_lists(queue);
            if count > 0 {
                pools[queue.index()] = Some(
                    self.device
                        .create_command_list_pool(&CommandListPoolDesc::new(queue, count, 1))?,
                );
            }
        }
        let edge_semaphores = (0..num_edges)
            .map(|_| self.device.create_semaphore())
            .collect::<Result<Vec<_>, _>>()?;
        let num_fences = self.nodes.len() + usize::from(self.present.is_some());
        let node_fences = (0..num_fences)
            .map(|_| self.device.create_fence())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FrameResources {
            pools,
            edge_semaphores,
            node_fences,
            image_ready: self.device.create_semaphore()?,
            image_rendered: self.device.create_semaphore()?,
        })
    }

    /// Record and submit one frame, then advance to the next frame slot.
    pub fn update(&mut self) -> Result<(), GraphError> {
        profile_scope!("RenderGraph::update");
        let Self {
            device,
            nodes,
            present,
            built,
            tracking,
            frame_index,
            ..
        } = self;
        let built = built.as_mut().ok_or(GraphError::NotBuilt)?;
        let frame_count = built.frames.len();
        let frame = &mut built.frames[*frame_index];

        for fence in &frame.node_fences {
            fence.wait();
        }

        for &i in &built.order {
            let node = &mut nodes[i];
            let list = frame_list(&mut frame.pools, node.queue_type, built.list_indices[i]);
            list.begin();
            record_required_states(tracking, list, &node.required_states);
            (node.execute)(&mut NodeContext {
                list: &mut *list,
                frame_index: *frame_index,
                back_buffer: None,
            });
            list.end();

            let mut execute = ExecuteDesc::new().with_notify(&frame.node_fences[i]);
            for (edge, &(producer, consumer)) in built.edges.iter().enumerate() {
                if consumer == i {
                    execute = execute.wait_on(&frame.edge_semaphores[edge]);
                }
                if producer == i {
                    execute = execute.notify_semaphore(&frame.edge_semaphores[edge]);
                }
            }
            list.execute(&execute)?;
        }

        if let Some(present) = present.as_mut() {
            profile_scope!("RenderGraph::present");
            let present_index = nodes.len();
            let image = present.swap_chain.acquire_next_image(&frame.image_ready)?;
            let back_buffer = present.swap_chain.render_target(image);
            let list = frame_list(&mut frame.pools, QueueType::Graphics, 0);
            list.begin();
            record_required_states(tracking, list, &present.required_states);
            list.pipeline_barrier(&PipelineBarrierDesc::undefined_to_render_target(back_buffer));
            (present.execute)(&mut NodeContext {
                list: &mut *list,
                frame_index: *frame_index,
                back_buffer: Some(back_buffer),
            });
            list.pipeline_barrier(&PipelineBarrierDesc::render_target_to_present(back_buffer));
            list.end();

            let mut execute = ExecuteDesc::new()
                .with_notify(&frame.node_fences[present_index])
                .wait_on(&frame.image_ready)
                .notify_semaphore(&frame.image_rendered);
            for (edge, &(_, consumer)) in built.edges.iter().enumerate() {
                if consumer == present_index {
                    execute = execute.wait_on(&frame.edge_semaphores[edge]);
                }
            }
            list.execute(&execute)?;

            match list.present(&present.swap_chain, image, &[&frame.image_rendered]) {
                PresentResult::Success => {}
                PresentResult::DeviceLost => return Err(GraphicsError::DeviceLost.into()),
                PresentResult::Suboptimal => {
                    log::debug!("RenderGraph: swap chain is suboptimal, consider resizing")
                }
                PresentResult::Timeout => log::warn!("RenderGraph: present timed out"),
            }
        }

        *frame_index = (*frame_index + 1) % frame_count;
        device.advance_frame();
        crate::frame_mark!();
        Ok(())
    }

    /// Wait for every in-flight frame.
    pub fn wait_idle(&self) {
        if let Some(built) = &self.built {
            for frame in &built.frames {
                for fence in &frame.node_fences {
                    fence.wait();
                }
            }
        }
    }

    /// Node names in the order they are recorded, present node last.
    ///
    /// Empty until the graph is built.
    pub fn execution_order(&self) -> Vec<String> {
        let Some(built) = &self.built else {
            return Vec::new();
        };
        let mut names: Vec<String> = built.order.iter().map(|&i| self.nodes[i].name.clone()).collect();
        if self.present.is_some() {
            names.push(PRESENT_NODE_NAME.to_string());
        }
        names
    }

    /// Slot of the next frame to be recorded.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn resource_tracking(&self) -> &ResourceTracking {
        &self.tracking
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        self.wait_idle();
    }
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("desc", &self.desc)
            .field("nodes", &self.nodes)
            .field("has_present", &self.present.is_some())
            .field("built", &self.built.is_some())
            .field("frame_index", &self.frame_index)
            .finish()
    }
}

fn record_required_states(tracking: &ResourceTracking, list: &mut CommandList, states: &[RequiredState]) {
    if states.is_empty() {
        return;
    }
    let desc = BatchTransitionDesc {
        transitions: states.iter().map(RequiredState::transition).collect(),
    };
    tracking.batch_transition(list, &desc);
}

/// A node is ready once all its dependencies are processed. Each pass scans
/// in insertion order; a pass without progress means a cycle.
fn resolve_order(nodes: &[NodeDesc], dependencies: &[Vec<usize>]) -> Result<Vec<usize>, GraphError> {
    let mut processed = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    while order.len() < nodes.len() {
        let before = order.len();
        for (i, deps) in dependencies.iter().enumerate() {
            if !processed[i] && deps.iter().all(|&d| processed[d]) {
                processed[i] = true;
                order.push(i);
            }
        }
        if order.len() == before {
            let remaining = nodes
                .iter()
                .zip(&processed)
                .filter(|(_, done)| !**done)
                .map(|(n, _)| n.name.clone())
                .collect();
            return Err(GraphError::CyclicDependency(remaining));
        }
    }
    Ok(order)
}

static_assertions::assert_impl_all!(RenderGraph: Send);

#[cfg(all(test, feature = "headless"))]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::resources::BufferDesc;
    use crate::swapchain::SwapChainDesc;
    use crate::test_utils::headless_device;
    use crate::types::ResourceUsage;

    fn noop(_: &mut NodeContext<'_>) {}

    #[test]
    fn test_missing_dependency_is_named() {
        let device = headless_device();
        let mut graph = RenderGraph::new(&device, RenderGraphDesc::default());
        graph
            .add_node(NodeDesc::new("A", QueueType::Graphics, noop).with_dependency("Z"))
            .unwrap();
        assert_eq!(
            graph.build(),
            Err(GraphError::MissingDependency {
                node: "A".into(),
                dependency: "Z".into()
            })
        );
        assert!(!graph.is_built());
    }

    #[test]
    fn test_cycle_detected() {
        let device = headless_device();
        let mut graph = RenderGraph::new(&device, RenderGraphDesc::default());
        graph.add_node(NodeDesc::new("root", QueueType::Copy, noop)).unwrap();
        graph
            .add_node(NodeDesc::new("a", QueueType::Graphics, noop).with_dependency("b"))
            .unwrap();
        graph
            .add_node(NodeDesc::new("b", QueueType::Graphics, noop).with_dependency("a"))
            .unwrap();
        assert_eq!(
            graph.build(),
            Err(GraphError::CyclicDependency(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn test_duplicate_and_empty_names() {
        let device = headless_device();
        let mut graph = RenderGraph::new(&device, RenderGraphDesc::default());
        assert_eq!(
            graph.add_node(NodeDesc::new("", QueueType::Graphics, noop)),
            Err(GraphError::EmptyNodeName)
        );
        graph.add_node(NodeDesc::new("a", QueueType::Graphics, noop)).unwrap();
        assert!(matches!(
            graph.add_node(NodeDesc::new("a", QueueType::Compute, noop)),
            Err(GraphError::DuplicateNode(_))
        ));
    }

    #[test]
    fn test_order_follows_dependencies() {
        let device = headless_device();
        let mut graph = RenderGraph::new(&device, RenderGraphDesc::default());
        graph
            .add_node(NodeDesc::new("lighting", QueueType::Graphics, noop).with_dependency("gbuffer"))
            .unwrap();
        graph
            .add_node(NodeDesc::new("gbuffer", QueueType::Graphics, noop).with_dependency("upload"))
            .unwrap();
        graph.add_node(NodeDesc::new("upload", QueueType::Copy, noop)).unwrap();
        graph.add_node(NodeDesc::new("particles", QueueType::Compute, noop)).unwrap();
        graph.build().unwrap();
        assert_eq!(
            graph.execution_order(),
            vec!["upload", "particles", "gbuffer", "lighting"]
        );
    }

    #[test]
    fn test_not_enough_command_lists() {
        let device = headless_device();
        let mut graph = RenderGraph::new(
            &device,
            RenderGraphDesc::default().with_command_lists(QueueType::Compute, 1),
        );
        graph.add_node(NodeDesc::new("a", QueueType::Compute, noop)).unwrap();
        graph.add_node(NodeDesc::new("b", QueueType::Compute, noop)).unwrap();
        assert_eq!(
            graph.build(),
            Err(GraphError::NotEnoughCommandLists {
                queue: QueueType::Compute,
                requested: 2,
                available: 1
            })
        );
    }

    #[test]
    fn test_update_runs_every_node_each_frame() {
        let device = headless_device();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let buffer = Arc::new(device.create_buffer_resource(&BufferDesc::new(64)).unwrap());

        let mut graph = RenderGraph::new(&device, RenderGraphDesc::default());
        let log = Arc::clone(&calls);
        graph
            .add_node(
                NodeDesc::new("produce", QueueType::Compute, move |ctx| {
                    log.lock().unwrap().push(("produce", ctx.frame_index));
                })
                .with_required_state(RequiredState::buffer(&buffer, ResourceUsage::UNORDERED_ACCESS)),
            )
            .unwrap();
        let log = Arc::clone(&calls);
        graph
            .add_node(
                NodeDesc::new("consume", QueueType::Graphics, move |ctx| {
                    log.lock().unwrap().push(("consume", ctx.frame_index));
                })
                .with_dependency("produce")
                .with_required_state(RequiredState::buffer(&buffer, ResourceUsage::SHADER_RESOURCE)),
            )
            .unwrap();
        assert!(matches!(graph.update(), Err(GraphError::NotBuilt)));
        graph.build().unwrap();

        for _ in 0..5 {
            graph.update().unwrap();
        }
        graph.wait_idle();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 10);
        assert_eq!(calls[0], ("produce", 0));
        assert_eq!(calls[1], ("consume", 0));
        assert_eq!(calls[8], ("produce", 1));
        assert_eq!(graph.frame_index(), 2);
        assert_eq!(
            graph.resource_tracking().buffer_state(&buffer).map(|s| s.usage),
            Some(ResourceUsage::SHADER_RESOURCE)
        );
    }

    #[test]
    fn test_present_node_renders_to_back_buffer() {
        let device = headless_device();
        let swap_chain = device.create_swap_chain(&SwapChainDesc::new(32, 16)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut graph = RenderGraph::new(&device, RenderGraphDesc::default().with_num_frames(2));
        graph.add_node(NodeDesc::new("scene", QueueType::Graphics, noop)).unwrap();
        let log = Arc::clone(&seen);
        graph.set_present_node(
            PresentNodeDesc::new(swap_chain, move |ctx| {
                let back_buffer = ctx.back_buffer.expect("present node has a back buffer");
                assert_eq!(back_buffer.current_usage(), ResourceUsage::RENDER_TARGET);
                log.lock().unwrap().push(back_buffer.id());
            })
            .with_dependency("scene"),
        );
        graph.build().unwrap();
        assert_eq!(graph.execution_order(), vec!["scene", PRESENT_NODE_NAME]);

        for _ in 0..4 {
            graph.update().unwrap();
        }
        graph.wait_idle();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_ne!(seen[0], seen[1]);
        let swap_chain = graph.swap_chain().unwrap();
        assert_eq!(swap_chain.render_target(0).current_usage(), ResourceUsage::PRESENT);
    }

    #[test]
    fn test_reset_clears_nodes() {
        let device = headless_device();
        let mut graph = RenderGraph::new(&device, RenderGraphDesc::default());
        graph.add_node(NodeDesc::new("a", QueueType::Graphics, noop)).unwrap();
        graph.build().unwrap();
        graph.update().unwrap();
        graph.reset();
        assert_eq!(graph.num_nodes(), 0);
        assert!(graph.execution_order().is_empty());
    }
}
