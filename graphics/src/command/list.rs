//! Command list state machine and recording.

use std::sync::Arc;

use super::desc::{
    CopyBufferRegionDesc, CopyBufferToTextureDesc, CopyTextureRegionDesc, CopyTextureToBufferDesc,
    ExecuteDesc, PipelineBarrierDesc, RenderingAttachmentDesc, RenderingDesc,
};
use super::{
    AttachmentCommand, BufferTextureLayout, BufferTransition, Command, RenderingCommand,
    TextureRegion, TextureTransition,
};
use crate::backend::{GpuBackend, GpuSemaphore, Submission};
use crate::binding::ResourceBindGroup;
use crate::error::GraphicsError;
use crate::pipeline::{BindPoint, Pipeline};
use crate::profiling::profile_scope;
use crate::raytracing::{AsBuildFlags, BottomLevelAs, TopLevelAs, UpdateTopLevelAsDesc};
use crate::resources::{BufferResource, TextureResource};
use crate::swapchain::{PresentResult, SwapChain};
use crate::sync::{Fence, Semaphore};
use crate::types::{
    Extent3d, Format, IndexType, Offset3d, QueueType, ScissorRect, Viewport, range_fits,
};

/// Lifecycle of a command list.
///
/// `Initial → Recording (begin) → Executable (end) → Submitted (execute)`.
/// The next [`begin`](CommandList::begin) waits for the previous submission's
/// fence and starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListState {
    Initial,
    Recording,
    Executable,
    Submitted,
}

/// A recording target bound to one queue.
///
/// Created through a [`CommandListPool`](crate::CommandListPool).
///
/// # Panics
///
/// Recording while not in the `Recording` state, recording a command the
/// list's queue cannot execute, and copies outside a resource's bounds panic.
pub struct CommandList {
    id: u64,
    queue_type: QueueType,
    backend: Arc<dyn GpuBackend>,
    state: CommandListState,
    commands: Vec<Command>,
    last_fence: Option<Fence>,
    rendering: bool,
    bound_pipeline: Option<BindPoint>,
}

impl CommandList {
    pub(crate) fn new(id: u64, queue_type: QueueType, backend: Arc<dyn GpuBackend>) -> Self {
        Self {
            id,
            queue_type,
            backend,
            state: CommandListState::Initial,
            commands: Vec::new(),
            last_fence: None,
            rendering: false,
            bound_pipeline: None,
        }
    }

    /// Unique identifier of this list.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    /// Number of commands recorded since the last `begin`.
    pub fn num_commands(&self) -> usize {
        self.commands.len()
    }

    /// Start recording.
    ///
    /// A submitted list first waits for the fence it was executed with.
    ///
    /// # Panics
    ///
    /// Panics if the list is already recording.
    pub fn begin(&mut self) {
        assert!(
            self.state != CommandListState::Recording,
            "command list {}: begin called while already recording",
            self.id
        );
        self.reset();
        self.state = CommandListState::Recording;
    }

    /// Wait for the last submission and return to the initial state.
    pub fn reset(&mut self) {
        if let Some(fence) = self.last_fence.take() {
            fence.wait();
        }
        self.commands.clear();
        self.rendering = false;
        self.bound_pipeline = None;
        self.state = CommandListState::Initial;
    }

    /// Stop recording.
    ///
    /// # Panics
    ///
    /// Panics if the list is not recording or a rendering scope is open.
    pub fn end(&mut self) {
        self.assert_recording("end");
        assert!(
            !self.rendering,
            "command list {}: end called inside a rendering scope",
            self.id
        );
        self.state = CommandListState::Executable;
    }

    fn assert_recording(&self, operation: &str) {
        assert!(
            self.state == CommandListState::Recording,
            "command list {}: {operation} requires the Recording state, list is {:?}",
            self.id,
            self.state
        );
    }

    fn assert_queue(&self, operation: &str, allowed: &[QueueType]) {
        assert!(
            allowed.contains(&self.queue_type),
            "command list {}: {operation} is not supported on the {} queue",
            self.id,
            self.queue_type.name()
        );
    }

    fn push(&mut self, command: Command) {
        self.assert_recording(command.name());
        self.commands.push(command);
    }

    /// Open a dynamic rendering scope on the given attachments.
    pub fn begin_rendering(&mut self, desc: &RenderingDesc<'_>) {
        self.assert_queue("begin_rendering", &[QueueType::Graphics]);
        assert!(
            !self.rendering,
            "command list {}: rendering scopes cannot nest",
            self.id
        );
        let first = desc
            .color_attachments
            .first()
            .or(desc.depth_attachment.as_ref());
        let (width, height) = match (desc.render_area, first) {
            (Some(area), _) => area,
            (None, Some(attachment)) => (attachment.resource.width(), attachment.resource.height()),
            (None, None) => panic!(
                "command list {}: begin_rendering needs an attachment or a render area",
                self.id
            ),
        };
        let attachment = |a: &RenderingAttachmentDesc<'_>| AttachmentCommand {
            texture: Arc::clone(a.resource.handle()),
            load: a.load_op,
            store: a.store_op,
            clear: a.clear_value,
        };
        self.push(Command::BeginRendering(RenderingCommand {
            color: desc.color_attachments.iter().map(attachment).collect(),
            depth: desc.depth_attachment.as_ref().map(attachment),
            width,
            height,
        }));
        self.rendering = true;
    }

    pub fn end_rendering(&mut self) {
        assert!(
            self.rendering,
            "command list {}: end_rendering without begin_rendering",
            self.id
        );
        self.push(Command::EndRendering);
        self.rendering = false;
    }

    pub fn bind_pipeline(&mut self, pipeline: &Pipeline) {
        match pipeline.bind_point() {
            BindPoint::Graphics => self.assert_queue("bind_pipeline", &[QueueType::Graphics]),
            BindPoint::Compute => {
                self.assert_queue("bind_pipeline", &[QueueType::Graphics, QueueType::Compute])
            }
        }
        self.push(Command::BindPipeline(Arc::clone(pipeline.handle())));
        self.bound_pipeline = Some(pipeline.bind_point());
    }

    pub fn bind_vertex_buffer(&mut self, slot: u32, buffer: &BufferResource, offset: u64) {
        self.assert_queue("bind_vertex_buffer", &[QueueType::Graphics]);
        assert!(offset < buffer.num_bytes(), "vertex buffer offset out of range");
        self.push(Command::BindVertexBuffer {
            slot,
            buffer: Arc::clone(buffer.handle()),
            offset,
        });
    }

    pub fn bind_index_buffer(&mut self, buffer: &BufferResource, offset: u64, index_type: IndexType) {
        self.assert_queue("bind_index_buffer", &[QueueType::Graphics]);
        assert!(offset < buffer.num_bytes(), "index buffer offset out of range");
        self.push(Command::BindIndexBuffer {
            buffer: Arc::clone(buffer.handle()),
            offset,
            index_type,
        });
    }

    pub fn bind_viewport(&mut self, viewport: Viewport) {
        self.assert_queue("bind_viewport", &[QueueType::Graphics]);
        self.push(Command::SetViewport(viewport));
    }

    pub fn bind_scissor_rect(&mut self, rect: ScissorRect) {
        self.assert_queue("bind_scissor_rect", &[QueueType::Graphics]);
        self.push(Command::SetScissor(rect));
    }

    /// Bind a resource group's descriptors (and root constants) for
    /// subsequent draws or dispatches.
    ///
    /// # Panics
    ///
    /// Panics if the group is in the middle of an update.
    pub fn bind_resource_group(&mut self, group: &ResourceBindGroup) {
        self.assert_queue(
            "bind_resource_group",
            &[QueueType::Graphics, QueueType::Compute],
        );
        assert!(
            !group.is_updating(),
            "command list {}: bind group bound between begin_update and end_update",
            self.id
        );
        self.push(Command::BindResourceGroup {
            root_signature: Arc::clone(group.root_signature().handle()),
            group: Arc::clone(group.handle()),
            register_space: group.register_space(),
            root_constants: group.root_constant_snapshot(),
        });
    }

    /// Record resource transitions and update the resources' current usage.
    pub fn pipeline_barrier(&mut self, desc: &PipelineBarrierDesc<'_>) {
        if desc.is_empty() {
            return;
        }
        let buffers = desc
            .buffer_barriers
            .iter()
            .map(|b| {
                b.resource.set_current_usage(b.new_state);
                BufferTransition {
                    buffer: Arc::clone(b.resource.handle()),
                    old: b.old_state,
                    new: b.new_state,
                }
            })
            .collect();
        let textures = desc
            .texture_barriers
            .iter()
            .map(|t| {
                let texture = t.resource;
                assert!(
                    t.base_mip < texture.mip_levels() && t.base_layer < texture.array_size(),
                    "texture barrier subresource out of range"
                );
                texture.set_current_usage(t.new_state);
                let mip_count = match t.mip_count {
                    0 => texture.mip_levels() - t.base_mip,
                    n => n,
                };
                let layer_count = match t.layer_count {
                    0 => texture.array_size() - t.base_layer,
                    n => n,
                };
                TextureTransition {
                    texture: Arc::clone(texture.handle()),
                    old: t.old_state,
                    new: t.new_state,
                    base_mip: t.base_mip,
                    mip_count,
                    base_layer: t.base_layer,
                    layer_count,
                }
            })
            .collect();
        self.push(Command::PipelineBarrier { buffers, textures });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.assert_draw("draw");
        self.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.assert_draw("draw_indexed");
        self.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    fn assert_draw(&self, operation: &str) {
        self.assert_queue(operation, &[QueueType::Graphics]);
        assert!(
            self.rendering,
            "command list {}: {operation} outside a rendering scope",
            self.id
        );
        assert!(
            self.bound_pipeline == Some(BindPoint::Graphics),
            "command list {}: {operation} without a bound graphics pipeline",
            self.id
        );
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.assert_queue("dispatch", &[QueueType::Graphics, QueueType::Compute]);
        assert!(
            self.bound_pipeline == Some(BindPoint::Compute),
            "command list {}: dispatch without a bound compute pipeline",
            self.id
        );
        self.push(Command::Dispatch { x, y, z });
    }

    pub fn build_bottom_level_as(&mut self, blas: &BottomLevelAs) {
        self.assert_queue("build_bottom_level_as", &[QueueType::Graphics, QueueType::Compute]);
        self.push(Command::BuildBottomLevelAs {
            geometries: Arc::clone(blas.geometries()),
            result: Arc::clone(blas.buffer().handle()),
        });
    }

    /// Build a top level structure. Its bottom level structures must be
    /// built first, earlier on this list or on a queue this one waited for.
    pub fn build_top_level_as(&mut self, tlas: &TopLevelAs) {
        self.assert_queue("build_top_level_as", &[QueueType::Graphics, QueueType::Compute]);
        self.push(top_level_build(tlas, false));
    }

    /// Replace the transforms of the first instances and refit.
    ///
    /// The instance buffer is written when this is recorded, so earlier
    /// builds of the same structure must have completed.
    ///
    /// # Panics
    ///
    /// Panics if the structure was not created with
    /// [`AsBuildFlags::ALLOW_UPDATE`] or there are more transforms than
    /// instances.
    pub fn update_top_level_as(&mut self, desc: &UpdateTopLevelAsDesc<'_>) {
        self.assert_queue("update_top_level_as", &[QueueType::Graphics, QueueType::Compute]);
        self.assert_recording("update_top_level_as");
        let tlas = desc.top_level_as;
        assert!(
            tlas.build_flags().contains(AsBuildFlags::ALLOW_UPDATE),
            "update_top_level_as: structure {} was not created with ALLOW_UPDATE",
            tlas.id()
        );
        assert!(
            desc.transforms.len() <= tlas.num_instances(),
            "update_top_level_as: {} transforms for {} instances",
            desc.transforms.len(),
            tlas.num_instances()
        );
        if let Err(e) = tlas.write_transforms(desc.transforms) {
            log::error!("CommandList: writing instance transforms failed: {e}");
        }
        self.push(top_level_build(tlas, true));
    }

    pub fn copy_buffer_region(&mut self, desc: &CopyBufferRegionDesc<'_>) {
        assert!(
            range_fits(desc.src_offset, desc.num_bytes, desc.src_buffer.num_bytes()),
            "copy_buffer_region: {} bytes at source offset {} exceed buffer size {}",
            desc.num_bytes,
            desc.src_offset,
            desc.src_buffer.num_bytes()
        );
        assert!(
            range_fits(desc.dst_offset, desc.num_bytes, desc.dst_buffer.num_bytes()),
            "copy_buffer_region: {} bytes at destination offset {} exceed buffer size {}",
            desc.num_bytes,
            desc.dst_offset,
            desc.dst_buffer.num_bytes()
        );
        self.push(Command::CopyBufferRegion {
            src: Arc::clone(desc.src_buffer.handle()),
            src_offset: desc.src_offset,
            dst: Arc::clone(desc.dst_buffer.handle()),
            dst_offset: desc.dst_offset,
            num_bytes: desc.num_bytes,
        });
    }

    pub fn copy_texture_region(&mut self, desc: &CopyTextureRegionDesc<'_>) {
        let extent = desc
            .extent
            .unwrap_or_else(|| desc.src_texture.subresource_extent(desc.src_mip));
        let src_region = texture_region(
            desc.src_texture,
            desc.src_mip,
            desc.src_layer,
            desc.src_offset,
            Some(extent),
        );
        let dst_region = texture_region(
            desc.dst_texture,
            desc.dst_mip,
            desc.dst_layer,
            desc.dst_offset,
            Some(extent),
        );
        assert!(
            desc.src_texture.format().block_size() == desc.dst_texture.format().block_size(),
            "copy_texture_region: incompatible formats {:?} and {:?}",
            desc.src_texture.format(),
            desc.dst_texture.format()
        );
        self.push(Command::CopyTextureRegion {
            src: Arc::clone(desc.src_texture.handle()),
            src_region,
            dst: Arc::clone(desc.dst_texture.handle()),
            dst_region,
        });
    }

    pub fn copy_buffer_to_texture(&mut self, desc: &CopyBufferToTextureDesc<'_>) {
        let region = texture_region(
            desc.dst_texture,
            desc.mip_level,
            desc.array_layer,
            desc.dst_offset,
            desc.extent,
        );
        let layout = buffer_layout(
            desc.dst_texture.format(),
            &region,
            desc.src_buffer,
            desc.src_offset,
            desc.row_pitch,
        );
        self.push(Command::CopyBufferToTexture {
            src: Arc::clone(desc.src_buffer.handle()),
            layout,
            dst: Arc::clone(desc.dst_texture.handle()),
            region,
        });
    }

    pub fn copy_texture_to_buffer(&mut self, desc: &CopyTextureToBufferDesc<'_>) {
        let region = texture_region(
            desc.src_texture,
            desc.mip_level,
            desc.array_layer,
            desc.src_offset,
            desc.extent,
        );
        let layout = buffer_layout(
            desc.src_texture.format(),
            &region,
            desc.dst_buffer,
            desc.dst_offset,
            desc.row_pitch,
        );
        self.push(Command::CopyTextureToBuffer {
            src: Arc::clone(desc.src_texture.handle()),
            region,
            dst: Arc::clone(desc.dst_buffer.handle()),
            layout,
        });
    }

    /// Submit the recorded commands to the list's queue.
    ///
    /// # Panics
    ///
    /// Panics unless the list is `Executable`.
    pub fn execute(&mut self, desc: &ExecuteDesc<'_>) -> Result<(), GraphicsError> {
        profile_scope!("CommandList::execute");
        assert!(
            self.state == CommandListState::Executable,
            "command list {}: execute requires the Executable state, list is {:?}",
            self.id,
            self.state
        );

        if let Some(fence) = desc.notify {
            fence.begin_submit()?;
        }
        let waits: Vec<&GpuSemaphore> = desc.wait_on_semaphores.iter().map(|s| s.handle()).collect();
        let signals: Vec<&GpuSemaphore> = desc.notify_semaphores.iter().map(|s| s.handle()).collect();
        self.backend.submit(Submission {
            queue: self.queue_type,
            commands: &self.commands,
            wait_semaphores: &waits,
            signal_semaphores: &signals,
            signal_fence: desc.notify.map(Fence::handle),
        })?;
        if let Some(fence) = desc.notify {
            fence.end_submit();
        }

        log::trace!(
            "CommandList {}: submitted {} commands to the {} queue",
            self.id,
            self.commands.len(),
            self.queue_type.name()
        );
        self.last_fence = desc.notify.cloned();
        self.state = CommandListState::Submitted;
        Ok(())
    }

    /// Present a swap chain image once `wait_semaphores` are signaled.
    pub fn present(
        &mut self,
        swap_chain: &SwapChain,
        image_index: u32,
        wait_semaphores: &[&Semaphore],
    ) -> PresentResult {
        self.assert_queue("present", &[QueueType::Graphics]);
        swap_chain.present(image_index, wait_semaphores)
    }
}

impl std::fmt::Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("id", &self.id)
            .field("queue_type", &self.queue_type)
            .field("state", &self.state)
            .field("num_commands", &self.commands.len())
            .finish()
    }
}

fn top_level_build(tlas: &TopLevelAs, update: bool) -> Command {
    Command::BuildTopLevelAs {
        instances: Arc::clone(tlas.instance_buffer()),
        blas_results: Arc::clone(tlas.blas_buffers()),
        result: Arc::clone(tlas.buffer().handle()),
        update,
    }
}

fn texture_region(
    texture: &TextureResource,
    mip_level: u32,
    array_layer: u32,
    offset: Offset3d,
    extent: Option<Extent3d>,
) -> TextureRegion {
    assert!(
        mip_level < texture.mip_levels() && array_layer < texture.array_size(),
        "texture copy: subresource (mip {mip_level}, layer {array_layer}) out of range for {:?}",
        texture.debug_name()
    );
    let mip_extent = texture.subresource_extent(mip_level);
    let extent = extent.unwrap_or(mip_extent);
    assert!(
        offset.x + extent.width <= mip_extent.width
            && offset.y + extent.height <= mip_extent.height
            && offset.z + extent.depth <= mip_extent.depth,
        "texture copy: region {offset:?} + {extent:?} exceeds mip extent {mip_extent:?}"
    );
    TextureRegion {
        mip_level,
        array_layer,
        offset,
        extent,
    }
}

fn buffer_layout(
    format: Format,
    region: &TextureRegion,
    buffer: &BufferResource,
    offset: u64,
    row_pitch: u64,
) -> BufferTextureLayout {
    let row_bytes = format.row_bytes(region.extent.width) as u64;
    let row_pitch = if row_pitch == 0 { row_bytes } else { row_pitch };
    assert!(
        row_pitch >= row_bytes,
        "texture copy: row pitch {row_pitch} is smaller than a row ({row_bytes} bytes)"
    );
    let rows_per_slice = format.num_rows(region.extent.height);
    let num_rows = rows_per_slice as u64 * region.extent.depth as u64;
    let span = row_pitch
        .checked_mul(num_rows.saturating_sub(1))
        .and_then(|rows| rows.checked_add(row_bytes));
    assert!(
        span.is_some_and(|span| range_fits(offset, span, buffer.num_bytes())),
        "texture copy: {num_rows} rows of pitch {row_pitch} at offset {offset} exceed buffer size {}",
        buffer.num_bytes()
    );
    BufferTextureLayout {
        offset,
        row_pitch,
        rows_per_slice,
    }
}

static_assertions::assert_impl_all!(CommandList: Send, Sync);

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::command::{CommandListPoolDesc, TextureBarrierDesc};
    use crate::resources::{BufferDesc, TextureDesc};
    use crate::test_utils::headless_device;
    use crate::types::ResourceUsage;

    fn copy_list(device: &crate::LogicalDevice) -> crate::CommandListPool {
        device
            .create_command_list_pool(&CommandListPoolDesc::new(QueueType::Copy, 1, 1))
            .unwrap()
    }

    #[test]
    fn test_state_machine() {
        let device = headless_device();
        let mut pool = copy_list(&device);
        let fence = device.create_fence().unwrap();
        let list = pool.get_next_in_flight();

        assert_eq!(list.state(), CommandListState::Initial);
        list.begin();
        assert_eq!(list.state(), CommandListState::Recording);
        list.end();
        assert_eq!(list.state(), CommandListState::Executable);
        list.execute(&ExecuteDesc::new().with_notify(&fence)).unwrap();
        assert_eq!(list.state(), CommandListState::Submitted);
        list.begin();
        assert!(!fence.is_pending() || fence.is_signaled());
        assert_eq!(list.state(), CommandListState::Recording);
    }

    #[test]
    #[should_panic(expected = "requires the Recording state")]
    fn test_end_without_begin_panics() {
        let device = headless_device();
        let mut pool = copy_list(&device);
        pool.get_next_in_flight().end();
    }

    #[test]
    #[should_panic(expected = "requires the Executable state")]
    fn test_execute_while_recording_panics() {
        let device = headless_device();
        let mut pool = copy_list(&device);
        let list = pool.get_next_in_flight();
        list.begin();
        let _ = list.execute(&ExecuteDesc::new());
    }

    #[test]
    #[should_panic(expected = "not supported on the copy queue")]
    fn test_copy_queue_rejects_viewport() {
        let device = headless_device();
        let mut pool = copy_list(&device);
        let list = pool.get_next_in_flight();
        list.begin();
        list.bind_viewport(Viewport::from_dimensions(4, 4));
    }

    #[test]
    #[should_panic(expected = "exceed buffer size")]
    fn test_copy_out_of_bounds_panics() {
        let device = headless_device();
        let mut pool = copy_list(&device);
        let src = device.create_buffer_resource(&BufferDesc::upload(16)).unwrap();
        let dst = device.create_buffer_resource(&BufferDesc::new(8)).unwrap();
        let list = pool.get_next_in_flight();
        list.begin();
        list.copy_buffer_region(&CopyBufferRegionDesc::whole(&src, &dst));
    }

    #[test]
    #[should_panic(expected = "exceed buffer size")]
    fn test_copy_with_overflowing_offset_panics_with_bounds_message() {
        let device = headless_device();
        let mut pool = copy_list(&device);
        let src = device.create_buffer_resource(&BufferDesc::upload(16)).unwrap();
        let dst = device.create_buffer_resource(&BufferDesc::new(16)).unwrap();
        let list = pool.get_next_in_flight();
        list.begin();
        list.copy_buffer_region(&CopyBufferRegionDesc {
            src_buffer: &src,
            src_offset: u64::MAX,
            dst_buffer: &dst,
            dst_offset: 0,
            num_bytes: 2,
        });
    }

    #[test]
    fn test_barrier_updates_current_usage() {
        let device = headless_device();
        let mut pool = copy_list(&device);
        let texture = device
            .create_texture_resource(&TextureDesc::new_2d(4, 4, Format::Rgba8Unorm))
            .unwrap();
        let list = pool.get_next_in_flight();
        list.begin();
        list.pipeline_barrier(
            &PipelineBarrierDesc::new()
                .texture(TextureBarrierDesc::new(&texture, ResourceUsage::COPY_DST)),
        );
        assert_eq!(texture.current_usage(), ResourceUsage::COPY_DST);
        assert_eq!(list.num_commands(), 1);
        list.pipeline_barrier(&PipelineBarrierDesc::new());
        assert_eq!(list.num_commands(), 1);
    }
}
