//! GPU integration tests for the graphics crate.
//!
//! Tests are parameterized with `rstest` over every backend. Backends that
//! are not compiled in or have no device are skipped at runtime.
//!
//! ```bash
//! cargo test --test gpu_tests
//! cargo test --test gpu_tests --features vulkan-backend
//! ```

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rstest::rstest;

use common::{Backend, TestContext, generate_test_pattern, seeded_pattern};
use obsidian_graphics::{
    AsBuildSummary, AsGeometryDesc, AsInstanceDesc, BatchResourceCopy, BatchResourceCopyDesc,
    BindGroupResource, BindGroupUpdateDesc, BottomLevelAsDesc, BufferDesc, ClearValue,
    CommandListPoolDesc, CommandListRing, CommandListRingDesc, CopyBufferRegionDesc,
    CopyDataToTextureDesc, CopyToGpuBufferDesc, DescriptorPoolConfig, ExecuteDesc, Format,
    GraphError, GraphicsConfiguration, GraphicsError, NodeDesc, PipelineBarrierDesc, QueueType,
    RenderGraph, RenderGraphDesc, RenderingAttachmentDesc, RenderingDesc, ResourceBindGroupDesc,
    ResourceBindingDesc, ResourceUsage, RootConstantDesc, RootSignatureDesc, SamplerDesc,
    TextureBarrierDesc, TextureDesc, TopLevelAsDesc,
};

// ============================================================================
// Batch copies
// ============================================================================

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_batch_copy_small_buffer(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let data = generate_test_pattern(256);
    let dst = ctx.gpu_buffer(256);
    let batch = BatchResourceCopy::new(&ctx.device, BatchResourceCopyDesc::default()).unwrap();

    batch.begin();
    batch
        .copy_to_gpu_buffer(&CopyToGpuBufferDesc::new(&dst, 0, &data))
        .unwrap();
    batch.end(None).unwrap().wait();
    batch.wait();

    assert_eq!(ctx.read_buffer(&dst), data);
    let stats = batch.stats();
    assert_eq!(stats.staging_buffers_created, stats.staging_buffers_freed);
    assert_eq!(stats.freed_before_fence_signaled, 0);
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_batch_copy_from_many_threads(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    const THREADS: u8 = 4;
    const SIZE: usize = 1 << 20;
    let batch = BatchResourceCopy::new(&ctx.device, BatchResourceCopyDesc::default()).unwrap();
    let buffers: Vec<_> = (0..THREADS).map(|_| ctx.gpu_buffer(SIZE as u64)).collect();

    batch.begin();
    std::thread::scope(|scope| {
        for (seed, buffer) in buffers.iter().enumerate() {
            let batch = &batch;
            scope.spawn(move || {
                let data = seeded_pattern(SIZE, seed as u8);
                batch
                    .copy_to_gpu_buffer(&CopyToGpuBufferDesc::new(buffer, 0, &data))
                    .unwrap();
            });
        }
    });
    batch.end(None).unwrap().wait();
    batch.wait();

    for (seed, buffer) in buffers.iter().enumerate() {
        assert_eq!(ctx.read_buffer(buffer), seeded_pattern(SIZE, seed as u8));
    }
    let stats = batch.stats();
    assert_eq!(stats.bytes_staged, u64::from(THREADS) * SIZE as u64);
    assert_eq!(stats.freed_before_fence_signaled, 0);
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_batch_copy_texture_upload(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let texture = ctx.texture(5, 3);
    let pixels = generate_test_pattern(5 * 3 * 4);
    let batch = BatchResourceCopy::new(&ctx.device, BatchResourceCopyDesc::default()).unwrap();

    batch.begin();
    batch
        .copy_data_to_texture(&CopyDataToTextureDesc::new(&texture, &pixels))
        .unwrap();
    batch.end(None).unwrap().wait();
    batch.wait();

    assert_eq!(ctx.device.debug_read_texture(&texture, 0, 0).unwrap(), pixels);
}

// ============================================================================
// Command lists and synchronization
// ============================================================================

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_mapped_upload_reaches_gpu_only_buffer(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let data = seeded_pattern(512, 3);
    let mut upload = ctx
        .device
        .create_buffer_resource(&BufferDesc::upload(data.len() as u64))
        .unwrap();
    let mut mapped = upload.map_memory().unwrap();
    mapped.copy_data(0, &data[..256]);
    mapped.copy_data(256, &data[256..]);
    mapped.unmap().unwrap();

    let gpu = ctx.gpu_buffer(data.len() as u64);
    let fence = ctx.device.create_fence().unwrap();
    let mut list = ctx.device.create_command_list(QueueType::Copy).unwrap();
    list.begin();
    list.copy_buffer_region(&CopyBufferRegionDesc::whole(&upload, &gpu));
    list.end();
    list.execute(&ExecuteDesc::new().with_notify(&fence)).unwrap();
    fence.wait();

    assert!(fence.is_signaled());
    assert_eq!(ctx.read_buffer(&gpu), data);
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_completed_fence_is_signaled_while_later_work_is_queued(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let src = ctx.gpu_buffer(1 << 20);
    let dst = ctx.gpu_buffer(1 << 20);
    let first = ctx.device.create_fence().unwrap();
    let second = ctx.device.create_fence().unwrap();
    let mut lists: Vec<_> = (0..2)
        .map(|_| ctx.device.create_command_list(QueueType::Copy).unwrap())
        .collect();

    lists[0].begin();
    lists[0].copy_buffer_region(&CopyBufferRegionDesc::whole(&src, &dst));
    lists[0].end();
    lists[0].execute(&ExecuteDesc::new().with_notify(&first)).unwrap();

    lists[1].begin();
    for _ in 0..16 {
        lists[1].copy_buffer_region(&CopyBufferRegionDesc::whole(&dst, &src));
    }
    lists[1].end();
    lists[1].execute(&ExecuteDesc::new().with_notify(&second)).unwrap();

    first.wait();
    assert!(first.is_signaled());
    second.wait();
    assert!(second.is_signaled());
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_never_submitted_fence_does_not_block(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let fence = ctx.device.create_fence().unwrap();
    assert!(!fence.is_pending());
    fence.wait();
    assert!(fence.wait_timeout(Duration::ZERO));
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_semaphore_orders_copy_then_graphics(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let data = generate_test_pattern(4096);
    let upload = ctx.upload_buffer(&data);
    let middle = ctx.gpu_buffer(4096);
    let last = ctx.gpu_buffer(4096);
    let copied = ctx.device.create_semaphore().unwrap();
    let fence = ctx.device.create_fence().unwrap();

    let mut copy = ctx.device.create_command_list(QueueType::Copy).unwrap();
    copy.begin();
    copy.copy_buffer_region(&CopyBufferRegionDesc::whole(&upload, &middle));
    copy.end();

    let mut graphics = ctx.device.create_command_list(QueueType::Graphics).unwrap();
    graphics.begin();
    graphics.copy_buffer_region(&CopyBufferRegionDesc::whole(&middle, &last));
    graphics.end();

    copy.execute(&ExecuteDesc::new().notify_semaphore(&copied)).unwrap();
    graphics
        .execute(&ExecuteDesc::new().wait_on(&copied).with_notify(&fence))
        .unwrap();
    fence.wait();

    assert!(fence.is_signaled());
    assert_eq!(ctx.read_buffer(&last), data);
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_clear_render_target(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let target = ctx
        .device
        .create_texture_resource(&TextureDesc::render_target(8, 4, Format::Rgba8Unorm))
        .unwrap();
    let fence = ctx.device.create_fence().unwrap();
    let mut list = ctx.device.create_command_list(QueueType::Graphics).unwrap();
    list.begin();
    list.pipeline_barrier(
        &PipelineBarrierDesc::new().texture(TextureBarrierDesc::new(&target, ResourceUsage::RENDER_TARGET)),
    );
    list.begin_rendering(&RenderingDesc::new().with_color(
        RenderingAttachmentDesc::new(&target).with_clear_value(ClearValue::Color([1.0, 0.0, 0.0, 1.0])),
    ));
    list.end_rendering();
    list.pipeline_barrier(
        &PipelineBarrierDesc::new().texture(TextureBarrierDesc::new(&target, ResourceUsage::COPY_SRC)),
    );
    list.end();
    list.execute(&ExecuteDesc::new().with_notify(&fence)).unwrap();
    fence.wait();

    let pixels = ctx.device.debug_read_texture(&target, 0, 0).unwrap();
    assert_eq!(pixels.len(), 8 * 4 * 4);
    for pixel in pixels.chunks(4) {
        assert_eq!(pixel, &[255, 0, 0, 255]);
    }
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_ring_wraps_after_all_frames(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    const FRAMES: u32 = 3;
    let src = ctx.upload_buffer(&generate_test_pattern(64));
    let dst = ctx.gpu_buffer(64);
    let mut ring = CommandListRing::new(
        &ctx.device,
        CommandListRingDesc::default()
            .with_queue_type(QueueType::Copy)
            .with_num_frames(FRAMES),
    )
    .unwrap();

    let first = ring.frame_command_list(0).id();
    for frame in 0..=FRAMES {
        let list = ring.frame_command_list(0);
        list.begin();
        list.copy_buffer_region(&CopyBufferRegionDesc::whole(&src, &dst));
        list.end();
        ring.execute_last(0).unwrap();
        ring.next_frame();
        assert_eq!(ring.current_frame(), ((frame + 1) % FRAMES) as usize);
    }
    // Frame N+1 landed on the first slot again, after its fence was waited.
    assert_eq!(ring.current_frame(), 1);
    ring.wait_idle();
    assert_ne!(ring.frame_command_list(0).id(), first);
    assert_eq!(ctx.read_buffer(&dst), generate_test_pattern(64));
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_pool_shallower_than_frames_rejected(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let result = ctx
        .device
        .create_command_list_pool(&CommandListPoolDesc::new(QueueType::Graphics, 2, 3));
    assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));

    let mut pool = ctx
        .device
        .create_command_list_pool(&CommandListPoolDesc::new(QueueType::Graphics, 3, 3))
        .unwrap();
    let ids: Vec<u64> = (0..4).map(|_| pool.get_next_in_flight().id()).collect();
    assert_eq!(ids[0], ids[3]);
    assert_ne!(ids[0], ids[1]);
}

#[test]
#[should_panic(expected = "requires the Recording state")]
fn test_end_without_begin_panics() {
    let ctx = TestContext::new(Backend::Headless).expect("headless backend");
    let mut list = ctx.device.create_command_list(QueueType::Graphics).unwrap();
    list.end();
}

// ============================================================================
// Acceleration structures
// ============================================================================

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_acceleration_structures_follow_ray_tracing_capability(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let positions: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let vertices = ctx.upload_buffer(bytemuck::cast_slice(&positions));
    let desc = BottomLevelAsDesc::new(vec![AsGeometryDesc::triangles(&vertices, 3)]);
    let blas = match ctx.device.create_bottom_level_as(&desc) {
        Ok(blas) => blas,
        Err(e) => {
            assert!(!ctx.device.device_info().capabilities.ray_tracing);
            assert!(matches!(e, GraphicsError::FeatureNotSupported(_)));
            return;
        }
    };
    let tlas = ctx
        .device
        .create_top_level_as(&TopLevelAsDesc::new(vec![AsInstanceDesc::new(&blas).with_id(7)]))
        .unwrap();

    let fence = ctx.device.create_fence().unwrap();
    let mut list = ctx.device.create_command_list(QueueType::Compute).unwrap();
    list.begin();
    list.build_bottom_level_as(&blas);
    list.build_top_level_as(&tlas);
    list.end();
    list.execute(&ExecuteDesc::new().with_notify(&fence)).unwrap();
    fence.wait();

    let summary = AsBuildSummary::from_bytes(&ctx.read_buffer(tlas.buffer())).unwrap();
    assert!(summary.is_built());
    assert_eq!(summary.count, 1);
    assert_eq!(summary.max, [1.0, 1.0, 0.0]);
}

// ============================================================================
// Resource binding
// ============================================================================

fn material_signature_desc() -> RootSignatureDesc {
    RootSignatureDesc::new()
        .with_binding(ResourceBindingDesc::cbv("params", 0, 0))
        .with_binding(ResourceBindingDesc::srv("albedo", 0, 0))
        .with_binding(ResourceBindingDesc::sampler("linear", 0, 0))
        .with_debug_name("material")
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_rebinding_same_resources_is_idempotent(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let signature = ctx.device.create_root_signature(&material_signature_desc()).unwrap();
    let mut group = ctx
        .device
        .create_resource_bind_group(&ResourceBindGroupDesc::new(&signature, 0))
        .unwrap();
    let params = ctx.constant_buffer(256);
    let albedo = ctx.texture(8, 8);
    let sampler = ctx.device.create_sampler(&SamplerDesc::default()).unwrap();

    let update = BindGroupUpdateDesc::new()
        .with(0, BindGroupResource::ConstantBuffer(&params))
        .with(0, BindGroupResource::ShaderResourceTexture(&albedo))
        .with(0, BindGroupResource::Sampler(&sampler));
    group.update(&update).unwrap();
    let first = group.descriptor_layout();
    group.update(&update).unwrap();

    assert_eq!(group.descriptor_layout(), first);
    assert_eq!(group.num_bound_resources(), 2);
    assert_eq!(group.num_bound_samplers(), 1);
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
fn test_root_constants_follow_the_group(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    assert!(backend.supports_root_constants());

    let signature = ctx
        .device
        .create_root_signature(
            &RootSignatureDesc::new()
                .with_binding(ResourceBindingDesc::cbv("params", 0, 0))
                .with_root_constant(RootConstantDesc::new(0, 31, 16)),
        )
        .unwrap();
    let mut group = ctx
        .device
        .create_resource_bind_group(&ResourceBindGroupDesc::new(&signature, 0))
        .unwrap();
    assert_eq!(signature.layout().root_constant_bytes(), 16);
    group.set_root_constants(0, &[0; 16]);
    let params = ctx.constant_buffer(256);
    group
        .update(&BindGroupUpdateDesc::new().with(0, BindGroupResource::ConstantBuffer(&params)))
        .unwrap();
    assert_eq!(group.num_bound_resources(), 1);
}

#[test]
#[should_panic(expected = "bind group capacity exceeded")]
fn test_binding_past_capacity_panics() {
    let ctx = TestContext::new(Backend::Headless).expect("headless backend");
    let signature = ctx.device.create_root_signature(&material_signature_desc()).unwrap();
    let mut group = ctx
        .device
        .create_resource_bind_group(&ResourceBindGroupDesc::new(&signature, 0))
        .unwrap();
    let texture = ctx.texture(4, 4);
    group.begin_update().srv_texture(0, &texture).srv_texture(3, &texture);
}

#[test]
fn test_descriptor_pool_cap_surfaces_error() {
    let config = GraphicsConfiguration::default().with_descriptor_pools(DescriptorPoolConfig {
        resources_per_pool: 2,
        samplers_per_pool: 1,
        max_pools: Some(1),
    });
    let ctx = TestContext::with_config(Backend::Headless, config).expect("headless backend");
    let signature = ctx.device.create_root_signature(&material_signature_desc()).unwrap();
    let params = ctx.constant_buffer(256);
    let albedo = ctx.texture(4, 4);
    let sampler = ctx.device.create_sampler(&SamplerDesc::default()).unwrap();
    let update = BindGroupUpdateDesc::new()
        .with(0, BindGroupResource::ConstantBuffer(&params))
        .with(0, BindGroupResource::ShaderResourceTexture(&albedo))
        .with(0, BindGroupResource::Sampler(&sampler));

    let mut first = ctx
        .device
        .create_resource_bind_group(&ResourceBindGroupDesc::new(&signature, 0))
        .unwrap();
    first.update(&update).unwrap();
    let mut second = ctx
        .device
        .create_resource_bind_group(&ResourceBindGroupDesc::new(&signature, 0))
        .unwrap();
    assert!(matches!(
        second.update(&update),
        Err(GraphicsError::OutOfDescriptors(_))
    ));

    drop(first);
    second.update(&update).unwrap();
}

// ============================================================================
// Render graph
// ============================================================================

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_graph_reports_missing_dependency(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut graph = RenderGraph::new(&ctx.device, RenderGraphDesc::default());
    graph
        .add_node(NodeDesc::new("A", QueueType::Graphics, |_| {}).with_dependency("Z"))
        .unwrap();
    assert_eq!(
        graph.build(),
        Err(GraphError::MissingDependency {
            node: "A".into(),
            dependency: "Z".into(),
        })
    );
    assert!(matches!(graph.update(), Err(GraphError::NotBuilt)));
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_graph_names_undeclared_dependency_among_valid_nodes(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let mut graph = RenderGraph::new(&ctx.device, RenderGraphDesc::default());
    graph.add_node(NodeDesc::new("A", QueueType::Graphics, |_| {})).unwrap();
    graph
        .add_node(NodeDesc::new("B", QueueType::Graphics, |_| {}).with_dependency("A"))
        .unwrap();
    graph
        .add_node(NodeDesc::new("C", QueueType::Graphics, |_| {}).with_dependency("Z"))
        .unwrap();

    let err = graph.build().unwrap_err();
    assert_eq!(
        err,
        GraphError::MissingDependency {
            node: "C".into(),
            dependency: "Z".into(),
        }
    );
    assert!(err.to_string().contains("\"Z\""));
    assert!(!graph.is_built());
}

#[rstest]
#[case::headless(Backend::Headless)]
#[case::vulkan(Backend::Vulkan)]
#[case::directx12(Backend::DirectX12)]
#[case::metal(Backend::Metal)]
fn test_graph_moves_data_across_queues(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let data = generate_test_pattern(1024);
    let upload = Arc::new(ctx.upload_buffer(&data));
    let staged = Arc::new(ctx.gpu_buffer(1024));
    let result = Arc::new(ctx.gpu_buffer(1024));
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut graph = RenderGraph::new(&ctx.device, RenderGraphDesc::default().with_num_frames(2));
    {
        let (upload, staged, order) = (Arc::clone(&upload), Arc::clone(&staged), Arc::clone(&order));
        graph
            .add_node(NodeDesc::new("upload", QueueType::Copy, move |ctx| {
                order.lock().unwrap().push("upload");
                ctx.list.copy_buffer_region(&CopyBufferRegionDesc::whole(&upload, &staged));
            }))
            .unwrap();
    }
    {
        let (staged, result, order) = (Arc::clone(&staged), Arc::clone(&result), Arc::clone(&order));
        graph
            .add_node(
                NodeDesc::new("consume", QueueType::Graphics, move |ctx| {
                    order.lock().unwrap().push("consume");
                    ctx.list.copy_buffer_region(&CopyBufferRegionDesc::whole(&staged, &result));
                })
                .with_dependency("upload"),
            )
            .unwrap();
    }
    graph.build().unwrap();
    assert_eq!(graph.execution_order(), vec!["upload", "consume"]);

    for _ in 0..3 {
        graph.update().unwrap();
    }
    graph.wait_idle();

    assert_eq!(
        *order.lock().unwrap(),
        vec!["upload", "consume", "upload", "consume", "upload", "consume"]
    );
    assert_eq!(graph.frame_index(), 1);
    assert_eq!(ctx.read_buffer(&result), data);
}

#[test]
fn test_graph_requires_enough_lists_per_queue() {
    let ctx = TestContext::new(Backend::Headless).expect("headless backend");
    let mut graph = RenderGraph::new(
        &ctx.device,
        RenderGraphDesc::default().with_command_lists(QueueType::Copy, 1),
    );
    graph.add_node(NodeDesc::new("a", QueueType::Copy, |_| {})).unwrap();
    graph.add_node(NodeDesc::new("b", QueueType::Copy, |_| {})).unwrap();
    assert!(matches!(
        graph.build(),
        Err(GraphError::NotEnoughCommandLists {
            queue: QueueType::Copy,
            requested: 2,
            available: 1,
        })
    ));
}
