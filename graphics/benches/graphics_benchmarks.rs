use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use obsidian_graphics::{
    BackendPreference, BufferDesc, CopyBufferRegionDesc, DescriptorAllocator, DescriptorHeapType,
    GraphicsConfiguration, GraphicsContext, LogicalDevice, NodeDesc, QueueType, RenderGraph,
    RenderGraphDesc, StagingBuffer,
};

fn headless_device() -> Arc<LogicalDevice> {
    GraphicsContext::new(GraphicsConfiguration::default())
        .and_then(|context| context.create_logical_device(&BackendPreference::headless()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Descriptor allocation
// ---------------------------------------------------------------------------

fn bench_descriptor_allocate_free(c: &mut Criterion) {
    let allocator = DescriptorAllocator::new(DescriptorHeapType::CbvSrvUav, 4096, None);

    c.bench_function("descriptor_allocate_free_16", |b| {
        b.iter(|| {
            let allocation = allocator.allocate(black_box(16)).unwrap();
            allocator.free(allocation);
        });
    });
}

fn bench_descriptor_fragmented(c: &mut Criterion) {
    c.bench_function("descriptor_allocate_fragmented_pool", |b| {
        b.iter_with_setup(
            || {
                let allocator = DescriptorAllocator::new(DescriptorHeapType::CbvSrvUav, 4096, None);
                let allocations: Vec<_> = (0..256).map(|_| allocator.allocate(8).unwrap()).collect();
                for allocation in allocations.into_iter().step_by(2) {
                    allocator.free(allocation);
                }
                allocator
            },
            |allocator| {
                for _ in 0..64 {
                    black_box(allocator.allocate(4).unwrap());
                }
            },
        );
    });
}

// ---------------------------------------------------------------------------
// Command recording
// ---------------------------------------------------------------------------

fn bench_record_copies(c: &mut Criterion) {
    let device = headless_device();
    let src = device.create_buffer_resource(&BufferDesc::upload(4096)).unwrap();
    let dst = device.create_buffer_resource(&BufferDesc::new(4096)).unwrap();
    let mut list = device.create_command_list(QueueType::Copy).unwrap();

    c.bench_function("command_list_record_64_copies", |b| {
        b.iter(|| {
            list.begin();
            for _ in 0..64 {
                list.copy_buffer_region(&CopyBufferRegionDesc::whole(&src, &dst));
            }
            list.end();
            black_box(&list);
        });
    });
}

// ---------------------------------------------------------------------------
// Staging bump allocation
// ---------------------------------------------------------------------------

fn bench_staging_bump(c: &mut Criterion) {
    let device = headless_device();
    let fence = device.create_fence().unwrap();
    let mut staging = StagingBuffer::new(&device, 1 << 20).unwrap();

    c.bench_function("staging_allocate_256x1kb", |b| {
        b.iter(|| {
            for _ in 0..256 {
                black_box(staging.allocate(1024, 256).unwrap());
            }
            staging.reset(&fence);
        });
    });
}

// ---------------------------------------------------------------------------
// Render graph build
// ---------------------------------------------------------------------------

fn chain_graph(device: &Arc<LogicalDevice>, num_nodes: usize) -> RenderGraph {
    let desc = RenderGraphDesc::default()
        .with_command_lists(QueueType::Graphics, num_nodes as u32)
        .with_command_lists(QueueType::Compute, num_nodes as u32);
    let mut graph = RenderGraph::new(device, desc);
    for i in 0..num_nodes {
        let queue = if i % 3 == 1 { QueueType::Compute } else { QueueType::Graphics };
        let mut node = NodeDesc::new(format!("node_{i}"), queue, |_| {});
        if i > 0 {
            node = node.with_dependency(format!("node_{}", i - 1));
        }
        graph.add_node(node).unwrap();
    }
    graph
}

fn bench_graph_build_small(c: &mut Criterion) {
    let device = headless_device();
    c.bench_function("render_graph_build_4_nodes", |b| {
        b.iter_with_setup(
            || chain_graph(&device, 4),
            |mut graph| {
                graph.build().unwrap();
                black_box(graph.execution_order());
            },
        );
    });
}

fn bench_graph_build_large(c: &mut Criterion) {
    let device = headless_device();
    c.bench_function("render_graph_build_32_nodes_chain", |b| {
        b.iter_with_setup(
            || chain_graph(&device, 32),
            |mut graph| {
                graph.build().unwrap();
                black_box(graph.execution_order());
            },
        );
    });
}

criterion_group!(
    benches,
    bench_descriptor_allocate_free,
    bench_descriptor_fragmented,
    bench_record_copies,
    bench_staging_bump,
    bench_graph_build_small,
    bench_graph_build_large,
);
criterion_main!(benches);
