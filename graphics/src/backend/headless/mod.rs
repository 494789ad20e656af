//! Headless backend.
//!
//! Emulates a device with one worker thread per queue type. Submissions are
//! sent over a channel to the queue's worker, which waits for the
//! submission's semaphores, runs the command stream on host memory and then
//! signals semaphores and the fence. Fences and semaphores are timelines, so
//! every ordering guarantee of a real device holds: work on one queue runs in
//! submission order and cross-queue waits block the waiting worker.

mod binding;
mod execute;
mod memory;
mod swapchain;
mod sync;

pub use binding::{HeadlessBindGroup, HeadlessPipeline, HeadlessRootSignature, HeadlessSampler};
pub use memory::{HeadlessBuffer, HeadlessTexture};
pub use swapchain::HeadlessSwapChain;
pub use sync::{HeadlessFence, HeadlessSemaphore};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::binding::RootSignatureLayout;
use crate::command::Command;
use crate::config::GraphicsConfiguration;
use crate::descriptors::{DescriptorAllocator, DescriptorHeapType};
use crate::error::GraphicsError;
use crate::pipeline::PipelineDesc;
use crate::resources::{BufferDesc, TextureDesc};
use crate::swapchain::SwapChainDesc;
use crate::types::{BackendKind, PhysicalDevice, QueueType, SamplerDesc};

use super::{
    GpuBackend, GpuBindGroup, GpuBuffer, GpuFence, GpuPipeline, GpuRootSignature, GpuSampler,
    GpuSemaphore, GpuSwapChain, GpuTexture, Submission,
};
use execute::ExecutionStats;
use sync::Timeline;

/// A submission in flight to a queue worker.
struct Job {
    commands: Vec<Command>,
    waits: Vec<(Arc<Timeline>, u64)>,
    signals: Vec<(Arc<Timeline>, u64)>,
    queue_ticket: u64,
}

struct Queue {
    sender: Option<Sender<Job>>,
    timeline: Arc<Timeline>,
    stats: Arc<ExecutionStats>,
    worker: Option<JoinHandle<()>>,
}

impl Queue {
    fn spawn(queue_type: QueueType, device_lost: Arc<AtomicBool>) -> Result<Self, GraphicsError> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let timeline = Arc::new(Timeline::default());
        let stats = Arc::new(ExecutionStats::default());
        let worker = {
            let timeline = Arc::clone(&timeline);
            let stats = Arc::clone(&stats);
            std::thread::Builder::new()
                .name(format!("headless-{}", queue_type.name()))
                .spawn(move || run_queue(queue_type, &receiver, &timeline, &stats, &device_lost))
                .map_err(|e| {
                    GraphicsError::InitializationFailed(format!(
                        "failed to spawn {} queue worker: {e}",
                        queue_type.name()
                    ))
                })?
        };
        Ok(Self {
            sender: Some(sender),
            timeline,
            stats,
            worker: Some(worker),
        })
    }
}

fn run_queue(
    queue_type: QueueType,
    receiver: &Receiver<Job>,
    timeline: &Timeline,
    stats: &ExecutionStats,
    device_lost: &AtomicBool,
) {
    crate::set_thread_name!("Headless Queue");
    for job in receiver.iter() {
        crate::profile_scope!("headless_execute");
        for (semaphore, value) in &job.waits {
            semaphore.wait_for(*value);
        }
        if !device_lost.load(Ordering::Acquire)
            && let Err(e) = execute::execute(&job.commands, stats)
        {
            log::error!("Headless {} queue: command execution failed: {e}", queue_type.name());
            device_lost.store(true, Ordering::Release);
        }
        // Signal even after a failure so that waiters wake up.
        for (target, value) in &job.signals {
            target.signal(*value);
        }
        timeline.signal(job.queue_ticket);
    }
    log::debug!("Headless {} queue worker stopped", queue_type.name());
}

/// Host-memory backend with asynchronous queues.
pub struct HeadlessBackend {
    physical_device: PhysicalDevice,
    queues: [Queue; 3],
    device_lost: Arc<AtomicBool>,
    resource_heap: Arc<DescriptorAllocator>,
    sampler_heap: Arc<DescriptorAllocator>,
    frame: AtomicU64,
}

impl HeadlessBackend {
    pub fn new(config: &GraphicsConfiguration) -> Result<Self, GraphicsError> {
        let device_lost = Arc::new(AtomicBool::new(false));
        let queues = [
            Queue::spawn(QueueType::Graphics, Arc::clone(&device_lost))?,
            Queue::spawn(QueueType::Compute, Arc::clone(&device_lost))?,
            Queue::spawn(QueueType::Copy, Arc::clone(&device_lost))?,
        ];
        let pools = &config.descriptor_pools;
        log::info!(
            "Headless backend: {} resource / {} sampler descriptors per pool",
            pools.resources_per_pool,
            pools.samplers_per_pool
        );
        Ok(Self {
            physical_device: PhysicalDevice::headless(),
            queues,
            device_lost,
            resource_heap: Arc::new(DescriptorAllocator::new(
                DescriptorHeapType::CbvSrvUav,
                pools.resources_per_pool,
                pools.max_pools,
            )),
            sampler_heap: Arc::new(DescriptorAllocator::new(
                DescriptorHeapType::Sampler,
                pools.samplers_per_pool,
                pools.max_pools,
            )),
            frame: AtomicU64::new(0),
        })
    }

    /// Descriptor slots in use across every bind group.
    pub fn allocated_descriptors(&self) -> (u32, u32) {
        (self.resource_heap.allocated(), self.sampler_heap.allocated())
    }

    /// Command streams executed by a queue so far.
    pub fn executed_submissions(&self, queue: QueueType) -> u64 {
        self.queues[queue.index()].stats.submissions.load(Ordering::Relaxed)
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }
}

fn wrong_backend(what: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{what} was not created by the headless backend"))
}

impl GpuBackend for HeadlessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Headless
    }

    fn physical_device(&self) -> &PhysicalDevice {
        &self.physical_device
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<GpuBuffer, GraphicsError> {
        log::trace!(
            "Headless: creating buffer {:?} ({} bytes)",
            desc.debug_name,
            desc.num_bytes
        );
        Ok(GpuBuffer::Headless(HeadlessBuffer::new(desc)?))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<GpuTexture, GraphicsError> {
        log::trace!(
            "Headless: creating texture {:?} ({}x{}x{}, {:?})",
            desc.debug_name,
            desc.width,
            desc.height,
            desc.depth,
            desc.format
        );
        Ok(GpuTexture::Headless(HeadlessTexture::new(desc)?))
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> Result<GpuSampler, GraphicsError> {
        Ok(GpuSampler::Headless(HeadlessSampler))
    }

    fn create_fence(&self) -> Result<GpuFence, GraphicsError> {
        Ok(GpuFence::Headless(HeadlessFence::new()))
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError> {
        Ok(GpuSemaphore::Headless(HeadlessSemaphore::new()))
    }

    fn create_root_signature(
        &self,
        layout: &RootSignatureLayout,
    ) -> Result<GpuRootSignature, GraphicsError> {
        let signature = HeadlessRootSignature::new(layout);
        log::trace!(
            "Headless: root signature {:?} ({} spaces, {} constant bytes)",
            layout.debug_name(),
            signature.num_spaces,
            signature.root_constant_bytes
        );
        Ok(GpuRootSignature::Headless(signature))
    }

    fn create_pipeline(
        &self,
        desc: &PipelineDesc,
        root_signature: &GpuRootSignature,
    ) -> Result<GpuPipeline, GraphicsError> {
        root_signature
            .as_headless()
            .ok_or_else(|| wrong_backend("root signature"))?;
        let pipeline = HeadlessPipeline::new(desc);
        log::trace!(
            "Headless: {:?} pipeline {:?} with {} stages",
            pipeline.bind_point,
            desc.debug_name,
            pipeline.num_stages
        );
        Ok(GpuPipeline::Headless(pipeline))
    }

    fn create_bind_group(
        &self,
        root_signature: &GpuRootSignature,
        layout: &RootSignatureLayout,
        register_space: u32,
    ) -> Result<GpuBindGroup, GraphicsError> {
        root_signature
            .as_headless()
            .ok_or_else(|| wrong_backend("root signature"))?;
        Ok(GpuBindGroup::Headless(HeadlessBindGroup::new(
            layout,
            register_space,
            Arc::clone(&self.resource_heap),
            Arc::clone(&self.sampler_heap),
        )?))
    }

    fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<GpuSwapChain, GraphicsError> {
        if desc.window.is_some() {
            log::debug!("Headless: window handle ignored, presenting offscreen");
        }
        Ok(GpuSwapChain::Headless(HeadlessSwapChain::new(desc)?))
    }

    fn submit(&self, submission: Submission<'_>) -> Result<(), GraphicsError> {
        if self.is_device_lost() {
            return Err(GraphicsError::DeviceLost);
        }
        let waits = submission
            .wait_semaphores
            .iter()
            .map(|semaphore| {
                let timeline = semaphore.as_headless().ok_or_else(|| wrong_backend("semaphore"))?.timeline();
                Ok((Arc::clone(timeline), timeline.target()))
            })
            .collect::<Result<Vec<_>, GraphicsError>>()?;
        let mut signals = submission
            .signal_semaphores
            .iter()
            .map(|semaphore| {
                let timeline = semaphore.as_headless().ok_or_else(|| wrong_backend("semaphore"))?.timeline();
                Ok((Arc::clone(timeline), timeline.schedule()))
            })
            .collect::<Result<Vec<_>, GraphicsError>>()?;
        if let Some(fence) = submission.signal_fence {
            let fence = fence.as_headless().ok_or_else(|| wrong_backend("fence"))?;
            signals.push((Arc::clone(fence.timeline()), fence.schedule()));
        }

        let queue = &self.queues[submission.queue.index()];
        let sender = queue.sender.as_ref().ok_or(GraphicsError::DeviceLost)?;
        let job = Job {
            commands: submission.commands.to_vec(),
            waits,
            signals,
            queue_ticket: queue.timeline.schedule(),
        };
        sender.send(job).map_err(|_| {
            self.device_lost.store(true, Ordering::Release);
            GraphicsError::DeviceLost
        })
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        for (queue_type, queue) in QueueType::ALL.iter().zip(&self.queues) {
            queue.timeline.wait_for(queue.timeline.target());
            log::debug!("Headless {} queue idle: {}", queue_type.name(), queue.stats);
        }
        if self.is_device_lost() {
            return Err(GraphicsError::DeviceLost);
        }
        Ok(())
    }

    fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::Acquire)
    }

    fn advance_frame(&self) {
        self.frame.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for HeadlessBackend {
    fn drop(&mut self) {
        // Closing the channels lets each worker drain its queue and exit.
        for queue in &mut self.queues {
            queue.sender.take();
        }
        for queue in &mut self.queues {
            if let Some(worker) = queue.worker.take()
                && worker.join().is_err()
            {
                log::error!("Headless queue worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for HeadlessBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessBackend")
            .field("device_lost", &self.is_device_lost())
            .field("frame", &self.frame())
            .field("allocated_descriptors", &self.allocated_descriptors())
            .field("graphics_submissions", &self.executed_submissions(QueueType::Graphics))
            .field("compute_submissions", &self.executed_submissions(QueueType::Compute))
            .field("copy_submissions", &self.executed_submissions(QueueType::Copy))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::new(&GraphicsConfiguration::default()).unwrap()
    }

    fn copy(src: &Arc<GpuBuffer>, dst: &Arc<GpuBuffer>, num_bytes: u64) -> Command {
        Command::CopyBufferRegion {
            src: Arc::clone(src),
            src_offset: 0,
            dst: Arc::clone(dst),
            dst_offset: 0,
            num_bytes,
        }
    }

    #[test]
    fn test_cross_queue_semaphore_orders_work() {
        let backend = backend();
        let a = Arc::new(backend.create_buffer(&BufferDesc::new(4)).unwrap());
        let b = Arc::new(backend.create_buffer(&BufferDesc::new(4)).unwrap());
        let c = Arc::new(backend.create_buffer(&BufferDesc::new(4)).unwrap());
        a.write(0, &[9, 8, 7, 6]).unwrap();

        let semaphore = backend.create_semaphore().unwrap();
        let fence = backend.create_fence().unwrap();
        backend
            .submit(Submission {
                queue: QueueType::Copy,
                commands: &[copy(&a, &b, 4)],
                wait_semaphores: &[],
                signal_semaphores: &[&semaphore],
                signal_fence: None,
            })
            .unwrap();
        backend
            .submit(Submission {
                queue: QueueType::Compute,
                commands: &[copy(&b, &c, 4)],
                wait_semaphores: &[&semaphore],
                signal_semaphores: &[],
                signal_fence: Some(&fence),
            })
            .unwrap();
        fence.wait().unwrap();

        assert_eq!(c.read(0, 4).unwrap(), vec![9, 8, 7, 6]);
        assert_eq!(backend.executed_submissions(QueueType::Copy), 1);
        assert_eq!(backend.executed_submissions(QueueType::Compute), 1);
        assert_eq!(backend.executed_submissions(QueueType::Graphics), 0);
        assert!(format!("{backend:?}").contains("copy_submissions: 1"));
    }

    #[test]
    fn test_failed_execution_loses_device() {
        let backend = backend();
        let small = Arc::new(backend.create_buffer(&BufferDesc::new(4)).unwrap());
        let large = Arc::new(backend.create_buffer(&BufferDesc::new(64)).unwrap());
        let fence = backend.create_fence().unwrap();
        backend
            .submit(Submission {
                queue: QueueType::Graphics,
                commands: &[copy(&large, &small, 64)],
                wait_semaphores: &[],
                signal_semaphores: &[],
                signal_fence: Some(&fence),
            })
            .unwrap();
        fence.wait().unwrap();

        assert!(backend.is_device_lost());
        assert_eq!(backend.wait_idle(), Err(GraphicsError::DeviceLost));
        let result = backend.submit(Submission {
            queue: QueueType::Graphics,
            commands: &[],
            wait_semaphores: &[],
            signal_semaphores: &[],
            signal_fence: None,
        });
        assert_eq!(result, Err(GraphicsError::DeviceLost));
    }
}
