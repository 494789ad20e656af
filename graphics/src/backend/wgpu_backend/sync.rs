//! Fences tracked by submission index.
//!
//! wgpu exposes a single queue that executes submissions in order, so
//! queue-to-queue semaphores carry no work of their own.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::GraphicsError;

/// The last submission a fence was attached to, with a flag raised by the
/// queue's work-done callback for that submission.
#[derive(Debug, Clone)]
struct Tracked {
    index: wgpu::SubmissionIndex,
    completed: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct WgpuFence {
    device: wgpu::Device,
    submission: Mutex<Option<Tracked>>,
}

impl WgpuFence {
    pub(super) fn new(device: wgpu::Device) -> Self {
        Self {
            device,
            submission: Mutex::new(None),
        }
    }

    /// Signal the fence when `submission` completes. Must be called right
    /// after `submission` was handed to `queue`.
    pub(super) fn track(&self, queue: &wgpu::Queue, submission: wgpu::SubmissionIndex) {
        let completed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&completed);
        queue.on_submitted_work_done(move || flag.store(true, Ordering::Release));
        *self.submission.lock() = Some(Tracked {
            index: submission,
            completed,
        });
    }

    fn submission_index(&self) -> Option<wgpu::SubmissionIndex> {
        self.submission.lock().as_ref().map(|tracked| tracked.index.clone())
    }

    pub(crate) fn wait(&self) -> Result<(), GraphicsError> {
        let Some(submission) = self.submission_index() else {
            return Ok(());
        };
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission),
                timeout: None,
            })
            .map(|_| ())
            .map_err(|e| GraphicsError::Internal(format!("fence wait failed: {e}")))
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Result<bool, GraphicsError> {
        let Some(submission) = self.submission_index() else {
            return Ok(true);
        };
        match self.device.poll(wgpu::PollType::Wait {
            submission_index: Some(submission),
            timeout: Some(timeout),
        }) {
            Ok(_) => Ok(true),
            Err(e) => {
                log::trace!("wgpu: fence wait ended without completion: {e}");
                Ok(false)
            }
        }
    }

    /// Non-blocking. Polling runs any work-done callbacks that are due.
    pub(crate) fn is_signaled(&self) -> bool {
        let Some(completed) = self
            .submission
            .lock()
            .as_ref()
            .map(|tracked| Arc::clone(&tracked.completed))
        else {
            return true;
        };
        if completed.load(Ordering::Acquire) {
            return true;
        }
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            log::trace!("wgpu: fence poll failed: {e}");
        }
        completed.load(Ordering::Acquire)
    }

    /// The next submission replaces the tracked index.
    pub(crate) fn reset(&self) -> Result<(), GraphicsError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct WgpuSemaphore;
