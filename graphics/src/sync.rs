//! GPU synchronization primitives.
//!
//! [`Fence`]s let the CPU wait for submitted GPU work. [`Semaphore`]s order
//! work between GPU queues and cannot be waited on from the CPU. Both are
//! created by [`LogicalDevice`](crate::LogicalDevice) and passed to
//! [`CommandList::execute`](crate::CommandList::execute) through an
//! [`ExecuteDesc`](crate::ExecuteDesc).
//!
//! # Skip-first-wait
//!
//! A fence that has never been submitted, or was reset since, is treated as
//! already satisfied: [`Fence::wait`] returns immediately. This lets frame
//! loops wait on every slot's fence unconditionally, including the first
//! frames before any work exists.
//!
//! [`Fence::wait`] has no timeout. Waiting on a fence whose submission can
//! never complete (for example because it waits on a semaphore nobody
//! signals) blocks forever; [`Fence::wait_timeout`] exists for diagnostics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::backend::{GpuFence, GpuSemaphore};
use crate::error::GraphicsError;

struct FenceInner {
    id: u64,
    handle: GpuFence,
    /// Submitted and not reset since. Cleared only after the native fence
    /// has completed and been reset.
    pending: AtomicBool,
    /// Waits hold it shared and resets exclusively, so a native fence is
    /// never reset while a clone is blocked on it.
    state_lock: RwLock<()>,
}

/// CPU-GPU synchronization primitive.
///
/// Cloning a fence shares its state.
///
/// # Example
///
/// ```ignore
/// let fence = device.create_fence()?;
/// list.execute(&ExecuteDesc::default().with_notify(&fence))?;
/// fence.wait();
/// ```
#[derive(Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

impl Fence {
    pub(crate) fn new(id: u64, handle: GpuFence) -> Self {
        Self {
            inner: Arc::new(FenceInner {
                id,
                handle,
                pending: AtomicBool::new(false),
                state_lock: RwLock::new(()),
            }),
        }
    }

    /// Unique identifier for debugging.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn handle(&self) -> &GpuFence {
        &self.inner.handle
    }

    /// Returns true if the fence was submitted and not reset since.
    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Returns true if the work the fence was last submitted with has completed.
    ///
    /// A fence that was never submitted is not signaled, even though
    /// [`wait`](Self::wait) on it returns immediately.
    pub fn is_signaled(&self) -> bool {
        self.is_pending() && self.inner.handle.is_signaled()
    }

    /// Block until the GPU work this fence was submitted with completes.
    ///
    /// Returns immediately if the fence was never submitted or has been reset.
    pub fn wait(&self) {
        let _guard = self.inner.state_lock.read();
        if !self.is_pending() {
            return;
        }
        if let Err(e) = self.inner.handle.wait() {
            log::error!("Fence {}: wait failed: {}", self.inner.id, e);
        }
    }

    /// Wait with a timeout.
    ///
    /// Returns `true` if the fence is satisfied, `false` if the timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        let Some(_guard) = self.inner.state_lock.try_read_for(timeout) else {
            return false;
        };
        if !self.is_pending() {
            return true;
        }
        match self.inner.handle.wait_timeout(timeout.saturating_sub(start.elapsed())) {
            Ok(signaled) => signaled,
            Err(e) => {
                log::error!("Fence {}: wait failed: {}", self.inner.id, e);
                false
            }
        }
    }

    /// Return the fence to the unsubmitted state.
    ///
    /// Waits for outstanding work first, so the native object is never reset
    /// while a queue may still signal it.
    pub fn reset(&self) {
        if let Err(e) = self.wait_and_reset() {
            log::error!("Fence {}: reset failed: {}", self.inner.id, e);
        }
    }

    /// Clones calling [`wait`](Self::wait) meanwhile block on the lock and
    /// return once the outstanding work has completed.
    fn wait_and_reset(&self) -> Result<(), GraphicsError> {
        let _guard = self.inner.state_lock.write();
        if !self.is_pending() {
            return Ok(());
        }
        self.inner.handle.wait()?;
        self.inner.handle.reset()?;
        self.inner.pending.store(false, Ordering::Release);
        Ok(())
    }

    /// Prepare the fence for a new submission.
    ///
    /// A fence still pending from an earlier submission is waited on first.
    pub(crate) fn begin_submit(&self) -> Result<(), GraphicsError> {
        if self.is_pending() {
            return self.wait_and_reset();
        }
        let _guard = self.inner.state_lock.write();
        self.inner.handle.reset()
    }

    /// Mark the fence as submitted.
    pub(crate) fn end_submit(&self) {
        self.inner.pending.store(true, Ordering::Release);
    }

    /// Returns true if both values refer to the same fence.
    pub fn ptr_eq(&self, other: &Fence) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("id", &self.inner.id)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// GPU-GPU synchronization primitive.
///
/// A submission that lists a semaphore in `notify_semaphores` signals it when
/// it completes; a later submission that lists it in `wait_on_semaphores`
/// does not start before that signal. Cloning shares the semaphore.
#[derive(Clone)]
pub struct Semaphore {
    inner: Arc<SemaphoreInner>,
}

struct SemaphoreInner {
    id: u64,
    handle: GpuSemaphore,
}

impl Semaphore {
    pub(crate) fn new(id: u64, handle: GpuSemaphore) -> Self {
        Self {
            inner: Arc::new(SemaphoreInner { id, handle }),
        }
    }

    /// Unique identifier for debugging.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn handle(&self) -> &GpuSemaphore {
        &self.inner.handle
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("id", &self.inner.id)
            .finish()
    }
}

static_assertions::assert_impl_all!(Fence: Send, Sync, Clone);
static_assertions::assert_impl_all!(Semaphore: Send, Sync, Clone);

#[cfg(all(test, feature = "headless"))]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessFence, HeadlessSemaphore};

    fn fence() -> Fence {
        Fence::new(1, GpuFence::Headless(HeadlessFence::new()))
    }

    #[test]
    fn test_never_submitted_wait_returns() {
        let fence = fence();
        fence.wait();
        assert!(!fence.is_pending());
        assert!(!fence.is_signaled());
        assert!(fence.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_blocks_until_signaled() {
        let fence = fence();
        fence.begin_submit().unwrap();
        let ticket = fence.handle().as_headless().unwrap().schedule();
        fence.end_submit();
        assert!(!fence.wait_timeout(Duration::from_millis(5)));

        let signaler = fence.clone();
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            signaler.handle().as_headless().unwrap().signal(ticket);
        });
        fence.wait();
        assert!(fence.is_signaled());
        thread.join().unwrap();
    }

    #[test]
    fn test_reset_returns_to_unsubmitted() {
        let fence = fence();
        fence.begin_submit().unwrap();
        let ticket = fence.handle().as_headless().unwrap().schedule();
        fence.end_submit();
        fence.handle().as_headless().unwrap().signal(ticket);
        fence.reset();
        assert!(!fence.is_pending());
        assert!(!fence.is_signaled());
    }

    #[test]
    fn test_wait_on_clone_blocks_while_another_thread_resets() {
        let fence = fence();
        fence.begin_submit().unwrap();
        let ticket = fence.handle().as_headless().unwrap().schedule();
        fence.end_submit();

        let done = Arc::new(AtomicBool::new(false));
        let resetter = {
            let fence = fence.clone();
            std::thread::spawn(move || fence.reset())
        };
        let signaler = {
            let fence = fence.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                done.store(true, Ordering::Release);
                fence.handle().as_headless().unwrap().signal(ticket);
            })
        };

        std::thread::sleep(Duration::from_millis(5));
        fence.wait();
        assert!(done.load(Ordering::Acquire), "wait returned before the work completed");

        resetter.join().unwrap();
        signaler.join().unwrap();
        assert!(!fence.is_pending());
    }

    #[test]
    fn test_resubmit_waits_for_previous_work() {
        let fence = fence();
        fence.begin_submit().unwrap();
        let ticket = fence.handle().as_headless().unwrap().schedule();
        fence.end_submit();

        let signaler = {
            let fence = fence.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                fence.handle().as_headless().unwrap().signal(ticket);
            })
        };
        fence.begin_submit().unwrap();
        assert!(fence.handle().as_headless().unwrap().is_signaled());
        assert!(!fence.is_pending());
        signaler.join().unwrap();
    }

    #[test]
    fn test_clone_shares_state() {
        let a = fence();
        let b = a.clone();
        a.end_submit();
        assert!(b.is_pending());
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_semaphore_id() {
        let sem = Semaphore::new(42, GpuSemaphore::Headless(HeadlessSemaphore::new()));
        assert_eq!(sem.id(), 42);
    }
}
