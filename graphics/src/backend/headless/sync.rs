//! Timeline-based fences and semaphores.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::GraphicsError;

#[derive(Debug, Default, Clone, Copy)]
struct TimelineValues {
    /// Highest value handed out to a submission.
    scheduled: u64,
    /// Highest value a queue worker has signaled.
    completed: u64,
}

/// Monotonic counter that queue workers advance and the CPU waits on.
#[derive(Debug, Default)]
pub(crate) struct Timeline {
    values: Mutex<TimelineValues>,
    signaled: Condvar,
}

impl Timeline {
    /// Reserve the next value for a submission to signal.
    pub(crate) fn schedule(&self) -> u64 {
        let mut values = self.values.lock();
        values.scheduled += 1;
        values.scheduled
    }

    /// The latest scheduled value.
    pub(crate) fn target(&self) -> u64 {
        self.values.lock().scheduled
    }

    pub(crate) fn signal(&self, value: u64) {
        let mut values = self.values.lock();
        if value > values.completed {
            values.completed = value;
            self.signaled.notify_all();
        }
    }

    pub(crate) fn is_reached(&self, value: u64) -> bool {
        self.values.lock().completed >= value
    }

    pub(crate) fn wait_for(&self, value: u64) {
        let mut values = self.values.lock();
        while values.completed < value {
            self.signaled.wait(&mut values);
        }
    }

    /// Returns false if `timeout` elapsed first.
    pub(crate) fn wait_for_timeout(&self, value: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut values = self.values.lock();
        while values.completed < value {
            if self.signaled.wait_until(&mut values, deadline).timed_out() {
                return values.completed >= value;
            }
        }
        true
    }
}

/// Fence emulated with a timeline: each submission schedules a ticket and
/// waits target the latest one.
#[derive(Debug, Default)]
pub struct HeadlessFence {
    timeline: Arc<Timeline>,
}

impl HeadlessFence {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// Reserve the ticket the next submission signals.
    pub(crate) fn schedule(&self) -> u64 {
        self.timeline.schedule()
    }

    pub(crate) fn signal(&self, ticket: u64) {
        self.timeline.signal(ticket);
    }

    pub(crate) fn wait(&self) -> Result<(), GraphicsError> {
        self.timeline.wait_for(self.timeline.target());
        Ok(())
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Result<bool, GraphicsError> {
        Ok(self.timeline.wait_for_timeout(self.timeline.target(), timeout))
    }

    pub(crate) fn is_signaled(&self) -> bool {
        self.timeline.is_reached(self.timeline.target())
    }

    /// Timelines never go back; the next schedule supersedes the old ticket.
    pub(crate) fn reset(&self) -> Result<(), GraphicsError> {
        Ok(())
    }
}

/// Semaphore emulated with a timeline. A wait targets the latest signal
/// scheduled at the time of the waiting submission.
#[derive(Debug, Default)]
pub struct HeadlessSemaphore {
    timeline: Arc<Timeline>,
}

impl HeadlessSemaphore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// Signal immediately, as an image acquire does.
    pub(crate) fn signal_now(&self) {
        let value = self.timeline.schedule();
        self.timeline.signal(value);
    }

    /// Block the calling thread until the latest scheduled signal.
    pub(crate) fn wait_latest(&self) {
        self.timeline.wait_for(self.timeline.target());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_wait_for_signal() {
        let timeline = Arc::new(Timeline::default());
        let first = timeline.schedule();
        let second = timeline.schedule();
        assert_eq!((first, second), (1, 2));
        assert!(!timeline.is_reached(first));

        let worker = Arc::clone(&timeline);
        let thread = std::thread::spawn(move || worker.signal(second));
        timeline.wait_for(first);
        thread.join().unwrap();
        assert!(timeline.is_reached(second));
    }

    #[test]
    fn test_timeline_timeout() {
        let timeline = Timeline::default();
        let value = timeline.schedule();
        assert!(!timeline.wait_for_timeout(value, Duration::from_millis(2)));
        timeline.signal(value);
        assert!(timeline.wait_for_timeout(value, Duration::from_millis(2)));
    }

    #[test]
    fn test_semaphore_signal_now() {
        let semaphore = HeadlessSemaphore::new();
        semaphore.signal_now();
        semaphore.wait_latest();
        assert!(semaphore.timeline().is_reached(1));
    }
}
