//! Cooperative work scheduler
//!
//! A bounded FIFO of deferred handlers. Nothing is preempted: [Scheduler::run_pending] runs
//! every queued item to completion, in submission order, on the caller's thread.

use heapless::{Deque, Vec};

/// Maximum payload carried inline by a [WorkItem]
pub const MAX_EVENT_DATA_SIZE: usize = 8;

/// Queue capacity used when none is given
pub const DEFAULT_QUEUE_SIZE: usize = 10;

/// Deferred handler. Receives the context passed to [Scheduler::run_pending] and the
/// payload given at submission.
pub type Handler<C> = fn(&mut C, &[u8]);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulerError {
    /// No free slot. The caller decides whether to drop the work or retry on a later pass
    QueueFull,
    /// Payload longer than [MAX_EVENT_DATA_SIZE]
    PayloadTooLarge,
}

/// A queued handler with its payload
pub struct WorkItem<C> {
    handler: Handler<C>,
    data: Vec<u8, MAX_EVENT_DATA_SIZE>,
}

/// Bounded, single-threaded work queue
///
/// `N` is fixed at build time; a zero capacity fails to compile.
pub struct Scheduler<C, const N: usize = DEFAULT_QUEUE_SIZE> {
    queue: Deque<WorkItem<C>, N>,
}

impl<C, const N: usize> Scheduler<C, N> {
    const NON_ZERO_CAPACITY: () = assert!(N > 0, "scheduler queue capacity must not be zero");

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NON_ZERO_CAPACITY;
        Self {
            queue: Deque::new(),
        }
    }

    /// Enqueues `handler` without payload. Never blocks.
    ///
    /// # Errors
    /// * [SchedulerError::QueueFull]
    pub fn submit(&mut self, handler: Handler<C>) -> Result<(), SchedulerError> {
        self.submit_with(handler, &[])
    }

    /// Enqueues `handler` with a copy of `data`. Never blocks.
    ///
    /// # Errors
    /// * [SchedulerError::PayloadTooLarge]
    /// * [SchedulerError::QueueFull]
    pub fn submit_with(&mut self, handler: Handler<C>, data: &[u8]) -> Result<(), SchedulerError> {
        let data = Vec::from_slice(data).map_err(|_| SchedulerError::PayloadTooLarge)?;
        self.queue
            .push_back(WorkItem { handler, data })
            .map_err(|_| SchedulerError::QueueFull)
    }

    /// Runs all queued items in FIFO order and returns how many ran
    pub fn run_pending(&mut self, ctx: &mut C) -> usize {
        let mut count = 0;
        while let Some(item) = self.queue.pop_front() {
            (item.handler)(ctx, &item.data);
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        N
    }
}

impl<C, const N: usize> Default for Scheduler<C, N> {
    fn default() -> Self {
        Self::new()
    }
}
