use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::item::WorkItem;

/// Result of a bounded wait on the [`SendQueue`].
#[derive(Debug)]
pub(crate) enum Popped {
    Item(WorkItem),
    Timeout,
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    closed: bool,
}

/// Unbounded FIFO shared by the submitter and every worker.
///
/// Any idle worker takes the next item. Once closed, pushes are refused and waiting
/// workers wake up to exit.
#[derive(Debug, Default)]
pub(crate) struct SendQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl SendQueue {
    // Queue state stays consistent across a panic in another holder, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item; never blocks. Hands the item back once the queue is closed.
    pub(crate) fn push(&self, item: WorkItem) -> Result<(), WorkItem> {
        let mut state = self.lock();
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Block until an item is available. `None` once the queue is closed.
    pub(crate) fn pop(&self) -> Option<WorkItem> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`SendQueue::pop`], giving up after `timeout`.
    pub(crate) fn pop_timeout(&self, timeout: Duration) -> Popped {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Popped::Item(item);
            }
            if state.closed {
                return Popped::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return Popped::Timeout;
            }
            state = match self.available.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Refuse further pushes, wake every waiter and return what was still queued.
    pub(crate) fn close(&self) -> Vec<WorkItem> {
        let mut state = self.lock();
        state.closed = true;
        let leftover = state.items.drain(..).collect();
        drop(state);
        self.available.notify_all();
        leftover
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().items.len()
    }
}
