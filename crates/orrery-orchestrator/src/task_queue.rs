use crate::types::{Priority, Task};
use orrery_core::{OrreryError, OrreryResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct QueueState {
    /// Indexed by tier: low, normal, high.
    tiers: [VecDeque<Task>; 3],
    closed: bool,
}

impl QueueState {
    fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    fn pop(&mut self) -> Option<Task> {
        self.tiers.iter_mut().rev().find_map(VecDeque::pop_front)
    }
}

fn tier(priority: Priority) -> usize {
    match priority {
        Priority::Low => 0,
        Priority::Normal => 1,
        Priority::High => 2,
    }
}

/// Priority queue of pending tasks.
///
/// Higher tiers always dequeue first; within a tier tasks leave in the order
/// they were enqueued. Safe for concurrent producers and consumers.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    available: Notify,
    capacity: Option<usize>,
}

impl TaskQueue {
    /// Creates a queue; `capacity` of `None` means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            capacity,
        }
    }

    /// Adds a task behind every other task of the same priority.
    pub fn enqueue(&self, task: Task) -> OrreryResult<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(OrreryError::ShuttingDown);
            }
            if let Some(capacity) = self.capacity {
                if state.len() >= capacity {
                    return Err(OrreryError::QueueSaturated { capacity });
                }
            }
            debug!(task_id = %task.id, priority = %task.priority, "Enqueued task");
            state.tiers[tier(task.priority)].push_back(task);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Waits for the next task. Returns `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<Task> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(task) = state.pop() {
                    let more = state.len() > 0;
                    drop(state);
                    if more {
                        // Hand the remaining work to another waiting consumer.
                        self.available.notify_one();
                    }
                    return Some(task);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Non-blocking variant of [`TaskQueue::dequeue`].
    pub fn try_dequeue(&self) -> Option<Task> {
        self.state.lock().pop()
    }

    /// Removes a queued task by id, e.g. when it is cancelled before dispatch.
    pub fn remove(&self, task_id: &str) -> Option<Task> {
        let mut state = self.state.lock();
        for queue in &mut state.tiers {
            if let Some(pos) = queue.iter().position(|t| t.id == task_id) {
                return queue.remove(pos);
            }
        }
        None
    }

    /// Stops accepting work, wakes every waiting consumer and returns the
    /// tasks that were still queued, highest priority first.
    pub fn close(&self) -> Vec<Task> {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            let mut drained = Vec::with_capacity(state.len());
            while let Some(task) = state.pop() {
                drained.push(task);
            }
            drained
        };
        self.available.notify_waiters();
        drained
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued tasks per priority, highest first.
    pub fn depth_by_priority(&self) -> [(Priority, usize); 3] {
        let state = self.state.lock();
        [
            (Priority::High, state.tiers[tier(Priority::High)].len()),
            (Priority::Normal, state.tiers[tier(Priority::Normal)].len()),
            (Priority::Low, state.tiers[tier(Priority::Low)].len()),
        ]
    }
}
