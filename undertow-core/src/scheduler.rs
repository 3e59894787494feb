//! Wall-clock scheduler for one-shot tasks run by the event loop.
//!
//! Tasks are plain values ordered by deadline. The loop asks for the next
//! deadline to bound its reactor wait and pops whatever is due afterwards.

use std::collections::BTreeMap;
use std::time::Instant;

/// Identifies a queued task. Ordered by deadline, then insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    deadline: Instant,
    sequence: u64,
}

impl TaskId {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Queue of one-shot tasks keyed by deadline.
#[derive(Debug)]
pub struct Scheduler<T> {
    queue: BTreeMap<TaskId, T>,
    next_sequence: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            queue: BTreeMap::new(),
            next_sequence: 0,
        }
    }

    /// Queues `task` to run once `deadline` has passed.
    pub fn insert(&mut self, deadline: Instant, task: T) -> TaskId {
        let id = TaskId {
            deadline,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.queue.insert(id, task);
        id
    }

    /// Removes a queued task, returning it if it had not run yet.
    pub fn cancel(&mut self, id: TaskId) -> Option<T> {
        self.queue.remove(&id)
    }

    pub fn is_queued(&self, id: TaskId) -> bool {
        self.queue.contains_key(&id)
    }

    /// Earliest deadline among queued tasks.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|id| id.deadline)
    }

    /// Removes and returns every task whose deadline is at or before `now`,
    /// earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<(TaskId, T)> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().deadline > now {
                break;
            }
            due.push(entry.remove_entry());
        }
        due
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
