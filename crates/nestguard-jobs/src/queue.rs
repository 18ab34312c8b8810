//! Priority band queue.
//!
//! One FIFO deque per priority; pops drain `high` before `normal` before
//! `low`. Retries go to the front of their band.

use std::collections::VecDeque;

use uuid::Uuid;

use nestguard_core::JobPriority;

#[derive(Debug, Default)]
pub struct PriorityQueue {
    bands: [VecDeque<Uuid>; 3],
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue new work behind everything of the same priority.
    pub fn push_back(&mut self, priority: JobPriority, id: Uuid) {
        self.bands[priority.band()].push_back(id);
    }

    /// Enqueue ahead of everything of the same priority.
    pub fn push_front(&mut self, priority: JobPriority, id: Uuid) {
        self.bands[priority.band()].push_front(id);
    }

    pub fn pop(&mut self) -> Option<Uuid> {
        self.bands.iter_mut().find_map(|band| band.pop_front())
    }

    /// Remove a queued id. Returns whether it was present.
    pub fn remove(&mut self, id: &Uuid) -> bool {
        for band in &mut self.bands {
            if let Some(pos) = band.iter().position(|queued| queued == id) {
                band.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.iter().all(VecDeque::is_empty)
    }

    pub fn len_of(&self, priority: JobPriority) -> usize {
        self.bands[priority.band()].len()
    }

    /// Queued ids in pop order.
    pub fn iter(&self) -> impl Iterator<Item = &Uuid> {
        self.bands.iter().flat_map(|band| band.iter())
    }
}
