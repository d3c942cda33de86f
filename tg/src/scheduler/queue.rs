//! ReadyQueue and queue reporting types

use std::collections::BinaryHeap;

use serde::Serialize;

use crate::domain::{Priority, WorkItem};

/// A queued item with its admission sequence number
struct QueuedItem<T> {
    item: WorkItem<T>,
    seq: u64,
}

impl<T> Eq for QueuedItem<T> {}

impl<T> PartialEq for QueuedItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T> Ord for QueuedItem<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first, then earlier admission
        self.item
            .priority
            .cmp(&other.item.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for QueuedItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority-ordered admission queue; FIFO among equal priorities
pub struct ReadyQueue<T> {
    heap: BinaryHeap<QueuedItem<T>>,
    next_seq: u64,
}

impl<T> Default for ReadyQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReadyQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Admit an item; re-admitted items queue behind equal-priority peers
    pub fn push(&mut self, item: WorkItem<T>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedItem { item, seq });
    }

    /// Take the highest-priority, earliest-admitted item
    pub fn pop(&mut self) -> Option<WorkItem<T>> {
        self.heap.pop().map(|q| q.item)
    }

    /// Priority of the next item to pop
    pub fn peek_priority(&self) -> Option<Priority> {
        self.heap.peek().map(|q| q.item.priority)
    }

    /// Remove a queued item by id
    pub fn remove(&mut self, id: &str) -> Option<WorkItem<T>> {
        if !self.contains(id) {
            return None;
        }
        let mut removed = None;
        let kept: Vec<_> = self
            .heap
            .drain()
            .filter_map(|q| {
                if removed.is_none() && q.item.id == id {
                    removed = Some(q.item);
                    None
                } else {
                    Some(q)
                }
            })
            .collect();
        self.heap = kept.into_iter().collect();
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.heap.iter().any(|q| q.item.id == id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Queued ids with priorities in pop order
    pub fn entries(&self) -> Vec<(String, Priority)> {
        let mut entries: Vec<_> = self.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
            .into_iter()
            .map(|q| (q.item.id.clone(), q.item.priority))
            .collect()
    }
}

/// Counters for one scheduling run
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub total_scheduled: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_attempts: u64,
    pub peak_queue_depth: usize,
    pub peak_concurrent: usize,
}

/// Snapshot of the scheduler for status display
#[derive(Debug, Clone, Serialize)]
pub struct QueueState {
    pub running: Vec<String>,
    pub queued: Vec<QueueEntry>,
    pub blocked: Vec<String>,
    pub stats: SchedulerStats,
}

/// Queued item for status display
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub id: String,
    pub priority: Priority,
}
