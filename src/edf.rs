// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

//! Earliest-deadline-first admission queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::task::Task;

/// Priority of an entry: earliest deadline first, then earliest arrival.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdfKey {
    /// Relative deadline, in ms.
    pub deadline_ms: f64,
    /// Arrival timestamp, in s.
    pub timestamp: f64,
}

impl EdfKey {
    pub fn of(task: &Task) -> Self {
        Self {
            deadline_ms: task.deadline_ms(),
            timestamp: task.timestamp(),
        }
    }

    fn cmp_total(&self, other: &Self) -> Ordering {
        self.deadline_ms
            .total_cmp(&other.deadline_ms)
            .then(self.timestamp.total_cmp(&other.timestamp))
    }
}

#[derive(Debug)]
struct Entry<T> {
    key: EdfKey,
    order: u64,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // reversed: BinaryHeap is a max-heap
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp_total(&self.key)
            .then(other.order.cmp(&self.order))
    }
}

/// Min-priority queue of payloads keyed by [`EdfKey`].
///
/// Entries with identical keys are popped in insertion order.
#[derive(Debug)]
pub struct EdfQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    counter: u64,
}

impl<T> Default for EdfQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            counter: 0,
        }
    }
}

impl<T> EdfQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: EdfKey, payload: T) {
        self.heap.push(Entry {
            key,
            order: self.counter,
            payload,
        });
        self.counter = self.counter.wrapping_add(1);
    }

    /// Remove the entry with the earliest key.
    pub fn pop(&mut self) -> Option<(EdfKey, T)> {
        self.heap.pop().map(|entry| (entry.key, entry.payload))
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

impl EdfQueue<Task> {
    pub fn push_task(&mut self, task: Task) {
        self.push(EdfKey::of(&task), task);
    }
}
