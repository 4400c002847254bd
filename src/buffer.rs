// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

//! Per-tier batch buffers and the admission state shared between the task
//! producer and the scheduler controller.

use crate::edf::EdfQueue;
use crate::task::{Task, Tier};

/// Tasks waiting for a scheduling decision.
///
/// The buffer is ready to be flushed when it holds `batch_size` tasks or when
/// `flush_interval` has elapsed since the last flush, whichever comes first.
/// Times are in ms on any monotonic clock chosen by the caller.
#[derive(Debug)]
pub struct BatchBuffer {
    tasks: Vec<Task>,
    batch_size: usize,
    flush_interval: f64,
    last_flush: f64,
}

impl BatchBuffer {
    pub fn new(batch_size: usize, flush_interval: f64) -> Self {
        Self {
            tasks: vec![],
            batch_size,
            flush_interval,
            last_flush: 0.0,
        }
    }

    pub fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tasks.len() >= self.batch_size
    }

    pub fn should_flush(&self, now: f64) -> bool {
        self.is_full() || (!self.is_empty() && now - self.last_flush >= self.flush_interval)
    }

    /// Time at which a non-full, non-empty buffer becomes due.
    pub fn flush_due(&self) -> Option<f64> {
        if self.is_empty() {
            None
        } else {
            Some(self.last_flush + self.flush_interval)
        }
    }

    /// Take all the buffered tasks, in insertion order, leaving it empty.
    pub fn drain(&mut self, now: f64) -> Vec<Task> {
        self.last_flush = now;
        std::mem::take(&mut self.tasks)
    }
}

/// The EDF queue and the two tier buffers.
///
/// This is the only state shared between the producer and the controller,
/// hence it must be accessed under a single lock or by a single owner.
#[derive(Debug)]
pub struct AdmissionState {
    pub queue: EdfQueue<Task>,
    pub local: BatchBuffer,
    pub edge: BatchBuffer,
}

impl AdmissionState {
    pub fn new(local_batch_size: usize, edge_batch_size: usize, flush_interval: f64) -> Self {
        Self {
            queue: EdfQueue::new(),
            local: BatchBuffer::new(local_batch_size, flush_interval),
            edge: BatchBuffer::new(edge_batch_size, flush_interval),
        }
    }

    pub fn buffer(&self, tier: Tier) -> &BatchBuffer {
        match tier {
            Tier::Local => &self.local,
            Tier::Edge => &self.edge,
        }
    }

    pub fn buffer_mut(&mut self, tier: Tier) -> &mut BatchBuffer {
        match tier {
            Tier::Local => &mut self.local,
            Tier::Edge => &mut self.edge,
        }
    }

    /// Admit a task whose tier has already been decided.
    pub fn admit(&mut self, task: Task) {
        self.queue.push_task(task);
    }

    /// Pop the earliest-deadline task and append it to its tier buffer.
    /// Return the tier, or None if the queue is empty.
    pub fn route_next(&mut self) -> Option<(Tier, &Task)> {
        let (_, task) = self.queue.pop()?;
        let tier = task.assigned_tier();
        let buffer = self.buffer_mut(tier);
        buffer.push(task);
        buffer.tasks.last().map(|task| (tier, task))
    }

    /// Drain the first buffer that is ready to be flushed, Tier-1 first.
    pub fn take_ready(&mut self, now: f64) -> Option<(Tier, Vec<Task>)> {
        [Tier::Local, Tier::Edge].into_iter().find_map(|tier| {
            let buffer = self.buffer_mut(tier);
            if buffer.should_flush(now) {
                Some((tier, buffer.drain(now)))
            } else {
                None
            }
        })
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.local.is_empty() && self.edge.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{QoeClass, TaskKind};
    use crate::testing::make_task;

    #[test]
    fn test_size_threshold() {
        let mut buffer = BatchBuffer::new(3, 100.0);
        for i in 0..2 {
            buffer.push(make_task(TaskKind::Slam, i as f64, QoeClass::Time, 1.0));
            assert!(!buffer.should_flush(1.0));
        }
        buffer.push(make_task(TaskKind::Slam, 2.0, QoeClass::Time, 1.0));
        assert!(buffer.should_flush(1.0));

        let batch = buffer.drain(1.0);
        assert_eq!(
            vec![0.0, 1.0, 2.0],
            batch.iter().map(|t| t.timestamp()).collect::<Vec<_>>()
        );
        assert!(buffer.is_empty());
        assert!(buffer.drain(2.0).is_empty());
    }

    #[test]
    fn test_time_threshold() {
        let mut buffer = BatchBuffer::new(5, 100.0);
        assert!(!buffer.should_flush(1000.0));
        assert_eq!(None, buffer.flush_due());

        buffer.drain(50.0);
        buffer.push(make_task(TaskKind::Slam, 0.0, QoeClass::Time, 1.0));
        assert_eq!(Some(150.0), buffer.flush_due());
        assert!(!buffer.should_flush(149.0));
        assert!(buffer.should_flush(150.0));
    }

    #[test]
    fn test_route_and_take_ready() {
        let mut state = AdmissionState::new(2, 2, 100.0);
        let mut remote = make_task(TaskKind::VoiceRecognition, 0.0, QoeClass::Energy, 1.0);
        remote.assign(Tier::Edge);
        state.admit(remote);
        state.admit(make_task(TaskKind::Slam, 1.0, QoeClass::Safety, 1.0));
        state.admit(make_task(TaskKind::Slam, 2.0, QoeClass::Safety, 1.0));
        assert!(!state.is_idle());

        let mut tiers = vec![];
        while let Some((tier, _)) = state.route_next() {
            tiers.push(tier);
        }
        assert_eq!(vec![Tier::Edge, Tier::Local, Tier::Local], tiers);

        let (tier, batch) = state.take_ready(10.0).expect("Tier-1 buffer is full");
        assert_eq!(Tier::Local, tier);
        assert_eq!(2, batch.len());
        assert!(state.take_ready(10.0).is_none());

        let (tier, batch) = state.take_ready(100.0).expect("Tier-2 buffer is due");
        assert_eq!(Tier::Edge, tier);
        assert_eq!(1, batch.len());
        assert!(state.is_idle());
    }
}
