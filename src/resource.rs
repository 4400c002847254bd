// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

//! Exclusive Tier-1 compute resources.
//!
//! Every resource is held by at most one execution at a time. Requests for
//! a busy resource wait in FIFO order and are never preempted.

use std::collections::VecDeque;

struct Unit {
    name: String,
    holder: Option<usize>,
    waiting: VecDeque<usize>,
    /// Time at which the current holder acquired the resource, in ns.
    acquired_at: u64,
    /// Cumulative time spent busy, in ns.
    busy_time: u64,
}

/// A set of named capacity-1 resources, indexed like the resource set of the
/// Tier-1 scheduler. Holders and waiters are identified by execution ids.
pub struct ResourcePool {
    units: Vec<Unit>,
}

impl ResourcePool {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            units: names
                .into_iter()
                .map(|name| Unit {
                    name: name.to_string(),
                    holder: None,
                    waiting: VecDeque::new(),
                    acquired_at: 0,
                    busy_time: 0,
                })
                .collect(),
        }
    }

    /// Resource names, in index order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|unit| unit.name.as_str())
    }

    pub fn name(&self, resource: usize) -> &str {
        &self.units[resource].name
    }

    /// Request a resource for an execution.
    /// Return true if it is granted immediately, false if it has to wait.
    pub fn request(&mut self, resource: usize, exec_id: usize, now: u64) -> bool {
        let unit = &mut self.units[resource];
        if unit.holder.is_none() {
            unit.holder = Some(exec_id);
            unit.acquired_at = now;
            true
        } else {
            unit.waiting.push_back(exec_id);
            false
        }
    }

    /// Release a resource held by an execution.
    /// Return the next execution that acquires it, if any.
    pub fn release(&mut self, resource: usize, exec_id: usize, now: u64) -> Option<usize> {
        let unit = &mut self.units[resource];
        assert_eq!(
            Some(exec_id),
            unit.holder,
            "resource {} released by a non-holder",
            unit.name
        );
        unit.busy_time += now - unit.acquired_at;
        unit.holder = unit.waiting.pop_front();
        unit.acquired_at = now;
        unit.holder
    }

    pub fn num_waiting(&self, resource: usize) -> usize {
        self.units[resource].waiting.len()
    }

    pub fn num_busy(&self) -> usize {
        self.units.iter().filter(|u| u.holder.is_some()).count()
    }

    /// Cumulative busy time of a resource, in ns.
    pub fn busy_time(&self, resource: usize) -> u64 {
        self.units[resource].busy_time
    }
}
