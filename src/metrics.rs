// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use std::collections::BTreeMap;

use average::Estimate;
use serde::Serialize;

use crate::task::{QoeClass, Task, Tier};

/// Where a task has been executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionSite {
    /// On a Tier-1 resource, after being assigned to Tier-1 by the policy.
    Local(String),
    /// On a Tier-1 resource, after not fitting into the Tier-2 budget.
    Fallback(String),
    /// On the edge server.
    Remote,
}

impl ExecutionSite {
    pub fn tier(&self) -> Tier {
        match self {
            Self::Local(_) | Self::Fallback(_) => Tier::Local,
            Self::Remote => Tier::Edge,
        }
    }

    /// Label of completion records, e.g. `Tier-1-GPU`.
    pub fn label(&self) -> String {
        match self {
            Self::Local(resource) | Self::Fallback(resource) => format!("Tier-1-{}", resource),
            Self::Remote => "Tier-2".to_string(),
        }
    }
}

/// Counters updated on every task completion.
pub struct Metrics {
    total: u64,
    deadline_met: u64,
    deadline_miss: u64,
    fallbacks: u64,
    tiers: BTreeMap<Tier, u64>,
    qoe: BTreeMap<QoeClass, u64>,
    energy: BTreeMap<Tier, f64>,
    response: average::Mean,
    max_response: average::Max,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            total: 0,
            deadline_met: 0,
            deadline_miss: 0,
            fallbacks: 0,
            tiers: BTreeMap::new(),
            qoe: BTreeMap::new(),
            energy: BTreeMap::new(),
            response: average::Mean::new(),
            max_response: average::Max::new(),
        }
    }

    /// Record a completion. Times are in ms.
    /// Return true if the deadline has been met.
    pub fn record(
        &mut self,
        task: &Task,
        start_time: f64,
        finish_time: f64,
        site: &ExecutionSite,
    ) -> bool {
        let response = finish_time - start_time;
        let met = response <= task.deadline_ms();

        self.total += 1;
        if met {
            self.deadline_met += 1;
        } else {
            self.deadline_miss += 1;
        }
        let tier = site.tier();
        *self.tiers.entry(tier).or_default() += 1;
        *self.qoe.entry(task.qoe_class()).or_default() += 1;
        if matches!(site, ExecutionSite::Fallback(_)) {
            self.fallbacks += 1;
        }
        let energy = match tier {
            Tier::Local => task.local().energy_j,
            Tier::Edge => task.offload().energy_j,
        };
        *self.energy.entry(tier).or_default() += energy;
        self.response.add(response);
        self.max_response.add(response);

        met
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_tasks: self.total,
            deadline_met: self.deadline_met,
            deadline_miss: self.deadline_miss,
            miss_ratio: if self.total == 0 {
                0.0
            } else {
                self.deadline_miss as f64 / self.total as f64
            },
            fallbacks: self.fallbacks,
            tiers: self.tiers.clone(),
            qoe: self.qoe.clone(),
            energy: self.energy.clone(),
            mean_response_ms: if self.total == 0 {
                0.0
            } else {
                self.response.mean()
            },
            max_response_ms: if self.total == 0 {
                0.0
            } else {
                self.max_response.max()
            },
        }
    }
}

/// Read-only view of the metrics, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_tasks: u64,
    pub deadline_met: u64,
    pub deadline_miss: u64,
    pub miss_ratio: f64,
    pub fallbacks: u64,
    pub tiers: BTreeMap<Tier, u64>,
    pub qoe: BTreeMap<QoeClass, u64>,
    /// Energy consumed per tier, in J.
    pub energy: BTreeMap<Tier, f64>,
    pub mean_response_ms: f64,
    pub max_response_ms: f64,
}

impl MetricsSnapshot {
    pub fn header() -> String {
        "total_tasks,deadline_met,deadline_miss,miss_ratio,fallbacks,tier1_tasks,tier2_tasks,tier1_energy,tier2_energy,mean_response_ms,max_response_ms".to_string()
    }

    pub fn to_csv(&self) -> String {
        let count = |tier: Tier| self.tiers.get(&tier).copied().unwrap_or_default();
        let energy = |tier: Tier| self.energy.get(&tier).copied().unwrap_or_default();
        format!(
            "{},{},{},{},{},{},{},{},{},{},{}",
            self.total_tasks,
            self.deadline_met,
            self.deadline_miss,
            self.miss_ratio,
            self.fallbacks,
            count(Tier::Local),
            count(Tier::Edge),
            energy(Tier::Local),
            energy(Tier::Edge),
            self.mean_response_ms,
            self.max_response_ms
        )
    }
}
