// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

//! Tier-1 schedulers: assign batches of tasks to the heterogeneous on-device
//! compute resources.

use crate::task::{Task, TaskId};

/// A named compute resource and its speed relative to the local baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub name: String,
    /// Multiplier applied to the local execution time of a task.
    pub time_factor: f64,
}

impl ResourceSpec {
    pub fn new(name: &str, time_factor: f64) -> Self {
        Self {
            name: name.to_string(),
            time_factor,
        }
    }
}

/// CPU, GPU and DSP of the reference platform.
pub fn default_resources() -> Vec<ResourceSpec> {
    vec![
        ResourceSpec::new("CPU", 1.0),
        ResourceSpec::new("GPU", 0.5),
        ResourceSpec::new("DSP", 0.8),
    ]
}

/// Parse a resource list like `CPU:1.0,GPU:0.5,DSP:0.8`.
pub fn parse_resources(value: &str) -> anyhow::Result<Vec<ResourceSpec>> {
    let mut resources = vec![];
    for token in value.split(',').filter(|x| !x.trim().is_empty()) {
        let (name, factor) = token
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("invalid resource '{}', expected NAME:FACTOR", token))?;
        let time_factor = factor.trim().parse::<f64>()?;
        resources.push(ResourceSpec::new(name.trim(), time_factor));
    }
    validate_resources(&resources)?;
    Ok(resources)
}

pub fn validate_resources(resources: &[ResourceSpec]) -> anyhow::Result<()> {
    anyhow::ensure!(!resources.is_empty(), "no Tier-1 resources");
    for resource in resources {
        anyhow::ensure!(
            resource.time_factor.is_finite() && resource.time_factor > 0.0,
            "invalid time factor of resource {}: {}",
            resource.name,
            resource.time_factor
        );
    }
    let mut names = resources.iter().map(|x| &x.name).collect::<Vec<_>>();
    names.sort();
    names.dedup();
    anyhow::ensure!(
        names.len() == resources.len(),
        "duplicate Tier-1 resource names"
    );
    Ok(())
}

/// Estimated execution time of a task on every resource, in ms.
#[derive(Debug, Clone, PartialEq)]
pub struct EetTable(Vec<f64>);

impl EetTable {
    pub fn build(task: &Task, resources: &[ResourceSpec]) -> Self {
        let base = task.local().time_ms;
        Self(resources.iter().map(|r| base * r.time_factor).collect())
    }

    pub fn get(&self, resource: usize) -> f64 {
        self.0[resource]
    }

    pub fn best(&self) -> f64 {
        self.0.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn worst(&self) -> f64 {
        self.0.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn average(&self) -> f64 {
        self.0.iter().sum::<f64>() / self.0.len() as f64
    }

    /// Ratio between worst and best execution time.
    /// A task with no work is equally fast everywhere.
    pub fn div(&self) -> f64 {
        let best = self.best();
        if best > 0.0 {
            self.worst() / best
        } else {
            1.0
        }
    }

    /// Difference between worst and best execution time.
    pub fn sub(&self) -> f64 {
        self.worst() - self.best()
    }
}

/// Placement of a task decided by a Tier-1 scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    /// Position of the task in the batch.
    pub index: usize,
    pub task_id: TaskId,
    /// Index of the resource in the resource set.
    pub resource: usize,
    /// Time at which the task is expected to start, in the scheduler's time base.
    pub start: f64,
    /// Expected completion time, in the scheduler's time base.
    pub finish: f64,
    /// Estimated execution time on the chosen resource, in ms.
    pub duration: f64,
}

/// A Tier-1 batch scheduling algorithm.
///
/// Implementations keep per-resource state across batches, and every task
/// in a batch receives exactly one allocation, returned in the order in
/// which the tasks were scheduled.
pub trait BatchScheduler: Send {
    fn name(&self) -> &'static str;

    fn resources(&self) -> &[ResourceSpec];

    /// Schedule a batch at simulated time `now`, in ms.
    fn schedule(&mut self, batch: &[Task], now: f64) -> Vec<Allocation>;

    /// Per-resource time committed so far.
    fn committed(&self) -> &[f64];
}

/// Choose the resource minimizing `base[r] + eet[r]`; ties go to the first one.
fn earliest_resource(base: impl Iterator<Item = f64>, eet: &EetTable) -> (usize, f64, f64) {
    let mut best = (0, 0.0, f64::INFINITY);
    for (resource, start) in base.enumerate() {
        let finish = start + eet.get(resource);
        if finish < best.2 {
            best = (resource, start, finish);
        }
    }
    best
}

/// Greedy heterogeneity-aware scheduler without dependencies.
///
/// Repeatedly picks the task with the smallest ratio between its worst and
/// best execution time, ties broken by the largest difference, and places
/// it where it completes first given the time committed so far.
pub struct DifMin {
    resources: Vec<ResourceSpec>,
    committed: Vec<f64>,
}

impl DifMin {
    pub fn new(resources: Vec<ResourceSpec>) -> Self {
        let committed = vec![0.0; resources.len()];
        Self {
            resources,
            committed,
        }
    }
}

impl BatchScheduler for DifMin {
    fn name(&self) -> &'static str {
        "dif-min"
    }

    fn resources(&self) -> &[ResourceSpec] {
        &self.resources
    }

    fn schedule(&mut self, batch: &[Task], _now: f64) -> Vec<Allocation> {
        let mut unscheduled = batch
            .iter()
            .enumerate()
            .map(|(index, task)| (index, EetTable::build(task, &self.resources)))
            .collect::<Vec<_>>();
        let mut allocations = Vec::with_capacity(batch.len());

        while !unscheduled.is_empty() {
            let mut chosen = 0;
            for (pos, (_, eet)) in unscheduled.iter().enumerate().skip(1) {
                let current = &unscheduled[chosen].1;
                let order = eet
                    .div()
                    .total_cmp(&current.div())
                    .then(current.sub().total_cmp(&eet.sub()));
                if order.is_lt() {
                    chosen = pos;
                }
            }
            let (index, eet) = unscheduled.remove(chosen);
            let (resource, start, finish) =
                earliest_resource(self.committed.iter().copied(), &eet);
            self.committed[resource] = finish;

            let task = &batch[index];
            log::debug!(
                "dif-min {} -> {} start {} finish {}",
                task.id(),
                self.resources[resource].name,
                start,
                finish
            );
            allocations.push(Allocation {
                index,
                task_id: task.id().clone(),
                resource,
                start,
                finish,
                duration: eet.get(resource),
            });
        }
        allocations
    }

    fn committed(&self) -> &[f64] {
        &self.committed
    }
}

/// List scheduler of the HEFT family with dependency support.
///
/// Tasks are ranked by decreasing average execution time and each one is
/// placed on the resource where it would finish earliest, not before all
/// its dependencies have finished.
pub struct DifHeft {
    resources: Vec<ResourceSpec>,
    ready: Vec<f64>,
    finish_times: std::collections::HashMap<TaskId, f64>,
}

impl DifHeft {
    pub fn new(resources: Vec<ResourceSpec>) -> Self {
        let ready = vec![0.0; resources.len()];
        Self {
            resources,
            ready,
            finish_times: std::collections::HashMap::new(),
        }
    }

    /// Finish time recorded for a task scheduled in this or a previous batch.
    pub fn finish_time(&self, task_id: &TaskId) -> Option<f64> {
        self.finish_times.get(task_id).copied()
    }
}

impl BatchScheduler for DifHeft {
    fn name(&self) -> &'static str {
        "dif-heft"
    }

    fn resources(&self) -> &[ResourceSpec] {
        &self.resources
    }

    fn schedule(&mut self, batch: &[Task], now: f64) -> Vec<Allocation> {
        if batch.is_empty() {
            return vec![];
        }
        for ready in &mut self.ready {
            *ready = ready.max(now);
        }

        let mut ranked = batch
            .iter()
            .enumerate()
            .map(|(index, task)| (index, EetTable::build(task, &self.resources)))
            .collect::<Vec<_>>();
        ranked.sort_by(|a, b| b.1.average().total_cmp(&a.1.average()));

        let mut allocations = Vec::with_capacity(batch.len());
        for (index, eet) in ranked {
            let task = &batch[index];
            let mut pred_finish = 0.0_f64;
            for dep in task.dependencies() {
                match self.finish_times.get(dep) {
                    Some(finish) => pred_finish = pred_finish.max(*finish),
                    None => log::warn!(
                        "dependency {} of {} has no recorded finish time, ignored",
                        dep,
                        task.id()
                    ),
                }
            }

            let (resource, start, finish) = earliest_resource(
                self.ready.iter().map(|ready| ready.max(pred_finish)),
                &eet,
            );
            self.ready[resource] = finish;
            self.finish_times.insert(task.id().clone(), finish);

            log::debug!(
                "dif-heft {} -> {} start {} finish {}",
                task.id(),
                self.resources[resource].name,
                start,
                finish
            );
            allocations.push(Allocation {
                index,
                task_id: task.id().clone(),
                resource,
                start,
                finish,
                duration: eet.get(resource),
            });
        }
        allocations
    }

    fn committed(&self) -> &[f64] {
        &self.ready
    }
}

/// Selection of the Tier-1 algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    DifMin,
    DifHeft,
}

impl Algorithm {
    pub fn build(&self, resources: Vec<ResourceSpec>) -> Box<dyn BatchScheduler> {
        match self {
            Self::DifMin => Box::new(DifMin::new(resources)),
            Self::DifHeft => Box::new(DifHeft::new(resources)),
        }
    }
}

impl std::str::FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "dif-min" | "difmin" | "min" => Ok(Self::DifMin),
            "dif-heft" | "difheft" | "heft" => Ok(Self::DifHeft),
            _ => Err(format!("unknown Tier-1 algorithm: {}", s)),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DifMin => f.write_str("dif-min"),
            Self::DifHeft => f.write_str("dif-heft"),
        }
    }
}
