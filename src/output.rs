// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use serde::Serialize;

use crate::metrics::MetricsSnapshot;
use crate::task::{QoeClass, TaskKind};

struct TimeAvg {
    last_update: u64,
    last_value: f64,
    sum_values: f64,
    sum_time: f64,
}

impl TimeAvg {
    pub fn new(last_update: u64) -> Self {
        Self {
            last_update,
            last_value: 0.0,
            sum_values: 0.0,
            sum_time: 0.0,
        }
    }
    pub fn avg(&self) -> f64 {
        if self.sum_time > 0.0 {
            self.sum_values / self.sum_time
        } else {
            self.last_value
        }
    }
}

/// Scalar metrics of a single run: one-time values and time averages.
pub struct OutputSingle {
    one_time: std::collections::BTreeMap<String, f64>,
    time_avg: std::collections::BTreeMap<String, TimeAvg>,
}

impl OutputSingle {
    pub fn new() -> Self {
        Self {
            one_time: std::collections::BTreeMap::new(),
            time_avg: std::collections::BTreeMap::new(),
        }
    }

    pub fn one_time(&mut self, name: &str, value: f64) {
        self.one_time.insert(name.to_string(), value);
    }

    /// Update a gauge that has had the given value since `now`, in ns.
    pub fn time_avg(&mut self, name: &str, now: u64, value: f64) {
        let entry = self
            .time_avg
            .entry(name.to_string())
            .or_insert_with(|| TimeAvg::new(now));
        let delta = (now - entry.last_update) as f64;
        entry.sum_values += delta * entry.last_value;
        entry.sum_time += delta;
        entry.last_update = now;
        entry.last_value = value;
    }

    pub fn get_one_time(&self, name: &str) -> Option<f64> {
        self.one_time.get(name).copied()
    }

    pub fn get_time_avg(&self, name: &str) -> Option<f64> {
        self.time_avg.get(name).map(|x| x.avg())
    }

    pub fn header(&self) -> String {
        self.one_time
            .keys()
            .chain(self.time_avg.keys())
            .cloned()
            .collect::<Vec<String>>()
            .join(",")
    }

    pub fn to_csv(&self) -> String {
        self.one_time
            .values()
            .copied()
            .chain(self.time_avg.values().map(|x| x.avg()))
            .map(|x| x.to_string())
            .collect::<Vec<String>>()
            .join(",")
    }

    /// Close all the time averages at the end of the run.
    pub fn finish(&mut self, now: u64) {
        for entry in &mut self.time_avg.values_mut() {
            let delta = (now - entry.last_update) as f64;
            entry.sum_values += delta * entry.last_value;
            entry.sum_time += delta;
            entry.last_update = now;
        }
    }
}

impl Default for OutputSingle {
    fn default() -> Self {
        Self::new()
    }
}

/// A task that has run to completion.
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    /// Where the task ran, e.g. `Tier-1-GPU` or `Tier-2`.
    pub tier_label: String,
    pub task_type: TaskKind,
    /// Event timestamp, in s.
    pub timestamp: f64,
    pub deadline_ms: f64,
    pub qoe_class: QoeClass,
    /// True if the task did not fit into the Tier-2 budget.
    pub fallback: bool,
    /// Simulated time at which the task left the EDF queue, in ms.
    pub start_time: f64,
    /// Simulated time at which the task completed, in ms.
    pub finish_time: f64,
    pub deadline_met: bool,
}

impl Completion {
    pub fn header() -> String {
        "tier_label,task_type,timestamp,deadline_ms,qoe_class,fallback,start_time,finish_time,deadline_met".to_string()
    }

    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{}",
            self.tier_label,
            self.task_type,
            self.timestamp,
            self.deadline_ms,
            self.qoe_class,
            self.fallback,
            self.start_time,
            self.finish_time,
            self.deadline_met
        )
    }
}

pub struct Output {
    /// Completions in order of finish time.
    pub completions: Vec<Completion>,
    pub metrics: MetricsSnapshot,
    pub single: OutputSingle,
    pub config_csv: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_avg() -> anyhow::Result<()> {
        let mut single = OutputSingle::new();
        single.time_avg("metric", 0, 0.0);
        single.time_avg("metric", 20, 1.0);
        single.time_avg("metric", 30, 2.0);
        single.time_avg("metric", 40, 1.0);
        single.time_avg("metric", 50, 3.0);
        single.finish(100);

        let avg = single.get_time_avg("metric").unwrap();
        assert!(avg == 1.9, "{} != 1.9", avg);
        assert_eq!(None, single.get_time_avg("other"));

        Ok(())
    }

    #[test]
    fn test_csv_columns() {
        let mut single = OutputSingle::new();
        single.one_time("execution_time", 0.5);
        single.one_time("num_events", 10.0);
        single.time_avg("edf_queue_len", 0, 1.0);
        single.finish(10);
        assert_eq!("execution_time,num_events,edf_queue_len", single.header());
        assert_eq!("0.5,10,1", single.to_csv());
    }
}
