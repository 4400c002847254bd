// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::task::Task;

/// Result of scheduling a Tier-2 batch.
#[derive(Debug, Default)]
pub struct Tier2Outcome {
    /// Tasks admitted to remote execution, in arrival order.
    pub executed: Vec<Task>,
    /// Tasks that did not fit into the budget, relabeled as Tier-1.
    pub fallback: Vec<Task>,
}

/// Admission of offloaded tasks against a rolling time budget.
#[derive(Debug)]
pub struct Tier2Scheduler {
    /// Maximum offload time admitted per epoch, in ms.
    budget: f64,
    /// Offload time admitted in the current epoch, in ms.
    used_time: f64,
}

impl Tier2Scheduler {
    pub fn new(budget: f64) -> Self {
        Self {
            budget,
            used_time: 0.0,
        }
    }

    pub fn budget(&self) -> f64 {
        self.budget
    }

    pub fn used_time(&self) -> f64 {
        self.used_time
    }

    /// Start a new epoch with the whole budget available.
    pub fn reset_epoch(&mut self) {
        self.used_time = 0.0;
    }

    /// Admit tasks in arrival order while the budget allows.
    ///
    /// No task is ever dropped: whatever does not fit goes back to Tier-1.
    pub fn schedule(&mut self, batch: Vec<Task>) -> Tier2Outcome {
        let mut outcome = Tier2Outcome::default();
        for mut task in batch {
            let offload_time = task.offload().time_ms;
            if self.used_time + offload_time <= self.budget {
                self.used_time += offload_time;
                outcome.executed.push(task);
            } else {
                log::debug!(
                    "fallback {} offload {} ms used {} ms budget {} ms",
                    task.id(),
                    offload_time,
                    self.used_time,
                    self.budget
                );
                task.fall_back();
                outcome.fallback.push(task);
            }
        }
        outcome
    }
}
