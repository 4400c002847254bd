// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::buffer::AdmissionState;
use crate::input::SensorEvent;
use crate::metrics::{ExecutionSite, Metrics};
use crate::output::{Completion, Output, OutputSingle};
use crate::qoe::{CostModel, EnrichmentContext};
use crate::task::{Task, TaskId, TaskKind, Tier};
use crate::tier1::{Algorithm, BatchScheduler, ResourceSpec};

static MEGA: f64 = 1000000.0;

fn to_milliseconds(ns: u64) -> f64 {
    ns as f64 / MEGA
}

fn to_nanoseconds(ms: f64) -> u64 {
    (ms * MEGA).round() as u64
}

/// For all the events there is the time when it is scheduled to occur, in ns.
#[derive(Debug, PartialEq, Eq)]
enum Event {
    /// A new sensor event is ingested.
    Arrival(u64, usize),
    /// The controller drains the EDF queue into the tier buffers.
    Dispatch(u64),
    /// A tier buffer may have waited long enough to be flushed.
    FlushDue(u64, Tier),
    /// An execution on a Tier-1 resource ends.
    LocalEnd(u64, usize),
    /// An execution on Tier-2 ends.
    RemoteEnd(u64, usize),
    /// Print progress.
    Progress(u64, u16),
    /// The simulation ends.
    ExperimentEnd(u64),
}

impl Event {
    fn time(&self) -> u64 {
        match self {
            Self::Arrival(t, _)
            | Self::Dispatch(t)
            | Self::FlushDue(t, _)
            | Self::LocalEnd(t, _)
            | Self::RemoteEnd(t, _)
            | Self::Progress(t, _)
            | Self::ExperimentEnd(t) => *t,
        }
    }
}

/// An event in the queue. Events due at the same time are handled in the
/// order in which they have been scheduled.
#[derive(PartialEq, Eq)]
struct Scheduled {
    seq: u64,
    event: Event,
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .event
            .time()
            .cmp(&self.event.time())
            .then(other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ExecState {
    WaitingForDependencies,
    WaitingForResource,
    Running,
    Done,
}

#[derive(Debug)]
struct Execution {
    task: Task,
    site: ExecutionSite,
    /// Tier-1 resource, None for remote executions.
    resource: Option<usize>,
    /// Execution time, in ns.
    duration: u64,
    /// Time at which the task left the EDF queue, in ns.
    dispatched_at: u64,
    state: ExecState,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// The seed used to generate synthetic events, if any.
    pub seed: u64,
    /// The duration of the simulation, in ms. If None the simulation ends
    /// when all the tasks have completed.
    pub horizon: Option<f64>,
    /// The interval between two consecutive sensor events, in ms.
    pub arrival_gap: f64,
    /// Use the event timestamps as arrival times instead of `arrival_gap`.
    pub replay_timestamps: bool,
    /// The number of tasks that triggers a Tier-1 flush.
    pub batch_size: usize,
    /// The number of tasks that triggers a Tier-2 flush.
    pub tier2_batch_size: usize,
    /// The maximum time a non-empty buffer waits before being flushed, in ms.
    pub flush_interval: f64,
    /// The offload time admitted to Tier-2 per epoch, in ms.
    pub tier2_budget: f64,
    /// The duration of a Tier-2 budget epoch, in ms.
    pub tier2_epoch: f64,
    /// The Tier-1 scheduling algorithm.
    pub algorithm: Algorithm,
    /// The execution cost models.
    pub cost_model: CostModel,
    /// The Tier-1 compute resources.
    pub resources: Vec<ResourceSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: 0,
            horizon: None,
            arrival_gap: 5.0,
            replay_timestamps: false,
            batch_size: 5,
            tier2_batch_size: 5,
            flush_interval: 100.0,
            tier2_budget: 100.0,
            tier2_epoch: 1000.0,
            algorithm: Algorithm::DifHeft,
            cost_model: CostModel::default(),
            resources: crate::tier1::default_resources(),
        }
    }
}

impl Config {
    pub fn header() -> String {
        "seed,horizon,arrival_gap,replay_timestamps,batch_size,tier2_batch_size,flush_interval,tier2_budget,tier2_epoch,algorithm,resources".to_string()
    }
    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{},{}",
            self.seed,
            self.horizon.map(|x| x.to_string()).unwrap_or_default(),
            self.arrival_gap,
            self.replay_timestamps,
            self.batch_size,
            self.tier2_batch_size,
            self.flush_interval,
            self.tier2_budget,
            self.tier2_epoch,
            self.algorithm,
            self.resources
                .iter()
                .map(|r| format!("{}:{}", r.name, r.time_factor))
                .collect::<Vec<String>>()
                .join(";")
        )
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(horizon) = self.horizon {
            anyhow::ensure!(horizon > 0.0, "vanishing horizon");
        }
        anyhow::ensure!(
            self.arrival_gap.is_finite() && self.arrival_gap >= 0.0,
            "invalid arrival gap"
        );
        anyhow::ensure!(self.batch_size > 0, "vanishing Tier-1 batch size");
        anyhow::ensure!(self.tier2_batch_size > 0, "vanishing Tier-2 batch size");
        anyhow::ensure!(
            self.flush_interval.is_finite() && self.flush_interval > 0.0,
            "invalid flush interval"
        );
        anyhow::ensure!(
            self.tier2_budget.is_finite() && self.tier2_budget >= 0.0,
            "invalid Tier-2 budget"
        );
        anyhow::ensure!(
            self.tier2_epoch.is_finite() && to_nanoseconds(self.tier2_epoch) > 0,
            "invalid Tier-2 epoch"
        );
        self.cost_model.validate()?;
        crate::tier1::validate_resources(&self.resources)
    }
}

pub struct Simulation {
    // input
    inputs: Vec<(TaskKind, SensorEvent)>,
    context: EnrichmentContext,

    // internal data structures
    events: std::collections::BinaryHeap<Scheduled>,
    next_seq: u64,
    dispatch_pending: bool,
    flush_timers: std::collections::HashMap<Tier, u64>,
    admission: AdmissionState,
    tier1: Box<dyn BatchScheduler>,
    tier2: crate::tier2::Tier2Scheduler,
    tier2_epoch_index: u64,
    pool: crate::resource::ResourcePool,
    executions: Vec<Execution>,
    dispatched_at: std::collections::HashMap<TaskId, u64>,
    admitted: std::collections::HashSet<TaskId>,
    completed: std::collections::HashSet<TaskId>,
    /// Tier-1 executions waiting for their dependencies to complete.
    blocked: Vec<usize>,

    // outputs
    metrics: Metrics,
    completions: Vec<Completion>,

    // configuration
    config: Config,
}

impl Simulation {
    /// Create a simulation over the events of any number of streams,
    /// which are merged by timestamp.
    pub fn new(config: Config, inputs: Vec<(TaskKind, SensorEvent)>) -> anyhow::Result<Self> {
        config.validate()?;

        let inputs = crate::input::merge_streams(vec![inputs]);
        let pool = crate::resource::ResourcePool::new(config.resources.iter().map(|r| r.name.as_str()));

        Ok(Self {
            inputs,
            context: EnrichmentContext::default(),
            events: std::collections::BinaryHeap::new(),
            next_seq: 0,
            dispatch_pending: false,
            flush_timers: std::collections::HashMap::new(),
            admission: AdmissionState::new(
                config.batch_size,
                config.tier2_batch_size,
                config.flush_interval,
            ),
            tier1: config.algorithm.build(config.resources.clone()),
            tier2: crate::tier2::Tier2Scheduler::new(config.tier2_budget),
            tier2_epoch_index: 0,
            pool,
            executions: vec![],
            dispatched_at: std::collections::HashMap::new(),
            admitted: std::collections::HashSet::new(),
            completed: std::collections::HashSet::new(),
            blocked: vec![],
            metrics: Metrics::new(),
            completions: vec![],
            config,
        })
    }

    fn push(&mut self, event: Event) {
        self.events.push(Scheduled {
            seq: self.next_seq,
            event,
        });
        self.next_seq += 1;
    }

    /// Run a simulation.
    pub fn run(&mut self) -> Output {
        let mut single = OutputSingle::new();

        // schedule the arrivals of all the sensor events
        let first_ts = self.inputs.first().map(|(_, e)| e.ts).unwrap_or_default();
        for i in 0..self.inputs.len() {
            let arrival = if self.config.replay_timestamps {
                (self.inputs[i].1.ts - first_ts) * 1000.0
            } else {
                i as f64 * self.config.arrival_gap
            };
            self.push(Event::Arrival(to_nanoseconds(arrival), i));
        }
        if let Some(horizon) = self.config.horizon {
            self.push(Event::ExperimentEnd(to_nanoseconds(horizon)));
            for i in 1..10 {
                self.push(Event::Progress(to_nanoseconds(i as f64 * horizon / 10.0), i * 10));
            }
        }

        let mut now = 0;
        let real_now = std::time::Instant::now();
        self.update_gauges(&mut single, now);
        while let Some(scheduled) = self.events.pop() {
            now = scheduled.event.time();
            match scheduled.event {
                Event::Arrival(_, index) => self.handle_arrival(now, index),
                Event::Dispatch(_) => self.handle_dispatch(now),
                Event::FlushDue(_, tier) => self.handle_flush_due(now, tier),
                Event::LocalEnd(_, exec_id) => self.handle_local_end(now, exec_id),
                Event::RemoteEnd(_, exec_id) => self.handle_remote_end(now, exec_id),
                Event::Progress(_, percentage) => {
                    log::info!(
                        "completed {}% ({} completed tasks, {} queued, {}/{} buffered, {} busy resources)",
                        percentage,
                        self.metrics.total(),
                        self.admission.queue.len(),
                        self.admission.local.len(),
                        self.admission.edge.len(),
                        self.pool.num_busy()
                    );
                }
                Event::ExperimentEnd(_) => {
                    log::debug!("E {}", now);
                    break;
                }
            }
            self.update_gauges(&mut single, now);
        }

        // save final metrics
        single.finish(now);
        single.one_time("execution_time", real_now.elapsed().as_secs_f64());
        single.one_time("simulated_time", to_milliseconds(now));
        single.one_time("num_events", self.inputs.len() as f64);
        single.one_time("num_completed", self.metrics.total() as f64);
        for (resource, name) in self.pool.names().enumerate() {
            let busy = self.pool.busy_time(resource);
            single.one_time(
                &format!("busy_{}", name),
                if now == 0 { 0.0 } else { busy as f64 / now as f64 },
            );
        }
        let unfinished = self.inputs.len() as u64 - self.metrics.total();
        if unfinished > 0 {
            log::info!("{} tasks not completed at the end of the simulation", unfinished);
        }

        // return the simulation output
        Output {
            completions: std::mem::take(&mut self.completions),
            metrics: self.metrics.snapshot(),
            single,
            config_csv: self.config.to_csv(),
        }
    }

    fn update_gauges(&self, single: &mut OutputSingle, now: u64) {
        single.time_avg("edf_queue_len", now, self.admission.queue.len() as f64);
        single.time_avg("tier1_buffer_len", now, self.admission.local.len() as f64);
        single.time_avg("tier2_buffer_len", now, self.admission.edge.len() as f64);
        single.time_avg("busy_resources", now, self.pool.num_busy() as f64);
    }

    fn handle_arrival(&mut self, now: u64, index: usize) {
        let (kind, event) = &self.inputs[index];
        let mut task =
            crate::qoe::enrich(event, kind, &mut self.context, &self.config.cost_model);
        task.assign(crate::policy::decide(&task));
        log::debug!(
            "A {} {} {} deadline {} ms",
            now,
            task.id(),
            task.assigned_tier(),
            task.deadline_ms()
        );
        self.admitted.insert(task.id().clone());
        self.admission.admit(task);

        // arrivals due at the same time are admitted before dispatching
        if !self.dispatch_pending {
            self.dispatch_pending = true;
            self.push(Event::Dispatch(now));
        }
    }

    fn handle_dispatch(&mut self, now: u64) {
        self.dispatch_pending = false;
        while let Some((tier, task)) = self.admission.route_next() {
            let task_id = task.id().clone();
            self.dispatched_at.insert(task_id, now);
            if self.admission.buffer(tier).is_full() {
                self.flush(now, tier);
            }
        }
        for tier in [Tier::Local, Tier::Edge] {
            if self.admission.buffer(tier).should_flush(to_milliseconds(now)) {
                self.flush(now, tier);
            }
        }
        self.arm_flush_timers(now);
    }

    fn handle_flush_due(&mut self, now: u64, tier: Tier) {
        if self.flush_timers.get(&tier) == Some(&now) {
            self.flush_timers.remove(&tier);
        }
        let due = self.admission.buffer(tier).flush_due();
        if due.is_some_and(|due| to_nanoseconds(due) <= now) {
            log::debug!("F {} {} time-based flush", now, tier);
            self.flush(now, tier);
        }
        self.arm_flush_timers(now);
    }

    fn arm_flush_timers(&mut self, now: u64) {
        for tier in [Tier::Local, Tier::Edge] {
            if let Some(due) = self.admission.buffer(tier).flush_due() {
                let due = std::cmp::max(to_nanoseconds(due), now);
                if self.flush_timers.get(&tier) != Some(&due) {
                    self.flush_timers.insert(tier, due);
                    self.push(Event::FlushDue(due, tier));
                }
            }
        }
    }

    fn flush(&mut self, now: u64, tier: Tier) {
        match tier {
            Tier::Local => self.flush_local(now),
            Tier::Edge => self.flush_edge(now),
        }
    }

    fn flush_local(&mut self, now: u64) {
        let batch = self.admission.local.drain(to_milliseconds(now));
        if batch.is_empty() {
            return;
        }
        let allocations = self.tier1.schedule(&batch, to_milliseconds(now));
        log::debug!(
            "T1 {} {} scheduled {} tasks",
            now,
            self.tier1.name(),
            allocations.len()
        );
        let mut tasks = batch.into_iter().map(Some).collect::<Vec<_>>();
        for allocation in allocations {
            let task = match tasks[allocation.index].take() {
                Some(task) => task,
                None => {
                    log::error!("task {} allocated twice", allocation.task_id);
                    continue;
                }
            };
            let name = self.pool.name(allocation.resource).to_string();
            let site = if task.fallen_back() {
                ExecutionSite::Fallback(name)
            } else {
                ExecutionSite::Local(name)
            };
            let dispatched_at = self.dispatched_at.remove(task.id()).unwrap_or(now);
            let exec_id = self.executions.len();
            self.executions.push(Execution {
                task,
                site,
                resource: Some(allocation.resource),
                duration: to_nanoseconds(allocation.duration),
                dispatched_at,
                state: ExecState::WaitingForDependencies,
            });
            if self.is_blocked(&self.executions[exec_id].task) {
                log::debug!(
                    "D {} {} waits for its dependencies",
                    now,
                    self.executions[exec_id].task.id()
                );
                self.blocked.push(exec_id);
            } else {
                self.request_resource(now, exec_id);
            }
        }
    }

    /// A task is blocked while any of its dependencies has been admitted but
    /// has not completed yet. Dependencies never seen are ignored.
    fn is_blocked(&self, task: &Task) -> bool {
        task.dependencies().iter().any(|dep| {
            dep != task.id() && self.admitted.contains(dep) && !self.completed.contains(dep)
        })
    }

    fn request_resource(&mut self, now: u64, exec_id: usize) {
        let exec = &mut self.executions[exec_id];
        assert_eq!(ExecState::WaitingForDependencies, exec.state);
        exec.state = ExecState::WaitingForResource;
        let resource = match exec.resource {
            Some(resource) => resource,
            None => return,
        };
        if self.pool.request(resource, exec_id, now) {
            self.start_local(now, exec_id);
        } else {
            log::debug!(
                "W {} {} waits for {} ({} waiting)",
                now,
                self.executions[exec_id].task.id(),
                self.pool.name(resource),
                self.pool.num_waiting(resource)
            );
        }
    }

    fn release_dependents(&mut self, now: u64) {
        for exec_id in std::mem::take(&mut self.blocked) {
            if self.is_blocked(&self.executions[exec_id].task) {
                self.blocked.push(exec_id);
            } else {
                self.request_resource(now, exec_id);
            }
        }
    }

    fn start_local(&mut self, now: u64, exec_id: usize) {
        let exec = &mut self.executions[exec_id];
        assert_eq!(ExecState::WaitingForResource, exec.state);
        exec.state = ExecState::Running;
        let end = now + exec.duration;
        log::debug!("S {} {} on {}", now, exec.task.id(), exec.site.label());
        self.push(Event::LocalEnd(end, exec_id));
    }

    fn handle_local_end(&mut self, now: u64, exec_id: usize) {
        let resource = self.executions[exec_id].resource;
        self.complete(now, exec_id);
        if let Some(next) = resource.and_then(|r| self.pool.release(r, exec_id, now)) {
            self.start_local(now, next);
        }
        self.release_dependents(now);
    }

    fn handle_remote_end(&mut self, now: u64, exec_id: usize) {
        self.complete(now, exec_id);
        self.release_dependents(now);
    }

    fn flush_edge(&mut self, now: u64) {
        let epoch = now / to_nanoseconds(self.config.tier2_epoch);
        if epoch != self.tier2_epoch_index {
            self.tier2_epoch_index = epoch;
            self.tier2.reset_epoch();
        }

        let batch = self.admission.edge.drain(to_milliseconds(now));
        if batch.is_empty() {
            return;
        }
        let outcome = self.tier2.schedule(batch);
        log::debug!(
            "T2 {} executed {} fallback {} used {}/{} ms",
            now,
            outcome.executed.len(),
            outcome.fallback.len(),
            self.tier2.used_time(),
            self.tier2.budget()
        );

        for task in outcome.executed {
            let duration = to_nanoseconds(task.offload().time_ms);
            let dispatched_at = self.dispatched_at.remove(task.id()).unwrap_or(now);
            let exec_id = self.executions.len();
            self.executions.push(Execution {
                task,
                site: ExecutionSite::Remote,
                resource: None,
                duration,
                dispatched_at,
                state: ExecState::Running,
            });
            self.push(Event::RemoteEnd(now + duration, exec_id));
        }

        if outcome.fallback.is_empty() {
            return;
        }
        log::warn!(
            "{} tasks did not fit into the Tier-2 budget, forwarded to Tier-1",
            outcome.fallback.len()
        );
        for task in outcome.fallback {
            self.admission.local.push(task);
            if self.admission.local.is_full() {
                self.flush_local(now);
            }
        }
        // fallback tasks are scheduled on Tier-1 right away
        self.flush_local(now);
    }

    fn complete(&mut self, now: u64, exec_id: usize) {
        let exec = &mut self.executions[exec_id];
        exec.state = ExecState::Done;
        self.completed.insert(exec.task.id().clone());
        let start_time = to_milliseconds(exec.dispatched_at);
        let finish_time = to_milliseconds(now);
        let deadline_met = self
            .metrics
            .record(&exec.task, start_time, finish_time, &exec.site);
        log::debug!(
            "C {} {} {} response {} ms deadline {} ms",
            now,
            exec.task.id(),
            exec.site.label(),
            finish_time - start_time,
            exec.task.deadline_ms()
        );
        self.completions.push(Completion {
            tier_label: exec.site.label(),
            task_type: exec.task.kind().clone(),
            timestamp: exec.task.timestamp(),
            deadline_ms: exec.task.deadline_ms(),
            qoe_class: exec.task.qoe_class(),
            fallback: matches!(exec.site, ExecutionSite::Fallback(_)),
            start_time,
            finish_time,
            deadline_met,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{DependencyRef, Detection};
    use crate::task::QoeClass;

    fn slam_obstacle(ts: f64, workload: f64) -> (TaskKind, SensorEvent) {
        let mut event = SensorEvent::at(ts);
        event.obstacle = true;
        event.workload = Some(workload);
        (TaskKind::Slam, event)
    }

    fn voice(ts: f64, text: &str, workload: Option<f64>) -> (TaskKind, SensorEvent) {
        let mut event = SensorEvent::at(ts);
        event.voice_text = Some(text.to_string());
        event.workload = workload;
        (TaskKind::VoiceRecognition, event)
    }

    #[test]
    fn test_invalid_config() {
        let configs = [
            Config {
                batch_size: 0,
                ..Default::default()
            },
            Config {
                flush_interval: 0.0,
                ..Default::default()
            },
            Config {
                horizon: Some(0.0),
                ..Default::default()
            },
            Config {
                resources: vec![],
                ..Default::default()
            },
            Config {
                tier2_epoch: 1e-7,
                ..Default::default()
            },
            Config {
                cost_model: CostModel {
                    rate_out: 0.0,
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        for config in configs {
            assert!(Simulation::new(config, vec![]).is_err());
        }
        assert_eq!(
            Config::header().matches(',').count(),
            Config::default().to_csv().matches(',').count()
        );
    }

    #[test]
    fn test_empty_input() -> anyhow::Result<()> {
        let output = Simulation::new(Config::default(), vec![])?.run();
        assert!(output.completions.is_empty());
        assert_eq!(0, output.metrics.total_tasks);
        Ok(())
    }

    #[test]
    fn test_end_to_end_examples() -> anyhow::Result<()> {
        let mut slam = SensorEvent::at(0.0);
        slam.obstacle = true;
        slam.detections = vec![Detection {
            near: true,
            confidence: 0.9,
        }];
        slam.workload = Some(100.0);
        let inputs = vec![
            (TaskKind::Slam, slam),
            voice(1.0, "please stop now", None),
            voice(2.0, "play music", None),
        ];
        let output = Simulation::new(Config::default(), inputs)?.run();
        assert_eq!(3, output.completions.len());

        let by_ts = |ts: f64| {
            output
                .completions
                .iter()
                .find(|c| c.timestamp == ts)
                .expect("task completed")
        };
        let slam = by_ts(0.0);
        assert_eq!(QoeClass::Safety, slam.qoe_class);
        assert_eq!(5.0, slam.deadline_ms);
        assert!(slam.tier_label.starts_with("Tier-1-"));

        let stop = by_ts(1.0);
        assert_eq!(QoeClass::Time, stop.qoe_class);
        assert!(stop.tier_label.starts_with("Tier-1-"));

        let music = by_ts(2.0);
        assert_eq!(QoeClass::Energy, music.qoe_class);
        assert_eq!("Tier-2", music.tier_label);
        assert!(music.deadline_met);
        // arrived at 10 ms, flushed by time at 100 ms, offloaded for 3.5 ms
        assert_eq!(10.0, music.start_time);
        assert!((music.finish_time - 103.5).abs() < 1e-6);

        assert_eq!(Some(&2), output.metrics.tiers.get(&Tier::Local));
        assert_eq!(Some(&1), output.metrics.tiers.get(&Tier::Edge));
        Ok(())
    }

    #[test]
    fn test_resource_contention() -> anyhow::Result<()> {
        // a single resource and local time of 10 ms per task
        let config = Config {
            arrival_gap: 0.0,
            batch_size: 3,
            resources: vec![ResourceSpec::new("CPU", 1.0)],
            algorithm: Algorithm::DifMin,
            ..Default::default()
        };
        let inputs = (0..3).map(|i| slam_obstacle(i as f64, 500.0)).collect();
        let output = Simulation::new(config, inputs)?.run();

        let finish_times = output
            .completions
            .iter()
            .map(|c| c.finish_time)
            .collect::<Vec<_>>();
        assert_eq!(vec![10.0, 20.0, 30.0], finish_times);
        assert!(output.completions.iter().all(|c| c.tier_label == "Tier-1-CPU"));
        assert!(output.completions.iter().all(|c| c.start_time == 0.0));
        assert_eq!(3, output.metrics.deadline_miss);
        assert!((output.metrics.energy[&Tier::Local] - 7.5).abs() < 1e-9);
        assert_eq!(Some(1.0), output.single.get_one_time("busy_CPU"));
        Ok(())
    }

    #[test]
    fn test_tier2_fallback() -> anyhow::Result<()> {
        // offload time 40 ms, local time 148 ms
        let config = Config {
            arrival_gap: 0.0,
            tier2_batch_size: 3,
            tier2_budget: 100.0,
            ..Default::default()
        };
        let inputs = (0..3)
            .map(|i| voice(i as f64, "play music", Some(7400.0)))
            .collect();
        let output = Simulation::new(config, inputs)?.run();
        assert_eq!(3, output.completions.len());

        let remote = output
            .completions
            .iter()
            .filter(|c| c.tier_label == "Tier-2")
            .collect::<Vec<_>>();
        assert_eq!(2, remote.len());
        assert!(remote.iter().all(|c| (c.finish_time - 40.0).abs() < 1e-6));
        assert_eq!(vec![0.0, 1.0], remote.iter().map(|c| c.timestamp).collect::<Vec<_>>());

        // the fallback is scheduled on Tier-1 as soon as Tier-2 rejects it
        // and runs on the GPU at half the local time
        let fallback = output
            .completions
            .iter()
            .find(|c| c.fallback)
            .expect("one fallback task");
        assert_eq!(2.0, fallback.timestamp);
        assert_eq!("Tier-1-GPU", fallback.tier_label);
        assert_eq!(0.0, fallback.start_time);
        assert!((fallback.finish_time - 74.0).abs() < 1e-6);
        assert!(fallback.deadline_met);

        assert_eq!(1, output.metrics.fallbacks);
        assert_eq!(Some(&1), output.metrics.tiers.get(&Tier::Local));
        assert_eq!(Some(&2), output.metrics.tiers.get(&Tier::Edge));
        Ok(())
    }

    #[test]
    fn test_tiny_tier2_epoch() -> anyhow::Result<()> {
        let config = Config {
            tier2_epoch: 1e-6,
            tier2_batch_size: 1,
            ..Default::default()
        };
        let inputs = vec![voice(0.0, "play music", None), voice(1.0, "play music", None)];
        let output = Simulation::new(config, inputs)?.run();
        assert_eq!(2, output.completions.len());
        assert!(output.completions.iter().all(|c| c.tier_label == "Tier-2"));
        Ok(())
    }

    #[test]
    fn test_dependencies_complete_first() -> anyhow::Result<()> {
        let config = Config {
            arrival_gap: 0.0,
            batch_size: 1,
            resources: vec![ResourceSpec::new("CPU", 1.0), ResourceSpec::new("GPU", 0.5)],
            algorithm: Algorithm::DifHeft,
            ..Default::default()
        };
        let mut dependent = slam_obstacle(2.0, 100.0);
        dependent.1.deps = vec![DependencyRef {
            task: "slam".to_string(),
            ts: 1.0,
        }];
        let inputs = vec![slam_obstacle(0.0, 500.0), slam_obstacle(1.0, 500.0), dependent];
        let output = Simulation::new(config, inputs)?.run();
        assert_eq!(3, output.completions.len());

        let finish_of = |ts: f64| {
            output
                .completions
                .iter()
                .find(|c| c.timestamp == ts)
                .map(|c| c.finish_time)
                .expect("task completed")
        };
        // the dependent task takes at least 1 ms on either resource
        assert!(
            finish_of(2.0) >= finish_of(1.0) + 1.0 - 1e-6,
            "dependent finished at {} and its dependency at {}",
            finish_of(2.0),
            finish_of(1.0)
        );
        Ok(())
    }

    #[test]
    fn test_unknown_dependencies_do_not_block() -> anyhow::Result<()> {
        let config = Config {
            batch_size: 1,
            resources: vec![ResourceSpec::new("CPU", 1.0)],
            ..Default::default()
        };
        let mut event = slam_obstacle(0.0, 100.0);
        event.1.deps = vec![
            DependencyRef {
                task: "slam".to_string(),
                ts: 42.0,
            },
            DependencyRef {
                task: "slam".to_string(),
                ts: 0.0,
            },
        ];
        let output = Simulation::new(config, vec![event])?.run();
        assert_eq!(1, output.completions.len());
        assert!((output.completions[0].finish_time - 2.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_horizon() -> anyhow::Result<()> {
        let config = Config {
            horizon: Some(12.0),
            arrival_gap: 0.0,
            batch_size: 1,
            resources: vec![ResourceSpec::new("CPU", 1.0)],
            ..Default::default()
        };
        let inputs = (0..3).map(|i| slam_obstacle(i as f64, 250.0)).collect();
        let output = Simulation::new(config, inputs)?.run();
        // 5 ms each on a single resource
        assert_eq!(2, output.completions.len());
        assert_eq!(Some(12.0), output.single.get_one_time("simulated_time"));
        Ok(())
    }

    #[test]
    fn test_deterministic() -> anyhow::Result<()> {
        let mut inputs = vec![];
        for i in 0..40 {
            let ts = i as f64 * 0.01;
            if i % 3 == 0 {
                inputs.push(voice(ts, "turn right", Some(50.0 + i as f64)));
            } else if i % 3 == 1 {
                inputs.push(voice(ts, "what time is it", Some(30.0 * i as f64)));
            } else {
                inputs.push(slam_obstacle(ts, 20.0 * i as f64));
            }
        }
        for algorithm in [Algorithm::DifMin, Algorithm::DifHeft] {
            let config = Config {
                algorithm,
                replay_timestamps: true,
                ..Default::default()
            };
            let first = Simulation::new(config.clone(), inputs.clone())?.run();
            let second = Simulation::new(config, inputs.clone())?.run();
            assert_eq!(40, first.metrics.total_tasks);
            assert_eq!(first.metrics, second.metrics);
            assert_eq!(
                first.completions.iter().map(|c| c.to_csv()).collect::<Vec<_>>(),
                second.completions.iter().map(|c| c.to_csv()).collect::<Vec<_>>()
            );
            for pair in first.completions.windows(2) {
                assert!(pair[0].finish_time <= pair[1].finish_time);
            }
        }
        Ok(())
    }
}
