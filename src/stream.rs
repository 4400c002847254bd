// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

//! Real-time streaming mode.
//!
//! A producer enriches the incoming events and admits them into the EDF
//! queue, while a controller routes the earliest-deadline tasks into the
//! tier buffers and runs the schedulers on every flushed batch. The
//! admission state is only touched under a single lock, and a batch is
//! always drained out of its buffer before being scheduled.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::buffer::AdmissionState;
use crate::input::SensorEvent;
use crate::qoe::{CostModel, EnrichmentContext};
use crate::task::{Task, TaskId, TaskKind, Tier};
use crate::tier1::{Algorithm, Allocation, BatchScheduler, ResourceSpec};
use crate::tier2::Tier2Scheduler;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Wall-clock time between two consecutive events.
    pub arrival_gap: Duration,
    pub batch_size: usize,
    pub tier2_batch_size: usize,
    pub flush_interval: Duration,
    /// How long the controller sleeps when there is nothing to do.
    pub poll_interval: Duration,
    /// Offload time admitted to Tier-2 per epoch, in ms.
    pub tier2_budget: f64,
    pub tier2_epoch: Duration,
    pub algorithm: Algorithm,
    pub cost_model: CostModel,
    pub resources: Vec<ResourceSpec>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::from(&crate::simulation::Config::default())
    }
}

impl From<&crate::simulation::Config> for StreamConfig {
    fn from(config: &crate::simulation::Config) -> Self {
        let millis = |ms: f64| Duration::from_secs_f64(ms.max(0.0) / 1000.0);
        Self {
            arrival_gap: millis(config.arrival_gap),
            batch_size: config.batch_size,
            tier2_batch_size: config.tier2_batch_size,
            flush_interval: millis(config.flush_interval),
            poll_interval: Duration::from_millis(10),
            tier2_budget: config.tier2_budget,
            tier2_epoch: millis(config.tier2_epoch),
            algorithm: config.algorithm,
            cost_model: config.cost_model.clone(),
            resources: config.resources.clone(),
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.batch_size > 0, "vanishing Tier-1 batch size");
        anyhow::ensure!(self.tier2_batch_size > 0, "vanishing Tier-2 batch size");
        anyhow::ensure!(!self.flush_interval.is_zero(), "vanishing flush interval");
        anyhow::ensure!(!self.poll_interval.is_zero(), "vanishing poll interval");
        anyhow::ensure!(!self.tier2_epoch.is_zero(), "vanishing Tier-2 epoch");
        anyhow::ensure!(
            self.tier2_budget.is_finite() && self.tier2_budget >= 0.0,
            "invalid Tier-2 budget"
        );
        self.cost_model.validate()?;
        crate::tier1::validate_resources(&self.resources)
    }
}

/// A batch handed to one of the schedulers.
#[derive(Debug)]
pub enum BatchReport {
    Local {
        /// Time since the start of the run, in ms.
        flushed_at: f64,
        tasks: Vec<Task>,
        allocations: Vec<Allocation>,
    },
    Remote {
        /// Time since the start of the run, in ms.
        flushed_at: f64,
        executed: Vec<Task>,
        /// Tasks handed back to the Tier-1 buffer.
        fallback: Vec<TaskId>,
    },
}

impl BatchReport {
    pub fn tier(&self) -> Tier {
        match self {
            Self::Local { .. } => Tier::Local,
            Self::Remote { .. } => Tier::Edge,
        }
    }
}

struct Shared {
    admission: AdmissionState,
    /// Set by the producer after the last event.
    closed: bool,
}

fn elapsed_ms(start: tokio::time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

async fn produce(
    events: Vec<(TaskKind, SensorEvent)>,
    shared: Arc<Mutex<Shared>>,
    notify: Arc<Notify>,
    cost_model: CostModel,
    arrival_gap: Duration,
) {
    let mut context = EnrichmentContext::default();
    for (kind, event) in events {
        let mut task = crate::qoe::enrich(&event, &kind, &mut context, &cost_model);
        task.assign(crate::policy::decide(&task));
        log::debug!("admitted {} to {}", task.id(), task.assigned_tier());
        shared.lock().await.admission.admit(task);
        notify.notify_one();
        tokio::time::sleep(arrival_gap).await;
    }
    shared.lock().await.closed = true;
    notify.notify_one();
    log::info!("no more events to stream");
}

struct Controller {
    shared: Arc<Mutex<Shared>>,
    notify: Arc<Notify>,
    tier1: Box<dyn BatchScheduler>,
    tier2: Tier2Scheduler,
    tier2_epoch: Duration,
    tier2_epoch_index: u128,
    poll_interval: Duration,
    start: tokio::time::Instant,
    tx: tokio::sync::mpsc::UnboundedSender<BatchReport>,
}

/// Route all the queued tasks and drain the buffers that are ready.
/// Return the drained batches and whether the input is exhausted.
async fn collect(
    shared: &Mutex<Shared>,
    start: tokio::time::Instant,
) -> (VecDeque<(Tier, Vec<Task>)>, bool) {
    let mut guard = shared.lock().await;
    let shared = &mut *guard;
    let mut batches = VecDeque::new();
    while let Some(tier) = shared.admission.route_next().map(|(tier, _)| tier) {
        if shared.admission.buffer(tier).is_full() {
            let now = elapsed_ms(start);
            batches.push_back((tier, shared.admission.buffer_mut(tier).drain(now)));
        }
    }
    let now = elapsed_ms(start);
    while let Some(batch) = shared.admission.take_ready(now) {
        batches.push_back(batch);
    }
    let done = shared.closed && shared.admission.queue.is_empty();
    if done {
        for tier in [Tier::Local, Tier::Edge] {
            let buffer = shared.admission.buffer_mut(tier);
            if !buffer.is_empty() {
                log::debug!("final flush of {} tasks to {}", buffer.len(), tier);
                batches.push_back((tier, buffer.drain(now)));
            }
        }
    }
    (batches, done)
}

impl Controller {
    async fn dispatch(&mut self, mut batches: VecDeque<(Tier, Vec<Task>)>) {
        while let Some((tier, batch)) = batches.pop_front() {
            let now = elapsed_ms(self.start);
            match tier {
                Tier::Local => {
                    let allocations = self.tier1.schedule(&batch, now);
                    log::info!(
                        "{} scheduled {} tasks at {:.1} ms",
                        self.tier1.name(),
                        allocations.len(),
                        now
                    );
                    self.report(BatchReport::Local {
                        flushed_at: now,
                        tasks: batch,
                        allocations,
                    });
                }
                Tier::Edge => {
                    let epoch = self.start.elapsed().as_nanos() / self.tier2_epoch.as_nanos();
                    if epoch != self.tier2_epoch_index {
                        self.tier2_epoch_index = epoch;
                        self.tier2.reset_epoch();
                    }
                    let outcome = self.tier2.schedule(batch);
                    let fallback = outcome
                        .fallback
                        .iter()
                        .map(|t| t.id().clone())
                        .collect::<Vec<_>>();
                    if !outcome.fallback.is_empty() {
                        log::warn!(
                            "{} tasks did not fit into the Tier-2 budget, forwarded to Tier-1",
                            fallback.len()
                        );
                        let mut guard = self.shared.lock().await;
                        let local = &mut guard.admission.local;
                        for task in outcome.fallback {
                            local.push(task);
                        }
                        // fallback tasks are scheduled on Tier-1 right away
                        let now = elapsed_ms(self.start);
                        batches.push_back((Tier::Local, local.drain(now)));
                    }
                    self.report(BatchReport::Remote {
                        flushed_at: now,
                        executed: outcome.executed,
                        fallback,
                    });
                }
            }
        }
    }

    fn report(&self, report: BatchReport) {
        if self.tx.send(report).is_err() {
            log::warn!("batch report dropped, receiver closed");
        }
    }

    async fn run(mut self) {
        loop {
            let (batches, done) = collect(&self.shared, self.start).await;
            self.dispatch(batches).await;
            if done {
                break;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        log::info!("scheduler controller terminated");
    }
}

/// Stream the events in order of timestamp, in real time, until all of them
/// have been scheduled. Return the batches in the order they were scheduled.
pub async fn run_streaming(
    config: StreamConfig,
    events: Vec<(TaskKind, SensorEvent)>,
) -> anyhow::Result<Vec<BatchReport>> {
    config.validate()?;
    let events = crate::input::merge_streams(vec![events]);

    let shared = Arc::new(Mutex::new(Shared {
        admission: AdmissionState::new(
            config.batch_size,
            config.tier2_batch_size,
            config.flush_interval.as_secs_f64() * 1000.0,
        ),
        closed: false,
    }));
    let notify = Arc::new(Notify::new());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let controller = Controller {
        shared: shared.clone(),
        notify: notify.clone(),
        tier1: config.algorithm.build(config.resources.clone()),
        tier2: Tier2Scheduler::new(config.tier2_budget),
        tier2_epoch: config.tier2_epoch,
        tier2_epoch_index: 0,
        poll_interval: config.poll_interval,
        start: tokio::time::Instant::now(),
        tx,
    };
    let controller = tokio::spawn(controller.run());
    let producer = tokio::spawn(produce(
        events,
        shared,
        notify,
        config.cost_model.clone(),
        config.arrival_gap,
    ));

    let mut reports = vec![];
    while let Some(report) = rx.recv().await {
        reports.push(report);
    }
    producer.await?;
    controller.await?;
    Ok(reports)
}
