// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

//! Enrichment of raw sensor events into tasks: QoE class, deadline and
//! execution cost estimates.

use crate::input::SensorEvent;
use crate::task::{Cost, QoeClass, Sizing, Task, TaskId, TaskKind};

/// Baseline deadline of SLAM tasks, in ms.
pub const SLAM_BASE_DEADLINE: f64 = 10.0;
/// Baseline deadline of voice recognition tasks, in ms.
pub const VOICE_BASE_DEADLINE: f64 = 150.0;
/// Baseline deadline of any other task type, in ms.
pub const DEFAULT_BASE_DEADLINE: f64 = 100.0;
/// Shortest deadline ever assigned to a SLAM task, in ms.
pub const MIN_SLAM_DEADLINE: f64 = 5.0;

const DEFAULT_WORKLOAD: f64 = 100.0;
const DEFAULT_DATA_IN: f64 = 20.0;
const DEFAULT_DATA_OUT: f64 = 10.0;

/// Two tasks closer than this, in s, are considered temporally correlated.
const TEMPORAL_CORRELATION_WINDOW: f64 = 0.05;

const VOICE_COMMANDS: [&str; 4] = ["start", "stop", "turn left", "turn right"];

pub fn base_deadline(kind: &TaskKind) -> f64 {
    match kind {
        TaskKind::Slam => SLAM_BASE_DEADLINE,
        TaskKind::VoiceRecognition => VOICE_BASE_DEADLINE,
        TaskKind::Other(_) => DEFAULT_BASE_DEADLINE,
    }
}

/// Analytic models of the local and offloaded execution costs.
#[derive(Debug, Clone, PartialEq)]
pub struct CostModel {
    /// Local processing frequency.
    pub f_local: f64,
    /// Remote processing frequency.
    pub f_remote: f64,
    /// Static local energy, in J.
    pub alpha: f64,
    /// Dynamic local energy per ms of execution, in J.
    pub beta: f64,
    /// Upload rate.
    pub rate_in: f64,
    /// Download rate.
    pub rate_out: f64,
    /// Transmission power while uploading.
    pub p_in: f64,
    /// Reception power while downloading.
    pub p_out: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            f_local: 50.0,
            f_remote: 200.0,
            alpha: 0.5,
            beta: 0.2,
            rate_in: 10.0,
            rate_out: 10.0,
            p_in: 0.3,
            p_out: 0.2,
        }
    }
}

impl CostModel {
    /// Check that the model cannot produce non-finite costs.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("f_local", self.f_local),
            ("f_remote", self.f_remote),
            ("rate_in", self.rate_in),
            ("rate_out", self.rate_out),
        ] {
            anyhow::ensure!(
                value.is_finite() && value > 0.0,
                "invalid {}: {} (must be finite and positive)",
                name,
                value
            );
        }
        for (name, value) in [
            ("alpha", self.alpha),
            ("beta", self.beta),
            ("p_in", self.p_in),
            ("p_out", self.p_out),
        ] {
            anyhow::ensure!(
                value.is_finite() && value >= 0.0,
                "invalid {}: {} (must be finite and non-negative)",
                name,
                value
            );
        }
        Ok(())
    }

    pub fn local(&self, workload: f64) -> Cost {
        let time_ms = workload / self.f_local;
        Cost {
            time_ms,
            energy_j: self.alpha + self.beta * time_ms,
        }
    }

    pub fn offload(&self, sizing: &Sizing) -> Cost {
        let upload = sizing.data_in / self.rate_in;
        let download = sizing.data_out / self.rate_out;
        let compute = sizing.workload / self.f_remote;
        Cost {
            time_ms: upload + download + compute,
            energy_j: upload * self.p_in + download * self.p_out,
        }
    }
}

/// Rolling state carried from one event to the next.
///
/// Owned by the caller and updated by [`enrich`].
#[derive(Debug, Clone, Default)]
pub struct EnrichmentContext {
    /// Timestamp of the previous task of any type, in s.
    pub prev_timestamp: Option<f64>,
    /// Lower-cased text of the last voice utterance.
    pub last_voice: Option<String>,
}

/// Severity score of a SLAM event, before clamping the deadline.
pub fn slam_score(event: &SensorEvent, context: &EnrichmentContext) -> i64 {
    let mut score = 0_i64;
    if event.obstacle {
        score += 50;
    }
    if event.detections.iter().any(|d| d.near) {
        score += 30;
    }
    if !event.vo_ok {
        score -= 10;
    }
    let max_confidence = event
        .detections
        .iter()
        .map(|d| d.confidence)
        .fold(0.0_f64, f64::max);
    score += (20.0 * max_confidence).floor() as i64;
    if let Some(prev) = context.prev_timestamp {
        if event.ts - prev < TEMPORAL_CORRELATION_WINDOW {
            score += 10;
        }
    }
    if context
        .last_voice
        .as_deref()
        .is_some_and(|text| text.contains("obstacle"))
    {
        score += 20;
    }
    score
}

fn slam_class(score: i64, vo_ok: bool) -> QoeClass {
    if score >= 60 {
        QoeClass::Safety
    } else if score >= 30 {
        QoeClass::Time
    } else if !vo_ok {
        QoeClass::Robustness
    } else if score <= 0 {
        QoeClass::Insensitive
    } else {
        QoeClass::Time
    }
}

fn voice_class(text: &str) -> (f64, QoeClass) {
    if text.contains("obstacle") {
        (30.0, QoeClass::Safety)
    } else if VOICE_COMMANDS.iter().any(|cmd| text.contains(cmd)) {
        (60.0, QoeClass::Time)
    } else {
        (200.0, QoeClass::Energy)
    }
}

/// Turn a raw event into a task, then advance the rolling context.
///
/// The last voice utterance is updated before classifying a voice event,
/// the previous timestamp after classifying any event.
pub fn enrich(
    event: &SensorEvent,
    kind: &TaskKind,
    context: &mut EnrichmentContext,
    model: &CostModel,
) -> Task {
    let voice_text = event.voice_text.as_deref().unwrap_or("").to_lowercase();
    if *kind == TaskKind::VoiceRecognition {
        context.last_voice = Some(voice_text.clone());
    }

    let base = base_deadline(kind);
    let (deadline_ms, qoe_class) = match kind {
        TaskKind::Slam => {
            let score = slam_score(event, context);
            (
                f64::max(MIN_SLAM_DEADLINE, base - score as f64),
                slam_class(score, event.vo_ok),
            )
        }
        TaskKind::VoiceRecognition => voice_class(&voice_text),
        TaskKind::Other(_) => (base, QoeClass::Insensitive),
    };
    context.prev_timestamp = Some(event.ts);

    let sizing = Sizing {
        workload: event.workload.unwrap_or(DEFAULT_WORKLOAD),
        data_in: event.data_in.unwrap_or(DEFAULT_DATA_IN),
        data_out: event.data_out.unwrap_or(DEFAULT_DATA_OUT),
    };
    let task = Task::new(
        TaskId::new(kind.clone(), event.ts),
        qoe_class,
        deadline_ms,
        sizing,
        model.local(sizing.workload),
        model.offload(&sizing),
    )
    .with_dependencies(event.deps.iter().map(|d| d.to_task_id()));
    log::debug!(
        "enriched {} class {} deadline {} ms local {:?} offload {:?}",
        task.id(),
        task.qoe_class(),
        task.deadline_ms(),
        task.local(),
        task.offload()
    );
    task
}
