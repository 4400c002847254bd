// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use serde::Serialize;

/// Type of task generated by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    /// Visual SLAM fused with camera detections.
    Slam,
    /// Speech recognition of a voice utterance.
    VoiceRecognition,
    /// Any other task type, handled with default deadline and QoE class.
    Other(String),
}

impl TaskKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Slam => "slam",
            Self::VoiceRecognition => "voice_recognition",
            Self::Other(name) => name,
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "slam" => Self::Slam,
            "voice_recognition" => Self::VoiceRecognition,
            other => Self::Other(other.to_string()),
        })
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Event timestamp, in s.
///
/// Totally ordered and hashable so that it can be part of a task identifier.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Timestamp(pub f64);

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0).is_eq()
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::hash::Hash for Timestamp {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Scheduling identifier of a task: unique per input stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId {
    pub kind: TaskKind,
    pub timestamp: Timestamp,
}

impl TaskId {
    pub fn new(kind: TaskKind, timestamp: f64) -> Self {
        Self {
            kind,
            timestamp: Timestamp(timestamp),
        }
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.kind, self.timestamp.0)
    }
}

/// Quality-of-Experience sensitivity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum QoeClass {
    #[serde(rename = "QoE-Safety")]
    Safety,
    #[serde(rename = "QoE-Time")]
    Time,
    #[serde(rename = "QoE-Robustness")]
    Robustness,
    #[serde(rename = "QoE-Energy")]
    Energy,
    #[serde(rename = "QoE-Insensitive")]
    Insensitive,
}

impl QoeClass {
    /// True for the classes that must never leave the device.
    pub fn is_pinned_local(&self) -> bool {
        matches!(self, Self::Safety | Self::Time | Self::Robustness)
    }
}

impl std::fmt::Display for QoeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Safety => "QoE-Safety",
            Self::Time => "QoE-Time",
            Self::Robustness => "QoE-Robustness",
            Self::Energy => "QoE-Energy",
            Self::Insensitive => "QoE-Insensitive",
        };
        f.write_str(name)
    }
}

/// Execution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Tier {
    /// On-device heterogeneous cores.
    #[serde(rename = "Tier-1")]
    Local,
    /// Nearby edge server.
    #[serde(rename = "Tier-2")]
    Edge,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("Tier-1"),
            Self::Edge => f.write_str("Tier-2"),
        }
    }
}

/// Estimated cost of executing a task somewhere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Cost {
    /// Execution time, in ms.
    pub time_ms: f64,
    /// Energy, in J.
    pub energy_j: f64,
}

/// Size of the work carried by a task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sizing {
    /// Abstract computational workload.
    pub workload: f64,
    /// Amount of data to upload when offloading.
    pub data_in: f64,
    /// Amount of data to download when offloading.
    pub data_out: f64,
}

/// A perception or voice task.
///
/// The QoE class, deadline and costs are fixed when the task is created.
/// Only the assigned tier can change afterwards, and the fallback from
/// Tier-2 to Tier-1 can happen at most once.
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    qoe_class: QoeClass,
    deadline_ms: f64,
    sizing: Sizing,
    local: Cost,
    offload: Cost,
    assigned_tier: Tier,
    fallen_back: bool,
    dependencies: std::collections::BTreeSet<TaskId>,
}

impl Task {
    /// Create a task assigned initially to Tier-1.
    pub fn new(
        id: TaskId,
        qoe_class: QoeClass,
        deadline_ms: f64,
        sizing: Sizing,
        local: Cost,
        offload: Cost,
    ) -> Self {
        Self {
            id,
            qoe_class,
            deadline_ms,
            sizing,
            local,
            offload,
            assigned_tier: Tier::Local,
            fallen_back: false,
            dependencies: std::collections::BTreeSet::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = dependencies.into_iter().collect();
        self
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }
    pub fn kind(&self) -> &TaskKind {
        &self.id.kind
    }
    pub fn timestamp(&self) -> f64 {
        self.id.timestamp.0
    }
    pub fn qoe_class(&self) -> QoeClass {
        self.qoe_class
    }
    pub fn deadline_ms(&self) -> f64 {
        self.deadline_ms
    }
    pub fn sizing(&self) -> &Sizing {
        &self.sizing
    }
    pub fn local(&self) -> &Cost {
        &self.local
    }
    pub fn offload(&self) -> &Cost {
        &self.offload
    }
    pub fn assigned_tier(&self) -> Tier {
        self.assigned_tier
    }
    pub fn fallen_back(&self) -> bool {
        self.fallen_back
    }
    pub fn dependencies(&self) -> &std::collections::BTreeSet<TaskId> {
        &self.dependencies
    }

    /// Record the decision of the tier policy.
    pub fn assign(&mut self, tier: Tier) {
        if !self.fallen_back {
            self.assigned_tier = tier;
        }
    }

    /// Relabel a Tier-2 task as Tier-1 after it did not fit into the budget.
    /// Return false, leaving the task untouched, if it already fell back once.
    pub fn fall_back(&mut self) -> bool {
        if self.fallen_back {
            return false;
        }
        self.assigned_tier = Tier::Local;
        self.fallen_back = true;
        true
    }
}
