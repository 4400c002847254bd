// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::task::{Cost, QoeClass, Sizing, Task, TaskId, TaskKind};

/// A task with deadline 100 ms, local energy 1 J and an offload cost of
/// 3.5 ms and 0.8 J.
pub fn make_task(kind: TaskKind, ts: f64, qoe_class: QoeClass, local_ms: f64) -> Task {
    Task::new(
        TaskId::new(kind, ts),
        qoe_class,
        100.0,
        Sizing {
            workload: 100.0,
            data_in: 20.0,
            data_out: 10.0,
        },
        Cost {
            time_ms: local_ms,
            energy_j: 1.0,
        },
        Cost {
            time_ms: 3.5,
            energy_j: 0.8,
        },
    )
}
