// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::task::{Task, Tier};

/// Decide where a task should run.
///
/// Safety, Time and Robustness tasks never leave the device. The others
/// are offloaded only if that meets the deadline and saves energy.
pub fn decide(task: &Task) -> Tier {
    if task.qoe_class().is_pinned_local() {
        return Tier::Local;
    }
    let offload = task.offload();
    if offload.time_ms <= task.deadline_ms() && offload.energy_j < task.local().energy_j {
        Tier::Edge
    } else {
        Tier::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{Detection, SensorEvent};
    use crate::qoe::{enrich, CostModel, EnrichmentContext};
    use crate::task::{Cost, QoeClass, Sizing, TaskId, TaskKind};
    use rand::{Rng, SeedableRng};

    fn task_with(qoe_class: QoeClass, deadline_ms: f64, local: Cost, offload: Cost) -> Task {
        Task::new(
            TaskId::new(TaskKind::VoiceRecognition, 0.0),
            qoe_class,
            deadline_ms,
            Sizing {
                workload: 100.0,
                data_in: 20.0,
                data_out: 10.0,
            },
            local,
            offload,
        )
    }

    #[test]
    fn test_end_to_end_examples() {
        let model = CostModel::default();
        let mut context = EnrichmentContext::default();

        let mut slam = SensorEvent::at(0.0);
        slam.obstacle = true;
        slam.detections = vec![Detection {
            near: true,
            confidence: 0.9,
        }];
        slam.workload = Some(100.0);
        let task = enrich(&slam, &TaskKind::Slam, &mut context, &model);
        assert_eq!(Tier::Local, decide(&task));

        let mut voice = SensorEvent::at(1.0);
        voice.voice_text = Some("please stop now".to_string());
        let task = enrich(&voice, &TaskKind::VoiceRecognition, &mut context, &model);
        assert_eq!(60.0, task.deadline_ms());
        assert_eq!(QoeClass::Time, task.qoe_class());
        assert_eq!(Tier::Local, decide(&task));

        let mut voice = SensorEvent::at(2.0);
        voice.voice_text = Some("play music".to_string());
        let task = enrich(&voice, &TaskKind::VoiceRecognition, &mut context, &model);
        assert_eq!(QoeClass::Energy, task.qoe_class());
        assert!(task.offload().time_ms < task.deadline_ms());
        assert!(task.offload().energy_j < task.local().energy_j);
        assert_eq!(Tier::Edge, decide(&task));
    }

    #[test]
    fn test_offload_conditions() {
        let local = Cost {
            time_ms: 2.0,
            energy_j: 0.9,
        };

        // too slow remotely
        let slow = Cost {
            time_ms: 250.0,
            energy_j: 0.1,
        };
        assert_eq!(
            Tier::Local,
            decide(&task_with(QoeClass::Energy, 200.0, local, slow))
        );

        // no energy saving
        let costly = Cost {
            time_ms: 3.5,
            energy_j: 0.9,
        };
        assert_eq!(
            Tier::Local,
            decide(&task_with(QoeClass::Insensitive, 200.0, local, costly))
        );

        // deadline met exactly
        let exact = Cost {
            time_ms: 200.0,
            energy_j: 0.1,
        };
        assert_eq!(
            Tier::Edge,
            decide(&task_with(QoeClass::Insensitive, 200.0, local, exact))
        );
    }

    #[test]
    fn test_pinned_classes_never_offloaded() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            for class in [QoeClass::Safety, QoeClass::Time, QoeClass::Robustness] {
                let local = Cost {
                    time_ms: rng.gen_range(0.0..1000.0),
                    energy_j: rng.gen_range(0.0..100.0),
                };
                let offload = Cost {
                    time_ms: rng.gen_range(0.0..1000.0),
                    energy_j: rng.gen_range(0.0..100.0),
                };
                let deadline = rng.gen_range(1.0..1000.0);
                assert_eq!(
                    Tier::Local,
                    decide(&task_with(class, deadline, local, offload))
                );
            }
        }
    }
}
