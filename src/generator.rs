// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use rand::{distributions::Distribution, Rng, SeedableRng};
use weighted_rand::builder::*;

use crate::input::{Detection, SensorEvent};
use crate::task::TaskKind;

/// Utterances of synthetic voice events and their relative frequencies.
const UTTERANCES: [(&str, u32); 8] = [
    ("turn left", 10),
    ("turn right", 10),
    ("stop", 8),
    ("start", 5),
    ("play music", 15),
    ("what time is it", 10),
    ("obstacle ahead", 3),
    ("call home", 5),
];

pub struct EventFactory {
    /// Random distribution of the time between consecutive events, in s
    rv_interarrival: rand_distr::Exp<f64>,
    /// Random distribution of the workload of SLAM events
    rv_slam_workload: rand::distributions::Uniform<f64>,
    /// Random distribution of the workload of voice events
    rv_voice_workload: rand::distributions::Uniform<f64>,
    /// Random distribution of the input data size
    rv_data_in: rand::distributions::Uniform<f64>,
    /// Random distribution of the output data size
    rv_data_out: rand::distributions::Uniform<f64>,
    /// Utterance selection
    utterances: weighted_rand::table::WalkerTable,
    /// RNG
    rng: rand::rngs::StdRng,
    /// Timestamp of the next event, in s.
    next_ts: f64,
}

impl EventFactory {
    /// Create a factory of synthetic sensor events.
    /// Parameters:
    /// - `seed`: pseudo-random number generator seed
    /// - `mean_interarrival`: average time between consecutive events, in s
    pub fn new(seed: u64, mean_interarrival: f64) -> anyhow::Result<Self> {
        anyhow::ensure!(
            mean_interarrival.is_finite() && mean_interarrival > 0.0,
            "invalid mean inter-arrival time: {}",
            mean_interarrival
        );
        let rv_interarrival = rand_distr::Exp::new(1.0 / mean_interarrival)
            .map_err(|err| anyhow::anyhow!("invalid inter-arrival distribution: {}", err))?;
        let weights = UTTERANCES.iter().map(|(_, w)| *w).collect::<Vec<u32>>();
        let mut seed_cnt = 0_u64;
        let mut next_seed = || {
            seed_cnt += 1;
            seed + 1000000 * seed_cnt
        };

        Ok(Self {
            rv_interarrival,
            rv_slam_workload: rand::distributions::Uniform::new(50.0, 500.0),
            rv_voice_workload: rand::distributions::Uniform::new(50.0, 300.0),
            rv_data_in: rand::distributions::Uniform::new(10.0, 60.0),
            rv_data_out: rand::distributions::Uniform::new(5.0, 30.0),
            utterances: WalkerTableBuilder::new(weights.as_slice()).build(),
            rng: rand::rngs::StdRng::seed_from_u64(next_seed()),
            next_ts: 0.0,
        })
    }

    fn advance(&mut self) -> f64 {
        let ts = self.next_ts;
        self.next_ts += self.rv_interarrival.sample(&mut self.rng);
        ts
    }

    /// Create a new random SLAM event.
    pub fn make_slam(&mut self) -> SensorEvent {
        let mut event = SensorEvent::at(self.advance());
        event.obstacle = self.rng.gen_bool(0.1);
        event.vo_ok = self.rng.gen_bool(0.95);
        let num_detections = self.rng.gen_range(0..4);
        event.detections = (0..num_detections)
            .map(|_| Detection {
                near: self.rng.gen_bool(0.3),
                confidence: self.rng.gen_range(0.0..1.0),
            })
            .collect();
        event.workload = Some(self.rv_slam_workload.sample(&mut self.rng));
        event.data_in = Some(self.rv_data_in.sample(&mut self.rng));
        event.data_out = Some(self.rv_data_out.sample(&mut self.rng));
        event
    }

    /// Create a new random voice event.
    pub fn make_voice(&mut self) -> SensorEvent {
        let mut event = SensorEvent::at(self.advance());
        let utterance = UTTERANCES[self.utterances.next_rng(&mut self.rng)].0;
        event.voice_text = Some(utterance.to_string());
        if self.rng.gen_bool(0.5) {
            event.workload = Some(self.rv_voice_workload.sample(&mut self.rng));
        }
        event
    }

    /// Create `num_events` events in order of timestamp, each being a voice
    /// event with probability `voice_share` and a SLAM event otherwise.
    pub fn generate(
        &mut self,
        num_events: usize,
        voice_share: f64,
    ) -> anyhow::Result<Vec<(TaskKind, SensorEvent)>> {
        anyhow::ensure!(
            (0.0..=1.0).contains(&voice_share),
            "invalid share of voice events: {}",
            voice_share
        );
        let mut events = Vec::with_capacity(num_events);
        for _ in 0..num_events {
            if self.rng.gen_bool(voice_share) {
                events.push((TaskKind::VoiceRecognition, self.make_voice()));
            } else {
                events.push((TaskKind::Slam, self.make_slam()));
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_factory_deterministic() -> anyhow::Result<()> {
        let first = EventFactory::new(42, 0.05)?.generate(100, 0.3)?;
        let second = EventFactory::new(42, 0.05)?.generate(100, 0.3)?;
        let other = EventFactory::new(43, 0.05)?.generate(100, 0.3)?;
        assert_eq!(first, second);
        assert_ne!(first, other);
        Ok(())
    }

    #[test]
    fn test_event_factory_content() -> anyhow::Result<()> {
        let mut factory = EventFactory::new(1, 0.01)?;
        let events = factory.generate(1000, 0.4)?;
        assert_eq!(1000, events.len());

        for pair in events.windows(2) {
            assert!(pair[0].1.ts < pair[1].1.ts);
        }
        let num_voice = events
            .iter()
            .filter(|(kind, _)| *kind == TaskKind::VoiceRecognition)
            .count();
        assert!(num_voice > 300 && num_voice < 500, "{}", num_voice);

        for (kind, event) in &events {
            match kind {
                TaskKind::VoiceRecognition => {
                    let text = event.voice_text.as_deref().unwrap_or_default();
                    assert!(UTTERANCES.iter().any(|(u, _)| *u == text));
                }
                TaskKind::Slam => {
                    assert!(event.voice_text.is_none());
                    assert!(event.detections.len() < 4);
                    assert!(event.workload.is_some_and(|w| (50.0..500.0).contains(&w)));
                }
                TaskKind::Other(_) => panic!("unexpected kind {}", kind),
            }
        }

        let mean_gap = events.last().map(|(_, e)| e.ts).unwrap_or_default() / 999.0;
        assert!((mean_gap - 0.01).abs() < 0.002, "{}", mean_gap);
        Ok(())
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(EventFactory::new(0, 0.0).is_err());
        assert!(EventFactory::new(0, f64::NAN).is_err());
        let mut factory = EventFactory::new(0, 1.0).unwrap();
        assert!(factory.generate(10, 1.5).is_err());
        assert!(factory.generate(10, 1.0).is_ok());
    }
}
