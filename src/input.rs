// SPDX-FileCopyrightText: © 2024 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

//! Raw sensor events, as produced by the ingestion collaborator.
//!
//! Each task type comes as a newline-delimited JSON stream. A record without
//! a valid `ts` makes the whole stream unusable, since it cannot be merged
//! with the other stream by time.

use serde::{Deserialize, Serialize};
use std::io::BufRead;

use crate::task::{TaskId, TaskKind};

/// An object detection reported with a SLAM event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Detection {
    #[serde(default)]
    pub near: bool,
    #[serde(default)]
    pub confidence: f64,
}

/// Reference to a task this event depends on.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DependencyRef {
    pub task: String,
    pub ts: f64,
}

impl DependencyRef {
    pub fn to_task_id(&self) -> TaskId {
        let kind = match self.task.parse::<TaskKind>() {
            Ok(kind) => kind,
            Err(never) => match never {},
        };
        TaskId::new(kind, self.ts)
    }
}

fn default_true() -> bool {
    true
}

/// A single sensor event.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SensorEvent {
    /// Event time, in s.
    pub ts: f64,
    #[serde(default)]
    pub obstacle: bool,
    /// Health of the visual odometry.
    #[serde(default = "default_true")]
    pub vo_ok: bool,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<f64>,
    #[serde(rename = "Din", default, skip_serializing_if = "Option::is_none")]
    pub data_in: Option<f64>,
    #[serde(rename = "Dout", default, skip_serializing_if = "Option::is_none")]
    pub data_out: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<DependencyRef>,
}

impl SensorEvent {
    /// An event with only a timestamp, all the other fields to their defaults.
    pub fn at(ts: f64) -> Self {
        Self {
            ts,
            obstacle: false,
            vo_ok: true,
            detections: vec![],
            voice_text: None,
            workload: None,
            data_in: None,
            data_out: None,
            deps: vec![],
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed event in {source_name} at line {line}: {reason}")]
pub struct MalformedEventError {
    /// Name of the stream, usually the file path.
    pub source_name: String,
    /// 1-based line number.
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Malformed(#[from] MalformedEventError),
}

/// Parse a newline-delimited JSON stream of events of the given kind.
/// Blank lines are skipped.
pub fn read_stream<R: BufRead>(
    reader: R,
    kind: &TaskKind,
    source_name: &str,
) -> Result<Vec<(TaskKind, SensorEvent)>, IngestError> {
    let mut events = vec![];
    for (num, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| IngestError::Io {
            path: source_name.to_string(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |reason: String| MalformedEventError {
            source_name: source_name.to_string(),
            line: num + 1,
            reason,
        };
        let event: SensorEvent =
            serde_json::from_str(&line).map_err(|err| malformed(err.to_string()))?;
        if !event.ts.is_finite() {
            return Err(malformed(format!("non-finite timestamp {}", event.ts)).into());
        }
        for (field, value) in [
            ("workload", event.workload),
            ("Din", event.data_in),
            ("Dout", event.data_out),
        ] {
            if let Some(value) = value.filter(|v| !v.is_finite() || *v < 0.0) {
                return Err(malformed(format!("invalid {} {}", field, value)).into());
            }
        }
        events.push((kind.clone(), event));
    }
    log::debug!("read {} {} events from {}", events.len(), kind, source_name);
    Ok(events)
}

/// Read a whole stream file.
pub fn load_stream(
    path: &std::path::Path,
    kind: &TaskKind,
) -> Result<Vec<(TaskKind, SensorEvent)>, IngestError> {
    let name = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|source| IngestError::Io {
        path: name.clone(),
        source,
    })?;
    read_stream(std::io::BufReader::new(file), kind, &name)
}

/// Merge streams into a single sequence sorted by event time.
/// On equal times, the order of the streams is preserved.
pub fn merge_streams(
    streams: Vec<Vec<(TaskKind, SensorEvent)>>,
) -> Vec<(TaskKind, SensorEvent)> {
    let mut events = streams.into_iter().flatten().collect::<Vec<_>>();
    events.sort_by(|a, b| a.1.ts.total_cmp(&b.1.ts));
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_stream() -> anyhow::Result<()> {
        let data = r#"{"ts": 0.0, "obstacle": true, "vo_ok": true, "detections": [{"near": true, "confidence": 0.9}], "workload": 100}

{"ts": 0.5, "Din": 40, "deps": [{"task": "voice_recognition", "ts": 0.1}]}
"#;
        let events = read_stream(data.as_bytes(), &TaskKind::Slam, "slam.jsonl")?;
        assert_eq!(2, events.len());

        let first = &events[0].1;
        assert!(first.obstacle);
        assert_eq!(1, first.detections.len());
        assert_eq!(Some(100.0), first.workload);

        let second = &events[1].1;
        assert!(second.vo_ok);
        assert!(!second.obstacle);
        assert_eq!(Some(40.0), second.data_in);
        assert_eq!(None, second.data_out);
        assert_eq!(
            TaskId::new(TaskKind::VoiceRecognition, 0.1),
            second.deps[0].to_task_id()
        );
        Ok(())
    }

    #[test]
    fn test_missing_timestamp_is_fatal() {
        let data = "{\"ts\": 0.0}\n{\"voice_text\": \"stop\"}\n{\"ts\": 2.0}\n";
        match read_stream(data.as_bytes(), &TaskKind::VoiceRecognition, "voice.jsonl") {
            Err(IngestError::Malformed(err)) => {
                assert_eq!(2, err.line);
                assert_eq!("voice.jsonl", err.source_name);
                assert!(err.reason.contains("ts"), "{}", err.reason);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_negative_sizes_are_fatal() {
        for (field, line) in [
            ("workload", "{\"ts\": 1.0, \"workload\": -100}"),
            ("Din", "{\"ts\": 1.0, \"Din\": -0.5}"),
            ("Dout", "{\"ts\": 1.0, \"workload\": 10, \"Dout\": -3}"),
        ] {
            let data = format!("{{\"ts\": 0.0, \"workload\": 0, \"Din\": 0}}\n{}\n", line);
            match read_stream(data.as_bytes(), &TaskKind::Slam, "slam.jsonl") {
                Err(IngestError::Malformed(err)) => {
                    assert_eq!(2, err.line);
                    assert!(err.reason.contains(field), "{}", err.reason);
                }
                other => panic!("unexpected result: {:?}", other),
            }
        }
    }

    #[test]
    fn test_invalid_json_is_fatal() {
        let data = "{\"ts\": 0.0\n";
        assert!(matches!(
            read_stream(data.as_bytes(), &TaskKind::Slam, "x"),
            Err(IngestError::Malformed(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let res = load_stream(
            std::path::Path::new("/nonexistent/slam_output.jsonl"),
            &TaskKind::Slam,
        );
        assert!(matches!(res, Err(IngestError::Io { .. })));
    }

    #[test]
    fn test_merge_streams() {
        let slam = vec![
            (TaskKind::Slam, SensorEvent::at(0.0)),
            (TaskKind::Slam, SensorEvent::at(0.2)),
        ];
        let voice = vec![
            (TaskKind::VoiceRecognition, SensorEvent::at(0.1)),
            (TaskKind::VoiceRecognition, SensorEvent::at(0.2)),
        ];
        let merged = merge_streams(vec![slam, voice]);
        let order = merged
            .iter()
            .map(|(kind, event)| (kind.as_str().to_string(), event.ts))
            .collect::<Vec<_>>();
        assert_eq!(
            vec![
                ("slam".to_string(), 0.0),
                ("voice_recognition".to_string(), 0.1),
                ("slam".to_string(), 0.2),
                ("voice_recognition".to_string(), 0.2),
            ],
            order
        );
    }
}
