// Offline replay of a recorded stream log against the engine clock

use anyhow::{Context, Result};
use avatarsync_core::Millis;
use avatarsync_me::{AvatarEngine, ClockPlayback, EngineConfig, EngineEvent, StreamMessage, WeightFrame};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Extra time ticked after the last logged message when no end is given
const DEFAULT_TAIL_MS: Millis = 2000;

/// One logged message and the time it was delivered
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub at_ms: Millis,
    pub message: StreamMessage,
}

/// A line of replay output
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ReplayRecord {
    Frame(WeightFrame),
    Event(EngineEvent),
    Rejected { at_ms: Millis, error: String },
}

/// Parse a JSON-lines log.
///
/// Each line is a stream message with an optional `at_ms` delivery time;
/// lines without one are delivered with the previous line. Blank lines and
/// lines starting with `#` are skipped.
pub fn parse_log(content: &str) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();
    let mut at_ms: Millis = 0;

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut value: Value = serde_json::from_str(line)
            .with_context(|| format!("line {}: not valid JSON", number + 1))?;
        if let Some(object) = value.as_object_mut() {
            if let Some(stamp) = object.remove("at_ms") {
                at_ms = stamp
                    .as_u64()
                    .with_context(|| format!("line {}: at_ms must be a non-negative integer", number + 1))?;
            }
        }
        let message: StreamMessage = serde_json::from_value(value)
            .with_context(|| format!("line {}: not a stream message", number + 1))?;
        entries.push(LogEntry { at_ms, message });
    }

    entries.sort_by_key(|e| e.at_ms);
    Ok(entries)
}

/// Feed `entries` to a fresh engine, ticking every `step_ms` from 0 through
/// `until_ms`
pub fn replay(
    config: EngineConfig,
    entries: Vec<LogEntry>,
    step_ms: Millis,
    until_ms: Option<Millis>,
) -> Result<Vec<ReplayRecord>> {
    anyhow::ensure!(step_ms > 0, "step must be at least 1ms");

    let until_ms = until_ms.unwrap_or_else(|| {
        entries.last().map_or(0, |e| e.at_ms) + DEFAULT_TAIL_MS
    });
    let mut engine = AvatarEngine::new(config, Box::new(ClockPlayback::new()), 0)?;
    let mut pending = entries.into_iter().peekable();
    let mut records = Vec::new();
    let mut now: Millis = 0;

    while now <= until_ms {
        while let Some(entry) = pending.next_if(|e| e.at_ms <= now) {
            debug!("Replaying '{}' at {}ms", entry.message.kind(), entry.at_ms);
            if let Err(e) = engine.ingest(entry.message, entry.at_ms) {
                warn!("Message at {}ms not applied: {}", entry.at_ms, e);
                records.push(ReplayRecord::Rejected {
                    at_ms: entry.at_ms,
                    error: e.to_string(),
                });
            }
        }

        let frame = engine.tick(now);
        records.extend(engine.drain_events().into_iter().map(ReplayRecord::Event));
        records.push(ReplayRecord::Frame(frame));
        now += step_ms;
    }

    if pending.peek().is_some() {
        warn!("Replay stopped at {}ms with messages left in the log", until_ms);
    }
    Ok(records)
}

/// One-line summary of a frame: status and the strongest non-zero weights
pub fn frame_row(frame: &WeightFrame, limit: usize) -> String {
    let mut active: Vec<(&str, f32)> = frame.weights.iter().filter(|(_, v)| *v > 0.0).collect();
    active.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(b.0)));
    let shown: Vec<String> = active
        .iter()
        .take(limit)
        .map(|(k, v)| format!("{}={:.2}", k, v))
        .collect();
    format!(
        "{:>6} {:>7} {:<10} {}",
        frame.frame,
        frame.at_ms,
        frame.status.as_str(),
        shown.join(" ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use avatarsync_me::SessionStatus;

    const LOG: &str = r#"
# reply with one audio segment
{"at_ms":0,"type":"audio_chunk","audio":"AAEC","duration_ms":400,"session_id":"r1"}
{"type":"viseme","viseme_id":2,"start_offset_ms":0,"duration_ms":200}
{"at_ms":100,"type":"gesture","gesture":"smile"}
{"at_ms":150,"type":"end"}
"#;

    #[test]
    fn test_parse_log_carries_timestamps_forward() {
        let entries = parse_log(LOG).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].at_ms, 0);
        assert_eq!(entries[2].at_ms, 100);
        assert_eq!(entries[3].message, StreamMessage::End);
    }

    #[test]
    fn test_parse_log_reports_line() {
        let err = parse_log("{\"type\":\"end\"}\n{\"type\":\"warp\"}").unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_replay_runs_session_to_end() {
        let config = EngineConfig {
            rng_seed: Some(5),
            ..EngineConfig::default()
        };
        let records = replay(config, parse_log(LOG).unwrap(), 50, Some(600)).unwrap();

        let frames: Vec<&WeightFrame> = records
            .iter()
            .filter_map(|r| match r {
                ReplayRecord::Frame(f) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(frames.len(), 13);
        assert_eq!(frames[0].status, SessionStatus::Playing);
        assert_eq!(frames.last().map(|f| f.status), Some(SessionStatus::Ended));
        assert!(records
            .iter()
            .any(|r| matches!(r, ReplayRecord::Event(EngineEvent::SessionEnded { .. }))));
    }

    #[test]
    fn test_frame_row_lists_strongest_weights() {
        let mut engine =
            AvatarEngine::new(EngineConfig::default(), Box::new(ClockPlayback::new()), 0).unwrap();
        engine.trigger_gesture(avatarsync_me::GestureKind::Point, 0);
        let row = frame_row(&engine.tick(10), 1);
        assert!(row.contains("armPointRight=1.00"));
        assert!(row.contains("idle"));
    }
}
