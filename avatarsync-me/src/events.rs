//! Engine events surfaced to the caller

use avatarsync_core::Millis;
use serde::{Deserialize, Serialize};

/// Something the caller may want to react to, e.g. show a fallback avatar
/// when a session errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    SessionStarted {
        session_id: String,
        at_ms: Millis,
    },
    /// A previous session was replaced by a new one
    SessionCancelled {
        session_id: String,
        reason: String,
        at_ms: Millis,
    },
    PlaybackStarted {
        session_id: String,
        segment: usize,
        cues: usize,
        at_ms: Millis,
    },
    /// The adapter could not play a segment; the session continues
    SegmentFailed {
        session_id: String,
        segment: usize,
        reason: String,
        at_ms: Millis,
    },
    /// Malformed cues were dropped at ingestion
    CuesRejected {
        session_id: Option<String>,
        reason: String,
        at_ms: Millis,
    },
    AlignmentCorrected {
        session_id: String,
        reported_ms: Millis,
        adapter_ms: Millis,
        at_ms: Millis,
    },
    SessionEnded {
        session_id: String,
        segments: usize,
        at_ms: Millis,
    },
    SessionErrored {
        session_id: Option<String>,
        message: String,
        at_ms: Millis,
    },
}

impl EngineEvent {
    pub fn at_ms(&self) -> Millis {
        match self {
            EngineEvent::SessionStarted { at_ms, .. }
            | EngineEvent::SessionCancelled { at_ms, .. }
            | EngineEvent::PlaybackStarted { at_ms, .. }
            | EngineEvent::SegmentFailed { at_ms, .. }
            | EngineEvent::CuesRejected { at_ms, .. }
            | EngineEvent::AlignmentCorrected { at_ms, .. }
            | EngineEvent::SessionEnded { at_ms, .. }
            | EngineEvent::SessionErrored { at_ms, .. } => *at_ms,
        }
    }

    /// Whether the event closes a session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineEvent::SessionEnded { .. }
                | EngineEvent::SessionCancelled { .. }
                | EngineEvent::SessionErrored { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = EngineEvent::SessionErrored {
            session_id: Some("s1".into()),
            message: "tts timeout".into(),
            at_ms: 40,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "session_errored");
        assert_eq!(json["message"], "tts timeout");
        assert!(event.is_terminal());
        assert_eq!(event.at_ms(), 40);
    }
}
