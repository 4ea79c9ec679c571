//! Inbound stream message contract of the speech/avatar backend
//!
//! Messages are JSON objects tagged by `type`. Field names are snake_case;
//! the camelCase spellings some backends emit are accepted as aliases.

use crate::registry::GestureKind;
use crate::viseme::VisemeCue;
use avatarsync_core::Millis;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A gesture scheduled relative to the session's first playback start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedGesture {
    pub gesture: GestureKind,
    #[serde(alias = "atMs", alias = "time_ms", alias = "offset_ms")]
    pub at_ms: Millis,
}

/// One message from the backend stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Utterance text; informational, may open a session
    Text {
        text: String,
        #[serde(default, alias = "sessionId", skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Base64 audio payload for one segment
    AudioChunk {
        #[serde(with = "base64_bytes")]
        audio: Bytes,
        #[serde(default, alias = "durationMs", skip_serializing_if = "Option::is_none")]
        duration_ms: Option<Millis>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        visemes: Vec<VisemeCue>,
        #[serde(default, alias = "sessionId", skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Audio to fetch from a URL instead of inline chunks
    AudioUrl {
        url: String,
        #[serde(default, alias = "durationMs", skip_serializing_if = "Option::is_none")]
        duration_ms: Option<Millis>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        visemes: Vec<VisemeCue>,
        #[serde(default, alias = "sessionId", skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// A single cue for the most recently queued segment
    Viseme {
        #[serde(alias = "visemeId", alias = "viseme")]
        viseme_id: u32,
        #[serde(alias = "startOffsetMs", alias = "offset_ms", alias = "offset")]
        start_offset_ms: Millis,
        #[serde(alias = "durationMs", alias = "duration")]
        duration_ms: Millis,
    },
    /// Immediate gesture trigger
    Gesture { gesture: GestureKind },
    /// Pre-scheduled gestures for the session
    GestureTimeline {
        #[serde(alias = "timeline")]
        gestures: Vec<TimedGesture>,
        #[serde(default, alias = "sessionId", skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// The stream's view of the current playback offset
    Alignment {
        #[serde(alias = "offsetMs", alias = "offset")]
        offset_ms: Millis,
    },
    /// No more segments; the session ends once queued audio drains
    End,
    /// Backend failure for the current session
    Error {
        #[serde(alias = "error", alias = "detail")]
        message: String,
    },
    /// Keepalive acknowledgment
    Pong,
}

impl StreamMessage {
    /// Message type name as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::Text { .. } => "text",
            StreamMessage::AudioChunk { .. } => "audio_chunk",
            StreamMessage::AudioUrl { .. } => "audio_url",
            StreamMessage::Viseme { .. } => "viseme",
            StreamMessage::Gesture { .. } => "gesture",
            StreamMessage::GestureTimeline { .. } => "gesture_timeline",
            StreamMessage::Alignment { .. } => "alignment",
            StreamMessage::End => "end",
            StreamMessage::Error { .. } => "error",
            StreamMessage::Pong => "pong",
        }
    }

    /// Whether this message starts a session when none is live
    pub fn opens_session(&self) -> bool {
        matches!(
            self,
            StreamMessage::Text { .. }
                | StreamMessage::AudioChunk { .. }
                | StreamMessage::AudioUrl { .. }
                | StreamMessage::GestureTimeline { .. }
        )
    }

    /// Session id carried by the message, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            StreamMessage::Text { session_id, .. }
            | StreamMessage::AudioChunk { session_id, .. }
            | StreamMessage::AudioUrl { session_id, .. }
            | StreamMessage::GestureTimeline { session_id, .. } => session_id.as_deref(),
            _ => None,
        }
    }

    /// Build a `viseme` message from a cue
    pub fn viseme(cue: VisemeCue) -> Self {
        StreamMessage::Viseme {
            viseme_id: cue.viseme_id,
            start_offset_ms: cue.start_offset_ms,
            duration_ms: cue.duration_ms,
        }
    }

    /// Build an `audio_chunk` message with a declared duration
    pub fn audio(audio: impl Into<Bytes>, duration_ms: Millis, visemes: Vec<VisemeCue>) -> Self {
        StreamMessage::AudioChunk {
            audio: audio.into(),
            duration_ms: Some(duration_ms),
            visemes,
            session_id: None,
        }
    }

    /// Parse one JSON message
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.trim())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
