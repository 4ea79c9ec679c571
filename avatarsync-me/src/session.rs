//! Stream session: the aggregate state of one avatar utterance

use crate::message::TimedGesture;
use crate::registry::GestureKind;
use crate::viseme::VisemeCue;
use avatarsync_core::Millis;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No session has been opened yet
    Idle,
    Streaming,
    Playing,
    Ended,
    Cancelled,
    Errored,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Cancelled | SessionStatus::Errored)
    }

    /// Streaming or playing
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Streaming | SessionStatus::Playing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Playing => "playing",
            SessionStatus::Ended => "ended",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Errored => "errored",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a segment's audio comes from
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    Inline(Bytes),
    Remote(Url),
}

/// Playback state of one queued segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentState {
    Queued,
    Playing,
    Finished,
    Failed(String),
}

/// One unit of audio with the viseme cues that belong to it
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub index: usize,
    pub source: AudioSource,
    pub queued_at: Millis,
    pub duration_ms: Option<Millis>,
    pub viseme_cues: Vec<VisemeCue>,
    /// Inline cues were malformed; the segment plays without lip-sync
    pub cues_rejected: bool,
    pub state: SegmentState,
}

impl AudioSegment {
    /// Declared duration, else the end of the last cue
    pub fn playback_duration_ms(&self) -> Option<Millis> {
        self.duration_ms
            .or_else(|| self.viseme_cues.last().map(VisemeCue::end_offset_ms))
    }
}

/// State of one utterance, exclusively owned by the router
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub session_id: String,
    pub opened_at: DateTime<Utc>,
    pub started_at: Millis,
    pub status: SessionStatus,
    pub segments: Vec<AudioSegment>,
    /// Index of the segment the playback adapter is working on
    pub current_segment: Option<usize>,
    /// Cues received before any segment was queued
    pub pending_cues: Vec<VisemeCue>,
    pub gesture_timeline: Vec<TimedGesture>,
    timeline_cursor: usize,
    /// Engine time at which the first segment began playing
    pub playback_started_at: Option<Millis>,
    pub transcript: String,
    pub end_requested: bool,
    pub error: Option<String>,
}

impl StreamSession {
    pub fn new(session_id: String, now: Millis) -> Self {
        Self {
            session_id,
            opened_at: Utc::now(),
            started_at: now,
            status: SessionStatus::Streaming,
            segments: Vec::new(),
            current_segment: None,
            pending_cues: Vec::new(),
            gesture_timeline: Vec::new(),
            timeline_cursor: 0,
            playback_started_at: None,
            transcript: String::new(),
            end_requested: false,
            error: None,
        }
    }

    /// Queue a segment, attaching any cues that arrived before it
    pub fn queue_segment(
        &mut self,
        source: AudioSource,
        duration_ms: Option<Millis>,
        viseme_cues: Vec<VisemeCue>,
        now: Millis,
    ) -> usize {
        let index = self.segments.len();
        let mut cues = std::mem::take(&mut self.pending_cues);
        cues.extend(viseme_cues);
        self.segments.push(AudioSegment {
            index,
            source,
            queued_at: now,
            duration_ms,
            viseme_cues: cues,
            cues_rejected: false,
            state: SegmentState::Queued,
        });
        index
    }

    /// First segment still waiting to play
    pub fn next_queued(&self) -> Option<usize> {
        let from = self.current_segment.map_or(0, |idx| idx + 1);
        self.segments
            .iter()
            .skip(from)
            .position(|s| s.state == SegmentState::Queued)
            .map(|pos| pos + from)
    }

    /// Most recently queued segment
    pub fn latest_segment(&self) -> Option<usize> {
        self.segments.len().checked_sub(1)
    }

    /// True when nothing is playing and nothing is waiting
    pub fn is_drained(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s.state, SegmentState::Finished | SegmentState::Failed(_)))
    }

    /// Replace the gesture timeline; entries are kept sorted by offset
    pub fn schedule_gestures(&mut self, mut gestures: Vec<TimedGesture>) {
        gestures.sort_by_key(|g| g.at_ms);
        self.gesture_timeline = gestures;
        self.timeline_cursor = 0;
    }

    /// Timeline gestures due at `now`, in order
    pub fn due_gestures(&mut self, now: Millis) -> Vec<GestureKind> {
        let Some(origin) = self.playback_started_at else {
            return Vec::new();
        };
        let elapsed = now.saturating_sub(origin);
        let mut due = Vec::new();
        while let Some(entry) = self.gesture_timeline.get(self.timeline_cursor) {
            if entry.at_ms > elapsed {
                break;
            }
            due.push(entry.gesture);
            self.timeline_cursor += 1;
        }
        due
    }

    pub fn pending_timeline_entries(&self) -> usize {
        self.gesture_timeline.len() - self.timeline_cursor
    }

    pub fn append_transcript(&mut self, text: &str) {
        if !self.transcript.is_empty() {
            self.transcript.push(' ');
        }
        self.transcript.push_str(text.trim());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline() -> AudioSource {
        AudioSource::Inline(Bytes::from_static(b"pcm"))
    }

    #[test]
    fn test_pending_cues_attach_to_next_segment() {
        let mut session = StreamSession::new("s".into(), 0);
        session.pending_cues.push(VisemeCue::new(2, 0, 100));
        let idx = session.queue_segment(inline(), None, vec![VisemeCue::new(3, 100, 100)], 5);
        assert_eq!(session.segments[idx].viseme_cues.len(), 2);
        assert!(session.pending_cues.is_empty());
        assert_eq!(session.segments[idx].playback_duration_ms(), Some(200));
    }

    #[test]
    fn test_next_queued_skips_current() {
        let mut session = StreamSession::new("s".into(), 0);
        session.queue_segment(inline(), Some(100), Vec::new(), 0);
        session.queue_segment(inline(), Some(100), Vec::new(), 0);
        assert_eq!(session.next_queued(), Some(0));
        session.current_segment = Some(0);
        session.segments[0].state = SegmentState::Playing;
        assert_eq!(session.next_queued(), Some(1));
        assert!(!session.is_drained());
    }

    #[test]
    fn test_timeline_waits_for_playback() {
        let mut session = StreamSession::new("s".into(), 0);
        session.schedule_gestures(vec![
            TimedGesture { gesture: GestureKind::Wave, at_ms: 500 },
            TimedGesture { gesture: GestureKind::Smile, at_ms: 0 },
        ]);
        assert!(session.due_gestures(10_000).is_empty());

        session.playback_started_at = Some(1000);
        assert_eq!(session.due_gestures(1000), vec![GestureKind::Smile]);
        assert!(session.due_gestures(1499).is_empty());
        assert_eq!(session.due_gestures(1500), vec![GestureKind::Wave]);
        assert_eq!(session.pending_timeline_entries(), 0);
    }
}
