//! Audio playback adapter seam
//!
//! The engine never decodes or plays audio itself. A `PlaybackAdapter` is
//! handed one segment at a time and reports the playback offset, completion
//! and failure back to the router when polled.

use crate::error::AvatarError;
use crate::session::{AudioSegment, AudioSource};
use avatarsync_core::Millis;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the adapter is doing with the current segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// Nothing loaded
    Idle,
    /// Playing; `offset_ms` is the position into the segment
    Playing { offset_ms: Millis },
    /// The segment played to its end
    Finished,
    /// The segment could not be loaded or played
    Failed(String),
}

/// Audio output collaborator
pub trait PlaybackAdapter: Send {
    /// Begin playing `segment`, replacing anything in progress
    fn start(&mut self, segment: &AudioSegment, now: Millis) -> Result<(), AvatarError>;

    /// Report the state of the current segment at `now`
    fn poll(&mut self, now: Millis) -> PlaybackStatus;

    /// Stop playback and forget the current segment
    fn stop(&mut self);

    fn adapter_name(&self) -> &str;
}

#[derive(Debug, Default)]
struct ClockState {
    started_at: Option<Millis>,
    duration_ms: Millis,
    seek_to: Option<Millis>,
    fail_next_start: Option<String>,
    fail_current: Option<String>,
    starts: usize,
}

/// Shared control over a `ClockPlayback` that the engine owns
#[derive(Debug, Clone)]
pub struct ClockPlaybackHandle {
    state: Arc<Mutex<ClockState>>,
}

impl ClockPlaybackHandle {
    /// Move the playback position of the current segment
    pub fn seek(&self, offset_ms: Millis) {
        self.state.lock().seek_to = Some(offset_ms);
    }

    /// Make the next `start` call fail with `reason`
    pub fn fail_next_start(&self, reason: impl Into<String>) {
        self.state.lock().fail_next_start = Some(reason.into());
    }

    /// Make the segment that is currently playing fail
    pub fn fail_current(&self, reason: impl Into<String>) {
        self.state.lock().fail_current = Some(reason.into());
    }

    /// Number of segments started so far
    pub fn starts(&self) -> usize {
        self.state.lock().starts
    }
}

/// Playback adapter that advances with the engine clock.
///
/// A segment plays for its declared duration (or until its last cue ends);
/// the offset is simply the time since `start`. Used for replaying recorded
/// streams and for tests.
#[derive(Debug)]
pub struct ClockPlayback {
    state: Arc<Mutex<ClockState>>,
}

impl Default for ClockPlayback {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPlayback {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState::default())),
        }
    }

    pub fn handle(&self) -> ClockPlaybackHandle {
        ClockPlaybackHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl PlaybackAdapter for ClockPlayback {
    fn start(&mut self, segment: &AudioSegment, now: Millis) -> Result<(), AvatarError> {
        let mut state = self.state.lock();
        state.starts += 1;

        if let Some(reason) = state.fail_next_start.take() {
            state.started_at = None;
            return Err(AvatarError::Playback(reason));
        }

        if let AudioSource::Inline(bytes) = &segment.source {
            if bytes.is_empty() {
                state.started_at = None;
                return Err(AvatarError::Playback(format!(
                    "segment {} has an empty audio payload",
                    segment.index
                )));
            }
        }

        state.started_at = Some(now);
        state.duration_ms = segment.playback_duration_ms().unwrap_or(0);
        state.seek_to = None;
        state.fail_current = None;
        debug!(
            "Clock playback started segment {} ({}ms)",
            segment.index, state.duration_ms
        );
        Ok(())
    }

    fn poll(&mut self, now: Millis) -> PlaybackStatus {
        let mut state = self.state.lock();
        let Some(started_at) = state.started_at else {
            return PlaybackStatus::Idle;
        };

        if let Some(reason) = state.fail_current.take() {
            warn!("Clock playback failed: {}", reason);
            state.started_at = None;
            return PlaybackStatus::Failed(reason);
        }

        if let Some(offset) = state.seek_to.take() {
            // Re-anchor so the offset continues from the seek target.
            state.started_at = Some(now.saturating_sub(offset));
        }

        let offset_ms = now.saturating_sub(state.started_at.unwrap_or(started_at));
        if offset_ms >= state.duration_ms {
            state.started_at = None;
            return PlaybackStatus::Finished;
        }
        PlaybackStatus::Playing { offset_ms }
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.started_at = None;
        state.seek_to = None;
        state.fail_current = None;
    }

    fn adapter_name(&self) -> &str {
        "clock"
    }
}
