//! Stream event router: the session state machine
//!
//! The router exclusively owns the live `StreamSession` together with the
//! gesture sequencer, the viseme player and the playback adapter. Messages
//! are handled in delivery order and each one is applied completely before
//! the next tick, so a tick never observes a half-replaced session.
//!
//! ```text
//! idle -> streaming -> playing -> ended
//!            \            \
//!             +------------+--> cancelled | errored
//! ```

use crate::config::EngineConfig;
use crate::error::AvatarError;
use crate::events::EngineEvent;
use crate::gesture::GestureSequencer;
use crate::message::StreamMessage;
use crate::playback::{PlaybackAdapter, PlaybackStatus};
use crate::registry::{BlendshapeRegistry, GestureKind};
use crate::session::{AudioSource, SegmentState, SessionStatus, StreamSession};
use crate::viseme::{validate_cues, VisemeCue, VisemePlayer};
use avatarsync_core::Millis;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

pub struct StreamRouter {
    session: Option<StreamSession>,
    gestures: GestureSequencer,
    visemes: VisemePlayer,
    playback: Box<dyn PlaybackAdapter>,
    alignment_tolerance_ms: Millis,
    // Any u64 difference fits, so wire offsets cannot overflow it.
    alignment_bias_ms: i128,
    adapter_offset_ms: Option<Millis>,
    events: Vec<EngineEvent>,
}

impl StreamRouter {
    pub fn new(
        config: &EngineConfig,
        registry: Arc<BlendshapeRegistry>,
        playback: Box<dyn PlaybackAdapter>,
    ) -> Self {
        Self {
            session: None,
            gestures: GestureSequencer::new(
                Arc::clone(&registry),
                config.gesture_hold_ms,
                config.enable_gestures,
            ),
            visemes: VisemePlayer::new(registry, config.viseme_crossfade_ms, config.enable_lip_sync),
            playback,
            alignment_tolerance_ms: config.alignment_tolerance_ms,
            alignment_bias_ms: 0,
            adapter_offset_ms: None,
            events: Vec::new(),
        }
    }

    /// Apply one inbound message.
    ///
    /// Returns `Err(Ingestion)` when malformed data was dropped and
    /// `Err(Upstream)` for a backend `error` message. The router state is
    /// consistent in both cases.
    pub fn handle(&mut self, message: StreamMessage, now: Millis) -> Result<(), AvatarError> {
        debug!("Routing '{}' message at {}ms", message.kind(), now);

        if message.opens_session() {
            self.ensure_session(message.session_id(), now);
        }

        match message {
            StreamMessage::Text { text, .. } => {
                if let Some(session) = self.live_session_mut() {
                    session.append_transcript(&text);
                }
                Ok(())
            }
            StreamMessage::AudioChunk {
                audio,
                duration_ms,
                visemes,
                ..
            } => self.queue_audio(AudioSource::Inline(audio), duration_ms, visemes, now),
            StreamMessage::AudioUrl {
                url,
                duration_ms,
                visemes,
                ..
            } => {
                let url = Url::parse(&url).map_err(|e| {
                    warn!("Dropping audio_url with invalid URL '{}': {}", url, e);
                    AvatarError::Ingestion(format!("invalid audio URL '{}': {}", url, e))
                })?;
                self.queue_audio(AudioSource::Remote(url), duration_ms, visemes, now)
            }
            StreamMessage::Viseme {
                viseme_id,
                start_offset_ms,
                duration_ms,
            } => self.add_cue(VisemeCue::new(viseme_id, start_offset_ms, duration_ms), now),
            StreamMessage::Gesture { gesture } => {
                self.trigger_gesture(gesture, now);
                Ok(())
            }
            StreamMessage::GestureTimeline { gestures, .. } => {
                if let Some(session) = self.live_session_mut() {
                    debug!(
                        "Session {} scheduled {} timeline gestures",
                        session.session_id,
                        gestures.len()
                    );
                    session.schedule_gestures(gestures);
                }
                Ok(())
            }
            StreamMessage::Alignment { offset_ms } => {
                self.align(offset_ms, now);
                Ok(())
            }
            StreamMessage::End => {
                match self.live_session_mut() {
                    Some(session) => {
                        session.end_requested = true;
                        self.finish_if_drained(now);
                    }
                    None => debug!("Ignoring end without a live session"),
                }
                Ok(())
            }
            StreamMessage::Error { message } => {
                self.fail(&message, now);
                Err(AvatarError::Upstream(message))
            }
            StreamMessage::Pong => Ok(()),
        }
    }

    /// Trigger a gesture outside the message stream.
    ///
    /// Ignored while the last session is errored; the next opener clears it.
    pub fn trigger_gesture(&mut self, kind: GestureKind, now: Millis) {
        if self.state() == SessionStatus::Errored {
            debug!("Ignoring gesture '{}' after upstream error", kind);
            return;
        }
        self.gestures.trigger(kind, now);
    }

    /// Advance timers and playback to `now`
    pub fn tick(&mut self, now: Millis) {
        self.advance_playback(now);

        let due = match self.live_session_mut() {
            Some(session) => session.due_gestures(now),
            None => Vec::new(),
        };
        for kind in due {
            debug!("Timeline gesture '{}' fired at {}ms", kind, now);
            self.gestures.trigger(kind, now);
        }

        self.gestures.tick(now);
    }

    /// Cancel the live session from outside the stream.
    ///
    /// Gesture and viseme contributions are dropped even when no session is
    /// live. Returns whether a session was cancelled.
    pub fn cancel(&mut self, reason: &str, now: Millis) -> bool {
        let cancelled = self.cancel_live(reason, now);
        self.gestures.reset();
        self.visemes.clear();
        cancelled
    }

    /// Current session status, `Idle` before the first session
    pub fn state(&self) -> SessionStatus {
        self.session.as_ref().map_or(SessionStatus::Idle, |s| s.status)
    }

    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }

    pub fn gestures(&self) -> &GestureSequencer {
        &self.gestures
    }

    pub fn visemes(&self) -> &VisemePlayer {
        &self.visemes
    }

    pub fn playback_adapter_name(&self) -> &str {
        self.playback.adapter_name()
    }

    /// Offset into the current segment used for lip-sync, after alignment
    pub fn effective_offset_ms(&self) -> Option<Millis> {
        self.adapter_offset_ms.map(|offset| self.corrected(offset))
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    fn live_session_mut(&mut self) -> Option<&mut StreamSession> {
        self.session.as_mut().filter(|s| s.status.is_live())
    }

    fn ensure_session(&mut self, requested: Option<&str>, now: Millis) {
        if let Some(live) = self.session.as_ref().filter(|s| s.status.is_live()) {
            let joins = match requested {
                Some(id) => id == live.session_id,
                // Without an id, openers join the live reply until it has sent `end`.
                None => !live.end_requested,
            };
            if joins {
                return;
            }
        }

        let session_id = requested
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let reason = format!("superseded by session {}", session_id);
        self.cancel_live(&reason, now);
        // A new utterance starts from a neutral face; idle keeps running.
        self.gestures.reset();
        self.visemes.clear();

        info!("Session {} started at {}ms", session_id, now);
        self.events.push(EngineEvent::SessionStarted {
            session_id: session_id.clone(),
            at_ms: now,
        });
        self.session = Some(StreamSession::new(session_id, now));
    }

    fn cancel_live(&mut self, reason: &str, now: Millis) -> bool {
        let Some(session) = self.session.as_mut().filter(|s| s.status.is_live()) else {
            return false;
        };

        self.playback.stop();
        for segment in session.segments.iter_mut() {
            if matches!(segment.state, SegmentState::Queued | SegmentState::Playing) {
                segment.state = SegmentState::Failed("cancelled".to_string());
            }
        }
        session.status = SessionStatus::Cancelled;
        self.adapter_offset_ms = None;
        self.alignment_bias_ms = 0;

        info!("Session {} cancelled: {}", session.session_id, reason);
        self.events.push(EngineEvent::SessionCancelled {
            session_id: session.session_id.clone(),
            reason: reason.to_string(),
            at_ms: now,
        });
        true
    }

    fn fail(&mut self, message: &str, now: Millis) {
        self.playback.stop();
        self.gestures.reset();
        self.visemes.clear();
        self.adapter_offset_ms = None;
        self.alignment_bias_ms = 0;

        let session_id = match self.live_session_mut() {
            Some(session) => {
                session.status = SessionStatus::Errored;
                session.error = Some(message.to_string());
                Some(session.session_id.clone())
            }
            None => None,
        };

        warn!(
            "Upstream error for session {}: {}",
            session_id.as_deref().unwrap_or("<none>"),
            message
        );
        self.events.push(EngineEvent::SessionErrored {
            session_id,
            message: message.to_string(),
            at_ms: now,
        });
    }

    fn reject_cues(&mut self, error: &AvatarError, now: Millis) {
        let session_id = self.session.as_ref().map(|s| s.session_id.clone());
        warn!("Dropping viseme cues: {}", error);
        self.events.push(EngineEvent::CuesRejected {
            session_id,
            reason: error.to_string(),
            at_ms: now,
        });
    }

    fn queue_audio(
        &mut self,
        source: AudioSource,
        duration_ms: Option<Millis>,
        visemes: Vec<VisemeCue>,
        now: Millis,
    ) -> Result<(), AvatarError> {
        if let AudioSource::Inline(bytes) = &source {
            if bytes.is_empty() && duration_ms.is_none() && visemes.is_empty() {
                return Err(AvatarError::Ingestion("audio_chunk without audio".to_string()));
            }
        }

        let Some(session) = self.live_session_mut() else {
            return Ok(());
        };

        // Buffered cues lead the segment, so the whole run must stay ordered.
        let checked = validate_cues(&visemes).and_then(|_| {
            let mut combined = session.pending_cues.clone();
            combined.extend_from_slice(&visemes);
            validate_cues(&combined)
        });
        let (cues, rejected) = match checked {
            Ok(()) => (visemes, None),
            Err(e) => {
                session.pending_cues.clear();
                (Vec::new(), Some(e))
            }
        };

        let index = session.queue_segment(source, duration_ms, cues, now);
        session.segments[index].cues_rejected = rejected.is_some();
        debug!("Session {} queued segment {}", session.session_id, index);
        let idle_adapter = session.current_segment.map_or(true, |current| {
            session.segments[current].state != SegmentState::Playing
        });

        if let Some(error) = &rejected {
            self.reject_cues(error, now);
        }
        if idle_adapter {
            self.start_next(now);
        }

        match rejected {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn add_cue(&mut self, cue: VisemeCue, now: Millis) -> Result<(), AvatarError> {
        let Some(session) = self.session.as_mut().filter(|s| s.status.is_live()) else {
            debug!("Ignoring viseme without a live session");
            return Ok(());
        };

        let result = match session.latest_segment() {
            Some(index) if session.segments[index].cues_rejected => {
                debug!("Ignoring viseme for segment {} whose cues were rejected", index);
                return Ok(());
            }
            Some(index) => {
                let segment = &mut session.segments[index];
                let playing = segment.state == SegmentState::Playing;
                let checked = if playing {
                    self.visemes.append(cue)
                } else {
                    follows(segment.viseme_cues.last(), cue)
                };
                checked.map(|_| segment.viseme_cues.push(cue))
            }
            None => follows(session.pending_cues.last(), cue).map(|_| session.pending_cues.push(cue)),
        };

        if let Err(error) = &result {
            self.reject_cues(error, now);
        }
        result
    }

    fn align(&mut self, reported_ms: Millis, now: Millis) {
        let Some(adapter_ms) = self.adapter_offset_ms else {
            debug!("Ignoring alignment while nothing is playing");
            return;
        };
        let drift = i128::from(reported_ms) - i128::from(self.corrected(adapter_ms));
        if drift.unsigned_abs() <= u128::from(self.alignment_tolerance_ms) {
            return;
        }

        self.alignment_bias_ms = i128::from(reported_ms) - i128::from(adapter_ms);
        let session_id = self
            .session
            .as_ref()
            .map(|s| s.session_id.clone())
            .unwrap_or_default();
        info!(
            "Session {} resynchronised lip-sync: stream {}ms, adapter {}ms",
            session_id, reported_ms, adapter_ms
        );
        self.events.push(EngineEvent::AlignmentCorrected {
            session_id,
            reported_ms,
            adapter_ms,
            at_ms: now,
        });
    }

    fn corrected(&self, adapter_ms: Millis) -> Millis {
        (i128::from(adapter_ms) + self.alignment_bias_ms).clamp(0, i128::from(Millis::MAX)) as Millis
    }

    /// Start the next queued segment, skipping any that fail to start
    fn start_next(&mut self, now: Millis) -> bool {
        self.adapter_offset_ms = None;
        self.alignment_bias_ms = 0;
        self.visemes.clear();

        let Some(session) = self.session.as_mut().filter(|s| s.status.is_live()) else {
            return false;
        };

        while let Some(index) = session.next_queued() {
            session.current_segment = Some(index);
            let segment = &mut session.segments[index];

            if let Err(e) = self.playback.start(segment, now) {
                let reason = e.to_string();
                warn!("Session {} segment {} failed to start: {}", session.session_id, index, reason);
                segment.state = SegmentState::Failed(reason.clone());
                self.events.push(EngineEvent::SegmentFailed {
                    session_id: session.session_id.clone(),
                    segment: index,
                    reason,
                    at_ms: now,
                });
                continue;
            }

            segment.state = SegmentState::Playing;
            let cues = segment.viseme_cues.clone();
            let cue_count = cues.len();
            if let Err(e) = self.visemes.arm(cues) {
                warn!("Segment {} cues could not be armed: {}", index, e);
            }

            session.status = SessionStatus::Playing;
            session.playback_started_at.get_or_insert(now);
            info!(
                "Session {} playing segment {} via {} ({} cues)",
                session.session_id,
                index,
                self.playback.adapter_name(),
                cue_count
            );
            self.events.push(EngineEvent::PlaybackStarted {
                session_id: session.session_id.clone(),
                segment: index,
                cues: cue_count,
                at_ms: now,
            });
            return true;
        }
        false
    }

    fn advance_playback(&mut self, now: Millis) {
        loop {
            let Some(session) = self.session.as_mut().filter(|s| s.status.is_live()) else {
                return;
            };
            let Some(index) = session
                .current_segment
                .filter(|&i| session.segments[i].state == SegmentState::Playing)
            else {
                break;
            };

            match self.playback.poll(now) {
                PlaybackStatus::Playing { offset_ms } => {
                    self.adapter_offset_ms = Some(offset_ms);
                    let offset = self.corrected(offset_ms);
                    self.visemes.sample(offset);
                    break;
                }
                PlaybackStatus::Finished | PlaybackStatus::Idle => {
                    debug!("Session {} segment {} finished at {}ms", session.session_id, index, now);
                    session.segments[index].state = SegmentState::Finished;
                }
                PlaybackStatus::Failed(reason) => {
                    warn!("Session {} segment {} failed: {}", session.session_id, index, reason);
                    session.segments[index].state = SegmentState::Failed(reason.clone());
                    self.events.push(EngineEvent::SegmentFailed {
                        session_id: session.session_id.clone(),
                        segment: index,
                        reason,
                        at_ms: now,
                    });
                }
            }

            if !self.start_next(now) {
                break;
            }
        }

        self.finish_if_drained(now);
    }

    fn finish_if_drained(&mut self, now: Millis) {
        let Some(session) = self.session.as_mut().filter(|s| s.status.is_live()) else {
            return;
        };
        if !session.end_requested || !session.is_drained() {
            return;
        }

        self.playback.stop();
        self.visemes.clear();
        self.adapter_offset_ms = None;
        session.status = SessionStatus::Ended;
        info!(
            "Session {} ended after {} segments",
            session.session_id,
            session.segments.len()
        );
        self.events.push(EngineEvent::SessionEnded {
            session_id: session.session_id.clone(),
            segments: session.segments.len(),
            at_ms: now,
        });
    }
}

fn follows(previous: Option<&VisemeCue>, cue: VisemeCue) -> Result<(), AvatarError> {
    match previous {
        Some(previous) => validate_cues(&[*previous, cue]),
        None => Ok(()),
    }
}

impl std::fmt::Debug for StreamRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRouter")
            .field("state", &self.state())
            .field("session", &self.session.as_ref().map(|s| s.session_id.as_str()))
            .field("playback", &self.playback.adapter_name())
            .finish()
    }
}
