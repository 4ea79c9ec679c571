//! Viseme player: lip-sync weights aligned with audio playback position
//!
//! The player keeps a cursor into the cue sequence of the segment that is
//! currently playing. Each sample advances the cursor past every cue whose
//! window has started; the active cue is the last started one whose window
//! still contains the playback offset. At most one cue contributes at a time.

use crate::error::AvatarError;
use crate::registry::BlendshapeRegistry;
use avatarsync_core::{BlendshapeWeights, Millis};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// One timed mouth shape, relative to its segment's playback start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisemeCue {
    #[serde(alias = "visemeId", alias = "viseme")]
    pub viseme_id: u32,
    #[serde(alias = "startOffsetMs", alias = "offset_ms", alias = "offset")]
    pub start_offset_ms: Millis,
    #[serde(alias = "durationMs", alias = "duration")]
    pub duration_ms: Millis,
}

impl VisemeCue {
    pub fn new(viseme_id: u32, start_offset_ms: Millis, duration_ms: Millis) -> Self {
        Self {
            viseme_id,
            start_offset_ms,
            duration_ms,
        }
    }

    /// Exclusive end of the cue window
    pub fn end_offset_ms(&self) -> Millis {
        self.start_offset_ms.saturating_add(self.duration_ms)
    }

    /// Whether `offset_ms` lies in `[start, start + duration)`
    pub fn contains(&self, offset_ms: Millis) -> bool {
        self.start_offset_ms <= offset_ms && offset_ms < self.end_offset_ms()
    }
}

/// Check that cues are ordered by start and do not overlap
pub fn validate_cues(cues: &[VisemeCue]) -> Result<(), AvatarError> {
    for pair in cues.windows(2) {
        check_follows(&pair[0], &pair[1])?;
    }
    Ok(())
}

fn check_follows(previous: &VisemeCue, next: &VisemeCue) -> Result<(), AvatarError> {
    if next.start_offset_ms < previous.start_offset_ms {
        return Err(AvatarError::Ingestion(format!(
            "viseme cue at {}ms is out of order (previous starts at {}ms)",
            next.start_offset_ms, previous.start_offset_ms
        )));
    }
    if next.start_offset_ms < previous.end_offset_ms() {
        return Err(AvatarError::Ingestion(format!(
            "viseme cue at {}ms overlaps previous cue ending at {}ms",
            next.start_offset_ms,
            previous.end_offset_ms()
        )));
    }
    Ok(())
}

/// Plays the cue timeline of the current audio segment
pub struct VisemePlayer {
    registry: Arc<BlendshapeRegistry>,
    enabled: bool,
    crossfade_ms: Millis,
    cues: Vec<VisemeCue>,
    cursor: usize,
    active: Option<usize>,
    last_offset: Option<Millis>,
    fade_from: BlendshapeWeights,
    contribution: BlendshapeWeights,
}

impl VisemePlayer {
    pub fn new(registry: Arc<BlendshapeRegistry>, crossfade_ms: Millis, enabled: bool) -> Self {
        Self {
            registry,
            enabled,
            crossfade_ms,
            cues: Vec::new(),
            cursor: 0,
            active: None,
            last_offset: None,
            fade_from: BlendshapeWeights::new(),
            contribution: BlendshapeWeights::new(),
        }
    }

    /// Replace the timeline with a new segment's cues and rewind the cursor.
    ///
    /// Callers validate cues at ingestion; an unvalidated sequence is
    /// rejected here as a whole.
    pub fn arm(&mut self, cues: Vec<VisemeCue>) -> Result<(), AvatarError> {
        self.clear();
        validate_cues(&cues)?;
        debug!("Viseme player armed with {} cues", cues.len());
        self.cues = cues;
        Ok(())
    }

    /// Append a late cue to the armed timeline.
    ///
    /// A cue whose window already passed is kept but never becomes active.
    pub fn append(&mut self, cue: VisemeCue) -> Result<(), AvatarError> {
        if let Some(last) = self.cues.last() {
            check_follows(last, &cue)?;
        }
        self.cues.push(cue);
        Ok(())
    }

    /// Drop the timeline and close the mouth
    pub fn clear(&mut self) {
        self.cues.clear();
        self.rewind();
    }

    fn rewind(&mut self) {
        self.cursor = 0;
        self.active = None;
        self.last_offset = None;
        self.fade_from.clear();
        self.contribution.clear();
    }

    /// Sample the timeline at `offset_ms` into the current segment
    pub fn sample(&mut self, offset_ms: Millis) -> &BlendshapeWeights {
        if !self.enabled || self.cues.is_empty() {
            self.contribution.clear();
            return &self.contribution;
        }

        if let Some(last) = self.last_offset {
            if offset_ms < last {
                debug!("Playback offset jumped back {}ms -> {}ms, rewinding cues", last, offset_ms);
                self.rewind();
            }
        }
        self.last_offset = Some(offset_ms);

        while self.cursor < self.cues.len() && self.cues[self.cursor].start_offset_ms <= offset_ms {
            self.cursor += 1;
        }

        let active = self
            .cursor
            .checked_sub(1)
            .filter(|&idx| self.cues[idx].contains(offset_ms));

        if active != self.active {
            // The new cue ramps from whatever the mouth showed last tick.
            self.fade_from = std::mem::take(&mut self.contribution);
            self.active = active;
        }

        self.contribution.clear();
        if let Some(idx) = active {
            let cue = self.cues[idx];
            if let Some(target) = self.registry.viseme(cue.viseme_id) {
                let t = self.ramp(offset_ms - cue.start_offset_ms);
                for (key, value) in target.iter() {
                    let weight = if t >= 1.0 {
                        value
                    } else {
                        let from = self.fade_from.value(key);
                        from + (value - from) * t
                    };
                    self.contribution.set(key, weight);
                }
                if t < 1.0 {
                    // Keys the new cue does not drive fade out over the same ramp.
                    for (key, from) in self.fade_from.iter() {
                        if !target.contains_key(key) {
                            self.contribution.set(key, from * (1.0 - t));
                        }
                    }
                }
            } else {
                debug!("Unknown viseme id {}, mouth stays closed", cue.viseme_id);
            }
        }

        &self.contribution
    }

    fn ramp(&self, elapsed_ms: Millis) -> f32 {
        if self.crossfade_ms == 0 {
            1.0
        } else {
            (elapsed_ms as f32 / self.crossfade_ms as f32).clamp(0.0, 1.0)
        }
    }

    pub fn contribution(&self) -> &BlendshapeWeights {
        &self.contribution
    }

    /// Cue whose window contained the last sampled offset
    pub fn active_cue(&self) -> Option<VisemeCue> {
        self.active.map(|idx| self.cues[idx])
    }

    pub fn cues(&self) -> &[VisemeCue] {
        &self.cues
    }

    pub fn is_armed(&self) -> bool {
        !self.cues.is_empty()
    }
}
