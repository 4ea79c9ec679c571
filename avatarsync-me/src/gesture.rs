//! Gesture sequencer: discrete gesture triggers with timed decay back to idle

use crate::registry::{BlendshapeRegistry, GestureKind};
use avatarsync_core::{BlendshapeWeights, Millis};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// A gesture that became the current animation at `requested_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureRequest {
    pub kind: GestureKind,
    pub requested_at: Millis,
}

/// Translates gesture requests into decaying weight contributions.
///
/// Only one gesture is ever in flight: `trigger` preempts, it never queues.
/// Preemption and the new state are applied in the same call, so no tick can
/// observe a half-replaced gesture.
pub struct GestureSequencer {
    registry: Arc<BlendshapeRegistry>,
    hold_ms: Millis,
    enabled: bool,
    current: Option<GestureRequest>,
    decay_at: Option<Millis>,
    owned_keys: Vec<String>,
    contribution: BlendshapeWeights,
}

impl GestureSequencer {
    pub fn new(registry: Arc<BlendshapeRegistry>, hold_ms: Millis, enabled: bool) -> Self {
        Self {
            registry,
            hold_ms,
            enabled,
            current: None,
            decay_at: None,
            owned_keys: Vec::new(),
            contribution: BlendshapeWeights::new(),
        }
    }

    /// Make `kind` the current gesture, preempting whatever was in flight
    pub fn trigger(&mut self, kind: GestureKind, now: Millis) {
        if !self.enabled {
            debug!("Gestures disabled, ignoring '{}'", kind);
            return;
        }

        self.decay_at = None;
        self.release();

        if kind == GestureKind::Idle {
            debug!("Gesture returned to idle at {}ms", now);
            return;
        }

        let target = self.registry.gesture(kind);
        self.contribution.overlay(target);
        self.owned_keys = target.keys().map(str::to_string).collect();
        self.current = Some(GestureRequest {
            kind,
            requested_at: now,
        });
        self.decay_at = Some(now + self.hold_ms);
        debug!("Gesture '{}' triggered at {}ms", kind, now);
    }

    /// Fire the decay once its deadline has passed
    pub fn tick(&mut self, now: Millis) -> &BlendshapeWeights {
        if let Some(deadline) = self.decay_at {
            if now >= deadline {
                self.decay_at = None;
                if let Some(request) = self.current {
                    debug!("Gesture '{}' decayed at {}ms", request.kind, now);
                }
                self.release();
            }
        }
        &self.contribution
    }

    /// Drop the current gesture and any pending decay
    pub fn reset(&mut self) {
        self.decay_at = None;
        self.release();
    }

    // Only the keys the triggering gesture owns are cleared.
    fn release(&mut self) {
        for key in self.owned_keys.drain(..) {
            self.contribution.remove(&key);
        }
        self.current = None;
    }

    pub fn contribution(&self) -> &BlendshapeWeights {
        &self.contribution
    }

    pub fn current(&self) -> Option<GestureRequest> {
        self.current
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn decay_at(&self) -> Option<Millis> {
        self.decay_at
    }
}
