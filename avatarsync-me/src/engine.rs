//! Avatar engine: the synchronous facade over idle, router and compositor
//!
//! Time is supplied by the caller as engine-relative milliseconds, so the
//! engine itself never sleeps or reads a clock. Drive it with `tick` once per
//! animation frame and feed stream messages through `ingest` in between.

use crate::compositor::WeightCompositor;
use crate::config::EngineConfig;
use crate::error::AvatarError;
use crate::events::EngineEvent;
use crate::idle::IdleLoop;
use crate::message::StreamMessage;
use crate::playback::PlaybackAdapter;
use crate::registry::{BlendshapeRegistry, GestureKind};
use crate::router::StreamRouter;
use crate::session::{SessionStatus, StreamSession};
use avatarsync_core::{BlendshapeWeights, Millis};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Immutable per-tick snapshot handed to the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightFrame {
    pub frame: u64,
    pub at_ms: Millis,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub weights: BlendshapeWeights,
}

pub struct AvatarEngine {
    config: EngineConfig,
    registry: Arc<BlendshapeRegistry>,
    idle: IdleLoop,
    router: StreamRouter,
    compositor: WeightCompositor,
    frames: u64,
}

impl AvatarEngine {
    /// Create an engine whose clock starts at `now`
    pub fn new(
        config: EngineConfig,
        playback: Box<dyn PlaybackAdapter>,
        now: Millis,
    ) -> Result<Self, AvatarError> {
        config.validate().map_err(AvatarError::Config)?;
        let registry = Arc::new(BlendshapeRegistry::with_overrides(&config.gesture_overrides)?);
        let compositor = WeightCompositor::new(registry.channels());
        let idle = IdleLoop::new(&config, now);
        let router = StreamRouter::new(&config, Arc::clone(&registry), playback);

        info!(
            "Avatar engine created ({} channels, {} playback, lip-sync {}, gestures {})",
            compositor.channels().len(),
            router.playback_adapter_name(),
            if config.enable_lip_sync { "on" } else { "off" },
            if config.enable_gestures { "on" } else { "off" },
        );

        Ok(Self {
            config,
            registry,
            idle,
            router,
            compositor,
            frames: 0,
        })
    }

    /// Route one stream message
    pub fn ingest(&mut self, message: StreamMessage, now: Millis) -> Result<(), AvatarError> {
        self.router.handle(message, now)
    }

    /// Parse and route one JSON message
    pub fn ingest_json(&mut self, text: &str, now: Millis) -> Result<(), AvatarError> {
        let message = StreamMessage::from_json(text)
            .map_err(|e| AvatarError::Ingestion(format!("unreadable stream message: {}", e)))?;
        self.ingest(message, now)
    }

    pub fn trigger_gesture(&mut self, kind: GestureKind, now: Millis) {
        self.router.trigger_gesture(kind, now);
    }

    /// Cancel the live session; the idle loop keeps running
    pub fn cancel(&mut self, reason: &str, now: Millis) -> bool {
        self.router.cancel(reason, now)
    }

    /// Advance every component to `now` and compose one frame
    pub fn tick(&mut self, now: Millis) -> WeightFrame {
        self.idle.tick(now);
        self.router.tick(now);
        let weights = self.compose();
        self.frames += 1;
        WeightFrame {
            frame: self.frames,
            at_ms: now,
            status: self.router.state(),
            session_id: self.router.session().map(|s| s.session_id.clone()),
            weights,
        }
    }

    /// Compose the current contributions without advancing time
    pub fn compose(&self) -> BlendshapeWeights {
        self.compositor.compose(
            self.idle.contribution(),
            self.router.gestures().contribution(),
            self.router.visemes().contribution(),
        )
    }

    pub fn status(&self) -> SessionStatus {
        self.router.state()
    }

    pub fn session(&self) -> Option<&StreamSession> {
        self.router.session()
    }

    pub fn router(&self) -> &StreamRouter {
        &self.router
    }

    pub fn idle(&self) -> &IdleLoop {
        &self.idle
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.router.drain_events()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BlendshapeRegistry> {
        &self.registry
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}
