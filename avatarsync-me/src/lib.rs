//! avatarsync-me: avatar animation synchronization engine
//!
//! Turns a live stream of speech events into blendshape weights:
//! - Idle loop with blinking and breathing that never stops
//! - Gesture overlays that preempt each other and decay back to idle
//! - Viseme lip-sync aligned with the audio playback offset
//! - A session state machine with barge-in, drain-on-end and error fallback
//! - A tokio driver and WebSocket client for live use

pub mod error;
pub mod config;
pub mod registry;
pub mod idle;
pub mod gesture;
pub mod viseme;
pub mod message;
pub mod session;
pub mod playback;
pub mod events;
pub mod router;
pub mod compositor;
pub mod engine;
pub mod driver;
pub mod stream_client;

pub use error::AvatarError;
pub use config::EngineConfig;
pub use registry::{BlendshapeRegistry, GestureKind};
pub use idle::IdleLoop;
pub use gesture::{GestureRequest, GestureSequencer};
pub use viseme::{validate_cues, VisemeCue, VisemePlayer};
pub use message::{StreamMessage, TimedGesture};
pub use session::{AudioSegment, AudioSource, SegmentState, SessionStatus, StreamSession};
pub use playback::{ClockPlayback, ClockPlaybackHandle, PlaybackAdapter, PlaybackStatus};
pub use events::EngineEvent;
pub use router::StreamRouter;
pub use compositor::WeightCompositor;
pub use engine::{AvatarEngine, WeightFrame};
pub use driver::{DriverCommand, DriverHandle, EngineDriver};
pub use stream_client::{StreamClient, StreamClosed};
pub use avatarsync_core::{BlendshapeWeights, Millis};
