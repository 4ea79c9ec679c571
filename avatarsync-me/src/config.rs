//! Configuration for the avatar animation engine

use crate::error::AvatarError;
use avatarsync_core::Error as CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Animation tick cadence used by the async driver (1-1000 ms, default 16)
    pub frame_interval_ms: u64,

    /// How long a gesture holds before decaying back to idle (default 1200)
    pub gesture_hold_ms: u64,

    /// Lower bound of the random blink interval (default 2500)
    pub blink_min_interval_ms: u64,

    /// Upper bound of the random blink interval (default 5000)
    pub blink_max_interval_ms: u64,

    /// How long the eyes stay shut during a blink (default 120)
    pub blink_duration_ms: u64,

    /// Breathing sine amplitude on `jawOpen` (0.0-1.0, default 0.03)
    pub breath_amplitude: f32,

    /// Breathing period (default 4000)
    pub breath_period_ms: u64,

    /// Linear ramp applied when a viseme cue becomes active (default 60)
    pub viseme_crossfade_ms: u64,

    /// Drift tolerated between stream alignment and the playback clock (default 80)
    pub alignment_tolerance_ms: u64,

    /// Drive mouth shapes from viseme cues
    pub enable_lip_sync: bool,

    /// Accept gesture triggers
    pub enable_gestures: bool,

    /// Capacity of the driver's event broadcast channel
    pub event_buffer_size: usize,

    /// Fixed seed for blink scheduling (random when unset)
    pub rng_seed: Option<u64>,

    /// Replacement weight vectors keyed by gesture name (`smile`, `wave`, ...)
    pub gesture_overrides: HashMap<String, HashMap<String, f32>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            gesture_hold_ms: 1200,
            blink_min_interval_ms: 2500,
            blink_max_interval_ms: 5000,
            blink_duration_ms: 120,
            breath_amplitude: 0.03,
            breath_period_ms: 4000,
            viseme_crossfade_ms: 60,
            alignment_tolerance_ms: 80,
            enable_lip_sync: true,
            enable_gestures: true,
            event_buffer_size: 256,
            rng_seed: None,
            gesture_overrides: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=1000).contains(&self.frame_interval_ms) {
            return Err("Frame interval must be between 1 and 1000 ms".to_string());
        }

        if self.gesture_hold_ms == 0 {
            return Err("Gesture hold must be greater than 0".to_string());
        }

        if self.blink_min_interval_ms == 0 {
            return Err("Blink interval must be greater than 0".to_string());
        }

        if self.blink_min_interval_ms > self.blink_max_interval_ms {
            return Err(format!(
                "Blink interval bounds inverted ({} > {})",
                self.blink_min_interval_ms, self.blink_max_interval_ms
            ));
        }

        if self.blink_duration_ms == 0 || self.blink_duration_ms >= self.blink_min_interval_ms {
            return Err("Blink duration must be positive and shorter than the blink interval".to_string());
        }

        if !self.breath_amplitude.is_finite() || !(0.0..=1.0).contains(&self.breath_amplitude) {
            return Err("Breath amplitude must be between 0.0 and 1.0".to_string());
        }

        if self.breath_period_ms == 0 {
            return Err("Breath period must be greater than 0".to_string());
        }

        if self.event_buffer_size == 0 {
            return Err("Event buffer size must be greater than 0".to_string());
        }

        for (gesture, weights) in &self.gesture_overrides {
            if gesture.is_empty() {
                return Err("Gesture override name cannot be empty".to_string());
            }
            for (key, value) in weights {
                if key.is_empty() || key.chars().any(|c| c.is_control()) {
                    return Err(format!("Gesture override '{}' has an invalid blendshape name", gesture));
                }
                if !value.is_finite() {
                    return Err(format!("Gesture override '{}.{}' must be finite", gesture, key));
                }
            }
        }

        Ok(())
    }

    /// Load configuration from a JSON, TOML or YAML file
    pub fn from_file(path: &str) -> Result<Self, AvatarError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a string, trying JSON, then TOML, then YAML
    pub fn from_str(content: &str) -> Result<Self, AvatarError> {
        if let Ok(config) = serde_json::from_str::<EngineConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = toml::from_str::<EngineConfig>(content) {
            return Ok(config);
        }

        serde_yaml::from_str::<EngineConfig>(content)
            .map_err(|e| AvatarError::Core(CoreError::from(e)))
    }

    /// Defaults overridden by `AVATARSYNC_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u64>("AVATARSYNC_FRAME_INTERVAL_MS") {
            config.frame_interval_ms = v;
        }
        if let Some(v) = env_parse::<u64>("AVATARSYNC_GESTURE_HOLD_MS") {
            config.gesture_hold_ms = v;
        }
        if let Some(v) = env_parse::<u64>("AVATARSYNC_VISEME_CROSSFADE_MS") {
            config.viseme_crossfade_ms = v;
        }
        if let Some(v) = env_parse::<u64>("AVATARSYNC_ALIGNMENT_TOLERANCE_MS") {
            config.alignment_tolerance_ms = v;
        }
        if let Some(v) = env_parse::<bool>("AVATARSYNC_ENABLE_LIP_SYNC") {
            config.enable_lip_sync = v;
        }
        if let Some(v) = env_parse::<bool>("AVATARSYNC_ENABLE_GESTURES") {
            config.enable_gestures = v;
        }
        if let Some(v) = env_parse::<u64>("AVATARSYNC_RNG_SEED") {
            config.rng_seed = Some(v);
        }

        config
    }

    /// Merge with another configuration (other takes precedence)
    pub fn merge(&mut self, other: EngineConfig) {
        let overrides = std::mem::take(&mut self.gesture_overrides);
        *self = EngineConfig {
            gesture_overrides: overrides,
            ..other.clone()
        };
        for (gesture, weights) in other.gesture_overrides {
            self.gesture_overrides.insert(gesture, weights);
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}
