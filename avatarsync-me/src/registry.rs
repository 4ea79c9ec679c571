//! Blendshape registry: static target weight vectors for gestures and visemes

use crate::error::AvatarError;
use avatarsync_core::BlendshapeWeights;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

pub const EYE_BLINK_LEFT: &str = "eyeBlinkLeft";
pub const EYE_BLINK_RIGHT: &str = "eyeBlinkRight";
pub const JAW_OPEN: &str = "jawOpen";

/// Channels the idle loop drives
pub const IDLE_CHANNELS: [&str; 3] = [EYE_BLINK_LEFT, EYE_BLINK_RIGHT, JAW_OPEN];

/// Gesture kinds understood by the sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum GestureKind {
    Smile,
    Nod,
    Think,
    Point,
    Excited,
    Calm,
    Wave,
    Emphasize,
    /// No gesture; maps to an empty weight vector
    Idle,
}

impl GestureKind {
    pub const ALL: [GestureKind; 9] = [
        GestureKind::Smile,
        GestureKind::Nod,
        GestureKind::Think,
        GestureKind::Point,
        GestureKind::Excited,
        GestureKind::Calm,
        GestureKind::Wave,
        GestureKind::Emphasize,
        GestureKind::Idle,
    ];

    /// Parse a gesture name; unknown names fall back to `Idle`
    pub fn parse(name: &str) -> Self {
        Self::lookup(name).unwrap_or_else(|| {
            warn!("Unknown gesture kind '{}', falling back to idle", name);
            GestureKind::Idle
        })
    }

    /// Exact lookup without the idle fallback
    pub fn lookup(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "smile" => Some(GestureKind::Smile),
            "nod" => Some(GestureKind::Nod),
            "think" => Some(GestureKind::Think),
            "point" => Some(GestureKind::Point),
            "excited" => Some(GestureKind::Excited),
            "calm" => Some(GestureKind::Calm),
            "wave" => Some(GestureKind::Wave),
            "emphasize" => Some(GestureKind::Emphasize),
            "idle" => Some(GestureKind::Idle),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GestureKind::Smile => "smile",
            GestureKind::Nod => "nod",
            GestureKind::Think => "think",
            GestureKind::Point => "point",
            GestureKind::Excited => "excited",
            GestureKind::Calm => "calm",
            GestureKind::Wave => "wave",
            GestureKind::Emphasize => "emphasize",
            GestureKind::Idle => "idle",
        }
    }
}

impl From<String> for GestureKind {
    fn from(name: String) -> Self {
        GestureKind::parse(&name)
    }
}

impl std::fmt::Display for GestureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn builtin_gesture(kind: GestureKind) -> &'static [(&'static str, f32)] {
    match kind {
        GestureKind::Smile => &[
            ("mouthSmileLeft", 0.8),
            ("mouthSmileRight", 0.8),
            ("cheekSquintLeft", 0.3),
            ("cheekSquintRight", 0.3),
        ],
        GestureKind::Nod => &[("headNod", 0.6), ("browInnerUp", 0.1)],
        GestureKind::Think => &[
            ("browDownLeft", 0.4),
            ("browDownRight", 0.4),
            ("eyeLookUpLeft", 0.5),
            ("eyeLookUpRight", 0.5),
            ("mouthPressLeft", 0.3),
        ],
        GestureKind::Point => &[("armPointRight", 1.0), ("browInnerUp", 0.2)],
        GestureKind::Excited => &[
            ("mouthSmileLeft", 1.0),
            ("mouthSmileRight", 1.0),
            ("browOuterUpLeft", 0.6),
            ("browOuterUpRight", 0.6),
            ("eyeWideLeft", 0.4),
            ("eyeWideRight", 0.4),
        ],
        GestureKind::Calm => &[
            ("mouthSmileLeft", 0.3),
            ("mouthSmileRight", 0.3),
            ("eyeSquintLeft", 0.2),
            ("eyeSquintRight", 0.2),
        ],
        GestureKind::Wave => &[("armWaveRight", 1.0), ("mouthSmileLeft", 0.4), ("mouthSmileRight", 0.4)],
        GestureKind::Emphasize => &[
            ("browInnerUp", 0.7),
            ("browOuterUpLeft", 0.5),
            ("browOuterUpRight", 0.5),
            ("headNod", 0.3),
        ],
        GestureKind::Idle => &[],
    }
}

// Viseme ids follow the 22-class phoneme grouping emitted by common TTS
// backends (0 = silence ... 21 = p/b/m).
fn builtin_viseme(id: u32) -> Option<&'static [(&'static str, f32)]> {
    let shape: &'static [(&'static str, f32)] = match id {
        0 => &[],
        1 => &[(JAW_OPEN, 0.45), ("mouthStretchLeft", 0.2), ("mouthStretchRight", 0.2)],
        2 => &[(JAW_OPEN, 0.7)],
        3 => &[(JAW_OPEN, 0.55), ("mouthFunnel", 0.4)],
        4 => &[(JAW_OPEN, 0.35), ("mouthStretchLeft", 0.3), ("mouthStretchRight", 0.3)],
        5 => &[(JAW_OPEN, 0.3), ("mouthFunnel", 0.3), ("mouthRollUpper", 0.2)],
        6 => &[(JAW_OPEN, 0.2), ("mouthSmileLeft", 0.3), ("mouthSmileRight", 0.3)],
        7 => &[(JAW_OPEN, 0.15), ("mouthPucker", 0.8)],
        8 => &[(JAW_OPEN, 0.4), ("mouthFunnel", 0.7)],
        9 => &[(JAW_OPEN, 0.6), ("mouthFunnel", 0.3)],
        10 => &[(JAW_OPEN, 0.45), ("mouthPucker", 0.4)],
        11 => &[(JAW_OPEN, 0.6), ("mouthStretchLeft", 0.25), ("mouthStretchRight", 0.25)],
        12 => &[(JAW_OPEN, 0.3)],
        13 => &[(JAW_OPEN, 0.25), ("mouthPucker", 0.35)],
        14 => &[(JAW_OPEN, 0.3), ("tongueOut", 0.2)],
        15 => &[(JAW_OPEN, 0.1), ("mouthStretchLeft", 0.4), ("mouthStretchRight", 0.4)],
        16 => &[(JAW_OPEN, 0.15), ("mouthFunnel", 0.5), ("mouthPucker", 0.3)],
        17 => &[(JAW_OPEN, 0.15), ("tongueOut", 0.4)],
        18 => &[("mouthRollLower", 0.6), ("mouthUpperUpLeft", 0.2), ("mouthUpperUpRight", 0.2)],
        19 => &[(JAW_OPEN, 0.2), ("mouthShrugUpper", 0.2)],
        20 => &[(JAW_OPEN, 0.3), ("mouthShrugLower", 0.2)],
        21 => &[("mouthClose", 0.8), ("mouthPressLeft", 0.3), ("mouthPressRight", 0.3)],
        _ => return None,
    };
    Some(shape)
}

/// Static mapping from gestures and visemes to target weight vectors
#[derive(Debug, Clone)]
pub struct BlendshapeRegistry {
    gestures: HashMap<GestureKind, BlendshapeWeights>,
    visemes: HashMap<u32, BlendshapeWeights>,
    empty: BlendshapeWeights,
}

impl Default for BlendshapeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlendshapeRegistry {
    /// Registry with the built-in gesture and viseme tables
    pub fn new() -> Self {
        let gestures = GestureKind::ALL
            .iter()
            .map(|kind| (*kind, builtin_gesture(*kind).iter().copied().collect::<BlendshapeWeights>()))
            .collect();

        let visemes = (0u32..)
            .map_while(|id| {
                builtin_viseme(id).map(|shape| (id, shape.iter().copied().collect::<BlendshapeWeights>()))
            })
            .collect();

        Self {
            gestures,
            visemes,
            empty: BlendshapeWeights::new(),
        }
    }

    /// Built-in registry with gesture vectors replaced from configuration
    pub fn with_overrides(
        overrides: &HashMap<String, HashMap<String, f32>>,
    ) -> Result<Self, AvatarError> {
        let mut registry = Self::new();
        for (name, weights) in overrides {
            let kind = GestureKind::lookup(name).ok_or_else(|| {
                AvatarError::Config(format!("Override for unknown gesture '{}'", name))
            })?;
            if kind == GestureKind::Idle && !weights.is_empty() {
                return Err(AvatarError::Config("The idle gesture cannot carry weights".to_string()));
            }
            let vector = weights.iter().map(|(k, v)| (k.clone(), *v)).collect();
            registry.gestures.insert(kind, vector);
        }
        Ok(registry)
    }

    /// Target vector for a gesture (`Idle` is always empty)
    pub fn gesture(&self, kind: GestureKind) -> &BlendshapeWeights {
        self.gestures.get(&kind).unwrap_or(&self.empty)
    }

    /// Target vector for a viseme id, `None` if the id is unknown
    pub fn viseme(&self, id: u32) -> Option<&BlendshapeWeights> {
        self.visemes.get(&id)
    }

    pub fn viseme_count(&self) -> usize {
        self.visemes.len()
    }

    /// Every blendshape name any contributor can drive
    pub fn channels(&self) -> BTreeSet<String> {
        let mut channels: BTreeSet<String> = IDLE_CHANNELS.iter().map(|c| c.to_string()).collect();
        for weights in self.gestures.values().chain(self.visemes.values()) {
            channels.extend(weights.keys().map(str::to_string));
        }
        channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_gesture_is_empty() {
        let registry = BlendshapeRegistry::new();
        assert!(registry.gesture(GestureKind::Idle).is_empty());
        assert!(!registry.gesture(GestureKind::Smile).is_empty());
    }

    #[test]
    fn test_unknown_gesture_falls_back_to_idle() {
        assert_eq!(GestureKind::parse("moonwalk"), GestureKind::Idle);
        assert_eq!(GestureKind::parse(" Wave "), GestureKind::Wave);
        let kind: GestureKind = serde_json::from_str("\"backflip\"").unwrap();
        assert_eq!(kind, GestureKind::Idle);
    }

    #[test]
    fn test_viseme_table_covers_all_classes() {
        let registry = BlendshapeRegistry::new();
        assert_eq!(registry.viseme_count(), 22);
        assert!(registry.viseme(0).unwrap().is_empty());
        assert!(registry.viseme(22).is_none());
    }

    #[test]
    fn test_channels_include_idle_and_targets() {
        let channels = BlendshapeRegistry::new().channels();
        assert!(channels.contains(EYE_BLINK_LEFT));
        assert!(channels.contains("mouthSmileLeft"));
        assert!(channels.contains("mouthPucker"));
    }

    #[test]
    fn test_overrides_replace_vector() {
        let overrides = HashMap::from([(
            "smile".to_string(),
            HashMap::from([("mouthSmileLeft".to_string(), 0.4)]),
        )]);
        let registry = BlendshapeRegistry::with_overrides(&overrides).unwrap();
        let smile = registry.gesture(GestureKind::Smile);
        assert_eq!(smile.len(), 1);
        assert_eq!(smile.value("mouthSmileLeft"), 0.4);
    }

    #[test]
    fn test_override_for_unknown_gesture_rejected() {
        let overrides = HashMap::from([("shrug".to_string(), HashMap::new())]);
        assert!(BlendshapeRegistry::with_overrides(&overrides).is_err());
    }
}
