//! Named blendshape weight maps
//!
//! A `BlendshapeWeights` is a partial or full mapping from a morph-target name
//! (`jawOpen`, `eyeBlinkLeft`, ...) to a weight in `[0, 1]`. Every write path
//! clamps, so a map can never hold an out-of-range or non-finite value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping from blendshape name to weight in `[0, 1]`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BlendshapeWeights {
    weights: BTreeMap<String, f32>,
}

/// Clamp a raw weight into `[0, 1]`; NaN collapses to zero.
pub fn clamp_weight(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

impl BlendshapeWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from `(name, weight)` pairs, clamping each weight
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, f32)>,
    {
        let mut map = Self::new();
        for (key, value) in pairs {
            map.set(key, value);
        }
        map
    }

    /// Set a weight (clamped)
    pub fn set(&mut self, key: impl Into<String>, value: f32) {
        self.weights.insert(key.into(), clamp_weight(value));
    }

    /// Weight for `key`, if the key is present
    pub fn get(&self, key: &str) -> Option<f32> {
        self.weights.get(key).copied()
    }

    /// Weight for `key`, treating an absent key as zero
    pub fn value(&self, key: &str) -> f32 {
        self.get(key).unwrap_or(0.0)
    }

    pub fn remove(&mut self, key: &str) -> Option<f32> {
        self.weights.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.weights.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.weights.clear();
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.weights.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Raise every key of `self` to at least the value in `other`.
    ///
    /// This is a per-key maximum, never a sum: shared channels such as
    /// `jawOpen` are driven by several contributors at once.
    pub fn merge_max(&mut self, other: &BlendshapeWeights) {
        for (key, value) in other.iter() {
            let entry = self.weights.entry(key.to_string()).or_insert(0.0);
            if value > *entry {
                *entry = value;
            }
        }
    }

    /// Copy every key of `other` over `self`
    pub fn overlay(&mut self, other: &BlendshapeWeights) {
        for (key, value) in other.iter() {
            self.weights.insert(key.to_string(), value);
        }
    }

    /// True when every weight is zero (or the map is empty)
    pub fn is_silent(&self) -> bool {
        self.weights.values().all(|v| *v == 0.0)
    }
}

impl<K: Into<String>> FromIterator<(K, f32)> for BlendshapeWeights {
    fn from_iter<I: IntoIterator<Item = (K, f32)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

impl<'de> Deserialize<'de> for BlendshapeWeights {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = BTreeMap::<String, f32>::deserialize(deserializer)?;
        Ok(Self::from_pairs(raw))
    }
}
