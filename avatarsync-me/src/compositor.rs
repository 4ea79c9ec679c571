//! Weight compositor: per-tick max reduction over all contributors

use avatarsync_core::BlendshapeWeights;
use std::collections::BTreeSet;

/// Merges idle, gesture and viseme contributions into one map.
///
/// The value of a key is the maximum over the contributors, never a sum, so
/// a channel shared by breathing and speech cannot double-count. Every
/// channel the compositor was seeded with is present in the output.
#[derive(Debug, Clone, Default)]
pub struct WeightCompositor {
    channels: BTreeSet<String>,
}

impl WeightCompositor {
    pub fn new(channels: BTreeSet<String>) -> Self {
        Self { channels }
    }

    pub fn compose(
        &self,
        idle: &BlendshapeWeights,
        gesture: &BlendshapeWeights,
        viseme: &BlendshapeWeights,
    ) -> BlendshapeWeights {
        let mut out: BlendshapeWeights = self.channels.iter().map(|k| (k.as_str(), 0.0)).collect();
        out.merge_max(idle);
        out.merge_max(gesture);
        out.merge_max(viseme);
        out
    }

    pub fn channels(&self) -> &BTreeSet<String> {
        &self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_not_sum() {
        let compositor = WeightCompositor::default();
        let idle = BlendshapeWeights::from_pairs([("jawOpen", 0.03)]);
        let viseme = BlendshapeWeights::from_pairs([("jawOpen", 0.7), ("mouthClose", 0.2)]);
        let out = compositor.compose(&idle, &BlendshapeWeights::new(), &viseme);
        assert_eq!(out.value("jawOpen"), 0.7);
        assert_eq!(out.value("mouthClose"), 0.2);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_seeded_channels_always_present() {
        let channels: BTreeSet<String> = ["browInnerUp", "jawOpen"].iter().map(|s| s.to_string()).collect();
        let compositor = WeightCompositor::new(channels);
        let out = compositor.compose(
            &BlendshapeWeights::new(),
            &BlendshapeWeights::from_pairs([("cheekPuff", 0.4)]),
            &BlendshapeWeights::new(),
        );
        assert_eq!(out.get("browInnerUp"), Some(0.0));
        assert_eq!(out.value("cheekPuff"), 0.4);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_compose_is_idempotent() {
        let compositor = WeightCompositor::default();
        let idle = BlendshapeWeights::from_pairs([("eyeBlinkLeft", 1.0)]);
        let gesture = BlendshapeWeights::from_pairs([("mouthSmileLeft", 0.8)]);
        let a = compositor.compose(&idle, &gesture, &BlendshapeWeights::new());
        let b = compositor.compose(&idle, &gesture, &BlendshapeWeights::new());
        assert_eq!(a, b);
    }
}
