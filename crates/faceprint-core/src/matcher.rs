//! Nearest-neighbour identity matching.

use crate::types::{Descriptor, Identity, MatchResult};

/// Compares a probe descriptor against a gallery.
pub trait Matcher: Send + Sync {
    fn compare(&self, probe: &Descriptor, gallery: &[Identity], threshold: f32) -> MatchResult;
}

/// Euclidean nearest neighbour with `confidence = 1 - distance`.
///
/// A match is accepted only when `confidence > threshold`. The best
/// confidence is reported even on rejection and may be negative. Ties keep
/// the first identity in gallery order.
#[derive(Debug, Default, Clone, Copy)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Descriptor, gallery: &[Identity], threshold: f32) -> MatchResult {
        let mut best: Option<(&Identity, f32)> = None;

        for identity in gallery {
            if !probe.is_comparable(&identity.descriptor) {
                tracing::warn!(
                    label = %identity.label,
                    probe_kind = %probe.kind,
                    gallery_kind = %identity.descriptor.kind,
                    "skipping incomparable gallery entry"
                );
                continue;
            }
            let distance = probe.euclidean_distance(&identity.descriptor);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((identity, distance));
            }
        }

        let Some((identity, distance)) = best else {
            return MatchResult::unknown(0.0);
        };

        let confidence = 1.0 - distance;
        if confidence > threshold {
            MatchResult {
                label: identity.label.clone(),
                confidence,
                matched: true,
            }
        } else {
            tracing::debug!(nearest = %identity.label, confidence, threshold, "rejected match");
            MatchResult::unknown(confidence)
        }
    }
}
