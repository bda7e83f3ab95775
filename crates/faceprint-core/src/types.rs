use serde::{Deserialize, Serialize};
use std::fmt;

/// Label reported when no enrolled identity is close enough.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Label reported when classifier inference fails for a face.
pub const ERROR_LABEL: &str = "Error";

/// Face bounding box in canonical `(top, right, bottom, left)` form.
///
/// Invariant: `top < bottom` and `left < right`, with all edges inside the
/// image the box was produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl BoundingBox {
    /// Build a box from canonical edges, validating it against the image size.
    pub fn new(top: u32, right: u32, bottom: u32, left: u32, width: u32, height: u32) -> Option<Self> {
        if top < bottom && bottom <= height && left < right && right <= width {
            Some(Self { top, right, bottom, left })
        } else {
            None
        }
    }

    /// Convert a detector-native `(x, y, w, h)` rectangle, clamping it to the image.
    ///
    /// Returns `None` when nothing of the rectangle remains inside the image.
    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32, width: u32, height: u32) -> Option<Self> {
        let left = x.round().clamp(0.0, width as f32) as u32;
        let top = y.round().clamp(0.0, height as f32) as u32;
        let right = (x + w).round().clamp(0.0, width as f32) as u32;
        let bottom = (y + h).round().clamp(0.0, height as f32) as u32;
        Self::new(top, right, bottom, left, width, height)
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> u32 {
        self.width() * self.height()
    }
}

/// Which encoder family produced a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    /// Learned embedding from the external recognition model.
    Embedding,
    /// HOG + LBP descriptor computed locally.
    HandEngineered,
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorKind::Embedding => f.write_str("embedding"),
            DescriptorKind::HandEngineered => f.write_str("hand_engineered"),
        }
    }
}

impl std::str::FromStr for DescriptorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "embedding" | "hog" | "cnn" => Ok(DescriptorKind::Embedding),
            "hand_engineered" | "handengineered" | "custom_hog" | "lbp" => {
                Ok(DescriptorKind::HandEngineered)
            }
            other => Err(format!("unknown encoder kind: {other}")),
        }
    }
}

/// Fixed-length face descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub kind: DescriptorKind,
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(kind: DescriptorKind, values: Vec<f32>) -> Self {
        Self { kind, values }
    }

    /// Whether two descriptors can be compared (same kind, same length).
    pub fn is_comparable(&self, other: &Descriptor) -> bool {
        self.kind == other.kind && self.values.len() == other.values.len()
    }

    /// Euclidean distance between two descriptors.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }
}

/// Scale `values` to unit L2 norm; a zero vector stays zero.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

/// An enrolled label with its reference descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub label: String,
    pub descriptor: Descriptor,
}

/// Result of matching a probe descriptor against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Matched label, or [`UNKNOWN_LABEL`] on rejection.
    pub label: String,
    /// `1 - distance` of the nearest identity, reported even on rejection.
    pub confidence: f32,
    pub matched: bool,
}

impl MatchResult {
    pub fn unknown(confidence: f32) -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            confidence,
            matched: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_xywh_converts_to_canonical() {
        let b = BoundingBox::from_xywh(10.0, 20.0, 30.0, 40.0, 100, 100).unwrap();
        assert_eq!((b.top, b.right, b.bottom, b.left), (20, 40, 60, 10));
        assert_eq!(b.width(), 30);
        assert_eq!(b.height(), 40);
    }

    #[test]
    fn test_from_xywh_clamps_to_image() {
        let b = BoundingBox::from_xywh(-5.0, 90.0, 30.0, 40.0, 100, 100).unwrap();
        assert_eq!((b.top, b.right, b.bottom, b.left), (90, 25, 100, 0));
    }

    #[test]
    fn test_from_xywh_outside_image() {
        assert!(BoundingBox::from_xywh(120.0, 10.0, 10.0, 10.0, 100, 100).is_none());
    }

    #[test]
    fn test_new_rejects_inverted_box() {
        assert!(BoundingBox::new(50, 10, 40, 20, 100, 100).is_none());
        assert!(BoundingBox::new(0, 101, 10, 0, 100, 100).is_none());
        assert!(BoundingBox::new(0, 100, 100, 0, 100, 100).is_some());
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Descriptor::new(DescriptorKind::HandEngineered, vec![0.0, 0.0]);
        let b = Descriptor::new(DescriptorKind::HandEngineered, vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_kinds_not_comparable() {
        let a = Descriptor::new(DescriptorKind::HandEngineered, vec![1.0, 0.0]);
        let b = Descriptor::new(DescriptorKind::Embedding, vec![1.0, 0.0]);
        assert!(!a.is_comparable(&b));
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0f32; 4];
        l2_normalize(&mut v);
        assert!(v.iter().all(|&x| x == 0.0));

        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_descriptor_kind_parses_wire_names() {
        assert_eq!("custom_hog".parse::<DescriptorKind>().unwrap(), DescriptorKind::HandEngineered);
        assert_eq!("embedding".parse::<DescriptorKind>().unwrap(), DescriptorKind::Embedding);
        assert!("nope".parse::<DescriptorKind>().is_err());
    }
}
