//! Face descriptors: one trait, two families.

pub mod embedding;
pub mod handcrafted;
pub mod hog;
pub mod lbp;

use crate::codec::PixelImage;
use crate::types::{BoundingBox, Descriptor, DescriptorKind};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use embedding::EmbeddingEncoder;
pub use handcrafted::HandEngineeredEncoder;

pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("face crop is degenerate ({width}x{height})")]
    DegenerateCrop { width: u32, height: u32 },
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("encoder {0} is not loaded")]
    Unavailable(DescriptorKind),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a face region into a fixed-length descriptor. Never mutates the image.
pub trait FeatureEncoder: Send + Sync {
    fn kind(&self) -> DescriptorKind;

    fn encode_one(&self, image: &PixelImage, bbox: &BoundingBox) -> Result<Descriptor, EncoderError>;

    /// Encode every box, in input order. Fails as a whole on the first error.
    fn encode(&self, image: &PixelImage, boxes: &[BoundingBox]) -> Result<Vec<Descriptor>, EncoderError> {
        boxes.iter().map(|b| self.encode_one(image, b)).collect()
    }
}

/// Configured encoders keyed by the descriptor kind they produce.
#[derive(Clone, Default)]
pub struct EncoderSet {
    encoders: BTreeMap<DescriptorKind, Arc<dyn FeatureEncoder>>,
}

impl EncoderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn FeatureEncoder>) -> Self {
        self.encoders.insert(encoder.kind(), encoder);
        self
    }

    /// Hand-engineered encoder always; the embedding encoder when its model loads.
    pub fn from_models(model_dir: &Path) -> Self {
        let mut set = Self::new().with_encoder(Arc::new(HandEngineeredEncoder::new()));
        match EmbeddingEncoder::load(&model_dir.join(ARCFACE_MODEL_FILE)) {
            Ok(enc) => set = set.with_encoder(Arc::new(enc)),
            Err(e) => tracing::warn!(error = %e, "embedding encoder unavailable"),
        }
        set
    }

    pub fn get(&self, kind: DescriptorKind) -> Result<&Arc<dyn FeatureEncoder>, EncoderError> {
        self.encoders.get(&kind).ok_or(EncoderError::Unavailable(kind))
    }

    pub fn kinds(&self) -> Vec<DescriptorKind> {
        self.encoders.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn FeatureEncoder>> {
        self.encoders.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_encode_preserves_order_and_length() {
        let img = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 90]));
        let img = PixelImage::from_rgb(img);
        let boxes = vec![
            BoundingBox::new(0, 32, 32, 0, 64, 64).unwrap(),
            BoundingBox::new(32, 64, 64, 32, 64, 64).unwrap(),
        ];
        let enc = HandEngineeredEncoder::new();
        let all = enc.encode(&img, &boxes).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1], enc.encode_one(&img, &boxes[1]).unwrap());
    }

    #[test]
    fn test_encoder_set_from_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let set = EncoderSet::from_models(dir.path());
        assert_eq!(set.kinds(), vec![DescriptorKind::HandEngineered]);
        assert!(matches!(
            set.get(DescriptorKind::Embedding),
            Err(EncoderError::Unavailable(DescriptorKind::Embedding))
        ));
    }
}
