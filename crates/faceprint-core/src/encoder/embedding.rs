//! ArcFace embedding encoder via ONNX Runtime.
//!
//! Produces 512-dimensional L2-normalized embeddings from face crops
//! using the w600k_r50 ArcFace model.

use super::{EncoderError, FeatureEncoder};
use crate::codec::PixelImage;
use crate::types::{l2_normalize, BoundingBox, Descriptor, DescriptorKind};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD's 128
pub const ARCFACE_EMBEDDING_DIM: usize = 512;

/// ArcFace-based embedding encoder.
pub struct EmbeddingEncoder {
    session: Mutex<Session>,
}

impl EmbeddingEncoder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, EncoderError> {
        if !model_path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Resized 112×112 RGB crop into an NCHW float tensor.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in face.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }
        tensor
    }
}

impl FeatureEncoder for EmbeddingEncoder {
    fn kind(&self) -> DescriptorKind {
        DescriptorKind::Embedding
    }

    fn encode_one(&self, image: &PixelImage, bbox: &BoundingBox) -> Result<Descriptor, EncoderError> {
        if bbox.right > image.width() || bbox.bottom > image.height() || bbox.width() < 2 || bbox.height() < 2 {
            return Err(EncoderError::DegenerateCrop {
                width: bbox.width(),
                height: bbox.height(),
            });
        }

        let crop = image.crop(bbox);
        let face = imageops::resize(crop.as_rgb(), ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle);
        let input = Self::preprocess(&face);

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw_data.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw_data.len()
            )));
        }

        let mut values = raw_data.to_vec();
        l2_normalize(&mut values);
        Ok(Descriptor::new(DescriptorKind::Embedding, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let face = RgbImage::from_pixel(ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, Rgb([128, 128, 128]));
        let tensor = EmbeddingEncoder::preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let face = RgbImage::from_pixel(ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, Rgb([255, 0, 128]));
        let tensor = EmbeddingEncoder::preprocess(&face);
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] + 1.0).abs() < 1e-6);
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 2, 5, 5]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_load_missing_model() {
        let result = EmbeddingEncoder::load(Path::new("/nonexistent/w600k_r50.onnx"));
        assert!(matches!(result, Err(EncoderError::ModelNotFound(_))));
    }
}
