//! Frozen feature extractor feeding the trainable head.

use super::TrainingError;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array1, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;

pub const BACKBONE_MODEL_FILE: &str = "mobilenet_v2_backbone.onnx";
pub const BACKBONE_INPUT_SIZE: u32 = 224;

/// Pretrained network whose weights never change during training.
///
/// Returns the globally average-pooled feature vector of a face crop.
pub trait FeatureBackbone: Send + Sync {
    fn features(&self, face: &RgbImage) -> Result<Array1<f32>, TrainingError>;
}

/// MobileNetV2-style backbone (no classification top) through ONNX Runtime.
pub struct OnnxBackbone {
    session: Mutex<Session>,
}

impl OnnxBackbone {
    pub fn load(model_path: &Path) -> Result<Self, TrainingError> {
        if !model_path.exists() {
            return Err(TrainingError::BackboneUnavailable(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded feature backbone"
        );
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// 224×224 NCHW tensor scaled to `[-1, 1]`.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = BACKBONE_INPUT_SIZE as usize;
        let resized = imageops::resize(face, BACKBONE_INPUT_SIZE, BACKBONE_INPUT_SIZE, FilterType::Triangle);
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, p) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = p[c] as f32 / 127.5 - 1.0;
            }
        }
        tensor
    }
}

impl FeatureBackbone for OnnxBackbone {
    fn features(&self, face: &RgbImage) -> Result<Array1<f32>, TrainingError> {
        let input = Self::preprocess(face);
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        global_average_pool(&dims, data)
    }
}

/// Pool a `[1, C, H, W]` map to `C` values; `[1, C]` outputs pass through.
pub fn global_average_pool(dims: &[usize], data: &[f32]) -> Result<Array1<f32>, TrainingError> {
    match dims {
        [1, c] if data.len() >= *c => Ok(Array1::from(data[..*c].to_vec())),
        [1, c, h, w] if h * w > 0 && data.len() >= c * h * w => {
            let plane = h * w;
            Ok((0..*c)
                .map(|ch| data[ch * plane..(ch + 1) * plane].iter().sum::<f32>() / plane as f32)
                .collect())
        }
        other => Err(TrainingError::Backbone(format!("unexpected feature map shape {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_range() {
        let face = RgbImage::from_fn(10, 10, |x, _| if x < 5 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) });
        let t = OnnxBackbone::preprocess(&face);
        assert_eq!(t.shape(), &[1, 3, 224, 224]);
        assert!((t[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((t[[0, 2, 100, 223]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_global_average_pool_nchw() {
        // Two channels of a 2×2 map.
        let data = [1.0, 2.0, 3.0, 4.0, 10.0, 10.0, 10.0, 10.0];
        let pooled = global_average_pool(&[1, 2, 2, 2], &data).unwrap();
        assert_eq!(pooled.to_vec(), vec![2.5, 10.0]);
    }

    #[test]
    fn test_global_average_pool_passthrough_and_errors() {
        assert_eq!(global_average_pool(&[1, 3], &[1.0, 2.0, 3.0]).unwrap().len(), 3);
        assert!(global_average_pool(&[2, 3, 4], &[0.0; 24]).is_err());
    }

    #[test]
    fn test_load_missing_model() {
        assert!(matches!(
            OnnxBackbone::load(Path::new("/nonexistent/backbone.onnx")),
            Err(TrainingError::BackboneUnavailable(_))
        ));
    }
}
