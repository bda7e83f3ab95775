//! Face localization: strategy selection over pluggable detectors.

pub mod cascade;
pub mod scrfd;

use crate::codec::PixelImage;
use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use cascade::{CascadeDetector, CascadeModel, ScanParams};
pub use scrfd::ScrfdDetector;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const HAAR_CASCADE_FILE: &str = "haarcascade_frontalface.json";
pub const LBP_CASCADE_FILE: &str = "lbpcascade_frontalface.json";

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("detection strategy {0} is not loaded")]
    StrategyUnavailable(DetectionStrategy),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Closed set of face localization strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// SCRFD at the small input size.
    StandardFast,
    /// SCRFD at the large input size.
    StandardAccurate,
    /// Haar-like boosted cascade.
    CustomCascade,
    /// Multi-block LBP boosted cascade.
    LbpCascade,
}

impl DetectionStrategy {
    pub const ALL: [DetectionStrategy; 4] = [
        DetectionStrategy::StandardFast,
        DetectionStrategy::StandardAccurate,
        DetectionStrategy::CustomCascade,
        DetectionStrategy::LbpCascade,
    ];

    /// Short wire name, as accepted by `FromStr`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionStrategy::StandardFast => "hog",
            DetectionStrategy::StandardAccurate => "cnn",
            DetectionStrategy::CustomCascade => "custom_hog",
            DetectionStrategy::LbpCascade => "lbp",
        }
    }
}

impl fmt::Display for DetectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DetectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hog" | "fast" | "standard_fast" => Ok(DetectionStrategy::StandardFast),
            "cnn" | "accurate" | "standard_accurate" => Ok(DetectionStrategy::StandardAccurate),
            "custom_hog" | "haar" | "custom_cascade" => Ok(DetectionStrategy::CustomCascade),
            "lbp" | "lbp_cascade" => Ok(DetectionStrategy::LbpCascade),
            other => Err(format!("unknown detection strategy: {other}")),
        }
    }
}

/// A face detector. Zero detections is `Ok(vec![])`, never an error.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &PixelImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Boxes found by [`FaceLocator::locate_with_fallback`] and the strategy that found them.
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub boxes: Vec<BoundingBox>,
    pub strategy: DetectionStrategy,
}

/// Detectors keyed by strategy.
#[derive(Default, Clone)]
pub struct FaceLocator {
    detectors: BTreeMap<DetectionStrategy, Arc<dyn FaceDetector>>,
}

impl FaceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Self::register`].
    pub fn with_detector(mut self, strategy: DetectionStrategy, detector: Arc<dyn FaceDetector>) -> Self {
        self.register(strategy, detector);
        self
    }

    pub fn register(&mut self, strategy: DetectionStrategy, detector: Arc<dyn FaceDetector>) {
        self.detectors.insert(strategy, detector);
    }

    /// Load every detector whose model file is present in `model_dir`.
    ///
    /// A missing or broken model only disables its strategy.
    pub fn from_models(model_dir: &Path, enhance_contrast: bool) -> Self {
        let mut locator = Self::new();

        match ScrfdDetector::load(&model_dir.join(SCRFD_MODEL_FILE), scrfd::SCRFD_FAST_INPUT_SIZE) {
            Ok(fast) => {
                let accurate = fast.with_input_size(scrfd::SCRFD_ACCURATE_INPUT_SIZE);
                locator.register(DetectionStrategy::StandardFast, Arc::new(fast));
                locator.register(DetectionStrategy::StandardAccurate, Arc::new(accurate));
            }
            Err(e) => tracing::warn!(error = %e, "SCRFD detector unavailable"),
        }

        let cascades = [
            (DetectionStrategy::CustomCascade, HAAR_CASCADE_FILE, ScanParams::haar()),
            (DetectionStrategy::LbpCascade, LBP_CASCADE_FILE, ScanParams::lbp()),
        ];
        for (strategy, file, params) in cascades {
            match CascadeDetector::load(&model_dir.join(file), params) {
                Ok(det) => locator.register(strategy, Arc::new(det.with_enhancement(enhance_contrast))),
                Err(e) => tracing::warn!(%strategy, error = %e, "cascade detector unavailable"),
            }
        }

        tracing::info!(available = ?locator.available(), "face locator ready");
        locator
    }

    pub fn available(&self) -> Vec<DetectionStrategy> {
        self.detectors.keys().copied().collect()
    }

    pub fn is_available(&self, strategy: DetectionStrategy) -> bool {
        self.detectors.contains_key(&strategy)
    }

    /// Run exactly one strategy.
    pub fn locate(
        &self,
        image: &PixelImage,
        strategy: DetectionStrategy,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let detector = self
            .detectors
            .get(&strategy)
            .ok_or(DetectorError::StrategyUnavailable(strategy))?;
        let boxes = detector.detect(image)?;
        tracing::debug!(%strategy, faces = boxes.len(), "located faces");
        Ok(boxes)
    }

    /// Run `strategy`, retrying once with `StandardFast` when it finds nothing
    /// or is not loaded.
    pub fn locate_with_fallback(
        &self,
        image: &PixelImage,
        strategy: DetectionStrategy,
    ) -> Result<Located, DetectorError> {
        let fallback = DetectionStrategy::StandardFast;
        if strategy == fallback {
            return Ok(Located {
                boxes: self.locate(image, strategy)?,
                strategy,
            });
        }

        match self.locate(image, strategy) {
            Ok(boxes) if !boxes.is_empty() => return Ok(Located { boxes, strategy }),
            Ok(_) => tracing::debug!(%strategy, "no faces, falling back to {fallback}"),
            Err(DetectorError::StrategyUnavailable(_)) if self.is_available(fallback) => {
                tracing::warn!(%strategy, "strategy not loaded, falling back to {fallback}")
            }
            Err(e) => return Err(e),
        }

        if !self.is_available(fallback) {
            return Ok(Located {
                boxes: Vec::new(),
                strategy,
            });
        }
        Ok(Located {
            boxes: self.locate(image, fallback)?,
            strategy: fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    struct Fixed(Vec<BoundingBox>);

    impl FaceDetector for Fixed {
        fn detect(&self, _image: &PixelImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    fn image() -> PixelImage {
        PixelImage::from_rgb(RgbImage::new(64, 64))
    }

    fn face() -> BoundingBox {
        BoundingBox::new(10, 40, 40, 10, 64, 64).unwrap()
    }

    #[test]
    fn test_strategy_parses_wire_names() {
        assert_eq!("hog".parse::<DetectionStrategy>().unwrap(), DetectionStrategy::StandardFast);
        assert_eq!("cnn".parse::<DetectionStrategy>().unwrap(), DetectionStrategy::StandardAccurate);
        assert_eq!("custom_hog".parse::<DetectionStrategy>().unwrap(), DetectionStrategy::CustomCascade);
        assert_eq!("LBP".parse::<DetectionStrategy>().unwrap(), DetectionStrategy::LbpCascade);
        assert!("yolo".parse::<DetectionStrategy>().is_err());
        for s in DetectionStrategy::ALL {
            assert_eq!(s.to_string().parse::<DetectionStrategy>().unwrap(), s);
        }
    }

    #[test]
    fn test_locate_unavailable_strategy() {
        let locator = FaceLocator::new();
        assert!(matches!(
            locator.locate(&image(), DetectionStrategy::LbpCascade),
            Err(DetectorError::StrategyUnavailable(DetectionStrategy::LbpCascade))
        ));
    }

    #[test]
    fn test_fallback_on_empty_result() {
        let locator = FaceLocator::new()
            .with_detector(DetectionStrategy::LbpCascade, Arc::new(Fixed(vec![])))
            .with_detector(DetectionStrategy::StandardFast, Arc::new(Fixed(vec![face()])));
        let located = locator
            .locate_with_fallback(&image(), DetectionStrategy::LbpCascade)
            .unwrap();
        assert_eq!(located.strategy, DetectionStrategy::StandardFast);
        assert_eq!(located.boxes, vec![face()]);
    }

    #[test]
    fn test_no_fallback_when_strategy_finds_faces() {
        let locator = FaceLocator::new()
            .with_detector(DetectionStrategy::CustomCascade, Arc::new(Fixed(vec![face()])))
            .with_detector(DetectionStrategy::StandardFast, Arc::new(Fixed(vec![])));
        let located = locator
            .locate_with_fallback(&image(), DetectionStrategy::CustomCascade)
            .unwrap();
        assert_eq!(located.strategy, DetectionStrategy::CustomCascade);
        assert_eq!(located.boxes.len(), 1);
    }

    #[test]
    fn test_fallback_when_strategy_not_loaded() {
        let locator =
            FaceLocator::new().with_detector(DetectionStrategy::StandardFast, Arc::new(Fixed(vec![face()])));
        let located = locator
            .locate_with_fallback(&image(), DetectionStrategy::StandardAccurate)
            .unwrap();
        assert_eq!(located.strategy, DetectionStrategy::StandardFast);
    }

    #[test]
    fn test_fast_strategy_does_not_retry() {
        let locator = FaceLocator::new().with_detector(DetectionStrategy::StandardFast, Arc::new(Fixed(vec![])));
        let located = locator
            .locate_with_fallback(&image(), DetectionStrategy::StandardFast)
            .unwrap();
        assert!(located.boxes.is_empty());
        assert_eq!(located.strategy, DetectionStrategy::StandardFast);
    }

    #[test]
    fn test_empty_without_fallback_detector() {
        let locator = FaceLocator::new().with_detector(DetectionStrategy::LbpCascade, Arc::new(Fixed(vec![])));
        let located = locator
            .locate_with_fallback(&image(), DetectionStrategy::LbpCascade)
            .unwrap();
        assert!(located.boxes.is_empty());
        assert_eq!(located.strategy, DetectionStrategy::LbpCascade);
    }

    #[test]
    fn test_from_models_with_empty_dir_has_no_strategies() {
        let dir = tempfile::tempdir().unwrap();
        let locator = FaceLocator::from_models(dir.path(), true);
        assert!(locator.available().is_empty());
    }
}
