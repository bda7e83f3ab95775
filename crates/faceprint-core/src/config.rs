use crate::codec::DEFAULT_MAX_DIMENSION;
use crate::detector::DetectionStrategy;
use crate::types::DescriptorKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Classifier training hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Augmented variants generated per source image, in addition to the original.
    pub augmentations: usize,
    pub validation_split: f32,
    pub learning_rate: f32,
    pub hidden_units: usize,
    pub input_dropout: f32,
    pub hidden_dropout: f32,
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            augmentations: 10,
            validation_split: 0.2,
            learning_rate: 0.001,
            hidden_units: 512,
            input_dropout: 0.5,
            hidden_dropout: 0.3,
            seed: 42,
        }
    }
}

/// Settings of a [`crate::FaceService`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory holding one enrollment image per label.
    pub identity_dir: PathBuf,
    /// Directory with ONNX models, cascade definitions and the trained classifier.
    pub model_dir: PathBuf,
    pub max_dimension: u32,
    /// Nearest-neighbour acceptance: `confidence > match_threshold`.
    pub match_threshold: f32,
    /// Classifier acceptance: `confidence >= classifier_threshold`.
    pub classifier_threshold: f32,
    pub default_strategy: DetectionStrategy,
    pub default_encoder: DescriptorKind,
    /// Strategy used to find the face in enrollment images.
    pub enrollment_strategy: DetectionStrategy,
    pub fallback_enabled: bool,
    /// CLAHE before cascade detection.
    pub enhance_contrast: bool,
    /// Train the classifier when recognition asks for it and none exists.
    pub train_on_demand: bool,
    pub training: TrainerConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            identity_dir: PathBuf::from("known_faces"),
            model_dir: PathBuf::from("models"),
            max_dimension: DEFAULT_MAX_DIMENSION,
            match_threshold: 0.6,
            classifier_threshold: 0.6,
            default_strategy: DetectionStrategy::StandardFast,
            default_encoder: DescriptorKind::HandEngineered,
            enrollment_strategy: DetectionStrategy::StandardFast,
            fallback_enabled: true,
            enhance_contrast: true,
            train_on_demand: false,
            training: TrainerConfig::default(),
        }
    }
}
