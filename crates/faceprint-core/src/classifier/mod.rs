//! Trainable face classifier: frozen backbone, dense head, swappable artifact.
//!
//! The current artifact lives in a [`ClassifierSlot`]. Training builds a new
//! immutable [`TrainedClassifier`] off to the side, persists and verifies it,
//! and only then swaps it in. Until that point predictions keep using
//! whatever artifact was current when training started.

pub mod augment;
pub mod backbone;
pub mod head;
pub mod store;
pub mod trainer;

use crate::types::{ERROR_LABEL, UNKNOWN_LABEL};
use chrono::{DateTime, Utc};
use image::RgbImage;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

pub use backbone::{FeatureBackbone, OnnxBackbone};
pub use head::ClassifierHead;
pub use store::ModelStore;
pub use trainer::{ClassifierTrainer, TrainingReport, TrainingSample};

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("need at least 2 distinct labels to train, got {0}")]
    TooFewLabels(usize),
    #[error("a training run is already in progress")]
    AlreadyTraining,
    #[error("feature backbone unavailable: {0}")]
    BackboneUnavailable(String),
    #[error("backbone: {0}")]
    Backbone(String),
    #[error("invalid classifier artifact: {0}")]
    InvalidArtifact(String),
    #[error("storage: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A trained head with its label order. Label `i` is output `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedClassifier {
    pub artifact_id: String,
    pub labels: Vec<String>,
    pub head: ClassifierHead,
    pub trained_at: DateTime<Utc>,
    pub epochs: usize,
    pub samples: usize,
}

impl TrainedClassifier {
    pub fn validate(&self) -> Result<(), TrainingError> {
        if !self.head.is_consistent() {
            return Err(TrainingError::InvalidArtifact("head weight shapes do not chain".into()));
        }
        if self.labels.len() != self.head.num_classes() {
            return Err(TrainingError::InvalidArtifact(format!(
                "{} labels for {} outputs",
                self.labels.len(),
                self.head.num_classes()
            )));
        }
        Ok(())
    }
}

/// Outcome of [`Classifier::predict`].
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// No trained artifact.
    Unavailable,
    Identified { label: String, confidence: f32 },
    /// Best class fell below the classifier threshold.
    Unknown { confidence: f32 },
    /// Inference failed; reported as [`ERROR_LABEL`] with confidence 0.
    Error(String),
}

impl Prediction {
    pub fn label(&self) -> Option<&str> {
        match self {
            Prediction::Identified { label, .. } => Some(label.as_str()),
            Prediction::Unknown { .. } => Some(UNKNOWN_LABEL),
            Prediction::Error(_) => Some(ERROR_LABEL),
            Prediction::Unavailable => None,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            Prediction::Identified { confidence, .. } | Prediction::Unknown { confidence } => *confidence,
            Prediction::Unavailable | Prediction::Error(_) => 0.0,
        }
    }
}

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierState {
    Untrained,
    Training,
    Trained,
}

enum SlotState {
    Untrained,
    Training { previous: Option<Arc<TrainedClassifier>> },
    Trained(Arc<TrainedClassifier>),
}

/// Holder of the current artifact and the training state machine.
pub struct ClassifierSlot {
    state: RwLock<SlotState>,
}

impl ClassifierSlot {
    pub fn new(initial: Option<Arc<TrainedClassifier>>) -> Self {
        let state = match initial {
            Some(c) => SlotState::Trained(c),
            None => SlotState::Untrained,
        };
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn state(&self) -> ClassifierState {
        match &*self.state.read() {
            SlotState::Untrained => ClassifierState::Untrained,
            SlotState::Training { .. } => ClassifierState::Training,
            SlotState::Trained(_) => ClassifierState::Trained,
        }
    }

    /// The artifact predictions should use right now.
    pub fn current(&self) -> Option<Arc<TrainedClassifier>> {
        match &*self.state.read() {
            SlotState::Untrained => None,
            SlotState::Training { previous } => previous.clone(),
            SlotState::Trained(c) => Some(Arc::clone(c)),
        }
    }

    /// Enter `Training`. Dropping the guard without publishing restores the
    /// previous state.
    pub fn begin_training(&self) -> Result<TrainingGuard<'_>, TrainingError> {
        let mut state = self.state.write();
        let previous = match &*state {
            SlotState::Training { .. } => return Err(TrainingError::AlreadyTraining),
            SlotState::Untrained => None,
            SlotState::Trained(c) => Some(Arc::clone(c)),
        };
        *state = SlotState::Training {
            previous: previous.clone(),
        };
        Ok(TrainingGuard {
            slot: self,
            previous,
            published: false,
        })
    }
}

/// Exclusive right to replace the artifact in a [`ClassifierSlot`].
pub struct TrainingGuard<'a> {
    slot: &'a ClassifierSlot,
    previous: Option<Arc<TrainedClassifier>>,
    published: bool,
}

impl TrainingGuard<'_> {
    pub fn publish(mut self, classifier: Arc<TrainedClassifier>) {
        *self.slot.state.write() = SlotState::Trained(classifier);
        self.published = true;
    }
}

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        *self.slot.state.write() = match self.previous.take() {
            Some(c) => SlotState::Trained(c),
            None => SlotState::Untrained,
        };
    }
}

/// Backbone, trainer, artifact store and slot wired together.
pub struct Classifier {
    backbone: Arc<dyn FeatureBackbone>,
    trainer: ClassifierTrainer,
    store: ModelStore,
    slot: ClassifierSlot,
    threshold: f32,
}

impl Classifier {
    /// Load a previously persisted artifact if there is a valid one.
    pub fn open(
        backbone: Arc<dyn FeatureBackbone>,
        store: ModelStore,
        trainer: ClassifierTrainer,
        threshold: f32,
    ) -> Self {
        let initial = match store.load() {
            Ok(Some(c)) => {
                tracing::info!(artifact = %c.artifact_id, classes = c.labels.len(), "loaded classifier");
                Some(Arc::new(c))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring persisted classifier");
                None
            }
        };
        Self {
            backbone,
            trainer,
            store,
            slot: ClassifierSlot::new(initial),
            threshold,
        }
    }

    pub fn state(&self) -> ClassifierState {
        self.slot.state()
    }

    pub fn current(&self) -> Option<Arc<TrainedClassifier>> {
        self.slot.current()
    }

    /// Train, persist and publish a new artifact.
    ///
    /// Any failure leaves the previous artifact both current and on disk.
    pub fn train(
        &self,
        samples: &[TrainingSample],
        epochs: usize,
        batch_size: usize,
    ) -> Result<TrainingReport, TrainingError> {
        let distinct: BTreeSet<&str> = samples.iter().map(|s| s.label.as_str()).collect();
        if distinct.len() < 2 {
            return Err(TrainingError::TooFewLabels(distinct.len()));
        }

        let guard = self.slot.begin_training()?;
        let (trained, report) = self.trainer.train(self.backbone.as_ref(), samples, epochs, batch_size)?;
        self.store.save(&trained)?;
        guard.publish(Arc::new(trained));
        tracing::info!(artifact = %report.artifact_id, "classifier published");
        Ok(report)
    }

    pub fn predict(&self, face: &RgbImage) -> Prediction {
        let Some(current) = self.slot.current() else {
            return Prediction::Unavailable;
        };
        let features = match self.backbone.features(face) {
            Ok(f) => f,
            Err(e) => return Prediction::Error(e.to_string()),
        };
        if features.len() != current.head.input_dim() {
            return Prediction::Error(format!(
                "feature length {} does not match head input {}",
                features.len(),
                current.head.input_dim()
            ));
        }

        let probs = current.head.predict(&features);
        let Some((index, &confidence)) = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
        else {
            return Prediction::Error("classifier produced no outputs".into());
        };
        let Some(label) = current.labels.get(index) else {
            return Prediction::Error(format!("no label for class {index}"));
        };

        if confidence >= self.threshold {
            Prediction::Identified {
                label: label.clone(),
                confidence,
            }
        } else {
            Prediction::Unknown { confidence }
        }
    }
}
