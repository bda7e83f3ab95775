//! The operations exposed to callers: enroll, recognize, list, delete,
//! train and status.

use crate::annotate::annotate_png;
use crate::classifier::backbone::BACKBONE_MODEL_FILE;
use crate::classifier::{
    Classifier, ClassifierState, ClassifierTrainer, FeatureBackbone, ModelStore, OnnxBackbone, Prediction,
    TrainingReport, TrainingSample,
};
use crate::config::ServiceConfig;
use crate::detector::{DetectionStrategy, FaceLocator};
use crate::encoder::EncoderSet;
use crate::error::{Error, Result};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::pipeline::Pipeline;
use crate::registry::{IdentityRegistry, ImageStore};
use crate::types::{BoundingBox, DescriptorKind, UNKNOWN_LABEL};
use serde::Serialize;
use std::sync::Arc;

/// Method reported for faces identified by the trained classifier.
pub const CLASSIFIER_METHOD: &str = "classifier";

/// Per-call overrides for [`FaceService::recognize`].
#[derive(Debug, Clone, Default)]
pub struct RecognizeOptions {
    pub strategy: Option<DetectionStrategy>,
    pub encoder: Option<DescriptorKind>,
    pub use_classifier: bool,
    pub annotate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceResult {
    pub bbox: BoundingBox,
    /// `None` when no decision could be made for this face, such as an
    /// untrained classifier or a failed encoding.
    pub label: Option<String>,
    pub confidence: f32,
    /// Detection strategy name, or `"classifier"`.
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FaceResult {
    pub fn is_recognized(&self) -> bool {
        self.error.is_none() && matches!(&self.label, Some(l) if l != UNKNOWN_LABEL)
    }
}

/// Outcome of one recognition call. Boxes are in processed-image coordinates.
#[derive(Debug, Clone, Serialize)]
pub struct Recognition {
    pub faces: Vec<FaceResult>,
    pub width: u32,
    pub height: u32,
    pub strategy_used: DetectionStrategy,
    /// Registry generation the faces were matched against.
    pub generation: u64,
    #[serde(skip)]
    pub annotated_png: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub version: &'static str,
    pub strategies: Vec<DetectionStrategy>,
    pub encoders: Vec<DescriptorKind>,
    pub identities: usize,
    pub generation: u64,
    /// `None` when no feature backbone is loaded.
    pub classifier: Option<ClassifierState>,
    pub classifier_artifact: Option<String>,
}

/// Face recognition service over one identity registry.
pub struct FaceService {
    config: ServiceConfig,
    pipeline: Arc<Pipeline>,
    registry: IdentityRegistry,
    matcher: Box<dyn Matcher>,
    classifier: Option<Classifier>,
}

impl FaceService {
    /// Build a service from the models found in `config.model_dir`.
    ///
    /// Missing models disable their strategy, encoder or the classifier.
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        let locator = FaceLocator::from_models(&config.model_dir, config.enhance_contrast);
        let encoders = EncoderSet::from_models(&config.model_dir);
        let backbone: Option<Arc<dyn FeatureBackbone>> =
            match OnnxBackbone::load(&config.model_dir.join(BACKBONE_MODEL_FILE)) {
                Ok(b) => Some(Arc::new(b)),
                Err(e) => {
                    tracing::warn!(error = %e, "classifier disabled");
                    None
                }
            };
        Self::new(config, locator, encoders, backbone)
    }

    pub fn new(
        config: ServiceConfig,
        locator: FaceLocator,
        encoders: EncoderSet,
        backbone: Option<Arc<dyn FeatureBackbone>>,
    ) -> Result<Self> {
        let pipeline = Arc::new(
            Pipeline::new(locator, encoders)
                .with_max_dimension(config.max_dimension)
                .with_fallback(config.fallback_enabled),
        );
        let store = ImageStore::open(&config.identity_dir)?;
        let registry = IdentityRegistry::open(store, Arc::clone(&pipeline), config.enrollment_strategy);
        let classifier = backbone.map(|backbone| {
            Classifier::open(
                backbone,
                ModelStore::new(&config.model_dir),
                ClassifierTrainer::new(config.training.clone()),
                config.classifier_threshold,
            )
        });

        tracing::info!(
            strategies = ?pipeline.locator.available(),
            encoders = ?pipeline.encoders.kinds(),
            identities = registry.snapshot().len(),
            classifier = classifier.is_some(),
            "face service ready"
        );

        Ok(Self {
            config,
            pipeline,
            registry,
            matcher: Box::new(EuclideanMatcher),
            classifier,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    /// Enroll `label` from an encoded image. Fails without persisting
    /// anything when no face is found.
    pub fn enroll(&self, label: &str, image_bytes: &[u8]) -> Result<()> {
        self.registry.add(label, image_bytes)?;
        Ok(())
    }

    pub fn recognize(&self, image_bytes: &[u8], options: &RecognizeOptions) -> Result<Recognition> {
        let image = self.pipeline.prepare(image_bytes)?;
        let strategy = options.strategy.unwrap_or(self.config.default_strategy);
        let located = self.pipeline.locate(&image, strategy)?;
        let snapshot = self.registry.snapshot();

        let faces = if located.boxes.is_empty() {
            Vec::new()
        } else if options.use_classifier {
            let classifier = self.classifier_or_train()?;
            located
                .boxes
                .iter()
                .map(|bbox| {
                    let face = image.crop(bbox).into_rgb();
                    let prediction = classifier.predict(&face);
                    let error = match &prediction {
                        Prediction::Error(e) => Some(e.clone()),
                        _ => None,
                    };
                    FaceResult {
                        bbox: *bbox,
                        label: prediction.label().map(str::to_string),
                        confidence: prediction.confidence(),
                        method: CLASSIFIER_METHOD.to_string(),
                        error,
                    }
                })
                .collect()
        } else {
            let kind = options.encoder.unwrap_or(self.config.default_encoder);
            let encoder = self.pipeline.encoders.get(kind)?;
            let gallery = snapshot.gallery(kind);
            let method = located.strategy.to_string();
            located
                .boxes
                .iter()
                .map(|bbox| match encoder.encode_one(&image, bbox) {
                    Ok(descriptor) => {
                        let result = self.matcher.compare(&descriptor, gallery, self.config.match_threshold);
                        FaceResult {
                            bbox: *bbox,
                            label: Some(result.label),
                            confidence: result.confidence,
                            method: method.clone(),
                            error: None,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, ?bbox, "face encoding failed");
                        FaceResult {
                            bbox: *bbox,
                            label: None,
                            confidence: 0.0,
                            method: method.clone(),
                            error: Some(e.to_string()),
                        }
                    }
                })
                .collect()
        };

        let annotated_png = if options.annotate {
            let boxes: Vec<(BoundingBox, bool)> = faces.iter().map(|f| (f.bbox, f.is_recognized())).collect();
            Some(annotate_png(image.as_rgb(), &boxes)?)
        } else {
            None
        };

        tracing::debug!(
            faces = faces.len(),
            strategy = %located.strategy,
            generation = snapshot.generation,
            "recognition complete"
        );
        Ok(Recognition {
            faces,
            width: image.width(),
            height: image.height(),
            strategy_used: located.strategy,
            generation: snapshot.generation,
            annotated_png,
        })
    }

    /// Labels in enrollment order.
    pub fn list_identities(&self) -> Vec<String> {
        self.registry.labels()
    }

    pub fn delete_identity(&self, label: &str) -> Result<()> {
        self.registry.remove(label)?;
        Ok(())
    }

    /// Train the classifier on face crops of every enrolled image.
    pub fn train_classifier(&self, epochs: Option<usize>, batch_size: Option<usize>) -> Result<TrainingReport> {
        let classifier = self.classifier()?;
        let samples = self.training_samples()?;
        let epochs = epochs.unwrap_or(self.config.training.epochs);
        let batch_size = batch_size.unwrap_or(self.config.training.batch_size);
        Ok(classifier.train(&samples, epochs, batch_size)?)
    }

    pub fn status(&self) -> ServiceStatus {
        let snapshot = self.registry.snapshot();
        ServiceStatus {
            version: env!("CARGO_PKG_VERSION"),
            strategies: self.pipeline.locator.available(),
            encoders: self.pipeline.encoders.kinds(),
            identities: snapshot.len(),
            generation: snapshot.generation,
            classifier: self.classifier.as_ref().map(Classifier::state),
            classifier_artifact: self
                .classifier
                .as_ref()
                .and_then(Classifier::current)
                .map(|c| c.artifact_id.clone()),
        }
    }

    fn classifier(&self) -> Result<&Classifier> {
        self.classifier
            .as_ref()
            .ok_or_else(|| Error::ClassifierUnavailable(format!("{BACKBONE_MODEL_FILE} not loaded")))
    }

    fn classifier_or_train(&self) -> Result<&Classifier> {
        let classifier = self.classifier()?;
        if self.config.train_on_demand && classifier.state() == ClassifierState::Untrained {
            tracing::info!("classifier untrained, training on demand");
            self.train_classifier(None, None)?;
        }
        Ok(classifier)
    }

    fn training_samples(&self) -> Result<Vec<TrainingSample>> {
        let mut samples = Vec::new();
        for (label, bytes) in self.registry.source_images()? {
            let image = match self.pipeline.prepare(&bytes) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(%label, error = %e, "skipping undecodable training image");
                    continue;
                }
            };
            let face = match self.pipeline.locate(&image, self.config.enrollment_strategy) {
                Ok(located) if !located.boxes.is_empty() => image.crop(&located.boxes[0]).into_rgb(),
                Ok(_) => image.into_rgb(),
                Err(e) => {
                    tracing::warn!(%label, error = %e, "detection failed, training on the full image");
                    image.into_rgb()
                }
            };
            samples.push(TrainingSample { label, face });
        }
        Ok(samples)
    }
}
