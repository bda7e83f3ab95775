//! faceprint-core: face detection, descriptor encoding and identity matching.
//!
//! Faces are located with SCRFD (via ONNX Runtime) or local Haar/LBP
//! cascades, described either by an ArcFace embedding or a HOG+LBP
//! feature vector, and matched against a file-backed registry by
//! Euclidean distance. An optional classifier head can be trained on top
//! of a frozen MobileNetV2 backbone.

pub mod annotate;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod detector;
pub mod encoder;
pub mod enhance;
pub mod error;
pub mod matcher;
pub mod pipeline;
pub mod registry;
pub mod service;
pub mod types;

pub use classifier::{ClassifierState, FeatureBackbone, TrainingReport};
pub use config::{ServiceConfig, TrainerConfig};
pub use detector::{DetectionStrategy, FaceDetector, FaceLocator};
pub use encoder::{EncoderSet, FeatureEncoder};
pub use error::{Error, ErrorKind, Result};
pub use service::{FaceResult, FaceService, RecognizeOptions, Recognition, ServiceStatus};
pub use types::{BoundingBox, Descriptor, DescriptorKind, Identity, MatchResult, ERROR_LABEL, UNKNOWN_LABEL};
