use crate::classifier::TrainingError;
use crate::codec::CodecError;
use crate::detector::DetectorError;
use crate::encoder::EncoderError;
use crate::registry::RegistryError;
use std::fmt;
use thiserror::Error;

/// Coarse error category shared by every operation of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidImage,
    NoFaceDetected,
    EncodingError,
    NotFound,
    TrainingError,
    InferenceUnavailable,
    /// A loaded detector failed while running.
    DetectionFailed,
    InvalidLabel,
    Storage,
    Unavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidImage => "invalid_image",
            ErrorKind::NoFaceDetected => "no_face_detected",
            ErrorKind::EncodingError => "encoding_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TrainingError => "training_error",
            ErrorKind::InferenceUnavailable => "inference_unavailable",
            ErrorKind::DetectionFailed => "detection_failed",
            ErrorKind::InvalidLabel => "invalid_label",
            ErrorKind::Storage => "storage",
            ErrorKind::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Training(#[from] TrainingError),
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),
    #[error("storage: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Codec(_) => ErrorKind::InvalidImage,
            Error::Detector(e) => detector_kind(e),
            Error::Encoder(EncoderError::Unavailable(_)) => ErrorKind::Unavailable,
            Error::Encoder(_) => ErrorKind::EncodingError,
            Error::Registry(e) => match e {
                RegistryError::InvalidLabel(_) => ErrorKind::InvalidLabel,
                RegistryError::NotFound(_) => ErrorKind::NotFound,
                RegistryError::NoFaceDetected => ErrorKind::NoFaceDetected,
                RegistryError::Codec(_) => ErrorKind::InvalidImage,
                RegistryError::Detector(e) => detector_kind(e),
                RegistryError::Encoder(_) => ErrorKind::EncodingError,
                RegistryError::Io(_) | RegistryError::Index(_) | RegistryError::Image(_) => ErrorKind::Storage,
            },
            Error::Training(TrainingError::BackboneUnavailable(_)) => ErrorKind::InferenceUnavailable,
            Error::Training(_) => ErrorKind::TrainingError,
            Error::ClassifierUnavailable(_) => ErrorKind::InferenceUnavailable,
            Error::Io(_) | Error::Image(_) => ErrorKind::Storage,
        }
    }
}

fn detector_kind(err: &DetectorError) -> ErrorKind {
    match err {
        DetectorError::StrategyUnavailable(_) => ErrorKind::Unavailable,
        DetectorError::ModelNotFound(_) | DetectorError::InvalidModel(_) => ErrorKind::InferenceUnavailable,
        DetectorError::InferenceFailed(_) | DetectorError::Ort(_) => ErrorKind::DetectionFailed,
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
