//! Shared decode → locate → encode stages used by enrollment, recognition
//! and training.

use crate::codec::{self, CodecError, PixelImage};
use crate::detector::{DetectionStrategy, DetectorError, FaceLocator, Located};
use crate::encoder::EncoderSet;

/// Detectors and encoders plus the preprocessing limits they run under.
#[derive(Clone)]
pub struct Pipeline {
    pub locator: FaceLocator,
    pub encoders: EncoderSet,
    pub max_dimension: u32,
    pub fallback_enabled: bool,
}

impl Pipeline {
    pub fn new(locator: FaceLocator, encoders: EncoderSet) -> Self {
        Self {
            locator,
            encoders,
            max_dimension: codec::DEFAULT_MAX_DIMENSION,
            fallback_enabled: true,
        }
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    /// Decode, bring into RGB order and cap the longest side.
    pub fn prepare(&self, bytes: &[u8]) -> Result<PixelImage, CodecError> {
        let image = codec::normalize_channels(codec::decode(bytes)?);
        Ok(codec::resize_if_oversized(image, self.max_dimension))
    }

    pub fn locate(&self, image: &PixelImage, strategy: DetectionStrategy) -> Result<Located, DetectorError> {
        if self.fallback_enabled {
            self.locator.locate_with_fallback(image, strategy)
        } else {
            Ok(Located {
                boxes: self.locator.locate(image, strategy)?,
                strategy,
            })
        }
    }
}
