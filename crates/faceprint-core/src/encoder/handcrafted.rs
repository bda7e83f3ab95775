use super::hog::{hog, HOG_LEN, HOG_WINDOW};
use super::lbp::{lbp_histogram, LBP_BINS};
use super::{EncoderError, FeatureEncoder};
use crate::codec::PixelImage;
use crate::types::{l2_normalize, BoundingBox, Descriptor, DescriptorKind};
use image::imageops::{self, FilterType};

const FACE_SIZE: u32 = 128;

/// Descriptor length: HOG followed by the LBP histogram.
pub const HAND_ENGINEERED_LEN: usize = HOG_LEN + LBP_BINS;

/// HOG + LBP descriptor computed without any model file. Deterministic.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandEngineeredEncoder;

impl HandEngineeredEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl FeatureEncoder for HandEngineeredEncoder {
    fn kind(&self) -> DescriptorKind {
        DescriptorKind::HandEngineered
    }

    fn encode_one(&self, image: &PixelImage, bbox: &BoundingBox) -> Result<Descriptor, EncoderError> {
        if bbox.right > image.width() || bbox.bottom > image.height() || bbox.area() == 0 {
            return Err(EncoderError::DegenerateCrop {
                width: bbox.width(),
                height: bbox.height(),
            });
        }

        let gray = image.crop(bbox).to_gray();
        let face = imageops::resize(&gray, FACE_SIZE, FACE_SIZE, FilterType::Triangle);
        let window = imageops::resize(&face, HOG_WINDOW, HOG_WINDOW, FilterType::Triangle);

        let mut values = hog(&window);
        values.extend(lbp_histogram(&face));
        l2_normalize(&mut values);

        Ok(Descriptor::new(DescriptorKind::HandEngineered, values))
    }
}
