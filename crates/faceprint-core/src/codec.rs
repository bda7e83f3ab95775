//! Image decoding, channel normalization and resizing.
//!
//! Every pipeline stage consumes an owned [`PixelImage`]. Conversions return
//! new values; nothing here mutates an image another component still holds.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use thiserror::Error;

/// Default longest-side limit applied before detection.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("buffer length {actual} does not match {width}x{height}x3")]
    InvalidLength {
        width: u32,
        height: u32,
        actual: usize,
    },
}

/// Channel order of a three-channel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
    /// Source did not say; resolved heuristically by [`normalize_channels`].
    Unknown,
}

/// Owned `width × height × 3` pixel buffer with an explicit channel order.
#[derive(Debug, Clone)]
pub struct PixelImage {
    pixels: RgbImage,
    order: ChannelOrder,
}

impl PixelImage {
    /// Wrap an RGB buffer produced by the `image` crate.
    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self {
            pixels,
            order: ChannelOrder::Rgb,
        }
    }

    /// Wrap a raw interleaved buffer in the given channel order.
    pub fn from_raw(
        width: u32,
        height: u32,
        data: Vec<u8>,
        order: ChannelOrder,
    ) -> Result<Self, CodecError> {
        let actual = data.len();
        let pixels = RgbImage::from_raw(width, height, data).ok_or(CodecError::InvalidLength {
            width,
            height,
            actual,
        })?;
        Ok(Self { pixels, order })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    /// Underlying buffer. Channel order is [`Self::order`].
    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn into_rgb(self) -> RgbImage {
        self.pixels
    }

    /// Luma derivation used by the cascades and the hand-engineered encoder.
    pub fn to_gray(&self) -> GrayImage {
        imageops::grayscale(&self.pixels)
    }

    /// Copy out the region covered by `bbox`.
    pub fn crop(&self, bbox: &BoundingBox) -> PixelImage {
        let view = imageops::crop_imm(
            &self.pixels,
            bbox.left,
            bbox.top,
            bbox.width(),
            bbox.height(),
        );
        PixelImage {
            pixels: view.to_image(),
            order: self.order,
        }
    }
}

/// Decode PNG/JPEG (or any format the `image` crate knows) into RGB.
pub fn decode(bytes: &[u8]) -> Result<PixelImage, CodecError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| CodecError::InvalidImage(e.to_string()))?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(CodecError::InvalidImage("image dimensions are zero".into()));
    }
    Ok(PixelImage::from_rgb(decoded.to_rgb8()))
}

/// Bring the buffer into canonical RGB order.
///
/// When the order is `Unknown` the decision is a heuristic: faces under
/// ordinary lighting carry more red than blue, so a buffer whose third channel
/// outweighs its first is assumed to be BGR. This is not a guaranteed
/// conversion.
pub fn normalize_channels(image: PixelImage) -> PixelImage {
    let swap = match image.order {
        ChannelOrder::Rgb => false,
        ChannelOrder::Bgr => true,
        ChannelOrder::Unknown => {
            let (mut first, mut third) = (0u64, 0u64);
            for p in image.pixels.pixels() {
                first += p[0] as u64;
                third += p[2] as u64;
            }
            tracing::debug!(first, third, "channel order unknown, guessing from channel means");
            third > first
        }
    };

    let mut pixels = image.pixels;
    if swap {
        for p in pixels.pixels_mut() {
            p.0.swap(0, 2);
        }
    }
    PixelImage {
        pixels,
        order: ChannelOrder::Rgb,
    }
}

/// Downscale so the longest side equals `max_dimension`.
///
/// Images already within bounds are returned as-is.
pub fn resize_if_oversized(image: PixelImage, max_dimension: u32) -> PixelImage {
    let (width, height) = (image.width(), image.height());
    if max_dimension == 0 || (width <= max_dimension && height <= max_dimension) {
        return image;
    }

    let (new_w, new_h) = if width >= height {
        let h = (height as f64 * max_dimension as f64 / width as f64).round() as u32;
        (max_dimension, h.max(1))
    } else {
        let w = (width as f64 * max_dimension as f64 / height as f64).round() as u32;
        (w.max(1), max_dimension)
    };

    tracing::debug!(width, height, new_w, new_h, "resizing oversized image");
    let pixels = imageops::resize(&image.pixels, new_w, new_h, FilterType::Lanczos3);
    PixelImage {
        pixels,
        order: image.order,
    }
}

/// Detect the container format of `bytes` and return its usual file extension.
pub fn extension_for(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Png => Some("png"),
        image::ImageFormat::Jpeg => Some("jpg"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(img: &RgbImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let img = RgbImage::from_pixel(8, 4, Rgb([10, 20, 30]));
        let decoded = decode(&png_bytes(&img)).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
        assert_eq!(decoded.as_rgb().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(decode(b"not an image"), Err(CodecError::InvalidImage(_))));
    }

    #[test]
    fn test_decode_truncated_fails() {
        let img = RgbImage::from_pixel(32, 32, Rgb([200, 10, 10]));
        let bytes = png_bytes(&img);
        assert!(decode(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_normalize_bgr_swaps() {
        let img = PixelImage::from_raw(1, 1, vec![1, 2, 3], ChannelOrder::Bgr).unwrap();
        let out = normalize_channels(img);
        assert_eq!(out.order(), ChannelOrder::Rgb);
        assert_eq!(out.as_rgb().get_pixel(0, 0), &Rgb([3, 2, 1]));
    }

    #[test]
    fn test_normalize_unknown_heuristic() {
        // Blue-heavy buffer is assumed to be BGR skin tones.
        let img = PixelImage::from_raw(1, 1, vec![60, 90, 200], ChannelOrder::Unknown).unwrap();
        let out = normalize_channels(img);
        assert_eq!(out.as_rgb().get_pixel(0, 0), &Rgb([200, 90, 60]));

        let img = PixelImage::from_raw(1, 1, vec![200, 90, 60], ChannelOrder::Unknown).unwrap();
        let out = normalize_channels(img);
        assert_eq!(out.as_rgb().get_pixel(0, 0), &Rgb([200, 90, 60]));
    }

    #[test]
    fn test_resize_within_bounds_unchanged() {
        let img = PixelImage::from_rgb(RgbImage::from_pixel(100, 50, Rgb([1, 2, 3])));
        let out = resize_if_oversized(img, 100);
        assert_eq!((out.width(), out.height()), (100, 50));
    }

    #[test]
    fn test_resize_landscape_longest_side_exact() {
        let img = PixelImage::from_rgb(RgbImage::new(2000, 1000));
        let out = resize_if_oversized(img, 1024);
        assert_eq!((out.width(), out.height()), (1024, 512));
    }

    #[test]
    fn test_resize_portrait_longest_side_exact() {
        let img = PixelImage::from_rgb(RgbImage::new(300, 1200));
        let out = resize_if_oversized(img, 1024);
        assert_eq!((out.width(), out.height()), (256, 1024));
    }

    #[test]
    fn test_crop_copies_region() {
        let mut img = RgbImage::new(10, 10);
        img.put_pixel(3, 2, Rgb([255, 0, 0]));
        let img = PixelImage::from_rgb(img);
        let bbox = BoundingBox::new(2, 6, 5, 3, 10, 10).unwrap();
        let crop = img.crop(&bbox);
        assert_eq!((crop.width(), crop.height()), (3, 3));
        assert_eq!(crop.as_rgb().get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_from_raw_rejects_short_buffer() {
        assert!(PixelImage::from_raw(2, 2, vec![0; 5], ChannelOrder::Rgb).is_err());
    }

    #[test]
    fn test_extension_for_png() {
        let img = RgbImage::new(2, 2);
        assert_eq!(extension_for(&png_bytes(&img)), Some("png"));
        assert_eq!(extension_for(b"xx"), None);
    }
}
