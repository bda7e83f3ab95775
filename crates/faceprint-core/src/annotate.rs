//! Result visualization: face boxes drawn over the processed image.

use crate::types::BoundingBox;
use image::{ImageFormat, ImageResult, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::io::Cursor;

pub const ACCEPTED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const THICKNESS: u32 = 2;

/// Draw a hollow rectangle of [`THICKNESS`] pixels along the inside of `bbox`.
pub fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = image.dimensions();
    let right = bbox.right.min(w);
    let bottom = bbox.bottom.min(h);
    for inset in 0..THICKNESS {
        let (left, top) = (bbox.left + inset, bbox.top + inset);
        if left + inset >= right || top + inset >= bottom {
            break;
        }
        let rect = Rect::at(left as i32, top as i32).of_size(right - left - inset, bottom - top - inset);
        draw_hollow_rect_mut(image, rect, color);
    }
}

/// Copy of `image` with every box drawn, encoded as PNG.
///
/// `faces` pairs each box with whether it was recognized.
pub fn annotate_png(image: &RgbImage, faces: &[(BoundingBox, bool)]) -> ImageResult<Vec<u8>> {
    let mut canvas = image.clone();
    for (bbox, recognized) in faces {
        let color = if *recognized { ACCEPTED_COLOR } else { UNKNOWN_COLOR };
        draw_box(&mut canvas, bbox, color);
    }
    let mut out = Cursor::new(Vec::new());
    canvas.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
