//! Training-time augmentation: small rotations and brightness jitter.

use image::RgbImage;
use rand::rngs::StdRng;
use rand::Rng;

const MAX_ROTATION_DEG: f32 = 15.0;
const BRIGHTNESS_RANGE: (f32, f32) = (0.7, 1.3);

/// Build the 2×3 matrix `[a, -b, tx, b, a, ty]` rotating by `degrees` about `(cx, cy)`.
fn rotation_about(cx: f32, cy: f32, degrees: f32) -> [f32; 6] {
    let (b, a) = degrees.to_radians().sin_cos();
    let tx = cx - a * cx + b * cy;
    let ty = cy - b * cx - a * cy;
    [a, -b, tx, b, a, ty]
}

/// Apply a 2×3 rotation/scale warp to an RGB image, keeping its size.
///
/// Bilinear interpolation; samples outside the source are black.
fn warp_affine(src: &RgbImage, matrix: &[f32; 6]) -> RgbImage {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);
    let (w, h) = (src.width() as i32, src.height() as i32);
    let mut out = RgbImage::new(src.width(), src.height());

    // Inverse of [[a, -b], [b, a]] is [[a, b], [-b, a]] / (a² + b²).
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return out;
    }
    let ia = a / det;
    let ib = b / det;

    for (ox, oy, pixel) in out.enumerate_pixels_mut() {
        let dx = ox as f32 - tx;
        let dy = oy as f32 - ty;
        let sx = ia * dx + ib * dy;
        let sy = -ib * dx + ia * dy;

        let x0 = sx.floor() as i32;
        let y0 = sy.floor() as i32;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let sample = |x: i32, y: i32, c: usize| -> f32 {
            if x >= 0 && x < w && y >= 0 && y < h {
                src.get_pixel(x as u32, y as u32)[c] as f32
            } else {
                0.0
            }
        };

        for c in 0..3 {
            let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, c) * fx * fy;
            pixel[c] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Rotate about the image centre; uncovered corners are black.
pub fn rotate(image: &RgbImage, degrees: f32) -> RgbImage {
    let cx = (image.width() as f32 - 1.0) / 2.0;
    let cy = (image.height() as f32 - 1.0) / 2.0;
    warp_affine(image, &rotation_about(cx, cy, degrees))
}

/// Multiply every channel by `factor`, saturating at 0 and 255.
pub fn scale_brightness(image: &RgbImage, factor: f32) -> RgbImage {
    let mut out = image.clone();
    for p in out.pixels_mut() {
        for c in p.0.iter_mut() {
            *c = (*c as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// `count` randomized variants of `image`. The original is not included.
pub fn augment(image: &RgbImage, count: usize, rng: &mut StdRng) -> Vec<RgbImage> {
    (0..count)
        .map(|_| {
            let degrees = rng.gen_range(-MAX_ROTATION_DEG..=MAX_ROTATION_DEG);
            let factor = rng.gen_range(BRIGHTNESS_RANGE.0..=BRIGHTNESS_RANGE.1);
            scale_brightness(&rotate(image, degrees), factor)
        })
        .collect()
}
