//! Local Binary Pattern histogram.

use image::GrayImage;

pub const LBP_BINS: usize = 256;

/// Neighbour offsets, MSB first: top-left then clockwise.
const NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
];

/// Per-pixel 8-neighbour LBP codes. The one-pixel border keeps code 0.
pub fn lbp_codes(gray: &GrayImage) -> Vec<u8> {
    let (w, h) = (gray.width() as i32, gray.height() as i32);
    let data = gray.as_raw();
    let mut codes = vec![0u8; data.len()];
    if w < 3 || h < 3 {
        return codes;
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = data[(y * w + x) as usize];
            let mut code = 0u8;
            for (bit, (dx, dy)) in NEIGHBOURS.iter().enumerate() {
                if data[((y + dy) * w + x + dx) as usize] >= center {
                    code |= 1 << (7 - bit);
                }
            }
            codes[(y * w + x) as usize] = code;
        }
    }
    codes
}

/// 256-bin histogram of [`lbp_codes`], divided by `pixel_count + 1e-7`.
///
/// Border pixels are counted in bin 0.
pub fn lbp_histogram(gray: &GrayImage) -> Vec<f32> {
    let codes = lbp_codes(gray);
    let mut hist = vec![0f32; LBP_BINS];
    for &c in &codes {
        hist[c as usize] += 1.0;
    }
    let total = codes.len() as f32 + 1e-7;
    for v in hist.iter_mut() {
        *v /= total;
    }
    hist
}
