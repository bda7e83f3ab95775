//! Contrast enhancement applied to grayscale frames before cascade detection.

use image::GrayImage;

/// Tile grid used by [`enhance_for_detection`] (8×8 tiles).
const CLAHE_TILES: u32 = 8;
/// Histogram clip as a fraction of tile pixels (≈ OpenCV clipLimit 2.0 on 8×8 tiles).
const CLAHE_CLIP: f32 = 0.03;

/// Equalize a grayscale image for detection under uneven lighting.
///
/// Returns a new image; the input is left untouched.
pub fn enhance_for_detection(gray: &GrayImage) -> GrayImage {
    let mut out = gray.clone();
    let (width, height) = out.dimensions();
    clahe(&mut out, width, height, CLAHE_TILES, CLAHE_CLIP);
    out
}

/// Contrast-Limited Adaptive Histogram Equalization, in place.
///
/// Builds a clipped histogram and CDF per tile, then maps every pixel by
/// bilinear interpolation between the four nearest tile CDFs.
fn clahe(gray: &mut GrayImage, width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let w = width as usize;
    let h = height as usize;
    let tx = tiles as usize;
    let ty = tiles as usize;
    if w == 0 || h == 0 {
        return;
    }
    let tile_w = w / tx;
    let tile_h = h / ty;
    if tile_w == 0 || tile_h == 0 {
        return;
    }
    let tile_pixels = tile_w * tile_h;
    let data: &mut [u8] = gray;

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(tx * ty);

    for row in 0..ty {
        for col in 0..tx {
            let mut hist = [0u32; 256];
            let y0 = row * tile_h;
            let x0 = col * tile_w;

            for y in y0..y0 + tile_h {
                for x in x0..x0 + tile_w {
                    hist[data[y * w + x] as usize] += 1;
                }
            }

            let clip = ((clip_limit * tile_pixels as f32) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let redist = excess / 256;
            let leftover = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += redist;
                if i < leftover {
                    *bin += 1;
                }
            }

            let mut cdf = [0f32; 256];
            cdf[0] = hist[0] as f32;
            for i in 1..256 {
                cdf[i] = cdf[i - 1] + hist[i] as f32;
            }
            let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
            let denom = (tile_pixels as f32) - cdf_min;
            if denom > 0.0 {
                for v in cdf.iter_mut() {
                    *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
                }
            }
            cdfs.push(cdf);
        }
    }

    for y in 0..h {
        for x in 0..w {
            let pixel = data[y * w + x] as usize;

            let fy = ((y as f32 / tile_h as f32) - 0.5).clamp(0.0, (ty - 1) as f32);
            let fx = ((x as f32 / tile_w as f32) - 0.5).clamp(0.0, (tx - 1) as f32);

            let r0 = fy as usize;
            let c0 = fx as usize;
            let r1 = (r0 + 1).min(ty - 1);
            let c1 = (c0 + 1).min(tx - 1);

            let dy = fy - r0 as f32;
            let dx = fx - c0 as f32;

            let top = cdfs[r0 * tx + c0][pixel] * (1.0 - dx) + cdfs[r0 * tx + c1][pixel] * dx;
            let bot = cdfs[r1 * tx + c0][pixel] * (1.0 - dx) + cdfs[r1 * tx + c1][pixel] * dx;
            let val = top * (1.0 - dy) + bot * dy;

            data[y * w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn stddev(img: &GrayImage) -> f32 {
        let n = img.len() as f32;
        let mean = img.iter().map(|&b| b as f32).sum::<f32>() / n;
        let variance = img.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
        variance.sqrt()
    }

    #[test]
    fn test_enhance_increases_contrast() {
        let img = GrayImage::from_fn(64, 64, |x, y| Luma([100 + ((x + y) % 11) as u8]));
        let out = enhance_for_detection(&img);
        assert!(
            stddev(&out) > stddev(&img),
            "CLAHE should increase contrast: orig={:.2}, new={:.2}",
            stddev(&img),
            stddev(&out)
        );
    }

    #[test]
    fn test_enhance_leaves_input_untouched() {
        let img = GrayImage::from_fn(32, 32, |x, _| Luma([x as u8 * 3]));
        let before = img.clone();
        let _ = enhance_for_detection(&img);
        assert_eq!(img, before);
    }

    #[test]
    fn test_enhance_tiny_image_is_noop() {
        let img = GrayImage::from_pixel(4, 4, Luma([77]));
        assert_eq!(enhance_for_detection(&img), img);
    }
}
