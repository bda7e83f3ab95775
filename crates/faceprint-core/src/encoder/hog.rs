//! Histogram of Oriented Gradients (Dalal–Triggs layout).

use image::GrayImage;

pub const HOG_WINDOW: u32 = 64;
const CELL: usize = 8;
const BLOCK_CELLS: usize = 2;
const BINS: usize = 9;
const L2_HYS_CLIP: f32 = 0.2;
const EPS: f32 = 1e-5;

/// Descriptor length for a 64×64 window: 7×7 blocks × 2×2 cells × 9 bins.
pub const HOG_LEN: usize = {
    let cells = HOG_WINDOW as usize / CELL;
    let blocks = cells - BLOCK_CELLS + 1;
    blocks * blocks * BLOCK_CELLS * BLOCK_CELLS * BINS
};

/// HOG over a grayscale window. `gray` must be `HOG_WINDOW` square.
///
/// Centered `[-1, 0, 1]` gradients (zero at the border), unsigned
/// orientation split bilinearly between the two nearest of 9 bins,
/// 16×16 blocks at an 8-pixel stride, L2-Hys normalized.
pub fn hog(gray: &GrayImage) -> Vec<f32> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let cells_x = w / CELL;
    let cells_y = h / CELL;
    let px = |x: usize, y: usize| gray.as_raw()[y * w + x] as f32;

    let mut cells = vec![[0f32; BINS]; cells_x * cells_y];
    let bin_width = 180.0 / BINS as f32;

    for y in 0..cells_y * CELL {
        for x in 0..cells_x * CELL {
            let gx = if x > 0 && x + 1 < w { px(x + 1, y) - px(x - 1, y) } else { 0.0 };
            let gy = if y > 0 && y + 1 < h { px(x, y + 1) - px(x, y - 1) } else { 0.0 };
            let magnitude = (gx * gx + gy * gy).sqrt();
            if magnitude == 0.0 {
                continue;
            }
            let mut angle = gy.atan2(gx).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }
            if angle >= 180.0 {
                angle -= 180.0;
            }

            let pos = angle / bin_width - 0.5;
            let lower = pos.floor();
            let frac = pos - lower;
            let b0 = (lower as i32).rem_euclid(BINS as i32) as usize;
            let b1 = (b0 + 1) % BINS;

            let cell = &mut cells[(y / CELL) * cells_x + x / CELL];
            cell[b0] += magnitude * (1.0 - frac);
            cell[b1] += magnitude * frac;
        }
    }

    let blocks_x = cells_x + 1 - BLOCK_CELLS;
    let blocks_y = cells_y + 1 - BLOCK_CELLS;
    let mut out = Vec::with_capacity(blocks_x * blocks_y * BLOCK_CELLS * BLOCK_CELLS * BINS);
    let mut block = Vec::with_capacity(BLOCK_CELLS * BLOCK_CELLS * BINS);

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            block.clear();
            for cy in by..by + BLOCK_CELLS {
                for cx in bx..bx + BLOCK_CELLS {
                    block.extend_from_slice(&cells[cy * cells_x + cx]);
                }
            }
            l2_hys(&mut block);
            out.extend_from_slice(&block);
        }
    }
    out
}

fn l2_hys(block: &mut [f32]) {
    let norm = (block.iter().map(|v| v * v).sum::<f32>() + EPS * EPS).sqrt();
    for v in block.iter_mut() {
        *v = (*v / norm).min(L2_HYS_CLIP);
    }
    let norm = (block.iter().map(|v| v * v).sum::<f32>() + EPS * EPS).sqrt();
    for v in block.iter_mut() {
        *v /= norm;
    }
}
