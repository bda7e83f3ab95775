//! Sliding-window boosted cascades over a grayscale image pyramid.
//!
//! Two feature families are supported: Haar-like weighted rectangle sums
//! (variance normalized) and multi-block LBP codes looked up in a 256-bit
//! subset. Cascade definitions are JSON documents deserialized into
//! [`CascadeModel`].

use super::{DetectorError, FaceDetector};
use crate::codec::PixelImage;
use crate::enhance::enhance_for_detection;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Similarity tolerance used when grouping raw window hits.
const GROUP_EPS: f32 = 0.2;

/// Weighted rectangle inside the base detection window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

/// Haar-like feature: weighted sum of rectangle sums.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaarFeature {
    pub rects: Vec<WeightedRect>,
}

/// Multi-block LBP feature: a 3×3 grid of `block_width × block_height` cells at `(x, y)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbpFeature {
    pub x: u32,
    pub y: u32,
    pub block_width: u32,
    pub block_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureSet {
    Haar { features: Vec<HaarFeature> },
    Lbp { features: Vec<LbpFeature> },
}

impl FeatureSet {
    fn len(&self) -> usize {
        match self {
            FeatureSet::Haar { features } => features.len(),
            FeatureSet::Lbp { features } => features.len(),
        }
    }
}

/// Decision stump over one feature.
///
/// Haar stumps compare the normalized feature value with `threshold`; LBP
/// stumps test membership of the code in `subset` (eight 32-bit words).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeakClassifier {
    pub feature: usize,
    #[serde(default)]
    pub threshold: f32,
    #[serde(default)]
    pub subset: Vec<u32>,
    pub left: f32,
    pub right: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub threshold: f32,
    pub weak: Vec<WeakClassifier>,
}

/// Boosted cascade definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeModel {
    pub window_width: u32,
    pub window_height: u32,
    pub features: FeatureSet,
    pub stages: Vec<Stage>,
}

impl CascadeModel {
    /// Read a cascade definition from a JSON file.
    pub fn load(path: &Path) -> Result<Self, DetectorError> {
        if !path.exists() {
            return Err(DetectorError::ModelNotFound(path.display().to_string()));
        }
        let json = std::fs::read_to_string(path)
            .map_err(|e| DetectorError::InvalidModel(format!("{}: {e}", path.display())))?;
        let model: CascadeModel = serde_json::from_str(&json)
            .map_err(|e| DetectorError::InvalidModel(format!("{}: {e}", path.display())))?;
        model.validate()?;
        tracing::info!(
            path = %path.display(),
            window = ?(model.window_width, model.window_height),
            stages = model.stages.len(),
            features = model.features.len(),
            "loaded cascade"
        );
        Ok(model)
    }

    fn validate(&self) -> Result<(), DetectorError> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(DetectorError::InvalidModel("cascade window must be non-empty".into()));
        }
        if self.stages.is_empty() {
            return Err(DetectorError::InvalidModel("cascade has no stages".into()));
        }
        let (ww, wh) = (self.window_width, self.window_height);
        let inside = |x: u32, y: u32, w: u32, h: u32| {
            w > 0 && h > 0 && x.saturating_add(w) <= ww && y.saturating_add(h) <= wh
        };
        let all_inside = match &self.features {
            FeatureSet::Haar { features } => features
                .iter()
                .all(|f| f.rects.iter().all(|r| inside(r.x, r.y, r.width, r.height))),
            FeatureSet::Lbp { features } => features.iter().all(|f| {
                inside(
                    f.x,
                    f.y,
                    f.block_width.saturating_mul(3),
                    f.block_height.saturating_mul(3),
                )
            }),
        };
        if !all_inside {
            return Err(DetectorError::InvalidModel("feature extends outside the cascade window".into()));
        }

        let is_lbp = matches!(self.features, FeatureSet::Lbp { .. });
        for (si, stage) in self.stages.iter().enumerate() {
            for weak in &stage.weak {
                if weak.feature >= self.features.len() {
                    return Err(DetectorError::InvalidModel(format!(
                        "stage {si}: feature index {} out of range",
                        weak.feature
                    )));
                }
                if is_lbp && weak.subset.len() != 8 {
                    return Err(DetectorError::InvalidModel(format!(
                        "stage {si}: LBP subset must have 8 words, got {}",
                        weak.subset.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Scan parameters of `detectMultiScale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanParams {
    pub scale_factor: f32,
    pub min_neighbors: usize,
    pub min_size: (u32, u32),
}

impl ScanParams {
    /// Parameters of the Haar-like `CustomCascade` strategy.
    pub fn haar() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            min_size: (30, 30),
        }
    }

    /// Parameters of the `LbpCascade` strategy.
    pub fn lbp() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 4,
            min_size: (30, 30),
        }
    }
}

/// Native detector output: `(x, y, width, height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
}

/// Summed-area tables with one row/column of zero padding.
struct Integral {
    stride: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl Integral {
    fn new(gray: &GrayImage) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq_sum = vec![0u64; stride * (h + 1)];
        let data = gray.as_raw();

        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let p = data[y * w + x] as u64;
                row += p;
                row_sq += p * p;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
                sq_sum[(y + 1) * stride + x + 1] = sq_sum[y * stride + x + 1] + row_sq;
            }
        }
        Self { stride, sum, sq_sum }
    }

    #[inline]
    fn rect(&self, table: &[u64], x: usize, y: usize, w: usize, h: usize) -> u64 {
        let s = self.stride;
        table[(y + h) * s + x + w] + table[y * s + x] - table[y * s + x + w] - table[(y + h) * s + x]
    }

    #[inline]
    fn sum(&self, x: usize, y: usize, w: usize, h: usize) -> f32 {
        self.rect(&self.sum, x, y, w, h) as f32
    }
}

/// Face detector driven by a boosted cascade.
pub struct CascadeDetector {
    model: CascadeModel,
    params: ScanParams,
    enhance: bool,
}

impl CascadeDetector {
    pub fn new(model: CascadeModel, params: ScanParams) -> Result<Self, DetectorError> {
        model.validate()?;
        Ok(Self {
            model,
            params,
            enhance: false,
        })
    }

    pub fn load(path: &Path, params: ScanParams) -> Result<Self, DetectorError> {
        Self::new(CascadeModel::load(path)?, params)
    }

    /// Equalize the grayscale frame (CLAHE) before scanning.
    pub fn with_enhancement(mut self, enhance: bool) -> Self {
        self.enhance = enhance;
        self
    }

    fn detect_rects(&self, gray: &GrayImage) -> Vec<Rect> {
        let (img_w, img_h) = (gray.width() as f32, gray.height() as f32);
        let (win_w, win_h) = (self.model.window_width as f32, self.model.window_height as f32);
        let (min_w, min_h) = (self.params.min_size.0 as f32, self.params.min_size.1 as f32);
        let scale_factor = self.params.scale_factor.max(1.01);

        let mut candidates = Vec::new();
        let mut factor = 1.0f32;
        loop {
            let scaled_w = (img_w / factor).round() as u32;
            let scaled_h = (img_h / factor).round() as u32;
            if scaled_w < self.model.window_width || scaled_h < self.model.window_height {
                break;
            }
            if win_w * factor >= min_w && win_h * factor >= min_h {
                let scaled = if factor == 1.0 {
                    gray.clone()
                } else {
                    imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle)
                };
                let integral = Integral::new(&scaled);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..=(scaled_h - self.model.window_height) as usize).step_by(step) {
                    for x in (0..=(scaled_w - self.model.window_width) as usize).step_by(step) {
                        if self.evaluate(&integral, x, y) {
                            candidates.push(Rect {
                                x: (x as f32 * factor).round() as i32,
                                y: (y as f32 * factor).round() as i32,
                                width: (win_w * factor).round() as i32,
                                height: (win_h * factor).round() as i32,
                            });
                        }
                    }
                }
            }
            factor *= scale_factor;
        }

        tracing::trace!(candidates = candidates.len(), "cascade raw hits");
        group_rectangles(&candidates, self.params.min_neighbors, GROUP_EPS)
    }

    /// Run every stage on the window at `(x, y)`; `true` when all stages pass.
    fn evaluate(&self, integral: &Integral, x: usize, y: usize) -> bool {
        let (ww, wh) = (self.model.window_width as usize, self.model.window_height as usize);
        let norm = match &self.model.features {
            FeatureSet::Haar { .. } => {
                let area = (ww * wh) as f64;
                let s = integral.rect(&integral.sum, x, y, ww, wh) as f64;
                let sq = integral.rect(&integral.sq_sum, x, y, ww, wh) as f64;
                let nf = area * sq - s * s;
                if nf > 0.0 { nf.sqrt() as f32 } else { 1.0 }
            }
            FeatureSet::Lbp { .. } => 1.0,
        };

        for stage in &self.model.stages {
            let mut sum = 0.0f32;
            for weak in &stage.weak {
                let vote = match &self.model.features {
                    FeatureSet::Haar { features } => {
                        let value = haar_value(&features[weak.feature], integral, x, y);
                        value < weak.threshold * norm
                    }
                    FeatureSet::Lbp { features } => {
                        let code = lbp_code(&features[weak.feature], integral, x, y) as usize;
                        weak.subset[code >> 5] & (1u32 << (code & 31)) != 0
                    }
                };
                sum += if vote { weak.left } else { weak.right };
            }
            if sum < stage.threshold {
                return false;
            }
        }
        true
    }
}

fn haar_value(feature: &HaarFeature, integral: &Integral, x: usize, y: usize) -> f32 {
    feature
        .rects
        .iter()
        .map(|r| {
            r.weight
                * integral.sum(
                    x + r.x as usize,
                    y + r.y as usize,
                    r.width as usize,
                    r.height as usize,
                )
        })
        .sum()
}

/// Multi-block LBP code: neighbours compared with the centre block,
/// MSB at the top-left block, proceeding clockwise.
fn lbp_code(feature: &LbpFeature, integral: &Integral, x: usize, y: usize) -> u8 {
    let (bw, bh) = (feature.block_width as usize, feature.block_height as usize);
    let (fx, fy) = (x + feature.x as usize, y + feature.y as usize);
    let block = |row: usize, col: usize| integral.sum(fx + col * bw, fy + row * bh, bw, bh);

    let center = block(1, 1);
    const CLOCKWISE: [(usize, usize); 8] = [
        (0, 0),
        (0, 1),
        (0, 2),
        (1, 2),
        (2, 2),
        (2, 1),
        (2, 0),
        (1, 0),
    ];
    CLOCKWISE
        .iter()
        .enumerate()
        .fold(0u8, |code, (i, &(r, c))| {
            if block(r, c) >= center {
                code | (1 << (7 - i))
            } else {
                code
            }
        })
}

impl FaceDetector for CascadeDetector {
    fn detect(&self, image: &PixelImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let gray = image.to_gray();
        let gray = if self.enhance {
            enhance_for_detection(&gray)
        } else {
            gray
        };
        let (width, height) = (image.width(), image.height());
        Ok(self
            .detect_rects(&gray)
            .into_iter()
            .filter_map(|r| {
                BoundingBox::from_xywh(r.x as f32, r.y as f32, r.width as f32, r.height as f32, width, height)
            })
            .collect())
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        parent[rb] = ra;
    }
}

fn similar(a: &Rect, b: &Rect, eps: f32) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f32 * 0.5;
    (a.x - b.x).abs() as f32 <= delta
        && (a.y - b.y).abs() as f32 <= delta
        && (a.x + a.width - b.x - b.width).abs() as f32 <= delta
        && (a.y + a.height - b.y - b.height).abs() as f32 <= delta
}

/// Cluster similar hits, average each cluster, and keep clusters with more
/// than `min_neighbors` members that are not nested inside a stronger cluster.
fn group_rectangles(rects: &[Rect], min_neighbors: usize, eps: f32) -> Vec<Rect> {
    if rects.is_empty() {
        return Vec::new();
    }
    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                union(&mut parent, i, j);
            }
        }
    }

    // Clusters in order of first appearance.
    let mut roots: Vec<usize> = Vec::new();
    let mut sums: Vec<([i64; 4], usize)> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find(&mut parent, i);
        let idx = match roots.iter().position(|&x| x == root) {
            Some(idx) => idx,
            None => {
                roots.push(root);
                sums.push(([0; 4], 0));
                roots.len() - 1
            }
        };
        let (acc, count) = &mut sums[idx];
        acc[0] += r.x as i64;
        acc[1] += r.y as i64;
        acc[2] += r.width as i64;
        acc[3] += r.height as i64;
        *count += 1;
    }

    let averaged: Vec<(Rect, usize)> = sums
        .iter()
        .map(|(acc, count)| {
            let c = *count as f32;
            (
                Rect {
                    x: (acc[0] as f32 / c).round() as i32,
                    y: (acc[1] as f32 / c).round() as i32,
                    width: (acc[2] as f32 / c).round() as i32,
                    height: (acc[3] as f32 / c).round() as i32,
                },
                *count,
            )
        })
        .collect();

    let mut out = Vec::new();
    for (i, (r1, n1)) in averaged.iter().enumerate() {
        if *n1 <= min_neighbors {
            continue;
        }
        let nested = averaged.iter().enumerate().any(|(j, (r2, n2))| {
            if i == j || *n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f32 * eps).round() as i32;
            let dy = (r2.height as f32 * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.width <= r2.x + r2.width + dx
                && r1.y + r1.height <= r2.y + r2.height + dy
                && (*n2 > (*n1).max(3) || *n1 < 3)
        });
        if !nested {
            out.push(*r1);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    /// One-stage Haar cascade firing on "bright top half, dark bottom half".
    fn edge_cascade() -> CascadeModel {
        CascadeModel {
            window_width: 24,
            window_height: 24,
            features: FeatureSet::Haar {
                features: vec![HaarFeature {
                    rects: vec![
                        WeightedRect { x: 0, y: 0, width: 24, height: 12, weight: 1.0 },
                        WeightedRect { x: 0, y: 12, width: 24, height: 12, weight: -1.0 },
                    ],
                }],
            },
            stages: vec![Stage {
                threshold: 0.0,
                weak: vec![WeakClassifier {
                    feature: 0,
                    threshold: 0.5,
                    subset: vec![],
                    left: -1.0,
                    right: 1.0,
                }],
            }],
        }
    }

    /// One-stage multi-block LBP cascade accepting only code 0
    /// (centre block brighter than every neighbour).
    fn blob_cascade() -> CascadeModel {
        let mut subset = vec![0u32; 8];
        subset[0] = 1;
        CascadeModel {
            window_width: 24,
            window_height: 24,
            features: FeatureSet::Lbp {
                features: vec![LbpFeature { x: 0, y: 0, block_width: 8, block_height: 8 }],
            },
            stages: vec![Stage {
                threshold: 0.0,
                weak: vec![WeakClassifier {
                    feature: 0,
                    threshold: 0.0,
                    subset,
                    left: 1.0,
                    right: -1.0,
                }],
            }],
        }
    }

    fn overlaps(b: &BoundingBox, left: u32, top: u32, size: u32) -> bool {
        b.left < left + size && b.right > left && b.top < top + size && b.bottom > top
    }

    #[test]
    fn test_integral_rect_sum() {
        let gray = GrayImage::from_fn(4, 4, |x, y| Luma([(x + y * 4) as u8]));
        let integral = Integral::new(&gray);
        // Row 1, cols 1..3: 5 + 6 = 11
        assert_eq!(integral.sum(1, 1, 2, 1), 11.0);
        assert_eq!(integral.sum(0, 0, 4, 4), (0..16).sum::<u32>() as f32);
    }

    #[test]
    fn test_lbp_code_bright_centre_is_zero() {
        let gray = GrayImage::from_fn(24, 24, |x, y| {
            Luma([if (8..16).contains(&x) && (8..16).contains(&y) { 200 } else { 10 }])
        });
        let integral = Integral::new(&gray);
        let feature = LbpFeature { x: 0, y: 0, block_width: 8, block_height: 8 };
        assert_eq!(lbp_code(&feature, &integral, 0, 0), 0);

        let flat = Integral::new(&GrayImage::from_pixel(24, 24, Luma([50])));
        assert_eq!(lbp_code(&feature, &flat, 0, 0), 255);
    }

    #[test]
    fn test_haar_cascade_finds_pattern() {
        let mut img = RgbImage::from_pixel(120, 120, Rgb([100, 100, 100]));
        for y in 36..84 {
            for x in 36..84 {
                let v = if y < 60 { 220 } else { 0 };
                img.put_pixel(x, y, Rgb([v, v, v]));
            }
        }
        let detector = CascadeDetector::new(edge_cascade(), ScanParams::haar()).unwrap();
        let boxes = detector.detect(&PixelImage::from_rgb(img)).unwrap();
        assert!(!boxes.is_empty());
        for b in &boxes {
            assert!(overlaps(b, 36, 36, 48), "box {b:?} should overlap the pattern");
            assert!(b.width() >= 30 && b.height() >= 30);
        }
    }

    #[test]
    fn test_haar_cascade_blank_image_has_no_faces() {
        let img = RgbImage::from_pixel(120, 120, Rgb([90, 90, 90]));
        let detector = CascadeDetector::new(edge_cascade(), ScanParams::haar()).unwrap();
        assert!(detector.detect(&PixelImage::from_rgb(img)).unwrap().is_empty());
    }

    #[test]
    fn test_lbp_cascade_finds_blob() {
        let mut img = RgbImage::from_pixel(120, 120, Rgb([20, 20, 20]));
        for y in 48..72 {
            for x in 48..72 {
                img.put_pixel(x, y, Rgb([230, 230, 230]));
            }
        }
        let params = ScanParams { min_neighbors: 1, ..ScanParams::lbp() };
        let detector = CascadeDetector::new(blob_cascade(), params).unwrap();
        let boxes = detector.detect(&PixelImage::from_rgb(img)).unwrap();
        assert!(!boxes.is_empty());
        assert!(boxes.iter().all(|b| overlaps(b, 48, 48, 24)));
    }

    #[test]
    fn test_min_size_skips_small_windows() {
        // A 24×24 window never reaches 30×30 on a 28×28 image.
        let img = RgbImage::from_pixel(28, 28, Rgb([0, 0, 0]));
        let detector = CascadeDetector::new(edge_cascade(), ScanParams::haar()).unwrap();
        assert!(detector.detect(&PixelImage::from_rgb(img)).unwrap().is_empty());
    }

    #[test]
    fn test_group_rectangles_requires_neighbors() {
        let r = Rect { x: 10, y: 10, width: 30, height: 30 };
        let near = Rect { x: 11, y: 10, width: 30, height: 30 };
        let far = Rect { x: 200, y: 200, width: 30, height: 30 };

        let grouped = group_rectangles(&[r, near, r, far], 2, GROUP_EPS);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].y, 10);

        assert!(group_rectangles(&[r, near, far], 2, GROUP_EPS).is_empty());
    }

    #[test]
    fn test_group_rectangles_drops_nested_weak_cluster() {
        let big = Rect { x: 0, y: 0, width: 100, height: 100 };
        let small = Rect { x: 30, y: 30, width: 30, height: 30 };
        let mut rects = vec![big; 6];
        rects.extend(vec![small; 2]);
        let grouped = group_rectangles(&rects, 1, GROUP_EPS);
        assert_eq!(grouped, vec![big]);
    }

    #[test]
    fn test_validate_rejects_bad_feature_index() {
        let mut model = edge_cascade();
        model.stages[0].weak[0].feature = 3;
        assert!(CascadeDetector::new(model, ScanParams::haar()).is_err());
    }

    #[test]
    fn test_validate_rejects_short_lbp_subset() {
        let mut model = blob_cascade();
        model.stages[0].weak[0].subset = vec![1];
        assert!(matches!(
            CascadeDetector::new(model, ScanParams::lbp()),
            Err(DetectorError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_cascade_json_roundtrip_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cascade.json");
        std::fs::write(&path, serde_json::to_string(&blob_cascade()).unwrap()).unwrap();
        let model = CascadeModel::load(&path).unwrap();
        assert!(matches!(model.features, FeatureSet::Lbp { .. }));
    }
}
