//! SCRFD face detector via ONNX Runtime.
//!
//! Backs both standard strategies: `StandardFast` runs the model on a 320×320
//! letterboxed input, `StandardAccurate` on 640×640. The two share one session.

use super::{DetectorError, FaceDetector};
use crate::codec::PixelImage;
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

pub const SCRFD_FAST_INPUT_SIZE: usize = 320;
pub const SCRFD_ACCURATE_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// Detection in original image coordinates, before conversion to a [`BoundingBox`].
#[derive(Debug, Clone)]
struct Detection {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
}

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Arc<Mutex<Session>>,
    input_size: usize,
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model and run it at `input_size`.
    pub fn load(model_path: &Path, input_size: usize) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            input_size,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 6 {
            return Err(DetectorError::InvalidModel(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            input_size,
            stride_indices,
        })
    }

    /// Another detector over the same session at a different input size.
    pub fn with_input_size(&self, input_size: usize) -> Self {
        Self {
            session: Arc::clone(&self.session),
            input_size,
            stride_indices: self.stride_indices,
        }
    }

    fn run(&self, image: &PixelImage) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = preprocess(image, self.input_size);

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                self.input_size,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let mut result = nms(all_detections, SCRFD_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(result)
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&self, image: &PixelImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let detections = self.run(image)?;
        let (width, height) = (image.width(), image.height());
        Ok(detections
            .iter()
            .filter_map(|d| BoundingBox::from_xywh(d.x, d.y, d.width, d.height, width, height))
            .collect())
    }
}

/// Letterbox an RGB image into a NCHW float tensor of `size × size`.
///
/// Bilinear resize, then padding with the mean so padded pixels normalize to 0.
fn preprocess(image: &PixelImage, size: usize) -> (Array4<f32>, LetterboxInfo) {
    let width = image.width() as usize;
    let height = image.height() as usize;

    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as usize).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, size);
    let pad_x = (size - new_w) as f32 / 2.0;
    let pad_y = (size - new_h) as f32 / 2.0;

    let resized = bilinear_resize_rgb(image.as_rgb().as_raw(), width, height, new_w, new_h);

    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..size {
        for x in 0..size {
            let inside = y >= pad_y_start
                && y < pad_y_start + new_h
                && x >= pad_x_start
                && x < pad_x_start + new_w;
            for c in 0..3 {
                let pixel = if inside {
                    resized[((y - pad_y_start) * new_w + (x - pad_x_start)) * 3 + c] as f32
                } else {
                    SCRFD_MEAN
                };
                tensor[[0, c, y, x]] = (pixel - SCRFD_MEAN) / SCRFD_STD;
            }
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Bilinear resize of an interleaved RGB buffer.
fn bilinear_resize_rgb(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;
    let mut out = vec![0u8; new_w * new_h * 3];

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = src[(y0 * width + x0) * 3 + c] as f32;
                let tr = src[(y0 * width + x1) * 3 + c] as f32;
                let bl = src[(y1 * width + x0) * 3 + c] as f32;
                let br = src[(y1 * width + x1) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;
                out[(y * new_w + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

/// Discover output tensor ordering by name.
///
/// Named exports ("score_8", "bbox_16", ...) are mapped directly. Anything else
/// falls back to the standard positional ordering: scores at [0-2], bboxes at
/// [3-5] (keypoints, when present, follow and are unused).
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(indices) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [indices[0], indices[1], indices[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
            );
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Detection> {
    let grid = input_size / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * stride as f32;
        let anchor_cy = (anchor_idx / grid) as f32 * stride as f32;

        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = anchor_cx - bboxes[off] * stride as f32;
        let y1 = anchor_cy - bboxes[off + 1] * stride as f32;
        let x2 = anchor_cx + bboxes[off + 2] * stride as f32;
        let y2 = anchor_cy + bboxes[off + 3] * stride as f32;

        let orig_x1 = (x1 - letterbox.pad_x) / letterbox.scale;
        let orig_y1 = (y1 - letterbox.pad_y) / letterbox.scale;
        let orig_x2 = (x2 - letterbox.pad_x) / letterbox.scale;
        let orig_y2 = (y2 - letterbox.pad_y) / letterbox.scale;

        detections.push(Detection {
            x: orig_x1,
            y: orig_y1,
            width: orig_x2 - orig_x1,
            height: orig_y2 - orig_y1,
            confidence: score,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection-over-Union between two detections.
fn iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn make_det(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Detection {
        Detection { x, y, width: w, height: h, confidence: conf }
    }

    #[test]
    fn test_iou_identical() {
        let a = make_det(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = make_det(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_det(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_det(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_det(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_det(0.0, 0.0, 100.0, 100.0, 0.9),
            make_det(5.0, 5.0, 100.0, 100.0, 0.8),
            make_det(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let img = PixelImage::from_rgb(RgbImage::from_pixel(320, 160, Rgb([255, 0, 0])));
        let (tensor, letterbox) = preprocess(&img, SCRFD_FAST_INPUT_SIZE);
        assert_eq!(tensor.shape(), &[1, 3, 320, 320]);
        assert!((letterbox.scale - 1.0).abs() < 1e-6);
        assert!((letterbox.pad_y - 80.0).abs() < 1e-6);
        // Padding rows normalize to zero, content rows carry the red channel.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let red = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 0, 160, 160]] - red).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_coordinate_roundtrip() {
        let (width, height) = (320.0f32, 240.0f32);
        let scale = (640.0 / width).min(640.0 / height);
        let pad_x = (640.0 - (width * scale).round()) / 2.0;
        let pad_y = (640.0 - (height * scale).round()) / 2.0;
        let letterbox = LetterboxInfo { scale, pad_x, pad_y };

        let (orig_x, orig_y) = (100.0f32, 50.0f32);
        let recovered_x = (orig_x * scale + pad_x - letterbox.pad_x) / letterbox.scale;
        let recovered_y = (orig_y * scale + pad_y - letterbox.pad_y) / letterbox.scale;

        assert!((recovered_x - orig_x).abs() < 0.1, "x: {recovered_x} vs {orig_x}");
        assert!((recovered_y - orig_y).abs() < 0.1, "y: {recovered_y} vs {orig_y}");
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "bbox_8",  "bbox_16",  "bbox_32",
            "kps_8",   "kps_16",   "kps_32",
        ].iter().map(|s| s.to_string()).collect();

        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_discover_output_indices_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        assert_eq!(discover_output_indices(&names), [(2, 0), (5, 3), (8, 6)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..6).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_decode_stride_maps_through_letterbox() {
        // One anchor at grid cell (1, 1) for stride 8 on a 32×32 input.
        let grid = 32 / 8;
        let mut scores = vec![0.0f32; grid * grid * SCRFD_ANCHORS_PER_CELL];
        let idx = (grid + 1) * SCRFD_ANCHORS_PER_CELL;
        scores[idx] = 0.9;
        let mut bboxes = vec![0.0f32; scores.len() * 4];
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let letterbox = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 0.0 };
        let dets = decode_stride(&scores, &bboxes, 8, 32, &letterbox, 0.5);
        assert_eq!(dets.len(), 1);
        // Anchor centre (8, 8), ±8 in letterbox space, halved back to source.
        assert!((dets[0].x - 0.0).abs() < 1e-6);
        assert!((dets[0].width - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_bilinear_resize_uniform() {
        let src = vec![128u8; 100 * 100 * 3];
        let out = bilinear_resize_rgb(&src, 100, 100, 200, 200);
        assert!(out.iter().all(|&p| p == 128), "uniform resize should stay uniform");
    }
}
