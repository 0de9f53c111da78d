//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three stride levels with NMS post-processing.
//! Input frames are packed RGB8 at any resolution; detections come back in
//! the coordinates of the frame that was passed in.

use crate::types::{FaceDetector, FaceRegion, InferenceError};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

/// Scale and padding applied by the letterbox resize, kept to map
/// detections back to source coordinates.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideSlots = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32], discovered by
    /// name at load time with a positional fallback.
    stride_slots: [StrideSlots; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, InferenceError> {
        if !Path::new(model_path).exists() {
            return Err(InferenceError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(InferenceError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides x score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_slots = map_output_slots(&output_names);
        tracing::debug!(?stride_slots, "SCRFD output tensor mapping");

        Ok(Self { session, stride_slots })
    }
}

impl FaceDetector for ScrfdDetector {
    /// Detect faces in an RGB frame, returning regions sorted by confidence.
    fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceRegion>, InferenceError> {
        let expected = (width * height * 3) as usize;
        if rgb.len() < expected {
            return Err(InferenceError::InferenceFailed(format!(
                "frame buffer too short: expected {expected}, got {}",
                rgb.len()
            )));
        }

        let (input, letterbox) = preprocess(rgb, width as usize, height as usize);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_slots[pos];

            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                InferenceError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                InferenceError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;
            let (_, kps) = outputs[kps_idx].try_extract_tensor::<f32>().map_err(|e| {
                InferenceError::InferenceFailed(format!("kps stride {stride}: {e}"))
            })?;

            decode_stride(scores, bboxes, kps, stride, &letterbox, &mut candidates);
        }

        let mut result = nms(candidates, NMS_IOU_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(result)
    }
}

/// Letterbox-resize an RGB frame into a normalized NCHW tensor.
///
/// The frame is scaled to fit within the model input square and centered;
/// padding holds the mean value so it normalizes to 0.0. Bilinear sampling
/// keeps edges usable at the small scales the pipeline feeds in.
fn preprocess(rgb: &[u8], width: usize, height: usize) -> (Array4<f32>, Letterbox) {
    let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
    let new_w = (width as f32 * scale).round() as usize;
    let new_h = (height as f32 * scale).round() as usize;
    let pad_x = (INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (INPUT_SIZE - new_h) as f32 / 2.0;
    let x_off = pad_x.floor() as usize;
    let y_off = pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::from_elem((1, 3, INPUT_SIZE, INPUT_SIZE), 0.0);

    let inv_scale = 1.0 / scale;
    for ty in 0..INPUT_SIZE {
        for tx in 0..INPUT_SIZE {
            let inside =
                ty >= y_off && ty < y_off + new_h && tx >= x_off && tx < x_off + new_w;

            if !inside {
                // PIXEL_MEAN normalizes to exactly 0.0, already the fill value.
                continue;
            }

            let src_x = ((tx - x_off) as f32 + 0.5) * inv_scale - 0.5;
            let src_y = ((ty - y_off) as f32 + 0.5) * inv_scale - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let y1 = (y0 + 1).min(height - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = rgb[(y0 * width + x0) * 3 + c] as f32;
                let tr = rgb[(y0 * width + x1) * 3 + c] as f32;
                let bl = rgb[(y1 * width + x0) * 3 + c] as f32;
                let br = rgb[(y1 * width + x1) * 3 + c] as f32;
                let top = tl * (1.0 - fx) + tr * fx;
                let bot = bl * (1.0 - fx) + br * fx;
                let pixel = top * (1.0 - fy) + bot * fy;

                tensor[[0, c, ty, tx]] = (pixel - PIXEL_MEAN) / PIXEL_STD;
            }
        }
    }

    (tensor, Letterbox { scale, pad_x, pad_y })
}

/// Map output tensors to stride slots by name ("score_8", "bbox_16", ...),
/// falling back to the standard positional export order
/// [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
fn map_output_slots(names: &[String]) -> [StrideSlots; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named = STRIDES.iter().all(|&stride| {
        find("score", stride).is_some()
            && find("bbox", stride).is_some()
            && find("kps", stride).is_some()
    });

    if named {
        std::array::from_fn(|i| {
            let stride = STRIDES[i];
            (
                find("score", stride).unwrap(),
                find("bbox", stride).unwrap(),
                find("kps", stride).unwrap(),
            )
        })
    } else {
        tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
        [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
    }
}

/// Decode anchor-free detections for a single stride level into `out`.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    out: &mut Vec<FaceRegion>,
) {
    let grid = INPUT_SIZE / stride;
    let num_anchors = grid * grid * ANCHORS_PER_CELL;

    // Undo the letterbox mapping for one coordinate.
    let unmap_x = |x: f32| (x - letterbox.pad_x) / letterbox.scale;
    let unmap_y = |y: f32| (y - letterbox.pad_y) / letterbox.scale;

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= CONFIDENCE_THRESHOLD {
            continue;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let anchor_cx = ((cell % grid) * stride) as f32;
        let anchor_cy = ((cell / grid) * stride) as f32;

        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        // Offsets are [left, top, right, bottom] distances in stride units.
        let x1 = unmap_x(anchor_cx - bboxes[off] * stride as f32);
        let y1 = unmap_y(anchor_cy - bboxes[off + 1] * stride as f32);
        let x2 = unmap_x(anchor_cx + bboxes[off + 2] * stride as f32);
        let y2 = unmap_y(anchor_cy + bboxes[off + 3] * stride as f32);

        let kps_off = idx * 10;
        let landmarks = if kps_off + 9 < kps.len() {
            let mut lms = [(0.0f32, 0.0f32); 5];
            for (i, lm) in lms.iter_mut().enumerate() {
                *lm = (
                    unmap_x(anchor_cx + kps[kps_off + i * 2] * stride as f32),
                    unmap_y(anchor_cy + kps[kps_off + i * 2 + 1] * stride as f32),
                );
            }
            Some(lms)
        } else {
            None
        };

        out.push(FaceRegion {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
}

/// Non-Maximum Suppression: drop detections overlapping a higher-confidence one.
fn nms(mut detections: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceRegion> = Vec::new();
    'outer: for det in detections {
        for kept in &keep {
            if iou(kept, &det) > iou_threshold {
                continue 'outer;
            }
        }
        keep.push(det);
    }
    keep
}

/// Intersection-over-Union between two face regions.
fn iou(a: &FaceRegion, b: &FaceRegion) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceRegion {
        FaceRegion {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou_identical() {
        let a = region(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = region(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = region(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = region(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = region(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap 5x10 = 50, union 150.
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_cluster() {
        let dets = vec![
            region(0.0, 0.0, 100.0, 100.0, 0.9),
            region(5.0, 5.0, 100.0, 100.0, 0.8),
            region(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let kept = nms(dets, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_map_output_slots_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32", "kps_8",
            "kps_16", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let slots = map_output_slots(&names);
        assert_eq!(slots[0], (0, 3, 6));
        assert_eq!(slots[1], (1, 4, 7));
        assert_eq!(slots[2], (2, 5, 8));
    }

    #[test]
    fn test_map_output_slots_shuffled_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32",
            "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let slots = map_output_slots(&names);
        assert_eq!(slots[0], (2, 0, 1));
        assert_eq!(slots[1], (5, 3, 4));
        assert_eq!(slots[2], (8, 6, 7));
    }

    #[test]
    fn test_map_output_slots_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(map_output_slots(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        // 320x240 frame scales by 2.0 to 640x480 inside a 640x640 square,
        // leaving 80px of vertical padding top and bottom.
        let rgb = vec![128u8; 320 * 240 * 3];
        let (tensor, lb) = preprocess(&rgb, 320, 240);

        assert_eq!(tensor.shape(), &[1, 3, INPUT_SIZE, INPUT_SIZE]);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert!((lb.pad_y - 80.0).abs() < 1e-6);
        assert!(lb.pad_x.abs() < 1e-6);

        // Padding rows normalize to 0.0; content rows carry the pixel value.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let expected = (128.0 - PIXEL_MEAN) / PIXEL_STD;
        assert!((tensor[[0, 0, 320, 320]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_roundtrip() {
        let rgb = vec![0u8; 320 * 240 * 3];
        let (_, lb) = preprocess(&rgb, 320, 240);

        let (orig_x, orig_y) = (100.0f32, 50.0f32);
        let mapped_x = orig_x * lb.scale + lb.pad_x;
        let mapped_y = orig_y * lb.scale + lb.pad_y;
        assert!(((mapped_x - lb.pad_x) / lb.scale - orig_x).abs() < 0.1);
        assert!(((mapped_y - lb.pad_y) / lb.scale - orig_y).abs() < 0.1);
    }
}
