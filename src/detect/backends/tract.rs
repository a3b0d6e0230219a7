#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectorBackend, RawDetection};

/// COCO class names in model output order.
const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

const DEFAULT_INPUT_SIZE: u32 = 640;
const SCORE_FLOOR: f32 = 0.25;
const NMS_IOU: f32 = 0.45;

/// Tract-based backend for YOLO-class ONNX detection models.
///
/// Frames are stretched to the model input size with nearest-neighbor
/// sampling; decoded boxes come back normalized, so they map onto the
/// original frame without bookkeeping. Expects the single-output
/// `[1, 4 + classes, anchors]` export layout.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    score_floor: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = DEFAULT_INPUT_SIZE as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size: DEFAULT_INPUT_SIZE,
            score_floor: SCORE_FLOOR,
        })
    }

    /// Override the pre-filter score floor (the pipeline threshold is applied
    /// later, on top of this).
    pub fn with_score_floor(mut self, floor: f32) -> Self {
        self.score_floor = floor;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let size = self.input_size as usize;
        let src_w = width as usize;
        let src_h = height as usize;
        let input =
            tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
                let src_y = (((y as f64 + 0.5) * src_h as f64 / size as f64) as usize).min(src_h - 1);
                let src_x = (((x as f64 + 0.5) * src_w as f64 / size as f64) as usize).min(src_w - 1);
                let idx = (src_y * src_w + src_x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            });

        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let view = view
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not rank 3")?;
        let class_count = shape[1] - 4;
        let anchors = shape[2];
        let size = self.input_size as f32;

        let mut candidates = Vec::new();
        for i in 0..anchors {
            let mut best_class = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for c in 0..class_count {
                let score = view[[0, 4 + c, i]];
                if score > best_score {
                    best_score = score;
                    best_class = c;
                }
            }
            if best_score < self.score_floor {
                continue;
            }

            let cx = view[[0, 0, i]] / size;
            let cy = view[[0, 1, i]] / size;
            let w = view[[0, 2, i]] / size;
            let h = view[[0, 3, i]] / size;
            let label = COCO_CLASSES
                .get(best_class)
                .copied()
                .unwrap_or("unknown")
                .to_string();

            candidates.push(RawDetection {
                label,
                confidence: best_score,
                x: cx - w / 2.0,
                y: cy - h / 2.0,
                w,
                h,
            });
        }

        Ok(non_max_suppress(candidates))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }
}

/// Greedy per-class non-maximum suppression.
fn non_max_suppress(mut candidates: Vec<RawDetection>) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<RawDetection> = Vec::new();
    for cand in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.label == cand.label && iou(k, &cand) > NMS_IOU);
        if !overlaps {
            kept.push(cand);
        }
    }
    kept
}

fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.w).min(b.x + b.w);
    let y2 = (a.y + a.h).min(b.y + b.h);
    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.w * a.h + b.w * b.h - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(label: &str, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> RawDetection {
        RawDetection {
            label: label.to_string(),
            confidence,
            x,
            y,
            w,
            h,
        }
    }

    #[test]
    fn nms_keeps_highest_of_overlapping_pair() {
        let kept = non_max_suppress(vec![
            det("person", 0.6, 0.10, 0.10, 0.30, 0.50),
            det("person", 0.9, 0.11, 0.11, 0.30, 0.50),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn nms_keeps_distinct_boxes_and_classes() {
        let kept = non_max_suppress(vec![
            det("person", 0.9, 0.0, 0.0, 0.2, 0.2),
            det("person", 0.8, 0.6, 0.6, 0.2, 0.2),
            det("dog", 0.7, 0.0, 0.0, 0.2, 0.2),
        ]);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = det("person", 1.0, 0.0, 0.0, 0.1, 0.1);
        let b = det("person", 1.0, 0.5, 0.5, 0.1, 0.1);
        assert_eq!(iou(&a, &b), 0.0);
    }
}
