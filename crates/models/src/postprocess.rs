//! Decoding multibox outputs into scored, class-labelled detections.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Normalized [x_min, y_min, x_max, y_max].
    pub bbox: [f32; 4],
    pub score: f32,
    pub class_id: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct DecodeThresholds {
    /// Minimum objectness * class probability.
    pub score_thresh: f32,
    /// IoU above which lower-scoring same-class boxes are suppressed.
    pub nms_iou: f32,
    pub max_detections: usize,
}

impl Default for DecodeThresholds {
    fn default() -> Self {
        Self {
            score_thresh: 0.05,
            nms_iou: 0.5,
            max_detections: 100,
        }
    }
}

pub fn iou_xyxy(a: [f32; 4], b: [f32; 4]) -> f32 {
    let ax0 = a[0].min(a[2]);
    let ay0 = a[1].min(a[3]);
    let ax1 = a[0].max(a[2]);
    let ay1 = a[1].max(a[3]);
    let bx0 = b[0].min(b[2]);
    let by0 = b[1].min(b[3]);
    let bx1 = b[0].max(b[2]);
    let by1 = b[1].max(b[3]);

    let inter_w = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
    let inter_h = (ay1.min(by1) - ay0.max(by0)).max(0.0);
    let inter_area = inter_w * inter_h;

    let area_a = (ax1 - ax0).max(0.0) * (ay1 - ay0).max(0.0);
    let area_b = (bx1 - bx0).max(0.0) * (by1 - by0).max(0.0);
    let denom = area_a + area_b - inter_area;
    if denom <= 0.0 {
        0.0
    } else {
        inter_area / denom
    }
}

fn softmax_in_place(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}

/// Class-aware greedy non-maximum suppression; input order does not matter.
pub fn nms(mut detections: Vec<Detection>, iou_thresh: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == det.class_id && iou_xyxy(k.bbox, det.bbox) > iou_thresh);
        if !suppressed {
            kept.push(det);
        }
    }
    kept
}

/// Decode flat host buffers (`boxes` [B*N*4], `scores` [B*N], `class_logits` [B*N*C]).
pub fn decode_detections(
    boxes: &[f32],
    scores: &[f32],
    class_logits: &[f32],
    max_boxes: usize,
    num_classes: usize,
    thresholds: &DecodeThresholds,
) -> Vec<Vec<Detection>> {
    if max_boxes == 0 || num_classes == 0 {
        return Vec::new();
    }
    let batch = scores.len() / max_boxes;
    let mut per_image = Vec::with_capacity(batch);
    let mut probs = vec![0.0f32; num_classes];
    for b in 0..batch {
        let mut dets = Vec::new();
        for p in 0..max_boxes {
            let slot = b * max_boxes + p;
            probs.copy_from_slice(&class_logits[slot * num_classes..(slot + 1) * num_classes]);
            softmax_in_place(&mut probs);
            let (class_id, class_prob) = probs
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap_or((0, 0.0));
            let score = scores[slot] * class_prob;
            if score < thresholds.score_thresh {
                continue;
            }
            dets.push(Detection {
                bbox: [
                    boxes[slot * 4],
                    boxes[slot * 4 + 1],
                    boxes[slot * 4 + 2],
                    boxes[slot * 4 + 3],
                ],
                score,
                class_id,
            });
        }
        let mut kept = nms(dets, thresholds.nms_iou);
        kept.truncate(thresholds.max_detections);
        per_image.push(kept);
    }
    per_image
}
