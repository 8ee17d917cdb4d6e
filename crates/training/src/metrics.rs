//! COCO-style average precision and recall.

use burn_dataset::LabeledBox;
use data_contracts::LabelMap;
use models::{iou_xyxy, Detection};
use std::collections::BTreeMap;

/// IoU thresholds 0.50, 0.55, ..., 0.95.
pub const IOU_THRESHOLDS: [f32; 10] = [0.5, 0.55, 0.6, 0.65, 0.7, 0.75, 0.8, 0.85, 0.9, 0.95];
pub const MAX_DETECTIONS: [usize; 3] = [1, 10, 100];
const RECALL_POINTS: usize = 101;

/// Inclusive pixel-area range, as in the COCO small/medium/large split.
#[derive(Debug, Clone, Copy)]
struct AreaRange {
    lo: f32,
    hi: f32,
}

impl AreaRange {
    fn contains(&self, area: f32) -> bool {
        area >= self.lo && area <= self.hi
    }
}

const AREA_ALL: AreaRange = AreaRange {
    lo: 0.0,
    hi: f32::INFINITY,
};
const AREA_BUCKETS: [(&str, AreaRange); 3] = [
    ("s", AreaRange { lo: 0.0, hi: 32.0 * 32.0 }),
    ("m", AreaRange { lo: 32.0 * 32.0, hi: 96.0 * 96.0 }),
    ("l", AreaRange { lo: 96.0 * 96.0, hi: f32::INFINITY }),
];

/// Detections and ground truth for one image, both in normalized xyxy.
#[derive(Debug, Clone, Default)]
pub struct ImageDetections {
    pub detections: Vec<Detection>,
    pub ground_truth: Vec<LabeledBox>,
    /// Source (width, height) in pixels; box areas for the size buckets use it.
    pub image_size: (u32, u32),
}

impl ImageDetections {
    fn pixel_area(&self, bbox: [f32; 4]) -> f32 {
        let (w, h) = self.image_size;
        (bbox[2] - bbox[0]).max(0.0) * w as f32 * (bbox[3] - bbox[1]).max(0.0) * h as f32
    }
}

/// Per (class, IoU threshold, max detections, area range) matching result.
struct ClassEval {
    /// (score, true positive) for every non-ignored detection.
    scored: Vec<(f32, bool)>,
    positives: usize,
}

fn evaluate_class(
    images: &[ImageDetections],
    class_id: usize,
    iou_thresh: f32,
    max_dets: usize,
    area: AreaRange,
) -> ClassEval {
    let mut scored = Vec::new();
    let mut positives = 0;
    for image in images {
        // Difficult boxes and boxes outside the area range can absorb a detection but never count.
        let gts: Vec<(&LabeledBox, bool)> = image
            .ground_truth
            .iter()
            .filter(|g| g.class_id == class_id)
            .map(|g| (g, g.difficult || !area.contains(image.pixel_area(g.bbox_norm))))
            .collect();
        positives += gts.iter().filter(|(_, ignored)| !ignored).count();

        let mut dets: Vec<&Detection> = image
            .detections
            .iter()
            .filter(|d| d.class_id == class_id)
            .collect();
        dets.sort_by(|a, b| b.score.total_cmp(&a.score));
        dets.truncate(max_dets);

        let mut gt_taken = vec![false; gts.len()];
        for det in dets {
            let mut best: Option<(usize, f32)> = None;
            let mut hits_ignored = false;
            for (gi, (gt, ignored)) in gts.iter().enumerate() {
                if gt_taken[gi] {
                    continue;
                }
                let iou = iou_xyxy(det.bbox, gt.bbox_norm);
                if iou < iou_thresh {
                    continue;
                }
                if *ignored {
                    hits_ignored = true;
                } else if best.map_or(true, |(_, b)| iou > b) {
                    best = Some((gi, iou));
                }
            }
            match best {
                Some((gi, _)) => {
                    gt_taken[gi] = true;
                    scored.push((det.score, true));
                }
                None if hits_ignored => {}
                None if !area.contains(image.pixel_area(det.bbox)) => {}
                None => scored.push((det.score, false)),
            }
        }
    }
    ClassEval { scored, positives }
}

/// Returns (AP with 101-point interpolation, final recall); None when the class has no positives.
fn precision_recall(mut eval: ClassEval) -> Option<(f32, f32)> {
    if eval.positives == 0 {
        return None;
    }
    eval.scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    let npos = eval.positives as f32;
    let mut tp = 0.0f32;
    let mut fp = 0.0f32;
    let mut recall = Vec::with_capacity(eval.scored.len());
    let mut precision = Vec::with_capacity(eval.scored.len());
    for (_, is_tp) in &eval.scored {
        if *is_tp {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
        recall.push(tp / npos);
        precision.push(tp / (tp + fp));
    }
    for i in (1..precision.len()).rev() {
        if precision[i] > precision[i - 1] {
            precision[i - 1] = precision[i];
        }
    }

    let mut sum = 0.0;
    for r in 0..RECALL_POINTS {
        let target = r as f32 / (RECALL_POINTS - 1) as f32;
        let idx = recall.partition_point(|&rc| rc < target - 1e-6);
        if let Some(p) = precision.get(idx) {
            sum += p;
        }
    }
    Some((sum / RECALL_POINTS as f32, recall.last().copied().unwrap_or(0.0)))
}

fn score(
    images: &[ImageDetections],
    class_id: usize,
    iou_thresh: f32,
    max_dets: usize,
    area: AreaRange,
) -> Option<(f32, f32)> {
    precision_recall(evaluate_class(images, class_id, iou_thresh, max_dets, area))
}

fn mean_or_missing(values: &[f32]) -> f32 {
    if values.is_empty() {
        -1.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// `AP`, `AP50`, `AP75`, `APs/m/l`, `ARmax1/10/100`, `ARs/m/l` and `AP_/<label>` per class.
///
/// Classes without ground truth (in a size bucket, for the bucketed keys) are
/// excluded from the averages; a metric with no contributing class reports -1.
pub fn coco_metrics(images: &[ImageDetections], labels: &LabelMap) -> BTreeMap<String, f32> {
    let max_dets = *MAX_DETECTIONS.last().unwrap_or(&100);
    let mut ap_all = Vec::new();
    let mut ap50 = Vec::new();
    let mut ap75 = Vec::new();
    let mut recalls: BTreeMap<usize, Vec<f32>> = BTreeMap::new();
    let mut bucket_ap: BTreeMap<&str, Vec<f32>> = BTreeMap::new();
    let mut bucket_ar: BTreeMap<&str, Vec<f32>> = BTreeMap::new();
    let mut metrics = BTreeMap::new();

    for (class_id, label) in labels.iter().enumerate() {
        let mut class_ap = Vec::new();
        for &t in &IOU_THRESHOLDS {
            let Some((ap, _)) = score(images, class_id, t, max_dets, AREA_ALL) else {
                break;
            };
            class_ap.push(ap);
            ap_all.push(ap);
            if (t - 0.5).abs() < 1e-6 {
                ap50.push(ap);
            }
            if (t - 0.75).abs() < 1e-6 {
                ap75.push(ap);
            }
            for &m in &MAX_DETECTIONS {
                if let Some((_, recall)) = score(images, class_id, t, m, AREA_ALL) {
                    recalls.entry(m).or_default().push(recall);
                }
            }
            for (suffix, area) in AREA_BUCKETS {
                if let Some((ap, recall)) = score(images, class_id, t, max_dets, area) {
                    bucket_ap.entry(suffix).or_default().push(ap);
                    bucket_ar.entry(suffix).or_default().push(recall);
                }
            }
        }
        metrics.insert(format!("AP_/{label}"), mean_or_missing(&class_ap));
    }

    metrics.insert("AP".to_string(), mean_or_missing(&ap_all));
    metrics.insert("AP50".to_string(), mean_or_missing(&ap50));
    metrics.insert("AP75".to_string(), mean_or_missing(&ap75));
    for m in MAX_DETECTIONS {
        let values = recalls.get(&m).map(Vec::as_slice).unwrap_or(&[]);
        metrics.insert(format!("ARmax{m}"), mean_or_missing(values));
    }
    for (suffix, _) in AREA_BUCKETS {
        let ap = bucket_ap.get(suffix).map(Vec::as_slice).unwrap_or(&[]);
        let ar = bucket_ar.get(suffix).map(Vec::as_slice).unwrap_or(&[]);
        metrics.insert(format!("AP{suffix}"), mean_or_missing(ap));
        metrics.insert(format!("AR{suffix}"), mean_or_missing(ar));
    }
    metrics
}
