use crate::error::{TrainingError, TrainingResult};
use crate::metrics::{coco_metrics, ImageDetections};
use burn::module::Module;
use burn::tensor::backend::Backend;
use burn_dataset::{BatchIter, LabeledImageSet, TransformPipeline};
use models::{DecodeThresholds, TrainedDetector};
use serde::Serialize;
use std::collections::BTreeMap;

/// Metric name to value, e.g. `AP`, `AP50`, `ARmax100`, `AP_/helmet`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub metrics: BTreeMap<String, f32>,
}

impl EvaluationReport {
    pub fn get(&self, name: &str) -> Option<f32> {
        self.metrics.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Evaluator {
    pub thresholds: DecodeThresholds,
    pub batch_size: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self {
            thresholds: DecodeThresholds::default(),
            batch_size: 8,
        }
    }
}

impl Evaluator {
    pub fn new(thresholds: DecodeThresholds, batch_size: usize) -> Self {
        Self {
            thresholds,
            batch_size: batch_size.max(1),
        }
    }

    pub fn evaluate<B: Backend>(
        &self,
        detector: &TrainedDetector<B>,
        set: &LabeledImageSet,
    ) -> TrainingResult<EvaluationReport> {
        if detector.labels != set.labels {
            return Err(TrainingError::LabelMismatch {
                expected: detector.labels.clone(),
                found: set.labels.clone(),
            });
        }
        let device = detector
            .model
            .devices()
            .into_iter()
            .next()
            .unwrap_or_default();
        let pipeline =
            TransformPipeline::inference(detector.input_size(), detector.architecture.max_boxes);

        // Resizing is a plain stretch, so normalized boxes line up with the source annotations.
        let mut images = Vec::with_capacity(set.len());
        let mut iter = BatchIter::new(set, self.batch_size, pipeline, None, 0);
        while let Some(batch) = iter.next_batch::<B>(&device)? {
            for detections in detector.detect(batch.images, &self.thresholds)? {
                let (ground_truth, image_size) = set
                    .samples
                    .get(images.len())
                    .map(|s| (s.boxes.clone(), (s.width, s.height)))
                    .unwrap_or_default();
                images.push(ImageDetections {
                    detections,
                    ground_truth,
                    image_size,
                });
            }
        }

        let metrics = coco_metrics(&images, &set.labels);
        tracing::info!(
            set = %set.name,
            images = images.len(),
            ap = metrics.get("AP").copied().unwrap_or(-1.0),
            ap50 = metrics.get("AP50").copied().unwrap_or(-1.0),
            "evaluation finished"
        );
        Ok(EvaluationReport { metrics })
    }
}
