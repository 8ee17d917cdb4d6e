use crate::artifact::{load_detector, ArtifactMetadata};
use crate::error::{InferenceError, InferenceResult};
use crate::InferenceBackend;
use burn::tensor::{Tensor, TensorData};
use burn_dataset::TransformPipeline;
use models::{DecodeThresholds, TrainedDetector};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Thresholds for inference (score + IoU).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceThresholds {
    pub obj_thresh: f32,
    pub iou_thresh: f32,
    pub max_detections: usize,
}

impl Default for InferenceThresholds {
    fn default() -> Self {
        Self {
            obj_thresh: 0.3,
            iou_thresh: 0.5,
            max_detections: 100,
        }
    }
}

impl From<InferenceThresholds> for DecodeThresholds {
    fn from(t: InferenceThresholds) -> Self {
        DecodeThresholds {
            score_thresh: t.obj_thresh,
            nms_iou: t.iou_thresh,
            max_detections: t.max_detections,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledDetection {
    pub label: String,
    pub class_id: usize,
    pub score: f32,
    /// Normalized [x_min, y_min, x_max, y_max].
    pub bbox_norm: [f32; 4],
    /// Same box in source image pixels.
    pub bbox_px: [f32; 4],
}

/// A detector rebuilt from an exported artifact.
pub struct InferenceFactory {
    metadata: ArtifactMetadata,
    detector: TrainedDetector<InferenceBackend>,
    thresholds: InferenceThresholds,
    device: <InferenceBackend as burn::tensor::backend::Backend>::Device,
}

impl InferenceFactory {
    pub fn load(artifact: &Path, thresholds: InferenceThresholds) -> InferenceResult<Self> {
        let device = <InferenceBackend as burn::tensor::backend::Backend>::Device::default();
        let (metadata, detector) = load_detector::<InferenceBackend>(artifact, &device)?;
        tracing::info!(
            path = %artifact.display(),
            architecture = %metadata.architecture.id,
            labels = %metadata.labels,
            precision = ?metadata.precision,
            "loaded artifact"
        );
        Ok(Self {
            metadata,
            detector,
            thresholds,
            device,
        })
    }

    pub fn metadata(&self) -> &ArtifactMetadata {
        &self.metadata
    }

    pub fn detector(&self) -> &TrainedDetector<InferenceBackend> {
        &self.detector
    }

    pub fn detect_image(&self, img: &image::RgbImage) -> InferenceResult<Vec<LabeledDetection>> {
        let (src_w, src_h) = img.dimensions();
        let pipeline = TransformPipeline::inference(
            self.detector.input_size(),
            self.detector.architecture.max_boxes,
        );
        let prepared = pipeline
            .apply(img.clone(), &[], 0)
            .map_err(|e| InferenceError::Format(e.to_string()))?;
        let input = Tensor::<InferenceBackend, 4>::from_data(
            TensorData::new(
                prepared.image_chw,
                [1, 3, prepared.height as usize, prepared.width as usize],
            ),
            &self.device,
        );

        let detections = self
            .detector
            .detect(input, &self.thresholds.into())?
            .into_iter()
            .next()
            .unwrap_or_default();
        Ok(detections
            .into_iter()
            .map(|d| LabeledDetection {
                label: self
                    .detector
                    .labels
                    .name(d.class_id)
                    .unwrap_or_default()
                    .to_string(),
                class_id: d.class_id,
                score: d.score,
                bbox_norm: d.bbox,
                bbox_px: [
                    d.bbox[0] * src_w as f32,
                    d.bbox[1] * src_h as f32,
                    d.bbox[2] * src_w as f32,
                    d.bbox[3] * src_h as f32,
                ],
            })
            .collect())
    }

    pub fn detect_path(&self, path: &Path) -> InferenceResult<Vec<LabeledDetection>> {
        let img = image::open(path)
            .map_err(|source| InferenceError::Image {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgb8();
        self.detect_image(&img)
    }
}
