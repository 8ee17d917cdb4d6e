use crate::catalog::{ArchitectureSpec, ModelError};
use crate::detector::{tensor_values, ConvDetector, ConvDetectorConfig};
use crate::postprocess::{decode_detections, DecodeThresholds, Detection};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use data_contracts::LabelMap;

/// Fine-tuned weights together with the architecture and labels they were trained for.
#[derive(Debug, Clone)]
pub struct TrainedDetector<B: Backend> {
    pub architecture: ArchitectureSpec,
    pub labels: LabelMap,
    pub model: ConvDetector<B>,
}

impl<B: Backend> TrainedDetector<B> {
    /// Fresh weights for `architecture`, sized for `labels`.
    pub fn init(architecture: ArchitectureSpec, labels: LabelMap, device: &B::Device) -> Self {
        let cfg = ConvDetectorConfig::from_architecture(&architecture, labels.len());
        Self {
            model: ConvDetector::new(cfg, device),
            architecture,
            labels,
        }
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.architecture.input_size, self.architecture.input_size)
    }

    /// Run the model and decode per-image detections.
    pub fn detect(
        &self,
        images: Tensor<B, 4>,
        thresholds: &DecodeThresholds,
    ) -> Result<Vec<Vec<Detection>>, ModelError> {
        let out = self.model.forward_multibox(images);
        let boxes = tensor_values(out.boxes)?;
        let scores = tensor_values(out.scores)?;
        let logits = tensor_values(out.class_logits)?;
        Ok(decode_detections(
            &boxes,
            &scores,
            &logits,
            self.model.max_boxes(),
            self.model.num_classes(),
            thresholds,
        ))
    }
}
