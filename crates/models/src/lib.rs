//! Burn detector architectures for detforge.
//!
//! - `catalog`: the fixed set of supported architecture ids and `ModelSpec` resolution.
//! - `detector`: `ConvDetector`, a conv backbone with multibox box/objectness/class heads.
//! - `trained`: `TrainedDetector`, weights bundled with their architecture and labels.
//! - `postprocess`: score thresholding and class-aware NMS.

pub mod catalog;
pub mod detector;
pub mod postprocess;
pub mod trained;

pub use catalog::{
    architecture, resolve_model_spec, supported_architectures, ArchitectureSpec, ModelError,
    ModelSpec,
};
pub use detector::{tensor_values, Backbone, ConvDetector, ConvDetectorConfig, DetectorOutput};
pub use postprocess::{decode_detections, iou_xyxy, nms, DecodeThresholds, Detection};
pub use trained::TrainedDetector;

pub mod prelude {
    pub use super::{
        ArchitectureSpec, ConvDetector, ConvDetectorConfig, Detection, ModelSpec, TrainedDetector,
    };
}
