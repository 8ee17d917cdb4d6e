#![recursion_limit = "256"]

pub mod artifact;
pub mod error;
pub mod factory;

#[cfg(feature = "backend-wgpu")]
pub type InferenceBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

pub use artifact::{
    export_artifact, load_detector, read_artifact, ArtifactMetadata, ExportConfig, ExportFormat,
    ExportSummary, Precision,
};
pub use error::{InferenceError, InferenceResult};
pub use factory::{InferenceFactory, InferenceThresholds, LabeledDetection};

pub mod prelude {
    pub use crate::artifact::{export_artifact, ExportConfig, ExportFormat, Precision};
    pub use crate::factory::{InferenceFactory, InferenceThresholds, LabeledDetection};
    pub use crate::InferenceBackend;
}
