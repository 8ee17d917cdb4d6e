#![recursion_limit = "256"]

pub mod error;
pub mod eval;
pub mod metrics;
pub mod targets;
pub mod trainer;

pub use error::{TrainingError, TrainingResult};
pub use eval::{EvaluationReport, Evaluator};
pub use metrics::{coco_metrics, ImageDetections};
pub use targets::{build_greedy_targets, detection_loss, LossWeights, MatchedTargets};
pub use trainer::{estimate_step_bytes, EpochStats, TrainConfig, TrainOutcome, Trainer};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
