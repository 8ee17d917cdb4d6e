//! detforge: fine-tune a catalog detector on Pascal VOC data, evaluate it, and
//! export a self-contained inference artifact.
//!
//! The pipeline in [`pipeline::run`] only sequences stages; the ML work sits
//! behind [`backend::DetectionBackend`], with [`backend::BurnBackend`] as the
//! default implementation.

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;

pub use backend::{BurnBackend, DetectionBackend};
pub use config::{DatasetSource, EvalConfig, ExportTarget, PipelineConfig};
pub use error::{ErrorKind, PipelineError, PipelineResult, Stage};
pub use pipeline::{run, PipelineOutcome};
