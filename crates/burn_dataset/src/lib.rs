//! Pascal VOC dataset loading, validation, and Burn-compatible batching for detforge.
//!
//! This crate provides utilities for:
//! - Loading labelled image sets from a VOC images/annotations layout
//! - Dataset summaries with pass/warn/fail thresholds
//! - Resize and light augmentation
//! - Burn-compatible batch iteration

pub mod aug;
pub mod batch;
pub mod types;
pub mod validation;
pub mod voc;

pub use aug::{PreparedSample, TransformPipeline};
pub use batch::{collate, prepare_sample, BatchIter, BurnBatch};
pub use types::*;
pub use validation::{summarize_with_thresholds, validate_summary};
pub use voc::{index_pascal_voc, load_pascal_voc, summarize_pascal_voc};
