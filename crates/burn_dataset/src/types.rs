//! Core types, error definitions, and data structures for burn_dataset.

use data_contracts::{LabelMap, ValidationError, VocError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, BurnDatasetError>;

#[derive(Debug, Error)]
pub enum BurnDatasetError {
    #[error("directory {path} does not exist")]
    MissingDirectory { path: PathBuf },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("annotation parse error at {path}: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: VocError,
    },
    #[error("unknown label {label:?} in {path} (permitted: {permitted})")]
    UnknownLabel {
        path: PathBuf,
        label: String,
        permitted: LabelMap,
    },
    #[error("label validation failed at {path}: {source}")]
    Validation {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("{0}")]
    Other(String),
}

impl BurnDatasetError {
    /// True for failures caused by the filesystem rather than the data itself.
    pub fn is_io(&self) -> bool {
        matches!(self, BurnDatasetError::Io { .. })
    }
}

/// One labelled bounding box, normalized to the image size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledBox {
    /// [x_min, y_min, x_max, y_max] in 0..1.
    pub bbox_norm: [f32; 4],
    pub class_id: usize,
    pub difficult: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledSample {
    pub image_path: PathBuf,
    pub annotation_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub boxes: Vec<LabeledBox>,
}

/// A named, read-only collection of (image, annotation) pairs sharing one label map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledImageSet {
    pub name: String,
    pub labels: LabelMap,
    pub samples: Vec<LabeledSample>,
}

impl LabeledImageSet {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn box_count(&self) -> usize {
        self.samples.iter().map(|s| s.boxes.len()).sum()
    }

    /// Number of boxes per class id.
    pub fn label_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.labels.len()];
        for sample in &self.samples {
            for b in &sample.boxes {
                if let Some(c) = counts.get_mut(b.class_id) {
                    *c += 1;
                }
            }
        }
        counts
    }

    /// Split into (first, rest) where `first` holds `fraction` of the samples.
    pub fn split(&self, fraction: f32) -> (LabeledImageSet, LabeledImageSet) {
        let fraction = fraction.clamp(0.0, 1.0);
        let cut = ((self.samples.len() as f32) * fraction).round() as usize;
        let (head, tail) = self.samples.split_at(cut.min(self.samples.len()));
        (
            LabeledImageSet {
                name: format!("{}[..{cut}]", self.name),
                labels: self.labels.clone(),
                samples: head.to_vec(),
            },
            LabeledImageSet {
                name: format!("{}[{cut}..]", self.name),
                labels: self.labels.clone(),
                samples: tail.to_vec(),
            },
        )
    }
}

/// Location of one discovered (annotation, image) pair, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndex {
    pub annotation_path: PathBuf,
    pub image_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct VocLoadOptions {
    /// Cap on loaded pairs, applied after sorting annotation paths.
    pub max_num_images: Option<usize>,
    /// Restrict loading to these annotation file stems.
    pub annotation_filenames: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub annotations: usize,
    pub total: usize,
    pub non_empty: usize,
    pub empty: usize,
    pub missing_image: usize,
    pub invalid: usize,
    pub unknown_label: usize,
    pub boxes_per_label: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}


#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub max_invalid: Option<usize>,
    pub max_missing: Option<usize>,
    pub max_empty: Option<usize>,
    pub max_invalid_ratio: Option<f32>,
    pub max_missing_ratio: Option<f32>,
    pub max_empty_ratio: Option<f32>,
}

impl ValidationThresholds {
    pub fn from_env() -> Self {
        fn parse_usize(key: &str) -> Option<usize> {
            std::env::var(key).ok()?.parse().ok()
        }
        fn parse_ratio(key: &str) -> Option<f32> {
            std::env::var(key).ok()?.parse().ok()
        }
        ValidationThresholds {
            max_invalid: parse_usize("DETFORGE_DATASET_MAX_INVALID"),
            max_missing: parse_usize("DETFORGE_DATASET_MAX_MISSING"),
            max_empty: parse_usize("DETFORGE_DATASET_MAX_EMPTY"),
            max_invalid_ratio: parse_ratio("DETFORGE_DATASET_MAX_INVALID_RATIO"),
            max_missing_ratio: parse_ratio("DETFORGE_DATASET_MAX_MISSING_RATIO"),
            max_empty_ratio: parse_ratio("DETFORGE_DATASET_MAX_EMPTY_RATIO"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: DatasetSummary,
}
