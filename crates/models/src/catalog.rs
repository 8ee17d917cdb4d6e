//! Fixed catalog of detector architectures and the resolved `ModelSpec`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unsupported architecture {id:?}; supported: {supported}")]
    UnsupportedArchitecture { id: String, supported: String },
    #[error("pretrained backbone weights not found at {path}")]
    PretrainedMissing { path: PathBuf },
    #[error("failed to load weights from {path}: {msg}")]
    Weights { path: PathBuf, msg: String },
    #[error("failed to read tensor data: {0}")]
    TensorData(String),
}

/// Architecture descriptor: everything needed to rebuild a `ConvDetector`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureSpec {
    pub id: String,
    /// Square input resolution in pixels.
    pub input_size: u32,
    /// Output channels of each stride-2 backbone conv.
    pub channels: Vec<usize>,
    pub head_hidden: usize,
    /// Prediction slots per image.
    pub max_boxes: usize,
}

struct CatalogEntry {
    id: &'static str,
    input_size: u32,
    channels: &'static [usize],
    head_hidden: usize,
    max_boxes: usize,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        id: "detector_lite0",
        input_size: 64,
        channels: &[16, 32, 64],
        head_hidden: 128,
        max_boxes: 16,
    },
    CatalogEntry {
        id: "detector_lite1",
        input_size: 96,
        channels: &[24, 48, 96, 128],
        head_hidden: 192,
        max_boxes: 25,
    },
    CatalogEntry {
        id: "detector_lite2",
        input_size: 128,
        channels: &[32, 64, 128, 192],
        head_hidden: 256,
        max_boxes: 32,
    },
];

pub fn supported_architectures() -> Vec<&'static str> {
    CATALOG.iter().map(|e| e.id).collect()
}

pub fn architecture(id: &str) -> Result<ArchitectureSpec, ModelError> {
    CATALOG
        .iter()
        .find(|e| e.id == id)
        .map(|e| ArchitectureSpec {
            id: e.id.to_string(),
            input_size: e.input_size,
            channels: e.channels.to_vec(),
            head_hidden: e.head_hidden,
            max_boxes: e.max_boxes,
        })
        .ok_or_else(|| ModelError::UnsupportedArchitecture {
            id: id.to_string(),
            supported: supported_architectures().join(", "),
        })
}

/// A resolved architecture plus where its pretrained backbone comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub architecture: ArchitectureSpec,
    /// `<pretrained_dir>/<id>.bin`; None means a freshly initialized backbone.
    pub pretrained_backbone: Option<PathBuf>,
}

pub fn pretrained_backbone_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.bin"))
}

pub fn resolve_model_spec(id: &str, pretrained_dir: Option<&Path>) -> Result<ModelSpec, ModelError> {
    let architecture = architecture(id)?;
    let pretrained_backbone = match pretrained_dir {
        None => None,
        Some(dir) => {
            let path = pretrained_backbone_path(dir, id);
            if !path.is_file() {
                return Err(ModelError::PretrainedMissing { path });
            }
            Some(path)
        }
    };
    Ok(ModelSpec {
        architecture,
        pretrained_backbone,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_ids() {
        for id in supported_architectures() {
            let spec = resolve_model_spec(id, None).unwrap();
            assert_eq!(spec.architecture.id, id);
            assert!(spec.pretrained_backbone.is_none());
        }
    }

    #[test]
    fn unknown_id_lists_supported() {
        let err = resolve_model_spec("efficientdet_lite9", None).unwrap_err();
        match err {
            ModelError::UnsupportedArchitecture { id, supported } => {
                assert_eq!(id, "efficientdet_lite9");
                assert!(supported.contains("detector_lite0"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_pretrained_file_is_an_error() {
        let tmp = std::env::temp_dir().join("detforge-no-weights-here");
        let err = resolve_model_spec("detector_lite0", Some(&tmp)).unwrap_err();
        assert!(matches!(err, ModelError::PretrainedMissing { .. }));
    }
}
