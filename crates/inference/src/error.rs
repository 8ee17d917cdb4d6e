use models::ModelError;
use std::path::PathBuf;
use thiserror::Error;

pub type InferenceResult<T> = Result<T, InferenceError>;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact {path} already exists and overwrite is disabled")]
    ArtifactExists { path: PathBuf },
    #[error("malformed artifact: {0}")]
    Format(String),
    #[error("artifact metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("weights checksum mismatch: expected {expected}, got {actual}")]
    Checksum { expected: String, actual: String },
    #[error("weights record: {0}")]
    Record(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl InferenceError {
    pub fn is_io(&self) -> bool {
        matches!(self, InferenceError::Io { .. } | InferenceError::ArtifactExists { .. })
    }
}
