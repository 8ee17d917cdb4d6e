use burn_dataset::BurnDatasetError;
use data_contracts::LabelMap;
use models::ModelError;
use thiserror::Error;

pub type TrainingResult<T> = Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid training configuration: {0}")]
    InvalidConfiguration(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// The backend panicked for a reason other than running out of memory.
    #[error("training backend failed: {0}")]
    BackendPanic(String),
    #[error("label set mismatch: model trained on {expected}, dataset declares {found}")]
    LabelMismatch { expected: LabelMap, found: LabelMap },
    #[error(transparent)]
    Dataset(#[from] BurnDatasetError),
    #[error(transparent)]
    Model(#[from] ModelError),
}
