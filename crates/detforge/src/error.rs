//! Pipeline-level error taxonomy: every failure is tagged with the stage that
//! raised it and a kind that decides the process exit code.

use burn_dataset::BurnDatasetError;
use inference::InferenceError;
use models::ModelError;
use std::fmt;
use thiserror::Error;
use training::TrainingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    LoadDataset,
    ResolveModel,
    Train,
    Evaluate,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configuration => "configuration",
            Stage::LoadDataset => "load-dataset",
            Stage::ResolveModel => "resolve-model",
            Stage::Train => "train",
            Stage::Evaluate => "evaluate",
            Stage::Export => "export",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Data,
    Resource,
    Io,
    LabelMismatch,
    /// Backend fault that is neither bad input nor resource exhaustion.
    Internal,
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Configuration => 2,
            ErrorKind::Data => 3,
            ErrorKind::Resource => 4,
            ErrorKind::Io => 5,
            ErrorKind::LabelMismatch => 6,
            ErrorKind::Internal => 70,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration error",
            ErrorKind::Data => "data error",
            ErrorKind::Resource => "resource error",
            ErrorKind::Io => "io error",
            ErrorKind::LabelMismatch => "label mismatch",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{stage} stage failed with {kind}: {message}")]
pub struct PipelineError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl PipelineError {
    pub fn new(stage: Stage, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(Stage::Configuration, ErrorKind::Configuration, message)
    }

    fn wrap<E>(stage: Stage, kind: ErrorKind, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            stage,
            kind,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }

    pub fn dataset(stage: Stage, err: BurnDatasetError) -> Self {
        let kind = dataset_kind(&err);
        Self::wrap(stage, kind, err)
    }

    pub fn model(stage: Stage, err: ModelError) -> Self {
        let kind = model_kind(&err);
        Self::wrap(stage, kind, err)
    }

    pub fn training(stage: Stage, err: TrainingError) -> Self {
        let kind = match &err {
            TrainingError::InvalidConfiguration(_) => ErrorKind::Configuration,
            TrainingError::ResourceExhausted(_) => ErrorKind::Resource,
            TrainingError::BackendPanic(_) => ErrorKind::Internal,
            TrainingError::LabelMismatch { .. } => ErrorKind::LabelMismatch,
            TrainingError::Dataset(e) => dataset_kind(e),
            TrainingError::Model(e) => model_kind(e),
        };
        Self::wrap(stage, kind, err)
    }

    pub fn inference(stage: Stage, err: InferenceError) -> Self {
        let kind = match &err {
            InferenceError::Image { .. } => ErrorKind::Data,
            InferenceError::Model(e) => model_kind(e),
            _ => ErrorKind::Io,
        };
        Self::wrap(stage, kind, err)
    }
}

fn dataset_kind(err: &BurnDatasetError) -> ErrorKind {
    if err.is_io() {
        ErrorKind::Io
    } else {
        ErrorKind::Data
    }
}

fn model_kind(err: &ModelError) -> ErrorKind {
    match err {
        ModelError::UnsupportedArchitecture { .. } | ModelError::PretrainedMissing { .. } => {
            ErrorKind::Configuration
        }
        ModelError::Weights { .. } => ErrorKind::Io,
        ModelError::TensorData(_) => ErrorKind::Internal,
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
