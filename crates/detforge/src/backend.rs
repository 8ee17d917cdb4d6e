use crate::config::{DatasetSource, EvalConfig, ExportTarget};
use crate::error::{PipelineError, PipelineResult, Stage};
use data_contracts::LabelMap;
use inference::export_artifact;
use models::{resolve_model_spec, ModelSpec, TrainedDetector};
use std::path::{Path, PathBuf};
use training::{EvaluationReport, Evaluator, TrainBackend, TrainConfig, Trainer};

/// The five operations the pipeline needs from an ML stack.
pub trait DetectionBackend {
    type Dataset;
    type ModelSpec;
    type Model;

    fn load_dataset(
        &self,
        name: &str,
        source: &DatasetSource,
        labels: &LabelMap,
    ) -> PipelineResult<Self::Dataset>;

    fn resolve_model(
        &self,
        architecture: &str,
        pretrained_dir: Option<&Path>,
    ) -> PipelineResult<Self::ModelSpec>;

    fn train(
        &self,
        train: &Self::Dataset,
        spec: &Self::ModelSpec,
        val: &Self::Dataset,
        cfg: &TrainConfig,
    ) -> PipelineResult<Self::Model>;

    fn evaluate(
        &self,
        model: &Self::Model,
        set: &Self::Dataset,
        cfg: &EvalConfig,
    ) -> PipelineResult<EvaluationReport>;

    /// Returns the path of the written artifact.
    fn export(&self, model: &Self::Model, target: &ExportTarget) -> PipelineResult<PathBuf>;
}

/// `DetectionBackend` over the burn crates in this workspace.
#[derive(Debug, Default, Clone, Copy)]
pub struct BurnBackend;

impl DetectionBackend for BurnBackend {
    type Dataset = burn_dataset::LabeledImageSet;
    type ModelSpec = ModelSpec;
    type Model = TrainedDetector<TrainBackend>;

    fn load_dataset(
        &self,
        name: &str,
        source: &DatasetSource,
        labels: &LabelMap,
    ) -> PipelineResult<Self::Dataset> {
        burn_dataset::load_pascal_voc(
            name,
            &source.images_dir,
            &source.annotations_dir,
            labels,
            &source.load_options(),
        )
        .map_err(|e| PipelineError::dataset(Stage::LoadDataset, e))
    }

    fn resolve_model(
        &self,
        architecture: &str,
        pretrained_dir: Option<&Path>,
    ) -> PipelineResult<Self::ModelSpec> {
        let spec = resolve_model_spec(architecture, pretrained_dir)
            .map_err(|e| PipelineError::model(Stage::ResolveModel, e))?;
        tracing::info!(
            architecture = %spec.architecture.id,
            input_size = spec.architecture.input_size,
            pretrained = spec.pretrained_backbone.is_some(),
            "resolved model"
        );
        Ok(spec)
    }

    fn train(
        &self,
        train: &Self::Dataset,
        spec: &Self::ModelSpec,
        val: &Self::Dataset,
        cfg: &TrainConfig,
    ) -> PipelineResult<Self::Model> {
        let outcome = Trainer::new(cfg.clone())
            .train(train, spec, Some(val))
            .map_err(|e| PipelineError::training(Stage::Train, e))?;
        if let Some(last) = outcome.history.last() {
            tracing::info!(
                epochs = outcome.history.len(),
                final_train_loss = last.train_loss,
                final_val_loss = last.val_loss.unwrap_or(f32::NAN),
                "training finished"
            );
        }
        Ok(outcome.model)
    }

    fn evaluate(
        &self,
        model: &Self::Model,
        set: &Self::Dataset,
        cfg: &EvalConfig,
    ) -> PipelineResult<EvaluationReport> {
        Evaluator::new(cfg.thresholds, cfg.batch_size)
            .evaluate(model, set)
            .map_err(|e| PipelineError::training(Stage::Evaluate, e))
    }

    fn export(&self, model: &Self::Model, target: &ExportTarget) -> PipelineResult<PathBuf> {
        let summary = export_artifact(model, &target.dir, &target.filename, &target.options)
            .map_err(|e| PipelineError::inference(Stage::Export, e))?;
        summary
            .artifact
            .or(summary.checkpoint)
            .or(summary.labels)
            .ok_or_else(|| PipelineError::config("export wrote no files"))
    }
}
