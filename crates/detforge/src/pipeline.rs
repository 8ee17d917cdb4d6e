use crate::backend::DetectionBackend;
use crate::config::{DatasetSource, PipelineConfig};
use crate::error::{PipelineError, PipelineResult, Stage};
use burn_dataset::BurnDatasetError;
use std::path::PathBuf;
use std::time::Instant;
use training::EvaluationReport;

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub report: EvaluationReport,
    pub artifact: PathBuf,
}

/// Existence checks only; nothing is parsed.
fn preflight(source: &DatasetSource) -> PipelineResult<()> {
    for dir in [&source.images_dir, &source.annotations_dir] {
        if !dir.is_dir() {
            return Err(PipelineError::dataset(
                Stage::LoadDataset,
                BurnDatasetError::MissingDirectory { path: dir.clone() },
            ));
        }
    }
    Ok(())
}

/// Select -> load -> train -> evaluate -> export. The first failure aborts the run.
pub fn run<B: DetectionBackend>(
    backend: &B,
    cfg: &PipelineConfig,
) -> PipelineResult<PipelineOutcome> {
    let started = Instant::now();
    let labels = cfg.validate()?;
    tracing::info!(labels = %labels, architecture = %cfg.architecture, "pipeline starting");

    let spec = backend.resolve_model(&cfg.architecture, cfg.pretrained_dir.as_deref())?;

    preflight(&cfg.train_data)?;
    preflight(&cfg.val_data)?;
    let train = backend.load_dataset("train", &cfg.train_data, &labels)?;
    let val = backend.load_dataset("validation", &cfg.val_data, &labels)?;

    let t = Instant::now();
    let model = backend.train(&train, &spec, &val, &cfg.training)?;
    tracing::info!(elapsed_s = t.elapsed().as_secs_f32(), "train stage done");

    let report = backend.evaluate(&model, &val, &cfg.evaluation)?;
    for (name, value) in &report.metrics {
        tracing::info!(metric = %name, value, "evaluation");
    }

    let artifact = backend.export(&model, &cfg.export)?;
    tracing::info!(
        artifact = %artifact.display(),
        elapsed_s = started.elapsed().as_secs_f32(),
        "pipeline finished"
    );
    Ok(PipelineOutcome { report, artifact })
}
