use anyhow::Context;
use burn_dataset::{
    summarize_with_thresholds, ValidationOutcome, ValidationThresholds, VocLoadOptions,
};
use clap::{Args, Parser, Subcommand};
use data_contracts::LabelMap;
use detforge::{BurnBackend, PipelineConfig, PipelineError};
use inference::{InferenceFactory, InferenceThresholds};
use std::path::PathBuf;
use std::process::ExitCode;
use training::{Evaluator, TrainBackend};

#[derive(Parser, Debug)]
#[command(
    name = "detforge",
    about = "Fine-tune, evaluate and export object detectors from Pascal VOC data"
)]
struct Cli {
    /// Config file (defaults to $DETFORGE_CONFIG, then ./detforge.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Also write logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full load -> train -> evaluate -> export pipeline.
    Run(RunArgs),
    /// Summarize and validate a VOC directory pair without training.
    Inspect(InspectArgs),
    /// Evaluate an exported artifact against a VOC set.
    Eval(EvalArgs),
    /// Run an exported artifact on images and print detections as JSON.
    Detect(DetectArgs),
    /// List supported architecture ids.
    Archs,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Comma-separated class labels, in class-id order.
    #[arg(long, value_delimiter = ',')]
    labels: Option<Vec<String>>,
    #[arg(long)]
    architecture: Option<String>,
    #[arg(long)]
    pretrained_dir: Option<PathBuf>,
    /// Directory holding both training images and annotations.
    #[arg(long)]
    train_dir: Option<PathBuf>,
    /// Directory holding both validation images and annotations.
    #[arg(long)]
    val_dir: Option<PathBuf>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    train_whole_model: Option<bool>,
    #[arg(long)]
    learning_rate: Option<f64>,
    #[arg(long)]
    export_dir: Option<PathBuf>,
    /// Artifact file name, used exactly as given (conventionally `*.dfx`).
    #[arg(long)]
    export_filename: Option<String>,
    /// Fail instead of replacing an existing artifact.
    #[arg(long, default_value_t = false)]
    no_overwrite: bool,
}

#[derive(Args, Debug)]
struct InspectArgs {
    #[arg(long)]
    images: PathBuf,
    /// Defaults to the images directory.
    #[arg(long)]
    annotations: Option<PathBuf>,
    /// Comma-separated labels; defaults to the config labels.
    #[arg(long, value_delimiter = ',')]
    labels: Option<Vec<String>>,
}

#[derive(Args, Debug)]
struct EvalArgs {
    #[arg(long)]
    artifact: PathBuf,
    #[arg(long)]
    images: PathBuf,
    #[arg(long)]
    annotations: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DetectArgs {
    #[arg(long)]
    artifact: PathBuf,
    /// Minimum detection score.
    #[arg(long, default_value_t = 0.3)]
    obj_thresh: f32,
    /// NMS IoU threshold.
    #[arg(long, default_value_t = 0.5)]
    iou_thresh: f32,
    /// Images to run on.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

impl RunArgs {
    fn apply(self, cfg: &mut PipelineConfig) {
        if let Some(labels) = self.labels {
            cfg.labels = labels;
        }
        if let Some(arch) = self.architecture {
            cfg.architecture = arch;
        }
        if let Some(dir) = self.pretrained_dir {
            cfg.pretrained_dir = Some(dir);
        }
        if let Some(dir) = self.train_dir {
            cfg.train_data = detforge::DatasetSource::colocated(dir);
        }
        if let Some(dir) = self.val_dir {
            cfg.val_data = detforge::DatasetSource::colocated(dir);
        }
        if let Some(v) = self.batch_size {
            cfg.training.batch_size = v;
        }
        if let Some(v) = self.epochs {
            cfg.training.epochs = v;
        }
        if let Some(v) = self.train_whole_model {
            cfg.training.train_whole_model = v;
        }
        if let Some(v) = self.learning_rate {
            cfg.training.learning_rate = v;
        }
        if let Some(dir) = self.export_dir {
            cfg.export.dir = dir;
        }
        if let Some(name) = self.export_filename {
            cfg.export.filename = name;
        }
        if self.no_overwrite {
            cfg.export.options.overwrite = false;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let cfg = match PipelineConfig::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("detforge: {err}");
            return ExitCode::from(err.exit_code());
        }
    };
    let log_file = cli.log_file.clone().or_else(|| cfg.log_file.clone());
    if let Err(err) = detforge::logging::init(log_file.as_deref()) {
        eprintln!("detforge: logging disabled: {err}");
    }

    match cli.command {
        Command::Run(args) => run_pipeline(cfg, args),
        Command::Inspect(args) => report(inspect(&cfg, args)),
        Command::Eval(args) => report(eval_artifact(&cfg, args)),
        Command::Detect(args) => report(detect(args)),
        Command::Archs => {
            for id in models::supported_architectures() {
                if let Ok(arch) = models::architecture(id) {
                    println!("{id}\tinput={0}x{0}\tmax_boxes={1}", arch.input_size, arch.max_boxes);
                }
            }
            ExitCode::SUCCESS
        }
    }
}

fn run_pipeline(mut cfg: PipelineConfig, args: RunArgs) -> ExitCode {
    args.apply(&mut cfg);
    match detforge::run(&BurnBackend, &cfg) {
        Ok(outcome) => {
            match serde_json::to_string_pretty(&outcome.report) {
                Ok(json) => println!("{json}"),
                Err(err) => tracing::warn!("failed to serialize report: {err}"),
            }
            ExitCode::SUCCESS
        }
        Err(err) => fail(&err),
    }
}

fn fail(err: &PipelineError) -> ExitCode {
    tracing::error!(stage = %err.stage, kind = %err.kind, "{}", err.message);
    ExitCode::from(err.exit_code())
}

fn report(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn inspect(cfg: &PipelineConfig, args: InspectArgs) -> anyhow::Result<()> {
    let labels = LabelMap::new(args.labels.unwrap_or_else(|| cfg.labels.clone()))
        .context("inspect needs --labels or labels in the config")?;
    let annotations = args.annotations.unwrap_or_else(|| args.images.clone());
    let report = summarize_with_thresholds(
        &args.images,
        &annotations,
        &labels,
        &ValidationThresholds::from_env(),
    )?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.outcome == ValidationOutcome::Fail {
        anyhow::bail!("dataset validation failed: {}", report.reasons.join("; "));
    }
    Ok(())
}

fn eval_artifact(cfg: &PipelineConfig, args: EvalArgs) -> anyhow::Result<()> {
    let device = Default::default();
    let (meta, detector) = inference::load_detector::<TrainBackend>(&args.artifact, &device)
        .with_context(|| format!("loading {}", args.artifact.display()))?;
    let annotations = args.annotations.unwrap_or_else(|| args.images.clone());
    let set = burn_dataset::load_pascal_voc(
        "eval",
        &args.images,
        &annotations,
        &meta.labels,
        &VocLoadOptions::default(),
    )?;
    let report = Evaluator::new(cfg.evaluation.thresholds, cfg.evaluation.batch_size)
        .evaluate(&detector, &set)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn detect(args: DetectArgs) -> anyhow::Result<()> {
    let thresholds = InferenceThresholds {
        obj_thresh: args.obj_thresh,
        iou_thresh: args.iou_thresh,
        ..Default::default()
    };
    let factory = InferenceFactory::load(&args.artifact, thresholds)?;
    let mut out = serde_json::Map::new();
    for path in &args.images {
        let detections = factory.detect_path(path)?;
        out.insert(path.display().to_string(), serde_json::to_value(detections)?);
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
