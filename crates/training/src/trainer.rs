use crate::error::{TrainingError, TrainingResult};
use crate::targets::{detection_loss, scalar, LossWeights};
use crate::{ADBackend, TrainBackend};
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::Backend;
use burn_dataset::{BatchIter, LabeledImageSet, TransformPipeline};
use models::{ArchitectureSpec, Backbone, ModelSpec, TrainedDetector};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use sysinfo::System;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    pub batch_size: usize,
    /// When false only the neck and heads are updated.
    pub train_whole_model: bool,
    pub epochs: usize,
    pub learning_rate: f64,
    pub lambda_box: f32,
    pub lambda_obj: f32,
    pub lambda_cls: f32,
    pub seed: u64,
    pub flip_horizontal_prob: f32,
    /// Chance of a random brightness/contrast shift per training image.
    pub color_jitter_prob: f32,
    /// Maximum relative brightness and contrast change.
    pub color_jitter_strength: f32,
    /// Upper bound for the estimated per-step footprint; None uses available system memory.
    pub memory_budget_bytes: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            train_whole_model: false,
            epochs: 50,
            learning_rate: 1e-3,
            lambda_box: 5.0,
            lambda_obj: 1.0,
            lambda_cls: 1.0,
            seed: 42,
            flip_horizontal_prob: 0.5,
            color_jitter_prob: 0.0,
            color_jitter_strength: 0.2,
            memory_budget_bytes: None,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> TrainingResult<()> {
        let invalid = |msg: String| Err(TrainingError::InvalidConfiguration(msg));
        if self.batch_size == 0 {
            return invalid("batch_size must be greater than 0".into());
        }
        if self.epochs == 0 {
            return invalid("epochs must be greater than 0".into());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            ));
        }
        for (name, value) in [
            ("lambda_box", self.lambda_box),
            ("lambda_obj", self.lambda_obj),
            ("lambda_cls", self.lambda_cls),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{name} must be non-negative, got {value}"));
            }
        }
        for (name, value) in [
            ("flip_horizontal_prob", self.flip_horizontal_prob),
            ("color_jitter_prob", self.color_jitter_prob),
            ("color_jitter_strength", self.color_jitter_strength),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        Ok(())
    }

    fn loss_weights(&self) -> LossWeights {
        LossWeights {
            lambda_box: self.lambda_box,
            lambda_obj: self.lambda_obj,
            lambda_cls: self.lambda_cls,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: Option<f32>,
}

pub struct TrainOutcome {
    pub model: TrainedDetector<TrainBackend>,
    pub history: Vec<EpochStats>,
}

pub struct Trainer {
    cfg: TrainConfig,
}

impl Trainer {
    pub fn new(cfg: TrainConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &TrainConfig {
        &self.cfg
    }

    /// Fine-tune `spec` on `train`, computing validation loss on `val` after each epoch.
    pub fn train(
        &self,
        train: &LabeledImageSet,
        spec: &ModelSpec,
        val: Option<&LabeledImageSet>,
    ) -> TrainingResult<TrainOutcome> {
        self.cfg.validate()?;
        if train.is_empty() {
            return Err(TrainingError::InvalidConfiguration(format!(
                "training set {:?} contains no samples",
                train.name
            )));
        }
        if let Some(val) = val {
            if val.labels != train.labels {
                return Err(TrainingError::LabelMismatch {
                    expected: train.labels.clone(),
                    found: val.labels.clone(),
                });
            }
        }

        let estimate = estimate_step_bytes(
            &spec.architecture,
            train.labels.len(),
            self.cfg.batch_size,
        );
        let budget = self.cfg.memory_budget_bytes.unwrap_or_else(available_memory);
        tracing::debug!(estimate, budget, "training memory estimate");
        if estimate > budget {
            return Err(TrainingError::ResourceExhausted(format!(
                "estimated {} MiB per step for {} at batch size {}, budget is {} MiB",
                estimate >> 20,
                spec.architecture.id,
                self.cfg.batch_size,
                budget >> 20
            )));
        }

        match panic::catch_unwind(AssertUnwindSafe(|| self.run(train, spec, val))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(%msg, "training aborted by backend panic");
                Err(classify_panic(msg))
            }
        }
    }

    fn run(
        &self,
        train: &LabeledImageSet,
        spec: &ModelSpec,
        val: Option<&LabeledImageSet>,
    ) -> TrainingResult<TrainOutcome> {
        let cfg = &self.cfg;
        let arch = &spec.architecture;
        let device = <ADBackend as Backend>::Device::default();
        ADBackend::seed(cfg.seed);

        let init = TrainedDetector::<ADBackend>::init(arch.clone(), train.labels.clone(), &device);
        let mut model = init.model;
        if let Some(path) = &spec.pretrained_backbone {
            let backbone = Backbone::<ADBackend>::new(&arch.channels, &device)
                .load_pretrained(path, &device)?;
            model = model.with_backbone(backbone);
            tracing::info!(path = %path.display(), "loaded pretrained backbone");
        }
        if !cfg.train_whole_model {
            model = model.freeze_backbone();
        }

        let size = arch.input_size;
        let train_pipeline = TransformPipeline {
            target_size: (size, size),
            flip_horizontal_prob: cfg.flip_horizontal_prob,
            color_jitter_prob: cfg.color_jitter_prob,
            color_jitter_strength: cfg.color_jitter_strength,
            max_boxes: arch.max_boxes,
            seed: Some(cfg.seed),
        };
        let eval_pipeline = TransformPipeline::inference((size, size), arch.max_boxes);
        let weights = cfg.loss_weights();

        tracing::info!(
            architecture = %arch.id,
            train_images = train.len(),
            val_images = val.map(|v| v.len()).unwrap_or(0),
            epochs = cfg.epochs,
            batch_size = cfg.batch_size,
            train_whole_model = cfg.train_whole_model,
            "starting training; {}",
            train_pipeline.describe()
        );

        let mut optim = AdamConfig::new().init();
        let mut history = Vec::with_capacity(cfg.epochs);
        for epoch in 0..cfg.epochs {
            let mut losses = Vec::new();
            let mut iter = BatchIter::new(
                train,
                cfg.batch_size,
                train_pipeline.clone(),
                Some(cfg.seed),
                epoch as u64,
            );
            tracing::debug!(epoch, batches = iter.batches_per_epoch(), "epoch started");
            while let Some(batch) = iter.next_batch::<ADBackend>(&device)? {
                let loss = detection_loss(&model, &batch, &weights)?;
                let loss_detached = loss.clone().detach();
                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(cfg.learning_rate, model, grads);
                losses.push(scalar(loss_detached)?);
            }
            let train_loss = mean(&losses);

            let val_loss = match val {
                Some(val) if !val.is_empty() => {
                    let valid = model.valid();
                    let mut val_losses = Vec::new();
                    let mut iter =
                        BatchIter::new(val, cfg.batch_size, eval_pipeline.clone(), None, 0);
                    while let Some(batch) = iter.next_batch::<TrainBackend>(&device)? {
                        val_losses.push(scalar(detection_loss(&valid, &batch, &weights)?)?);
                    }
                    Some(mean(&val_losses))
                }
                _ => None,
            };

            match val_loss {
                Some(v) => tracing::info!(epoch, train_loss, val_loss = v, "epoch finished"),
                None => tracing::info!(epoch, train_loss, "epoch finished"),
            }
            history.push(EpochStats {
                epoch,
                train_loss,
                val_loss,
            });
        }

        Ok(TrainOutcome {
            model: TrainedDetector {
                architecture: arch.clone(),
                labels: train.labels.clone(),
                model: model.valid(),
            },
            history,
        })
    }
}

const ALLOCATION_MARKERS: [&str; 5] = [
    "out of memory",
    "outofmemory",
    "memory allocation",
    "allocation failed",
    "capacity overflow",
];

/// Allocation failures are resource exhaustion; any other panic is a backend fault.
fn classify_panic(msg: String) -> TrainingError {
    let lower = msg.to_ascii_lowercase();
    if ALLOCATION_MARKERS.iter().any(|m| lower.contains(m)) {
        TrainingError::ResourceExhausted(format!("training aborted: {msg}"))
    } else {
        TrainingError::BackendPanic(msg)
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

fn available_memory() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory()
}

/// Rough f32 footprint of one optimizer step: weights, gradients and two Adam
/// moments, plus forward activations kept for backprop (counted twice for their gradients).
pub fn estimate_step_bytes(arch: &ArchitectureSpec, num_classes: usize, batch_size: usize) -> u64 {
    let mut params = 0u64;
    let mut activations = 0u64;
    let mut c_in = 3u64;
    let mut side = arch.input_size as u64;
    activations += batch_size as u64 * c_in * side * side;
    for &c in &arch.channels {
        let c = c as u64;
        params += c_in * c * 9 + c;
        side = side.div_ceil(2);
        activations += batch_size as u64 * c * side * side;
        c_in = c;
    }
    let hidden = arch.head_hidden as u64;
    let per_slot = 4 + 1 + num_classes as u64;
    params += c_in * 2 * hidden + hidden;
    params += hidden * arch.max_boxes as u64 * per_slot + arch.max_boxes as u64 * per_slot;
    activations += batch_size as u64 * (hidden + arch.max_boxes as u64 * per_slot);

    (params * 4 + activations * 2) * std::mem::size_of::<f32>() as u64
}
