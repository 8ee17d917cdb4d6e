use crate::error::{PipelineError, PipelineResult};
use data_contracts::LabelMap;
use inference::{ExportConfig, ExportFormat, Precision};
use models::DecodeThresholds;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use training::TrainConfig;

pub const DEFAULT_CONFIG_NAME: &str = "detforge.toml";
pub const CONFIG_ENV: &str = "DETFORGE_CONFIG";

/// Where one labelled image set lives on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSource {
    pub images_dir: PathBuf,
    pub annotations_dir: PathBuf,
    pub max_num_images: Option<usize>,
    pub annotation_filenames: Option<Vec<String>>,
}

impl DatasetSource {
    /// Images and annotations co-located in one directory.
    pub fn colocated(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            images_dir: dir.clone(),
            annotations_dir: dir,
            max_num_images: None,
            annotation_filenames: None,
        }
    }

    pub fn load_options(&self) -> burn_dataset::VocLoadOptions {
        burn_dataset::VocLoadOptions {
            max_num_images: self.max_num_images,
            annotation_filenames: self.annotation_filenames.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportTarget {
    pub dir: PathBuf,
    pub filename: String,
    pub options: ExportConfig,
}

#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub thresholds: DecodeThresholds,
    pub batch_size: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            thresholds: DecodeThresholds::default(),
            batch_size: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Ordered class names; class id is the position.
    pub labels: Vec<String>,
    pub architecture: String,
    /// Directory holding `<architecture>.bin` backbone weights.
    pub pretrained_dir: Option<PathBuf>,
    pub train_data: DatasetSource,
    pub val_data: DatasetSource,
    pub training: TrainConfig,
    pub evaluation: EvalConfig,
    pub export: ExportTarget,
    pub log_file: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            architecture: "detector_lite0".to_string(),
            pretrained_dir: None,
            train_data: DatasetSource::colocated("data/train"),
            val_data: DatasetSource::colocated("data/validate"),
            training: TrainConfig::default(),
            evaluation: EvalConfig::default(),
            export: ExportTarget {
                dir: PathBuf::from("."),
                filename: "best.dfx".to_string(),
                options: ExportConfig::default(),
            },
            log_file: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    labels: Option<Vec<String>>,
    architecture: Option<String>,
    pretrained_dir: Option<String>,
    log_file: Option<String>,
    train_data: Option<DatasetSection>,
    val_data: Option<DatasetSection>,
    training: Option<TrainConfig>,
    evaluation: Option<EvalSection>,
    export: Option<ExportSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DatasetSection {
    /// Shorthand for images and annotations in one directory.
    dir: Option<String>,
    images_dir: Option<String>,
    annotations_dir: Option<String>,
    max_num_images: Option<usize>,
    annotation_filenames: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EvalSection {
    score_thresh: Option<f32>,
    nms_iou: Option<f32>,
    max_detections: Option<usize>,
    batch_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ExportSection {
    dir: Option<String>,
    filename: Option<String>,
    precision: Option<Precision>,
    overwrite: Option<bool>,
    formats: Option<Vec<ExportFormat>>,
}

impl PipelineConfig {
    /// Load from `explicit`, then `$DETFORGE_CONFIG`, then `./detforge.toml`.
    ///
    /// A missing default file yields the defaults; a missing explicit or env
    /// path is an error.
    pub fn load(explicit: Option<&Path>) -> PipelineResult<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_path(Path::new(&path));
        }
        let default = Path::new(DEFAULT_CONFIG_NAME);
        if default.exists() {
            return Self::from_path(default);
        }
        tracing::debug!("no {DEFAULT_CONFIG_NAME} found; using built-in defaults");
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
            .map_err(|e| PipelineError::config(format!("{}: {}", path.display(), e.message)))
    }

    pub fn from_toml_str(raw: &str) -> PipelineResult<Self> {
        let file: PipelineConfigFile = toml::from_str(raw)
            .map_err(|e| PipelineError::config(format!("invalid config: {e}")))?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let defaults = Self::default();
        let export_defaults = ExportConfig::default();
        let eval_defaults = EvalConfig::default();
        let evaluation = file.evaluation.unwrap_or_default();
        let export = file.export.unwrap_or_default();

        PipelineConfig {
            labels: file.labels.unwrap_or(defaults.labels),
            architecture: file
                .architecture
                .filter(|a| !a.trim().is_empty())
                .unwrap_or(defaults.architecture),
            pretrained_dir: file.pretrained_dir.map(|v| expand_path(&v)),
            train_data: file
                .train_data
                .map(|s| s.resolve(&defaults.train_data))
                .unwrap_or(defaults.train_data),
            val_data: file
                .val_data
                .map(|s| s.resolve(&defaults.val_data))
                .unwrap_or(defaults.val_data),
            training: file.training.unwrap_or(defaults.training),
            evaluation: EvalConfig {
                thresholds: DecodeThresholds {
                    score_thresh: evaluation
                        .score_thresh
                        .unwrap_or(eval_defaults.thresholds.score_thresh),
                    nms_iou: evaluation.nms_iou.unwrap_or(eval_defaults.thresholds.nms_iou),
                    max_detections: evaluation
                        .max_detections
                        .unwrap_or(eval_defaults.thresholds.max_detections),
                },
                batch_size: evaluation.batch_size.unwrap_or(eval_defaults.batch_size),
            },
            export: ExportTarget {
                dir: export
                    .dir
                    .map(|v| expand_path(&v))
                    .unwrap_or(defaults.export.dir),
                filename: export.filename.unwrap_or(defaults.export.filename),
                options: ExportConfig {
                    precision: export.precision.unwrap_or(export_defaults.precision),
                    overwrite: export.overwrite.unwrap_or(export_defaults.overwrite),
                    formats: export.formats.unwrap_or(export_defaults.formats),
                },
            },
            log_file: file.log_file.map(|v| expand_path(&v)),
        }
    }

    /// Cheap checks that run before any dataset or model work.
    pub fn validate(&self) -> PipelineResult<LabelMap> {
        let labels = LabelMap::new(self.labels.iter().cloned())
            .map_err(|e| PipelineError::config(format!("labels: {e}")))?;
        self.training
            .validate()
            .map_err(|e| PipelineError::config(e.to_string()))?;
        if self.architecture.trim().is_empty() {
            return Err(PipelineError::config("architecture must not be empty"));
        }
        if self.export.filename.trim().is_empty() {
            return Err(PipelineError::config("export filename must not be empty"));
        }
        if self.export.options.formats.is_empty() {
            return Err(PipelineError::config("export formats must not be empty"));
        }
        if self.evaluation.batch_size == 0 {
            return Err(PipelineError::config("evaluation batch_size must be greater than 0"));
        }
        Ok(labels)
    }
}

impl DatasetSection {
    fn resolve(self, fallback: &DatasetSource) -> DatasetSource {
        let dir = self.dir.map(|v| expand_path(&v));
        let images_dir = self
            .images_dir
            .map(|v| expand_path(&v))
            .or_else(|| dir.clone())
            .unwrap_or_else(|| fallback.images_dir.clone());
        let annotations_dir = self
            .annotations_dir
            .map(|v| expand_path(&v))
            .or(dir)
            .unwrap_or_else(|| fallback.annotations_dir.clone());
        DatasetSource {
            images_dir,
            annotations_dir,
            max_num_images: self.max_num_images,
            annotation_filenames: self.annotation_filenames,
        }
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

/// Replace `${VAR}` with its value; unknown variables are left as written.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_file() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            labels = ["helmet", "safety-jacket"]
            architecture = "detector_lite1"

            [train_data]
            dir = "freedomtech/train"

            [val_data]
            images_dir = "freedomtech/validate/images"
            annotations_dir = "freedomtech/validate/xml"
            max_num_images = 2

            [training]
            batch_size = 4
            train_whole_model = true
            epochs = 100

            [evaluation]
            score_thresh = 0.1

            [export]
            dir = "out"
            filename = "best.dfx"
            overwrite = false
            precision = "full"
            formats = ["artifact", "labels"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.labels, vec!["helmet", "safety-jacket"]);
        assert_eq!(cfg.architecture, "detector_lite1");
        assert_eq!(cfg.train_data, DatasetSource::colocated("freedomtech/train"));
        assert_eq!(cfg.val_data.annotations_dir, PathBuf::from("freedomtech/validate/xml"));
        assert_eq!(cfg.val_data.max_num_images, Some(2));
        assert_eq!(cfg.training.batch_size, 4);
        assert!(cfg.training.train_whole_model);
        assert_eq!(cfg.training.epochs, 100);
        // Unset training fields keep their defaults.
        assert_eq!(cfg.training.seed, TrainConfig::default().seed);
        assert_eq!(cfg.evaluation.thresholds.score_thresh, 0.1);
        assert_eq!(cfg.evaluation.thresholds.nms_iou, 0.5);
        assert_eq!(cfg.export.dir, PathBuf::from("out"));
        assert!(!cfg.export.options.overwrite);
        assert_eq!(cfg.export.options.precision, Precision::Full);
        assert_eq!(
            cfg.export.options.formats,
            vec![ExportFormat::Artifact, ExportFormat::Labels]
        );
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_configuration_errors() {
        let err = PipelineConfig::from_toml_str("epochz = 3").unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Configuration);

        for nested in [
            "labels = [\"helmet\"]\n[training]\nepoch = 0\nbatchsize = 0",
            "labels = [\"helmet\"]\n[evaluation]\nscore = 0.2",
            "labels = [\"helmet\"]\n[export]\nprecison = \"full\"",
        ] {
            let err = PipelineConfig::from_toml_str(nested).unwrap_err();
            assert_eq!(err.kind, crate::ErrorKind::Configuration, "{nested}");
        }
    }

    #[test]
    fn empty_labels_fail_validation() {
        let err = PipelineConfig::default().validate().unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Configuration);
        assert!(err.message.contains("labels"));
    }

    #[test]
    fn zero_epochs_fail_validation() {
        let mut cfg = PipelineConfig {
            labels: vec!["helmet".into()],
            ..Default::default()
        };
        cfg.training.epochs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn expands_env_placeholders() {
        std::env::set_var("DETFORGE_TEST_ROOT", "/data/sets");
        assert_eq!(
            expand_path("${DETFORGE_TEST_ROOT}/train"),
            PathBuf::from("/data/sets/train")
        );
        assert_eq!(
            expand_path("${DETFORGE_UNSET_VAR_XYZ}/train"),
            PathBuf::from("${DETFORGE_UNSET_VAR_XYZ}/train")
        );
    }
}
