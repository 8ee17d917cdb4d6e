//! The `.dfx` inference artifact.
//!
//! Layout (all integers little endian):
//!
//! ```text
//! b"DFXA" | u16 version | u16 reserved | u32 metadata_len | metadata JSON
//!         | u64 weights_len | weights (burn BinBytesRecorder payload)
//! ```
//!
//! The metadata carries the architecture, labels, precision, input spec and
//! the SHA-256 of the weights so a reader can rebuild and verify the detector.

use crate::error::{InferenceError, InferenceResult};
use burn::module::Module;
use burn::record::{
    BinBytesRecorder, BinFileRecorder, FullPrecisionSettings, HalfPrecisionSettings, Recorder,
};
use burn::tensor::backend::Backend;
use data_contracts::LabelMap;
use models::{ArchitectureSpec, ConvDetector, ConvDetectorConfig, TrainedDetector};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const MAGIC: &[u8; 4] = b"DFXA";
pub const FORMAT_VERSION: u16 = 1;
pub const LABELS_FILENAME: &str = "labels.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// The `.dfx` artifact.
    Artifact,
    /// `labels.txt`, one label per line in class-id order.
    Labels,
    /// Full precision burn record of the detector.
    Checkpoint,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// f16 weights.
    #[default]
    Half,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub precision: Precision,
    /// Replace an existing artifact (with a warning) instead of failing.
    pub overwrite: bool,
    pub formats: Vec<ExportFormat>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            precision: Precision::Half,
            overwrite: true,
            formats: vec![ExportFormat::Artifact],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Pixel values are divided by 255 into [0, 1]; layout is CHW.
    pub normalization: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub name: String,
    pub architecture: ArchitectureSpec,
    pub labels: LabelMap,
    pub precision: Precision,
    pub input: InputSpec,
    pub weights_sha256: String,
    pub exporter: String,
    pub created_unix_secs: u64,
}

/// Paths written by one export call.
#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    pub artifact: Option<PathBuf>,
    pub labels: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> InferenceError + '_ {
    move |source| InferenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// The artifact is written under exactly `filename`; `.dfx` is a convention, not enforced.
pub fn artifact_path(export_dir: &Path, filename: &str) -> PathBuf {
    export_dir.join(filename)
}

fn encode_weights<B: Backend>(
    model: &ConvDetector<B>,
    precision: Precision,
) -> InferenceResult<Vec<u8>> {
    let record = model.clone().into_record();
    let bytes = match precision {
        Precision::Half => BinBytesRecorder::<HalfPrecisionSettings>::default().record(record, ()),
        Precision::Full => BinBytesRecorder::<FullPrecisionSettings>::default().record(record, ()),
    };
    bytes.map_err(|e| InferenceError::Record(e.to_string()))
}

/// Serialize `detector` into the artifact byte layout.
pub fn encode_artifact<B: Backend>(
    detector: &TrainedDetector<B>,
    name: &str,
    precision: Precision,
) -> InferenceResult<(ArtifactMetadata, Vec<u8>)> {
    let weights = encode_weights(&detector.model, precision)?;
    let (width, height) = detector.input_size();
    let created_unix_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let metadata = ArtifactMetadata {
        name: name.to_string(),
        architecture: detector.architecture.clone(),
        labels: detector.labels.clone(),
        precision,
        input: InputSpec {
            width,
            height,
            channels: 3,
            normalization: "rgb_chw_div255".to_string(),
        },
        weights_sha256: sha256_hex(&weights),
        exporter: concat!("detforge-inference ", env!("CARGO_PKG_VERSION")).to_string(),
        created_unix_secs,
    };
    let meta_json = serde_json::to_vec(&metadata)?;
    let meta_len = u32::try_from(meta_json.len())
        .map_err(|_| InferenceError::Format("metadata exceeds u32 length".into()))?;

    let mut out = Vec::with_capacity(4 + 2 + 2 + 4 + meta_json.len() + 8 + weights.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&meta_len.to_le_bytes());
    out.extend_from_slice(&meta_json);
    out.extend_from_slice(&(weights.len() as u64).to_le_bytes());
    out.extend_from_slice(&weights);
    Ok((metadata, out))
}

fn take<'a>(bytes: &'a [u8], cursor: &mut usize, n: usize) -> InferenceResult<&'a [u8]> {
    let end = cursor
        .checked_add(n)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| InferenceError::Format("artifact is truncated".into()))?;
    let slice = &bytes[*cursor..end];
    *cursor = end;
    Ok(slice)
}

/// Parse and verify an artifact: magic, version and weights checksum.
pub fn decode_artifact(bytes: &[u8]) -> InferenceResult<(ArtifactMetadata, Vec<u8>)> {
    let mut cursor = 0usize;
    if take(bytes, &mut cursor, 4)? != MAGIC {
        return Err(InferenceError::Format("not a detforge artifact (bad magic)".into()));
    }
    let version = take(bytes, &mut cursor, 2)?;
    let version = u16::from_le_bytes([version[0], version[1]]);
    if version != FORMAT_VERSION {
        return Err(InferenceError::Format(format!(
            "unsupported artifact version {version}, expected {FORMAT_VERSION}"
        )));
    }
    take(bytes, &mut cursor, 2)?;
    let meta_len = take(bytes, &mut cursor, 4)?;
    let meta_len = u32::from_le_bytes([meta_len[0], meta_len[1], meta_len[2], meta_len[3]]) as usize;
    let metadata: ArtifactMetadata = serde_json::from_slice(take(bytes, &mut cursor, meta_len)?)?;

    let mut len_buf = [0u8; 8];
    len_buf.copy_from_slice(take(bytes, &mut cursor, 8)?);
    let weights_len = usize::try_from(u64::from_le_bytes(len_buf))
        .map_err(|_| InferenceError::Format("weights length overflows usize".into()))?;
    let weights = take(bytes, &mut cursor, weights_len)?.to_vec();

    let actual = sha256_hex(&weights);
    if actual != metadata.weights_sha256 {
        return Err(InferenceError::Checksum {
            expected: metadata.weights_sha256.clone(),
            actual,
        });
    }
    Ok((metadata, weights))
}

pub fn read_artifact(path: &Path) -> InferenceResult<(ArtifactMetadata, Vec<u8>)> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    decode_artifact(&bytes)
}

/// Rebuild a detector from artifact bytes on `device`.
pub fn detector_from_artifact<B: Backend>(
    metadata: &ArtifactMetadata,
    weights: Vec<u8>,
    device: &B::Device,
) -> InferenceResult<TrainedDetector<B>> {
    let cfg = ConvDetectorConfig::from_architecture(&metadata.architecture, metadata.labels.len());
    let model = ConvDetector::<B>::new(cfg, device);
    let record = match metadata.precision {
        Precision::Half => BinBytesRecorder::<HalfPrecisionSettings>::default().load(weights, device),
        Precision::Full => BinBytesRecorder::<FullPrecisionSettings>::default().load(weights, device),
    }
    .map_err(|e| InferenceError::Record(e.to_string()))?;
    Ok(TrainedDetector {
        architecture: metadata.architecture.clone(),
        labels: metadata.labels.clone(),
        model: model.load_record(record),
    })
}

pub fn load_detector<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> InferenceResult<(ArtifactMetadata, TrainedDetector<B>)> {
    let (metadata, weights) = read_artifact(path)?;
    let detector = detector_from_artifact(&metadata, weights, device)?;
    Ok((metadata, detector))
}

/// Write `bytes` to `target` through a temp file in the same directory.
fn write_atomic(target: &Path, bytes: &[u8]) -> InferenceResult<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{file_name}.tmp"));
    let result = (|| {
        let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(bytes).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
        fs::rename(&tmp, target).map_err(io_err(target))
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Export `detector` into `export_dir` in each requested format.
pub fn export_artifact<B: Backend>(
    detector: &TrainedDetector<B>,
    export_dir: &Path,
    filename: &str,
    cfg: &ExportConfig,
) -> InferenceResult<ExportSummary> {
    if filename.trim().is_empty() {
        return Err(InferenceError::Format("export filename is empty".into()));
    }
    fs::create_dir_all(export_dir).map_err(io_err(export_dir))?;

    let artifact = artifact_path(export_dir, filename);
    let stem = artifact
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    let mut summary = ExportSummary::default();

    for format in &cfg.formats {
        match format {
            ExportFormat::Artifact => {
                if artifact.exists() {
                    if !cfg.overwrite {
                        return Err(InferenceError::ArtifactExists { path: artifact });
                    }
                    tracing::warn!(path = %artifact.display(), "overwriting existing artifact");
                }
                let (metadata, bytes) = encode_artifact(detector, &stem, cfg.precision)?;
                write_atomic(&artifact, &bytes)?;
                tracing::info!(
                    path = %artifact.display(),
                    bytes = bytes.len(),
                    precision = ?metadata.precision,
                    sha256 = %metadata.weights_sha256,
                    "wrote artifact"
                );
                summary.artifact = Some(artifact.clone());
            }
            ExportFormat::Labels => {
                let path = export_dir.join(LABELS_FILENAME);
                let mut text = detector.labels.as_slice().join("\n");
                text.push('\n');
                write_atomic(&path, text.as_bytes())?;
                summary.labels = Some(path);
            }
            ExportFormat::Checkpoint => {
                let path = export_dir.join(format!("{stem}_checkpoint.bin"));
                detector
                    .model
                    .clone()
                    .save_file(path.clone(), &BinFileRecorder::<FullPrecisionSettings>::new())
                    .map_err(|e| InferenceError::Record(e.to_string()))?;
                tracing::info!(path = %path.display(), "wrote checkpoint");
                summary.checkpoint = Some(path);
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn detector() -> TrainedDetector<TestBackend> {
        let arch = models::architecture("detector_lite0").unwrap();
        let labels = LabelMap::new(["helmet", "safety-jacket"]).unwrap();
        TrainedDetector::init(arch, labels, &Default::default())
    }

    #[test]
    fn header_layout() {
        let (meta, bytes) = encode_artifact(&detector(), "model", Precision::Half).unwrap();
        assert_eq!(&bytes[..4], MAGIC);
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), FORMAT_VERSION);
        let meta_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let parsed: ArtifactMetadata = serde_json::from_slice(&bytes[12..12 + meta_len]).unwrap();
        assert_eq!(parsed, meta);
        assert_eq!(meta.input.width, 64);
        assert_eq!(meta.weights_sha256.len(), 64);
    }

    #[test]
    fn half_precision_is_smaller_than_full() {
        let det = detector();
        let (_, half) = encode_artifact(&det, "m", Precision::Half).unwrap();
        let (_, full) = encode_artifact(&det, "m", Precision::Full).unwrap();
        assert!(half.len() < full.len());
    }

    #[test]
    fn corrupted_weights_fail_checksum() {
        let (_, mut bytes) = encode_artifact(&detector(), "model", Precision::Full).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            decode_artifact(&bytes),
            Err(InferenceError::Checksum { .. })
        ));
    }

    #[test]
    fn rejects_foreign_and_truncated_files() {
        assert!(matches!(
            decode_artifact(b"PK\x03\x04rest"),
            Err(InferenceError::Format(_))
        ));
        let (_, bytes) = encode_artifact(&detector(), "model", Precision::Half).unwrap();
        assert!(matches!(
            decode_artifact(&bytes[..bytes.len() / 2]),
            Err(InferenceError::Format(_))
        ));
    }

    #[test]
    fn artifact_filename_is_used_verbatim() {
        let dir = Path::new("/tmp/out");
        assert_eq!(artifact_path(dir, "model"), dir.join("model"));
        assert_eq!(artifact_path(dir, "best.tflite"), dir.join("best.tflite"));
        assert_eq!(artifact_path(dir, "model.dfx"), dir.join("model.dfx"));
    }
}
