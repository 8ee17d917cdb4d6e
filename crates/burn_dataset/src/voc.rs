//! Loading and indexing Pascal VOC datasets (images dir + annotations dir).

use crate::types::{
    BurnDatasetError, DatasetResult, DatasetSummary, LabeledBox, LabeledImageSet, LabeledSample,
    SampleIndex, VocLoadOptions,
};
use data_contracts::{LabelMap, ValidationError, VocAnnotation};
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

fn ensure_dir(path: &Path) -> DatasetResult<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(BurnDatasetError::MissingDirectory {
            path: path.to_path_buf(),
        })
    }
}

fn list_annotations(annotations_dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(annotations_dir)
        .map_err(|e| BurnDatasetError::Io {
            path: annotations_dir.to_path_buf(),
            source: e,
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Resolve the image for an annotation: the declared `<filename>` first, then `<stem>.<ext>`.
fn resolve_image(images_dir: &Path, annotation_path: &Path, declared: Option<&str>) -> Option<PathBuf> {
    if let Some(name) = declared.map(str::trim).filter(|n| !n.is_empty()) {
        let candidate = images_dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    let stem = annotation_path.file_stem()?.to_str()?;
    IMAGE_EXTENSIONS
        .iter()
        .map(|ext| images_dir.join(format!("{stem}.{ext}")))
        .find(|p| p.is_file())
}

fn read_annotation(path: &Path) -> DatasetResult<VocAnnotation> {
    let raw = fs::read_to_string(path).map_err(|e| BurnDatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    VocAnnotation::from_xml(&raw).map_err(|e| BurnDatasetError::Xml {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Check both directories exist and pair every annotation with an image, without parsing.
///
/// The image is matched by annotation stem here; `load_pascal_voc` additionally honours
/// the `<filename>` element.
pub fn index_pascal_voc(images_dir: &Path, annotations_dir: &Path) -> DatasetResult<Vec<SampleIndex>> {
    ensure_dir(images_dir)?;
    ensure_dir(annotations_dir)?;
    let indices = list_annotations(annotations_dir)?
        .into_iter()
        .map(|annotation_path| {
            let image_path = resolve_image(images_dir, &annotation_path, None);
            SampleIndex {
                annotation_path,
                image_path,
            }
        })
        .collect();
    Ok(indices)
}

fn selected(path: &Path, opts: &VocLoadOptions) -> bool {
    match &opts.annotation_filenames {
        None => true,
        Some(names) => path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|stem| names.iter().any(|n| n.trim_end_matches(".xml") == stem)),
    }
}

fn to_sample(
    annotation: &VocAnnotation,
    annotation_path: &Path,
    image_path: PathBuf,
    labels: &LabelMap,
) -> DatasetResult<LabeledSample> {
    let (width, height) = match annotation.declared_size() {
        Some(size) => size,
        None => image::image_dimensions(&image_path).map_err(|e| BurnDatasetError::Image {
            path: image_path.clone(),
            source: e,
        })?,
    };
    let boxes = annotation
        .objects
        .iter()
        .filter_map(|obj| {
            labels.index_of(&obj.name).map(|class_id| LabeledBox {
                bbox_norm: obj.bndbox.normalized(width, height),
                class_id,
                difficult: obj.is_difficult(),
            })
        })
        .collect();
    Ok(LabeledSample {
        image_path,
        annotation_path: annotation_path.to_path_buf(),
        width,
        height,
        boxes,
    })
}

/// Load a labelled image set from a Pascal VOC layout.
///
/// Annotations without a matching image are skipped. Any object whose label is not in
/// `labels` fails the whole load.
pub fn load_pascal_voc(
    name: &str,
    images_dir: &Path,
    annotations_dir: &Path,
    labels: &LabelMap,
    opts: &VocLoadOptions,
) -> DatasetResult<LabeledImageSet> {
    ensure_dir(images_dir)?;
    ensure_dir(annotations_dir)?;

    let mut samples = Vec::new();
    let mut skipped = 0usize;
    for annotation_path in list_annotations(annotations_dir)? {
        if !selected(&annotation_path, opts) {
            continue;
        }
        if opts.max_num_images.is_some_and(|max| samples.len() >= max) {
            break;
        }
        let annotation = read_annotation(&annotation_path)?;
        annotation
            .validate(labels)
            .map_err(|e| match e {
                ValidationError::UnknownLabel { label, .. } => BurnDatasetError::UnknownLabel {
                    path: annotation_path.clone(),
                    label,
                    permitted: labels.clone(),
                },
                other => BurnDatasetError::Validation {
                    path: annotation_path.clone(),
                    source: other,
                },
            })?;
        let Some(image_path) =
            resolve_image(images_dir, &annotation_path, Some(&annotation.filename))
        else {
            tracing::warn!(
                annotation = %annotation_path.display(),
                "no image found for annotation; skipping"
            );
            skipped += 1;
            continue;
        };
        samples.push(to_sample(&annotation, &annotation_path, image_path, labels)?);
    }

    tracing::info!(
        dataset = name,
        images = samples.len(),
        skipped,
        "loaded Pascal VOC dataset from {}",
        annotations_dir.display()
    );
    Ok(LabeledImageSet {
        name: name.to_string(),
        labels: labels.clone(),
        samples,
    })
}

/// Count pairs, empty/invalid annotations and boxes per label without failing on bad data.
pub fn summarize_pascal_voc(
    images_dir: &Path,
    annotations_dir: &Path,
    labels: &LabelMap,
) -> DatasetResult<DatasetSummary> {
    let indices = index_pascal_voc(images_dir, annotations_dir)?;
    let mut summary = DatasetSummary {
        annotations: indices.len(),
        ..Default::default()
    };
    let mut per_label = vec![0usize; labels.len()];
    for idx in &indices {
        let annotation = match read_annotation(&idx.annotation_path) {
            Ok(a) => a,
            Err(_) => {
                summary.invalid += 1;
                continue;
            }
        };
        match annotation.validate(labels) {
            Ok(()) => {}
            Err(ValidationError::UnknownLabel { .. }) => {
                summary.unknown_label += 1;
                continue;
            }
            Err(_) => {
                summary.invalid += 1;
                continue;
            }
        }
        if resolve_image(images_dir, &idx.annotation_path, Some(&annotation.filename)).is_none() {
            summary.missing_image += 1;
            continue;
        }
        summary.total += 1;
        if annotation.objects.is_empty() {
            summary.empty += 1;
        } else {
            summary.non_empty += 1;
        }
        for obj in &annotation.objects {
            if let Some(class_id) = labels.index_of(&obj.name) {
                per_label[class_id] += 1;
            }
        }
    }
    summary.boxes_per_label = labels.iter().map(str::to_string).zip(per_label).collect();
    Ok(summary)
}
