//! Dataset validation and quality checks.

use crate::types::{
    DatasetResult, DatasetSummary, ValidationOutcome, ValidationReport, ValidationThresholds,
};
use crate::voc::summarize_pascal_voc;
use data_contracts::LabelMap;
use std::path::Path;

fn apply_thresholds(
    label: &str,
    count: usize,
    ratio: f32,
    max_count: Option<usize>,
    max_ratio: Option<f32>,
    outcome: &mut ValidationOutcome,
    reasons: &mut Vec<String>,
) {
    if let Some(max) = max_count {
        if count > max {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!("{label}: {count} exceeds max {max}"));
        }
    }
    if let Some(max_r) = max_ratio {
        if ratio > max_r {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!(
                "{label}: ratio {:.3} exceeds max {:.3}",
                ratio, max_r
            ));
        }
    }
    if count > 0 {
        if *outcome == ValidationOutcome::Pass {
            *outcome = ValidationOutcome::Warn;
        }
        reasons.push(format!("{label}: {count} observed"));
    }
}

pub fn validate_summary(
    summary: DatasetSummary,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    let denom = summary.annotations.max(1) as f32;

    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();

    // Unknown labels abort loading outright, so no threshold can excuse them.
    if summary.unknown_label > 0 {
        outcome = ValidationOutcome::Fail;
        reasons.push(format!(
            "unknown labels: {} annotation(s) reference undeclared labels",
            summary.unknown_label
        ));
    }
    if summary.total == 0 {
        outcome = ValidationOutcome::Fail;
        reasons.push("no usable (image, annotation) pairs".to_string());
    }

    apply_thresholds(
        "missing images",
        summary.missing_image,
        summary.missing_image as f32 / denom,
        thresholds.max_missing,
        thresholds.max_missing_ratio,
        &mut outcome,
        &mut reasons,
    );
    apply_thresholds(
        "invalid annotations",
        summary.invalid,
        summary.invalid as f32 / denom,
        thresholds.max_invalid,
        thresholds.max_invalid_ratio,
        &mut outcome,
        &mut reasons,
    );
    apply_thresholds(
        "empty annotations",
        summary.empty,
        summary.empty as f32 / denom,
        thresholds.max_empty,
        thresholds.max_empty_ratio,
        &mut outcome,
        &mut reasons,
    );

    ValidationReport {
        outcome,
        reasons,
        summary,
    }
}

pub fn summarize_with_thresholds(
    images_dir: &Path,
    annotations_dir: &Path,
    labels: &LabelMap,
    thresholds: &ValidationThresholds,
) -> DatasetResult<ValidationReport> {
    let summary = summarize_pascal_voc(images_dir, annotations_dir, labels)?;
    Ok(validate_summary(summary, thresholds))
}
