//! Integration tests for Pascal VOC loading and batching.

use burn::backend::NdArray;
use burn_dataset::{
    index_pascal_voc, load_pascal_voc, summarize_with_thresholds, BatchIter, BurnDatasetError,
    TransformPipeline, ValidationOutcome, ValidationThresholds, VocLoadOptions,
};
use data_contracts::LabelMap;
use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;

fn labels() -> LabelMap {
    LabelMap::new(["helmet", "safety-jacket"]).unwrap()
}

fn write_image(dir: &Path, name: &str, shade: u8) -> anyhow::Result<()> {
    let img = RgbImage::from_pixel(16, 12, Rgb([shade, 128, 200]));
    img.save(dir.join(name))?;
    Ok(())
}

fn write_annotation(dir: &Path, stem: &str, image: &str, objects: &[(&str, [u32; 4])]) -> anyhow::Result<()> {
    let mut xml = format!(
        "<annotation><folder>set</folder><filename>{image}</filename>\
         <size><width>16</width><height>12</height><depth>3</depth></size>"
    );
    for (name, b) in objects {
        xml.push_str(&format!(
            "<object><name>{name}</name><difficult>0</difficult><bndbox>\
             <xmin>{}</xmin><ymin>{}</ymin><xmax>{}</xmax><ymax>{}</ymax></bndbox></object>",
            b[0], b[1], b[2], b[3]
        ));
    }
    xml.push_str("</annotation>");
    fs::write(dir.join(format!("{stem}.xml")), xml)?;
    Ok(())
}

/// Images and annotations co-located in one directory, the way VOC exports usually ship.
fn synthetic_set(root: &Path, count: usize) -> anyhow::Result<()> {
    fs::create_dir_all(root)?;
    for i in 0..count {
        let stem = format!("img_{i:03}");
        write_image(root, &format!("{stem}.png"), (i * 20) as u8)?;
        write_annotation(
            root,
            &stem,
            &format!("{stem}.png"),
            &[("helmet", [1, 1, 6, 5]), ("safety-jacket", [4, 3, 15, 11])],
        )?;
    }
    Ok(())
}

#[test]
fn image_count_equals_matched_pairs() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("train");
    synthetic_set(&root, 4)?;
    // Annotation with no image on disk is skipped, not fatal.
    write_annotation(&root, "orphan", "orphan.png", &[("helmet", [1, 1, 4, 4])])?;
    // Image with no annotation is ignored.
    write_image(&root, "unlabelled.png", 0)?;

    let set = load_pascal_voc("train", &root, &root, &labels(), &VocLoadOptions::default())?;
    assert_eq!(set.len(), 4);
    assert_eq!(set.box_count(), 8);
    assert_eq!(set.label_counts(), vec![4, 4]);
    let first = &set.samples[0];
    assert_eq!((first.width, first.height), (16, 12));
    assert_eq!(first.boxes[1].class_id, 1);
    assert!((first.boxes[0].bbox_norm[2] - 6.0 / 16.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn unknown_label_is_a_data_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("val");
    synthetic_set(&root, 2)?;
    write_image(&root, "bad.png", 10)?;
    write_annotation(&root, "bad", "bad.png", &[("person", [1, 1, 4, 4])])?;

    let err = load_pascal_voc("val", &root, &root, &labels(), &VocLoadOptions::default())
        .unwrap_err();
    match err {
        BurnDatasetError::UnknownLabel { label, path, .. } => {
            assert_eq!(label, "person");
            assert!(path.ends_with("bad.xml"));
        }
        other => panic!("expected UnknownLabel, got {other:?}"),
    }
    Ok(())
}

#[test]
fn missing_directory_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("nope");
    let err = index_pascal_voc(&missing, tmp.path()).unwrap_err();
    assert!(matches!(err, BurnDatasetError::MissingDirectory { .. }));
}

#[test]
fn separate_dirs_and_declared_filename_are_honoured() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let images = tmp.path().join("images");
    let annotations = tmp.path().join("annotations");
    fs::create_dir_all(&images)?;
    fs::create_dir_all(&annotations)?;
    write_image(&images, "camera_17.png", 50)?;
    write_annotation(&annotations, "frame_a", "camera_17.png", &[("helmet", [2, 2, 8, 8])])?;

    let set = load_pascal_voc("train", &images, &annotations, &labels(), &VocLoadOptions::default())?;
    assert_eq!(set.len(), 1);
    assert!(set.samples[0].image_path.ends_with("camera_17.png"));
    Ok(())
}

#[test]
fn load_options_limit_and_select() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("train");
    synthetic_set(&root, 5)?;

    let capped = load_pascal_voc(
        "train",
        &root,
        &root,
        &labels(),
        &VocLoadOptions {
            max_num_images: Some(3),
            ..Default::default()
        },
    )?;
    assert_eq!(capped.len(), 3);

    let picked = load_pascal_voc(
        "train",
        &root,
        &root,
        &labels(),
        &VocLoadOptions {
            annotation_filenames: Some(vec!["img_001".into(), "img_004.xml".into()]),
            ..Default::default()
        },
    )?;
    assert_eq!(picked.len(), 2);

    let (head, tail) = capped.split(0.67);
    assert_eq!(head.len() + tail.len(), 3);
    assert_eq!(head.len(), 2);
    Ok(())
}

#[test]
fn summary_flags_unknown_labels() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("train");
    synthetic_set(&root, 3)?;
    write_image(&root, "bad.png", 10)?;
    write_annotation(&root, "bad", "bad.png", &[("person", [1, 1, 4, 4])])?;

    let report =
        summarize_with_thresholds(&root, &root, &labels(), &ValidationThresholds::default())?;
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.unknown_label, 1);
    assert_eq!(report.outcome, ValidationOutcome::Fail);
    Ok(())
}

#[test]
fn batches_cover_the_set_with_padded_boxes() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("train");
    synthetic_set(&root, 5)?;
    let set = load_pascal_voc("train", &root, &root, &labels(), &VocLoadOptions::default())?;

    let device = Default::default();
    let mut iter = BatchIter::new(&set, 2, TransformPipeline::inference((8, 8), 4), Some(1), 0);
    assert_eq!(iter.batches_per_epoch(), 3);
    let mut seen = 0;
    while let Some(batch) = iter.next_batch::<NdArray<f32>>(&device)? {
        let dims = batch.images.dims();
        assert_eq!(&dims[1..], &[3, 8, 8]);
        assert_eq!(batch.boxes.dims()[1..], [4, 4]);
        let mask = batch.box_mask.into_data().to_vec::<f32>().unwrap();
        // Two populated slots out of four per sample.
        assert_eq!(mask.iter().filter(|v| **v > 0.5).count(), dims[0] * 2);
        seen += dims[0];
    }
    assert_eq!(seen, 5);
    Ok(())
}

#[test]
fn missing_filename_falls_back_to_annotation_stem() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("set");
    fs::create_dir_all(&root)?;
    write_image(&root, "a.png", 10)?;
    fs::write(
        root.join("a.xml"),
        "<annotation><object><name>helmet</name><bndbox><xmin>1</xmin><ymin>1</ymin>\
         <xmax>6</xmax><ymax>5</ymax></bndbox></object></annotation>",
    )?;

    let index = index_pascal_voc(&root, &root)?;
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].image_path.as_deref(), Some(root.join("a.png").as_path()));

    let set = load_pascal_voc("set", &root, &root, &labels(), &VocLoadOptions::default())?;
    assert_eq!(set.len(), 1);
    assert_eq!(set.samples[0].image_path, root.join("a.png"));
    // No <size>, so dimensions come from the image header.
    assert_eq!((set.samples[0].width, set.samples[0].height), (16, 12));
    Ok(())
}
