use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::Tensor;
use burn_dataset::{load_pascal_voc, LabeledImageSet, VocLoadOptions};
use data_contracts::LabelMap;
use image::{Rgb, RgbImage};
use models::{resolve_model_spec, Backbone, ModelSpec};
use std::fs;
use std::path::Path;
use training::{Evaluator, TrainBackend, TrainConfig, Trainer, TrainingError};

fn labels() -> LabelMap {
    LabelMap::new(["helmet", "safety-jacket"]).unwrap()
}

/// Writes `count` 32x32 images, each with a helmet patch and a jacket patch, plus VOC XML.
fn write_voc_set(root: &Path, count: usize) -> anyhow::Result<()> {
    fs::create_dir_all(root)?;
    for i in 0..count {
        let stem = format!("frame_{i:03}");
        let mut img = RgbImage::from_pixel(32, 32, Rgb([20, 20, 20]));
        let off = (i % 4) as u32;
        for y in 2 + off..12 + off {
            for x in 2..12 {
                img.put_pixel(x, y, Rgb([250, 220, 0]));
            }
        }
        for y in 16..30 {
            for x in 14 + off..28 + off {
                img.put_pixel(x, y, Rgb([255, 90, 0]));
            }
        }
        img.save(root.join(format!("{stem}.png")))?;
        let xml = format!(
            "<annotation><filename>{stem}.png</filename>\
             <size><width>32</width><height>32</height><depth>3</depth></size>\
             <object><name>helmet</name><difficult>0</difficult><bndbox>\
             <xmin>2</xmin><ymin>{}</ymin><xmax>12</xmax><ymax>{}</ymax></bndbox></object>\
             <object><name>safety-jacket</name><difficult>0</difficult><bndbox>\
             <xmin>{}</xmin><ymin>16</ymin><xmax>{}</xmax><ymax>30</ymax></bndbox></object>\
             </annotation>",
            2 + off,
            12 + off,
            14 + off,
            28 + off
        );
        fs::write(root.join(format!("{stem}.xml")), xml)?;
    }
    Ok(())
}

fn load(root: &Path, name: &str, labels: &LabelMap) -> anyhow::Result<LabeledImageSet> {
    Ok(load_pascal_voc(name, root, root, labels, &VocLoadOptions::default())?)
}

fn quick_config() -> TrainConfig {
    TrainConfig {
        batch_size: 4,
        train_whole_model: true,
        epochs: 2,
        ..Default::default()
    }
}

#[test]
fn trains_and_tracks_validation_loss() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc_set(&tmp.path().join("train"), 6)?;
    write_voc_set(&tmp.path().join("val"), 2)?;
    let train = load(&tmp.path().join("train"), "train", &labels())?;
    let val = load(&tmp.path().join("val"), "val", &labels())?;
    let spec = resolve_model_spec("detector_lite0", None)?;

    let outcome = Trainer::new(quick_config()).train(&train, &spec, Some(&val))?;
    assert_eq!(outcome.history.len(), 2);
    for stats in &outcome.history {
        assert!(stats.train_loss.is_finite());
        assert!(stats.val_loss.is_some_and(f32::is_finite));
    }
    assert_eq!(outcome.model.labels, labels());
    assert_eq!(outcome.model.architecture.id, "detector_lite0");

    let report = Evaluator::default().evaluate(&outcome.model, &val)?;
    for key in ["AP", "AP50", "AP75", "ARmax1", "ARmax10", "ARmax100", "AP_/helmet", "AP_/safety-jacket"] {
        let value = report.get(key).expect(key);
        assert!((0.0..=1.0).contains(&value), "{key} = {value}");
    }
    // Size buckets are always reported; -1 marks a bucket with no ground truth.
    for key in ["APs", "APm", "APl", "ARs", "ARm", "ARl"] {
        let value = report.get(key).expect(key);
        assert!(value == -1.0 || (0.0..=1.0).contains(&value), "{key} = {value}");
    }
    Ok(())
}

#[test]
fn frozen_backbone_is_left_untouched() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc_set(&tmp.path().join("train"), 4)?;
    let train = load(&tmp.path().join("train"), "train", &labels())?;

    let device = Default::default();
    let arch = models::architecture("detector_lite0")?;
    let pretrained_dir = tmp.path().join("pretrained");
    fs::create_dir_all(&pretrained_dir)?;
    let backbone = Backbone::<TrainBackend>::new(&arch.channels, &device);
    backbone
        .clone()
        .save_file(
            pretrained_dir.join("detector_lite0.bin"),
            &BinFileRecorder::<FullPrecisionSettings>::new(),
        )
        .map_err(|e| anyhow::anyhow!("failed to save backbone: {e}"))?;

    let spec = resolve_model_spec("detector_lite0", Some(&pretrained_dir))?;
    let cfg = TrainConfig {
        train_whole_model: false,
        learning_rate: 1e-2,
        ..quick_config()
    };
    let outcome = Trainer::new(cfg).train(&train, &spec, None)?;
    assert!(outcome.history.iter().all(|s| s.val_loss.is_none()));

    let input = Tensor::<TrainBackend, 4>::ones([1, 3, 64, 64], &device);
    let before = backbone.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
    let after = outcome
        .model
        .model
        .backbone()
        .forward(input)
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert_eq!(before, after);
    Ok(())
}

#[test]
fn validation_labels_must_match() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc_set(&tmp.path().join("train"), 4)?;
    let train = load(&tmp.path().join("train"), "train", &labels())?;
    let mut val = train.clone();
    val.labels = LabelMap::new(["safety-jacket", "helmet"]).unwrap();
    let spec = resolve_model_spec("detector_lite0", None)?;

    let err = Trainer::new(quick_config())
        .train(&train, &spec, Some(&val))
        .err()
        .expect("label mismatch");
    assert!(matches!(err, TrainingError::LabelMismatch { .. }));
    Ok(())
}

#[test]
fn empty_training_set_is_invalid() {
    let train = LabeledImageSet {
        name: "empty".into(),
        labels: labels(),
        samples: Vec::new(),
    };
    let spec: ModelSpec = resolve_model_spec("detector_lite0", None).unwrap();
    let err = Trainer::new(quick_config()).train(&train, &spec, None).err();
    assert!(matches!(err, Some(TrainingError::InvalidConfiguration(_))));
}

#[test]
fn over_budget_is_resource_exhausted() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc_set(&tmp.path().join("train"), 2)?;
    let train = load(&tmp.path().join("train"), "train", &labels())?;
    let spec = resolve_model_spec("detector_lite2", None)?;
    let cfg = TrainConfig {
        memory_budget_bytes: Some(1024),
        ..quick_config()
    };
    let err = Trainer::new(cfg).train(&train, &spec, None).err();
    assert!(matches!(err, Some(TrainingError::ResourceExhausted(_))));
    Ok(())
}

#[test]
fn evaluator_rejects_foreign_label_map() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc_set(&tmp.path().join("val"), 2)?;
    let val = load(&tmp.path().join("val"), "val", &labels())?;
    let arch = models::architecture("detector_lite0")?;
    let other = LabelMap::new(["person"]).unwrap();
    let detector = models::TrainedDetector::<TrainBackend>::init(arch, other, &Default::default());

    let err = Evaluator::default().evaluate(&detector, &val).err();
    assert!(matches!(err, Some(TrainingError::LabelMismatch { .. })));
    Ok(())
}
