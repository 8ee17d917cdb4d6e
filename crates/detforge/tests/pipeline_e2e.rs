use detforge::{run, BurnBackend, DatasetSource, ErrorKind, PipelineConfig, Stage};
use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;

/// `count` 48x48 frames with one helmet and one safety jacket each.
fn write_voc_set(dir: &Path, count: usize, extra_label: Option<&str>) -> anyhow::Result<()> {
    fs::create_dir_all(dir)?;
    for i in 0..count {
        let stem = format!("site_{i:02}");
        let shift = (i % 5) as u32 * 2;
        let mut img = RgbImage::from_pixel(48, 48, Rgb([90, 110, 120]));
        for y in 4..16 {
            for x in 4 + shift..16 + shift {
                img.put_pixel(x, y, Rgb([255, 230, 0]));
            }
        }
        for y in 20..44 {
            for x in 18..38 {
                img.put_pixel(x, y, Rgb([255, 120, 0]));
            }
        }
        img.save(dir.join(format!("{stem}.jpg")))?;

        let mut xml = format!(
            "<annotation><folder>site</folder><filename>{stem}.jpg</filename>\
             <size><width>48</width><height>48</height><depth>3</depth></size>\
             <object><name>helmet</name><pose>Unspecified</pose><truncated>0</truncated>\
             <difficult>0</difficult><bndbox><xmin>{}</xmin><ymin>4</ymin>\
             <xmax>{}</xmax><ymax>16</ymax></bndbox></object>\
             <object><name>safety-jacket</name><difficult>0</difficult><bndbox>\
             <xmin>18</xmin><ymin>20</ymin><xmax>38</xmax><ymax>44</ymax></bndbox></object>",
            4 + shift,
            16 + shift
        );
        if let Some(label) = extra_label {
            xml.push_str(&format!(
                "<object><name>{label}</name><bndbox><xmin>1</xmin><ymin>1</ymin>\
                 <xmax>3</xmax><ymax>3</ymax></bndbox></object>"
            ));
        }
        xml.push_str("</annotation>");
        fs::write(dir.join(format!("{stem}.xml")), xml)?;
    }
    Ok(())
}

fn config(root: &Path) -> PipelineConfig {
    let mut cfg = PipelineConfig {
        labels: vec!["helmet".into(), "safety-jacket".into()],
        architecture: "detector_lite0".into(),
        train_data: DatasetSource::colocated(root.join("train")),
        val_data: DatasetSource::colocated(root.join("validate")),
        ..Default::default()
    };
    cfg.training.batch_size = 4;
    cfg.training.train_whole_model = true;
    cfg.training.epochs = 2;
    cfg.export.dir = root.join("export");
    cfg.export.filename = "best.dfx".into();
    cfg
}

fn export_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn helmet_pipeline_end_to_end() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc_set(&tmp.path().join("train"), 10, None)?;
    write_voc_set(&tmp.path().join("validate"), 2, None)?;
    let cfg = config(tmp.path());

    let outcome = run(&BurnBackend, &cfg)?;
    assert!(!outcome.report.is_empty());
    let ap = outcome.report.get("AP").expect("AP metric");
    assert!(ap.is_finite());
    assert_eq!(outcome.artifact, tmp.path().join("export/best.dfx"));
    assert_eq!(export_entries(&cfg.export.dir), vec!["best.dfx".to_string()]);

    // A second run replaces the artifact instead of adding one.
    run(&BurnBackend, &cfg)?;
    assert_eq!(export_entries(&cfg.export.dir), vec!["best.dfx".to_string()]);

    let (meta, _) = inference::read_artifact(&outcome.artifact)?;
    assert_eq!(meta.labels.as_slice(), ["helmet", "safety-jacket"]);
    Ok(())
}

#[test]
fn zero_epochs_is_configuration_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc_set(&tmp.path().join("train"), 2, None)?;
    write_voc_set(&tmp.path().join("validate"), 1, None)?;
    let mut cfg = config(tmp.path());
    cfg.training.epochs = 0;

    let err = run(&BurnBackend, &cfg).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Configuration);
    assert_eq!(err.exit_code(), 2);
    assert!(!cfg.export.dir.exists());
    Ok(())
}

#[test]
fn unknown_architecture_is_configuration_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut cfg = config(tmp.path());
    cfg.architecture = "efficientdet_lite0".into();

    let err = run(&BurnBackend, &cfg).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Configuration);
    assert_eq!(err.stage, Stage::ResolveModel);
    Ok(())
}

#[test]
fn unknown_validation_label_is_data_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_voc_set(&tmp.path().join("train"), 4, None)?;
    write_voc_set(&tmp.path().join("validate"), 2, Some("gloves"))?;
    let cfg = config(tmp.path());

    let err = run(&BurnBackend, &cfg).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Data);
    assert_eq!(err.stage, Stage::LoadDataset);
    assert!(err.message.contains("gloves"));
    assert!(!cfg.export.dir.exists());
    Ok(())
}
