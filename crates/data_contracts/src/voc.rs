//! Pascal VOC annotation schema (one XML document per image).

use crate::labels::LabelMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VocError {
    #[error("malformed VOC xml: {0}")]
    Parse(#[from] quick_xml::DeError),
    #[error("failed to serialize VOC xml: {0}")]
    Serialize(#[from] quick_xml::SeError),
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("object[{index}] has unknown label {label:?}")]
    UnknownLabel { index: usize, label: String },
    #[error("object[{index}] bndbox non-finite or inverted: {bbox:?}")]
    InvalidBox { index: usize, bbox: [f32; 4] },
    #[error("object[{index}] bndbox {bbox:?} exceeds image size {width}x{height}")]
    OutOfBounds {
        index: usize,
        bbox: [f32; 4],
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocSize {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_depth")]
    pub depth: u32,
}

fn default_depth() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VocBndBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl VocBndBox {
    pub fn as_array(&self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    /// Pixel box -> [x_min, y_min, x_max, y_max] in 0..1.
    pub fn normalized(&self, width: u32, height: u32) -> [f32; 4] {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        [
            (self.xmin / w).clamp(0.0, 1.0),
            (self.ymin / h).clamp(0.0, 1.0),
            (self.xmax / w).clamp(0.0, 1.0),
            (self.ymax / h).clamp(0.0, 1.0),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocObject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficult: Option<u8>,
    pub bndbox: VocBndBox,
}

impl VocObject {
    pub fn is_difficult(&self) -> bool {
        self.difficult.unwrap_or(0) != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocAnnotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// May be empty; loaders then match the image by annotation stem.
    #[serde(default)]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<VocSize>,
    #[serde(rename = "object", default)]
    pub objects: Vec<VocObject>,
}

impl VocAnnotation {
    pub fn from_xml(raw: &str) -> Result<Self, VocError> {
        Ok(quick_xml::de::from_str(raw)?)
    }

    pub fn to_xml(&self) -> Result<String, VocError> {
        Ok(quick_xml::se::to_string_with_root("annotation", self)?)
    }

    /// Declared (width, height), ignoring zero sizes written by some labelling tools.
    pub fn declared_size(&self) -> Option<(u32, u32)> {
        self.size
            .as_ref()
            .filter(|s| s.width > 0 && s.height > 0)
            .map(|s| (s.width, s.height))
    }

    pub fn validate(&self, labels: &LabelMap) -> Result<(), ValidationError> {
        for (index, obj) in self.objects.iter().enumerate() {
            if !labels.contains(&obj.name) {
                return Err(ValidationError::UnknownLabel {
                    index,
                    label: obj.name.clone(),
                });
            }
            let bbox = obj.bndbox.as_array();
            if bbox.iter().any(|v| !v.is_finite() || *v < 0.0)
                || bbox[0] >= bbox[2]
                || bbox[1] >= bbox[3]
            {
                return Err(ValidationError::InvalidBox { index, bbox });
            }
            // VOC coordinates are 1-based, so xmax == width + 1 is tolerated.
            if let Some((width, height)) = self.declared_size() {
                if bbox[2] > width as f32 + 1.0 || bbox[3] > height as f32 + 1.0 {
                    return Err(ValidationError::OutOfBounds {
                        index,
                        bbox,
                        width,
                        height,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<annotation>
  <folder>train</folder>
  <filename>site_0001.jpg</filename>
  <size><width>640</width><height>480</height><depth>3</depth></size>
  <segmented>0</segmented>
  <object>
    <name>helmet</name>
    <pose>Unspecified</pose>
    <truncated>0</truncated>
    <difficult>0</difficult>
    <bndbox><xmin>64</xmin><ymin>48</ymin><xmax>192</xmax><ymax>144</ymax></bndbox>
  </object>
  <object>
    <name>safety-jacket</name>
    <difficult>1</difficult>
    <bndbox><xmin>100</xmin><ymin>200</ymin><xmax>300</xmax><ymax>470</ymax></bndbox>
  </object>
</annotation>"#;

    #[test]
    fn parses_standard_voc_document() {
        let ann = VocAnnotation::from_xml(SAMPLE).unwrap();
        assert_eq!(ann.filename, "site_0001.jpg");
        assert_eq!(ann.declared_size(), Some((640, 480)));
        assert_eq!(ann.objects.len(), 2);
        assert_eq!(ann.objects[0].name, "helmet");
        assert!(!ann.objects[0].is_difficult());
        assert!(ann.objects[1].is_difficult());
        let norm = ann.objects[0].bndbox.normalized(640, 480);
        assert!((norm[0] - 0.1).abs() < 1e-6);
        assert!((norm[3] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn annotation_without_objects_is_allowed() {
        let ann = VocAnnotation::from_xml(
            "<annotation><filename>empty.png</filename></annotation>",
        )
        .unwrap();
        assert!(ann.objects.is_empty());
        let labels = LabelMap::new(["helmet"]).unwrap();
        assert!(ann.validate(&labels).is_ok());
    }

    #[test]
    fn annotation_without_filename_is_valid() {
        let ann = VocAnnotation::from_xml(
            "<annotation><object><name>helmet</name><bndbox><xmin>1</xmin><ymin>1</ymin>\
             <xmax>5</xmax><ymax>5</ymax></bndbox></object></annotation>",
        )
        .unwrap();
        assert!(ann.filename.is_empty());
        let labels = LabelMap::new(["helmet"]).unwrap();
        assert_eq!(ann.validate(&labels), Ok(()));
    }

    #[test]
    fn objects_need_not_be_contiguous() {
        let ann = VocAnnotation::from_xml(
            r#"<annotation>
  <filename>mixed.jpg</filename>
  <object><name>helmet</name><bndbox><xmin>1</xmin><ymin>1</ymin><xmax>5</xmax><ymax>5</ymax></bndbox></object>
  <size><width>32</width><height>32</height></size>
  <object><name>safety-jacket</name><bndbox><xmin>6</xmin><ymin>6</ymin><xmax>20</xmax><ymax>20</ymax></bndbox></object>
</annotation>"#,
        )
        .unwrap();
        assert_eq!(ann.declared_size(), Some((32, 32)));
        let names: Vec<&str> = ann.objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["helmet", "safety-jacket"]);
    }

    #[test]
    fn xml_round_trip_preserves_objects() {
        let ann = VocAnnotation::from_xml(SAMPLE).unwrap();
        let again = VocAnnotation::from_xml(&ann.to_xml().unwrap()).unwrap();
        assert_eq!(ann.objects, again.objects);
        assert_eq!(ann.filename, again.filename);
    }
}
