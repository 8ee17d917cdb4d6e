//! Shared data contracts for labelled detection datasets: the ordered label
//! map and the Pascal VOC annotation schema.

pub mod labels;
pub mod voc;

pub use labels::{LabelMap, LabelMapError};
pub use voc::{ValidationError, VocAnnotation, VocBndBox, VocError, VocObject, VocSize};
