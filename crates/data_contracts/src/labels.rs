use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelMapError {
    #[error("label list is empty")]
    Empty,
    #[error("label at position {0} is blank")]
    Blank(usize),
    #[error("duplicate label {0:?}")]
    Duplicate(String),
}

/// Ordered list of permitted class labels. A label's class id is its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn new<I, S>(labels: I) -> Result<Self, LabelMapError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(LabelMapError::Empty);
        }
        let mut seen = HashSet::with_capacity(labels.len());
        for (i, label) in labels.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(LabelMapError::Blank(i));
            }
            if !seen.insert(label.as_str()) {
                return Err(LabelMapError::Duplicate(label.clone()));
            }
        }
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false for a constructed map; present for clippy's sake.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.index_of(label).is_some()
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

impl TryFrom<Vec<String>> for LabelMap {
    type Error = LabelMapError;

    fn try_from(labels: Vec<String>) -> Result<Self, Self::Error> {
        LabelMap::new(labels)
    }
}

impl From<LabelMap> for Vec<String> {
    fn from(map: LabelMap) -> Self {
        map.labels
    }
}

impl fmt::Display for LabelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.labels.join(", "))
    }
}
