use serde::{Deserialize, Serialize};

use crate::error::{GenreError, Result};

/// Frozen bijection between genre names and dense indices.
///
/// Indices follow the lexicographic order of the genres seen at fit time; the
/// same table is persisted next to the weights and reused verbatim for inference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut classes: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    /// Rebuild from a persisted table; the order is taken as-is.
    pub fn from_classes(classes: Vec<String>) -> Result<Self> {
        let mut sorted = classes.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != classes.len() {
            return Err(GenreError::Configuration(
                "label mapping contains duplicate genres".into(),
            ));
        }
        Ok(Self { classes })
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn encode(&self, label: &str) -> Result<usize> {
        self.classes
            .iter()
            .position(|c| c == label)
            .ok_or_else(|| GenreError::Configuration(format!("unknown genre `{label}`")))
    }

    pub fn decode(&self, index: usize) -> Result<&str> {
        self.classes.get(index).map(String::as_str).ok_or_else(|| {
            GenreError::Configuration(format!(
                "index {index} out of range for {} genres",
                self.classes.len()
            ))
        })
    }

    pub fn one_hot(&self, index: usize) -> Vec<f32> {
        let mut v = vec![0.0; self.classes.len()];
        if let Some(slot) = v.get_mut(index) {
            *slot = 1.0;
        }
        v
    }

    pub fn encode_all<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>> {
        labels.iter().map(|l| self.encode(l.as_ref())).collect()
    }
}
