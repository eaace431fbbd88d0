//! Ordered class label sets.
//!
//! Index position is the class identity. A set whose order differs from the
//! training-time order yields wrong labels without any detectable error, so
//! the order is logged at startup and compared against labels an artifact
//! declares about itself.

use serde::{Deserialize, Serialize};

/// Label order of the peripheral blood cell classifier.
pub const BLOOD_CELL_LABELS: [&str; 9] = [
    "IG Immature White Cell",
    "Basophil",
    "Eosinophil",
    "Erythroblast",
    "Lymphocyte",
    "Monocyte",
    "Neutrophil",
    "Platelet",
    "RBC",
];

pub fn default_class_labels() -> Vec<String> {
    BLOOD_CELL_LABELS.iter().map(|s| s.to_string()).collect()
}

/// An ordered, non-empty sequence of class labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassLabelSet(Vec<String>);

impl ClassLabelSet {
    /// Build a label set, rejecting empty lists.
    pub fn new(labels: Vec<String>) -> Option<Self> {
        if labels.is_empty() {
            None
        } else {
            Some(Self(labels))
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Compare against labels declared by an artifact. Returns the first
    /// position where the two orders disagree.
    pub fn first_disagreement(&self, declared: &[String]) -> Option<usize> {
        if declared.len() != self.0.len() {
            return Some(declared.len().min(self.0.len()));
        }
        self.0.iter().zip(declared).position(|(a, b)| a != b)
    }

    /// Label used when a model index has no counterpart in this set.
    pub fn placeholder(index: usize) -> String {
        format!("class_{index}")
    }
}

impl Default for ClassLabelSet {
    fn default() -> Self {
        Self(default_class_labels())
    }
}

impl std::fmt::Display for ClassLabelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(", "))
    }
}
