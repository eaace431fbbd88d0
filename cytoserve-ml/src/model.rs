//! The classifier capability and the loaded-model record.
//!
//! Real networks and the fallback model implement the same [`Classifier`]
//! trait; nothing downstream special-cases either one.

use candle_core::Tensor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::MlError;
use crate::loader::LoadAttemptResult;
use crate::runtime::BindReport;

/// Declared per-sample input shape (height, width, channels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl InputShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// A square RGB input.
    pub fn square(side: usize) -> Self {
        Self::new(side, side, 3)
    }

    /// Batched tensor dims `[1, H, W, C]`.
    pub fn batch_dims(&self) -> Vec<usize> {
        vec![1, self.height, self.width, self.channels]
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0 || self.channels == 0
    }
}

impl std::fmt::Display for InputShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Anything that maps a `[1, H, W, C]` tensor to a score vector.
///
/// Implementations hold immutable state only, so concurrent calls need no
/// synchronization.
pub trait Classifier: Send + Sync + std::fmt::Debug {
    /// Run a forward pass and return the first batch row.
    fn predict(&self, input: &Tensor) -> Result<Vec<f32>, MlError>;

    /// The input shape this classifier expects.
    fn input_shape(&self) -> InputShape;

    /// Whether results are stand-ins rather than real predictions.
    fn is_degraded(&self) -> bool {
        false
    }
}

/// A model resident in the registry.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub path: PathBuf,
    pub classifier: Arc<dyn Classifier>,
    /// Name of the strategy that produced the classifier.
    pub strategy: String,
    pub loaded_at: DateTime<Utc>,
    /// How many tensors were bound, for strategies that bind weights.
    pub bind_report: Option<BindReport>,
    /// Every strategy attempt made while loading.
    pub attempts: Vec<LoadAttemptResult>,
    /// Label order declared by the artifact, if any.
    pub declared_labels: Option<Vec<String>>,
}

impl LoadedModel {
    pub fn new(path: PathBuf, classifier: Arc<dyn Classifier>, strategy: impl Into<String>) -> Self {
        Self {
            path,
            classifier,
            strategy: strategy.into(),
            loaded_at: Utc::now(),
            bind_report: None,
            attempts: Vec::new(),
            declared_labels: None,
        }
    }

    pub fn input_shape(&self) -> InputShape {
        self.classifier.input_shape()
    }

    pub fn is_degraded(&self) -> bool {
        self.classifier.is_degraded()
    }
}
