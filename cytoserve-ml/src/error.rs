//! Error types for the cytoserve-ml crate.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for model loading and classification.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Model file not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("Invalid model artifact {}: {reason}", path.display())]
    ArtifactInvalid { path: PathBuf, reason: String },

    #[error("Unsupported model schema: {0}")]
    UnsupportedSchema(String),

    #[error("Unsupported field '{field}' at {path}")]
    UnsupportedField { field: String, path: String },

    #[error("Unsupported layer: {0}")]
    UnsupportedLayer(String),

    #[error("Invalid architecture description: {0}")]
    InvalidDescription(String),

    #[error("Weight binding failed: {0}")]
    WeightBinding(String),

    #[error("Image decode error: {0}")]
    ImageDecode(String),

    #[error("Input shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Model produced {outputs} outputs for {labels} class labels")]
    IndexAnomaly { outputs: usize, labels: usize },

    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("Model load timed out after {0}s")]
    LoadTimeout(u64),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MlError {
    pub fn invalid_artifact(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ArtifactInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_description(msg: impl Into<String>) -> Self {
        Self::InvalidDescription(msg.into())
    }

    pub fn binding(msg: impl Into<String>) -> Self {
        Self::WeightBinding(msg.into())
    }

    pub fn image(msg: impl Into<String>) -> Self {
        Self::ImageDecode(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Whether the error stems from the caller's request payload rather than
    /// from the model or the server.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::ImageDecode(_) | Self::ShapeMismatch { .. })
    }

    /// An owned copy for handing one shared load failure to several callers.
    /// Wrapped library errors keep their message and, for IO, their kind.
    pub fn duplicate(&self) -> Self {
        match self {
            Self::ArtifactNotFound(p) => Self::ArtifactNotFound(p.clone()),
            Self::ArtifactInvalid { path, reason } => Self::ArtifactInvalid {
                path: path.clone(),
                reason: reason.clone(),
            },
            Self::UnsupportedSchema(s) => Self::UnsupportedSchema(s.clone()),
            Self::UnsupportedField { field, path } => Self::UnsupportedField {
                field: field.clone(),
                path: path.clone(),
            },
            Self::UnsupportedLayer(s) => Self::UnsupportedLayer(s.clone()),
            Self::InvalidDescription(s) => Self::InvalidDescription(s.clone()),
            Self::WeightBinding(s) => Self::WeightBinding(s.clone()),
            Self::ImageDecode(s) => Self::ImageDecode(s.clone()),
            Self::ShapeMismatch { expected, actual } => Self::ShapeMismatch {
                expected: expected.clone(),
                actual: actual.clone(),
            },
            Self::IndexAnomaly { outputs, labels } => Self::IndexAnomaly {
                outputs: *outputs,
                labels: *labels,
            },
            Self::ModelNotLoaded => Self::ModelNotLoaded,
            Self::LoadTimeout(secs) => Self::LoadTimeout(*secs),
            Self::Inference(s) => Self::Inference(s.clone()),
            Self::Config(s) => Self::Config(s.clone()),
            Self::Tensor(e) => Self::Tensor(candle_core::Error::Msg(e.to_string())),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Serde(e) => Self::Serde(<serde_json::Error as serde::de::Error>::custom(e)),
        }
    }
}
