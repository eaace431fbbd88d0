//! Request and response bodies for the HTTP gateway.

use chrono::{DateTime, Utc};
use cytoserve_ml::{ClassLabelSet, LoadAttemptResult, PredictionResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ServiceError;
use crate::service::LoadOutcome;

/// `POST /load_model` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadModelRequest {
    pub model_path: PathBuf,
}

/// `POST /predict` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    /// Base64 image, optionally as a data URI.
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadModelResponse {
    pub success: bool,
    pub loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<LoadAttemptResult>,
}

impl LoadModelResponse {
    pub fn loaded(outcome: &LoadOutcome) -> Self {
        let model = &outcome.model;
        let message = match (outcome.cached, model.is_degraded()) {
            (true, _) => "Model already loaded",
            (false, true) => "Model loaded in degraded mode",
            (false, false) => "Model loaded successfully",
        };
        Self {
            success: true,
            loaded: true,
            path: Some(model.path.clone()),
            message: Some(message.to_string()),
            error: None,
            degraded: Some(model.is_degraded()),
            strategy: Some(model.strategy.clone()),
            attempts: if outcome.cached {
                Vec::new()
            } else {
                model.attempts.clone()
            },
        }
    }

    pub fn failed(path: Option<PathBuf>, error: &ServiceError) -> Self {
        Self {
            success: false,
            loaded: false,
            path,
            message: None,
            error: Some(error.to_string()),
            degraded: None,
            strategy: None,
            attempts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub cell_type: String,
    pub confidence: f32,
    /// One entry per class label, in label order.
    pub all_probabilities: Vec<f32>,
    pub class_labels: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub degraded: bool,
    pub anomalous: bool,
    pub strategy: String,
}

impl PredictResponse {
    pub fn new(result: PredictionResult, labels: &ClassLabelSet) -> Self {
        Self {
            cell_type: result.label,
            confidence: result.confidence,
            all_probabilities: result.probabilities,
            class_labels: labels.as_slice().to_vec(),
            timestamp: result.timestamp,
            degraded: result.degraded,
            anomalous: result.anomalous,
            strategy: result.strategy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelsResponse {
    pub class_labels: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
