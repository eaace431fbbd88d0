//! The classifier service: one registry, one label set, one loader.
//!
//! Handlers hold an `Arc<ClassifierService>`. All mutable state lives in the
//! registry; predictions run against a shared `Arc<LoadedModel>` on the
//! blocking pool.

use chrono::{DateTime, Utc};
use cytoserve_ml::{
    ClassLabelSet, ImagePreprocessor, LoadedModel, MlConfig, MlError, ModelLoader, ModelRegistry,
    PredictionResult, classify,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, ServiceError};

/// Result of a load request.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub model: Arc<LoadedModel>,
    /// The model was already resident and no strategy ran.
    pub cached: bool,
}

/// Snapshot of the active model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub model_path: Option<PathBuf>,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
    /// Number of models currently held by the registry.
    pub resident_models: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub model_loaded: bool,
}

/// Loads models and classifies images.
#[derive(Debug)]
pub struct ClassifierService {
    config: MlConfig,
    labels: ClassLabelSet,
    registry: ModelRegistry,
    loader: ModelLoader,
    preprocessor: ImagePreprocessor,
}

impl ClassifierService {
    pub fn new(config: MlConfig) -> Result<Self> {
        let labels = ClassLabelSet::new(config.class_labels.clone())
            .ok_or_else(|| ServiceError::Config("class_labels must not be empty".into()))?;
        let loader = ModelLoader::new(config.loader.clone(), labels.len());
        info!(count = labels.len(), labels = %labels, "Class label order");
        Ok(Self {
            registry: ModelRegistry::new(config.registry.clone()),
            preprocessor: ImagePreprocessor::new(config.preprocess.clone()),
            loader,
            labels,
            config,
        })
    }

    /// Replace the loader, e.g. with a custom strategy chain.
    pub fn with_loader(mut self, loader: ModelLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn labels(&self) -> &ClassLabelSet {
        &self.labels
    }

    pub fn config(&self) -> &MlConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Load `path` through the registry. Concurrent calls for the same path
    /// run the strategy chain once.
    pub async fn load_model(&self, path: &Path) -> Result<LoadOutcome> {
        let loader = &self.loader;
        let (model, cached) = self
            .registry
            .load_with(path, |key| async move { loader.load(&key).await })
            .await?;

        if cached {
            info!(path = %model.path.display(), "Model already loaded");
        } else {
            self.check_declared_labels(&model);
            info!(
                path = %model.path.display(),
                strategy = %model.strategy,
                degraded = model.is_degraded(),
                input = %model.input_shape(),
                "Model ready"
            );
        }
        Ok(LoadOutcome { model, cached })
    }

    fn check_declared_labels(&self, model: &LoadedModel) {
        let Some(declared) = &model.declared_labels else {
            return;
        };
        if let Some(position) = self.labels.first_disagreement(declared) {
            warn!(
                path = %model.path.display(),
                position,
                configured = %self.labels,
                declared = ?declared,
                "Artifact declares a different class label order"
            );
        }
    }

    /// Classify a base64 image with the active model, or with the resident
    /// model at `model_path`. Nothing is loaded here; a path that is not
    /// resident is `ModelNotLoaded`.
    pub async fn predict(
        &self,
        image: String,
        model_path: Option<&Path>,
    ) -> Result<PredictionResult> {
        let model = match model_path {
            Some(path) => self
                .registry
                .get(path)
                .await
                .ok_or(MlError::ModelNotLoaded)?,
            None => self
                .registry
                .active()
                .await
                .ok_or(MlError::ModelNotLoaded)?,
        };

        let preprocessor = self.preprocessor.clone();
        let labels = self.labels.clone();
        let result = tokio::task::spawn_blocking(move || {
            let input = preprocessor.prepare(&image, model.input_shape())?;
            classify(&model, &input, &labels)
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("prediction task failed: {e}")))??;

        info!(
            label = %result.label,
            confidence = result.confidence,
            degraded = result.degraded,
            "Prediction"
        );
        Ok(result)
    }

    pub async fn status(&self) -> ModelStatus {
        let active = self.registry.active().await;
        ModelStatus {
            model_path: active.as_ref().map(|m| m.path.clone()),
            loaded: active.is_some(),
            degraded: active.as_ref().map(|m| m.is_degraded()),
            strategy: active.as_ref().map(|m| m.strategy.clone()),
            loaded_at: active.as_ref().map(|m| m.loaded_at),
            resident_models: self.registry.len().await,
        }
    }

    pub async fn health(&self) -> HealthReport {
        match self.registry.active().await {
            Some(model) if model.is_degraded() => HealthReport {
                status: "degraded",
                model_loaded: true,
            },
            Some(_) => HealthReport {
                status: "ok",
                model_loaded: true,
            },
            None => HealthReport {
                status: "ok",
                model_loaded: false,
            },
        }
    }

    /// Load the configured startup model, if any.
    pub async fn warm_start(&self) -> Result<Option<LoadOutcome>> {
        let Some(path) = self.config.model_path.clone() else {
            return Ok(None);
        };
        info!(path = %path.display(), "Loading startup model");
        self.load_model(&path).await.map(Some)
    }

    pub async fn unload(&self, path: &Path) -> bool {
        self.registry.unload(path).await
    }
}
