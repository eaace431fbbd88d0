//! Strategy chain executor.
//!
//! Runs the loading strategies in priority order (`Pending → Trying(i) →
//! Succeeded | Exhausted`), stops at the first success and records every
//! attempt. Exhaustion installs the fallback model unless degraded loads are
//! disabled.

pub mod strategies;

use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactInspection, WeightStore, inspect_with_weights};
use crate::config::LoaderConfig;
use crate::error::MlError;
use crate::fallback::FallbackClassifier;
use crate::model::{Classifier, InputShape, LoadedModel};
use crate::runtime::BindReport;

pub use strategies::{
    DirectStrategy, InspectionOnlyStrategy, SanitizedStrategy, TemplateStrategy, default_chain,
};

// Strategies are isolated with `catch_unwind`, which needs unwinding panics.
#[cfg(panic = "abort")]
compile_error!("cytoserve-ml requires panic = \"unwind\" for strategy isolation");

/// Strategy name reported when the chain was exhausted.
pub const FALLBACK_STRATEGY: &str = "fallback";

/// Diagnostics for one strategy attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadAttemptResult {
    pub strategy: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
    /// Tensors bound, for strategies that bind weights.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_tensors: Option<usize>,
}

/// Chain progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "strategy", rename_all = "snake_case")]
pub enum ChainState {
    Pending,
    Trying(usize),
    Succeeded(usize),
    Exhausted,
}

/// Inspection and decoded tensors shared by all strategies of one run.
#[derive(Debug)]
pub struct Artifact {
    pub inspection: ArtifactInspection,
    pub weights: WeightStore,
}

/// Inputs handed to every strategy.
#[derive(Debug)]
pub struct LoadContext {
    pub path: PathBuf,
    /// The read artifact, or why it could not be read.
    artifact: Result<Artifact, String>,
    pub num_classes: usize,
    pub config: LoaderConfig,
}

impl LoadContext {
    pub fn new(
        path: PathBuf,
        artifact: Result<Artifact, String>,
        num_classes: usize,
        config: LoaderConfig,
    ) -> Self {
        Self {
            path,
            artifact,
            num_classes,
            config,
        }
    }

    pub fn artifact(&self) -> Result<&Artifact, &str> {
        self.artifact.as_ref().map_err(String::as_str)
    }
}

/// Structured result of one strategy.
#[derive(Debug)]
pub enum StrategyOutcome {
    Loaded {
        classifier: Arc<dyn Classifier>,
        bind_report: Option<BindReport>,
    },
    Failed(String),
}

impl StrategyOutcome {
    pub fn loaded(classifier: Arc<dyn Classifier>, bind_report: Option<BindReport>) -> Self {
        Self::Loaded {
            classifier,
            bind_report,
        }
    }
}

/// One way of turning an artifact into a classifier.
pub trait LoadStrategy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn attempt(&self, ctx: &LoadContext) -> StrategyOutcome;
}

/// Runs the strategy chain for an artifact path.
#[derive(Debug, Clone)]
pub struct ModelLoader {
    config: LoaderConfig,
    num_classes: usize,
    timeout: Duration,
    strategies: Vec<Arc<dyn LoadStrategy>>,
}

impl ModelLoader {
    /// Loader with the default chain, producing `num_classes` outputs when
    /// it has to build a network itself.
    pub fn new(config: LoaderConfig, num_classes: usize) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        Self {
            config,
            num_classes,
            timeout,
            strategies: default_chain(),
        }
    }

    /// Replace the chain.
    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn LoadStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the chain on the blocking pool, bounded by the configured timeout.
    ///
    /// A timed-out chain keeps running to completion in the background; its
    /// result is discarded.
    pub async fn load(&self, path: &Path) -> Result<LoadedModel, MlError> {
        let loader = self.clone();
        let owned = path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || loader.load_blocking(&owned));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(MlError::inference(format!("load task failed: {join}"))),
            Err(_) => {
                warn!(path = %path.display(), timeout_secs = self.timeout.as_secs(), "Model load timed out");
                Err(MlError::LoadTimeout(self.timeout.as_secs()))
            }
        }
    }

    /// Run the chain on the current thread.
    pub fn load_blocking(&self, path: &Path) -> Result<LoadedModel, MlError> {
        if !path.exists() {
            return Err(MlError::ArtifactNotFound(path.to_path_buf()));
        }

        let artifact = match inspect_with_weights(path) {
            Ok((inspection, weights)) => {
                if let Some(producer) = &inspection.producer {
                    info!(producer = %producer, "Artifact producer");
                }
                Ok(Artifact {
                    inspection,
                    weights,
                })
            }
            Err(MlError::ArtifactNotFound(p)) => return Err(MlError::ArtifactNotFound(p)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Artifact could not be read");
                Err(e.to_string())
            }
        };
        let declared_labels = artifact
            .as_ref()
            .ok()
            .and_then(|a| a.inspection.class_labels.clone());
        let ctx = LoadContext::new(
            path.to_path_buf(),
            artifact,
            self.num_classes,
            self.config.clone(),
        );

        let mut attempts = Vec::with_capacity(self.strategies.len());
        let mut state = ChainState::Pending;
        debug!(path = %path.display(), state = ?state, strategies = self.strategies.len(), "Starting load chain");
        for (i, strategy) in self.strategies.iter().enumerate() {
            state = ChainState::Trying(i);
            debug!(state = ?state, strategy = strategy.name(), "Trying strategy");
            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| strategy.attempt(&ctx)))
                .unwrap_or_else(|panic| StrategyOutcome::Failed(panic_message(panic.as_ref())));
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                StrategyOutcome::Loaded {
                    classifier,
                    bind_report,
                } => {
                    attempts.push(LoadAttemptResult {
                        strategy: strategy.name().to_string(),
                        success: true,
                        error: None,
                        elapsed_ms,
                        bound_tensors: bind_report.as_ref().map(|r| r.bound),
                    });
                    state = ChainState::Succeeded(i);
                    info!(
                        path = %path.display(),
                        strategy = strategy.name(),
                        state = ?state,
                        degraded = classifier.is_degraded(),
                        input = %classifier.input_shape(),
                        "Model loaded"
                    );
                    if classifier.is_degraded() {
                        warn!(strategy = strategy.name(), "Serving degraded predictions");
                    }
                    let mut model = LoadedModel::new(path.to_path_buf(), classifier, strategy.name());
                    model.bind_report = bind_report;
                    model.attempts = attempts;
                    model.declared_labels = declared_labels;
                    return Ok(model);
                }
                StrategyOutcome::Failed(reason) => {
                    info!(strategy = strategy.name(), elapsed_ms, error = %reason, "Load strategy failed");
                    attempts.push(LoadAttemptResult {
                        strategy: strategy.name().to_string(),
                        success: false,
                        error: Some(reason),
                        elapsed_ms,
                        bound_tensors: None,
                    });
                }
            }
        }

        state = ChainState::Exhausted;
        let summary = attempts
            .iter()
            .map(|a| format!("{}: {}", a.strategy, a.error.as_deref().unwrap_or("failed")))
            .collect::<Vec<_>>()
            .join("; ");

        if !self.config.allow_degraded {
            warn!(path = %path.display(), state = ?state, "All load strategies failed");
            return Err(MlError::UnsupportedSchema(summary));
        }

        warn!(
            path = %path.display(),
            state = ?state,
            attempts = attempts.len(),
            "All load strategies failed, installing fallback model"
        );
        let fallback = FallbackClassifier::new(
            self.num_classes,
            InputShape::square(self.config.fallback_resolution),
        );
        let mut model = LoadedModel::new(path.to_path_buf(), Arc::new(fallback), FALLBACK_STRATEGY);
        model.attempts = attempts;
        model.declared_labels = declared_labels;
        Ok(model)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("strategy panicked: {detail}")
}
