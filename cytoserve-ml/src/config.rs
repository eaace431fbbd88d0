//! Configuration types for the cytoserve-ml crate.
//!
//! These are the engine sub-configs referenced from the core `AppConfig`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::labels::default_class_labels;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlConfig {
    /// Artifact to load at startup, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
    /// Ordered class labels. Position is the class identity and must match
    /// the order used at training time.
    #[serde(default = "default_class_labels")]
    pub class_labels: Vec<String>,
    /// Strategy chain configuration.
    #[serde(default)]
    pub loader: LoaderConfig,
    /// Registry bounds.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Image preprocessing limits.
    #[serde(default)]
    pub preprocess: PreprocessConfig,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            class_labels: default_class_labels(),
            loader: LoaderConfig::default(),
            registry: RegistryConfig::default(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

/// Strategy chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Upper bound on a single strategy chain run (seconds).
    #[serde(default = "default_load_timeout")]
    pub timeout_secs: u64,
    /// Square input resolutions tried by the template strategy, in order.
    #[serde(default = "default_template_resolutions")]
    pub template_resolutions: Vec<usize>,
    /// Input resolution declared by the fallback model.
    #[serde(default = "default_fallback_resolution")]
    pub fallback_resolution: usize,
    /// Install the fallback model when every strategy fails. When disabled,
    /// an exhausted chain surfaces `UnsupportedSchema` instead.
    #[serde(default = "default_true")]
    pub allow_degraded: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_load_timeout(),
            template_resolutions: default_template_resolutions(),
            fallback_resolution: default_fallback_resolution(),
            allow_degraded: true,
        }
    }
}

fn default_load_timeout() -> u64 {
    120
}

fn default_template_resolutions() -> Vec<usize> {
    vec![360, 299, 256, 224]
}

fn default_fallback_resolution() -> usize {
    360
}

fn default_true() -> bool {
    true
}

/// Model registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Maximum number of models kept in memory; least recently used models
    /// are evicted beyond this.
    #[serde(default = "default_max_models")]
    pub max_models: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_models: default_max_models(),
        }
    }
}

fn default_max_models() -> usize {
    4
}

/// Image preprocessing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Largest accepted encoded payload in bytes.
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload(),
        }
    }
}

fn default_max_payload() -> usize {
    20 * 1024 * 1024
}
