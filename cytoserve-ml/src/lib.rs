//! # cytoserve-ml: model compatibility resolver and classification pipeline
//!
//! Turns a trained model artifact into something that can classify cell
//! images, whichever serializer version wrote it, and keeps answering in a
//! clearly marked degraded mode when it cannot.
//!
//! ## Loading
//! 1. **Artifact inspection**: read-only look at the container: embedded
//!    description, tensor inventory, declared labels.
//! 2. **Strategy chain**: direct, sanitized, template, inspection-only; the
//!    first success wins and every attempt is recorded.
//! 3. **Fallback**: a deterministic stand-in when the chain is exhausted.
//!
//! ## Classifying
//! Base64 image → center-cropped, resampled tensor → forward pass → bounded
//! label, confidence and full distribution.

// Artifact handling
pub mod artifact;
pub mod sanitize;

// Runtime
pub mod model;
pub mod runtime;

// Loading
pub mod fallback;
pub mod loader;
pub mod registry;

// Classification
pub mod inference;
pub mod labels;
pub mod preprocess;

// Foundation
pub mod config;
pub mod error;

#[cfg(test)]
mod testing;

// Re-exports
pub use artifact::{ArtifactInspection, inspect};
pub use config::{LoaderConfig, MlConfig, PreprocessConfig, RegistryConfig};
pub use error::MlError;
pub use fallback::FallbackClassifier;
pub use inference::{PredictionResult, classify};
pub use labels::ClassLabelSet;
pub use loader::{LoadAttemptResult, ModelLoader};
pub use model::{Classifier, InputShape, LoadedModel};
pub use preprocess::ImagePreprocessor;
pub use registry::ModelRegistry;
