//! Inference executor: forward pass → bounded, labeled result.

use candle_core::Tensor;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::MlError;
use crate::labels::ClassLabelSet;
use crate::model::LoadedModel;

/// Tolerance used to decide whether scores already form a distribution.
const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

/// One classification outcome.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    pub label: String,
    /// Position in the label set. `None` when the model pointed past it.
    pub index: Option<usize>,
    /// Argmax over the raw model output.
    pub raw_index: usize,
    pub confidence: f32,
    /// Always exactly one entry per class label.
    pub probabilities: Vec<f32>,
    pub timestamp: DateTime<Utc>,
    pub degraded: bool,
    /// Output length disagreed with the label count.
    pub anomalous: bool,
    pub strategy: String,
}

/// Scores turned into a label decision, before attaching model metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub label: String,
    pub index: Option<usize>,
    pub raw_index: usize,
    pub confidence: f32,
    pub probabilities: Vec<f32>,
    pub anomalous: bool,
}

/// Run `model` on a prepared tensor and label the result.
///
/// Pure read of the model; safe to call concurrently.
pub fn classify(
    model: &LoadedModel,
    input: &Tensor,
    labels: &ClassLabelSet,
) -> Result<PredictionResult, MlError> {
    let expected = model.input_shape().batch_dims();
    if input.dims() != expected.as_slice() {
        return Err(MlError::ShapeMismatch {
            expected,
            actual: input.dims().to_vec(),
        });
    }

    let scores = model.classifier.predict(input)?;
    let interpretation = interpret(&scores, labels)?;

    Ok(PredictionResult {
        label: interpretation.label,
        index: interpretation.index,
        raw_index: interpretation.raw_index,
        confidence: interpretation.confidence,
        probabilities: interpretation.probabilities,
        timestamp: Utc::now(),
        degraded: model.is_degraded(),
        anomalous: interpretation.anomalous,
        strategy: model.strategy.clone(),
    })
}

/// Normalize raw scores and pick a label, never indexing out of bounds.
pub fn interpret(scores: &[f32], labels: &ClassLabelSet) -> Result<Interpretation, MlError> {
    if scores.is_empty() {
        return Err(MlError::inference("model produced an empty output"));
    }
    let probs = to_distribution(scores);
    let raw_index = argmax(&probs);
    let confidence = probs[raw_index].clamp(0.0, 1.0);

    let anomalous = probs.len() != labels.len();
    if anomalous {
        let anomaly = MlError::IndexAnomaly {
            outputs: probs.len(),
            labels: labels.len(),
        };
        warn!(error = %anomaly, raw_index, "Output does not match the class label set");
    }

    let (label, index) = match labels.get(raw_index) {
        Some(label) => (label.to_string(), Some(raw_index)),
        None => (ClassLabelSet::placeholder(raw_index), None),
    };

    let mut probabilities = probs;
    probabilities.resize(labels.len(), 0.0);

    Ok(Interpretation {
        label,
        index,
        raw_index,
        confidence,
        probabilities,
        anomalous,
    })
}

/// Softmax the scores unless they already sum to one without negatives.
fn to_distribution(scores: &[f32]) -> Vec<f32> {
    let clean: Vec<f32> = scores
        .iter()
        .map(|&s| if s.is_finite() { s } else { 0.0 })
        .collect();
    let sum: f32 = clean.iter().sum();
    if clean.iter().all(|&p| p >= 0.0) && (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE {
        return clean;
    }
    let max = clean.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = clean.iter().map(|&s| (s - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Index of the largest value; the first one wins ties.
fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FallbackClassifier;
    use crate::model::InputShape;
    use candle_core::{DType, Device};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn labels(n: usize) -> ClassLabelSet {
        ClassLabelSet::new((0..n).map(|i| format!("L{i}")).collect()).unwrap()
    }

    #[test]
    fn test_distribution_passthrough() {
        let out = interpret(&[0.1, 0.7, 0.2], &labels(3)).unwrap();
        assert_eq!(out.label, "L1");
        assert_eq!(out.index, Some(1));
        assert_eq!(out.probabilities, vec![0.1, 0.7, 0.2]);
        assert!((out.confidence - 0.7).abs() < 1e-6);
        assert!(!out.anomalous);
    }

    #[test]
    fn test_logits_are_softmaxed() {
        let out = interpret(&[2.0, -1.0, 0.5], &labels(3)).unwrap();
        assert_eq!(out.index, Some(0));
        let sum: f32 = out.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(out.probabilities.iter().all(|&p| p > 0.0 && p < 1.0));
    }

    #[test]
    fn test_ties_pick_first() {
        let out = interpret(&[0.25, 0.25, 0.25, 0.25], &labels(4)).unwrap();
        assert_eq!(out.raw_index, 0);
    }

    #[test]
    fn test_short_output_padded() {
        let out = interpret(&[0.2, 0.8], &labels(4)).unwrap();
        assert!(out.anomalous);
        assert_eq!(out.label, "L1");
        assert_eq!(out.probabilities, vec![0.2, 0.8, 0.0, 0.0]);
    }

    #[test]
    fn test_long_output_gets_placeholder() {
        let out = interpret(&[0.1, 0.1, 0.1, 0.7], &labels(2)).unwrap();
        assert!(out.anomalous);
        assert_eq!(out.label, "class_3");
        assert_eq!(out.index, None);
        assert_eq!(out.raw_index, 3);
        assert_eq!(out.probabilities.len(), 2);
    }

    #[test]
    fn test_non_finite_scores() {
        let out = interpret(&[f32::NAN, 1.0, f32::INFINITY], &labels(3)).unwrap();
        assert_eq!(out.index, Some(1));
        assert!(out.probabilities.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_empty_output_is_error() {
        assert!(matches!(interpret(&[], &labels(3)), Err(MlError::Inference(_))));
    }

    #[test]
    fn test_classify_checks_shape_and_marks_degraded() {
        let shape = InputShape::square(6);
        let model = LoadedModel::new(
            PathBuf::from("m.safetensors"),
            Arc::new(FallbackClassifier::new(3, shape)),
            "fallback",
        );
        let ok = Tensor::zeros((1, 6, 6, 3), DType::F32, &Device::Cpu).unwrap();
        let result = classify(&model, &ok, &labels(3)).unwrap();
        assert!(result.degraded);
        assert_eq!(result.strategy, "fallback");
        assert_eq!(result.probabilities.len(), 3);

        let bad = Tensor::zeros((1, 5, 6, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            classify(&model, &bad, &labels(3)),
            Err(MlError::ShapeMismatch { .. })
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn index_always_within_labels(
                scores in prop::collection::vec(-50.0f32..50.0, 1..20),
                n in 1usize..12,
            ) {
                let out = interpret(&scores, &labels(n)).unwrap();
                prop_assert_eq!(out.probabilities.len(), n);
                if let Some(i) = out.index {
                    prop_assert!(i < n);
                }
                prop_assert!((0.0..=1.0).contains(&out.confidence));
                prop_assert_eq!(out.anomalous, scores.len() != n);
            }
        }
    }
}
