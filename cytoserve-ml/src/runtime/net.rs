//! Runnable sequential networks and weight binding.

use candle_core::{DType, Tensor};
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use super::layers::Layer;
use crate::artifact::WeightStore;
use crate::error::MlError;
use crate::model::{Classifier, InputShape};

/// How binding treats absent or mis-shaped tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindPolicy {
    /// Fail on the first missing or mis-shaped tensor.
    Strict,
    /// Skip such slots and leave their initial values in place.
    SkipMismatch,
}

/// Outcome of binding a weight store onto a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BindReport {
    /// Parameter slots the network declares.
    pub expected: usize,
    /// Slots that received a stored tensor.
    pub bound: usize,
    pub missing: Vec<String>,
    /// Slots whose stored tensor had the wrong shape.
    pub mismatched: Vec<String>,
    /// Stored tensors no slot asked for.
    pub unused: Vec<String>,
}

impl BindReport {
    pub fn is_complete(&self) -> bool {
        self.expected > 0 && self.bound == self.expected
    }
}

/// A linear stack of layers over an NHWC input.
#[derive(Debug, Clone)]
pub struct SequentialNet {
    name: String,
    input: InputShape,
    layers: Vec<Layer>,
}

impl SequentialNet {
    pub fn new(name: impl Into<String>, input: InputShape, layers: Vec<Layer>) -> Self {
        Self {
            name: name.into(),
            input,
            layers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn param_count(&self) -> usize {
        self.layers
            .iter()
            .flat_map(|l| l.kind.params())
            .map(|(_, t)| t.elem_count())
            .sum()
    }

    /// Copy stored tensors into parameter slots by `<layer>/<param>` name.
    pub fn bind(&mut self, weights: &WeightStore, policy: BindPolicy) -> Result<BindReport, MlError> {
        let mut report = BindReport::default();
        let mut used = HashSet::new();

        for Layer { name, kind } in &mut self.layers {
            for (param, slot) in kind.params_mut() {
                let key = format!("{name}/{param}");
                report.expected += 1;
                match weights.get(&key) {
                    None => {
                        if policy == BindPolicy::Strict {
                            return Err(MlError::binding(format!("missing tensor '{key}'")));
                        }
                        report.missing.push(key);
                    }
                    Some(stored) if stored.dims() != slot.dims() => {
                        if policy == BindPolicy::Strict {
                            return Err(MlError::binding(format!(
                                "tensor '{key}' has shape {:?}, expected {:?}",
                                stored.dims(),
                                slot.dims()
                            )));
                        }
                        used.insert(key.clone());
                        report.mismatched.push(key);
                    }
                    Some(stored) => {
                        *slot = stored.to_dtype(DType::F32)?;
                        used.insert(key);
                        report.bound += 1;
                    }
                }
            }
        }

        report.unused = weights
            .names()
            .into_iter()
            .filter(|n| !used.contains(*n))
            .map(str::to_string)
            .collect();

        debug!(
            net = %self.name,
            expected = report.expected,
            bound = report.bound,
            missing = report.missing.len(),
            mismatched = report.mismatched.len(),
            "Bound weights"
        );
        Ok(report)
    }

    /// Run the network on an NHWC batch. Returns `[N, outputs]`.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor, MlError> {
        let mut x = input.to_dtype(DType::F32)?.permute((0, 3, 1, 2))?;
        for layer in &self.layers {
            x = layer
                .kind
                .forward(&x)
                .map_err(|e| MlError::inference(format!("layer '{}': {e}", layer.name)))?;
        }
        Ok(x)
    }
}

impl Classifier for SequentialNet {
    fn predict(&self, input: &Tensor) -> Result<Vec<f32>, MlError> {
        let expected = self.input.batch_dims();
        if input.dims() != expected.as_slice() {
            return Err(MlError::ShapeMismatch {
                expected,
                actual: input.dims().to_vec(),
            });
        }
        let output = self.forward(input)?;
        if output.rank() != 2 {
            return Err(MlError::inference(format!(
                "expected a [batch, classes] output, got {:?}",
                output.dims()
            )));
        }
        Ok(output.get(0)?.to_vec1::<f32>()?)
    }

    fn input_shape(&self) -> InputShape {
        self.input
    }
}
