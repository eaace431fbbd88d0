//! Artifact fixtures for unit tests.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::artifact::{CLASS_LABELS_KEY, MODEL_CONFIG_KEY, RawTensor, write_artifact};
use crate::runtime::template;

/// `InputLayer → Flatten → Dense(classes, softmax)` over an `[h, w, c]`
/// input. With `batch_shape` the input is declared the way newer
/// serializers write it.
pub fn dense_description(input: [usize; 3], classes: usize, batch_shape: bool) -> Value {
    let input_config = if batch_shape {
        json!({"name": "input_layer", "batch_shape": [null, input[0], input[1], input[2]], "dtype": "float32"})
    } else {
        json!({"name": "input_layer", "input_shape": input, "dtype": "float32"})
    };
    json!({
        "class_name": "Sequential",
        "config": {
            "name": "sequential",
            "layers": [
                {"class_name": "InputLayer", "config": input_config},
                {"class_name": "Flatten", "config": {"name": "flatten"}},
                {"class_name": "Dense", "config": {"name": "dense", "units": classes, "activation": "softmax"}}
            ]
        }
    })
}

/// Weights for [`dense_description`]. The kernel routes the first input
/// value to class `classes - 1`.
pub fn dense_weights(input: [usize; 3], classes: usize) -> Vec<RawTensor> {
    let features: usize = input.iter().product();
    let mut kernel = vec![0.0f32; features * classes];
    kernel[classes - 1] = 10.0;
    vec![
        RawTensor::new("dense/kernel:0", vec![features, classes], kernel),
        RawTensor::filled("dense/bias:0", vec![classes], 0.0),
    ]
}

/// Tensors shaped for the template CNN at `resolution`, all filled with a
/// small constant.
pub fn template_weights(classes: usize, resolution: usize) -> Vec<RawTensor> {
    template(classes, resolution)
        .expected_params()
        .unwrap()
        .into_iter()
        .map(|(name, shape)| RawTensor::filled(name, shape, 0.01))
        .collect()
}

/// Write an artifact into `dir` and return its path.
pub fn write_model(
    dir: &Path,
    file: &str,
    description: Option<&Value>,
    tensors: &[RawTensor],
    labels: Option<&[&str]>,
) -> PathBuf {
    let path = dir.join(file);
    let mut metadata = HashMap::new();
    if let Some(description) = description {
        metadata.insert(MODEL_CONFIG_KEY.to_string(), description.to_string());
    }
    if let Some(labels) = labels {
        metadata.insert(CLASS_LABELS_KEY.to_string(), json!(labels).to_string());
    }
    write_artifact(&path, tensors, metadata).unwrap();
    path
}
