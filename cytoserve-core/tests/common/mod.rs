//! Shared fixtures for the cytoserve-core integration tests.

#![allow(dead_code)]

use axum::body::Body;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cytoserve_core::gateway::{GatewayState, SharedGateway};
use cytoserve_core::{ClassifierService, GatewayConfig};
use cytoserve_ml::MlConfig;
use cytoserve_ml::artifact::{CLASS_LABELS_KEY, MODEL_CONFIG_KEY, RawTensor, write_artifact};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CLASSES: usize = 9;

/// `InputLayer → GlobalAveragePooling2D → Dense(classes, softmax)`.
///
/// With `batch_shape` the input layer uses the newer field name that the
/// runtime rejects until it is sanitized.
pub fn pooled_description(resolution: usize, classes: usize, batch_shape: bool) -> Value {
    let input = if batch_shape {
        json!({"name": "input_layer", "batch_shape": [null, resolution, resolution, 3], "dtype": "float32"})
    } else {
        json!({"name": "input_layer", "input_shape": [resolution, resolution, 3], "dtype": "float32"})
    };
    json!({
        "class_name": "Sequential",
        "config": {
            "name": "sequential",
            "layers": [
                {"class_name": "InputLayer", "config": input},
                {"class_name": "GlobalAveragePooling2D", "config": {"name": "pool"}},
                {"class_name": "Dense", "config": {"name": "dense", "units": classes, "activation": "softmax"}}
            ]
        }
    })
}

/// Weights for [`pooled_description`]: the red channel mean drives the last
/// class.
pub fn pooled_weights(classes: usize) -> Vec<RawTensor> {
    let mut kernel = vec![0.0f32; 3 * classes];
    kernel[classes - 1] = 4.0;
    vec![
        RawTensor::new("dense/kernel:0", vec![3, classes], kernel),
        RawTensor::filled("dense/bias:0", vec![classes], 0.0),
    ]
}

pub fn write_model(
    dir: &Path,
    file: &str,
    description: &Value,
    tensors: &[RawTensor],
    labels: Option<&[&str]>,
) -> PathBuf {
    let path = dir.join(file);
    let mut metadata = HashMap::new();
    metadata.insert(MODEL_CONFIG_KEY.to_string(), description.to_string());
    if let Some(labels) = labels {
        metadata.insert(CLASS_LABELS_KEY.to_string(), json!(labels).to_string());
    }
    write_artifact(&path, tensors, metadata).unwrap();
    path
}

/// A file no strategy can make sense of.
pub fn write_garbage(dir: &Path, file: &str) -> PathBuf {
    let path = dir.join(file);
    std::fs::write(&path, b"GARBAGE-NOT-A-WEIGHT-CONTAINER").unwrap();
    path
}

pub fn png_base64(width: u32, height: u32) -> String {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x * y) % 239) as u8])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    STANDARD.encode(buf.into_inner())
}

pub fn make_service(config: MlConfig) -> Arc<ClassifierService> {
    Arc::new(ClassifierService::new(config).unwrap())
}

pub fn make_gateway(service: Arc<ClassifierService>) -> SharedGateway {
    Arc::new(GatewayState::new(service, GatewayConfig::default()))
}

pub fn make_request(uri: &str) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn make_post_request(uri: &str, body: Value) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}
