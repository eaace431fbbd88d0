//! Integration tests for the gateway HTTP routes.

mod common;

use axum::body::Body;
use axum::http::StatusCode;
use common::*;
use cytoserve_core::gateway::{SharedGateway, gateway_router};
use cytoserve_ml::MlConfig;
use cytoserve_ml::labels::BLOOD_CELL_LABELS;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

async fn send(gw: SharedGateway, req: axum::http::Request<Body>) -> (StatusCode, Value) {
    let app = gateway_router(gw);
    let resp = ServiceExt::<axum::http::Request<Body>>::oneshot(app, req)
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1_000_000)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

async fn get_json(gw: SharedGateway, uri: &str) -> (StatusCode, Value) {
    send(gw, make_request(uri)).await
}

async fn post_json(gw: SharedGateway, uri: &str, body: Value) -> (StatusCode, Value) {
    send(gw, make_post_request(uri, body)).await
}

fn default_gateway() -> SharedGateway {
    make_gateway(make_service(MlConfig::default()))
}

// --- /load_model ---

#[tokio::test]
async fn test_load_missing_path_reports_not_found() {
    let gw = default_gateway();
    let (status, json) = post_json(
        gw.clone(),
        "/load_model",
        json!({"model_path": "/nonexistent/cells.safetensors"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["loaded"], false);
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .starts_with("Model file not found")
    );

    let (_, status_json) = get_json(gw, "/model_status").await;
    assert_eq!(status_json["loaded"], false);
}

#[tokio::test]
async fn test_load_deprecated_shape_field_uses_sanitized_strategy() {
    let dir = TempDir::new().unwrap();
    let path = write_model(
        dir.path(),
        "modern.safetensors",
        &pooled_description(32, CLASSES, true),
        &pooled_weights(CLASSES),
        None,
    );
    let gw = default_gateway();
    let (status, json) = post_json(gw, "/load_model", json!({"model_path": path})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["loaded"], true);
    assert_eq!(json["degraded"], false);
    assert_eq!(json["strategy"], "sanitized");

    let attempts = json["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0]["strategy"], "direct");
    assert_eq!(attempts[0]["success"], false);
    assert_eq!(attempts[1]["strategy"], "sanitized");
    assert_eq!(attempts[1]["success"], true);
    assert_eq!(attempts[1]["bound_tensors"], 2);
}

#[tokio::test]
async fn test_reload_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let path = write_model(
        dir.path(),
        "cells.safetensors",
        &pooled_description(16, CLASSES, false),
        &pooled_weights(CLASSES),
        None,
    );
    let gw = default_gateway();
    let (_, first) = post_json(gw.clone(), "/load_model", json!({"model_path": path})).await;
    assert_eq!(first["message"], "Model loaded successfully");
    assert_eq!(first["strategy"], "direct");

    let (status, second) = post_json(gw, "/load_model", json!({"model_path": path})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["success"], true);
    assert_eq!(second["message"], "Model already loaded");
    assert!(second.get("attempts").is_none());
}

#[tokio::test]
async fn test_load_requires_model_path() {
    let (status, json) = post_json(default_gateway(), "/load_model", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_exhausted_chain_without_degraded_mode_is_unprocessable() {
    let dir = TempDir::new().unwrap();
    let path = write_garbage(dir.path(), "junk.safetensors");
    let mut config = MlConfig::default();
    config.loader.allow_degraded = false;
    let gw = make_gateway(make_service(config));

    let (status, json) = post_json(gw, "/load_model", json!({"model_path": path})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["success"], false);
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .starts_with("Unsupported model schema")
    );
}

// --- /predict ---

#[tokio::test]
async fn test_predict_before_load_is_unavailable() {
    let (status, json) = post_json(
        default_gateway(),
        "/predict",
        json!({"image": png_base64(8, 8)}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json, json!({"error": "Model not loaded"}));
}

#[tokio::test]
async fn test_predict_non_square_image_against_360_model() {
    let dir = TempDir::new().unwrap();
    let path = write_model(
        dir.path(),
        "cells360.safetensors",
        &pooled_description(360, CLASSES, false),
        &pooled_weights(CLASSES),
        None,
    );
    let gw = default_gateway();
    let (status, _) = post_json(gw.clone(), "/load_model", json!({"model_path": path})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = post_json(gw, "/predict", json!({"image": png_base64(800, 600)})).await;
    assert_eq!(status, StatusCode::OK);

    let label = json["cell_type"].as_str().unwrap();
    assert!(BLOOD_CELL_LABELS.contains(&label));
    let confidence = json["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    let probabilities = json["all_probabilities"].as_array().unwrap();
    assert_eq!(probabilities.len(), CLASSES);
    assert_eq!(json["class_labels"].as_array().unwrap().len(), CLASSES);
    let sum: f64 = probabilities.iter().map(|p| p.as_f64().unwrap()).sum();
    assert!((sum - 1.0).abs() < 1e-4);
    assert_eq!(json["degraded"], false);
    assert_eq!(json["anomalous"], false);
}

#[tokio::test]
async fn test_degraded_model_predictions_are_flagged_and_reproducible() {
    let dir = TempDir::new().unwrap();
    let path = write_garbage(dir.path(), "broken.safetensors");
    let gw = default_gateway();

    let (status, load) = post_json(gw.clone(), "/load_model", json!({"model_path": path})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(load["success"], true);
    assert_eq!(load["loaded"], true);
    assert_eq!(load["degraded"], true);
    assert_eq!(load["strategy"], "fallback");
    assert_eq!(load["attempts"].as_array().unwrap().len(), 4);

    let image = png_base64(120, 90);
    let (status, first) = post_json(gw.clone(), "/predict", json!({"image": image})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["degraded"], true);
    let (_, second) = post_json(gw.clone(), "/predict", json!({"image": image})).await;
    assert_eq!(first["cell_type"], second["cell_type"]);
    assert_eq!(first["all_probabilities"], second["all_probabilities"]);

    let (_, health) = get_json(gw, "/health").await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["model_loaded"], true);
}

#[tokio::test]
async fn test_predict_with_invalid_base64_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let path = write_garbage(dir.path(), "broken.safetensors");
    let gw = default_gateway();
    post_json(gw.clone(), "/load_model", json!({"model_path": path})).await;

    let (status, json) = post_json(gw, "/predict", json!({"image": "!!!not-base64!!!"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().starts_with("Image decode error"));
}

#[tokio::test]
async fn test_predict_with_unloaded_model_path_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let path = write_model(
        dir.path(),
        "named.safetensors",
        &pooled_description(24, CLASSES, false),
        &pooled_weights(CLASSES),
        None,
    );
    let gw = default_gateway();
    let image = format!("data:image/png;base64,{}", png_base64(40, 30));
    let request = json!({"image": image, "model_path": path});

    let (status, json) = post_json(gw.clone(), "/predict", request.clone()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json, json!({"error": "Model not loaded"}));
    let (_, status_json) = get_json(gw.clone(), "/model_status").await;
    assert_eq!(status_json["loaded"], false);

    post_json(gw.clone(), "/load_model", json!({"model_path": path})).await;
    let (status, json) = post_json(gw, "/predict", request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["strategy"], "direct");
}

#[tokio::test]
async fn test_label_count_mismatch_is_flagged_not_fatal() {
    let dir = TempDir::new().unwrap();
    // Six outputs against nine configured labels.
    let path = write_model(
        dir.path(),
        "six.safetensors",
        &pooled_description(16, 6, false),
        &pooled_weights(6),
        None,
    );
    let gw = default_gateway();
    post_json(gw.clone(), "/load_model", json!({"model_path": path})).await;

    let (status, json) = post_json(gw, "/predict", json!({"image": png_base64(16, 16)})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["anomalous"], true);
    assert_eq!(json["all_probabilities"].as_array().unwrap().len(), CLASSES);
}

// --- status, health, labels ---

#[tokio::test]
async fn test_model_status_after_load() {
    let dir = TempDir::new().unwrap();
    let path = write_model(
        dir.path(),
        "cells.safetensors",
        &pooled_description(16, CLASSES, false),
        &pooled_weights(CLASSES),
        Some(&BLOOD_CELL_LABELS[..]),
    );
    let gw = default_gateway();
    post_json(gw.clone(), "/load_model", json!({"model_path": path})).await;

    let (status, json) = get_json(gw.clone(), "/model_status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["loaded"], true);
    assert_eq!(json["degraded"], false);
    assert_eq!(json["strategy"], "direct");
    assert_eq!(json["resident_models"], 1);
    assert!(json["loaded_at"].is_string());
    assert!(
        json["model_path"]
            .as_str()
            .unwrap()
            .ends_with("cells.safetensors")
    );

    let (_, health) = get_json(gw, "/health").await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["model_loaded"], true);
}

#[tokio::test]
async fn test_model_status_before_load() {
    let (status, json) = get_json(default_gateway(), "/model_status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["loaded"], false);
    assert_eq!(json["model_path"], Value::Null);
    assert!(json.get("strategy").is_none());
}

#[tokio::test]
async fn test_labels_endpoint_lists_configured_order() {
    let (status, json) = get_json(default_gateway(), "/labels").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 9);
    let labels: Vec<&str> = json["class_labels"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(labels, BLOOD_CELL_LABELS.to_vec());
}

#[tokio::test]
async fn test_custom_labels_flow_into_predictions() {
    let config = MlConfig {
        class_labels: vec!["alpha".into(), "beta".into(), "gamma".into()],
        ..Default::default()
    };
    let dir = TempDir::new().unwrap();
    let path = write_garbage(dir.path(), "broken.safetensors");
    let gw = make_gateway(make_service(config));
    post_json(gw.clone(), "/load_model", json!({"model_path": path})).await;

    let (status, json) = post_json(gw, "/predict", json!({"image": png_base64(10, 10)})).await;
    assert_eq!(status, StatusCode::OK);
    let label = json["cell_type"].as_str().unwrap();
    assert!(["alpha", "beta", "gamma"].contains(&label));
    assert_eq!(json["all_probabilities"].as_array().unwrap().len(), 3);
}
