//! Axum router, handlers and the serve loop.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::GatewayConfig;
use super::events::{
    LabelsResponse, LoadModelRequest, LoadModelResponse, PredictRequest, PredictResponse,
};
use crate::error::ServiceError;
use crate::service::ClassifierService;

/// State shared by every handler.
#[derive(Debug)]
pub struct GatewayState {
    pub service: Arc<ClassifierService>,
    pub config: GatewayConfig,
    started_at: Instant,
}

impl GatewayState {
    pub fn new(service: Arc<ClassifierService>, config: GatewayConfig) -> Self {
        Self {
            service,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedGateway = Arc<GatewayState>;

/// Build the axum router.
pub fn router(shared: SharedGateway) -> Router {
    let cors = cors_layer(&shared.config.cors_origins);
    let body_limit = shared.config.max_body_bytes;
    Router::new()
        .route("/load_model", post(load_model_handler))
        .route("/predict", post(predict_handler))
        .route("/model_status", get(model_status_handler))
        .route("/health", get(health_handler))
        .route("/labels", get(labels_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

/// Malformed bodies are the caller's fault; oversized ones keep their 413.
fn rejection_error(rejection: JsonRejection) -> (StatusCode, ServiceError) {
    let status = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        StatusCode::PAYLOAD_TOO_LARGE
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, ServiceError::BadRequest(rejection.body_text()))
}

async fn load_model_handler(
    State(gw): State<SharedGateway>,
    payload: Result<Json<LoadModelRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            let (status, err) = rejection_error(rejection);
            return (status, Json(LoadModelResponse::failed(None, &err))).into_response();
        }
    };

    info!(path = %req.model_path.display(), "Load model request");
    match gw.service.load_model(&req.model_path).await {
        Ok(outcome) => Json(LoadModelResponse::loaded(&outcome)).into_response(),
        Err(err) => {
            warn!(path = %req.model_path.display(), error = %err, "Model load failed");
            (
                err.status_code(),
                Json(LoadModelResponse::failed(Some(req.model_path), &err)),
            )
                .into_response()
        }
    }
}

async fn predict_handler(
    State(gw): State<SharedGateway>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            let (status, err) = rejection_error(rejection);
            return (status, err).into_response();
        }
    };

    match gw.service.predict(req.image, req.model_path.as_deref()).await {
        Ok(result) => Json(PredictResponse::new(result, gw.service.labels())).into_response(),
        Err(err) => {
            warn!(error = %err, "Prediction failed");
            err.into_response()
        }
    }
}

async fn model_status_handler(State(gw): State<SharedGateway>) -> impl IntoResponse {
    Json(gw.service.status().await)
}

/// Health check endpoint.
async fn health_handler(State(gw): State<SharedGateway>) -> impl IntoResponse {
    let health = gw.service.health().await;
    let body = serde_json::json!({
        "status": health.status,
        "model_loaded": health.model_loaded,
        "uptime_secs": gw.uptime_secs(),
    });
    Json(body)
}

async fn labels_handler(State(gw): State<SharedGateway>) -> impl IntoResponse {
    let labels = gw.service.labels();
    Json(LabelsResponse {
        class_labels: labels.as_slice().to_vec(),
        count: labels.len(),
    })
}

/// Bind and serve until Ctrl-C.
pub async fn run(gw: SharedGateway) -> Result<(), std::io::Error> {
    let addr = gw.config.bind_addr();
    let app = router(gw);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C; serving until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
