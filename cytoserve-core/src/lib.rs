//! # cytoserve-core
//!
//! Service layer on top of `cytoserve-ml`: layered configuration, the
//! `ClassifierService` that owns the model registry, and the HTTP gateway
//! that exposes it.

pub mod config;
pub mod error;
pub mod gateway;
pub mod service;

pub use config::{AppConfig, ConfigOverrides, load_config};
pub use error::{Result, ServiceError};
pub use gateway::{GatewayConfig, gateway_router, run_gateway};
pub use service::{ClassifierService, HealthReport, LoadOutcome, ModelStatus};
