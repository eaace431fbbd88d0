//! # HTTP Gateway
//!
//! JSON-over-HTTP front end for the [`crate::ClassifierService`]: model
//! loading, prediction, status and health routes.

pub mod events;
mod server;

pub use events::{
    ErrorResponse, LabelsResponse, LoadModelRequest, LoadModelResponse, PredictRequest,
    PredictResponse,
};
pub use server::{GatewayState, SharedGateway, router as gateway_router, run as run_gateway};

use serde::{Deserialize, Serialize};

/// Configuration for the HTTP gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_body_bytes: 32 * 1024 * 1024,
            cors_origins: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_default() {
        let config = GatewayConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.max_body_bytes, 32 * 1024 * 1024);
        assert!(config.cors_origins.is_empty());
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
    }

    #[test]
    fn test_gateway_config_serialization() {
        let config = GatewayConfig {
            host: "127.0.0.1".into(),
            port: 9090,
            max_body_bytes: 1024,
            cors_origins: vec!["http://localhost:3000".into()],
        };
        let json = serde_json::to_string(&config).unwrap();
        let restored: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.host, "127.0.0.1");
        assert_eq!(restored.port, 9090);
        assert_eq!(restored.cors_origins, vec!["http://localhost:3000"]);
    }
}
