//! Configuration system for cytoserve.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> explicit file -> environment -> CLI flags.
//! Files are read from the platform config dir (`config.toml`) and
//! `.cytoserve/config.toml` in the workspace directory.

use cytoserve_ml::MlConfig;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::gateway::GatewayConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub ml: MlConfig,
}

impl AppConfig {
    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Values supplied on the command line. Only fields that are set take part
/// in the merge.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub model_path: Option<PathBuf>,
    pub allow_degraded: Option<bool>,
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "cytoserve", "cytoserve")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration by merging all layers.
///
/// `config_file` is an explicit file passed by the caller; it may be TOML or
/// JSON (chosen by extension) and must exist.
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<AppConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    // User-level config
    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".cytoserve").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(file) = config_file {
        if !file.exists() {
            return Err(Box::new(figment::Error::from(format!(
                "config file not found: {}",
                file.display()
            ))));
        }
        let is_json = file
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        figment = if is_json {
            figment.merge(Json::file(file))
        } else {
            figment.merge(Toml::file(file))
        };
    }

    // Environment variables (CYTOSERVE_GATEWAY__PORT, CYTOSERVE_ML__MODEL_PATH, etc.)
    figment = figment.merge(Env::prefixed("CYTOSERVE_").split("__"));

    if let Some(host) = &overrides.host {
        figment = figment.merge(Serialized::default("gateway.host", host));
    }
    if let Some(port) = overrides.port {
        figment = figment.merge(Serialized::default("gateway.port", port));
    }
    if let Some(model_path) = &overrides.model_path {
        figment = figment.merge(Serialized::default("ml.model_path", model_path));
    }
    if let Some(allow) = overrides.allow_degraded {
        figment = figment.merge(Serialized::default("ml.loader.allow_degraded", allow));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| ws.join(".cytoserve").join("config.toml").exists())
}
