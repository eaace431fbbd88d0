//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cytoserve_core::gateway::{GatewayState, run_gateway};
use cytoserve_core::{AppConfig, ClassifierService, ConfigOverrides, load_config};
use cytoserve_ml::{ArtifactInspection, ClassLabelSet, LoadedModel, ModelLoader, PredictionResult};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            host,
            port,
            model,
            no_degraded,
        } => {
            let overrides = ConfigOverrides {
                host,
                port,
                model_path: model,
                allow_degraded: no_degraded.then_some(false),
            };
            let config = load(workspace, config_file, &overrides)?;
            handle_serve(config).await
        }
        Commands::Inspect { path, load: run_chain, json } => {
            let config = load(workspace, config_file, &ConfigOverrides::default())?;
            handle_inspect(&config, &path, run_chain, json).await
        }
        Commands::Classify { model, image, json } => {
            let config = load(workspace, config_file, &ConfigOverrides::default())?;
            handle_classify(config, &model, &image, json).await
        }
        Commands::Config { action } => handle_config(action, workspace, config_file),
    }
}

fn load(
    workspace: &Path,
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> anyhow::Result<AppConfig> {
    load_config(Some(workspace), config_file, overrides)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

async fn handle_serve(config: AppConfig) -> anyhow::Result<()> {
    let service = Arc::new(ClassifierService::new(config.ml)?);

    // A broken startup model should not keep the server down; clients can
    // still load another one.
    match service.warm_start().await {
        Ok(Some(outcome)) => info!(
            path = %outcome.model.path.display(),
            strategy = %outcome.model.strategy,
            degraded = outcome.model.is_degraded(),
            "Startup model loaded"
        ),
        Ok(None) => info!("No startup model configured; waiting for /load_model"),
        Err(e) => error!(error = %e, "Startup model failed to load"),
    }

    let gateway = Arc::new(GatewayState::new(service, config.gateway));
    run_gateway(gateway).await?;
    Ok(())
}

async fn handle_inspect(
    config: &AppConfig,
    path: &Path,
    run_chain: bool,
    json: bool,
) -> anyhow::Result<()> {
    let inspection = cytoserve_ml::inspect(path)?;
    let model = if run_chain {
        let labels = ClassLabelSet::new(config.ml.class_labels.clone())
            .ok_or_else(|| anyhow::anyhow!("class_labels must not be empty"))?;
        let loader = ModelLoader::new(config.ml.loader.clone(), labels.len());
        Some(loader.load(path).await?)
    } else {
        None
    };

    if json {
        let mut value = serde_json::to_value(&inspection)?;
        if let Some(model) = &model {
            value["load"] = serde_json::json!({
                "strategy": model.strategy,
                "degraded": model.is_degraded(),
                "input_shape": model.input_shape(),
                "attempts": model.attempts,
            });
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print!("{}", render_inspection(&inspection));
        if let Some(model) = &model {
            print!("{}", render_load(model));
        }
    }
    Ok(())
}

async fn handle_classify(
    config: AppConfig,
    model: &Path,
    image: &Path,
    json: bool,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(image)
        .map_err(|e| anyhow::anyhow!("Cannot read image {}: {}", image.display(), e))?;
    let service = ClassifierService::new(config.ml)?;
    let loaded = service.load_model(model).await?;
    let result = service
        .predict(STANDARD.encode(bytes), Some(&loaded.model.path))
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_prediction(&result, service.labels()));
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".cytoserve");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = AppConfig::default().to_toml()?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, config_file, &ConfigOverrides::default())?;
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn render_inspection(inspection: &ArtifactInspection) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Artifact:     {}", inspection.path.display());
    let _ = writeln!(out, "Size:         {} bytes", inspection.size_bytes);
    let description = match &inspection.description {
        Some(desc) => desc
            .get("class_name")
            .and_then(|v| v.as_str())
            .unwrap_or("present")
            .to_string(),
        None => "none".to_string(),
    };
    let _ = writeln!(out, "Description:  {description}");
    if let Some(producer) = &inspection.producer {
        let _ = writeln!(out, "Producer:     {producer}");
    }
    if let Some(labels) = &inspection.class_labels {
        let _ = writeln!(out, "Labels:       {}", labels.join(", "));
    }
    let _ = writeln!(out, "Tensors:      {}", inspection.tensor_count());
    for (name, spec) in &inspection.inventory {
        let _ = writeln!(out, "  {name:<32} {:<5} {:?}", spec.dtype, spec.shape);
    }
    for warning in &inspection.warnings {
        let _ = writeln!(out, "Warning:      {warning}");
    }
    out
}

fn render_load(model: &LoadedModel) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Loaded via:   {}{}",
        model.strategy,
        if model.is_degraded() { " (degraded)" } else { "" }
    );
    let _ = writeln!(out, "Input shape:  {}", model.input_shape());
    for attempt in &model.attempts {
        let outcome = if attempt.success {
            "ok".to_string()
        } else {
            attempt.error.clone().unwrap_or_else(|| "failed".into())
        };
        let _ = writeln!(
            out,
            "  {:<16} {:>6} ms  {outcome}",
            attempt.strategy, attempt.elapsed_ms
        );
    }
    out
}

fn render_prediction(result: &PredictionResult, labels: &ClassLabelSet) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({:.1}%){}",
        result.label,
        result.confidence * 100.0,
        if result.degraded { " [degraded]" } else { "" }
    );
    let mut ranked: Vec<(usize, f32)> = result.probabilities.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (index, probability) in ranked.into_iter().take(3) {
        let label = labels
            .get(index)
            .map(str::to_string)
            .unwrap_or_else(|| ClassLabelSet::placeholder(index));
        let _ = writeln!(out, "  {label:<24} {:.4}", probability);
    }
    if result.anomalous {
        let _ = writeln!(out, "  note: model output size differs from the label count");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cli;
    use clap::Parser;
    use cytoserve_ml::{FallbackClassifier, InputShape};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn test_parse_serve_flags() {
        let cli = Cli::try_parse_from([
            "cytoserve", "-vv", "serve", "--port", "9000", "--model", "m.safetensors",
            "--no-degraded",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Serve {
                host,
                port,
                model,
                no_degraded,
            } => {
                assert!(host.is_none());
                assert_eq!(port, Some(9000));
                assert_eq!(model, Some(PathBuf::from("m.safetensors")));
                assert!(no_degraded);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_classify_requires_model() {
        assert!(Cli::try_parse_from(["cytoserve", "classify", "cell.png"]).is_err());
        let cli =
            Cli::try_parse_from(["cytoserve", "classify", "-m", "m.safetensors", "cell.png"])
                .unwrap();
        assert!(matches!(cli.command, Commands::Classify { json: false, .. }));
    }

    #[test]
    fn test_config_init_writes_once() {
        let dir = tempfile::TempDir::new().unwrap();
        handle_config(ConfigAction::Init, dir.path(), None).unwrap();
        let path = dir.path().join(".cytoserve/config.toml");
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[gateway]"));

        std::fs::write(&path, "# edited\n").unwrap();
        handle_config(ConfigAction::Init, dir.path(), None).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# edited\n");
    }

    #[test]
    fn test_render_prediction_top_three() {
        let labels = ClassLabelSet::new(vec!["a".into(), "b".into(), "c".into(), "d".into()])
            .unwrap();
        let result = PredictionResult {
            label: "c".into(),
            index: Some(2),
            raw_index: 2,
            confidence: 0.5,
            probabilities: vec![0.1, 0.15, 0.5, 0.25],
            timestamp: Default::default(),
            degraded: true,
            anomalous: false,
            strategy: "fallback".into(),
        };
        let text = render_prediction(&result, &labels);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "c (50.0%) [degraded]");
        assert!(lines[1].trim_start().starts_with('c'));
        assert!(lines[2].trim_start().starts_with('d'));
        assert!(lines[3].trim_start().starts_with('b'));
    }

    #[test]
    fn test_render_load_lists_attempts() {
        let mut model = LoadedModel::new(
            PathBuf::from("/m/x.safetensors"),
            Arc::new(FallbackClassifier::new(9, InputShape::square(32))),
            "fallback",
        );
        model.attempts = vec![cytoserve_ml::LoadAttemptResult {
            strategy: "direct".into(),
            success: false,
            error: Some("no description".into()),
            elapsed_ms: 3,
            bound_tensors: None,
        }];
        let text = render_load(&model);
        assert!(text.contains("fallback (degraded)"));
        assert!(text.contains("direct"));
        assert!(text.contains("no description"));
    }
}
