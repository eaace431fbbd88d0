//! cytoserve CLI: serve, inspect and try out blood-cell classifiers.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// cytoserve: blood-cell image classification server
#[derive(Parser, Debug)]
#[command(name = "cytoserve", version, about, long_about = None)]
pub struct Cli {
    /// Workspace directory (holds `.cytoserve/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Model artifact to load at startup
        #[arg(short, long)]
        model: Option<PathBuf>,
        /// Fail loads instead of installing the fallback model
        #[arg(long)]
        no_degraded: bool,
    },
    /// Inspect a model artifact without serving it
    Inspect {
        /// Path to the artifact
        path: PathBuf,
        /// Also run the load chain and report every attempt
        #[arg(long)]
        load: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Classify one image file
    Classify {
        /// Path to the model artifact
        #[arg(short, long)]
        model: PathBuf,
        /// Image file (PNG, JPEG, BMP, GIF or TIFF)
        image: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default config to `.cytoserve/config.toml`
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_filter =
        EnvFilter::try_from_env("CYTOSERVE_LOG").unwrap_or_else(|_| EnvFilter::new(filter));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let log_dir = directories::ProjectDirs::from("dev", "cytoserve", "cytoserve")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "cytoserve.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}
