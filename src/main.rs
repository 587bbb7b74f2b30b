// src/main.rs

//! The main entry point for the gatebridge server.

use anyhow::Result;
use gatebridge::config::Config;
use gatebridge::core::upstream::SimulatorControl;
use gatebridge::server;
use std::env;
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

/// Read when no `--config` flag is given, if it exists.
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("GATEBRIDGE_BUILD_VERSION");
    const PROFILE: &str = env!("GATEBRIDGE_BUILD_PROFILE");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("gatebridge version {VERSION} ({PROFILE})");
        return Ok(());
    }

    // An explicit --config must exist; the default path is optional.
    let explicit_path = match args.iter().position(|arg| arg == "--config") {
        Some(i) => match args.get(i + 1) {
            Some(path) => Some(path.as_str()),
            None => {
                eprintln!("--config flag requires a value");
                std::process::exit(1);
            }
        },
        None => None,
    };
    let config_path = explicit_path.or_else(|| {
        Path::new(DEFAULT_CONFIG_PATH)
            .exists()
            .then_some(DEFAULT_CONFIG_PATH)
    });

    let config = match Config::load(config_path.map(Path::new), None) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!(
                "Failed to load configuration from \"{}\": {e:#}",
                config_path.unwrap_or("environment")
            );
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level.
    let mut log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    if config.debug_logging {
        log_level.push_str(",gatebridge=debug");
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    info!("Starting gatebridge {VERSION}...");

    // The bundled binary drives the in-process simulated gateway.
    let control = SimulatorControl::new();
    if let Err(e) = server::run(config, move || control.gateway()).await {
        error!("Bridge runtime error: {e:#}");
        return Err(e);
    }
    Ok(())
}
