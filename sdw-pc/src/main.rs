//! sdw-pc - solar dewatering pump controller
//!
//! Runs the control loop in the background and serves the HTTP API until
//! Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use sdw_common::config::TomlConfig;
use sdw_common::{Clock, SystemClock};
use sdw_pc::api::AppContext;
use sdw_pc::control_loop::ControlLoop;
use sdw_pc::predictor;
use sdw_pc::state::{SharedState, StateSettings};
use sdw_pc::weather::{OpenMeteoClient, SyntheticWeather, WeatherProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "sdw-pc")]
#[command(about = "Solar dewatering pump controller", long_about = None)]
#[command(version)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP server port (overrides config)
    #[arg(short, long, env = "SDW_PORT")]
    port: Option<u16>,

    /// HTTP bind address (overrides config)
    #[arg(long, env = "SDW_HOST")]
    host: Option<String>,

    /// Control loop interval in seconds (overrides config)
    #[arg(long, env = "SDW_UPDATE_INTERVAL")]
    update_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before tracing so its log level can seed the filter
    let (mut config, source) =
        TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "sdw_pc={level},sdw_common={level},tower_http={level}",
            level = config.logging.level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting SDW pump controller (sdw-pc) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &source {
        sdw_common::config::ConfigSource::MissingFile(path) => {
            warn!("Config file {} not found, using defaults", path.display())
        }
        other => info!("Configuration: {}", other),
    }

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(secs) = args.update_interval {
        config.control.update_interval_secs = secs;
    }
    config.validate().context("Invalid configuration")?;

    let predictor = predictor::from_config(&config.predictor, &config.control)
        .context("Failed to initialize pump predictor")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let weather: Arc<dyn WeatherProvider> = if config.weather.enabled {
        info!(
            "Weather: Open-Meteo for {} ({}, {})",
            config.weather.site_name, config.weather.latitude, config.weather.longitude
        );
        Arc::new(
            OpenMeteoClient::new(&config.weather, clock.clone())
                .context("Failed to create weather client")?,
        )
    } else {
        info!("Weather: synthetic only");
        Arc::new(SyntheticWeather::new(clock.clone()))
    };

    let settings =
        StateSettings::from_config(&config.control).context("Invalid control configuration")?;
    let state = Arc::new(SharedState::new(settings, clock));

    let control_loop = Arc::new(ControlLoop::new(
        state.clone(),
        weather,
        predictor.clone(),
        &config,
    ));
    let loop_handle = control_loop.spawn();

    let ctx = AppContext {
        state,
        predictor,
        test_endpoints: config.debug.test_endpoints,
    };
    if config.debug.test_endpoints {
        info!("Test endpoints enabled under /api/test");
    }

    let served = sdw_pc::api::run(
        ctx,
        &config.server.host,
        config.server.port,
        shutdown_signal(),
    )
    .await;

    loop_handle.abort();
    served.context("HTTP server failed")?;

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
