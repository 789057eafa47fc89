// # natter-srvd
//
// Thin integration layer: loads configuration, installs logging, builds the
// Cloudflare client and the IP resolver, then hands everything to
// `natter_srv_core::Orchestrator`. No supervision or DNS logic lives here.
//
// ## Configuration
//
// Read from a YAML file (see `config.example.yaml`):
//
// - `NATTER_SRV_CONFIG`: path to the file (default `config.yaml`)
// - `NATTER_SRV_API_TOKEN`: overrides `cloudflare.api_token`
// - `NATTER_SRV_ZONE_ID`: overrides `cloudflare.zone_id`
// - `NATTER_SRV_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// cp config.example.yaml config.yaml
// $EDITOR config.yaml
// export NATTER_SRV_API_TOKEN=...
//
// natter-srvd
// ```

use anyhow::{Context, Result};
use natter_srv_cloudflare::CloudflareApi;
use natter_srv_core::config::SupervisorConfig;
use natter_srv_core::{Orchestrator, validate_srv_name};
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DaemonExitCode {
    /// Clean shutdown (SIGINT/SIGTERM)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DaemonExitCode> for ExitCode {
    fn from(code: DaemonExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Environment-level settings, read once at startup
struct DaemonEnv {
    config_path: PathBuf,
    api_token: Option<String>,
    zone_id: Option<String>,
    log_level: String,
}

impl DaemonEnv {
    fn from_env() -> Self {
        Self {
            config_path: env::var("NATTER_SRV_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
            api_token: non_empty_var("NATTER_SRV_API_TOKEN"),
            zone_id: non_empty_var("NATTER_SRV_ZONE_ID"),
            log_level: env::var("NATTER_SRV_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Read and parse the YAML configuration file
fn load_config(path: &Path) -> Result<SupervisorConfig> {
    if !path.exists() {
        anyhow::bail!(
            "Configuration file not found: {}. \
            Copy config.example.yaml to {} and fill in your Cloudflare token, zone id and SRV name",
            path.display(),
            path.display()
        );
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    serde_yaml::from_str(&contents).with_context(|| format!("Invalid YAML in {}", path.display()))
}

/// Apply credential overrides from the environment
fn apply_overrides(
    mut config: SupervisorConfig,
    api_token: Option<String>,
    zone_id: Option<String>,
) -> SupervisorConfig {
    if let Some(token) = api_token {
        config.cloudflare.api_token = token;
    }
    if let Some(zone_id) = zone_id {
        config.cloudflare.zone_id = zone_id;
    }
    config
}

/// Validate the configuration
///
/// Core checks (required fields, placeholder credentials, ranges), then the
/// SRV name shape and the natter script on disk.
fn validate(config: &SupervisorConfig) -> Result<()> {
    config.validate()?;

    validate_srv_name(&config.srv.name)?;

    if !config.natter.script.exists() {
        anyhow::bail!(
            "natter script not found: {}. \
            Download natter.py (https://github.com/MikeWang000000/Natter) and set natter.script",
            config.natter.script.display()
        );
    }

    Ok(())
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "NATTER_SRV_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

fn main() -> ExitCode {
    let daemon_env = DaemonEnv::from_env();

    let log_level = match parse_log_level(&daemon_env.log_level) {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DaemonExitCode::ConfigError.into();
        }
    };

    // Initialize tracing
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DaemonExitCode::ConfigError.into();
    }

    let config = match load_config(&daemon_env.config_path) {
        Ok(config) => apply_overrides(config, daemon_env.api_token, daemon_env.zone_id),
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return DaemonExitCode::ConfigError.into();
        }
    };

    if let Err(e) = validate(&config) {
        error!("Configuration validation error: {:#}", e);
        return DaemonExitCode::ConfigError.into();
    }

    info!(
        "Configuration loaded from {}",
        daemon_env.config_path.display()
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DaemonExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            DaemonExitCode::RuntimeError
        } else {
            DaemonExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Build the components and run until SIGINT/SIGTERM
async fn run_daemon(config: SupervisorConfig) -> Result<()> {
    let api = CloudflareApi::from_config(&config.cloudflare)?;
    let resolver = natter_srv_ip_http::default_resolver()?;
    info!("{} IP lookup services configured", resolver.len());

    let (orchestrator, mut events) = Orchestrator::new(config, Box::new(api), resolver)?;

    // Surface lifecycle events at debug level; the orchestrator logs the rest
    let event_logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::debug!("Event: {:?}", event);
        }
    });

    orchestrator.run().await?;

    // The sender is gone once run() returns, so the logger drains and exits
    let _ = event_logger.await;

    Ok(())
}
