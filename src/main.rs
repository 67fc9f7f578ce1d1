//! # switchboard
//!
//! Binary entry point: runs the tool host, lists its tools, or runs one
//! orchestration against it.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use switchboard_agent::{AgentRunner, GeminiProvider, RunnerConfig};
use switchboard_client::{ClientConfig, ConnectionManager};
use switchboard_host::{
    register_builtin_tools, CustomerDirectory, Dispatcher, InMemoryDirectory, ServerConfig,
    ToolRegistry, TransportConfig,
};
use switchboard_settings::SwitchboardSettings;
use switchboard_telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};

/// Tool host and orchestrator for customer operations.
#[derive(Parser, Debug)]
#[command(name = "switchboard", version, about)]
struct Cli {
    /// Settings file (defaults to `~/.switchboard/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the tool host until Ctrl-C.
    Serve {
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// List the tools the host exposes.
    Tools,
    /// Answer one prompt, printing the run outcome as JSON.
    Ask {
        prompt: String,
        #[arg(long)]
        max_iterations: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => switchboard_settings::load_settings_from_path(path),
        None => switchboard_settings::load_settings(),
    }
    .context("Failed to load settings")?;

    let telemetry = init_telemetry(
        &TelemetryConfig {
            json: settings.logging.json,
            ..TelemetryConfig::default()
        }
        .with_level_name(&settings.logging.level),
    );

    match cli.command {
        Command::Serve { port } => serve(settings, port, &telemetry).await,
        Command::Tools => list_tools(&settings).await,
        Command::Ask {
            prompt,
            max_iterations,
        } => ask(&settings, &prompt, max_iterations).await,
    }
}

fn api_key(settings: &SwitchboardSettings) -> Result<SecretString> {
    match settings.auth.api_key.as_deref() {
        Some(key) if !key.is_empty() => Ok(SecretString::from(key.to_string())),
        _ => bail!("No shared secret configured: set SWITCHBOARD_API_KEY or auth.apiKey"),
    }
}

fn load_directory(settings: &SwitchboardSettings) -> Result<Arc<dyn CustomerDirectory>> {
    let directory = match settings.host.data_file.as_deref() {
        Some(path) => InMemoryDirectory::load(Path::new(path))
            .with_context(|| format!("Failed to load directory data from {path}"))?,
        None => {
            warn!("no data file configured, serving demo directory");
            InMemoryDirectory::demo()
        }
    };
    Ok(Arc::new(directory))
}

async fn serve(settings: SwitchboardSettings, port: Option<u16>, telemetry: &TelemetryGuard) -> Result<()> {
    let secret = api_key(&settings)?;

    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, load_directory(&settings)?)
        .context("Failed to register tools")?;
    info!(tools = registry.count(), "tool registry ready");

    let dispatcher = Arc::new(
        Dispatcher::new(Arc::new(registry))
            .with_timeout(settings.host.tool_timeout())
            .with_metrics(telemetry.metrics()),
    );

    let transport = TransportConfig::new(secret.expose_secret())
        .with_idle_timeout(settings.host.idle_timeout())
        .with_send_queue(settings.host.send_queue);
    let mut config = ServerConfig::new(transport);
    config.bind = settings.host.bind.clone();
    config.port = port.unwrap_or(settings.host.port);
    config.heartbeat = settings.host.heartbeat();
    config.dev_routes = !settings.environment.is_production();

    let handle = switchboard_host::start(config, dispatcher)
        .await
        .context("Failed to start tool host")?;
    info!(url = %handle.base_url(), environment = ?settings.environment, "switchboard host ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    info!("shutting down");
    handle.stop().await;
    Ok(())
}

fn connection_manager(settings: &SwitchboardSettings) -> Result<ConnectionManager> {
    let mut config = ClientConfig::new(settings.client.base_url.clone(), api_key(settings)?)
        .with_request_timeout(settings.client.request_timeout());
    config.connect_timeout = settings.client.connect_timeout();
    Ok(ConnectionManager::new(config))
}

async fn list_tools(settings: &SwitchboardSettings) -> Result<()> {
    let manager = connection_manager(settings)?;
    let tools = manager.list_tools().await.context("Failed to list tools")?;
    manager.close().await;
    println!("{}", serde_json::to_string_pretty(&tools)?);
    Ok(())
}

async fn ask(settings: &SwitchboardSettings, prompt: &str, max_iterations: Option<u32>) -> Result<()> {
    let model_key = match settings.auth.model_api_key.as_deref() {
        Some(key) if !key.is_empty() => SecretString::from(key.to_string()),
        _ => bail!("No model API key configured: set GEMINI_API_KEY or auth.modelApiKey"),
    };
    let model = GeminiProvider::new(model_key, settings.agent.model.clone())
        .context("Failed to create model provider")?
        .with_base_url(settings.agent.model_base_url.clone());

    let gateway = Arc::new(connection_manager(settings)?);
    let mut config = RunnerConfig::default()
        .with_max_iterations(max_iterations.unwrap_or(settings.agent.max_iterations));
    if !settings.agent.system_prompt.is_empty() {
        config = config.with_system_prompt(settings.agent.system_prompt.clone());
    }

    let runner = AgentRunner::new(Arc::new(model), gateway.clone(), config)
        .context("Invalid runner configuration")?;
    let outcome = runner.run(prompt).await;
    gateway.close().await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
