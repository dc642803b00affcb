use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use mcp_gateway_config::{ConfigLoader, GatewayConfig};
use mcp_gateway_daemon::{DaemonClient, DaemonLifecycle};
use mcp_gateway_plugin::Pipeline;
use mcp_gateway_runtime::{PrefixOption, Runtime, RuntimeConfig};
use mcp_gateway_session::ManagerConfig;

mod cli;
mod transport;

use cli::{Cli, Commands, DaemonCommands};
use transport::ProcessSessionFactory;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_ref())?;

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Serve | Commands::DaemonWorker => run_daemon(config).await,
        Commands::Catalog { name } => print_catalog(config, &name).await,
        Commands::Daemon { daemon_cmd } => run_daemon_command(daemon_cmd).await,
    }
}

fn init_tracing(log_level: Option<&String>) -> Result<()> {
    let env_filter = match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| {
            eprintln!("invalid log level '{level}', falling back to 'info'");
            EnvFilter::new("info")
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).with_writer(std::io::stderr).init();
    debug!("tracing initialized");
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<GatewayConfig> {
    let loader = ConfigLoader::new();
    match path {
        Some(path) if path.exists() => loader.from_file(path).context(format!("failed to load configuration from {path:?}")),
        Some(path) => {
            warn!("configuration file not found: {path:?}, using environment/defaults");
            loader.from_env().context("failed to load configuration from environment")
        }
        None => loader.from_env().context("failed to load configuration from environment"),
    }
}

fn build_runtime(config: &GatewayConfig) -> Result<Arc<Runtime>> {
    let runtime_config = RuntimeConfig {
        guardrails_profile: config.guardrails.resolve(),
        has_custom_plugins: config.has_custom_plugins(),
        breaker_config: config.resilience.to_breaker_config(),
        safety_bounds: config.validation.safety_bounds(),
        prefix: config.prefix.clone().map(PrefixOption::Fixed).unwrap_or_default(),
        telemetry: config.telemetry.to_runtime_telemetry(),
        policy_lock: config.policy.lock,
        expose_error_details: config.errors.expose_details,
    };
    let manager_config = ManagerConfig { max: config.session.max, ttl: config.session.ttl, auth_mode: config.session.auth_mode };
    let factory = Arc::new(ProcessSessionFactory::new(config.servers.clone()));
    let runtime = Runtime::new(runtime_config, factory, Arc::new(Pipeline::new()), manager_config).context("refused to construct runtime")?;
    Ok(Arc::new(runtime))
}

async fn run_daemon(config: GatewayConfig) -> Result<()> {
    let runtime = build_runtime(&config)?;
    let lifecycle = DaemonLifecycle::from(&config.daemon);
    info!("starting mcp-gateway daemon");
    mcp_gateway_daemon::run(runtime, lifecycle).await.context("daemon exited with an error")?;
    Ok(())
}

async fn print_catalog(config: GatewayConfig, name: &str) -> Result<()> {
    use mcp_gateway_session::SessionFactory;

    let factory = ProcessSessionFactory::new(config.servers.clone());
    let session = factory.create(name).await.context("failed to connect to server")?;
    let catalog = mcp_gateway_core::extract_catalog(&session).await.context("failed to extract catalog")?;
    session.close().await.ok();

    let rendered = serde_yaml::to_string(&catalog).context("failed to render catalog")?;
    println!("{rendered}");
    Ok(())
}

async fn run_daemon_command(cmd: DaemonCommands) -> Result<()> {
    let sessions_dir = mcp_gateway_daemon::persistence::sessions_dir();
    let client = DaemonClient::new(sessions_dir);

    match cmd {
        DaemonCommands::Start => {
            let current_exe = std::env::current_exe().context("failed to resolve current executable")?;
            client
                .ensure_service(move || {
                    std::process::Command::new(&current_exe)
                        .arg("daemon-worker")
                        .stdin(std::process::Stdio::null())
                        .stdout(std::process::Stdio::null())
                        .stderr(std::process::Stdio::null())
                        .spawn()?;
                    Ok(())
                })
                .await
                .context("daemon did not become reachable")?;
            println!("daemon is running");
            Ok(())
        }
        DaemonCommands::Stop => {
            client.shutdown().await.context("failed to signal daemon shutdown")?;
            println!("daemon shutdown requested");
            Ok(())
        }
        DaemonCommands::Status => match client.ping().await {
            Ok(health) => {
                println!("{}", serde_json::to_string_pretty(&health)?);
                Ok(())
            }
            Err(_) => {
                println!("daemon is not running");
                Ok(())
            }
        },
    }
}
