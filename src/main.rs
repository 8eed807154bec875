use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use patcher::config::AppConfig;
use patcher::context::local::LocalCodeContext;
use patcher::dispatch::report::GitHubReporter;
use patcher::dispatch::{EventDispatcher, TaskRegistry};
use patcher::llm::gateway_from_config;
use patcher::platform::github::{GitHubGateway, InstallationTokens};
use patcher::server::{create_router, AppState};
use patcher::shutdown::{graceful_shutdown, wait_for_shutdown};
use patcher::workflow::machine::{Collaborators, WorkflowPolicy, WorkflowStateMachine};
use patcher::workspace::manager::WorkspaceManager;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser)]
#[command(name = "patcher", about = "Turns GitHub issues into reviewed pull requests")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = AppConfig::load(cli.config.as_deref())?;

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        max_iterations = config.orchestration.max_iterations,
        provider = config.llm.provider.name(),
        "Starting Patcher server"
    );

    let tokens = Arc::new(InstallationTokens::new(&config.github)?);
    let workspaces = Arc::new(WorkspaceManager::new(&config.workspace));
    let gateway = Arc::new(GitHubGateway::new(Arc::clone(&tokens), workspaces));
    let model = gateway_from_config(&config)?;
    let context = Arc::new(LocalCodeContext::new(
        &config.workspace,
        &config.agent,
        Arc::clone(&tokens),
    ));

    let machine = Arc::new(WorkflowStateMachine::new(
        Collaborators {
            gateway: gateway.clone(),
            model,
            context,
        },
        WorkflowPolicy::from_config(&config),
    )?);

    let registry = TaskRegistry::new();
    let dispatcher = EventDispatcher::new(Arc::clone(&registry), machine)
        .with_reporter(Arc::new(GitHubReporter::new(gateway.clone())));

    let state = Arc::new(AppState::new(config.clone(), dispatcher, gateway)?);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    graceful_shutdown(&registry, SHUTDOWN_GRACE).await;

    Ok(())
}
