use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use brief_config::{ConfigRegistry, PipelineConfig};
use brief_generator::{CliGenerator, GeneratorConfig};
use brief_pipeline::{
    AdmissionConfig, AdmissionController, Clients, Orchestrator, PublishTarget,
};
use brief_publisher::{HttpPublisherClient, PublisherConfig};
use brief_server::{serve, AppState};
use brief_signals::{HttpSignalsClient, SignalsConfig};
use brief_store::Store;
use brief_types::Webhook;

#[derive(Parser, Debug)]
#[command(name = "brief-engine")]
#[command(about = "Headless intel brief pipeline backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8111)]
        port: u16,
        #[arg(long, env = "BRIEF_STATE_DIR")]
        state_dir: Option<String>,
    },
    /// Execute one webhook inline and print the outcome JSON.
    Run {
        /// Webhook as a JSON object.
        webhook: String,
        #[arg(long, env = "BRIEF_STATE_DIR")]
        state_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            state_dir,
        } => {
            let state_dir = resolve_state_dir(state_dir);
            let _log_guard = init_logging(&state_dir)?;
            let state = build_state(&state_dir).await?;
            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            log_startup_paths(&state_dir, &addr);
            serve(addr, state).await?;
        }
        Command::Run { webhook, state_dir } => {
            let state_dir = resolve_state_dir(state_dir);
            let _log_guard = init_logging(&state_dir)?;
            let webhook: Webhook =
                serde_json::from_str(&webhook).context("webhook must be a JSON object")?;

            let store = Store::new(state_dir.join("data").join("pipeline.db"));
            let clients = build_clients()?;
            let orchestrator = Orchestrator::new(
                webhook,
                PipelineConfig::default(),
                store,
                clients,
                publish_target_from_env(),
            );
            let outcome = orchestrator.execute(None).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".brief")
}

fn init_logging(state_dir: &PathBuf) -> anyhow::Result<brief_observability::WorkerGuard> {
    let logs_dir = brief_observability::canonical_logs_dir_from_root(state_dir);
    let (guard, init_info) = brief_observability::init_process_logging("engine", &logs_dir, 14)?;
    info!(
        logs_dir = %init_info.logs_dir,
        prefix = %init_info.prefix,
        "logging initialized"
    );
    Ok(guard)
}

fn log_startup_paths(state_dir: &PathBuf, addr: &SocketAddr) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!("starting brief-engine on http://{addr}");
    info!(
        "startup paths: exe={} cwd={} state_dir={}",
        exe.display(),
        cwd.display(),
        state_dir.display()
    );
}

async fn build_state(state_dir: &PathBuf) -> anyhow::Result<AppState> {
    let store = Store::new(state_dir.join("data").join("pipeline.db"));
    let registry = Arc::new(ConfigRegistry::new(PipelineConfig::default()));
    let clients = build_clients()?;

    let controller = AdmissionController::new(
        store,
        registry,
        clients,
        AdmissionConfig {
            publish: publish_target_from_env(),
        },
    )
    .await
    .context("failed to initialize the pipeline store")?;

    Ok(AppState {
        controller: Arc::new(controller),
    })
}

fn build_clients() -> anyhow::Result<Clients> {
    let signals_config = SignalsConfig::from_env()
        .context("SIGNALS_API_KEY must be set for the Signals Provider client")?;

    let generator_config = GeneratorConfig {
        command: env_or("GENERATOR_CMD", "subagent"),
        model: env_or("GENERATOR_MODEL", "default"),
        text_timeout: Duration::from_secs(300),
        tool_timeout: Duration::from_secs(300),
        ..GeneratorConfig::default()
    };
    let generator =
        CliGenerator::new(generator_config).context("generator credential missing at startup")?;

    let publisher_config = PublisherConfig::new(
        env_or("WORKSPACE_API_URL", "https://api.workspace.example"),
        std::env::var("WORKSPACE_API_KEY").unwrap_or_default(),
    );

    Ok(Clients {
        signals: Arc::new(HttpSignalsClient::new(signals_config)),
        generator: Arc::new(generator),
        publisher: Arc::new(HttpPublisherClient::new(publisher_config)),
    })
}

fn publish_target_from_env() -> PublishTarget {
    PublishTarget {
        parent_page_id: std::env::var("WORKSPACE_PARENT_PAGE_ID").unwrap_or_default(),
        tool_server_url: env_or("WORKSPACE_TOOL_URL", "https://api.workspace.example/tools"),
        tool_api_key: std::env::var("WORKSPACE_API_KEY").unwrap_or_default(),
        ..PublishTarget::default()
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
