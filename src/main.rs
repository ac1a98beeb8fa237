use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

mod agent;
mod context;
mod error;
mod models;
mod orchestrator;
mod parsing;
mod plan;
mod router;
mod server;
mod session;
mod settings;

use models::{CompletionGateway, OpenAICompatible, ResilientGateway};
use settings::{Profile, SettingsLayer};

#[derive(Debug, Parser)]
#[command(name = "switchboard")]
#[command(about = "Multi-agent dispatch service over an OpenAI-compatible completion API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Start {
        #[arg(long, default_value = "127.0.0.1:7171")]
        listen: String,
        #[arg(long, value_enum)]
        profile: Option<Profile>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        max_history: Option<usize>,
        #[arg(long)]
        session_ttl_secs: Option<u64>,
        /// Serve Prometheus metrics on this address.
        #[arg(long)]
        metrics_listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start { listen, profile, model, max_history, session_ttl_secs, metrics_listen } => {
            let addr: SocketAddr = listen.parse()?;
            if let Some(m) = metrics_listen {
                let maddr: SocketAddr = m.parse()?;
                metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(maddr).install()?;
                tracing::info!(addr = %maddr, "metrics exporter listening");
            }

            let cli_layer = SettingsLayer {
                model,
                profile,
                max_history,
                session_idle_ttl_secs: session_ttl_secs,
                ..Default::default()
            };
            let settings = settings::resolve_settings(&SettingsLayer::defaults(), &SettingsLayer::from_env(), &cli_layer)?;
            if settings.gateway.api_key.is_none() {
                tracing::warn!("OPENAI_API_KEY is not set; completion calls will likely be rejected");
            }

            let inner: Arc<dyn CompletionGateway> = Arc::new(OpenAICompatible::new(&settings.gateway));
            let gateway: Arc<dyn CompletionGateway> = Arc::new(ResilientGateway::new(inner, &settings.gateway));
            let registry = agent::profiles::build_registry(settings.profile, gateway, &settings)?;
            let orchestrator = Arc::new(orchestrator::Orchestrator::new(
                registry,
                Box::new(router::KeywordRouter),
                &settings,
            ));

            let shutdown = CancellationToken::new();
            let sweeper = orchestrator.clone().spawn_sweeper(settings.sweep_interval, shutdown.clone());
            {
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => {
                            tracing::info!("shutdown requested");
                            shutdown.cancel();
                        }
                        Err(e) => tracing::warn!(error = %e, "could not install ctrl-c handler"),
                    }
                });
            }

            let state = server::AppState::new(orchestrator, shutdown.clone());
            server::serve(addr, state).await?;
            shutdown.cancel();
            sweeper.await?;
        }
    }
    Ok(())
}
