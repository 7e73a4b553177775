use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use cleverchatty_core::config::CleverChattyConfig;
use cleverchatty_sessions::{SessionHooks, SessionManager};

mod app;
mod card;
mod reverse_listener;
mod rpc;
mod serve;
mod stream;

#[derive(Parser)]
#[command(name = "cleverchatty-server", version, about = "CleverChatty agent server")]
struct Cli {
    /// Path to cleverchatty.toml (default: ~/.cleverchatty/cleverchatty.toml)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .or_else(|| std::env::var("CLEVERCHATTY_CONFIG").ok());
    let config = CleverChattyConfig::load(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("config: {e}"))?;

    init_logging(&config)?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    // Reverse-MCP listener: shared with every session's tools host.
    let reverse = if config.reverse_mcp_settings.enabled {
        let listener = reverse_listener::ReverseListener::new(&config, shutdown.clone());
        let router = listener.router();
        let settings = config.reverse_mcp_settings.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let result = if settings.tls.enabled {
                serve::serve_tls(&settings.listen_host, &settings.tls, router, token).await
            } else {
                serve::serve_plain(&settings.listen_host, router, token).await
            };
            if let Err(e) = result {
                warn!(error = %e, "reverse MCP listener failed");
            }
        });
        Some(listener)
    } else {
        None
    };

    // Broadcast fan-out shared between the session hooks and the A2A app.
    let subscribers = stream::SubscriberRegistry::new();

    let hooks = SessionHooks {
        reverse: reverse
            .clone()
            .map(|l| l as Arc<dyn cleverchatty_tools::ReverseCapability>),
        notifications: Some({
            let subscribers = Arc::clone(&subscribers);
            Arc::new(move |notification| {
                subscribers.broadcast_notification(&notification);
            })
        }),
        agent_messages: Some({
            let subscribers = Arc::clone(&subscribers);
            Arc::new(move |text| {
                subscribers.broadcast_agent_message(&text);
            })
        }),
    };

    let sessions = SessionManager::start(config.clone(), hooks, shutdown.clone());

    if config.a2a_settings.enabled {
        let state = Arc::new(app::AppState::new(
            config.clone(),
            Arc::clone(&sessions),
            Arc::clone(&subscribers),
            shutdown.clone(),
        ));
        let router = app::build_router(state);
        let listen_host = config.a2a_settings.listen_host.clone();
        serve::serve_plain(&listen_host, router, shutdown.clone()).await?;
    } else {
        // Headless: reverse listener and sessions only.
        shutdown.cancelled().await;
    }

    info!("shutdown complete");
    Ok(())
}

/// Route tracing output per `log_file_path`: empty discards, "stdout" and
/// "stderr" go to the terminal, anything else appends to that file.
fn init_logging(config: &CleverChattyConfig) -> anyhow::Result<()> {
    let writer = match config.log_file_path.as_str() {
        "" => BoxMakeWriter::new(std::io::sink),
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        "stderr" => BoxMakeWriter::new(std::io::stderr),
        path => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(Arc::new(file))
        }
    };

    let default_filter = if config.debug_mode {
        "cleverchatty=debug,cleverchatty_server=debug,tower_http=debug"
    } else {
        "cleverchatty=info,cleverchatty_server=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(writer)
        .init();
    Ok(())
}
