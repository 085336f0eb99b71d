//! # tokenrelay
//!
//! Relay server and terminal chat client for token-streamed replies.

#![deny(unsafe_code)]

mod terminal;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_client::{ChatConfig, ChatSession, ClientConfig};
use relay_core::StreamSource;
use relay_llm::{MockSource, OpenAiConfig, OpenAiSource};
use relay_server::ServerConfig;
use relay_settings::RelaySettings;
use relay_store::{ConversationStore, Database};
use relay_telemetry::{LogFormat, TelemetryConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "tokenrelay", about = "Token-streaming relay and chat client")]
struct Cli {
    /// Settings file (defaults to ~/.tokenrelay/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server.
    Serve {
        /// Echo prompts back instead of calling the provider.
        #[arg(long)]
        mock: bool,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Chat with a relay from the terminal.
    Chat {
        /// Relay WebSocket URL.
        #[arg(long)]
        url: Option<String>,
    },
    /// Show or clear the stored conversation.
    History {
        #[arg(long, conflicts_with = "json")]
        clear: bool,
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = match cli.command {
        Command::Serve { .. } => LogFormat::Json,
        _ => LogFormat::Compact,
    };
    let default_level = match (&cli.command, cli.verbose) {
        (_, true) => Level::DEBUG,
        (Command::Serve { .. }, false) => Level::INFO,
        (_, false) => Level::WARN,
    };
    let _telemetry = relay_telemetry::init_telemetry(TelemetryConfig {
        log_level: default_level,
        format,
        ..Default::default()
    });

    let settings = match &cli.settings {
        Some(path) => relay_settings::load_settings_from_path(path),
        None => relay_settings::load_settings(),
    }
    .context("failed to load settings")?;

    match cli.command {
        Command::Serve { mock, host, port } => serve(settings, mock, host, port).await,
        Command::Chat { url } => chat(settings, url).await,
        Command::History { clear, json } => history(&settings, clear, json),
    }
}

async fn serve(
    settings: RelaySettings,
    mock: bool,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let source: Arc<dyn StreamSource> = if mock {
        Arc::new(MockSource::echo())
    } else {
        let api_key = settings
            .provider
            .api_key
            .clone()
            .context("OPENAI_API_KEY is not set (pass --mock to run without a provider)")?;
        let provider = OpenAiSource::new(OpenAiConfig {
            api_key,
            model: settings.provider.model.clone(),
            base_url: settings.provider.base_url.clone(),
        })
        .context("failed to create provider client")?;
        Arc::new(provider)
    };

    let heartbeat_interval = Duration::from_millis(settings.server.heartbeat_interval_ms);
    let config = ServerConfig {
        host: host.unwrap_or(settings.server.host),
        port: port.unwrap_or(settings.server.port),
        max_send_queue: settings.server.max_send_queue,
        heartbeat_interval,
        liveness_timeout: heartbeat_interval * 3,
    };

    let handle = relay_server::start(config, source)
        .await
        .context("failed to start relay server")?;
    tracing::info!(addr = %handle.addr(), "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    handle.shutdown().await;
    Ok(())
}

fn open_store(settings: &RelaySettings) -> Result<ConversationStore> {
    let path = settings
        .client
        .history_db_path(&relay_settings::settings_dir());
    let db = Database::open(&path)
        .with_context(|| format!("failed to open history database {}", path.display()))?;
    ConversationStore::open(db, settings.client.history_key.clone())
        .context("failed to load conversation history")
}

async fn chat(settings: RelaySettings, url: Option<String>) -> Result<()> {
    let store = open_store(&settings)?;
    terminal::print_transcript(store.messages());

    let config = ChatConfig {
        connection: ClientConfig {
            url: url.unwrap_or_else(|| settings.client.url.clone()),
            reconnect_delay: settings.client.reconnect_delay(),
            ..Default::default()
        },
        pace_interval: settings.client.pace_interval(),
    };
    let (session, events) = ChatSession::start(config, store);

    let (input_tx, input_rx) = mpsc::channel(8);
    let shutdown = CancellationToken::new();

    terminal::spawn_line_reader(input_tx);
    let renderer = tokio::spawn(terminal::render(events));

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    session.run(input_rx, shutdown).await;
    let _ = renderer.await;
    Ok(())
}

fn history(settings: &RelaySettings, clear: bool, json: bool) -> Result<()> {
    let mut store = open_store(settings)?;
    if clear {
        store.clear().context("failed to clear history")?;
        println!("history cleared");
    } else if json {
        println!("{}", store.export_json()?);
    } else {
        terminal::print_transcript(store.messages());
    }
    Ok(())
}
