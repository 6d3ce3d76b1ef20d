use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use convo_sync::{
    Config, ConversationSessionManager, ObserverSynchronizer, ResumeOutcome, StreamingTransport,
    TransportSettings,
};
use convo_sync::stream::WebSocketConnector;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "convo-sync", about = "Conversation sync client")]
struct Cli {
    /// Config file path (extension optional)
    #[arg(short, long, default_value = "config/convo-sync")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow a conversation read-only and log its events
    Observe { conversation_id: String },
    /// Start or resume a conversation and send stdin lines as messages
    Chat {
        /// Forget the stored conversation first
        #[arg(long)]
        fresh: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("convo-sync v{}", env!("CARGO_PKG_VERSION"));
    info!("Backend: {}", cfg.backend.api_base);

    match cli.command {
        Command::Observe { conversation_id } => observe(&cfg, &conversation_id).await,
        Command::Chat { fresh } => chat(&cfg, fresh).await,
    }
}

async fn observe(cfg: &Config, conversation_id: &str) -> Result<()> {
    let transport = StreamingTransport::new(
        TransportSettings::from_config(&cfg.backend, &cfg.streaming)?,
        Arc::new(WebSocketConnector::new(Duration::from_secs(
            cfg.streaming.connect_timeout_secs,
        ))),
    );
    let observer = ObserverSynchronizer::new(transport);
    let mut updates = observer.subscribe();

    observer
        .synchronize(conversation_id, None)
        .await
        .context("Failed to synchronize conversation")?;

    let mut shown = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                for message in view.transcript.iter().skip(shown) {
                    info!("[{:>7.2}s] {:?}: {}", message.start_time, message.speaker, message.text);
                }
                shown = view.transcript.len();
                if !view.statistics.is_empty() {
                    info!("Statistics: {}", serde_json::to_string(&view.statistics)?);
                }
                if let Some(takeover) = &view.takeover {
                    info!("Taken over by {:?} at {}", takeover.supervisor_id, takeover.timestamp);
                }
            }
        }
    }

    observer.cancel().await;
    Ok(())
}

async fn chat(cfg: &Config, fresh: bool) -> Result<()> {
    let (manager, outcome) = ConversationSessionManager::from_config(cfg)
        .await
        .context("Failed to set up conversation session")?;

    manager
        .set_message_handler(|messages| {
            for message in messages {
                println!("{:?}: {}", message.speaker, message.text);
            }
        })
        .await;
    manager
        .set_connection_state_handler(|state| info!("Connection: {:?}", state))
        .await;

    let resumed = match outcome {
        ResumeOutcome::Resumed(id) if !fresh => {
            info!("Resumed conversation {}", id);
            true
        }
        ResumeOutcome::ReadOnly(id) if !fresh => {
            warn!("Conversation {} is finalized; run with --fresh to start over", id);
            return Ok(());
        }
        _ => false,
    };

    if !resumed {
        manager.reset().await;
        let id = manager.start().await.context("Failed to start conversation")?;
        info!("Started conversation {}", id);
        for query in manager.suggested_queries().await {
            println!("  suggestion: {}", query);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let Err(e) = manager.send_message(&line).await {
            error!("Message not sent: {}", e);
            if manager.is_read_only().await {
                break;
            }
        }
    }

    Ok(())
}
