use chat_sync::client::StoreEvent;
use chat_sync::{ChatSession, ClientConfig, ConnectionState, Message};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chat-term")]
#[command(about = "Terminal chat client: history, live hub and durable storage")]
struct Cli {
    /// Server origin, e.g. https://localhost:7221
    #[arg(short, long)]
    server: Option<String>,

    /// Name to chat as
    #[arg(short, long)]
    user: String,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn print_message(message: &Message) {
    println!("[{}] {}: {}", message.timestamp, message.author, message.body);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.base_url = server;
        config.validate()?;
    }
    info!("=== chat-term === server {}", config.base_url);

    let session = ChatSession::connect_to(config)?;
    let mut events = session.subscribe();

    match session.load_history().await {
        Ok(count) => info!("Loaded {} messages", count),
        Err(e) => warn!("History unavailable: {}", e),
    }

    let mut states = session.watch_state();
    session.connect(&cli.user).await?;
    println!("-- connected as {} (type /quit to leave)", cli.user);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(StoreEvent::Appended(message)) => print_message(&message),
                Some(StoreEvent::Seeded { .. }) | Some(StoreEvent::Lagged { .. }) => {
                    for message in session.messages() {
                        print_message(&message);
                    }
                }
                None => break,
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                println!("-- {}", state);
                if state == ConnectionState::Failed {
                    if let Some(e) = session.last_error() {
                        println!("-- {}", e);
                    }
                }
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let line = line.trim();
                if line == "/quit" {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                match session.send(line).await {
                    Ok(receipt) => {
                        for warning in receipt.warnings {
                            println!("-- warning: {}", warning);
                        }
                    }
                    Err(e) => println!("-- not sent: {}", e),
                }
            }
        }
    }

    session.stop().await;
    println!("-- bye");
    Ok(())
}
