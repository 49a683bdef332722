//! `relay`: terminal client for the Relay agent API.

mod render;

use clap::{Parser, Subcommand};
use relay_client::auth::VerifyRequest;
use relay_client::{AuthClient, ChatOrchestrator, ClientConfig, TokenStore};
use relay_core::SyncState;
use render::{format_message, Renderer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay", about = "Relay: chat with an on-chain AI agent")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// API root (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Session owner, usually the wallet address (overrides config)
    #[arg(long)]
    user: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat
    Chat {
        /// Resume an existing session
        #[arg(long)]
        session: Option<String>,
    },
    /// Print the messages of a session
    History { session_id: String },
    /// List your sessions
    Sessions,
    /// Sign in with a wallet signature
    ///
    /// Without --signature, prints the nonce message to sign.
    Login {
        #[arg(long)]
        address: String,
        #[arg(long, requires = "signature")]
        public_key: Option<String>,
        #[arg(long, requires_all = ["public_key", "nonce"])]
        signature: Option<String>,
        /// Nonce the signature was made over
        #[arg(long)]
        nonce: Option<String>,
    },
}

async fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let raw = tokio::fs::read_to_string(&cli.config).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config file '{}': {}",
            cli.config.display(),
            e
        )
    })?;
    let mut config: ClientConfig = toml::from_str(&raw)?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(user) = &cli.user {
        config.user_id = user.clone();
    }
    if let Ok(token) = std::env::var("RELAY_AUTH_TOKEN") {
        config.auth_token = Some(token);
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(&cli).await?;

    match cli.command {
        Commands::Chat { session } => {
            let orchestrator = Arc::new(ChatOrchestrator::from_config(&config)?);
            chat(orchestrator, session).await?;
        }
        Commands::History { session_id } => {
            let orchestrator = ChatOrchestrator::from_config(&config)?;
            let messages = orchestrator.load_session(&session_id).await?;
            if messages.is_empty() {
                println!("No messages in session {session_id}.");
            }
            for message in &messages {
                println!("{}", format_message(message));
            }
        }
        Commands::Sessions => {
            let orchestrator = ChatOrchestrator::from_config(&config)?;
            let sessions = orchestrator.list_sessions().await?;
            if sessions.is_empty() {
                println!("No sessions for {}.", config.user_id);
            } else {
                for session in &sessions {
                    println!(
                        "  {}  {}  ({} messages, last active {})",
                        session.session_id,
                        session.title,
                        session.message_count,
                        session.last_active_at.format("%Y-%m-%d %H:%M")
                    );
                }
                println!("\nTotal: {} session(s)", sessions.len());
            }
        }
        Commands::Login {
            address,
            public_key,
            signature,
            nonce,
        } => {
            let auth = AuthClient::new(config, TokenStore::default());
            match (public_key, signature, nonce) {
                (Some(public_key), Some(signature), Some(nonce)) => {
                    let token = auth
                        .verify(&VerifyRequest {
                            address,
                            public_key,
                            signature,
                            nonce,
                        })
                        .await?;
                    println!("Signed in. Add this to relay.toml or RELAY_AUTH_TOKEN:");
                    println!("auth_token = \"{token}\"");
                }
                _ => {
                    let nonce = auth.request_nonce(&address).await?;
                    println!("Sign this message with your wallet:\n\n{}\n", nonce.message);
                    println!(
                        "Then run: relay login --address {address} --public-key <KEY> --signature <SIG> --nonce {}",
                        nonce.nonce
                    );
                }
            }
        }
    }

    Ok(())
}

/// Reads lines from stdin and streams replies until EOF or `/quit`.
async fn chat(orchestrator: Arc<ChatOrchestrator>, session: Option<String>) -> anyhow::Result<()> {
    let mut renderer = Renderer::default();
    if let Some(id) = &session {
        let history = orchestrator.load_session(id).await?;
        for message in &history {
            println!("{}", format_message(message));
        }
        renderer.mark_seen(&history);
        info!(session_id = %id, "Resumed session");
    }

    let mut updates = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if let Err(e) = renderer.render(&snapshot, &mut stdout) {
                debug!(error = %e, "stdout closed");
                break;
            }
        }
    });

    println!("Type a message. /retry resends a failed message, /quit exits, Ctrl-C stops a reply.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" | "/exit" => break,
            "/retry" => {
                let failed = orchestrator
                    .messages()
                    .into_iter()
                    .rev()
                    .find(|m| m.sync == SyncState::Failed);
                match failed {
                    Some(message) => {
                        orchestrator.retry(&message.id).await;
                    }
                    None => println!("Nothing to retry."),
                }
            }
            text => {
                tokio::select! {
                    _ = orchestrator.send_message(text, None) => {}
                    _ = tokio::signal::ctrl_c() => orchestrator.cancel(),
                }
            }
        }
    }

    drop(orchestrator);
    let _ = printer.await;
    Ok(())
}
