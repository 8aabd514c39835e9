//! Haven Relay Server
//!
//! The realtime core of the Haven platform:
//!
//! 1. **Chat relay**: persists one-to-one messages and delivers them to every
//!    open connection of both parties. Edits, hard deletes and read receipts
//!    travel the same way.
//!
//! 2. **Call signaling**: forwards offer/answer/hang-up payloads between a
//!    caller and a callee so they can set up a direct media stream. Payloads
//!    are opaque; nothing is queued for offline users.
//!
//! 3. **Encryption at rest**: message text is stored AES-256-CBC encrypted
//!    under a key fixed at startup, and decrypted on every read.

mod api;
mod cipher;
mod error;
mod handler;
mod protocol;
mod registry;
mod relay;
mod signaling;
mod state;
mod store;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use cipher::TextCipher;
use relay::DeletePolicy;
use state::{RelayConfig, RelayState};
use store::{ChatStore, MessageBackend, SqliteBackend};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "haven-relay", version, about = "Haven chat relay and call signaling server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "RELAY_PORT")]
    port: u16,

    /// Message encryption key: 64 hex characters or a raw 32-byte string
    #[arg(long, env = "CHAT_ENCRYPTION_KEY", hide_env_values = true)]
    encryption_key: String,

    /// SQLite file for chat history. Omit for an in-memory store.
    #[arg(long, env = "DATABASE_PATH")]
    database_path: Option<String>,

    /// Who may hard-delete a message
    #[arg(long, value_enum, default_value_t = DeletePolicy::SenderOnly, env = "DELETE_POLICY")]
    delete_policy: DeletePolicy,

    /// Server region label (e.g. "US East", "EU West")
    #[arg(long, default_value = "US East", env = "RELAY_REGION")]
    region: String,

    /// Server location / city (e.g. "New York", "Frankfurt")
    #[arg(long, default_value = "New York", env = "RELAY_LOCATION")]
    location: String,
}

impl Args {
    fn config(&self) -> RelayConfig {
        RelayConfig {
            port: self.port,
            database_path: self.database_path.clone(),
            delete_policy: self.delete_policy,
            region: self.region.clone(),
            location: self.location.clone(),
        }
    }
}

fn open_backend(config: &RelayConfig) -> anyhow::Result<Arc<dyn MessageBackend>> {
    let backend = match config.database_path {
        Some(ref path) => {
            tracing::info!(path = path.as_str(), "Opening chat database");
            SqliteBackend::open(path)
                .with_context(|| format!("Failed to open chat database at {}", path))?
        }
        None => {
            tracing::warn!("DATABASE_PATH not set, chat history will not survive a restart");
            SqliteBackend::open_in_memory().context("Failed to open in-memory chat database")?
        }
    };
    Ok(Arc::new(backend))
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "haven_relay=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = args.config();

    let cipher = TextCipher::from_config_value(&args.encryption_key)
        .context("CHAT_ENCRYPTION_KEY is unusable")?;
    let store = ChatStore::new(open_backend(&config)?, cipher);

    tracing::info!(
        delete_policy = ?config.delete_policy,
        region = config.region.as_str(),
        location = config.location.as_str(),
        "Relay configured"
    );

    let port = config.port;
    let state = RelayState::new(config, store);
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Haven relay server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tokio::select! {
        result = async { axum::serve(listener, app).await } => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Server error");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
