//! `NeoChat` server -- direct-messaging backend.
//!
//! An axum server that authenticates WebSocket connections with bearer
//! tokens, persists messages to SQLite, and fans live events out to every
//! connection of both conversation participants.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5000
//! NEOCHAT_JWT_SECRET=... cargo run --bin neochat-server
//!
//! # Run on custom address with a custom database path
//! cargo run --bin neochat-server -- --bind 127.0.0.1:8080 --db-path /tmp/chat.db
//! ```

use std::sync::Arc;

use clap::Parser;
use neochat_server::auth::TokenVerifier;
use neochat_server::config::{ServerCliArgs, ServerConfig};
use neochat_server::server::{self, AppState};
use neochat_server::store::MessageStore;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, db = %config.db_path, "starting neochat server");

    let store = match MessageStore::open(&config.db_path) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open message store");
            std::process::exit(1);
        }
    };
    let verifier = TokenVerifier::new(&config.jwt_secret, config.token_ttl_hours);
    let state = Arc::new(AppState::new(store, verifier));

    match server::start_server(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
