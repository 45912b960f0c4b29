//! `TeamChat` backend stub -- in-memory service of record for development.
//!
//! Speaks the same REST surface and realtime event stream as the production
//! service, so the client engine can be exercised without network access to
//! real infrastructure. State lives in memory and is lost on restart.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 127.0.0.1:4000
//! cargo run --bin teamchat-stub
//!
//! # Run on custom address with a custom credential
//! cargo run --bin teamchat-stub -- --bind 127.0.0.1:8080 --auth-token secret
//!
//! # Or via environment variables
//! TEAMCHAT_STUB_ADDR=127.0.0.1:8080 cargo run --bin teamchat-stub
//! ```

use std::sync::Arc;

use clap::Parser;
use teamchat_stub::config::{StubCliArgs, StubConfig};
use teamchat_stub::server;
use teamchat_stub::state::StubState;

#[tokio::main]
async fn main() {
    let cli = StubCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match StubConfig::load(&cli) {
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

    tracing::info!(addr = %config.bind_addr, "starting teamchat stub server");

    let state = Arc::new(StubState::with_token(config.auth_token.clone()));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "stub server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "stub server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start stub server");
            std::process::exit(1);
        }
    }
}
