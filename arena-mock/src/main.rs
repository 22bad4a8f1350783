//! `arena-mock` -- local stand-in for the Arena backend.
//!
//! Serves the REST endpoints under `/api` and a STOMP broker at `/ws`,
//! seeded with three demo accounts (`alice-token`, `bob-token`,
//! `carol-token`; carol is a moderator).
//!
//! ```bash
//! cargo run -p arena-mock
//! cargo run -p arena-mock -- --bind 127.0.0.1:9000 --pending-count 4
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use arena_mock::config::{MockCliArgs, MockConfig};
use arena_mock::server;
use arena_mock::state::MockState;
use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = MockCliArgs::parse();

    let config = match MockConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let state = Arc::new(MockState::with_fixtures(config.destinations.clone()));
    state.set_pending_count(config.pending_count);

    match server::start_server(&config.bind_addr, state).await {
        Ok((addr, handle)) => {
            tracing::info!(%addr, "arena-mock listening (api at /api, broker at /ws)");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, addr = %config.bind_addr, "failed to start");
            ExitCode::FAILURE
        }
    }
}
