//! Router assembly and server startup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::task::JoinHandle;

use crate::state::MockState;
use crate::{api, broker};

/// Builds the router: REST routes under `/api`, the broker at `/ws`.
pub fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .nest("/api", api::routes())
        .route("/ws", get(broker::ws_handler))
        .with_state(state)
}

/// Binds `addr` and serves the mock backend on a spawned task.
///
/// Returns the bound address (useful with port `0`) and the server task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    state: Arc<MockState>,
) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;
    let app = router(state);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "mock backend server error");
        }
    });

    Ok((bound_addr, handle))
}
