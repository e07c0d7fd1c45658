//! HTTP surface and process-level startup/shutdown.

use crate::bridge::Bridge;
use crate::config::AdapterConfig;
use crate::error::{BridgeError, Result};
use crate::health::health_check;
use crate::lifecycle::{ProcessState, TerminationReason};
use crate::request_bridge::handle_rpc_post;
use crate::stream_bridge::handle_sse_stream;
use axum::{
    Router,
    routing::{get, post},
};
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Builds the adapter router over a shared bridge.
pub fn router(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/mcp", post(handle_rpc_post).get(handle_sse_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(bridge)
}

/// Serves `bridge` on `listener` until the bridge shuts down.
///
/// Shutdown starts when the subprocess output ends or
/// [`Bridge::request_shutdown`] is called. In-flight requests get the
/// shutdown grace period to finish; connections still open after that are
/// dropped. Returns why the bridge stopped.
pub async fn serve(listener: TcpListener, bridge: Arc<Bridge>) -> Result<TerminationReason> {
    let local_addr = listener
        .local_addr()
        .map_err(|e| BridgeError::HttpServer(format!("Failed to get local addr: {}", e)))?;
    info!("MCP adapter listening on http://{}", local_addr);
    info!("MCP endpoint (POST): http://{}/mcp", local_addr);
    info!("MCP endpoint (GET/SSE): http://{}/mcp", local_addr);

    let shutdown = bridge.shutdown_token().clone();
    let grace = bridge.timeouts().shutdown_grace;
    let server = axum::serve(listener, router(bridge.clone()))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();

    tokio::select! {
        result = server => {
            result.map_err(|e| BridgeError::HttpServer(format!("Server error: {}", e)))?;
        }
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(?grace, "HTTP connections still open after grace period, dropping them");
        }
    }

    Ok(match bridge.lifecycle().current() {
        ProcessState::Terminated { reason } => reason,
        _ => TerminationReason::ShutdownRequested,
    })
}

/// Spawns the MCP server, binds the HTTP listener and runs until shutdown.
///
/// SIGINT and SIGTERM request a graceful shutdown. The subprocess is reaped
/// before returning.
pub async fn start_bridge(config: AdapterConfig) -> Result<TerminationReason> {
    info!("Starting MCP adapter on {}", config.bind_addr);

    let bridge = Arc::new(Bridge::spawn(&config)?);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| BridgeError::HttpServer(format!("Failed to bind {}: {}", config.bind_addr, e)))?;

    {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("Shutdown signal received");
                    bridge.request_shutdown();
                }
                _ = bridge.shutdown_token().cancelled() => {}
            }
        });
    }

    let reason = serve(listener, bridge.clone()).await;
    bridge.close().await;
    reason
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
