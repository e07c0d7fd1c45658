//! `GET /health` driven with a manual clock.

mod common;

use axum::http::StatusCode;
use common::*;
use mcp_adapter::ManualClock;
use std::sync::Arc;
use std::time::Duration;

async fn health(bridge: &Arc<mcp_adapter::Bridge>) -> (StatusCode, String) {
    let response = get(bridge, "/health").await;
    let status = response.status();
    (status, body_text(response).await)
}

#[tokio::test]
async fn reports_ok_while_active() {
    let (bridge, _server) = attach(fast_timeouts(), Arc::new(ManualClock::new()));
    assert_eq!(health(&bridge).await, (StatusCode::OK, "OK".to_string()));
}

#[tokio::test]
async fn idle_subprocess_turns_unhealthy_until_it_speaks() {
    let clock = Arc::new(ManualClock::new());
    let (bridge, mut server) = attach(fast_timeouts(), clock.clone());

    clock.advance(Duration::from_secs(59));
    assert_eq!(health(&bridge).await.0, StatusCode::OK);

    clock.advance(Duration::from_secs(1));
    assert_eq!(
        health(&bridge).await,
        (StatusCode::SERVICE_UNAVAILABLE, "MCP server inactive".to_string())
    );

    // Any output counts as activity, even output nobody asked for.
    server
        .reply(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#)
        .await;
    eventually(|| bridge.health().status().is_healthy()).await;
    assert_eq!(health(&bridge).await.0, StatusCode::OK);
}

#[tokio::test]
async fn http_traffic_counts_as_activity() {
    let clock = Arc::new(ManualClock::new());
    let (bridge, _server) = attach(fast_timeouts(), clock.clone());

    clock.advance(Duration::from_secs(90));
    assert_eq!(health(&bridge).await.0, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = post(&bridge, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(health(&bridge).await.0, StatusCode::OK);
}

#[tokio::test]
async fn stopped_subprocess_is_not_running() {
    let (bridge, server) = attach(fast_timeouts(), Arc::new(ManualClock::new()));

    server.exit();
    eventually(|| !bridge.health().is_running()).await;

    assert_eq!(
        health(&bridge).await,
        (StatusCode::SERVICE_UNAVAILABLE, "MCP server not running".to_string())
    );
}
