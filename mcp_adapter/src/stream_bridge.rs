//! `GET /mcp`: a Server-Sent Events session.
//!
//! Each session runs the MCP handshake on the caller's behalf (`initialize`,
//! then `tools/list`), emits both replies as events and then only sends
//! keepalive comments. Later subprocess output is not pushed to the stream.
//!
//! Any failure ends the stream quietly; there is no error event.

use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::rpc::{Correlation, Frame, RequestKey, RpcEnvelope};
use axum::{
    extract::State,
    http::header,
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const INIT_EVENT_ID: &str = "sse_init";
pub const TOOLS_LIST_EVENT_ID: &str = "sse_tools_list";

/// Events buffered between the session task and the HTTP body.
const EVENT_BUFFER: usize = 8;

struct HandshakeStep {
    id: &'static str,
    method: &'static str,
}

const HANDSHAKE: [HandshakeStep; 2] = [
    HandshakeStep {
        id: INIT_EVENT_ID,
        method: "initialize",
    },
    HandshakeStep {
        id: TOOLS_LIST_EVENT_ID,
        method: "tools/list",
    },
];

type EventSender = mpsc::Sender<Result<Event, Infallible>>;

/// Why a session stopped early.
#[derive(Debug, Error)]
enum SessionEnd {
    #[error("client disconnected")]
    ClientGone,
    #[error("adapter shutting down")]
    ShuttingDown,
    #[error("reply is not representable as SSE data")]
    Unrepresentable,
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// `GET /mcp`
pub async fn handle_sse_stream(State(bridge): State<Arc<Bridge>>) -> Response {
    info!("SSE connection established");
    let (events, stream) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(run_session(bridge, events));

    let headers = [
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    ];
    (headers, Sse::new(ReceiverStream::new(stream))).into_response()
}

async fn run_session(bridge: Arc<Bridge>, events: EventSender) {
    let session = CancellationToken::new();
    let _stop_refresh = session.clone().drop_guard();
    tokio::spawn(refresh_activity(bridge.clone(), session));

    for step in &HANDSHAKE {
        if let Err(reason) = handshake_step(&bridge, &events, step).await {
            info!(step = step.method, %reason, "SSE handshake aborted, closing stream");
            return;
        }
    }
    info!("Initial messages (initialize, tools/list) sent successfully");

    let reason = keepalive(&bridge, &events).await;
    info!(%reason, "SSE session closed");
}

async fn handshake_step(
    bridge: &Bridge,
    events: &EventSender,
    step: &HandshakeStep,
) -> Result<(), SessionEnd> {
    let request = RpcEnvelope::request(step.id, step.method, json!({}));
    let payload = serde_json::to_vec(&request).map_err(BridgeError::from)?;
    let correlation = Correlation::Id(RequestKey::from_id(&Value::String(step.id.to_string())));
    let timeout = bridge.timeouts().handshake_step;

    let frame = tokio::select! {
        result = bridge.call(&payload, &correlation, timeout) => result?,
        _ = events.closed() => return Err(SessionEnd::ClientGone),
        _ = bridge.shutdown_token().cancelled() => return Err(SessionEnd::ShuttingDown),
    };

    let event = reply_event(step.id, &frame).ok_or(SessionEnd::Unrepresentable)?;
    events
        .send(Ok(event))
        .await
        .map_err(|_| SessionEnd::ClientGone)?;
    bridge.health().touch();
    debug!(id = step.id, "Sent SSE handshake event");
    Ok(())
}

/// A reply must be UTF-8 and fit on one `data:` line.
fn reply_event(id: &str, frame: &Frame) -> Option<Event> {
    let data = std::str::from_utf8(frame.as_bytes()).ok()?;
    if data.contains(['\r', '\n']) {
        return None;
    }
    Some(Event::default().id(id).data(data))
}

async fn keepalive(bridge: &Bridge, events: &EventSender) -> SessionEnd {
    let period = bridge.timeouts().keepalive_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = events.closed() => return SessionEnd::ClientGone,
            _ = bridge.shutdown_token().cancelled() => return SessionEnd::ShuttingDown,
            _ = ticker.tick() => {
                if events.send(Ok(Event::default().comment("keepalive"))).await.is_err() {
                    return SessionEnd::ClientGone;
                }
            }
        }
    }
}

/// Keeps the bridge looking active while a session is open.
async fn refresh_activity(bridge: Arc<Bridge>, session: CancellationToken) {
    let period: Duration = bridge.timeouts().activity_refresh;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = session.cancelled() => return,
            _ = ticker.tick() => bridge.health().touch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &[u8]) -> Frame {
        Frame::from_line(text).unwrap()
    }

    #[test]
    fn single_line_utf8_replies_become_events() {
        assert!(reply_event(INIT_EVENT_ID, &frame(br#"{"id":"sse_init","result":{}}"#)).is_some());
    }

    #[test]
    fn replies_that_break_sse_framing_are_rejected() {
        assert!(reply_event(INIT_EVENT_ID, &frame(b"{\"a\":1}\r{\"b\":2}")).is_none());
        assert!(reply_event(INIT_EVENT_ID, &frame(b"{\"a\":\"\xff\"}")).is_none());
    }

    #[test]
    fn handshake_runs_initialize_before_tools_list() {
        let methods: Vec<_> = HANDSHAKE.iter().map(|s| (s.id, s.method)).collect();
        assert_eq!(
            methods,
            vec![
                ("sse_init", "initialize"),
                ("sse_tools_list", "tools/list")
            ]
        );
    }
}
