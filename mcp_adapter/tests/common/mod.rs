//! Shared helpers for adapter integration tests.
//!
//! Two kinds of MCP server are used:
//!
//! - real `sh -c` subprocesses for end-to-end behaviour (`spawn_script`);
//! - an in-memory `FakeServer` attached over duplex pipes when a test needs to
//!   control exactly when and in which order replies arrive (`attach`).

// Allow dead_code - each test crate uses a different subset of these helpers
#![allow(dead_code)]

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures::StreamExt;
use mcp_adapter::{AdapterConfig, Bridge, BridgeTimeouts, Clock, router};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tower::ServiceExt;

/// Answers every request line by turning its `method` into a `result`.
/// Lines without an id (notifications) get no answer.
pub const ECHO_SERVER: &str = r#"while IFS= read -r line; do
  case "$line" in
    *'"id"'*) printf '%s\n' "$line" | sed 's/"method":"[^"]*"/"result":"pong"/' ;;
  esac
done"#;

/// Reads everything and never answers.
pub const SILENT_SERVER: &str = "cat > /dev/null";

/// Upper bound for anything a test waits on.
pub const TEST_DEADLINE: Duration = Duration::from_secs(10);

pub fn fast_timeouts() -> BridgeTimeouts {
    BridgeTimeouts {
        request: Duration::from_secs(5),
        handshake_step: Duration::from_secs(5),
        keepalive_interval: Duration::from_millis(50),
        activity_refresh: Duration::from_millis(50),
        inactivity_limit: Duration::from_secs(60),
        shutdown_grace: Duration::from_millis(500),
    }
}

/// Spawns `sh -c <script>` as the MCP server.
pub fn spawn_script(script: &str, timeouts: BridgeTimeouts) -> Arc<Bridge> {
    let mut config = AdapterConfig::new("sh");
    config.server_args = vec!["-c".to_string(), script.to_string()];
    config.timeouts = timeouts;
    Arc::new(Bridge::spawn(&config).expect("failed to spawn sh"))
}

/// The subprocess side of an attached bridge.
pub struct FakeServer {
    requests: Lines<BufReader<DuplexStream>>,
    replies: DuplexStream,
}

impl FakeServer {
    /// Next line the bridge wrote, parsed as JSON.
    pub async fn next_request(&mut self) -> Value {
        let line = tokio::time::timeout(TEST_DEADLINE, self.requests.next_line())
            .await
            .expect("timed out waiting for a request")
            .expect("read failed")
            .expect("bridge closed stdin");
        serde_json::from_str(&line).expect("request is not JSON")
    }

    /// Next raw line the bridge wrote.
    pub async fn next_line(&mut self) -> String {
        tokio::time::timeout(TEST_DEADLINE, self.requests.next_line())
            .await
            .expect("timed out waiting for a line")
            .expect("read failed")
            .expect("bridge closed stdin")
    }

    pub async fn reply(&mut self, frame: &str) {
        self.replies
            .write_all(format!("{frame}\n").as_bytes())
            .await
            .expect("bridge closed stdout");
    }

    /// Closes the fake stdout, as if the subprocess exited.
    pub fn exit(self) {}
}

pub fn attach(timeouts: BridgeTimeouts, clock: Arc<dyn Clock>) -> (Arc<Bridge>, FakeServer) {
    let (bridge_stdin, server_stdin) = tokio::io::duplex(64 * 1024);
    let (server_stdout, bridge_stdout) = tokio::io::duplex(64 * 1024);
    let bridge = Bridge::attach(bridge_stdin, bridge_stdout, timeouts, clock);
    let server = FakeServer {
        requests: BufReader::new(server_stdin).lines(),
        replies: server_stdout,
    };
    (Arc::new(bridge), server)
}

pub async fn send(bridge: &Arc<Bridge>, request: Request<Body>) -> Response {
    router(bridge.clone())
        .oneshot(request)
        .await
        .expect("router is infallible")
}

pub async fn post(bridge: &Arc<Bridge>, body: &str) -> (StatusCode, String) {
    let request = Request::post("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = send(bridge, request).await;
    let status = response.status();
    (status, body_text(response).await)
}

pub async fn get(bridge: &Arc<Bridge>, path: &str) -> Response {
    send(bridge, Request::get(path).body(Body::empty()).unwrap()).await
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Reads an SSE body until `needle` shows up or the stream ends.
pub async fn read_sse_until(response: Response, needle: &str) -> String {
    let mut stream = response.into_body().into_data_stream();
    let mut seen = String::new();
    let read = async {
        while let Some(chunk) = stream.next().await {
            seen.push_str(std::str::from_utf8(&chunk.unwrap()).unwrap());
            if seen.contains(needle) {
                break;
            }
        }
    };
    tokio::time::timeout(TEST_DEADLINE, read)
        .await
        .expect("timed out reading SSE stream");
    seen
}

/// Polls `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TEST_DEADLINE;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
