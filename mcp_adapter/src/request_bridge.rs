//! `POST /mcp`: forward one JSON-RPC message and return the subprocess reply.
//!
//! The body is forwarded byte for byte. Notifications are answered with 204
//! as soon as they are written; everything else waits for the matching reply,
//! which is returned verbatim.

use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::rpc::{self, Correlation, RequestKind};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// JSON-RPC internal error.
const INTERNAL_ERROR: i32 = -32603;
/// Server-defined error: no reply within the request timeout.
const TIMEOUT_ERROR: i32 = -32001;

fn json_bytes_response(status: StatusCode, body: Bytes) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| (status, "Failed to create response").into_response())
}

/// Build a JSON-RPC error object, echoing `id` (or `null`).
fn json_rpc_error_value(id: Value, code: i32, message: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}

fn error_response(status: StatusCode, id: Value, code: i32, message: &str) -> Response {
    let body = serde_json::to_vec(&json_rpc_error_value(id, code, message)).unwrap_or_default();
    json_bytes_response(status, Bytes::from(body))
}

fn request_id(correlation: &Correlation) -> Value {
    match correlation {
        Correlation::Id(key) => serde_json::from_str(key.as_str()).unwrap_or(Value::Null),
        Correlation::Uncorrelated => Value::Null,
    }
}

/// Maps a bridge failure onto the HTTP status and JSON-RPC error the caller sees.
fn failure_response(err: &BridgeError, id: Value) -> Response {
    match err {
        BridgeError::Timeout(_) => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            id,
            TIMEOUT_ERROR,
            &err.to_string(),
        ),
        _ => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            id,
            INTERNAL_ERROR,
            &format!("Failed to send request: {}", err),
        ),
    }
}

/// `POST /mcp`
pub async fn handle_rpc_post(State(bridge): State<Arc<Bridge>>, body: Bytes) -> Response {
    debug!(bytes = body.len(), "Received JSON-RPC message over HTTP");
    let kind = rpc::classify(&body);
    bridge.health().touch();

    match kind {
        RequestKind::Notification => match bridge.forward(&body).await {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(e) => {
                error!("Failed to forward notification: {}", e);
                failure_response(&e, Value::Null)
            }
        },
        RequestKind::Call(correlation) => {
            let timeout = bridge.timeouts().request;
            match bridge.call(&body, &correlation, timeout).await {
                Ok(frame) => json_bytes_response(StatusCode::OK, frame.into_bytes()),
                Err(e) => {
                    match &e {
                        BridgeError::Timeout(_) => warn!("Request timed out: {}", e),
                        _ => error!("Failed to send request: {}", e),
                    }
                    failure_response(&e, request_id(&correlation))
                }
            }
        }
    }
}
