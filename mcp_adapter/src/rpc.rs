//! The little JSON-RPC the adapter needs to understand.
//!
//! Payloads are never re-serialized on their way through the bridge. The
//! adapter only peeks at `id` (to tell notifications from requests and to
//! route replies) and `method` (to recognise messages the subprocess
//! initiates).

use bytes::Bytes;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A JSON-RPC message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEnvelope {
    #[serde(default)]
    pub jsonrpc: String,
    /// Absent and `null` both deserialize to `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl RpcEnvelope {
    /// A JSON-RPC 2.0 request with a string id.
    pub fn request(id: &str, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::String(id.to_string())),
            method: method.to_string(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Canonical form of a non-null request id: the id's JSON text, so `1` and
/// `"1"` stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn from_id(id: &Value) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a reply to an outgoing request is recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    /// The reply carries this id.
    Id(RequestKey),
    /// The request could not be parsed; the reply is expected without a
    /// usable id and is matched in arrival order.
    Uncorrelated,
}

/// What the adapter does with an incoming POST body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// No reply is expected.
    Notification,
    /// A reply is expected and matched by `Correlation`.
    Call(Correlation),
}

/// Classifies a caller payload.
///
/// Anything that does not parse as an envelope object is treated as a call:
/// the payload still goes to the subprocess and a reply is still awaited.
/// Arrays (batches, `[]`) are never envelopes.
pub fn classify(body: &[u8]) -> RequestKind {
    match parse_envelope(body) {
        Ok(envelope) => match envelope.id {
            None => RequestKind::Notification,
            Some(id) => RequestKind::Call(Correlation::Id(RequestKey::from_id(&id))),
        },
        Err(err) => {
            tracing::warn!(error = %err, "Could not parse JSON-RPC request, forwarding anyway");
            RequestKind::Call(Correlation::Uncorrelated)
        }
    }
}

fn parse_envelope(body: &[u8]) -> serde_json::Result<RpcEnvelope> {
    match serde_json::from_slice::<Value>(body)? {
        value @ Value::Object(_) => serde_json::from_value(value),
        _ => Err(serde_json::Error::custom("expected a JSON-RPC object")),
    }
}

/// Where a frame from the subprocess should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRoute {
    /// A reply to the request with this key.
    Reply(RequestKey),
    /// A reply without a usable id, or something that is not JSON-RPC.
    Anonymous,
    /// A request or notification initiated by the subprocess.
    Unsolicited,
}

/// One trimmed, non-empty line of subprocess output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    /// Trims surrounding ASCII whitespace; `None` when nothing is left.
    pub fn from_line(line: &[u8]) -> Option<Self> {
        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(Bytes::copy_from_slice(trimmed)))
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Lossy text form, for logs.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    /// Only JSON objects are routed by their fields; batches, scalars and
    /// non-JSON lines are anonymous.
    pub fn route(&self) -> FrameRoute {
        let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(&self.0) else {
            return FrameRoute::Anonymous;
        };
        if fields.get("method").is_some_and(|m| !m.is_null()) {
            return FrameRoute::Unsolicited;
        }
        match fields.get("id") {
            Some(id) if !id.is_null() => FrameRoute::Reply(RequestKey::from_id(id)),
            _ => FrameRoute::Anonymous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(text: &str) -> Frame {
        Frame::from_line(text.as_bytes()).unwrap()
    }

    #[test]
    fn missing_or_null_id_is_notification() {
        assert_eq!(
            classify(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#),
            RequestKind::Notification
        );
        assert_eq!(
            classify(br#"{"jsonrpc":"2.0","id":null,"method":"x"}"#),
            RequestKind::Notification
        );
    }

    #[test]
    fn ids_become_keys() {
        assert_eq!(
            classify(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#),
            RequestKind::Call(Correlation::Id(RequestKey::from_id(&json!(1))))
        );
        assert_eq!(
            classify(br#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#),
            RequestKind::Call(Correlation::Id(RequestKey::from_id(&json!("abc"))))
        );
    }

    #[test]
    fn unparseable_body_awaits_reply() {
        assert_eq!(
            classify(b"{not json"),
            RequestKind::Call(Correlation::Uncorrelated)
        );
        assert_eq!(
            classify(br#"{"jsonrpc":"2.0","id":1,"method":5}"#),
            RequestKind::Call(Correlation::Uncorrelated)
        );
    }

    #[test]
    fn arrays_are_never_notifications() {
        for body in [
            &b"[]"[..],
            br#"[{"jsonrpc":"2.0","id":1,"method":"ping"}]"#,
            br#"["2.0",1,"ping"]"#,
        ] {
            assert_eq!(
                classify(body),
                RequestKind::Call(Correlation::Uncorrelated),
                "{}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn numeric_and_string_ids_differ() {
        assert_ne!(
            RequestKey::from_id(&json!(1)),
            RequestKey::from_id(&json!("1"))
        );
    }

    #[test]
    fn frame_trims_and_rejects_blank_lines() {
        assert!(Frame::from_line(b"   \r\n").is_none());
        assert!(Frame::from_line(b"").is_none());
        assert_eq!(frame("  {\"a\":1}\r\n").as_bytes(), br#"{"a":1}"#);
    }

    #[test]
    fn frame_routes() {
        assert_eq!(
            frame(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#).route(),
            FrameRoute::Reply(RequestKey::from_id(&json!(7)))
        );
        assert_eq!(
            frame(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#)
                .route(),
            FrameRoute::Anonymous
        );
        assert_eq!(frame("plain text").route(), FrameRoute::Anonymous);
        assert_eq!(
            frame(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#).route(),
            FrameRoute::Unsolicited
        );
        assert_eq!(
            frame(r#"{"jsonrpc":"2.0","id":3,"method":"roots/list"}"#).route(),
            FrameRoute::Unsolicited
        );
    }

    #[test]
    fn batch_replies_are_anonymous() {
        assert_eq!(
            frame(r#"[{"jsonrpc":"2.0","id":1,"result":"ok"}]"#).route(),
            FrameRoute::Anonymous
        );
        assert_eq!(
            frame(r#"[{"jsonrpc":"2.0","id":1,"result":"a"},{"jsonrpc":"2.0","id":2,"result":"b"}]"#)
                .route(),
            FrameRoute::Anonymous
        );
        assert_eq!(frame("42").route(), FrameRoute::Anonymous);
    }

    #[test]
    fn handshake_request_serializes_compactly() {
        let envelope = RpcEnvelope::request("sse_init", "initialize", json!({}));
        assert_eq!(
            serde_json::to_string(&envelope).unwrap(),
            r#"{"jsonrpc":"2.0","id":"sse_init","method":"initialize","params":{}}"#
        );
        assert!(!envelope.is_notification());
    }
}
