//! # MCP Adapter
//!
//! Exposes a stdio JSON-RPC (MCP) server as an HTTP service.
//!
//! The adapter spawns a single MCP server subprocess and bridges to it:
//!
//! *   **`POST /mcp`**: the body is written to the subprocess stdin as one line and
//!     the reply with the same JSON-RPC id is returned verbatim. Notifications
//!     (no id) get `204 No Content`.
//! *   **`GET /mcp`**: a Server-Sent Events stream that runs the MCP handshake
//!     (`initialize`, then `tools/list`), emits both replies and then sends
//!     keepalive comments.
//! *   **`GET /health`**: `200 OK` while the subprocess runs and has been active
//!     recently, `503` otherwise.
//!
//! The adapter lives exactly as long as its subprocess. When the subprocess
//! closes stdout, pending callers fail, `/health` turns unhealthy and the HTTP
//! server drains and exits with an error.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mcp_adapter::{AdapterConfig, TerminationReason, start_bridge};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = AdapterConfig::new("my-mcp-server");
//!     config.bind_addr = "127.0.0.1:8080".parse()?;
//!
//!     let reason = start_bridge(config).await?;
//!     anyhow::ensure!(reason == TerminationReason::ShutdownRequested, "{reason}");
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame_reader;
pub mod health;
pub mod lifecycle;
pub mod logging;
pub mod request_bridge;
pub mod rpc;
pub mod server;
pub mod stream_bridge;
pub mod subprocess;

pub use bridge::Bridge;
pub use config::{AdapterConfig, BridgeTimeouts};
pub use error::{BridgeError, Result};
pub use health::{Clock, HealthStatus, ManualClock, SystemClock};
pub use lifecycle::{Lifecycle, ProcessState, TerminationReason};
pub use server::{router, serve, start_bridge};
