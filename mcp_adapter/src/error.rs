//! Error types for the adapter

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to spawn MCP server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to MCP server: {0}")]
    Write(#[source] std::io::Error),

    #[error("MCP server closed the connection")]
    SubprocessGone,

    #[error("Timed out after {0:?} waiting for MCP server response")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP server error: {0}")]
    HttpServer(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
