//! # Adapter Configuration
//!
//! The adapter is configured once at startup, mostly from environment variables
//! so it can run unchanged inside a container next to the MCP server it wraps:
//!
//! - `MCP_COMMAND`: executable of the stdio MCP server (required).
//! - `MCP_ARGS`: comma-separated argument list, split verbatim.
//! - `MCP_BIND_ADDR`: HTTP listen address, `0.0.0.0:8080` by default.
//! - `MCP_ENV_<KEY>=<value>`: sets `<KEY>=<value>` in the child environment.
//!   A value written as `${NAME}` is replaced with the adapter's own value of
//!   `NAME` (empty when unset).
//!
//! The child inherits the adapter environment minus the keys above. All
//! functions here take the environment as an iterator so they can be tested
//! without touching the process environment.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

pub const COMMAND_ENV: &str = "MCP_COMMAND";
pub const ARGS_ENV: &str = "MCP_ARGS";
pub const BIND_ADDR_ENV: &str = "MCP_BIND_ADDR";
pub const ENV_OVERRIDE_PREFIX: &str = "MCP_ENV_";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Capacity of the queue between the stdout reader and the dispatcher.
pub const DELIVERY_QUEUE_CAPACITY: usize = 10;

/// Timing knobs of the bridge.
///
/// The defaults are the production values; tests shrink them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeTimeouts {
    /// How long `POST /mcp` waits for the subprocess reply.
    pub request: Duration,
    /// How long each SSE handshake step waits for its reply.
    pub handshake_step: Duration,
    /// Period of comment-only keepalive events after the SSE handshake.
    pub keepalive_interval: Duration,
    /// Period at which an open SSE session refreshes the activity timestamp.
    pub activity_refresh: Duration,
    /// Idle time after which `/health` reports the subprocess inactive.
    pub inactivity_limit: Duration,
    /// How long in-flight HTTP responses may drain once shutdown starts.
    pub shutdown_grace: Duration,
}

impl Default for BridgeTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(10),
            handshake_step: Duration::from_secs(15),
            keepalive_interval: Duration::from_secs(20),
            activity_refresh: Duration::from_secs(30),
            inactivity_limit: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Fully resolved startup configuration.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Address the HTTP server binds to. Port 0 picks a free port.
    pub bind_addr: SocketAddr,
    /// Executable of the stdio MCP server.
    pub server_command: String,
    /// Arguments passed to the MCP server.
    pub server_args: Vec<String>,
    /// Child environment overrides, keyed by the child variable name.
    pub env_overrides: BTreeMap<String, String>,
    pub timeouts: BridgeTimeouts,
}

impl AdapterConfig {
    /// Configuration for `server_command` with defaults everywhere else.
    pub fn new(server_command: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            server_command: server_command.into(),
            server_args: Vec::new(),
            env_overrides: BTreeMap::new(),
            timeouts: BridgeTimeouts::default(),
        }
    }

    /// Environment the child process is started with, given the adapter's own.
    pub fn child_env<I>(&self, parent: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        resolve_child_env(parent, &self.env_overrides)
    }
}

/// Splits `MCP_ARGS` on commas. An empty value means no arguments.
pub fn split_server_args(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',').map(str::to_string).collect()
}

/// True for variables that configure the adapter itself and must not leak
/// into the child environment.
pub fn is_adapter_key(key: &str) -> bool {
    key == COMMAND_ENV
        || key == ARGS_ENV
        || key == BIND_ADDR_ENV
        || key.starts_with(ENV_OVERRIDE_PREFIX)
}

/// Collects `MCP_ENV_<KEY>=<value>` pairs as `<KEY> => <value>`.
///
/// Values are kept raw; indirection markers are resolved by
/// [`resolve_child_env`].
pub fn collect_env_overrides<I>(vars: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| {
            let child_key = key.strip_prefix(ENV_OVERRIDE_PREFIX)?;
            if child_key.is_empty() {
                tracing::warn!(variable = %key, "Ignoring environment override without a name");
                return None;
            }
            Some((child_key.to_string(), value))
        })
        .collect()
}

/// Builds the child environment: the parent environment without adapter
/// keys, overlaid with `overrides`.
///
/// Overrides of the form `${NAME}` take the parent's value of `NAME`, looked
/// up before adapter keys are filtered out.
pub fn resolve_child_env<I>(parent: I, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let parent: BTreeMap<String, String> = parent.into_iter().collect();

    let mut env: BTreeMap<String, String> = parent
        .iter()
        .filter(|(key, _)| !is_adapter_key(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    for (key, value) in overrides {
        env.insert(key.clone(), resolve_indirection(value, &parent));
    }
    env
}

fn resolve_indirection(value: &str, parent: &BTreeMap<String, String>) -> String {
    match value.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(name) => parent.get(name).cloned().unwrap_or_default(),
        None => value.to_string(),
    }
}

/// Snapshot of the process environment, skipping entries that are not UTF-8.
pub fn process_env() -> Vec<(String, String)> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}
