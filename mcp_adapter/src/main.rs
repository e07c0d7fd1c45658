use clap::Parser;
use mcp_adapter::config::{
    ARGS_ENV, BIND_ADDR_ENV, COMMAND_ENV, DEFAULT_BIND_ADDR, collect_env_overrides, process_env,
    split_server_args,
};
use mcp_adapter::{AdapterConfig, BridgeError, BridgeTimeouts, TerminationReason, start_bridge};
use std::net::SocketAddr;
use tracing::{error, info};

/// Serves a stdio MCP server over HTTP and Server-Sent Events.
///
/// Child environment overrides are read from `MCP_ENV_<KEY>` variables.
#[derive(Parser, Debug)]
#[command(name = "mcp_adapter")]
#[command(version, about)]
struct Args {
    /// Command that starts the stdio MCP server.
    #[arg(long, env = COMMAND_ENV)]
    server_command: String,

    /// Comma-separated arguments for the MCP server, split verbatim.
    #[arg(long, env = ARGS_ENV, default_value = "")]
    server_args: String,

    /// Address to bind the HTTP server.
    #[arg(long, env = BIND_ADDR_ENV, default_value = DEFAULT_BIND_ADDR)]
    bind_addr: SocketAddr,
}

impl Args {
    fn into_config(self) -> Result<AdapterConfig, BridgeError> {
        if self.server_command.trim().is_empty() {
            return Err(BridgeError::Config(format!("{COMMAND_ENV} must not be empty")));
        }
        Ok(AdapterConfig {
            bind_addr: self.bind_addr,
            server_command: self.server_command,
            server_args: split_server_args(&self.server_args),
            env_overrides: collect_env_overrides(process_env()),
            timeouts: BridgeTimeouts::default(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mcp_adapter::logging::init_logging();

    let config = Args::parse().into_config()?;
    info!(
        command = %config.server_command,
        args = ?config.server_args,
        env_overrides = ?config.env_overrides.keys().collect::<Vec<_>>(),
        "Loaded MCP configuration"
    );

    match start_bridge(config).await? {
        TerminationReason::ShutdownRequested => {
            info!("MCP adapter stopped");
            Ok(())
        }
        reason => {
            error!(%reason, "MCP adapter exiting because the MCP server ended");
            anyhow::bail!("MCP server process ended: {reason}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_build_config() {
        let args = Args::try_parse_from([
            "mcp_adapter",
            "--server-command",
            "node",
            "--server-args",
            "server.js,--port=0",
            "--bind-addr",
            "127.0.0.1:9000",
        ])
        .unwrap();
        let config = args.into_config().unwrap();
        assert_eq!(config.server_command, "node");
        assert_eq!(config.server_args, vec!["server.js", "--port=0"]);
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn blank_command_is_rejected() {
        let args = Args::try_parse_from(["mcp_adapter", "--server-command", "  "]).unwrap();
        assert!(matches!(args.into_config(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn invalid_bind_addr_is_rejected() {
        let result = Args::try_parse_from([
            "mcp_adapter",
            "--server-command",
            "srv",
            "--bind-addr",
            "not-an-address",
        ]);
        assert!(result.is_err());
    }
}
