//! The bridge core shared by every HTTP handler.
//!
//! A `Bridge` owns one subprocess channel and the background tasks around it:
//!
//! ```text
//! stdout ─▶ FrameReader ─▶ delivery queue (10) ─▶ dispatcher ─▶ PendingReplies ─▶ callers
//! callers ─▶ SubprocessChannel writer ─▶ stdin
//! ```
//!
//! When stdout ends, the health record is marked stopped, the queue closes
//! (failing every pending caller), the lifecycle moves to `Terminated` and the
//! shutdown token fires so the HTTP server can drain and exit.

use crate::config::{AdapterConfig, BridgeTimeouts, DELIVERY_QUEUE_CAPACITY, process_env};
use crate::dispatch::{PendingReplies, ReplyWaiter, run_dispatcher};
use crate::error::Result;
use crate::frame_reader::FrameReader;
use crate::health::{Clock, HealthState, SystemClock};
use crate::lifecycle::{Lifecycle, TerminationReason};
use crate::rpc::{Correlation, Frame};
use crate::subprocess::{SubprocessChannel, SubprocessSpec, forward_stderr};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Bridge {
    channel: SubprocessChannel,
    pending: Arc<PendingReplies>,
    health: Arc<HealthState>,
    lifecycle: Lifecycle,
    shutdown: CancellationToken,
    timeouts: BridgeTimeouts,
}

impl Bridge {
    /// Spawns the configured MCP server and starts reading from it.
    pub fn spawn(config: &AdapterConfig) -> Result<Self> {
        let spec = SubprocessSpec {
            command: config.server_command.clone(),
            args: config.server_args.clone(),
            env: config.child_env(process_env()),
        };
        let spawned = SubprocessChannel::spawn(&spec)?;
        if let Some(stderr) = spawned.stderr {
            tokio::spawn(forward_stderr(stderr));
        }
        Ok(Self::start(
            spawned.channel,
            spawned.stdout,
            config.timeouts,
            Arc::new(SystemClock),
        ))
    }

    /// Runs the bridge over an arbitrary stdin/stdout pair instead of a child
    /// process.
    pub fn attach<W, R>(stdin: W, stdout: R, timeouts: BridgeTimeouts, clock: Arc<dyn Clock>) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::start(SubprocessChannel::from_writer(stdin), stdout, timeouts, clock)
    }

    fn start<R>(
        channel: SubprocessChannel,
        stdout: R,
        timeouts: BridgeTimeouts,
        clock: Arc<dyn Clock>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let health = Arc::new(HealthState::new(clock, timeouts.inactivity_limit));
        let pending = Arc::new(PendingReplies::new());
        let lifecycle = Lifecycle::new();
        let shutdown = CancellationToken::new();
        let (queue_tx, queue_rx) = mpsc::channel(DELIVERY_QUEUE_CAPACITY);

        if let Err(e) = lifecycle.mark_running(channel.pid()) {
            warn!("Unexpected lifecycle state at startup: {}", e);
        }

        tokio::spawn(run_dispatcher(queue_rx, pending.clone()));

        let reader = FrameReader::new(stdout, queue_tx, health.clone());
        {
            let lifecycle = lifecycle.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let reason = reader.run().await;
                error!(%reason, "MCP server process ended, shutting down adapter");
                lifecycle.terminate(reason);
                shutdown.cancel();
            });
        }

        Self {
            channel,
            pending,
            health,
            lifecycle,
            shutdown,
            timeouts,
        }
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn timeouts(&self) -> &BridgeTimeouts {
        &self.timeouts
    }

    pub fn pending(&self) -> &PendingReplies {
        &self.pending
    }

    /// Fires when the bridge starts shutting down for any reason.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Starts a graceful shutdown that is not caused by the subprocess.
    pub fn request_shutdown(&self) {
        if self.lifecycle.terminate(TerminationReason::ShutdownRequested) {
            info!("Adapter shutdown requested");
        }
        self.shutdown.cancel();
    }

    /// Writes a payload that expects no reply.
    pub async fn forward(&self, payload: &[u8]) -> Result<()> {
        self.channel.write(payload).await?;
        debug!(bytes = payload.len(), "Forwarded notification to MCP server");
        Ok(())
    }

    /// Registers for a reply ahead of writing the request it answers.
    pub fn expect_reply(&self, correlation: &Correlation) -> Result<ReplyWaiter> {
        self.pending.register(correlation)
    }

    /// Writes `payload` and waits up to `timeout` for the matching reply.
    ///
    /// Refreshes the activity timestamp on success.
    pub async fn call(&self, payload: &[u8], correlation: &Correlation, timeout: Duration) -> Result<Frame> {
        let waiter = self.expect_reply(correlation)?;
        self.channel.write(payload).await?;
        debug!(bytes = payload.len(), "Forwarded request to MCP server");

        let frame = waiter.recv(timeout).await?;
        self.health.touch();
        Ok(frame)
    }

    /// Reaps the subprocess, killing it if it does not exit within the
    /// shutdown grace period.
    pub async fn close(&self) -> Option<ExitStatus> {
        self.channel.reap(self.timeouts.shutdown_grace).await
    }
}
