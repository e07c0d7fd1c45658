//! Subprocess lifecycle state machine.
//!
//! ```text
//! Starting → Running → Terminated
//!     └───────────────────↗
//! ```
//!
//! `Terminated` is absorbing: the adapter never restarts the MCP server. The
//! state lives in a `tokio::sync::watch` channel so the HTTP server, the SSE
//! sessions and `main` can all wait for termination without polling. Exiting
//! the process is left to whoever observes the transition, which lets in-flight
//! responses drain first.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Why the subprocess side of the bridge stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The subprocess closed its stdout (normally because it exited).
    OutputClosed,
    /// Reading the subprocess stdout failed.
    OutputFailed(String),
    /// The adapter itself is shutting down (signal or explicit request).
    ShutdownRequested,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutputClosed => write!(f, "MCP server stdout closed"),
            Self::OutputFailed(err) => write!(f, "error reading MCP server stdout: {err}"),
            Self::ShutdownRequested => write!(f, "shutdown requested"),
        }
    }
}

/// Lifecycle states of the wrapped MCP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawn in progress.
    Starting,
    /// Subprocess attached and its stdout is being read.
    Running { pid: Option<u32> },
    /// Subprocess gone. Never left once entered.
    Terminated { reason: TerminationReason },
}

impl ProcessState {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, ProcessState::Terminated { .. })
    }
}

/// Observable lifecycle shared by every bridge component.
#[derive(Clone)]
pub struct Lifecycle {
    sender: Arc<watch::Sender<ProcessState>>,
    // Keeps the channel open even when nobody is subscribed.
    _receiver: watch::Receiver<ProcessState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(ProcessState::Starting);
        Self {
            sender: Arc::new(sender),
            _receiver: receiver,
        }
    }

    pub fn current(&self) -> ProcessState {
        self.sender.borrow().clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.sender.borrow().is_terminated()
    }

    /// Starting → Running. Fails from any other state.
    pub fn mark_running(&self, pid: Option<u32>) -> Result<(), &'static str> {
        let transitioned = self.sender.send_if_modified(|state| {
            if matches!(state, ProcessState::Starting) {
                *state = ProcessState::Running { pid };
                true
            } else {
                false
            }
        });
        if transitioned {
            Ok(())
        } else {
            Err("Can only transition to Running from Starting")
        }
    }

    /// Moves to `Terminated`. Only the first call wins; returns whether this
    /// call performed the transition.
    pub fn terminate(&self, reason: TerminationReason) -> bool {
        self.sender.send_if_modified(|state| {
            if state.is_terminated() {
                false
            } else {
                *state = ProcessState::Terminated { reason };
                true
            }
        })
    }

    /// Resolves once the lifecycle reaches `Terminated`, with its reason.
    pub async fn terminated(&self) -> TerminationReason {
        let mut receiver = self.sender.subscribe();
        let result = receiver.wait_for(ProcessState::is_terminated).await;
        match result.as_deref() {
            Ok(ProcessState::Terminated { reason }) => reason.clone(),
            _ => TerminationReason::ShutdownRequested,
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
