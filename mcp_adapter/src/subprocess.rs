//! Ownership of the MCP server child process.
//!
//! `SubprocessChannel` is the only thing allowed to touch the child: it spawns
//! it, owns its stdin through a single writer task, and reaps it on shutdown.
//! Stdout is handed to the frame reader; stderr is re-emitted line by line
//! through `tracing`.
//!
//! Every write goes through one mpsc queue, so payloads from concurrent
//! callers reach the pipe whole and in submission order. Each caller gets its
//! own write result back over a oneshot. Dropping the queue sender ends the
//! writer task, which closes the child's stdin.

use crate::error::{BridgeError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, ChildStdout, Command},
    sync::{Mutex, mpsc, oneshot},
};
use tracing::{debug, error, info, warn};

/// Pending writes queued ahead of the writer task.
const WRITE_QUEUE_CAPACITY: usize = 64;

/// What to run.
#[derive(Debug, Clone)]
pub struct SubprocessSpec {
    pub command: String,
    pub args: Vec<String>,
    /// Complete child environment; nothing else is inherited.
    pub env: BTreeMap<String, String>,
}

struct WriteRequest {
    line: Bytes,
    ack: oneshot::Sender<std::io::Result<()>>,
}

/// Handle to the child's stdin plus the child itself.
pub struct SubprocessChannel {
    /// `None` once stdin has been closed.
    writes: StdMutex<Option<mpsc::Sender<WriteRequest>>>,
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
}

/// A freshly spawned subprocess with its output streams detached.
pub struct SpawnedSubprocess {
    pub channel: SubprocessChannel,
    pub stdout: ChildStdout,
    pub stderr: Option<ChildStderr>,
}

impl SubprocessChannel {
    /// Spawns the child with piped stdio and starts the writer task.
    ///
    /// A missing or unspawnable executable is reported as
    /// [`BridgeError::Spawn`]; callers treat it as fatal.
    pub fn spawn(spec: &SubprocessSpec) -> Result<SpawnedSubprocess> {
        info!(
            command = %spec.command,
            args = ?spec.args,
            env_vars = spec.env.len(),
            "Spawning MCP server"
        );

        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                command: spec.command.clone(),
                source,
            })?;

        let missing = |stream: &str| BridgeError::Spawn {
            command: spec.command.clone(),
            source: std::io::Error::other(format!("child {stream} was not captured")),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take();
        let pid = child.id();

        info!(pid = ?pid, "MCP server started");

        let mut channel = Self::from_writer(stdin);
        channel.child = Mutex::new(Some(child));
        channel.pid = pid;

        Ok(SpawnedSubprocess {
            channel,
            stdout,
            stderr,
        })
    }

    /// A channel writing to an arbitrary stream, with no child attached.
    pub fn from_writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writes, queue) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        tokio::spawn(run_writer(writer, queue));
        Self {
            writes: StdMutex::new(Some(writes)),
            child: Mutex::new(None),
            pid: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Writes `payload` followed by a single newline to the child's stdin.
    pub async fn write(&self, payload: &[u8]) -> Result<()> {
        let mut line = BytesMut::with_capacity(payload.len() + 1);
        line.put_slice(payload);
        line.put_u8(b'\n');

        let (ack, done) = oneshot::channel();
        let request = WriteRequest {
            line: line.freeze(),
            ack,
        };
        let closed = || BridgeError::Write(std::io::ErrorKind::BrokenPipe.into());
        let writes = self.writer_queue().ok_or_else(closed)?;
        writes.send(request).await.map_err(|_| closed())?;
        done.await.map_err(|_| closed())?.map_err(BridgeError::Write)
    }

    fn writer_queue(&self) -> Option<mpsc::Sender<WriteRequest>> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Closes the child's stdin once queued writes are flushed. Later writes
    /// fail.
    pub fn close_stdin(&self) {
        let sender = self
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            debug!("Closing MCP server stdin");
        }
    }

    /// Closes stdin, waits up to `grace` for the child to exit on its own,
    /// then kills it, and reaps it. Returns `None` when there is no child or
    /// it was already reaped.
    pub async fn reap(&self, grace: Duration) -> Option<ExitStatus> {
        self.close_stdin();
        let mut child = self.child.lock().await.take()?;

        let status = match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!("Failed to wait for MCP server: {}", e);
                None
            }
            Err(_) => {
                info!(pid = ?self.pid, "MCP server still running, killing it");
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill MCP server: {}", e);
                }
                child.wait().await.ok()
            }
        };

        match &status {
            Some(status) if status.success() => info!(%status, "MCP server exited"),
            Some(status) => warn!(%status, "MCP server exited with error"),
            None => {}
        }
        status
    }
}

async fn run_writer<W>(mut writer: W, mut queue: mpsc::Receiver<WriteRequest>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(WriteRequest { line, ack }) = queue.recv().await {
        let result = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;

        match &result {
            Ok(()) => debug!(bytes = line.len(), "Wrote frame to MCP server stdin"),
            Err(e) => error!("Failed to write to MCP server stdin: {}", e),
        }
        // The caller may have given up already; nothing to do then.
        let _ = ack.send(result);
    }
    if let Err(e) = writer.shutdown().await {
        debug!("Failed to shut down MCP server stdin: {}", e);
    }
    debug!("Stdin writer stopped");
}

/// Re-emits the child's stderr through `tracing` until it closes.
pub async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => info!(target: "mcp_adapter::subprocess", "{}", line),
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read MCP server stderr: {}", e);
                break;
            }
        }
    }
    debug!("MCP server stderr closed");
}
