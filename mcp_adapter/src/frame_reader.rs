//! Reads newline-delimited frames from the subprocess stdout.
//!
//! Frames go into the bounded delivery queue with `try_send`. When the queue
//! is full the frame is dropped: the reader must keep draining stdout so the
//! subprocess never blocks on a full pipe, even if that costs a reply.

use crate::health::HealthState;
use crate::lifecycle::TerminationReason;
use crate::rpc::Frame;
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::mpsc::{self, error::TrySendError},
};
use tracing::{debug, error, trace, warn};

pub struct FrameReader<R> {
    reader: BufReader<R>,
    queue: mpsc::Sender<Frame>,
    health: Arc<HealthState>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, queue: mpsc::Sender<Frame>, health: Arc<HealthState>) -> Self {
        Self {
            reader: BufReader::new(reader),
            queue,
            health,
        }
    }

    /// Reads until end-of-stream or a read error.
    ///
    /// On return the health record is marked stopped and the delivery queue
    /// is closed (the sender is dropped with `self`).
    pub async fn run(mut self) -> TerminationReason {
        let mut line = Vec::new();
        let reason = loop {
            line.clear();
            match self.reader.read_until(b'\n', &mut line).await {
                Ok(0) => {
                    warn!("MCP server stdout closed (EOF)");
                    break TerminationReason::OutputClosed;
                }
                Ok(_) if line.last() != Some(&b'\n') => {
                    debug!(bytes = line.len(), "Discarding unterminated line at EOF");
                    warn!("MCP server stdout closed (EOF)");
                    break TerminationReason::OutputClosed;
                }
                Ok(_) => {
                    if let Some(frame) = Frame::from_line(&line) {
                        self.health.touch();
                        self.publish(frame);
                    }
                }
                Err(e) => {
                    error!("Error reading from MCP server stdout: {}", e);
                    break TerminationReason::OutputFailed(e.to_string());
                }
            }
        };

        self.health.mark_stopped();
        reason
    }

    fn publish(&self, frame: Frame) {
        trace!(frame = %frame.to_text(), "Received line from MCP server");
        match self.queue.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                warn!(
                    frame = %frame.to_text(),
                    "Delivery queue full, discarding MCP server message"
                );
            }
            Err(TrySendError::Closed(frame)) => {
                warn!(
                    frame = %frame.to_text(),
                    "Delivery queue closed, discarding MCP server message"
                );
            }
        }
    }
}
