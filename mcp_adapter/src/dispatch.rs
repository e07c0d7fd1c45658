//! Routing of subprocess frames to the HTTP callers waiting for them.
//!
//! Every caller that expects a reply registers a waiter *before* writing its
//! request. The dispatcher drains the delivery queue and hands each frame to
//! the oldest live waiter registered under the frame's id. Waiters for
//! unparseable requests share one FIFO. It receives replies that carry no
//! usable id, and replies with an id nobody registered. Frames nobody is
//! waiting for are logged and dropped.
//!
//! Several waiters may share a key (two SSE sessions both send `sse_init`);
//! they are served in registration order. A waiter whose caller gave up has a
//! closed receiver and is skipped.
//!
//! When the delivery queue closes the table is closed too: outstanding waiters
//! observe the closure and new registrations fail immediately.

use crate::error::{BridgeError, Result};
use crate::rpc::{Correlation, Frame, FrameRoute, RequestKey};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

type Waiters = VecDeque<oneshot::Sender<Frame>>;

#[derive(Default)]
struct PendingTable {
    closed: bool,
    by_id: HashMap<RequestKey, Waiters>,
    uncorrelated: Waiters,
}

impl PendingTable {
    fn prune(&mut self) {
        self.by_id.retain(|_, waiters| {
            waiters.retain(|w| !w.is_closed());
            !waiters.is_empty()
        });
        self.uncorrelated.retain(|w| !w.is_closed());
    }

    fn waiting(&self) -> usize {
        self.by_id.values().map(VecDeque::len).sum::<usize>() + self.uncorrelated.len()
    }
}

/// Outcome of routing one frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Unmatched(Frame),
}

/// Table of callers waiting for a reply.
#[derive(Default)]
pub struct PendingReplies {
    table: Mutex<PendingTable>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers interest in the reply matching `correlation`.
    ///
    /// Fails with [`BridgeError::SubprocessGone`] once the table is closed.
    pub fn register(&self, correlation: &Correlation) -> Result<ReplyWaiter> {
        let (tx, rx) = oneshot::channel();
        let mut table = self.lock();
        if table.closed {
            return Err(BridgeError::SubprocessGone);
        }
        table.prune();
        match correlation {
            Correlation::Id(key) => table.by_id.entry(key.clone()).or_default().push_back(tx),
            Correlation::Uncorrelated => table.uncorrelated.push_back(tx),
        }
        Ok(ReplyWaiter { rx })
    }

    /// Hands `frame` to the waiter it answers.
    pub fn resolve(&self, frame: Frame) -> Delivery {
        let route = frame.route();
        let mut guard = self.lock();
        let table = &mut *guard;
        let outcome = match route {
            FrameRoute::Reply(key) => {
                let keyed = match table.by_id.get_mut(&key) {
                    Some(waiters) => {
                        let outcome = deliver(waiters, frame);
                        if waiters.is_empty() {
                            table.by_id.remove(&key);
                        }
                        outcome
                    }
                    None => Err(frame),
                };
                // An unparseable request may still be answered with an id.
                keyed.or_else(|frame| deliver(&mut table.uncorrelated, frame))
            }
            FrameRoute::Anonymous => deliver(&mut table.uncorrelated, frame),
            FrameRoute::Unsolicited => Err(frame),
        };
        match outcome {
            Ok(()) => Delivery::Delivered,
            Err(frame) => Delivery::Unmatched(frame),
        }
    }

    /// Closes the table, waking every outstanding waiter with a closure.
    pub fn close(&self) {
        let mut table = self.lock();
        if table.closed {
            return;
        }
        let waiting = table.waiting();
        table.closed = true;
        table.by_id.clear();
        table.uncorrelated.clear();
        if waiting > 0 {
            warn!(waiting, "MCP server gone with callers still waiting for replies");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of live waiters.
    pub fn waiting(&self) -> usize {
        let mut table = self.lock();
        table.prune();
        table.waiting()
    }
}

fn deliver(waiters: &mut Waiters, mut frame: Frame) -> std::result::Result<(), Frame> {
    while let Some(waiter) = waiters.pop_front() {
        match waiter.send(frame) {
            Ok(()) => return Ok(()),
            // Caller timed out or disconnected; try the next one.
            Err(returned) => frame = returned,
        }
    }
    Err(frame)
}

/// One caller's pending reply. Dropping it withdraws the registration.
pub struct ReplyWaiter {
    rx: oneshot::Receiver<Frame>,
}

impl ReplyWaiter {
    /// Waits up to `timeout` for the reply.
    pub async fn recv(self, timeout: Duration) -> Result<Frame> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(BridgeError::SubprocessGone),
            Err(_) => Err(BridgeError::Timeout(timeout)),
        }
    }
}

/// Drains the delivery queue until the frame reader closes it, then closes
/// `pending`.
pub async fn run_dispatcher(mut queue: mpsc::Receiver<Frame>, pending: Arc<PendingReplies>) {
    while let Some(frame) = queue.recv().await {
        match pending.resolve(frame) {
            Delivery::Delivered => debug!("Delivered MCP server reply"),
            Delivery::Unmatched(frame) => match frame.route() {
                FrameRoute::Unsolicited => info!(
                    frame = %frame.to_text(),
                    "Dropping message initiated by MCP server (no push channel)"
                ),
                _ => warn!(
                    frame = %frame.to_text(),
                    "No caller waiting for MCP server message, discarding"
                ),
            },
        }
    }
    pending.close();
    debug!("Dispatcher stopped");
}
