//! Liveness and activity tracking for the wrapped MCP server.
//!
//! `GET /health` reports healthy only while the subprocess is running *and*
//! something happened recently: a frame arrived on its stdout or an HTTP
//! interaction went through. An idle but alive subprocess therefore turns
//! unhealthy after the inactivity limit, which is what the orchestrator
//! liveness probe keys on.

use crate::bridge::Bridge;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Source of monotonic time, injectable for tests.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Result of a health evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    NotRunning,
    Inactive { idle: Duration },
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

#[derive(Debug)]
struct HealthRecord {
    running: bool,
    last_activity: Instant,
}

/// Shared liveness record.
///
/// `running` goes from true to false once and never back; `last_activity`
/// never moves backwards.
pub struct HealthState {
    record: RwLock<HealthRecord>,
    clock: Arc<dyn Clock>,
    inactivity_limit: Duration,
}

impl HealthState {
    /// A running record whose last activity is "now".
    pub fn new(clock: Arc<dyn Clock>, inactivity_limit: Duration) -> Self {
        let now = clock.now();
        Self {
            record: RwLock::new(HealthRecord {
                running: true,
                last_activity: now,
            }),
            clock,
            inactivity_limit,
        }
    }

    /// Records activity at the current time.
    pub fn touch(&self) {
        let now = self.clock.now();
        let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
        if now > record.last_activity {
            record.last_activity = now;
        }
    }

    /// Marks the subprocess as gone. Returns false if it already was.
    pub fn mark_stopped(&self) -> bool {
        let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut record.running, false)
    }

    pub fn is_running(&self) -> bool {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .running
    }

    pub fn last_activity(&self) -> Instant {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_activity
    }

    pub fn status(&self) -> HealthStatus {
        let record = self.record.read().unwrap_or_else(PoisonError::into_inner);
        if !record.running {
            return HealthStatus::NotRunning;
        }
        let idle = self.clock.now().saturating_duration_since(record.last_activity);
        if idle >= self.inactivity_limit {
            HealthStatus::Inactive { idle }
        } else {
            HealthStatus::Healthy
        }
    }
}

/// `GET /health`
pub async fn health_check(State(bridge): State<Arc<Bridge>>) -> Response {
    match bridge.health().status() {
        HealthStatus::Healthy => (StatusCode::OK, "OK").into_response(),
        HealthStatus::NotRunning => {
            (StatusCode::SERVICE_UNAVAILABLE, "MCP server not running").into_response()
        }
        HealthStatus::Inactive { idle } => {
            tracing::debug!(idle_secs = idle.as_secs(), "Health check failed: MCP server inactive");
            (StatusCode::SERVICE_UNAVAILABLE, "MCP server inactive").into_response()
        }
    }
}
