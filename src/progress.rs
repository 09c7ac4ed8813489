//! Run progress tracking
//!
//! One run may be in flight at a time. The orchestrator is the only writer;
//! progress polls take consistent snapshots through the same lock. Cancellation
//! is cooperative: `/api/stop` fires the run's token and the orchestrator
//! checks it at stage boundaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Error | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

/// One timestamped entry in the run's append-only log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: LogSeverity,
}

/// Consistent read snapshot handed to progress pollers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: RunStatus,
    pub percentage: u8,
    pub logs: Vec<LogEntry>,
    pub cancel_requested: bool,
}

#[derive(Debug)]
struct RunState {
    status: RunStatus,
    percentage: u8,
    logs: Vec<LogEntry>,
    cancel_requested: bool,
    run_id: Option<Uuid>,
    token: Option<CancellationToken>,
}

impl RunState {
    fn new() -> Self {
        Self {
            status: RunStatus::NotStarted,
            percentage: 0,
            logs: Vec::new(),
            cancel_requested: false,
            run_id: None,
            token: None,
        }
    }
}

/// Returned when a second run is requested while one is still `Running`
#[derive(Debug, thiserror::Error)]
#[error("a comparison run is already in progress")]
pub struct RunAlreadyActive;

/// Shared, lock-guarded run state: single writer (orchestrator), many readers
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<RwLock<RunState>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RunState::new())),
        }
    }

    /// Start a new run: rejects if one is already `Running`, otherwise resets
    /// state to `Running`/0%, clears the log, and installs a fresh
    /// cancellation token for this run.
    pub async fn begin_run(&self) -> Result<(Uuid, CancellationToken), RunAlreadyActive> {
        let mut state = self.inner.write().await;
        if state.status == RunStatus::Running {
            return Err(RunAlreadyActive);
        }
        let run_id = Uuid::new_v4();
        let token = CancellationToken::new();
        *state = RunState {
            status: RunStatus::Running,
            percentage: 0,
            logs: Vec::new(),
            cancel_requested: false,
            run_id: Some(run_id),
            token: Some(token.clone()),
        };
        Ok((run_id, token))
    }

    /// Raise the completion percentage. Clamped to 0..=100 and monotonic
    /// non-decreasing while the run is `Running`; ignored otherwise.
    pub async fn set_percentage(&self, percentage: u8) {
        let mut state = self.inner.write().await;
        if state.status == RunStatus::Running {
            state.percentage = state.percentage.max(percentage.min(100));
        }
    }

    pub async fn log(&self, severity: LogSeverity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            LogSeverity::Info => tracing::info!("{}", message),
            LogSeverity::Warning => tracing::warn!("{}", message),
            LogSeverity::Error => tracing::error!("{}", message),
        }
        let mut state = self.inner.write().await;
        state.logs.push(LogEntry {
            timestamp: Utc::now(),
            message,
            severity,
        });
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogSeverity::Info, message).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.log(LogSeverity::Warning, message).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.log(LogSeverity::Error, message).await;
    }

    /// Move the run to a terminal status. The status stays sticky until the
    /// next `begin_run` resets it.
    pub async fn finish(&self, status: RunStatus) {
        debug_assert!(status.is_terminal());
        let mut state = self.inner.write().await;
        state.status = status;
        if status == RunStatus::Completed {
            state.percentage = 100;
        }
        state.token = None;
    }

    /// Cooperative cancel. Idempotent; returns whether a run was active.
    pub async fn request_cancel(&self) -> bool {
        let mut state = self.inner.write().await;
        if state.status != RunStatus::Running {
            return false;
        }
        state.cancel_requested = true;
        if let Some(token) = &state.token {
            token.cancel();
        }
        true
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        let state = self.inner.read().await;
        ProgressSnapshot {
            status: state.status,
            percentage: state.percentage,
            logs: state.logs.clone(),
            cancel_requested: state.cancel_requested,
        }
    }

    pub async fn current_run_id(&self) -> Option<Uuid> {
        self.inner.read().await.run_id
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
