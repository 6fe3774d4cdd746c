//! Per-step run records, owned and mutated only by the orchestrator.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::plan::Step;

/// Lifecycle state of one step within one investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a step-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    TransientSource,
    PermanentSource,
    Timeout,
    Cancelled,
}

impl StepErrorKind {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientSource | Self::Timeout)
    }
}

/// Error descriptor recorded on a [`StepExecution`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            StepErrorKind::Timeout,
            format!("attempt exceeded {timeout_ms}ms timeout"),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(StepErrorKind::Cancelled, "investigation cancelled")
    }
}

/// Mutable run-record for one step.
///
/// Transition methods return the previous status so callers can publish
/// `old -> new` trace events without re-reading the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub primitive_name: String,
    pub required: bool,
    pub status: StepStatus,
    pub attempt_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Evidence record produced by the successful attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

impl StepExecution {
    pub fn pending(step: &Step) -> Self {
        Self {
            step_id: step.step_id.clone(),
            primitive_name: step.primitive_name.clone(),
            required: step.required,
            status: StepStatus::Pending,
            attempt_count: 0,
            started_at: None,
            ended_at: None,
            last_error: None,
            skip_reason: None,
            record_id: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, to: StepStatus) -> StepStatus {
        std::mem::replace(&mut self.status, to)
    }

    pub fn mark_ready(&mut self) -> StepStatus {
        self.transition(StepStatus::Ready)
    }

    /// Begin a new attempt. `started_at` keeps the first attempt's start.
    pub fn mark_running(&mut self) -> StepStatus {
        self.attempt_count += 1;
        self.started_at.get_or_insert_with(Utc::now);
        self.transition(StepStatus::Running)
    }

    /// Failed attempt that will be retried after a backoff.
    pub fn mark_retrying(&mut self, error: StepError) -> StepStatus {
        self.last_error = Some(error);
        self.transition(StepStatus::Ready)
    }

    pub fn mark_succeeded(&mut self, record_id: impl Into<String>) -> StepStatus {
        self.record_id = Some(record_id.into());
        self.ended_at = Some(Utc::now());
        self.transition(StepStatus::Succeeded)
    }

    pub fn mark_failed(&mut self, error: StepError) -> StepStatus {
        self.last_error = Some(error);
        self.ended_at = Some(Utc::now());
        self.transition(StepStatus::Failed)
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) -> StepStatus {
        self.skip_reason = Some(reason.into());
        self.ended_at = Some(Utc::now());
        self.transition(StepStatus::Skipped)
    }

    /// Human-readable explanation of a non-successful terminal state.
    pub fn reason(&self) -> Option<String> {
        match self.status {
            StepStatus::Failed => Some(match &self.last_error {
                Some(err) => format!(
                    "failed after {} attempt(s): {}",
                    self.attempt_count, err.message
                ),
                None => format!("failed after {} attempt(s)", self.attempt_count),
            }),
            StepStatus::Skipped => Some(
                self.skip_reason
                    .clone()
                    .unwrap_or_else(|| "skipped".to_string()),
            ),
            _ => None,
        }
    }
}
