//! Process-wide investigation counters.
//!
//! Counters are bumped at the call site without logging anything; call
//! [`Metrics::flush`] to report them as one `tracing::info!` event. The
//! service flushes after every investigation finishes.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::domain::execution::StepStatus;
use crate::domain::investigation::InvestigationStatus;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Counter {
    InvestigationsStarted,
    InvestigationsCompleted,
    InvestigationsDegraded,
    InvestigationsFailed,
    FallbackPlans,
    StepsRetried,
    StepsFailed,
    StepsSkipped,
    EvidenceAppended,
    TraceEventsDropped,
}

const COUNTERS: usize = 10;

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub investigations_started: u64,
    pub investigations_completed: u64,
    pub investigations_degraded: u64,
    pub investigations_failed: u64,
    pub fallback_plans: u64,
    pub steps_retried: u64,
    pub steps_failed: u64,
    pub steps_skipped: u64,
    pub evidence_appended: u64,
    pub trace_events_dropped: u64,
}

pub struct Metrics {
    counters: [AtomicU64; COUNTERS],
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            counters: [ZERO; COUNTERS],
        }
    }

    fn bump(&self, counter: Counter) {
        self.counters[counter as usize].fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    pub fn inc_investigations_started(&self) {
        self.bump(Counter::InvestigationsStarted);
    }

    pub fn inc_fallback_plans(&self) {
        self.bump(Counter::FallbackPlans);
    }

    pub fn inc_steps_retried(&self) {
        self.bump(Counter::StepsRetried);
    }

    pub fn inc_evidence_appended(&self) {
        self.bump(Counter::EvidenceAppended);
    }

    pub fn inc_trace_events_dropped(&self) {
        self.bump(Counter::TraceEventsDropped);
    }

    /// Count a step reaching `status`; only failures and skips are tracked,
    /// successes show up as appended evidence.
    pub fn record_step(&self, status: StepStatus) {
        match status {
            StepStatus::Failed => self.bump(Counter::StepsFailed),
            StepStatus::Skipped => self.bump(Counter::StepsSkipped),
            _ => {}
        }
    }

    pub fn record_outcome(&self, status: InvestigationStatus) {
        match status {
            InvestigationStatus::Completed => self.bump(Counter::InvestigationsCompleted),
            InvestigationStatus::Degraded => self.bump(Counter::InvestigationsDegraded),
            InvestigationStatus::Failed => self.bump(Counter::InvestigationsFailed),
            _ => {}
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            investigations_started: self.get(Counter::InvestigationsStarted),
            investigations_completed: self.get(Counter::InvestigationsCompleted),
            investigations_degraded: self.get(Counter::InvestigationsDegraded),
            investigations_failed: self.get(Counter::InvestigationsFailed),
            fallback_plans: self.get(Counter::FallbackPlans),
            steps_retried: self.get(Counter::StepsRetried),
            steps_failed: self.get(Counter::StepsFailed),
            steps_skipped: self.get(Counter::StepsSkipped),
            evidence_appended: self.get(Counter::EvidenceAppended),
            trace_events_dropped: self.get(Counter::TraceEventsDropped),
        }
    }

    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            investigations_started = s.investigations_started,
            investigations_completed = s.investigations_completed,
            investigations_degraded = s.investigations_degraded,
            investigations_failed = s.investigations_failed,
            fallback_plans = s.fallback_plans,
            steps_retried = s.steps_retried,
            steps_failed = s.steps_failed,
            steps_skipped = s.steps_skipped,
            evidence_appended = s.evidence_appended,
            trace_events_dropped = s.trace_events_dropped,
        );
    }

    /// Zero every counter. Tests only; the global instance is shared.
    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
