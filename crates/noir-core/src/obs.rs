//! Structured observability hooks for investigation lifecycle events.
//!
//! - `InvestigationSpan`: RAII guard entering an investigation-scoped span
//! - `emit_*`: one function per lifecycle event, all at `info!` unless noted
//!
//! Filter with `RUST_LOG` (e.g. `RUST_LOG=noir_core=debug`).

use tracing::{info, warn};

/// RAII guard that enters an investigation-scoped tracing span.
///
/// ```ignore
/// let _span = InvestigationSpan::enter("inv-1234");
/// // every event below carries investigation_id = "inv-1234"
/// ```
pub struct InvestigationSpan {
    _span: tracing::span::EnteredSpan,
}

impl InvestigationSpan {
    pub fn enter(investigation_id: &str) -> Self {
        let span = tracing::info_span!("noir.investigation", investigation_id = %investigation_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Span for use with `Instrument` across await points.
pub fn investigation_span(investigation_id: &str) -> tracing::Span {
    tracing::info_span!("noir.investigation", investigation_id = %investigation_id)
}

pub fn emit_investigation_started(investigation_id: &str, target: &str) {
    info!(event = "investigation.started", investigation_id = %investigation_id, target = %target);
}

/// Warning: a plan was refused and will not run.
pub fn emit_plan_rejected(investigation_id: &str, strategy: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "plan.rejected",
        investigation_id = %investigation_id,
        strategy = %strategy,
        error = %error,
    );
}

pub fn emit_plan_resolved(investigation_id: &str, strategy: &str, steps: usize, used_fallback: bool) {
    info!(
        event = "plan.resolved",
        investigation_id = %investigation_id,
        strategy = %strategy,
        steps = steps,
        used_fallback = used_fallback,
    );
}

pub fn emit_step_transition(
    investigation_id: &str,
    step_id: &str,
    from: &str,
    to: &str,
    attempt: u32,
) {
    info!(
        event = "step.transition",
        investigation_id = %investigation_id,
        step_id = %step_id,
        from = %from,
        to = %to,
        attempt = attempt,
    );
}

pub fn emit_evidence_appended(investigation_id: &str, record_id: &str, step_id: &str) {
    info!(
        event = "evidence.appended",
        investigation_id = %investigation_id,
        record_id = %record_id,
        step_id = %step_id,
    );
}

/// `outcome` is one of `accepted`, `rejected`, `unavailable`, `replayed`.
pub fn emit_analysis_invoked(investigation_id: &str, service: &str, outcome: &str) {
    info!(
        event = "analysis.invoked",
        investigation_id = %investigation_id,
        service = %service,
        outcome = %outcome,
    );
}

pub fn emit_assessment_produced(investigation_id: &str, score: f64, label: &str, degraded: bool) {
    info!(
        event = "assessment.produced",
        investigation_id = %investigation_id,
        score = score,
        label = %label,
        degraded = degraded,
    );
}

pub fn emit_investigation_finished(
    investigation_id: &str,
    status: &str,
    duration_ms: u64,
    evidence_count: usize,
) {
    info!(
        event = "investigation.finished",
        investigation_id = %investigation_id,
        status = %status,
        duration_ms = duration_ms,
        evidence_count = evidence_count,
    );
}

/// Warning: a trace listener fell behind and lost events.
pub fn emit_trace_listener_lagged(listener_id: u64, missed: u64) {
    warn!(event = "trace.listener_lagged", listener_id = listener_id, missed = missed);
}

/// Warning: persisting a terminal investigation failed.
pub fn emit_persist_error(investigation_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "investigation.persist_error", investigation_id = %investigation_id, error = %error);
}
