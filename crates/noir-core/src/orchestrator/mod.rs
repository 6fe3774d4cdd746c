//! Plan execution.
//!
//! [`Orchestrator::execute`] drives one investigation's plan until no step
//! can make further progress. The scheduling loop is the only writer of the
//! investigation's step executions and evidence ledger: attempt tasks run the
//! adapter and report back over a channel, they never touch shared state.
//!
//! Readiness rules:
//! - a step is ready once every dependency is terminal;
//! - a skipped dependency, or a failed `required` one, skips the step;
//! - a failed optional dependency is satisfied-with-gap, and references to
//!   its evidence resolve to `null`.

pub mod params;
pub mod pool;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::config::OrchestratorConfig;
use crate::domain::error::PlanningError;
use crate::domain::evidence::EvidenceDraft;
use crate::domain::execution::{StepError, StepErrorKind, StepExecution, StepStatus};
use crate::domain::investigation::{Investigation, InvestigationStatus, StatusReport};
use crate::domain::plan::{InvestigationPlan, Parameters};
use crate::metrics::METRICS;
use crate::obs;
use crate::primitive::{CancelToken, PrimitiveAdapter, PrimitiveOutput, PrimitiveRegistry};
use crate::trace::TracePublisher;

pub use params::resolve_parameters;
pub use pool::WorkerPool;

/// Terminal status implied by the current step executions and ledger.
///
/// `failed` only when no evidence was collected at all; `degraded` when a
/// required step is missing or the run was cancelled.
pub fn final_status(inv: &Investigation) -> InvestigationStatus {
    if inv.ledger.is_empty() {
        InvestigationStatus::Failed
    } else if inv.coverage().is_degraded() {
        InvestigationStatus::Degraded
    } else {
        InvestigationStatus::Completed
    }
}

/// Runs validated plans against the registered primitives.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: PrimitiveRegistry,
    pool: WorkerPool,
    config: OrchestratorConfig,
    publisher: TracePublisher,
}

impl Orchestrator {
    pub fn new(registry: PrimitiveRegistry, pool: WorkerPool, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            pool,
            config,
            publisher: TracePublisher::default(),
        }
    }

    pub fn with_publisher(mut self, publisher: TracePublisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn registry(&self) -> &PrimitiveRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn publisher(&self) -> &TracePublisher {
        &self.publisher
    }

    /// Validate `plan` and run every step that is not already recorded on
    /// `inv`, returning the terminal status the run implies.
    ///
    /// The investigation is left in `running`; the caller finalizes it once
    /// the assessment exists. Steps already present on `inv` (from an earlier
    /// round) keep their executions and evidence.
    pub async fn execute(
        &self,
        inv: &mut Investigation,
        plan: &InvestigationPlan,
        cancel: &CancelToken,
    ) -> Result<InvestigationStatus, PlanningError> {
        self.execute_reporting(inv, plan, cancel, None).await
    }

    /// [`Orchestrator::execute`], additionally publishing a fresh
    /// [`StatusReport`] to `status` whenever the run makes progress.
    #[instrument(skip_all, fields(investigation_id = %inv.id, strategy = %plan.strategy))]
    pub async fn execute_reporting(
        &self,
        inv: &mut Investigation,
        plan: &InvestigationPlan,
        cancel: &CancelToken,
        status: Option<&watch::Sender<StatusReport>>,
    ) -> Result<InvestigationStatus, PlanningError> {
        plan.validate(&self.registry.available())?;

        let mut slots = Vec::with_capacity(plan.len());
        for step in &plan.steps {
            let index = match inv.steps.iter().position(|s| s.step_id == step.step_id) {
                Some(index) => index,
                None => {
                    inv.steps.push(StepExecution::pending(step));
                    inv.steps.len() - 1
                }
            };
            slots.push(index);
        }
        inv.plan = Some(plan.clone());
        self.publisher.record_status(
            inv,
            InvestigationStatus::Running,
            Some(format!("{} step(s) planned by {}", plan.len(), plan.strategy)),
        );

        let run = Run {
            orch: self,
            plan,
            not_before: vec![None; slots.len()],
            in_flight: vec![false; slots.len()],
            running: 0,
            cancelled: false,
            status,
            slots,
            inv: &mut *inv,
        };
        run.drive(cancel).await;
        Ok(final_status(inv))
    }
}

/// Messages from attempt tasks to the scheduling loop.
#[derive(Debug)]
enum Report {
    /// Holds a worker permit and is invoking the adapter.
    Started { slot: usize },
    Finished {
        slot: usize,
        outcome: Result<PrimitiveOutput, StepError>,
    },
    /// Gave up before acquiring a permit.
    Abandoned { slot: usize },
}

enum Readiness {
    Waiting,
    Ready,
    Blocked(String),
}

/// Scheduling state for one `execute` call. Indexed by plan position
/// (`slot`); `slots[slot]` is the matching index into `inv.steps`.
struct Run<'a> {
    orch: &'a Orchestrator,
    inv: &'a mut Investigation,
    plan: &'a InvestigationPlan,
    slots: Vec<usize>,
    not_before: Vec<Option<Instant>>,
    in_flight: Vec<bool>,
    running: usize,
    cancelled: bool,
    status: Option<&'a watch::Sender<StatusReport>>,
}

impl Run<'_> {
    async fn drive(mut self, cancel: &CancelToken) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        loop {
            if !self.cancelled && cancel.is_cancelled() {
                self.on_cancel();
            }
            self.promote();
            if !self.cancelled {
                self.dispatch(&tx, cancel);
            }
            self.report_status();
            if self.running == 0 && self.all_terminal() {
                break;
            }

            let wake = self.next_wake();
            tokio::select! {
                Some(report) = rx.recv() => self.apply(report),
                _ = cancel.cancelled(), if !self.cancelled => {}
                _ = sleep_until(wake), if wake.is_some() => {}
            }
        }
    }

    fn report_status(&self) {
        if let Some(tx) = self.status {
            tx.send_replace(self.inv.status_report());
        }
    }

    fn exec(&self, slot: usize) -> &StepExecution {
        &self.inv.steps[self.slots[slot]]
    }

    fn exec_mut(&mut self, slot: usize) -> &mut StepExecution {
        &mut self.inv.steps[self.slots[slot]]
    }

    fn all_terminal(&self) -> bool {
        (0..self.slots.len()).all(|slot| self.exec(slot).is_terminal())
    }

    fn record(&mut self, slot: usize, old: StepStatus, detail: Option<String>) {
        let exec = self.exec(slot);
        let (step_id, new, attempt) = (exec.step_id.clone(), exec.status, exec.attempt_count);
        METRICS.record_step(new);
        self.orch
            .publisher
            .record_step(self.inv, &step_id, old, new, attempt, detail);
    }

    fn readiness(&self, slot: usize) -> Readiness {
        if self.cancelled {
            return Readiness::Blocked("investigation cancelled".to_string());
        }
        let mut waiting = false;
        for dep in &self.plan.steps[slot].depends_on {
            let Some(exec) = self.inv.step(dep) else {
                return Readiness::Blocked(format!("dependency {dep} is not part of the run"));
            };
            match exec.status {
                StepStatus::Succeeded => {}
                StepStatus::Failed if !exec.required => {}
                StepStatus::Failed => {
                    return Readiness::Blocked(format!("required dependency {dep} failed"))
                }
                StepStatus::Skipped => {
                    return Readiness::Blocked(format!("dependency {dep} was skipped"))
                }
                _ => waiting = true,
            }
        }
        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }

    /// Move pending steps to ready or skipped until nothing changes, so skips
    /// cascade through the whole dependent subgraph in one call.
    fn promote(&mut self) {
        loop {
            let mut changed = false;
            for slot in 0..self.slots.len() {
                if self.exec(slot).status != StepStatus::Pending {
                    continue;
                }
                match self.readiness(slot) {
                    Readiness::Waiting => {}
                    Readiness::Ready => {
                        let old = self.exec_mut(slot).mark_ready();
                        self.record(slot, old, None);
                        changed = true;
                    }
                    Readiness::Blocked(reason) => {
                        let old = self.exec_mut(slot).mark_skipped(reason.clone());
                        self.record(slot, old, Some(reason));
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn has_capacity(&self) -> bool {
        self.running < self.orch.config.max_concurrency.max(1)
    }

    /// Spawn attempts for ready steps in plan order while capacity remains.
    fn dispatch(&mut self, tx: &mpsc::UnboundedSender<Report>, cancel: &CancelToken) {
        let now = Instant::now();
        let plan = self.plan;
        for slot in 0..self.slots.len() {
            if !self.has_capacity() {
                break;
            }
            if self.exec(slot).status != StepStatus::Ready || self.in_flight[slot] {
                continue;
            }
            if self.not_before[slot].is_some_and(|t| t > now) {
                continue;
            }

            let step = &plan.steps[slot];
            let Some(adapter) = self.orch.registry.get(&step.primitive_name) else {
                let error = StepError::new(
                    StepErrorKind::PermanentSource,
                    format!("no adapter registered for {}", step.primitive_name),
                );
                let detail = error.message.clone();
                let old = self.exec_mut(slot).mark_failed(error);
                self.record(slot, old, Some(detail));
                continue;
            };
            let parameters = resolve_parameters(&step.parameters, &self.inv.ledger);
            let timeout = self.orch.config.step_timeout(step.timeout_ms);
            debug!(
                step_id = %step.step_id,
                primitive = %step.primitive_name,
                attempt = self.exec(slot).attempt_count + 1,
                "dispatching step"
            );

            self.in_flight[slot] = true;
            self.not_before[slot] = None;
            self.running += 1;
            tokio::spawn(run_attempt(
                slot,
                adapter,
                parameters,
                timeout,
                self.orch.pool.clone(),
                cancel.clone(),
                tx.clone(),
            ));
        }
    }

    /// Earliest backoff expiry worth waking for.
    fn next_wake(&self) -> Option<Instant> {
        if self.cancelled || !self.has_capacity() {
            return None;
        }
        (0..self.slots.len())
            .filter(|&slot| self.exec(slot).status == StepStatus::Ready && !self.in_flight[slot])
            .filter_map(|slot| self.not_before[slot])
            .min()
    }

    fn apply(&mut self, report: Report) {
        match report {
            Report::Started { slot } => {
                let old = self.exec_mut(slot).mark_running();
                let attempt = self.exec(slot).attempt_count;
                self.record(slot, old, Some(format!("attempt {attempt}")));
            }
            Report::Abandoned { slot } => {
                self.settle(slot);
                if self.exec(slot).status == StepStatus::Ready {
                    let reason = if self.cancelled {
                        "investigation cancelled before the step started"
                    } else {
                        "worker pool closed"
                    };
                    let old = self.exec_mut(slot).mark_skipped(reason);
                    self.record(slot, old, Some(reason.to_string()));
                }
            }
            Report::Finished { slot, outcome } => {
                self.settle(slot);
                match outcome {
                    Ok(output) => self.on_success(slot, output),
                    Err(error) => self.on_failure(slot, error),
                }
            }
        }
    }

    fn settle(&mut self, slot: usize) {
        self.in_flight[slot] = false;
        self.running = self.running.saturating_sub(1);
    }

    fn on_success(&mut self, slot: usize, output: PrimitiveOutput) {
        let exec = self.exec(slot);
        let draft = EvidenceDraft {
            source_step_id: exec.step_id.clone(),
            primitive_name: exec.primitive_name.clone(),
            payload: output.payload,
            confidence: output.confidence,
            signals: output.signals,
            attempt: exec.attempt_count,
        };
        let record_id = match self.inv.ledger.append(draft) {
            Ok(record) => record.record_id.clone(),
            Err(e) => {
                let error = StepError::new(
                    StepErrorKind::PermanentSource,
                    format!("evidence rejected: {e}"),
                );
                self.fail(slot, error);
                return;
            }
        };
        METRICS.inc_evidence_appended();
        obs::emit_evidence_appended(self.inv.id.as_str(), &record_id, &self.exec(slot).step_id);
        let old = self.exec_mut(slot).mark_succeeded(record_id.clone());
        self.record(slot, old, Some(record_id));
    }

    fn on_failure(&mut self, slot: usize, error: StepError) {
        let orch = self.orch;
        let config = &orch.config;
        let attempts = self.exec(slot).attempt_count;
        if !self.cancelled && error.kind.is_retryable() && attempts <= config.max_retries {
            let delay = config.backoff(attempts);
            let detail = format!(
                "retry {attempts} of {} in {}ms: {}",
                config.max_retries,
                delay.as_millis(),
                error.message
            );
            self.not_before[slot] = Some(Instant::now() + delay);
            METRICS.inc_steps_retried();
            let old = self.exec_mut(slot).mark_retrying(error);
            self.record(slot, old, Some(detail));
        } else {
            self.fail(slot, error);
        }
    }

    fn fail(&mut self, slot: usize, error: StepError) {
        let exec = self.exec(slot);
        warn!(
            investigation_id = %self.inv.id,
            step_id = %exec.step_id,
            attempts = exec.attempt_count,
            required = exec.required,
            error = %error,
            "step failed"
        );
        let detail = error.message.clone();
        let old = self.exec_mut(slot).mark_failed(error);
        self.record(slot, old, Some(detail));
    }

    /// Skip everything that has not started; running attempts observe the
    /// token themselves and report back as cancelled.
    fn on_cancel(&mut self) {
        self.cancelled = true;
        self.inv.cancelled = true;
        for slot in 0..self.slots.len() {
            let status = self.exec(slot).status;
            let waiting = status == StepStatus::Pending
                || (status == StepStatus::Ready && !self.in_flight[slot]);
            if waiting {
                let old = self.exec_mut(slot).mark_skipped("investigation cancelled");
                self.record(slot, old, Some("investigation cancelled".to_string()));
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// One attempt: wait for a worker permit, then invoke the adapter under the
/// attempt timeout. The adapter runs in its own task so a panic or an
/// overrun surfaces here as a step failure.
async fn run_attempt(
    slot: usize,
    adapter: Arc<dyn PrimitiveAdapter>,
    parameters: Parameters,
    timeout: Duration,
    pool: WorkerPool,
    cancel: CancelToken,
    tx: mpsc::UnboundedSender<Report>,
) {
    let permit = tokio::select! {
        permit = pool.acquire() => permit,
        _ = cancel.cancelled() => None,
    };
    let Some(_permit) = permit else {
        let _ = tx.send(Report::Abandoned { slot });
        return;
    };
    if cancel.is_cancelled() {
        let _ = tx.send(Report::Abandoned { slot });
        return;
    }
    let _ = tx.send(Report::Started { slot });

    let token = cancel.clone();
    let mut call = tokio::spawn(async move { adapter.execute(&parameters, token).await });
    let outcome = tokio::select! {
        biased;
        joined = &mut call => match joined {
            Ok(result) => result.map_err(StepError::from),
            Err(e) => Err(StepError::new(
                StepErrorKind::PermanentSource,
                format!("adapter task ended abnormally: {e}"),
            )),
        },
        _ = cancel.cancelled() => Err(StepError::cancelled()),
        _ = tokio::time::sleep(timeout) => Err(StepError::timeout(timeout.as_millis() as u64)),
    };
    call.abort();
    let outcome = match outcome {
        Err(_) if cancel.is_cancelled() => Err(StepError::cancelled()),
        other => other,
    };
    let _ = tx.send(Report::Finished { slot, outcome });
}
