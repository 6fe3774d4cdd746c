//! Investigation API: start, inspect, cancel and report.
//!
//! Each started investigation runs on its own task through
//! plan resolution → orchestration → (optional adaptive round) → risk
//! assessment → finalization → persistence. Investigations share nothing but
//! the worker pool and the trace publisher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use noir_state::{InvestigationStore, StorageError};
use tokio::sync::watch;
use tracing::{warn, Instrument};

use crate::config::EngineConfig;
use crate::domain::assessment::RiskAssessment;
use crate::domain::error::{NoirError, Result};
use crate::domain::investigation::{
    Investigation, InvestigationId, InvestigationStatus, PlanningRecord, StatusReport,
};
use crate::domain::target::{Target, TargetKind};
use crate::metrics::METRICS;
use crate::obs;
use crate::orchestrator::{final_status, Orchestrator, WorkerPool};
use crate::planner::{PlanResolver, Planner, StaticPlanner};
use crate::primitive::{CancelSignal, CancelToken, PrimitiveRegistry};
use crate::projection::DashboardProjection;
use crate::risk::{AnalysisService, RiskEngine, RiskPolicy};
use crate::trace::{TracePublisher, TraceSubscription};

/// Builder for [`InvestigationService`].
pub struct InvestigationServiceBuilder {
    registry: PrimitiveRegistry,
    config: EngineConfig,
    planner: Option<Arc<dyn Planner>>,
    analysis: Option<Arc<dyn AnalysisService>>,
    store: Option<Arc<dyn InvestigationStore>>,
    policy: RiskPolicy,
    pool: Option<WorkerPool>,
}

impl InvestigationServiceBuilder {
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Primary planning strategy. Defaults to [`StaticPlanner`].
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_analysis(mut self, service: Arc<dyn AnalysisService>) -> Self {
        self.analysis = Some(service);
        self
    }

    /// Terminal investigations are written here and looked up once evicted.
    pub fn with_store(mut self, store: Arc<dyn InvestigationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_policy(mut self, policy: RiskPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Share an existing worker pool instead of sizing a new one from config.
    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn build(self) -> Result<InvestigationService> {
        self.config.validate()?;
        let config = self.config;
        let publisher = TracePublisher::new(config.trace.listener_buffer);
        let pool = self
            .pool
            .unwrap_or_else(|| WorkerPool::new(config.worker_pool_size));
        let orchestrator = Orchestrator::new(self.registry, pool, config.orchestrator.clone())
            .with_publisher(publisher.clone());
        let planner: Arc<dyn Planner> = match self.planner {
            Some(planner) => planner,
            None => Arc::new(StaticPlanner::new(config.planner.clone())),
        };
        let resolver = PlanResolver::new(
            planner,
            Duration::from_millis(config.planner.planning_timeout_ms),
        );
        let mut risk = RiskEngine::new(self.policy, config.risk.clone());
        if let Some(service) = self.analysis {
            risk = risk.with_analysis(service);
        }
        Ok(InvestigationService {
            inner: Arc::new(Inner {
                config,
                orchestrator,
                resolver,
                risk,
                publisher,
                store: self.store,
                entries: Mutex::new(HashMap::new()),
            }),
        })
    }
}

/// Live handle on one investigation.
struct Entry {
    status: watch::Receiver<StatusReport>,
    finished: watch::Receiver<Option<Arc<Investigation>>>,
    cancel: CancelSignal,
}

impl Entry {
    fn finished(&self) -> Option<Arc<Investigation>> {
        self.finished.borrow().clone()
    }
}

struct Inner {
    config: EngineConfig,
    orchestrator: Orchestrator,
    resolver: PlanResolver,
    risk: RiskEngine,
    publisher: TracePublisher,
    store: Option<Arc<dyn InvestigationStore>>,
    entries: Mutex<HashMap<InvestigationId, Entry>>,
}

/// Entry point for running investigations.
#[derive(Clone)]
pub struct InvestigationService {
    inner: Arc<Inner>,
}

impl InvestigationService {
    pub fn builder(registry: PrimitiveRegistry) -> InvestigationServiceBuilder {
        InvestigationServiceBuilder {
            registry,
            config: EngineConfig::default(),
            planner: None,
            analysis: None,
            store: None,
            policy: RiskPolicy::standard(),
            pool: None,
        }
    }

    /// Service with default configuration and the static planner.
    pub fn new(registry: PrimitiveRegistry) -> Result<Self> {
        Self::builder(registry).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn publisher(&self) -> &TracePublisher {
        &self.inner.publisher
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<InvestigationId, Entry>> {
        self.inner.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Begin investigating `target`; returns immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, target: Target) -> InvestigationId {
        let id = InvestigationId::generate();
        self.launch(id.clone(), target);
        id
    }

    /// [`InvestigationService::start`] with a trace subscription opened
    /// before the first event, so the listener sees the full history.
    pub fn start_subscribed(&self, target: Target) -> (InvestigationId, TraceSubscription) {
        let id = InvestigationId::generate();
        let subscription = self.subscribe(Some(&id));
        self.launch(id.clone(), target);
        (id, subscription)
    }

    fn launch(&self, id: InvestigationId, target: Target) {
        let mut inv = Investigation::new(id.clone(), target);
        self.inner.publisher.record_created(&mut inv);

        let (status_tx, status_rx) = watch::channel(inv.status_report());
        let (finished_tx, finished_rx) = watch::channel(None);
        let cancel = CancelSignal::new();
        let token = cancel.token();
        self.entries().insert(
            id.clone(),
            Entry {
                status: status_rx,
                finished: finished_rx,
                cancel,
            },
        );

        METRICS.inc_investigations_started();
        obs::emit_investigation_started(id.as_str(), &inv.target.to_string());

        let inner = Arc::clone(&self.inner);
        let span = obs::investigation_span(id.as_str());
        tokio::spawn(
            async move {
                let inv = inner.run(inv, token, &status_tx).await;
                inner.persist(&inv).await;
                let report = inv.status_report();
                let id = inv.id.clone();
                finished_tx.send_replace(Some(Arc::new(inv)));
                status_tx.send_replace(report);
                inner.publisher.close_investigation(&id);
            }
            .instrument(span),
        );
    }

    /// Parse `kind` and `value` into a [`Target`] and start.
    pub fn start_raw(&self, kind: &str, value: &str) -> Result<InvestigationId> {
        let target = Target::new(kind.parse::<TargetKind>()?, value)?;
        Ok(self.start(target))
    }

    /// Current status and per-step statuses.
    pub async fn get_status(&self, id: &InvestigationId) -> Result<StatusReport> {
        let live = {
            let entries = self.entries();
            entries.get(id).map(|e| match e.finished() {
                Some(inv) => inv.status_report(),
                None => e.status.borrow().clone(),
            })
        };
        match live {
            Some(report) => Ok(report),
            None => Ok(self.load(id).await?.status_report()),
        }
    }

    /// Final assessment; only available once the investigation is terminal.
    pub async fn get_report(&self, id: &InvestigationId) -> Result<RiskAssessment> {
        let inv = self.get_investigation(id).await?;
        inv.assessment
            .clone()
            .ok_or_else(|| NoirError::NoAssessment(id.to_string()))
    }

    /// Full terminal record: plan, executions, ledger, trace and assessment.
    pub async fn get_investigation(&self, id: &InvestigationId) -> Result<Arc<Investigation>> {
        let live = {
            let entries = self.entries();
            entries.get(id).map(|e| (e.finished(), e.status.borrow().status))
        };
        match live {
            Some((Some(inv), _)) => Ok(inv),
            Some((None, status)) => Err(NoirError::NotTerminal {
                investigation_id: id.to_string(),
                status: status.to_string(),
            }),
            None => Ok(Arc::new(self.load(id).await?)),
        }
    }

    /// Request cooperative cancellation of a running investigation.
    pub fn cancel(&self, id: &InvestigationId) -> Result<()> {
        let entries = self.entries();
        let entry = entries
            .get(id)
            .ok_or_else(|| NoirError::InvestigationNotFound(id.to_string()))?;
        if entry.finished().is_some() {
            return Err(NoirError::AlreadyFinished(id.to_string()));
        }
        entry.cancel.cancel();
        Ok(())
    }

    /// Wait until the investigation is terminal.
    pub async fn wait(&self, id: &InvestigationId) -> Result<Arc<Investigation>> {
        let finished = {
            let entries = self.entries();
            entries.get(id).map(|e| e.finished.clone())
        };
        let Some(mut finished) = finished else {
            return Ok(Arc::new(self.load(id).await?));
        };
        let done = finished
            .wait_for(Option::is_some)
            .await
            .map_err(|_| NoirError::InvestigationNotFound(id.to_string()))?;
        done.clone()
            .ok_or_else(|| NoirError::InvestigationNotFound(id.to_string()))
    }

    /// Trace events for one investigation, or for all when `id` is `None`.
    pub fn subscribe(&self, id: Option<&InvestigationId>) -> TraceSubscription {
        self.inner.publisher.subscribe(id.cloned())
    }

    /// Drop finished investigations from memory. They stay reachable through
    /// the store, if one is configured. Returns how many were evicted.
    pub fn evict_finished(&self) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| e.finished().is_none());
        before - entries.len()
    }

    /// Projection over every terminal investigation known to this service.
    pub async fn dashboard(&self) -> Result<DashboardProjection> {
        let mut records: Vec<Arc<Investigation>> = {
            let entries = self.entries();
            entries.values().filter_map(Entry::finished).collect()
        };
        if let Some(store) = &self.inner.store {
            for stored in store.list(None).await? {
                if records.iter().any(|r| r.id.as_str() == stored.investigation_id) {
                    continue;
                }
                records.push(Arc::new(Investigation::from_stored(&stored)?));
            }
        }
        Ok(DashboardProjection::build(records.iter().map(Arc::as_ref)))
    }

    async fn load(&self, id: &InvestigationId) -> Result<Investigation> {
        let Some(store) = &self.inner.store else {
            return Err(NoirError::InvestigationNotFound(id.to_string()));
        };
        match store.get(id.as_str()).await {
            Ok(record) => Investigation::from_stored(&record),
            Err(StorageError::NotFound { .. }) => {
                Err(NoirError::InvestigationNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for InvestigationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvestigationService")
            .field("planner", &self.inner.resolver.primary_name())
            .field("live", &self.entries().len())
            .field("store", &self.inner.store.is_some())
            .finish()
    }
}

impl Inner {
    async fn run(
        &self,
        mut inv: Investigation,
        cancel: CancelToken,
        status: &watch::Sender<StatusReport>,
    ) -> Investigation {
        let started = Instant::now();
        let available = self.orchestrator.registry().available();

        let resolved = tokio::select! {
            resolved = self.resolver.resolve(inv.id.as_str(), &inv.target, &available) => resolved,
            _ = cancel.cancelled() => {
                inv.cancelled = true;
                return self.abort(inv, "cancelled during planning".to_string(), started);
            }
        };
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(e) => return self.abort(inv, format!("planning failed: {e}"), started),
        };
        if resolved.used_fallback {
            METRICS.inc_fallback_plans();
        }
        inv.planning = Some(PlanningRecord {
            strategy: resolved.plan.strategy.clone(),
            used_fallback: resolved.used_fallback,
            rejected_primary: resolved.primary_error.map(|e| e.to_string()),
            adapted_steps: Vec::new(),
        });

        let mut plan = resolved.plan;
        if let Err(e) = self
            .orchestrator
            .execute_reporting(&mut inv, &plan, &cancel, Some(status))
            .await
        {
            obs::emit_plan_rejected(inv.id.as_str(), &plan.strategy, &e);
            return self.abort(inv, format!("plan rejected: {e}"), started);
        }

        if self.config.planner.adaptive && !cancel.is_cancelled() {
            let extra = StaticPlanner::adapt_plan(&inv.target, &plan, &inv.ledger, &available);
            if !extra.is_empty() {
                let ids: Vec<String> = extra.iter().map(|s| s.step_id.clone()).collect();
                plan.steps.extend(extra);
                match self
                    .orchestrator
                    .execute_reporting(&mut inv, &plan, &cancel, Some(status))
                    .await
                {
                    Ok(_) => {
                        if let Some(planning) = inv.planning.as_mut() {
                            planning.adapted_steps = ids;
                        }
                    }
                    Err(e) => {
                        warn!(investigation_id = %inv.id, error = %e, "adaptive round rejected")
                    }
                }
            }
        }

        let outcome = final_status(&inv);
        let detail = if inv.ledger.is_empty() {
            inv.failure_reason = Some("no evidence could be collected".to_string());
            inv.failure_reason.clone()
        } else {
            match self
                .risk
                .assess_with_analysis(&inv.ledger, &inv.coverage())
                .await
            {
                Ok(assessment) => {
                    let detail = format!(
                        "score {} ({})",
                        assessment.score,
                        assessment.label.as_str()
                    );
                    inv.assessment = Some(assessment);
                    Some(detail)
                }
                Err(e) => {
                    warn!(investigation_id = %inv.id, error = %e, "risk assessment failed");
                    Some(format!("assessment unavailable: {e}"))
                }
            }
        };
        self.finish(inv, outcome, detail, started)
    }

    /// Terminal `failed` before any evidence was collected.
    fn abort(&self, mut inv: Investigation, reason: String, started: Instant) -> Investigation {
        inv.failure_reason = Some(reason.clone());
        self.finish(inv, InvestigationStatus::Failed, Some(reason), started)
    }

    fn finish(
        &self,
        mut inv: Investigation,
        outcome: InvestigationStatus,
        detail: Option<String>,
        started: Instant,
    ) -> Investigation {
        inv.finished_at = Some(Utc::now());
        self.publisher.record_status(&mut inv, outcome, detail);
        METRICS.record_outcome(inv.status);
        obs::emit_investigation_finished(
            inv.id.as_str(),
            inv.status.as_str(),
            started.elapsed().as_millis() as u64,
            inv.ledger.len(),
        );
        METRICS.flush();
        inv
    }

    async fn persist(&self, inv: &Investigation) {
        let Some(store) = &self.store else {
            return;
        };
        let result = match inv.to_stored() {
            Ok(record) => store.put(record).await.map_err(NoirError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            obs::emit_persist_error(inv.id.as_str(), &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::evidence::EvidencePayload;
    use crate::primitive::PrimitiveError;
    use crate::simulated::ScriptedAdapter;
    use noir_state::MemoryInvestigationStore;

    fn registry(adapters: Vec<ScriptedAdapter>) -> PrimitiveRegistry {
        let mut registry = PrimitiveRegistry::new();
        for adapter in adapters {
            registry.register(Arc::new(adapter)).unwrap();
        }
        registry
    }

    fn generic(source: &str) -> EvidencePayload {
        EvidencePayload::Generic {
            source: source.to_string(),
            data: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let service = InvestigationService::new(PrimitiveRegistry::new()).unwrap();
        let id = InvestigationId::from("inv-missing");
        assert!(matches!(
            service.get_status(&id).await,
            Err(NoirError::InvestigationNotFound(_))
        ));
        assert!(matches!(
            service.cancel(&id),
            Err(NoirError::InvestigationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_no_primitives_fails_at_planning() {
        let service = InvestigationService::new(PrimitiveRegistry::new()).unwrap();
        let id = service.start(Target::domain("example.com").unwrap());
        let inv = service.wait(&id).await.unwrap();
        assert_eq!(inv.status, InvestigationStatus::Failed);
        assert!(inv.steps.is_empty());
        assert!(inv
            .failure_reason
            .as_deref()
            .is_some_and(|r| r.starts_with("planning failed")));
        assert!(matches!(
            service.get_report(&id).await,
            Err(NoirError::NoAssessment(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_not_available_while_running() {
        let service = InvestigationService::new(registry(vec![ScriptedAdapter::new("web_search")
            .succeed(generic("web_search"), 0.9)
            .with_delay(Duration::from_secs(5))]))
        .unwrap();
        let id = service.start(Target::company("Acme Corp").unwrap());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(
            service.get_report(&id).await,
            Err(NoirError::NotTerminal { .. })
        ));
        service.wait(&id).await.unwrap();
        let report = service.get_report(&id).await.unwrap();
        assert!(!report.degraded);
        assert!(matches!(
            service.cancel(&id),
            Err(NoirError::AlreadyFinished(_))
        ));
    }

    #[tokio::test]
    async fn test_terminal_record_persisted_and_reloadable() {
        let store = Arc::new(MemoryInvestigationStore::new());
        let service = InvestigationService::builder(registry(vec![
            ScriptedAdapter::new("web_search").fail(PrimitiveError::permanent("blocked")),
        ]))
        .with_store(store.clone())
        .build()
        .unwrap();

        let id = service.start(Target::company("Acme Corp").unwrap());
        service.wait(&id).await.unwrap();
        assert!(store.contains(id.as_str()).await.unwrap());

        assert_eq!(service.evict_finished(), 1);
        let status = service.get_status(&id).await.unwrap();
        assert_eq!(status.status, InvestigationStatus::Failed);
        assert_eq!(service.dashboard().await.unwrap().investigations, 1);
    }
}
