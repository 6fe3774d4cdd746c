//! Behavioural guarantees that must hold for any plan shape or timing:
//! dependency ordering under bounded concurrency, at most one evidence record
//! per step, every cited record exists, and assessment is reproducible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use noir_core::{
    AnalysisError, AnalysisRequest, AnalysisResponse, AnalysisService, AssessmentFlag,
    CancelToken, EngineConfig, EvidencePayload, Investigation, InvestigationId,
    InvestigationPlan, InvestigationService, InvestigationStatus, MemoryInvestigationStore,
    Orchestrator, OrchestratorConfig, Parameters, PrimitiveAdapter, PrimitiveError,
    PrimitiveOutput, PrimitiveRegistry, RationaleEntry, RiskEngine, ScriptedAdapter, Step,
    StepStatus, Target, WorkerPool,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Recorder primitive: records start/end order and peak parallelism
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<(String, &'static str)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Recorder {
    fn position(&self, step_id: &str, phase: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .position(|(id, p)| id == step_id && *p == phase)
            .unwrap_or_else(|| panic!("no {phase} logged for {step_id}"))
    }
}

#[async_trait]
impl PrimitiveAdapter for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn execute(
        &self,
        parameters: &Parameters,
        _cancel: CancelToken,
    ) -> Result<PrimitiveOutput, PrimitiveError> {
        let id = parameters
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        self.log.lock().unwrap().push((id.clone(), "start"));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(10)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().unwrap().push((id.clone(), "end"));
        Ok(PrimitiveOutput::new(
            EvidencePayload::Generic {
                source: "recorder".to_string(),
                data: json!({ "id": id }),
            },
            0.5,
        ))
    }
}

fn recorded_step(id: &str, deps: &[&str]) -> Step {
    Step::new(id, "recorder")
        .with_param("id", id)
        .depends_on(deps.iter().copied())
}

fn investigation(id: &str) -> Investigation {
    Investigation::new(InvestigationId::from(id), Target::domain("example.com").unwrap())
}

fn registry(adapters: Vec<Arc<dyn PrimitiveAdapter>>) -> PrimitiveRegistry {
    let mut registry = PrimitiveRegistry::new();
    for adapter in adapters {
        registry.register(adapter).unwrap();
    }
    registry
}

// ---------------------------------------------------------------------------
// Ordering and concurrency
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_dependencies_finish_before_dependents_at_any_concurrency() {
    let plan = InvestigationPlan::new(
        "diamond",
        vec![
            recorded_step("a", &[]),
            recorded_step("b", &["a"]),
            recorded_step("c", &["a"]),
            recorded_step("d", &["b", "c"]),
            recorded_step("e", &[]),
            recorded_step("f", &["e"]),
        ],
    );

    for max_concurrency in 1..=4 {
        let recorder = Arc::new(Recorder::default());
        let orch = Orchestrator::new(
            registry(vec![recorder.clone()]),
            WorkerPool::new(8),
            OrchestratorConfig {
                max_concurrency,
                ..OrchestratorConfig::default()
            },
        );
        let mut inv = investigation("inv-order");
        orch.execute(&mut inv, &plan, &CancelToken::never())
            .await
            .unwrap();

        assert!(inv.steps.iter().all(|s| s.status == StepStatus::Succeeded));
        for step in &plan.steps {
            let start = recorder.position(&step.step_id, "start");
            for dep in &step.depends_on {
                assert!(
                    recorder.position(dep, "end") < start,
                    "{} started before {dep} finished (concurrency {max_concurrency})",
                    step.step_id
                );
            }
        }
        assert!(recorder.peak.load(Ordering::SeqCst) <= max_concurrency);
    }
}

#[tokio::test(start_paused = true)]
async fn test_shared_pool_bounds_parallelism_across_investigations() {
    let recorder = Arc::new(Recorder::default());
    let orch = Orchestrator::new(
        registry(vec![recorder.clone()]),
        WorkerPool::new(2),
        OrchestratorConfig::default(),
    );
    let plan = InvestigationPlan::new(
        "wide",
        (0..4).map(|i| recorded_step(&format!("s{i}"), &[])).collect(),
    );

    let mut first = investigation("inv-pool-1");
    let mut second = investigation("inv-pool-2");
    let never = CancelToken::never();
    let (a, b) = tokio::join!(
        orch.execute(&mut first, &plan, &never),
        orch.execute(&mut second, &plan, &never),
    );
    assert_eq!(a.unwrap(), InvestigationStatus::Completed);
    assert_eq!(b.unwrap(), InvestigationStatus::Completed);
    assert!(recorder.peak.load(Ordering::SeqCst) <= 2);
}

// ---------------------------------------------------------------------------
// Evidence uniqueness
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_retried_and_timed_out_steps_append_once() {
    let flaky = ScriptedAdapter::new("reputation")
        .fail(PrimitiveError::transient("rate limited"))
        .fail(PrimitiveError::transient("rate limited"))
        .succeed(
            EvidencePayload::Reputation {
                engines_checked: 10,
                engines_flagged: 0,
                categories: vec![],
            },
            0.8,
        );
    let slow = ScriptedAdapter::new("web_search")
        .succeed(
            EvidencePayload::WebSearch {
                query: "late".to_string(),
                results: vec![],
                total_results: 1,
            },
            0.7,
        )
        .with_delay(Duration::from_secs(3))
        .succeed(
            EvidencePayload::WebSearch {
                query: "on time".to_string(),
                results: vec![],
                total_results: 1,
            },
            0.7,
        );
    let orch = Orchestrator::new(
        registry(vec![Arc::new(flaky), Arc::new(slow)]),
        WorkerPool::new(4),
        OrchestratorConfig {
            step_timeout_ms: 1_000,
            ..OrchestratorConfig::default()
        },
    );
    let plan = InvestigationPlan::new(
        "retry",
        vec![Step::new("rep", "reputation"), Step::new("search", "web_search")],
    );
    let mut inv = investigation("inv-unique");
    orch.execute(&mut inv, &plan, &CancelToken::never())
        .await
        .unwrap();

    // Give the abandoned first web_search call time to have completed.
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(inv.ledger.len(), 2);
    assert_eq!(inv.step("rep").unwrap().attempt_count, 3);
    assert_eq!(inv.step("search").unwrap().attempt_count, 2);
    let search = inv.ledger.for_step("search").unwrap();
    assert_eq!(search.payload.field("query"), Some(json!("on time")));

    let mut per_step: HashMap<&str, usize> = HashMap::new();
    for record in inv.ledger.iter() {
        *per_step.entry(record.source_step_id.as_str()).or_default() += 1;
    }
    assert!(per_step.values().all(|n| *n == 1));
    for step in &inv.steps {
        let record_id = step.record_id.as_deref().unwrap();
        assert_eq!(inv.ledger.get(record_id).unwrap().source_step_id, step.step_id);
    }
}

// ---------------------------------------------------------------------------
// Skip propagation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failed_required_step_skips_every_transitive_dependent() {
    let recorder = Arc::new(Recorder::default());
    let orch = Orchestrator::new(
        registry(vec![
            recorder.clone(),
            Arc::new(ScriptedAdapter::new("whois").fail(PrimitiveError::permanent("gone"))),
        ]),
        WorkerPool::new(4),
        OrchestratorConfig::default(),
    );
    let plan = InvestigationPlan::new(
        "chain",
        vec![
            Step::new("root", "whois"),
            recorded_step("mid", &["root"]),
            recorded_step("leaf", &["mid"]),
            recorded_step("side", &[]),
            recorded_step("join", &["leaf", "side"]),
        ],
    );
    let expected = plan.transitive_dependents("root");

    let mut inv = investigation("inv-skip");
    let status = orch
        .execute(&mut inv, &plan, &CancelToken::never())
        .await
        .unwrap();
    assert_eq!(status, InvestigationStatus::Degraded);

    for step in &inv.steps {
        if expected.contains(&step.step_id) {
            assert_eq!(step.status, StepStatus::Skipped, "{}", step.step_id);
            assert_eq!(step.attempt_count, 0);
        }
    }
    assert_eq!(inv.step("side").unwrap().status, StepStatus::Succeeded);
    let log = recorder.log.lock().unwrap();
    assert!(log.iter().all(|(id, _)| id == "side"));
}

// ---------------------------------------------------------------------------
// Parameter references
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_dependent_step_receives_resolved_reference() {
    let whois = ScriptedAdapter::new("whois").succeed_with(
        PrimitiveOutput::new(
            EvidencePayload::Whois {
                domain: "example.com".to_string(),
                registrar: Some("Example Registrar".to_string()),
                created_at: None,
                expires_at: None,
                privacy_protected: true,
            },
            0.9,
        )
        .with_signal("domain_age_days", 12i64),
    );
    let search = Arc::new(ScriptedAdapter::new("web_search").succeed(
        EvidencePayload::WebSearch {
            query: "Example Registrar".to_string(),
            results: vec![],
            total_results: 4,
        },
        0.7,
    ));
    let orch = Orchestrator::new(
        registry(vec![Arc::new(whois), search.clone()]),
        WorkerPool::new(4),
        OrchestratorConfig::default(),
    );
    let plan = InvestigationPlan::new(
        "refs",
        vec![
            Step::new("who", "whois"),
            Step::new("search", "web_search")
                .depends_on(["who"])
                .with_param("query", "{{steps.who.payload.registrar}}")
                .with_param("age", "{{steps.who.signals.domain_age_days}}"),
        ],
    );
    let mut inv = investigation("inv-refs");
    orch.execute(&mut inv, &plan, &CancelToken::never())
        .await
        .unwrap();

    let seen = search.seen_parameters();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["query"], json!("Example Registrar"));
    assert_eq!(seen[0]["age"], json!(12.0));
}

// ---------------------------------------------------------------------------
// Citations and determinism
// ---------------------------------------------------------------------------

/// Raises the heuristic score by ten and cites the first evidence record.
struct RaiseByTen;

#[async_trait]
impl AnalysisService for RaiseByTen {
    fn name(&self) -> &str {
        "raise-by-ten"
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, AnalysisError> {
        let record_id = request
            .evidence
            .first()
            .map(|r| r.record_id.clone())
            .unwrap_or_default();
        Ok(AnalysisResponse {
            adjusted_score: request.heuristic_score + 10.0,
            rationale: vec![RationaleEntry {
                record_id,
                weight: 10.0,
                explanation: "registrar associated with prior abuse".to_string(),
            }],
        })
    }
}

fn suspicious_registry() -> PrimitiveRegistry {
    registry(vec![
        Arc::new(ScriptedAdapter::new("whois").succeed(
            EvidencePayload::Whois {
                domain: "example.com".to_string(),
                registrar: None,
                created_at: Some(chrono::Utc::now() - chrono::Duration::days(10)),
                expires_at: None,
                privacy_protected: true,
            },
            0.9,
        )),
        Arc::new(ScriptedAdapter::new("reputation").succeed(
            EvidencePayload::Reputation {
                engines_checked: 20,
                engines_flagged: 4,
                categories: vec!["phishing".to_string()],
            },
            0.8,
        )),
        Arc::new(ScriptedAdapter::new("web_search").succeed(
            EvidencePayload::WebSearch {
                query: "example.com".to_string(),
                results: vec![],
                total_results: 0,
            },
            0.6,
        )),
    ])
}

#[tokio::test]
async fn test_every_cited_record_is_in_the_ledger() {
    let service = InvestigationService::builder(suspicious_registry())
        .with_analysis(Arc::new(RaiseByTen))
        .build()
        .unwrap();
    let id = service.start(Target::domain("example.com").unwrap());
    let inv = service.wait(&id).await.unwrap();

    let assessment = inv.assessment.as_ref().unwrap();
    assert!(!assessment.rationale.is_empty());
    for record_id in assessment.cited_records() {
        assert!(inv.ledger.contains(record_id), "dangling citation {record_id}");
    }
    let analysis = assessment.analysis.as_ref().unwrap();
    assert_eq!(analysis.service, "raise-by-ten");
    assert_eq!(assessment.score, (assessment.heuristic_score + 10.0).min(100.0));
}

#[tokio::test]
async fn test_assessment_reproducible_from_stored_record() {
    let store = Arc::new(MemoryInvestigationStore::new());
    let service = InvestigationService::builder(suspicious_registry())
        .with_config(EngineConfig::default())
        .with_analysis(Arc::new(RaiseByTen))
        .with_store(store.clone())
        .build()
        .unwrap();
    let id = service.start(Target::domain("example.com").unwrap());
    let live = service.wait(&id).await.unwrap();
    let original = live.assessment.clone().unwrap();

    service.evict_finished();
    let reloaded = service.get_investigation(&id).await.unwrap();
    assert_eq!(reloaded.ledger, live.ledger);

    let engine = RiskEngine::default();
    let coverage = reloaded.coverage();
    let first = engine.assess(&reloaded.ledger, &coverage).unwrap();
    let second = engine.assess(&reloaded.ledger, &coverage).unwrap();
    assert_eq!(first.score, second.score);
    assert_eq!(first.label, second.label);
    assert_eq!(first.rationale, second.rationale);
    assert_eq!(first.ledger_digest, original.ledger_digest);
    assert_eq!(first.heuristic_score, original.heuristic_score);

    let replayed = engine
        .reassess(&reloaded.ledger, &coverage, original.analysis.as_ref())
        .unwrap();
    assert_eq!(replayed.score, original.score);
    assert_eq!(replayed.label, original.label);
    assert_eq!(replayed.analysis, original.analysis);
    assert!(!replayed.has_flag(AssessmentFlag::AnalysisUnavailable));
}
