//! Investigation service API: lifecycle, cancellation, concurrent runs,
//! adaptive planning, analysis fallbacks and persistence.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use noir_core::{
    AnalysisError, AnalysisRequest, AnalysisResponse, AnalysisService, AssessmentFlag,
    EngineConfig, EvidencePayload, FsInvestigationStore, InvestigationPlan,
    InvestigationService, InvestigationStatus, NoirError, Planner, PlanningError,
    PrimitiveRegistry, ScriptedAdapter, StepStatus, Target,
};
use noir_core::domain::NewsArticle;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn registry(adapters: Vec<ScriptedAdapter>) -> PrimitiveRegistry {
    let mut registry = PrimitiveRegistry::new();
    for adapter in adapters {
        registry.register(Arc::new(adapter)).unwrap();
    }
    registry
}

fn whois(age_days: i64) -> ScriptedAdapter {
    ScriptedAdapter::new("whois").succeed(
        EvidencePayload::Whois {
            domain: "example.com".to_string(),
            registrar: None,
            created_at: Some(Utc::now() - chrono::Duration::days(age_days)),
            expires_at: None,
            privacy_protected: false,
        },
        0.9,
    )
}

fn web_search(total: u64) -> ScriptedAdapter {
    ScriptedAdapter::new("web_search").succeed(
        EvidencePayload::WebSearch {
            query: "example.com".to_string(),
            results: vec![],
            total_results: total,
        },
        0.7,
    )
}

fn reputation(checked: u32, flagged: u32) -> ScriptedAdapter {
    ScriptedAdapter::new("reputation").succeed(
        EvidencePayload::Reputation {
            engines_checked: checked,
            engines_flagged: flagged,
            categories: vec![],
        },
        0.8,
    )
}

fn news(negative: usize) -> ScriptedAdapter {
    ScriptedAdapter::new("news_search").succeed(
        EvidencePayload::NewsSearch {
            query: "example.com scam".to_string(),
            articles: (0..negative)
                .map(|i| NewsArticle {
                    title: format!("Complaint {i}"),
                    url: format!("https://news.example.org/{i}"),
                    published_at: None,
                    negative: true,
                })
                .collect(),
        },
        0.6,
    )
}

fn clean_domain() -> PrimitiveRegistry {
    registry(vec![whois(2_000), web_search(40), reputation(70, 0)])
}

fn domain() -> Target {
    Target::domain("example.com").unwrap()
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_status_visible_while_running_then_terminal() {
    let service = InvestigationService::new(registry(vec![
        whois(2_000),
        web_search(40).with_delay(Duration::from_secs(10)),
        reputation(70, 0),
    ]))
    .unwrap();
    let id = service.start(domain());

    tokio::time::sleep(Duration::from_secs(1)).await;
    let status = service.get_status(&id).await.unwrap();
    assert_eq!(status.status, InvestigationStatus::Running);
    assert!(!status.assessment_ready);
    let running: Vec<_> = status
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Running)
        .map(|s| s.primitive_name.as_str())
        .collect();
    assert_eq!(running, vec!["web_search"]);
    assert_eq!(status.evidence_count, 2);

    let inv = service.wait(&id).await.unwrap();
    assert_eq!(inv.status, InvestigationStatus::Completed);
    let status = service.get_status(&id).await.unwrap();
    assert_eq!(status.status, InvestigationStatus::Completed);
    assert!(status.assessment_ready);
    assert!(inv.finished_at.is_some());

    let report = service.get_report(&id).await.unwrap();
    assert_eq!(Some(&report), inv.assessment.as_ref());
}

#[tokio::test]
async fn test_start_raw_rejects_bad_targets() {
    let service = InvestigationService::new(clean_domain()).unwrap();
    assert!(matches!(
        service.start_raw("phone_number", "555-0100"),
        Err(NoirError::Target(_))
    ));
    assert!(matches!(
        service.start_raw("domain", "   "),
        Err(NoirError::Target(_))
    ));
    let id = service.start_raw("url", "https://example.com/login").unwrap();
    let inv = service.wait(&id).await.unwrap();
    assert!(inv.status.is_terminal());
}

#[tokio::test]
async fn test_company_target_searches_without_host_primitives() {
    let service = InvestigationService::new(registry(vec![
        whois(2_000),
        web_search(40),
        reputation(70, 0),
        news(0),
    ]))
    .unwrap();
    let id = service.start(Target::company("Acme Corp").unwrap());
    let inv = service.wait(&id).await.unwrap();

    let primitives: BTreeSet<&str> = inv
        .steps
        .iter()
        .map(|s| s.primitive_name.as_str())
        .collect();
    assert_eq!(primitives, BTreeSet::from(["news_search", "web_search"]));
    assert_eq!(inv.status, InvestigationStatus::Completed);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_run_assesses_partial_evidence() {
    let service = InvestigationService::new(registry(vec![
        whois(2_000),
        web_search(40).with_delay(Duration::from_secs(60)),
        reputation(70, 0),
    ]))
    .unwrap();
    let id = service.start(domain());
    tokio::time::sleep(Duration::from_secs(1)).await;
    service.cancel(&id).unwrap();

    let inv = service.wait(&id).await.unwrap();
    assert!(inv.cancelled);
    assert_eq!(inv.status, InvestigationStatus::Degraded);
    assert_eq!(inv.ledger.len(), 2);
    let assessment = inv.assessment.as_ref().unwrap();
    assert!(assessment.degraded);
    assert!(assessment.has_flag(AssessmentFlag::Cancelled));
    assert!(assessment.explanation.contains("cancelled"));

    assert!(matches!(
        service.cancel(&id),
        Err(NoirError::AlreadyFinished(_))
    ));
}

/// Planner that never answers within the test.
struct StalledPlanner;

#[async_trait]
impl Planner for StalledPlanner {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn generate_plan(
        &self,
        _target: &Target,
        _available: &BTreeSet<String>,
    ) -> Result<InvestigationPlan, PlanningError> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Err(PlanningError::Service("unreachable".to_string()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_planning_fails_without_steps() {
    let service = InvestigationService::builder(clean_domain())
        .with_planner(Arc::new(StalledPlanner))
        .build()
        .unwrap();
    let id = service.start(domain());
    tokio::time::sleep(Duration::from_millis(100)).await;
    service.cancel(&id).unwrap();

    let inv = service.wait(&id).await.unwrap();
    assert_eq!(inv.status, InvestigationStatus::Failed);
    assert!(inv.cancelled);
    assert!(inv.steps.is_empty());
    assert_eq!(
        inv.failure_reason.as_deref(),
        Some("cancelled during planning")
    );
    assert!(inv.assessment.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_planner_times_out_into_fallback() {
    let mut config = EngineConfig::default();
    config.planner.planning_timeout_ms = 500;
    let service = InvestigationService::builder(clean_domain())
        .with_config(config)
        .with_planner(Arc::new(StalledPlanner))
        .build()
        .unwrap();
    let id = service.start(domain());
    let inv = service.wait(&id).await.unwrap();

    let planning = inv.planning.as_ref().unwrap();
    assert!(planning.used_fallback);
    assert!(planning
        .rejected_primary
        .as_deref()
        .unwrap()
        .contains("timed out"));
    assert_eq!(inv.status, InvestigationStatus::Completed);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_concurrent_investigations_are_isolated() {
    let service = InvestigationService::new(clean_domain()).unwrap();
    let ids: Vec<_> = (0..5)
        .map(|i| service.start(Target::domain(format!("site{i}.example.com")).unwrap()))
        .collect();
    assert_eq!(ids.iter().collect::<BTreeSet<_>>().len(), 5);

    for id in &ids {
        let inv = service.wait(id).await.unwrap();
        assert_eq!(&inv.id, id);
        assert_eq!(inv.status, InvestigationStatus::Completed);
        assert_eq!(inv.ledger.len(), 3);
        assert!(inv.trace.iter().all(|e| &e.investigation_id == id));
    }

    let dashboard = service.dashboard().await.unwrap();
    assert_eq!(dashboard.investigations, 5);
    assert_eq!(dashboard.by_status["completed"], 5);
    assert!(dashboard.failing_primitives.is_empty());
}

// ---------------------------------------------------------------------------
// Adaptive round
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_adaptive_round_adds_news_search_after_flags() {
    let mut config = EngineConfig::default();
    config.planner.adaptive = true;
    let service = InvestigationService::builder(registry(vec![
        whois(2_000),
        web_search(40),
        reputation(20, 6),
        news(4),
    ]))
    .with_config(config)
    .build()
    .unwrap();

    let id = service.start(domain());
    let inv = service.wait(&id).await.unwrap();

    let planning = inv.planning.as_ref().unwrap();
    assert_eq!(planning.adapted_steps.len(), 1);
    let adapted = inv.step(&planning.adapted_steps[0]).unwrap();
    assert_eq!(adapted.primitive_name, "news_search");
    assert_eq!(adapted.status, StepStatus::Succeeded);
    assert!(!adapted.required);
    assert_eq!(inv.ledger.len(), 4);
    assert_eq!(inv.plan.as_ref().unwrap().len(), 4);
    assert_eq!(inv.status, InvestigationStatus::Completed);

    let assessment = inv.assessment.as_ref().unwrap();
    let news_record = inv.ledger.for_step(&adapted.step_id).unwrap();
    assert!(assessment
        .rationale
        .iter()
        .any(|r| r.record_id == news_record.record_id));
}

#[tokio::test]
async fn test_adaptive_round_quiet_on_clean_evidence() {
    let mut config = EngineConfig::default();
    config.planner.adaptive = true;
    let service = InvestigationService::builder(registry(vec![
        whois(2_000),
        web_search(40),
        reputation(70, 0),
        news(0),
    ]))
    .with_config(config)
    .build()
    .unwrap();

    let id = service.start(domain());
    let inv = service.wait(&id).await.unwrap();
    assert!(inv.planning.as_ref().unwrap().adapted_steps.is_empty());
    assert_eq!(inv.steps.len(), 3);
}

// ---------------------------------------------------------------------------
// Analysis service fallbacks
// ---------------------------------------------------------------------------

struct DownAnalysis;

#[async_trait]
impl AnalysisService for DownAnalysis {
    fn name(&self) -> &str {
        "down"
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResponse, AnalysisError> {
        Err(AnalysisError::Unavailable("connection refused".to_string()))
    }
}

struct HangingAnalysis;

#[async_trait]
impl AnalysisService for HangingAnalysis {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResponse, AnalysisError> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Err(AnalysisError::Unavailable("unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_unavailable_analysis_keeps_heuristic_score() {
    let service = InvestigationService::builder(clean_domain())
        .with_analysis(Arc::new(DownAnalysis))
        .build()
        .unwrap();
    let id = service.start(domain());
    let report = {
        service.wait(&id).await.unwrap();
        service.get_report(&id).await.unwrap()
    };
    assert_eq!(report.score, report.heuristic_score);
    assert!(report.analysis.is_none());
    assert!(report.has_flag(AssessmentFlag::AnalysisUnavailable));
    assert!(report.has_flag(AssessmentFlag::ReducedConfidence));
    assert!(!report.degraded);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_analysis_times_out() {
    let service = InvestigationService::builder(clean_domain())
        .with_analysis(Arc::new(HangingAnalysis))
        .build()
        .unwrap();
    let id = service.start(domain());
    let inv = service.wait(&id).await.unwrap();
    let report = inv.assessment.as_ref().unwrap();
    assert!(report.has_flag(AssessmentFlag::AnalysisUnavailable));
    assert_eq!(inv.status, InvestigationStatus::Completed);
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_filesystem_store_survives_service_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let store = Arc::new(FsInvestigationStore::new(dir.path()).unwrap());
        let service = InvestigationService::builder(clean_domain())
            .with_store(store)
            .build()
            .unwrap();
        let id = service.start(domain());
        service.wait(&id).await.unwrap();
        id
    };

    let store = Arc::new(FsInvestigationStore::new(dir.path()).unwrap());
    let restarted = InvestigationService::builder(clean_domain())
        .with_store(store)
        .build()
        .unwrap();
    let inv = restarted.get_investigation(&id).await.unwrap();
    assert_eq!(inv.status, InvestigationStatus::Completed);
    assert_eq!(inv.ledger.len(), 3);
    assert!(restarted.get_report(&id).await.is_ok());
    assert!(matches!(
        restarted.cancel(&id),
        Err(NoirError::InvestigationNotFound(_))
    ));

    let dashboard = restarted.dashboard().await.unwrap();
    assert_eq!(dashboard.investigations, 1);
    assert_eq!(dashboard.by_label.values().sum::<usize>(), 1);
}
