//! Noir Core Library
//!
//! Investigation orchestration engine: plans evidence collection for a
//! domain, company or URL, runs it concurrently with retries and timeouts,
//! and turns the collected evidence into an explainable risk assessment.

pub mod config;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod planner;
pub mod primitive;
pub mod projection;
pub mod risk;
pub mod service;
pub mod simulated;
pub mod telemetry;
pub mod trace;

pub use config::{
    ConfigError, EngineConfig, OrchestratorConfig, PlannerConfig, RiskConfig, TraceConfig,
};

pub use domain::{
    AnalysisProvenance, AssessmentFlag, CostTier, EvidenceCoverage, EvidenceDraft, EvidenceLedger,
    EvidencePayload, EvidenceRecord, Investigation, InvestigationId, InvestigationPlan,
    InvestigationStatus, LedgerError, NoirError, Parameters, PlanningError, PlanningRecord,
    RationaleEntry, Result, RiskAssessment, RiskLabel, SignalValue, Signals, StatusReport, Step,
    StepError, StepErrorKind, StepExecution, StepStatus, StepStatusView, Target, TargetError,
    TargetKind,
};

pub use orchestrator::{final_status, resolve_parameters, Orchestrator, WorkerPool};

pub use planner::{
    HttpPlanningService, PlanResolver, Planner, PlanningRequest, PlanningService, ResolvedPlan,
    ServicePlanner, StaticPlanner,
};

pub use primitive::{
    CancelSignal, CancelToken, PrimitiveAdapter, PrimitiveError, PrimitiveOutput,
    PrimitiveRegistry,
};

pub use projection::{DashboardProjection, PrimitiveFailures};

pub use risk::{
    AggregationError, AnalysisError, AnalysisRequest, AnalysisResponse, AnalysisService,
    HttpAnalysisService, LabelThresholds, RiskEngine, RiskPolicy, RiskRule,
};

pub use service::{InvestigationService, InvestigationServiceBuilder};

pub use simulated::{Scenario, ScriptedAdapter, ScriptedResponse};

pub use trace::{TraceEntity, TraceEvent, TraceItem, TracePublisher, TraceSubscription};

pub use noir_state::{
    ContentDigest, FsInvestigationStore, InvestigationStore, MemoryInvestigationStore,
    StorageError, StoredInvestigation,
};
