//! Noir domain model.

pub mod assessment;
pub mod error;
pub mod evidence;
pub mod execution;
pub mod investigation;
pub mod plan;
pub mod target;

pub use assessment::{
    AnalysisProvenance, AssessmentFlag, EvidenceCoverage, RationaleEntry, RiskAssessment,
    RiskLabel,
};
pub use error::{LedgerError, NoirError, PlanningError, Result, TargetError};
pub use evidence::{
    EvidenceDraft, EvidenceLedger, EvidencePayload, EvidenceRecord, NewsArticle, SearchHit,
    SignalValue, Signals,
};
pub use execution::{StepError, StepErrorKind, StepExecution, StepStatus};
pub use investigation::{
    Investigation, InvestigationId, InvestigationStatus, PlanningRecord, StatusReport,
    StepStatusView,
};
pub use plan::{CostTier, InvestigationPlan, ParamRef, Parameters, RefSource, Step};
pub use target::{Target, TargetKind};
