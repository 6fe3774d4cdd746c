//! The investigation aggregate root.

use std::fmt;

use chrono::{DateTime, Utc};
use noir_state::StoredInvestigation;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::assessment::{EvidenceCoverage, RiskAssessment};
use crate::domain::error::Result;
use crate::domain::evidence::EvidenceLedger;
use crate::domain::execution::{StepExecution, StepStatus};
use crate::domain::plan::InvestigationPlan;
use crate::domain::target::Target;
use crate::trace::TraceEvent;

/// Opaque investigation identifier (`inv-<32 hex>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvestigationId(String);

impl InvestigationId {
    pub fn generate() -> Self {
        Self(format!("inv-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InvestigationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for InvestigationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for InvestigationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    Planning,
    Running,
    Completed,
    Degraded,
    Failed,
}

impl InvestigationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Degraded | Self::Failed)
    }
}

impl fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the executed plan was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningRecord {
    pub strategy: String,
    pub used_fallback: bool,
    /// Why the primary plan was rejected, when a fallback ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_primary: Option<String>,
    /// Step ids appended by plan adaptation after the first round.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adapted_steps: Vec<String>,
}

/// Aggregate binding target, plan, step executions, ledger, trace and verdict.
///
/// Serializes to a self-contained document keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investigation {
    pub id: InvestigationId,
    pub target: Target,
    pub status: InvestigationStatus,
    pub plan: Option<InvestigationPlan>,
    pub planning: Option<PlanningRecord>,
    pub steps: Vec<StepExecution>,
    pub ledger: EvidenceLedger,
    pub trace: Vec<TraceEvent>,
    pub assessment: Option<RiskAssessment>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Investigation {
    pub fn new(id: InvestigationId, target: Target) -> Self {
        let ledger = EvidenceLedger::new(id.as_str());
        Self {
            id,
            target,
            status: InvestigationStatus::Planning,
            plan: None,
            planning: None,
            steps: Vec::new(),
            ledger,
            trace: Vec::new(),
            assessment: None,
            cancelled: false,
            failure_reason: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn coverage(&self) -> EvidenceCoverage {
        let mut coverage = EvidenceCoverage {
            planned_steps: self.steps.len(),
            cancelled: self.cancelled,
            ..EvidenceCoverage::default()
        };
        for step in &self.steps {
            match (step.status, step.required) {
                (StepStatus::Succeeded, _) => coverage.succeeded_steps += 1,
                (StepStatus::Failed | StepStatus::Skipped, true) => {
                    coverage.missing_required.push(step.step_id.clone())
                }
                (StepStatus::Failed | StepStatus::Skipped, false) => {
                    coverage.missing_optional.push(step.step_id.clone())
                }
                _ => {}
            }
        }
        coverage
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            investigation_id: self.id.clone(),
            target: self.target.to_string(),
            status: self.status,
            steps: self
                .steps
                .iter()
                .map(|s| StepStatusView {
                    step_id: s.step_id.clone(),
                    primitive_name: s.primitive_name.clone(),
                    required: s.required,
                    status: s.status,
                    attempt_count: s.attempt_count,
                    reason: s.reason(),
                })
                .collect(),
            evidence_count: self.ledger.len(),
            assessment_ready: self.assessment.is_some(),
            failure_reason: self.failure_reason.clone(),
        }
    }

    /// Seal the full document for an `InvestigationStore`.
    pub fn to_stored(&self) -> Result<StoredInvestigation> {
        let body = serde_json::to_value(self)?;
        Ok(StoredInvestigation::new(
            self.id.as_str(),
            self.status.as_str(),
            body,
        )?)
    }

    pub fn from_stored(record: &StoredInvestigation) -> Result<Self> {
        record.verify()?;
        Ok(serde_json::from_value(record.body.clone())?)
    }
}

/// Point-in-time view returned by `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub investigation_id: InvestigationId,
    pub target: String,
    pub status: InvestigationStatus,
    pub steps: Vec<StepStatusView>,
    pub evidence_count: usize,
    pub assessment_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStatusView {
    pub step_id: String,
    pub primitive_name: String,
    pub required: bool,
    pub status: StepStatus,
    pub attempt_count: u32,
    /// Present for failed and skipped steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
