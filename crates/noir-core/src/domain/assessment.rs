//! Risk assessment output types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verdict derived from the final score via fixed thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLabel {
    Legitimate,
    Suspicious,
    Scam,
}

impl RiskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legitimate => "legitimate",
            Self::Suspicious => "suspicious",
            Self::Scam => "scam",
        }
    }

    pub fn recommended_actions(&self) -> Vec<String> {
        let actions: &[&str] = match self {
            Self::Legitimate => &[
                "No immediate action required",
                "Re-check periodically if the relationship is ongoing",
            ],
            Self::Suspicious => &[
                "Verify the business through an independent channel before paying",
                "Avoid irreversible payment methods",
                "Review the cited evidence before deciding",
            ],
            Self::Scam => &[
                "Do not transact with this target",
                "Report the target to the relevant consumer-protection authority",
                "If a payment was made, contact your bank or card issuer",
            ],
        };
        actions.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One explanation tied to a ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RationaleEntry {
    pub record_id: String,
    /// Signed score contribution.
    pub weight: f64,
    pub explanation: String,
}

/// Qualifiers on an assessment's trustworthiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentFlag {
    ReducedConfidence,
    MissingRequiredEvidence,
    MissingOptionalEvidence,
    AnalysisUnavailable,
    AnalysisRejected,
    Cancelled,
}

impl AssessmentFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReducedConfidence => "reduced_confidence",
            Self::MissingRequiredEvidence => "missing_required_evidence",
            Self::MissingOptionalEvidence => "missing_optional_evidence",
            Self::AnalysisUnavailable => "analysis_unavailable",
            Self::AnalysisRejected => "analysis_rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Recorded analysis-service exchange, replayable against the same ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisProvenance {
    pub service: String,
    /// Digest of the request snapshot (ledger digest and heuristic score).
    pub input_digest: String,
    pub heuristic_score: f64,
    pub adjusted_score: f64,
    pub rationale: Vec<RationaleEntry>,
}

/// How much of the planned evidence was actually collected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceCoverage {
    pub planned_steps: usize,
    pub succeeded_steps: usize,
    /// Required steps that failed or were skipped.
    pub missing_required: Vec<String>,
    pub missing_optional: Vec<String>,
    pub cancelled: bool,
}

impl EvidenceCoverage {
    pub fn complete(planned_steps: usize) -> Self {
        Self {
            planned_steps,
            succeeded_steps: planned_steps,
            ..Self::default()
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.missing_required.is_empty() || self.cancelled
    }
}

/// Scored, traceable verdict for one investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Final score in `0..=100`.
    pub score: f64,
    pub label: RiskLabel,
    /// Score before any analysis refinement.
    pub heuristic_score: f64,
    /// `0.0..=1.0`; lowered by missing evidence and low source confidence.
    pub confidence: f64,
    /// True when required evidence is missing; never a confident verdict then.
    pub degraded: bool,
    pub rationale: Vec<RationaleEntry>,
    pub flags: Vec<AssessmentFlag>,
    pub explanation: String,
    pub recommended_actions: Vec<String>,
    pub ledger_digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisProvenance>,
    pub generated_at: DateTime<Utc>,
}

impl RiskAssessment {
    pub fn has_flag(&self, flag: AssessmentFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Every record id cited by the rationale (including analysis rationale).
    pub fn cited_records(&self) -> impl Iterator<Item = &str> {
        self.rationale
            .iter()
            .chain(self.analysis.iter().flat_map(|a| a.rationale.iter()))
            .map(|r| r.record_id.as_str())
    }
}
