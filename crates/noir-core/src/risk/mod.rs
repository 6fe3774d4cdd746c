//! Risk engine: evidence ledger in, explainable assessment out.
//!
//! 1. normalize record signals into a common indicator space
//! 2. apply the weighted rule policy for a base score
//! 3. optionally refine through an [`AnalysisService`], bounded and validated
//! 4. map the final score to a label via [`LabelThresholds`]
//!
//! [`RiskEngine::assess`] is a pure function of the ledger and coverage.
//! Analysis calls are recorded with a digest of their input so that
//! [`RiskEngine::reassess`] can replay them without the service.

pub mod analysis;
pub mod normalize;
pub mod rules;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use noir_state::ContentDigest;

use crate::config::RiskConfig;
use crate::domain::assessment::{
    AnalysisProvenance, AssessmentFlag, EvidenceCoverage, RiskAssessment,
};
use crate::domain::evidence::EvidenceLedger;
use crate::obs;

pub use analysis::{
    AnalysisError, AnalysisRequest, AnalysisResponse, AnalysisService, HttpAnalysisService,
};
pub use normalize::{normalize, IndicatorSet, Observation};
pub use rules::{Condition, HeuristicOutcome, LabelThresholds, RiskPolicy, RiskRule};

use rules::round2;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregationError {
    #[error("investigation {investigation_id} has no evidence to assess")]
    EmptyLedger { investigation_id: String },

    #[error("rationale cites record {record_id} which is not in the ledger")]
    DanglingCitation { record_id: String },

    #[error("ledger could not be digested: {0}")]
    Ledger(String),
}

/// Check that every citation in `assessment` resolves in `ledger`.
pub fn verify_citations(
    assessment: &RiskAssessment,
    ledger: &EvidenceLedger,
) -> Result<(), AggregationError> {
    match assessment.cited_records().find(|id| !ledger.contains(id)) {
        Some(record_id) => Err(AggregationError::DanglingCitation {
            record_id: record_id.to_string(),
        }),
        None => Ok(()),
    }
}

/// Outcome of consulting the analysis service, before it is folded in.
enum Refinement {
    Applied(AnalysisProvenance),
    Unavailable,
    Rejected,
}

pub struct RiskEngine {
    policy: RiskPolicy,
    config: RiskConfig,
    thresholds: LabelThresholds,
    analysis: Option<Arc<dyn AnalysisService>>,
}

impl RiskEngine {
    pub fn new(policy: RiskPolicy, config: RiskConfig) -> Self {
        let thresholds = LabelThresholds::from(&config);
        Self {
            policy,
            config,
            thresholds,
            analysis: None,
        }
    }

    pub fn with_analysis(mut self, service: Arc<dyn AnalysisService>) -> Self {
        self.analysis = Some(service);
        self
    }

    pub fn thresholds(&self) -> LabelThresholds {
        self.thresholds
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Heuristic-only assessment.
    pub fn assess(
        &self,
        ledger: &EvidenceLedger,
        coverage: &EvidenceCoverage,
    ) -> Result<RiskAssessment, AggregationError> {
        if ledger.is_empty() {
            return Err(AggregationError::EmptyLedger {
                investigation_id: ledger.investigation_id().to_string(),
            });
        }
        let digest = ledger
            .digest()
            .map_err(|e| AggregationError::Ledger(e.to_string()))?;
        let outcome = self.policy.evaluate(&normalize(ledger));

        let mut flags = Vec::new();
        if coverage.is_degraded() || !coverage.missing_optional.is_empty() {
            flags.push(AssessmentFlag::ReducedConfidence);
        }
        if !coverage.missing_required.is_empty() {
            flags.push(AssessmentFlag::MissingRequiredEvidence);
        }
        if !coverage.missing_optional.is_empty() {
            flags.push(AssessmentFlag::MissingOptionalEvidence);
        }
        if coverage.cancelled {
            flags.push(AssessmentFlag::Cancelled);
        }

        let label = self.thresholds.label(outcome.score);
        let mut assessment = RiskAssessment {
            score: outcome.score,
            label,
            heuristic_score: outcome.score,
            confidence: confidence(ledger, coverage),
            degraded: coverage.is_degraded(),
            rationale: outcome.rationale,
            flags,
            explanation: String::new(),
            recommended_actions: label.recommended_actions(),
            ledger_digest: digest.to_string(),
            analysis: None,
            generated_at: Utc::now(),
        };
        assessment.explanation = explain(&assessment, ledger.len(), coverage);
        verify_citations(&assessment, ledger)?;
        Ok(assessment)
    }

    /// Heuristic assessment refined by the analysis service, if configured.
    pub async fn assess_with_analysis(
        &self,
        ledger: &EvidenceLedger,
        coverage: &EvidenceCoverage,
    ) -> Result<RiskAssessment, AggregationError> {
        let base = self.assess(ledger, coverage)?;
        let Some(service) = self.analysis.clone() else {
            return self.finish(ledger, base);
        };
        let refinement = self.consult(service.as_ref(), ledger, &base).await;
        self.finish(ledger, self.refine(base, refinement, ledger.len(), coverage))
    }

    /// Recompute from a stored ledger. A recorded analysis exchange is
    /// replayed when its input digest still matches; the service is never
    /// called.
    pub fn reassess(
        &self,
        ledger: &EvidenceLedger,
        coverage: &EvidenceCoverage,
        recorded: Option<&AnalysisProvenance>,
    ) -> Result<RiskAssessment, AggregationError> {
        let base = self.assess(ledger, coverage)?;
        let Some(recorded) = recorded else {
            return Ok(base);
        };
        let request = AnalysisRequest::new(
            ledger,
            &base.ledger_digest,
            base.heuristic_score,
            &base.rationale,
        );
        let refinement = match ContentDigest::of_json(&request) {
            Ok(digest) if digest.as_str() == recorded.input_digest => {
                let response = AnalysisResponse {
                    adjusted_score: recorded.adjusted_score,
                    rationale: recorded.rationale.clone(),
                };
                match response.validate(ledger) {
                    Ok(()) => {
                        obs::emit_analysis_invoked(
                            ledger.investigation_id(),
                            &recorded.service,
                            "replayed",
                        );
                        Refinement::Applied(recorded.clone())
                    }
                    Err(_) => Refinement::Rejected,
                }
            }
            _ => Refinement::Unavailable,
        };
        Ok(self.refine(base, refinement, ledger.len(), coverage))
    }

    async fn consult(
        &self,
        service: &dyn AnalysisService,
        ledger: &EvidenceLedger,
        base: &RiskAssessment,
    ) -> Refinement {
        let investigation_id = ledger.investigation_id();
        let request = AnalysisRequest::new(
            ledger,
            &base.ledger_digest,
            base.heuristic_score,
            &base.rationale,
        );
        let input_digest = match ContentDigest::of_json(&request) {
            Ok(d) => d,
            Err(_) => return Refinement::Unavailable,
        };

        let timeout_ms = self.config.analysis_timeout_ms;
        let result = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            service.analyze(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AnalysisError::Timeout { timeout_ms }),
        };

        match result.and_then(|r| r.validate(ledger).map(|()| r)) {
            Ok(response) => {
                obs::emit_analysis_invoked(investigation_id, service.name(), "accepted");
                Refinement::Applied(AnalysisProvenance {
                    service: service.name().to_string(),
                    input_digest: input_digest.to_string(),
                    heuristic_score: base.heuristic_score,
                    adjusted_score: response.adjusted_score,
                    rationale: response.rationale,
                })
            }
            Err(err) if err.is_rejection() => {
                tracing::warn!(investigation_id = %investigation_id, error = %err, "analysis response rejected");
                obs::emit_analysis_invoked(investigation_id, service.name(), "rejected");
                Refinement::Rejected
            }
            Err(err) => {
                tracing::warn!(investigation_id = %investigation_id, error = %err, "analysis unavailable");
                obs::emit_analysis_invoked(investigation_id, service.name(), "unavailable");
                Refinement::Unavailable
            }
        }
    }

    fn refine(
        &self,
        mut assessment: RiskAssessment,
        refinement: Refinement,
        record_count: usize,
        coverage: &EvidenceCoverage,
    ) -> RiskAssessment {
        let fallback_flag = match refinement {
            Refinement::Applied(provenance) => {
                let max = self.config.max_analysis_adjustment;
                let base = assessment.heuristic_score;
                let adjusted = provenance
                    .adjusted_score
                    .clamp(base - max, base + max)
                    .clamp(0.0, 100.0);
                assessment.score = round2(adjusted);
                assessment.label = self.thresholds.label(assessment.score);
                assessment.recommended_actions = assessment.label.recommended_actions();
                assessment.analysis = Some(provenance);
                None
            }
            Refinement::Unavailable => Some(AssessmentFlag::AnalysisUnavailable),
            Refinement::Rejected => Some(AssessmentFlag::AnalysisRejected),
        };
        if let Some(flag) = fallback_flag {
            assessment.flags.push(flag);
            if !assessment.has_flag(AssessmentFlag::ReducedConfidence) {
                assessment.flags.push(AssessmentFlag::ReducedConfidence);
            }
        }
        assessment.explanation = explain(&assessment, record_count, coverage);
        assessment
    }

    fn finish(
        &self,
        ledger: &EvidenceLedger,
        assessment: RiskAssessment,
    ) -> Result<RiskAssessment, AggregationError> {
        verify_citations(&assessment, ledger)?;
        obs::emit_assessment_produced(
            ledger.investigation_id(),
            assessment.score,
            assessment.label.as_str(),
            assessment.degraded,
        );
        Ok(assessment)
    }
}

impl Default for RiskEngine {
    fn default() -> Self {
        Self::new(RiskPolicy::standard(), RiskConfig::default())
    }
}

/// Mean source confidence scaled by the share of planned steps that
/// produced evidence. Capped at 0.5 when required evidence is missing.
fn confidence(ledger: &EvidenceLedger, coverage: &EvidenceCoverage) -> f64 {
    let mean = ledger.iter().map(|r| r.confidence).sum::<f64>() / ledger.len() as f64;
    let share = if coverage.planned_steps == 0 {
        1.0
    } else {
        coverage.succeeded_steps as f64 / coverage.planned_steps as f64
    };
    let value = (mean * share).clamp(0.0, 1.0);
    let value = if coverage.is_degraded() {
        value.min(0.5)
    } else {
        value
    };
    (value * 1000.0).round() / 1000.0
}

fn explain(assessment: &RiskAssessment, record_count: usize, coverage: &EvidenceCoverage) -> String {
    let mut text = format!(
        "Score {:.1}/100 ({}) from {} rationale entr{} over {} evidence record{}",
        assessment.score,
        assessment.label,
        assessment.rationale.len(),
        if assessment.rationale.len() == 1 { "y" } else { "ies" },
        record_count,
        if record_count == 1 { "" } else { "s" },
    );
    if let Some(analysis) = &assessment.analysis {
        text.push_str(&format!(
            "; analysis adjusted heuristic {:.1}",
            analysis.heuristic_score
        ));
    }
    if !coverage.missing_required.is_empty() {
        text.push_str(&format!(
            "; required evidence missing from {}",
            coverage.missing_required.join(", ")
        ));
    }
    if coverage.cancelled {
        text.push_str("; investigation was cancelled");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::assessment::RationaleEntry;
    use crate::domain::evidence::{EvidenceDraft, EvidencePayload, Signals};
    use async_trait::async_trait;

    fn ledger() -> EvidenceLedger {
        let mut ledger = EvidenceLedger::new("inv-risk");
        let mut signals = Signals::new();
        signals.insert("domain_age_days".into(), 12u32.into());
        ledger
            .append(EvidenceDraft {
                source_step_id: "whois".into(),
                primitive_name: "whois".into(),
                payload: EvidencePayload::Whois {
                    domain: "example.com".into(),
                    registrar: None,
                    created_at: None,
                    expires_at: None,
                    privacy_protected: true,
                },
                confidence: 1.0,
                signals,
                attempt: 1,
            })
            .unwrap();
        ledger
    }

    struct FixedAnalysis(AnalysisResponse);

    #[async_trait]
    impl AnalysisService for FixedAnalysis {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn analyze(&self, _: &AnalysisRequest) -> Result<AnalysisResponse, AnalysisError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_empty_ledger_is_aggregation_error() {
        let engine = RiskEngine::default();
        let err = engine
            .assess(&EvidenceLedger::new("inv-empty"), &EvidenceCoverage::default())
            .unwrap_err();
        assert!(matches!(err, AggregationError::EmptyLedger { .. }));
    }

    #[test]
    fn test_heuristic_assessment() {
        let engine = RiskEngine::default();
        let a = engine
            .assess(&ledger(), &EvidenceCoverage::complete(1))
            .unwrap();
        // new domain 35 + privacy 5
        assert_eq!(a.score, 40.0);
        assert_eq!(a.label, crate::domain::RiskLabel::Suspicious);
        assert!(!a.degraded);
        assert!(a.flags.is_empty());
        assert_eq!(a.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_analysis_adjustment_is_bounded() {
        let engine = RiskEngine::default().with_analysis(Arc::new(FixedAnalysis(
            AnalysisResponse {
                adjusted_score: 100.0,
                rationale: vec![RationaleEntry {
                    record_id: "ev-0001".into(),
                    weight: 60.0,
                    explanation: "brand impersonation".into(),
                }],
            },
        )));
        let a = engine
            .assess_with_analysis(&ledger(), &EvidenceCoverage::complete(1))
            .await
            .unwrap();
        assert_eq!(a.heuristic_score, 40.0);
        assert_eq!(a.score, 65.0);
        assert!(a.analysis.is_some());
    }

    #[tokio::test]
    async fn test_dangling_analysis_citation_falls_back() {
        let engine = RiskEngine::default().with_analysis(Arc::new(FixedAnalysis(
            AnalysisResponse {
                adjusted_score: 90.0,
                rationale: vec![RationaleEntry {
                    record_id: "ev-9999".into(),
                    weight: 50.0,
                    explanation: "invented".into(),
                }],
            },
        )));
        let a = engine
            .assess_with_analysis(&ledger(), &EvidenceCoverage::complete(1))
            .await
            .unwrap();
        assert_eq!(a.score, 40.0);
        assert!(a.has_flag(AssessmentFlag::AnalysisRejected));
        assert!(a.has_flag(AssessmentFlag::ReducedConfidence));
        assert!(a.analysis.is_none());
    }

    #[tokio::test]
    async fn test_reassess_replays_recorded_analysis() {
        let engine = RiskEngine::default().with_analysis(Arc::new(FixedAnalysis(
            AnalysisResponse {
                adjusted_score: 50.0,
                rationale: vec![],
            },
        )));
        let ledger = ledger();
        let coverage = EvidenceCoverage::complete(1);
        let live = engine.assess_with_analysis(&ledger, &coverage).await.unwrap();

        let offline = RiskEngine::default();
        let replayed = offline
            .reassess(&ledger, &coverage, live.analysis.as_ref())
            .unwrap();
        assert_eq!(replayed.score, live.score);
        assert_eq!(replayed.label, live.label);
    }

    #[test]
    fn test_reassess_with_stale_record_is_flagged() {
        let stale = AnalysisProvenance {
            service: "fixed".into(),
            input_digest: "0".repeat(64),
            heuristic_score: 40.0,
            adjusted_score: 80.0,
            rationale: vec![],
        };
        let a = RiskEngine::default()
            .reassess(&ledger(), &EvidenceCoverage::complete(1), Some(&stale))
            .unwrap();
        assert_eq!(a.score, 40.0);
        assert!(a.has_flag(AssessmentFlag::AnalysisUnavailable));
    }

    #[test]
    fn test_degraded_coverage_caps_confidence() {
        let coverage = EvidenceCoverage {
            planned_steps: 2,
            succeeded_steps: 1,
            missing_required: vec!["reputation".into()],
            missing_optional: vec![],
            cancelled: false,
        };
        let a = RiskEngine::default().assess(&ledger(), &coverage).unwrap();
        assert!(a.degraded);
        assert!(a.confidence <= 0.5);
        assert!(a.has_flag(AssessmentFlag::MissingRequiredEvidence));
        assert!(a.explanation.contains("reputation"));
    }
}
