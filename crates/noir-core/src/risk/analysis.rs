//! External analysis service contract.
//!
//! The service receives the full evidence snapshot and the heuristic score
//! and may propose an adjusted score with rationale citing record ids. Its
//! answer is optional refinement: any failure falls back to the heuristic.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::assessment::RationaleEntry;
use crate::domain::evidence::{EvidenceLedger, EvidenceRecord};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis service unavailable: {0}")]
    Unavailable(String),

    #[error("analysis service timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("malformed analysis response: {0}")]
    Malformed(String),

    #[error("analysis rationale cites unknown record {record_id}")]
    DanglingCitation { record_id: String },

    #[error("analysis returned a non-finite score")]
    NonFiniteScore,
}

impl AnalysisError {
    /// Whether the response arrived but was refused.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_) | Self::DanglingCitation { .. } | Self::NonFiniteScore
        )
    }
}

/// Fixed input snapshot sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub investigation_id: String,
    pub ledger_digest: String,
    pub evidence: Vec<EvidenceRecord>,
    pub heuristic_score: f64,
    pub heuristic_rationale: Vec<RationaleEntry>,
}

impl AnalysisRequest {
    pub fn new(
        ledger: &EvidenceLedger,
        ledger_digest: &str,
        heuristic_score: f64,
        heuristic_rationale: &[RationaleEntry],
    ) -> Self {
        Self {
            investigation_id: ledger.investigation_id().to_string(),
            ledger_digest: ledger_digest.to_string(),
            evidence: ledger.records().to_vec(),
            heuristic_score,
            heuristic_rationale: heuristic_rationale.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub adjusted_score: f64,
    #[serde(default)]
    pub rationale: Vec<RationaleEntry>,
}

impl AnalysisResponse {
    /// Reject non-finite scores and citations of records outside `ledger`.
    pub fn validate(&self, ledger: &EvidenceLedger) -> Result<(), AnalysisError> {
        if !self.adjusted_score.is_finite() {
            return Err(AnalysisError::NonFiniteScore);
        }
        for entry in &self.rationale {
            if !ledger.contains(&entry.record_id) {
                return Err(AnalysisError::DanglingCitation {
                    record_id: entry.record_id.clone(),
                });
            }
            if !entry.weight.is_finite() {
                return Err(AnalysisError::Malformed(format!(
                    "non-finite weight for {}",
                    entry.record_id
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, AnalysisError>;
}

/// JSON-over-HTTP analysis service.
///
/// `POST {endpoint}` with an [`AnalysisRequest`] body; expects an
/// [`AnalysisResponse`].
pub struct HttpAnalysisService {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpAnalysisService {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("noir-core/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, AnalysisError> {
        let mut req = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| AnalysisError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AnalysisError::Unavailable(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| AnalysisError::Unavailable(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| AnalysisError::Malformed(e.to_string()))
    }
}
