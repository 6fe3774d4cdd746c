//! Read-only cross-investigation view.
//!
//! Built from terminal investigation records only; nothing on the execution
//! path reads or writes it.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use noir_state::StoredInvestigation;
use serde::{Deserialize, Serialize};

use crate::domain::error::Result;
use crate::domain::execution::StepStatus;
use crate::domain::investigation::Investigation;

/// How many primitives [`DashboardProjection::failing_primitives`] keeps.
pub const TOP_FAILING: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimitiveFailures {
    pub primitive: String,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardProjection {
    pub investigations: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_label: BTreeMap<String, usize>,
    /// Mean final score over investigations that produced an assessment.
    pub mean_score: Option<f64>,
    pub degraded_assessments: usize,
    /// Primitives with the most failed steps, most failures first.
    pub failing_primitives: Vec<PrimitiveFailures>,
    pub built_at: DateTime<Utc>,
}

impl DashboardProjection {
    /// Non-terminal records and repeated ids are ignored.
    pub fn build<'a>(records: impl IntoIterator<Item = &'a Investigation>) -> Self {
        let mut seen = HashSet::new();
        let mut by_status = BTreeMap::new();
        let mut by_label = BTreeMap::new();
        let mut failures: BTreeMap<String, usize> = BTreeMap::new();
        let mut scores = Vec::new();
        let mut degraded_assessments = 0;

        for inv in records {
            if !inv.status.is_terminal() || !seen.insert(inv.id.clone()) {
                continue;
            }
            *by_status.entry(inv.status.as_str().to_string()).or_insert(0) += 1;
            if let Some(assessment) = &inv.assessment {
                *by_label
                    .entry(assessment.label.as_str().to_string())
                    .or_insert(0) += 1;
                scores.push(assessment.score);
                if assessment.degraded {
                    degraded_assessments += 1;
                }
            }
            for step in inv.steps.iter().filter(|s| s.status == StepStatus::Failed) {
                *failures.entry(step.primitive_name.clone()).or_insert(0) += 1;
            }
        }

        let mut failing_primitives: Vec<_> = failures
            .into_iter()
            .map(|(primitive, failures)| PrimitiveFailures {
                primitive,
                failures,
            })
            .collect();
        failing_primitives.sort_by(|a, b| b.failures.cmp(&a.failures));
        failing_primitives.truncate(TOP_FAILING);

        let mean_score = (!scores.is_empty()).then(|| {
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            (mean * 100.0).round() / 100.0
        });

        Self {
            investigations: seen.len(),
            by_status,
            by_label,
            mean_score,
            degraded_assessments,
            failing_primitives,
            built_at: Utc::now(),
        }
    }

    /// Decode and verify stored documents, then build.
    pub fn from_stored(records: &[StoredInvestigation]) -> Result<Self> {
        let investigations = records
            .iter()
            .map(Investigation::from_stored)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::build(&investigations))
    }
}
