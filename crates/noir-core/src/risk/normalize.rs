//! Normalization of heterogeneous evidence into a common indicator space.
//!
//! Payload-derived indicators come first; explicit source signals with a
//! known name override them. When several records report the same
//! indicator, the most confident one wins, ties going to the earlier record.

use std::collections::BTreeMap;

use crate::domain::evidence::{EvidenceLedger, EvidencePayload, EvidenceRecord};

pub const DOMAIN_AGE_DAYS: &str = "domain_age_days";
pub const WHOIS_PRIVACY: &str = "whois_privacy";
pub const REPUTATION_ENGINES_FLAGGED: &str = "reputation_engines_flagged";
pub const REPUTATION_FLAG_RATIO: &str = "reputation_flag_ratio";
pub const NEGATIVE_NEWS_COUNT: &str = "negative_news_count";
pub const HTTPS: &str = "https";
pub const CONTACT_INFO_PRESENT: &str = "contact_info_present";
pub const SCAM_REPORTS: &str = "scam_reports";
pub const SEARCH_RESULT_COUNT: &str = "search_result_count";

/// Canonical indicator name for a source signal name, if recognised.
fn canonical(signal: &str) -> Option<&'static str> {
    Some(match signal {
        "domain_age_days" | "age_days" => DOMAIN_AGE_DAYS,
        "whois_privacy" | "privacy_protected" => WHOIS_PRIVACY,
        "engines_flagged" | "reputation_engines_flagged" => REPUTATION_ENGINES_FLAGGED,
        "flag_ratio" | "reputation_flag_ratio" => REPUTATION_FLAG_RATIO,
        "negative_news_count" | "negative_articles" => NEGATIVE_NEWS_COUNT,
        "https" | "uses_https" => HTTPS,
        "contact_info_present" | "has_contact_info" => CONTACT_INFO_PRESENT,
        "scam_reports" | "scam_report_count" => SCAM_REPORTS,
        "search_result_count" | "total_results" => SEARCH_RESULT_COUNT,
        _ => return None,
    })
}

/// One indicator value and the record it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub value: f64,
    pub record_id: String,
    pub confidence: f64,
}

/// Indicator name to its winning observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSet {
    observations: BTreeMap<&'static str, Observation>,
}

impl IndicatorSet {
    pub fn get(&self, indicator: &str) -> Option<&Observation> {
        self.observations.get(indicator)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Observation)> {
        self.observations.iter().map(|(k, v)| (*k, v))
    }

    fn observe(&mut self, indicator: &'static str, value: f64, record: &EvidenceRecord) {
        if !value.is_finite() {
            return;
        }
        let candidate = Observation {
            value,
            record_id: record.record_id.clone(),
            confidence: record.confidence,
        };
        match self.observations.get(indicator) {
            Some(current) if current.confidence >= candidate.confidence => {}
            _ => {
                self.observations.insert(indicator, candidate);
            }
        }
    }
}

fn from_payload(record: &EvidenceRecord) -> Vec<(&'static str, f64)> {
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    match &record.payload {
        EvidencePayload::Whois {
            created_at,
            privacy_protected,
            ..
        } => {
            let mut out = vec![(WHOIS_PRIVACY, flag(*privacy_protected))];
            if let Some(created) = created_at {
                let days = (record.collected_at - *created).num_days().max(0);
                out.push((DOMAIN_AGE_DAYS, days as f64));
            }
            out
        }
        EvidencePayload::WebSearch {
            results,
            total_results,
            ..
        } => {
            let count = (*total_results).max(results.len() as u64);
            vec![(SEARCH_RESULT_COUNT, count as f64)]
        }
        EvidencePayload::Reputation {
            engines_checked,
            engines_flagged,
            ..
        } => {
            if *engines_checked == 0 {
                return Vec::new();
            }
            vec![
                (REPUTATION_ENGINES_FLAGGED, f64::from(*engines_flagged)),
                (
                    REPUTATION_FLAG_RATIO,
                    f64::from(*engines_flagged) / f64::from(*engines_checked),
                ),
            ]
        }
        EvidencePayload::NewsSearch { articles, .. } => {
            let negative = articles.iter().filter(|a| a.negative).count();
            vec![(NEGATIVE_NEWS_COUNT, negative as f64)]
        }
        EvidencePayload::PageContent {
            https,
            contact_info_present,
            ..
        } => vec![
            (HTTPS, flag(*https)),
            (CONTACT_INFO_PRESENT, flag(*contact_info_present)),
        ],
        EvidencePayload::Generic { .. } => Vec::new(),
    }
}

fn from_record(record: &EvidenceRecord) -> BTreeMap<&'static str, f64> {
    let mut values: BTreeMap<&'static str, f64> = from_payload(record).into_iter().collect();
    for (name, signal) in &record.signals {
        if let (Some(indicator), Some(value)) = (canonical(name), signal.as_f64()) {
            values.insert(indicator, value);
        }
    }
    values
}

/// Indicators for a whole ledger, in ledger order.
pub fn normalize(ledger: &EvidenceLedger) -> IndicatorSet {
    let mut set = IndicatorSet::default();
    for record in ledger.iter() {
        for (indicator, value) in from_record(record) {
            set.observe(indicator, value, record);
        }
    }
    set
}
