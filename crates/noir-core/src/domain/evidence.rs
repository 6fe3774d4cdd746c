//! Evidence records and the append-only evidence ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use noir_state::ContentDigest;
use serde::{Deserialize, Serialize};

use crate::domain::error::LedgerError;

/// Value of a named indicator reported by a primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl SignalValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(t) => t.trim().parse().ok(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            Self::Number(n) => Some(*n != 0.0),
            Self::Text(t) => match t.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Flag(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(t) => serde_json::Value::String(t.clone()),
        }
    }
}

impl From<bool> for SignalValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<f64> for SignalValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i64> for SignalValue {
    fn from(v: i64) -> Self {
        Self::Number(v as f64)
    }
}

impl From<u32> for SignalValue {
    fn from(v: u32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<&str> for SignalValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SignalValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Named indicators, ordered by name for stable serialization.
pub type Signals = BTreeMap<String, SignalValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    /// Article reports fraud, complaints or regulatory action.
    #[serde(default)]
    pub negative: bool,
}

/// Source-specific evidence shape, keyed by primitive name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "primitive", rename_all = "snake_case")]
pub enum EvidencePayload {
    Whois {
        domain: String,
        #[serde(default)]
        registrar: Option<String>,
        #[serde(default)]
        created_at: Option<DateTime<Utc>>,
        #[serde(default)]
        expires_at: Option<DateTime<Utc>>,
        #[serde(default)]
        privacy_protected: bool,
    },
    WebSearch {
        query: String,
        #[serde(default)]
        results: Vec<SearchHit>,
        #[serde(default)]
        total_results: u64,
    },
    Reputation {
        engines_checked: u32,
        engines_flagged: u32,
        #[serde(default)]
        categories: Vec<String>,
    },
    NewsSearch {
        query: String,
        #[serde(default)]
        articles: Vec<NewsArticle>,
    },
    PageContent {
        url: String,
        https: bool,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        contact_info_present: bool,
        #[serde(default)]
        payment_methods: Vec<String>,
    },
    /// Escape hatch for primitives without a dedicated shape.
    Generic {
        source: String,
        data: serde_json::Value,
    },
}

impl EvidencePayload {
    /// The serde tag of this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Whois { .. } => "whois",
            Self::WebSearch { .. } => "web_search",
            Self::Reputation { .. } => "reputation",
            Self::NewsSearch { .. } => "news_search",
            Self::PageContent { .. } => "page_content",
            Self::Generic { .. } => "generic",
        }
    }

    /// Top-level field of the serialized payload.
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        let value = serde_json::to_value(self).ok()?;
        value.get(name).cloned()
    }
}

/// Evidence as reported by a primitive, before the ledger assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceDraft {
    pub source_step_id: String,
    pub primitive_name: String,
    pub payload: EvidencePayload,
    pub confidence: f64,
    pub signals: Signals,
    pub attempt: u32,
}

/// Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub record_id: String,
    pub source_step_id: String,
    pub primitive_name: String,
    pub collected_at: DateTime<Utc>,
    pub payload: EvidencePayload,
    pub confidence: f64,
    #[serde(default)]
    pub signals: Signals,
    /// Attempt number that produced this record.
    pub attempt: u32,
}

/// Append-only, insertion-ordered evidence for one investigation.
///
/// Holds at most one record per step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceLedger {
    investigation_id: String,
    records: Vec<EvidenceRecord>,
}

impl EvidenceLedger {
    pub fn new(investigation_id: impl Into<String>) -> Self {
        Self {
            investigation_id: investigation_id.into(),
            records: Vec::new(),
        }
    }

    pub fn investigation_id(&self) -> &str {
        &self.investigation_id
    }

    pub fn append(&mut self, draft: EvidenceDraft) -> Result<&EvidenceRecord, LedgerError> {
        if !(0.0..=1.0).contains(&draft.confidence) {
            return Err(LedgerError::InvalidConfidence {
                step_id: draft.source_step_id,
                confidence: draft.confidence,
            });
        }
        if let Some(existing) = self.for_step(&draft.source_step_id) {
            return Err(LedgerError::DuplicateStep {
                step_id: draft.source_step_id,
                existing: existing.record_id.clone(),
            });
        }

        let record = EvidenceRecord {
            record_id: format!("ev-{:04}", self.records.len() + 1),
            source_step_id: draft.source_step_id,
            primitive_name: draft.primitive_name,
            collected_at: Utc::now(),
            payload: draft.payload,
            confidence: draft.confidence,
            signals: draft.signals,
            attempt: draft.attempt,
        };
        self.records.push(record);
        Ok(&self.records[self.records.len() - 1])
    }

    pub fn get(&self, record_id: &str) -> Option<&EvidenceRecord> {
        self.records.iter().find(|r| r.record_id == record_id)
    }

    pub fn contains(&self, record_id: &str) -> bool {
        self.get(record_id).is_some()
    }

    pub fn for_step(&self, step_id: &str) -> Option<&EvidenceRecord> {
        self.records.iter().find(|r| r.source_step_id == step_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvidenceRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[EvidenceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// SHA-256 over the canonical JSON of the ledger.
    pub fn digest(&self) -> Result<ContentDigest, LedgerError> {
        ContentDigest::of_json(self).map_err(|e| LedgerError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(step_id: &str, confidence: f64) -> EvidenceDraft {
        EvidenceDraft {
            source_step_id: step_id.to_string(),
            primitive_name: "reputation".to_string(),
            payload: EvidencePayload::Reputation {
                engines_checked: 70,
                engines_flagged: 0,
                categories: vec![],
            },
            confidence,
            signals: Signals::new(),
            attempt: 1,
        }
    }

    #[test]
    fn test_append_assigns_sequential_ids() {
        let mut ledger = EvidenceLedger::new("inv-1");
        let first = ledger.append(draft("s1", 0.9)).unwrap().record_id.clone();
        let second = ledger.append(draft("s2", 0.8)).unwrap().record_id.clone();
        assert_eq!(first, "ev-0001");
        assert_eq!(second, "ev-0002");
        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains("ev-0002"));
        assert_eq!(ledger.for_step("s2").unwrap().record_id, "ev-0002");
    }

    #[test]
    fn test_second_record_for_same_step_rejected() {
        let mut ledger = EvidenceLedger::new("inv-1");
        ledger.append(draft("s1", 0.9)).unwrap();
        let err = ledger.append(draft("s1", 0.9)).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateStep { existing, .. } if existing == "ev-0001"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let mut ledger = EvidenceLedger::new("inv-1");
        assert!(ledger.append(draft("s1", 1.5)).is_err());
        assert!(ledger.append(draft("s1", f64::NAN)).is_err());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_digest_changes_with_content() {
        let mut ledger = EvidenceLedger::new("inv-1");
        let empty = ledger.digest().unwrap();
        ledger.append(draft("s1", 0.9)).unwrap();
        assert_ne!(empty, ledger.digest().unwrap());
        assert_eq!(ledger.digest().unwrap(), ledger.clone().digest().unwrap());
    }

    #[test]
    fn test_payload_tagged_by_primitive() {
        let payload = EvidencePayload::PageContent {
            url: "https://shop.example".to_string(),
            https: true,
            title: None,
            contact_info_present: false,
            payment_methods: vec!["crypto".to_string()],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["primitive"], "page_content");
        assert_eq!(payload.kind(), "page_content");
        assert_eq!(payload.field("https"), Some(serde_json::json!(true)));
    }

    #[test]
    fn test_signal_value_coercions() {
        assert_eq!(SignalValue::from(12u32).as_f64(), Some(12.0));
        assert_eq!(SignalValue::from("yes").as_bool(), Some(true));
        assert_eq!(SignalValue::from(true).as_f64(), Some(1.0));
        let parsed: SignalValue = serde_json::from_str("12").unwrap();
        assert_eq!(parsed, SignalValue::Number(12.0));
    }
}
