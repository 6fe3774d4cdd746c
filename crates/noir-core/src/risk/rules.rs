//! Weighted-rule heuristic layer.
//!
//! Each [`RiskRule`] tests one indicator. A firing rule contributes
//! `weight × confidence` of the record that supplied the indicator, and
//! produces one rationale entry citing that record. The base score is the
//! clamped sum of contributions.

use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;
use crate::domain::assessment::{RationaleEntry, RiskLabel};
use crate::risk::normalize::{self, IndicatorSet};

/// Predicate on an indicator value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Condition {
    Below(f64),
    AtLeast(f64),
    /// `min <= value < max`.
    Between(f64, f64),
    IsTrue,
    IsFalse,
}

impl Condition {
    pub fn holds(&self, value: f64) -> bool {
        match *self {
            Self::Below(t) => value < t,
            Self::AtLeast(t) => value >= t,
            Self::Between(min, max) => value >= min && value < max,
            Self::IsTrue => value != 0.0,
            Self::IsFalse => value == 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRule {
    pub id: String,
    pub indicator: String,
    pub condition: Condition,
    /// Positive raises risk, negative lowers it.
    pub weight: f64,
    /// `{value}` is replaced with the observed indicator value.
    pub explanation: String,
}

impl RiskRule {
    pub fn new(
        id: &str,
        indicator: &str,
        condition: Condition,
        weight: f64,
        explanation: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            indicator: indicator.to_string(),
            condition,
            weight,
            explanation: explanation.to_string(),
        }
    }

    fn explain(&self, value: f64) -> String {
        let shown = if value.fract() == 0.0 {
            format!("{value:.0}")
        } else {
            format!("{value:.2}")
        };
        self.explanation.replace("{value}", &shown)
    }
}

/// Ordered rule table. Rationale follows rule order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPolicy {
    pub rules: Vec<RiskRule>,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl RiskPolicy {
    #[rustfmt::skip]
    pub fn standard() -> Self {
        use normalize::*;
        use Condition::*;
        Self {
            rules: vec![
                RiskRule::new("new_domain", DOMAIN_AGE_DAYS, Below(30.0), 35.0,
                    "Domain registered {value} days ago (under 30 days)"),
                RiskRule::new("young_domain", DOMAIN_AGE_DAYS, Between(30.0, 180.0), 15.0,
                    "Domain registered {value} days ago (under 6 months)"),
                RiskRule::new("established_domain", DOMAIN_AGE_DAYS, AtLeast(1825.0), -15.0,
                    "Domain registered {value} days ago (over 5 years)"),
                RiskRule::new("whois_privacy", WHOIS_PRIVACY, IsTrue, 5.0,
                    "Registrant identity hidden behind WHOIS privacy"),
                RiskRule::new("reputation_flagged", REPUTATION_ENGINES_FLAGGED, AtLeast(1.0), 15.0,
                    "{value} reputation engine(s) flag the target"),
                RiskRule::new("reputation_widely_flagged", REPUTATION_FLAG_RATIO, AtLeast(0.1), 25.0,
                    "{value} of reputation engines flag the target"),
                RiskRule::new("reputation_clean", REPUTATION_ENGINES_FLAGGED, Below(1.0), -10.0,
                    "No reputation engine flags the target"),
                RiskRule::new("negative_news", NEGATIVE_NEWS_COUNT, AtLeast(3.0), 25.0,
                    "{value} negative news articles found"),
                RiskRule::new("some_negative_news", NEGATIVE_NEWS_COUNT, Between(1.0, 3.0), 10.0,
                    "{value} negative news article(s) found"),
                RiskRule::new("no_https", HTTPS, IsFalse, 10.0,
                    "Site does not use HTTPS"),
                RiskRule::new("no_contact_info", CONTACT_INFO_PRESENT, IsFalse, 10.0,
                    "No contact information published"),
                RiskRule::new("scam_reports", SCAM_REPORTS, AtLeast(1.0), 30.0,
                    "{value} scam report(s) on record"),
                RiskRule::new("no_web_presence", SEARCH_RESULT_COUNT, Below(1.0), 10.0,
                    "No web search results for the target"),
            ],
        }
    }

    pub fn with_rule(mut self, rule: RiskRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Fire every applicable rule against `indicators`.
    pub fn evaluate(&self, indicators: &IndicatorSet) -> HeuristicOutcome {
        let mut rationale = Vec::new();
        let mut raw = 0.0;
        for rule in &self.rules {
            let Some(obs) = indicators.get(&rule.indicator) else {
                continue;
            };
            if !rule.condition.holds(obs.value) {
                continue;
            }
            let contribution = round2(rule.weight * obs.confidence);
            raw += contribution;
            rationale.push(RationaleEntry {
                record_id: obs.record_id.clone(),
                weight: contribution,
                explanation: rule.explain(obs.value),
            });
        }
        HeuristicOutcome {
            score: round2(raw.clamp(0.0, 100.0)),
            rationale,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicOutcome {
    pub score: f64,
    pub rationale: Vec<RationaleEntry>,
}

/// Score-to-label cut-offs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelThresholds {
    pub suspicious: f64,
    pub scam: f64,
}

impl Default for LabelThresholds {
    fn default() -> Self {
        Self::from(&RiskConfig::default())
    }
}

impl From<&RiskConfig> for LabelThresholds {
    fn from(config: &RiskConfig) -> Self {
        Self {
            suspicious: config.suspicious_threshold,
            scam: config.scam_threshold,
        }
    }
}

impl LabelThresholds {
    pub fn label(&self, score: f64) -> RiskLabel {
        if score >= self.scam {
            RiskLabel::Scam
        } else if score >= self.suspicious {
            RiskLabel::Suspicious
        } else {
            RiskLabel::Legitimate
        }
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
