//! Deterministic rule-table planner, fallback plan and plan adaptation.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::json;

use crate::config::PlannerConfig;
use crate::domain::error::PlanningError;
use crate::domain::evidence::EvidenceLedger;
use crate::domain::plan::{CostTier, InvestigationPlan, Parameters, Step};
use crate::domain::target::{Target, TargetKind};
use crate::planner::Planner;
use crate::risk::normalize::{self, DOMAIN_AGE_DAYS, REPUTATION_ENGINES_FLAGGED, SCAM_REPORTS};

pub const WHOIS: &str = "whois";
pub const WEB_SEARCH: &str = "web_search";
pub const REPUTATION: &str = "reputation";
pub const PAGE_CONTENT: &str = "page_content";
pub const NEWS_SEARCH: &str = "news_search";

/// Preference order for fallback steps.
const FALLBACK_ORDER: [&str; 3] = [WHOIS, WEB_SEARCH, REPUTATION];

/// One row of the rule table.
struct Rule {
    primitive: &'static str,
    label: &'static str,
    applies: fn(&Target, &PlannerConfig) -> bool,
    required: bool,
    timeout_ms: u64,
    cost_tier: CostTier,
    params: fn(&Target) -> Parameters,
}

fn has_host(target: &Target, _: &PlannerConfig) -> bool {
    target.kind() != TargetKind::Company
}

fn always(_: &Target, _: &PlannerConfig) -> bool {
    true
}

fn is_url(target: &Target, _: &PlannerConfig) -> bool {
    target.kind() == TargetKind::Url
}

fn wants_news(target: &Target, config: &PlannerConfig) -> bool {
    target.kind() == TargetKind::Company || config.include_news
}

fn params(value: serde_json::Value) -> Parameters {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Parameters::new(),
    }
}

fn host_or_value(target: &Target) -> String {
    target.host().unwrap_or_else(|| target.value().to_string())
}

fn news_query(target: &Target) -> String {
    format!("{} scam OR complaints OR fraud", host_or_value(target))
}

const RULES: &[Rule] = &[
    Rule {
        primitive: WHOIS,
        label: "WHOIS Domain Lookup",
        applies: has_host,
        required: true,
        timeout_ms: 30_000,
        cost_tier: CostTier::Free,
        params: |t| params(json!({ "domain": host_or_value(t) })),
    },
    Rule {
        primitive: WEB_SEARCH,
        label: "Web Search",
        applies: always,
        required: true,
        timeout_ms: 15_000,
        cost_tier: CostTier::Free,
        params: |t| params(json!({ "query": t.value(), "max_results": 3 })),
    },
    Rule {
        primitive: REPUTATION,
        label: "Reputation Check",
        applies: has_host,
        required: true,
        timeout_ms: 20_000,
        cost_tier: CostTier::Free,
        params: |t| params(json!({ "target": t.value(), "engines": ["virustotal", "safebrowsing"] })),
    },
    Rule {
        primitive: PAGE_CONTENT,
        label: "Page Content Scan",
        applies: is_url,
        required: false,
        timeout_ms: 20_000,
        cost_tier: CostTier::Basic,
        params: |t| params(json!({ "url": t.value() })),
    },
    Rule {
        primitive: NEWS_SEARCH,
        label: "News & Complaint Search",
        applies: wants_news,
        required: false,
        timeout_ms: 25_000,
        cost_tier: CostTier::Basic,
        params: |t| params(json!({ "query": news_query(t), "days_back": 30 })),
    },
];

/// Rule-table planner. Steps are independent of each other so they can all
/// run concurrently.
#[derive(Debug, Clone, Default)]
pub struct StaticPlanner {
    config: PlannerConfig,
}

impl StaticPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn plan_for(
        &self,
        target: &Target,
        available: &BTreeSet<String>,
    ) -> Result<InvestigationPlan, PlanningError> {
        let mut steps = Vec::new();
        for rule in RULES {
            if !(rule.applies)(target, &self.config) || !available.contains(rule.primitive) {
                continue;
            }
            let mut step = Step::new(
                format!("step_{}_{:03}", target.kind(), steps.len() + 1),
                rule.primitive,
            )
            .with_label(rule.label)
            .with_timeout_ms(rule.timeout_ms)
            .with_cost_tier(rule.cost_tier);
            step.parameters = (rule.params)(target);
            if !rule.required {
                step = step.optional();
            }
            steps.push(step);
        }
        if steps.is_empty() {
            return Err(PlanningError::UnsupportedTarget {
                planner: "static".to_string(),
                kind: target.kind().to_string(),
            });
        }
        Ok(InvestigationPlan::new("static", steps))
    }

    /// Minimal plan that always validates: independent, optional steps over
    /// available primitives, preferring whois, web search and reputation.
    pub fn fallback_plan(
        target: &Target,
        available: &BTreeSet<String>,
    ) -> Result<InvestigationPlan, PlanningError> {
        let mut chosen: Vec<&str> = FALLBACK_ORDER
            .iter()
            .copied()
            .filter(|p| available.contains(*p))
            .filter(|p| *p == WEB_SEARCH || target.kind() != TargetKind::Company)
            .collect();
        if chosen.is_empty() {
            chosen = available.iter().map(String::as_str).take(1).collect();
        }
        if chosen.is_empty() {
            return Err(PlanningError::NoPrimitives);
        }

        let steps = chosen
            .into_iter()
            .enumerate()
            .map(|(i, primitive)| {
                let rule = RULES.iter().find(|r| r.primitive == primitive);
                let mut step = Step::new(format!("step_fallback_{:03}", i + 1), primitive)
                    .optional()
                    .with_label(format!("Fallback {primitive}"));
                step.parameters = match rule {
                    Some(rule) => (rule.params)(target),
                    None => params(json!({
                        "target": target.value(),
                        "kind": target.kind().as_str(),
                    })),
                };
                step
            })
            .collect();
        Ok(InvestigationPlan::new("fallback", steps))
    }

    /// Follow-up steps suggested by collected evidence.
    ///
    /// Proposes a 90-day news search when a high-severity indicator was found
    /// (reputation flags, domain younger than 30 days, scam reports) and the
    /// plan has no news search yet. Returns an empty list otherwise.
    pub fn adapt_plan(
        target: &Target,
        plan: &InvestigationPlan,
        ledger: &EvidenceLedger,
        available: &BTreeSet<String>,
    ) -> Vec<Step> {
        if ledger.is_empty()
            || !available.contains(NEWS_SEARCH)
            || plan.steps.iter().any(|s| s.primitive_name == NEWS_SEARCH)
        {
            return Vec::new();
        }
        let indicators = normalize::normalize(ledger);
        let above = |name: &str, min: f64| indicators.get(name).is_some_and(|o| o.value >= min);
        let young = indicators
            .get(DOMAIN_AGE_DAYS)
            .is_some_and(|o| o.value < 30.0);
        let high_risk = young
            || above(REPUTATION_ENGINES_FLAGGED, 1.0)
            || above(SCAM_REPORTS, 1.0);
        if !high_risk {
            return Vec::new();
        }

        let mut step = Step::new(
            format!("step_adaptive_{:03}", plan.steps.len() + 1),
            NEWS_SEARCH,
        )
        .optional()
        .with_label("Deep News Search (High Risk Detected)")
        .with_timeout_ms(30_000)
        .with_cost_tier(CostTier::Basic);
        step.parameters = params(json!({ "query": news_query(target), "days_back": 90 }));
        vec![step]
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    fn name(&self) -> &str {
        "static"
    }

    async fn generate_plan(
        &self,
        target: &Target,
        available: &BTreeSet<String>,
    ) -> Result<InvestigationPlan, PlanningError> {
        self.plan_for(target, available)
    }
}
