//! Investigation plans: a DAG of steps bound to primitives.
//!
//! Plans may come from an untrusted external planner, so nothing schedules a
//! plan until [`InvestigationPlan::validate`] has accepted it. Validation uses
//! Kahn's algorithm over declaration order, so the reported cycle members are
//! deterministic.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::error::PlanningError;

/// Opaque parameter mapping handed to a primitive adapter.
pub type Parameters = Map<String, Value>;

/// Expected acquisition cost of a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    #[default]
    Free,
    Basic,
    Premium,
}

fn default_required() -> bool {
    true
}

/// One node of the plan DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the plan.
    pub step_id: String,
    /// Which primitive adapter to invoke.
    pub primitive_name: String,
    #[serde(default)]
    pub parameters: Parameters,
    /// Steps that must reach a terminal state first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// A terminal failure of a required step degrades the investigation and
    /// skips every transitive dependent.
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Per-attempt timeout override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub cost_tier: CostTier,
}

impl Step {
    /// A required step with no parameters and no dependencies.
    pub fn new(step_id: impl Into<String>, primitive_name: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            primitive_name: primitive_name.into(),
            parameters: Parameters::new(),
            depends_on: Vec::new(),
            required: true,
            label: None,
            timeout_ms: None,
            cost_tier: CostTier::Free,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn depends_on<I, S>(mut self, step_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in step_ids {
            let id = id.into();
            if !self.depends_on.contains(&id) {
                self.depends_on.push(id);
            }
        }
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_cost_tier(mut self, tier: CostTier) -> Self {
        self.cost_tier = tier;
        self
    }

    /// Every `{{steps...}}` reference found in the parameters.
    pub fn parameter_refs(&self) -> Vec<ParamRef> {
        let mut out = Vec::new();
        for value in self.parameters.values() {
            collect_refs(value, &mut out);
        }
        out
    }
}

/// Ordered list of steps forming a DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationPlan {
    /// Name of the strategy that produced the plan (e.g. `static`, `fallback`).
    pub strategy: String,
    pub steps: Vec<Step>,
}

impl InvestigationPlan {
    pub fn new(strategy: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            strategy: strategy.into(),
            steps,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn primitive_names(&self) -> BTreeSet<&str> {
        self.steps.iter().map(|s| s.primitive_name.as_str()).collect()
    }

    /// Check the plan against the primitives the runtime can execute.
    ///
    /// Rejects: empty plans, empty or duplicate step ids, unknown primitives,
    /// zero step timeouts, self or missing dependencies, parameter references
    /// to undeclared dependencies, and dependency cycles.
    pub fn validate(&self, available: &BTreeSet<String>) -> Result<(), PlanningError> {
        if self.steps.is_empty() {
            return Err(PlanningError::EmptyPlan);
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (position, step) in self.steps.iter().enumerate() {
            if step.step_id.trim().is_empty() {
                return Err(PlanningError::EmptyStepId { position });
            }
            if !seen.insert(step.step_id.as_str()) {
                return Err(PlanningError::DuplicateStep {
                    step_id: step.step_id.clone(),
                });
            }
        }

        for step in &self.steps {
            if !available.contains(&step.primitive_name) {
                return Err(PlanningError::UnknownPrimitive {
                    step_id: step.step_id.clone(),
                    primitive: step.primitive_name.clone(),
                });
            }
            if step.timeout_ms == Some(0) {
                return Err(PlanningError::ZeroTimeout {
                    step_id: step.step_id.clone(),
                });
            }
            for dep in &step.depends_on {
                if dep == &step.step_id {
                    return Err(PlanningError::SelfDependency {
                        step_id: step.step_id.clone(),
                    });
                }
                if !seen.contains(dep.as_str()) {
                    return Err(PlanningError::MissingDependency {
                        step_id: step.step_id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
            for reference in step.parameter_refs() {
                if !step.depends_on.contains(&reference.step_id) {
                    return Err(PlanningError::UndeclaredReference {
                        step_id: step.step_id.clone(),
                        referenced: reference.step_id,
                    });
                }
            }
        }

        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<(), PlanningError> {
        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.step_id.as_str(), i))
            .collect();

        let mut indegree = vec![0usize; self.steps.len()];
        let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
        for (i, step) in self.steps.iter().enumerate() {
            let deps: HashSet<&str> = step.depends_on.iter().map(String::as_str).collect();
            for dep in deps {
                if let Some(&d) = index.get(dep) {
                    downstream[d].push(i);
                    indegree[i] += 1;
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..self.steps.len())
            .filter(|&i| indegree[i] == 0)
            .collect();
        let mut visited = 0usize;
        while let Some(node) = queue.pop_front() {
            visited += 1;
            for &next in &downstream[node] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if visited == self.steps.len() {
            Ok(())
        } else {
            let steps = self
                .steps
                .iter()
                .enumerate()
                .filter(|(i, _)| indegree[*i] > 0)
                .map(|(_, s)| s.step_id.clone())
                .collect();
            Err(PlanningError::DependencyCycle { steps })
        }
    }

    /// Steps that depend, directly or transitively, on `step_id`.
    pub fn transitive_dependents(&self, step_id: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut frontier = vec![step_id.to_string()];
        while let Some(current) = frontier.pop() {
            for step in &self.steps {
                if step.depends_on.contains(&current) && out.insert(step.step_id.clone()) {
                    frontier.push(step.step_id.clone());
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Cross-step parameter references
// ---------------------------------------------------------------------------

/// Which part of a dependency's evidence record a reference reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefSource {
    Signals,
    Payload,
}

/// A parameter value of the exact form `{{steps.<step_id>.signals.<name>}}`
/// or `{{steps.<step_id>.payload.<field>}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamRef {
    pub step_id: String,
    pub source: RefSource,
    pub name: String,
}

impl ParamRef {
    pub fn parse(text: &str) -> Option<Self> {
        let inner = text.trim().strip_prefix("{{")?.strip_suffix("}}")?.trim();
        let mut parts = inner.split('.');
        let (root, step_id, source, name) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if root != "steps" || parts.next().is_some() || step_id.is_empty() || name.is_empty() {
            return None;
        }
        let source = match source {
            "signals" => RefSource::Signals,
            "payload" => RefSource::Payload,
            _ => return None,
        };
        Some(Self {
            step_id: step_id.to_string(),
            source,
            name: name.to_string(),
        })
    }
}

fn collect_refs(value: &Value, out: &mut Vec<ParamRef>) {
    match value {
        Value::String(s) => {
            if let Some(r) = ParamRef::parse(s) {
                out.push(r);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}
