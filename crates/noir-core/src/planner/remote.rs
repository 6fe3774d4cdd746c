//! Planner backed by an external planning service.
//!
//! The service is a black box that may be non-deterministic. Its response is
//! parsed strictly here; anything unparsable becomes
//! [`PlanningError::MalformedResponse`] and structural validation happens
//! later in the resolver.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::PlanningError;
use crate::domain::plan::{InvestigationPlan, Parameters, Step};
use crate::domain::target::Target;
use crate::planner::Planner;

/// Request body sent to the planning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningRequest {
    pub target_kind: String,
    pub target_value: String,
    pub available_primitives: Vec<String>,
}

impl PlanningRequest {
    pub fn new(target: &Target, available: &BTreeSet<String>) -> Self {
        Self {
            target_kind: target.kind().to_string(),
            target_value: target.value().to_string(),
            available_primitives: available.iter().cloned().collect(),
        }
    }
}

/// Raw transport to a planning service. Returns the unparsed JSON body.
#[async_trait]
pub trait PlanningService: Send + Sync {
    fn name(&self) -> &str;

    async fn request_plan(&self, request: &PlanningRequest) -> Result<Value, PlanningError>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireStep {
    step_id: String,
    primitive_name: String,
    #[serde(default)]
    parameters: Parameters,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    required: Option<bool>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

impl From<WireStep> for Step {
    fn from(wire: WireStep) -> Self {
        let mut step = Step::new(wire.step_id, wire.primitive_name).depends_on(wire.depends_on);
        step.parameters = wire.parameters;
        step.required = wire.required.unwrap_or(true);
        step.label = wire.label;
        step.timeout_ms = wire.timeout_ms;
        step
    }
}

/// Accepts either a bare step array or an object with a `steps` array.
pub fn parse_plan_response(strategy: &str, body: Value) -> Result<InvestigationPlan, PlanningError> {
    let steps = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("steps") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(PlanningError::MalformedResponse(
                    "expected a `steps` array".to_string(),
                ))
            }
        },
        other => {
            return Err(PlanningError::MalformedResponse(format!(
                "expected an array of steps, got {}",
                json_type(&other)
            )))
        }
    };
    let steps = steps
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<WireStep>(item)
                .map(Step::from)
                .map_err(|e| PlanningError::MalformedResponse(format!("step {i}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(InvestigationPlan::new(strategy, steps))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// [`Planner`] that delegates to a [`PlanningService`].
pub struct ServicePlanner {
    service: Arc<dyn PlanningService>,
}

impl ServicePlanner {
    pub fn new(service: Arc<dyn PlanningService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Planner for ServicePlanner {
    fn name(&self) -> &str {
        self.service.name()
    }

    async fn generate_plan(
        &self,
        target: &Target,
        available: &BTreeSet<String>,
    ) -> Result<InvestigationPlan, PlanningError> {
        let request = PlanningRequest::new(target, available);
        let body = self.service.request_plan(&request).await?;
        parse_plan_response(self.service.name(), body)
    }
}

/// JSON-over-HTTP planning service: `POST {endpoint}` with a
/// [`PlanningRequest`] body.
pub struct HttpPlanningService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPlanningService {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, PlanningError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("noir-core/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| PlanningError::Service(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl PlanningService for HttpPlanningService {
    fn name(&self) -> &str {
        "remote"
    }

    async fn request_plan(&self, request: &PlanningRequest) -> Result<Value, PlanningError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| PlanningError::Service(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PlanningError::Service(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlanningError::Service(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| PlanningError::MalformedResponse(e.to_string()))
    }
}
