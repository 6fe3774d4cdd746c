//! Domain-level error taxonomy for Noir.

use serde::{Deserialize, Serialize};

/// Errors produced while normalizing user input into a [`crate::domain::Target`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("target value must not be empty")]
    Empty,

    #[error("unknown target kind: {0} (expected domain, company or url)")]
    UnknownKind(String),

    #[error("invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("unsupported url scheme: {0} (expected http or https)")]
    UnsupportedScheme(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("target value too long ({len} > {max} chars)")]
    TooLong { len: usize, max: usize },
}

/// Errors raised when a plan cannot be produced or fails validation.
///
/// Any of these stops an investigation before a single step executes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum PlanningError {
    #[error("plan contains no steps")]
    EmptyPlan,

    #[error("step at position {position} has an empty step_id")]
    EmptyStepId { position: usize },

    #[error("duplicate step_id in plan: {step_id}")]
    DuplicateStep { step_id: String },

    #[error("step {step_id} references unknown primitive '{primitive}'")]
    UnknownPrimitive { step_id: String, primitive: String },

    #[error("step {step_id} has a zero timeout")]
    ZeroTimeout { step_id: String },

    #[error("step {step_id} depends on itself")]
    SelfDependency { step_id: String },

    #[error("step {step_id} depends on missing step {missing}")]
    MissingDependency { step_id: String, missing: String },

    #[error("step {step_id} reads output of {referenced} without declaring it in depends_on")]
    UndeclaredReference { step_id: String, referenced: String },

    #[error("dependency cycle detected involving steps: {steps:?}")]
    DependencyCycle { steps: Vec<String> },

    #[error("planner '{planner}' does not support target kind {kind}")]
    UnsupportedTarget { planner: String, kind: String },

    #[error("no primitives available to build a plan")]
    NoPrimitives,

    #[error("planning service error: {0}")]
    Service(String),

    #[error("malformed planning response: {0}")]
    MalformedResponse(String),

    #[error("planner timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Errors raised by the append-only evidence ledger.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("step {step_id} already produced evidence record {existing}")]
    DuplicateStep { step_id: String, existing: String },

    #[error("step {step_id} reported confidence {confidence} outside 0.0..=1.0")]
    InvalidConfidence { step_id: String, confidence: f64 },

    #[error("ledger serialization failed: {0}")]
    Serialization(String),
}

/// Noir engine errors.
#[derive(Debug, thiserror::Error)]
pub enum NoirError {
    #[error("invalid target: {0}")]
    Target(#[from] TargetError),

    #[error("planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("aggregation error: {0}")]
    Aggregation(#[from] crate::risk::AggregationError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] noir_state::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("duplicate primitive registration: {0}")]
    DuplicatePrimitive(String),

    #[error("investigation not found: {0}")]
    InvestigationNotFound(String),

    #[error("investigation {investigation_id} is not terminal yet (status: {status})")]
    NotTerminal {
        investigation_id: String,
        status: String,
    },

    #[error("investigation {0} finished without a risk assessment")]
    NoAssessment(String),

    #[error("investigation {0} already finished")]
    AlreadyFinished(String),

    #[error("scenario error: {0}")]
    Scenario(String),
}

/// Result type for Noir engine operations.
pub type Result<T> = std::result::Result<T, NoirError>;
