//! Primitive adapter contract and registry.
//!
//! A primitive is one external evidence source (WHOIS, web search,
//! reputation feeds, ...). The orchestrator only ever talks to it through
//! [`PrimitiveAdapter`]; adapters never see other steps' results except via
//! parameters the orchestrator has already resolved.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::domain::error::{NoirError, Result};
use crate::domain::evidence::{EvidencePayload, SignalValue, Signals};
use crate::domain::execution::{StepError, StepErrorKind};
use crate::domain::plan::Parameters;

/// Failure reported by an adapter. Every failure must be classified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "error_kind", content = "message", rename_all = "snake_case")]
pub enum PrimitiveError {
    /// Worth retrying: network timeout, rate limit, 5xx.
    #[error("transient source error: {0}")]
    Transient(String),

    /// Not worth retrying: malformed input, source reports not found.
    #[error("permanent source error: {0}")]
    Permanent(String),
}

impl PrimitiveError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<PrimitiveError> for StepError {
    fn from(err: PrimitiveError) -> Self {
        match err {
            PrimitiveError::Transient(m) => StepError::new(StepErrorKind::TransientSource, m),
            PrimitiveError::Permanent(m) => StepError::new(StepErrorKind::PermanentSource, m),
        }
    }
}

/// Successful adapter result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveOutput {
    pub payload: EvidencePayload,
    /// Source-reported confidence in `0.0..=1.0`.
    pub confidence: f64,
    #[serde(default)]
    pub signals: Signals,
}

impl PrimitiveOutput {
    pub fn new(payload: EvidencePayload, confidence: f64) -> Self {
        Self {
            payload,
            confidence,
            signals: Signals::new(),
        }
    }

    pub fn with_signal(mut self, name: impl Into<String>, value: impl Into<SignalValue>) -> Self {
        self.signals.insert(name.into(), value.into());
        self
    }
}

/// Cooperative cancellation signal handed to every adapter invocation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// owning signal is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Owner side of a [`CancelToken`].
#[derive(Debug)]
pub struct CancelSignal {
    tx: watch::Sender<bool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Uniform contract for one evidence source.
///
/// Implementations must be safe to re-invoke with the same parameters, since
/// transient failures and timeouts are retried.
#[async_trait]
pub trait PrimitiveAdapter: Send + Sync + 'static {
    /// Name plans use to reference this primitive.
    fn name(&self) -> &str;

    async fn execute(
        &self,
        parameters: &Parameters,
        cancel: CancelToken,
    ) -> std::result::Result<PrimitiveOutput, PrimitiveError>;
}

/// Adapters available to the runtime, keyed by primitive name.
#[derive(Clone, Default)]
pub struct PrimitiveRegistry {
    adapters: HashMap<String, Arc<dyn PrimitiveAdapter>>,
}

impl PrimitiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn PrimitiveAdapter>) -> Result<()> {
        let name = adapter.name().to_string();
        if self.adapters.contains_key(&name) {
            return Err(NoirError::DuplicatePrimitive(name));
        }
        self.adapters.insert(name, adapter);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PrimitiveAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Names of all registered primitives, sorted.
    pub fn available(&self) -> BTreeSet<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for PrimitiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimitiveRegistry")
            .field("primitives", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl PrimitiveAdapter for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(
            &self,
            parameters: &Parameters,
            _cancel: CancelToken,
        ) -> std::result::Result<PrimitiveOutput, PrimitiveError> {
            Ok(PrimitiveOutput::new(
                EvidencePayload::Generic {
                    source: "echo".to_string(),
                    data: serde_json::Value::Object(parameters.clone()),
                },
                1.0,
            ))
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = PrimitiveRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();
        assert!(matches!(
            registry.register(Arc::new(Echo)),
            Err(NoirError::DuplicatePrimitive(name)) if name == "echo"
        ));
        assert_eq!(registry.available().into_iter().collect::<Vec<_>>(), vec!["echo"]);
    }

    #[test]
    fn test_error_classification_maps_to_step_error() {
        let step: StepError = PrimitiveError::transient("429").into();
        assert_eq!(step.kind, StepErrorKind::TransientSource);
        let step: StepError = PrimitiveError::permanent("nxdomain").into();
        assert_eq!(step.kind, StepErrorKind::PermanentSource);
    }

    #[test]
    fn test_error_wire_shape() {
        let json = serde_json::to_value(PrimitiveError::transient("rate limited")).unwrap();
        assert_eq!(json, serde_json::json!({"error_kind": "transient", "message": "rate limited"}));
    }

    #[tokio::test]
    async fn test_cancel_token_observes_signal() {
        let signal = CancelSignal::new();
        let token = signal.token();
        assert!(!token.is_cancelled());
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        signal.cancel();
        waiter.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_adapter_invocation() {
        let mut params = Parameters::new();
        params.insert("q".to_string(), serde_json::json!("x"));
        let out = Echo.execute(&params, CancelToken::never()).await.unwrap();
        assert_eq!(out.payload.kind(), "generic");
    }
}
