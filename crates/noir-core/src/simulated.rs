//! Scripted primitive adapters for tests, demos and offline runs.
//!
//! A [`ScriptedAdapter`] replays a fixed list of responses, one per call; the
//! last response repeats once the script is exhausted. A [`Scenario`] maps
//! primitive names to scripts and loads from JSON:
//!
//! ```json
//! {
//!   "primitives": {
//!     "whois": [
//!       { "outcome": "failure", "error": { "error_kind": "transient", "message": "rate limited" } },
//!       { "outcome": "success", "delay_ms": 20, "output": { "payload": { "primitive": "whois", "domain": "example.com" }, "confidence": 0.9 } }
//!     ]
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::{NoirError, Result};
use crate::domain::evidence::EvidencePayload;
use crate::domain::plan::Parameters;
use crate::primitive::{
    CancelToken, PrimitiveAdapter, PrimitiveError, PrimitiveOutput, PrimitiveRegistry,
};

/// One scripted call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScriptedResponse {
    Success {
        output: PrimitiveOutput,
        #[serde(default)]
        delay_ms: u64,
    },
    Failure {
        error: PrimitiveError,
        #[serde(default)]
        delay_ms: u64,
    },
}

impl ScriptedResponse {
    fn delay(&self) -> Duration {
        match self {
            Self::Success { delay_ms, .. } | Self::Failure { delay_ms, .. } => {
                Duration::from_millis(*delay_ms)
            }
        }
    }

    fn set_delay(&mut self, delay: Duration) {
        match self {
            Self::Success { delay_ms, .. } | Self::Failure { delay_ms, .. } => {
                *delay_ms = delay.as_millis() as u64
            }
        }
    }
}

pub struct ScriptedAdapter {
    name: String,
    script: Vec<ScriptedResponse>,
    calls: AtomicU32,
    seen: Mutex<Vec<Parameters>>,
}

impl ScriptedAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_script(name, Vec::new())
    }

    pub fn from_script(name: impl Into<String>, script: Vec<ScriptedResponse>) -> Self {
        Self {
            name: name.into(),
            script,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn succeed(self, payload: EvidencePayload, confidence: f64) -> Self {
        self.succeed_with(PrimitiveOutput::new(payload, confidence))
    }

    pub fn succeed_with(mut self, output: PrimitiveOutput) -> Self {
        self.script.push(ScriptedResponse::Success {
            output,
            delay_ms: 0,
        });
        self
    }

    pub fn fail(mut self, error: PrimitiveError) -> Self {
        self.script.push(ScriptedResponse::Failure { error, delay_ms: 0 });
        self
    }

    /// Delay the most recently added response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        if let Some(last) = self.script.last_mut() {
            last.set_delay(delay);
        }
        self
    }

    /// Number of times `execute` was invoked.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Parameters of every invocation, in call order.
    pub fn seen_parameters(&self) -> Vec<Parameters> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl std::fmt::Debug for ScriptedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedAdapter")
            .field("name", &self.name)
            .field("script_len", &self.script.len())
            .field("calls", &self.calls())
            .finish()
    }
}

#[async_trait]
impl PrimitiveAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        parameters: &Parameters,
        cancel: CancelToken,
    ) -> std::result::Result<PrimitiveOutput, PrimitiveError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(parameters.clone());
        }
        let Some(response) = self.script.get(call).or_else(|| self.script.last()) else {
            return Err(PrimitiveError::permanent(format!(
                "{} has no scripted response",
                self.name
            )));
        };

        let delay = response.delay();
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(PrimitiveError::transient("cancelled")),
            }
        }
        match response {
            ScriptedResponse::Success { output, .. } => Ok(output.clone()),
            ScriptedResponse::Failure { error, .. } => Err(error.clone()),
        }
    }
}

/// Named scripts for a whole registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub primitives: BTreeMap<String, Vec<ScriptedResponse>>,
}

impl Scenario {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| NoirError::Scenario(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// One [`ScriptedAdapter`] per scripted primitive.
    pub fn registry(&self) -> Result<PrimitiveRegistry> {
        let mut registry = PrimitiveRegistry::new();
        for (name, script) in &self.primitives {
            registry.register(Arc::new(ScriptedAdapter::from_script(
                name.clone(),
                script.clone(),
            )))?;
        }
        Ok(registry)
    }
}
