//! Engine configuration.
//!
//! Precedence, lowest first: built-in defaults, a TOML file, then the
//! environment:
//! - `NOIR_MAX_CONCURRENCY` (max concurrently running steps per investigation)
//! - `NOIR_STEP_TIMEOUT_MS` (per-attempt step timeout)
//! - `NOIR_MAX_RETRIES` (retries after the first attempt)
//! - `NOIR_WORKER_POOL_SIZE` (capacity shared by all investigations)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Scheduling, timeout and retry controls for the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Max simultaneously running steps within one investigation.
    pub max_concurrency: usize,
    /// Per-attempt timeout unless the step overrides it.
    pub step_timeout_ms: u64,
    /// Retries after the first attempt for transient failures and timeouts.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            step_timeout_ms: 30_000,
            max_retries: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based): base doubled per retry, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }

    pub fn step_timeout(&self, override_ms: Option<u64>) -> Duration {
        Duration::from_millis(override_ms.unwrap_or(self.step_timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Budget for the primary planner before falling back.
    pub planning_timeout_ms: u64,
    /// Static planner adds a news search for non-company targets too.
    pub include_news: bool,
    /// Run a follow-up round of adapted steps after high-severity findings.
    pub adaptive: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            planning_timeout_ms: 10_000,
            include_news: false,
            adaptive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub analysis_timeout_ms: u64,
    /// Scores at or above this are `suspicious`.
    pub suspicious_threshold: f64,
    /// Scores at or above this are `scam`.
    pub scam_threshold: f64,
    /// Largest change the analysis service may apply to the heuristic score.
    pub max_analysis_adjustment: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            analysis_timeout_ms: 15_000,
            suspicious_threshold: 40.0,
            scam_threshold: 70.0,
            max_analysis_adjustment: 25.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Per-listener buffer; overflow is reported to the listener as a gap.
    pub listener_buffer: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            listener_buffer: 256,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Running steps across all investigations.
    pub worker_pool_size: usize,
    pub orchestrator: OrchestratorConfig,
    pub planner: PlannerConfig,
    pub risk: RiskConfig,
    pub trace: TraceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 16,
            orchestrator: OrchestratorConfig::default(),
            planner: PlannerConfig::default(),
            risk: RiskConfig::default(),
            trace: TraceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `NOIR_*` overrides using `lookup` to read variables.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env(&lookup, "NOIR_MAX_CONCURRENCY")? {
            self.orchestrator.max_concurrency = v;
        }
        if let Some(v) = parse_env(&lookup, "NOIR_STEP_TIMEOUT_MS")? {
            self.orchestrator.step_timeout_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "NOIR_MAX_RETRIES")? {
            self.orchestrator.max_retries = v;
        }
        if let Some(v) = parse_env(&lookup, "NOIR_WORKER_POOL_SIZE")? {
            self.worker_pool_size = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid("worker_pool_size must be > 0".into()));
        }
        if self.orchestrator.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be > 0".into()));
        }
        if self.orchestrator.step_timeout_ms == 0 {
            return Err(ConfigError::Invalid("step_timeout_ms must be > 0".into()));
        }
        if self.trace.listener_buffer == 0 {
            return Err(ConfigError::Invalid("listener_buffer must be > 0".into()));
        }
        let risk = &self.risk;
        if !(0.0 < risk.suspicious_threshold
            && risk.suspicious_threshold < risk.scam_threshold
            && risk.scam_threshold <= 100.0)
        {
            return Err(ConfigError::Invalid(format!(
                "label thresholds must satisfy 0 < suspicious ({}) < scam ({}) <= 100",
                risk.suspicious_threshold, risk.scam_threshold
            )));
        }
        if !(risk.max_analysis_adjustment >= 0.0 && risk.max_analysis_adjustment <= 100.0) {
            return Err(ConfigError::Invalid(
                "max_analysis_adjustment must be within 0..=100".into(),
            ));
        }
        Ok(())
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.orchestrator.max_concurrency = max;
        self
    }

    pub fn with_step_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.orchestrator.step_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.orchestrator.max_retries = retries;
        self
    }

    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.orchestrator.backoff_base_ms = base_ms;
        self.orchestrator.backoff_max_ms = max_ms;
        self
    }

    pub fn with_planning_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.planner.planning_timeout_ms = timeout_ms;
        self
    }

    pub fn with_adaptive_planning(mut self, adaptive: bool) -> Self {
        self.planner.adaptive = adaptive;
        self
    }

    pub fn with_include_news(mut self, include: bool) -> Self {
        self.planner.include_news = include;
        self
    }

    pub fn with_analysis_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.risk.analysis_timeout_ms = timeout_ms;
        self
    }

    pub fn with_listener_buffer(mut self, size: usize) -> Self {
        self.trace.listener_buffer = size;
        self
    }
}

fn parse_env<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value: raw,
            }),
    }
}
