//! # Pipeline Configuration
//!
//! Resolution order: defaults, then `.reqflow/config.json`, then environment
//! (after loading `.env` files). Values that a stage needs but nobody set are
//! reported by that stage as configuration errors, not at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{LlmProvider, ModelConfig};
use crate::progress::GatewaySettings;

pub const CONFIG_DIR: &str = ".reqflow";
const CONFIG_FILE: &str = "config.json";

/// Per-job size and time limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Limits {
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub model_timeout_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_file_bytes: 25 * 1024 * 1024,
            model_timeout_secs: 120,
        }
    }
}

/// Progress store and streaming settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProgressConfig {
    pub gc_grace_secs: u64,
    pub gc_period_secs: u64,
    pub keep_alive_secs: u64,
    pub close_grace_ms: u64,
    pub subscriber_buffer: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            gc_grace_secs: 600,
            gc_period_secs: 60,
            keep_alive_secs: 30,
            close_grace_ms: 1000,
            subscriber_buffer: 256,
        }
    }
}

impl ProgressConfig {
    pub fn gateway(&self) -> GatewaySettings {
        GatewaySettings {
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            close_grace: Duration::from_millis(self.close_grace_ms),
        }
    }
}

/// Backpressure for requirement → test-case generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TestCaseConfig {
    pub concurrency: usize,
    pub batch_pause_ms: u64,
}

impl Default for TestCaseConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            batch_pause_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub model: ModelConfig,
    /// Root directory for uploaded blobs. Required by the upload stage.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub test_cases: TestCaseConfig,
}

fn default_db_path() -> PathBuf {
    Path::new(CONFIG_DIR).join("reqflow.db")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            storage_dir: None,
            db_path: default_db_path(),
            limits: Limits::default(),
            progress: ProgressConfig::default(),
            test_cases: TestCaseConfig::default(),
        }
    }
}

/// Fields a user may set in `.reqflow/config.json`; unset fields keep defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<LlmProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_cases: Option<TestCaseConfig>,
}

impl PersistedConfig {
    /// Read a persisted config; a missing or unreadable file yields defaults
    pub async fn load_from(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "Ignoring invalid config file: {}", e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from `.reqflow/config.json` and the environment
    pub async fn load() -> PipelineResult<Self> {
        let _ = dotenvy::dotenv();
        let _ = dotenvy::from_path(Path::new(CONFIG_DIR).join(".env"));

        let persisted = PersistedConfig::load_from(&Path::new(CONFIG_DIR).join(CONFIG_FILE)).await;
        let mut config = Self::default();
        config.merge(persisted);
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply fields set in a persisted config
    pub fn merge(&mut self, other: PersistedConfig) {
        if let Some(provider) = other.provider {
            if provider != self.model.provider && other.model.is_none() {
                self.model.model = provider.default_model().to_string();
            }
            self.model.provider = provider;
        }
        if let Some(model) = other.model {
            self.model.model = model;
        }
        if other.base_url.is_some() {
            self.model.base_url = other.base_url;
        }
        if other.api_key_env.is_some() {
            self.model.api_key_env = other.api_key_env;
        }
        if other.storage_dir.is_some() {
            self.storage_dir = other.storage_dir;
        }
        if let Some(db_path) = other.db_path {
            self.db_path = db_path;
        }
        if let Some(limits) = other.limits {
            self.limits = limits;
        }
        if let Some(progress) = other.progress {
            self.progress = progress;
        }
        if let Some(test_cases) = other.test_cases {
            self.test_cases = test_cases;
        }
    }

    /// Apply `REQFLOW_*` overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> PipelineResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = get("REQFLOW_PROVIDER") {
            let provider: LlmProvider = provider.parse()?;
            if provider != self.model.provider {
                self.model.model = provider.default_model().to_string();
            }
            self.model.provider = provider;
        }
        if let Some(model) = get("REQFLOW_MODEL") {
            self.model.model = model;
        }
        if let Some(url) = get("REQFLOW_BASE_URL") {
            self.model.base_url = Some(url);
        }
        if let Some(var) = get("REQFLOW_API_KEY_ENV") {
            self.model.api_key_env = Some(var);
        }
        if let Some(dir) = get("REQFLOW_STORAGE_DIR") {
            self.storage_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = get("REQFLOW_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(v) = get("REQFLOW_MAX_FILES") {
            self.limits.max_files = parse_number("REQFLOW_MAX_FILES", &v)?;
        }
        if let Some(v) = get("REQFLOW_MAX_FILE_BYTES") {
            self.limits.max_file_bytes = parse_number("REQFLOW_MAX_FILE_BYTES", &v)?;
        }
        if let Some(v) = get("REQFLOW_MODEL_TIMEOUT_SECS") {
            self.limits.model_timeout_secs = parse_number("REQFLOW_MODEL_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.model_timeout_secs)
    }

    /// Storage root, or the configuration error the upload stage reports
    pub fn require_storage_dir(&self) -> PipelineResult<&Path> {
        self.storage_dir.as_deref().ok_or_else(|| {
            PipelineError::Configuration(
                "No blob storage location configured (set REQFLOW_STORAGE_DIR)".into(),
            )
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> PipelineResult<T> {
    value.trim().parse().map_err(|_| {
        PipelineError::Configuration(format!("{} must be a number, got '{}'", key, value))
    })
}
