//! Configuration models for bedeval.
//!
//! Every tunable is parameterized here and defaulted, so an empty file (or no
//! file at all) yields a runnable configuration. The model registry itself is
//! compiled in, see [`ModelRegistry::builtin`](crate::client::ModelRegistry::builtin).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for bedeval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote endpoint settings
    #[serde(default)]
    pub bedrock: BedrockConfig,

    /// Batch evaluation settings
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Where the questions come from
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Where the result tables go
    #[serde(default)]
    pub output: OutputConfig,
}

/// Remote inference endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BedrockConfig {
    /// API key (can also be set via the env var named by `api_key_env`)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Runtime endpoint, `{region}` is substituted per attempt
    #[serde(default = "default_endpoint_template")]
    pub endpoint_template: String,

    /// Request timeout in seconds (enforced by the transport)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum output tokens per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Pause after a throttled region before trying the next one
    #[serde(default = "default_failover_backoff_ms")]
    pub failover_backoff_ms: u64,
}

fn default_api_key_env() -> String {
    "AWS_BEARER_TOKEN_BEDROCK".to_string()
}

fn default_endpoint_template() -> String {
    "https://bedrock-runtime.{region}.amazonaws.com".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_failover_backoff_ms() -> u64 {
    1000
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            endpoint_template: default_endpoint_template(),
            timeout_secs: default_timeout(),
            max_tokens: default_max_tokens(),
            failover_backoff_ms: default_failover_backoff_ms(),
        }
    }
}

impl BedrockConfig {
    pub fn failover_backoff(&self) -> Duration {
        Duration::from_millis(self.failover_backoff_ms)
    }
}

/// How the model is asked to answer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Deterministic decoding, answer extracted as `{answer, reason}`
    #[default]
    Graded,
    /// Moderate temperature, raw text kept as-is
    FreeText,
}

impl OutputMode {
    /// Sampling temperature for this mode.
    pub fn temperature(self) -> f64 {
        match self {
            Self::Graded => 0.0,
            Self::FreeText => 0.7,
        }
    }
}

/// Batch evaluation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Dataset identifier on the hub
    #[serde(default = "default_dataset_id")]
    pub dataset_id: String,

    /// Dataset split to evaluate
    #[serde(default = "default_split")]
    pub split: String,

    /// Categories to evaluate, one output file each
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Registry model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Output mode
    #[serde(default)]
    pub mode: OutputMode,

    /// Number of concurrent invocations
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Attempts per unit of work before escalating
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Pause between attempts inside one unit of work
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Resubmissions per item before the slot is marked failed
    #[serde(default = "default_max_resubmissions")]
    pub max_resubmissions: u32,

    /// Only evaluate the first N items of each category
    #[serde(default)]
    pub limit: Option<usize>,
}

fn default_dataset_id() -> String {
    "HAERAE-HUB/KMMLU".to_string()
}

fn default_split() -> String {
    "test".to_string()
}

fn default_categories() -> Vec<String> {
    vec!["Accounting".to_string()]
}

fn default_model() -> String {
    "Nova Pro".to_string()
}

fn default_concurrency() -> usize {
    5
}

fn default_retry_budget() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    30
}

fn default_max_resubmissions() -> u32 {
    5
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            dataset_id: default_dataset_id(),
            split: default_split(),
            categories: default_categories(),
            model: default_model(),
            mode: OutputMode::default(),
            concurrency: default_concurrency(),
            retry_budget: default_retry_budget(),
            retry_delay_secs: default_retry_delay_secs(),
            max_resubmissions: default_max_resubmissions(),
            limit: None,
        }
    }
}

/// Dataset source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Hub base URL
    #[serde(default = "default_hub_endpoint")]
    pub hub_endpoint: String,

    /// Read `{category}-{split}.csv` from this directory instead of the hub
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
}

fn default_hub_endpoint() -> String {
    "https://huggingface.co".to_string()
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            hub_endpoint: default_hub_endpoint(),
            local_dir: None,
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving `{category}_results.csv`
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Resolve API key from config or environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.bedrock.api_key {
            return Ok(key.clone());
        }

        std::env::var(&self.bedrock.api_key_env).map_err(|_| ConfigError::MissingApiKey {
            env_var: self.bedrock.api_key_env.clone(),
        })
    }

    /// Reject values the dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let eval = &self.evaluation;
        if eval.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if eval.retry_budget == 0 {
            return Err(ConfigError::Invalid("retry_budget must be at least 1".into()));
        }
        if eval.categories.is_empty() {
            return Err(ConfigError::Invalid("no categories configured".into()));
        }
        if !self.bedrock.endpoint_template.contains("{region}") {
            return Err(ConfigError::Invalid(
                "endpoint_template must contain {region}".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var or bedrock.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.evaluation.concurrency, 5);
        assert_eq!(config.evaluation.retry_budget, 3);
        assert_eq!(config.evaluation.retry_delay_secs, 30);
        assert_eq!(config.evaluation.model, "Nova Pro");
        assert_eq!(config.evaluation.mode, OutputMode::Graded);
        assert_eq!(config.bedrock.failover_backoff(), Duration::from_secs(1));
        assert_eq!(config.output.dir, PathBuf::from("results"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[evaluation]
model = "Claude 3.7 Sonnet"
mode = "free_text"
categories = ["Law", "Math"]
concurrency = 2
limit = 10

[dataset]
local_dir = "/data/kmmlu"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.evaluation.model, "Claude 3.7 Sonnet");
        assert_eq!(config.evaluation.mode, OutputMode::FreeText);
        assert_eq!(config.evaluation.categories, vec!["Law", "Math"]);
        assert_eq!(config.evaluation.concurrency, 2);
        assert_eq!(config.evaluation.limit, Some(10));
        assert_eq!(config.evaluation.retry_budget, 3);
        assert_eq!(
            config.dataset.local_dir,
            Some(PathBuf::from("/data/kmmlu"))
        );
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.evaluation.concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.evaluation.retry_budget = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let mut config = Config::default();
        config.bedrock.api_key = Some("key-123".to_string());
        config.bedrock.api_key_env = "BEDEVAL_TEST_UNSET_VAR".to_string();
        assert_eq!(config.resolve_api_key().unwrap(), "key-123");

        config.bedrock.api_key = None;
        assert!(matches!(
            config.resolve_api_key(),
            Err(ConfigError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn test_output_mode_temperature() {
        assert_eq!(OutputMode::Graded.temperature(), 0.0);
        assert_eq!(OutputMode::FreeText.temperature(), 0.7);
    }
}
