use super::{ConfigError, LogFormat, LogLevel};
use crate::annotator::HttpAnnotatorConfig;
use crate::dispatcher::DispatchSettings;
use crate::domain::CategorySchema;
use crate::reliability::RetryPolicy;
use crate::source::SourceFields;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_ENDPOINT: &str =
    "https://commentanalyzer.googleapis.com/v1alpha1/comments:analyze";
const DEFAULT_CATEGORIES: [&str; 6] = [
    "TOXICITY",
    "SEVERE_TOXICITY",
    "IDENTITY_ATTACK",
    "INSULT",
    "PROFANITY",
    "THREAT",
];

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Input file, one JSON object per line
    #[arg(long, env = "ANNOTATOR_INPUT")]
    pub input: Option<PathBuf>,

    /// Field holding the record id
    #[arg(long, env = "ID_FIELD", default_value = "comment_id")]
    pub id_field: String,

    /// Field holding the text to annotate
    #[arg(long, env = "TEXT_FIELD", default_value = "comment_text")]
    pub text_field: String,

    /// Directory holding the per-worker result partitions
    #[arg(long, env = "RESULTS_DIR", default_value = "results")]
    pub results_dir: PathBuf,

    /// Write one consolidated JSONL file here once the run ends
    #[arg(long, env = "OUTPUT_PATH")]
    pub output: Option<PathBuf>,

    /// Maximum number of concurrent workers
    #[arg(long, env = "WORKERS", default_value = "10")]
    pub workers: usize,

    /// Number of shards per round (defaults to the worker count)
    #[arg(long, env = "SHARDS")]
    pub shards: Option<usize>,

    /// Round budget; 0 keeps going until nothing retryable remains
    #[arg(long, env = "MAX_ROUNDS", default_value = "5")]
    pub max_rounds: u32,

    /// Start from the ids still missing in the results directory
    #[arg(long, env = "RESUME")]
    pub resume: bool,

    /// Minimum interval between two requests of the same worker, in milliseconds
    #[arg(long, env = "PACING_MS", default_value = "400")]
    pub pacing_ms: u64,

    /// Attempts per record within a round
    #[arg(long, env = "MAX_ATTEMPTS", default_value = "10")]
    pub max_attempts: u32,

    /// Backoff base in milliseconds
    #[arg(long, env = "RETRY_BASE_MS", default_value = "1000")]
    pub retry_base_ms: u64,

    /// Backoff cap in milliseconds
    #[arg(long, env = "RETRY_MAX_MS", default_value = "20000")]
    pub retry_max_ms: u64,

    /// Per-attempt timeout in milliseconds
    #[arg(long, env = "ATTEMPT_TIMEOUT_MS", default_value = "30000")]
    pub attempt_timeout_ms: u64,

    /// Randomize backoff delays by a factor in [0.5, 1.5)
    #[arg(long, env = "RETRY_JITTER")]
    pub retry_jitter: bool,

    /// Annotator endpoint URL
    #[arg(long, env = "ANNOTATOR_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// API key (takes precedence over --api-key-path)
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// File containing the API key
    #[arg(long, env = "API_KEY_PATH")]
    pub api_key_path: Option<PathBuf>,

    /// Score categories to request, comma separated
    #[arg(
        long,
        env = "CATEGORIES",
        value_delimiter = ',',
        default_value = "TOXICITY,SEVERE_TOXICITY,IDENTITY_ATTACK,INSULT,PROFANITY,THREAT"
    )]
    pub categories: Vec<String>,

    /// Language hints sent with every request, comma separated
    #[arg(long, env = "LANGUAGES", value_delimiter = ',', default_value = "pt")]
    pub languages: Vec<String>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub pacing: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub retry_policy: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: None,
            id_field: "comment_id".to_string(),
            text_field: "comment_text".to_string(),
            results_dir: PathBuf::from("results"),
            output: None,
            workers: 10,
            shards: None,
            max_rounds: 5,
            resume: false,
            pacing_ms: 400,
            max_attempts: 10,
            retry_base_ms: 1000,
            retry_max_ms: 20_000,
            attempt_timeout_ms: 30_000,
            retry_jitter: false,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            api_key_path: None,
            categories: DEFAULT_CATEGORIES.iter().map(ToString::to_string).collect(),
            languages: vec!["pt".to_string()],
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            config_file: None,
            pacing: Duration::from_millis(400),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Parse CLI arguments (and their environment fallbacks). When a config
    /// file is named, it replaces the command line entirely.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        if let Some(path) = config.config_file.clone() {
            return Self::from_file(path);
        }
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&content)?;
        config.config_file = Some(path.as_ref().to_path_buf());
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.pacing = Duration::from_millis(self.pacing_ms);
        self.retry_policy = RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            jitter: self.retry_jitter,
        };

        for list in [&mut self.categories, &mut self.languages] {
            list.iter_mut().for_each(|item| *item = item.trim().to_string());
            list.retain(|item| !item.is_empty());
        }

        Ok(())
    }

    pub fn shard_count(&self) -> usize {
        self.shards.unwrap_or(self.workers)
    }

    /// `None` when the round budget is unbounded.
    pub fn round_limit(&self) -> Option<u32> {
        (self.max_rounds > 0).then_some(self.max_rounds)
    }

    pub fn input_path(&self) -> Result<&Path, ConfigError> {
        self.input
            .as_deref()
            .ok_or_else(|| ConfigError::InvalidConfig("Input file not configured".to_string()))
    }

    pub fn schema(&self) -> CategorySchema {
        CategorySchema::new(self.categories.iter().cloned())
    }

    pub fn source_fields(&self) -> SourceFields {
        SourceFields {
            id_field: self.id_field.clone(),
            text_field: self.text_field.clone(),
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            workers: self.workers,
            shards: self.shard_count(),
            policy: self.retry_policy.clone(),
            pacing: self.pacing,
            schema: self.schema(),
        }
    }

    /// Resolve the API key: the inline value wins over the key file.
    pub fn load_api_key(&self) -> Result<Option<String>, ConfigError> {
        if let Some(key) = &self.api_key {
            return Ok(Some(key.trim().to_string()));
        }
        match &self.api_key_path {
            Some(path) => {
                let key = std::fs::read_to_string(path)?;
                let key = key.trim();
                if key.is_empty() {
                    return Err(ConfigError::InvalidConfig(format!(
                        "API key file {} is empty",
                        path.display()
                    )));
                }
                Ok(Some(key.to_string()))
            }
            None => Ok(None),
        }
    }

    pub fn annotator_config(&self) -> Result<HttpAnnotatorConfig, ConfigError> {
        let endpoint = Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {}", self.endpoint, e))
        })?;

        Ok(HttpAnnotatorConfig {
            endpoint,
            api_key: self.load_api_key()?,
            categories: self.schema(),
            languages: self.languages.clone(),
            request_timeout: self.retry_policy.attempt_timeout,
            do_not_store: true,
        })
    }
}
