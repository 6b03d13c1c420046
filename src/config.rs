use serde::Deserialize;
use std::time::Duration;

/// Service configuration.
///
/// Layered from built-in defaults, an optional `phishscope.toml` next to the
/// binary and `PHISHSCOPE__*` environment variables (double underscore
/// separates nesting, e.g. `PHISHSCOPE__EXTRACTION__MAX_PARALLELISM=8`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    pub extraction: ExtractionConfig,
    pub artifacts: ArtifactConfig,
    pub dataset: DatasetConfig,
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Timeout for each single-shot network lookup (search, traffic, DNS, WHOIS).
    pub request_timeout_secs: u64,
    /// Timeout for the shared target-page fetch.
    pub page_timeout_secs: u64,
    /// Hard deadline for the whole extraction of one URL.
    pub overall_deadline_secs: u64,
    pub max_parallelism: usize,
    pub search_url: String,
    pub traffic_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub scaler_path: String,
    pub model_paths: Vec<String>,
    /// Model used for explanations; the first loaded model when unset.
    pub explain_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub path: String,
    /// Unlabelled review tickets kept in memory; the oldest is dropped past this.
    pub max_pending: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
}

fn default_queue_name() -> String {
    "phishscope:reviews".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            extraction: ExtractionConfig::default(),
            artifacts: ArtifactConfig::default(),
            dataset: DatasetConfig::default(),
            redis: None,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 3,
            page_timeout_secs: 10,
            overall_deadline_secs: 20,
            max_parallelism: 16,
            search_url: "https://www.google.com/search".to_string(),
            traffic_url: "https://www.similarweb.com/website".to_string(),
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            scaler_path: "artifacts/minmax_scaler.json".to_string(),
            model_paths: vec![
                "artifacts/xgbclassifier.json".to_string(),
                "artifacts/gradientboostingclassifier.json".to_string(),
            ],
            explain_model: None,
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: "new_data.csv".to_string(),
            max_pending: 10_000,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("phishscope").required(false))
            .add_source(
                config::Environment::with_prefix("PHISHSCOPE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("artifacts.model_paths")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl ExtractionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn overall_deadline(&self) -> Duration {
        Duration::from_secs(self.overall_deadline_secs)
    }
}
