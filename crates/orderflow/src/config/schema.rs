use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::secrets::SecretSource;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub base: BaseConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub post_process: PostProcessConfig,
    #[serde(default)]
    pub tagger: TaggerConfig,
    #[serde(default)]
    pub uploader: UploaderConfig,
}

impl AppConfig {
    pub fn data_dir(&self) -> &std::path::Path {
        &self.base.data_dir
    }

    /// Directory holding order checkpoints.
    pub fn orders_dir(&self) -> PathBuf {
        self.base.data_dir.join("orders")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.base.data_dir.join("outputs")
    }

    pub fn workflow_dir(&self) -> PathBuf {
        self.base.data_dir.join("workflow")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.base.data_dir.join("log")
    }

    pub fn script_path(&self) -> PathBuf {
        self.base.data_dir.join("script").join(&self.base.script_name)
    }

    pub fn watermark_path(&self) -> PathBuf {
        self.post_process
            .watermark_path
            .clone()
            .unwrap_or_else(|| self.base.data_dir.join("watermark").join("default.png"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_script_name")]
    pub script_name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_script_name() -> String {
    "script.json".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            script_name: default_script_name(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// `host:port` of the generation backend.
    #[serde(default = "default_backend_address")]
    pub address: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend_address() -> String {
    "127.0.0.1:7860".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_timeout_secs() -> u64 {
    3600
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: default_backend_address(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Default template file names, one per SFW level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_sfw_name")]
    pub sfw_name: String,
    #[serde(default = "default_nsfw_censored_name")]
    pub nsfw_censored_name: String,
    #[serde(default = "default_nsfw_name")]
    pub nsfw_name: String,
}

fn default_sfw_name() -> String {
    "default_sfw.json".to_string()
}

fn default_nsfw_censored_name() -> String {
    "default_nsfw_censored.json".to_string()
}

fn default_nsfw_name() -> String {
    "default_nsfw.json".to_string()
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            sfw_name: default_sfw_name(),
            nsfw_censored_name: default_nsfw_censored_name(),
            nsfw_name: default_nsfw_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessConfig {
    #[serde(default)]
    pub watermark_path: Option<PathBuf>,
    /// Pixelation factor; a region is shrunk by this much before being scaled back up.
    #[serde(default = "default_mosaic_factor")]
    pub mosaic_factor: u32,
    /// Ordered detectors: the first is primary, the rest are fallbacks.
    #[serde(default)]
    pub detectors: Vec<DetectorConfig>,
}

fn default_mosaic_factor() -> u32 {
    10
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            watermark_path: None,
            mosaic_factor: default_mosaic_factor(),
            detectors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub name: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggerConfig {
    #[serde(default = "default_tagger_provider")]
    pub provider: String,
    #[serde(default = "default_tagger_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_tagger_model")]
    pub model: String,
    /// Language the tags are translated into.
    #[serde(default = "default_tagger_language")]
    pub language: String,
    #[serde(default = "default_tagger_key")]
    pub api_key: SecretSource,
    #[serde(default)]
    pub global_remove_default_tags: Vec<String>,
    #[serde(default)]
    pub global_add_default_tags: Vec<String>,
    #[serde(default)]
    pub front_tags: Vec<String>,
    #[serde(default)]
    pub last_tags: Vec<String>,
    /// Ask the operator to confirm each analysis and to retry failures.
    #[serde(default = "default_true")]
    pub interactive: bool,
}

fn default_tagger_provider() -> String {
    "openai".to_string()
}

fn default_tagger_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_tagger_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_tagger_language() -> String {
    "ja".to_string()
}

fn default_tagger_key() -> SecretSource {
    SecretSource::from_env("ORDERFLOW_TAGGER_KEY")
}

fn default_true() -> bool {
    true
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            provider: default_tagger_provider(),
            endpoint: default_tagger_endpoint(),
            model: default_tagger_model(),
            language: default_tagger_language(),
            api_key: default_tagger_key(),
            global_remove_default_tags: Vec::new(),
            global_add_default_tags: Vec::new(),
            front_tags: Vec::new(),
            last_tags: Vec::new(),
            interactive: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// Website name -> webhook endpoint that performs the actual upload.
    #[serde(default)]
    pub sites: BTreeMap<String, SiteConfig>,
    #[serde(default)]
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub endpoint: String,
    #[serde(default)]
    pub token: SecretSource,
}
