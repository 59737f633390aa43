//! Service configuration.
//!
//! Loaded once at start-up from an optional `config.toml` and `DOCMANAGER__*`
//! environment variables, then handed to each component as `Arc<AppConfig>`.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};
use crate::keywords::MAX_SUM_POOL;

/// Shortest accepted presigned URL secret
const MIN_SIGNING_SECRET_LEN: usize = 16;

/// Which parts of the service this process runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// HTTP API and workers in one process
    #[default]
    All,
    /// HTTP API only
    Api,
    /// Queue workers only
    Worker,
}

impl RunMode {
    pub fn runs_api(&self) -> bool {
        matches!(self, RunMode::All | RunMode::Api)
    }

    pub fn runs_workers(&self) -> bool {
        matches!(self, RunMode::All | RunMode::Worker)
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: RunMode,

    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default = "default_queue")]
    pub queue: QueueConfig,

    #[serde(default = "default_tagging")]
    pub tagging: TaggingConfig,

    #[serde(default = "default_embeddings")]
    pub embeddings: EmbeddingsConfig,

    #[serde(default = "default_ollama")]
    pub ollama: OllamaConfig,

    #[serde(default = "default_limits")]
    pub limits: LimitsConfig,

    #[serde(default = "default_api")]
    pub api: ApiConfig,

    #[serde(default = "default_workers")]
    pub workers: WorkersConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL used in presigned links.
    /// Defaults to `http://{host}:{port}`.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl ServerConfig {
    pub fn public_base_url(&self) -> String {
        self.public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
            .trim_end_matches('/')
            .to_string()
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for the database file and the object store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// HMAC key for presigned URLs. No default: it must be configured.
    #[serde(default)]
    pub signing_secret: String,

    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u64,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("docmanager.db")
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }

    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.presign_expiry_secs)
    }
}

/// Message queue behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a received message stays hidden from other consumers
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Deliveries before a message is dead-lettered
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,

    /// Messages received per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Sleep between polls of an empty queue
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Tag extraction and deduplication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggingConfig {
    /// Cosine similarity at or above which a candidate maps to an existing tag
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Tags extracted per document
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,

    /// Most frequent candidate phrases that get embedded and ranked
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Characters of document text used for keyword extraction
    #[serde(default = "default_tagging_max_input_chars")]
    pub max_input_chars: usize,
}

/// Embeddings configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Characters of document text embedded for retrieval
    #[serde(default = "default_embedding_max_input_chars")]
    pub max_input_chars: usize,
}

/// Ollama LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    /// Model used for summaries and RAG answers
    #[serde(default = "default_model")]
    pub generation_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Document text beyond this many characters is cut from prompts
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

/// Size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_document_size")]
    pub max_document_size_bytes: u64,
}

/// API behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Owner assigned to uploads that don't name one
    #[serde(default = "default_user_id")]
    pub default_user_id: i64,
}

/// Per-worker switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker")]
    pub tagging: WorkerConfig,

    #[serde(default = "default_worker")]
    pub embedding: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Consumer tasks polling the queue
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl AppConfig {
    /// Load configuration from file and env vars
    pub fn load() -> ServiceResult<Self> {
        let config: AppConfig = Config::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("DOCMANAGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to build config: {}", e),
            })?
            .try_deserialize()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to deserialize config: {}", e),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> ServiceResult<()> {
        let threshold = self.tagging.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ServiceError::Config {
                message: format!(
                    "tagging.similarity_threshold must be within [0, 1], got {}",
                    threshold
                ),
            });
        }
        if self.storage.signing_secret.trim().len() < MIN_SIGNING_SECRET_LEN {
            return Err(ServiceError::Config {
                message: format!(
                    "storage.signing_secret must be set to at least {} characters",
                    MIN_SIGNING_SECRET_LEN
                ),
            });
        }
        if self.queue.max_receive_count == 0 {
            return Err(ServiceError::Config {
                message: "queue.max_receive_count must be at least 1".to_string(),
            });
        }
        if self.queue.batch_size == 0 {
            return Err(ServiceError::Config {
                message: "queue.batch_size must be at least 1".to_string(),
            });
        }
        if self.tagging.max_tags == 0 || self.tagging.max_tags > MAX_SUM_POOL {
            return Err(ServiceError::Config {
                message: format!(
                    "tagging.max_tags must be within [1, {}], got {}",
                    MAX_SUM_POOL, self.tagging.max_tags
                ),
            });
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            server: default_server(),
            storage: default_storage(),
            queue: default_queue(),
            tagging: default_tagging(),
            embeddings: default_embeddings(),
            ollama: default_ollama(),
            limits: default_limits(),
            api: default_api(),
            workers: default_workers(),
        }
    }
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
        public_base_url: None,
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
        signing_secret: String::new(),
        presign_expiry_secs: default_presign_expiry_secs(),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_presign_expiry_secs() -> u64 {
    300
}

fn default_queue() -> QueueConfig {
    QueueConfig {
        visibility_timeout_secs: default_visibility_timeout_secs(),
        max_receive_count: default_max_receive_count(),
        batch_size: default_batch_size(),
        poll_interval_ms: default_poll_interval_ms(),
    }
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_max_receive_count() -> u32 {
    5
}

fn default_batch_size() -> usize {
    5
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_tagging() -> TaggingConfig {
    TaggingConfig {
        similarity_threshold: default_similarity_threshold(),
        max_tags: default_max_tags(),
        max_candidates: default_max_candidates(),
        max_input_chars: default_tagging_max_input_chars(),
    }
}

fn default_similarity_threshold() -> f32 {
    0.5
}

fn default_max_tags() -> usize {
    5
}

fn default_max_candidates() -> usize {
    40
}

fn default_tagging_max_input_chars() -> usize {
    20_000
}

fn default_embeddings() -> EmbeddingsConfig {
    EmbeddingsConfig {
        model: default_embedding_model(),
        max_input_chars: default_embedding_max_input_chars(),
    }
}

fn default_embedding_model() -> String {
    "all-minilm".to_string()
}

fn default_embedding_max_input_chars() -> usize {
    8_000
}

fn default_ollama() -> OllamaConfig {
    OllamaConfig {
        base_url: default_ollama_url(),
        generation_model: default_model(),
        temperature: default_temperature(),
        request_timeout_secs: default_request_timeout_secs(),
        max_prompt_chars: default_max_prompt_chars(),
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_prompt_chars() -> usize {
    20_000
}

fn default_limits() -> LimitsConfig {
    LimitsConfig {
        max_document_size_bytes: default_max_document_size(),
    }
}

fn default_max_document_size() -> u64 {
    50 * 1024 * 1024
}

fn default_api() -> ApiConfig {
    ApiConfig {
        default_user_id: default_user_id(),
    }
}

fn default_user_id() -> i64 {
    1
}

fn default_workers() -> WorkersConfig {
    WorkersConfig {
        tagging: default_worker(),
        embedding: default_worker(),
    }
}

fn default_worker() -> WorkerConfig {
    WorkerConfig {
        enabled: true,
        concurrency: default_concurrency(),
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    1
}
