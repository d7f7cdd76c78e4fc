//! Configuration management for DragonGPT services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Chat / extraction model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Query and document embedding configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Web search fallback configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Page fetch configuration
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Context augmentation limits
    #[serde(default)]
    pub augmentation: AugmentationConfig,

    /// Prompt file overrides
    #[serde(default)]
    pub prompts: PromptsConfig,

    /// Course scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Timeout for non-streaming requests in seconds
    pub request_timeout_secs: u64,

    /// Origins allowed by CORS
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key for the chat completions service
    pub api_key: Option<String>,

    /// API base URL (OpenAI compatible)
    pub base_url: String,

    /// Model used for answers, sufficiency checks and summaries
    pub chat_model: String,

    /// Model used for structured extraction
    pub extraction_model: String,

    /// Sampling temperature for extraction
    pub extraction_temperature: f32,

    /// Connect timeout in seconds. Completions themselves are not bounded.
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (OpenAI compatible `/embeddings` endpoint)
    pub api_base: Option<String>,

    /// Model to use
    pub model: String,

    /// Embedding dimension
    pub dimension: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Batch size for embedding requests
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Index data-plane host, e.g. https://dragongpt-xxxx.svc.pinecone.io
    pub host: String,

    /// API key for the index service
    pub api_key: Option<String>,

    /// Optional namespace within the index
    pub namespace: Option<String>,

    /// Number of fragments retrieved per query
    pub top_k: usize,

    /// Records per upsert call
    pub upsert_batch_size: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Search endpoint (DuckDuckGo lite HTML)
    pub endpoint: String,

    /// Maximum results processed per escalation
    pub max_results: usize,

    /// Text appended to the user query before searching
    pub query_suffix: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-page timeout in seconds
    pub timeout_secs: u64,

    /// Only pages on this domain or its subdomains are fetched (None = any)
    pub allowed_domain: Option<String>,

    /// User agent sent with page fetches and searches
    pub user_agent: String,

    /// Maximum redirects followed per fetch
    pub max_redirects: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Hard cap on the context handed to the answer model, in characters
    pub max_context_chars: usize,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// System prompt file; compiled-in default when unset
    pub system_path: Option<String>,

    /// Instructions file; compiled-in default when unset
    pub instructions_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Offerings store URL
    pub database_url: String,

    /// Offerings table name
    pub table: String,

    /// Where the filtered JSON export is written
    pub output_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level / filter directive (debug, info, warn, error)
    pub log_level: String,

    /// Enable JSON logging
    pub json_logging: bool,

    /// Expose Prometheus metrics at /metrics
    pub metrics_enabled: bool,

    /// Service name for logs
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    pub requests_per_second: u32,

    /// Burst capacity
    pub burst: u32,

    /// Enable rate limiting
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "https://drexelai.github.io".to_string(),
    ]
}
fn default_llm_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_chat_model() -> String { "gpt-4o-mini".to_string() }
fn default_extraction_model() -> String { "gpt-4o".to_string() }
fn default_connect_timeout() -> u64 { 10 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "all-MiniLM-L6-v2".to_string() }
fn default_embedding_dimension() -> usize { 384 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_batch_size() -> usize { 64 }
fn default_top_k() -> usize { 5 }
fn default_upsert_batch_size() -> usize { 200 }
fn default_index_timeout() -> u64 { 15 }
fn default_search_endpoint() -> String { "https://lite.duckduckgo.com/lite/".to_string() }
fn default_max_results() -> usize { 3 }
fn default_query_suffix() -> String { " at Drexel University 2024".to_string() }
fn default_fetch_timeout() -> u64 { 10 }
fn default_allowed_domain() -> Option<String> { Some("drexel.edu".to_string()) }
fn default_user_agent() -> String { format!("dragongpt/{}", env!("CARGO_PKG_VERSION")) }
fn default_max_redirects() -> usize { 10 }
fn default_max_context_chars() -> usize { crate::MAX_CONTEXT_CHARS }
fn default_database_url() -> String { "sqlite://course_scheduler/winterTms.db".to_string() }
fn default_table() -> String { "winterTms".to_string() }
fn default_output_path() -> String { "data_collection/generated-courses.json".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_enabled() -> bool { true }
fn default_service_name() -> String { "dragongpt".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            chat_model: default_chat_model(),
            extraction_model: default_extraction_model(),
            extraction_temperature: 0.0,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_key: None,
            namespace: None,
            top_k: default_top_k(),
            upsert_batch_size: default_upsert_batch_size(),
            timeout_secs: default_index_timeout(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            max_results: default_max_results(),
            query_suffix: default_query_suffix(),
            timeout_secs: default_fetch_timeout(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            allowed_domain: default_allowed_domain(),
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            max_context_chars: default_max_context_chars(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            table: default_table(),
            output_path: default_output_path(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_enabled: default_metrics_enabled(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__SERVER__PORT=8081, APP__LLM__API_KEY=sk-...
            .add_source(Self::environment())
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific config file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Self::environment())
            .build()?;

        config.try_deserialize()
    }

    fn environment() -> Environment {
        Environment::with_prefix("APP")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("server.cors_origins")
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get page fetch timeout as Duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    /// Get search timeout as Duration
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.llm.chat_model, "gpt-4o-mini");
        assert_eq!(config.index.top_k, 5);
        assert_eq!(config.search.max_results, 3);
        assert_eq!(config.augmentation.max_context_chars, 128_000);
    }

    #[test]
    fn test_search_suffix_default() {
        let config = AppConfig::default();
        assert_eq!(config.search.query_suffix, " at Drexel University 2024");
        assert_eq!(config.fetch.allowed_domain.as_deref(), Some("drexel.edu"));
    }

    #[test]
    fn test_empty_source_deserializes_to_defaults() {
        let config: AppConfig = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.scheduler.table, "winterTms");
        assert_eq!(config.server.cors_origins.len(), 2);
    }
}
