//! DragonGPT Common Library
//!
//! Shared code for the DragonGPT gateway and command-line tools including:
//! - Vector index and embedding client abstractions
//! - Language model client (completions, streaming, function calling)
//! - Web search fallback and page fetching
//! - Context augmentation, sufficiency checks and answer streaming
//! - Course scheduling query translation
//! - Error types, configuration and metrics

pub mod config;
pub mod context;
pub mod embeddings;
pub mod errors;
pub mod fetch;
pub mod index;
pub mod llm;
pub mod metrics;
pub mod schedule;
pub mod search;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use fetch::PageFetcher;
pub use index::{RetrievedFragment, VectorIndex};
pub use llm::LanguageModel;
pub use search::WebSearch;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hard cap on the augmented context, in characters
pub const MAX_CONTEXT_CHARS: usize = 128_000;

/// Default number of fragments retrieved per query
pub const DEFAULT_TOP_K: usize = 5;

/// Default number of web search results processed per escalation
pub const DEFAULT_MAX_SEARCH_RESULTS: usize = 3;
