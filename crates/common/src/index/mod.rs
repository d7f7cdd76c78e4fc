//! Vector index client
//!
//! Wraps a Pinecone-compatible nearest-neighbour service:
//! - `search` embeds the query text and returns the top-k fragments
//! - `upsert` writes pre-embedded records (used by the indexer)
//!
//! Fragments are rendered into the context one metadata record per line,
//! which is also the format `parse_urls_from_rag` reads back.

use crate::config::IndexConfig;
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Metadata keys that carry the fragment's source URL.
/// Page and org corpora use `URL`; course and graduate program corpora use `url`.
pub const URL_KEYS: &[&str] = &["URL", "url"];

/// Metadata keys that carry the fragment's text, in order of preference
const TEXT_KEYS: &[&str] = &["Text_Chunk", "Description", "text"];

/// A stored chunk of source text plus metadata, the unit of retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedFragment {
    /// Fragment text
    pub text: String,

    /// Source URL, title, chunk index and anything else stored with the vector
    pub metadata: BTreeMap<String, String>,

    /// Similarity score reported by the index
    #[serde(default)]
    pub score: f32,
}

impl RetrievedFragment {
    /// Build a fragment from raw index metadata
    pub fn from_metadata(metadata: Map<String, Value>, score: f32) -> Self {
        let metadata: BTreeMap<String, String> = metadata
            .into_iter()
            .map(|(key, value)| (key, metadata_value_to_string(value)))
            .collect();

        let text = TEXT_KEYS
            .iter()
            .find_map(|key| metadata.get(*key))
            .cloned()
            .unwrap_or_default();

        Self {
            text,
            metadata,
            score,
        }
    }

    /// The source URL, if the metadata has one
    pub fn url(&self) -> Option<&str> {
        URL_KEYS
            .iter()
            .find_map(|key| self.metadata.get(*key))
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }

    /// Single-line representation of the metadata record
    pub fn metadata_line(&self) -> String {
        // BTreeMap<String, String> always serializes
        serde_json::to_string(&self.metadata).unwrap_or_default()
    }
}

fn metadata_value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Concatenate fragment metadata records into the initial context
pub fn render_context(fragments: &[RetrievedFragment]) -> String {
    fragments
        .iter()
        .map(RetrievedFragment::metadata_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract the URLs already covered by retrieval from a rendered context.
///
/// Each line is parsed as a metadata record; lines that are not records
/// (appended snippets, page text) are skipped, as are records without a URL.
pub fn parse_urls_from_rag(context: &str) -> HashSet<String> {
    context
        .lines()
        .filter_map(|line| serde_json::from_str::<Map<String, Value>>(line.trim()).ok())
        .filter_map(|record| {
            URL_KEYS
                .iter()
                .find_map(|key| record.get(*key).and_then(Value::as_str))
                .filter(|url| !url.is_empty())
                .map(str::to_string)
        })
        .collect()
}

/// A pre-embedded record to store in the index
#[derive(Debug, Clone, Serialize)]
pub struct IndexRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Map<String, Value>,
}

/// Nearest-neighbour index over stored fragments
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return the `top_k` fragments most similar to `query`
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedFragment>>;

    /// Insert or replace records, returning the number written
    async fn upsert(&self, records: &[IndexRecord]) -> Result<usize>;
}

/// Pinecone data-plane client
pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: Option<String>,
    namespace: Option<String>,
    embedder: Arc<dyn Embedder>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [IndexRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

impl PineconeIndex {
    /// Create a new index client
    pub fn new(config: &IndexConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if !(config.host.starts_with("http://") || config.host.starts_with("https://")) {
            return Err(AppError::Configuration {
                message: format!("Index host must be an http(s) URL, got '{}'", config.host),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create index HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            namespace: config.namespace.clone(),
            embedder,
        })
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(format!("{}{}", self.host, path))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Api-Key", key);
        }

        let response = request.send().await.map_err(|e| AppError::IndexError {
            message: format!("Request to {} failed: {}", path, e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::IndexError {
                message: format!("{} returned {}: {}", path, status, body),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    #[instrument(skip(self), fields(model = %self.embedder.model_name()))]
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedFragment>> {
        let vector = self.embedder.embed(query).await?;

        let response = self
            .post(
                "/query",
                &QueryRequest {
                    vector: &vector,
                    top_k,
                    include_metadata: true,
                    namespace: self.namespace.as_deref(),
                },
            )
            .await?;

        let parsed: QueryResponse = response.json().await.map_err(|e| AppError::IndexError {
            message: format!("Failed to parse query response: {}", e),
        })?;

        let fragments: Vec<RetrievedFragment> = parsed
            .matches
            .into_iter()
            .take(top_k)
            .map(|m| RetrievedFragment::from_metadata(m.metadata.unwrap_or_default(), m.score))
            .collect();

        debug!(fragments = fragments.len(), "Index query completed");
        Ok(fragments)
    }

    async fn upsert(&self, records: &[IndexRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let response = self
            .post(
                "/vectors/upsert",
                &UpsertRequest {
                    vectors: records,
                    namespace: self.namespace.as_deref(),
                },
            )
            .await?;

        let parsed: UpsertResponse = response.json().await.map_err(|e| AppError::IndexError {
            message: format!("Failed to parse upsert response: {}", e),
        })?;

        Ok(parsed.upserted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fragment(value: Value) -> RetrievedFragment {
        match value {
            Value::Object(map) => RetrievedFragment::from_metadata(map, 0.9),
            _ => panic!("metadata must be an object"),
        }
    }

    #[test]
    fn test_fragment_text_and_url() {
        let f = fragment(json!({
            "Header": "Admissions",
            "URL": "https://drexel.edu/admissions",
            "Text_Chunk": "Apply by January 15.",
            "Chunk_Index": 0
        }));
        assert_eq!(f.text, "Apply by January 15.");
        assert_eq!(f.url(), Some("https://drexel.edu/admissions"));
        assert_eq!(f.metadata.get("Chunk_Index").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_parse_urls_round_trips_rendered_context() {
        let fragments = vec![
            fragment(json!({"URL": "https://drexel.edu/a", "Text_Chunk": "a"})),
            fragment(json!({"url": "https://catalog.drexel.edu/cs171", "Description": "b"})),
        ];
        let context = render_context(&fragments);
        let urls = parse_urls_from_rag(&context);
        assert_eq!(urls.len(), 2);
        assert!(urls.contains("https://drexel.edu/a"));
        assert!(urls.contains("https://catalog.drexel.edu/cs171"));
    }

    #[test]
    fn test_parse_urls_missing_key_yields_empty_set() {
        let fragments = vec![fragment(json!({
            "program_name": "Computer Science MS",
            "Text_Chunk": "Admission requires a bachelor's degree."
        }))];
        let urls = parse_urls_from_rag(&render_context(&fragments));
        assert!(urls.is_empty());
    }

    #[test]
    fn test_parse_urls_skips_non_record_lines() {
        let context = "{\"URL\": \"https://drexel.edu/x\"}\nplain snippet text\n{broken";
        let urls = parse_urls_from_rag(context);
        assert_eq!(urls.len(), 1);
    }

    #[test]
    fn test_render_context_one_line_per_fragment() {
        let fragments = vec![
            fragment(json!({"Text_Chunk": "line\nbreak"})),
            fragment(json!({"Text_Chunk": "second"})),
        ];
        let context = render_context(&fragments);
        assert_eq!(context.lines().count(), 2);
    }

    #[test]
    fn test_pinecone_rejects_bad_host() {
        let embedder: Arc<dyn Embedder> = Arc::new(crate::embeddings::MockEmbedder::new(8));
        let config = IndexConfig {
            host: "dragongpt.svc.pinecone.io".to_string(),
            ..IndexConfig::default()
        };
        assert!(PineconeIndex::new(&config, embedder).is_err());
    }
}
