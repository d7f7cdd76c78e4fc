//! Context augmentation
//!
//! One pass per request, no retries:
//! 1. Retrieve the top-k fragments and render them into the context
//! 2. Ask the sufficiency oracle whether the context answers the query
//! 3. If not, web search and merge snippets and page text for new links
//! 4. Cut the context to the character cap
//!
//! Upstream failures degrade the result instead of failing the request.

use super::sufficiency::{SufficiencyChecker, Verdict};
use crate::config::AppConfig;
use crate::fetch::PageFetcher;
use crate::index::{parse_urls_from_rag, render_context, VectorIndex};
use crate::llm::LanguageModel;
use crate::metrics;
use crate::search::WebSearch;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Tunables for one augmentation pass
#[derive(Debug, Clone)]
pub struct AugmenterOptions {
    pub top_k: usize,
    pub max_search_results: usize,
    pub query_suffix: String,
    pub max_context_chars: usize,
}

impl Default for AugmenterOptions {
    fn default() -> Self {
        Self {
            top_k: crate::DEFAULT_TOP_K,
            max_search_results: crate::DEFAULT_MAX_SEARCH_RESULTS,
            query_suffix: " at Drexel University 2024".to_string(),
            max_context_chars: crate::MAX_CONTEXT_CHARS,
        }
    }
}

impl From<&AppConfig> for AugmenterOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            top_k: config.index.top_k,
            max_search_results: config.search.max_results,
            query_suffix: config.search.query_suffix.clone(),
            max_context_chars: config.augmentation.max_context_chars,
        }
    }
}

/// Final context plus what it took to build it
#[derive(Debug, Clone, Default, Serialize)]
pub struct AugmentedContext {
    /// Context handed to the answer model
    pub text: String,
    /// Fragments returned by the index
    pub fragments: usize,
    /// Index query failed and retrieval contributed nothing
    pub retrieval_failed: bool,
    /// The oracle judged the retrieved context insufficient
    pub escalated: bool,
    /// Search results merged into the context
    pub search_results: usize,
    /// Pages whose text was appended
    pub pages_fetched: usize,
    /// Result links skipped because retrieval already covered them
    pub links_skipped: usize,
    /// The context was cut to the character cap
    pub truncated: bool,
}

/// Cut `text` to at most `max_chars` characters. Returns whether anything was removed.
pub fn truncate_chars(text: &mut String, max_chars: usize) -> bool {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => {
            text.truncate(byte_index);
            true
        }
        None => false,
    }
}

/// Retrieval pipeline with web search escalation
pub struct ContextAugmenter {
    index: Arc<dyn VectorIndex>,
    checker: SufficiencyChecker,
    search: Arc<dyn WebSearch>,
    fetcher: Arc<dyn PageFetcher>,
    options: AugmenterOptions,
}

impl ContextAugmenter {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn LanguageModel>,
        search: Arc<dyn WebSearch>,
        fetcher: Arc<dyn PageFetcher>,
        options: AugmenterOptions,
    ) -> Self {
        Self {
            index,
            checker: SufficiencyChecker::new(model),
            search,
            fetcher,
            options,
        }
    }

    /// Build the context for `query`
    #[instrument(skip(self), fields(query = %query))]
    pub async fn augment(&self, query: &str) -> AugmentedContext {
        let start = Instant::now();
        let mut result = AugmentedContext::default();

        let retrieval_start = Instant::now();
        match self.index.search(query, self.options.top_k).await {
            Ok(fragments) => {
                metrics::record_retrieval(retrieval_start.elapsed().as_secs_f64(), true);
                result.fragments = fragments.len();
                result.text = render_context(&fragments);
            }
            Err(e) => {
                metrics::record_retrieval(retrieval_start.elapsed().as_secs_f64(), false);
                warn!(error = %e, "Index query failed, continuing with empty context");
                result.retrieval_failed = true;
            }
        }

        let verdict = self.checker.check(&result.text, query).await;
        if verdict != Verdict::Sufficient {
            result.escalated = true;
            self.escalate(query, &mut result).await;
        }

        result.truncated = truncate_chars(&mut result.text, self.options.max_context_chars);

        if result.escalated {
            metrics::record_escalation(result.search_results, result.pages_fetched, result.truncated);
        }

        info!(
            escalated = result.escalated,
            fragments = result.fragments,
            results = result.search_results,
            pages = result.pages_fetched,
            skipped = result.links_skipped,
            truncated = result.truncated,
            chars = result.text.chars().count(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Context built"
        );

        result
    }

    async fn escalate(&self, query: &str, result: &mut AugmentedContext) {
        let covered = parse_urls_from_rag(&result.text);
        let search_query = format!("{}{}", query, self.options.query_suffix);

        let hits = match self
            .search
            .search(&search_query, self.options.max_search_results)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Web search failed, keeping retrieved context");
                Vec::new()
            }
        };

        for hit in hits.iter().take(self.options.max_search_results) {
            result.search_results += 1;
            result.text.push_str(&hit.snippet);

            if covered.contains(&hit.url) {
                result.links_skipped += 1;
                continue;
            }

            match self.fetcher.fetch_text(&hit.url).await {
                Ok(Some(page)) => {
                    result.pages_fetched += 1;
                    result.text.push_str(&page);
                }
                Ok(None) => {}
                Err(e) => warn!(url = %hit.url, error = %e, "Page fetch failed"),
            }
            result.text.push_str(&hit.url);
        }
    }
}
