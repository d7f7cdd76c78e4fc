//! Web search fallback
//!
//! Used when retrieved context does not answer the query. Results come from
//! DuckDuckGo's lite HTML endpoint, which needs no API key.

use crate::config::{FetchConfig, SearchConfig};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use reqwest::Url;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// External web search capability
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Return at most `max_results` results, best first
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

/// DuckDuckGo lite HTML search
pub struct DuckDuckGoLite {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoLite {
    pub fn new(search: &SearchConfig, fetch: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(search.timeout_secs))
            .user_agent(fetch.user_agent.clone())
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create search HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: search.endpoint.clone(),
        })
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoLite {
    #[instrument(skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| AppError::SearchError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(AppError::SearchError {
                message: format!("Search returned {}", response.status()),
            });
        }

        let body = response.text().await.map_err(|e| AppError::SearchError {
            message: format!("Failed to read body: {}", e),
        })?;

        let results = parse_lite_results(&body, max_results);
        debug!(results = results.len(), "Search completed");
        Ok(results)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::Internal {
        message: format!("Invalid selector '{}': {}", css, e),
    })
}

/// Parse result links and snippets out of a lite results page.
///
/// Links and snippets appear in the same order, one snippet per link.
pub fn parse_lite_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let (Ok(link_sel), Ok(snippet_sel)) = (selector("a.result-link"), selector("td.result-snippet"))
    else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let snippets: Vec<String> = document
        .select(&snippet_sel)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .collect();

    // Pair by position before dropping unusable links
    document
        .select(&link_sel)
        .enumerate()
        .filter_map(|(i, el)| {
            let url = resolve_result_url(el.value().attr("href")?)?;
            Some(SearchResult {
                title: collapse_whitespace(&el.text().collect::<String>()),
                snippet: snippets.get(i).cloned().unwrap_or_default(),
                url,
            })
        })
        .take(max_results)
        .collect()
}

/// Result links may be wrapped in a `/l/?uddg=<target>` redirect
fn resolve_result_url(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };

    let parsed = Url::parse(&absolute).ok()?;
    if parsed.path().starts_with("/l/") {
        return parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned());
    }
    Some(absolute)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
