//! Page fetching for search escalation
//!
//! A link is fetched only if it passes the admission policy in
//! [`is_fetchable_url`]. Non-200 responses and transport errors yield no
//! content; callers treat them the same as an empty page.

use crate::config::FetchConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use reqwest::{redirect, StatusCode, Url};
use scraper::{ElementRef, Html};
use std::time::Duration;
use tracing::{debug, instrument};

/// Hosts whose pages are never fetched
const SOCIAL_MEDIA: &[&str] = &[
    "reddit",
    "tiktok",
    "linkedin",
    "instagram",
    "facebook",
    "twitter",
    "youtube",
];

/// Script-like handlers whose output is not a readable page
const BLOCKED_EXTENSIONS: &[&str] = &["asp", "aspx", "ashx"];

/// Elements whose text is never visible
const INVISIBLE_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Fetches the visible text of web pages
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Visible text of the page, or `None` if the page is not admitted or
    /// could not be retrieved
    async fn fetch_text(&self, url: &str) -> Result<Option<String>>;
}

/// URL admission policy for page fetches.
///
/// Rejects non-HTTP(S) links, links whose final dot-segment names a
/// script handler, social media, and links outside `allowed_domain`.
pub fn is_fetchable_url(url: &str, allowed_domain: Option<&str>) -> bool {
    let lower = url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return false;
    }

    let last_segment = lower.rsplit('.').next().unwrap_or_default();
    if BLOCKED_EXTENSIONS.iter().any(|ext| last_segment.contains(ext)) {
        return false;
    }

    if SOCIAL_MEDIA.iter().any(|host| lower.contains(host)) {
        return false;
    }

    match allowed_domain {
        None => true,
        Some(domain) => {
            let domain = domain.to_ascii_lowercase();
            Url::parse(&lower)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .map(|host| host == domain || host.ends_with(&format!(".{}", domain)))
                .unwrap_or(false)
        }
    }
}

/// Visible text of an HTML document, whitespace collapsed to single spaces
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut pieces: Vec<&str> = Vec::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|el| INVISIBLE_TAGS.contains(&el.value().name()));
        if !hidden {
            pieces.push(&**text);
        }
    }

    pieces
        .iter()
        .flat_map(|p| p.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// HTTP page fetcher
pub struct HttpPageFetcher {
    client: reqwest::Client,
    allowed_domain: Option<String>,
}

impl HttpPageFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create fetch HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            allowed_domain: config.allowed_domain.clone(),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    #[instrument(skip(self))]
    async fn fetch_text(&self, url: &str) -> Result<Option<String>> {
        if !is_fetchable_url(url, self.allowed_domain.as_deref()) {
            debug!("URL not admitted");
            return Ok(None);
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::FetchError {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        if response.status() != StatusCode::OK {
            debug!(status = response.status().as_u16(), "Skipping non-200 page");
            return Ok(None);
        }

        let body = response.text().await.map_err(|e| AppError::FetchError {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(Some(html_to_text(&body)))
    }
}
