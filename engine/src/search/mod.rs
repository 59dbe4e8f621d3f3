//! External legal search
//!
//! `SearchExecutor` wraps exactly one call to a `SearchProvider` with a hard
//! timeout and a cancellation signal, then normalizes whatever the provider
//! returned into `{title, url, snippet}`. It never returns an error: timeout,
//! provider failure, empty result sets and cancellation are all distinct
//! `SearchStatus` values on the outcome.

use async_trait::async_trait;
use reqwest::Client;
use sdk::errors::EngineError;
use sdk::types::SearchResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SearchConfig;

/// Errors raised by a search provider
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request timed out")]
    Timeout,

    #[error("Search provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SearchError::Timeout
        } else if e.is_decode() {
            SearchError::Parse(e.to_string())
        } else {
            SearchError::Network(e.to_string())
        }
    }
}

/// One external search backend
///
/// Providers return the raw JSON body; shape differences are absorbed by
/// the executor's normalization.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, num_results: usize) -> Result<Value, SearchError>;
}

/// HTTP search API: `POST {base_url}/search {query, numResults}`
#[derive(Debug, Clone)]
pub struct HttpSearchProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    query: &'a str,
    num_results: usize,
}

impl HttpSearchProvider {
    /// Build a provider from config; the API key is read from the configured
    /// environment variable
    pub fn new(config: &SearchConfig) -> Result<Self, EngineError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        Self::with_api_key(&config.base_url, api_key)
    }

    pub fn with_api_key(
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn search(&self, query: &str, num_results: usize) -> Result<Value, SearchError> {
        let url = format!("{}/search", self.base_url);

        let mut request = self.client.post(&url).json(&SearchRequest { query, num_results });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SearchError::Parse(e.to_string()))
    }
}

/// How a single search call ended
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchStatus {
    Ok,
    Empty,
    Timeout,
    ProviderError { status: Option<u16> },
    Network,
    Parse,
    Cancelled,
}

impl SearchStatus {
    /// The call completed, with or without results
    pub fn is_success(&self) -> bool {
        matches!(self, SearchStatus::Ok | SearchStatus::Empty)
    }
}

/// Result of one bounded search call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub success: bool,
    pub results: Vec<SearchResult>,
    pub engine: String,
    pub error_reason: Option<String>,
    pub status: SearchStatus,
}

impl SearchOutcome {
    fn failed(engine: &str, status: SearchStatus, error: EngineError) -> Self {
        Self {
            success: false,
            results: Vec::new(),
            engine: engine.to_string(),
            error_reason: Some(error.to_string()),
            status,
        }
    }
}

/// Bounded, normalizing wrapper around a search provider
#[derive(Clone)]
pub struct SearchExecutor {
    provider: Arc<dyn SearchProvider>,
    max_snippet_chars: usize,
}

impl SearchExecutor {
    pub fn new(provider: Arc<dyn SearchProvider>, max_snippet_chars: usize) -> Self {
        Self {
            provider,
            max_snippet_chars,
        }
    }

    /// Run one search
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SearchOutcome {
        let provider_name = self.provider.name().to_string();
        debug!(provider = %provider_name, query, max_results, "Executing search");

        let call = tokio::time::timeout(timeout, self.provider.search(query, max_results));
        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(query, "Search cancelled");
                return SearchOutcome {
                    success: false,
                    results: Vec::new(),
                    engine: provider_name,
                    error_reason: Some(EngineError::Cancelled.to_string()),
                    status: SearchStatus::Cancelled,
                };
            }
            raw = call => raw,
        };

        let body = match raw {
            Err(_) | Ok(Err(SearchError::Timeout)) => {
                let ms = timeout.as_millis() as u64;
                warn!(query, timeout_ms = ms, "Search timed out");
                return SearchOutcome::failed(
                    &provider_name,
                    SearchStatus::Timeout,
                    EngineError::SearchTimeout(ms),
                );
            }
            Ok(Err(e)) => {
                warn!(query, error = %e, "Search provider failed");
                let status = match &e {
                    SearchError::Status { status, .. } => SearchStatus::ProviderError {
                        status: Some(*status),
                    },
                    SearchError::Network(_) => SearchStatus::Network,
                    SearchError::Parse(_) => SearchStatus::Parse,
                    SearchError::Timeout => SearchStatus::Timeout,
                };
                return SearchOutcome::failed(
                    &provider_name,
                    status,
                    EngineError::SearchProvider(e.to_string()),
                );
            }
            Ok(Ok(body)) => body,
        };

        let Some(entries) = result_entries(&body) else {
            warn!(query, "Search response has no result list");
            return SearchOutcome::failed(
                &provider_name,
                SearchStatus::Parse,
                EngineError::SearchProvider("response has no result list".to_string()),
            );
        };

        let results: Vec<SearchResult> = entries
            .iter()
            .filter_map(|entry| normalize_entry(entry, self.max_snippet_chars))
            .take(max_results)
            .collect();

        let engine = body
            .get("engine")
            .and_then(Value::as_str)
            .unwrap_or(&provider_name)
            .to_string();

        let status = if results.is_empty() {
            SearchStatus::Empty
        } else {
            SearchStatus::Ok
        };
        debug!(query, engine = %engine, results = results.len(), "Search completed");

        SearchOutcome {
            success: true,
            results,
            engine,
            error_reason: None,
            status,
        }
    }
}

/// Locate the result array in a provider body
fn result_entries(body: &Value) -> Option<&Vec<Value>> {
    if let Some(list) = body.as_array() {
        return Some(list);
    }
    ["results", "items", "data", "organic"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_array))
}

fn first_str<'a>(entry: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| entry.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Map one provider entry to a `SearchResult`; entries without a URL are dropped
fn normalize_entry(entry: &Value, max_snippet_chars: usize) -> Option<SearchResult> {
    let url = first_str(entry, &["url", "link", "href"])?;
    let title = first_str(entry, &["title", "name"]).unwrap_or(url);
    let snippet = first_str(entry, &["snippet", "description", "content", "text"]).unwrap_or("");

    let snippet = snippet.split_whitespace().collect::<Vec<_>>().join(" ");

    Some(SearchResult::new(
        title.split_whitespace().collect::<Vec<_>>().join(" "),
        url,
        truncate_chars(&snippet, max_snippet_chars),
    ))
}

/// Cut `text` to at most `max` characters, marking the cut with "..."
///
/// Caps too small to hold the marker cut without it.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max <= 3 {
        return text.chars().take(max).collect();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}
