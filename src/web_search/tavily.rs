//! Tavily search provider

use super::WebSearchProvider;
use crate::error::GenerationError;
use crate::models::WebResult;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

pub struct TavilyProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl TavilyProvider {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: TAVILY_SEARCH_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct TavilySearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl WebSearchProvider for TavilyProvider {
    fn name(&self) -> &'static str {
        "tavily"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<WebResult>> {
        if self.api_key.is_empty() {
            return Err(GenerationError::Config("TAVILY_API_KEY not configured".to_string()));
        }

        let request = TavilySearchRequest {
            api_key: &self.api_key,
            query,
            max_results: limit,
            search_depth: "basic",
            include_raw_content: false,
        };

        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::WebSearch(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::WebSearch(format!(
                "Tavily returned {}: {}",
                status, body
            )));
        }

        let parsed: TavilySearchResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::WebSearch(format!("Failed to parse response: {}", e)))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| WebResult {
                title: r.title,
                url: r.url,
                snippet: r.content,
            })
            .collect())
    }
}
