//! Web search adapter
//!
//! Normalizes an external provider's results into `WebResult`s, with an
//! explicitly constructed cache and rate limiter. Construct one per process
//! (or per test) and share it behind an `Arc`.

use crate::config::WebSearchConfig;
use crate::error::GenerationError;
use crate::models::WebResult;
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info};

pub mod tavily;
pub use tavily::TavilyProvider;

/// External search provider.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<WebResult>>;
}

struct CacheEntry {
    results: Vec<WebResult>,
    stored_at: Instant,
}

/// Sliding-window limiter: at most `max_requests` per `window`.
struct RateLimiter {
    max_requests: usize,
    window: std::time::Duration,
    calls: VecDeque<Instant>,
}

impl RateLimiter {
    fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.calls.front() {
            if now.duration_since(*oldest) >= self.window {
                self.calls.pop_front();
            } else {
                break;
            }
        }

        if self.calls.len() >= self.max_requests {
            return false;
        }
        self.calls.push_back(now);
        true
    }
}

pub struct WebSearchAdapter {
    provider: Arc<dyn WebSearchProvider>,
    config: WebSearchConfig,
    cache: Mutex<HashMap<String, CacheEntry>>,
    limiter: Mutex<RateLimiter>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Lower-case and collapse whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

impl WebSearchAdapter {
    pub fn new(provider: Arc<dyn WebSearchProvider>, config: WebSearchConfig) -> Self {
        let limiter = RateLimiter {
            max_requests: config.max_requests_per_window,
            window: config.window,
            calls: VecDeque::new(),
        };

        Self {
            provider,
            config,
            cache: Mutex::new(HashMap::new()),
            limiter: Mutex::new(limiter),
        }
    }

    /// Clear the cache and the rate-limit window.
    pub fn reset(&self) {
        lock(&self.cache).clear();
        lock(&self.limiter).calls.clear();
    }

    pub fn cached_queries(&self) -> usize {
        lock(&self.cache).len()
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<WebResult>> {
        let key = normalize_query(query);
        if key.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let now = Instant::now();

        // locks are released before the provider call
        {
            let mut cache = lock(&self.cache);
            let fresh = cache
                .get(&key)
                .filter(|e| now.duration_since(e.stored_at) < self.config.cache_ttl)
                .map(|e| e.results.iter().take(limit).cloned().collect::<Vec<_>>());

            if let Some(results) = fresh {
                debug!(query = %key, "Web search cache hit");
                return Ok(results);
            }
            cache.remove(&key);
        }

        if !lock(&self.limiter).try_acquire(now) {
            return Err(GenerationError::RateLimited(format!(
                "web search limited to {} calls per {:?}",
                self.config.max_requests_per_window, self.config.window
            )));
        }

        let fetch_limit = self.config.fetch_limit.max(limit);
        let raw = self
            .provider
            .search(&key, fetch_limit)
            .await
            .map_err(|e| GenerationError::WebSearch(format!("{}: {}", self.provider.name(), e)))?;

        let results = normalize_results(raw, self.config.max_snippet_chars);

        info!(
            provider = self.provider.name(),
            query = %key,
            results = results.len(),
            "Web search completed"
        );

        {
            let mut cache = lock(&self.cache);
            if cache.len() >= self.config.cache_max_entries && !cache.contains_key(&key) {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, e)| e.stored_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    cache.remove(&oldest);
                }
            }
            cache.insert(
                key,
                CacheEntry {
                    results: results.clone(),
                    stored_at: Instant::now(),
                },
            );
        }

        Ok(results.into_iter().take(limit).collect())
    }
}

/// Trim fields, drop results without a URL, dedupe by URL, cap snippets.
pub fn normalize_results(raw: Vec<WebResult>, max_snippet_chars: usize) -> Vec<WebResult> {
    let mut seen = HashSet::new();

    raw.into_iter()
        .filter_map(|r| {
            let url = r.url.trim().to_string();
            if url.is_empty() || !seen.insert(url.clone()) {
                return None;
            }

            let snippet = r.snippet.split_whitespace().collect::<Vec<_>>().join(" ");
            let snippet = if snippet.chars().count() > max_snippet_chars {
                snippet.chars().take(max_snippet_chars).collect()
            } else {
                snippet
            };

            Some(WebResult {
                title: r.title.trim().to_string(),
                url,
                snippet,
            })
        })
        .collect()
}

/// Fixed results for tests and offline runs. Counts provider calls.
pub struct StaticWebSearchProvider {
    results: Vec<WebResult>,
    fail: bool,
    calls: Mutex<usize>,
}

impl StaticWebSearchProvider {
    pub fn new(results: Vec<WebResult>) -> Self {
        Self {
            results,
            fail: false,
            calls: Mutex::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            results: Vec::new(),
            fail: true,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl WebSearchProvider for StaticWebSearchProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<WebResult>> {
        *lock(&self.calls) += 1;
        if self.fail {
            return Err(GenerationError::WebSearch("provider unavailable".to_string()));
        }
        Ok(self.results.iter().take(limit).cloned().collect())
    }
}
