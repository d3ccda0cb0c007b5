//! Configuration for the pipeline
//!
//! Every component takes its config by value at construction time.
//! Only `AppConfig::from_env` touches the environment, and only the
//! binaries call it.

use crate::llm::ModelPricing;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Policy validator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    /// Block responses that fail validation instead of only bannering them.
    pub enforce: bool,
    /// Require a citation marker in every non-Sources section when sources exist.
    pub require_section_citations: bool,
    /// Relative tolerance for currency figures (0.02 = 2%).
    pub currency_tolerance_pct: f64,
    /// Absolute tolerance for percentages, in percentage points.
    pub percent_tolerance_points: f64,
    /// Freshness window reported in `RECENCY_UNVERIFIED` notices.
    ///
    /// Informational only: web results carry no publication date, so nothing
    /// is filtered by it. The notice always fires on recency language.
    pub recency_window_days: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enforce: false,
            require_section_citations: false,
            currency_tolerance_pct: 0.02,
            percent_tolerance_points: 0.5,
            recency_window_days: 365,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionMode {
    /// `score = Σ weight / (k + rank)`
    ReciprocalRank,
    /// `score = w_lexical * lexical_score + w_vector * vector_score`
    WeightedScore,
}

/// Hybrid retriever settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Candidates requested from each of the two searches.
    pub candidate_limit: usize,
    pub fusion: FusionMode,
    pub rrf_k: f64,
    pub lexical_weight: f64,
    pub vector_weight: f64,
    pub min_score: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            candidate_limit: 20,
            fusion: FusionMode::ReciprocalRank,
            rrf_k: 60.0,
            lexical_weight: 0.5,
            vector_weight: 0.5,
            min_score: 0.0,
        }
    }
}

/// Context packer budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackOptions {
    pub max_tokens: usize,
    /// Held back for the header/footer around the packed chunks.
    pub reserve_tokens: usize,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            max_tokens: 3000,
            reserve_tokens: 100,
        }
    }
}

/// Web search adapter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSearchConfig {
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub max_requests_per_window: usize,
    pub window: Duration,
    pub max_snippet_chars: usize,
    /// Results fetched from the provider per query, before `limit` is applied.
    pub fetch_limit: usize,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(15 * 60),
            cache_max_entries: 256,
            max_requests_per_window: 30,
            window: Duration::from_secs(60),
            max_snippet_chars: 500,
            fetch_limit: 8,
        }
    }
}

/// Executor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    pub mini_model: String,
    pub escalation_model: String,
    pub pack: PackOptions,
    pub web_result_limit: usize,
    /// Offer the web-search and finance-recompute tools to the model.
    pub enable_tools: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mini_model: "gemini-2.0-flash-lite".to_string(),
            escalation_model: "gemini-2.0-flash".to_string(),
            pack: PackOptions::default(),
            web_result_limit: 5,
            enable_tools: true,
        }
    }
}

impl ExecutorConfig {
    pub fn model_for(&self, escalate: bool) -> &str {
        if escalate {
            &self.escalation_model
        } else {
            &self.mini_model
        }
    }
}

/// Everything the binaries need, loaded once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
    pub port: u16,
    pub daily_request_quota: u32,
    pub policy: PolicyConfig,
    pub retrieval: RetrievalConfig,
    pub web_search: WebSearchConfig,
    pub executor: ExecutorConfig,
    pub pricing: ModelPricing,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut policy = PolicyConfig::default();
        policy.enforce = env_parse("POLICY_ENFORCE", policy.enforce);
        policy.require_section_citations =
            env_parse("POLICY_REQUIRE_SECTION_CITATIONS", policy.require_section_citations);
        policy.currency_tolerance_pct = env_parse::<f64>(
            "POLICY_CURRENCY_TOLERANCE_PCT",
            policy.currency_tolerance_pct * 100.0,
        ) / 100.0;
        policy.percent_tolerance_points =
            env_parse("POLICY_PERCENT_TOLERANCE_POINTS", policy.percent_tolerance_points);
        policy.recency_window_days = env_parse("POLICY_RECENCY_DAYS", policy.recency_window_days);

        let mut retrieval = RetrievalConfig::default();
        retrieval.top_k = env_parse("RETRIEVAL_TOP_K", retrieval.top_k);

        let mut web_search = WebSearchConfig::default();
        web_search.cache_ttl = Duration::from_secs(env_parse(
            "WEB_SEARCH_CACHE_TTL_SECS",
            web_search.cache_ttl.as_secs(),
        ));
        web_search.max_requests_per_window =
            env_parse("WEB_SEARCH_MAX_PER_MINUTE", web_search.max_requests_per_window);

        let mut executor = ExecutorConfig::default();
        if let Some(model) = env_string("MODEL_MINI") {
            executor.mini_model = model;
        }
        if let Some(model) = env_string("MODEL_ESCALATION") {
            executor.escalation_model = model;
        }
        executor.pack.max_tokens = env_parse("CONTEXT_MAX_TOKENS", executor.pack.max_tokens);

        let port = env_string("PORT")
            .or_else(|| env_string("API_PORT"))
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        Self {
            gemini_api_key: env_string("GEMINI_API_KEY"),
            tavily_api_key: env_string("TAVILY_API_KEY"),
            port,
            daily_request_quota: env_parse("QUOTA_DAILY_REQUESTS", 200),
            policy,
            retrieval,
            web_search,
            executor,
            pricing: ModelPricing::default(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env_string(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Malformed config value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_defaults() {
        let policy = PolicyConfig::default();
        assert!(!policy.enforce);
        assert!(!policy.require_section_citations);
        assert_eq!(policy.currency_tolerance_pct, 0.02);
        assert_eq!(policy.percent_tolerance_points, 0.5);

        let retrieval = RetrievalConfig::default();
        assert_eq!(retrieval.rrf_k, 60.0);
        assert_eq!(retrieval.lexical_weight, 0.5);
        assert_eq!(retrieval.vector_weight, 0.5);
        assert_eq!(retrieval.fusion, FusionMode::ReciprocalRank);

        assert_eq!(PackOptions::default().reserve_tokens, 100);
    }

    #[test]
    fn test_model_selection_is_binary() {
        let config = ExecutorConfig::default();
        assert_eq!(config.model_for(false), config.mini_model);
        assert_eq!(config.model_for(true), config.escalation_model);
    }

    #[test]
    fn test_malformed_env_value_falls_back() {
        env::set_var("DOCGEN_TEST_MALFORMED_NUMBER", "not-a-number");
        assert_eq!(env_parse("DOCGEN_TEST_MALFORMED_NUMBER", 7usize), 7);
        env::remove_var("DOCGEN_TEST_MALFORMED_NUMBER");
    }
}
