//! Main orchestrator
//!
//! REQUEST → PLAN → EXECUTE → RESPONSE

use crate::audit::AuditLog;
use crate::config::AppConfig;
use crate::execution::Executor;
use crate::llm::{GeminiProvider, MockModelProvider, ModelProvider};
use crate::models::{GenerationRequest, GenerationResponse};
use crate::planner::{Planner, RulePlanner};
use crate::retrieval::{HashingEmbedder, HybridRetriever, SearchIndex};
use crate::state::{InMemoryQuota, InMemoryResultStore};
use crate::verification::PolicyValidator;
use crate::web_search::{TavilyProvider, WebSearchAdapter};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Canned reply used when no model credentials are configured.
const OFFLINE_REPLY: &str = "## Answer\nNo language model is configured, so no document was generated. \
Set GEMINI_API_KEY and retry.\n\n## Sources\nNone.";

pub struct Orchestrator {
    planner: Box<dyn Planner>,
    executor: Executor,
}

impl Orchestrator {
    pub fn new(planner: Box<dyn Planner>, executor: Executor) -> Self {
        Self { planner, executor }
    }

    /// Production wiring: Gemini when a key is set, Tavily web search when a
    /// key is set, in-memory quota, result store and audit log.
    pub fn from_config(config: &AppConfig, index: Arc<dyn SearchIndex>) -> Result<Self> {
        let model: Arc<dyn ModelProvider> = match &config.gemini_api_key {
            Some(key) => Arc::new(GeminiProvider::new(key.clone())?),
            None => {
                warn!("GEMINI_API_KEY not set, using the offline model");
                Arc::new(MockModelProvider::new(OFFLINE_REPLY))
            }
        };

        let retriever = HybridRetriever::new(index, Arc::new(HashingEmbedder::default()), config.retrieval.clone());

        let mut executor = Executor::new(
            config.executor.clone(),
            model,
            PolicyValidator::new(config.policy.clone()),
            Arc::new(InMemoryQuota::new(config.daily_request_quota)),
        )
        .with_retriever(Arc::new(retriever))
        .with_result_store(Arc::new(InMemoryResultStore::new()))
        .with_usage_reporter(Arc::new(AuditLog::new()))
        .with_pricing(config.pricing.clone());

        match &config.tavily_api_key {
            Some(key) => {
                let provider = TavilyProvider::new(key.clone())?;
                let adapter = WebSearchAdapter::new(Arc::new(provider), config.web_search.clone());
                executor = executor.with_web_search(Arc::new(adapter));
            }
            None => warn!("TAVILY_API_KEY not set, web search disabled"),
        }

        Ok(Self::new(Box::new(RulePlanner::new()), executor))
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Plan and execute one request.
    ///
    /// Errors are limited to an invalid plan and quota rejection; every
    /// other failure comes back inside the response.
    pub async fn run(&self, request: GenerationRequest) -> Result<GenerationResponse> {
        let start = Instant::now();
        info!(
            request_id = %request.request_id,
            tenant_id = %request.scope.tenant_id,
            "Generation request received"
        );

        let plan = self.planner.plan(&request).await?;
        let response = self.executor.execute(&request, &plan).await?;

        info!(
            request_id = %request.request_id,
            assistant_type = %response.assistant_type,
            sections = response.sections.len(),
            sources = response.sources.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Generation request finished"
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutorConfig, PolicyConfig};
    use crate::error::GenerationError;
    use crate::llm::MockModelProvider;
    use crate::models::{AssistantType, PlanOutput, Scope};
    use crate::retrieval::InMemoryIndex;
    use crate::state::UnlimitedQuota;
    use async_trait::async_trait;
    use uuid::Uuid;

    fn scope() -> Scope {
        Scope {
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            document_ids: vec![],
        }
    }

    fn orchestrator(model: Arc<MockModelProvider>, quota: u32) -> Orchestrator {
        let executor = Executor::new(
            ExecutorConfig::default(),
            model,
            PolicyValidator::new(PolicyConfig::default()),
            Arc::new(InMemoryQuota::new(quota)),
        );
        Orchestrator::new(Box::new(RulePlanner::new()), executor)
    }

    #[tokio::test]
    async fn test_unspecified_type_is_classified() {
        let model = Arc::new(MockModelProvider::new(
            "## Problem\nCafes waste bread.\n## Solution\nDay-old subscriptions.\n## Sources\nNone.",
        ));
        let request = GenerationRequest::new(scope(), "Write an investor pitch deck for my bakery");

        let response = orchestrator(model.clone(), 10).run(request).await.unwrap();

        assert_eq!(response.assistant_type, AssistantType::Pitch);
        assert!(model.requests()[0].prompt.contains("Required sections, in order: Problem, Solution"));
    }

    #[tokio::test]
    async fn test_quota_is_enforced_across_runs() {
        let model = Arc::new(MockModelProvider::new("## Answer\nHi.\n## Sources\nNone."));
        let orchestrator = orchestrator(model, 1);
        let scope = scope();

        orchestrator
            .run(GenerationRequest::new(scope.clone(), "hello"))
            .await
            .unwrap();
        let err = orchestrator
            .run(GenerationRequest::new(scope, "hello again"))
            .await
            .unwrap_err();
        assert!(err.is_quota());
    }

    #[tokio::test]
    async fn test_offline_wiring_from_config() {
        let mut config = AppConfig::from_env();
        config.gemini_api_key = None;
        config.tavily_api_key = None;

        let orchestrator = Orchestrator::from_config(&config, Arc::new(InMemoryIndex::new())).unwrap();
        let response = orchestrator
            .run(GenerationRequest::new(scope(), "What should I name my bakery?"))
            .await
            .unwrap();

        assert!(response.section("Answer").unwrap().content.contains("GEMINI_API_KEY"));
        assert_eq!(response.usage.model, config.executor.mini_model);
    }

    struct BrokenPlanner;

    #[async_trait]
    impl Planner for BrokenPlanner {
        async fn plan(&self, _request: &GenerationRequest) -> Result<PlanOutput> {
            let plan = PlanOutput {
                assistant_type: AssistantType::General,
                sections: vec![],
                requires_retrieval: false,
                requires_web_search: false,
                query_terms: vec![],
                metrics_needed: vec![],
                escalate_model: false,
            };
            plan.validate()?;
            Ok(plan)
        }
    }

    #[tokio::test]
    async fn test_invalid_plan_never_reaches_the_model() {
        let model = Arc::new(MockModelProvider::new("unused"));
        let executor = Executor::new(
            ExecutorConfig::default(),
            model.clone(),
            PolicyValidator::new(PolicyConfig::default()),
            Arc::new(UnlimitedQuota),
        );
        let orchestrator = Orchestrator::new(Box::new(BrokenPlanner), executor);

        let err = orchestrator
            .run(GenerationRequest::new(scope(), "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidPlan(_)));
        assert!(model.requests().is_empty());
    }
}
