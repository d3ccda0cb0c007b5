//! Planner trait and implementations
//!
//! A plan decides which sections the document needs and which context
//! sources the executor should gather. Plans are produced once per request
//! and never change afterwards.

use crate::classifier::AssistantTypeClassifier;
use crate::error::GenerationError;
use crate::models::{AssistantType, GenerationRequest, PlanOutput};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::debug;

const MAX_QUERY_TERMS: usize = 12;
const ESCALATE_PROMPT_CHARS: usize = 1500;
const ESCALATE_BUSINESS_PLAN_CHARS: usize = 600;

const WEB_SEARCH_TRIGGERS: &[&str] = &[
    "market", "competitor", "competition", "trend", "latest", "industry", "current", "recent",
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "for", "from", "how", "i",
    "in", "is", "it", "me", "my", "of", "on", "or", "our", "please", "the", "this", "to",
    "we", "what", "which", "with", "write", "you", "your", "about", "create", "draft", "give",
    "make", "should", "that", "their", "will",
];

const FINANCIAL_METRICS: &[&str] = &[
    "arpu",
    "gross_margin_pct",
    "cac",
    "ltv",
    "payback_months",
    "monthly_projections",
];

/// Trait for plan generation
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: &GenerationRequest) -> Result<PlanOutput>;
}

impl PlanOutput {
    /// Sections must be non-empty and named.
    pub fn validate(&self) -> Result<()> {
        if self.sections.is_empty() {
            return Err(GenerationError::InvalidPlan("plan has no sections".to_string()));
        }
        if self.sections.iter().any(|s| s.trim().is_empty()) {
            return Err(GenerationError::InvalidPlan("plan has an unnamed section".to_string()));
        }
        if !self.assistant_type.is_financial() && !self.metrics_needed.is_empty() {
            return Err(GenerationError::InvalidPlan(format!(
                "{} plans do not take financial metrics",
                self.assistant_type
            )));
        }
        Ok(())
    }
}

/// Deterministic rule-based planner. No model call.
#[derive(Debug, Clone, Default)]
pub struct RulePlanner;

impl RulePlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, request: &GenerationRequest) -> PlanOutput {
        let assistant_type = request
            .assistant_type
            .unwrap_or_else(|| AssistantTypeClassifier::classify(&request.prompt));

        let sections: Vec<String> = {
            let custom: Vec<String> = request
                .sections
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if custom.is_empty() {
                assistant_type.default_sections().iter().map(|s| s.to_string()).collect()
            } else {
                custom
            }
        };

        let prompt = request.prompt.to_lowercase();
        let requires_web_search = request.force_web_search
            || match assistant_type {
                AssistantType::MarketAnalysis => true,
                AssistantType::BusinessPlan
                | AssistantType::FinancialSummary
                | AssistantType::Pitch
                | AssistantType::General => WEB_SEARCH_TRIGGERS.iter().any(|w| prompt.contains(w)),
            };

        let metrics_needed = if assistant_type.is_financial() {
            FINANCIAL_METRICS.iter().map(|m| m.to_string()).collect()
        } else {
            Vec::new()
        };

        let chars = request.prompt.chars().count();
        let escalate_model = request.escalate
            || chars > ESCALATE_PROMPT_CHARS
            || (assistant_type == AssistantType::BusinessPlan && chars > ESCALATE_BUSINESS_PLAN_CHARS);

        PlanOutput {
            assistant_type,
            sections,
            requires_retrieval: request.use_documents,
            requires_web_search,
            query_terms: query_terms(&request.prompt),
            metrics_needed,
            escalate_model,
        }
    }
}

#[async_trait]
impl Planner for RulePlanner {
    async fn plan(&self, request: &GenerationRequest) -> Result<PlanOutput> {
        let plan = self.build(request);
        plan.validate()?;

        debug!(
            request_id = %request.request_id,
            assistant_type = %plan.assistant_type,
            sections = plan.sections.len(),
            retrieval = plan.requires_retrieval,
            web_search = plan.requires_web_search,
            escalate = plan.escalate_model,
            "Plan created"
        );

        Ok(plan)
    }
}

/// Lower-cased tokens minus stop-words, first occurrence order, capped.
pub fn query_terms(prompt: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    prompt
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|t| t.trim_matches('-').to_lowercase())
        .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .take(MAX_QUERY_TERMS)
        .collect()
}
