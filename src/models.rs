//! Core data models for the generation pipeline

use crate::finance::FinancialInputs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Assistant Type =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssistantType {
    BusinessPlan,
    FinancialSummary,
    MarketAnalysis,
    Pitch,
    General,
}

impl AssistantType {
    pub const ALL: [AssistantType; 5] = [
        AssistantType::BusinessPlan,
        AssistantType::FinancialSummary,
        AssistantType::MarketAnalysis,
        AssistantType::Pitch,
        AssistantType::General,
    ];

    /// Financial types get numeric groundedness checks against the finance model.
    pub fn is_financial(&self) -> bool {
        match self {
            AssistantType::BusinessPlan | AssistantType::FinancialSummary => true,
            AssistantType::MarketAnalysis | AssistantType::Pitch | AssistantType::General => false,
        }
    }

    pub fn default_sections(&self) -> &'static [&'static str] {
        match self {
            AssistantType::BusinessPlan => &[
                "Executive Summary",
                "Problem",
                "Solution",
                "Market",
                "Business Model",
                "Financials",
                "Risks",
                "Sources",
            ],
            AssistantType::FinancialSummary => &[
                "Summary",
                "Unit Economics",
                "Projections",
                "Assumptions",
                "Risks",
                "Sources",
            ],
            AssistantType::MarketAnalysis => &[
                "Overview",
                "Market Size",
                "Competitors",
                "Trends",
                "Opportunities",
                "Sources",
            ],
            AssistantType::Pitch => &["Problem", "Solution", "Market", "Traction", "Ask", "Sources"],
            AssistantType::General => &["Answer", "Sources"],
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "business_plan" | "plan" => Some(AssistantType::BusinessPlan),
            "financial_summary" | "financial" | "finance" => Some(AssistantType::FinancialSummary),
            "market_analysis" | "market" => Some(AssistantType::MarketAnalysis),
            "pitch" | "pitch_deck" => Some(AssistantType::Pitch),
            "general" => Some(AssistantType::General),
            _ => None,
        }
    }
}

impl fmt::Display for AssistantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssistantType::BusinessPlan => "Business Plan",
            AssistantType::FinancialSummary => "Financial Summary",
            AssistantType::MarketAnalysis => "Market Analysis",
            AssistantType::Pitch => "Pitch",
            AssistantType::General => "General",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Request =================
//

/// Tenant scope a request runs under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scope {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    /// Restrict retrieval to these documents. Empty means all tenant documents.
    #[serde(default)]
    pub document_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub request_id: Uuid,
    pub scope: Scope,
    pub prompt: String,
    #[serde(default)]
    pub assistant_type: Option<AssistantType>,
    #[serde(default)]
    pub use_documents: bool,
    #[serde(default)]
    pub force_web_search: bool,
    #[serde(default)]
    pub escalate: bool,
    /// Caller-mandated sections; empty means the assistant type's defaults.
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub financial_inputs: Option<FinancialInputs>,
    pub created_at: DateTime<Utc>,
}

impl GenerationRequest {
    pub fn new(scope: Scope, prompt: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            scope,
            prompt: prompt.into(),
            assistant_type: None,
            use_documents: false,
            force_web_search: false,
            escalate: false,
            sections: Vec::new(),
            financial_inputs: None,
            created_at: Utc::now(),
        }
    }
}

//
// ================= Plan =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanOutput {
    pub assistant_type: AssistantType,
    /// Ordered and non-empty.
    pub sections: Vec<String>,
    pub requires_retrieval: bool,
    pub requires_web_search: bool,
    pub query_terms: Vec<String>,
    pub metrics_needed: Vec<String>,
    pub escalate_model: bool,
}

impl PlanOutput {
    pub fn requires_finance(&self) -> bool {
        !self.metrics_needed.is_empty()
    }

    pub fn requires_section(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.eq_ignore_ascii_case(name))
    }

    /// Search string handed to retrieval and web search.
    pub fn search_query(&self, fallback: &str) -> String {
        if self.query_terms.is_empty() {
            fallback.trim().to_string()
        } else {
            self.query_terms.join(" ")
        }
    }
}

//
// ================= Retrieval =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: u32,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub score: f64,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// A fused retrieval hit. `rank` is 1-indexed and unique within one retrieval call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub id: String,
    pub rank: usize,
    pub score: f64,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Citation `id` is the bracket marker number: `[1]` is the first packed chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub id: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub document_name: String,
    pub page: Option<u32>,
    pub section: Option<String>,
    pub url: Option<String>,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PackedContext {
    pub context: String,
    pub citations: Vec<Citation>,
    pub token_count: usize,
    pub chunks_used: usize,
    pub chunks_truncated: usize,
}

impl PackedContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

//
// ================= Sources & Sections =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rag,
    Web,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantSource {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Marker as it appeared in the text, e.g. `R2`.
    pub marker: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub doc_id: Option<String>,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub title: String,
    pub content: String,
}

impl Section {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }

    pub fn is_titled(&self, name: &str) -> bool {
        self.title.trim().eq_ignore_ascii_case(name.trim())
    }
}

//
// ================= Validation =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    InvalidCitation,
    MalformedCitation,
    SourceMissingTitle,
    SourceMissingUrl,
    SectionMissingCitation,
    UngroundedNumber,
    SuspiciousMagnitude,
    PromptInjectionRisk,
    PiiDetected,
    RecencyUnverified,
    MissingSection,
    EmptySection,
    NoSourcesSection,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::InvalidCitation => "INVALID_CITATION",
            IssueCode::MalformedCitation => "MALFORMED_CITATION",
            IssueCode::SourceMissingTitle => "SOURCE_MISSING_TITLE",
            IssueCode::SourceMissingUrl => "SOURCE_MISSING_URL",
            IssueCode::SectionMissingCitation => "SECTION_MISSING_CITATION",
            IssueCode::UngroundedNumber => "UNGROUNDED_NUMBER",
            IssueCode::SuspiciousMagnitude => "SUSPICIOUS_MAGNITUDE",
            IssueCode::PromptInjectionRisk => "PROMPT_INJECTION_RISK",
            IssueCode::PiiDetected => "PII_DETECTED",
            IssueCode::RecencyUnverified => "RECENCY_UNVERIFIED",
            IssueCode::MissingSection => "MISSING_SECTION",
            IssueCode::EmptySection => "EMPTY_SECTION",
            IssueCode::NoSourcesSection => "NO_SOURCES_SECTION",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn warning(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            meta: None,
            severity: Severity::Warning,
        }
    }

    pub fn error(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            meta: None,
            severity: Severity::Error,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disclaimer: Option<String>,
}

impl ValidationResult {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    pub fn count(&self, code: IssueCode) -> usize {
        self.issues.iter().filter(|i| i.code == code).count()
    }
}

//
// ================= Usage & Response =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: serde_json::Value,
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageMetrics {
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_cents: f64,
    /// Invocation count per tool name.
    pub tool_calls: BTreeMap<String, u32>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub request_id: Uuid,
    pub assistant_type: AssistantType,
    pub sections: Vec<Section>,
    pub sources: Vec<AssistantSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    pub usage: UsageMetrics,
    pub created_at: DateTime<Utc>,
}

impl GenerationResponse {
    /// The well-formed fallback returned when the model call or parsing fails.
    pub fn error(request_id: Uuid, assistant_type: AssistantType, message: impl Into<String>) -> Self {
        Self {
            request_id,
            assistant_type,
            sections: vec![Section::new("Error", message)],
            sources: Vec::new(),
            validation: None,
            usage: UsageMetrics::default(),
            created_at: Utc::now(),
        }
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.is_titled(name))
    }

    pub fn is_error(&self) -> bool {
        self.sections.len() == 1 && self.sections[0].is_titled("Error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_has_ordered_sections_ending_in_sources() {
        for kind in AssistantType::ALL {
            let sections = kind.default_sections();
            assert!(!sections.is_empty());
            assert_eq!(sections.last().copied(), Some("Sources"));
        }
    }

    #[test]
    fn test_source_kind_serializes_as_type_tag() {
        let source = AssistantSource {
            kind: SourceKind::Web,
            marker: "W1".to_string(),
            title: Some("Report".to_string()),
            url: Some("https://example.com".to_string()),
            doc_id: None,
            snippet: "snippet".to_string(),
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["type"], "web");
    }

    #[test]
    fn test_issue_code_wire_names() {
        let issue = ValidationIssue::error(IssueCode::NoSourcesSection, "missing");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["code"], "NO_SOURCES_SECTION");
        assert_eq!(json["severity"], "error");
        assert_eq!(IssueCode::UngroundedNumber.as_str(), "UNGROUNDED_NUMBER");
    }

    #[test]
    fn test_parse_assistant_type() {
        assert_eq!(AssistantType::parse("market-analysis"), Some(AssistantType::MarketAnalysis));
        assert_eq!(AssistantType::parse("Business Plan"), Some(AssistantType::BusinessPlan));
        assert_eq!(AssistantType::parse("poem"), None);
    }
}
