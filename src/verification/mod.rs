//! Policy validator
//!
//! Rules-based checks over a parsed response and the context it was
//! generated from. Checks only append issues; nothing here fails or
//! blocks. Whether an invalid result blocks the response is the
//! executor's call, driven by `PolicyConfig::enforce`.

use crate::config::PolicyConfig;
use crate::finance::FinancialModel;
use crate::models::{
    AssistantSource, Citation, IssueCode, PlanOutput, Section, ValidationIssue, ValidationResult, WebResult,
};
use tracing::info;

pub mod citations;
pub mod numbers;
pub mod safety;
pub mod sections;

pub use citations::{find_markers, CitationIntegrityCheck, Marker, SectionCitationCheck};
pub use numbers::NumericGroundednessCheck;
pub use safety::{InjectionCheck, PiiCheck, RecencyCheck};
pub use sections::RequiredSectionsCheck;

/// Everything a check may look at.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    pub plan: &'a PlanOutput,
    pub sections: &'a [Section],
    /// Unparsed model output.
    pub raw_text: &'a str,
    /// Sources the text actually cites.
    pub sources: &'a [AssistantSource],
    /// Every RAG source offered to the model, `[R1]` first.
    pub rag_citations: &'a [Citation],
    /// Every web source offered to the model, `[W1]` first.
    pub web_results: &'a [WebResult],
    pub finance: Option<&'a FinancialModel>,
}

/// Trait for policy checks
pub trait PolicyCheck: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, input: &ValidationInput<'_>, config: &PolicyConfig, issues: &mut Vec<ValidationIssue>);
}

pub struct PolicyValidator {
    config: PolicyConfig,
    checks: Vec<Box<dyn PolicyCheck>>,
}

impl PolicyValidator {
    /// Validator with the standard checks.
    pub fn new(config: PolicyConfig) -> Self {
        let mut validator = Self::empty(config);
        validator.add_check(Box::new(CitationIntegrityCheck));
        validator.add_check(Box::new(SectionCitationCheck));
        validator.add_check(Box::new(NumericGroundednessCheck));
        validator.add_check(Box::new(InjectionCheck));
        validator.add_check(Box::new(PiiCheck));
        validator.add_check(Box::new(RecencyCheck));
        validator.add_check(Box::new(RequiredSectionsCheck));
        validator
    }

    pub fn empty(config: PolicyConfig) -> Self {
        Self {
            config,
            checks: Vec::new(),
        }
    }

    pub fn add_check(&mut self, check: Box<dyn PolicyCheck>) {
        self.checks.push(check);
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn validate(&self, input: &ValidationInput<'_>) -> ValidationResult {
        let mut issues = Vec::new();
        for check in &self.checks {
            check.check(input, &self.config, &mut issues);
        }

        let valid = !issues.iter().any(|i| i.is_error());
        let disclaimer = build_disclaimer(
            &issues,
            !input.web_results.is_empty(),
            input.finance.is_some(),
        );

        info!(
            checks = self.checks.len(),
            issues = issues.len(),
            valid,
            "Validation completed"
        );

        ValidationResult {
            valid,
            issues,
            disclaimer: if disclaimer.is_empty() { None } else { Some(disclaimer) },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Notice {
    Unsupported,
    Figures,
    Recency,
    Injection,
    Pii,
}

fn notice_for(code: IssueCode) -> Notice {
    match code {
        IssueCode::InvalidCitation
        | IssueCode::MalformedCitation
        | IssueCode::SourceMissingTitle
        | IssueCode::SourceMissingUrl
        | IssueCode::SectionMissingCitation
        | IssueCode::NoSourcesSection
        | IssueCode::MissingSection
        | IssueCode::EmptySection => Notice::Unsupported,
        IssueCode::UngroundedNumber | IssueCode::SuspiciousMagnitude => Notice::Figures,
        IssueCode::RecencyUnverified => Notice::Recency,
        IssueCode::PromptInjectionRisk => Notice::Injection,
        IssueCode::PiiDetected => Notice::Pii,
    }
}

fn notice_text(notice: Notice) -> &'static str {
    match notice {
        Notice::Unsupported => "Parts of this document are incomplete or not fully supported by the cited sources.",
        Notice::Figures => "Some figures could not be matched to the financial model or look implausible; verify them before use.",
        Notice::Recency => "Publication dates of web sources were not verified.",
        Notice::Injection => "Some sources contained instruction-like text that was not followed.",
        Notice::Pii => "The output may contain personal contact details.",
    }
}

/// Short notice built from the issues plus context flags. Empty when
/// nothing warrants one.
pub fn build_disclaimer(issues: &[ValidationIssue], web_sourced: bool, finance_backed: bool) -> String {
    let mut parts: Vec<&str> = Vec::new();

    if finance_backed {
        parts.push("Financial figures are computed from the inputs provided and are estimates, not guarantees.");
    }
    if web_sourced {
        parts.push("Some information comes from web sources that may be out of date.");
    }

    let mut notices: Vec<Notice> = issues.iter().map(|i| notice_for(i.code)).collect();
    notices.sort();
    notices.dedup();
    parts.extend(notices.into_iter().map(notice_text));

    parts.join(" ")
}
