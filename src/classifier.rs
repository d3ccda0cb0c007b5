//! Assistant type classifier
//!
//! Picks an `AssistantType` for prompts that arrive without one. Keyword
//! scoring only; a tie or no match at all falls back to `General`.

use crate::models::AssistantType;

/// Static keyword lists
const BUSINESS_PLAN_KEYWORDS: &[&str] = &[
    "business plan", "startup", "launch", "venture", "go-to-market", "business model",
    "executive summary", "founding", "open a", "start a",
];

const FINANCIAL_SUMMARY_KEYWORDS: &[&str] = &[
    "financial", "unit economics", "ltv", "cac", "payback", "churn", "arpu", "revenue",
    "projection", "forecast", "margin", "cogs", "p&l", "cash flow",
];

const MARKET_ANALYSIS_KEYWORDS: &[&str] = &[
    "market analysis", "market size", "tam", "competitor", "competitive", "landscape",
    "industry", "trend", "segment", "market share",
];

const PITCH_KEYWORDS: &[&str] = &[
    "pitch", "investor", "deck", "fundraise", "fundraising", "seed round", "series a", "raise",
];

pub struct AssistantTypeClassifier;

impl AssistantTypeClassifier {
    pub fn classify(prompt: &str) -> AssistantType {
        let text = prompt.to_lowercase();

        let mut best = AssistantType::General;
        let mut best_score = 0usize;
        let mut tied = false;

        for kind in AssistantType::ALL {
            let score = keywords(kind).iter().filter(|kw| text.contains(**kw)).count();
            if score > best_score {
                best = kind;
                best_score = score;
                tied = false;
            } else if score == best_score && score > 0 {
                tied = true;
            }
        }

        if best_score == 0 || tied {
            AssistantType::General
        } else {
            best
        }
    }
}

fn keywords(kind: AssistantType) -> &'static [&'static str] {
    match kind {
        AssistantType::BusinessPlan => BUSINESS_PLAN_KEYWORDS,
        AssistantType::FinancialSummary => FINANCIAL_SUMMARY_KEYWORDS,
        AssistantType::MarketAnalysis => MARKET_ANALYSIS_KEYWORDS,
        AssistantType::Pitch => PITCH_KEYWORDS,
        AssistantType::General => &[],
    }
}
