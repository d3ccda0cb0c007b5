//! Numeric groundedness and magnitude sanity
//!
//! Financial documents: every currency, percentage and significant count in
//! the text must match a value from the finance model within tolerance.
//! Everything else only gets magnitude bounds picked by keywords in the text
//! just before the number. Both are keyword heuristics and will miss or
//! over-flag some phrasing.

use super::citations::marker_spans;
use super::{PolicyCheck, ValidationInput};
use crate::config::PolicyConfig;
use crate::models::{IssueCode, ValidationIssue};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;

const EPSILON: f64 = 1e-9;
const CONTEXT_WINDOW_CHARS: usize = 48;
const MIN_SIGNIFICANT_COUNT: f64 = 10.0;

lazy_static! {
    static ref CURRENCY: Regex = Regex::new(
        r"(?i)(?:\$|usd\s?|€|£)\s?(\d[\d,]*(?:\.\d+)?)(?:\s?(thousand|million|billion|trillion|bn|mm|k|m|b)\b)?"
    )
    .unwrap();
    static ref PERCENT: Regex = Regex::new(r"(?i)(-?\d[\d,]*(?:\.\d+)?)\s?(?:%|percent\b)").unwrap();
    static ref PLAIN_NUMBER: Regex = Regex::new(r"\d[\d,]*(?:\.\d+)?").unwrap();
    static ref PRICE_CONTEXT: Regex = Regex::new(r"\b(?:price|prices|priced|pricing)\b").unwrap();
    static ref MARKET_SIZE_CONTEXT: Regex =
        Regex::new(r"\b(?:market size|market is worth|market valued|tam|sam|som|addressable market)\b").unwrap();
    static ref MARGIN_CONTEXT: Regex = Regex::new(r"\bmargins?\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Currency,
    Percent,
    Count,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericLiteral {
    pub kind: LiteralKind,
    pub value: f64,
    pub text: String,
    pub start: usize,
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse().ok()
}

fn scale(suffix: Option<&str>) -> f64 {
    match suffix.map(|s| s.to_lowercase()).as_deref() {
        Some("k") | Some("thousand") => 1e3,
        Some("m") | Some("mm") | Some("million") => 1e6,
        Some("b") | Some("bn") | Some("billion") => 1e9,
        Some("trillion") => 1e12,
        _ => 1.0,
    }
}

fn overlaps(spans: &[(usize, usize)], start: usize, end: usize) -> bool {
    spans.iter().any(|(s, e)| start < *e && *s < end)
}

/// Currency, percentage and count literals, in text order.
pub fn extract_literals(text: &str) -> Vec<NumericLiteral> {
    let mut taken = marker_spans(text);
    let mut literals = Vec::new();

    for caps in CURRENCY.captures_iter(text) {
        let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if let Some(value) = parse_number(number.as_str()) {
            literals.push(NumericLiteral {
                kind: LiteralKind::Currency,
                value: value * scale(caps.get(2).map(|m| m.as_str())),
                text: whole.as_str().trim().to_string(),
                start: whole.start(),
            });
            taken.push((whole.start(), whole.end()));
        }
    }

    for caps in PERCENT.captures_iter(text) {
        let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if overlaps(&taken, whole.start(), whole.end()) {
            continue;
        }
        if let Some(value) = parse_number(number.as_str()) {
            literals.push(NumericLiteral {
                kind: LiteralKind::Percent,
                value,
                text: whole.as_str().to_string(),
                start: whole.start(),
            });
            taken.push((whole.start(), whole.end()));
        }
    }

    let bytes = text.as_bytes();
    for m in PLAIN_NUMBER.find_iter(text) {
        if overlaps(&taken, m.start(), m.end()) {
            continue;
        }
        // skip identifiers like Q3, v2 or 2x
        let glued_before = m.start() > 0 && (bytes[m.start() - 1].is_ascii_alphabetic() || bytes[m.start() - 1] == b'.');
        let glued_after = m.end() < bytes.len() && bytes[m.end()].is_ascii_alphabetic();
        if glued_before || glued_after {
            continue;
        }
        if let Some(value) = parse_number(m.as_str()) {
            literals.push(NumericLiteral {
                kind: LiteralKind::Count,
                value,
                text: m.as_str().to_string(),
                start: m.start(),
            });
        }
    }

    literals.sort_by_key(|l| l.start);
    literals
}

pub fn currency_grounded(value: f64, grounded: &[f64], tolerance_pct: f64) -> bool {
    grounded
        .iter()
        .any(|g| (value - g).abs() <= tolerance_pct * g.abs() + EPSILON)
}

/// The model stores rates as fractions (0.7), so only `g * 100` is compared.
/// Raw values such as month indices never ground a percentage.
pub fn percent_grounded(points: f64, grounded: &[f64], tolerance_points: f64) -> bool {
    grounded
        .iter()
        .any(|g| (points - g * 100.0).abs() <= tolerance_points + EPSILON)
}

fn is_year(value: f64) -> bool {
    value.fract() == 0.0 && (1900.0..=2100.0).contains(&value)
}

pub fn count_grounded(value: f64, grounded: &[f64], currency_tolerance_pct: f64) -> bool {
    let tolerance = |g: f64| {
        if value < 100.0 {
            1.0
        } else if value < 1000.0 {
            0.01 * g.abs()
        } else {
            currency_tolerance_pct * g.abs()
        }
    };
    grounded.iter().any(|g| (value - g).abs() <= tolerance(*g) + EPSILON)
}

fn window_before(text: &str, start: usize) -> String {
    let prefix = &text[..start];
    let skip = prefix.chars().count().saturating_sub(CONTEXT_WINDOW_CHARS);
    prefix.chars().skip(skip).collect::<String>().to_lowercase()
}

pub struct NumericGroundednessCheck;

impl NumericGroundednessCheck {
    fn check_grounded(
        &self,
        literals: &[NumericLiteral],
        grounded: &[f64],
        config: &PolicyConfig,
        issues: &mut Vec<ValidationIssue>,
    ) {
        for literal in literals {
            let ok = match literal.kind {
                LiteralKind::Currency => currency_grounded(literal.value, grounded, config.currency_tolerance_pct),
                LiteralKind::Percent => percent_grounded(literal.value, grounded, config.percent_tolerance_points),
                LiteralKind::Count => {
                    if literal.value < MIN_SIGNIFICANT_COUNT || is_year(literal.value) {
                        continue;
                    }
                    count_grounded(literal.value, grounded, config.currency_tolerance_pct)
                }
            };

            if !ok {
                issues.push(
                    ValidationIssue::warning(
                        IssueCode::UngroundedNumber,
                        format!("\"{}\" does not match any figure in the financial model", literal.text),
                    )
                    .with_meta(json!({ "value": literal.value, "text": literal.text })),
                );
            }
        }
    }

    fn check_magnitudes(&self, text: &str, literals: &[NumericLiteral], issues: &mut Vec<ValidationIssue>) {
        for literal in literals {
            let context = nearest_context(&window_before(text, literal.start));

            let violation = match (literal.kind, context) {
                (LiteralKind::Count, _) if is_year(literal.value) => false,
                (LiteralKind::Percent, Some(Context::Margin)) => !(-100.0..=100.0).contains(&literal.value),
                (LiteralKind::Currency | LiteralKind::Count, Some(Context::MarketSize)) => {
                    !(1_000.0..=1e14).contains(&literal.value)
                }
                (LiteralKind::Currency | LiteralKind::Count, Some(Context::Price)) => {
                    !(literal.value > 0.0 && literal.value < 1_000_000.0)
                }
                _ => false,
            };

            if violation {
                issues.push(
                    ValidationIssue::warning(
                        IssueCode::SuspiciousMagnitude,
                        format!("\"{}\" looks implausible in context", literal.text),
                    )
                    .with_meta(json!({ "value": literal.value, "text": literal.text })),
                );
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Price,
    MarketSize,
    Margin,
}

/// The keyword closest to the number wins.
fn nearest_context(window: &str) -> Option<Context> {
    [
        (Context::Price, &*PRICE_CONTEXT),
        (Context::MarketSize, &*MARKET_SIZE_CONTEXT),
        (Context::Margin, &*MARGIN_CONTEXT),
    ]
    .into_iter()
    .filter_map(|(context, re)| re.find_iter(window).last().map(|m| (m.end(), context)))
    .max_by_key(|(end, _)| *end)
    .map(|(_, context)| context)
}

impl PolicyCheck for NumericGroundednessCheck {
    fn name(&self) -> &'static str {
        "numeric_groundedness"
    }

    fn check(&self, input: &ValidationInput<'_>, config: &PolicyConfig, issues: &mut Vec<ValidationIssue>) {
        let literals = extract_literals(input.raw_text);
        if literals.is_empty() {
            return;
        }

        // without a model there is nothing to ground against
        match (input.plan.assistant_type.is_financial(), input.finance) {
            (true, Some(model)) => {
                let grounded = model.flatten_values();
                self.check_grounded(&literals, &grounded, config, issues);
            }
            _ => self.check_magnitudes(input.raw_text, &literals, issues),
        }
    }
}
