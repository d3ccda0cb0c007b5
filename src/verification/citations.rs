//! Citation marker checks
//!
//! Markers look like `[R2]` (retrieved document) or `[W1]` (web result).
//! Grouped markers such as `[R1, W3]` are split into their parts.

use super::{PolicyCheck, ValidationInput};
use crate::config::PolicyConfig;
use crate::models::{IssueCode, SourceKind, ValidationIssue};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;

lazy_static! {
    /// Any bracketed letter+number group; type letters are checked afterwards.
    static ref MARKER_GROUP: Regex =
        Regex::new(r"\[([A-Za-z]\d+(?:\s*,\s*[A-Za-z]\d+)*)\]").unwrap();
}

/// One marker occurrence, e.g. `R2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Marker {
    /// `None` for unknown type letters.
    pub kind: Option<SourceKind>,
    pub index: usize,
    pub raw: String,
}

impl Marker {
    fn parse(token: &str) -> Option<Self> {
        let mut chars = token.chars();
        let letter = chars.next()?;
        // digits too long for usize can never match a source
        let index: usize = chars.as_str().parse().unwrap_or(usize::MAX);
        let kind = match letter {
            'R' => Some(SourceKind::Rag),
            'W' => Some(SourceKind::Web),
            _ => None,
        };
        Some(Self {
            kind,
            index,
            raw: token.to_string(),
        })
    }
}

/// Every marker in order of appearance, duplicates included.
pub fn find_markers(text: &str) -> Vec<Marker> {
    MARKER_GROUP
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .flat_map(|group| {
            group
                .as_str()
                .split(',')
                .filter_map(|t| Marker::parse(t.trim()))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Byte spans of every marker group, so number extraction can skip them.
pub(crate) fn marker_spans(text: &str) -> Vec<(usize, usize)> {
    MARKER_GROUP.find_iter(text).map(|m| (m.start(), m.end())).collect()
}

pub fn has_valid_marker(text: &str) -> bool {
    find_markers(text).iter().any(|m| m.kind.is_some())
}

pub struct CitationIntegrityCheck;

impl PolicyCheck for CitationIntegrityCheck {
    fn name(&self) -> &'static str {
        "citation_integrity"
    }

    fn check(&self, input: &ValidationInput<'_>, _config: &PolicyConfig, issues: &mut Vec<ValidationIssue>) {
        let mut seen = HashSet::new();

        for marker in find_markers(input.raw_text) {
            if !seen.insert(marker.raw.clone()) {
                continue;
            }

            let available = match marker.kind {
                Some(SourceKind::Rag) => input.rag_citations.len(),
                Some(SourceKind::Web) => input.web_results.len(),
                None => {
                    issues.push(
                        ValidationIssue::error(
                            IssueCode::MalformedCitation,
                            format!("Citation [{}] uses an unknown source type", marker.raw),
                        )
                        .with_meta(json!({ "marker": marker.raw })),
                    );
                    continue;
                }
            };

            if marker.index == 0 || marker.index > available {
                issues.push(
                    ValidationIssue::error(
                        IssueCode::InvalidCitation,
                        format!(
                            "Citation [{}] does not match any of the {} available sources",
                            marker.raw, available
                        ),
                    )
                    .with_meta(json!({ "marker": marker.raw, "available": available })),
                );
            }
        }

        for source in input.sources {
            let missing_title = source.title.as_deref().map_or(true, |t| t.trim().is_empty());
            if missing_title {
                issues.push(
                    ValidationIssue::warning(
                        IssueCode::SourceMissingTitle,
                        format!("Source {} has no title", source.marker),
                    )
                    .with_meta(json!({ "marker": source.marker })),
                );
            }

            // document sources legitimately have no URL
            let missing_url = source.url.as_deref().map_or(true, |u| u.trim().is_empty());
            if source.kind == SourceKind::Web && missing_url {
                issues.push(
                    ValidationIssue::warning(
                        IssueCode::SourceMissingUrl,
                        format!("Source {} has no URL", source.marker),
                    )
                    .with_meta(json!({ "marker": source.marker })),
                );
            }
        }
    }
}

/// Config-gated: each content section needs at least one marker when any
/// source exists.
pub struct SectionCitationCheck;

impl PolicyCheck for SectionCitationCheck {
    fn name(&self) -> &'static str {
        "section_citations"
    }

    fn check(&self, input: &ValidationInput<'_>, config: &PolicyConfig, issues: &mut Vec<ValidationIssue>) {
        if !config.require_section_citations {
            return;
        }
        if input.rag_citations.is_empty() && input.web_results.is_empty() {
            return;
        }

        for section in input.sections {
            if section.is_titled("Sources") || section.is_titled("Disclaimer") {
                continue;
            }
            if !has_valid_marker(&section.content) {
                issues.push(
                    ValidationIssue::error(
                        IssueCode::SectionMissingCitation,
                        format!("Section \"{}\" cites no source", section.title),
                    )
                    .with_meta(json!({ "section": section.title })),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::tests::{fixture, input};
    use crate::models::Section;

    #[test]
    fn test_find_markers() {
        let markers = find_markers("Growth [R1] and demand [W2, R3]. Not a marker: [12] or [see R1].");
        let raw: Vec<&str> = markers.iter().map(|m| m.raw.as_str()).collect();
        assert_eq!(raw, vec!["R1", "W2", "R3"]);
        assert_eq!(markers[1].kind, Some(SourceKind::Web));
        assert_eq!(markers[1].index, 2);
    }

    #[test]
    fn test_out_of_range_and_malformed_markers() {
        let mut fx = fixture("Cheap beans [R1] [R5] [W1] [X1] [R5]", 3, 1);
        fx.sections = vec![Section::new("Answer", fx.raw.clone())];

        let mut issues = Vec::new();
        CitationIntegrityCheck.check(&input(&fx), &PolicyConfig::default(), &mut issues);

        let codes: Vec<IssueCode> = issues.iter().map(|i| i.code).collect();
        assert_eq!(codes, vec![IssueCode::InvalidCitation, IssueCode::MalformedCitation]);
        assert!(issues.iter().all(|i| i.is_error()));
    }

    #[test]
    fn test_overlong_index_is_invalid_not_skipped() {
        let fx = fixture("Huge claim [R99999999999999999999999]", 2, 0);

        let mut issues = Vec::new();
        CitationIntegrityCheck.check(&input(&fx), &PolicyConfig::default(), &mut issues);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, IssueCode::InvalidCitation);
        assert_eq!(issues[0].meta.as_ref().unwrap()["marker"], "R99999999999999999999999");
    }

    #[test]
    fn test_markers_dedupe_by_value() {
        let unique: HashSet<Marker> = find_markers("[R1] [R1, W1] [W1]").into_iter().collect();
        assert_eq!(unique.len(), 2);
        assert!(unique.iter().any(|m| m.kind == Some(SourceKind::Rag) && m.index == 1));
    }

    #[test]
    fn test_web_source_without_url_warns() {
        let mut fx = fixture("Demand rose [W1]", 0, 1);
        fx.sources[0].url = None;

        let mut issues = Vec::new();
        CitationIntegrityCheck.check(&input(&fx), &PolicyConfig::default(), &mut issues);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, IssueCode::SourceMissingUrl);
        assert!(!issues[0].is_error());
    }

    #[test]
    fn test_section_citations_are_config_gated() {
        let mut fx = fixture("", 1, 0);
        fx.sections = vec![
            Section::new("Problem", "Costs are high [R1]"),
            Section::new("Solution", "Bulk buying"),
            Section::new("Sources", "[R1] Handbook"),
        ];

        let mut issues = Vec::new();
        SectionCitationCheck.check(&input(&fx), &PolicyConfig::default(), &mut issues);
        assert!(issues.is_empty());

        let config = PolicyConfig {
            require_section_citations: true,
            ..PolicyConfig::default()
        };
        SectionCitationCheck.check(&input(&fx), &config, &mut issues);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, IssueCode::SectionMissingCitation);
        assert_eq!(issues[0].meta.as_ref().unwrap()["section"], "Solution");
    }
}
