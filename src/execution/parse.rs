//! Model output parsing
//!
//! Splits text into sections on heading lines and resolves citation
//! markers to the sources they point at.

use crate::error::GenerationError;
use crate::models::{AssistantSource, Citation, PlanOutput, Section, SourceKind, WebResult};
use crate::verification::{find_markers, Marker};
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    static ref MARKDOWN_HEADING: Regex = Regex::new(r"^\s{0,3}#{1,6}\s+(.+?)\s*#*\s*$").unwrap();
    static ref BOLD_HEADING: Regex = Regex::new(r"^\s*\*\*([^*]+?)\*\*\s*:?\s*$").unwrap();
    static ref NUMBERING: Regex = Regex::new(r"^\d+[.)]\s+").unwrap();
}

/// Title used for text that appears before the first heading.
const PREAMBLE_TITLE: &str = "Overview";

fn heading_title(line: &str) -> Option<String> {
    let caps = MARKDOWN_HEADING
        .captures(line)
        .or_else(|| BOLD_HEADING.captures(line))?;
    let title = caps.get(1)?.as_str().trim().trim_end_matches(':').trim();
    let title = NUMBERING.replace(title, "").trim().to_string();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Split on markdown (`## Title`) or bold-line (`**Title**`) headings.
///
/// Text before the first heading becomes an "Overview" section. Text with
/// no headings at all becomes a single section named after the plan's first
/// section.
pub fn split_sections(text: &str, plan: &PlanOutput) -> Result<Vec<Section>> {
    if text.trim().is_empty() {
        return Err(GenerationError::Parse("model returned no text".to_string()));
    }

    let mut sections: Vec<Section> = Vec::new();
    let mut title: Option<String> = None;
    let mut body: Vec<&str> = Vec::new();

    let mut flush = |title: Option<String>, body: &mut Vec<&str>, sections: &mut Vec<Section>| {
        let content = body.join("\n").trim().to_string();
        body.clear();
        match title {
            Some(title) => sections.push(Section::new(title, content)),
            None if !content.is_empty() => sections.push(Section::new(PREAMBLE_TITLE, content)),
            None => {}
        }
    };

    for line in text.lines() {
        match heading_title(line) {
            Some(next) => {
                flush(title.take(), &mut body, &mut sections);
                title = Some(next);
            }
            None => body.push(line),
        }
    }
    let had_heading = title.is_some() || !sections.is_empty();
    flush(title.take(), &mut body, &mut sections);

    if !had_heading {
        let name = plan
            .sections
            .first()
            .cloned()
            .unwrap_or_else(|| PREAMBLE_TITLE.to_string());
        return Ok(vec![Section::new(name, text.trim())]);
    }

    Ok(sections)
}

/// Distinct markers in order of first appearance.
pub fn extract_markers(text: &str) -> Vec<Marker> {
    let mut seen = HashSet::new();
    find_markers(text)
        .into_iter()
        .filter(|m| seen.insert(m.raw.clone()))
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Typed, 1-indexed lookup. Out-of-range and unknown-type markers are
/// dropped.
pub fn map_citations_to_sources(markers: &[Marker], rag: &[Citation], web: &[WebResult]) -> Vec<AssistantSource> {
    markers
        .iter()
        .filter_map(|marker| {
            let position = marker.index.checked_sub(1)?;
            match marker.kind? {
                SourceKind::Rag => rag.get(position).map(|c| AssistantSource {
                    kind: SourceKind::Rag,
                    marker: marker.raw.clone(),
                    title: non_empty(&c.document_name),
                    url: c.url.clone(),
                    doc_id: Some(c.document_id.clone()),
                    snippet: c.snippet.clone(),
                }),
                SourceKind::Web => web.get(position).map(|w| AssistantSource {
                    kind: SourceKind::Web,
                    marker: marker.raw.clone(),
                    title: non_empty(&w.title),
                    url: non_empty(&w.url),
                    doc_id: None,
                    snippet: w.snippet.clone(),
                }),
            }
        })
        .collect()
}
