//! Context packing
//!
//! Greedily packs ranked chunks into a token budget and emits the citation
//! list. Citation `[i]` always refers to the i-th packed chunk.

use crate::config::PackOptions;
use crate::models::{Citation, PackedContext, RetrievedChunk};
use tracing::debug;

/// Minimum remaining budget for a partial (truncated) chunk.
const MIN_PARTIAL_TOKENS: usize = 50;
const TRUNCATION_MARKER: &str = " …";
const SNIPPET_CHARS: usize = 240;

/// `ceil(words * 1.3 + punctuation * 0.5)`. No external tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count() as f64;
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count() as f64;
    (words * 1.3 + punctuation * 0.5).ceil() as usize
}

fn chunk_header(index: usize, chunk: &RetrievedChunk) -> String {
    match chunk.metadata.page {
        Some(page) => format!("[{}] {} (p. {}):\n", index, chunk.metadata.document_name, page),
        None => format!("[{}] {}:\n", index, chunk.metadata.document_name),
    }
}

fn footer_line(citation: &Citation) -> String {
    let mut line = format!("[{}] {}", citation.id, citation.document_name);
    if let Some(page) = citation.page {
        line.push_str(&format!(", p. {}", page));
    }
    if let Some(section) = &citation.section {
        line.push_str(&format!(", §{}", section));
    }
    if let Some(url) = &citation.url {
        line.push_str(&format!(" — {}", url));
    }
    line
}

fn snippet(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= SNIPPET_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(SNIPPET_CHARS).collect();
    format!("{}…", cut.trim_end())
}

/// Longest word-prefix of `content` whose block fits in `budget` tokens.
fn truncate_to_fit(header: &str, content: &str, budget: usize) -> Option<String> {
    let words: Vec<&str> = content.split_whitespace().collect();
    let render = |n: usize| format!("{}{}{}", header, words[..n].join(" "), TRUNCATION_MARKER);

    // token estimate is monotonic in the number of words kept
    let (mut lo, mut hi) = (0usize, words.len());
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if estimate_tokens(&render(mid)) <= budget {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    if lo == 0 {
        None
    } else {
        Some(render(lo))
    }
}

fn citation_for(index: usize, chunk: &RetrievedChunk) -> Citation {
    Citation {
        id: index,
        chunk_id: chunk.id.clone(),
        document_id: chunk.metadata.document_id.clone(),
        document_name: chunk.metadata.document_name.clone(),
        page: chunk.metadata.page,
        section: chunk.metadata.section.clone(),
        url: chunk.metadata.url.clone(),
        snippet: snippet(&chunk.content),
    }
}

/// Pack chunks in rank order. Never fails; empty input gives an empty context.
pub fn pack_context(chunks: &[RetrievedChunk], options: PackOptions) -> PackedContext {
    if chunks.is_empty() {
        return PackedContext::empty();
    }

    let mut ordered: Vec<&RetrievedChunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.rank);

    let budget = options.max_tokens.saturating_sub(options.reserve_tokens);
    let mut used = 0usize;
    let mut blocks: Vec<String> = Vec::new();
    let mut citations: Vec<Citation> = Vec::new();
    let mut truncated = 0usize;

    for chunk in ordered {
        let index = citations.len() + 1;
        let header = chunk_header(index, chunk);
        let block = format!("{}{}", header, chunk.content.trim());
        let cost = estimate_tokens(&block);
        let remaining = budget - used;

        if cost <= remaining {
            used += cost;
            blocks.push(block);
            citations.push(citation_for(index, chunk));
            continue;
        }

        if remaining >= MIN_PARTIAL_TOKENS {
            if let Some(partial) = truncate_to_fit(&header, chunk.content.trim(), remaining) {
                used += estimate_tokens(&partial);
                blocks.push(partial);
                citations.push(citation_for(index, chunk));
                truncated += 1;
            }
        }

        // remaining chunks are dropped, never reordered
        break;
    }

    let mut context = blocks.join("\n\n");

    if !citations.is_empty() {
        let footer = format!(
            "Sources:\n{}",
            citations.iter().map(footer_line).collect::<Vec<_>>().join("\n")
        );
        let with_footer = format!("{}\n\n{}", context, footer);
        if estimate_tokens(&with_footer) <= options.max_tokens {
            context = with_footer;
        }
    }

    let token_count = estimate_tokens(&context);

    debug!(
        chunks_in = chunks.len(),
        chunks_used = citations.len(),
        chunks_truncated = truncated,
        token_count,
        "Packed retrieval context"
    );

    PackedContext {
        context,
        chunks_used: citations.len(),
        citations,
        token_count,
        chunks_truncated: truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn chunk(rank: usize, words: usize) -> RetrievedChunk {
        let content = (0..words).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        RetrievedChunk {
            id: format!("chunk-{}", rank),
            rank,
            score: 1.0 / rank as f64,
            content,
            metadata: ChunkMetadata {
                document_id: format!("doc-{}", rank),
                document_name: format!("Doc {}", rank),
                chunk_index: rank as u32,
                page: Some(rank as u32),
                section: Some("Intro".to_string()),
                url: Some(format!("https://docs.example.com/{}", rank)),
            },
        }
    }

    fn opts(max_tokens: usize) -> PackOptions {
        PackOptions {
            max_tokens,
            reserve_tokens: 100,
        }
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        // 2 words * 1.3 + 1 punct * 0.5 = 3.1 -> 4
        assert_eq!(estimate_tokens("hello world!"), 4);
        assert_eq!(estimate_tokens("one two three four five six seven eight nine ten"), 13);
    }

    #[test]
    fn test_empty_input() {
        let packed = pack_context(&[], opts(1000));
        assert_eq!(packed, PackedContext::empty());
        assert!(packed.is_empty());
    }

    #[test]
    fn test_citations_follow_packed_order() {
        let chunks = vec![chunk(2, 10), chunk(1, 10), chunk(3, 10)];
        let packed = pack_context(&chunks, opts(1000));

        assert_eq!(packed.chunks_used, 3);
        let ids: Vec<usize> = packed.citations.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(packed.citations[0].chunk_id, "chunk-1");
        assert!(packed.context.starts_with("[1] Doc 1 (p. 1):\n"));
        assert!(packed.context.contains("[1] Doc 1, p. 1, §Intro — https://docs.example.com/1"));
    }

    #[test]
    fn test_token_count_never_exceeds_budget() {
        let chunks: Vec<RetrievedChunk> = (1..=12).map(|r| chunk(r, 40 + r * 7)).collect();
        for max_tokens in [0, 50, 100, 120, 160, 220, 400, 800, 5000] {
            let packed = pack_context(&chunks, opts(max_tokens));
            assert!(
                packed.token_count <= max_tokens,
                "max {} got {}",
                max_tokens,
                packed.token_count
            );
            assert_eq!(packed.citations.len(), packed.chunks_used);
        }
    }

    #[test]
    fn test_partial_inclusion_marks_truncation() {
        // budget 300 - 100 = 200; first chunk ~ 140 tokens, second does not fit whole
        let chunks = vec![chunk(1, 100), chunk(2, 100), chunk(3, 100)];
        let packed = pack_context(&chunks, opts(300));

        assert_eq!(packed.chunks_used, 2);
        assert_eq!(packed.chunks_truncated, 1);
        assert!(packed.context.contains(TRUNCATION_MARKER.trim()));
        assert_eq!(packed.citations[1].chunk_id, "chunk-2");
    }

    #[test]
    fn test_too_little_room_stops_without_partial() {
        // budget 250 - 100 = 150; first chunk takes ~140, leaving < 50
        let chunks = vec![chunk(1, 100), chunk(2, 100)];
        let packed = pack_context(&chunks, opts(250));
        assert_eq!(packed.chunks_used, 1);
        assert_eq!(packed.chunks_truncated, 0);
    }

    #[test]
    fn test_packing_is_idempotent_under_resorting() {
        let chunks: Vec<RetrievedChunk> = (1..=6).map(|r| chunk(r, 30)).collect();
        let mut shuffled = chunks.clone();
        shuffled.reverse();
        shuffled.swap(1, 4);

        assert_eq!(pack_context(&chunks, opts(400)), pack_context(&shuffled, opts(400)));
    }

    #[test]
    fn test_footer_dropped_when_it_does_not_fit_but_citations_kept() {
        // the budget fits the single block exactly, leaving no room for the footer
        let chunks = vec![chunk(1, 60)];
        let block_tokens = estimate_tokens(&format!("[1] Doc 1 (p. 1):\n{}", chunks[0].content));
        let packed = pack_context(
            &chunks,
            PackOptions {
                max_tokens: block_tokens,
                reserve_tokens: 0,
            },
        );
        assert_eq!(packed.citations.len(), 1);
        assert!(!packed.context.contains("Sources:"));
        assert!(packed.token_count <= block_tokens);
    }
}
