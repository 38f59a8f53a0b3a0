// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Smart Chunker
//!
//! Splits long input into provider-sized pieces without breaking structure.
//!
//! Fenced code blocks and headings are atomic: a chunk either holds the whole
//! block or none of it, so every chunk carries an even number of fence
//! markers. Paragraphs and lists are packed greedily and, when a single one
//! is larger than the limit, split at sentence, list-item, word and finally
//! character boundaries.
//!
//! Sizes are counted in `char`s, never bytes.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Keep oversized inputs inside provider context budgets

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

pub const DEFAULT_OVERLAP_CHARS: usize = 200;

/// Chunks may exceed the requested size by this factor to carry overlap
pub const OVERSIZE_TOLERANCE: f64 = 1.1;

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}(\s|$)").expect("heading pattern is valid"));

static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s").expect("list item pattern is valid")
});

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("Chunk size must be positive, got {0}")]
    InvalidChunkSize(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Code,
    Heading,
    List,
    Paragraph,
}

#[derive(Debug, Clone)]
struct TextBlock {
    content: String,
    kind: BlockKind,
    splittable: bool,
    #[allow(dead_code)]
    language: Option<String>,
}

impl TextBlock {
    fn code(content: String, language: Option<String>) -> Self {
        Self {
            content,
            kind: BlockKind::Code,
            splittable: false,
            language,
        }
    }

    fn heading(content: String) -> Self {
        Self {
            content,
            kind: BlockKind::Heading,
            splittable: false,
            language: None,
        }
    }

    fn prose(lines: &[&str]) -> Self {
        let kind = if lines.first().is_some_and(|l| LIST_ITEM.is_match(l)) {
            BlockKind::List
        } else {
            BlockKind::Paragraph
        };
        Self {
            content: lines.join("\n"),
            kind,
            splittable: true,
            language: None,
        }
    }
}

/// One packed piece plus whether its tail may be repeated as overlap
struct Part {
    text: String,
    prose: bool,
}

#[derive(Debug, Clone)]
pub struct SmartChunker {
    overlap_chars: usize,
}

impl Default for SmartChunker {
    fn default() -> Self {
        Self::new(DEFAULT_OVERLAP_CHARS)
    }
}

impl SmartChunker {
    pub fn new(overlap_chars: usize) -> Self {
        Self { overlap_chars }
    }

    /// Split `text` into ordered chunks of at most `max_chunk_chars`
    /// (plus overlap tolerance).
    ///
    /// A fenced code block or heading longer than the limit is emitted
    /// whole, in a chunk of its own.
    pub fn chunk(&self, text: &str, max_chunk_chars: usize) -> Result<Vec<String>, ChunkerError> {
        if max_chunk_chars == 0 {
            return Err(ChunkerError::InvalidChunkSize(max_chunk_chars));
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        if char_len(text) <= max_chunk_chars {
            return Ok(vec![text.to_string()]);
        }

        let blocks = parse_blocks(text);
        debug!(
            blocks = blocks.len(),
            code_blocks = blocks.iter().filter(|b| b.kind == BlockKind::Code).count(),
            max_chunk_chars,
            "Chunking oversized input"
        );
        Ok(self.pack(blocks, max_chunk_chars))
    }

    fn pack(&self, blocks: Vec<TextBlock>, max: usize) -> Vec<String> {
        let hard_cap = ((max as f64) * OVERSIZE_TOLERANCE).floor() as usize;
        let mut chunks = Vec::new();
        let mut current: Vec<Part> = Vec::new();
        let mut current_size = 0usize;

        for block in blocks {
            let pieces = if block.splittable && char_len(&block.content) > max {
                split_oversized(&block.content, max)
            } else {
                vec![block.content]
            };

            for piece in pieces {
                let piece_size = char_len(&piece);
                let fits = current.is_empty() || current_size + 2 + piece_size <= max;

                if !fits {
                    let overlap = if block.splittable {
                        self.overlap_from(&current, hard_cap.saturating_sub(piece_size + 2))
                    } else {
                        None
                    };
                    chunks.push(join_parts(&current));
                    current.clear();
                    current_size = 0;

                    if let Some(overlap) = overlap {
                        current_size = char_len(&overlap);
                        current.push(Part {
                            text: overlap,
                            prose: true,
                        });
                    }
                }

                current_size += if current.is_empty() { piece_size } else { piece_size + 2 };
                current.push(Part {
                    text: piece,
                    prose: block.splittable,
                });
            }
        }

        if !current.is_empty() {
            chunks.push(join_parts(&current));
        }
        chunks
    }

    /// Trailing words of the last prose part, never containing a fence
    fn overlap_from(&self, parts: &[Part], room: usize) -> Option<String> {
        let budget = self.overlap_chars.min(room);
        if budget == 0 {
            return None;
        }
        let last = parts.last().filter(|p| p.prose)?;
        if contains_fence(&last.text) {
            return None;
        }
        tail_at_word_boundary(&last.text, budget)
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn join_parts(parts: &[Part]) -> String {
    parts
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn contains_fence(text: &str) -> bool {
    text.contains("```") || text.contains("~~~")
}

fn tail_at_word_boundary(text: &str, max_chars: usize) -> Option<String> {
    let total = char_len(text);
    let tail: String = if total <= max_chars {
        text.to_string()
    } else {
        let skipped: String = text.chars().skip(total - max_chars).collect();
        // drop the partial leading word
        let start = skipped.find(char::is_whitespace)?;
        skipped[start..].to_string()
    };

    let trimmed = tail.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Opening/closing fence: any indentation, then three or more backticks
/// or tildes. Returns the marker char, its run length and the info string.
///
/// Indented fences are common inside list items, so indentation never
/// demotes a fence to plain text.
fn fence_marker(line: &str) -> Option<(char, usize, &str)> {
    let rest = line.trim_start_matches([' ', '\t']);
    let marker = rest.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let run = rest.chars().take_while(|c| *c == marker).count();
    if run < 3 {
        return None;
    }
    let info = rest[run..].trim();
    // an inline span such as ```code``` is not a fence
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some((marker, run, info))
}

fn closes_fence(line: &str, marker: char, run: usize) -> bool {
    matches!(fence_marker(line), Some((m, r, info)) if m == marker && r >= run && info.is_empty())
}

fn flush(prose: &mut Vec<&str>, blocks: &mut Vec<TextBlock>) {
    if !prose.is_empty() {
        blocks.push(TextBlock::prose(prose));
        prose.clear();
    }
}

fn parse_blocks(text: &str) -> Vec<TextBlock> {
    let lines: Vec<&str> = text.lines().collect();
    let mut blocks = Vec::new();
    let mut prose: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some((marker, run, info)) = fence_marker(line) {
            let close = lines[i + 1..]
                .iter()
                .position(|l| closes_fence(l, marker, run))
                .map(|offset| i + 1 + offset);

            // unclosed fences are ordinary text
            if let Some(end) = close {
                flush(&mut prose, &mut blocks);
                let language = info.split_whitespace().next().map(str::to_string);
                blocks.push(TextBlock::code(lines[i..=end].join("\n"), language));
                i = end + 1;
                continue;
            }
        }

        if line.trim().is_empty() {
            flush(&mut prose, &mut blocks);
        } else if HEADING.is_match(line) {
            flush(&mut prose, &mut blocks);
            blocks.push(TextBlock::heading(line.to_string()));
        } else {
            prose.push(line);
        }
        i += 1;
    }
    flush(&mut prose, &mut blocks);

    blocks
}

type Splitter = fn(&str) -> Vec<&str>;

const SPLITTERS: [Splitter; 3] = [sentence_units, list_item_units, word_units];

/// Split one paragraph or list into pieces of at most `max` chars
fn split_oversized(text: &str, max: usize) -> Vec<String> {
    split_recursive(text, max, 0)
        .into_iter()
        .map(|piece| piece.trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}

fn split_recursive(text: &str, max: usize, level: usize) -> Vec<String> {
    if char_len(text) <= max {
        return vec![text.to_string()];
    }
    let Some(splitter) = SPLITTERS.get(level) else {
        return char_units(text, max);
    };

    let units = splitter(text);
    if units.len() <= 1 {
        return split_recursive(text, max, level + 1);
    }

    let mut out = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0;

    for unit in units {
        for piece in split_recursive(unit, max, level + 1) {
            let len = char_len(&piece);
            if !buf.is_empty() && buf_len + len > max {
                out.push(std::mem::take(&mut buf));
                buf_len = 0;
            }
            buf.push_str(&piece);
            buf_len += len;
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

/// Cut after `.`, `!` or `?` followed by whitespace, keeping the whitespace
fn sentence_units(text: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let mut end = idx + c.len_utf8();
        let mut saw_space = false;
        while let Some(&(j, w)) = chars.peek() {
            if !w.is_whitespace() {
                break;
            }
            saw_space = true;
            end = j + w.len_utf8();
            chars.next();
        }
        if saw_space {
            units.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        units.push(&text[start..]);
    }
    units
}

/// Cut before every line that starts a list item
fn list_item_units(text: &str) -> Vec<&str> {
    let mut cuts: Vec<usize> = text
        .match_indices('\n')
        .map(|(idx, _)| idx + 1)
        .filter(|&pos| pos < text.len() && LIST_ITEM.is_match(&text[pos..]))
        .collect();
    cuts.push(text.len());

    let mut units = Vec::with_capacity(cuts.len());
    let mut start = 0;
    for cut in cuts {
        if cut > start {
            units.push(&text[start..cut]);
            start = cut;
        }
    }
    units
}

/// Cut after every run of whitespace
fn word_units(text: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut start = 0;
    let mut in_space = false;

    for (idx, c) in text.char_indices() {
        if c.is_whitespace() {
            in_space = true;
        } else if in_space {
            units.push(&text[start..idx]);
            start = idx;
            in_space = false;
        }
    }
    if start < text.len() {
        units.push(&text[start..]);
    }
    units
}

/// Last resort for text with no usable boundary
fn char_units(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(max.max(1)).map(|c| c.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fence_count(chunk: &str) -> usize {
        chunk
            .lines()
            .filter(|line| line.trim_start().starts_with("```"))
            .count()
    }

    fn prose(sentences: usize, seed: &str) -> String {
        (0..sentences)
            .map(|i| format!("Sentence {i} about {seed} explains one more detail of the design."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let chunker = SmartChunker::default();
        assert_eq!(
            chunker.chunk("anything", 0),
            Err(ChunkerError::InvalidChunkSize(0))
        );
    }

    #[test]
    fn test_empty_and_short_inputs() {
        let chunker = SmartChunker::default();
        assert!(chunker.chunk("", 100).unwrap().is_empty());
        assert!(chunker.chunk("  \n ", 100).unwrap().is_empty());
        assert_eq!(chunker.chunk("short text", 100).unwrap(), vec!["short text"]);
    }

    #[test]
    fn test_code_block_is_never_split() {
        let code = format!(
            "```rust\n{}\n```",
            (0..40).map(|i| format!("let v{i} = compute({i});")).collect::<Vec<_>>().join("\n")
        );
        let text = format!(
            "# Intro\n\n{}\n\n{}\n\n{}\n\n## After\n\n{}",
            prose(10, "setup"),
            code,
            prose(12, "results"),
            prose(8, "wrap-up")
        );

        let chunks = SmartChunker::default().chunk(&text, 1_000).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(fence_count(chunk) % 2, 0, "fence split in chunk: {chunk}");
        }
        assert_eq!(chunks.iter().filter(|c| c.contains(&code)).count(), 1);

        let total: usize = chunks.iter().map(|c| c.chars().count()).sum();
        assert!(total as f64 >= text.chars().count() as f64 * 0.95);
    }

    #[test]
    fn test_oversized_code_block_gets_own_chunk() {
        let code = format!("```\n{}\n```", "x = 1\n".repeat(100));
        let text = format!("{}\n\n{}\n\n{}", prose(3, "before"), code, prose(3, "after"));

        let chunks = SmartChunker::default().chunk(&text, 300).unwrap();
        let holder: Vec<_> = chunks.iter().filter(|c| c.contains("```")).collect();
        assert_eq!(holder.len(), 1);
        assert_eq!(holder[0].trim(), code.trim());
    }

    #[test]
    fn test_chunks_respect_tolerance() {
        let text = (0..30)
            .map(|i| format!("## Section {i}\n\n{}", prose(4, "topic")))
            .collect::<Vec<_>>()
            .join("\n\n");
        let max = 500;

        let chunks = SmartChunker::default().chunk(&text, max).unwrap();
        for chunk in &chunks {
            assert!(chunk.chars().count() <= (max as f64 * OVERSIZE_TOLERANCE) as usize);
        }
    }

    #[test]
    fn test_long_paragraph_splits_at_sentences() {
        let text = prose(40, "splitting");
        let chunks = SmartChunker::new(0).chunk(&text, 400).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 400);
            assert!(chunk.ends_with('.'), "chunk does not end on a sentence: {chunk}");
        }
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_text_without_whitespace_splits_by_chars() {
        let text = "é".repeat(2_500);
        let chunks = SmartChunker::default().chunk(&text, 1_000).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 1_000);
        assert_eq!(chunks[2].chars().count(), 500);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_unclosed_fence_is_plain_text() {
        let text = format!("```python\n{}", "word ".repeat(400));
        let chunks = SmartChunker::new(0).chunk(&text, 500).unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 500));
    }

    #[test]
    fn test_overlap_carries_prior_words_forward() {
        let first = prose(6, "alpha");
        let second = prose(6, "beta");
        let text = format!("{first}\n\n{second}");
        let max = first.chars().count() + 10;

        let chunks = SmartChunker::new(40).chunk(&text, max).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], first);

        let carried = chunks[1].split("\n\n").next().unwrap();
        assert!(first.ends_with(carried));
        assert!(carried.chars().count() <= 40);
        assert!(chunks[1].ends_with(&second));
    }

    #[test]
    fn test_overlap_never_taken_from_code() {
        let code = format!("```\n{}\n```", "print('hi')\n".repeat(20));
        let text = format!("{code}\n\n{}", prose(20, "tail"));
        let chunks = SmartChunker::default().chunk(&text, code.chars().count() + 5).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks[1..] {
            assert_eq!(fence_count(chunk), 0);
        }
    }

    #[test]
    fn test_indented_fence_in_list_stays_whole() {
        let code = (0..60)
            .map(|i| format!("    let step{i} = install_component({i});"))
            .collect::<Vec<_>>()
            .join("\n");
        let text = format!(
            "1. Install the toolchain. {}\n\n    ```rust\n{code}\n    ```\n\n2. Run it. {}",
            prose(4, "setup"),
            prose(4, "running")
        );

        let chunks = SmartChunker::default().chunk(&text, 800).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(fence_count(chunk) % 2, 0, "unbalanced fences in {chunk:?}");
        }
        let holder: Vec<&String> = chunks.iter().filter(|c| c.contains("```rust")).collect();
        assert_eq!(holder.len(), 1);
        assert!(holder[0].contains("install_component(0)"));
        assert!(holder[0].contains("install_component(59)"));
    }

    #[test]
    fn test_closing_fence_must_match_opener() {
        // a ~~~ line does not close a ``` block
        let blocks = parse_blocks("```\nfirst\n~~~\nsecond\n```\nafter");
        assert_eq!(blocks[0].kind, BlockKind::Code);
        assert_eq!(blocks[0].content, "```\nfirst\n~~~\nsecond\n```");
        assert_eq!(blocks[1].content, "after");

        // a shorter run does not close a longer opener
        let blocks = parse_blocks("````md\n```\ninner\n```\n````");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Code);
    }

    #[test]
    fn test_list_items_split_at_item_boundaries() {
        let items = (0..30)
            .map(|i| format!("- item number {i} with a short description"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = SmartChunker::new(0).chunk(&items, 300).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.starts_with("- item"));
            assert!(chunk.chars().count() <= 300);
        }
    }
}
