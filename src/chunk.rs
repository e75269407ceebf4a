//! Chunker (C4): splits parsed sections into bounded, typed chunks with
//! adjacency metadata and deterministic identity.
//!
//! Rules (see SPEC_FULL.md §4.4):
//! - A `code` section becomes one chunk if within the size bound; oversize
//!   code is split only on blank lines or line boundaries, never mid-line.
//! - Prose is packed up to a target size with the current heading prepended
//!   for context; oversize prose splits with soft overlap (the last
//!   sentence is repeated) so neighboring chunks share context, and the
//!   split never breaks a sentence.
//! - A heading with no body before the next heading becomes a single
//!   `heading-section` chunk.
//! - Running this twice on identical input yields identical chunk sets,
//!   including `chunkId`s, because ids are derived from `(sourceId, url,
//!   chunkIndex)` rather than randomly generated.

use crate::models::{derive_chunk_id, content_hash, Chunk, ChunkType};
use crate::parser::{ParsedSection, SectionKind};
use chrono::Utc;

/// Target size, in characters, for a packed prose/code chunk.
pub const DEFAULT_MAX_CHARS: usize = 1800;
/// Soft overlap budget, in characters, carried into the next prose chunk.
pub const DEFAULT_OVERLAP_CHARS: usize = 200;

/// Heading-trail keywords that mark a section as API reference material.
const API_HEADING_HINTS: &[&str] = &["api", "reference", "signature", "method", "function"];

pub struct ChunkerInput<'a> {
    pub project_id: &'a str,
    pub source_id: &'a str,
    pub document_id: &'a str,
    pub url: &'a str,
    pub sections: &'a [ParsedSection],
    pub max_chars: usize,
    pub overlap_chars: usize,
}

/// Intermediate, pre-id chunk — built first so `chunkIndex`/`totalChunks`
/// can be assigned once the full set for a document is known.
struct Draft {
    chunk_type: ChunkType,
    text: String,
    title: Option<String>,
    heading_path: Vec<String>,
    language: Option<String>,
}

pub fn chunk_sections(input: &ChunkerInput) -> Vec<Chunk> {
    let mut drafts = Vec::new();
    let sections = input.sections;

    let mut i = 0;
    while i < sections.len() {
        let section = &sections[i];
        match section.kind {
            SectionKind::HeadingOnly => {
                let next_is_content = sections
                    .get(i + 1)
                    .map(|s| s.kind != SectionKind::HeadingOnly)
                    .unwrap_or(false);
                if !next_is_content {
                    let title = section.heading_path.last().cloned();
                    drafts.push(Draft {
                        chunk_type: ChunkType::HeadingSection,
                        text: title.clone().unwrap_or_default(),
                        title,
                        heading_path: section.heading_path.clone(),
                        language: None,
                    });
                }
            }
            SectionKind::Code => {
                let is_example = heading_contains(&section.heading_path, "example");
                let chunk_type = if is_example {
                    ChunkType::Example
                } else {
                    ChunkType::Code
                };
                // §3 invariant: `language` is set iff `type = code`; Example
                // chunks carry code too but don't qualify.
                let language = if is_example { None } else { section.language.clone() };
                for piece in split_code(&section.body, input.max_chars) {
                    drafts.push(Draft {
                        chunk_type,
                        text: piece,
                        title: section.heading_path.last().cloned(),
                        heading_path: section.heading_path.clone(),
                        language: language.clone(),
                    });
                }
            }
            SectionKind::Prose => {
                let chunk_type = if is_api_reference(section) {
                    ChunkType::ApiReference
                } else {
                    ChunkType::Prose
                };
                let heading_title = section.heading_path.last().cloned();
                for piece in split_prose(
                    &section.body,
                    input.max_chars,
                    input.overlap_chars,
                    heading_title.as_deref(),
                ) {
                    drafts.push(Draft {
                        chunk_type,
                        text: piece,
                        title: heading_title.clone(),
                        heading_path: section.heading_path.clone(),
                        language: None,
                    });
                }
            }
        }
        i += 1;
    }

    if drafts.is_empty() {
        return Vec::new();
    }

    let total_chunks = drafts.len() as i64;
    let now = Utc::now();

    drafts
        .into_iter()
        .enumerate()
        .map(|(idx, draft)| {
            let chunk_index = idx as i64;
            let chunk_id = derive_chunk_id(input.source_id, input.url, chunk_index);
            Chunk {
                chunk_id,
                document_id: input.document_id.to_string(),
                project_id: input.project_id.to_string(),
                source_id: input.source_id.to_string(),
                chunk_index,
                total_chunks,
                chunk_type: draft.chunk_type,
                content_hash: content_hash(&draft.text),
                text: draft.text,
                title: draft.title,
                heading_path: draft.heading_path,
                url: input.url.to_string(),
                language: draft.language,
                created_at: now,
                updated_at: now,
                orphaned_at: None,
            }
        })
        .collect()
}

fn heading_contains(path: &[String], needle: &str) -> bool {
    path.iter().any(|h| h.to_lowercase().contains(needle))
}

fn is_api_reference(section: &ParsedSection) -> bool {
    if API_HEADING_HINTS
        .iter()
        .any(|hint| heading_contains(&section.heading_path, hint))
    {
        return true;
    }
    let trimmed = section.body.trim();
    let single_line = !trimmed.contains('\n');
    let looks_like_signature = trimmed.contains('(')
        && trimmed.contains(')')
        && !trimmed.ends_with('.')
        && trimmed.len() < 200;
    single_line && looks_like_signature
}

/// Split code only on blank lines or line boundaries; never mid-line.
fn split_code(body: &str, max_chars: usize) -> Vec<String> {
    if body.len() <= max_chars || max_chars == 0 {
        return vec![body.to_string()];
    }

    let lines: Vec<&str> = body.lines().collect();
    let mut pieces = Vec::new();
    let mut current = String::new();

    for line in lines {
        let would_be = if current.is_empty() {
            line.len()
        } else {
            current.len() + 1 + line.len()
        };
        if would_be > max_chars && !current.is_empty() {
            pieces.push(current.trim_end().to_string());
            current.clear();
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.trim().is_empty() {
        pieces.push(current.trim_end().to_string());
    }
    if pieces.is_empty() {
        pieces.push(body.to_string());
    }
    pieces
}

/// Split prose into target-size pieces with soft sentence overlap. Splits
/// occur at sentence boundaries (`. `, `! `, `? `, or newline) so a chunk
/// never ends mid-sentence.
fn split_prose(
    body: &str,
    max_chars: usize,
    overlap_chars: usize,
    heading_title: Option<&str>,
) -> Vec<String> {
    let prefix = heading_title
        .map(|h| format!("{h}\n\n"))
        .unwrap_or_default();

    if prefix.len() + body.len() <= max_chars || max_chars == 0 {
        return vec![format!("{prefix}{body}")];
    }

    let sentences = split_into_sentences(body);
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut overlap_carry = String::new();

    for sentence in sentences {
        let candidate_len = prefix.len() + overlap_carry.len() + current.len() + sentence.len();
        if candidate_len > max_chars && !current.is_empty() {
            pieces.push(format!("{prefix}{overlap_carry}{current}"));
            overlap_carry = trailing_overlap(&current, overlap_chars);
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence);
    }
    if !current.trim().is_empty() {
        pieces.push(format!("{prefix}{overlap_carry}{current}"));
    }
    if pieces.is_empty() {
        pieces.push(format!("{prefix}{body}"));
    }
    pieces
}

fn split_into_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        current.push(c);
        if (c == '.' || c == '!' || c == '?')
            && chars.get(i + 1).map(|n| n.is_whitespace()).unwrap_or(true)
        {
            sentences.push(current.trim().to_string());
            current.clear();
        } else if c == '\n' && chars.get(i + 1) == Some(&'\n') {
            if !current.trim().is_empty() {
                sentences.push(current.trim().to_string());
            }
            current.clear();
        }
        i += 1;
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    sentences.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Last sentence(s) of `text`, bounded to `overlap_chars`, used as the soft
/// overlap prepended to the next piece.
fn trailing_overlap(text: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 {
        return String::new();
    }
    let sentences = split_into_sentences(text);
    let Some(last) = sentences.last() else {
        return String::new();
    };
    let truncated = if last.len() > overlap_chars {
        // `last.len() - overlap_chars` is a byte offset and need not land on
        // a char boundary; walk forward to the nearest one so multi-byte
        // text never panics here.
        let target = last.len() - overlap_chars;
        let boundary = last
            .char_indices()
            .map(|(i, _)| i)
            .find(|&i| i >= target)
            .unwrap_or(last.len());
        &last[boundary..]
    } else {
        last.as_str()
    };
    format!("{}\n\n", truncated.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_markdown;

    fn chunk_markdown(md: &str, max_chars: usize) -> Vec<Chunk> {
        let sections = parse_markdown(md);
        let input = ChunkerInput {
            project_id: "proj",
            source_id: "src-1",
            document_id: "doc-1",
            url: "generated-docs://proj/a.md",
            sections: &sections,
            max_chars,
            overlap_chars: DEFAULT_OVERLAP_CHARS,
        };
        chunk_sections(&input)
    }

    #[test]
    fn code_fence_only_document_is_one_code_chunk() {
        let md = "```rust\nfn main() {}\n```\n";
        let chunks = chunk_markdown(md, DEFAULT_MAX_CHARS);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::Code);
        assert_eq!(chunks[0].language.as_deref(), Some("rust"));
    }

    #[test]
    fn chunk_indices_are_contiguous() {
        let md = (0..80)
            .map(|i| format!("Paragraph number {i} with enough text to matter here."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_markdown(&md, 200);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.total_chunks, chunks.len() as i64);
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let md = "# A\n\nSome prose here.\n\n```js\nconsole.log(1)\n```\n";
        let a = chunk_markdown(md, DEFAULT_MAX_CHARS);
        let b = chunk_markdown(md, DEFAULT_MAX_CHARS);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.chunk_id, y.chunk_id);
            assert_eq!(x.text, y.text);
        }
    }

    #[test]
    fn language_only_set_for_code_chunks() {
        let md = "# A\n\nprose\n\n```python\nx = 1\n```\n\n## Example\n\n```python\ny = 2\n```\n";
        let chunks = chunk_markdown(md, DEFAULT_MAX_CHARS);
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Example));
        for c in &chunks {
            if c.chunk_type == ChunkType::Code {
                assert!(c.language.is_some());
            } else {
                // Including `Example` chunks, which carry code but are not
                // `Code` — §3's invariant is "language set iff type = code".
                assert!(c.language.is_none());
            }
        }
    }

    #[test]
    fn trailing_overlap_does_not_panic_on_multibyte_boundary() {
        // "é" is 2 bytes; repeated, a naive `len() - overlap_chars` byte
        // slice lands mid-character unless it walks to a char boundary.
        let sentence = "café ".repeat(100);
        let overlap = trailing_overlap(&sentence, 7);
        assert!(overlap.chars().all(|c| c != '\u{fffd}'));
    }

    #[test]
    fn empty_heading_becomes_heading_section_chunk() {
        let md = "# Top\n\n## Empty Heading\n\n## Next Heading\n\nSome content under next.\n";
        let chunks = chunk_markdown(md, DEFAULT_MAX_CHARS);
        assert!(chunks
            .iter()
            .any(|c| c.chunk_type == ChunkType::HeadingSection && c.text == "Empty Heading"));
    }

    #[test]
    fn oversize_code_splits_on_line_boundaries_only() {
        let lines: Vec<String> = (0..100).map(|i| format!("line {i}")).collect();
        let code = format!("```\n{}\n```\n", lines.join("\n"));
        let chunks = chunk_markdown(&code, 100);
        assert!(chunks.len() > 1);
        for c in &chunks {
            for line in c.text.lines() {
                assert!(lines.contains(&line.to_string()) || line.is_empty());
            }
        }
    }
}
