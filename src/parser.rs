//! HTML and Markdown parsing into structured, typed sections (C5).
//!
//! A [`ParsedSection`] carries a heading trail, a type tag, and a body.
//! The Chunker (`chunk` module) consumes an ordered `Vec<ParsedSection>`
//! per document; this module never sees more than one `RawDocument` at a
//! time and has no knowledge of storage or project scoping.

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Parser as CmarkParser, Tag, TagEnd};
use scraper::{Html, Selector};

/// The section-level type tag. Distinct from `ChunkType`: a single
/// `HeadingSection` may later be packed together with sibling prose, or
/// split, by the Chunker — the Parser only records what it observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Prose,
    Code,
    HeadingOnly,
}

#[derive(Debug, Clone)]
pub struct ParsedSection {
    pub heading_path: Vec<String>,
    pub kind: SectionKind,
    pub body: String,
    /// Language hint for `kind == Code`, best-effort.
    pub language: Option<String>,
}

/// Inline code spans shorter than this are kept inline with prose rather
/// than becoming their own section.
const INLINE_CODE_THRESHOLD: usize = 32;

/// Dispatch on content type: `text/html` (or markdown served as html) uses
/// the HTML parser; everything else is treated as Markdown.
pub fn parse_document(body: &str, content_type: &str) -> Vec<ParsedSection> {
    if content_type.contains("html") {
        parse_html(body)
    } else {
        parse_markdown(body)
    }
}

// ============ HTML ============

/// Elements stripped before section extraction: navigation chrome that
/// would otherwise pollute prose sections with menu/footer text.
const CHROME_TAGS: &[&str] = &["nav", "header", "footer", "script", "style", "aside"];

/// True if `el` or any ancestor is a chrome element.
fn under_chrome(el: &scraper::ElementRef) -> bool {
    std::iter::once(*el)
        .chain(el.ancestors().filter_map(scraper::ElementRef::wrap))
        .any(|node| CHROME_TAGS.contains(&node.value().name()))
}

pub fn parse_html(body: &str) -> Vec<ParsedSection> {
    let document = Html::parse_document(body);
    let content_sel = Selector::parse("h1, h2, h3, h4, pre, table, p, li").unwrap();
    let code_sel = Selector::parse("code").unwrap();
    let row_sel = Selector::parse("tr").unwrap();
    let cell_sel = Selector::parse("td, th").unwrap();

    let mut sections = Vec::new();
    let mut heading_path: Vec<String> = Vec::new();
    let mut prose_buf = String::new();
    let mut inside_table_or_pre = Vec::new();

    let flush_prose = |buf: &mut String, sections: &mut Vec<ParsedSection>, path: &[String]| {
        let trimmed = buf.trim();
        if !trimmed.is_empty() {
            sections.push(ParsedSection {
                heading_path: path.to_vec(),
                kind: SectionKind::Prose,
                body: trimmed.to_string(),
                language: None,
            });
        }
        buf.clear();
    };

    for el in document.select(&content_sel) {
        if under_chrome(&el) {
            continue;
        }
        // Skip <p>/<li> nested inside a <table> or <pre> we already handled.
        if el.ancestors().any(|a| inside_table_or_pre.contains(&a.id())) {
            continue;
        }

        match el.value().name() {
            "h1" | "h2" | "h3" | "h4" => {
                flush_prose(&mut prose_buf, &mut sections, &heading_path);
                let level = match el.value().name() {
                    "h1" => 1,
                    "h2" => 2,
                    "h3" => 3,
                    _ => 4,
                };
                let text: String = el.text().collect::<Vec<_>>().join("").trim().to_string();
                heading_path.truncate(level.saturating_sub(1));
                heading_path.push(text);
                sections.push(ParsedSection {
                    heading_path: heading_path.clone(),
                    kind: SectionKind::HeadingOnly,
                    body: String::new(),
                    language: None,
                });
            }
            "pre" => {
                flush_prose(&mut prose_buf, &mut sections, &heading_path);
                inside_table_or_pre.push(el.id());
                let language = el.select(&code_sel).next().and_then(|code| {
                    code.value().attr("class").and_then(|c| {
                        c.split_whitespace()
                            .find(|cls| cls.starts_with("language-"))
                            .map(|cls| cls.trim_start_matches("language-").to_string())
                    })
                });
                let code_text = el.text().collect::<Vec<_>>().join("");
                sections.push(ParsedSection {
                    heading_path: heading_path.clone(),
                    kind: SectionKind::Code,
                    body: code_text,
                    language,
                });
            }
            "table" => {
                flush_prose(&mut prose_buf, &mut sections, &heading_path);
                inside_table_or_pre.push(el.id());
                for row in el.select(&row_sel) {
                    let cells: Vec<String> = row
                        .select(&cell_sel)
                        .map(|c| c.text().collect::<Vec<_>>().join(" ").trim().to_string())
                        .collect();
                    if !cells.is_empty() {
                        prose_buf.push_str(&cells.join(" | "));
                        prose_buf.push('\n');
                    }
                }
            }
            _ => {
                let text: String = el.text().collect::<Vec<_>>().join("");
                let trimmed = text.trim();
                if !trimmed.is_empty() && trimmed.len() > INLINE_CODE_THRESHOLD {
                    prose_buf.push_str(trimmed);
                    prose_buf.push('\n');
                } else if !trimmed.is_empty() {
                    prose_buf.push_str(trimmed);
                    prose_buf.push(' ');
                }
            }
        }
    }

    flush_prose(&mut prose_buf, &mut sections, &heading_path);
    sections
}

// ============ Markdown ============

pub fn parse_markdown(body: &str) -> Vec<ParsedSection> {
    let parser = CmarkParser::new(body);
    let mut sections = Vec::new();
    let mut heading_path: Vec<String> = Vec::new();
    let mut prose_buf = String::new();
    let mut code_buf = String::new();
    let mut code_lang: Option<String> = None;
    let mut in_code = false;
    let mut in_heading = false;
    let mut heading_buf = String::new();
    let mut heading_level = 1usize;
    let mut in_table = false;
    let mut table_row: Vec<String> = Vec::new();
    let mut table_cell = String::new();

    let flush_prose = |buf: &mut String, sections: &mut Vec<ParsedSection>, path: &[String]| {
        let trimmed = buf.trim();
        if !trimmed.is_empty() {
            sections.push(ParsedSection {
                heading_path: path.to_vec(),
                kind: SectionKind::Prose,
                body: trimmed.to_string(),
                language: None,
            });
        }
        buf.clear();
    };

    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                flush_prose(&mut prose_buf, &mut sections, &heading_path);
                in_heading = true;
                heading_buf.clear();
                heading_level = match level {
                    HeadingLevel::H1 => 1,
                    HeadingLevel::H2 => 2,
                    HeadingLevel::H3 => 3,
                    _ => 4,
                };
            }
            Event::End(TagEnd::Heading(_)) => {
                in_heading = false;
                heading_path.truncate(heading_level.saturating_sub(1));
                heading_path.push(heading_buf.trim().to_string());
                sections.push(ParsedSection {
                    heading_path: heading_path.clone(),
                    kind: SectionKind::HeadingOnly,
                    body: String::new(),
                    language: None,
                });
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                flush_prose(&mut prose_buf, &mut sections, &heading_path);
                in_code = true;
                code_buf.clear();
                code_lang = match kind {
                    CodeBlockKind::Fenced(info) if !info.is_empty() => {
                        Some(info.split_whitespace().next().unwrap_or("").to_string())
                    }
                    _ => None,
                };
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code = false;
                sections.push(ParsedSection {
                    heading_path: heading_path.clone(),
                    kind: SectionKind::Code,
                    body: code_buf.trim_end().to_string(),
                    language: code_lang.take(),
                });
            }
            Event::Start(Tag::Table(_)) => {
                flush_prose(&mut prose_buf, &mut sections, &heading_path);
                in_table = true;
            }
            Event::End(TagEnd::Table) => {
                in_table = false;
            }
            Event::Start(Tag::TableCell) => {
                table_cell.clear();
            }
            Event::End(TagEnd::TableCell) => {
                table_row.push(table_cell.trim().to_string());
            }
            Event::End(TagEnd::TableRow) => {
                if !table_row.is_empty() {
                    prose_buf.push_str(&table_row.join(" | "));
                    prose_buf.push('\n');
                }
                table_row.clear();
            }
            Event::Code(text) => {
                if in_heading {
                    heading_buf.push_str(&text);
                } else if text.len() > INLINE_CODE_THRESHOLD {
                    flush_prose(&mut prose_buf, &mut sections, &heading_path);
                    sections.push(ParsedSection {
                        heading_path: heading_path.clone(),
                        kind: SectionKind::Code,
                        body: text.to_string(),
                        language: None,
                    });
                } else {
                    prose_buf.push('`');
                    prose_buf.push_str(&text);
                    prose_buf.push('`');
                }
            }
            Event::Text(text) => {
                if in_code {
                    code_buf.push_str(&text);
                } else if in_heading {
                    heading_buf.push_str(&text);
                } else if in_table {
                    table_cell.push_str(&text);
                } else {
                    prose_buf.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_code {
                    code_buf.push('\n');
                } else if !in_table {
                    prose_buf.push(' ');
                }
            }
            Event::End(TagEnd::Paragraph) | Event::End(TagEnd::Item) => {
                if !in_table {
                    prose_buf.push('\n');
                }
            }
            _ => {}
        }
    }

    flush_prose(&mut prose_buf, &mut sections, &heading_path);
    sections
}
