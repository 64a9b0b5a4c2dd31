//! Text sanitation shared by every extractor.

use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

/// Upper bound, in characters, of a tabular cell.
pub const MAX_CELL_CHARS: usize = 500;
pub const TRUNCATION_MARKER: &str = "...";

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Decode entities, collapse whitespace runs, trim.
pub fn clean_text(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    WHITESPACE_RUN.replace_all(&decoded, " ").trim().to_string()
}

/// Cut to `MAX_CELL_CHARS` characters, the last three being the marker.
pub fn truncate_cell(text: &str) -> String {
    if text.chars().count() <= MAX_CELL_CHARS {
        return text.to_string();
    }
    let keep = MAX_CELL_CHARS - TRUNCATION_MARKER.chars().count();
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

pub fn sanitize_cell(raw: &str) -> String {
    truncate_cell(&clean_text(raw))
}

pub fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Cleaned text of an element; adjacent text nodes are space-separated.
pub fn element_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

/// Visible text below `element`, skipping script/style/noscript content.
pub fn visible_text(element: ElementRef<'_>) -> String {
    let pieces: Vec<&str> = visible_text_nodes(element).collect();
    clean_text(&pieces.join(" "))
}

pub(crate) fn visible_text_nodes<'a>(
    element: ElementRef<'a>,
) -> impl Iterator<Item = &'a str> + 'a {
    element.descendants().filter_map(|node| {
        let text = node.value().as_text()?;
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript"))
        });
        if hidden {
            None
        } else {
            Some(&**text)
        }
    })
}

/// First character upper-cased, the rest lower-cased.
pub fn capitalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut chars = lowered.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
