//! Status vocabulary and the status locator chains.

use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

use crate::locate::{find_by_class, select_first, Locator};
use crate::text::{element_text, visible_text};

/// Closed set of status keywords, matched as case-insensitive substrings.
/// Longest first: "non attivo" must be tried before "attivo".
pub const STATUS_VOCABULARY: &[&str] = &[
    "in programma",
    "programmato",
    "disponibile",
    "non attivo",
    "pubblicato",
    "terminato",
    "annullato",
    "in arrivo",
    "in corso",
    "esaurito",
    "concluso",
    "scaduto",
    "sospeso",
    "avviato",
    "aperto",
    "chiuso",
    "attivo",
    "attivi",
];

pub fn looks_like_status(text: &str) -> bool {
    first_keyword(text).is_some()
}

/// First vocabulary entry (in vocabulary order) contained in `text`.
pub fn first_keyword(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    STATUS_VOCABULARY
        .iter()
        .copied()
        .find(|k| lowered.contains(k))
}

fn status_text(element: Option<ElementRef<'_>>) -> Option<String> {
    let text = element_text(element?);
    looks_like_status(&text).then_some(text)
}

fn status_item(node: ElementRef<'_>) -> Option<String> {
    status_text(select_first(node, "div.status-item.loading"))
        .or_else(|| status_text(select_first(node, "div.status-item")))
}

fn classed_status_or_stato(node: ElementRef<'_>) -> Option<String> {
    find_by_class(node, &["div", "span"], &["status", "stato"])
        .map(element_text)
        .find(|t| looks_like_status(t))
}

fn classed_badge(node: ElementRef<'_>) -> Option<String> {
    find_by_class(node, &["div"], &["badge", "tag", "label"])
        .map(element_text)
        .find(|t| looks_like_status(t))
}

fn column_text(node: ElementRef<'_>) -> Option<String> {
    status_text(Some(node))
}

/// Listing columns: explicit status widgets, then the column's own text.
/// The last tier also catches a status written inside a date line
/// ("chiuso il 3/3/2024"); there is no separate date tier.
pub const LISTING_STATUS_CHAIN: &[Locator] = &[
    Locator::Probe("status-item widget", status_item),
    Locator::Probe("status/stato class", classed_status_or_stato),
    Locator::Probe("badge/tag/label class", classed_badge),
    Locator::Probe("column text", column_text),
];

fn detail_badge(node: ElementRef<'_>) -> Option<String> {
    find_by_class(
        node,
        &["span", "div", "strong", "p", "li"],
        &["badge", "stato", "label", "status"],
    )
    .map(|el| element_text(el).to_lowercase())
    .find(|t| looks_like_status(t))
}

static STATUS_PHRASES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"bando.*?attivo.*?\d{1,2}:\d{2}", "attivo"),
        (r"servizio.*?attivo.*?\d{1,2}:\d{2}", "attivo"),
        (r"sportello.*?attivo.*?\d{1,2}:\d{2}", "attivo"),
        (r"attivo.*?dal.*?\d{1,2}/\d{1,2}/\d{4}", "attivo"),
        (r"attivo.*?fino.*?esaurimento", "attivo"),
        (r"in arrivo", "in arrivo"),
        (r"disponibile", "disponibile"),
    ]
    .into_iter()
    .map(|(pattern, status)| (Regex::new(&format!("(?i){pattern}")).unwrap(), status))
    .collect()
});

fn detail_phrase(node: ElementRef<'_>) -> Option<String> {
    let text = visible_text(node);
    STATUS_PHRASES
        .iter()
        .find(|(re, _)| re.is_match(&text))
        .map(|(_, status)| status.to_string())
}

fn detail_keyword(node: ElementRef<'_>) -> Option<String> {
    first_keyword(&visible_text(node)).map(str::to_string)
}

/// Detail pages: classed badge, then known phrases, then any keyword.
pub const DETAIL_STATUS_CHAIN: &[Locator] = &[
    Locator::Probe("classed badge", detail_badge),
    Locator::Probe("status phrase", detail_phrase),
    Locator::Probe("body keyword", detail_keyword),
];
