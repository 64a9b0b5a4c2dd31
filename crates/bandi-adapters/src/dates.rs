//! Best-effort open/close date recovery.

use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

use crate::text::{visible_text, visible_text_nodes};

static DATE_SHAPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2}/\d{1,2}/\d{2,4})").unwrap());

pub fn find_dates(text: &str) -> Vec<String> {
    DATE_SHAPED
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

pub fn first_date(text: &str) -> Option<String> {
    DATE_SHAPED.captures(text).map(|c| c[1].to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatePair {
    pub open: Option<String>,
    pub close: Option<String>,
}

/// Text nodes mentioning "apertura"/"chiusura" give the first date they
/// contain. Whatever is still missing is filled from the first and second
/// date-shaped substrings of the whole page.
pub fn detail_dates(root: ElementRef<'_>) -> DatePair {
    let mut dates = DatePair::default();
    for node in visible_text_nodes(root) {
        let lowered = node.to_lowercase();
        if dates.open.is_none() && lowered.contains("apertura") {
            dates.open = first_date(&lowered);
        }
        if dates.close.is_none() && lowered.contains("chiusura") {
            dates.close = first_date(&lowered);
        }
        if dates.open.is_some() && dates.close.is_some() {
            return dates;
        }
    }

    let all = find_dates(&visible_text(root));
    if dates.open.is_none() {
        dates.open = all.first().cloned();
    }
    if dates.close.is_none() {
        dates.close = all.get(1).cloned();
    }
    dates
}
