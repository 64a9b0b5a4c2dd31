//! Outbound link harvesting for index pages.

use indexmap::IndexSet;
use scraper::Html;
use url::Url;

use crate::locate::select_all;

const SKIPPED_SCHEMES: &[&str] = &["mailto:", "javascript:", "tel:"];

/// Absolute http(s) links of `html`, fragments stripped, first occurrence
/// order kept.
pub fn page_links(html: &str, page_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let mut links = IndexSet::new();
    for anchor in select_all(document.root_element(), "a[href]") {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let lowered = href.to_lowercase();
        if SKIPPED_SCHEMES.iter().any(|s| lowered.starts_with(s)) {
            continue;
        }
        let Ok(mut url) = base.join(href) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        url.set_fragment(None);
        links.insert(url.to_string());
    }
    links.into_iter().collect()
}
